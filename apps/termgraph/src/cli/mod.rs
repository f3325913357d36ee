//! # termgraph CLI Module
//!
//! ## Available Commands
//!
//! - `load` - Load an archive or project and print a summary
//! - `check` - Load without failing and print the integrity report
//! - `ancestors` / `descendants` - Hierarchy queries
//! - `ecl` - Resolve an expression
//! - `closure` - Transitive closure statistics, optionally against a previous release
//! - `generate` - Merge RF2 layers into a snapshot archive
//! - `serve` - Start the HTTP query API

mod commands;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use termgraph_core::{GraphError, ProjectTarget};

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// termgraph - load, check and query RF2 ontology snapshots
#[derive(Parser, Debug)]
#[command(name = "termgraph")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress summary lines
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (default: ./termgraph.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where the graph comes from.
#[derive(Args, Debug, Clone, Default)]
pub struct SourceArgs {
    /// Local archive: expanded directory, zip package or RF2 file
    #[arg(short, long, conflicts_with_all = ["project", "release"])]
    pub archive: Option<PathBuf>,

    /// Project key on the authoring service
    #[arg(short, long)]
    pub project: Option<String>,

    /// Task key under the project
    #[arg(short, long, requires = "project")]
    pub task: Option<String>,

    /// Branch path (default: MAIN/<project>[/<task>])
    #[arg(short, long, requires = "project")]
    pub branch: Option<String>,

    /// Published release package key
    #[arg(short, long, conflicts_with = "project")]
    pub release: Option<String>,

    /// Delta archives merged after the load, in order
    #[arg(short, long = "delta")]
    pub deltas: Vec<PathBuf>,
}

/// A resolved source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Local(PathBuf),
    Target(ProjectTarget),
}

impl SourceArgs {
    pub fn resolve(&self) -> Result<Source, GraphError> {
        if let Some(path) = &self.archive {
            return Ok(Source::Local(path.clone()));
        }
        if let Some(key) = &self.release {
            return Ok(Source::Target(ProjectTarget::release(key.clone())));
        }
        let Some(project) = &self.project else {
            return Err(GraphError::Config(
                "one of --archive, --project or --release is required".into(),
            ));
        };
        let branch = self.branch.clone().unwrap_or_else(|| match &self.task {
            Some(task) => format!("MAIN/{}/{}", project, task),
            None => format!("MAIN/{}", project),
        });
        Ok(Source::Target(ProjectTarget::branch(
            project.clone(),
            self.task.clone(),
            branch,
        )))
    }
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load a graph and print a summary
    Load {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Load a graph and print its integrity report
    Check {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Proper ancestors of a concept
    Ancestors {
        #[command(flatten)]
        source: SourceArgs,

        /// Concept id
        id: u64,

        /// Use the Stated view instead of Inferred
        #[arg(long)]
        stated: bool,
    },

    /// Descendants of a concept
    Descendants {
        #[command(flatten)]
        source: SourceArgs,

        /// Concept id
        id: u64,

        /// Use the Stated view instead of Inferred
        #[arg(long)]
        stated: bool,

        /// Include the concept itself
        #[arg(long)]
        include_self: bool,
    },

    /// Resolve an expression
    Ecl {
        #[command(flatten)]
        source: SourceArgs,

        /// Expression, e.g. "<< 404684003"
        expression: String,

        /// Branch the expression is evaluated on
        #[arg(long = "on-branch", default_value = "MAIN")]
        on_branch: String,
    },

    /// Transitive closure statistics
    Closure {
        #[command(flatten)]
        source: SourceArgs,

        /// Use the Stated view instead of Inferred
        #[arg(long)]
        stated: bool,

        /// Previous release archive to compare against
        #[arg(long)]
        previous: Option<PathBuf>,
    },

    /// Merge RF2 layers into a snapshot archive
    Generate {
        /// Layers in precedence order (later wins on equal times)
        #[arg(short, long = "layer", required = true)]
        layers: Vec<PathBuf>,

        /// Output zip path
        #[arg(short, long)]
        output: PathBuf,

        /// File name tag, e.g. INT_20240301
        #[arg(long, default_value = "INT")]
        tag: String,
    },

    /// Start the HTTP query API over a loaded graph
    Serve {
        #[command(flatten)]
        source: SourceArgs,

        /// Host to bind to (default from config)
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to (default from config)
        #[arg(short = 'P', long)]
        port: Option<u16>,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), GraphError> {
    let config = crate::config::AppConfig::load(cli.config.as_deref())?;
    let out = Output {
        json_mode: cli.json_mode,
        quiet: cli.quiet,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Load { source } => cmd_load(config, source, out).await,
        Commands::Check { source } => cmd_check(config, source, out).await,
        Commands::Ancestors { source, id, stated } => {
            cmd_hierarchy(config, source, out, Hierarchy::Ancestors, id, stated).await
        }
        Commands::Descendants {
            source,
            id,
            stated,
            include_self,
        } => {
            let direction = if include_self {
                Hierarchy::DescendantsOrSelf
            } else {
                Hierarchy::Descendants
            };
            cmd_hierarchy(config, source, out, direction, id, stated).await
        }
        Commands::Ecl {
            source,
            expression,
            on_branch,
        } => cmd_ecl(config, source, out, expression, on_branch).await,
        Commands::Closure {
            source,
            stated,
            previous,
        } => cmd_closure(config, source, out, stated, previous).await,
        Commands::Generate {
            layers,
            output,
            tag,
        } => cmd_generate(layers, output, tag, out).await,
        Commands::Serve { source, host, port } => cmd_serve(config, source, host, port).await,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn default_branch_follows_project_and_task() {
        let args = SourceArgs {
            project: Some("PROJ".into()),
            task: Some("TASK-1".into()),
            ..SourceArgs::default()
        };
        assert_eq!(
            args.resolve().ok(),
            Some(Source::Target(ProjectTarget::branch(
                "PROJ",
                Some("TASK-1".into()),
                "MAIN/PROJ/TASK-1"
            )))
        );
    }

    #[test]
    fn missing_source_is_a_config_error() {
        assert!(matches!(
            SourceArgs::default().resolve(),
            Err(GraphError::Config(_))
        ));
    }

    #[test]
    fn flattened_source_parses() {
        let cli = Cli::try_parse_from([
            "termgraph",
            "descendants",
            "--archive",
            "snap.zip",
            "--delta",
            "d1.zip",
            "--delta",
            "d2.zip",
            "138875005",
            "--include-self",
        ]);
        let Ok(cli) = cli else {
            unreachable!("parse failed");
        };
        let Commands::Descendants {
            source,
            id,
            include_self,
            stated,
        } = cli.command
        else {
            unreachable!("wrong command");
        };
        assert_eq!(id, 138875005);
        assert!(include_self);
        assert!(!stated);
        assert_eq!(source.deltas.len(), 2);
        assert_eq!(source.archive, Some(PathBuf::from("snap.zip")));
    }
}
