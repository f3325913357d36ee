//! # Engine Configuration
//!
//! Every knob the engine reads during a load. All fields default, so a
//! partial TOML table is enough; the binary layers environment overrides
//! on top.

use crate::ecl::EclSettings;
use crate::graph::{PhantomPolicy, StoreOptions};
use crate::integrity::IntegrityOptions;
use crate::primitives;
use crate::remote::RetryPolicy;
use crate::types::{ConceptId, GraphError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

/// Remote retry settings in serializable form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub pause_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: primitives::DEFAULT_REMOTE_ATTEMPTS,
            pause_ms: primitives::DEFAULT_RETRY_PAUSE.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root of `releases/`, `snapshots/` and the expression cache file.
    pub cache_dir: PathBuf,
    /// Environment tag used in generated snapshot names.
    pub environment: String,
    pub excluded_modules: BTreeSet<u64>,
    /// Tolerate phantoms that only inactive refset members reference.
    pub load_all_refsets: bool,
    /// Keep members of reference sets the engine has no typed model for.
    pub load_other_refsets: bool,
    pub populate_depth: bool,
    pub run_integrity_check: bool,
    pub check_stated_parents: bool,
    pub description_sample_size: usize,
    /// Phantoms silently dropped at the end of a load.
    pub phantom_whitelist: BTreeSet<u64>,
    /// Use a cached snapshot even when the branch has moved on.
    pub allow_stale: bool,
    pub ecl_page_size: usize,
    pub retry: RetryConfig,
    pub empty_result_pause_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache"),
            environment: "local".to_string(),
            excluded_modules: BTreeSet::new(),
            load_all_refsets: false,
            load_other_refsets: false,
            populate_depth: true,
            run_integrity_check: true,
            check_stated_parents: true,
            description_sample_size: primitives::DEFAULT_DESCRIPTION_SAMPLE,
            phantom_whitelist: BTreeSet::new(),
            allow_stale: false,
            ecl_page_size: primitives::DEFAULT_ECL_PAGE_SIZE,
            retry: RetryConfig::default(),
            empty_result_pause_ms: primitives::DEFAULT_EMPTY_RESULT_PAUSE.as_millis() as u64,
        }
    }
}

impl EngineConfig {
    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.ecl_page_size == 0 {
            return Err(GraphError::Config("ecl_page_size must be positive".into()));
        }
        if self.retry.attempts == 0 {
            return Err(GraphError::Config("retry.attempts must be positive".into()));
        }
        if self.environment.is_empty() || self.environment.contains(['/', '\\']) {
            return Err(GraphError::Config(format!(
                "invalid environment tag '{}'",
                self.environment
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            excluded_modules: self.excluded_modules.iter().copied().map(ConceptId).collect(),
            load_other_refsets: self.load_other_refsets,
        }
    }

    #[must_use]
    pub fn phantom_policy(&self) -> PhantomPolicy {
        PhantomPolicy {
            whitelist: self.phantom_whitelist.iter().copied().map(ConceptId).collect(),
            load_all_refsets: self.load_all_refsets,
        }
    }

    #[must_use]
    pub fn integrity_options(&self) -> IntegrityOptions {
        IntegrityOptions {
            check_stated_parents: self.check_stated_parents,
            check_depth: self.populate_depth,
            description_sample_size: self.description_sample_size,
            ..IntegrityOptions::default()
        }
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry.attempts, Duration::from_millis(self.retry.pause_ms))
    }

    #[must_use]
    pub fn ecl_settings(&self) -> EclSettings {
        EclSettings {
            page_size: self.ecl_page_size,
            retry: self.retry_policy(),
            empty_result_pause: Duration::from_millis(self.empty_result_pause_ms),
        }
    }

    #[must_use]
    pub fn releases_dir(&self) -> PathBuf {
        self.cache_dir.join("releases")
    }

    #[must_use]
    pub fn snapshots_dir(&self) -> PathBuf {
        self.cache_dir.join("snapshots")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.integrity_options().check_depth);
        assert_eq!(config.retry_policy().attempts, primitives::DEFAULT_REMOTE_ATTEMPTS);
        assert_eq!(config.snapshots_dir(), PathBuf::from("cache").join("snapshots"));
    }

    #[test]
    fn derived_options_carry_ids() {
        let config = EngineConfig {
            excluded_modules: BTreeSet::from([11]),
            phantom_whitelist: BTreeSet::from([22]),
            load_all_refsets: true,
            ..EngineConfig::default()
        };
        assert!(config.store_options().excluded_modules.contains(&ConceptId(11)));
        let policy = config.phantom_policy();
        assert!(policy.whitelist.contains(&ConceptId(22)));
        assert!(policy.load_all_refsets);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let zero_page = EngineConfig {
            ecl_page_size: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(zero_page.validate(), Err(GraphError::Config(_))));

        let bad_env = EngineConfig {
            environment: "a/b".into(),
            ..EngineConfig::default()
        };
        assert!(bad_env.validate().is_err());
    }
}
