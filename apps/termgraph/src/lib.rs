//! # termgraph
//!
//! Application layer over `termgraph-core`: configuration, the HTTP client
//! for the authoring service, the command line and the read-only query
//! API.

pub mod api;
pub mod cli;
pub mod config;
pub mod remote;
