//! SubHub - subscription aggregation and node curation pipeline
//!
//! Aggregates proxy subscriptions from heterogeneous upstream sources,
//! normalizes every advertised endpoint into a canonical node, dedups,
//! probes reachability and latency, classifies by region and service,
//! and materializes per-group URI lists plus per-client configs. A thin
//! HTTP facade serves the artifacts.
//!
//! # Architecture
//!
//! ```text
//! sources -> fetch -> parser -> dedup -> classify (pass 1)
//!     -> probe (geo verify) -> filter -> classify + rename -> group
//!     -> emit -> output/          hub/ serves output/
//! ```

pub mod classify;
pub mod common;
pub mod config;
pub mod dedup;
pub mod emit;
pub mod events;
pub mod fetch;
pub mod geo;
pub mod group;
pub mod hub;
pub mod notify;
pub mod parser;
pub mod pipeline;
pub mod probe;
pub mod status;

pub use common::error::{Error, Result};
pub use common::node::{Node, Protocol};
pub use config::Config;
pub use pipeline::{SyncPipeline, SyncReport};

/// Crate version served by the status endpoint
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_semver_ish() {
        assert!(VERSION.split('.').count() >= 2);
    }
}
