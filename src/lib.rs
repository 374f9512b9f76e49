//! Resource Map Resolver
//!
//! Finds the resource map (ORE aggregation) that describes a document in a
//! DataONE-style repository, even before the search index has caught up:
//! - Version chain tracking over sysmeta `obsoletes`/`obsoletedBy` links
//! - LRU + TTL caching with durable SQLite persistence
//! - Index, stored-pair, chain-walk and naming-convention strategies
//! - Membership verification of every non-index answer
//! - Per-PID event logs and broadcast status events

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod index;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod sysmeta;
pub mod tracker;
pub mod verifier;

// Re-exports for convenience
pub use config::{ResolverConfig, ServiceConfig, TrackerConfig};
pub use error::{FetchError, ResolverError, Result, StoreError};
pub use registry::Registry;
pub use resolver::{ResolutionResult, ResourceMapResolver, Status};
pub use tracker::{ChainSnapshot, VersionTracker};
