//! Configuration
//!
//! Constructor-time settings for the tracker, the resolver and the HTTP
//! collaborators used by the binary. Every value has a documented default.

use std::path::PathBuf;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::error::{ResolverError, Result};
use crate::events::Level;

pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_MAX_CHAIN_HOPS: usize = 200;
pub const DEFAULT_MAX_CACHE_RECORDS: usize = 5000;

pub const DEFAULT_RESOLVER_ID: &str = "unknown";
pub const DEFAULT_MAX_STEPS: usize = 200;
pub const DEFAULT_MAX_FETCH_TIME: Duration = Duration::from_secs(45);
pub const DEFAULT_GUESS_PREFIX: &str = "resource_map_";
pub const DEFAULT_MAX_LOG_EVENTS: usize = 500;
pub const DEFAULT_MAX_LOGGED_PIDS: usize = 1000;

pub const DEFAULT_META_SERVICE_URL: &str = "https://cn.dataone.org/cn/v2/meta/";
pub const DEFAULT_QUERY_SERVICE_URL: &str = "https://cn.dataone.org/cn/v2/query/solr/";
pub const DEFAULT_OBJECT_SERVICE_URL: &str = "https://cn.dataone.org/cn/v2/object/";
pub const DEFAULT_DB_FILE: &str = "resmap_cache.db";

/// Settings for the version chain store
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// How long a durable record stays valid after its last write
    pub ttl: Duration,
    /// Upper bound on hops walked in either direction
    pub max_chain_hops: usize,
    /// Capacity of the in-memory LRU tier
    pub max_cache_records: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            max_chain_hops: DEFAULT_MAX_CHAIN_HOPS,
            max_cache_records: DEFAULT_MAX_CACHE_RECORDS,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(ResolverError::invalid_argument("TTL must be positive"));
        }
        if self.max_chain_hops == 0 {
            return Err(ResolverError::invalid_argument("max_chain_hops must be positive"));
        }
        if self.max_cache_records == 0 {
            return Err(ResolverError::invalid_argument("max_cache_records must be positive"));
        }
        Ok(())
    }
}

/// Settings for the multi-strategy resolver
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Identity of the resolver; also names its pair store
    pub id: String,
    /// Maximum number of ancestors visited by the chain walk
    pub max_steps: usize,
    /// Upper bound on each resource map membership fetch
    pub max_fetch_time: Duration,
    /// Prefix of conventionally named resource maps
    pub guess_prefix: String,
    /// Per-PID event log capacity
    pub max_log_events: usize,
    /// Number of PIDs whose logs are kept
    pub max_logged_pids: usize,
    /// Minimum level mirrored to `tracing`; `None` disables mirroring
    pub console_level: Option<Level>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            id: DEFAULT_RESOLVER_ID.to_string(),
            max_steps: DEFAULT_MAX_STEPS,
            max_fetch_time: DEFAULT_MAX_FETCH_TIME,
            guess_prefix: DEFAULT_GUESS_PREFIX.to_string(),
            max_log_events: DEFAULT_MAX_LOG_EVENTS,
            max_logged_pids: DEFAULT_MAX_LOGGED_PIDS,
            console_level: Some(Level::Warning),
        }
    }
}

impl ResolverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(ResolverError::invalid_argument("resolver id must not be empty"));
        }
        if self.max_steps == 0 {
            return Err(ResolverError::invalid_argument("max_steps must be positive"));
        }
        if self.max_fetch_time.is_zero() {
            return Err(ResolverError::invalid_argument("max_fetch_time must be positive"));
        }
        if self.max_log_events == 0 {
            return Err(ResolverError::invalid_argument("max_log_events must be positive"));
        }
        if self.max_logged_pids == 0 {
            return Err(ResolverError::invalid_argument("max_logged_pids must be positive"));
        }
        Ok(())
    }

    /// Name of the durable namespace holding PID → resource map pairs
    pub fn storage_name(&self) -> String {
        let normal: String = self
            .id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        format!("ResourceMapResolver_{normal}")
    }
}

/// Endpoints and credentials for the HTTP collaborators
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub meta_service_url: String,
    pub query_service_url: String,
    pub object_service_url: String,
    pub token: Option<String>,
    pub db_path: PathBuf,
    /// Settings for trackers built over these services
    pub tracker: TrackerConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            meta_service_url: DEFAULT_META_SERVICE_URL.to_string(),
            query_service_url: DEFAULT_QUERY_SERVICE_URL.to_string(),
            object_service_url: DEFAULT_OBJECT_SERVICE_URL.to_string(),
            token: None,
            db_path: PathBuf::from(DEFAULT_DB_FILE),
            tracker: TrackerConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Read settings from the environment, loading `.env` first if present
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build settings from a variable lookup; blank or unparsable values fall back to defaults
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let number = |key: &str| var(key).and_then(|v| v.trim().parse::<u64>().ok()).filter(|n| *n > 0);

        let tracker = TrackerConfig {
            ttl: number("RESMAP_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.tracker.ttl),
            max_chain_hops: number("RESMAP_MAX_CHAIN_HOPS")
                .map(|n| n as usize)
                .unwrap_or(defaults.tracker.max_chain_hops),
            max_cache_records: number("RESMAP_MAX_CACHE_RECORDS")
                .map(|n| n as usize)
                .unwrap_or(defaults.tracker.max_cache_records),
        };

        Self {
            meta_service_url: normalize_url(
                &var("RESMAP_META_URL").unwrap_or(defaults.meta_service_url),
            ),
            query_service_url: normalize_url(
                &var("RESMAP_QUERY_URL").unwrap_or(defaults.query_service_url),
            ),
            object_service_url: normalize_url(
                &var("RESMAP_OBJECT_URL").unwrap_or(defaults.object_service_url),
            ),
            token: var("RESMAP_TOKEN"),
            db_path: var("RESMAP_DB").map(PathBuf::from).unwrap_or(defaults.db_path),
            tracker,
        }
    }
}

/// Trim a service URL and make sure it ends with a slash
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}

/// Durable namespace for the version tracker bound to a sysmeta service
pub fn tracker_store_name(meta_service_url: &str) -> String {
    let digest = Sha256::digest(normalize_url(meta_service_url).as_bytes());
    format!("vt_{}", &hex::encode(digest)[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_config_rejects_zero_values() {
        let mut config = TrackerConfig::default();
        assert!(config.validate().is_ok());

        config.max_chain_hops = 0;
        assert!(matches!(config.validate(), Err(ResolverError::InvalidArgument(_))));

        let config = TrackerConfig { ttl: Duration::ZERO, ..TrackerConfig::default() };
        assert!(config.validate().is_err());

        let config = TrackerConfig { max_cache_records: 0, ..TrackerConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolver_config_defaults() {
        let config = ResolverConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_steps, 200);
        assert_eq!(config.max_fetch_time, Duration::from_secs(45));
        assert_eq!(config.guess_prefix, "resource_map_");
    }

    #[test]
    fn test_storage_name_normalizes_id() {
        let config = ResolverConfig {
            id: "https://Example.org/Metacat".to_string(),
            ..ResolverConfig::default()
        };
        assert_eq!(
            config.storage_name(),
            "ResourceMapResolver_https---example-org-metacat"
        );
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url(" https://a.org/meta "), "https://a.org/meta/");
        assert_eq!(normalize_url("https://a.org/meta/"), "https://a.org/meta/");
    }

    #[test]
    fn test_tracker_store_name_is_stable() {
        let a = tracker_store_name("https://a.org/meta");
        let b = tracker_store_name("https://a.org/meta/");
        assert_eq!(a, b);
        assert!(a.starts_with("vt_"));
        assert_eq!(a.len(), 3 + 16);
        assert_ne!(a, tracker_store_name("https://b.org/meta"));
    }

    #[test]
    fn test_service_config_reads_tracker_settings() {
        let vars: std::collections::HashMap<&str, &str> = [
            ("RESMAP_META_URL", "https://a.org/meta"),
            ("RESMAP_TTL_SECS", "60"),
            ("RESMAP_MAX_CHAIN_HOPS", "12"),
            ("RESMAP_MAX_CACHE_RECORDS", "not-a-number"),
            ("RESMAP_TOKEN", "  "),
        ]
        .into_iter()
        .collect();
        let config = ServiceConfig::from_vars(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.meta_service_url, "https://a.org/meta/");
        assert_eq!(config.tracker.ttl, Duration::from_secs(60));
        assert_eq!(config.tracker.max_chain_hops, 12);
        assert_eq!(config.tracker.max_cache_records, DEFAULT_MAX_CACHE_RECORDS);
        assert!(config.token.is_none());
    }
}
