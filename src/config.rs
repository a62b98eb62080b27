//! Repository configuration (§6 Configuration keys).
//!
//! TOML-deserializable with per-field defaults; a missing file or a missing
//! field never errors — it falls back to the default.

use serde::{Deserialize, Serialize};

/// Result-cache sizing (C9).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    /// Maximum total weight the cache may hold before evicting.
    pub max_weight: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_weight: 64 * 1024 * 1024,
        }
    }
}

/// Watch-subsystem sizing (C10).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct WatchConfig {
    /// Maximum number of watches held per distinct pattern.
    pub capacity_per_pattern: u32,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            capacity_per_pattern: 1024,
        }
    }
}

/// `find` result-set sizing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FindConfig {
    /// Maximum entries a single `find` may return.
    pub max_entries: u32,
}

impl Default for FindConfig {
    fn default() -> Self {
        Self { max_entries: 4096 }
    }
}

/// `history` result-set sizing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HistoryConfig {
    /// Maximum commits a single `history` call may return.
    pub max_commits: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_commits: 8192 }
    }
}

/// Rolling-compaction sizing (C11).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RollingConfig {
    /// Number of commits since the primary's first commit that triggers
    /// creation of a secondary store.
    pub commit_threshold: u64,
}

impl Default for RollingConfig {
    fn default() -> Self {
        Self {
            commit_threshold: 10_000,
        }
    }
}

/// Full repository configuration, loaded from a TOML file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RepositoryConfig {
    /// Result-cache sizing.
    pub cache: CacheConfig,
    /// Commit-id index rebuild threshold: a length mismatch beyond this many
    /// records triggers a `warn`-level log in addition to the rebuild.
    pub commit_id_rebuild_threshold: u64,
    /// Watch-subsystem sizing.
    pub watch: WatchConfig,
    /// `find` result-set sizing.
    pub find: FindConfig,
    /// `history` result-set sizing.
    pub history: HistoryConfig,
    /// Rolling-compaction sizing.
    pub rolling: RollingConfig,
    /// If `true`, all write operations are rejected with `ReadOnly`.
    pub read_only: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            commit_id_rebuild_threshold: 1,
            watch: WatchConfig::default(),
            find: FindConfig::default(),
            history: HistoryConfig::default(),
            rolling: RollingConfig::default(),
            read_only: false,
        }
    }
}

impl RepositoryConfig {
    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist.
    ///
    /// # Errors
    /// Returns [`crate::error::CentralDogmaError::Config`] if the file
    /// exists but fails to parse.
    pub fn load(path: &std::path::Path) -> Result<Self, crate::error::CentralDogmaError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err.into()),
        };
        toml::from_str(&text).map_err(|err| crate::error::CentralDogmaError::Config {
            reason: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = RepositoryConfig::load(std::path::Path::new("/nonexistent/config.toml"))
            .unwrap();
        assert_eq!(config, RepositoryConfig::default());
    }

    #[test]
    fn partial_toml_fills_remaining_defaults() {
        let config: RepositoryConfig = toml::from_str("read_only = true").unwrap();
        assert!(config.read_only);
        assert_eq!(config.find.max_entries, 4096);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let result: Result<RepositoryConfig, _> = toml::from_str("bogus_field = 1");
        assert!(result.is_err());
    }
}
