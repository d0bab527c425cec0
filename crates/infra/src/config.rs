//! Process configuration from environment variables.
//!
//! | Variable | Default |
//! |---|---|
//! | `SETTLEKIT_BIND_ADDR` | `0.0.0.0:8080` |
//! | `SETTLEKIT_DATA_DIR` | `./data` |
//! | `STORAGE_DRIVER` | `local` (`memory` keeps blobs in process) |
//! | `QUEUE_DRIVER` | `inmemory` (`redis` needs the `redis` feature) |
//! | `REDIS_URL` | `redis://localhost:6379` |
//! | `USE_PERSISTENT_STORES` | `false` (`true` requires `DATABASE_URL`) |
//! | `MAX_UPLOAD_MB` | `50` |
//! | `MIN_PARTITION_BYTES` | `1024` |
//! | `DEFAULT_TENANT_ID` | `test-user-001` |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use settlekit_core::TenantId;

use crate::partitions::DEFAULT_MIN_PARTITION_BYTES;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
pub const DEFAULT_MAX_UPLOAD_MB: u64 = 50;
pub const DEFAULT_TENANT: &str = "test-user-001";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} is required: {reason}")]
    Missing { key: &'static str, reason: &'static str },
    #[error("invalid {key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StorageDriver {
    Local,
    Memory,
}

impl FromStr for StorageDriver {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" | "fs" => Ok(StorageDriver::Local),
            "memory" | "inmemory" => Ok(StorageDriver::Memory),
            _ => Err("expected local or memory".to_string()),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum QueueDriver {
    InMemory,
    Redis,
}

impl FromStr for QueueDriver {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "inmemory" | "memory" => Ok(QueueDriver::InMemory),
            "redis" => Ok(QueueDriver::Redis),
            _ => Err("expected inmemory or redis".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub storage_driver: StorageDriver,
    pub queue_driver: QueueDriver,
    pub redis_url: String,
    /// Set when catalog records live in Postgres.
    pub database_url: Option<String>,
    pub max_upload_bytes: u64,
    pub min_partition_bytes: u64,
    pub default_tenant_id: TenantId,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let use_persistent = match get("USE_PERSISTENT_STORES") {
            Some(raw) => parse_bool("USE_PERSISTENT_STORES", &raw)?,
            None => false,
        };
        let database_url = match (use_persistent, get("DATABASE_URL")) {
            (true, Some(url)) => Some(url),
            (true, None) => {
                return Err(ConfigError::Missing {
                    key: "DATABASE_URL",
                    reason: "USE_PERSISTENT_STORES=true",
                });
            }
            (false, _) => None,
        };

        let max_upload_mb: u64 = parse_or("MAX_UPLOAD_MB", get("MAX_UPLOAD_MB"), DEFAULT_MAX_UPLOAD_MB)?;
        if max_upload_mb == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_UPLOAD_MB",
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        let default_tenant_id = {
            let raw = get("DEFAULT_TENANT_ID").unwrap_or_else(|| DEFAULT_TENANT.to_string());
            TenantId::parse(&raw).map_err(|e| ConfigError::Invalid {
                key: "DEFAULT_TENANT_ID",
                value: raw.clone(),
                reason: e.to_string(),
            })?
        };

        Ok(Self {
            bind_addr: parse_or("SETTLEKIT_BIND_ADDR", get("SETTLEKIT_BIND_ADDR"), default_bind_addr())?,
            data_dir: get("SETTLEKIT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            storage_driver: parse_or("STORAGE_DRIVER", get("STORAGE_DRIVER"), StorageDriver::Local)?,
            queue_driver: parse_or("QUEUE_DRIVER", get("QUEUE_DRIVER"), QueueDriver::InMemory)?,
            redis_url: get("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            database_url,
            max_upload_bytes: max_upload_mb * 1024 * 1024,
            min_partition_bytes: parse_or(
                "MIN_PARTITION_BYTES",
                get("MIN_PARTITION_BYTES"),
                DEFAULT_MIN_PARTITION_BYTES,
            )?,
            default_tenant_id,
        })
    }

    /// Root of raw upload blobs (keys already start with `raw/`).
    pub fn blob_root(&self) -> PathBuf {
        self.data_dir.clone()
    }

    pub fn partition_root(&self) -> PathBuf {
        self.data_dir.join("partitions")
    }

    pub fn use_persistent_stores(&self) -> bool {
        self.database_url.is_some()
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn parse_or<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(cfg.data_dir, PathBuf::from("./data"));
        assert_eq!(cfg.storage_driver, StorageDriver::Local);
        assert_eq!(cfg.queue_driver, QueueDriver::InMemory);
        assert_eq!(cfg.max_upload_bytes, 50 * 1024 * 1024);
        assert_eq!(cfg.min_partition_bytes, 1024);
        assert_eq!(cfg.default_tenant_id.as_str(), "test-user-001");
        assert!(!cfg.use_persistent_stores());
        assert_eq!(cfg.partition_root(), PathBuf::from("./data/partitions"));
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = config(&[
            ("SETTLEKIT_BIND_ADDR", "127.0.0.1:9000"),
            ("STORAGE_DRIVER", "memory"),
            ("QUEUE_DRIVER", "Redis"),
            ("MAX_UPLOAD_MB", "2"),
            ("MIN_PARTITION_BYTES", "10"),
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/settlekit"),
            ("DEFAULT_TENANT_ID", "acme"),
        ])
        .unwrap();
        assert_eq!(cfg.bind_addr.port(), 9000);
        assert_eq!(cfg.storage_driver, StorageDriver::Memory);
        assert_eq!(cfg.queue_driver, QueueDriver::Redis);
        assert_eq!(cfg.max_upload_bytes, 2 * 1024 * 1024);
        assert_eq!(cfg.min_partition_bytes, 10);
        assert!(cfg.use_persistent_stores());
        assert_eq!(cfg.default_tenant_id.as_str(), "acme");
    }

    #[test]
    fn invalid_values_are_reported_with_their_key() {
        let err = config(&[("QUEUE_DRIVER", "kafka")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "QUEUE_DRIVER", .. }));

        let err = config(&[("USE_PERSISTENT_STORES", "true")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { key: "DATABASE_URL", .. }));

        assert!(config(&[("MAX_UPLOAD_MB", "0")]).is_err());
        assert!(config(&[("DEFAULT_TENANT_ID", "../x")]).is_err());
        // Blank means unset.
        assert!(config(&[("MIN_PARTITION_BYTES", "  ")]).is_ok());
    }
}
