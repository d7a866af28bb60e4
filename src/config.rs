//! Configuration management for the asset store

use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;

use crate::store::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_OBJECT_SIZE};

/// Variable prefixes that decide where assets live. Once any of them is set,
/// a configuration error is fatal instead of falling back to defaults.
const STORAGE_VAR_PREFIXES: &[&str] = &["STORE_BACKEND", "DATABASE_", "S3_", "ASSET_", "SWEEP_"];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub assets: AssetConfig,
    pub sweep: SweepConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub s3: Option<S3Config>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite,
    S3,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: Option<String>,
    pub prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetConfig {
    /// Bytes per stored chunk
    pub chunk_size: NonZeroU32,
    /// Largest accepted upload in bytes
    pub max_object_bytes: u64,
    /// Check chunk completeness before writing metadata
    pub verify_finalize: bool,
    /// `Cache-Control` header sent with downloads
    pub cache_control: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// Seconds between orphan sweeps; 0 disables the sweep
    pub interval_secs: u64,
    /// Minimum age of orphaned chunks before they are collected
    pub grace_secs: u64,
}

impl SweepConfig {
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            storage: StorageConfig {
                backend: StorageBackend::Sqlite,
                s3: None,
            },
            database: DatabaseConfig {
                url: "sqlite:./assets.db".to_string(),
                max_connections: 5,
            },
            assets: AssetConfig::default(),
            sweep: SweepConfig {
                interval_secs: 3600,
                grace_secs: 86400,
            },
        }
    }
}

impl Default for AssetConfig {
    fn default() -> Self {
        AssetConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_object_bytes: DEFAULT_MAX_OBJECT_SIZE,
            verify_finalize: true,
            cache_control: "public, max-age=31536000, immutable".to_string(),
        }
    }
}

impl Config {
    /// Load from the process environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(env::vars())
    }

    /// Load from a set of variables.
    ///
    /// Falls back to defaults on error only while no storage-related variable
    /// is set; otherwise the error is returned.
    pub fn load_from(
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ConfigError> {
        let vars = Vars(vars.into_iter().collect());

        match Self::from_vars(&vars) {
            Ok(config) => Ok(config),
            Err(e) if !vars.storage_configured() => {
                tracing::warn!("Failed to load config from env: {}, using defaults", e);
                Ok(Config::default())
            }
            Err(e) => Err(e),
        }
    }

    fn from_vars(vars: &Vars) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let backend = match vars
            .get("STORE_BACKEND")
            .unwrap_or("sqlite")
            .to_lowercase()
            .as_str()
        {
            "sqlite" => StorageBackend::Sqlite,
            "s3" => StorageBackend::S3,
            "memory" => StorageBackend::Memory,
            other => {
                return Err(ConfigError::Invalid {
                    var: "STORE_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let s3 = if backend == StorageBackend::S3 {
            Some(S3Config::from_vars(vars)?)
        } else {
            None
        };

        Ok(Config {
            server: ServerConfig {
                host: vars.string("SERVER_HOST", defaults.server.host),
                port: vars.parse("SERVER_PORT", defaults.server.port)?,
            },
            storage: StorageConfig { backend, s3 },
            database: DatabaseConfig {
                url: vars.string("DATABASE_URL", defaults.database.url),
                max_connections: vars
                    .parse("DATABASE_MAX_CONNECTIONS", defaults.database.max_connections)?,
            },
            assets: AssetConfig {
                chunk_size: vars.parse("ASSET_CHUNK_SIZE", defaults.assets.chunk_size)?,
                max_object_bytes: vars.parse("ASSET_MAX_BYTES", defaults.assets.max_object_bytes)?,
                verify_finalize: vars
                    .parse("ASSET_VERIFY_FINALIZE", defaults.assets.verify_finalize)?,
                cache_control: vars.string("ASSET_CACHE_CONTROL", defaults.assets.cache_control),
            },
            sweep: SweepConfig {
                interval_secs: vars.parse("SWEEP_INTERVAL_SECS", defaults.sweep.interval_secs)?,
                grace_secs: vars.parse("SWEEP_GRACE_SECS", defaults.sweep.grace_secs)?,
            },
        })
    }
}

impl S3Config {
    fn from_vars(vars: &Vars) -> Result<Self, ConfigError> {
        Ok(S3Config {
            endpoint: vars.required("S3_ENDPOINT")?,
            bucket: vars.required("S3_BUCKET")?,
            access_key: vars.required("S3_ACCESS_KEY")?,
            secret_key: vars.required("S3_SECRET_KEY")?,
            region: vars.get("S3_REGION").map(str::to_string),
            prefix: vars.string("S3_PREFIX", "assets".to_string()),
        })
    }
}

struct Vars(HashMap<String, String>);

impl Vars {
    fn get(&self, var: &str) -> Option<&str> {
        self.0.get(var).map(String::as_str)
    }

    fn string(&self, var: &str, default: String) -> String {
        self.get(var).map(str::to_string).unwrap_or(default)
    }

    fn required(&self, var: &'static str) -> Result<String, ConfigError> {
        self.get(var)
            .map(str::to_string)
            .ok_or(ConfigError::Missing(var))
    }

    fn parse<T: FromStr>(&self, var: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(var) {
            Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
                var,
                value: value.to_string(),
            }),
            None => Ok(default),
        }
    }

    fn storage_configured(&self) -> bool {
        self.0
            .keys()
            .any(|key| STORAGE_VAR_PREFIXES.iter().any(|prefix| key.starts_with(prefix)))
    }
}
