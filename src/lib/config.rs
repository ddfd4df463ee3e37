use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{
    error::{BucketError, Result},
    storage::{DEFAULT_WRITE_ATTEMPTS, DocumentStore, MemoryStore, SqliteStore},
};

pub const DEFAULT_PORT: u16 = 3038;
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
        }
    }
}

/// Per-bucket overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_raw_queries: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Applies to every bucket without its own setting.
    #[serde(default)]
    pub allow_raw_queries: bool,
    #[serde(default = "default_max_write_attempts")]
    pub max_write_attempts: usize,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub buckets: BTreeMap<String, BucketConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_addr: default_bind_addr(),
            allow_raw_queries: false,
            max_write_attempts: default_max_write_attempts(),
            store: StoreConfig::default(),
            buckets: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub port: Option<u16>,
    pub bind_addr: Option<String>,
}

pub fn default_config_path() -> Result<PathBuf> {
    let mut path = default_config_root()?;
    path.push("config.toml");
    Ok(path)
}

pub fn load_or_default(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let config_path = if let Some(path) = path {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        path
    } else {
        default_config_path()?
    };

    if config_path.exists() {
        let contents = fs::read_to_string(&config_path)?;
        let mut cfg: Config = toml::from_str(&contents)?;
        cfg.max_write_attempts = cfg.max_write_attempts.max(1);
        Ok((cfg, config_path))
    } else {
        let cfg = Config::default();
        if let Some(parent) = config_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        cfg.save(&config_path)?;
        info!(path = %config_path.display(), "wrote default configuration");
        Ok((cfg, config_path))
    }
}

impl Config {
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn apply_update(&mut self, update: ConfigUpdate) {
        if let Some(port) = update.port {
            self.port = port;
        }
        if let Some(bind_addr) = update.bind_addr {
            self.bind_addr = bind_addr;
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    /// Whether raw queries are permitted on `bucket`, falling back to the
    /// global setting.
    pub fn allow_raw_queries(&self, bucket: &str) -> bool {
        self.buckets
            .get(bucket)
            .and_then(|bucket| bucket.allow_raw_queries)
            .unwrap_or(self.allow_raw_queries)
    }

    pub fn write_attempts(&self) -> usize {
        self.max_write_attempts.max(1)
    }

    pub fn open_store(&self) -> Result<Arc<dyn DocumentStore>> {
        match self.store.backend {
            StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
            StoreBackend::Sqlite => {
                let store = SqliteStore::open(&self.store.path)?;
                info!(path = %self.store.path.display(), "opened sqlite store");
                Ok(Arc::new(store))
            }
        }
    }
}

fn default_config_root() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        Ok(home.join(".bucketdb"))
    } else {
        env::current_dir()
            .map(|dir| dir.join(".bucketdb"))
            .map_err(|err| BucketError::Config(err.to_string()))
    }
}

fn default_store_path() -> PathBuf {
    default_config_root()
        .unwrap_or_else(|_| PathBuf::from(".bucketdb"))
        .join("bucketdb.sqlite")
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind_addr() -> String {
    DEFAULT_BIND_ADDR.to_string()
}

fn default_max_write_attempts() -> usize {
    DEFAULT_WRITE_ATTEMPTS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: Config = toml::from_str("port = 4000").expect("config should parse");
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.bind_addr, "127.0.0.1");
        assert_eq!(cfg.store.backend, StoreBackend::Memory);
        assert!(!cfg.allow_raw_queries);
        assert_eq!(cfg.max_write_attempts, 3);
    }

    #[test]
    fn per_bucket_raw_query_flag_overrides_global() {
        let cfg: Config = toml::from_str(
            r#"
            allow_raw_queries = false

            [buckets.licensing]
            allow_raw_queries = true

            [buckets.locked]
            "#,
        )
        .expect("config should parse");
        assert!(cfg.allow_raw_queries("licensing"));
        assert!(!cfg.allow_raw_queries("locked"));
        assert!(!cfg.allow_raw_queries("unknown"));
    }

    #[test]
    fn store_backend_parses_lowercase() {
        let cfg: Config = toml::from_str(
            r#"
            [store]
            backend = "sqlite"
            path = "/tmp/data.sqlite"
            "#,
        )
        .expect("config should parse");
        assert_eq!(cfg.store.backend, StoreBackend::Sqlite);
        assert_eq!(cfg.store.path, PathBuf::from("/tmp/data.sqlite"));

        let err = toml::from_str::<Config>("[store]\nbackend = \"mongo\"").unwrap_err();
        assert!(err.to_string().contains("mongo"));
    }

    #[test]
    fn load_or_default_writes_then_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("config.toml");

        let (cfg, written) = load_or_default(Some(path.clone())).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(written, path);
        assert!(path.exists());

        let mut updated = cfg;
        updated.apply_update(ConfigUpdate {
            port: Some(9000),
            bind_addr: None,
        });
        updated.max_write_attempts = 0;
        updated.save(&path).unwrap();

        let (reloaded, _) = load_or_default(Some(path)).unwrap();
        assert_eq!(reloaded.port, 9000);
        assert_eq!(reloaded.max_write_attempts, 1);
        assert_eq!(reloaded.listen_addr(), "127.0.0.1:9000");
    }

    #[test]
    fn sqlite_store_opens_at_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            store: StoreConfig {
                backend: StoreBackend::Sqlite,
                path: dir.path().join("store.sqlite"),
            },
            ..Config::default()
        };
        cfg.open_store().unwrap();
        assert!(dir.path().join("store.sqlite").exists());
    }
}
