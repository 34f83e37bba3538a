use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{FileExtensionError, FileFormat, SerdeFormatError};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;
use tracing::info;

use crate::cache::{Cache, CacheError, MemoryCache, NullCache};
use crate::elements;
use crate::error::RegistryError;
use crate::file_cache::FileCache;
use crate::registry::Registry;

pub const ENV_CACHE_DIR: &str = "NODETREE_CACHE_DIR";
pub const ENV_CACHE_KIND: &str = "NODETREE_CACHE_KIND";
pub const ENV_MAX_CACHE: &str = "NODETREE_USER_MAX_CACHE";

const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum CacheKind {
    None,
    Memory,
    #[default]
    File,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub kind: CacheKind,
    pub dir: PathBuf,
    // per user, in megabytes
    pub max_size_mb: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub modules: Vec<String>,
    pub log_level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Format(#[from] FileExtensionError),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] SerdeFormatError),
    #[error("Invalid value \"{value}\" for {var}")]
    Env { var: String, value: String },
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            kind: CacheKind::default(),
            dir: PathBuf::from(".nodetree-cache"),
            max_size_mb: 10,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            cache: CacheConfig::default(),
            modules: elements::builtin_modules()
                .into_iter()
                .map(|module| module.group)
                .collect(),
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let format = FileFormat::from_path(path)?;
        let serialized = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(common::deserialize(&serialized, format)?)
    }

    /// Loads `path` when it is given and exists, the defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) if path.exists() => Self::load(path),
            Some(path) => {
                info!("Config {:?} not found, using defaults", path);
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_CACHE_DIR) {
            self.cache.dir = PathBuf::from(dir);
        }
        if let Some(kind) = lookup(ENV_CACHE_KIND) {
            self.cache.kind = kind.parse().map_err(|_| ConfigError::Env {
                var: ENV_CACHE_KIND.to_string(),
                value: kind.clone(),
            })?;
        }
        if let Some(max) = lookup(ENV_MAX_CACHE) {
            self.cache.max_size_mb = max.trim().parse().map_err(|_| ConfigError::Env {
                var: ENV_MAX_CACHE.to_string(),
                value: max.clone(),
            })?;
        }

        Ok(self)
    }

    pub fn max_cache_bytes(&self) -> u64 {
        self.cache.max_size_mb.saturating_mul(BYTES_PER_MB)
    }

    pub fn build_cache(&self) -> Result<Arc<dyn Cache>, CacheError> {
        let cache: Arc<dyn Cache> = match self.cache.kind {
            CacheKind::None => Arc::new(NullCache),
            CacheKind::Memory => Arc::new(MemoryCache::new(self.max_cache_bytes())),
            CacheKind::File => Arc::new(FileCache::open(&self.cache.dir, self.max_cache_bytes())?),
        };
        info!(
            "Using {} cache with a budget of {} MB",
            self.cache.kind, self.cache.max_size_mb
        );

        Ok(cache)
    }

    pub fn build_registry(&self) -> Result<Registry, RegistryError> {
        Registry::with_modules(&self.modules)
    }
}
