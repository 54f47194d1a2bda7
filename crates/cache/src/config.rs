//! Cache configuration for thumbnail size, budgets and maintenance cadence.
//!
//! Configuration can be loaded from a TOML file, environment variables,
//! or created programmatically.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::entry::ThumbnailSize;

const MB: u64 = 1024 * 1024;

/// Smallest memory budget the cache accepts
pub const MIN_MEMORY_LIMIT: u64 = MB;

/// Configuration for a [`crate::ThumbnailCache`].
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Target thumbnail size in pixels
    pub thumbnail_size: ThumbnailSize,
    /// Render quality passed to the generator (1.0 = full)
    pub quality: f64,
    /// Maximum number of entries
    pub max_entries: usize,
    /// Maximum memory held by resident thumbnails, in bytes
    pub max_memory_bytes: u64,
    /// Suppress generation for pages outside the viewport window
    pub lazy_loading: bool,
    /// Switch between LRU and LFU by hit rate and resize the entry budget
    pub adaptive_caching: bool,
    /// Pages around the visible range that count as "near"
    pub viewport_margin: usize,
    /// Pages around the visible range queued for preloading
    pub preload_range: usize,
    /// Cadence of preload queue processing (one page per tick)
    pub preload_interval: Duration,
    /// Cadence of periodic maintenance
    pub cleanup_interval: Duration,
    /// Deadline after which an in-flight generation is treated as failed
    pub generation_timeout: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            thumbnail_size: ThumbnailSize::new(120, 160),
            quality: 1.0,
            max_entries: 100,
            max_memory_bytes: 128 * MB,
            lazy_loading: true,
            adaptive_caching: true,
            viewport_margin: 2,
            preload_range: 3,
            preload_interval: Duration::from_millis(50),
            cleanup_interval: Duration::from_secs(30),
            generation_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// On-disk representation; every key is optional and falls back to the default.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct ConfigFile {
    thumbnail_width: Option<u32>,
    thumbnail_height: Option<u32>,
    quality: Option<f64>,
    max_entries: Option<usize>,
    max_memory_mb: Option<u64>,
    lazy_loading: Option<bool>,
    adaptive_caching: Option<bool>,
    viewport_margin: Option<usize>,
    preload_range: Option<usize>,
    preload_interval_ms: Option<u64>,
    cleanup_interval_ms: Option<u64>,
    /// 0 disables the deadline
    generation_timeout_ms: Option<u64>,
}

impl ConfigFile {
    fn resolve(self) -> Result<CacheConfig, ConfigError> {
        let defaults = CacheConfig::default();
        let max_memory_bytes = match self.max_memory_mb {
            Some(mb) => megabytes("max_memory_mb", mb)?,
            None => defaults.max_memory_bytes,
        };
        Ok(CacheConfig {
            thumbnail_size: ThumbnailSize::new(
                self.thumbnail_width.unwrap_or(defaults.thumbnail_size.width),
                self.thumbnail_height.unwrap_or(defaults.thumbnail_size.height),
            ),
            quality: self.quality.unwrap_or(defaults.quality),
            max_entries: self.max_entries.unwrap_or(defaults.max_entries),
            max_memory_bytes,
            lazy_loading: self.lazy_loading.unwrap_or(defaults.lazy_loading),
            adaptive_caching: self.adaptive_caching.unwrap_or(defaults.adaptive_caching),
            viewport_margin: self.viewport_margin.unwrap_or(defaults.viewport_margin),
            preload_range: self.preload_range.unwrap_or(defaults.preload_range),
            preload_interval: self
                .preload_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.preload_interval),
            cleanup_interval: self
                .cleanup_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.cleanup_interval),
            generation_timeout: match self.generation_timeout_ms {
                Some(0) => None,
                Some(ms) => Some(Duration::from_millis(ms)),
                None => defaults.generation_timeout,
            },
        })
    }

    fn from_config(config: &CacheConfig) -> Self {
        Self {
            thumbnail_width: Some(config.thumbnail_size.width),
            thumbnail_height: Some(config.thumbnail_size.height),
            quality: Some(config.quality),
            max_entries: Some(config.max_entries),
            max_memory_mb: Some(config.max_memory_bytes / MB),
            lazy_loading: Some(config.lazy_loading),
            adaptive_caching: Some(config.adaptive_caching),
            viewport_margin: Some(config.viewport_margin),
            preload_range: Some(config.preload_range),
            preload_interval_ms: Some(config.preload_interval.as_millis() as u64),
            cleanup_interval_ms: Some(config.cleanup_interval.as_millis() as u64),
            generation_timeout_ms: Some(
                config
                    .generation_timeout
                    .map(|timeout| timeout.as_millis() as u64)
                    .unwrap_or(0),
            ),
        }
    }
}

impl CacheConfig {
    /// Sets the thumbnail size in pixels.
    pub fn with_thumbnail_size(mut self, width: u32, height: u32) -> Self {
        self.thumbnail_size = ThumbnailSize::new(width, height);
        self
    }

    /// Sets the entry and memory budgets.
    pub fn with_budget(mut self, max_entries: usize, max_memory_bytes: u64) -> Self {
        self.max_entries = max_entries;
        self.max_memory_bytes = max_memory_bytes;
        self
    }

    /// Sets the memory budget in megabytes.
    pub fn with_memory_mb(mut self, mb: u64) -> Self {
        self.max_memory_bytes = mb.saturating_mul(MB);
        self
    }

    pub fn with_lazy_loading(mut self, enabled: bool) -> Self {
        self.lazy_loading = enabled;
        self
    }

    pub fn with_adaptive_caching(mut self, enabled: bool) -> Self {
        self.adaptive_caching = enabled;
        self
    }

    pub fn with_preload_range(mut self, range: usize) -> Self {
        self.preload_range = range;
        self
    }

    pub fn with_generation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.generation_timeout = timeout;
        self
    }

    /// Returns the memory budget in megabytes.
    pub fn max_memory_mb(&self) -> u64 {
        self.max_memory_bytes / MB
    }

    /// Returns the default configuration file location for the current platform.
    ///
    /// - macOS: ~/Library/Application Support/pdf-thumbnail-cache/cache.toml
    /// - Linux: ~/.config/pdf-thumbnail-cache/cache.toml
    /// - Windows: %APPDATA%\pdf-thumbnail-cache\cache.toml
    pub fn default_config_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("pdf-thumbnail-cache").join("cache.toml")
        } else {
            PathBuf::from("cache.toml")
        }
    }

    /// Loads configuration from environment variables on top of the defaults.
    ///
    /// Environment variables:
    /// - `THUMBCACHE_WIDTH` / `THUMBCACHE_HEIGHT`: thumbnail size in pixels
    /// - `THUMBCACHE_QUALITY`: render quality
    /// - `THUMBCACHE_MAX_ENTRIES`: entry budget
    /// - `THUMBCACHE_MEMORY_MB`: memory budget in MB
    /// - `THUMBCACHE_LAZY_LOADING`: `true` / `false`
    /// - `THUMBCACHE_TIMEOUT_MS`: generation deadline, 0 disables
    ///
    /// # Errors
    /// Returns an error if any environment variable contains an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(width) = env_value::<u32>("THUMBCACHE_WIDTH")? {
            config.thumbnail_size.width = width;
        }
        if let Some(height) = env_value::<u32>("THUMBCACHE_HEIGHT")? {
            config.thumbnail_size.height = height;
        }
        if let Some(quality) = env_value::<f64>("THUMBCACHE_QUALITY")? {
            config.quality = quality;
        }
        if let Some(max_entries) = env_value::<usize>("THUMBCACHE_MAX_ENTRIES")? {
            config.max_entries = max_entries;
        }
        if let Some(mb) = env_value::<u64>("THUMBCACHE_MEMORY_MB")? {
            config.max_memory_bytes = megabytes("THUMBCACHE_MEMORY_MB", mb)?;
        }
        if let Some(lazy) = env_value::<bool>("THUMBCACHE_LAZY_LOADING")? {
            config.lazy_loading = lazy;
        }
        if let Some(ms) = env_value::<u64>("THUMBCACHE_TIMEOUT_MS")? {
            config.generation_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }

        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Expected file format (every key optional):
    /// ```toml
    /// thumbnail_width = 120
    /// thumbnail_height = 160
    /// max_entries = 100
    /// max_memory_mb = 128
    /// lazy_loading = true
    /// generation_timeout_ms = 60000
    /// ```
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        debug!("config: loading {}", path.as_ref().display());
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(toml_str)?;
        file.resolve()
    }

    /// Converts configuration to TOML format.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(&ConfigFile::from_config(self))?)
    }

    /// Saves configuration to a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let toml = self.to_toml()?;
        fs::write(path.as_ref(), toml)?;
        Ok(())
    }
}

/// Convert a megabyte count to bytes, rejecting values that overflow
fn megabytes(key: &str, mb: u64) -> Result<u64, ConfigError> {
    mb.checked_mul(MB)
        .ok_or_else(|| ConfigError::InvalidValue(key.to_string()))
}

fn env_value<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        Err(_) => Ok(None),
    }
}

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),

    /// I/O error reading or writing configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed TOML
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const ENV_VARS: &[&str] = &[
        "THUMBCACHE_WIDTH",
        "THUMBCACHE_HEIGHT",
        "THUMBCACHE_QUALITY",
        "THUMBCACHE_MAX_ENTRIES",
        "THUMBCACHE_MEMORY_MB",
        "THUMBCACHE_LAZY_LOADING",
        "THUMBCACHE_TIMEOUT_MS",
    ];

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.thumbnail_size, ThumbnailSize::new(120, 160));
        assert_eq!(config.max_entries, 100);
        assert_eq!(config.max_memory_bytes, 128 * 1024 * 1024);
        assert!(config.lazy_loading);
        assert!(config.adaptive_caching);
        assert_eq!(config.generation_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_builder_methods() {
        let config = CacheConfig::default()
            .with_thumbnail_size(64, 80)
            .with_budget(10, 4 * MB)
            .with_lazy_loading(false)
            .with_adaptive_caching(false)
            .with_preload_range(1)
            .with_generation_timeout(None);

        assert_eq!(config.thumbnail_size, ThumbnailSize::new(64, 80));
        assert_eq!(config.max_entries, 10);
        assert_eq!(config.max_memory_mb(), 4);
        assert!(!config.lazy_loading);
        assert!(!config.adaptive_caching);
        assert_eq!(config.preload_range, 1);
        assert_eq!(config.generation_timeout, None);
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let _guard = EnvGuard::new(ENV_VARS);

        env::set_var("THUMBCACHE_WIDTH", "64");
        env::set_var("THUMBCACHE_HEIGHT", "96");
        env::set_var("THUMBCACHE_MAX_ENTRIES", "42");
        env::set_var("THUMBCACHE_MEMORY_MB", "16");
        env::set_var("THUMBCACHE_LAZY_LOADING", "false");
        env::set_var("THUMBCACHE_TIMEOUT_MS", "0");

        let config = CacheConfig::from_env().unwrap();
        assert_eq!(config.thumbnail_size, ThumbnailSize::new(64, 96));
        assert_eq!(config.max_entries, 42);
        assert_eq!(config.max_memory_bytes, 16 * MB);
        assert!(!config.lazy_loading);
        assert_eq!(config.generation_timeout, None);
    }

    #[test]
    #[serial]
    fn test_from_env_partial() {
        let _guard = EnvGuard::new(ENV_VARS);
        for name in ENV_VARS {
            env::remove_var(name);
        }
        env::set_var("THUMBCACHE_MAX_ENTRIES", "7");

        let config = CacheConfig::from_env().unwrap();
        assert_eq!(config.max_entries, 7);
        assert_eq!(config.max_memory_bytes, 128 * MB); // default
    }

    #[test]
    #[serial]
    fn test_from_env_invalid() {
        let _guard = EnvGuard::new(&["THUMBCACHE_MEMORY_MB"]);

        env::set_var("THUMBCACHE_MEMORY_MB", "lots");
        let result = CacheConfig::from_env();
        assert!(matches!(result, Err(ConfigError::InvalidValue(key)) if key == "THUMBCACHE_MEMORY_MB"));
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_overflowing_memory() {
        let _guard = EnvGuard::new(&["THUMBCACHE_MEMORY_MB"]);

        env::set_var("THUMBCACHE_MEMORY_MB", u64::MAX.to_string());
        let result = CacheConfig::from_env();
        assert!(matches!(result, Err(ConfigError::InvalidValue(key)) if key == "THUMBCACHE_MEMORY_MB"));
    }

    // Helper to save and restore environment variables
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(var_names: &[&str]) -> Self {
            let vars = var_names
                .iter()
                .map(|name| (name.to_string(), env::var(name).ok()))
                .collect();
            Self { vars }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.vars {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    #[test]
    fn test_from_toml_partial() {
        let config = CacheConfig::from_toml(
            r#"
            # Only override the budget
            max_entries = 25
            max_memory_mb = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.max_entries, 25);
        assert_eq!(config.max_memory_bytes, 8 * MB);
        assert_eq!(config.thumbnail_size, ThumbnailSize::new(120, 160));
    }

    #[test]
    fn test_from_toml_rejects_overflowing_memory() {
        let result = CacheConfig::from_toml("max_memory_mb = 9223372036854775807");
        assert!(matches!(result, Err(ConfigError::InvalidValue(key)) if key == "max_memory_mb"));
    }

    #[test]
    fn test_with_memory_mb_saturates() {
        let config = CacheConfig::default().with_memory_mb(u64::MAX);
        assert_eq!(config.max_memory_bytes, u64::MAX);
    }

    #[test]
    fn test_from_toml_timeout_zero_disables() {
        let config = CacheConfig::from_toml("generation_timeout_ms = 0").unwrap();
        assert_eq!(config.generation_timeout, None);
    }

    #[test]
    fn test_from_toml_rejects_bad_types() {
        let result = CacheConfig::from_toml("max_entries = \"many\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_file_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.toml");

        let config = CacheConfig::default()
            .with_thumbnail_size(90, 120)
            .with_budget(33, 12 * MB)
            .with_generation_timeout(Some(Duration::from_millis(1500)));
        config.save_to_file(&path).unwrap();

        let loaded = CacheConfig::from_file(&path).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = CacheConfig::from_file(dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
