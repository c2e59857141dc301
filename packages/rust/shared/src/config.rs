//! Application configuration for Articulator.
//!
//! User config lives at `~/.articulator/articulator.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ArticulatorError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "articulator.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".articulator";

// ---------------------------------------------------------------------------
// Config structs (matching articulator.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote catalog settings.
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Retrieval pipeline settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// `[catalog]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Root of the catalog API (no trailing slash needed).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Agreement category requested from `/agreements`.
    #[serde(default = "default_category_code")]
    pub category_code: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            category_code: default_category_code(),
        }
    }
}

fn default_base_url() -> String {
    "https://assist.org/api".into()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_category_code() -> String {
    "major".into()
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root directory that receives one sub-directory per school.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Maximum in-flight partner lookups.
    #[serde(default = "default_concurrency")]
    pub resolve_concurrency: usize,

    /// Maximum in-flight artifact downloads.
    #[serde(default = "default_concurrency")]
    pub download_concurrency: usize,

    /// Courtesy delay between sequential subject iterations.
    #[serde(default = "default_request_delay")]
    pub request_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            resolve_concurrency: default_concurrency(),
            download_concurrency: default_concurrency(),
            request_delay_ms: default_request_delay(),
        }
    }
}

fn default_output_dir() -> String {
    "agreements".into()
}
fn default_concurrency() -> usize {
    8
}
fn default_request_delay() -> u64 {
    200
}

// ---------------------------------------------------------------------------
// Run config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime configuration, merged from the config file and CLI flags.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub category_code: String,
    pub output_dir: PathBuf,
    pub resolve_concurrency: usize,
    pub download_concurrency: usize,
    pub request_delay_ms: u64,
}

impl From<&AppConfig> for RunConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            base_url: config.catalog.base_url.clone(),
            timeout_secs: config.catalog.timeout_secs,
            category_code: config.catalog.category_code.clone(),
            output_dir: PathBuf::from(&config.pipeline.output_dir),
            // A zero-sized pool would never make progress.
            resolve_concurrency: config.pipeline.resolve_concurrency.max(1),
            download_concurrency: config.pipeline.download_concurrency.max(1),
            request_delay_ms: config.pipeline.request_delay_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.articulator/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ArticulatorError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.articulator/articulator.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ArticulatorError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        ArticulatorError::config(format!("failed to parse {}: {e}", path.display()))
    })?;

    url::Url::parse(&config.catalog.base_url).map_err(|e| {
        ArticulatorError::config(format!(
            "invalid catalog.base_url {:?}: {e}",
            config.catalog.base_url
        ))
    })?;

    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ArticulatorError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ArticulatorError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ArticulatorError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
