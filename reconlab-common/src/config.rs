//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "RECONLAB_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "reconlab.db";

/// Directory (inside the root folder) holding one CSV file per table
pub const TABLES_DIR: &str = "tables";

/// Bootstrap configuration loaded from TOML file
///
/// Every field has a default, so an empty file (or no file) is valid.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// Root folder for database and tables (optional)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// HTTP server port (optional, CLI/env take precedence)
    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub worker: WorkerSettings,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level or full `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Remote lookup service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Base URL of the lookup service
    #[serde(default = "default_registry_base_url")]
    pub base_url: String,

    /// Lookup path template, `{id}` is replaced by the identifier
    #[serde(default = "default_lookup_path")]
    pub lookup_path: String,

    /// Header carrying the API token
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,

    /// Wrapper object to unwrap from successful responses, if present
    #[serde(default = "default_unwrap_field")]
    pub unwrap_field: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// API token (lowest-priority source)
    #[serde(default)]
    pub api_token: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: default_registry_base_url(),
            lookup_path: default_lookup_path(),
            api_key_header: default_api_key_header(),
            unwrap_field: default_unwrap_field(),
            timeout_secs: default_timeout_secs(),
            api_token: None,
        }
    }
}

/// Enrichment worker throughput settings
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Minimum delay between two registry requests
    #[serde(default = "default_request_interval_ms")]
    pub request_interval_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            request_interval_ms: default_request_interval_ms(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_registry_base_url() -> String {
    "https://api.insee.fr/api-sirene/3.11".to_string()
}

fn default_lookup_path() -> String {
    "/siret/{id}".to_string()
}

fn default_api_key_header() -> String {
    "X-INSEE-Api-Key-Integration".to_string()
}

fn default_unwrap_field() -> Option<String> {
    Some("etablissement".to_string())
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_batch_size() -> usize {
    10
}

fn default_request_interval_ms() -> u64 {
    200
}

/// Load TOML configuration
///
/// With an explicit path the file must exist and parse. Without one, the
/// platform config locations are tried and a missing file yields defaults.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match find_config_file() {
            Some(path) => path,
            None => return Ok(TomlConfig::default()),
        },
    };

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    parse_toml_config(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Parse TOML configuration text
pub fn parse_toml_config(content: &str) -> std::result::Result<TomlConfig, toml::de::Error> {
    toml::from_str(content)
}

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&Path>, toml_config: &TomlConfig) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(path) = &toml_config.root_folder {
        return path.clone();
    }

    // Priority 4: OS-dependent compiled default
    get_default_root_folder()
}

/// Database path inside a root folder
pub fn database_path(root_folder: &Path) -> PathBuf {
    root_folder.join(DATABASE_FILE)
}

/// Tables directory inside a root folder
pub fn tables_dir(root_folder: &Path) -> PathBuf {
    root_folder.join(TABLES_DIR)
}

fn find_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("reconlab").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc/reconlab/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Get OS-dependent default root folder path
fn get_default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("reconlab"))
        .unwrap_or_else(|| PathBuf::from("./reconlab_data"))
}
