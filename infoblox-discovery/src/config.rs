//! Configuration for Infoblox discovery.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

use infoblox_discovery_common::{Category, LoggingConfig};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete discovery configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Infoblox grid masters to poll.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    /// Discovery cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Collection schedule.
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// HTTP service discovery settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// File service discovery settings.
    #[serde(default)]
    pub file_sd: FileSdConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// One Infoblox grid master.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Host name of the grid master. Used as the source name everywhere.
    #[serde(alias = "master")]
    pub name: String,

    /// WAPI user name.
    #[serde(default)]
    pub username: String,

    /// WAPI password.
    #[serde(default)]
    pub password: String,

    /// WAPI version (default: "2.11").
    #[serde(default = "default_wapi_version")]
    pub wapi_version: String,

    /// Request timeout in seconds (default: 60).
    #[serde(default = "default_timeout", alias = "timeout")]
    pub timeout_secs: u64,

    /// Verify the grid master's TLS certificate (default: false).
    #[serde(default)]
    pub verify_tls: bool,

    /// Categories to discover.
    #[serde(default)]
    pub discovery: Vec<Category>,

    /// Per category, extensible attributes that include an object when "True".
    #[serde(default)]
    pub inclusions: HashMap<String, Vec<String>>,

    /// Per category, extensible attributes that exclude an object when "True".
    ///
    /// These add to the built-in `exclusion` and `common-exclusion`
    /// attributes, plus `member-exclusion`, `zone-exclusion` or
    /// `range-exclusion` for the matching category.
    #[serde(default)]
    pub exclusions: HashMap<String, Vec<String>>,

    /// Prefix of the built-in exclusion attributes. With `"acme"` members
    /// are excluded by `acme-exclusion` and `acme-member-exclusion`.
    #[serde(default)]
    pub exclusion_label: String,

    /// DHCP range prefix lengths that are never published.
    #[serde(default)]
    pub exclude_ranges: HashSet<u8>,

    /// Networks searched for web endpoints.
    #[serde(default)]
    pub web_endpoints: Option<WebEndpointsConfig>,
}

fn default_wapi_version() -> String {
    "2.11".to_string()
}

fn default_timeout() -> u64 {
    60
}

impl SourceConfig {
    /// Create a source with defaults for everything but the name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            username: String::new(),
            password: String::new(),
            wapi_version: default_wapi_version(),
            timeout_secs: default_timeout(),
            verify_tls: false,
            discovery: Vec::new(),
            inclusions: HashMap::new(),
            exclusions: HashMap::new(),
            exclusion_label: String::new(),
            exclude_ranges: HashSet::new(),
            web_endpoints: None,
        }
    }

    /// Whether the given category is configured for discovery.
    pub fn discovers(&self, category: Category) -> bool {
        self.discovery.contains(&category)
    }
}

/// Web endpoint discovery settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebEndpointsConfig {
    /// Networks (CIDR) whose named addresses become web endpoints.
    #[serde(default)]
    pub networks: Vec<String>,
}

/// Discovery cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long cached targets are served after the last write (seconds).
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
}

fn default_ttl() -> u64 {
    7200 // 2 hours
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl(),
        }
    }
}

/// Collection schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between collection cycles.
    #[serde(default = "default_fetch_interval")]
    pub fetch_interval_secs: u64,
}

fn default_fetch_interval() -> u64 {
    3600 // 1 hour
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            fetch_interval_secs: default_fetch_interval(),
        }
    }
}

/// HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address to listen on (default: "0.0.0.0:9694").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Basic authentication for /metrics and /prometheus-sd-targets.
    #[serde(default)]
    pub basic_auth: BasicAuthConfig,
}

fn default_listen() -> String {
    "0.0.0.0:9694".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            basic_auth: BasicAuthConfig::default(),
        }
    }
}

/// HTTP basic authentication.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BasicAuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// File service discovery settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileSdConfig {
    /// Directory the SD files are written to.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl DiscoveryConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::read_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON5 file without validating it.
    ///
    /// Used when command line overrides are applied before validation.
    pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(json5::from_str(&content)?)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: DiscoveryConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Inclusion and exclusion rules are validated per source when the
    /// source is set up, so one bad source does not stop the others.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::Validation("ttl_secs must be > 0".to_string()));
        }

        if self.schedule.fetch_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "fetch_interval_secs must be > 0".to_string(),
            ));
        }

        if self.http.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.http.listen
            )));
        }

        let auth = &self.http.basic_auth;
        if auth.enabled && (auth.username.is_empty() || auth.password.is_empty()) {
            return Err(ConfigError::Validation(
                "Basic auth is enabled but username or password is empty".to_string(),
            ));
        }

        self.validate_sources()
    }

    /// Validate the source list on its own.
    ///
    /// Used when the sources are re-read between collection cycles.
    pub fn validate_sources(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for source in &self.sources {
            if source.name.is_empty() {
                return Err(ConfigError::Validation(
                    "Source name must not be empty".to_string(),
                ));
            }
            if !names.insert(source.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate source name: {}",
                    source.name
                )));
            }
        }

        Ok(())
    }

    /// Validate the settings needed for file service discovery.
    pub fn validate_file_sd(&self) -> Result<&Path, ConfigError> {
        let directory = self.file_sd.directory.as_deref().ok_or_else(|| {
            ConfigError::Validation("file_sd.directory must be set in file mode".to_string())
        })?;

        if !directory.is_dir() {
            return Err(ConfigError::Validation(format!(
                "SD file directory does not exist: {}",
                directory.display()
            )));
        }

        Ok(directory)
    }
}
