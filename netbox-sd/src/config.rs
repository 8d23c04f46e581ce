//! Configuration for the NetBox discovery exporter.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use netbox_sd_common::{LoggingConfig, is_valid_label_name};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] netbox_sd_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// NetBox API settings.
    #[serde(default)]
    pub netbox: NetBoxConfig,

    /// How scrape targets are built from inventory items.
    #[serde(default)]
    pub targets: TargetConfig,

    /// Label naming.
    #[serde(default)]
    pub labels: LabelConfig,

    /// Where the discovery output goes.
    #[serde(default)]
    pub output: OutputConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// NetBox API connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct NetBoxConfig {
    /// Base URL of the NetBox instance, e.g. "https://netbox.example.com".
    #[serde(default)]
    pub url: String,

    /// API token. Empty means unauthenticated requests.
    #[serde(default)]
    pub token: String,

    /// Scheme put in front of the token in the Authorization header.
    #[serde(default = "default_auth_scheme")]
    pub auth_scheme: String,

    /// Items requested per page (default: 1000).
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Per-request timeout (seconds).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Accept invalid TLS certificates.
    #[serde(default)]
    pub tls_insecure: bool,

    /// Which object types to query.
    #[serde(default)]
    pub sources: SourcesConfig,

    /// Extra query parameters passed to every list request (e.g. `status: "active"`).
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
}

fn default_auth_scheme() -> String {
    "Token".to_string()
}

fn default_page_size() -> u32 {
    1000
}

fn default_timeout() -> u64 {
    30
}

impl Default for NetBoxConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: String::new(),
            auth_scheme: default_auth_scheme(),
            page_size: default_page_size(),
            timeout_secs: default_timeout(),
            tls_insecure: false,
            sources: SourcesConfig::default(),
            filters: BTreeMap::new(),
        }
    }
}

impl fmt::Debug for NetBoxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetBoxConfig")
            .field("url", &self.url)
            .field("token", &if self.token.is_empty() { "" } else { "<redacted>" })
            .field("auth_scheme", &self.auth_scheme)
            .field("page_size", &self.page_size)
            .field("timeout_secs", &self.timeout_secs)
            .field("tls_insecure", &self.tls_insecure)
            .field("sources", &self.sources)
            .field("filters", &self.filters)
            .finish()
    }
}

/// Object types fetched from NetBox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "default_true")]
    pub devices: bool,

    #[serde(default = "default_true")]
    pub virtual_machines: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            devices: true,
            virtual_machines: true,
        }
    }
}

/// Target construction settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Port appended to every derived target address.
    #[serde(default)]
    pub default_port: Option<u16>,

    /// Use the item name as host when it has no primary IP.
    #[serde(default)]
    pub fallback_to_name: bool,
}

/// Label naming settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelConfig {
    /// Prefix for every derived label, e.g. "__meta_netbox_".
    #[serde(default)]
    pub prefix: String,

    /// Add a `kind` label ("device" or "virtual_machine").
    #[serde(default)]
    pub include_kind: bool,

    /// Emit one `custom_field_<name>` label per scalar custom field.
    #[serde(default = "default_true")]
    pub custom_fields: bool,

    /// Labels added to every target group.
    #[serde(default, rename = "static")]
    pub static_labels: BTreeMap<String, String>,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            include_kind: false,
            custom_fields: true,
            static_labels: BTreeMap::new(),
        }
    }
}

/// Output layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// One document with one group per item.
    #[default]
    File,
    /// One `<list>.json` per tag and per `prom_targets` entry.
    Directory,
}

/// Output settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Destination file (file mode) or directory (directory mode).
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub mode: OutputMode,
}

impl ExporterConfig {
    /// Build a configuration for the plain `url token destination` invocation.
    pub fn for_destination(
        url: impl Into<String>,
        token: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        let mut config = Self::default();
        config.netbox.url = url.into();
        config.netbox.token = token.into();
        config.output.path = Some(destination.into());
        config
    }

    /// Load configuration from a JSON5 file.
    ///
    /// The result is not validated: command-line overrides are usually
    /// applied first, then [`validate`](Self::validate) is called.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Ok(netbox_sd_common::load_config(path)?)
    }

    /// Parse and validate configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = netbox_sd_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.netbox.url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "NetBox URL is required".to_string(),
            ));
        }
        crate::client::api_root(&self.netbox.url)?;

        if self.netbox.page_size == 0 {
            return Err(ConfigError::Validation(
                "page_size must be > 0".to_string(),
            ));
        }

        if self.netbox.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "timeout_secs must be > 0".to_string(),
            ));
        }

        if self.netbox.auth_scheme.trim().is_empty() {
            return Err(ConfigError::Validation(
                "auth_scheme must not be empty".to_string(),
            ));
        }

        if !self.netbox.sources.devices && !self.netbox.sources.virtual_machines {
            return Err(ConfigError::Validation(
                "At least one of sources.devices or sources.virtual_machines must be enabled"
                    .to_string(),
            ));
        }

        if !self.labels.prefix.is_empty() && !is_valid_label_name(&self.labels.prefix) {
            return Err(ConfigError::Validation(format!(
                "Invalid label prefix: {}",
                self.labels.prefix
            )));
        }

        if let Some(name) = self
            .labels
            .static_labels
            .keys()
            .find(|k| !is_valid_label_name(k))
        {
            return Err(ConfigError::Validation(format!(
                "Invalid static label name: {}",
                name
            )));
        }

        if self.targets.default_port == Some(0) {
            return Err(ConfigError::Validation(
                "default_port must be > 0".to_string(),
            ));
        }

        match &self.output.path {
            None => {
                return Err(ConfigError::Validation(
                    "Output path is required".to_string(),
                ));
            }
            Some(path) if path.as_os_str().is_empty() => {
                return Err(ConfigError::Validation(
                    "Output path must not be empty".to_string(),
                ));
            }
            Some(_) => {}
        }

        Ok(())
    }
}
