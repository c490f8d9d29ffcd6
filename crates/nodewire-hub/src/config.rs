//! TOML-based configuration for the hub.

use std::path::Path;

use serde::Deserialize;

use nodewire_crypto::SecretKey;
use nodewire_transport::{Envelope, HubConfig, LivenessConfig};

use crate::error::HubError;

/// Top-level hub configuration loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HubFileConfig {
    #[serde(default)]
    pub hub: HubSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl HubFileConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, HubError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HubError::Config(format!("failed to read config file: {e}")))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, HubError> {
        toml::from_str(s).map_err(|e| HubError::Config(format!("failed to parse config: {e}")))
    }

    /// Resolve into transport settings. Fails without a valid key.
    pub fn to_hub_config(&self) -> Result<HubConfig, HubError> {
        let key = self
            .hub
            .key
            .as_deref()
            .ok_or_else(|| HubError::Config("hub.key is required".into()))?;
        let key = SecretKey::from_hex(key)?;

        let liveness = self.hub.liveness.then(|| LivenessConfig {
            report_remote_errors: self.logging.report_remote_errors,
            ..LivenessConfig::default()
        });

        Ok(HubConfig::new(self.hub.bind.clone(), key)
            .with_first_node_id(self.hub.first_node_id)
            .with_envelope(parse_envelope(&self.hub.envelope)?)
            .with_liveness(liveness))
    }
}

/// The `[hub]` section.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HubSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// 64 hex characters.
    pub key: Option<String>,
    #[serde(default = "default_first_node_id")]
    pub first_node_id: u32,
    /// `"legacy"` or `"upgraded"`.
    #[serde(default = "default_envelope")]
    pub envelope: String,
    #[serde(default = "default_true")]
    pub liveness: bool,
}

fn default_bind() -> String {
    "0.0.0.0:4782".to_string()
}

fn default_first_node_id() -> u32 {
    1
}

fn default_envelope() -> String {
    "legacy".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            key: None,
            first_node_id: default_first_node_id(),
            envelope: default_envelope(),
            liveness: default_true(),
        }
    }
}

/// The `[logging]` section.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log errors reported by agents over liveness channels at `warn`.
    #[serde(default = "default_true")]
    pub report_remote_errors: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            report_remote_errors: default_true(),
        }
    }
}

/// Parse an envelope name.
pub fn parse_envelope(s: &str) -> Result<Envelope, HubError> {
    match s.to_lowercase().as_str() {
        "legacy" => Ok(Envelope::Legacy),
        "upgraded" => Ok(Envelope::Upgraded),
        other => Err(HubError::Config(format!("unknown envelope: {other}"))),
    }
}
