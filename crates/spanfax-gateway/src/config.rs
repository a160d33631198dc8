// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Gateway configuration.
//!
//! Supports both programmatic and file-based (TOML) configuration, mirroring
//! the shape of a bridging service's config: a name, a handful of protocol
//! knobs, and a validation pass run after parsing either source.

use serde::{Deserialize, Serialize};
use spanfax::frame::BitRateModem;
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// T.38 gateway configuration, per §6 "Configuration (enumerated)".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway instance name (for identification in logs).
    #[serde(default = "default_gateway_name")]
    pub name: String,

    /// Fast-modem families this gateway will negotiate, by name
    /// ("v27ter", "v29", "v17"). Empty or omitted means all three.
    #[serde(default)]
    pub supported_modems: Vec<String>,

    /// Offer ECM to the PSTN side.
    #[serde(default)]
    pub ecm_capability: bool,

    /// Keep generating audio/IFP traffic between real data chunks.
    #[serde(default)]
    pub transmit_on_idle: bool,

    /// Insert a Talker Echo Protection tone before training.
    #[serde(default)]
    pub use_tep: bool,

    /// T.38 protocol version: 0 or 1.
    #[serde(default = "default_t38_version")]
    pub t38_version: u8,

    /// Repeat count for indicator packets (0 suppresses repetition, for
    /// reliable transports).
    #[serde(default = "default_indicator_repeat_count")]
    pub indicator_repeat_count: u8,

    /// Repeat count for sig-end packets (must be >= 1).
    #[serde(default = "default_data_end_repeat_count")]
    pub data_end_repeat_count: u8,

    /// Wall-clock interval one outgoing data chunk corresponds to.
    #[serde(default = "default_ms_per_tx_chunk")]
    pub ms_per_tx_chunk: u32,

    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_gateway_name() -> String {
    "spanfax-gateway".to_string()
}

fn default_t38_version() -> u8 {
    1
}

fn default_indicator_repeat_count() -> u8 {
    3
}

fn default_data_end_repeat_count() -> u8 {
    3
}

fn default_ms_per_tx_chunk() -> u32 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            name: default_gateway_name(),
            supported_modems: Vec::new(),
            ecm_capability: false,
            transmit_on_idle: false,
            use_tep: false,
            t38_version: default_t38_version(),
            indicator_repeat_count: default_indicator_repeat_count(),
            data_end_repeat_count: default_data_end_repeat_count(),
            ms_per_tx_chunk: default_ms_per_tx_chunk(),
            log_level: default_log_level(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file, validating it before return.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field combinations that serde's defaults can't enforce.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.t38_version > 1 {
            return Err(ConfigError::Invalid(format!(
                "t38_version must be 0 or 1, got {}",
                self.t38_version
            )));
        }
        if self.data_end_repeat_count == 0 {
            return Err(ConfigError::Invalid("data_end_repeat_count must be >= 1".into()));
        }
        if self.ms_per_tx_chunk == 0 {
            return Err(ConfigError::Invalid("ms_per_tx_chunk must be > 0".into()));
        }
        for name in &self.supported_modems {
            if parse_modem_name(name).is_none() {
                return Err(ConfigError::Invalid(format!("unrecognized modem family: {name}")));
            }
        }
        Ok(())
    }

    /// The supported rates implied by `supported_modems`, fastest first.
    /// Empty/omitted config means every rate in the fallback sequence.
    #[must_use]
    pub fn supported_rates(&self) -> Vec<BitRateModem> {
        if self.supported_modems.is_empty() {
            return BitRateModem::FALLBACK_ORDER.to_vec();
        }
        let families: Vec<_> = self.supported_modems.iter().filter_map(|n| parse_modem_name(n)).collect();
        BitRateModem::FALLBACK_ORDER
            .into_iter()
            .filter(|rate| families.contains(&rate.family()))
            .collect()
    }
}

fn parse_modem_name(name: &str) -> Option<spanfax::frame::ModemFamily> {
    use spanfax::frame::ModemFamily;
    match name.to_ascii_lowercase().as_str() {
        "v27ter" => Some(ModemFamily::V27ter),
        "v29" => Some(ModemFamily::V29),
        "v17" => Some(ModemFamily::V17),
        _ => None,
    }
}
