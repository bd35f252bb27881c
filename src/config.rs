use crate::connection::TransportOptions;
use crate::error::{MatrixError, Result};
use crate::types::{DeviceProfile, ExternalRef, InputId, MatrixModel, ZoneId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Default TCP port of the matrix controller
pub const DEFAULT_PORT: u16 = 52000;

/// Host-supplied configuration of one matrix device
///
/// # Example
///
/// ```
/// use matrix_audio::MatrixConfig;
///
/// let config = MatrixConfig::from_json(r#"{
///     "host": "192.168.1.50",
///     "model": "8x8",
///     "active_outputs": [1, 2, 3],
///     "active_inputs": [1, 2],
///     "input_links": { "2": "media_player.living_room" }
/// }"#).unwrap();
/// assert_eq!(config.port, 52000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub model: MatrixModel,
    #[serde(default)]
    pub active_outputs: BTreeSet<ZoneId>,
    #[serde(default)]
    pub active_inputs: BTreeSet<InputId>,
    /// Input -> external player; at most one input per player
    #[serde(default)]
    pub input_links: BTreeMap<InputId, ExternalRef>,
    /// Fallback for turning on a zone that has never been routed
    #[serde(default)]
    pub default_input: Option<InputId>,
    #[serde(default)]
    pub input_names: BTreeMap<InputId, String>,
    #[serde(default)]
    pub output_names: BTreeMap<ZoneId, String>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_min_send_interval_ms")]
    pub min_send_interval_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_min_send_interval_ms() -> u64 {
    150
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_response_timeout_ms() -> u64 {
    5000
}

fn default_settle_delay_ms() -> u64 {
    200
}

impl MatrixConfig {
    /// Config with every channel active and default timing
    pub fn new(host: impl Into<String>, model: MatrixModel) -> Self {
        let profile = model.profile();
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            model,
            active_outputs: (1..=profile.output_count).collect(),
            active_inputs: (1..=profile.input_count).collect(),
            input_links: BTreeMap::new(),
            default_input: None,
            input_names: BTreeMap::new(),
            output_names: BTreeMap::new(),
            poll_interval_secs: default_poll_interval_secs(),
            min_send_interval_ms: default_min_send_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }

    /// Parse and validate a JSON config
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn profile(&self) -> DeviceProfile {
        self.model.profile()
    }

    /// Check channel ranges, links and the default input against the model
    pub fn validate(&self) -> Result<()> {
        let profile = self.profile();
        if self.host.trim().is_empty() {
            return Err(MatrixError::Config("host is empty".into()));
        }
        if let Some(zone) = self.active_outputs.iter().find(|&&z| !profile.has_output(z)) {
            return Err(MatrixError::Config(format!(
                "output {} is out of range for a {} matrix",
                zone, self.model
            )));
        }
        if let Some(input) = self.active_inputs.iter().find(|&&i| !profile.has_input(i)) {
            return Err(MatrixError::Config(format!(
                "input {} is out of range for a {} matrix",
                input, self.model
            )));
        }
        if let Some(input) = self.default_input {
            if !self.active_inputs.contains(&input) {
                return Err(MatrixError::Config(format!(
                    "default input {} is not active",
                    input
                )));
            }
        }
        let mut linked = BTreeSet::new();
        for (input, reference) in &self.input_links {
            if !self.active_inputs.contains(input) {
                return Err(MatrixError::Config(format!(
                    "input {} is linked but not active",
                    input
                )));
            }
            if !linked.insert(reference.as_str()) {
                return Err(MatrixError::Config(format!(
                    "{} is linked from more than one input",
                    reference
                )));
            }
        }
        Ok(())
    }

    /// Configured name of an input, or `Input N`
    pub fn input_name(&self, input: InputId) -> String {
        self.input_names
            .get(&input)
            .cloned()
            .unwrap_or_else(|| format!("Input {}", input))
    }

    /// Configured name of an output, or `Output N`
    pub fn output_name(&self, zone: ZoneId) -> String {
        self.output_names
            .get(&zone)
            .cloned()
            .unwrap_or_else(|| format!("Output {}", zone))
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            response_timeout: Duration::from_millis(self.response_timeout_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
        }
    }

    pub fn min_send_interval(&self) -> Duration {
        Duration::from_millis(self.min_send_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// True if `other` points at the same physical device
    pub(crate) fn same_device(&self, other: &MatrixConfig) -> bool {
        self.host == other.host && self.port == other.port && self.model == other.model
    }
}
