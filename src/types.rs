use crate::error::MatrixError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Output zone identifier (1-based)
pub type ZoneId = u8;

/// Matrix input identifier (1-based)
pub type InputId = u8;

/// Volume level on the device scale, 0..=100
pub type Volume = u8;

/// Opaque reference to an external playback entity (host-assigned id)
pub type ExternalRef = String;

/// Highest volume step the device accepts
pub const MAX_VOLUME: Volume = 100;

/// Hardware model, which fixes the crosspoint dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatrixModel {
    #[serde(rename = "8x8")]
    Ams8,
    #[serde(rename = "16x16")]
    Ams16,
    #[serde(rename = "24x24")]
    Ams24,
}

impl MatrixModel {
    /// Immutable channel counts for this model
    pub fn profile(self) -> DeviceProfile {
        let channels = match self {
            MatrixModel::Ams8 => 8,
            MatrixModel::Ams16 => 16,
            MatrixModel::Ams24 => 24,
        };
        DeviceProfile {
            model: self,
            input_count: channels,
            output_count: channels,
        }
    }
}

impl fmt::Display for MatrixModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.profile();
        write!(f, "{}x{}", p.input_count, p.output_count)
    }
}

/// Parses the same `"8x8"` names the configuration uses
impl FromStr for MatrixModel {
    type Err = MatrixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| MatrixError::Config(format!("unknown model {:?}", s)))
    }
}

/// Channel counts of the configured device, shared read-only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceProfile {
    pub model: MatrixModel,
    pub input_count: u8,
    pub output_count: u8,
}

impl DeviceProfile {
    pub fn has_input(&self, input: InputId) -> bool {
        (1..=self.input_count).contains(&input)
    }

    pub fn has_output(&self, zone: ZoneId) -> bool {
        (1..=self.output_count).contains(&zone)
    }
}

/// Connection lifecycle as observed through the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Signal path of a single zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "input", rename_all = "lowercase")]
pub enum Routing {
    Disconnected,
    Connected(InputId),
}

impl Routing {
    pub fn input(self) -> Option<InputId> {
        match self {
            Routing::Connected(input) => Some(input),
            Routing::Disconnected => None,
        }
    }

    pub fn is_connected(self) -> bool {
        matches!(self, Routing::Connected(_))
    }
}

/// Hardware-reported state of one output, as decoded from a status query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneStatus {
    pub zone: ZoneId,
    pub routed_input: Option<InputId>,
    pub volume: Volume,
    pub muted: bool,
}

/// Now-playing information surfaced from an external player
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub artwork_url: Option<String>,
    pub duration_secs: Option<u32>,
}

/// Delegated operations an external player can perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Capability {
    Join,
    PlaybackControl,
}

/// Capability descriptor, queried once when a link is made
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub join: bool,
    pub playback_control: bool,
}

impl Capabilities {
    pub fn all() -> Self {
        Self {
            join: true,
            playback_control: true,
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Join => self.join,
            Capability::PlaybackControl => self.playback_control,
        }
    }
}

/// Playback commands forwarded to a linked player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackCommand {
    Play,
    Pause,
    Stop,
    Next,
    Previous,
}

/// Something that can be placed in a group
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum GroupTarget {
    /// A hardware output of this matrix, grouped by fan-out routing
    Zone(ZoneId),
    /// A player outside the matrix, grouped through its own join primitive
    External(ExternalRef),
}

impl fmt::Display for GroupTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupTarget::Zone(id) => write!(f, "zone {}", id),
            GroupTarget::External(r) => write!(f, "{}", r),
        }
    }
}
