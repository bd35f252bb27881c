//! Vendor frame format.
//!
//! Requests are short binary frames `FF 55 <len> <class> <opcode> ...` with
//! 0-based channel indices. Every request is answered by one ASCII text frame
//! terminated by a NUL byte.

use crate::error::{MatrixError, Result};
use crate::types::{InputId, Volume};
use std::fmt;
use uuid::Uuid;

/// Marker byte that turns a set-opcode into a query
const QUERY: u8 = 0xF5;

/// Response frame terminator
pub const FRAME_END: u8 = 0x00;

/// Device opcodes, each with the response shape it expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Route,
    Disconnect,
    QuerySource,
    SetVolume,
    QueryVolume,
    MuteOn,
    MuteOff,
    QueryMute,
    VolumeUpSmall,
    VolumeUpLarge,
    VolumeDownSmall,
    VolumeDownLarge,
    TriggerOn,
    TriggerOff,
    /// Caller-supplied bytes, any non-error response accepted
    Raw,
}

impl Opcode {
    fn header(self) -> &'static [u8] {
        match self {
            Opcode::Route | Opcode::Disconnect => &[0xFF, 0x55, 0x04, 0x03, 0x1D],
            Opcode::QuerySource => &[0xFF, 0x55, 0x04, 0x03, 0x1D, QUERY],
            Opcode::SetVolume => &[0xFF, 0x55, 0x04, 0x03, 0x1E],
            Opcode::QueryVolume => &[0xFF, 0x55, 0x04, 0x03, 0x1E, QUERY],
            Opcode::MuteOn => &[0xFF, 0x55, 0x03, 0x03, 0x17],
            Opcode::MuteOff => &[0xFF, 0x55, 0x03, 0x03, 0x18],
            Opcode::QueryMute => &[0xFF, 0x55, 0x04, 0x03, 0x17, QUERY],
            Opcode::VolumeUpSmall => &[0xFF, 0x55, 0x03, 0x03, 0x13],
            Opcode::VolumeUpLarge => &[0xFF, 0x55, 0x03, 0x03, 0x15],
            Opcode::VolumeDownSmall => &[0xFF, 0x55, 0x03, 0x03, 0x14],
            Opcode::VolumeDownLarge => &[0xFF, 0x55, 0x03, 0x03, 0x16],
            Opcode::TriggerOn => &[0xFF, 0x55, 0x03, 0x05, 0x50],
            Opcode::TriggerOff => &[0xFF, 0x55, 0x03, 0x05, 0x51],
            Opcode::Raw => &[],
        }
    }

    /// Substrings (after normalization) of which at least one must appear
    fn expected(self) -> &'static [&'static str] {
        match self {
            Opcode::Route => &["trigger", "set "],
            Opcode::Disconnect => &["start vol", "0x", "db", "set "],
            Opcode::QuerySource => &["audio off", "input source", "set "],
            Opcode::SetVolume => &["output volume", "volume:"],
            Opcode::QueryVolume => &["volume:"],
            Opcode::QueryMute => &["mute"],
            Opcode::VolumeUpSmall
            | Opcode::VolumeUpLarge
            | Opcode::VolumeDownSmall
            | Opcode::VolumeDownLarge => &["input source", "audio off"],
            Opcode::TriggerOn | Opcode::TriggerOff => &["max volume", "0x", "db", "set "],
            Opcode::MuteOn | Opcode::MuteOff | Opcode::Raw => &[],
        }
    }
}

/// A single device request, consumed once by the command queue
#[derive(Debug, Clone)]
pub struct Command {
    id: Uuid,
    opcode: Opcode,
    bytes: Vec<u8>,
}

impl Command {
    /// Build a command from an opcode and its 0-based argument bytes
    pub fn new(opcode: Opcode, args: &[u8]) -> Self {
        let mut bytes = opcode.header().to_vec();
        bytes.extend_from_slice(args);
        Self {
            id: Uuid::new_v4(),
            opcode,
            bytes,
        }
    }

    /// Wrap caller-provided bytes for diagnostics
    pub fn raw(bytes: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            opcode: Opcode::Raw,
            bytes,
        }
    }

    /// Get the id used to correlate log lines
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Get the encoded frame
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// True if `text` has the shape this command expects
    pub fn accepts(&self, text: &str) -> bool {
        let expected = self.opcode.expected();
        if expected.is_empty() || text.is_empty() {
            return true;
        }
        let text = normalize(text);
        expected.iter().any(|needle| text.contains(needle))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}[{}]", self.opcode, hex(&self.bytes))
    }
}

/// Lowercase hex rendering used in trace output
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Parse a hex string such as `ff5504031df500` (spaces allowed)
pub fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let digits: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(MatrixError::Decode(format!("invalid hex: {}", text)));
    }
    if digits.len() % 2 != 0 {
        return Err(MatrixError::Decode(format!("odd-length hex string: {}", text)));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| MatrixError::Decode(format!("invalid hex: {}", text)))
        })
        .collect()
}

/// Lowercase, collapse whitespace, and glue `" :"` to `":"`
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .replace(" :", ":")
}

/// Strip the terminator and surrounding whitespace from a raw frame
pub fn frame_text(frame: &[u8]) -> String {
    String::from_utf8_lossy(frame)
        .trim_matches(char::from(FRAME_END))
        .trim()
        .to_string()
}

/// Unsolicited `AudioSense:Input[n] : 0|1` event the device may interleave
pub fn is_audio_sense_event(text: &str) -> bool {
    let text = normalize(text);
    let Some(rest) = text.strip_prefix("audiosense:input[") else {
        return false;
    };
    let Some((index, state)) = rest.split_once("]:") else {
        return false;
    };
    !index.is_empty()
        && index.chars().all(|c| c.is_ascii_digit())
        && matches!(state.trim(), "0" | "1")
}

/// True if the device rejected the command or lost framing
pub fn is_error_frame(text: &str) -> bool {
    text.is_empty() || normalize(text) == "command error"
}

/// Routed input from a source query: `Input Source : input N` or `Audio Off`
pub fn parse_source(text: &str) -> Result<Option<InputId>> {
    let normalized = normalize(text);
    if normalized.contains("audio off") {
        return Ok(None);
    }
    let digits = normalized
        .rfind("input ")
        .map(|pos| &normalized[pos + "input ".len()..])
        .map(|rest| rest.chars().take_while(|c| c.is_ascii_digit()).collect::<String>())
        .unwrap_or_default();
    digits
        .parse::<InputId>()
        .map(Some)
        .map_err(|_| MatrixError::Decode(format!("cannot parse source from {:?}", text)))
}

/// Volume step from `Volume : 0xNN` or a dB reading `Volume : -20.5`
pub fn parse_volume(text: &str) -> Result<Volume> {
    let normalized = normalize(text);
    let value = normalized
        .split_once("volume:")
        .map(|(_, rest)| rest.trim())
        .and_then(|rest| rest.split_whitespace().next())
        .ok_or_else(|| MatrixError::Decode(format!("cannot parse volume from {:?}", text)))?;

    let step = if let Some(hex) = value.strip_prefix("0x") {
        u8::from_str_radix(hex, 16).ok()
    } else {
        value
            .trim_end_matches("db")
            .parse::<f64>()
            .ok()
            .map(crate::volume::step_for_db)
    };
    match step {
        Some(step) if step <= crate::types::MAX_VOLUME => Ok(step),
        _ => Err(MatrixError::Decode(format!("volume out of range in {:?}", text))),
    }
}

/// Mute flag from `Get Out[n] Mute status : mute|Unmute` and variants
pub fn parse_mute(text: &str) -> Result<bool> {
    const MUTED: [&str; 6] = ["on", "mute", "muted", "1", "true", "yes"];
    const UNMUTED: [&str; 6] = ["off", "unmute", "unmuted", "0", "false", "no"];

    let normalized = normalize(text);
    let token = normalized
        .split_once("mute status:")
        .or_else(|| normalized.split_once("mute:"))
        .and_then(|(_, rest)| rest.split_whitespace().next());
    if let Some(token) = token {
        if MUTED.contains(&token) {
            return Ok(true);
        }
        if UNMUTED.contains(&token) {
            return Ok(false);
        }
    }
    let words: Vec<&str> = normalized
        .split(|c: char| !c.is_ascii_alphanumeric())
        .collect();
    if words.iter().any(|w| *w == "unmuted" || *w == "unmute") {
        return Ok(false);
    }
    if words.contains(&"muted") {
        return Ok(true);
    }
    Err(MatrixError::Decode(format!("cannot parse mute state from {:?}", text)))
}
