//! Typed view of the matrix hardware.
//!
//! Encodes user intents into single device commands and decodes aggregated
//! status reports into zone records. Decoding is all-or-nothing: one bad
//! frame rejects the whole report.

use crate::error::{MatrixError, Result};
use crate::protocol::{self, Command, Opcode};
use crate::types::{DeviceProfile, InputId, Volume, ZoneId, ZoneStatus, MAX_VOLUME};
use std::collections::BTreeMap;

/// Something a caller wants the hardware to do or report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Route { zone: ZoneId, input: InputId },
    Disconnect { zone: ZoneId },
    SetVolume { zone: ZoneId, volume: Volume },
    SetMute { zone: ZoneId, muted: bool },
    StepVolume { zone: ZoneId, up: bool, large: bool },
    Trigger { on: bool },
    QuerySource { zone: ZoneId },
    QueryVolume { zone: ZoneId },
    QueryMute { zone: ZoneId },
}

/// Raw answers to the three status queries of one output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawZoneStatus {
    pub zone: ZoneId,
    pub source: String,
    pub volume: String,
    pub mute: String,
}

/// Aggregated full-status response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub zones: Vec<RawZoneStatus>,
}

/// Decoded state of every queried output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatrixSnapshot {
    pub zones: BTreeMap<ZoneId, ZoneStatus>,
}

/// Encoder/decoder bound to one device profile
#[derive(Debug, Clone, Copy)]
pub struct DeviceModel {
    profile: DeviceProfile,
}

impl DeviceModel {
    pub fn new(profile: DeviceProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> DeviceProfile {
        self.profile
    }

    /// Produce exactly one command for an intent
    pub fn encode(&self, intent: Intent) -> Result<Command> {
        let command = match intent {
            Intent::Route { zone, input } => {
                let out = self.output_index(zone)?;
                if !self.profile.has_input(input) {
                    return Err(MatrixError::invalid_target(format!(
                        "input {} does not exist on a {} matrix",
                        input, self.profile.model
                    )));
                }
                Command::new(Opcode::Route, &[out, input - 1])
            }
            // Routing to one past the last input switches the output off
            Intent::Disconnect { zone } => Command::new(
                Opcode::Disconnect,
                &[self.output_index(zone)?, self.profile.input_count],
            ),
            Intent::SetVolume { zone, volume } => Command::new(
                Opcode::SetVolume,
                &[self.output_index(zone)?, volume.min(MAX_VOLUME)],
            ),
            Intent::SetMute { zone, muted } => {
                let opcode = if muted { Opcode::MuteOn } else { Opcode::MuteOff };
                Command::new(opcode, &[self.output_index(zone)?])
            }
            Intent::StepVolume { zone, up, large } => {
                let opcode = match (up, large) {
                    (true, false) => Opcode::VolumeUpSmall,
                    (true, true) => Opcode::VolumeUpLarge,
                    (false, false) => Opcode::VolumeDownSmall,
                    (false, true) => Opcode::VolumeDownLarge,
                };
                Command::new(opcode, &[self.output_index(zone)?])
            }
            Intent::Trigger { on } => {
                let opcode = if on { Opcode::TriggerOn } else { Opcode::TriggerOff };
                Command::new(opcode, &[0])
            }
            Intent::QuerySource { zone } => {
                Command::new(Opcode::QuerySource, &[self.output_index(zone)?])
            }
            Intent::QueryVolume { zone } => {
                Command::new(Opcode::QueryVolume, &[self.output_index(zone)?])
            }
            Intent::QueryMute { zone } => {
                Command::new(Opcode::QueryMute, &[self.output_index(zone)?])
            }
        };
        Ok(command)
    }

    /// Pick the input a bare "turn on" should route
    ///
    /// The remembered input wins over the configured default; inputs that
    /// are no longer usable are skipped.
    pub fn resolve_turn_on(
        &self,
        zone: ZoneId,
        last_input: Option<InputId>,
        default_input: Option<InputId>,
        usable: impl Fn(InputId) -> bool,
    ) -> Result<InputId> {
        last_input
            .filter(|&i| usable(i))
            .or(default_input.filter(|&i| usable(i)))
            .ok_or(MatrixError::NoSourceAvailable(zone))
    }

    /// Decode a full status report, rejecting it entirely on any bad frame
    pub fn decode_status(&self, report: &StatusReport) -> Result<MatrixSnapshot> {
        let mut zones = BTreeMap::new();
        for raw in &report.zones {
            if !self.profile.has_output(raw.zone) {
                return Err(MatrixError::Decode(format!("output {} out of range", raw.zone)));
            }
            let routed_input = protocol::parse_source(&raw.source)?;
            if let Some(input) = routed_input {
                if !self.profile.has_input(input) {
                    return Err(MatrixError::Decode(format!(
                        "output {} reports nonexistent input {}",
                        raw.zone, input
                    )));
                }
            }
            let status = ZoneStatus {
                zone: raw.zone,
                routed_input,
                volume: protocol::parse_volume(&raw.volume)?,
                muted: protocol::parse_mute(&raw.mute)?,
            };
            if zones.insert(raw.zone, status).is_some() {
                return Err(MatrixError::Decode(format!("output {} reported twice", raw.zone)));
            }
        }
        Ok(MatrixSnapshot { zones })
    }

    fn output_index(&self, zone: ZoneId) -> Result<u8> {
        if !self.profile.has_output(zone) {
            return Err(MatrixError::invalid_target(format!(
                "output {} does not exist on a {} matrix",
                zone, self.profile.model
            )));
        }
        Ok(zone - 1)
    }
}
