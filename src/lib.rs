//! Rust library for controlling multi-zone audio matrix switches
//!
//! This library drives an audio matrix (N line inputs switched onto M
//! amplified output zones) over its raw TCP control port. It supports:
//!
//! - 8x8, 16x16 and 24x24 device models
//! - Routing, power, volume and mute per output zone
//! - Serialized, paced command delivery over a single connection
//! - Periodic status polling with staleness tracking
//! - Linking inputs to external players for metadata, playback and grouping
//! - Zone update subscriptions
//!
//! # Quick Start
//!
//! ```no_run
//! use matrix_audio::{MatrixClient, MatrixConfig, MatrixModel, NoPlayers};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = MatrixConfig::new("192.168.1.50", MatrixModel::Ams8);
//!     config.default_input = Some(1);
//!
//!     let matrix = MatrixClient::connect(config, Arc::new(NoPlayers)).await?;
//!     matrix.start_polling();
//!
//!     let patio = matrix.zone(3)?;
//!     patio.turn_on().await?;
//!     patio.set_volume(35).await?;
//!
//!     let mut updates = matrix.subscribe();
//!     while let Ok(update) = updates.recv().await {
//!         println!("Zone update: {:?}", update);
//!         break;
//!     }
//!
//!     matrix.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Client**: configuration, zone table, polling and reconcile
//! - **Zone / InputSource**: control handles for outputs and inputs
//! - **Group**: joining zones and external players to an input
//! - **CommandQueue**: one worker that owns the connection and serializes commands
//! - **Connection**: TCP transport, NUL-framed responses, reconnect backoff
//! - **Device / Protocol**: byte encoding and response decoding

mod client;
mod command_queue;
mod config;
mod connection;
mod device;
mod error;
mod group;
mod input;
mod link;
mod player;
mod protocol;
mod subscription;
mod types;
mod volume;
mod zone;

#[cfg(test)]
mod testing;

// Public exports
pub use client::{Diagnostics, MatrixClient, ReconcileReport};
pub use config::{MatrixConfig, DEFAULT_PORT};
pub use connection::TransportOptions;
pub use device::{DeviceModel, Intent, MatrixSnapshot, RawZoneStatus, StatusReport};
pub use error::{MatrixError, Result};
pub use group::JoinReport;
pub use input::InputSource;
pub use link::{Link, LinkRegistry};
pub use player::{ExternalPlayer, NoPlayers, PlayerDirectory};
pub use protocol::{hex, parse_hex, Command, Opcode};
pub use subscription::{ZoneUpdate, ZoneUpdateReceiver};
pub use types::{
    Capabilities, Capability, ConnectionStatus, DeviceProfile, ExternalRef, GroupTarget, InputId,
    MatrixModel, MediaMetadata, PlaybackCommand, Routing, Volume, ZoneId, ZoneStatus, MAX_VOLUME,
};
pub use volume::{db_for_step, step_for_db};
pub use zone::{Zone, ZoneRecord};
