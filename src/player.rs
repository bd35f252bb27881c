//! Boundary to playback entities that live outside the matrix.
//!
//! The host implements [`ExternalPlayer`] for whatever it links to a matrix
//! input (a streamer, a networked speaker) and hands them out through a
//! [`PlayerDirectory`].

use crate::error::Result;
use crate::types::{Capabilities, ExternalRef, MediaMetadata, PlaybackCommand};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// A player the matrix can proxy metadata from and delegate to
#[async_trait]
pub trait ExternalPlayer: Send + Sync {
    /// Stable host identifier of this player
    fn reference(&self) -> ExternalRef;

    /// Delegated operations this player supports
    fn capabilities(&self) -> Capabilities;

    /// What the player is currently playing, if anything
    fn metadata(&self) -> Option<MediaMetadata>;

    /// Players this one could group with through its own join primitive
    async fn group_peers(&self) -> Result<Vec<ExternalRef>>;

    /// Players currently grouped with this one
    async fn group_members(&self) -> Result<Vec<ExternalRef>>;

    /// Ask this player to pull `member` into its group
    async fn join(&self, member: &ExternalRef) -> Result<()>;

    async fn playback(&self, command: PlaybackCommand) -> Result<()>;
}

/// Resolves configured references to live players
pub trait PlayerDirectory: Send + Sync {
    fn resolve(&self, reference: &str) -> Option<Arc<dyn ExternalPlayer>>;
}

impl PlayerDirectory for HashMap<ExternalRef, Arc<dyn ExternalPlayer>> {
    fn resolve(&self, reference: &str) -> Option<Arc<dyn ExternalPlayer>> {
        self.get(reference).cloned()
    }
}

/// Directory for setups without any linked players
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPlayers;

impl PlayerDirectory for NoPlayers {
    fn resolve(&self, _reference: &str) -> Option<Arc<dyn ExternalPlayer>> {
        None
    }
}
