//! In-crate test doubles.

use crate::error::Result;
use crate::player::ExternalPlayer;
use crate::types::{Capabilities, ExternalRef, MediaMetadata, PlaybackCommand};
use async_trait::async_trait;
use std::sync::Arc;

pub(crate) struct FakePlayer {
    reference: ExternalRef,
    capabilities: Capabilities,
    metadata: Option<MediaMetadata>,
}

impl FakePlayer {
    pub(crate) fn new(reference: &str) -> Self {
        Self {
            reference: reference.to_string(),
            capabilities: Capabilities::all(),
            metadata: None,
        }
    }

    pub(crate) fn without_join(mut self) -> Self {
        self.capabilities.join = false;
        self
    }

    pub(crate) fn playing(mut self, title: &str, artist: &str) -> Self {
        self.metadata = Some(MediaMetadata {
            title: Some(title.to_string()),
            artist: Some(artist.to_string()),
            ..Default::default()
        });
        self
    }

    pub(crate) fn into_arc(self) -> Arc<dyn ExternalPlayer> {
        Arc::new(self)
    }
}

#[async_trait]
impl ExternalPlayer for FakePlayer {
    fn reference(&self) -> ExternalRef {
        self.reference.clone()
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn metadata(&self) -> Option<MediaMetadata> {
        self.metadata.clone()
    }

    async fn group_peers(&self) -> Result<Vec<ExternalRef>> {
        Ok(Vec::new())
    }

    async fn group_members(&self) -> Result<Vec<ExternalRef>> {
        Ok(Vec::new())
    }

    async fn join(&self, _member: &ExternalRef) -> Result<()> {
        Ok(())
    }

    async fn playback(&self, _command: PlaybackCommand) -> Result<()> {
        Ok(())
    }
}
