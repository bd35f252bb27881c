use crate::client::MatrixInner;
use crate::error::{MatrixError, Result};
use crate::group::JoinReport;
use crate::link::Link;
use crate::types::{Capabilities, Capability, ExternalRef, GroupTarget, InputId, MediaMetadata, PlaybackCommand};
use std::sync::Arc;

/// Handle for one active matrix input
///
/// An input has no volume of its own. When it is linked to an external player
/// it proxies that player's metadata and playback controls, and acts as the
/// leader for grouping.
#[derive(Clone)]
pub struct InputSource {
    inner: Arc<MatrixInner>,
    id: InputId,
}

impl InputSource {
    pub(crate) fn new(inner: Arc<MatrixInner>, id: InputId) -> Self {
        Self { inner, id }
    }

    /// Get the input number
    pub fn id(&self) -> InputId {
        self.id
    }

    /// Get the display name
    pub fn name(&self) -> String {
        self.inner.state.lock().config.input_name(self.id)
    }

    /// Reference of the linked player
    pub fn link(&self) -> Option<ExternalRef> {
        self.inner.state.lock().links.resolve(self.id)
    }

    /// Capabilities of the linked player; none when unlinked
    pub fn capabilities(&self) -> Capabilities {
        self.inner
            .state
            .lock()
            .links
            .get(self.id)
            .map(|l| l.capabilities)
            .unwrap_or_default()
    }

    /// Now-playing data of the linked player
    pub fn metadata(&self) -> Option<MediaMetadata> {
        self.inner.state.lock().links.metadata(self.id)
    }

    /// Inputs are line level; volume is set per zone
    pub fn is_volume_fixed(&self) -> bool {
        true
    }

    // ========== Playback ==========

    /// Start playback on the linked player
    pub async fn play(&self) -> Result<()> {
        self.playback(PlaybackCommand::Play).await
    }

    /// Pause the linked player
    pub async fn pause(&self) -> Result<()> {
        self.playback(PlaybackCommand::Pause).await
    }

    /// Stop the linked player
    pub async fn stop(&self) -> Result<()> {
        self.playback(PlaybackCommand::Stop).await
    }

    /// Skip to the next track
    pub async fn next_track(&self) -> Result<()> {
        self.playback(PlaybackCommand::Next).await
    }

    /// Go back to the previous track
    pub async fn previous_track(&self) -> Result<()> {
        self.playback(PlaybackCommand::Previous).await
    }

    async fn playback(&self, command: PlaybackCommand) -> Result<()> {
        let link = self.require_link(Capability::PlaybackControl)?;
        tracing::debug!("Forwarding {:?} from input {} to {}", command, self.id, link.reference);
        link.player.playback(command).await
    }

    fn require_link(&self, capability: Capability) -> Result<Link> {
        let state = self.inner.state.lock();
        let link = state
            .links
            .get(self.id)
            .ok_or_else(|| MatrixError::invalid_target(format!("input {} has no linked player", self.id)))?;
        if !link.supports(capability) {
            return Err(MatrixError::invalid_target(format!(
                "{} does not support {:?}",
                link.reference, capability
            )));
        }
        Ok(link.clone())
    }

    // ========== Grouping ==========

    /// Zones and players this input can be grouped with
    pub async fn joinable_members(&self) -> Result<Vec<GroupTarget>> {
        self.inner.joinable_members(self.id).await
    }

    /// Feed this input to every target
    pub async fn join(&self, targets: &[GroupTarget]) -> Result<JoinReport> {
        self.inner.join(self.id, targets).await
    }

    /// Zones and players currently fed by this input
    pub async fn group_members(&self) -> Result<Vec<GroupTarget>> {
        self.inner.group_members(self.id).await
    }
}

impl std::fmt::Debug for InputSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputSource").field("id", &self.id).finish()
    }
}
