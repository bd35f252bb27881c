use crate::client::MatrixInner;
use crate::device::{DeviceModel, Intent};
use crate::error::{MatrixError, Result};
use crate::protocol;
use crate::types::{InputId, MediaMetadata, Routing, Volume, ZoneId, ZoneStatus, MAX_VOLUME};
use serde::Serialize;
use std::sync::Arc;

/// Quietest step that still reads as audio on the device
const MIN_VOLUME: Volume = 1;

/// Last known state of one output zone
///
/// A zone is on exactly when it is routed to an input; there is no separate
/// power flag to drift out of sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneRecord {
    pub id: ZoneId,
    pub name: String,
    pub routing: Routing,
    /// Most recent input this zone was connected to, kept across turn-off
    pub last_input: Option<InputId>,
    /// Unknown until the first refresh
    pub volume: Option<Volume>,
    pub muted: bool,
    /// Set while the connection is down and until the next successful refresh
    pub stale: bool,
}

impl ZoneRecord {
    pub(crate) fn new(id: ZoneId, name: String) -> Self {
        Self {
            id,
            name,
            routing: Routing::Disconnected,
            last_input: None,
            volume: None,
            muted: false,
            stale: true,
        }
    }

    /// True while routed to an input
    pub fn is_on(&self) -> bool {
        self.routing.is_connected()
    }

    pub(crate) fn apply_select(&mut self, input: InputId) {
        self.routing = Routing::Connected(input);
        self.last_input = Some(input);
    }

    pub(crate) fn apply_off(&mut self) {
        if let Routing::Connected(input) = self.routing {
            self.last_input = Some(input);
        }
        self.routing = Routing::Disconnected;
    }

    pub(crate) fn apply_volume(&mut self, volume: Volume) {
        self.volume = Some(volume.min(MAX_VOLUME));
    }

    pub(crate) fn apply_mute(&mut self, muted: bool) {
        self.muted = muted;
    }

    /// Overwrite local state with what the hardware reported
    ///
    /// Routing to an input that is not active here reads as disconnected and
    /// leaves `last_input` alone.
    pub(crate) fn apply_status(&mut self, status: &ZoneStatus, input_active: impl Fn(InputId) -> bool) {
        match status.routed_input {
            Some(input) if input_active(input) => self.apply_select(input),
            Some(input) => {
                tracing::debug!("Output {} routed to inactive input {}", self.id, input);
                self.routing = Routing::Disconnected;
            }
            None => self.apply_off(),
        }
        self.volume = Some(status.volume);
        self.muted = status.muted;
        self.stale = false;
    }

    /// Drop references to inputs that are no longer active
    ///
    /// Returns true if the zone was routed to one and is now disconnected.
    pub(crate) fn forget_inactive(&mut self, input_active: impl Fn(InputId) -> bool) -> bool {
        if self.last_input.is_some_and(|i| !input_active(i)) {
            self.last_input = None;
        }
        match self.routing {
            Routing::Connected(input) if !input_active(input) => {
                self.routing = Routing::Disconnected;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Input a turn-on request should end up on
    ///
    /// Already-connected zones stay where they are.
    pub(crate) fn turn_on_target(
        &self,
        model: &DeviceModel,
        default_input: Option<InputId>,
        usable: impl Fn(InputId) -> bool,
    ) -> Result<InputId> {
        match self.routing {
            Routing::Connected(input) => Ok(input),
            Routing::Disconnected => model.resolve_turn_on(self.id, self.last_input, default_input, usable),
        }
    }
}

/// Handle for controlling one output zone
///
/// Obtained from [`MatrixClient::zone`](crate::MatrixClient::zone). Commands go
/// through the shared queue; local state only changes once the device
/// acknowledged them.
#[derive(Clone)]
pub struct Zone {
    inner: Arc<MatrixInner>,
    id: ZoneId,
}

impl Zone {
    pub(crate) fn new(inner: Arc<MatrixInner>, id: ZoneId) -> Self {
        Self { inner, id }
    }

    /// Get the output number
    pub fn id(&self) -> ZoneId {
        self.id
    }

    /// Current record, or `None` once the zone has been deactivated
    pub fn record(&self) -> Option<ZoneRecord> {
        self.inner.state.lock().zones.get(&self.id).cloned()
    }

    /// Get the display name
    pub fn name(&self) -> Option<String> {
        self.record().map(|r| r.name)
    }

    /// Check if the zone is routed to an input
    pub fn is_on(&self) -> bool {
        self.record().is_some_and(|r| r.is_on())
    }

    /// Get the current routing
    pub fn routing(&self) -> Routing {
        self.record().map_or(Routing::Disconnected, |r| r.routing)
    }

    /// Get the last known volume (0-100)
    pub fn volume(&self) -> Option<Volume> {
        self.record().and_then(|r| r.volume)
    }

    /// Check if the zone is muted
    pub fn is_muted(&self) -> bool {
        self.record().is_some_and(|r| r.muted)
    }

    /// Whether the zone's data reflects a live, refreshed device
    pub fn is_available(&self) -> bool {
        self.record().is_some_and(|r| !r.stale)
    }

    /// Name of the routed input
    pub fn source(&self) -> Option<String> {
        let state = self.inner.state.lock();
        let input = state.zones.get(&self.id)?.routing.input()?;
        Some(state.config.input_name(input))
    }

    /// Names of every active input, in input order
    pub fn source_list(&self) -> Vec<String> {
        let state = self.inner.state.lock();
        state
            .config
            .active_inputs
            .iter()
            .map(|&i| state.config.input_name(i))
            .collect()
    }

    /// Now-playing data of the player linked to the routed input
    pub fn metadata(&self) -> Option<MediaMetadata> {
        let state = self.inner.state.lock();
        let input = state.zones.get(&self.id)?.routing.input()?;
        state.links.metadata(input)
    }

    // ========== Routing ==========

    /// Route an input to this zone, turning it on
    ///
    /// If the input is deactivated while the route is still queued, the zone
    /// is switched back off and the call fails with `InvalidTarget`.
    pub async fn select_source(&self, input: InputId) -> Result<()> {
        {
            let state = self.inner.state.lock();
            state.zone(self.id)?;
            state.require_input(input)?;
        }
        self.inner.execute(Intent::Route { zone: self.id, input }).await?;
        if !self.inner.apply_route(self.id, input) {
            tracing::warn!(
                "Input {} was deactivated while routing output {}; switching off",
                input,
                self.id
            );
            self.inner.execute(Intent::Disconnect { zone: self.id }).await?;
            return Err(MatrixError::invalid_target(format!("input {} is not active", input)));
        }
        tracing::info!("Routed input {} to output {}", input, self.id);
        Ok(())
    }

    /// Route the active input with the given display name
    pub async fn select_source_by_name(&self, name: &str) -> Result<()> {
        let input = {
            let state = self.inner.state.lock();
            state
                .config
                .active_inputs
                .iter()
                .copied()
                .find(|&i| state.config.input_name(i) == name)
        };
        match input {
            Some(input) => self.select_source(input).await,
            None => Err(MatrixError::invalid_target(format!("no active input named {:?}", name))),
        }
    }

    /// Turn the zone on, reconnecting the last used input or the default
    ///
    /// No-op when already on. Fails with `NoSourceAvailable` when there is
    /// nothing usable to route; the zone stays off.
    pub async fn turn_on(&self) -> Result<()> {
        let input = {
            let state = self.inner.state.lock();
            let record = state.zone(self.id)?;
            if record.is_on() {
                return Ok(());
            }
            record
                .turn_on_target(&self.inner.model, state.config.default_input, |i| state.input_active(i))
                .inspect_err(|e| tracing::warn!("Cannot turn on output {}: {}", self.id, e))?
        };
        self.select_source(input).await
    }

    /// Disconnect the zone, remembering its input for the next turn-on
    pub async fn turn_off(&self) -> Result<()> {
        self.inner.state.lock().zone(self.id)?;
        self.inner.execute(Intent::Disconnect { zone: self.id }).await?;
        self.inner.update_zone(self.id, ZoneRecord::apply_off);
        tracing::info!("Turned off output {}", self.id);
        Ok(())
    }

    /// Leave whatever group the zone is in; same as turning it off
    pub async fn unjoin(&self) -> Result<()> {
        self.turn_off().await
    }

    // ========== Volume Control ==========

    /// Set the volume; allowed whether the zone is on or off
    ///
    /// Clamped to 1-100. The device reads step 0 as "Audio Off", so 0 is sent
    /// as the quietest audible step.
    pub async fn set_volume(&self, volume: Volume) -> Result<()> {
        let volume = volume.clamp(MIN_VOLUME, MAX_VOLUME);
        self.inner.state.lock().zone(self.id)?;
        self.inner
            .execute(Intent::SetVolume { zone: self.id, volume })
            .await?;
        self.inner.update_zone(self.id, |r| r.apply_volume(volume));
        tracing::debug!("Set output {} volume to {}", self.id, volume);
        Ok(())
    }

    /// Step the volume up by one small or large increment
    pub async fn volume_up(&self, large: bool) -> Result<()> {
        self.step_volume(true, large).await
    }

    /// Step the volume down by one small or large increment
    pub async fn volume_down(&self, large: bool) -> Result<()> {
        self.step_volume(false, large).await
    }

    async fn step_volume(&self, up: bool, large: bool) -> Result<()> {
        self.inner.state.lock().zone(self.id)?;
        self.inner
            .execute(Intent::StepVolume { zone: self.id, up, large })
            .await?;
        // the step acknowledgement does not carry the new level
        let text = self.inner.execute(Intent::QueryVolume { zone: self.id }).await?;
        let volume = protocol::parse_volume(&text)?;
        self.inner.update_zone(self.id, |r| r.apply_volume(volume));
        Ok(())
    }

    // ========== Mute Control ==========

    /// Mute or unmute the zone
    pub async fn set_muted(&self, muted: bool) -> Result<()> {
        self.inner.state.lock().zone(self.id)?;
        self.inner
            .execute(Intent::SetMute { zone: self.id, muted })
            .await?;
        self.inner.update_zone(self.id, |r| r.apply_mute(muted));
        Ok(())
    }

    /// Re-read this zone from the device
    pub async fn refresh(&self) -> Result<()> {
        self.inner.state.lock().zone(self.id)?;
        self.inner.refresh_zones(&[self.id]).await
    }
}

impl std::fmt::Debug for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Zone").field("id", &self.id).finish()
    }
}
