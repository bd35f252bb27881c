use crate::command_queue::CommandQueue;
use crate::config::MatrixConfig;
use crate::connection::Connection;
use crate::device::{DeviceModel, Intent, RawZoneStatus, StatusReport};
use crate::error::{MatrixError, Result};
use crate::input::InputSource;
use crate::link::LinkRegistry;
use crate::player::PlayerDirectory;
use crate::protocol::Command;
use crate::subscription::{ZoneUpdate, ZoneUpdateReceiver};
use crate::types::{ConnectionStatus, DeviceProfile, ExternalRef, InputId, ZoneId};
use crate::zone::{Zone, ZoneRecord};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Driver for one configured audio matrix
///
/// Owns the single connection to the device and the zone table. Cloning is
/// cheap; every clone drives the same device.
///
/// # Example
///
/// ```no_run
/// use matrix_audio::{MatrixClient, MatrixConfig, MatrixModel, NoPlayers};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = MatrixConfig::new("192.168.1.50", MatrixModel::Ams8);
///     let matrix = MatrixClient::connect(config, Arc::new(NoPlayers)).await?;
///     matrix.refresh().await?;
///
///     let kitchen = matrix.zone(3)?;
///     kitchen.select_source(5).await?;
///     kitchen.set_volume(40).await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct MatrixClient {
    inner: Arc<MatrixInner>,
}

/// State shared by the client and every zone/input handle
pub(crate) struct MatrixInner {
    pub(crate) queue: CommandQueue,
    pub(crate) model: DeviceModel,
    pub(crate) state: Mutex<MatrixState>,
    pub(crate) updates: broadcast::Sender<ZoneUpdate>,
    directory: Arc<dyn PlayerDirectory>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    /// Bumped every time the socket goes away
    losses: AtomicU64,
}

/// Configuration-derived tables; never held across an await
pub(crate) struct MatrixState {
    pub(crate) config: MatrixConfig,
    pub(crate) zones: BTreeMap<ZoneId, ZoneRecord>,
    pub(crate) links: LinkRegistry,
}

impl MatrixState {
    pub(crate) fn zone(&self, zone: ZoneId) -> Result<&ZoneRecord> {
        self.zones
            .get(&zone)
            .ok_or_else(|| MatrixError::invalid_target(format!("output {} is not active", zone)))
    }

    pub(crate) fn require_input(&self, input: InputId) -> Result<()> {
        if self.input_active(input) {
            Ok(())
        } else {
            Err(MatrixError::invalid_target(format!("input {} is not active", input)))
        }
    }

    pub(crate) fn input_active(&self, input: InputId) -> bool {
        self.config.active_inputs.contains(&input)
    }
}

/// What a configuration reconcile changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub added_zones: Vec<ZoneId>,
    pub removed_zones: Vec<ZoneId>,
    /// Zones forced off because their routed input was deactivated
    pub disconnected_zones: Vec<ZoneId>,
    pub linked_inputs: Vec<InputId>,
    pub unlinked_inputs: Vec<InputId>,
}

/// Serializable dump of the driver state
///
/// The device address is left out so dumps can be shared.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub port: u16,
    pub profile: DeviceProfile,
    pub status: ConnectionStatus,
    pub active_inputs: BTreeSet<InputId>,
    pub default_input: Option<InputId>,
    pub links: BTreeMap<InputId, ExternalRef>,
    pub zones: Vec<ZoneRecord>,
}

impl MatrixClient {
    /// Validate `config`, connect to the device, and start the command worker
    ///
    /// Fails with `Connection` if the socket cannot be established. Zones start
    /// out disconnected and stale until the first refresh.
    pub async fn connect(config: MatrixConfig, directory: Arc<dyn PlayerDirectory>) -> Result<Self> {
        config.validate()?;

        let mut connection = Connection::new(config.host.clone(), config.port, config.transport_options());
        connection.connect().await?;
        let min_send_interval = config.min_send_interval();

        let zones = config
            .active_outputs
            .iter()
            .map(|&z| (z, ZoneRecord::new(z, config.output_name(z))))
            .collect();
        let mut links = LinkRegistry::new();
        for (&input, reference) in &config.input_links {
            match directory.resolve(reference) {
                Some(player) => links.link(input, player)?,
                None => tracing::warn!("Linked player {} for input {} not found", reference, input),
            }
        }

        let (updates, _) = broadcast::channel(100);
        let inner = Arc::new_cyclic(|weak: &Weak<MatrixInner>| {
            let weak = weak.clone();
            let on_loss = Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.connection_lost();
                }
            });
            MatrixInner {
                queue: CommandQueue::start(connection, min_send_interval, on_loss),
                model: DeviceModel::new(config.profile()),
                state: Mutex::new(MatrixState { config, zones, links }),
                updates,
                directory,
                poll_task: Mutex::new(None),
                losses: AtomicU64::new(0),
            }
        });
        spawn_status_watcher(&inner);

        Ok(Self { inner })
    }

    /// Get the input/output counts of the configured model
    pub fn profile(&self) -> DeviceProfile {
        self.inner.model.profile()
    }

    /// Get the configuration currently in effect
    pub fn config(&self) -> MatrixConfig {
        self.inner.state.lock().config.clone()
    }

    /// Get the transport status
    pub fn status(&self) -> ConnectionStatus {
        self.inner.queue.status()
    }

    /// Handle for an active output zone
    pub fn zone(&self, zone: ZoneId) -> Result<Zone> {
        self.inner.state.lock().zone(zone)?;
        Ok(Zone::new(self.inner.clone(), zone))
    }

    /// Handles for every active zone, in id order
    pub fn zones(&self) -> Vec<Zone> {
        let ids: Vec<ZoneId> = self.inner.state.lock().zones.keys().copied().collect();
        ids.into_iter().map(|z| Zone::new(self.inner.clone(), z)).collect()
    }

    /// Handle for an active input
    pub fn input(&self, input: InputId) -> Result<InputSource> {
        self.inner.state.lock().require_input(input)?;
        Ok(InputSource::new(self.inner.clone(), input))
    }

    /// Handles for inputs that have a linked player
    pub fn linked_inputs(&self) -> Vec<InputSource> {
        let ids: Vec<InputId> = self.inner.state.lock().links.inputs().collect();
        ids.into_iter()
            .map(|i| InputSource::new(self.inner.clone(), i))
            .collect()
    }

    /// Subscribe to zone and connection updates
    pub fn subscribe(&self) -> ZoneUpdateReceiver {
        ZoneUpdateReceiver::new(self.inner.updates.subscribe())
    }

    /// Read the full state of every active zone from the device
    ///
    /// The hardware is authoritative: decoded routing overrides local state.
    /// On any failure nothing is changed.
    pub async fn refresh(&self) -> Result<()> {
        let zones: Vec<ZoneId> = self.inner.state.lock().zones.keys().copied().collect();
        self.inner.refresh_zones(&zones).await
    }

    /// Refresh every `poll_interval` in the background until stopped
    pub fn start_polling(&self) {
        let mut slot = self.inner.poll_task.lock();
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let interval = self.inner.state.lock().config.poll_interval();
        let weak = Arc::downgrade(&self.inner);
        *slot = Some(tokio::spawn(async move {
            loop {
                let Some(inner) = weak.upgrade() else { break };
                let zones: Vec<ZoneId> = inner.state.lock().zones.keys().copied().collect();
                match inner.refresh_zones(&zones).await {
                    Ok(()) => {}
                    Err(e) if e.is_connection_error() => {
                        tracing::debug!("Poll skipped, device unreachable: {}", e);
                    }
                    Err(e) => tracing::warn!("Poll failed: {}", e),
                }
                drop(inner);
                tokio::time::sleep(interval).await;
            }
        }));
        tracing::debug!("Polling every {:?}", interval);
    }

    /// Stop the background refresh started by `start_polling`
    pub fn stop_polling(&self) {
        if let Some(task) = self.inner.poll_task.lock().take() {
            task.abort();
        }
    }

    /// Apply a changed configuration to the live driver
    ///
    /// Deactivated zones are pruned, new ones start disconnected, zones routed
    /// to a deactivated input are switched off, and links are rebuilt. The
    /// device address and model cannot change without reconnecting.
    pub async fn reconcile(&self, config: MatrixConfig) -> Result<ReconcileReport> {
        config.validate()?;
        let mut report = ReconcileReport::default();
        let changed = {
            let mut state = self.inner.state.lock();
            if !state.config.same_device(&config) {
                return Err(MatrixError::Config(
                    "host, port or model changed; reconnect required".into(),
                ));
            }

            report.removed_zones = state
                .zones
                .keys()
                .filter(|z| !config.active_outputs.contains(z))
                .copied()
                .collect();
            for zone in &report.removed_zones {
                state.zones.remove(zone);
            }
            for &zone in &config.active_outputs {
                if !state.zones.contains_key(&zone) {
                    state.zones.insert(zone, ZoneRecord::new(zone, config.output_name(zone)));
                    report.added_zones.push(zone);
                }
            }

            let mut changed = Vec::new();
            for record in state.zones.values_mut() {
                record.name = config.output_name(record.id);
                if record.forget_inactive(|i| config.active_inputs.contains(&i)) {
                    report.disconnected_zones.push(record.id);
                }
                changed.push(record.clone());
            }

            let current = state.links.references();
            for (input, reference) in &current {
                if config.input_links.get(input) != Some(reference) {
                    state.links.unlink(*input);
                    report.unlinked_inputs.push(*input);
                }
            }
            for (&input, reference) in &config.input_links {
                if current.get(&input) == Some(reference) {
                    continue;
                }
                match self.inner.directory.resolve(reference) {
                    Some(player) => {
                        state.links.link(input, player)?;
                        report.linked_inputs.push(input);
                    }
                    None => tracing::warn!("Linked player {} for input {} not found", reference, input),
                }
            }

            state.config = config;
            changed
        };

        for zone in &report.removed_zones {
            self.inner.publish(ZoneUpdate::Removed(*zone));
        }
        for record in changed {
            self.inner.publish(ZoneUpdate::Changed(Box::new(record)));
        }
        for &zone in &report.disconnected_zones {
            if let Err(e) = self.inner.execute(Intent::Disconnect { zone }).await {
                tracing::warn!("Could not switch off output {} after input removal: {}", zone, e);
            }
        }
        tracing::info!(
            "Reconciled configuration: +{} -{} zones, {} forced off",
            report.added_zones.len(),
            report.removed_zones.len(),
            report.disconnected_zones.len()
        );
        Ok(report)
    }

    /// Switch the device's 12V trigger output
    pub async fn set_trigger_zone(&self, on: bool) -> Result<()> {
        let resp = self.inner.execute(Intent::Trigger { on }).await?;
        tracing::info!("Set trigger zone to {} (resp: {})", on, resp);
        Ok(())
    }

    /// Send caller-provided bytes through the command queue
    pub async fn send_raw(&self, bytes: Vec<u8>) -> Result<String> {
        self.inner.queue.enqueue(Command::raw(bytes)).await
    }

    /// Snapshot of configuration, status and zone records
    pub fn diagnostics(&self) -> Diagnostics {
        let state = self.inner.state.lock();
        Diagnostics {
            port: state.config.port,
            profile: self.inner.model.profile(),
            status: self.inner.queue.status(),
            active_inputs: state.config.active_inputs.clone(),
            default_input: state.config.default_input,
            links: state.links.references(),
            zones: state.zones.values().cloned().collect(),
        }
    }

    /// Stop polling, let the in-flight command finish, and close the socket
    pub async fn shutdown(&self) {
        self.stop_polling();
        self.inner.queue.shutdown().await;
    }
}

impl MatrixInner {
    /// Encode an intent and run it through the queue
    pub(crate) async fn execute(&self, intent: Intent) -> Result<String> {
        let command = self.model.encode(intent)?;
        self.queue.enqueue(command).await
    }

    pub(crate) fn publish(&self, update: ZoneUpdate) {
        let _ = self.updates.send(update);
    }

    /// Mark every zone stale; runs on the command worker right after a loss
    fn connection_lost(&self) {
        self.losses.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        for record in state.zones.values_mut() {
            record.mark_stale();
        }
    }

    /// Record a route the device acknowledged
    ///
    /// Returns false, leaving the zone off, if the input was deactivated while
    /// the command was queued.
    pub(crate) fn apply_route(&self, zone: ZoneId, input: InputId) -> bool {
        let (record, active) = {
            let mut state = self.state.lock();
            let active = state.input_active(input);
            let record = state.zones.get_mut(&zone).map(|record| {
                if active {
                    record.apply_select(input);
                } else {
                    record.apply_off();
                }
                record.clone()
            });
            (record, active)
        };
        if let Some(record) = record {
            self.publish(ZoneUpdate::Changed(Box::new(record)));
        }
        active
    }

    /// Mutate one zone record and announce the change; no-op if it was removed
    pub(crate) fn update_zone(&self, zone: ZoneId, f: impl FnOnce(&mut ZoneRecord)) {
        let record = {
            let mut state = self.state.lock();
            state.zones.get_mut(&zone).map(|record| {
                f(record);
                record.clone()
            })
        };
        if let Some(record) = record {
            self.publish(ZoneUpdate::Changed(Box::new(record)));
        }
    }

    /// Query and decode the given zones, applying the result only if every
    /// frame decoded
    pub(crate) async fn refresh_zones(&self, zones: &[ZoneId]) -> Result<()> {
        let losses = self.losses.load(Ordering::SeqCst);
        let mut report = StatusReport::default();
        for &zone in zones {
            let source = self.execute(Intent::QuerySource { zone }).await?;
            let volume = self.execute(Intent::QueryVolume { zone }).await?;
            let mute = self.execute(Intent::QueryMute { zone }).await?;
            report.zones.push(RawZoneStatus {
                zone,
                source,
                volume,
                mute,
            });
        }

        let snapshot = self.model.decode_status(&report).inspect_err(|e| {
            tracing::warn!("Discarding status report: {}", e);
        })?;

        let changed: Vec<ZoneRecord> = {
            let mut state = self.state.lock();
            // a loss after the queries were answered leaves the data unconfirmed
            let live = self.losses.load(Ordering::SeqCst) == losses;
            let active = state.config.active_inputs.clone();
            snapshot
                .zones
                .values()
                .filter_map(|status| {
                    state.zones.get_mut(&status.zone).map(|record| {
                        record.apply_status(status, |i| active.contains(&i));
                        if !live {
                            record.mark_stale();
                        }
                        record.clone()
                    })
                })
                .collect()
        };
        for record in changed {
            self.publish(ZoneUpdate::Changed(Box::new(record)));
        }
        Ok(())
    }
}

/// Announce transport status changes to subscribers
///
/// Only the latest status is seen, so quick flaps may be coalesced. Staleness
/// does not depend on this; the command worker marks zones directly.
fn spawn_status_watcher(inner: &Arc<MatrixInner>) {
    let mut status_rx = inner.queue.subscribe_status();
    let weak: Weak<MatrixInner> = Arc::downgrade(inner);
    tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = *status_rx.borrow_and_update();
            let Some(inner) = weak.upgrade() else { break };
            inner.publish(ZoneUpdate::Connection(status));
        }
    });
}
