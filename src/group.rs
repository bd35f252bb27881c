//! Grouping: an input plus the zones and external players that play it.
//!
//! Hardware zones join by being routed to the input. External players join
//! through the linked player's own grouping primitive, so an input without a
//! join-capable link can only gather hardware zones.

use crate::client::MatrixInner;
use crate::error::{MatrixError, Result};
use crate::link::Link;
use crate::types::{Capability, ExternalRef, GroupTarget, InputId};
use crate::zone::Zone;
use futures_util::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Outcome of a join request, one entry per distinct target
#[derive(Debug, Default)]
pub struct JoinReport {
    pub joined: Vec<GroupTarget>,
    pub failed: Vec<(GroupTarget, MatrixError)>,
}

impl JoinReport {
    /// True when every target joined
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl MatrixInner {
    /// Targets that could be joined to `input`
    ///
    /// Always the active zones; plus the linked player's peers when the link
    /// supports joining. A failing peer lookup narrows the list to hardware
    /// zones rather than failing.
    pub(crate) async fn joinable_members(&self, input: InputId) -> Result<Vec<GroupTarget>> {
        let (zones, link) = {
            let state = self.state.lock();
            state.require_input(input)?;
            let zones: Vec<_> = state.zones.keys().copied().collect();
            (zones, state.links.get(input).cloned())
        };

        let mut members: Vec<GroupTarget> = zones.into_iter().map(GroupTarget::Zone).collect();
        let Some(link) = link.filter(|l| l.supports(Capability::Join)) else {
            return Ok(members);
        };
        match link.player.group_peers().await {
            Ok(peers) => {
                let mut seen = BTreeSet::new();
                for peer in peers {
                    if peer != link.reference && seen.insert(peer.clone()) {
                        members.push(GroupTarget::External(peer));
                    }
                }
            }
            Err(e) => tracing::warn!(
                "Peer lookup for {} failed, offering hardware zones only: {}",
                link.reference,
                e
            ),
        }
        Ok(members)
    }

    /// Join every target to `input`
    ///
    /// Targets are attempted concurrently and independently; the report says
    /// which ones made it. Duplicate targets are attempted once.
    pub(crate) async fn join(self: &Arc<Self>, input: InputId, targets: &[GroupTarget]) -> Result<JoinReport> {
        let link = {
            let state = self.state.lock();
            state.require_input(input)?;
            state.links.get(input).cloned()
        };

        let mut unique: Vec<GroupTarget> = Vec::with_capacity(targets.len());
        for target in targets {
            if !unique.contains(target) {
                unique.push(target.clone());
            }
        }

        let attempts = unique.into_iter().map(|target| {
            let inner = Arc::clone(self);
            let link = link.clone();
            async move {
                let result = match &target {
                    GroupTarget::Zone(zone) => {
                        let zone = Zone::new(inner, *zone);
                        zone.select_source(input).await
                    }
                    GroupTarget::External(member) => join_external(link.as_ref(), input, member).await,
                };
                (target, result)
            }
        });

        let mut report = JoinReport::default();
        for (target, result) in join_all(attempts).await {
            match result {
                Ok(()) => report.joined.push(target),
                Err(e) => {
                    tracing::warn!("Failed to join {} to input {}: {}", target, input, e);
                    report.failed.push((target, e));
                }
            }
        }
        tracing::info!(
            "Joined {}/{} target(s) to input {}",
            report.joined.len(),
            report.joined.len() + report.failed.len(),
            input
        );
        Ok(report)
    }

    /// Zones routed to `input` plus the linked player's current group
    pub(crate) async fn group_members(&self, input: InputId) -> Result<Vec<GroupTarget>> {
        let (zones, link) = {
            let state = self.state.lock();
            state.require_input(input)?;
            let zones: Vec<_> = state
                .zones
                .values()
                .filter(|r| r.routing.input() == Some(input))
                .map(|r| r.id)
                .collect();
            (zones, state.links.get(input).cloned())
        };

        let mut members: Vec<GroupTarget> = zones.into_iter().map(GroupTarget::Zone).collect();
        if let Some(link) = link.filter(|l| l.supports(Capability::Join)) {
            match link.player.group_members().await {
                Ok(grouped) => members.extend(
                    grouped
                        .into_iter()
                        .filter(|r| *r != link.reference)
                        .map(GroupTarget::External),
                ),
                Err(e) => tracing::warn!("Group lookup for {} failed: {}", link.reference, e),
            }
        }
        Ok(members)
    }
}

async fn join_external(link: Option<&Link>, input: InputId, member: &ExternalRef) -> Result<()> {
    let link = link.ok_or_else(|| {
        MatrixError::invalid_target(format!("input {} has no linked player to group {}", input, member))
    })?;
    if !link.supports(Capability::Join) {
        return Err(MatrixError::invalid_target(format!(
            "{} cannot group players",
            link.reference
        )));
    }
    if *member == link.reference {
        return Ok(());
    }
    link.player.join(member).await
}
