use crate::error::{MatrixError, Result};
use crate::player::ExternalPlayer;
use crate::types::{Capabilities, Capability, ExternalRef, InputId, MediaMetadata};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Association of a matrix input with an external player
#[derive(Clone)]
pub struct Link {
    pub input: InputId,
    pub reference: ExternalRef,
    /// Queried once when the link is made
    pub capabilities: Capabilities,
    pub player: Arc<dyn ExternalPlayer>,
}

impl Link {
    /// Check the cached capabilities
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.supports(capability)
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("input", &self.input)
            .field("reference", &self.reference)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Input -> external player map, one link per input and per player
#[derive(Debug, Clone, Default)]
pub struct LinkRegistry {
    links: BTreeMap<InputId, Link>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link `input` to `player`, replacing any previous link of that input
    ///
    /// Fails if the player is already linked from a different input.
    pub fn link(&mut self, input: InputId, player: Arc<dyn ExternalPlayer>) -> Result<()> {
        let reference = player.reference();
        if let Some(other) = self.linked_from(&reference) {
            if other != input {
                return Err(MatrixError::invalid_target(format!(
                    "{} is already linked from input {}",
                    reference, other
                )));
            }
        }
        let capabilities = player.capabilities();
        tracing::debug!("Linked input {} to {} ({:?})", input, reference, capabilities);
        self.links.insert(
            input,
            Link {
                input,
                reference,
                capabilities,
                player,
            },
        );
        Ok(())
    }

    /// Remove the link of `input`, returning it
    pub fn unlink(&mut self, input: InputId) -> Option<Link> {
        self.links.remove(&input)
    }

    /// Get the player reference linked to `input`
    pub fn resolve(&self, input: InputId) -> Option<ExternalRef> {
        self.links.get(&input).map(|l| l.reference.clone())
    }

    /// Get the link of `input`
    pub fn get(&self, input: InputId) -> Option<&Link> {
        self.links.get(&input)
    }

    /// Input that links to `reference`, if any
    pub fn linked_from(&self, reference: &str) -> Option<InputId> {
        self.links
            .values()
            .find(|l| l.reference == reference)
            .map(|l| l.input)
    }

    /// Now-playing data of the player linked to `input`
    pub fn metadata(&self, input: InputId) -> Option<MediaMetadata> {
        self.links.get(&input).and_then(|l| l.player.metadata())
    }

    /// Linked inputs, in order
    pub fn inputs(&self) -> impl Iterator<Item = InputId> + '_ {
        self.links.keys().copied()
    }

    /// Input to player reference table
    pub fn references(&self) -> BTreeMap<InputId, ExternalRef> {
        self.links
            .iter()
            .map(|(input, link)| (*input, link.reference.clone()))
            .collect()
    }

    /// Number of linked inputs
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Check if nothing is linked
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
