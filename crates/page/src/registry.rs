//! Shared slot registry for one ad network
//!
//! Tracks, per client scope, the page-view counter and the formats and slot
//! names of the slots currently registered. Every slot request embeds the
//! history of the slots registered before it, so the registry must only ever
//! reflect active slots: a slot is appended on request and removed on
//! teardown.

use adslot_types::SlotId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Errors raised by registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A slot with this id is already registered on the network
    #[error("slot id {id} already registered on network {network}")]
    DuplicateSlotId { network: String, id: SlotId },
}

/// Pagination fields handed back to a slot when it registers
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SharedSlotParams {
    /// Page-view counter of the client scope, including this registration
    pub pv: u64,
    /// Formats of the slots registered before this one, in order
    pub prev_formats: Vec<String>,
    /// Non-empty slot names of the slots registered before this one
    pub prev_slot_names: Vec<String>,
}

#[derive(Debug, Clone)]
struct RegisteredSlot {
    id: SlotId,
    format: String,
    slot_name: String,
}

#[derive(Debug, Clone, Default)]
struct ClientScope {
    pv: u64,
    slots: Vec<RegisteredSlot>,
}

/// Page-wide registry shared by all slots of one ad network
#[derive(Debug)]
pub struct SharedSlotRegistry {
    network: String,
    scopes: HashMap<String, ClientScope>,
    /// Next per-network request index (`ifi`)
    next_request_index: u64,
}

impl SharedSlotRegistry {
    /// Create an empty registry for a network
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            scopes: HashMap::new(),
            next_request_index: 1,
        }
    }

    /// Network this registry belongs to
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Register a slot and return the pagination fields for its request
    ///
    /// The returned history excludes the slot being added. Registering an id
    /// that is still active is a caller defect and is rejected without
    /// touching any state.
    pub fn add_new_slot(
        &mut self,
        format: &str,
        id: &SlotId,
        client_id: &str,
        slot_name: &str,
    ) -> Result<SharedSlotParams, RegistryError> {
        if self.contains(id) {
            return Err(RegistryError::DuplicateSlotId {
                network: self.network.clone(),
                id: id.clone(),
            });
        }

        let scope = self.scopes.entry(client_id.to_string()).or_default();
        scope.pv += 1;

        let params = SharedSlotParams {
            pv: scope.pv,
            prev_formats: scope.slots.iter().map(|s| s.format.clone()).collect(),
            prev_slot_names: scope
                .slots
                .iter()
                .filter(|s| !s.slot_name.is_empty())
                .map(|s| s.slot_name.clone())
                .collect(),
        };

        scope.slots.push(RegisteredSlot {
            id: id.clone(),
            format: format.to_string(),
            slot_name: slot_name.to_string(),
        });

        tracing::debug!(
            network = %self.network,
            client = client_id,
            slot_id = %id,
            pv = params.pv,
            prev = params.prev_formats.len(),
            "Registered slot"
        );

        Ok(params)
    }

    /// Remove a slot's history entry; returns whether one was found
    pub fn remove_slot(&mut self, id: &SlotId) -> bool {
        for scope in self.scopes.values_mut() {
            if let Some(pos) = scope.slots.iter().position(|s| &s.id == id) {
                scope.slots.remove(pos);
                tracing::debug!(network = %self.network, slot_id = %id, "Removed slot");
                return true;
            }
        }
        false
    }

    /// Check whether a slot id is currently registered
    pub fn contains(&self, id: &SlotId) -> bool {
        self.scopes
            .values()
            .any(|scope| scope.slots.iter().any(|s| &s.id == id))
    }

    /// Number of currently registered slots across all client scopes
    pub fn active_slots(&self) -> usize {
        self.scopes.values().map(|scope| scope.slots.len()).sum()
    }

    /// Current page-view counter for a client scope (0 if never used)
    pub fn page_views(&self, client_id: &str) -> u64 {
        self.scopes.get(client_id).map(|s| s.pv).unwrap_or(0)
    }

    /// Allocate the next per-network request index
    pub fn next_request_index(&mut self) -> u64 {
        let index = self.next_request_index;
        self.next_request_index += 1;
        index
    }

    /// Clear all state
    pub fn reset(&mut self) {
        self.scopes.clear();
        self.next_request_index = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> SlotId {
        SlotId(s.to_string())
    }

    #[test]
    fn test_first_slot_has_empty_history() {
        let mut registry = SharedSlotRegistry::new("adsense");
        let params = registry
            .add_new_slot("300x250", &id("0123"), "ca-pub-1", "slot-a")
            .unwrap();

        assert_eq!(params.pv, 1);
        assert!(params.prev_formats.is_empty());
        assert!(params.prev_slot_names.is_empty());
    }

    #[test]
    fn test_pv_counts_registrations() {
        let mut registry = SharedSlotRegistry::new("adsense");
        for n in 1..=5u64 {
            let params = registry
                .add_new_slot("300x250", &id(&format!("slot{}", n)), "ca-pub-1", "")
                .unwrap();
            assert_eq!(params.pv, n);
            assert_eq!(params.prev_formats.len() as u64, n - 1);
        }
    }

    #[test]
    fn test_scopes_are_independent() {
        let mut registry = SharedSlotRegistry::new("adsense");
        registry
            .add_new_slot("300x250", &id("a"), "ca-pub-1", "x")
            .unwrap();
        let params = registry
            .add_new_slot("728x90", &id("b"), "ca-pub-2", "y")
            .unwrap();

        assert_eq!(params.pv, 1);
        assert!(params.prev_formats.is_empty());
        assert_eq!(registry.page_views("ca-pub-1"), 1);
        assert_eq!(registry.page_views("ca-pub-3"), 0);
    }

    #[test]
    fn test_empty_slot_names_skipped() {
        let mut registry = SharedSlotRegistry::new("adsense");
        registry
            .add_new_slot("300x250", &id("a"), "ca-pub-1", "")
            .unwrap();
        registry
            .add_new_slot("320x50", &id("b"), "ca-pub-1", "named")
            .unwrap();
        let params = registry
            .add_new_slot("728x90", &id("c"), "ca-pub-1", "")
            .unwrap();

        assert_eq!(params.prev_formats, vec!["300x250", "320x50"]);
        assert_eq!(params.prev_slot_names, vec!["named"]);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut registry = SharedSlotRegistry::new("adsense");
        registry
            .add_new_slot("300x250", &id("dup"), "ca-pub-1", "")
            .unwrap();

        let result = registry.add_new_slot("300x250", &id("dup"), "ca-pub-1", "");
        assert!(matches!(
            result,
            Err(RegistryError::DuplicateSlotId { .. })
        ));
        // Rejected registration must not bump the counter
        assert_eq!(registry.page_views("ca-pub-1"), 1);
        assert_eq!(registry.active_slots(), 1);
    }

    #[test]
    fn test_remove_then_readd() {
        let mut registry = SharedSlotRegistry::new("adsense");
        registry
            .add_new_slot("300x250", &id("a"), "ca-pub-1", "first")
            .unwrap();
        assert!(registry.remove_slot(&id("a")));
        assert!(!registry.remove_slot(&id("a")));

        let params = registry
            .add_new_slot("300x250", &id("a"), "ca-pub-1", "first")
            .unwrap();
        assert!(params.prev_formats.is_empty());
        assert!(params.prev_slot_names.is_empty());
        assert_eq!(params.pv, 2);
    }

    #[test]
    fn test_request_index_and_reset() {
        let mut registry = SharedSlotRegistry::new("adsense");
        assert_eq!(registry.next_request_index(), 1);
        assert_eq!(registry.next_request_index(), 2);
        registry
            .add_new_slot("300x250", &id("a"), "ca-pub-1", "")
            .unwrap();

        registry.reset();
        assert_eq!(registry.active_slots(), 0);
        assert_eq!(registry.page_views("ca-pub-1"), 0);
        assert_eq!(registry.next_request_index(), 1);
    }
}
