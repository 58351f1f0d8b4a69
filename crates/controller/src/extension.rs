//! Element extension registration
//!
//! Hosts look controllers up by element tag. This crate registers one
//! extension that creates [`SlotController`]s.

use crate::config::ControllerConfig;
use crate::controller::SlotController;
use crate::host::Collaborators;
use adslot_page::PageContext;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Element tag the controller is registered under
pub const EXTENSION_TAG: &str = "amp-ad-network-adsense-impl";

/// Extension version
pub const EXTENSION_VERSION: &str = "0.1";

/// Creates a controller for one element
pub type ControllerFactory =
    fn(Arc<PageContext>, Arc<ControllerConfig>, Collaborators) -> SlotController;

/// Tag, version and factory of an extension
#[derive(Debug, Clone, Copy)]
pub struct ExtensionRegistration {
    pub tag: &'static str,
    pub version: &'static str,
    pub factory: ControllerFactory,
}

impl ExtensionRegistration {
    pub fn create(
        &self,
        page: Arc<PageContext>,
        config: Arc<ControllerConfig>,
        collaborators: Collaborators,
    ) -> SlotController {
        (self.factory)(page, config, collaborators)
    }
}

/// Registration for the slot controller extension
pub fn registration() -> ExtensionRegistration {
    ExtensionRegistration {
        tag: EXTENSION_TAG,
        version: EXTENSION_VERSION,
        factory: SlotController::new,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtensionError {
    #[error("extension {tag} already registered at version {version}")]
    AlreadyRegistered { tag: String, version: String },
}

/// Extensions known to a host, keyed by tag
#[derive(Debug, Default)]
pub struct ExtensionRegistry {
    entries: HashMap<&'static str, ExtensionRegistration>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, registration: ExtensionRegistration) -> Result<(), ExtensionError> {
        if let Some(existing) = self.entries.get(registration.tag) {
            return Err(ExtensionError::AlreadyRegistered {
                tag: existing.tag.to_string(),
                version: existing.version.to_string(),
            });
        }
        tracing::debug!(
            tag = registration.tag,
            version = registration.version,
            "Extension registered"
        );
        self.entries.insert(registration.tag, registration);
        Ok(())
    }

    pub fn get(&self, tag: &str) -> Option<&ExtensionRegistration> {
        self.entries.get(tag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_metadata() {
        let reg = registration();
        assert_eq!(reg.tag, "amp-ad-network-adsense-impl");
        assert_eq!(reg.version, "0.1");
    }

    #[test]
    fn test_registry_rejects_duplicate_tag() {
        let mut registry = ExtensionRegistry::new();
        registry.register(registration()).unwrap();

        let err = registry.register(registration()).unwrap_err();
        assert_eq!(
            err,
            ExtensionError::AlreadyRegistered {
                tag: EXTENSION_TAG.to_string(),
                version: EXTENSION_VERSION.to_string(),
            }
        );
        assert_eq!(registry.len(), 1);
        assert!(registry.get(EXTENSION_TAG).is_some());
        assert!(registry.get("amp-ad-network-other-impl").is_none());
    }
}
