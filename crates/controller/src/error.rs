//! Error types for the slot controller.
//!
//! Only validation failures and creative integrity failures are visible to
//! the hosting pipeline. Consent suppression and identity timeouts recover
//! locally and are not represented here.

use adslot_page::RegistryError;
use adslot_types::SlotState;
use thiserror::Error;

/// Top-level error type for slot controller operations.
#[derive(Debug, Error)]
pub enum SlotError {
    /// Placement failed validation at build time.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Shared registry rejected the slot.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Ad request failed in transit.
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    /// Request URL could not be assembled.
    #[error("request url error: {0}")]
    Url(#[from] url::ParseError),

    /// Lifecycle call out of order.
    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition { from: SlotState, to: SlotState },

    /// Operation not allowed in the current state.
    #[error("{operation} not allowed in state {state}")]
    InvalidStateForOperation {
        operation: &'static str,
        state: SlotState,
    },

    /// Analytics element was already inserted for this render.
    #[error("analytics element already inserted")]
    AnalyticsAlreadyInserted,
}

/// Errors raised while validating the placement element.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// `data-ad-client` missing or empty.
    #[error("missing required attribute data-ad-client")]
    MissingClient,

    /// Responsive-size collaborator rejected the element.
    #[error("responsive placement rejected the element")]
    InvalidResponsivePlacement,

    /// Attribute present but not parseable.
    #[error("invalid value {value:?} for attribute {name}")]
    InvalidAttribute { name: String, value: String },
}

/// Errors from the render host's request transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    /// Transport-level failure.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Server answered with a non-success status.
    #[error("unexpected status {0}")]
    Status(u16),
}

/// Errors from the identity token source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// Source unreachable.
    #[error("identity service unavailable: {0}")]
    Unavailable(String),

    /// Source answered with something that is not a token.
    #[error("malformed identity response: {0}")]
    Malformed(String),
}

/// Creative failed its integrity check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CreativeIntegrityError {
    /// Computed checksum differs from the advertised one.
    #[error("checksum mismatch: declared {declared}, computed {computed}")]
    ChecksumMismatch { declared: String, computed: String },

    /// Algorithm header present without a checksum.
    #[error("checksum header missing for algorithm {algorithm}")]
    MissingChecksum { algorithm: String },
}

/// Errors loading controller configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid ad endpoint {endpoint:?}: {source}")]
    InvalidEndpoint {
        endpoint: String,
        source: url::ParseError,
    },
}

/// Result type for slot controller operations.
pub type SlotResult<T> = Result<T, SlotError>;

/// Result type for identity token fetches.
pub type IdentityResult<T> = Result<T, IdentityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SlotError::InvalidTransition {
            from: SlotState::Unbuilt,
            to: SlotState::RequestIssued,
        };
        assert_eq!(
            err.to_string(),
            "invalid state transition from Unbuilt to RequestIssued"
        );

        let err = SlotError::from(ValidationError::MissingClient);
        assert!(err.to_string().contains("data-ad-client"));

        let err = CreativeIntegrityError::ChecksumMismatch {
            declared: "1".into(),
            computed: "2".into(),
        };
        assert!(err.to_string().contains("declared 1"));
    }

    #[test]
    fn test_error_conversion() {
        let network = NetworkError::Status(503);
        let slot: SlotError = network.into();
        assert!(matches!(slot, SlotError::Network(NetworkError::Status(503))));
    }
}
