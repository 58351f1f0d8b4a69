//! Creative integrity verification and frame sandboxing

use crate::error::CreativeIntegrityError;
use crate::fingerprint::string_hash32;
use adslot_types::ResponseHeaders;

/// Header naming the checksum algorithm
pub const CHECKSUM_ALGORITHM_HEADER: &str = "AMP-Verification-Checksum-Algorithm";

/// Header carrying the expected checksum
pub const CHECKSUM_HEADER: &str = "AMP-Verification-Checksum";

/// The only recognized checksum algorithm
pub const DJB2_ALGORITHM: &str = "djb2";

/// Flags applied to a sandboxed creative frame
pub const SANDBOX_FLAGS: [&str; 6] = [
    "allow-forms",
    "allow-popups",
    "allow-popups-to-escape-sandbox",
    "allow-same-origin",
    "allow-scripts",
    "allow-top-navigation-by-user-activation",
];

/// Verifies creative bytes against advertised checksums
#[derive(Debug, Clone, Copy, Default)]
pub struct CreativeVerifier;

impl CreativeVerifier {
    /// Algorithm the response asks the verifier to use, if recognized
    pub fn requested_algorithm(headers: &ResponseHeaders) -> Option<&'static str> {
        headers
            .get(CHECKSUM_ALGORITHM_HEADER)
            .map(str::trim)
            .filter(|algorithm| algorithm.eq_ignore_ascii_case(DJB2_ALGORITHM))
            .map(|_| DJB2_ALGORITHM)
    }

    /// Check bytes against the declared checksum
    ///
    /// The bytes are hashed as text; invalid UTF-8 sequences are replaced
    /// before hashing.
    pub fn verify(bytes: &[u8], declared: &str) -> Result<(), CreativeIntegrityError> {
        let computed = string_hash32(&String::from_utf8_lossy(bytes));
        if computed == declared.trim() {
            Ok(())
        } else {
            Err(CreativeIntegrityError::ChecksumMismatch {
                declared: declared.to_string(),
                computed,
            })
        }
    }

    /// Verify using the response's headers
    ///
    /// Returns `Ok(None)` when no recognized algorithm is advertised and the
    /// caller should fall back to default validation.
    pub fn verify_response(
        bytes: Vec<u8>,
        headers: &ResponseHeaders,
    ) -> Result<Option<Vec<u8>>, CreativeIntegrityError> {
        let Some(algorithm) = Self::requested_algorithm(headers) else {
            return Ok(None);
        };
        let declared = headers
            .get(CHECKSUM_HEADER)
            .ok_or_else(|| CreativeIntegrityError::MissingChecksum {
                algorithm: algorithm.to_string(),
            })?;
        Self::verify(&bytes, declared)?;
        Ok(Some(bytes))
    }
}

/// Sandbox applied to the creative frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SandboxPolicy {
    #[default]
    Unrestricted,
    Sandboxed,
}

impl SandboxPolicy {
    pub fn from_directive(sandbox: bool) -> Self {
        if sandbox {
            SandboxPolicy::Sandboxed
        } else {
            SandboxPolicy::Unrestricted
        }
    }

    /// Value for the frame's `sandbox` attribute
    pub fn attribute(&self) -> Option<String> {
        match self {
            SandboxPolicy::Unrestricted => None,
            SandboxPolicy::Sandboxed => Some(SANDBOX_FLAGS.join(" ")),
        }
    }
}
