//! Error types for suitgen.
//!
//! Every failure is fail-fast: no error is downgraded to a warning and no
//! partial manifest or envelope is ever returned alongside one.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for suitgen operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable error codes, grouped by category.
///
/// Code ranges:
/// - 1000-1099: Configuration errors
/// - 1100-1199: I/O errors
/// - 1200-1299: Encoding errors
/// - 1300-1399: Signing and signature errors
/// - 1400-1499: Manifest acceptance errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1000-1099)
    InvalidConfiguration = 1000,

    // I/O errors (1100-1199)
    FileUnreadable = 1100,

    // Encoding errors (1200-1299)
    UnsupportedValue = 1200,
    MalformedCbor = 1201,
    PayloadTooLarge = 1202,

    // Signing and signature errors (1300-1399)
    SigningFailed = 1300,
    SignatureInvalid = 1301,
    InvalidKey = 1302,

    // Manifest acceptance errors (1400-1499)
    UnsupportedManifestVersion = 1400,
    StaleSequenceNumber = 1401,
    ConditionFailed = 1402,
}

impl ErrorCode {
    /// Get the numeric code value.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Get machine-readable name (kebab-case).
    pub fn name(self) -> &'static str {
        match self {
            Self::InvalidConfiguration => "invalid-configuration",
            Self::FileUnreadable => "file-unreadable",
            Self::UnsupportedValue => "unsupported-value",
            Self::MalformedCbor => "malformed-cbor",
            Self::PayloadTooLarge => "payload-too-large",
            Self::SigningFailed => "signing-failed",
            Self::SignatureInvalid => "signature-invalid",
            Self::InvalidKey => "invalid-key",
            Self::UnsupportedManifestVersion => "unsupported-manifest-version",
            Self::StaleSequenceNumber => "stale-sequence-number",
            Self::ConditionFailed => "condition-failed",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// Errors that can occur while building, encoding or signing manifests.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Build Input Errors
    // =========================================================================
    /// Mismatched counts, malformed offsets, bad templates, missing fields.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A referenced file could not be read. Aborts the whole build.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // =========================================================================
    // Encoding Errors
    // =========================================================================
    /// The value tree holds something the canonical encoder cannot represent.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Input bytes are not a well-formed encoding of a supported tree.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// Encoded input exceeds the accepted size.
    #[error("payload size {size} bytes exceeds maximum {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    // =========================================================================
    // Signing Errors
    // =========================================================================
    /// The signing capability failed or returned malformed output.
    #[error("signing error: {0}")]
    Signing(String),

    /// Signature verification failed.
    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    /// Key material could not be parsed.
    #[error("cryptographic error: {0}")]
    Crypto(String),

    // =========================================================================
    // Manifest Acceptance Errors
    // =========================================================================
    /// Manifest version is not the one this crate produces.
    #[error("unsupported manifest version: {0}")]
    UnsupportedVersion(u64),

    /// Sequence number does not advance past the installed one.
    #[error("sequence number {received} is not greater than current {current}")]
    StaleSequenceNumber { received: u64, current: u64 },

    /// A vendor or class condition does not match the device identity.
    #[error("condition {condition} failed: expected {expected}, manifest has {actual}")]
    ConditionFailed {
        condition: &'static str,
        expected: String,
        actual: String,
    },
}

impl Error {
    /// Shorthand for an I/O error on `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Map this error to its stable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Configuration(_) => ErrorCode::InvalidConfiguration,
            Self::Io { .. } => ErrorCode::FileUnreadable,
            Self::Encoding(_) => ErrorCode::UnsupportedValue,
            Self::Decoding(_) => ErrorCode::MalformedCbor,
            Self::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            Self::Signing(_) => ErrorCode::SigningFailed,
            Self::SignatureInvalid(_) => ErrorCode::SignatureInvalid,
            Self::Crypto(_) => ErrorCode::InvalidKey,
            Self::UnsupportedVersion(_) => ErrorCode::UnsupportedManifestVersion,
            Self::StaleSequenceNumber { .. } => ErrorCode::StaleSequenceNumber,
            Self::ConditionFailed { .. } => ErrorCode::ConditionFailed,
        }
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for Error {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        Error::Encoding(e.to_string())
    }
}

impl From<ciborium::de::Error<std::io::Error>> for Error {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        Error::Decoding(e.to_string())
    }
}

impl From<ed25519_dalek::SignatureError> for Error {
    fn from(e: ed25519_dalek::SignatureError) -> Self {
        Error::Crypto(e.to_string())
    }
}
