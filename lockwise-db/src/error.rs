//! Error types for the logins database.

use thiserror::Error;

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors raised while reading, writing or decrypting a logins database.
#[derive(Debug, Error)]
pub enum DbError {
    /// Filesystem failure.
    #[error("io error ({context}): {source}")]
    Io {
        /// What was being attempted.
        context: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file does not start with the database magic bytes.
    #[error("invalid magic bytes")]
    InvalidMagic,

    /// The header declares a version this build cannot read.
    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u32),

    /// Header CRC does not match its contents.
    #[error("header checksum mismatch")]
    ChecksumMismatch,

    /// The file ends before a complete structure could be read.
    #[error("unexpected end of file: {0}")]
    Truncated(String),

    /// AEAD authentication failed: wrong key, wrong salt or tampered bytes.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// AEAD sealing or key derivation failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// CBOR encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The salt supplied to unlock differs from the one in the file header.
    #[error("salt does not match database header")]
    SaltMismatch,

    /// A salt value is empty or too long to fit the header.
    #[error("invalid salt: {0}")]
    InvalidSalt(String),

    /// The operation needs an unlocked database.
    #[error("database is locked")]
    Locked,
}

impl DbError {
    pub(crate) fn io<S: Into<String>>(context: S, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn truncated<S: Into<String>>(context: S) -> Self {
        Self::Truncated(context.into())
    }

    /// Whether the failure means the file cannot be opened with the material
    /// at hand, so deleting and recreating it is the only way forward.
    ///
    /// I/O failures are not recoverable this way: recreating the file would
    /// fail the same way.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidMagic
                | Self::UnsupportedVersion(_)
                | Self::ChecksumMismatch
                | Self::Truncated(_)
                | Self::Decryption(_)
                | Self::Serialization(_)
                | Self::SaltMismatch
        )
    }
}
