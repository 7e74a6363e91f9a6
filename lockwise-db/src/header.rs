//! File header definitions.
//!
//! Both header versions share a 12-byte prefix: the magic bytes followed by
//! the format version. What follows depends on the version.

// Binary format code uses small constant casts that are checked first
#![allow(clippy::cast_possible_truncation)]

use crate::crypto::Salt;
use crate::error::{DbError, DbResult};
use crate::format::{
    FILE_MAGIC, FORMAT_VERSION, HEADER_OVERHEAD, LEGACY_FORMAT_VERSION, PREFIX_SIZE,
};

/// Reads and validates the common prefix, returning the format version.
pub(crate) fn read_version(bytes: &[u8]) -> DbResult<u32> {
    if bytes.len() < PREFIX_SIZE {
        return Err(DbError::truncated("file shorter than header prefix"));
    }
    if &bytes[0..8] != FILE_MAGIC {
        return Err(DbError::InvalidMagic);
    }
    let version = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    match version {
        FORMAT_VERSION | LEGACY_FORMAT_VERSION => Ok(version),
        other => Err(DbError::UnsupportedVersion(other)),
    }
}

fn prefix(version: u32) -> [u8; PREFIX_SIZE] {
    let mut buf = [0u8; PREFIX_SIZE];
    buf[0..8].copy_from_slice(FILE_MAGIC);
    buf[8..12].copy_from_slice(&version.to_le_bytes());
    buf
}

/// Current file header carrying the plaintext salt.
///
/// # Binary Layout
///
/// ```text
/// Offset    Size      Field
/// ------    ----      -----
/// 0         8         magic ("LWLOGINS")
/// 8         4         format_version (u32 LE) = 2
/// 12        2         salt_len (u16 LE)
/// 14        salt_len  salt (UTF-8)
/// 14+n      4         crc32 (over all preceding bytes)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FileHeader {
    pub(crate) salt: Salt,
}

impl FileHeader {
    pub(crate) const fn new(salt: Salt) -> Self {
        Self { salt }
    }

    /// Encodes the header. The encoded bytes double as the body's AAD.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let salt = self.salt.as_bytes();
        // Salt::new caps the length at u16::MAX.
        let salt_len = salt.len() as u16;
        let mut buf = Vec::with_capacity(HEADER_OVERHEAD + salt.len());
        buf.extend_from_slice(&prefix(FORMAT_VERSION));
        buf.extend_from_slice(&salt_len.to_le_bytes());
        buf.extend_from_slice(salt);
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes a header, returning it with its encoded length.
    pub(crate) fn decode(bytes: &[u8]) -> DbResult<(Self, usize)> {
        let version = read_version(bytes)?;
        if version != FORMAT_VERSION {
            return Err(DbError::UnsupportedVersion(version));
        }
        if bytes.len() < PREFIX_SIZE + 2 {
            return Err(DbError::truncated("header missing salt length"));
        }
        let salt_len = usize::from(u16::from_le_bytes([bytes[12], bytes[13]]));
        let crc_offset = PREFIX_SIZE + 2 + salt_len;
        let total = crc_offset + 4;
        if bytes.len() < total {
            return Err(DbError::truncated("header shorter than declared salt"));
        }

        let expected_crc = crc32fast::hash(&bytes[..crc_offset]);
        let stored_crc = u32::from_le_bytes([
            bytes[crc_offset],
            bytes[crc_offset + 1],
            bytes[crc_offset + 2],
            bytes[crc_offset + 3],
        ]);
        if expected_crc != stored_crc {
            return Err(DbError::ChecksumMismatch);
        }

        let salt = Salt::from_bytes(&bytes[PREFIX_SIZE + 2..crc_offset])
            .map_err(|_| DbError::ChecksumMismatch)?;
        Ok((Self { salt }, total))
    }
}

/// Header written by releases that sealed the salt under the raw key.
///
/// # Binary Layout
///
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       8     magic ("LWLOGINS")
/// 8       4     format_version (u32 LE) = 1
/// 12      4     sealed_len (u32 LE)
/// 16      n     nonce(24) || XChaCha20-Poly1305(key, salt)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LegacyHeader {
    pub(crate) sealed_salt: Vec<u8>,
}

impl LegacyHeader {
    /// The prefix alone authenticates a legacy body.
    pub(crate) fn body_aad() -> [u8; PREFIX_SIZE] {
        prefix(LEGACY_FORMAT_VERSION)
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub(crate) fn encode(&self) -> DbResult<Vec<u8>> {
        let sealed_len = u32::try_from(self.sealed_salt.len())
            .map_err(|_| DbError::InvalidSalt("sealed salt too long".into()))?;
        let mut buf = Vec::with_capacity(PREFIX_SIZE + 4 + self.sealed_salt.len());
        buf.extend_from_slice(&prefix(LEGACY_FORMAT_VERSION));
        buf.extend_from_slice(&sealed_len.to_le_bytes());
        buf.extend_from_slice(&self.sealed_salt);
        Ok(buf)
    }

    pub(crate) fn decode(bytes: &[u8]) -> DbResult<(Self, usize)> {
        let version = read_version(bytes)?;
        if version != LEGACY_FORMAT_VERSION {
            return Err(DbError::UnsupportedVersion(version));
        }
        if bytes.len() < PREFIX_SIZE + 4 {
            return Err(DbError::truncated("legacy header missing length"));
        }
        let sealed_len =
            u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) as usize;
        let total = PREFIX_SIZE + 4 + sealed_len;
        if bytes.len() < total {
            return Err(DbError::truncated("legacy header shorter than declared"));
        }
        Ok((
            Self {
                sealed_salt: bytes[PREFIX_SIZE + 4..total].to_vec(),
            },
            total,
        ))
    }
}
