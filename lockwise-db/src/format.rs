//! File format constants and layout definitions.

// Layout comments describe binary structure, not Rust identifiers
#![allow(clippy::doc_markdown)]

/// Magic bytes at the start of every logins database file.
pub const FILE_MAGIC: &[u8; 8] = b"LWLOGINS";

/// Current file format version: plaintext salt in the header.
pub const FORMAT_VERSION: u32 = 2;

/// Legacy file format version: salt sealed under the raw database key.
pub const LEGACY_FORMAT_VERSION: u32 = 1;

/// Size of an XChaCha20-Poly1305 nonce.
pub const NONCE_SIZE: usize = 24;

/// Size of the fixed header prefix: magic(8) + version(4).
pub const PREFIX_SIZE: usize = 12;

/// Fixed overhead of a current header around the salt:
/// prefix(12) + salt_len(2) + crc32(4).
pub const HEADER_OVERHEAD: usize = PREFIX_SIZE + 2 + 4;

/// Associated data binding the legacy sealed salt.
pub const LEGACY_SALT_AD: &[u8] = b"lockwise:legacy-salt";

/// HKDF info string for the database page key.
pub const PAGE_KEY_INFO: &[u8] = b"lockwise:logins-db";

/// Raw salt entropy before hex encoding.
pub const SALT_BYTES: usize = 16;
