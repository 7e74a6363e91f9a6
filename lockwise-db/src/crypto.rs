//! Key material and AEAD helpers for database encryption.
//!
//! Database contents are sealed with XChaCha20-Poly1305 under a page key
//! derived with HKDF-SHA256 from the database key and the file's salt.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{DbError, DbResult};
use crate::format::{NONCE_SIZE, PAGE_KEY_INFO, SALT_BYTES};

/// Database encryption key (256-bit).
///
/// Generated once per account and held in the platform secret vault. The key
/// is zeroized on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DatabaseKey([u8; 32]);

impl DatabaseKey {
    /// Creates a key from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parses a key from a byte slice. Returns `None` unless the slice is
    /// exactly 32 bytes long.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(raw))
    }

    /// Generates a fresh random key from the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Returns the raw key bytes. Treat as sensitive.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for DatabaseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Per-database salt, stored as a lowercase hex string.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Salt(String);

impl Salt {
    /// Generates a fresh random salt.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; SALT_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let salt = Self(hex::encode(bytes));
        bytes.zeroize();
        salt
    }

    /// Wraps an existing salt string.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidSalt`] if the value is empty or longer than
    /// the header can hold.
    pub fn new(value: impl Into<String>) -> DbResult<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(DbError::InvalidSalt("salt is empty".to_string()));
        }
        if value.len() > usize::from(u16::MAX) {
            return Err(DbError::InvalidSalt(format!(
                "salt length {} exceeds {}",
                value.len(),
                u16::MAX
            )));
        }
        Ok(Self(value))
    }

    /// Parses a salt from raw bytes read from a header or the secret vault.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidSalt`] if the bytes are not UTF-8 or fail
    /// [`Salt::new`].
    pub fn from_bytes(bytes: &[u8]) -> DbResult<Self> {
        let value = std::str::from_utf8(bytes)
            .map_err(|err| DbError::InvalidSalt(err.to_string()))?;
        Self::new(value)
    }

    /// Returns the salt string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the salt as bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl PartialEq for Salt {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes().ct_eq(other.as_bytes()).into()
    }
}

impl Eq for Salt {}

impl std::fmt::Debug for Salt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Salt").field(&"[REDACTED]").finish()
    }
}

/// Key that actually seals the database body.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct PageKey([u8; 32]);

impl PageKey {
    pub(crate) fn derive(key: &DatabaseKey, salt: &Salt) -> DbResult<Self> {
        let hk = Hkdf::<Sha256>::new(Some(salt.as_bytes()), key.as_bytes());
        let mut okm = [0u8; 32];
        hk.expand(PAGE_KEY_INFO, &mut okm)
            .map_err(|err| DbError::Encryption(format!("hkdf expand: {err}")))?;
        Ok(Self(okm))
    }
}

impl ConstantTimeEq for PageKey {
    fn ct_eq(&self, other: &Self) -> subtle::Choice {
        self.0[..].ct_eq(&other.0[..])
    }
}

fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Seals `plaintext` with a fresh nonce. Returns `nonce || ciphertext`.
pub(crate) fn seal(key: &[u8; 32], aad: &[u8], plaintext: &[u8]) -> DbResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = generate_nonce();
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| DbError::Encryption("XChaCha20-Poly1305 encryption failed".into()))?;
    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Opens `nonce || ciphertext` produced by [`seal`].
pub(crate) fn open(key: &[u8; 32], aad: &[u8], sealed: &[u8]) -> DbResult<Vec<u8>> {
    if sealed.len() < NONCE_SIZE {
        return Err(DbError::truncated("sealed payload shorter than nonce"));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| DbError::Decryption("authentication tag mismatch".into()))
}

pub(crate) fn seal_with_page_key(
    key: &PageKey,
    aad: &[u8],
    plaintext: &[u8],
) -> DbResult<Vec<u8>> {
    seal(&key.0, aad, plaintext)
}

pub(crate) fn open_with_page_key(
    key: &PageKey,
    aad: &[u8],
    sealed: &[u8],
) -> DbResult<Vec<u8>> {
    open(&key.0, aad, sealed)
}
