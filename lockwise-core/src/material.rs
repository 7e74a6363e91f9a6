//! Database key and salt management.
//!
//! The key is created once per account. The salt belongs to one database
//! file: whenever the file is recreated a new salt is generated with it, and
//! both vault entries are removed together on reset.

use std::sync::Arc;

use lockwise_db::{migrate_to_plaintext_header, DatabaseKey, LoginsDb, Salt};
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::error::{StoreError, StoreResult};
use crate::platform::{Accessibility, SecretVault};

/// Vault entry holding the database key.
pub const KEY_ENTRY: &str = "lockwise.database.key";
/// Vault entry holding the database salt.
pub const SALT_ENTRY: &str = "lockwise.database.salt";

/// Owns the database key and salt stored in the [`SecretVault`].
pub struct EncryptionMaterialManager {
    vault: Arc<dyn SecretVault>,
}

impl std::fmt::Debug for EncryptionMaterialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionMaterialManager").finish_non_exhaustive()
    }
}

impl EncryptionMaterialManager {
    /// Creates a manager over `vault`.
    #[must_use]
    pub const fn new(vault: Arc<dyn SecretVault>) -> Self {
        Self { vault }
    }

    /// Whether a key has been generated for this account.
    ///
    /// # Errors
    ///
    /// Returns an error if the vault read fails.
    pub fn has_key(&self) -> StoreResult<bool> {
        Ok(self.vault.get(KEY_ENTRY)?.is_some())
    }

    /// Returns the database key, generating and persisting one on first use.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidMaterial`] if the stored key is not 32
    /// bytes, or a vault error.
    pub fn key(&self) -> StoreResult<DatabaseKey> {
        if let Some(bytes) = self.vault.get(KEY_ENTRY)? {
            let bytes = Zeroizing::new(bytes);
            return DatabaseKey::from_slice(&bytes).ok_or_else(|| {
                StoreError::InvalidMaterial(format!(
                    "database key length mismatch: expected 32, got {}",
                    bytes.len()
                ))
            });
        }

        let key = DatabaseKey::generate();
        self.vault
            .set(KEY_ENTRY, key.as_bytes(), Accessibility::AfterFirstUnlock)?;
        info!("generated database key");
        Ok(key)
    }

    /// Returns the salt for the database behind `db`.
    ///
    /// A salt missing from the vault is recovered from the database file,
    /// migrating a legacy header on the way. If that fails the file is
    /// deleted before a fresh salt is generated, so a new salt is never
    /// paired with an old file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidMaterial`] if the stored salt is
    /// malformed, or a vault or filesystem error.
    pub fn salt(&self, db: &mut LoginsDb, key: &DatabaseKey) -> StoreResult<Salt> {
        if let Some(bytes) = self.vault.get(SALT_ENTRY)? {
            return Salt::from_bytes(&bytes)
                .map_err(|err| StoreError::InvalidMaterial(format!("database salt: {err}")));
        }

        let salt = if db.exists() {
            match migrate_to_plaintext_header(db.path(), key) {
                Ok(salt) => salt,
                Err(err) => {
                    warn!(error = %err, "could not recover salt from database, discarding it");
                    db.destroy()?;
                    Salt::generate()
                }
            }
        } else {
            Salt::generate()
        };

        self.persist_salt(&salt)?;
        Ok(salt)
    }

    /// Replaces a database that `key` and the stored salt no longer open
    /// with a fresh, empty one and leaves it unlocked.
    ///
    /// # Errors
    ///
    /// Every failure is reported as [`StoreError::DatabaseCreationFailed`].
    pub fn recover_from_unlock_failure(
        &self,
        db: &mut LoginsDb,
        key: &DatabaseKey,
    ) -> StoreResult<Salt> {
        warn!("recreating logins database after unlock failure");
        self.recreate(db, key)
            .map_err(|err| StoreError::DatabaseCreationFailed(err.to_string()))
    }

    fn recreate(&self, db: &mut LoginsDb, key: &DatabaseKey) -> StoreResult<Salt> {
        self.vault.delete(SALT_ENTRY)?;
        db.destroy()?;
        let salt = Salt::generate();
        db.ensure_unlocked(key, &salt)?;
        self.persist_salt(&salt)?;
        info!("logins database recreated");
        Ok(salt)
    }

    /// Deletes both the key and the salt.
    ///
    /// # Errors
    ///
    /// Returns a vault error if either delete fails.
    pub fn clear(&self) -> StoreResult<()> {
        self.vault.delete(SALT_ENTRY)?;
        self.vault.delete(KEY_ENTRY)?;
        Ok(())
    }

    fn persist_salt(&self, salt: &Salt) -> StoreResult<()> {
        self.vault
            .set(SALT_ENTRY, salt.as_bytes(), Accessibility::AfterFirstUnlock)
    }
}
