//! Logins database handle.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use subtle::ConstantTimeEq;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::crypto::{open_with_page_key, seal_with_page_key, DatabaseKey, PageKey, Salt};
use crate::error::{DbError, DbResult};
use crate::file;
use crate::format::FORMAT_VERSION;
use crate::header::{read_version, FileHeader};
use crate::migrate::open_legacy;
use crate::record::CredentialRecord;

type Records = BTreeMap<String, CredentialRecord>;

/// Handle to the encrypted logins database file.
///
/// A handle starts locked. [`LoginsDb::ensure_unlocked`] decrypts the file
/// into memory (creating it if absent); every mutation rewrites the file
/// atomically before the in-memory copy changes. Locking drops the plaintext
/// and the page key.
pub struct LoginsDb {
    path: PathBuf,
    open: Option<OpenDb>,
}

struct OpenDb {
    page_key: PageKey,
    salt: Salt,
    records: Records,
}

impl std::fmt::Debug for LoginsDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginsDb")
            .field("path", &self.path)
            .field("locked", &self.is_locked())
            .finish()
    }
}

impl LoginsDb {
    /// Creates a locked handle for the database at `path`. Nothing is read
    /// until the handle is unlocked.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            open: None,
        }
    }

    /// Path of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the database file exists on disk.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Whether the handle currently holds no decrypted contents.
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.open.is_none()
    }

    /// Opens the database with `key` and `salt`, creating an empty database
    /// if the file does not exist. A no-op when already open with the same
    /// material. Legacy files are rewritten in the current format.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::SaltMismatch`] if the header salt differs from
    /// `salt`, [`DbError::Decryption`] if the key does not open the file, or
    /// another error if the file is malformed or cannot be written.
    pub fn ensure_unlocked(&mut self, key: &DatabaseKey, salt: &Salt) -> DbResult<()> {
        let page_key = PageKey::derive(key, salt)?;
        if let Some(open) = &self.open {
            if open.salt == *salt && bool::from(open.page_key.ct_eq(&page_key)) {
                return Ok(());
            }
            self.ensure_locked();
        }

        let records = match file::read_if_exists(&self.path)? {
            None => {
                let records = Records::new();
                write_current(&self.path, &page_key, salt, &records)?;
                info!(path = %self.path.display(), "created logins database");
                records
            }
            Some(bytes) => {
                if read_version(&bytes)? == FORMAT_VERSION {
                    read_current(&bytes, &page_key, salt)?
                } else {
                    let (legacy_salt, records) = open_legacy(&bytes, key)?;
                    if legacy_salt != *salt {
                        return Err(DbError::SaltMismatch);
                    }
                    let records = index(records);
                    write_current(&self.path, &page_key, salt, &records)?;
                    info!("upgraded legacy logins database header");
                    records
                }
            }
        };

        debug!(records = records.len(), "logins database unlocked");
        self.open = Some(OpenDb {
            page_key,
            salt: salt.clone(),
            records,
        });
        Ok(())
    }

    /// Drops decrypted contents and key material. Idempotent.
    pub fn ensure_locked(&mut self) {
        if self.open.take().is_some() {
            debug!("logins database locked");
        }
    }

    /// Locks the handle and deletes the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn destroy(&mut self) -> DbResult<()> {
        self.ensure_locked();
        file::remove_if_exists(&self.path)?;
        info!(path = %self.path.display(), "logins database deleted");
        Ok(())
    }

    /// All records, ordered by display name then username.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Locked`] if the handle is locked.
    pub fn list(&self) -> DbResult<Vec<CredentialRecord>> {
        let open = self.opened()?;
        let mut records: Vec<CredentialRecord> = open.records.values().cloned().collect();
        records.sort_by(|a, b| {
            a.display_name()
                .cmp(b.display_name())
                .then_with(|| a.username.cmp(&b.username))
        });
        Ok(records)
    }

    /// Looks up one record. Absence is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Locked`] if the handle is locked.
    pub fn get(&self, id: &str) -> DbResult<Option<CredentialRecord>> {
        Ok(self.opened()?.records.get(id).cloned())
    }

    /// Records a use of the login. Returns `false` if the id is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Locked`] if the handle is locked, or an error if
    /// the file cannot be rewritten.
    pub fn touch(&mut self, id: &str, now: u64) -> DbResult<bool> {
        if !self.opened()?.records.contains_key(id) {
            return Ok(false);
        }
        self.commit(|records| {
            if let Some(record) = records.get_mut(id) {
                record.touch(now);
            }
        })?;
        Ok(true)
    }

    /// Inserts or replaces a record.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Locked`] if the handle is locked, or an error if
    /// the file cannot be rewritten.
    pub fn update(&mut self, record: CredentialRecord) -> DbResult<()> {
        self.commit(|records| {
            records.insert(record.id.clone(), record);
        })
    }

    /// Removes a record. Returns `false` if the id is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Locked`] if the handle is locked, or an error if
    /// the file cannot be rewritten.
    pub fn delete(&mut self, id: &str) -> DbResult<bool> {
        if !self.opened()?.records.contains_key(id) {
            return Ok(false);
        }
        self.commit(|records| {
            records.remove(id);
        })?;
        Ok(true)
    }

    /// Applies a change set received from the sync server.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Locked`] if the handle is locked, or an error if
    /// the file cannot be rewritten.
    pub fn apply_remote(
        &mut self,
        upserted: Vec<CredentialRecord>,
        deleted: &[String],
    ) -> DbResult<()> {
        if upserted.is_empty() && deleted.is_empty() {
            return self.opened().map(|_| ());
        }
        self.commit(|records| {
            for id in deleted {
                records.remove(id);
            }
            for record in upserted {
                records.insert(record.id.clone(), record);
            }
        })
    }

    fn opened(&self) -> DbResult<&OpenDb> {
        self.open.as_ref().ok_or(DbError::Locked)
    }

    // Writes the mutated copy first so a failed write leaves memory intact.
    fn commit<T>(&mut self, mutate: impl FnOnce(&mut Records) -> T) -> DbResult<T> {
        let open = self.open.as_mut().ok_or(DbError::Locked)?;
        let mut next = open.records.clone();
        let out = mutate(&mut next);
        write_current(&self.path, &open.page_key, &open.salt, &next)?;
        open.records = next;
        Ok(out)
    }
}

pub(crate) fn index(records: Vec<CredentialRecord>) -> Records {
    records
        .into_iter()
        .map(|record| (record.id.clone(), record))
        .collect()
}

pub(crate) fn encode_body(records: &Records) -> DbResult<Zeroizing<Vec<u8>>> {
    let list: Vec<&CredentialRecord> = records.values().collect();
    let mut bytes = Zeroizing::new(Vec::new());
    ciborium::ser::into_writer(&list, &mut *bytes)
        .map_err(|err| DbError::Serialization(err.to_string()))?;
    Ok(bytes)
}

pub(crate) fn decode_body(bytes: &[u8]) -> DbResult<Vec<CredentialRecord>> {
    ciborium::de::from_reader(bytes).map_err(|err| DbError::Serialization(err.to_string()))
}

pub(crate) fn write_current(
    path: &Path,
    page_key: &PageKey,
    salt: &Salt,
    records: &Records,
) -> DbResult<()> {
    let mut bytes = FileHeader::new(salt.clone()).encode();
    let body = encode_body(records)?;
    let sealed = seal_with_page_key(page_key, &bytes, &body)?;
    bytes.extend_from_slice(&sealed);
    file::write_atomic(path, &bytes)
}

fn read_current(bytes: &[u8], page_key: &PageKey, salt: &Salt) -> DbResult<Records> {
    let (header, header_len) = FileHeader::decode(bytes)?;
    if header.salt != *salt {
        return Err(DbError::SaltMismatch);
    }
    let (aad, sealed) = bytes.split_at(header_len);
    let body = Zeroizing::new(open_with_page_key(page_key, aad, sealed)?);
    Ok(index(decode_body(&body)?))
}
