//! Header salt access and migration away from the sealed-salt layout.

use std::path::Path;

use tracing::info;
use zeroize::Zeroizing;

use crate::crypto::{open, open_with_page_key, DatabaseKey, PageKey, Salt};
use crate::db::{decode_body, index, write_current};
use crate::error::{DbError, DbResult};
use crate::file;
use crate::format::{FORMAT_VERSION, LEGACY_SALT_AD};
use crate::header::{read_version, FileHeader, LegacyHeader};
use crate::record::CredentialRecord;

/// Reads the plaintext salt from a current-format database header.
///
/// Returns `Ok(None)` when the file does not exist.
///
/// # Errors
///
/// Returns [`DbError::UnsupportedVersion`] for a legacy file (its salt needs
/// the key, see [`migrate_to_plaintext_header`]) or an error if the header is
/// malformed.
#[cfg(any(test, feature = "test-utils"))]
pub fn header_salt(path: &Path) -> DbResult<Option<Salt>> {
    let Some(bytes) = file::read_if_exists(path)? else {
        return Ok(None);
    };
    let (header, _) = FileHeader::decode(&bytes)?;
    Ok(Some(header.salt))
}

/// Returns the salt of the database at `path`, rewriting a legacy file so
/// its salt sits in the plaintext header. Current-format files are returned
/// untouched.
///
/// # Errors
///
/// Returns an error if the file is missing, malformed, does not open with
/// `key`, or cannot be rewritten. The file is left as it was on error.
pub fn migrate_to_plaintext_header(path: &Path, key: &DatabaseKey) -> DbResult<Salt> {
    let bytes = file::read_if_exists(path)?.ok_or_else(|| {
        DbError::io(
            format!("read {}", path.display()),
            std::io::Error::from(std::io::ErrorKind::NotFound),
        )
    })?;
    if read_version(&bytes)? == FORMAT_VERSION {
        let (header, _) = FileHeader::decode(&bytes)?;
        return Ok(header.salt);
    }

    let (salt, records) = open_legacy(&bytes, key)?;
    let page_key = PageKey::derive(key, &salt)?;
    write_current(path, &page_key, &salt, &index(records))?;
    info!("migrated logins database to plaintext salt header");
    Ok(salt)
}

/// Writes a database in the legacy sealed-salt layout.
///
/// Only older releases produce this layout; it exists so the migration path
/// can be exercised against real files.
///
/// # Errors
///
/// Returns an error if sealing or writing fails.
#[cfg(any(test, feature = "test-utils"))]
pub fn write_legacy(
    path: &Path,
    key: &DatabaseKey,
    salt: &Salt,
    records: &[CredentialRecord],
) -> DbResult<()> {
    use crate::crypto::{seal, seal_with_page_key};

    let header = LegacyHeader {
        sealed_salt: seal(key.as_bytes(), LEGACY_SALT_AD, salt.as_bytes())?,
    };
    let mut bytes = header.encode()?;
    let page_key = PageKey::derive(key, salt)?;
    let body = crate::db::encode_body(&index(records.to_vec()))?;
    let sealed = seal_with_page_key(&page_key, &LegacyHeader::body_aad(), &body)?;
    bytes.extend_from_slice(&sealed);
    file::write_atomic(path, &bytes)
}

/// Opens a legacy file: unseals the salt with the raw key, then the body
/// with the derived page key.
pub(crate) fn open_legacy(
    bytes: &[u8],
    key: &DatabaseKey,
) -> DbResult<(Salt, Vec<CredentialRecord>)> {
    let (header, header_len) = LegacyHeader::decode(bytes)?;
    let salt_bytes = Zeroizing::new(open(key.as_bytes(), LEGACY_SALT_AD, &header.sealed_salt)?);
    let salt = Salt::from_bytes(&salt_bytes)
        .map_err(|err| DbError::Serialization(format!("legacy salt: {err}")))?;
    let page_key = PageKey::derive(key, &salt)?;
    let body = Zeroizing::new(open_with_page_key(
        &page_key,
        &LegacyHeader::body_aad(),
        &bytes[header_len..],
    )?);
    Ok((salt, decode_body(&body)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LoginsDb;

    #[test]
    fn test_migrates_legacy_file_and_keeps_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logins.db");
        let key = DatabaseKey::generate();
        let salt = Salt::generate();
        let record = CredentialRecord::new("https://example.com", None, "pw", 1);
        write_legacy(&path, &key, &salt, std::slice::from_ref(&record)).expect("legacy");

        assert!(matches!(
            header_salt(&path),
            Err(DbError::UnsupportedVersion(1))
        ));

        let migrated = migrate_to_plaintext_header(&path, &key).expect("migrate");
        assert_eq!(migrated, salt);
        assert_eq!(header_salt(&path).expect("salt"), Some(salt.clone()));

        let mut db = LoginsDb::new(&path);
        db.ensure_unlocked(&key, &salt).expect("unlock");
        assert_eq!(db.list().expect("list"), vec![record]);
    }

    #[test]
    fn test_current_file_is_left_alone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logins.db");
        let key = DatabaseKey::generate();
        let salt = Salt::generate();
        LoginsDb::new(&path)
            .ensure_unlocked(&key, &salt)
            .expect("create");
        let before = std::fs::read(&path).expect("read");

        assert_eq!(migrate_to_plaintext_header(&path, &key).expect("salt"), salt);
        assert_eq!(std::fs::read(&path).expect("read"), before);
    }

    #[test]
    fn test_migration_with_wrong_key_fails_and_keeps_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logins.db");
        let key = DatabaseKey::generate();
        write_legacy(&path, &key, &Salt::generate(), &[]).expect("legacy");
        let before = std::fs::read(&path).expect("read");

        match migrate_to_plaintext_header(&path, &DatabaseKey::generate()) {
            Err(DbError::Decryption(_)) => {}
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected error"),
        }
        assert_eq!(std::fs::read(&path).expect("read"), before);
    }

    #[test]
    fn test_legacy_file_opens_directly_and_is_upgraded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logins.db");
        let key = DatabaseKey::generate();
        let salt = Salt::generate();
        write_legacy(&path, &key, &salt, &[]).expect("legacy");

        let mut db = LoginsDb::new(&path);
        db.ensure_unlocked(&key, &salt).expect("unlock");
        assert_eq!(header_salt(&path).expect("salt"), Some(salt));
    }

    #[test]
    fn test_header_salt_of_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(header_salt(&dir.path().join("none.db")).expect("read").is_none());
    }
}
