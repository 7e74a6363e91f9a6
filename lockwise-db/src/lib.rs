//! Encrypted on-device logins database.
//!
//! A database is a single file holding every saved login, sealed with
//! XChaCha20-Poly1305 under a page key derived from the account's database
//! key and a per-file salt. The salt travels in the plaintext file header so
//! the file can be opened without a second secret; files written by older
//! releases kept the salt encrypted under the raw key and are migrated by
//! [`migrate_to_plaintext_header`].
//!
//! The database is synchronous and owns no threads. Callers serialize access.

mod crypto;
mod db;
mod error;
mod file;
mod format;
mod header;
mod migrate;
mod record;

pub use crypto::{DatabaseKey, Salt};
pub use db::LoginsDb;
pub use error::{DbError, DbResult};
pub use format::FORMAT_VERSION;
pub use migrate::migrate_to_plaintext_header;
#[cfg(any(test, feature = "test-utils"))]
pub use migrate::{header_salt, write_legacy};
pub use record::CredentialRecord;
