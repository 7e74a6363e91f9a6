#![deny(clippy::all, clippy::pedantic, clippy::nursery)]
//! Local data layer for the Lockwise password manager.
//!
//! The [`CredentialStore`] keeps the encrypted logins database behind a
//! single serialized queue and moves it between `Unprepared`, `Locked`,
//! `Unlocked` and `Errored`. Around it sit the encryption material manager
//! (database key and salt in the platform vault), the autolock timer and
//! the sync coordinator. Host services are injected through the traits in
//! [`platform`].

mod autolock;
pub use autolock::{AutoLockTimer, Deadline, FireCallback, DEADLINE_BLOB, SETTING_BLOB};

mod config;
pub use config::{AutoLockSetting, StoreConfig, DEFAULT_SYNC_TIMEOUT_MS};

mod error;
pub use error::{ErrorCause, StoreError, StoreResult};

pub mod logger;

mod material;
pub use material::{EncryptionMaterialManager, KEY_ENTRY, SALT_ENTRY};

pub mod platform;

mod store;
pub use store::{
    Completion, CredentialStore, LifecycleEvent, StorageState, StoreContext, StoreContextBuilder,
    StoreEvent, BOOT_SESSION_BLOB,
};

pub mod sync;
pub use sync::{RemoteSyncError, RemoteSyncService, SyncChanges, SyncState, SyncUnlockInfo};

pub use lockwise_db::CredentialRecord;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!("lockwise_core");
