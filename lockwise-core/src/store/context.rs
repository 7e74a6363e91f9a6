use std::sync::Arc;

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::platform::fs::SystemClock;
use crate::platform::{AccountLink, AtomicBlobStore, BootSession, Clock, NetworkMonitor, SecretVault};
use crate::sync::RemoteSyncService;

/// Everything the credential store needs from its host.
pub struct StoreContext {
    pub(crate) config: StoreConfig,
    pub(crate) vault: Arc<dyn SecretVault>,
    pub(crate) prefs: Arc<dyn AtomicBlobStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) boot_session: Arc<dyn BootSession>,
    pub(crate) network: Arc<dyn NetworkMonitor>,
    pub(crate) account: Arc<dyn AccountLink>,
    pub(crate) sync_service: Arc<dyn RemoteSyncService>,
}

impl std::fmt::Debug for StoreContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl StoreContext {
    /// Starts building a context around `config`.
    #[must_use]
    pub const fn builder(config: StoreConfig) -> StoreContextBuilder {
        StoreContextBuilder {
            config,
            vault: None,
            prefs: None,
            clock: None,
            boot_session: None,
            network: None,
            account: None,
            sync_service: None,
        }
    }

    /// The configuration the store runs with.
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }
}

/// Builder for [`StoreContext`]. Every collaborator except the clock is
/// required; the clock defaults to [`SystemClock`].
pub struct StoreContextBuilder {
    config: StoreConfig,
    vault: Option<Arc<dyn SecretVault>>,
    prefs: Option<Arc<dyn AtomicBlobStore>>,
    clock: Option<Arc<dyn Clock>>,
    boot_session: Option<Arc<dyn BootSession>>,
    network: Option<Arc<dyn NetworkMonitor>>,
    account: Option<Arc<dyn AccountLink>>,
    sync_service: Option<Arc<dyn RemoteSyncService>>,
}

impl StoreContextBuilder {
    /// Sets the secret vault holding the key and salt.
    #[must_use]
    pub fn secret_vault(mut self, vault: Arc<dyn SecretVault>) -> Self {
        self.vault = Some(vault);
        self
    }

    /// Sets the blob store for the autolock deadline, setting and boot id.
    #[must_use]
    pub fn blob_store(mut self, prefs: Arc<dyn AtomicBlobStore>) -> Self {
        self.prefs = Some(prefs);
        self
    }

    /// Overrides the wall clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the boot session used for reboot detection.
    #[must_use]
    pub fn boot_session(mut self, boot_session: Arc<dyn BootSession>) -> Self {
        self.boot_session = Some(boot_session);
        self
    }

    /// Sets the network monitor.
    #[must_use]
    pub fn network(mut self, network: Arc<dyn NetworkMonitor>) -> Self {
        self.network = Some(network);
        self
    }

    /// Sets the account collaborator notified when sync credentials fail.
    #[must_use]
    pub fn account_link(mut self, account: Arc<dyn AccountLink>) -> Self {
        self.account = Some(account);
        self
    }

    /// Sets the remote sync service.
    #[must_use]
    pub fn sync_service(mut self, sync_service: Arc<dyn RemoteSyncService>) -> Self {
        self.sync_service = Some(sync_service);
        self
    }

    /// Validates the configuration and checks every collaborator is set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingDependency`] naming the first missing
    /// collaborator, or [`StoreError::Config`] for invalid configuration.
    pub fn build(self) -> StoreResult<StoreContext> {
        self.config.validate()?;
        Ok(StoreContext {
            vault: self
                .vault
                .ok_or(StoreError::MissingDependency("secret_vault"))?,
            prefs: self
                .prefs
                .ok_or(StoreError::MissingDependency("blob_store"))?,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            boot_session: self
                .boot_session
                .ok_or(StoreError::MissingDependency("boot_session"))?,
            network: self
                .network
                .ok_or(StoreError::MissingDependency("network"))?,
            account: self
                .account
                .ok_or(StoreError::MissingDependency("account_link"))?,
            sync_service: self
                .sync_service
                .ok_or(StoreError::MissingDependency("sync_service"))?,
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::memory::{
        FixedBootSession, MemoryBlobStore, MemorySecretVault, RecordingAccountLink, StaticNetwork,
    };
    use crate::sync::scripted::ScriptedSyncService;

    fn complete() -> StoreContextBuilder {
        StoreContext::builder(StoreConfig::new("/tmp/logins.db"))
            .secret_vault(Arc::new(MemorySecretVault::new()))
            .blob_store(Arc::new(MemoryBlobStore::new()))
            .boot_session(Arc::new(FixedBootSession::new("boot")))
            .network(Arc::new(StaticNetwork::new(true)))
            .account_link(Arc::new(RecordingAccountLink::new()))
            .sync_service(Arc::new(ScriptedSyncService::new()))
    }

    #[test]
    fn test_complete_builder_builds() {
        let context = complete().build().expect("context");
        assert_eq!(context.config().sync_timeout_ms, 20_000);
    }

    #[test]
    fn test_missing_collaborator_is_named() {
        let mut builder = complete();
        builder.sync_service = None;
        assert!(matches!(
            builder.build(),
            Err(StoreError::MissingDependency("sync_service"))
        ));

        let mut builder = complete();
        builder.vault = None;
        assert!(matches!(
            builder.build(),
            Err(StoreError::MissingDependency("secret_vault"))
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = StoreConfig::new("/tmp/logins.db");
        config.sync_timeout_ms = 0;
        let builder = StoreContextBuilder {
            config,
            ..complete()
        };
        assert!(matches!(builder.build(), Err(StoreError::Config(_))));
    }
}
