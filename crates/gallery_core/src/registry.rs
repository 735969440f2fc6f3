//! crates/gallery_core/src/registry.rs
//!
//! Live protocol-client connections keyed by user.
//!
//! An entry is only a performance cache over the [`CredentialStore`]: it is
//! rebuilt from the stored session whenever it is missing or no longer
//! `connected && authorized`. Each user's slot is locked across the check and
//! the rebuild, so two requests never build two connections for one user.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::UserId;
use crate::error::{GalleryError, GalleryResult};
use crate::ports::{CredentialStore, TelegramClient, TelegramConnector};
use crate::session_adapter::SessionAdapter;
use crate::slots::KeyedSlots;

type ClientSlot = Option<Arc<dyn TelegramClient>>;

pub struct ConnectionRegistry {
    connector: Arc<dyn TelegramConnector>,
    store: Arc<dyn CredentialStore>,
    entries: KeyedSlots<UserId, ClientSlot>,
}

impl ConnectionRegistry {
    pub fn new(connector: Arc<dyn TelegramConnector>, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            connector,
            store,
            entries: KeyedSlots::new(),
        }
    }

    /// Returns a connected, authorized client for an already authenticated user.
    ///
    /// Fails with [`GalleryError::ReauthRequired`] when the stored session no
    /// longer authorizes. That is never retried here.
    pub async fn resolve(&self, user_id: UserId) -> GalleryResult<Arc<dyn TelegramClient>> {
        let slot = self.entries.slot(&user_id).await;
        let mut entry = slot.lock().await;

        if let Some(client) = entry.as_ref() {
            if client.is_connected() && client.is_authorized().await.unwrap_or(false) {
                return Ok(client.clone());
            }
        }
        if let Some(stale) = entry.take() {
            debug!(%user_id, "Dropping stale connection");
            stale.disconnect().await;
        }

        let session = Arc::new(SessionAdapter::load(self.store.clone(), user_id).await?);
        let client = self.connector.connect(session).await?;

        match client.is_authorized().await {
            Ok(true) => {}
            Ok(false) => {
                client.disconnect().await;
                info!(%user_id, "Stored session is no longer authorized");
                return Err(GalleryError::ReauthRequired);
            }
            Err(e) => {
                client.disconnect().await;
                return Err(e.into());
            }
        }

        info!(%user_id, "Connection established");
        *entry = Some(client.clone());
        Ok(client)
    }

    /// Returns the live client without building one.
    pub async fn get(&self, user_id: UserId) -> Option<Arc<dyn TelegramClient>> {
        let slot = self.entries.get(&user_id).await?;
        let entry = slot.lock().await;
        entry.clone()
    }

    /// Disconnects and clears the user's entry, if any.
    ///
    /// The slot itself stays in place so a concurrent `resolve` waiting on it
    /// either sees the cleared entry or finishes before it is cleared.
    pub async fn evict(&self, user_id: UserId) {
        let Some(slot) = self.entries.get(&user_id).await else {
            return;
        };
        let client = slot.lock().await.take();
        if let Some(client) = client {
            client.disconnect().await;
            info!(%user_id, "Connection evicted");
        }
    }

    /// Disconnects every live client.
    pub async fn shutdown(&self) {
        let users = self.entries.keys().await;
        if !users.is_empty() {
            warn!(count = users.len(), "Disconnecting live clients");
        }
        for user_id in users {
            self.evict(user_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SessionRecord;
    use crate::memory::{InMemoryCredentialStore, MemorySession};
    use crate::ports::SessionStorage;
    use crate::testing::FakeConnector;

    /// Logs `user` in through the fake network and stores the resulting session.
    async fn logged_in(connector: &FakeConnector, store: &InMemoryCredentialStore, user: i64) {
        let phone = format!("+1555{}", user);
        connector.network.add_account(&phone, user, "11111", None);
        let session = Arc::new(MemorySession::new());
        let client = connector.connect(session.clone()).await.unwrap();
        let sent = client.send_code(&phone).await.unwrap();
        client.sign_in(&phone, "11111", &sent.phone_code_hash).await.unwrap();
        client.disconnect().await;
        store.save(UserId(user), &session.record()).await.unwrap();
    }

    fn setup() -> (ConnectionRegistry, Arc<FakeConnector>, Arc<InMemoryCredentialStore>) {
        let connector = Arc::new(FakeConnector::new());
        let store = Arc::new(InMemoryCredentialStore::new());
        (
            ConnectionRegistry::new(connector.clone(), store.clone()),
            connector,
            store,
        )
    }

    #[tokio::test]
    async fn live_entry_is_reused() {
        let (registry, connector, store) = setup();
        logged_in(&connector, &store, 5).await;
        let connects = connector.network.connects();

        let first = registry.resolve(UserId(5)).await.unwrap();
        let second = registry.resolve(UserId(5)).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connector.network.connects(), connects + 1);
    }

    #[tokio::test]
    async fn stale_entry_is_rebuilt() {
        let (registry, connector, store) = setup();
        logged_in(&connector, &store, 6).await;

        let first = registry.resolve(UserId(6)).await.unwrap();
        first.disconnect().await;
        let second = registry.resolve(UserId(6)).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.is_connected());
    }

    #[tokio::test]
    async fn unauthorized_session_requires_reauth() {
        let (registry, connector, store) = setup();
        store
            .save(
                UserId(7),
                &SessionRecord {
                    dc_id: 2,
                    auth_key: Some(vec![0xde, 0xad]),
                    ..SessionRecord::default()
                },
            )
            .await
            .unwrap();

        let result = registry.resolve(UserId(7)).await;

        assert!(matches!(result, Err(GalleryError::ReauthRequired)));
        assert!(registry.get(UserId(7)).await.is_none());
        assert_eq!(connector.network.disconnects(), 1);
    }

    #[tokio::test]
    async fn revoked_remote_session_requires_reauth() {
        let (registry, connector, store) = setup();
        logged_in(&connector, &store, 8).await;
        registry.resolve(UserId(8)).await.unwrap();

        connector.network.revoke(UserId(8));

        assert!(matches!(
            registry.resolve(UserId(8)).await,
            Err(GalleryError::ReauthRequired)
        ));
    }

    #[tokio::test]
    async fn concurrent_resolves_build_one_connection() {
        let (registry, connector, store) = setup();
        logged_in(&connector, &store, 9).await;
        let connects = connector.network.connects();
        let registry = Arc::new(registry);

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.resolve(UserId(9)).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(connector.network.connects(), connects + 1);
    }

    #[tokio::test]
    async fn evict_disconnects_entry() {
        let (registry, connector, store) = setup();
        logged_in(&connector, &store, 10).await;
        let client = registry.resolve(UserId(10)).await.unwrap();

        registry.evict(UserId(10)).await;

        assert!(!client.is_connected());
        assert!(registry.get(UserId(10)).await.is_none());
    }

    #[tokio::test]
    async fn evict_during_connect_keeps_one_connection_per_user() {
        let (registry, connector, store) = setup();
        logged_in(&connector, &store, 11).await;
        connector
            .network
            .set_connect_delay(Some(std::time::Duration::from_millis(20)));
        let registry = Arc::new(registry);

        let first = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.resolve(UserId(11)).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let evict = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.evict(UserId(11)).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = registry.resolve(UserId(11)).await.unwrap();

        let first = first.await.unwrap().unwrap();
        evict.await.unwrap();

        assert_eq!(connector.network.peak_concurrent_connects(), 1);
        assert!(!first.is_connected());
        assert!(second.is_connected());

        registry.shutdown().await;
        assert!(!second.is_connected());
        assert_eq!(connector.network.connects(), connector.network.disconnects());
    }
}
