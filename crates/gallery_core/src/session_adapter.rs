//! crates/gallery_core/src/session_adapter.rs
//!
//! The protocol client's session capability, backed by the durable
//! [`CredentialStore`].
//!
//! Every setter is a read-modify-write of the whole record followed by exactly
//! one store write: the store's unit of consistency is the record, not the
//! field. Store failures are logged and swallowed here so a storage hiccup does
//! not abort a handshake that is already on the wire. A crash between key
//! negotiation and a successful write loses the key and forces a fresh login.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, warn};

use crate::domain::{SessionRecord, UserId};
use crate::ports::{CredentialStore, PortResult, SessionStorage};

pub struct SessionAdapter {
    store: Arc<dyn CredentialStore>,
    user_id: UserId,
    record: Mutex<SessionRecord>,
}

impl SessionAdapter {
    /// Loads the user's record once so the synchronous getters can serve it.
    pub async fn load(store: Arc<dyn CredentialStore>, user_id: UserId) -> PortResult<Self> {
        let record = store.load(user_id).await?;
        debug!(%user_id, has_key = record.has_auth_key(), "Loaded session record");
        Ok(Self {
            store,
            user_id,
            record: Mutex::new(record),
        })
    }

    fn current(&self) -> MutexGuard<'_, SessionRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `change` to the freshest copy of the record and writes it back whole.
    async fn update<F>(&self, change: F)
    where
        F: FnOnce(&mut SessionRecord) + Send,
    {
        let mut record = match self.store.load(self.user_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(user_id = %self.user_id, error = %e, "Session record read failed, using in-memory copy");
                self.current().clone()
            }
        };
        change(&mut record);
        *self.current() = record.clone();

        if let Err(e) = self.store.save(self.user_id, &record).await {
            error!(user_id = %self.user_id, error = %e, "Failed to persist session record");
        }
    }
}

#[async_trait]
impl SessionStorage for SessionAdapter {
    fn dc_id(&self) -> i32 {
        self.current().dc_id
    }

    fn server_address(&self) -> Option<String> {
        self.current().server_address.clone()
    }

    fn port(&self) -> Option<u16> {
        self.current().port
    }

    fn auth_key(&self) -> Option<Vec<u8>> {
        self.current().auth_key.clone()
    }

    async fn set_dc(&self, dc_id: i32, server_address: &str, port: u16) {
        let server_address = server_address.to_string();
        self.update(move |record| {
            record.dc_id = dc_id;
            record.server_address = Some(server_address);
            record.port = Some(port);
        })
        .await
    }

    async fn set_auth_key(&self, auth_key: Option<Vec<u8>>) {
        self.update(move |record| record.auth_key = auth_key).await
    }

    fn record(&self) -> SessionRecord {
        self.current().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCredentialStore;
    use crate::testing::FlakyStore;

    fn sample_record() -> SessionRecord {
        SessionRecord {
            dc_id: 4,
            server_address: Some("149.154.167.91".to_string()),
            port: Some(443),
            auth_key: Some((0..=255).collect()),
        }
    }

    #[tokio::test]
    async fn saved_record_reloads_bit_identical() {
        let store: Arc<dyn CredentialStore> = Arc::new(InMemoryCredentialStore::new());
        store.save(UserId(7), &sample_record()).await.unwrap();

        let adapter = SessionAdapter::load(store, UserId(7)).await.unwrap();
        assert_eq!(adapter.dc_id(), 4);
        assert_eq!(adapter.server_address().as_deref(), Some("149.154.167.91"));
        assert_eq!(adapter.port(), Some(443));
        assert_eq!(adapter.auth_key(), sample_record().auth_key);
        assert_eq!(adapter.record(), sample_record());
    }

    #[tokio::test]
    async fn missing_record_is_empty_not_an_error() {
        let store: Arc<dyn CredentialStore> = Arc::new(InMemoryCredentialStore::new());
        let adapter = SessionAdapter::load(store, UserId(8)).await.unwrap();
        assert_eq!(adapter.record(), SessionRecord::default());
    }

    #[tokio::test]
    async fn each_setter_writes_the_whole_record_once() {
        let store = Arc::new(FlakyStore::default());
        let adapter = SessionAdapter::load(store.clone(), UserId(9)).await.unwrap();

        adapter.set_dc(2, "149.154.167.51", 443).await;
        assert_eq!(store.writes(), 1);
        adapter.set_auth_key(Some(vec![1, 2, 3])).await;
        assert_eq!(store.writes(), 2);

        let persisted = store.load(UserId(9)).await.unwrap();
        assert_eq!(persisted.dc_id, 2);
        assert_eq!(persisted.port, Some(443));
        assert_eq!(persisted.auth_key, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn setter_keeps_fields_written_by_another_adapter() {
        let store = Arc::new(FlakyStore::default());
        let first = SessionAdapter::load(store.clone(), UserId(3)).await.unwrap();
        let second = SessionAdapter::load(store.clone(), UserId(3)).await.unwrap();

        first.set_auth_key(Some(vec![5; 4])).await;
        second.set_dc(5, "91.108.56.130", 443).await;

        let persisted = store.load(UserId(3)).await.unwrap();
        assert_eq!(persisted.auth_key, Some(vec![5; 4]));
        assert_eq!(persisted.dc_id, 5);
    }

    #[tokio::test]
    async fn store_failure_is_swallowed() {
        let store = Arc::new(FlakyStore::default());
        let adapter = SessionAdapter::load(store.clone(), UserId(4)).await.unwrap();
        store.set_failing(true);

        adapter.set_auth_key(Some(vec![8; 8])).await;

        assert_eq!(adapter.auth_key(), Some(vec![8; 8]));
        store.set_failing(false);
        assert_eq!(store.load(UserId(4)).await.unwrap().auth_key, None);
    }
}
