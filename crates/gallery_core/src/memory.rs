//! crates/gallery_core/src/memory.rs
//!
//! In-memory implementations of the storage ports.
//!
//! [`MemorySession`] backs the transient protocol client of a login attempt: it
//! is discarded together with the attempt. [`InMemoryCredentialStore`] is a
//! process-local credential store for development and tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::domain::{SessionRecord, UserId};
use crate::ports::{CredentialStore, PortResult, SessionStorage};

//=========================================================================================
// MemorySession
//=========================================================================================

/// Session capability that never leaves process memory.
#[derive(Debug, Default)]
pub struct MemorySession {
    record: Mutex<SessionRecord>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self) -> MutexGuard<'_, SessionRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SessionStorage for MemorySession {
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
        let mut record = self.current();
        record.dc_id = dc_id;
        record.server_address = Some(server_address.to_string());
        record.port = Some(port);
    }

    async fn set_auth_key(&self, auth_key: Option<Vec<u8>>) {
        self.current().auth_key = auth_key;
    }

    fn record(&self) -> SessionRecord {
        self.current().clone()
    }
}

//=========================================================================================
// InMemoryCredentialStore
//=========================================================================================

#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    records: tokio::sync::Mutex<HashMap<UserId, SessionRecord>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, user_id: UserId) -> bool {
        self.records.lock().await.contains_key(&user_id)
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn load(&self, user_id: UserId) -> PortResult<SessionRecord> {
        Ok(self
            .records
            .lock()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, user_id: UserId, record: &SessionRecord) -> PortResult<()> {
        self.records.lock().await.insert(user_id, record.clone());
        Ok(())
    }

    async fn delete(&self, user_id: UserId) -> PortResult<()> {
        self.records.lock().await.remove(&user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_record_loads_empty() {
        let store = InMemoryCredentialStore::new();
        let record = store.load(UserId(1)).await.unwrap();
        assert_eq!(record, SessionRecord::default());
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let store = InMemoryCredentialStore::new();
        let record = SessionRecord {
            dc_id: 4,
            ..SessionRecord::default()
        };
        store.save(UserId(1), &record).await.unwrap();
        assert!(store.contains(UserId(1)).await);

        store.delete(UserId(1)).await.unwrap();
        assert!(!store.contains(UserId(1)).await);
    }

    #[tokio::test]
    async fn memory_session_tracks_setters() {
        let session = MemorySession::new();
        session.set_dc(2, "149.154.167.51", 443).await;
        session.set_auth_key(Some(vec![9; 256])).await;

        let record = session.record();
        assert_eq!(record.dc_id, 2);
        assert_eq!(record.server_address.as_deref(), Some("149.154.167.51"));
        assert_eq!(record.port, Some(443));
        assert_eq!(record.auth_key, Some(vec![9; 256]));
    }
}
