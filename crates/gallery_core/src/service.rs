//! crates/gallery_core/src/service.rs
//!
//! The coordinating service object. It owns the process-scoped maps (login
//! attempts, live connections, group caches) and is the only thing request
//! handlers talk to.

use bytes::Bytes;
use chrono::Duration;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::{ChatRef, GroupEntry, GroupPage, PhotoPage, PhotoSize, UserId};
use crate::error::{GalleryError, GalleryResult};
use crate::group_cache::GroupCache;
use crate::login::{LoginManager, VerifyOutcome};
use crate::photos;
use crate::ports::{CredentialStore, TelegramClient, TelegramConnector};
use crate::registry::ConnectionRegistry;

pub struct GalleryService {
    store: Arc<dyn CredentialStore>,
    logins: LoginManager,
    registry: ConnectionRegistry,
    groups: GroupCache,
}

impl GalleryService {
    pub fn new(connector: Arc<dyn TelegramConnector>, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            logins: LoginManager::new(connector.clone(), store.clone()),
            registry: ConnectionRegistry::new(connector, store.clone()),
            groups: GroupCache::default(),
            store,
        }
    }

    // --- Login ---

    pub async fn request_code(&self, phone: &str) -> GalleryResult<String> {
        self.logins.request_code(phone).await
    }

    pub async fn verify(
        &self,
        attempt_id: &str,
        code: Option<&str>,
        password: Option<&str>,
    ) -> GalleryResult<VerifyOutcome> {
        self.logins.verify(attempt_id, code, password).await
    }

    pub async fn purge_expired_logins(&self, max_age: Duration) -> usize {
        self.logins.purge_expired(max_age).await
    }

    // --- Session ---

    /// Resolves the live client of an authenticated user.
    pub async fn client(&self, user_id: UserId) -> GalleryResult<Arc<dyn TelegramClient>> {
        self.registry.resolve(user_id).await
    }

    /// Ends the user's session everywhere: remote authorization, live
    /// connection, cached groups, and the durable record.
    pub async fn logout(&self, user_id: UserId) -> GalleryResult<()> {
        match self.registry.resolve(user_id).await {
            Ok(client) => {
                if let Err(e) = client.log_out().await {
                    warn!(%user_id, error = %e, "Remote log out failed");
                }
            }
            Err(GalleryError::ReauthRequired) => {}
            Err(e) => warn!(%user_id, error = %e, "Could not reach session for remote log out"),
        }

        self.registry.evict(user_id).await;
        self.groups.invalidate(user_id).await;
        self.store.delete(user_id).await?;
        info!(%user_id, "Logged out");
        Ok(())
    }

    // --- Photos ---

    pub async fn list_photos(
        &self,
        user_id: UserId,
        chat: &ChatRef,
        offset: usize,
        limit: usize,
    ) -> GalleryResult<PhotoPage> {
        let client = self.client(user_id).await?;
        photos::list_photos(client.as_ref(), chat, offset, limit).await
    }

    pub async fn photo(
        &self,
        user_id: UserId,
        chat: &ChatRef,
        message_id: i32,
        size: PhotoSize,
    ) -> GalleryResult<Bytes> {
        let client = self.client(user_id).await?;
        photos::fetch_photo(client.as_ref(), chat, message_id, size).await
    }

    pub async fn delete_photo(&self, user_id: UserId, chat: &ChatRef, message_id: i32) -> GalleryResult<()> {
        let client = self.client(user_id).await?;
        photos::delete_photo(client.as_ref(), chat, message_id).await
    }

    pub async fn upload_photo(&self, user_id: UserId, chat: &ChatRef, path: &Path) -> GalleryResult<()> {
        let client = self.client(user_id).await?;
        photos::upload_photo(client.as_ref(), chat, path).await
    }

    // --- Groups ---

    pub async fn create_group(&self, user_id: UserId, title: &str) -> GalleryResult<GroupEntry> {
        let title = title.trim();
        if title.is_empty() {
            return Err(GalleryError::Validation("Group title is required.".to_string()));
        }
        let client = self.client(user_id).await?;
        let group = client.create_channel(title, self.groups.marker(), true).await?;
        self.groups.prepend(user_id, group.clone()).await;
        info!(%user_id, group_id = group.id, "Group created");
        Ok(group)
    }

    pub async fn my_groups(&self, user_id: UserId, offset: usize, limit: usize) -> GalleryResult<GroupPage> {
        let client = self.client(user_id).await?;
        self.groups.get_page(user_id, client.as_ref(), offset, limit).await
    }

    /// Builds the user's group cache ahead of the first page read.
    ///
    /// Only a failure to reach the user's session is returned. A failed scan
    /// is logged and left for the next read to retry.
    pub async fn warm_groups(&self, user_id: UserId) -> GalleryResult<()> {
        let client = self.client(user_id).await?;
        if let Err(e) = self.groups.warm(user_id, client.as_ref()).await {
            warn!(%user_id, error = %e, "Group cache warm-up failed");
        }
        Ok(())
    }

    pub async fn delete_group(&self, user_id: UserId, group_id: i64) -> GalleryResult<()> {
        let client = self.client(user_id).await?;
        client.delete_channel(group_id).await?;
        self.groups.remove(user_id, group_id).await;
        info!(%user_id, group_id, "Group deleted");
        Ok(())
    }

    /// Disconnects everything still open; called once on server shutdown.
    pub async fn shutdown(&self) {
        self.logins.close_all().await;
        self.registry.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DialogKind;
    use crate::group_cache::APP_GROUP_MARKER;
    use crate::memory::InMemoryCredentialStore;
    use crate::ports::PortError;
    use crate::testing::FakeConnector;

    struct Harness {
        service: GalleryService,
        connector: Arc<FakeConnector>,
        store: Arc<InMemoryCredentialStore>,
    }

    async fn logged_in_harness() -> (Harness, UserId) {
        let connector = Arc::new(FakeConnector::new());
        let store = Arc::new(InMemoryCredentialStore::new());
        connector.network.add_account("+15550100", 100, "24680", None);
        for i in 0..3 {
            connector
                .network
                .add_dialog(i, &format!("Album {}", i), DialogKind::Supergroup, Some(APP_GROUP_MARKER));
        }
        let service = GalleryService::new(connector.clone(), store.clone());

        let id = service.request_code("+15550100").await.unwrap();
        let outcome = service.verify(&id, Some("24680"), None).await.unwrap();
        assert_eq!(outcome, VerifyOutcome::Authorized(UserId(100)));

        (
            Harness {
                service,
                connector,
                store,
            },
            UserId(100),
        )
    }

    #[tokio::test]
    async fn login_then_resolve_uses_persisted_session() {
        let (h, user) = logged_in_harness().await;
        let client = h.service.client(user).await.unwrap();
        assert!(client.is_authorized().await.unwrap());
    }

    #[tokio::test]
    async fn logout_clears_record_connection_and_cache() {
        let (h, user) = logged_in_harness().await;
        let client = h.service.client(user).await.unwrap();
        h.service.my_groups(user, 0, 10).await.unwrap();

        h.service.logout(user).await.unwrap();

        assert!(!h.store.contains(user).await);
        assert!(!client.is_connected());
        assert!(!h.service.groups.is_populated(user).await);
        assert!(!h.connector.network.is_authorized(user));

        assert_eq!(
            h.service.my_groups(user, 0, 10).await.unwrap_err(),
            GalleryError::ReauthRequired
        );
    }

    #[tokio::test]
    async fn create_group_prepends_without_rescan() {
        let (h, user) = logged_in_harness().await;
        h.service.my_groups(user, 0, 10).await.unwrap();

        let created = h.service.create_group(user, "  Summer  ").await.unwrap();
        let page = h.service.my_groups(user, 0, 10).await.unwrap();

        assert_eq!(created.title, "Summer");
        assert_eq!(page.groups[0], created);
        assert_eq!(page.groups.len(), 4);
        assert_eq!(h.connector.network.scans(), 1);
    }

    #[tokio::test]
    async fn blank_group_title_is_rejected() {
        let (h, user) = logged_in_harness().await;
        assert!(matches!(
            h.service.create_group(user, " ").await,
            Err(GalleryError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn delete_group_updates_cache() {
        let (h, user) = logged_in_harness().await;
        h.service.warm_groups(user).await.unwrap();

        h.service.delete_group(user, 1).await.unwrap();
        let page = h.service.my_groups(user, 0, 10).await.unwrap();

        let ids: Vec<i64> = page.groups.iter().map(|g| g.id).collect();
        assert_eq!(ids, vec![0, 2]);
        assert!(!h.connector.network.has_dialog(1));
    }

    #[tokio::test]
    async fn failed_remote_delete_keeps_cache() {
        let (h, user) = logged_in_harness().await;
        h.service.warm_groups(user).await.unwrap();

        let err = h.service.delete_group(user, 404).await.unwrap_err();

        assert!(matches!(err, GalleryError::Port(PortError::NotFound(_))));
        assert_eq!(h.service.my_groups(user, 0, 10).await.unwrap().groups.len(), 3);
    }

    #[tokio::test]
    async fn warm_groups_swallows_scan_failure_only() {
        let (h, user) = logged_in_harness().await;

        h.connector.network.set_fail_scan(true);
        h.service.warm_groups(user).await.unwrap();
        assert!(!h.service.groups.is_populated(user).await);

        h.connector.network.set_fail_scan(false);
        h.service.logout(user).await.unwrap();
        assert!(matches!(
            h.service.warm_groups(user).await,
            Err(GalleryError::ReauthRequired)
        ));
    }

    #[tokio::test]
    async fn upload_forwards_file_with_caption() {
        let (h, user) = logged_in_harness().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat.jpg");
        tokio::fs::write(&path, b"jpeg bytes").await.unwrap();

        let chat = ChatRef::Username("me".to_string());
        h.service.upload_photo(user, &chat, &path).await.unwrap();

        let sent = h.connector.network.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, chat);
        assert_eq!(sent[0].1, photos::UPLOAD_CAPTION);
        assert_eq!(sent[0].2, b"jpeg bytes".to_vec());
    }

    #[tokio::test]
    async fn shutdown_disconnects_live_clients() {
        let (h, user) = logged_in_harness().await;
        let client = h.service.client(user).await.unwrap();
        h.service.shutdown().await;
        assert!(!client.is_connected());
    }
}
