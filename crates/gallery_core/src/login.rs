//! crates/gallery_core/src/login.rs
//!
//! The multi-request login flow: phone -> code -> optional two-factor password
//! -> durable session.
//!
//! Each attempt owns a transient protocol client backed by a [`MemorySession`].
//! Nothing reaches the [`CredentialStore`] until sign-in succeeds and the user's
//! identity is known; at that point the transient session fields are copied
//! into the user's durable record and the attempt is torn down.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::UserId;
use crate::error::{GalleryError, GalleryResult};
use crate::memory::MemorySession;
use crate::ports::{CredentialStore, PortError, SessionStorage, TelegramClient, TelegramConnector};
use crate::slots::KeyedSlots;

/// What a successful `verify` call means for the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Resubmit with the two-factor password; the attempt stays open.
    PasswordNeeded,
    /// The durable session has been written for this user.
    Authorized(UserId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    CodeSent,
    PasswordNeeded,
}

struct LoginAttempt {
    phone: String,
    phone_code_hash: String,
    client: Arc<dyn TelegramClient>,
    session: Arc<MemorySession>,
    stage: Stage,
    created_at: DateTime<Utc>,
}

/// An attempt slot; `None` once the attempt is closed.
type AttemptSlot = Option<LoginAttempt>;

pub struct LoginManager {
    connector: Arc<dyn TelegramConnector>,
    store: Arc<dyn CredentialStore>,
    attempts: KeyedSlots<String, AttemptSlot>,
}

impl LoginManager {
    pub fn new(connector: Arc<dyn TelegramConnector>, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            connector,
            store,
            attempts: KeyedSlots::new(),
        }
    }

    /// Opens a transient client, requests a login code and returns the new
    /// attempt's opaque identifier.
    pub async fn request_code(&self, phone: &str) -> GalleryResult<String> {
        let phone = phone.trim();
        if phone.is_empty() {
            return Err(GalleryError::Validation("Phone number is required.".to_string()));
        }

        let session = Arc::new(MemorySession::new());
        let client = self.connector.connect(session.clone()).await?;

        let sent = match client.send_code(phone).await {
            Ok(sent) => sent,
            Err(e) => {
                client.disconnect().await;
                return Err(e.into());
            }
        };

        let attempt_id = Uuid::new_v4().to_string();
        self.attempts
            .insert(
                attempt_id.clone(),
                Some(LoginAttempt {
                    phone: phone.to_string(),
                    phone_code_hash: sent.phone_code_hash,
                    client,
                    session,
                    stage: Stage::CodeSent,
                    created_at: Utc::now(),
                }),
            )
            .await;
        info!(attempt_id = %attempt_id, "Login code sent");
        Ok(attempt_id)
    }

    /// Advances the attempt with a code and/or password.
    ///
    /// A wrong code or password leaves the attempt open for another try. Any
    /// other failure, and success, closes it: the transient client is
    /// disconnected and the identifier becomes invalid.
    pub async fn verify(
        &self,
        attempt_id: &str,
        code: Option<&str>,
        password: Option<&str>,
    ) -> GalleryResult<VerifyOutcome> {
        let slot = self
            .attempts
            .get(&attempt_id.to_string())
            .await
            .ok_or(GalleryError::InvalidLoginSession)?;
        let mut guard = slot.lock().await;
        let attempt = guard.as_mut().ok_or(GalleryError::InvalidLoginSession)?;

        let result = match advance(attempt, code, password).await {
            Ok(VerifyOutcome::Authorized(user_id)) => self
                .persist(attempt.session.as_ref(), user_id)
                .await
                .map(|_| VerifyOutcome::Authorized(user_id)),
            other => other,
        };

        let keep_open = match &result {
            Ok(VerifyOutcome::PasswordNeeded) => true,
            Ok(VerifyOutcome::Authorized(_)) => false,
            Err(e) => e.is_retryable_login_failure() || matches!(e, GalleryError::Validation(_)),
        };
        if !keep_open {
            if let Some(attempt) = guard.take() {
                attempt.client.disconnect().await;
            }
            self.attempts.remove(&attempt_id.to_string()).await;
            debug!(attempt_id = %attempt_id, "Login attempt closed");
        }

        result
    }

    /// Copies the transient session into the user's durable record.
    async fn persist(&self, session: &dyn SessionStorage, user_id: UserId) -> GalleryResult<()> {
        let record = session.record();
        if !record.has_auth_key() {
            return Err(PortError::Unexpected("sign-in finished without an authorization key".to_string()).into());
        }
        self.store.save(user_id, &record).await?;
        info!(%user_id, dc_id = record.dc_id, "Login completed, session persisted");
        Ok(())
    }

    /// Tears down attempts older than `max_age`. Returns how many were closed.
    pub async fn purge_expired(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let purged = self
            .close_matching(|attempt| attempt.created_at < cutoff)
            .await;
        if purged > 0 {
            warn!(purged, "Closed abandoned login attempts");
        }
        purged
    }

    /// Tears down every open attempt.
    pub async fn close_all(&self) -> usize {
        self.close_matching(|_| true).await
    }

    async fn close_matching<F>(&self, matches: F) -> usize
    where
        F: Fn(&LoginAttempt) -> bool + Send,
    {
        let mut closed = 0;
        for attempt_id in self.attempts.keys().await {
            let Some(slot) = self.attempts.get(&attempt_id).await else {
                continue;
            };
            // An attempt being verified right now is not abandoned.
            let Ok(mut guard) = slot.try_lock() else {
                continue;
            };
            if guard.as_ref().map_or(true, &matches) {
                if let Some(attempt) = guard.take() {
                    attempt.client.disconnect().await;
                }
                self.attempts.remove(&attempt_id).await;
                closed += 1;
            }
        }
        closed
    }

    pub async fn open_attempts(&self) -> usize {
        self.attempts.keys().await.len()
    }
}

async fn advance(
    attempt: &mut LoginAttempt,
    code: Option<&str>,
    password: Option<&str>,
) -> GalleryResult<VerifyOutcome> {
    if attempt.stage == Stage::CodeSent {
        let code = code
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| GalleryError::Validation("Login code is required.".to_string()))?;

        let signed_in = attempt
            .client
            .sign_in(&attempt.phone, code, &attempt.phone_code_hash)
            .await;
        match signed_in {
            Ok(user_id) => return Ok(VerifyOutcome::Authorized(user_id)),
            Err(PortError::PasswordRequired) => attempt.stage = Stage::PasswordNeeded,
            Err(e) => return Err(e.into()),
        }
    }

    match password.filter(|p| !p.is_empty()) {
        None => Ok(VerifyOutcome::PasswordNeeded),
        Some(password) => {
            let user_id = attempt.client.check_password(password).await?;
            Ok(VerifyOutcome::Authorized(user_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCredentialStore;
    use crate::testing::{FakeConnector, FlakyStore};

    fn manager() -> (LoginManager, Arc<FakeConnector>, Arc<InMemoryCredentialStore>) {
        let connector = Arc::new(FakeConnector::new());
        let store = Arc::new(InMemoryCredentialStore::new());
        connector.network.add_account("+15550001", 101, "12345", None);
        connector.network.add_account("+15550002", 202, "54321", Some("hunter2"));
        (LoginManager::new(connector.clone(), store.clone()), connector, store)
    }

    #[tokio::test]
    async fn code_then_success_persists_and_closes() {
        let (logins, connector, store) = manager();
        let id = logins.request_code("+15550001").await.unwrap();
        assert_eq!(logins.open_attempts().await, 1);

        let outcome = logins.verify(&id, Some("12345"), None).await.unwrap();

        assert_eq!(outcome, VerifyOutcome::Authorized(UserId(101)));
        let record = store.load(UserId(101)).await.unwrap();
        assert!(record.has_auth_key());
        assert_eq!(record.dc_id, 2);
        assert_eq!(connector.network.disconnects(), 1);
        assert_eq!(logins.open_attempts().await, 0);
    }

    #[tokio::test]
    async fn attempt_identifier_is_single_use() {
        let (logins, _, _) = manager();
        let id = logins.request_code("+15550001").await.unwrap();

        for _ in 0..2 {
            let err = logins.verify(&id, Some("00000"), None).await.unwrap_err();
            assert_eq!(err, GalleryError::Port(PortError::InvalidCode));
        }
        assert_eq!(logins.open_attempts().await, 1);

        logins.verify(&id, Some("12345"), None).await.unwrap();
        let err = logins.verify(&id, Some("12345"), None).await.unwrap_err();
        assert_eq!(err, GalleryError::InvalidLoginSession);
    }

    #[tokio::test]
    async fn unknown_identifier_is_invalid() {
        let (logins, _, _) = manager();
        let err = logins.verify("nope", Some("12345"), None).await.unwrap_err();
        assert_eq!(err, GalleryError::InvalidLoginSession);
    }

    #[tokio::test]
    async fn two_factor_flow_keeps_attempt_until_password() {
        let (logins, connector, store) = manager();
        let id = logins.request_code("+15550002").await.unwrap();

        let outcome = logins.verify(&id, Some("54321"), None).await.unwrap();
        assert_eq!(outcome, VerifyOutcome::PasswordNeeded);
        assert_eq!(connector.network.disconnects(), 0);
        assert!(!store.contains(UserId(202)).await);

        let err = logins.verify(&id, None, Some("wrong")).await.unwrap_err();
        assert_eq!(err, GalleryError::Port(PortError::InvalidPassword));
        assert_eq!(connector.network.disconnects(), 0);

        let outcome = logins.verify(&id, None, Some("hunter2")).await.unwrap();
        assert_eq!(outcome, VerifyOutcome::Authorized(UserId(202)));
        assert_eq!(connector.network.disconnects(), 1);
        assert!(store.contains(UserId(202)).await);
        assert!(connector.network.is_authorized(UserId(202)));
    }

    #[tokio::test]
    async fn code_and_password_in_one_request() {
        let (logins, _, _) = manager();
        let id = logins.request_code("+15550002").await.unwrap();
        let outcome = logins
            .verify(&id, Some("54321"), Some("hunter2"))
            .await
            .unwrap();
        assert_eq!(outcome, VerifyOutcome::Authorized(UserId(202)));
    }

    #[tokio::test]
    async fn flood_wait_surfaces_retry_after() {
        let (logins, connector, _) = manager();
        connector.network.set_flood_wait(Some(42));

        let err = logins.request_code("+15550001").await.unwrap_err();

        assert_eq!(err, GalleryError::Port(PortError::FloodWait(42)));
        assert_eq!(connector.network.disconnects(), 1);
        assert_eq!(logins.open_attempts().await, 0);
    }

    #[tokio::test]
    async fn code_already_sent_is_distinct() {
        let (logins, connector, _) = manager();
        connector.network.set_code_already_sent(true);
        let err = logins.request_code("+15550001").await.unwrap_err();
        assert_eq!(err, GalleryError::Port(PortError::CodeAlreadySent));
    }

    #[tokio::test]
    async fn empty_phone_is_rejected_without_connecting() {
        let (logins, connector, _) = manager();
        let err = logins.request_code("  ").await.unwrap_err();
        assert!(matches!(err, GalleryError::Validation(_)));
        assert_eq!(connector.network.connects(), 0);
    }

    #[tokio::test]
    async fn missing_code_keeps_attempt_open() {
        let (logins, _, _) = manager();
        let id = logins.request_code("+15550001").await.unwrap();
        let err = logins.verify(&id, None, None).await.unwrap_err();
        assert!(matches!(err, GalleryError::Validation(_)));
        assert!(logins.verify(&id, Some("12345"), None).await.is_ok());
    }

    #[tokio::test]
    async fn failed_persist_still_tears_down_attempt() {
        let connector = Arc::new(FakeConnector::new());
        connector.network.add_account("+15550001", 101, "12345", None);
        let store = Arc::new(FlakyStore::default());
        let logins = LoginManager::new(connector.clone(), store.clone());
        let id = logins.request_code("+15550001").await.unwrap();

        store.set_failing(true);
        let err = logins.verify(&id, Some("12345"), None).await.unwrap_err();

        assert!(matches!(err, GalleryError::Port(PortError::Unexpected(_))));
        assert_eq!(connector.network.disconnects(), 1);
        assert_eq!(
            logins.verify(&id, Some("12345"), None).await.unwrap_err(),
            GalleryError::InvalidLoginSession
        );
    }

    #[tokio::test]
    async fn purge_closes_only_expired_attempts() {
        let (logins, connector, _) = manager();
        let id = logins.request_code("+15550001").await.unwrap();

        assert_eq!(logins.purge_expired(Duration::minutes(10)).await, 0);
        assert_eq!(logins.purge_expired(Duration::seconds(-1)).await, 1);

        assert_eq!(connector.network.disconnects(), 1);
        assert_eq!(
            logins.verify(&id, Some("12345"), None).await.unwrap_err(),
            GalleryError::InvalidLoginSession
        );
    }
}
