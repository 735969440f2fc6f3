//! crates/gallery_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the gallery's core logic.
//! These traits form the boundary of the hexagonal architecture: the durable
//! credential store and the Telegram protocol client are both reached only
//! through them.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use crate::domain::{
    ChatRef, Dialog, GroupEntry, MessageInfo, PhotoMessage, PhotoSize, SentCode, SessionRecord,
    UserId,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
///
/// Remote failures the login flow has to react to get their own variant so that
/// callers never match on message text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Too many attempts, retry after {0} seconds")]
    FloodWait(u64),
    #[error("The login code is invalid")]
    InvalidCode,
    #[error("A two-factor password is required")]
    PasswordRequired,
    #[error("The two-factor password is invalid")]
    InvalidPassword,
    #[error("A code was recently sent, check Telegram or wait a moment")]
    CodeAlreadySent,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// The stream of dialogs produced by [`TelegramClient::dialogs`].
pub type DialogStream = Pin<Box<dyn Stream<Item = PortResult<Dialog>> + Send>>;

//=========================================================================================
// Credential Store
//=========================================================================================

/// Durable per-user storage of protocol session material.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns the stored record, or an empty record when none exists.
    async fn load(&self, user_id: UserId) -> PortResult<SessionRecord>;

    /// Replaces the whole record for `user_id`.
    async fn save(&self, user_id: UserId, record: &SessionRecord) -> PortResult<()>;

    async fn delete(&self, user_id: UserId) -> PortResult<()>;
}

//=========================================================================================
// Protocol Client Session Capability
//=========================================================================================

/// The session capability the protocol client reads its routing and key
/// material from and reports negotiated changes to.
///
/// Setters never fail from the client's point of view: an implementation that
/// persists must log and swallow its own storage errors.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    fn dc_id(&self) -> i32;
    fn server_address(&self) -> Option<String>;
    fn port(&self) -> Option<u16>;
    fn auth_key(&self) -> Option<Vec<u8>>;

    /// Records the data center the client was routed to.
    async fn set_dc(&self, dc_id: i32, server_address: &str, port: u16);

    /// Records a newly negotiated (or cleared) authorization key.
    async fn set_auth_key(&self, auth_key: Option<Vec<u8>>);

    /// File-reference caching is not used by the gallery.
    async fn cache_file(&self, _md5: &[u8], _size: u64, _file_id: i64) {}

    /// Update-state tracking is not used by the gallery.
    async fn set_update_state(&self, _pts: i32, _qts: i32, _date: i64, _seq: i32) {}

    /// Snapshot of all session fields.
    fn record(&self) -> SessionRecord {
        SessionRecord {
            dc_id: self.dc_id(),
            server_address: self.server_address(),
            port: self.port(),
            auth_key: self.auth_key(),
        }
    }
}

//=========================================================================================
// Protocol Client
//=========================================================================================

/// Builds connected protocol clients bound to a session capability.
#[async_trait]
pub trait TelegramConnector: Send + Sync {
    async fn connect(&self, session: Arc<dyn SessionStorage>) -> PortResult<Arc<dyn TelegramClient>>;
}

/// One live protocol-client connection.
#[async_trait]
pub trait TelegramClient: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn is_authorized(&self) -> PortResult<bool>;

    // --- Login ---
    async fn send_code(&self, phone: &str) -> PortResult<SentCode>;

    /// Signs in with a login code. Fails with [`PortError::PasswordRequired`]
    /// when the account has two-factor authentication enabled.
    async fn sign_in(&self, phone: &str, code: &str, phone_code_hash: &str) -> PortResult<UserId>;

    /// Completes a sign-in that stopped at [`PortError::PasswordRequired`].
    async fn check_password(&self, password: &str) -> PortResult<UserId>;

    /// Terminates the authorization on the remote side.
    async fn log_out(&self) -> PortResult<()>;

    async fn disconnect(&self);

    // --- Messages ---
    /// Photo messages of `chat`, newest first, skipping `offset` of them.
    async fn photo_messages(
        &self,
        chat: &ChatRef,
        offset: usize,
        limit: usize,
    ) -> PortResult<Vec<PhotoMessage>>;

    async fn message(&self, chat: &ChatRef, message_id: i32) -> PortResult<Option<MessageInfo>>;

    async fn download_media(&self, chat: &ChatRef, message_id: i32, size: PhotoSize)
        -> PortResult<Bytes>;

    async fn delete_messages(&self, chat: &ChatRef, message_ids: &[i32]) -> PortResult<()>;

    async fn send_photo(&self, chat: &ChatRef, path: &Path, caption: &str) -> PortResult<()>;

    // --- Channels ---
    async fn create_channel(&self, title: &str, about: &str, megagroup: bool)
        -> PortResult<GroupEntry>;

    async fn delete_channel(&self, channel_id: i64) -> PortResult<()>;

    /// The channel's full description text.
    async fn channel_about(&self, channel_id: i64) -> PortResult<String>;

    fn dialogs(&self) -> DialogStream;
}
