//! Fakes of the protocol client and credential store for tests.
//!
//! Other crates of the workspace reach them through the `testing` feature.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::domain::{
    ChatRef, Dialog, DialogKind, GroupEntry, MessageInfo, PhotoMessage, PhotoSize, SentCode,
    SessionRecord, UserId,
};
use crate::memory::InMemoryCredentialStore;
use crate::ports::{
    CredentialStore, DialogStream, PortError, PortResult, SessionStorage, TelegramClient,
    TelegramConnector,
};

//=========================================================================================
// FlakyStore
//=========================================================================================

/// In-memory credential store that counts writes and can be switched to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryCredentialStore,
    failing: AtomicBool,
    writes: AtomicUsize,
}

impl FlakyStore {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check(&self) -> PortResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(PortError::Unexpected("store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CredentialStore for FlakyStore {
    async fn load(&self, user_id: UserId) -> PortResult<SessionRecord> {
        self.check()?;
        self.inner.load(user_id).await
    }

    async fn save(&self, user_id: UserId, record: &SessionRecord) -> PortResult<()> {
        self.check()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.save(user_id, record).await
    }

    async fn delete(&self, user_id: UserId) -> PortResult<()> {
        self.check()?;
        self.inner.delete(user_id).await
    }
}

//=========================================================================================
// FakeNetwork
//=========================================================================================

struct Account {
    user_id: UserId,
    code: String,
    password: Option<String>,
}

struct FakeDialog {
    dialog: Dialog,
    about: Option<String>,
}

/// The remote side shared by every fake client.
pub struct FakeNetwork {
    accounts: Mutex<HashMap<String, Account>>,
    authorized: Mutex<HashMap<Vec<u8>, UserId>>,
    dialogs: Mutex<Vec<FakeDialog>>,
    messages: Mutex<HashMap<(ChatRef, i32), bool>>,
    sent: Mutex<Vec<(ChatRef, String, Vec<u8>)>>,
    flood_wait: Mutex<Option<u64>>,
    code_already_sent: AtomicBool,
    fail_scan: AtomicBool,
    fail_send: AtomicBool,
    connect_delay: Mutex<Option<Duration>>,
    next_key: AtomicU64,
    next_channel: AtomicI64,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    scans: AtomicUsize,
    scan_delay: Duration,
    running_scans: Gauge,
    running_connects: Gauge,
}

/// Tracks how many operations run at once and the highest count seen.
#[derive(Default)]
struct Gauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Default for FakeNetwork {
    fn default() -> Self {
        Self {
            accounts: Mutex::default(),
            authorized: Mutex::default(),
            dialogs: Mutex::default(),
            messages: Mutex::default(),
            sent: Mutex::default(),
            flood_wait: Mutex::default(),
            code_already_sent: AtomicBool::new(false),
            fail_scan: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
            connect_delay: Mutex::default(),
            next_key: AtomicU64::new(1),
            next_channel: AtomicI64::new(1_000),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            scans: AtomicUsize::new(0),
            scan_delay: Duration::from_millis(20),
            running_scans: Gauge::default(),
            running_connects: Gauge::default(),
        }
    }
}

impl FakeNetwork {
    pub fn add_account(&self, phone: &str, user_id: i64, code: &str, password: Option<&str>) {
        self.accounts.lock().unwrap().insert(
            phone.to_string(),
            Account {
                user_id: UserId(user_id),
                code: code.to_string(),
                password: password.map(str::to_string),
            },
        );
    }

    /// Adds a dialog; `about` of `None` makes its full-info fetch fail.
    pub fn add_dialog(&self, id: i64, title: &str, kind: DialogKind, about: Option<&str>) {
        self.dialogs.lock().unwrap().push(FakeDialog {
            dialog: Dialog {
                id,
                title: title.to_string(),
                kind,
            },
            about: about.map(str::to_string),
        });
    }

    pub fn add_message(&self, chat: ChatRef, id: i32, has_photo: bool) {
        self.messages.lock().unwrap().insert((chat, id), has_photo);
    }

    pub fn has_message(&self, chat: &ChatRef, id: i32) -> bool {
        self.messages.lock().unwrap().contains_key(&(chat.clone(), id))
    }

    pub fn has_dialog(&self, id: i64) -> bool {
        self.dialogs.lock().unwrap().iter().any(|d| d.dialog.id == id)
    }

    pub fn sent(&self) -> Vec<(ChatRef, String, Vec<u8>)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn set_flood_wait(&self, seconds: Option<u64>) {
        *self.flood_wait.lock().unwrap() = seconds;
    }

    pub fn set_code_already_sent(&self, value: bool) {
        self.code_already_sent.store(value, Ordering::SeqCst);
    }

    pub fn set_fail_scan(&self, fail: bool) {
        self.fail_scan.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    /// Makes every following connect take `delay` before it returns.
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        *self.connect_delay.lock().unwrap() = delay;
    }

    /// Revokes every authorization of `user_id` on the remote side.
    pub fn revoke(&self, user_id: UserId) {
        self.authorized.lock().unwrap().retain(|_, user| *user != user_id);
    }

    pub fn is_authorized(&self, user_id: UserId) -> bool {
        self.authorized.lock().unwrap().values().any(|user| *user == user_id)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    /// Highest number of dialog scans that were in flight at the same time.
    pub fn peak_concurrent_scans(&self) -> usize {
        self.running_scans.peak()
    }

    /// Highest number of connects that were in flight at the same time.
    pub fn peak_concurrent_connects(&self) -> usize {
        self.running_connects.peak()
    }
}

//=========================================================================================
// FakeConnector / FakeClient
//=========================================================================================

pub struct FakeConnector {
    pub network: Arc<FakeNetwork>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self {
            network: Arc::new(FakeNetwork::default()),
        }
    }
}

impl Default for FakeConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelegramConnector for FakeConnector {
    async fn connect(&self, session: Arc<dyn SessionStorage>) -> PortResult<Arc<dyn TelegramClient>> {
        self.network.running_connects.enter();
        let delay = *self.network.connect_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if session.auth_key().is_none() {
            let key = self.network.next_key.fetch_add(1, Ordering::SeqCst);
            session.set_dc(2, "149.154.167.51", 443).await;
            session.set_auth_key(Some(key.to_be_bytes().to_vec())).await;
        }
        self.network.connects.fetch_add(1, Ordering::SeqCst);
        self.network.running_connects.leave();
        Ok(Arc::new(FakeClient {
            network: self.network.clone(),
            session,
            connected: AtomicBool::new(true),
            pending: Mutex::new(None),
        }))
    }
}

pub struct FakeClient {
    network: Arc<FakeNetwork>,
    session: Arc<dyn SessionStorage>,
    connected: AtomicBool,
    pending: Mutex<Option<(UserId, Option<String>)>>,
}

impl FakeClient {
    fn authorize(&self, user_id: UserId) -> PortResult<UserId> {
        let key = self
            .session
            .auth_key()
            .ok_or_else(|| PortError::Unexpected("no auth key".to_string()))?;
        self.network.authorized.lock().unwrap().insert(key, user_id);
        Ok(user_id)
    }
}

#[async_trait]
impl TelegramClient for FakeClient {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn is_authorized(&self) -> PortResult<bool> {
        Ok(match self.session.auth_key() {
            Some(key) => self.network.authorized.lock().unwrap().contains_key(&key),
            None => false,
        })
    }

    async fn send_code(&self, phone: &str) -> PortResult<SentCode> {
        if let Some(seconds) = *self.network.flood_wait.lock().unwrap() {
            return Err(PortError::FloodWait(seconds));
        }
        if self.network.code_already_sent.load(Ordering::SeqCst) {
            return Err(PortError::CodeAlreadySent);
        }
        if !self.network.accounts.lock().unwrap().contains_key(phone) {
            return Err(PortError::Unexpected("PHONE_NUMBER_INVALID".to_string()));
        }
        Ok(SentCode {
            phone_code_hash: format!("hash-{}", phone),
        })
    }

    async fn sign_in(&self, phone: &str, code: &str, phone_code_hash: &str) -> PortResult<UserId> {
        if phone_code_hash != format!("hash-{}", phone) {
            return Err(PortError::Unexpected("PHONE_CODE_HASH_INVALID".to_string()));
        }
        let (user_id, password) = {
            let accounts = self.network.accounts.lock().unwrap();
            let account = accounts
                .get(phone)
                .ok_or_else(|| PortError::Unexpected("PHONE_NUMBER_UNOCCUPIED".to_string()))?;
            if account.code != code {
                return Err(PortError::InvalidCode);
            }
            (account.user_id, account.password.clone())
        };
        if password.is_some() {
            *self.pending.lock().unwrap() = Some((user_id, password));
            return Err(PortError::PasswordRequired);
        }
        self.authorize(user_id)
    }

    async fn check_password(&self, password: &str) -> PortResult<UserId> {
        let pending = self.pending.lock().unwrap().clone();
        match pending {
            Some((user_id, Some(expected))) if expected == password => self.authorize(user_id),
            Some(_) => Err(PortError::InvalidPassword),
            None => Err(PortError::Unexpected("no password challenge pending".to_string())),
        }
    }

    async fn log_out(&self) -> PortResult<()> {
        if let Some(key) = self.session.auth_key() {
            self.network.authorized.lock().unwrap().remove(&key);
        }
        Ok(())
    }

    async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.network.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn photo_messages(
        &self,
        chat: &ChatRef,
        offset: usize,
        limit: usize,
    ) -> PortResult<Vec<PhotoMessage>> {
        let mut ids: Vec<i32> = self
            .network
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|((c, _), has_photo)| c == chat && **has_photo)
            .map(|((_, id), _)| *id)
            .collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        Ok(ids
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|id| PhotoMessage { id })
            .collect())
    }

    async fn message(&self, chat: &ChatRef, message_id: i32) -> PortResult<Option<MessageInfo>> {
        Ok(self
            .network
            .messages
            .lock()
            .unwrap()
            .get(&(chat.clone(), message_id))
            .map(|has_photo| MessageInfo {
                id: message_id,
                has_photo: *has_photo,
            }))
    }

    async fn download_media(
        &self,
        chat: &ChatRef,
        message_id: i32,
        size: PhotoSize,
    ) -> PortResult<Bytes> {
        match self.message(chat, message_id).await? {
            Some(info) if info.has_photo => Ok(Bytes::from(format!("{:?}-{}", size, message_id))),
            _ => Err(PortError::NotFound(format!("message {}", message_id))),
        }
    }

    async fn delete_messages(&self, chat: &ChatRef, message_ids: &[i32]) -> PortResult<()> {
        let mut messages = self.network.messages.lock().unwrap();
        for id in message_ids {
            messages.remove(&(chat.clone(), *id));
        }
        Ok(())
    }

    async fn send_photo(&self, chat: &ChatRef, path: &Path, caption: &str) -> PortResult<()> {
        if self.network.fail_send.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("MEDIA_INVALID".to_string()));
        }
        let contents = tokio::fs::read(path)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        self.network
            .sent
            .lock()
            .unwrap()
            .push((chat.clone(), caption.to_string(), contents));
        Ok(())
    }

    async fn create_channel(&self, title: &str, about: &str, megagroup: bool) -> PortResult<GroupEntry> {
        let id = self.network.next_channel.fetch_add(1, Ordering::SeqCst);
        let kind = if megagroup {
            DialogKind::Supergroup
        } else {
            DialogKind::Broadcast
        };
        self.network.dialogs.lock().unwrap().insert(
            0,
            FakeDialog {
                dialog: Dialog {
                    id,
                    title: title.to_string(),
                    kind,
                },
                about: Some(about.to_string()),
            },
        );
        Ok(GroupEntry {
            id,
            title: title.to_string(),
        })
    }

    async fn delete_channel(&self, channel_id: i64) -> PortResult<()> {
        let mut dialogs = self.network.dialogs.lock().unwrap();
        let before = dialogs.len();
        dialogs.retain(|d| d.dialog.id != channel_id);
        if dialogs.len() == before {
            return Err(PortError::NotFound(format!("channel {}", channel_id)));
        }
        Ok(())
    }

    async fn channel_about(&self, channel_id: i64) -> PortResult<String> {
        self.network
            .dialogs
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.dialog.id == channel_id)
            .and_then(|d| d.about.clone())
            .ok_or_else(|| PortError::Unexpected("CHANNEL_PRIVATE".to_string()))
    }

    fn dialogs(&self) -> DialogStream {
        self.network.scans.fetch_add(1, Ordering::SeqCst);
        let dialogs: Vec<Dialog> = self
            .network
            .dialogs
            .lock()
            .unwrap()
            .iter()
            .map(|d| d.dialog.clone())
            .collect();
        let fail = self.network.fail_scan.load(Ordering::SeqCst);
        let network = self.network.clone();
        Box::pin(async_stream::stream! {
            network.running_scans.enter();
            tokio::time::sleep(network.scan_delay).await;
            if fail {
                network.running_scans.leave();
                yield Err(PortError::Unexpected("dialog iteration failed".to_string()));
                return;
            }
            for dialog in dialogs {
                yield Ok(dialog);
            }
            network.running_scans.leave();
        })
    }
}
