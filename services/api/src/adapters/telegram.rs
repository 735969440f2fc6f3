//! services/api/src/adapters/telegram.rs
//!
//! This module contains the adapter for the Telegram MTProto protocol, built on
//! the `layer-client` crate. It implements the `TelegramConnector` and
//! `TelegramClient` ports from the `gallery_core` crate.
//!
//! `layer-client` persists its session through its own binary session file. Each
//! connection gets a private scratch directory holding that file: it is seeded
//! from the user's stored [`SessionRecord`] before connecting, and whatever the
//! client negotiates is read back from it and reported to the
//! [`SessionStorage`]. The directory is removed when the connection drops.

use async_trait::async_trait;
use bytes::Bytes;
use gallery_core::ports::{
    DialogStream, PortError, PortResult, SessionStorage, TelegramClient, TelegramConnector,
};
use gallery_core::{
    ChatRef, Dialog, DialogKind, GroupEntry, MessageInfo, PhotoMessage, PhotoSize, SentCode,
    SessionRecord, UserId,
};
use layer_client::{
    BinaryFileBackend, Client, InvocationError, LoginToken, PasswordToken, SignInError,
};
use layer_tl_types as tl;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Telegram's "marked" id space: channels live below `-CHANNEL_ID_BASE`, basic
/// groups are negated, users are positive.
const CHANNEL_ID_BASE: i64 = 1_000_000_000_000;

const SESSION_FILE: &str = "session";
const AUTH_KEY_LEN: usize = 256;

//=========================================================================================
// The Connector
//=========================================================================================

/// Builds `layer-client` connections for the gallery's registry and login flow.
#[derive(Clone)]
pub struct LayerConnector {
    api_id: i32,
    api_hash: String,
}

impl LayerConnector {
    /// Creates a new `LayerConnector` for the given Telegram application.
    pub fn new(api_id: i32, api_hash: impl Into<String>) -> Self {
        Self {
            api_id,
            api_hash: api_hash.into(),
        }
    }
}

#[async_trait]
impl TelegramConnector for LayerConnector {
    async fn connect(&self, session: Arc<dyn SessionStorage>) -> PortResult<Arc<dyn TelegramClient>> {
        let scratch = tempfile::Builder::new()
            .prefix("tg-session-")
            .tempdir()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        let session_path = scratch.path().join(SESSION_FILE);

        // Without a usable key the file must not exist: the client reads an
        // empty file as a corrupt session.
        if let Some(bytes) = encode_session(&session.record()) {
            tokio::fs::write(&session_path, bytes)
                .await
                .map_err(|e| PortError::Unexpected(e.to_string()))?;
        }

        let (client, _shutdown) = Client::connect(layer_client::Config {
            api_id: self.api_id,
            api_hash: self.api_hash.clone(),
            session_backend: Arc::new(BinaryFileBackend::new(session_path.clone())),
            ..Default::default()
        })
        .await
        .map_err(port_error)?;

        let connection = LayerClient {
            client,
            session,
            session_path,
            _scratch: scratch,
            connected: AtomicBool::new(true),
            code_login: Mutex::new(None),
            password_challenge: Mutex::new(None),
        };
        connection.sync_session().await?;
        Ok(Arc::new(connection))
    }
}

//=========================================================================================
// The Client
//=========================================================================================

/// One live `layer-client` connection bound to a user's session capability.
pub struct LayerClient {
    client: Client,
    session: Arc<dyn SessionStorage>,
    session_path: PathBuf,
    _scratch: TempDir,
    connected: AtomicBool,
    /// The code request this connection made, with the code last tried.
    code_login: Mutex<Option<(LoginToken, String)>>,
    password_challenge: Mutex<Option<PasswordToken>>,
}

impl LayerClient {
    /// Reports the client's current data center and key to the session
    /// capability when they differ from what it holds.
    async fn sync_session(&self) -> PortResult<()> {
        self.client.save_session().await.map_err(port_error)?;
        let bytes = tokio::fs::read(&self.session_path)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        let Some(home) = decode_home_dc(&bytes) else {
            warn!("Session file has no usable home data center entry");
            return Ok(());
        };

        let current = self.session.record();
        if current.dc_id != home.dc_id
            || current.server_address.as_deref() != Some(home.host.as_str())
            || current.port != Some(home.port)
        {
            self.session.set_dc(home.dc_id, &home.host, home.port).await;
        }
        if current.auth_key.as_deref() != Some(home.auth_key.as_slice()) {
            debug!(dc_id = home.dc_id, "Recording negotiated auth key");
            self.session.set_auth_key(Some(home.auth_key)).await;
        }
        Ok(())
    }

    async fn finish_login(&self) -> PortResult<UserId> {
        let me = self.client.get_me().await.map_err(port_error)?;
        self.sync_session().await?;
        info!(user_id = me.id, "Signed in to Telegram");
        Ok(UserId(me.id))
    }

    /// Asks for a fresh two-factor challenge by replaying the accepted code.
    async fn renew_password_challenge(&self) -> PortResult<PasswordToken> {
        let pending = lock(&self.code_login).take();
        let Some((token, code)) = pending else {
            return Err(PortError::Unexpected("no login code was requested".to_string()));
        };
        let outcome = self.client.sign_in(&token, &code).await;
        *lock(&self.code_login) = Some((token, code));
        match outcome {
            Err(SignInError::PasswordRequired(challenge)) => Ok(*challenge),
            Err(e) => Err(sign_in_error(e)),
            Ok(_) => Err(PortError::Unexpected("sign-in no longer needs a password".to_string())),
        }
    }

    /// Resolves `chat` to a peer and its input form, learning access hashes
    /// from the dialog list when the client has not seen the peer yet.
    async fn input_peer(&self, chat: &ChatRef) -> PortResult<(tl::enums::Peer, tl::enums::InputPeer)> {
        let peer = match chat {
            ChatRef::Id(id) => peer_from_marked(*id),
            ChatRef::Username(name) if name == "me" || name == "self" => {
                self.client.resolve_peer(name).await.map_err(port_error)?
            }
            ChatRef::Username(name) => self
                .client
                .resolve_peer(&format!("@{}", name))
                .await
                .map_err(port_error)?,
        };

        if let Ok(input) = self.client.resolve_to_input_peer(&peer).await {
            return Ok((peer, input));
        }

        let wanted = marked_id(&peer);
        let mut dialogs = self.client.iter_dialogs();
        while let Some(dialog) = dialogs.next(&self.client).await.map_err(port_error)? {
            if dialog.peer().map(marked_id) == Some(wanted) {
                break;
            }
        }
        let input = self
            .client
            .resolve_to_input_peer(&peer)
            .await
            .map_err(|_| PortError::NotFound(format!("chat {}", chat)))?;
        Ok((peer, input))
    }

    async fn input_channel(&self, channel_id: i64) -> PortResult<tl::enums::InputChannel> {
        match self.input_peer(&ChatRef::Id(channel_id)).await? {
            (_, tl::enums::InputPeer::Channel(c)) => Ok(tl::enums::InputChannel::InputChannel(
                tl::types::InputChannel {
                    channel_id: c.channel_id,
                    access_hash: c.access_hash,
                },
            )),
            _ => Err(PortError::NotFound(format!("channel {}", channel_id))),
        }
    }

    async fn raw_message(&self, chat: &ChatRef, message_id: i32) -> PortResult<Option<tl::enums::Message>> {
        let (peer, _) = self.input_peer(chat).await?;
        let messages = self
            .client
            .get_messages_by_id(peer, &[message_id])
            .await
            .map_err(port_error)?;
        Ok(messages
            .into_iter()
            .map(|m| m.raw)
            .find(|raw| matches!(raw, tl::enums::Message::Message(m) if m.id == message_id)))
    }
}

#[async_trait]
impl TelegramClient for LayerClient {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn is_authorized(&self) -> PortResult<bool> {
        self.client.is_authorized().await.map_err(port_error)
    }

    async fn send_code(&self, phone: &str) -> PortResult<SentCode> {
        let token = self.client.request_login_code(phone).await.map_err(port_error)?;
        *lock(&self.code_login) = Some((token, String::new()));
        // The hash travels inside the client's login token; callers only need
        // something to hand back to `sign_in`.
        Ok(SentCode {
            phone_code_hash: phone.to_string(),
        })
    }

    async fn sign_in(&self, _phone: &str, code: &str, _phone_code_hash: &str) -> PortResult<UserId> {
        let pending = lock(&self.code_login).take();
        let Some((token, _)) = pending else {
            return Err(PortError::Unexpected("no login code was requested".to_string()));
        };
        let outcome = self.client.sign_in(&token, code).await;
        *lock(&self.code_login) = Some((token, code.to_string()));

        match outcome {
            Ok(_) => self.finish_login().await,
            Err(SignInError::PasswordRequired(challenge)) => {
                *lock(&self.password_challenge) = Some(*challenge);
                Err(PortError::PasswordRequired)
            }
            Err(e) => Err(sign_in_error(e)),
        }
    }

    async fn check_password(&self, password: &str) -> PortResult<UserId> {
        let challenge = lock(&self.password_challenge).take();
        let challenge = match challenge {
            Some(challenge) => challenge,
            None => self.renew_password_challenge().await?,
        };
        self.client
            .check_password(challenge, password)
            .await
            .map_err(port_error)?;
        self.finish_login().await
    }

    async fn log_out(&self) -> PortResult<()> {
        self.client.sign_out().await.map_err(port_error)?;
        Ok(())
    }

    /// The socket closes once the last handle to the client drops.
    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn photo_messages(
        &self,
        chat: &ChatRef,
        offset: usize,
        limit: usize,
    ) -> PortResult<Vec<PhotoMessage>> {
        let (_, input) = self.input_peer(chat).await?;
        let request = tl::functions::messages::Search {
            peer: input,
            q: String::new(),
            from_id: None,
            saved_peer_id: None,
            saved_reaction: None,
            top_msg_id: None,
            filter: tl::enums::MessagesFilter::InputMessagesFilterPhotos,
            min_date: 0,
            max_date: 0,
            offset_id: 0,
            add_offset: i32::try_from(offset).unwrap_or(i32::MAX),
            limit: i32::try_from(limit).unwrap_or(i32::MAX),
            max_id: 0,
            min_id: 0,
            hash: 0,
        };
        let found = self.client.invoke(&request).await.map_err(port_error)?;

        Ok(messages_of(found)
            .iter()
            .filter(|raw| photo_of(raw).is_some())
            .filter_map(|raw| match raw {
                tl::enums::Message::Message(m) => Some(PhotoMessage { id: m.id }),
                _ => None,
            })
            .collect())
    }

    async fn message(&self, chat: &ChatRef, message_id: i32) -> PortResult<Option<MessageInfo>> {
        Ok(self
            .raw_message(chat, message_id)
            .await?
            .map(|raw| MessageInfo {
                id: message_id,
                has_photo: photo_of(&raw).is_some(),
            }))
    }

    async fn download_media(&self, chat: &ChatRef, message_id: i32, size: PhotoSize) -> PortResult<Bytes> {
        let raw = self.raw_message(chat, message_id).await?;
        let location = raw
            .as_ref()
            .and_then(photo_of)
            .and_then(|photo| photo_location(photo, size))
            .ok_or_else(|| PortError::NotFound(format!("photo {}", message_id)))?;

        let data = self.client.download_media(location).await.map_err(port_error)?;
        Ok(Bytes::from(data))
    }

    async fn delete_messages(&self, chat: &ChatRef, message_ids: &[i32]) -> PortResult<()> {
        let (_, input) = self.input_peer(chat).await?;
        match input {
            tl::enums::InputPeer::Channel(c) => {
                let request = tl::functions::channels::DeleteMessages {
                    channel: tl::enums::InputChannel::InputChannel(tl::types::InputChannel {
                        channel_id: c.channel_id,
                        access_hash: c.access_hash,
                    }),
                    id: message_ids.to_vec(),
                };
                self.client.invoke(&request).await.map_err(port_error)?;
            }
            _ => self
                .client
                .delete_messages(message_ids.to_vec(), true)
                .await
                .map_err(port_error)?,
        }
        Ok(())
    }

    async fn send_photo(&self, chat: &ChatRef, path: &Path, caption: &str) -> PortResult<()> {
        let (peer, _) = self.input_peer(chat).await?;
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("photo.jpg");

        let uploaded = self
            .client
            .upload_file(&data, name, "image/jpeg")
            .await
            .map_err(port_error)?;
        self.client
            .send_file(peer, uploaded.as_photo_media(), caption)
            .await
            .map_err(port_error)
    }

    async fn create_channel(&self, title: &str, about: &str, megagroup: bool) -> PortResult<GroupEntry> {
        let request = tl::functions::channels::CreateChannel {
            broadcast: !megagroup,
            megagroup,
            for_import: false,
            forum: false,
            title: title.to_string(),
            about: about.to_string(),
            geo_point: None,
            address: None,
            ttl_period: None,
        };
        let updates = self.client.invoke(&request).await.map_err(port_error)?;

        let chats = match updates {
            tl::enums::Updates::Updates(u) => u.chats,
            tl::enums::Updates::Combined(u) => u.chats,
            _ => Vec::new(),
        };
        self.client.cache_chats_slice_pub(&chats).await;

        chats
            .iter()
            .find_map(|chat| match chat {
                tl::enums::Chat::Channel(c) => Some(GroupEntry {
                    id: -(CHANNEL_ID_BASE + c.id),
                    title: c.title.clone(),
                }),
                _ => None,
            })
            .ok_or_else(|| PortError::Unexpected("created channel missing from the reply".to_string()))
    }

    async fn delete_channel(&self, channel_id: i64) -> PortResult<()> {
        let channel = self.input_channel(channel_id).await?;
        self.client
            .invoke(&tl::functions::channels::DeleteChannel { channel })
            .await
            .map_err(port_error)?;
        Ok(())
    }

    async fn channel_about(&self, channel_id: i64) -> PortResult<String> {
        let channel = self.input_channel(channel_id).await?;
        let full = self
            .client
            .invoke(&tl::functions::channels::GetFullChannel { channel })
            .await
            .map_err(port_error)?;

        let tl::enums::messages::ChatFull::ChatFull(full) = full;
        Ok(match full.full_chat {
            tl::enums::ChatFull::ChannelFull(c) => c.about,
            tl::enums::ChatFull::ChatFull(c) => c.about,
        })
    }

    fn dialogs(&self) -> DialogStream {
        let client = self.client.clone();
        Box::pin(async_stream::stream! {
            let mut dialogs = client.iter_dialogs();
            loop {
                match dialogs.next(&client).await {
                    Ok(Some(dialog)) => {
                        if let Some(dialog) = to_dialog(&dialog) {
                            yield Ok(dialog);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(port_error(e));
                        break;
                    }
                }
            }
        })
    }
}

//=========================================================================================
// Error Mapping
//=========================================================================================

/// Maps a protocol failure onto the port's error taxonomy by RPC error name.
fn port_error(err: InvocationError) -> PortError {
    if let Some(seconds) = err.flood_wait_seconds() {
        return PortError::FloodWait(seconds);
    }
    if err.is("AUTH_KEY_*") || err.is("SESSION_REVOKED") || err.is("USER_DEACTIVATED*") {
        return PortError::Unauthorized;
    }
    if err.is("PHONE_CODE_*") {
        return PortError::InvalidCode;
    }
    if err.is("SESSION_PASSWORD_NEEDED") {
        return PortError::PasswordRequired;
    }
    if err.is("PASSWORD_HASH_INVALID") {
        return PortError::InvalidPassword;
    }
    if err.is("SEND_CODE_UNAVAILABLE") || err.is("AUTH_RESTART") {
        return PortError::CodeAlreadySent;
    }
    if err.is("CHANNEL_INVALID")
        || err.is("CHANNEL_PRIVATE")
        || err.is("CHAT_ID_INVALID")
        || err.is("PEER_ID_INVALID")
        || err.is("MSG_ID_INVALID")
        || err.is("USERNAME_*")
    {
        return PortError::NotFound(err.to_string());
    }
    match &err {
        InvocationError::Rpc(rpc) if rpc.code == 401 => PortError::Unauthorized,
        _ => PortError::Unexpected(err.to_string()),
    }
}

fn sign_in_error(err: SignInError) -> PortError {
    match err {
        SignInError::InvalidCode => PortError::InvalidCode,
        SignInError::PasswordRequired(_) => PortError::PasswordRequired,
        SignInError::SignUpRequired => {
            PortError::Unexpected("This phone number has no Telegram account.".to_string())
        }
        SignInError::Other(e) => port_error(e),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

//=========================================================================================
// Peers, Messages and Photos
//=========================================================================================

fn marked_id(peer: &tl::enums::Peer) -> i64 {
    match peer {
        tl::enums::Peer::User(u) => u.user_id,
        tl::enums::Peer::Chat(c) => -c.chat_id,
        tl::enums::Peer::Channel(c) => -(CHANNEL_ID_BASE + c.channel_id),
    }
}

fn peer_from_marked(id: i64) -> tl::enums::Peer {
    if id <= -CHANNEL_ID_BASE {
        tl::enums::Peer::Channel(tl::types::PeerChannel {
            channel_id: -(id + CHANNEL_ID_BASE),
        })
    } else if id < 0 {
        tl::enums::Peer::Chat(tl::types::PeerChat { chat_id: -id })
    } else {
        tl::enums::Peer::User(tl::types::PeerUser { user_id: id })
    }
}

fn to_dialog(dialog: &layer_client::Dialog) -> Option<Dialog> {
    let peer = dialog.peer()?;
    let kind = match peer {
        tl::enums::Peer::User(_) => DialogKind::User,
        tl::enums::Peer::Chat(_) => DialogKind::Group,
        tl::enums::Peer::Channel(_) => match &dialog.chat {
            Some(tl::enums::Chat::Channel(c)) if c.megagroup => DialogKind::Supergroup,
            _ => DialogKind::Broadcast,
        },
    };
    Some(Dialog {
        id: marked_id(peer),
        title: dialog.title(),
        kind,
    })
}

fn messages_of(found: tl::enums::messages::Messages) -> Vec<tl::enums::Message> {
    match found {
        tl::enums::messages::Messages::Messages(m) => m.messages,
        tl::enums::messages::Messages::Slice(m) => m.messages,
        tl::enums::messages::Messages::ChannelMessages(m) => m.messages,
        tl::enums::messages::Messages::NotModified(_) => Vec::new(),
    }
}

fn photo_of(raw: &tl::enums::Message) -> Option<&tl::types::Photo> {
    let tl::enums::Message::Message(m) = raw else {
        return None;
    };
    match m.media.as_ref()? {
        tl::enums::MessageMedia::Photo(media) => match media.photo.as_ref()? {
            tl::enums::Photo::Photo(photo) => Some(photo),
            _ => None,
        },
        _ => None,
    }
}

/// The download location of the smallest (thumbnail) or largest (full) size.
fn photo_location(photo: &tl::types::Photo, size: PhotoSize) -> Option<tl::enums::InputFileLocation> {
    let mut sizes = photo.sizes.iter().filter_map(|s| match s {
        tl::enums::PhotoSize::PhotoSize(ps) => Some(ps.r#type.clone()),
        _ => None,
    });
    let thumb_size = match size {
        PhotoSize::Thumbnail => sizes.next(),
        PhotoSize::Full => sizes.last(),
    }?;
    Some(tl::enums::InputFileLocation::InputPhotoFileLocation(
        tl::types::InputPhotoFileLocation {
            id: photo.id,
            access_hash: photo.access_hash,
            file_reference: photo.file_reference.clone(),
            thumb_size,
        },
    ))
}

//=========================================================================================
// Session File Codec
//=========================================================================================

/// The home data center entry of a `layer-client` session file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct HomeDc {
    dc_id: i32,
    host: String,
    port: u16,
    auth_key: Vec<u8>,
}

/// Writes a single-entry session file for a record that can authorize.
///
/// Layout, little-endian: home dc id (i32), entry count (u8), then per entry
/// dc id (i32), key flag (u8), key (256 bytes if flagged), first salt (i64),
/// time offset (i32), address length (u8), address (`host:port`).
fn encode_session(record: &SessionRecord) -> Option<Vec<u8>> {
    let key = record.auth_key.as_deref().filter(|k| k.len() == AUTH_KEY_LEN)?;
    let addr = format!("{}:{}", record.server_address.as_deref()?, record.port?);
    let addr_len = u8::try_from(addr.len()).ok()?;

    let mut out = Vec::with_capacity(4 + 1 + 4 + 1 + AUTH_KEY_LEN + 8 + 4 + 1 + addr.len());
    out.extend_from_slice(&record.dc_id.to_le_bytes());
    out.push(1);
    out.extend_from_slice(&record.dc_id.to_le_bytes());
    out.push(1);
    out.extend_from_slice(key);
    out.extend_from_slice(&0i64.to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes());
    out.push(addr_len);
    out.extend_from_slice(addr.as_bytes());
    Some(out)
}

/// Reads the keyed home data center entry out of a session file.
fn decode_home_dc(bytes: &[u8]) -> Option<HomeDc> {
    let mut reader = Reader { bytes, pos: 0 };
    let home_dc_id = reader.i32()?;
    let count = reader.u8()?;

    for _ in 0..count {
        let dc_id = reader.i32()?;
        let auth_key = match reader.u8()? {
            1 => Some(reader.take(AUTH_KEY_LEN)?.to_vec()),
            _ => None,
        };
        reader.take(8 + 4)?;
        let addr_len = usize::from(reader.u8()?);
        let addr = std::str::from_utf8(reader.take(addr_len)?).ok()?;

        if dc_id != home_dc_id {
            continue;
        }
        let (host, port) = addr.rsplit_once(':')?;
        return Some(HomeDc {
            dc_id,
            host: host.to_string(),
            port: port.parse().ok()?,
            auth_key: auth_key?,
        });
    }
    None
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.bytes.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn i32(&mut self) -> Option<i32> {
        self.take(4)?.try_into().ok().map(i32::from_le_bytes)
    }
}
