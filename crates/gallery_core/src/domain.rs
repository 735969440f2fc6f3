//! crates/gallery_core/src/domain.rs
//!
//! Defines the pure, core data structures for the gallery.
//! These structs are independent of any database, protocol client or web framework.

use std::fmt;
use std::str::FromStr;

/// Telegram's numeric identity for an authenticated account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(UserId)
    }
}

/// The protocol session material persisted for one user.
///
/// A record with an `auth_key` is able to authorize, but the remote side may
/// still reject it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRecord {
    pub dc_id: i32,
    pub server_address: Option<String>,
    pub port: Option<u16>,
    pub auth_key: Option<Vec<u8>>,
}

impl SessionRecord {
    pub fn has_auth_key(&self) -> bool {
        self.auth_key.is_some()
    }
}

/// A chat as named by an HTTP caller: numeric ids and usernames are both accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChatRef {
    Id(i64),
    Username(String),
}

impl ChatRef {
    /// Anything that parses as an integer is an id, everything else a username.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        Some(match raw.parse::<i64>() {
            Ok(id) => ChatRef::Id(id),
            Err(_) => ChatRef::Username(raw.trim_start_matches('@').to_string()),
        })
    }
}

impl fmt::Display for ChatRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatRef::Id(id) => write!(f, "{}", id),
            ChatRef::Username(name) => write!(f, "{}", name),
        }
    }
}

/// A supergroup created by this app, as kept in the group cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub id: i64,
    pub title: String,
}

/// One page of the cached album list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPage {
    pub groups: Vec<GroupEntry>,
    pub has_more: bool,
}

/// A dialog as yielded by the protocol client's dialog iteration.
#[derive(Debug, Clone)]
pub struct Dialog {
    pub id: i64,
    pub title: String,
    pub kind: DialogKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogKind {
    User,
    Group,
    Supergroup,
    Broadcast,
}

/// A message that carries a photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoMessage {
    pub id: i32,
}

/// The subset of a message the gallery needs to decide whether it can serve it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageInfo {
    pub id: i32,
    pub has_photo: bool,
}

/// One page of photo messages from a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoPage {
    pub photos: Vec<PhotoMessage>,
    pub has_more: bool,
}

/// Which rendition of a photo to download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoSize {
    Full,
    Thumbnail,
}

/// The result of a successful code request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCode {
    pub phone_code_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_ref_prefers_numeric_ids() {
        assert_eq!(ChatRef::parse("-1001234"), Some(ChatRef::Id(-1001234)));
        assert_eq!(ChatRef::parse("42"), Some(ChatRef::Id(42)));
    }

    #[test]
    fn chat_ref_falls_back_to_username() {
        assert_eq!(
            ChatRef::parse("@holiday_pics"),
            Some(ChatRef::Username("holiday_pics".to_string()))
        );
        assert_eq!(
            ChatRef::parse("me"),
            Some(ChatRef::Username("me".to_string()))
        );
        assert_eq!(ChatRef::parse("   "), None);
    }

    #[test]
    fn empty_record_has_no_key() {
        assert!(!SessionRecord::default().has_auth_key());
    }
}
