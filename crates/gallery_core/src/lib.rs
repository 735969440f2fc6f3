pub mod domain;
pub mod error;
pub mod group_cache;
pub mod login;
pub mod memory;
pub mod photos;
pub mod ports;
pub mod registry;
pub mod service;
pub mod session_adapter;
mod slots;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use domain::{
    ChatRef, Dialog, DialogKind, GroupEntry, GroupPage, MessageInfo, PhotoMessage, PhotoPage,
    PhotoSize, SentCode, SessionRecord, UserId,
};
pub use error::{GalleryError, GalleryResult};
pub use group_cache::{GroupCache, APP_GROUP_MARKER};
pub use login::{LoginManager, VerifyOutcome};
pub use memory::{InMemoryCredentialStore, MemorySession};
pub use ports::{
    CredentialStore, DialogStream, PortError, PortResult, SessionStorage, TelegramClient,
    TelegramConnector,
};
pub use registry::ConnectionRegistry;
pub use service::GalleryService;
pub use session_adapter::SessionAdapter;
