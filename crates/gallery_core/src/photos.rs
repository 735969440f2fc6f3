//! crates/gallery_core/src/photos.rs
//!
//! Photo operations on a resolved client.

use bytes::Bytes;
use std::path::Path;

use crate::domain::{ChatRef, PhotoPage, PhotoSize};
use crate::error::{GalleryError, GalleryResult};
use crate::ports::{PortError, TelegramClient};

/// Caption attached to every photo uploaded through the gallery.
pub const UPLOAD_CAPTION: &str = "Uploaded from web gallery 🌐";

/// Upper bound on a single photo page.
pub const MAX_PHOTO_PAGE: usize = 200;

/// Fetches one page of photo messages; one extra message is requested to learn
/// whether another page exists.
pub async fn list_photos(
    client: &dyn TelegramClient,
    chat: &ChatRef,
    offset: usize,
    limit: usize,
) -> GalleryResult<PhotoPage> {
    if limit == 0 || limit > MAX_PHOTO_PAGE {
        return Err(GalleryError::Validation(format!(
            "limit must be between 1 and {}",
            MAX_PHOTO_PAGE
        )));
    }
    let mut photos = client.photo_messages(chat, offset, limit + 1).await?;
    let has_more = photos.len() > limit;
    photos.truncate(limit);
    Ok(PhotoPage { photos, has_more })
}

async fn ensure_photo(client: &dyn TelegramClient, chat: &ChatRef, message_id: i32) -> GalleryResult<()> {
    match client.message(chat, message_id).await? {
        Some(message) if message.has_photo => Ok(()),
        _ => Err(PortError::NotFound("Photo not found.".to_string()).into()),
    }
}

pub async fn fetch_photo(
    client: &dyn TelegramClient,
    chat: &ChatRef,
    message_id: i32,
    size: PhotoSize,
) -> GalleryResult<Bytes> {
    ensure_photo(client, chat, message_id).await?;
    Ok(client.download_media(chat, message_id, size).await?)
}

pub async fn delete_photo(client: &dyn TelegramClient, chat: &ChatRef, message_id: i32) -> GalleryResult<()> {
    ensure_photo(client, chat, message_id).await?;
    client.delete_messages(chat, &[message_id]).await?;
    Ok(())
}

pub async fn upload_photo(client: &dyn TelegramClient, chat: &ChatRef, path: &Path) -> GalleryResult<()> {
    client.send_photo(chat, path, UPLOAD_CAPTION).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySession;
    use crate::ports::TelegramConnector;
    use crate::testing::FakeConnector;
    use std::sync::Arc;

    async fn setup() -> (Arc<FakeConnector>, Arc<dyn TelegramClient>, ChatRef) {
        let connector = Arc::new(FakeConnector::new());
        let chat = ChatRef::Id(-100500);
        for id in 1..=7 {
            connector.network.add_message(chat.clone(), id, true);
        }
        connector.network.add_message(chat.clone(), 50, false);
        let client = connector.connect(Arc::new(MemorySession::new())).await.unwrap();
        (connector, client, chat)
    }

    #[tokio::test]
    async fn list_reports_has_more_from_extra_item() {
        let (_, client, chat) = setup().await;

        let page = list_photos(client.as_ref(), &chat, 0, 3).await.unwrap();
        let ids: Vec<i32> = page.photos.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![7, 6, 5]);
        assert!(page.has_more);

        let last = list_photos(client.as_ref(), &chat, 4, 3).await.unwrap();
        assert_eq!(last.photos.len(), 3);
        assert!(!last.has_more);
    }

    #[tokio::test]
    async fn limit_bounds_are_validated() {
        let (_, client, chat) = setup().await;
        assert!(matches!(
            list_photos(client.as_ref(), &chat, 0, 0).await,
            Err(GalleryError::Validation(_))
        ));
        assert!(matches!(
            list_photos(client.as_ref(), &chat, 0, MAX_PHOTO_PAGE + 1).await,
            Err(GalleryError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn non_photo_message_is_not_found() {
        let (connector, client, chat) = setup().await;

        let err = fetch_photo(client.as_ref(), &chat, 50, PhotoSize::Full).await.unwrap_err();
        assert!(matches!(err, GalleryError::Port(PortError::NotFound(_))));

        let err = delete_photo(client.as_ref(), &chat, 50).await.unwrap_err();
        assert!(matches!(err, GalleryError::Port(PortError::NotFound(_))));
        assert!(connector.network.has_message(&chat, 50));
    }

    #[tokio::test]
    async fn fetch_and_delete_photo() {
        let (connector, client, chat) = setup().await;

        let thumb = fetch_photo(client.as_ref(), &chat, 3, PhotoSize::Thumbnail).await.unwrap();
        assert_eq!(&thumb[..], b"Thumbnail-3");

        delete_photo(client.as_ref(), &chat, 3).await.unwrap();
        assert!(!connector.network.has_message(&chat, 3));
    }
}
