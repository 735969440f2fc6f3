//! crates/gallery_core/src/group_cache.rs
//!
//! Per-user cache of the albums (supergroups) this app created.
//!
//! A populated slot means the list is current; an empty slot means the next
//! read must rebuild it with a full dialog scan. The user's slot stays locked
//! from the presence check through the scan to the store, so concurrent first
//! reads for one user share a single scan. A failed scan leaves the slot empty.

use futures::StreamExt;
use tracing::{debug, info};

use crate::domain::{DialogKind, GroupEntry, GroupPage, UserId};
use crate::error::{GalleryError, GalleryResult};
use crate::ports::{PortResult, TelegramClient};
use crate::slots::KeyedSlots;

/// Placed in the description of every supergroup this app creates.
pub const APP_GROUP_MARKER: &str = "Created via Web Gallery App";

type GroupSlot = Option<Vec<GroupEntry>>;

pub struct GroupCache {
    marker: String,
    entries: KeyedSlots<UserId, GroupSlot>,
}

impl Default for GroupCache {
    fn default() -> Self {
        Self::new(APP_GROUP_MARKER)
    }
}

impl GroupCache {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            entries: KeyedSlots::new(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Returns `groups[offset..offset + limit]`, scanning first if the user has
    /// no cached list yet.
    pub async fn get_page(
        &self,
        user_id: UserId,
        client: &dyn TelegramClient,
        offset: usize,
        limit: usize,
    ) -> GalleryResult<GroupPage> {
        if limit == 0 {
            return Err(GalleryError::Validation("limit must be at least 1".to_string()));
        }
        let slot = self.entries.slot(&user_id).await;
        let mut cached = slot.lock().await;

        if cached.is_none() {
            info!(%user_id, "Group cache empty, scanning dialogs");
            let scanned = scan_app_groups(client, &self.marker).await?;
            info!(%user_id, count = scanned.len(), "Group cache populated");
            *cached = Some(scanned);
        } else {
            debug!(%user_id, "Group cache hit");
        }

        Ok(paginate(cached.as_deref().unwrap_or_default(), offset, limit))
    }

    /// Builds the user's cache if it is empty, without reading a page.
    pub async fn warm(&self, user_id: UserId, client: &dyn TelegramClient) -> GalleryResult<()> {
        self.get_page(user_id, client, 0, 1).await.map(|_| ())
    }

    /// Puts a freshly created group at the front of an existing list.
    pub async fn prepend(&self, user_id: UserId, group: GroupEntry) {
        if let Some(slot) = self.entries.get(&user_id).await {
            if let Some(groups) = slot.lock().await.as_mut() {
                groups.insert(0, group);
            }
        }
    }

    /// Drops the group with `group_id` from an existing list.
    pub async fn remove(&self, user_id: UserId, group_id: i64) {
        if let Some(slot) = self.entries.get(&user_id).await {
            if let Some(groups) = slot.lock().await.as_mut() {
                groups.retain(|g| g.id != group_id);
            }
        }
    }

    /// Forgets the user's list; the next read rescans.
    ///
    /// Clears the slot in place, so a scan already running for the user
    /// finishes first and later readers queue behind the same lock.
    pub async fn invalidate(&self, user_id: UserId) {
        if let Some(slot) = self.entries.get(&user_id).await {
            *slot.lock().await = None;
        }
    }

    pub async fn is_populated(&self, user_id: UserId) -> bool {
        match self.entries.get(&user_id).await {
            Some(slot) => slot.lock().await.is_some(),
            None => false,
        }
    }
}

fn paginate(groups: &[GroupEntry], offset: usize, limit: usize) -> GroupPage {
    let end = offset.saturating_add(limit);
    GroupPage {
        groups: groups
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect(),
        has_more: groups.len() > end,
    }
}

/// Walks every dialog and keeps the supergroups whose description carries
/// `marker`. One full-info fetch per supergroup; a failed fetch means the
/// channel is not one of ours.
pub async fn scan_app_groups(
    client: &dyn TelegramClient,
    marker: &str,
) -> PortResult<Vec<GroupEntry>> {
    let mut dialogs = client.dialogs();
    let mut groups = Vec::new();

    while let Some(dialog) = dialogs.next().await {
        let dialog = dialog?;
        if dialog.kind != DialogKind::Supergroup {
            continue;
        }
        match client.channel_about(dialog.id).await {
            Ok(about) if about.contains(marker) => groups.push(GroupEntry {
                id: dialog.id,
                title: dialog.title,
            }),
            Ok(_) => {}
            Err(e) => debug!(channel_id = dialog.id, error = %e, "Skipping channel"),
        }
    }

    Ok(groups)
}
