use crate::catalog::CatalogApi;
use crate::error::SyncError;
use crate::media::{MediaItem, MediaKind};
use crate::pager::drain;
use crate::session::SessionStore;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Local favorite rows per media kind, mirroring the remote account.
#[derive(Debug, Clone, Default)]
pub struct FavoriteSet {
    pub movie: Vec<MediaItem>,
    pub tv: Vec<MediaItem>,
}

impl FavoriteSet {
    pub fn of(&self, kind: MediaKind) -> &[MediaItem] {
        match kind {
            MediaKind::Movie => &self.movie,
            MediaKind::Tv => &self.tv,
        }
    }

    fn of_mut(&mut self, kind: MediaKind) -> &mut Vec<MediaItem> {
        match kind {
            MediaKind::Movie => &mut self.movie,
            MediaKind::Tv => &mut self.tv,
        }
    }

    pub fn contains(&self, media_id: i32, kind: MediaKind) -> bool {
        self.of(kind).iter().any(|i| i.id == media_id)
    }
}

/// A local mutation applied ahead of remote confirmation. Undo is a pure
/// function of the record, so rollback cannot drift from what was staged.
#[derive(Debug, Clone)]
pub enum Staged {
    Add { media_id: i32, kind: MediaKind },
    Remove { item: MediaItem, index: usize },
}

impl Staged {
    pub fn revert(self, set: &mut FavoriteSet) {
        match self {
            Staged::Add { media_id, kind } => {
                set.of_mut(kind).retain(|i| i.id != media_id);
            }
            Staged::Remove { item, index } => {
                let list = set.of_mut(item.kind);
                let index = index.min(list.len());
                list.insert(index, item);
            }
        }
    }
}

/// Favorite state container. Mutations land locally first; the remote mark
/// and any corrective refresh run in a spawned unit that never blocks reads.
pub struct Favorites {
    catalog: Arc<dyn CatalogApi>,
    session: Arc<SessionStore>,
    set: Mutex<FavoriteSet>,
    last_viewed: Mutex<Option<MediaItem>>,
    error: Mutex<Option<String>>,
}

impl Favorites {
    pub fn new(catalog: Arc<dyn CatalogApi>, session: Arc<SessionStore>) -> Self {
        Self {
            catalog,
            session,
            set: Mutex::new(FavoriteSet::default()),
            last_viewed: Mutex::new(None),
            error: Mutex::new(None),
        }
    }

    pub async fn snapshot(&self) -> (FavoriteSet, Option<String>) {
        let set = self.set.lock().await.clone();
        let error = self.error.lock().await.clone();
        (set, error)
    }

    /// Remember the detail record the caller looked at last, so a following
    /// `add` can seed the optimistic row with real display fields.
    pub async fn note_viewed(&self, item: MediaItem) {
        *self.last_viewed.lock().await = Some(item);
    }

    /// Replace one kind's rows with the full remote walk. Failure keeps the
    /// stale rows and records the error.
    pub async fn refresh(&self, kind: MediaKind) -> Result<(), SyncError> {
        let token = match self.session.current() {
            // Logged out: nothing remote to mirror.
            None => return Ok(()),
            Some(t) => t,
        };
        match drain(|page| self.catalog.favorite_titles(&token, kind, page)).await {
            Ok(rows) => {
                info!("Refreshed {} favorite {} row(s)", rows.len(), kind);
                *self.set.lock().await.of_mut(kind) = rows;
                self.set_error(None).await;
                Ok(())
            }
            Err(e) => {
                warn!("Favorite refresh for {} failed: {}", kind, e);
                self.set_error(Some(e.to_string())).await;
                Err(e)
            }
        }
    }

    /// Mark a favorite. The row appears locally before any network call;
    /// marking an already-present id changes nothing and stages nothing.
    pub async fn add(self: Arc<Self>, media_id: i32, kind: MediaKind) {
        let viewed = self.recall_viewed(media_id, kind).await;
        {
            let mut set = self.set.lock().await;
            if set.contains(media_id, kind) {
                return;
            }
            set.of_mut(kind)
                .push(viewed.unwrap_or_else(|| MediaItem::stub(media_id, kind)));
        }
        let staged = Staged::Add { media_id, kind };
        let this = Arc::clone(&self);
        tokio::spawn(async move { this.confirm(staged, media_id, kind, true).await });
    }

    /// Unmark a favorite. The row disappears locally at once; removing an
    /// absent id is a no-op.
    pub async fn remove(self: Arc<Self>, media_id: i32, kind: MediaKind) {
        let staged = {
            let mut set = self.set.lock().await;
            let list = set.of_mut(kind);
            let index = match list.iter().position(|i| i.id == media_id) {
                Some(i) => i,
                None => return,
            };
            let item = list.remove(index);
            Staged::Remove { item, index }
        };
        let this = Arc::clone(&self);
        tokio::spawn(async move { this.confirm(staged, media_id, kind, false).await });
    }

    /// Remote confirmation for one staged mutation. Success re-syncs the kind
    /// from the catalog; failure rolls the mutation back, re-syncs, and
    /// records the error.
    async fn confirm(self: Arc<Self>, staged: Staged, media_id: i32, kind: MediaKind, mark: bool) {
        let token = match self.session.current() {
            // Local-only while logged out; the optimistic state stands.
            None => return,
            Some(t) => t,
        };
        match self
            .catalog
            .set_favorite(&token, kind, media_id, mark)
            .await
        {
            Ok(()) => {
                let _ = self.refresh(kind).await;
            }
            Err(e) => {
                warn!(
                    "Favorite {} of {} {} failed remotely: {}",
                    if mark { "mark" } else { "unmark" },
                    kind,
                    media_id,
                    e
                );
                staged.revert(&mut *self.set.lock().await);
                let _ = self.refresh(kind).await;
                self.set_error(Some(e.to_string())).await;
            }
        }
    }

    async fn recall_viewed(&self, media_id: i32, kind: MediaKind) -> Option<MediaItem> {
        self.last_viewed
            .lock()
            .await
            .as_ref()
            .filter(|i| i.id == media_id && i.kind == kind)
            .cloned()
    }

    async fn set_error(&self, message: Option<String>) {
        *self.error.lock().await = message;
    }
}
