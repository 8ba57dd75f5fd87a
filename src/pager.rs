use crate::catalog::{CatalogApi, Page};
use crate::error::SyncError;
use crate::media::{MediaItem, MediaKind};
use std::cmp::Ordering;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

// The catalog itself stops serving past page 500.
const MAX_PAGES: u32 = 500;

/// Cursor over one paginated source. Holds no client of its own; the caller
/// fetches and feeds each page back through `advance`.
#[derive(Debug, Clone)]
pub struct Pager {
    next_page: u32,
    total_pages: Option<u32>,
}

impl Pager {
    pub fn new() -> Self {
        Self {
            next_page: 1,
            total_pages: None,
        }
    }

    pub fn restart(&mut self) {
        *self = Self::new();
    }

    pub fn next_page(&self) -> u32 {
        self.next_page
    }

    /// True until every reported page has been fetched. Before the first
    /// fetch the total is unknown, so the answer is yes.
    pub fn has_more(&self) -> bool {
        match self.total_pages {
            None => true,
            Some(total) => self.next_page <= total.min(MAX_PAGES),
        }
    }

    pub fn advance(&mut self, page: &Page) {
        self.total_pages = Some(page.total_pages);
        self.next_page += 1;
    }
}

/// Walk every page of one source in order and collect the rows. Used where
/// local state must mirror the whole remote collection.
pub async fn drain<F, Fut>(mut fetch: F) -> Result<Vec<MediaItem>, SyncError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Page, SyncError>>,
{
    let mut pager = Pager::new();
    let mut rows = Vec::new();
    while pager.has_more() {
        let page = fetch(pager.next_page()).await?;
        pager.advance(&page);
        // An empty page ends the walk regardless of the reported total.
        if page.items.is_empty() {
            break;
        }
        rows.extend(page.items);
    }
    Ok(rows)
}

#[derive(Debug, Clone)]
pub struct FeedSnapshot {
    pub rows: Vec<MediaItem>,
    pub has_more: bool,
    pub error: Option<String>,
}

struct FeedState {
    genre_id: Option<i32>,
    movie: Pager,
    tv: Pager,
    rows: Vec<MediaItem>,
    error: Option<String>,
}

/// Discover-by-genre feed over two independent cursors, one per media kind.
/// The first load presents the combined page best-rated first; later pages
/// append in arrival order. Steps are serialized by the state lock, so two
/// concurrent `more` calls cannot fetch the same page twice.
pub struct DiscoverFeed {
    catalog: Arc<dyn CatalogApi>,
    state: Mutex<FeedState>,
}

impl DiscoverFeed {
    pub fn new(catalog: Arc<dyn CatalogApi>) -> Self {
        Self {
            catalog,
            state: Mutex::new(FeedState {
                genre_id: None,
                movie: Pager::new(),
                tv: Pager::new(),
                rows: Vec::new(),
                error: None,
            }),
        }
    }

    /// Reset to a genre and fetch the first page of both sources. A failed
    /// source surfaces as the step error; the other source's rows still land.
    pub async fn load(&self, genre_id: i32) -> Result<(), SyncError> {
        let mut st = self.state.lock().await;
        st.genre_id = Some(genre_id);
        st.movie.restart();
        st.tv.restart();
        st.rows.clear();
        st.error = None;

        let (movies, shows) = tokio::join!(
            self.catalog
                .discover(MediaKind::Movie, genre_id, st.movie.next_page()),
            self.catalog
                .discover(MediaKind::Tv, genre_id, st.tv.next_page()),
        );

        let mut fresh = Vec::new();
        let mut failure = None;
        match movies {
            Ok(page) => {
                st.movie.advance(&page);
                fresh.extend(page.items);
            }
            Err(e) => failure = Some(e),
        }
        match shows {
            Ok(page) => {
                st.tv.advance(&page);
                fresh.extend(page.items);
            }
            Err(e) => failure = Some(e),
        }
        sort_by_rating(&mut fresh);
        st.rows.extend(fresh);

        if let Some(e) = failure {
            st.error = Some(e.to_string());
            return Err(e);
        }
        Ok(())
    }

    /// Fetch the next page of every source that still has one. No-op before
    /// the first `load`.
    pub async fn more(&self) -> Result<(), SyncError> {
        let mut st = self.state.lock().await;
        let genre_id = match st.genre_id {
            Some(g) => g,
            None => return Ok(()),
        };
        st.error = None;

        let want_movie = st.movie.has_more();
        let want_tv = st.tv.has_more();
        let (movies, shows) = tokio::join!(
            async {
                if want_movie {
                    Some(
                        self.catalog
                            .discover(MediaKind::Movie, genre_id, st.movie.next_page())
                            .await,
                    )
                } else {
                    None
                }
            },
            async {
                if want_tv {
                    Some(
                        self.catalog
                            .discover(MediaKind::Tv, genre_id, st.tv.next_page())
                            .await,
                    )
                } else {
                    None
                }
            },
        );

        let mut failure = None;
        if let Some(result) = movies {
            match result {
                Ok(page) => {
                    st.movie.advance(&page);
                    st.rows.extend(page.items);
                }
                Err(e) => failure = Some(e),
            }
        }
        if let Some(result) = shows {
            match result {
                Ok(page) => {
                    st.tv.advance(&page);
                    st.rows.extend(page.items);
                }
                Err(e) => failure = Some(e),
            }
        }

        if let Some(e) = failure {
            st.error = Some(e.to_string());
            return Err(e);
        }
        Ok(())
    }

    pub async fn snapshot(&self) -> FeedSnapshot {
        let st = self.state.lock().await;
        FeedSnapshot {
            rows: st.rows.clone(),
            has_more: st.genre_id.is_some() && (st.movie.has_more() || st.tv.has_more()),
            error: st.error.clone(),
        }
    }
}

/// Stable rating-descending order; unrated rows sink to the bottom. Stability
/// keeps the movie rows ahead of tv rows on ties, since they were appended
/// first.
fn sort_by_rating(rows: &mut [MediaItem]) {
    rows.sort_by(|a, b| {
        b.rating
            .unwrap_or(0.0)
            .partial_cmp(&a.rating.unwrap_or(0.0))
            .unwrap_or(Ordering::Equal)
    });
}
