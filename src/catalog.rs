use crate::error::SyncError;
use crate::media::{MediaItem, MediaKind};
use crate::session::SessionToken;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::env;

const CATALOG_BASE: &str = "https://api.themoviedb.org/3";
pub const POSTER_BASE: &str = "https://image.tmdb.org/t/p/original";

#[derive(Debug, Clone)]
pub struct CatalogClient {
    client: Client,
    api_key: String,
}

/// Remote catalog operations the sync engine depends on. Everything account
/// scoped takes the session explicitly so the containers stay testable.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn account(&self, session: &SessionToken) -> Result<AccountInfo, SyncError>;
    async fn favorite_titles(
        &self,
        session: &SessionToken,
        kind: MediaKind,
        page: u32,
    ) -> Result<Page, SyncError>;
    async fn set_favorite(
        &self,
        session: &SessionToken,
        kind: MediaKind,
        media_id: i32,
        favorite: bool,
    ) -> Result<(), SyncError>;
    async fn account_lists(
        &self,
        session: &SessionToken,
        page: u32,
    ) -> Result<ListPage, SyncError>;
    async fn create_list(
        &self,
        session: &SessionToken,
        name: &str,
        description: &str,
    ) -> Result<i32, SyncError>;
    async fn list_items(&self, list_id: i32, page: u32) -> Result<Page, SyncError>;
    async fn add_list_item(
        &self,
        session: &SessionToken,
        list_id: i32,
        media_id: i32,
    ) -> Result<(), SyncError>;
    async fn remove_list_item(
        &self,
        session: &SessionToken,
        list_id: i32,
        media_id: i32,
    ) -> Result<(), SyncError>;
    async fn discover(&self, kind: MediaKind, genre_id: i32, page: u32)
        -> Result<Page, SyncError>;
    async fn media_detail(&self, kind: MediaKind, media_id: i32) -> Result<MediaItem, SyncError>;
}

#[derive(Debug, Clone)]
pub struct AccountInfo {
    pub id: i32,
    pub username: Option<String>,
}

/// One page of title rows plus the cursor data the pager needs.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<MediaItem>,
    pub page: u32,
    pub total_pages: u32,
}

#[derive(Debug, Clone)]
pub struct ListInfo {
    pub id: i32,
    pub name: String,
    pub item_count: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub lists: Vec<ListInfo>,
    pub page: u32,
    pub total_pages: u32,
}

impl CatalogClient {
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("TMDB_API_KEY").context("TMDB_API_KEY not set")?;
        Ok(Self {
            client: Client::new(),
            api_key,
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, SyncError> {
        let res = self.client.get(url).send().await?;
        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            return Err(SyncError::remote(format!("{status} -> {text}")));
        }
        serde_json::from_str(&text).map_err(|e| SyncError::remote(format!("bad payload: {e}")))
    }

    /// POST for write endpoints that answer with a status body. A 2xx reply
    /// carrying `success: false` is still a remote failure.
    async fn post_status(&self, url: &str, body: serde_json::Value) -> Result<(), SyncError> {
        let res = self.client.post(url).json(&body).send().await?;
        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            return Err(SyncError::remote(format!("{status} -> {text}")));
        }
        if let Ok(parsed) = serde_json::from_str::<StatusBody>(&text) {
            if parsed.success == Some(false) {
                return Err(SyncError::remote(
                    parsed
                        .status_message
                        .unwrap_or_else(|| "catalog rejected the write".to_string()),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogApi for CatalogClient {
    async fn account(&self, session: &SessionToken) -> Result<AccountInfo, SyncError> {
        #[derive(Deserialize)]
        struct AccountResponse {
            id: i32,
            username: Option<String>,
        }

        let url = format!(
            "{CATALOG_BASE}/account?api_key={}&session_id={}",
            self.api_key, session.session_id
        );
        let data: AccountResponse = self.get_json(&url).await?;
        Ok(AccountInfo {
            id: data.id,
            username: data.username,
        })
    }

    async fn favorite_titles(
        &self,
        session: &SessionToken,
        kind: MediaKind,
        page: u32,
    ) -> Result<Page, SyncError> {
        // The favorites endpoints pluralise movies but not tv.
        let path = match kind {
            MediaKind::Movie => "movies",
            MediaKind::Tv => "tv",
        };
        let url = format!(
            "{CATALOG_BASE}/account/{}/favorite/{path}?api_key={}&session_id={}&language=en-US&page={page}",
            session.account_id, self.api_key, session.session_id
        );
        let data: PageResponse = self.get_json(&url).await?;
        Ok(data.into_page(kind))
    }

    async fn set_favorite(
        &self,
        session: &SessionToken,
        kind: MediaKind,
        media_id: i32,
        favorite: bool,
    ) -> Result<(), SyncError> {
        let url = format!(
            "{CATALOG_BASE}/account/{}/favorite?api_key={}&session_id={}",
            session.account_id, self.api_key, session.session_id
        );
        let body = json!({
            "media_type": kind.as_path(),
            "media_id": media_id,
            "favorite": favorite,
        });
        self.post_status(&url, body).await
    }

    async fn account_lists(
        &self,
        session: &SessionToken,
        page: u32,
    ) -> Result<ListPage, SyncError> {
        #[derive(Deserialize)]
        struct ListRow {
            id: i32,
            name: String,
            #[serde(default)]
            item_count: u32,
        }
        #[derive(Deserialize)]
        struct ListsResponse {
            results: Vec<ListRow>,
            page: u32,
            total_pages: u32,
        }

        let url = format!(
            "{CATALOG_BASE}/account/{}/lists?api_key={}&session_id={}&page={page}",
            session.account_id, self.api_key, session.session_id
        );
        let data: ListsResponse = self.get_json(&url).await?;
        Ok(ListPage {
            lists: data
                .results
                .into_iter()
                .map(|l| ListInfo {
                    id: l.id,
                    name: l.name,
                    item_count: l.item_count,
                })
                .collect(),
            page: data.page,
            total_pages: data.total_pages,
        })
    }

    async fn create_list(
        &self,
        session: &SessionToken,
        name: &str,
        description: &str,
    ) -> Result<i32, SyncError> {
        #[derive(Deserialize)]
        struct CreateResponse {
            success: Option<bool>,
            list_id: Option<i32>,
            status_message: Option<String>,
        }

        let url = format!(
            "{CATALOG_BASE}/list?api_key={}&session_id={}",
            self.api_key, session.session_id
        );
        let body = json!({
            "name": name,
            "description": description,
            "language": "en",
        });
        let res = self.client.post(&url).json(&body).send().await?;
        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            return Err(SyncError::remote(format!("{status} -> {text}")));
        }
        let parsed: CreateResponse = serde_json::from_str(&text)
            .map_err(|e| SyncError::remote(format!("bad payload: {e}")))?;
        if parsed.success == Some(false) {
            return Err(SyncError::remote(
                parsed
                    .status_message
                    .unwrap_or_else(|| "list creation rejected".to_string()),
            ));
        }
        parsed
            .list_id
            .ok_or_else(|| SyncError::remote("list creation returned no id"))
    }

    async fn list_items(&self, list_id: i32, page: u32) -> Result<Page, SyncError> {
        #[derive(Deserialize)]
        struct ListDetail {
            items: Vec<WireRow>,
        }

        // List detail is a single-page payload; report one total page so the
        // pager stops after the first fetch.
        let url = format!(
            "{CATALOG_BASE}/list/{list_id}?api_key={}&language=en-US&page={page}",
            self.api_key
        );
        let data: ListDetail = self.get_json(&url).await?;
        Ok(Page {
            items: data
                .items
                .into_iter()
                .map(|row| {
                    let kind = row.kind_from_media_type();
                    row.into_item(kind)
                })
                .collect(),
            page,
            total_pages: 1,
        })
    }

    async fn add_list_item(
        &self,
        session: &SessionToken,
        list_id: i32,
        media_id: i32,
    ) -> Result<(), SyncError> {
        let url = format!(
            "{CATALOG_BASE}/list/{list_id}/add_item?api_key={}&session_id={}",
            self.api_key, session.session_id
        );
        self.post_status(&url, json!({ "media_id": media_id })).await
    }

    async fn remove_list_item(
        &self,
        session: &SessionToken,
        list_id: i32,
        media_id: i32,
    ) -> Result<(), SyncError> {
        let url = format!(
            "{CATALOG_BASE}/list/{list_id}/remove_item?api_key={}&session_id={}",
            self.api_key, session.session_id
        );
        self.post_status(&url, json!({ "media_id": media_id })).await
    }

    async fn discover(
        &self,
        kind: MediaKind,
        genre_id: i32,
        page: u32,
    ) -> Result<Page, SyncError> {
        let url = format!(
            "{CATALOG_BASE}/discover/{}?api_key={}&with_genres={genre_id}&language=en-US&sort_by=popularity.desc&page={page}",
            kind.as_path(),
            self.api_key
        );
        let data: PageResponse = self.get_json(&url).await?;
        Ok(data.into_page(kind))
    }

    async fn media_detail(&self, kind: MediaKind, media_id: i32) -> Result<MediaItem, SyncError> {
        let url = format!(
            "{CATALOG_BASE}/{}/{media_id}?api_key={}&language=en-US",
            kind.as_path(),
            self.api_key
        );
        let row: WireRow = self.get_json(&url).await?;
        Ok(row.into_item(kind))
    }
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    success: Option<bool>,
    status_message: Option<String>,
}

/// One title row as the catalog sends it. Movie rows carry `title` and
/// `release_date`, tv rows `name` and `first_air_date`; both collapse into
/// the same local shape.
#[derive(Debug, Deserialize)]
struct WireRow {
    id: i32,
    title: Option<String>,
    name: Option<String>,
    #[serde(default)]
    overview: String,
    poster_path: Option<String>,
    backdrop_path: Option<String>,
    vote_average: Option<f32>,
    release_date: Option<String>,
    first_air_date: Option<String>,
    genre_ids: Option<Vec<i32>>,
    genres: Option<Vec<WireGenre>>,
    media_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireGenre {
    id: i32,
}

impl WireRow {
    fn kind_from_media_type(&self) -> MediaKind {
        self.media_type
            .as_deref()
            .and_then(|m| m.parse().ok())
            .unwrap_or(MediaKind::Movie)
    }

    fn into_item(self, kind: MediaKind) -> MediaItem {
        let genre_ids = self
            .genre_ids
            .or_else(|| self.genres.map(|g| g.into_iter().map(|x| x.id).collect()));
        MediaItem {
            id: self.id,
            title: self.title.or(self.name).unwrap_or_default(),
            overview: self.overview,
            poster: self.poster_path.map(|p| format!("{POSTER_BASE}{p}")),
            backdrop: self.backdrop_path.map(|p| format!("{POSTER_BASE}{p}")),
            kind,
            rating: self.vote_average,
            release_date: self
                .release_date
                .or(self.first_air_date)
                .filter(|d| !d.is_empty()),
            genre_ids,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PageResponse {
    results: Vec<WireRow>,
    page: u32,
    total_pages: u32,
}

impl PageResponse {
    fn into_page(self, kind: MediaKind) -> Page {
        Page {
            items: self
                .results
                .into_iter()
                .map(|row| row.into_item(kind))
                .collect(),
            page: self.page,
            total_pages: self.total_pages,
        }
    }
}
