use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Tv,
}

impl MediaKind {
    /// Path segment used by the catalog service ("movie" / "tv").
    pub fn as_path(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Tv => "tv",
        }
    }
}

impl FromStr for MediaKind {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "movie" => Ok(MediaKind::Movie),
            "tv" => Ok(MediaKind::Tv),
            _ => Err(anyhow::anyhow!("media kind must be 'movie' or 'tv'")),
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_path())
    }
}

/// One catalog entry as the service reports it. Replaced wholesale on
/// refresh, never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: i32,
    pub title: String,
    #[serde(default)]
    pub overview: String,
    pub poster: Option<String>,
    pub backdrop: Option<String>,
    pub kind: MediaKind,
    pub rating: Option<f32>,
    pub release_date: Option<String>,
    pub genre_ids: Option<Vec<i32>>,
}

impl MediaItem {
    /// Placeholder entry used when a favorite is added for a title whose
    /// detail record was never viewed this session.
    pub fn stub(id: i32, kind: MediaKind) -> Self {
        MediaItem {
            id,
            title: String::new(),
            overview: String::new(),
            poster: None,
            backdrop: None,
            kind,
            rating: None,
            release_date: None,
            genre_ids: None,
        }
    }
}

/// A pending release reminder. The release date is required: rows without
/// one never become alerts (see `Alerts::sync_with_theatre`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub media_id: i32,
    pub title: String,
    pub release_date: String,
    #[serde(default)]
    pub poster: String,
    pub kind: MediaKind,
}

/// Payload delivered when a trigger fires. Carries everything a receiver
/// needs to render a "now available" notification without calling back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseNotice {
    pub media_id: i32,
    pub title: String,
    pub poster: String,
    pub kind: MediaKind,
}

impl From<&Alert> for ReleaseNotice {
    fn from(alert: &Alert) -> Self {
        ReleaseNotice {
            media_id: alert.media_id,
            title: alert.title.clone(),
            poster: alert.poster.clone(),
            kind: alert.kind,
        }
    }
}
