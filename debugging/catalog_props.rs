//! Fetch raw catalog data the way the sync engine sees it.
//! Usage:
//!   cargo run --bin catalog_props -- search movie <query...>
//!   cargo run --bin catalog_props -- detail tv <id>
//!   cargo run --bin catalog_props -- lists
//! Requires TMDB_API_KEY in the environment (.env supported); `lists` also
//! needs TMDB_SESSION_ID.

use anyhow::{Context, Result};
use dotenvy::dotenv;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::env;
use std::str::FromStr;

const CATALOG_BASE: &str = "https://api.themoviedb.org/3";
const POSTER_BASE: &str = "https://image.tmdb.org/t/p/original";
const NOTIFY_LIST_NAME: &str = "Theatre Notifications";

#[derive(Debug, Clone, Copy, PartialEq)]
enum MediaKind {
    Movie,
    Tv,
}

impl FromStr for MediaKind {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "movie" => Ok(MediaKind::Movie),
            "tv" => Ok(MediaKind::Tv),
            _ => Err(anyhow::anyhow!("media kind must be 'movie' or 'tv'")),
        }
    }
}

impl MediaKind {
    fn as_path(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Tv => "tv",
        }
    }
}

#[derive(Debug, Deserialize)]
struct Row {
    id: i32,
    title: Option<String>,
    name: Option<String>,
    release_date: Option<String>,
    first_air_date: Option<String>,
    poster_path: Option<String>,
    vote_average: Option<f32>,
    overview: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<Row>,
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    id: i32,
}

#[derive(Debug, Deserialize)]
struct ListRow {
    id: i32,
    name: String,
    #[serde(default)]
    item_count: u32,
}

#[derive(Debug, Deserialize)]
struct ListsResponse {
    results: Vec<ListRow>,
    page: u32,
    total_pages: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        usage();
    }

    let api_key = env::var("TMDB_API_KEY").context("TMDB_API_KEY not set")?;
    let client = Client::new();

    match args[1].as_str() {
        "search" => {
            if args.len() < 4 {
                usage();
            }
            let kind = MediaKind::from_str(&args[2])?;
            let query = args[3..].join(" ");
            search(&client, kind, &query, &api_key).await
        }
        "detail" => {
            if args.len() < 4 {
                usage();
            }
            let kind = MediaKind::from_str(&args[2])?;
            let id: i32 = args[3].parse().context("id must be an integer")?;
            detail(&client, kind, id, &api_key).await
        }
        "lists" => lists(&client, &api_key).await,
        _ => {
            usage();
        }
    }
}

fn usage() -> ! {
    eprintln!("Usage: cargo run --bin catalog_props -- search <movie|tv> <query...>");
    eprintln!("       cargo run --bin catalog_props -- detail <movie|tv> <id>");
    eprintln!("       cargo run --bin catalog_props -- lists");
    std::process::exit(1);
}

async fn search(client: &Client, kind: MediaKind, query: &str, api_key: &str) -> Result<()> {
    let url = format!(
        "{CATALOG_BASE}/search/{}?api_key={api_key}&query={}&language=en-US",
        kind.as_path(),
        urlencoding::encode(query)
    );
    let data: SearchResponse = get_json(client, &url).await?;
    for row in &data.results {
        println!("{}", serde_json::to_string_pretty(&mapped(row, kind))?);
    }
    eprintln!(
        "{} row(s) on page 1 of {}",
        data.results.len(),
        data.total_pages
    );
    Ok(())
}

async fn detail(client: &Client, kind: MediaKind, id: i32, api_key: &str) -> Result<()> {
    let url = format!(
        "{CATALOG_BASE}/{}/{id}?api_key={api_key}&language=en-US",
        kind.as_path()
    );
    let row: Row = get_json(client, &url).await?;
    println!("{}", serde_json::to_string_pretty(&mapped(&row, kind))?);
    Ok(())
}

async fn lists(client: &Client, api_key: &str) -> Result<()> {
    let session_id = env::var("TMDB_SESSION_ID").context("TMDB_SESSION_ID not set")?;
    let account: AccountResponse = get_json(
        client,
        &format!("{CATALOG_BASE}/account?api_key={api_key}&session_id={session_id}"),
    )
    .await?;

    let mut page = 1;
    let mut carriers = Vec::new();
    loop {
        let data: ListsResponse = get_json(
            client,
            &format!(
                "{CATALOG_BASE}/account/{}/lists?api_key={api_key}&session_id={session_id}&page={page}",
                account.id
            ),
        )
        .await?;
        for list in &data.results {
            println!(
                "{:>10}  {:>5} item(s)  {}",
                list.id, list.item_count, list.name
            );
            if list.name == NOTIFY_LIST_NAME {
                carriers.push(list.id);
            }
        }
        if data.results.is_empty() || data.page >= data.total_pages {
            break;
        }
        page += 1;
    }

    match carriers.len() {
        0 => eprintln!("No '{NOTIFY_LIST_NAME}' list yet; the engine will create one"),
        1 => eprintln!("Canonical '{NOTIFY_LIST_NAME}' list: {}", carriers[0]),
        _ => eprintln!(
            "{} lists carry '{NOTIFY_LIST_NAME}'; the engine keeps {} and ignores the rest",
            carriers.len(),
            carriers.iter().max().unwrap()
        ),
    }
    Ok(())
}

fn mapped(row: &Row, kind: MediaKind) -> serde_json::Value {
    json!({
        "id": row.id,
        "title": row.title.clone().or_else(|| row.name.clone()),
        "kind": kind.as_path(),
        "release_date": row.release_date.clone().or_else(|| row.first_air_date.clone()),
        "poster": row.poster_path.as_ref().map(|p| format!("{POSTER_BASE}{p}")),
        "rating": row.vote_average,
        "overview": row.overview,
    })
}

async fn get_json<T: for<'de> Deserialize<'de>>(client: &Client, url: &str) -> Result<T> {
    let res = client.get(url).send().await.context("request failed")?;
    let status = res.status();
    let text = res.text().await.context("reading body failed")?;
    if !status.is_success() {
        return Err(anyhow::anyhow!("{} -> {}", status, text));
    }
    let parsed: T = serde_json::from_str(&text).context("JSON parse failed")?;
    Ok(parsed)
}
