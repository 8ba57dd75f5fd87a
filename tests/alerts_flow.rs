use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use marquee::alerts::list::THEATRE_LIST_NAME;
use marquee::alerts::notify::NotifySink;
use marquee::alerts::schedule::ReleaseScheduler;
use marquee::alerts::Alerts;
use marquee::app::{build_router, AppState};
use marquee::catalog::{AccountInfo, CatalogApi, ListInfo, ListPage, Page};
use marquee::error::SyncError;
use marquee::favorites::Favorites;
use marquee::media::{MediaItem, MediaKind, ReleaseNotice};
use marquee::pager::DiscoverFeed;
use marquee::session::{SessionStore, SessionToken};
use marquee::store::KvStore;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::util::ServiceExt;

const API_TOKEN: &str = "test-token";

/// Catalog double for the notification-list surface. Account lists and their
/// rows are fixtures; the mutation endpoints only record what was asked of
/// them, so reconciliation always reads the seeded remote picture.
#[derive(Default)]
struct FakeCatalog {
    lists: Mutex<Vec<ListInfo>>,
    items: Mutex<HashMap<i32, Vec<MediaItem>>>,
    created: Mutex<Vec<String>>,
    added: Mutex<Vec<(i32, i32)>>,
    removed: Mutex<Vec<(i32, i32)>>,
    list_walks: AtomicUsize,
    fail_add_item: AtomicBool,
    fail_remove_item: AtomicBool,
}

#[async_trait::async_trait]
impl CatalogApi for FakeCatalog {
    async fn account(&self, _session: &SessionToken) -> Result<AccountInfo, SyncError> {
        Ok(AccountInfo {
            id: 84,
            username: Some("tester".to_string()),
        })
    }

    async fn favorite_titles(
        &self,
        _session: &SessionToken,
        _kind: MediaKind,
        page: u32,
    ) -> Result<Page, SyncError> {
        Ok(Page {
            items: Vec::new(),
            page,
            total_pages: 1,
        })
    }

    async fn set_favorite(
        &self,
        _session: &SessionToken,
        _kind: MediaKind,
        _media_id: i32,
        _favorite: bool,
    ) -> Result<(), SyncError> {
        Ok(())
    }

    async fn account_lists(
        &self,
        _session: &SessionToken,
        page: u32,
    ) -> Result<ListPage, SyncError> {
        self.list_walks.fetch_add(1, Ordering::SeqCst);
        Ok(ListPage {
            lists: self.lists.lock().unwrap().clone(),
            page,
            total_pages: 1,
        })
    }

    async fn create_list(
        &self,
        _session: &SessionToken,
        name: &str,
        _description: &str,
    ) -> Result<i32, SyncError> {
        // Yield once so overlapping ensure calls actually overlap.
        tokio::task::yield_now().await;
        let id = 900 + self.created.lock().unwrap().len() as i32;
        self.created.lock().unwrap().push(name.to_string());
        self.lists.lock().unwrap().push(ListInfo {
            id,
            name: name.to_string(),
            item_count: 0,
        });
        Ok(id)
    }

    async fn list_items(&self, list_id: i32, page: u32) -> Result<Page, SyncError> {
        let items = self
            .items
            .lock()
            .unwrap()
            .get(&list_id)
            .cloned()
            .unwrap_or_default();
        Ok(Page {
            items,
            page,
            total_pages: 1,
        })
    }

    async fn add_list_item(
        &self,
        _session: &SessionToken,
        list_id: i32,
        media_id: i32,
    ) -> Result<(), SyncError> {
        if self.fail_add_item.load(Ordering::SeqCst) {
            return Err(SyncError::remote("list add rejected"));
        }
        self.added.lock().unwrap().push((list_id, media_id));
        Ok(())
    }

    async fn remove_list_item(
        &self,
        _session: &SessionToken,
        list_id: i32,
        media_id: i32,
    ) -> Result<(), SyncError> {
        if self.fail_remove_item.load(Ordering::SeqCst) {
            return Err(SyncError::remote("list remove rejected"));
        }
        self.removed.lock().unwrap().push((list_id, media_id));
        Ok(())
    }

    async fn discover(
        &self,
        _kind: MediaKind,
        _genre_id: i32,
        page: u32,
    ) -> Result<Page, SyncError> {
        Ok(Page {
            items: Vec::new(),
            page,
            total_pages: 1,
        })
    }

    async fn media_detail(&self, kind: MediaKind, media_id: i32) -> Result<MediaItem, SyncError> {
        Ok(MediaItem::stub(media_id, kind))
    }
}

#[derive(Default)]
struct MemStore(Mutex<HashMap<String, String>>);

impl KvStore for MemStore {
    fn get(&self, key: &str) -> Option<String> {
        self.0.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.0
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSink {
    delivered: Mutex<Vec<ReleaseNotice>>,
}

#[async_trait::async_trait]
impl NotifySink for RecordingSink {
    async fn deliver(&self, notice: &ReleaseNotice) -> Result<(), SyncError> {
        self.delivered.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

fn dated(id: i32, title: &str, date: &str) -> MediaItem {
    MediaItem {
        title: title.to_string(),
        release_date: Some(date.to_string()),
        ..MediaItem::stub(id, MediaKind::Movie)
    }
}

fn theatre_list(id: i32, item_count: u32) -> ListInfo {
    ListInfo {
        id,
        name: THEATRE_LIST_NAME.to_string(),
        item_count,
    }
}

fn signed_in() -> Arc<SessionStore> {
    Arc::new(SessionStore::new(SessionToken {
        account_id: "84".to_string(),
        session_id: "session-1".to_string(),
        expires_at: None,
    }))
}

fn logged_out() -> Arc<SessionStore> {
    Arc::new(SessionStore::new(SessionToken {
        account_id: String::new(),
        session_id: "session-1".to_string(),
        expires_at: None,
    }))
}

fn app_with(
    catalog: Arc<FakeCatalog>,
    store: Arc<MemStore>,
    session: Arc<SessionStore>,
) -> (Router, AppState, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let scheduler = Arc::new(ReleaseScheduler::new(sink.clone()));
    let favorites = Arc::new(Favorites::new(catalog.clone(), session.clone()));
    let alerts = Arc::new(Alerts::new(
        catalog.clone(),
        session.clone(),
        store,
        scheduler.clone(),
    ));
    let discover = Arc::new(DiscoverFeed::new(catalog.clone()));
    let state = AppState {
        catalog,
        session,
        favorites,
        alerts,
        discover,
        scheduler,
        api_token: API_TOKEN.to_string(),
    };
    (build_router(state.clone()), state, sink)
}

fn authed_post(uri: &str, payload: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", API_TOKEN))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

fn authed_get(uri: &str) -> Request<Body> {
    Request::get(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", API_TOKEN))
        .body(Body::empty())
        .unwrap()
}

fn alert_payload(media_id: i32, title: &str, date: &str) -> serde_json::Value {
    json!({
        "media_id": media_id,
        "title": title,
        "release_date": date,
        "kind": "movie",
    })
}

async fn wait_for_added_count(catalog: &FakeCatalog, expected: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let seen = catalog.added.lock().unwrap().len();
        if seen == expected {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("expected {} list additions, saw {}", expected, seen);
        }
        tokio::task::yield_now().await;
    }
}

async fn wait_for_removed_count(catalog: &FakeCatalog, expected: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let seen = catalog.removed.lock().unwrap().len();
        if seen == expected {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("expected {} list removals, saw {}", expected, seen);
        }
        tokio::task::yield_now().await;
    }
}

async fn wait_for_alert_ids(alerts: &Alerts, expected: &[i32]) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let (rows, _) = alerts.snapshot().await;
        let ids: Vec<i32> = rows.iter().map(|a| a.media_id).collect();
        if ids == expected {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("expected alerts {:?}, saw {:?}", expected, ids);
        }
        tokio::task::yield_now().await;
    }
}

async fn wait_for_notice_count(sink: &RecordingSink, expected: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let seen = sink.delivered.lock().unwrap().len();
        if seen == expected {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("expected {} delivered notices, saw {}", expected, seen);
        }
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn reconciliation_only_ever_adds() {
    let catalog = Arc::new(FakeCatalog::default());
    *catalog.lists.lock().unwrap() = vec![theatre_list(9, 2)];
    catalog.items.lock().unwrap().insert(
        9,
        vec![
            dated(111, "Seen It", "2031-01-01"),
            dated(222, "New One", "2031-02-01"),
        ],
    );
    let (app, state, _sink) = app_with(catalog.clone(), Arc::new(MemStore::default()), signed_in());

    let res = app
        .clone()
        .oneshot(authed_post(
            "/alerts/add",
            alert_payload(111, "Seen It", "2031-01-01"),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    wait_for_added_count(&catalog, 1).await;

    let summary = state.alerts.sync_with_theatre().await.unwrap();
    assert_eq!(summary.added, 1, "only the unseen remote row comes in");
    assert_eq!(summary.total, 2);
    assert_eq!(summary.dropped_incomplete, 0);
    assert_eq!(summary.duplicates_seen, 0);

    wait_for_alert_ids(&state.alerts, &[111, 222]).await;
    assert_eq!(state.scheduler.active_ids().await, vec![111, 222]);

    // A second pass finds nothing new.
    let summary = state.alerts.sync_with_theatre().await.unwrap();
    assert_eq!(summary.added, 0);
    assert_eq!(summary.total, 2);
}

#[tokio::test]
async fn newest_duplicate_list_wins() {
    let catalog = Arc::new(FakeCatalog::default());
    *catalog.lists.lock().unwrap() = vec![
        theatre_list(5, 1),
        theatre_list(9, 1),
        ListInfo {
            id: 7,
            name: "Watchlist".to_string(),
            item_count: 3,
        },
    ];
    catalog
        .items
        .lock()
        .unwrap()
        .insert(5, vec![dated(555, "Stale", "2031-01-01")]);
    catalog
        .items
        .lock()
        .unwrap()
        .insert(9, vec![dated(999, "Niner", "2031-03-01")]);
    let store = Arc::new(MemStore::default());
    let (_app, state, _sink) = app_with(catalog.clone(), store.clone(), signed_in());

    let summary = state.alerts.sync_with_theatre().await.unwrap();
    assert_eq!(summary.duplicates_seen, 1);
    assert_eq!(summary.added, 1);

    let (rows, _) = state.alerts.snapshot().await;
    let ids: Vec<i32> = rows.iter().map(|a| a.media_id).collect();
    assert_eq!(ids, vec![999], "rows come from the newest carrier only");
    assert_eq!(store.get("theatre_list_id"), Some("9".to_string()));
}

#[tokio::test]
async fn incomplete_rows_are_counted_not_imported() {
    let catalog = Arc::new(FakeCatalog::default());
    *catalog.lists.lock().unwrap() = vec![theatre_list(9, 3)];
    catalog.items.lock().unwrap().insert(
        9,
        vec![
            dated(1, "Dated", "2031-01-01"),
            MediaItem {
                title: "No Date".to_string(),
                ..MediaItem::stub(2, MediaKind::Movie)
            },
            MediaItem {
                release_date: Some("2031-01-01".to_string()),
                ..MediaItem::stub(3, MediaKind::Movie)
            },
        ],
    );
    let (_app, state, _sink) = app_with(catalog.clone(), Arc::new(MemStore::default()), signed_in());

    let summary = state.alerts.sync_with_theatre().await.unwrap();
    assert_eq!(summary.added, 1);
    assert_eq!(summary.dropped_incomplete, 2);
    assert_eq!(summary.total, 3);

    let (rows, _) = state.alerts.snapshot().await;
    let ids: Vec<i32> = rows.iter().map(|a| a.media_id).collect();
    assert_eq!(ids, vec![1]);
}

#[tokio::test]
async fn sync_without_a_session_fails_loudly() {
    let catalog = Arc::new(FakeCatalog::default());
    let (app, state, _sink) = app_with(catalog, Arc::new(MemStore::default()), logged_out());

    let res = app.clone().oneshot(authed_post("/alerts/sync", json!({}))).await.unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let (_, error) = state.alerts.snapshot().await;
    assert!(error.is_some());
}

#[tokio::test]
async fn concurrent_adds_create_the_list_once() {
    let catalog = Arc::new(FakeCatalog::default());
    let (app, _state, _sink) = app_with(catalog.clone(), Arc::new(MemStore::default()), signed_in());

    let res = app
        .clone()
        .oneshot(authed_post("/alerts/add", alert_payload(1, "One", "2031-01-01")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let res = app
        .clone()
        .oneshot(authed_post("/alerts/add", alert_payload(2, "Two", "2031-02-01")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    wait_for_added_count(&catalog, 2).await;
    let created = catalog.created.lock().unwrap().clone();
    assert_eq!(created, vec![THEATRE_LIST_NAME.to_string()]);
    let added = catalog.added.lock().unwrap().clone();
    assert_eq!(added, vec![(900, 1), (900, 2)]);
}

#[tokio::test]
async fn past_dated_alert_notifies_straight_away() {
    let catalog = Arc::new(FakeCatalog::default());
    *catalog.lists.lock().unwrap() = vec![theatre_list(9, 0)];
    let (app, _state, sink) = app_with(catalog.clone(), Arc::new(MemStore::default()), signed_in());

    let res = app
        .clone()
        .oneshot(authed_post(
            "/alerts/add",
            alert_payload(603, "Old Film", "1999-03-31"),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    wait_for_notice_count(&sink, 1).await;
    let delivered = sink.delivered.lock().unwrap().clone();
    assert_eq!(
        delivered,
        vec![ReleaseNotice {
            media_id: 603,
            title: "Old Film".to_string(),
            poster: String::new(),
            kind: MediaKind::Movie,
        }]
    );
}

#[tokio::test]
async fn failed_remote_add_reverts_alert_and_trigger() {
    let catalog = Arc::new(FakeCatalog::default());
    *catalog.lists.lock().unwrap() = vec![theatre_list(9, 0)];
    catalog.fail_add_item.store(true, Ordering::SeqCst);
    let (app, state, _sink) = app_with(catalog.clone(), Arc::new(MemStore::default()), signed_in());

    let res = app
        .clone()
        .oneshot(authed_post("/alerts/add", alert_payload(42, "Doomed", "2031-01-01")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    wait_for_alert_ids(&state.alerts, &[]).await;
    let (_, error) = state.alerts.snapshot().await;
    assert!(error.is_some(), "a failed list write must leave a visible error");
    assert!(state.scheduler.active_ids().await.is_empty());
}

#[tokio::test]
async fn failed_remote_remove_restores_alert_and_trigger() {
    let catalog = Arc::new(FakeCatalog::default());
    *catalog.lists.lock().unwrap() = vec![theatre_list(9, 1)];
    catalog
        .items
        .lock()
        .unwrap()
        .insert(9, vec![dated(42, "Kept", "2031-01-01")]);
    let (app, state, _sink) = app_with(catalog.clone(), Arc::new(MemStore::default()), signed_in());

    state.alerts.sync_with_theatre().await.unwrap();
    wait_for_alert_ids(&state.alerts, &[42]).await;

    catalog.fail_remove_item.store(true, Ordering::SeqCst);
    let res = app
        .clone()
        .oneshot(authed_post("/alerts/remove", json!({ "media_id": 42 })))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    // The optimistic removal comes back once the remote write fails.
    wait_for_alert_ids(&state.alerts, &[42]).await;
    let (_, error) = state.alerts.snapshot().await;
    assert!(error.is_some());
    assert_eq!(state.scheduler.active_ids().await, vec![42]);
}

#[tokio::test]
async fn remove_clears_the_remote_row_and_trigger() {
    let catalog = Arc::new(FakeCatalog::default());
    *catalog.lists.lock().unwrap() = vec![theatre_list(9, 1)];
    catalog
        .items
        .lock()
        .unwrap()
        .insert(9, vec![dated(42, "Kept", "2031-01-01")]);
    let (app, state, _sink) = app_with(catalog.clone(), Arc::new(MemStore::default()), signed_in());

    state.alerts.sync_with_theatre().await.unwrap();
    wait_for_alert_ids(&state.alerts, &[42]).await;

    let res = app
        .clone()
        .oneshot(authed_post("/alerts/remove", json!({ "media_id": 42 })))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    wait_for_removed_count(&catalog, 1).await;
    assert_eq!(catalog.removed.lock().unwrap().clone(), vec![(9, 42)]);
    wait_for_alert_ids(&state.alerts, &[]).await;
    assert!(state.scheduler.active_ids().await.is_empty());
    let (_, error) = state.alerts.snapshot().await;
    assert_eq!(error, None);
}

#[tokio::test]
async fn list_id_survives_a_restart() {
    let catalog = Arc::new(FakeCatalog::default());
    *catalog.lists.lock().unwrap() = vec![theatre_list(9, 0)];
    let store = Arc::new(MemStore::default());

    let (_app, state, _sink) = app_with(catalog.clone(), store.clone(), signed_in());
    state.alerts.sync_with_theatre().await.unwrap();
    assert_eq!(catalog.list_walks.load(Ordering::SeqCst), 1);

    // A fresh engine over the same store skips the account-list walk.
    let (_app, state, _sink) = app_with(catalog.clone(), store.clone(), signed_in());
    state.alerts.sync_with_theatre().await.unwrap();
    assert_eq!(catalog.list_walks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn adding_twice_keeps_one_alert() {
    let catalog = Arc::new(FakeCatalog::default());
    *catalog.lists.lock().unwrap() = vec![theatre_list(9, 0)];
    let (app, state, _sink) = app_with(catalog.clone(), Arc::new(MemStore::default()), signed_in());

    let payload = alert_payload(603, "Once", "2031-01-01");
    for _ in 0..2 {
        let res = app
            .clone()
            .oneshot(authed_post("/alerts/add", payload.clone()))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::ACCEPTED);
    }

    wait_for_added_count(&catalog, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(catalog.added.lock().unwrap().len(), 1);
    wait_for_alert_ids(&state.alerts, &[603]).await;
}

#[tokio::test]
async fn alert_endpoints_answer_over_http() {
    let catalog = Arc::new(FakeCatalog::default());
    *catalog.lists.lock().unwrap() = vec![theatre_list(9, 0)];
    catalog
        .items
        .lock()
        .unwrap()
        .insert(9, vec![dated(7, "Soon", "2031-06-01")]);
    let (app, _state, _sink) = app_with(catalog.clone(), Arc::new(MemStore::default()), signed_in());

    let res = app.clone().oneshot(authed_post("/alerts/sync", json!({}))).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app.clone().oneshot(authed_get("/alerts")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}
