pub mod list;
pub mod notify;
pub mod schedule;

use crate::catalog::CatalogApi;
use crate::error::SyncError;
use crate::media::Alert;
use crate::pager::drain;
use crate::session::{SessionStore, SessionToken};
use crate::store::KvStore;
use list::TheatreList;
use schedule::ReleaseScheduler;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Counters from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SyncSummary {
    pub added: u32,
    pub dropped_incomplete: u32,
    pub duplicates_seen: u32,
    pub total: u32,
}

/// Alert state container. The local collection is the working copy; the
/// remote notification list is the durable one, and reconciliation only ever
/// adds locally.
pub struct Alerts {
    catalog: Arc<dyn CatalogApi>,
    session: Arc<SessionStore>,
    theatre: TheatreList,
    scheduler: Arc<ReleaseScheduler>,
    alerts: Mutex<Vec<Alert>>,
    error: Mutex<Option<String>>,
}

impl Alerts {
    pub fn new(
        catalog: Arc<dyn CatalogApi>,
        session: Arc<SessionStore>,
        store: Arc<dyn KvStore>,
        scheduler: Arc<ReleaseScheduler>,
    ) -> Self {
        Self {
            theatre: TheatreList::new(Arc::clone(&catalog), store),
            catalog,
            session,
            scheduler,
            alerts: Mutex::new(Vec::new()),
            error: Mutex::new(None),
        }
    }

    pub async fn snapshot(&self) -> (Vec<Alert>, Option<String>) {
        let alerts = self.alerts.lock().await.clone();
        let error = self.error.lock().await.clone();
        (alerts, error)
    }

    /// Watch a title. The alert and its trigger exist locally before the
    /// remote membership is confirmed; one alert per media id.
    pub async fn add(self: Arc<Self>, alert: Alert) {
        {
            let mut alerts = self.alerts.lock().await;
            if alerts.iter().any(|a| a.media_id == alert.media_id) {
                return;
            }
            alerts.push(alert.clone());
        }
        if let Err(e) = self.scheduler.schedule(&alert).await {
            // The alert stays; only its timer is missing.
            warn!("Trigger for {} not armed: {}", alert.media_id, e);
            self.set_error(Some(e.to_string())).await;
        }
        let this = Arc::clone(&self);
        tokio::spawn(async move { this.confirm_add(alert).await });
    }

    /// Stop watching a title. Trigger and local alert go at once; removing
    /// an unknown id is a no-op.
    pub async fn remove(self: Arc<Self>, media_id: i32) {
        let (alert, index) = {
            let mut alerts = self.alerts.lock().await;
            match alerts.iter().position(|a| a.media_id == media_id) {
                None => return,
                Some(index) => (alerts.remove(index), index),
            }
        };
        self.scheduler.cancel(media_id).await;
        let this = Arc::clone(&self);
        tokio::spawn(async move { this.confirm_remove(alert, index).await });
    }

    /// Reconcile the local collection with the remote notification list.
    pub async fn sync_with_theatre(&self) -> Result<SyncSummary, SyncError> {
        let token = match self.session.current() {
            None => {
                let e = SyncError::remote("no active session");
                self.set_error(Some(e.to_string())).await;
                return Err(e);
            }
            Some(t) => t,
        };
        match self.reconcile(&token).await {
            Ok(summary) => {
                info!(
                    "Alert sync: {} added, {} dropped, {} duplicate list(s), {} total",
                    summary.added,
                    summary.dropped_incomplete,
                    summary.duplicates_seen,
                    summary.total
                );
                self.set_error(None).await;
                Ok(summary)
            }
            Err(e) => {
                warn!("Alert sync failed: {}", e);
                self.set_error(Some(e.to_string())).await;
                Err(e)
            }
        }
    }

    async fn reconcile(&self, token: &SessionToken) -> Result<SyncSummary, SyncError> {
        let outcome = self.theatre.ensure(token).await?;
        let rows = drain(|page| self.catalog.list_items(outcome.list_id, page)).await?;

        let mut summary = SyncSummary {
            duplicates_seen: outcome.duplicates_seen,
            ..SyncSummary::default()
        };
        let mut appended = Vec::new();
        {
            let mut alerts = self.alerts.lock().await;
            for row in rows {
                // A row the notification cannot be rendered from is dropped,
                // counted, and left for the remote list to keep.
                let date = match row.release_date {
                    Some(ref d) if !row.title.is_empty() => d.clone(),
                    _ => {
                        summary.dropped_incomplete += 1;
                        continue;
                    }
                };
                if alerts.iter().any(|a| a.media_id == row.id) {
                    continue;
                }
                let alert = Alert {
                    media_id: row.id,
                    title: row.title,
                    release_date: date,
                    poster: row.poster.unwrap_or_default(),
                    kind: row.kind,
                };
                alerts.push(alert.clone());
                appended.push(alert);
                summary.added += 1;
            }
            summary.total = alerts.len() as u32;
        }
        for alert in &appended {
            if let Err(e) = self.scheduler.schedule(alert).await {
                warn!("Trigger for {} not armed: {}", alert.media_id, e);
            }
        }
        Ok(summary)
    }

    async fn confirm_add(self: Arc<Self>, alert: Alert) {
        let token = match self.session.current() {
            // Local-only while logged out.
            None => return,
            Some(t) => t,
        };
        let result = async {
            let outcome = self.theatre.ensure(&token).await?;
            self.catalog
                .add_list_item(&token, outcome.list_id, alert.media_id)
                .await
        }
        .await;
        if let Err(e) = result {
            warn!(
                "Adding {} to the notification list failed: {}",
                alert.media_id, e
            );
            self.alerts
                .lock()
                .await
                .retain(|a| a.media_id != alert.media_id);
            self.scheduler.cancel(alert.media_id).await;
            self.set_error(Some(e.to_string())).await;
        }
    }

    async fn confirm_remove(self: Arc<Self>, alert: Alert, index: usize) {
        let token = match self.session.current() {
            None => return,
            Some(t) => t,
        };
        // Without a resolved list there is no remote membership to clear.
        let list_id = match self.theatre.cached_id() {
            None => return,
            Some(id) => id,
        };
        if let Err(e) = self
            .catalog
            .remove_list_item(&token, list_id, alert.media_id)
            .await
        {
            warn!(
                "Removing {} from the notification list failed: {}",
                alert.media_id, e
            );
            if let Err(arm) = self.scheduler.schedule(&alert).await {
                warn!("Trigger for {} not re-armed: {}", alert.media_id, arm);
            }
            {
                let mut alerts = self.alerts.lock().await;
                let index = index.min(alerts.len());
                alerts.insert(index, alert);
            }
            self.set_error(Some(e.to_string())).await;
        }
    }

    async fn set_error(&self, message: Option<String>) {
        *self.error.lock().await = message;
    }
}
