use crate::alerts::notify::NotifySink;
use crate::error::SyncError;
use crate::media::{Alert, ReleaseNotice};
use chrono::{DateTime, Local, NaiveDate, NaiveTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

// Timers sleep in bounded slices so long waits keep re-reading the clock.
const MAX_SLEEP_SLICE: Duration = Duration::from_secs(60 * 60);

/// One-shot wall-clock triggers keyed by media id. Each armed trigger is a
/// spawned task that waits for local midnight of the release date and hands
/// the notice to the sink.
pub struct ReleaseScheduler {
    sink: Arc<dyn NotifySink>,
    timers: Mutex<HashMap<i32, JoinHandle<()>>>,
}

impl ReleaseScheduler {
    pub fn new(sink: Arc<dyn NotifySink>) -> Self {
        Self {
            sink,
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Arm the trigger for an alert, replacing any timer already armed for
    /// the same media id. A date that cannot be parsed arms nothing.
    pub async fn schedule(&self, alert: &Alert) -> Result<(), SyncError> {
        let when = trigger_instant(&alert.release_date)?;
        let notice = ReleaseNotice::from(alert);
        let sink = Arc::clone(&self.sink);
        let media_id = alert.media_id;

        let mut timers = self.timers.lock().await;
        timers.retain(|_, t| !t.is_finished());
        if let Some(old) = timers.remove(&media_id) {
            old.abort();
        }
        info!(
            "Armed release trigger for {} {} at {}",
            alert.kind, media_id, when
        );
        let handle = tokio::spawn(async move {
            wait_until(when).await;
            if let Err(e) = sink.deliver(&notice).await {
                warn!("Release notice for {} failed: {}", media_id, e);
            }
        });
        timers.insert(media_id, handle);
        Ok(())
    }

    /// Disarm the trigger for a media id. Unknown ids are a no-op.
    pub async fn cancel(&self, media_id: i32) {
        let mut timers = self.timers.lock().await;
        timers.retain(|_, t| !t.is_finished());
        if let Some(handle) = timers.remove(&media_id) {
            handle.abort();
            info!("Cancelled release trigger for {}", media_id);
        }
    }

    /// Media ids with a live timer, sorted for stable output.
    pub async fn active_ids(&self) -> Vec<i32> {
        let mut timers = self.timers.lock().await;
        timers.retain(|_, t| !t.is_finished());
        let mut ids: Vec<i32> = timers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// UTC instant of local midnight on the release date.
fn trigger_instant(release_date: &str) -> Result<DateTime<Utc>, SyncError> {
    let date = NaiveDate::parse_from_str(release_date, "%Y-%m-%d")
        .map_err(|e| SyncError::Schedule(format!("bad release date '{release_date}': {e}")))?;
    let local = date
        .and_time(NaiveTime::MIN)
        .and_local_timezone(Local)
        .earliest()
        .ok_or_else(|| {
            SyncError::Schedule(format!("no valid local midnight on {release_date}"))
        })?;
    Ok(local.with_timezone(&Utc))
}

/// Sleep until the instant, re-checking the wall clock each slice. Past
/// instants return at once.
async fn wait_until(when: DateTime<Utc>) {
    loop {
        let remaining = when - Utc::now();
        if remaining <= chrono::Duration::zero() {
            return;
        }
        let slice = remaining
            .to_std()
            .unwrap_or(Duration::ZERO)
            .min(MAX_SLEEP_SLICE);
        tokio::time::sleep(slice).await;
    }
}
