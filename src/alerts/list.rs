use crate::catalog::CatalogApi;
use crate::error::SyncError;
use crate::session::SessionToken;
use crate::store::KvStore;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const THEATRE_LIST_NAME: &str = "Theatre Notifications";
const THEATRE_LIST_DESCRIPTION: &str = "Managed by marquee: titles watched for release alerts";
const STORE_KEY: &str = "theatre_list_id";

/// Durable slot for the canonical list id. Read once at construction,
/// written through on every successful lookup or create.
pub struct ListIdRepo {
    store: Arc<dyn KvStore>,
    cached: std::sync::Mutex<Option<i32>>,
}

impl ListIdRepo {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        let cached = store.get(STORE_KEY).and_then(|v| v.parse().ok());
        Self {
            store,
            cached: std::sync::Mutex::new(cached),
        }
    }

    pub fn get(&self) -> Option<i32> {
        *self.cached.lock().expect("list id lock poisoned")
    }

    pub fn set(&self, id: i32) {
        *self.cached.lock().expect("list id lock poisoned") = Some(id);
        // A write failure costs a re-lookup after restart, nothing more.
        if let Err(e) = self.store.set(STORE_KEY, &id.to_string()) {
            warn!("Persisting notification list id failed: {}", e);
        }
    }
}

/// What `ensure` learned while resolving the canonical list.
#[derive(Debug, Clone, Copy)]
pub struct EnsureOutcome {
    pub list_id: i32,
    pub duplicates_seen: u32,
}

/// The one remote list that holds alert memberships. `ensure` resolves its
/// id through the cached slot, then a by-name walk of the account lists,
/// then a create. The whole lookup-or-create is single-flight so concurrent
/// first calls cannot race a duplicate list into existence.
pub struct TheatreList {
    catalog: Arc<dyn CatalogApi>,
    repo: ListIdRepo,
    ensure_flight: Mutex<()>,
}

impl TheatreList {
    pub fn new(catalog: Arc<dyn CatalogApi>, store: Arc<dyn KvStore>) -> Self {
        Self {
            catalog,
            repo: ListIdRepo::new(store),
            ensure_flight: Mutex::new(()),
        }
    }

    pub fn cached_id(&self) -> Option<i32> {
        self.repo.get()
    }

    pub async fn ensure(&self, session: &SessionToken) -> Result<EnsureOutcome, SyncError> {
        let _flight = self.ensure_flight.lock().await;
        if let Some(list_id) = self.repo.get() {
            return Ok(EnsureOutcome {
                list_id,
                duplicates_seen: 0,
            });
        }
        let (found, duplicates_seen) = self.find_by_name(session).await?;
        if let Some(list_id) = found {
            self.repo.set(list_id);
            return Ok(EnsureOutcome {
                list_id,
                duplicates_seen,
            });
        }
        let list_id = self
            .catalog
            .create_list(session, THEATRE_LIST_NAME, THEATRE_LIST_DESCRIPTION)
            .await?;
        info!("Created notification list {}", list_id);
        self.repo.set(list_id);
        Ok(EnsureOutcome {
            list_id,
            duplicates_seen,
        })
    }

    /// Walk the account lists and pick the canonical carrier of the reserved
    /// name: the one with the highest id. Extra carriers are an inconsistency
    /// worth a warning, never a failure.
    async fn find_by_name(
        &self,
        session: &SessionToken,
    ) -> Result<(Option<i32>, u32), SyncError> {
        let mut matches: Vec<i32> = Vec::new();
        let mut page = 1;
        loop {
            let batch = self.catalog.account_lists(session, page).await?;
            for list in &batch.lists {
                if list.name == THEATRE_LIST_NAME {
                    matches.push(list.id);
                }
            }
            if batch.lists.is_empty() || batch.page >= batch.total_pages {
                break;
            }
            page += 1;
        }
        let duplicates_seen = matches.len().saturating_sub(1) as u32;
        if duplicates_seen > 0 {
            warn!(
                "Found {} lists named '{}'; keeping the newest",
                matches.len(),
                THEATRE_LIST_NAME
            );
        }
        Ok((matches.into_iter().max(), duplicates_seen))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::collections::HashMap;

    struct MemStore(std::sync::Mutex<HashMap<String, String>>);

    impl MemStore {
        fn new() -> Arc<Self> {
            Arc::new(Self(std::sync::Mutex::new(HashMap::new())))
        }
    }

    impl KvStore for MemStore {
        fn get(&self, key: &str) -> Option<String> {
            self.0.lock().unwrap().get(key).cloned()
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            self.0
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }
    }

    #[test]
    fn repo_reads_the_slot_at_construction() {
        let store = MemStore::new();
        store.set(STORE_KEY, "8254129").unwrap();
        let repo = ListIdRepo::new(store);
        assert_eq!(repo.get(), Some(8254129));
    }

    #[test]
    fn set_writes_through_to_the_store() {
        let store = MemStore::new();
        let repo = ListIdRepo::new(store.clone());
        repo.set(41);
        assert_eq!(store.get(STORE_KEY).as_deref(), Some("41"));
        let reread = ListIdRepo::new(store);
        assert_eq!(reread.get(), Some(41));
    }

    #[test]
    fn garbage_in_the_slot_reads_as_empty() {
        let store = MemStore::new();
        store.set(STORE_KEY, "not-a-number").unwrap();
        assert_eq!(ListIdRepo::new(store).get(), None);
    }
}
