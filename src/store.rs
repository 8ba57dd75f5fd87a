use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;

/// Minimal persisted key-value slot storage. The core keeps exactly one
/// durable value in here (the canonical notification-list id), so the trait
/// stays string-to-string and synchronous.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// One JSON object in one file. Loaded once at open; every `set` rewrites
/// the file so values survive restarts.
pub struct FileStore {
    path: PathBuf,
    map: Mutex<HashMap<String, String>>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let map = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(map) => map,
                Err(e) => {
                    warn!(
                        "State file {} is not valid JSON ({}), starting empty",
                        path.display(),
                        e
                    );
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read state file {}", path.display()))
            }
        };
        Ok(Self {
            path,
            map: Mutex::new(map),
        })
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.map
            .lock()
            .expect("state map lock poisoned")
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let serialized = {
            let mut map = self.map.lock().expect("state map lock poisoned");
            map.insert(key.to_string(), value.to_string());
            serde_json::to_string_pretty(&*map).context("failed to serialize state map")?
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create state directory {}", parent.display())
                })?;
            }
        }
        fs::write(&self.path, serialized)
            .with_context(|| format!("failed to write state file {}", self.path.display()))
    }
}
