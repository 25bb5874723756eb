//! Key-value storage medium
//!
//! The credential store never touches a concrete medium directly; it talks to
//! a `KeyValueStore`. `MemoryStore` keeps entries in process (tests, one-shot
//! sessions). `FileStore` keeps a flat JSON object on disk so a session
//! survives restarts. Both serialize writers with a tokio Mutex.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Boxed future returned by `KeyValueStore` methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Abstract persisted key-value medium.
///
/// A missing key is not an error: `get` returns `None`. Multi-key writes and
/// removals are applied as one unit so readers never observe half a
/// credential pair.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn KeyValueStore>`).
pub trait KeyValueStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

    fn set_many<'a>(&'a self, entries: Vec<(&'a str, String)>) -> StoreFuture<'a, ()>;

    fn remove_many<'a>(&'a self, keys: &'a [&'a str]) -> StoreFuture<'a, ()>;
}

/// In-process medium. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every entry currently held.
    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.entries.lock().await.clone()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move { Ok(self.entries.lock().await.get(key).cloned()) })
    }

    fn set_many<'a>(&'a self, entries: Vec<(&'a str, String)>) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.entries.lock().await;
            for (key, value) in entries {
                state.insert(key.to_string(), value);
            }
            Ok(())
        })
    }

    fn remove_many<'a>(&'a self, keys: &'a [&'a str]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.entries.lock().await;
            for key in keys {
                state.remove(*key);
            }
            Ok(())
        })
    }
}

/// JSON-file medium.
///
/// The whole object is loaded at open and rewritten on every mutation using
/// an atomic temp-file + rename. Reads are served from memory, which only
/// changes once the file write has succeeded.
pub struct FileStore {
    path: PathBuf,
    state: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`.
    ///
    /// If the file doesn't exist, creates it as `{}` (cold start, logged out).
    pub async fn open(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading session file: {e}")))?;
            let entries: HashMap<String, String> = serde_json::from_str(&contents)
                .map_err(|e| Error::StorageParse(format!("parsing session file: {e}")))?;
            info!(path = %path.display(), keys = entries.len(), "opened session store");
            entries
        } else {
            info!(path = %path.display(), "session file not found, starting logged out");
            if let Some(dir) = path.parent()
                && !dir.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|e| Error::Io(format!("creating session directory: {e}")))?;
            }
            let entries = HashMap::new();
            write_atomic(&path, &entries).await?;
            entries
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for FileStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move { Ok(self.state.lock().await.get(key).cloned()) })
    }

    fn set_many<'a>(&'a self, entries: Vec<(&'a str, String)>) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let mut staged = state.clone();
            for (key, value) in entries {
                staged.insert(key.to_string(), value);
            }
            write_atomic(&self.path, &staged).await?;
            *state = staged;
            Ok(())
        })
    }

    fn remove_many<'a>(&'a self, keys: &'a [&'a str]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let mut staged = state.clone();
            for key in keys {
                staged.remove(*key);
            }
            if staged.len() == state.len() {
                return Ok(());
            }
            write_atomic(&self.path, &staged).await?;
            *state = staged;
            Ok(())
        })
    }
}

/// Write the entry map to `path` atomically.
///
/// Writes a temporary file in the same directory, then renames it over the
/// target. Permissions are 0600 on unix since the file holds bearer tokens.
async fn write_atomic(path: &Path, data: &HashMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::StorageParse(format!("serializing session file: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("session path has no parent directory".into()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("session.json");

    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp session file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting session file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp session file: {e}")))?;

    debug!(path = %path.display(), keys = data.len(), "persisted session store");
    Ok(())
}
