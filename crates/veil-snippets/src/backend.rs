//! Snippet storage backends.
//!
//! Two implementations:
//!   - **Memory** (default): a `RwLock<HashMap>`; contents vanish with the process.
//!   - **JSON**: loads entirely into memory, flushed atomically via temp+rename
//!     after every mutation; safe to share between processes.
//!
//! Both implement `SnippetBackend`, so the store can use either transparently.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use veil_core::api::SnippetBody;
use veil_core::{VeilError, VeilResult};

/// Key/value storage for snippet records.
///
/// `insert_if_absent` must be atomic with respect to concurrent callers: of
/// two inserts for the same id, exactly one returns `true`.
pub trait SnippetBackend: Send + Sync {
    /// Store `body` under `id` unless the id is taken. Returns whether it was stored.
    fn insert_if_absent(&self, id: &str, body: SnippetBody) -> VeilResult<bool>;
    fn get(&self, id: &str) -> VeilResult<Option<SnippetBody>>;
    /// Remove every record older than `ttl_secs` at time `now`. Returns the count removed.
    fn remove_expired(&self, now: u64, ttl_secs: u64) -> VeilResult<usize>;
    fn len(&self) -> VeilResult<usize>;

    fn is_empty(&self) -> VeilResult<bool> {
        Ok(self.len()? == 0)
    }
}

pub(crate) fn is_expired(body: &SnippetBody, now: u64, ttl_secs: u64) -> bool {
    now.saturating_sub(body.created_at) > ttl_secs
}

fn poisoned<T>(_: T) -> VeilError {
    VeilError::Storage("snippet table lock poisoned".into())
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, SnippetBody>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnippetBackend for MemoryBackend {
    fn insert_if_absent(&self, id: &str, body: SnippetBody) -> VeilResult<bool> {
        let mut map = self.entries.write().map_err(poisoned)?;
        if map.contains_key(id) {
            return Ok(false);
        }
        map.insert(id.to_string(), body);
        Ok(true)
    }

    fn get(&self, id: &str) -> VeilResult<Option<SnippetBody>> {
        let map = self.entries.read().map_err(poisoned)?;
        Ok(map.get(id).cloned())
    }

    fn remove_expired(&self, now: u64, ttl_secs: u64) -> VeilResult<usize> {
        let mut map = self.entries.write().map_err(poisoned)?;
        let before = map.len();
        map.retain(|_, body| !is_expired(body, now, ttl_secs));
        Ok(before - map.len())
    }

    fn len(&self) -> VeilResult<usize> {
        Ok(self.entries.read().map_err(poisoned)?.len())
    }
}

/// JSON-file backed snippet table.
///
/// Several processes may share one table (the daemon and any number of CLI
/// runs). Every mutation holds an exclusive lock on `<table>.lock`, reloads
/// the table from disk, applies its change and writes through a unique temp
/// file, so concurrent writers never lose each other's records.
#[derive(Debug)]
pub struct JsonFileBackend {
    path: PathBuf,
    lock_path: PathBuf,
    entries: Mutex<HashMap<String, SnippetBody>>,
}

impl JsonFileBackend {
    /// Open or create a table at `path`. Records that fail validation are
    /// dropped with a warning.
    pub fn open(path: &Path) -> VeilResult<Self> {
        let entries = load_table(path)?;
        let mut lock_name = path.as_os_str().to_owned();
        lock_name.push(".lock");

        Ok(Self {
            path: path.to_path_buf(),
            lock_path: PathBuf::from(lock_name),
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Run `mutate` against the on-disk table under the cross-process lock,
    /// then persist the result when `mutate` reports a change.
    fn locked_update<T>(
        &self,
        mutate: impl FnOnce(&mut HashMap<String, SnippetBody>) -> (T, bool),
    ) -> VeilResult<T> {
        let parent = self.parent_dir();
        std::fs::create_dir_all(&parent)
            .map_err(|e| VeilError::Storage(format!("creating {}: {e}", parent.display())))?;

        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| {
                VeilError::Storage(format!("opening lock {}: {e}", self.lock_path.display()))
            })?;
        let mut lock = fd_lock::RwLock::new(lock_file);
        let _guard = lock.write().map_err(|e| {
            VeilError::Storage(format!("locking {}: {e}", self.lock_path.display()))
        })?;

        let mut map = self.entries.lock().map_err(poisoned)?;
        let mut current = load_table(&self.path)?;
        let (out, changed) = mutate(&mut current);
        if changed {
            self.flush(&current)?;
        }
        *map = current;
        Ok(out)
    }

    /// Atomic write: unique temp file in the same directory, then rename.
    fn flush(&self, entries: &HashMap<String, SnippetBody>) -> VeilResult<()> {
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| VeilError::Storage(format!("serializing snippet table: {e}")))?;

        let mut tmp = tempfile::NamedTempFile::new_in(self.parent_dir())
            .map_err(|e| VeilError::Storage(format!("creating snippet table temp: {e}")))?;
        tmp.write_all(json.as_bytes())
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| VeilError::Storage(format!("writing snippet table temp: {e}")))?;
        tmp.persist(&self.path).map_err(|e| {
            VeilError::Storage(format!("renaming snippet table {}: {}", self.path.display(), e.error))
        })?;

        tracing::debug!(path = %self.path.display(), entries = entries.len(), "flushed snippet table");
        Ok(())
    }
}

fn load_table(path: &Path) -> VeilResult<HashMap<String, SnippetBody>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content = std::fs::read_to_string(path).map_err(|e| {
        VeilError::Storage(format!("reading snippet table {}: {e}", path.display()))
    })?;
    let entries: HashMap<String, SnippetBody> = serde_json::from_str(&content).map_err(|e| {
        VeilError::Storage(format!("parsing snippet table {}: {e}", path.display()))
    })?;

    Ok(entries
        .into_iter()
        .filter(|(id, body)| match body.validate() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(id = %id, "dropping invalid snippet record: {e}");
                false
            }
        })
        .collect())
}

impl SnippetBackend for JsonFileBackend {
    fn insert_if_absent(&self, id: &str, body: SnippetBody) -> VeilResult<bool> {
        self.locked_update(|map| {
            if map.contains_key(id) {
                return (false, false);
            }
            map.insert(id.to_string(), body);
            (true, true)
        })
    }

    fn get(&self, id: &str) -> VeilResult<Option<SnippetBody>> {
        let mut map = self.entries.lock().map_err(poisoned)?;
        if let Some(body) = map.get(id) {
            return Ok(Some(body.clone()));
        }
        // another process may have written it since we last loaded
        *map = load_table(&self.path)?;
        Ok(map.get(id).cloned())
    }

    fn remove_expired(&self, now: u64, ttl_secs: u64) -> VeilResult<usize> {
        self.locked_update(|map| {
            let before = map.len();
            map.retain(|_, body| !is_expired(body, now, ttl_secs));
            let removed = before - map.len();
            (removed, removed > 0)
        })
    }

    fn len(&self) -> VeilResult<usize> {
        Ok(self.entries.lock().map_err(poisoned)?.len())
    }
}
