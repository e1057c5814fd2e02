//! The snippet store: create, fetch, sweep

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;

use veil_core::api::SnippetBody;
use veil_core::config::{expand_tilde, StoreBackend, StoreConfig};
use veil_core::{VeilError, VeilResult};

use crate::backend::{is_expired, JsonFileBackend, MemoryBackend, SnippetBackend};
use crate::clock::{Clock, SystemClock};

/// A live snippet and its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    pub id: String,
    pub body: SnippetBody,
}

/// Result of looking an id up, before expiry is folded into "not found".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Live(Snippet),
    Expired,
    Missing,
}

pub struct SnippetStore {
    backend: Arc<dyn SnippetBackend>,
    clock: Arc<dyn Clock>,
    ttl_secs: u64,
    id_length: usize,
    max_snippet_bytes: usize,
    max_create_attempts: u32,
}

impl std::fmt::Debug for SnippetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnippetStore")
            .field("ttl_secs", &self.ttl_secs)
            .field("id_length", &self.id_length)
            .field("max_snippet_bytes", &self.max_snippet_bytes)
            .field("max_create_attempts", &self.max_create_attempts)
            .finish_non_exhaustive()
    }
}

impl SnippetStore {
    pub fn new(backend: Arc<dyn SnippetBackend>, config: &StoreConfig) -> Self {
        Self {
            backend,
            clock: Arc::new(SystemClock),
            ttl_secs: config.ttl_secs,
            id_length: config.id_length,
            max_snippet_bytes: config.max_snippet_bytes,
            max_create_attempts: config.max_create_attempts.max(1),
        }
    }

    /// Build a store with the backend named in `config`.
    pub fn open(config: &StoreConfig) -> VeilResult<Self> {
        let backend: Arc<dyn SnippetBackend> = match config.backend {
            StoreBackend::Memory => Arc::new(MemoryBackend::new()),
            StoreBackend::Json => {
                let path = expand_tilde(&config.path);
                tracing::info!(path = %path.display(), "opening JSON snippet table");
                Arc::new(JsonFileBackend::open(&path)?)
            }
        };
        Ok(Self::new(backend, config))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Store `encrypted_text` under a fresh id and return the id.
    ///
    /// The algorithm tag is stored exactly as given once it is known to be
    /// a cipher tag.
    pub fn create(&self, encrypted_text: &str, algorithm: &str) -> VeilResult<String> {
        if encrypted_text.is_empty() {
            return Err(VeilError::EmptyInput("encryptedText".into()));
        }
        if encrypted_text.len() > self.max_snippet_bytes {
            return Err(VeilError::InvalidSnippet(format!(
                "encryptedText is {} bytes, limit is {}",
                encrypted_text.len(),
                self.max_snippet_bytes
            )));
        }

        let body = SnippetBody {
            algorithm: algorithm.to_string(),
            encrypted_text: encrypted_text.to_string(),
            created_at: self.clock.now(),
        };
        body.validate()?;

        for attempt in 1..=self.max_create_attempts {
            let id = generate_id(self.id_length);
            if self.backend.insert_if_absent(&id, body.clone())? {
                tracing::debug!(id = %id, algorithm = %body.algorithm, attempt, "snippet created");
                return Ok(id);
            }
            tracing::warn!(attempt, "snippet id collision, retrying");
        }

        Err(VeilError::Storage(format!(
            "no free snippet id after {} attempts",
            self.max_create_attempts
        )))
    }

    pub fn lookup(&self, id: &str) -> VeilResult<Lookup> {
        if !is_well_formed_id(id) {
            return Ok(Lookup::Missing);
        }
        match self.backend.get(id)? {
            None => Ok(Lookup::Missing),
            Some(body) if is_expired(&body, self.clock.now(), self.ttl_secs) => Ok(Lookup::Expired),
            Some(body) => Ok(Lookup::Live(Snippet {
                id: id.to_string(),
                body,
            })),
        }
    }

    /// Fetch a live snippet. Absent and expired ids are both `SnippetNotFound`.
    pub fn fetch(&self, id: &str) -> VeilResult<Snippet> {
        match self.lookup(id)? {
            Lookup::Live(snippet) => Ok(snippet),
            Lookup::Expired | Lookup::Missing => Err(VeilError::SnippetNotFound),
        }
    }

    /// Physically remove expired records. Returns how many were removed.
    pub fn sweep(&self) -> VeilResult<usize> {
        let removed = self
            .backend
            .remove_expired(self.clock.now(), self.ttl_secs)?;
        if removed > 0 {
            tracing::info!(removed, "swept expired snippets");
        }
        Ok(removed)
    }

    pub fn len(&self) -> VeilResult<usize> {
        self.backend.len()
    }

    pub fn is_empty(&self) -> VeilResult<bool> {
        self.backend.is_empty()
    }
}

fn generate_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn is_well_formed_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 64 && id.bytes().all(|b| b.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const WEEK: u64 = 7 * 24 * 60 * 60;

    fn store_at(start: u64) -> (SnippetStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start));
        let store = SnippetStore::new(Arc::new(MemoryBackend::new()), &StoreConfig::default())
            .with_clock(clock.clone());
        (store, clock)
    }

    /// Reports a collision for the first `collisions` inserts.
    struct CollidingBackend {
        inner: MemoryBackend,
        collisions: AtomicU32,
    }

    impl SnippetBackend for CollidingBackend {
        fn insert_if_absent(&self, id: &str, body: SnippetBody) -> VeilResult<bool> {
            let left = self.collisions.load(Ordering::SeqCst);
            if left > 0 {
                self.collisions.store(left - 1, Ordering::SeqCst);
                return Ok(false);
            }
            self.inner.insert_if_absent(id, body)
        }
        fn get(&self, id: &str) -> VeilResult<Option<SnippetBody>> {
            self.inner.get(id)
        }
        fn remove_expired(&self, now: u64, ttl_secs: u64) -> VeilResult<usize> {
            self.inner.remove_expired(now, ttl_secs)
        }
        fn len(&self) -> VeilResult<usize> {
            self.inner.len()
        }
    }

    fn colliding_store(collisions: u32) -> SnippetStore {
        SnippetStore::new(
            Arc::new(CollidingBackend {
                inner: MemoryBackend::new(),
                collisions: AtomicU32::new(collisions),
            }),
            &StoreConfig::default(),
        )
    }

    #[test]
    fn create_then_fetch() {
        let (store, _) = store_at(1_700_000_000);
        let id = store.create("v1.AES-256.cipher", "AES-256").unwrap();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));

        let snippet = store.fetch(&id).unwrap();
        assert_eq!(snippet.id, id);
        assert_eq!(snippet.body.encrypted_text, "v1.AES-256.cipher");
        assert_eq!(snippet.body.algorithm, "AES-256");
        assert_eq!(snippet.body.created_at, 1_700_000_000);
    }

    #[test]
    fn algorithm_stored_verbatim() {
        let (store, _) = store_at(0);
        let id = store.create("ciphertext", "symmetric").unwrap();
        assert_eq!(store.fetch(&id).unwrap().body.algorithm, "symmetric");
    }

    #[test]
    fn unknown_id_not_found() {
        let (store, _) = store_at(0);
        store.create("ciphertext", "RSA").unwrap();
        assert!(matches!(store.fetch("AAAAAAAAAAAA"), Err(VeilError::SnippetNotFound)));
        assert!(matches!(store.fetch(""), Err(VeilError::SnippetNotFound)));
        assert!(matches!(store.fetch("../etc/passwd"), Err(VeilError::SnippetNotFound)));
    }

    #[test]
    fn expiry_boundary() {
        let (store, clock) = store_at(1_000);
        let id = store.create("ciphertext", "AES-256").unwrap();

        clock.advance(WEEK);
        assert!(store.fetch(&id).is_ok(), "exactly 7 days old is still live");

        clock.advance(1);
        assert!(matches!(store.fetch(&id), Err(VeilError::SnippetNotFound)));
        assert_eq!(store.lookup(&id).unwrap(), Lookup::Expired);
    }

    #[test]
    fn sweep_removes_only_expired() {
        let (store, clock) = store_at(0);
        let old = store.create("old", "AES-256").unwrap();
        clock.advance(WEEK);
        let fresh = store.create("fresh", "AES-256").unwrap();
        clock.advance(1);

        assert_eq!(store.sweep().unwrap(), 1);
        assert_eq!(store.lookup(&old).unwrap(), Lookup::Missing);
        assert!(store.fetch(&fresh).is_ok());
        assert_eq!(store.sweep().unwrap(), 0);
    }

    #[test]
    fn create_validation() {
        let (store, _) = store_at(0);
        assert!(matches!(store.create("", "AES-256"), Err(VeilError::EmptyInput(_))));
        assert!(matches!(store.create("x", "DES"), Err(VeilError::InvalidSnippet(_))));
        assert!(matches!(store.create("x", "SHA-256"), Err(VeilError::InvalidSnippet(_))));

        let big = "x".repeat(StoreConfig::default().max_snippet_bytes + 1);
        assert!(matches!(store.create(&big, "AES-256"), Err(VeilError::InvalidSnippet(_))));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn collision_is_retried() {
        let store = colliding_store(3);
        let id = store.create("ciphertext", "RSA").unwrap();
        assert!(store.fetch(&id).is_ok());
    }

    #[test]
    fn persistent_collisions_are_storage_failure() {
        let store = colliding_store(u32::MAX);
        assert!(matches!(
            store.create("ciphertext", "RSA"),
            Err(VeilError::Storage(_))
        ));
    }

    #[test]
    fn concurrent_creates_get_distinct_ids() {
        let (store, _) = store_at(0);
        let store = Arc::new(store);
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .map(|i| store.create(&format!("text-{t}-{i}"), "AES-256").unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<String> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 400);
        assert_eq!(store.len().unwrap(), 400);
    }

    proptest! {
        #[test]
        fn generated_ids_are_alphanumeric(len in 8usize..=64) {
            let id = generate_id(len);
            prop_assert_eq!(id.len(), len);
            prop_assert!(is_well_formed_id(&id));
        }
    }
}
