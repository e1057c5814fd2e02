//! Integration tests for the snippet store over both backends.
//!
//! Verifies create → fetch, not-found for unknown ids, and expiry once the
//! clock moves past the TTL, including across a JSON table reopen.

use std::sync::Arc;
use tempfile::TempDir;
use veil_core::config::{StoreBackend, StoreConfig};
use veil_core::VeilError;
use veil_snippets::{Lookup, ManualClock, SnippetStore};

const SEVEN_DAYS: u64 = 604_800;
const START: u64 = 1_750_000_000;

fn json_config(dir: &TempDir) -> StoreConfig {
    StoreConfig {
        backend: StoreBackend::Json,
        path: dir.path().join("snippets.json"),
        ..StoreConfig::default()
    }
}

fn lifecycle(store: SnippetStore, clock: Arc<ManualClock>) {
    let id = store.create("v1.RSA..wrapped.nonce.tag.ct", "RSA").unwrap();
    let snippet = store.fetch(&id).unwrap();
    assert_eq!(snippet.body.encrypted_text, "v1.RSA..wrapped.nonce.tag.ct");
    assert_eq!(snippet.body.algorithm, "RSA");
    assert_eq!(snippet.body.created_at, START);

    assert!(matches!(store.fetch("zzzzzzzzzzzz"), Err(VeilError::SnippetNotFound)));

    clock.advance(SEVEN_DAYS + 1);
    assert!(matches!(store.fetch(&id), Err(VeilError::SnippetNotFound)));
}

#[test]
fn memory_lifecycle() {
    let clock = Arc::new(ManualClock::new(START));
    let store = SnippetStore::open(&StoreConfig::default())
        .unwrap()
        .with_clock(clock.clone());
    lifecycle(store, clock);
}

#[test]
fn json_lifecycle() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(START));
    let store = SnippetStore::open(&json_config(&dir))
        .unwrap()
        .with_clock(clock.clone());
    lifecycle(store, clock);
}

#[test]
fn json_snippets_survive_restart_until_expiry() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(START));

    let id = {
        let store = SnippetStore::open(&json_config(&dir))
            .unwrap()
            .with_clock(clock.clone());
        store.create("v1.AES-256.kdf..n.t.c", "AES-256").unwrap()
    };

    let store = SnippetStore::open(&json_config(&dir))
        .unwrap()
        .with_clock(clock.clone());
    assert_eq!(store.fetch(&id).unwrap().body.algorithm, "AES-256");

    clock.advance(SEVEN_DAYS + 60);
    assert_eq!(store.lookup(&id).unwrap(), Lookup::Expired);
    assert_eq!(store.sweep().unwrap(), 1);

    let reopened = SnippetStore::open(&json_config(&dir)).unwrap();
    assert!(reopened.is_empty().unwrap());
}
