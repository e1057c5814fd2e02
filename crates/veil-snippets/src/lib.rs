//! veil-snippets: ephemeral store for encrypted text
//!
//! A snippet is `{encryptedText, algorithm, createdAt}` behind a random id.
//! Records are immutable and live for a fixed TTL (7 days by default).
//! Expiry is enforced on every fetch; [`SnippetStore::sweep`] physically
//! removes expired records and is driven periodically by the daemon.

pub mod backend;
pub mod clock;
pub mod store;

pub use backend::{JsonFileBackend, MemoryBackend, SnippetBackend};
pub use clock::{Clock, ManualClock, SystemClock};
pub use store::{Lookup, Snippet, SnippetStore};
