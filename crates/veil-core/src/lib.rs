//! veil-core: types shared by the transform engine, the snippet store,
//! the daemon and the CLI.
//!
//! - `types`: algorithm tags and their wire spelling
//! - `api`: request/response shapes of the snippet HTTP API
//! - `config`: `veil.toml` schema
//! - `error`: the error taxonomy every crate reports through

pub mod api;
pub mod config;
pub mod error;
pub mod types;

pub use error::{VeilError, VeilResult};
pub use types::Algorithm;
