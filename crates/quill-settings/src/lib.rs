// SPDX-License-Identifier: Apache-2.0
//! Reactive persisted settings store for Quill tools.
//!
//! `quill-settings` owns the one document of user settings behind a
//! [`SettingsContract`]: the document is loaded lazily (at most once) from a
//! [`DurableStore`], backfilled against schema defaults, fanned out to every
//! subscriber on each change, and written back durably after each flush.
//!
//! # Consistency Model
//!
//! The contract is single-threaded cooperative: it is `!Send` and meant to
//! live on the UI/event-loop thread (a tokio current-thread runtime in the
//! tests). The only suspension points are the initial load and the post-flush
//! save. Between them, every queue and document manipulation is synchronous,
//! so subscriber callbacks observe a consistent, in-order sequence of values.
//!
//! # Re-entrancy
//!
//! A subscriber callback may mutate settings while a flush is delivering
//! notifications. Those transitions coalesce into the in-flight drain: the
//! drain loop re-reads the queue length on every step, so appended work is
//! delivered by the same loop, and exactly one durable write happens at the
//! end carrying the final value. See [`SettingsContract::stage`].
#![forbid(unsafe_code)]

mod contract;
mod memory;
pub mod merge;
pub mod validate;

pub use contract::{SettingsContract, Subscription};
pub use memory::MemoryStore;

use serde_json::Value;

/// Errors surfaced by settings operations.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// A synchronous operation ran before the document was ever loaded.
    #[error("settings document not loaded")]
    NotLoaded,
    /// I/O failure in the durable store.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization/deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Store-specific failure that is neither I/O nor serde.
    #[error("store error: {0}")]
    Store(String),
}

/// Asynchronous persistence port for the settings document.
///
/// Implementations persist one opaque JSON document per store instance. The
/// contract awaits `load` once (lazily, on first access) and `save` once per
/// completed flush. Absence is not an error: `load` returns `Ok(None)` when
/// nothing has been persisted yet.
#[allow(async_fn_in_trait)]
pub trait DurableStore {
    /// Load the persisted document, or `None` when absent.
    async fn load(&self) -> Result<Option<Value>, SettingsError>;
    /// Persist the document.
    async fn save(&self, doc: &Value) -> Result<(), SettingsError>;
}
