// SPDX-License-Identifier: Apache-2.0
//! In-process durable store. The test double for the contract suite and a
//! backing store for headless tools that do not want disk I/O.

use crate::{DurableStore, SettingsError};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[derive(Default)]
struct MemoryState {
    doc: RefCell<Option<Value>>,
    load_calls: Cell<usize>,
    save_calls: Cell<usize>,
    fail_next_save: Cell<bool>,
}

/// In-memory [`DurableStore`] with call counters and one-shot save-failure
/// injection.
///
/// Clones are handles onto the same state, so a test can keep one handle
/// while the contract owns another and inspect what was persisted.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Rc<MemoryState>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with a persisted document.
    pub fn seeded(doc: Value) -> Self {
        let store = Self::default();
        *store.state.doc.borrow_mut() = Some(doc);
        store
    }

    /// The currently persisted document, if any.
    pub fn saved(&self) -> Option<Value> {
        self.state.doc.borrow().clone()
    }

    /// How many times `load` has been called.
    pub fn load_calls(&self) -> usize {
        self.state.load_calls.get()
    }

    /// How many times `save` has been called (failed attempts included).
    pub fn save_calls(&self) -> usize {
        self.state.save_calls.get()
    }

    /// Make the next `save` fail with a store error, leaving the persisted
    /// document unchanged.
    pub fn fail_next_save(&self) {
        self.state.fail_next_save.set(true);
    }
}

impl DurableStore for MemoryStore {
    async fn load(&self) -> Result<Option<Value>, SettingsError> {
        self.state.load_calls.set(self.state.load_calls.get() + 1);
        Ok(self.state.doc.borrow().clone())
    }

    async fn save(&self, doc: &Value) -> Result<(), SettingsError> {
        self.state.save_calls.set(self.state.save_calls.get() + 1);
        if self.state.fail_next_save.take() {
            return Err(SettingsError::Store("injected save failure".into()));
        }
        *self.state.doc.borrow_mut() = Some(doc.clone());
        Ok(())
    }
}
