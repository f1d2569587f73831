// SPDX-License-Identifier: Apache-2.0
//! The settings contract: cached document, subscriber fan-out, and the
//! coalescing flush queue.

use crate::merge::merge_defaults;
use crate::validate::{validate_shape, ShapeMode};
use crate::{DurableStore, SettingsError};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Identity of one subscriber registration. Every registration gets a fresh
/// id, so registering the same closure twice yields two subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SubscriberId(u64);

type Callback<T> = Rc<RefCell<Box<dyn FnMut(&T)>>>;

/// Outcome of one accepted value transition.
enum Transition {
    /// No subscribers: the cache was mutated, nothing else happens.
    Inactive,
    /// A drain was already in flight; the new notifications were appended
    /// to it and its owner will persist the final value.
    Coalesced,
    /// Staged during an initial replay: enqueued, but the drain is left to
    /// the enclosing `subscribe` so the replayed callback is never
    /// re-entered while it is still executing.
    Deferred,
    /// This transition owned the drain; the caller must persist.
    Drained,
}

struct State<T> {
    doc: Option<T>,
    subscribers: HashMap<SubscriberId, Callback<T>>,
    next_id: u64,
    /// Pending (subscriber, snapshot) pairs. Non-empty exactly while a
    /// drain is in flight.
    queue: Vec<(Callback<T>, T)>,
    active: bool,
    /// True while `subscribe` is replaying the current value to a new
    /// callback. Transitions staged during replay defer their drain.
    replaying: bool,
    /// Set when a drain completed without an async owner to persist it
    /// (re-entrant `stage` during initial replay). Cleared by the next
    /// successful save.
    dirty: bool,
}

struct Inner<T, S> {
    store: S,
    defaults: T,
    /// `defaults` serialized once at construction; the immutable template
    /// for shape checks and the defaulting merge.
    template: Value,
    state: RefCell<State<T>>,
    /// Serializes concurrent first accesses so the store is loaded at most
    /// once.
    load_guard: Mutex<()>,
}

/// Reactive, persisted settings store.
///
/// Owns the single cached settings document of type `T` (any serde
/// round-trippable record), mediates all reads, mutations, subscriptions,
/// and persistence against the [`DurableStore`] `S`. Cheap to clone; clones
/// share the same document and subscriber set.
///
/// `T` is the typed view; persistence and the defaulting merge go through
/// `serde_json::Value`, so partially-persisted documents deserialize cleanly
/// after missing fields are backfilled from `defaults`.
pub struct SettingsContract<T, S> {
    inner: Rc<Inner<T, S>>,
}

impl<T, S> Clone for SettingsContract<T, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T, S> SettingsContract<T, S>
where
    T: Serialize,
{
    /// Create a contract over `store` with `defaults` as the schema
    /// defaults document.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Serde`] if `defaults` cannot be serialized
    /// to a JSON value.
    pub fn new(store: S, defaults: T) -> Result<Self, SettingsError> {
        let template = serde_json::to_value(&defaults)?;
        Ok(Self {
            inner: Rc::new(Inner {
                store,
                defaults,
                template,
                state: RefCell::new(State {
                    doc: None,
                    subscribers: HashMap::new(),
                    next_id: 0,
                    queue: Vec::new(),
                    active: false,
                    replaying: false,
                    dirty: false,
                }),
                load_guard: Mutex::new(()),
            }),
        })
    }
}

impl<T, S> SettingsContract<T, S>
where
    T: Serialize + DeserializeOwned + Clone,
    S: DurableStore,
{
    /// Register `callback` and synchronously replay the current document to
    /// it exactly once before returning.
    ///
    /// The first registration marks the contract active; from then on every
    /// accepted update is fanned out and persisted. The initial replay is
    /// outside the flush queue: a `stage` call made by the callback during
    /// replay is enqueued but not drained until replay returns, after which
    /// this method delivers it and persists the result before returning. A
    /// failed write at that point is logged and leaves the document dirty
    /// for [`persist`](Self::persist) to retry; the subscription itself
    /// always succeeds, so the handle can be unsubscribed.
    ///
    /// # Errors
    ///
    /// The lazy load never fails (load errors fall back to defaults);
    /// [`SettingsError::NotLoaded`] is returned only if the document is
    /// somehow absent after loading.
    pub async fn subscribe(
        &self,
        callback: impl FnMut(&T) + 'static,
    ) -> Result<Subscription<T, S>, SettingsError> {
        self.ensure_loaded().await;
        let handle: Callback<T> = Rc::new(RefCell::new(Box::new(callback)));
        let (id, snapshot) = {
            let state = &mut *self.inner.state.borrow_mut();
            let Some(doc) = state.doc.as_ref() else {
                return Err(SettingsError::NotLoaded);
            };
            let snapshot = doc.clone();
            let id = SubscriberId(state.next_id);
            state.next_id += 1;
            state.subscribers.insert(id, Rc::clone(&handle));
            if state.subscribers.len() == 1 {
                state.active = true;
            }
            state.replaying = true;
            (id, snapshot)
        };
        // Initial replay, with no state borrow held across the call.
        (handle.borrow_mut())(&snapshot);
        self.inner.state.borrow_mut().replaying = false;
        // Transitions staged by the callback during replay were enqueued
        // but not drained; this call owns them now.
        let deferred = !self.inner.state.borrow().queue.is_empty();
        if deferred {
            self.drain();
        }
        let must_flush = deferred || self.inner.state.borrow().dirty;
        if must_flush && self.persist().await.is_err() {
            // The caller must still receive the handle or the registration
            // could never be undone; the document stays dirty and the save
            // is retried by the next drain-owning update or persist.
            self.inner.state.borrow_mut().dirty = true;
        }
        Ok(Subscription {
            inner: Rc::downgrade(&self.inner),
            id,
        })
    }

    /// Apply `mutator` to the live document and flush.
    ///
    /// The mutation is applied in place; the mutated cache is the new
    /// value. While inactive (zero subscribers) the mutation still lands in
    /// memory but nothing is notified or persisted. When this call owns the
    /// drain it delivers every queued notification (including work appended
    /// by re-entrant [`stage`](Self::stage) calls) and then persists the
    /// final document exactly once.
    ///
    /// # Errors
    ///
    /// Propagates the save failure when this call owned the flush. The
    /// in-memory value is not rolled back; retry with
    /// [`persist`](Self::persist).
    pub async fn update(&self, mutator: impl FnOnce(&mut T)) -> Result<(), SettingsError> {
        self.ensure_loaded().await;
        match self.transition(mutator)? {
            Transition::Drained => self.persist().await,
            Transition::Inactive | Transition::Coalesced | Transition::Deferred => Ok(()),
        }
    }

    /// Re-entrant, synchronous variant of [`update`](Self::update) for use
    /// inside subscriber callbacks.
    ///
    /// A transition staged while a drain is in flight coalesces into it:
    /// the in-flight loop delivers the new notifications and the drain's
    /// owner persists the final value. Staged during an initial replay, the
    /// transition is enqueued and the enclosing `subscribe` delivers and
    /// persists it once replay returns. Staged with no flush machinery
    /// running at all, it is delivered immediately and the contract is
    /// marked dirty; the next drain-owning `update`, any `subscribe`, or
    /// an explicit [`persist`](Self::persist) writes it out (`read` and
    /// coalesced or inactive updates do not).
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::NotLoaded`] if no load has happened yet;
    /// `stage` never loads.
    pub fn stage(&self, mutator: impl FnOnce(&mut T)) -> Result<(), SettingsError> {
        if let Transition::Drained = self.transition(mutator)? {
            self.inner.state.borrow_mut().dirty = true;
        }
        Ok(())
    }

    /// Current document, by clone. Loads lazily on first access; never
    /// notifies, never persists.
    ///
    /// # Errors
    ///
    /// Currently infallible (load errors fall back to defaults); the
    /// `Result` reserves room for stores that must surface load failures.
    pub async fn read(&self) -> Result<T, SettingsError> {
        self.ensure_loaded().await;
        let state = self.inner.state.borrow();
        state.doc.clone().ok_or(SettingsError::NotLoaded)
    }

    /// Persist the current document immediately.
    ///
    /// The retry hook after a surfaced save failure; also flushes dirty
    /// state left by [`stage`](Self::stage) outside a drain.
    ///
    /// # Errors
    ///
    /// Returns the store's save failure, or [`SettingsError::NotLoaded`]
    /// before the first access.
    pub async fn persist(&self) -> Result<(), SettingsError> {
        let value = {
            let state = self.inner.state.borrow();
            let Some(doc) = state.doc.as_ref() else {
                return Err(SettingsError::NotLoaded);
            };
            serde_json::to_value(doc)?
        };
        match self.inner.store.save(&value).await {
            Ok(()) => {
                self.inner.state.borrow_mut().dirty = false;
                Ok(())
            }
            Err(err) => {
                warn!(%err, "settings save failed; in-memory value kept");
                Err(err)
            }
        }
    }

    /// Number of live subscriber registrations.
    pub fn subscriber_count(&self) -> usize {
        self.inner.state.borrow().subscribers.len()
    }

    /// Load the document at most once. Concurrent first accesses wait on
    /// the same load through `load_guard` and reuse its result.
    async fn ensure_loaded(&self) {
        if self.inner.state.borrow().doc.is_some() {
            return;
        }
        let _guard = self.inner.load_guard.lock().await;
        if self.inner.state.borrow().doc.is_some() {
            return;
        }
        let loaded = match self.inner.store.load().await {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, "settings load failed; falling back to defaults");
                None
            }
        };
        let doc = self.materialize(loaded);
        self.inner.state.borrow_mut().doc = Some(doc);
    }

    /// Reconcile a loaded raw value against the defaults template.
    fn materialize(&self, loaded: Option<Value>) -> T {
        let raw = loaded
            .filter(|value| {
                let ok = validate_shape(value, &self.inner.template, ShapeMode::Lenient);
                if !ok {
                    warn!("persisted settings have unexpected shape; discarding");
                }
                ok
            })
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        let merged = merge_defaults(raw, &self.inner.template);
        match serde_json::from_value(merged) {
            Ok(doc) => doc,
            Err(err) => {
                warn!(%err, "merged settings failed to deserialize; using defaults");
                self.inner.defaults.clone()
            }
        }
    }

    /// Steps 1-6 of the flush algorithm, minus persistence.
    fn transition(&self, mutator: impl FnOnce(&mut T)) -> Result<Transition, SettingsError> {
        let (owns_drain, replaying) = {
            let state = &mut *self.inner.state.borrow_mut();
            let Some(doc) = state.doc.as_mut() else {
                return Err(SettingsError::NotLoaded);
            };
            mutator(doc);
            if !state.active {
                return Ok(Transition::Inactive);
            }
            // Checked before enqueueing: a non-empty queue means a drain is
            // already delivering and will pick these entries up.
            let owns_drain = state.queue.is_empty();
            let snapshot = doc.clone();
            for callback in state.subscribers.values() {
                state.queue.push((Rc::clone(callback), snapshot.clone()));
            }
            (owns_drain, state.replaying)
        };
        if !owns_drain {
            return Ok(Transition::Coalesced);
        }
        if replaying {
            // Draining here would re-enter the callback currently being
            // replayed; the enclosing subscribe drains once replay returns.
            return Ok(Transition::Deferred);
        }
        self.drain();
        Ok(Transition::Drained)
    }

    /// Deliver queued notifications from index 0 forward, re-reading the
    /// queue length on every step so entries appended by re-entrant `stage`
    /// calls are delivered by this same loop. No borrow is held across a
    /// callback invocation.
    fn drain(&self) {
        let mut index = 0;
        loop {
            let entry = {
                let state = self.inner.state.borrow();
                state
                    .queue
                    .get(index)
                    .map(|(callback, doc)| (Rc::clone(callback), doc.clone()))
            };
            let Some((callback, doc)) = entry else {
                break;
            };
            (callback.borrow_mut())(&doc);
            index += 1;
        }
        self.inner.state.borrow_mut().queue.clear();
        debug!(delivered = index, "drained settings notification queue");
    }
}

/// Handle returned by [`SettingsContract::subscribe`].
///
/// Unsubscription is explicit: dropping the handle keeps the subscription
/// alive. [`unsubscribe`](Self::unsubscribe) is idempotent and takes effect
/// for future notifications only; an already-queued notification mid-drain
/// is still delivered.
pub struct Subscription<T, S> {
    inner: Weak<Inner<T, S>>,
    id: SubscriberId,
}

impl<T, S> Subscription<T, S> {
    /// Remove this registration. The last removal marks the contract
    /// inactive. Calling twice is harmless.
    pub fn unsubscribe(&self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut state = inner.state.borrow_mut();
        if state.subscribers.remove(&self.id).is_some() && state.subscribers.is_empty() {
            state.active = false;
        }
    }
}
