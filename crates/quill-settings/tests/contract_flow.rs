// SPDX-License-Identifier: Apache-2.0
//! End-to-end behavior of the settings contract over the in-memory store:
//! replay, activation, coalescing, persistence, and load reconciliation.
#![allow(clippy::unwrap_used)]

use quill_settings::{MemoryStore, SettingsContract, SettingsError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Prefs {
    count: u64,
    theme: Theme,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Theme {
    dark: bool,
    accent: String,
}

impl Default for Prefs {
    fn default() -> Self {
        Self {
            count: 0,
            theme: Theme {
                dark: false,
                accent: "plum".into(),
            },
        }
    }
}

fn contract_over(store: MemoryStore) -> SettingsContract<Prefs, MemoryStore> {
    SettingsContract::new(store, Prefs::default()).unwrap()
}

fn recorder() -> (Rc<RefCell<Vec<u64>>>, impl FnMut(&Prefs)) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    (seen, move |p: &Prefs| sink.borrow_mut().push(p.count))
}

#[tokio::test]
async fn subscribe_replays_current_value_exactly_once() {
    let contract = contract_over(MemoryStore::new());
    let (seen, callback) = recorder();
    let _sub = contract.subscribe(callback).await.unwrap();
    assert_eq!(*seen.borrow(), vec![0]);
}

#[tokio::test]
async fn updates_without_subscribers_mutate_memory_only() {
    let store = MemoryStore::new();
    let contract = contract_over(store.clone());
    contract.update(|p| p.count = 9).await.unwrap();
    assert_eq!(contract.read().await.unwrap().count, 9);
    assert_eq!(store.save_calls(), 0);
    assert_eq!(store.saved(), None);
}

#[tokio::test]
async fn first_subscriber_reactivates_observability() {
    let store = MemoryStore::new();
    let contract = contract_over(store.clone());
    contract.update(|p| p.count = 1).await.unwrap();
    assert_eq!(store.save_calls(), 0);

    let (seen, callback) = recorder();
    let _sub = contract.subscribe(callback).await.unwrap();
    contract.update(|p| p.count = 2).await.unwrap();
    assert_eq!(*seen.borrow(), vec![1, 2]);
    assert_eq!(store.save_calls(), 1);
    assert_eq!(store.saved().unwrap()["count"], json!(2));
}

#[tokio::test]
async fn reentrant_stage_coalesces_into_one_drain_and_one_save() {
    let store = MemoryStore::new();
    let contract = contract_over(store.clone());

    // A bumps the count once more when it observes the first transition.
    let reentrant = contract.clone();
    let _sub_a = contract
        .subscribe(move |p: &Prefs| {
            if p.count == 1 {
                reentrant.stage(|p| p.count = 2).unwrap();
            }
        })
        .await
        .unwrap();
    let (seen_b, callback_b) = recorder();
    let _sub_b = contract.subscribe(callback_b).await.unwrap();

    contract.update(|p| p.count = 1).await.unwrap();

    // B observes every intermediate value, in transition order.
    assert_eq!(*seen_b.borrow(), vec![0, 1, 2]);
    // One durable write, carrying the final value only.
    assert_eq!(store.save_calls(), 1);
    assert_eq!(store.saved().unwrap()["count"], json!(2));
}

#[tokio::test]
async fn unsubscribe_is_idempotent_and_scoped() {
    let store = MemoryStore::new();
    let contract = contract_over(store.clone());
    let (seen_a, callback_a) = recorder();
    let (seen_b, callback_b) = recorder();
    let sub_a = contract.subscribe(callback_a).await.unwrap();
    let _sub_b = contract.subscribe(callback_b).await.unwrap();

    sub_a.unsubscribe();
    sub_a.unsubscribe();
    contract.update(|p| p.count = 4).await.unwrap();

    assert_eq!(*seen_a.borrow(), vec![0]);
    assert_eq!(*seen_b.borrow(), vec![0, 4]);
    assert_eq!(contract.subscriber_count(), 1);
}

#[tokio::test]
async fn removing_last_subscriber_deactivates_until_resubscribed() {
    let store = MemoryStore::new();
    let contract = contract_over(store.clone());
    let (_, callback) = recorder();
    let sub = contract.subscribe(callback).await.unwrap();
    contract.update(|p| p.count = 1).await.unwrap();
    sub.unsubscribe();

    contract.update(|p| p.count = 7).await.unwrap();
    assert_eq!(store.save_calls(), 1, "inactive update must not persist");

    // Re-subscribing replays the latest in-memory value, including the
    // mutation made while inactive.
    let (seen, callback) = recorder();
    let _sub = contract.subscribe(callback).await.unwrap();
    assert_eq!(*seen.borrow(), vec![7]);
}

#[tokio::test]
async fn save_failure_propagates_without_rollback() {
    let store = MemoryStore::new();
    let contract = contract_over(store.clone());
    let (_, callback) = recorder();
    let _sub = contract.subscribe(callback).await.unwrap();
    contract.update(|p| p.count = 1).await.unwrap();

    store.fail_next_save();
    let err = contract.update(|p| p.count = 2).await;
    assert!(matches!(err, Err(SettingsError::Store(_))));
    // Memory keeps the new value; durable state lags until retried.
    assert_eq!(contract.read().await.unwrap().count, 2);
    assert_eq!(store.saved().unwrap()["count"], json!(1));

    contract.persist().await.unwrap();
    assert_eq!(store.saved().unwrap()["count"], json!(2));
}

#[tokio::test]
async fn concurrent_first_accesses_share_one_load() {
    let store = MemoryStore::seeded(json!({ "count": 5 }));
    let contract = contract_over(store.clone());
    let (read, updated) = tokio::join!(contract.read(), contract.update(|p| p.count += 1));
    updated.unwrap();
    assert_eq!(store.load_calls(), 1);
    // Both callers reused the same loaded document.
    assert_eq!(read.unwrap().count, 5);
    assert_eq!(contract.read().await.unwrap().count, 6);
}

#[tokio::test]
async fn partial_persisted_document_is_backfilled_from_defaults() {
    let store = MemoryStore::seeded(json!({ "count": 3, "theme": { "dark": true } }));
    let contract = contract_over(store);
    let prefs = contract.read().await.unwrap();
    assert_eq!(prefs.count, 3);
    assert!(prefs.theme.dark);
    assert_eq!(prefs.theme.accent, "plum", "missing field takes the default");
}

#[tokio::test]
async fn malformed_persisted_document_falls_back_to_defaults() {
    let store = MemoryStore::seeded(json!([1, 2, 3]));
    let contract = contract_over(store);
    assert_eq!(contract.read().await.unwrap(), Prefs::default());
}

#[tokio::test]
async fn external_stage_delivers_now_and_persists_on_next_awaited_call() {
    let store = MemoryStore::new();
    let contract = contract_over(store.clone());
    let (seen, callback) = recorder();
    let _sub = contract.subscribe(callback).await.unwrap();

    contract.stage(|p| p.count = 3).unwrap();
    assert_eq!(*seen.borrow(), vec![0, 3]);
    assert_eq!(store.save_calls(), 0, "stage alone cannot await the store");

    // Reads never write; dirty state waits for a drain-owning operation.
    assert_eq!(contract.read().await.unwrap().count, 3);
    assert_eq!(store.save_calls(), 0);

    contract.persist().await.unwrap();
    assert_eq!(store.saved().unwrap()["count"], json!(3));
}

#[tokio::test]
async fn replay_save_failure_still_returns_the_subscription() {
    let store = MemoryStore::new();
    let contract = contract_over(store.clone());
    store.fail_next_save();

    let reentrant = contract.clone();
    let sub = contract
        .subscribe(move |p: &Prefs| {
            if p.count == 0 {
                reentrant.stage(|p| p.count = 5).unwrap();
            }
        })
        .await
        .unwrap();

    // The write failed, but the registration survived with a usable handle
    // and the document stayed dirty for the retry path.
    assert_eq!(contract.subscriber_count(), 1);
    assert_eq!(store.saved(), None);
    contract.persist().await.unwrap();
    assert_eq!(store.saved().unwrap()["count"], json!(5));

    sub.unsubscribe();
    assert_eq!(contract.subscriber_count(), 0);
}

#[tokio::test]
async fn stage_during_initial_replay_is_persisted_by_subscribe() {
    let store = MemoryStore::new();
    let contract = contract_over(store.clone());
    let reentrant = contract.clone();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let _sub = contract
        .subscribe(move |p: &Prefs| {
            if p.count == 0 {
                reentrant.stage(|p| p.count = 5).unwrap();
            }
            sink.borrow_mut().push(p.count);
        })
        .await
        .unwrap();

    // Replay delivered the initial value; the staged transition was
    // deferred past replay, then delivered and persisted by subscribe.
    assert_eq!(*seen.borrow(), vec![0, 5]);
    assert_eq!(store.save_calls(), 1);
    assert_eq!(store.saved().unwrap()["count"], json!(5));
}
