//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use sample_operator::resource::{Sample, State};
use sample_operator::store::{
    ApplyOptions, ApplyPatch, InMemoryStore, Store, Subresource, WatchStream,
};
use sample_operator::types::{FieldManager, ObjectKey, ReconcilerConfig, Result};
use sample_operator::Error;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const USER: &str = "test/user";
pub const EXTERNAL_LIFECYCLE: &str = "test/lifecycle";

/// One apply as seen by the store.
#[derive(Debug, Clone)]
pub struct AppliedPatch {
    pub key: ObjectKey,
    pub field_manager: String,
    pub subresource: Subresource,
    pub body: Value,
}

impl AppliedPatch {
    pub fn writes_state(&self) -> bool {
        self.body
            .get("status")
            .and_then(|s| s.get("state"))
            .is_some()
    }

    pub fn writes_conditions(&self) -> bool {
        self.body
            .get("status")
            .and_then(|s| s.get("conditions"))
            .is_some()
    }
}

#[derive(Debug, Default)]
struct GetTracking {
    in_flight: HashMap<ObjectKey, u32>,
    max_in_flight: u32,
}

/// `InMemoryStore` wrapper recording applies, with optional injected get
/// failures and get latency.
#[derive(Debug, Default)]
pub struct RecordingStore {
    pub inner: InMemoryStore,
    applies: Mutex<Vec<AppliedPatch>>,
    failing_gets: AtomicU32,
    gets: AtomicU32,
    get_delay: Mutex<Duration>,
    tracking: Mutex<GetTracking>,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn applies(&self) -> Vec<AppliedPatch> {
        self.applies.lock().unwrap().clone()
    }

    pub fn clear_applies(&self) {
        self.applies.lock().unwrap().clear();
    }

    /// Fail the next `n` gets with a timeout.
    pub fn fail_next_gets(&self, n: u32) {
        self.failing_gets.store(n, Ordering::SeqCst);
    }

    pub fn gets(&self) -> u32 {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn set_get_delay(&self, delay: Duration) {
        *self.get_delay.lock().unwrap() = delay;
    }

    /// Highest number of concurrent gets seen for a single key.
    pub fn max_in_flight_per_key(&self) -> u32 {
        self.tracking.lock().unwrap().max_in_flight
    }
}

#[async_trait]
impl Store for RecordingStore {
    async fn get(&self, key: &ObjectKey) -> Result<Sample> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_gets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::timeout("injected get failure"));
        }

        {
            let mut tracking = self.tracking.lock().unwrap();
            let count = tracking.in_flight.entry(key.clone()).or_insert(0);
            *count += 1;
            let current = *count;
            tracking.max_in_flight = tracking.max_in_flight.max(current);
        }
        let delay = *self.get_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        {
            let mut tracking = self.tracking.lock().unwrap();
            if let Some(count) = tracking.in_flight.get_mut(key) {
                *count -= 1;
            }
        }
        self.inner.get(key).await
    }

    async fn list(&self) -> Result<Vec<ObjectKey>> {
        self.inner.list().await
    }

    async fn apply(
        &self,
        key: &ObjectKey,
        patch: ApplyPatch,
        options: &ApplyOptions,
    ) -> Result<Sample> {
        self.applies.lock().unwrap().push(AppliedPatch {
            key: key.clone(),
            field_manager: options.field_manager.to_string(),
            subresource: options.subresource,
            body: patch.body.clone(),
        });
        self.inner.apply(key, patch, options).await
    }

    async fn watch(&self) -> Result<WatchStream> {
        self.inner.watch().await
    }
}

pub fn manager(name: &str) -> FieldManager {
    FieldManager::from_string(name).unwrap()
}

/// Defaults with the dispatch pause disabled.
pub fn reconciler_config() -> ReconcilerConfig {
    ReconcilerConfig {
        dispatch_jitter: Duration::ZERO,
        ..ReconcilerConfig::default()
    }
}

pub async fn create_sample(store: &RecordingStore, name: &str, some_number: &str) -> ObjectKey {
    let key = ObjectKey::new("default", name);
    store
        .inner
        .create(Sample::new(&key, some_number), &manager(USER))
        .await
        .unwrap();
    key
}

/// Write `status.state` the way an external lifecycle controller would.
pub async fn set_state(store: &RecordingStore, key: &ObjectKey, state: State) {
    store
        .inner
        .apply(
            key,
            ApplyPatch::new(serde_json::json!({ "status": { "state": state } })),
            &ApplyOptions::status(manager(EXTERNAL_LIFECYCLE)).force(true),
        )
        .await
        .unwrap();
}

pub async fn set_some_number(store: &RecordingStore, key: &ObjectKey, some_number: &str) {
    store
        .inner
        .apply(
            key,
            ApplyPatch::new(serde_json::json!({ "spec": { "someNumber": some_number } })),
            &ApplyOptions::main(manager(USER)),
        )
        .await
        .unwrap();
}
