//! Status writers.
//!
//! Two patchers share `status`, each under its own field manager and each
//! restricted to its own subtree: the lifecycle writer owns `status.state`,
//! the condition writer owns `status.conditions`. Both apply with `force`
//! so that a stale co-owner never blocks progress.

use std::sync::Arc;
use std::time::Duration;

use crate::resource::{Sample, SampleStatus};
use crate::store::{self, ApplyOptions, ApplyPatch, FieldAllowList, Store};
use crate::types::{FieldManager, ObjectKey, Result};

#[derive(Debug, Clone)]
pub struct StatusPatcher {
    store: Arc<dyn Store>,
    options: ApplyOptions,
    allow: FieldAllowList,
    timeout: Duration,
}

impl StatusPatcher {
    pub fn new(
        store: Arc<dyn Store>,
        field_manager: FieldManager,
        allow: FieldAllowList,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            options: ApplyOptions::status(field_manager).force(true),
            allow,
            timeout,
        }
    }

    /// Writer restricted to `status.conditions`.
    pub fn conditions(store: Arc<dyn Store>, field_manager: FieldManager, timeout: Duration) -> Self {
        Self::new(store, field_manager, FieldAllowList::conditions(), timeout)
    }

    /// Writer restricted to `status.state`.
    pub fn lifecycle(store: Arc<dyn Store>, field_manager: FieldManager, timeout: Duration) -> Self {
        Self::new(store, field_manager, FieldAllowList::state(), timeout)
    }

    /// Override conflict handling (tests use `false` to surface conflicts).
    pub fn with_force(mut self, force: bool) -> Self {
        self.options = self.options.force(force);
        self
    }

    pub fn field_manager(&self) -> &FieldManager {
        &self.options.field_manager
    }

    /// Apply the owned part of `status`. Fields outside the allow-list
    /// never reach the store.
    pub async fn apply(&self, key: &ObjectKey, status: &SampleStatus) -> Result<Sample> {
        let mut document = serde_json::Map::new();
        document.insert("status".to_string(), serde_json::to_value(status)?);
        let body = self.allow.retain(&serde_json::Value::Object(document));

        tracing::debug!(
            key = %key,
            field_manager = %self.options.field_manager,
            "applying status"
        );
        store::with_deadline(
            self.timeout,
            "status apply",
            self.store.apply(key, ApplyPatch::new(body), &self.options),
        )
        .await
    }
}
