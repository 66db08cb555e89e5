//! Finalizer management.
//!
//! The finalizer marker keeps the store from removing a Sample before its
//! deletion has been observed. It is added as the very first step for any
//! live object, before any status is written.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::resource::Sample;
use crate::store::{self, ApplyOptions, ApplyPatch, FieldAllowList, Store};
use crate::types::{FieldManager, FinalizerReleasePolicy, ObjectKey, Result};

/// Result of [`FinalizerGuard::ensure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizerOutcome {
    /// Already there; nothing written.
    Present,
    /// Written in this call; the caller should come back for a fresh read.
    Added,
}

/// Adds and removes one finalizer marker under one field manager.
#[derive(Debug, Clone)]
pub struct FinalizerGuard {
    store: Arc<dyn Store>,
    finalizer: String,
    options: ApplyOptions,
    timeout: Duration,
}

impl FinalizerGuard {
    pub fn new(
        store: Arc<dyn Store>,
        finalizer: impl Into<String>,
        field_manager: FieldManager,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            finalizer: finalizer.into(),
            options: ApplyOptions::main(field_manager),
            timeout,
        }
    }

    pub fn finalizer(&self) -> &str {
        &self.finalizer
    }

    pub fn is_present(&self, object: &Sample) -> bool {
        object.has_finalizer(&self.finalizer)
    }

    /// Make sure the marker is on `object`.
    ///
    /// The patch is pinned to the resource version `object` was read at, so
    /// a concurrent change fails with a conflict instead of being clobbered.
    pub async fn ensure(&self, object: &Sample) -> Result<FinalizerOutcome> {
        if self.is_present(object) {
            return Ok(FinalizerOutcome::Present);
        }
        let mut desired = object.clone();
        desired.metadata.finalizers = vec![self.finalizer.clone()];
        self.write(object.key(), &desired).await?;
        tracing::info!(key = %object.key(), finalizer = %self.finalizer, "finalizer added");
        Ok(FinalizerOutcome::Added)
    }

    /// Drop the marker. Other markers on the object are left alone since
    /// they are owned by other managers.
    pub async fn remove(&self, object: &Sample) -> Result<bool> {
        if !self.is_present(object) {
            return Ok(false);
        }
        let mut desired = object.clone();
        desired.metadata.finalizers.clear();
        self.write(object.key(), &desired).await?;
        tracing::info!(key = %object.key(), finalizer = %self.finalizer, "finalizer removed");
        Ok(true)
    }

    async fn write(&self, key: ObjectKey, desired: &Sample) -> Result<Sample> {
        let patch = ApplyPatch::from_object(desired, &FieldAllowList::finalizers())?;
        store::with_deadline(
            self.timeout,
            "finalizer apply",
            self.store.apply(&key, patch, &self.options),
        )
        .await
    }
}

/// Decides when the finalizer marker is released for a deleting object.
#[async_trait]
pub trait FinalizerRelease: Send + Sync + std::fmt::Debug {
    /// Called after handling a deleting object that sits in the final
    /// deletion state. Returns whether the marker was removed.
    async fn release(&self, guard: &FinalizerGuard, object: &Sample) -> Result<bool>;
}

/// Leaves the marker for an external cleanup workflow.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExternalRelease;

#[async_trait]
impl FinalizerRelease for ExternalRelease {
    async fn release(&self, _guard: &FinalizerGuard, object: &Sample) -> Result<bool> {
        tracing::trace!(key = %object.key(), "finalizer left for external release");
        Ok(false)
    }
}

/// Drops the marker once deletion has been acknowledged in status.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReleaseOnFinalState;

#[async_trait]
impl FinalizerRelease for ReleaseOnFinalState {
    async fn release(&self, guard: &FinalizerGuard, object: &Sample) -> Result<bool> {
        guard.remove(object).await
    }
}

pub fn release_for(policy: FinalizerReleasePolicy) -> Arc<dyn FinalizerRelease> {
    match policy {
        FinalizerReleasePolicy::External => Arc::new(ExternalRelease),
        FinalizerReleasePolicy::OnFinalDeletionState => Arc::new(ReleaseOnFinalState),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::types::Error;

    const FINALIZER: &str = "sample.kyma-project.io/finalizer";

    async fn setup() -> (Arc<InMemoryStore>, FinalizerGuard, ObjectKey) {
        let store = Arc::new(InMemoryStore::new());
        let key = ObjectKey::new("default", "a");
        store
            .create(
                Sample::new(&key, "3"),
                &FieldManager::from_string("user").unwrap(),
            )
            .await
            .unwrap();
        let guard = FinalizerGuard::new(
            store.clone(),
            FINALIZER,
            FieldManager::from_string("owner").unwrap(),
            Duration::from_secs(1),
        );
        (store, guard, key)
    }

    #[tokio::test]
    async fn test_ensure_adds_once() {
        let (store, guard, key) = setup().await;
        let live = store.get(&key).await.unwrap();
        assert_eq!(guard.ensure(&live).await.unwrap(), FinalizerOutcome::Added);

        let live = store.get(&key).await.unwrap();
        assert!(live.has_finalizer(FINALIZER));
        assert_eq!(guard.ensure(&live).await.unwrap(), FinalizerOutcome::Present);
    }

    #[tokio::test]
    async fn test_ensure_with_stale_read_conflicts() {
        let (store, guard, key) = setup().await;
        let stale = store.get(&key).await.unwrap();
        store
            .apply(
                &key,
                ApplyPatch::new(serde_json::json!({ "spec": { "someNumber": "4" } })),
                &ApplyOptions::main(FieldManager::from_string("user").unwrap()),
            )
            .await
            .unwrap();

        let err = guard.ensure(&stale).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_ensure_keeps_foreign_finalizers() {
        let (store, guard, key) = setup().await;
        store
            .apply(
                &key,
                ApplyPatch::new(serde_json::json!({ "metadata": { "finalizers": ["other/marker"] } })),
                &ApplyOptions::main(FieldManager::from_string("other").unwrap()),
            )
            .await
            .unwrap();

        let live = store.get(&key).await.unwrap();
        guard.ensure(&live).await.unwrap();
        let live = store.get(&key).await.unwrap();
        assert!(live.has_finalizer("other/marker"));
        assert!(live.has_finalizer(FINALIZER));
    }

    #[tokio::test]
    async fn test_release_policies() {
        let (store, guard, key) = setup().await;
        let live = store.get(&key).await.unwrap();
        guard.ensure(&live).await.unwrap();
        let live = store.get(&key).await.unwrap();

        assert!(!release_for(FinalizerReleasePolicy::External)
            .release(&guard, &live)
            .await
            .unwrap());
        assert!(store.get(&key).await.unwrap().has_finalizer(FINALIZER));

        assert!(release_for(FinalizerReleasePolicy::OnFinalDeletionState)
            .release(&guard, &live)
            .await
            .unwrap());
        assert!(!store.get(&key).await.unwrap().has_finalizer(FINALIZER));
    }
}
