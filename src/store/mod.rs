//! Declarative object store boundary.
//!
//! The reconciler only ever talks to a [`Store`]: fetch by key, apply a
//! partial document under a field manager, and watch for changes. Merge and
//! ownership semantics live behind this trait, never in the reconciler.

pub mod fields;
mod memory;

pub use fields::{FieldAllowList, FieldPath, PathElement};
pub use memory::InMemoryStore;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

use crate::resource::Sample;
use crate::types::{Error, FieldManager, ObjectKey, Result};

/// Which part of the object an apply may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subresource {
    /// `spec` and `metadata.finalizers`.
    Main,
    /// `status` only.
    Status,
}

/// Apply parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOptions {
    pub field_manager: FieldManager,
    /// Take ownership of conflicting fields instead of failing.
    pub force: bool,
    pub subresource: Subresource,
}

impl ApplyOptions {
    pub fn main(field_manager: FieldManager) -> Self {
        Self {
            field_manager,
            force: false,
            subresource: Subresource::Main,
        }
    }

    pub fn status(field_manager: FieldManager) -> Self {
        Self {
            field_manager,
            force: false,
            subresource: Subresource::Status,
        }
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// A partial document plus an optional optimistic-concurrency precondition.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyPatch {
    pub body: Value,
    /// Reject the apply unless the live object still has this version.
    pub resource_version: Option<u64>,
}

impl ApplyPatch {
    pub fn new(body: Value) -> Self {
        Self {
            body,
            resource_version: None,
        }
    }

    /// Serialize a full object, keep only what `allow` permits, and pin it
    /// to the version it was read at.
    pub fn from_object(object: &Sample, allow: &FieldAllowList) -> Result<Self> {
        let full = serde_json::to_value(object)?;
        Ok(Self {
            body: allow.retain(&full),
            resource_version: Some(object.metadata.resource_version),
        })
    }

    pub fn with_resource_version(mut self, resource_version: u64) -> Self {
        self.resource_version = Some(resource_version);
        self
    }
}

/// Change notification feeding the work queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Applied(ObjectKey),
    Deleted(ObjectKey),
    /// The watcher fell behind; re-list everything.
    Resync,
}

pub type WatchStream = BoxStream<'static, WatchEvent>;

/// The declarative object store collaborator.
#[async_trait]
pub trait Store: Send + Sync + std::fmt::Debug {
    /// Fetch an object. Missing objects are `Error::NotFound`.
    async fn get(&self, key: &ObjectKey) -> Result<Sample>;

    /// Keys of every stored object.
    async fn list(&self) -> Result<Vec<ObjectKey>>;

    /// Merge `patch` into the live object under `options.field_manager`.
    async fn apply(
        &self,
        key: &ObjectKey,
        patch: ApplyPatch,
        options: &ApplyOptions,
    ) -> Result<Sample>;

    /// Stream of change notifications from now on.
    async fn watch(&self) -> Result<WatchStream>;
}

/// Bound a store call; overrunning is a retryable `Error::Timeout`.
pub async fn with_deadline<T, F>(deadline: Duration, operation: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_elapsed) => Err(Error::timeout(format!(
            "{operation} exceeded {}ms",
            deadline.as_millis()
        ))),
    }
}
