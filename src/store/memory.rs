//! In-process declarative store with apply semantics.
//!
//! Used by tests and by the standalone binary. Ownership is tracked per
//! leaf field: equal values are co-owned, differing values conflict unless
//! the apply is forced, and fields a manager stops sending are removed once
//! nobody owns them. Objects marked for deletion disappear when their last
//! finalizer goes.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::{broadcast, RwLock};

use super::fields::{self, FieldPath};
use super::{ApplyOptions, ApplyPatch, Store, Subresource, WatchEvent, WatchStream};
use crate::resource::{ObjectMeta, Sample, SampleStatus};
use crate::types::{Error, FieldManager, ObjectKey, Result, Uid};

const WATCH_BUFFER: usize = 1024;

#[derive(Debug)]
struct StoredObject {
    /// `spec`, `status`, `metadata.{name,namespace,finalizers}`.
    body: Value,
    /// Store-managed metadata (uid, generation, versions, timestamps).
    meta: ObjectMeta,
    managers: BTreeMap<FieldPath, BTreeSet<String>>,
}

impl StoredObject {
    fn render(&self) -> Result<Sample> {
        let mut sample: Sample = serde_json::from_value(self.body.clone())?;
        let finalizers = std::mem::take(&mut sample.metadata.finalizers);
        sample.metadata = self.meta.clone();
        sample.metadata.finalizers = finalizers;
        Ok(sample)
    }

    fn has_finalizers(&self) -> bool {
        self.body["metadata"]["finalizers"]
            .as_array()
            .is_some_and(|f| !f.is_empty())
    }
}

fn in_scope(path: &FieldPath, subresource: Subresource) -> bool {
    match subresource {
        Subresource::Status => path.starts_with(&FieldPath::fields(&["status"])),
        Subresource::Main => {
            path.starts_with(&FieldPath::fields(&["spec"]))
                || path.starts_with(&FieldPath::fields(&["metadata", "finalizers"]))
        }
    }
}

fn tracked(path: &FieldPath) -> bool {
    in_scope(path, Subresource::Main) || in_scope(path, Subresource::Status)
}

/// Body stored for a new object: everything but store-managed metadata.
fn initial_body(sample: &Sample) -> Result<Value> {
    let mut body = serde_json::to_value(sample)?;
    let mut metadata = serde_json::Map::new();
    metadata.insert("name".into(), Value::String(sample.metadata.name.clone()));
    metadata.insert(
        "namespace".into(),
        Value::String(sample.metadata.namespace.clone()),
    );
    if !sample.metadata.finalizers.is_empty() {
        metadata.insert(
            "finalizers".into(),
            serde_json::to_value(&sample.metadata.finalizers)?,
        );
    }
    body["metadata"] = Value::Object(metadata);
    if sample.status == SampleStatus::default() {
        if let Some(map) = body.as_object_mut() {
            map.remove("status");
        }
    }
    Ok(body)
}

#[derive(Debug, Default)]
struct StoreState {
    objects: HashMap<ObjectKey, StoredObject>,
    revision: u64,
}

/// Shared-memory implementation of [`Store`].
#[derive(Debug)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
    events: broadcast::Sender<WatchEvent>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_watch_buffer(WATCH_BUFFER)
    }

    /// Watchers lagging more than `capacity` events receive `Resync`.
    pub fn with_watch_buffer(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            state: RwLock::new(StoreState::default()),
            events,
        }
    }

    fn emit(&self, event: WatchEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Create an object; every field it carries is owned by `manager`.
    pub async fn create(&self, sample: Sample, manager: &FieldManager) -> Result<Sample> {
        let key = sample.key();
        if key.name.is_empty() || key.namespace.is_empty() {
            return Err(Error::validation("object needs a name and a namespace"));
        }

        let mut state = self.state.write().await;
        if state.objects.contains_key(&key) {
            return Err(Error::conflict(format!("{key} already exists")));
        }
        state.revision += 1;

        let body = initial_body(&sample)?;
        let managers = fields::flatten(&body)
            .into_keys()
            .filter(tracked)
            .map(|path| (path, BTreeSet::from([manager.to_string()])))
            .collect();
        let meta = ObjectMeta {
            name: key.name.clone(),
            namespace: key.namespace.clone(),
            uid: Some(Uid::new().to_string()),
            generation: 1,
            resource_version: state.revision,
            creation_timestamp: Some(Utc::now()),
            deletion_timestamp: None,
            finalizers: Vec::new(),
        };
        let stored = StoredObject {
            body,
            meta,
            managers,
        };
        let rendered = stored.render()?;
        state.objects.insert(key.clone(), stored);
        drop(state);

        tracing::debug!(key = %key, manager = %manager, "object created");
        self.emit(WatchEvent::Applied(key));
        Ok(rendered)
    }

    /// Request deletion. Objects holding finalizers only get a deletion
    /// timestamp; the rest are removed immediately.
    pub async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let mut state = self.state.write().await;
        let StoreState { objects, revision } = &mut *state;
        let object = objects
            .get_mut(key)
            .ok_or_else(|| Error::not_found(key.to_string()))?;

        if !object.has_finalizers() {
            objects.remove(key);
            drop(state);
            tracing::debug!(key = %key, "object removed");
            self.emit(WatchEvent::Deleted(key.clone()));
            return Ok(());
        }

        if object.meta.deletion_timestamp.is_none() {
            *revision += 1;
            object.meta.deletion_timestamp = Some(Utc::now());
            object.meta.resource_version = *revision;
            drop(state);
            tracing::debug!(key = %key, "object marked for deletion");
            self.emit(WatchEvent::Applied(key.clone()));
        }
        Ok(())
    }

    /// Field managers per leaf path, rendered as strings.
    pub async fn managed_fields(&self, key: &ObjectKey) -> Result<BTreeMap<String, Vec<String>>> {
        let state = self.state.read().await;
        let object = state
            .objects
            .get(key)
            .ok_or_else(|| Error::not_found(key.to_string()))?;
        Ok(object
            .managers
            .iter()
            .map(|(path, owners)| (path.to_string(), owners.iter().cloned().collect()))
            .collect())
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.objects.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Sample> {
        let state = self.state.read().await;
        state
            .objects
            .get(key)
            .ok_or_else(|| Error::not_found(key.to_string()))?
            .render()
    }

    async fn list(&self) -> Result<Vec<ObjectKey>> {
        let state = self.state.read().await;
        let mut keys: Vec<ObjectKey> = state.objects.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn apply(
        &self,
        key: &ObjectKey,
        patch: ApplyPatch,
        options: &ApplyOptions,
    ) -> Result<Sample> {
        let manager = options.field_manager.as_str();
        let mut state = self.state.write().await;
        let StoreState { objects, revision } = &mut *state;
        let object = objects
            .get_mut(key)
            .ok_or_else(|| Error::not_found(key.to_string()))?;

        if let Some(expected) = patch.resource_version {
            if expected != object.meta.resource_version {
                return Err(Error::conflict(format!(
                    "{key}: resource version {expected} is stale (live {})",
                    object.meta.resource_version
                )));
            }
        }

        let applied: BTreeMap<FieldPath, Value> = fields::flatten(&patch.body)
            .into_iter()
            .filter(|(path, _)| in_scope(path, options.subresource))
            .collect();

        let conflicts: Vec<String> = applied
            .iter()
            .filter_map(|(path, value)| {
                let others: Vec<&str> = object
                    .managers
                    .get(path)?
                    .iter()
                    .map(String::as_str)
                    .filter(|m| *m != manager)
                    .collect();
                let differs = fields::get(&object.body, path) != Some(value);
                (differs && !others.is_empty()).then(|| format!("{path} (owned by {})", others.join(", ")))
            })
            .collect();
        if !conflicts.is_empty() && !options.force {
            return Err(Error::conflict(format!(
                "{key}: apply by {manager} conflicts on {}",
                conflicts.join("; ")
            )));
        }

        let before = object.body.clone();

        // Fields this manager stopped sending.
        let released: Vec<FieldPath> = object
            .managers
            .iter()
            .filter(|(path, owners)| {
                in_scope(path, options.subresource)
                    && owners.contains(manager)
                    && !applied.contains_key(*path)
            })
            .map(|(path, _)| path.clone())
            .collect();
        for path in released {
            let orphaned = match object.managers.get_mut(&path) {
                Some(owners) => {
                    owners.remove(manager);
                    owners.is_empty()
                }
                None => false,
            };
            if orphaned {
                object.managers.remove(&path);
                fields::remove(&mut object.body, &path);
            }
        }

        for (path, value) in applied {
            let differs = fields::get(&object.body, &path) != Some(&value);
            let owners = object.managers.entry(path.clone()).or_default();
            if differs {
                owners.clear();
            }
            owners.insert(manager.to_string());
            fields::set(&mut object.body, &path, value);
        }

        if object.body == before {
            return object.render();
        }

        *revision += 1;
        object.meta.resource_version = *revision;
        if object.body.get("spec") != before.get("spec") {
            object.meta.generation += 1;
        }

        let rendered = object.render()?;
        let removed = object.meta.deletion_timestamp.is_some() && !object.has_finalizers();
        if removed {
            objects.remove(key);
        }
        drop(state);

        if removed {
            tracing::debug!(key = %key, manager, "last finalizer released; object removed");
            self.emit(WatchEvent::Deleted(key.clone()));
        } else {
            tracing::trace!(key = %key, manager, "apply persisted");
            self.emit(WatchEvent::Applied(key.clone()));
        }
        Ok(rendered)
    }

    async fn watch(&self) -> Result<WatchStream> {
        let rx = self.events.subscribe();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(event) => Some((event, rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "watch lagged; requesting resync");
                    Some((WatchEvent::Resync, rx))
                }
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });
        Ok(Box::pin(stream))
    }
}
