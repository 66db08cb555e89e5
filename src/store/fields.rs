//! Field paths and per-field ownership bookkeeping.
//!
//! A JSON document is flattened into leaf paths. Arrays whose items all
//! carry a string `type` are list-maps (one entry per item, keyed by type);
//! arrays of scalars are sets (one entry per member). Anything else is an
//! atomic leaf. Empty objects, empty arrays and nulls contribute nothing.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Key field of list-map items (`conditions`).
pub const LIST_MAP_KEY: &str = "type";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathElement {
    /// Object member.
    Field(String),
    /// List-map item, by its `type`.
    Key(String),
    /// Set member, by its JSON text.
    Member(String),
}

/// Path from the document root to a leaf.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FieldPath(Vec<PathElement>);

impl FieldPath {
    /// Path made only of object members, e.g. `["status", "state"]`.
    pub fn fields(names: &[&str]) -> Self {
        Self(
            names
                .iter()
                .map(|n| PathElement::Field((*n).to_string()))
                .collect(),
        )
    }

    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in &self.0 {
            match element {
                PathElement::Field(name) => write!(f, ".{name}")?,
                PathElement::Key(key) => write!(f, "[{LIST_MAP_KEY}={key}]")?,
                PathElement::Member(member) => write!(f, "[={member}]")?,
            }
        }
        Ok(())
    }
}

fn list_map_key(item: &Value) -> Option<&str> {
    item.as_object()?.get(LIST_MAP_KEY)?.as_str()
}

fn is_scalar(item: &Value) -> bool {
    matches!(item, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

fn is_empty_container(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Item left with nothing but its key.
fn is_key_only(item: &Value) -> bool {
    item.as_object()
        .is_some_and(|map| map.keys().all(|k| k == LIST_MAP_KEY))
}

/// Flatten a document into its leaf paths and values.
pub fn flatten(value: &Value) -> BTreeMap<FieldPath, Value> {
    let mut out = BTreeMap::new();
    let mut path = Vec::new();
    flatten_into(value, &mut path, &mut out);
    out
}

fn flatten_into(value: &Value, path: &mut Vec<PathElement>, out: &mut BTreeMap<FieldPath, Value>) {
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (name, child) in map {
                path.push(PathElement::Field(name.clone()));
                flatten_into(child, path, out);
                path.pop();
            }
        }
        Value::Array(items) if items.is_empty() => {}
        Value::Array(items) if items.iter().all(|i| list_map_key(i).is_some()) => {
            for item in items {
                if let Some(key) = list_map_key(item) {
                    path.push(PathElement::Key(key.to_string()));
                    flatten_into(item, path, out);
                    path.pop();
                }
            }
        }
        Value::Array(items) if items.iter().all(is_scalar) => {
            for item in items {
                path.push(PathElement::Member(item.to_string()));
                out.insert(FieldPath(path.clone()), item.clone());
                path.pop();
            }
        }
        leaf => {
            out.insert(FieldPath(path.clone()), leaf.clone());
        }
    }
}

/// Value at `path`, if present.
pub fn get<'a>(root: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    let mut node = root;
    for element in &path.0 {
        node = match element {
            PathElement::Field(name) => node.as_object()?.get(name)?,
            PathElement::Key(key) => node
                .as_array()?
                .iter()
                .find(|i| list_map_key(i) == Some(key.as_str()))?,
            PathElement::Member(member) => node
                .as_array()?
                .iter()
                .find(|i| i.to_string() == *member)?,
        };
    }
    Some(node)
}

/// Write `value` at `path`, creating intermediate containers.
pub fn set(root: &mut Value, path: &FieldPath, value: Value) {
    set_at(root, &path.0, value);
}

fn set_at(node: &mut Value, path: &[PathElement], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *node = value;
        return;
    };

    match head {
        PathElement::Field(name) => {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            if let Some(map) = node.as_object_mut() {
                let child = map.entry(name.clone()).or_insert(Value::Null);
                set_at(child, rest, value);
            }
        }
        PathElement::Key(key) => {
            if !node.is_array() {
                *node = Value::Array(Vec::new());
            }
            if let Some(items) = node.as_array_mut() {
                let index = match items
                    .iter()
                    .position(|i| list_map_key(i) == Some(key.as_str()))
                {
                    Some(index) => index,
                    None => {
                        let mut item = Map::new();
                        item.insert(LIST_MAP_KEY.to_string(), Value::String(key.clone()));
                        items.push(Value::Object(item));
                        items.len() - 1
                    }
                };
                if let Some(item) = items.get_mut(index) {
                    set_at(item, rest, value);
                }
            }
        }
        PathElement::Member(member) => {
            if !node.is_array() {
                *node = Value::Array(Vec::new());
            }
            if let Some(items) = node.as_array_mut() {
                if !items.iter().any(|i| i.to_string() == *member) {
                    items.push(value);
                }
            }
        }
    }
}

/// Remove the leaf at `path`, pruning containers it leaves empty.
pub fn remove(root: &mut Value, path: &FieldPath) {
    remove_at(root, &path.0);
}

fn remove_at(node: &mut Value, path: &[PathElement]) {
    let Some((head, rest)) = path.split_first() else {
        return;
    };

    match head {
        PathElement::Field(name) => {
            let Some(map) = node.as_object_mut() else {
                return;
            };
            if rest.is_empty() {
                map.remove(name);
                return;
            }
            let prune = match map.get_mut(name) {
                Some(child) => {
                    remove_at(child, rest);
                    is_empty_container(child)
                }
                None => false,
            };
            if prune {
                map.remove(name);
            }
        }
        PathElement::Key(key) => {
            let Some(items) = node.as_array_mut() else {
                return;
            };
            if rest.is_empty() {
                items.retain(|i| list_map_key(i) != Some(key.as_str()));
                return;
            }
            // The key leaf goes away with the item itself.
            let removes_key = matches!(rest, [PathElement::Field(f)] if f == LIST_MAP_KEY);
            if !removes_key {
                if let Some(item) = items
                    .iter_mut()
                    .find(|i| list_map_key(i) == Some(key.as_str()))
                {
                    remove_at(item, rest);
                }
            }
            items.retain(|i| !(list_map_key(i) == Some(key.as_str()) && is_key_only(i)));
        }
        PathElement::Member(member) => {
            if let Some(items) = node.as_array_mut() {
                items.retain(|i| i.to_string() != *member);
            }
        }
    }
}

/// Owner/field allow-list applied when a writer builds its patch.
///
/// Anything outside the listed subtrees is dropped before the patch leaves
/// the process, so a writer can never claim a field it does not own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldAllowList {
    prefixes: Vec<FieldPath>,
}

impl FieldAllowList {
    pub fn new(prefixes: Vec<FieldPath>) -> Self {
        Self { prefixes }
    }

    /// `status.conditions` only.
    pub fn conditions() -> Self {
        Self::new(vec![FieldPath::fields(&["status", "conditions"])])
    }

    /// `status.state` only.
    pub fn state() -> Self {
        Self::new(vec![FieldPath::fields(&["status", "state"])])
    }

    /// `metadata.finalizers` only.
    pub fn finalizers() -> Self {
        Self::new(vec![FieldPath::fields(&["metadata", "finalizers"])])
    }

    pub fn allows(&self, path: &FieldPath) -> bool {
        self.prefixes.iter().any(|p| path.starts_with(p))
    }

    /// Copy of `document` restricted to the allowed subtrees.
    pub fn retain(&self, document: &Value) -> Value {
        let mut out = Value::Object(Map::new());
        for prefix in &self.prefixes {
            if let Some(subtree) = get(document, prefix) {
                set(&mut out, prefix, subtree.clone());
            }
        }
        out
    }
}
