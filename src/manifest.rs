//! Multi-document YAML manifests.
//!
//! A manifest is split on `---` separator lines. Each document that decodes
//! to a mapping with a `kind` becomes an item; anything else that is not
//! empty is kept verbatim as a blob so callers can report or forward it.

use serde_json::Value;
use std::path::Path;

use crate::resource::{Sample, KIND};
use crate::types::Result;

const SEPARATOR: &str = "---";

/// Decoded manifest contents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestResources {
    /// Structured objects, in document order.
    pub items: Vec<Value>,
    /// Documents that did not decode to an object, trimmed, newline
    /// terminated.
    pub blobs: Vec<String>,
}

impl ManifestResources {
    pub fn parse(manifest: &str) -> Self {
        let mut resources = Self::default();
        for document in split_documents(manifest) {
            resources.push_document(&document);
        }
        resources
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(Self::parse(&raw))
    }

    fn push_document(&mut self, raw: &str) {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return;
        }

        match serde_yaml::from_str::<Value>(trimmed) {
            Ok(Value::Null) => {}
            Ok(Value::Object(map)) if map.is_empty() => {}
            Ok(Value::Object(map)) if map.get("kind").is_some_and(Value::is_string) => {
                self.items.push(Value::Object(map));
            }
            Ok(_) | Err(_) => {
                let body = trimmed.strip_prefix("---\n").unwrap_or(trimmed);
                self.blobs.push(format!("{body}\n"));
            }
        }
    }

    /// Decode every item of kind `Sample`; other kinds are skipped.
    pub fn samples(&self) -> Result<Vec<Sample>> {
        self.items
            .iter()
            .filter(|item| item.get("kind").and_then(Value::as_str) == Some(KIND))
            .map(|item| Ok(serde_json::from_value(item.clone())?))
            .collect()
    }
}

fn is_separator(line: &str) -> bool {
    match line.strip_prefix(SEPARATOR) {
        Some(rest) => {
            let rest = rest.trim();
            rest.is_empty() || rest.starts_with('#')
        }
        None => false,
    }
}

fn split_documents(manifest: &str) -> Vec<String> {
    let mut documents = Vec::new();
    let mut current = String::new();
    for line in manifest.lines() {
        if is_separator(line) {
            documents.push(std::mem::take(&mut current));
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    documents.push(current);
    documents
}
