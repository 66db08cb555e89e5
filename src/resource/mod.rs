//! The managed object: `Sample`.
//!
//! A Sample carries desired state in `spec` (set by its owner), observed
//! state in `status` (set by reconcilers), and store-managed metadata
//! (generation, resource version, deletion timestamp, finalizers).

mod status;

pub use status::{Condition, ConditionStatus, SampleStatus, State, CONDITION_DIVISIBLE_BY_THREE};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ObjectKey;

pub const API_VERSION: &str = "operator.kyma-project.io/v1alpha1";
pub const KIND: &str = "Sample";

fn default_api_version() -> String {
    API_VERSION.to_string()
}

fn default_kind() -> String {
    KIND.to_string()
}

/// Store-managed object metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Bumped by the store whenever `spec` changes.
    #[serde(default)]
    pub generation: i64,

    /// Bumped by the store on every persisted change.
    #[serde(default)]
    pub resource_version: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
}

/// Desired state, owned by whoever created the object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SampleSpec {
    /// Free-form numeric string; anything unparsable is a valid "no".
    #[serde(default)]
    pub some_number: String,
}

/// The unit of reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: SampleSpec,
    #[serde(default)]
    pub status: SampleStatus,
}

impl Sample {
    pub fn new(key: &ObjectKey, some_number: impl Into<String>) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta {
                name: key.name.clone(),
                namespace: key.namespace.clone(),
                ..ObjectMeta::default()
            },
            spec: SampleSpec {
                some_number: some_number.into(),
            },
            status: SampleStatus::default(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.metadata.namespace, &self.metadata.name)
    }

    pub fn generation(&self) -> i64 {
        self.metadata.generation
    }

    pub fn state(&self) -> State {
        self.status.state
    }

    /// Marked for removal by the store.
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata.finalizers.iter().any(|f| f == finalizer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_decodes_kubernetes_shape() {
        let sample: Sample = serde_json::from_value(serde_json::json!({
            "apiVersion": API_VERSION,
            "kind": KIND,
            "metadata": {
                "name": "sample-a",
                "namespace": "default",
                "generation": 2,
                "finalizers": ["sample.kyma-project.io/finalizer"],
            },
            "spec": { "someNumber": "9" },
            "status": { "state": "Ready" },
        }))
        .unwrap();

        assert_eq!(sample.key(), ObjectKey::new("default", "sample-a"));
        assert_eq!(sample.generation(), 2);
        assert_eq!(sample.spec.some_number, "9");
        assert_eq!(sample.state(), State::Ready);
        assert!(sample.has_finalizer("sample.kyma-project.io/finalizer"));
        assert!(!sample.is_deleting());
    }

    #[test]
    fn test_missing_spec_and_status_default() {
        let sample: Sample = serde_json::from_value(serde_json::json!({
            "metadata": { "name": "bare", "namespace": "default" },
        }))
        .unwrap();

        assert_eq!(sample.kind, KIND);
        assert_eq!(sample.spec.some_number, "");
        assert_eq!(sample.state(), State::Unset);
        assert!(sample.status.conditions.is_empty());
    }
}
