//! Actions and tags: the nodes and names of the version tree

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::operation::Operation;
use crate::types::Annotation;

/// Identifier of an action (a version in the tree)
pub type ActionId = i64;

/// The implicit root version: the empty workflow
pub const ROOT_VERSION: ActionId = 0;

/// One immutable, ordered batch of operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: ActionId,
    /// Parent in the version tree ([`ROOT_VERSION`] for the first edits)
    pub prev_id: ActionId,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub session: i64,
    #[serde(default)]
    pub user: String,
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

impl Action {
    /// Create an empty action stamped with the current time
    pub fn new(id: ActionId, prev_id: ActionId, user: impl Into<String>) -> Self {
        Self {
            id,
            prev_id,
            date: Utc::now(),
            session: 0,
            user: user.into(),
            operations: Vec::new(),
            annotations: Vec::new(),
        }
    }

    pub fn with_session(mut self, session: i64) -> Self {
        self.session = session;
        self
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn with_operations(mut self, operations: impl IntoIterator<Item = Operation>) -> Self {
        self.operations.extend(operations);
        self
    }

    /// Find an annotation by key
    pub fn annotation_by_key(&self, key: &str) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.key == key)
    }
}

/// A name bound to one version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub name: String,
    pub action_id: ActionId,
}

impl Tag {
    pub fn new(name: impl Into<String>, action_id: ActionId) -> Self {
        Self {
            name: name.into(),
            action_id,
        }
    }
}
