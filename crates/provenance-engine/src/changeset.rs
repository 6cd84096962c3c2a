//! Change tracking for a log
//!
//! Mutating methods of [`crate::Vistrail`] record what they did in a
//! [`ChangeSet`]. Persistence consumes the change set instead of scanning
//! per-object dirty flags, and the synchronizer reads a fork's change set to
//! find what the fork added or removed since it was split off.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::action::{ActionId, Tag};
use crate::ids::ObjectId;
use crate::types::Annotation;

/// Everything that changed in a log since the last save (or fork)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    /// Actions appended to the log
    pub new_actions: BTreeSet<ActionId>,
    /// Annotations added to pre-existing actions, as `(action, annotation id)`
    pub added_annotations: BTreeSet<(ActionId, ObjectId)>,
    /// Annotations removed from pre-existing actions
    pub deleted_annotations: Vec<(ActionId, Annotation)>,
    pub added_tags: Vec<Tag>,
    pub deleted_tags: Vec<Tag>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.new_actions.is_empty()
            && self.added_annotations.is_empty()
            && self.deleted_annotations.is_empty()
            && self.added_tags.is_empty()
            && self.deleted_tags.is_empty()
    }

    pub fn is_new_action(&self, id: ActionId) -> bool {
        self.new_actions.contains(&id)
    }

    pub(crate) fn record_action(&mut self, id: ActionId) {
        self.new_actions.insert(id);
    }

    pub(crate) fn record_annotation_added(&mut self, action: ActionId, id: ObjectId) {
        // Annotations on new actions travel with the action itself.
        if !self.is_new_action(action) {
            self.added_annotations.insert((action, id));
        }
    }

    pub(crate) fn record_annotation_deleted(&mut self, action: ActionId, annotation: Annotation) {
        if self.is_new_action(action) {
            return;
        }
        if !self.added_annotations.remove(&(action, annotation.id)) {
            self.deleted_annotations.push((action, annotation));
        }
    }

    pub(crate) fn record_tag_added(&mut self, tag: Tag) {
        if let Some(pos) = self.deleted_tags.iter().position(|t| *t == tag) {
            self.deleted_tags.remove(pos);
        } else {
            self.added_tags.push(tag);
        }
    }

    pub(crate) fn record_tag_deleted(&mut self, tag: Tag) {
        if let Some(pos) = self.added_tags.iter().position(|t| *t == tag) {
            self.added_tags.remove(pos);
        } else {
            self.deleted_tags.push(tag);
        }
    }
}
