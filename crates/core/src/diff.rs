use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::CorrelationId;
use crate::node::{EntityNode, NodeSnapshot, same_as};
use crate::scalar::ScalarValue;

/// One changed scalar field. The old value is retained so review UIs can
/// render before/after, and so a stricter merge policy could detect drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarChange {
    pub field: String,
    pub old: ScalarValue,
    pub new: ScalarValue,
}

/// A matched child pair whose recursive diff was non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildDiff {
    pub correlation_id: CorrelationId,
    pub diff: TreeDiff,
}

/// Structured comparison between two entity trees of the same level.
///
/// Children are partitioned by correlation id: present only in the old tree
/// (`removed`), only in the new tree (`added`), or in both with differences
/// (`changed`). Added and removed entries carry full snapshots so a review
/// page can show what they contain without further loads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeDiff {
    pub scalar_changes: Vec<ScalarChange>,
    pub added: Vec<NodeSnapshot>,
    pub removed: Vec<NodeSnapshot>,
    pub changed: Vec<ChildDiff>,
}

impl TreeDiff {
    /// True when the diff carries no effective change at any depth. Checked
    /// recursively: a `changed` entry whose sub-diff is empty does not count.
    pub fn is_empty(&self) -> bool {
        self.scalar_changes.is_empty()
            && self.added.is_empty()
            && self.removed.is_empty()
            && self.changed.iter().all(|c| c.diff.is_empty())
    }

    pub fn scalar_change(&self, field: &str) -> Option<&ScalarChange> {
        self.scalar_changes.iter().find(|c| c.field == field)
    }

    pub fn child_diff(&self, id: CorrelationId) -> Option<&TreeDiff> {
        self.changed
            .iter()
            .find(|c| c.correlation_id == id)
            .map(|c| &c.diff)
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

/// Compare two trees level by level, matching children by correlation id.
///
/// The two sides may be of different kinds (history entry vs draft, live vs
/// history entry); only the field shape must line up. Unchanged fields are
/// never recorded, so `diff(x, copy_of_x)` is empty.
pub fn diff<O: EntityNode, N: EntityNode>(old: &O, new: &N) -> TreeDiff {
    let mut out = TreeDiff::default();

    let new_fields: BTreeMap<&'static str, ScalarValue> = new.scalar_fields().into_iter().collect();
    for (name, old_value) in old.scalar_fields() {
        if let Some(new_value) = new_fields.get(name)
            && old_value != *new_value
        {
            out.scalar_changes.push(ScalarChange {
                field: name.to_string(),
                old: old_value,
                new: new_value.clone(),
            });
        }
    }

    for old_child in old.children() {
        let matched = new.children().iter().any(|nc| same_as(old_child, nc));
        if !matched {
            out.removed.push(NodeSnapshot::capture(old_child));
        }
    }

    for new_child in new.children() {
        match old.children().iter().find(|oc| same_as(*oc, new_child)) {
            Some(old_child) => {
                let sub = diff(old_child, new_child);
                if !sub.is_empty() {
                    out.changed.push(ChildDiff {
                        correlation_id: new_child.correlation_id(),
                        diff: sub,
                    });
                }
            }
            None => out.added.push(NodeSnapshot::capture(new_child)),
        }
    }

    out
}

/// Patch `target` in place with a diff computed elsewhere.
///
/// The target need not equal the diff's old side; it may have drifted since
/// the diff was taken. Policy per the archive's merge semantics:
///
/// - scalar changes overwrite unconditionally (last writer wins);
/// - added children are matched by correlation id first, so re-applying the
///   same diff overwrites instead of duplicating;
/// - removed children already absent are a no-op;
/// - changed children missing from the target are skipped with a logged gap,
///   since the target may have legitimately dropped them.
pub fn apply_diff<T: EntityNode>(target: &mut T, diff: &TreeDiff) -> Result<(), CoreError> {
    for change in &diff.scalar_changes {
        target.set_scalar(&change.field, change.new.clone())?;
    }

    for snap in &diff.removed {
        target.remove_child(snap.correlation_id);
    }

    for snap in &diff.added {
        match target.child_mut(snap.correlation_id) {
            Some(existing) => snap.write_into(existing)?,
            None => {
                let mut fresh = target.blank_child();
                snap.write_into(&mut fresh)?;
                target.push_child(fresh);
            }
        }
    }

    for child in &diff.changed {
        match target.child_mut(child.correlation_id) {
            Some(existing) => apply_diff(existing, &child.diff)?,
            None => {
                tracing::warn!(
                    correlation_id = %child.correlation_id,
                    "child referenced by diff is missing from target, skipping"
                );
            }
        }
    }

    Ok(())
}
