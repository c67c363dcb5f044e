use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::CorrelationId;
use crate::scalar::ScalarValue;

/// The contract every level of the entity tree implements, for each of its
/// three kinds (live, history entry, draft).
///
/// A node exposes its correlation id, its diffable scalar fields by name, and
/// its children. The copy and diff machinery is written against this trait
/// only, so it works across kinds (a draft can be diffed against the history
/// entry it branched from) and keeps working if a deeper level is ever added.
///
/// Leaf levels set `Child = Self` and report no children.
pub trait EntityNode {
    type Child: EntityNode;

    /// The stable identity carried across every copy of this logical record.
    fn correlation_id(&self) -> CorrelationId;

    fn set_correlation_id(&mut self, id: CorrelationId);

    /// All diffable fields, as (name, value) pairs. The set of names is fixed
    /// per tree level and identical across kinds.
    fn scalar_fields(&self) -> Vec<(&'static str, ScalarValue)>;

    /// Write one scalar field back by name. Rejects unknown names and
    /// mistyped values, which only arise when a diff is applied to a node of
    /// the wrong level.
    fn set_scalar(&mut self, name: &str, value: ScalarValue) -> Result<(), CoreError>;

    fn children(&self) -> &[Self::Child];

    fn child_mut(&mut self, id: CorrelationId) -> Option<&mut Self::Child>;

    fn push_child(&mut self, child: Self::Child);

    /// Detach the child with the given correlation id. Returns false when no
    /// such child exists.
    fn remove_child(&mut self, id: CorrelationId) -> bool;

    /// Construct an empty child of this node's own kind.
    fn blank_child(&self) -> Self::Child;
}

/// Two nodes represent the same logical record iff their correlation ids
/// match. Holds across kinds: a live record, its history snapshots, and any
/// drafts branched from them all carry the same id.
pub fn same_as<A: EntityNode, B: EntityNode>(a: &A, b: &B) -> bool {
    a.correlation_id() == b.correlation_id()
}

/// A kind-erased deep copy of an entity tree: correlation ids, scalar fields,
/// and children, recursively. Snapshots carry trees between kinds (draft
/// creation, promotion, revert), ride inside diffs as added/removed child
/// payloads, and feed the history-entry checksum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub correlation_id: CorrelationId,
    pub fields: Vec<(String, ScalarValue)>,
    pub children: Vec<NodeSnapshot>,
}

impl NodeSnapshot {
    pub fn capture<N: EntityNode>(node: &N) -> Self {
        Self {
            correlation_id: node.correlation_id(),
            fields: node
                .scalar_fields()
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
            children: node.children().iter().map(NodeSnapshot::capture).collect(),
        }
    }

    /// Overwrite `target` with this snapshot's content.
    ///
    /// Scalars are copied field by field; children are reconciled by
    /// correlation id: children absent from the snapshot are detached,
    /// matching children are overwritten in place, and the rest are created
    /// via `blank_child` so they land in the target's own kind. Target rows
    /// keep their storage identity; only correlation ids are carried over.
    pub fn write_into<N: EntityNode>(&self, target: &mut N) -> Result<(), CoreError> {
        target.set_correlation_id(self.correlation_id);
        for (name, value) in &self.fields {
            target.set_scalar(name, value.clone())?;
        }

        let keep: BTreeSet<CorrelationId> =
            self.children.iter().map(|c| c.correlation_id).collect();
        let stale: Vec<CorrelationId> = target
            .children()
            .iter()
            .map(|c| c.correlation_id())
            .filter(|id| !keep.contains(id))
            .collect();
        for id in stale {
            target.remove_child(id);
        }

        for child_snap in &self.children {
            match target.child_mut(child_snap.correlation_id) {
                Some(existing) => child_snap.write_into(existing)?,
                None => {
                    let mut fresh = target.blank_child();
                    child_snap.write_into(&mut fresh)?;
                    target.push_child(fresh);
                }
            }
        }
        Ok(())
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

/// Deep-copy `source` into a blank node of another kind. Correlation ids are
/// preserved all the way down; this is how drafts are branched from history
/// entries and how drafts are promoted to live records.
pub fn copy_into<S: EntityNode, T: EntityNode>(source: &S, target: &mut T) -> Result<(), CoreError> {
    NodeSnapshot::capture(source).write_into(target)
}
