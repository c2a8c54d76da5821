//! Turns finished drag-and-drop and wiring gestures into runtime calls.

use crate::api::RuntimeCall;
use crate::edit::error::EditError;
use crate::tree_utils::drop_targets::{DropFilter, DropTarget};
use crate::tree_utils::model::{DataWiring, NodeRecord, TreeSnapshot};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EditKind {
    Insert,
    ReplaceAsParent,
    Swap,
    AddNew,
    Wire,
    Unwire,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EditPlan {
    pub kind: EditKind,
    // Dispatched strictly in order
    pub calls: Vec<RuntimeCall>,
}

/// Plan the calls for releasing `dragged` on `target`.
///
/// * insert (`position >= 0`, no replace): one move into the reference parent
/// * replace-as-parent (`position >= 0`, replace): detach the dragged node, hang
///   the node at `position` under it, then move it into that slot
/// * swap (`position == -1`, replace): one replace call
///
/// Same-parent moves get their index corrected before dispatch, see
/// [`TreeSnapshot::move_index`].
pub fn plan_drop(snapshot: &TreeSnapshot, dragged: &str, target: &DropTarget) -> Result<EditPlan, EditError> {
    let filter = DropFilter::new(snapshot, dragged).ok_or_else(|| EditError::UnknownNode(dragged.to_string()))?;
    if !filter.allows(target) {
        return Err(EditError::InvalidDrop(format!("'{}' cannot be dropped on {}", dragged, target.key())));
    }

    if target.is_swap() {
        return Ok(EditPlan {
            kind: EditKind::Swap,
            calls: vec![RuntimeCall::ReplaceNode {
                old_node_name: target.reference.clone(),
                new_node_name: dragged.to_string(),
            }],
        });
    }

    let parent = snapshot
        .node(&target.reference)
        .ok_or_else(|| EditError::UnknownNode(target.reference.clone()))?;
    let position = target.position.max(0) as usize;
    let index = snapshot.move_index(dragged, &parent.name, position) as i32;

    if !target.replace {
        return Ok(EditPlan {
            kind: EditKind::Insert,
            calls: vec![RuntimeCall::move_node(dragged, &parent.name, index)],
        });
    }

    let displaced = parent
        .child_names
        .get(position)
        .ok_or_else(|| EditError::InvalidDrop(format!("'{}' has no child at index {}", parent.name, position)))?;
    let dragged_record = snapshot.node(dragged).ok_or_else(|| EditError::UnknownNode(dragged.to_string()))?;

    // Detaching first keeps the runtime from seeing a cycle in between steps
    Ok(EditPlan {
        kind: EditKind::ReplaceAsParent,
        calls: vec![
            RuntimeCall::detach(dragged),
            RuntimeCall::move_node(displaced, dragged, dragged_record.child_names.len() as i32),
            RuntimeCall::move_node(dragged, &parent.name, index),
        ],
    })
}

/// Plan inserting a brand-new node definition at an insert target.
pub fn plan_insert_new(definition: &NodeRecord, target: &DropTarget) -> Result<EditPlan, EditError> {
    if !target.is_insert() {
        return Err(EditError::InvalidDrop(format!("a new node can only be inserted, not dropped on {}", target.key())));
    }
    Ok(EditPlan {
        kind: EditKind::AddNew,
        calls: vec![RuntimeCall::AddNodeAtIndex {
            parent_name: target.reference.clone(),
            node: definition.clone(),
            new_child_index: target.position,
        }],
    })
}

pub fn plan_wire(wiring: &DataWiring) -> EditPlan {
    EditPlan { kind: EditKind::Wire, calls: vec![RuntimeCall::WireData { wirings: vec![wiring.clone()] }] }
}

pub fn plan_unwire(wiring: &DataWiring) -> EditPlan {
    EditPlan { kind: EditKind::Unwire, calls: vec![RuntimeCall::UnwireData { wirings: vec![wiring.clone()] }] }
}
