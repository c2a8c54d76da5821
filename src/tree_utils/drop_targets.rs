use std::collections::HashSet;

use egui::{Rect, pos2};

use super::layout::TreeLayout;
use super::model::{NodeName, NodeRecord, TreeSnapshot};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DropSlot {
    InsertBefore,
    InsertAfter,
    ReplaceAsParent,
    Swap,
    AppendChild,
}

/// A region that a dragged node can be released on.
///
/// `reference` is the parent to insert into for inserts and replace-as-parent,
/// and the node to be swapped out when `position` is -1.
#[derive(Clone, Debug, PartialEq)]
pub struct DropTarget {
    pub replace: bool,
    pub reference: NodeName,
    pub position: i32,
    // Node whose box the region is attached to
    pub owner: NodeName,
    pub slot: DropSlot,
    pub region: Rect,
}

impl DropTarget {
    pub fn key(&self) -> String { format!("{}#{:?}", self.owner, self.slot) }
    pub fn is_swap(&self) -> bool { self.replace && self.position < 0 }
    pub fn is_insert(&self) -> bool { !self.replace && self.position >= 0 }
    pub fn is_replace_as_parent(&self) -> bool { self.replace && self.position >= 0 }
}

// Targets offered by the static tree shape; drag-specific filtering is done by DropFilter.
pub(crate) fn collect(layout: &TreeLayout, snapshot: &TreeSnapshot, spacing: f32) -> Vec<DropTarget> {
    let band = (spacing * 0.5).max(4.0);
    let mut out = Vec::new();
    for node in layout.visible() {
        let Some(record) = snapshot.node(&node.name) else { continue };
        let r = node.rect();
        let target = |slot, replace, reference: &str, position: usize, region| DropTarget {
            replace,
            reference: reference.to_string(),
            position: position as i32,
            owner: node.name.clone(),
            slot,
            region,
        };

        let parent = node.parent.and_then(|p| layout.node(p)).filter(|p| !p.synthetic);
        if let Some(parent) = parent {
            let index = snapshot
                .node(&parent.name)
                .and_then(|p| p.child_names.iter().position(|c| *c == node.name))
                .unwrap_or(0);
            out.push(target(
                DropSlot::InsertBefore,
                false,
                &parent.name,
                index,
                Rect::from_min_max(pos2(r.left() - band, r.top()), pos2(r.left(), r.bottom())),
            ));
            out.push(target(
                DropSlot::InsertAfter,
                false,
                &parent.name,
                index + 1,
                Rect::from_min_max(pos2(r.right(), r.top()), pos2(r.right() + band, r.bottom())),
            ));
            out.push(target(
                DropSlot::ReplaceAsParent,
                true,
                &parent.name,
                index,
                Rect::from_min_max(pos2(r.left(), r.top() - band), pos2(r.right(), r.top())),
            ));
        }

        out.push(DropTarget {
            replace: true,
            reference: node.name.clone(),
            position: -1,
            owner: node.name.clone(),
            slot: DropSlot::Swap,
            region: r,
        });

        if record.has_capacity() {
            out.push(target(
                DropSlot::AppendChild,
                false,
                &node.name,
                record.child_names.len(),
                Rect::from_min_max(pos2(r.left(), r.bottom()), pos2(r.right(), r.bottom() + band)),
            ));
        }
    }
    out
}

/// Decides which drop targets stay visible while a particular node is dragged.
pub struct DropFilter<'a> {
    snapshot: &'a TreeSnapshot,
    dragged: &'a NodeRecord,
    // The dragged node and everything below it
    excluded: HashSet<NodeName>,
    current: Option<(NodeName, usize)>,
}

impl<'a> DropFilter<'a> {
    pub fn new(snapshot: &'a TreeSnapshot, dragged: &str) -> Option<Self> {
        let record = snapshot.node(dragged)?;
        let mut excluded = snapshot.descendants(dragged);
        excluded.insert(dragged.to_string());
        let current = snapshot.parent_of(dragged).map(|(p, idx)| (p.name.clone(), idx));
        Some(Self { snapshot, dragged: record, excluded, current })
    }

    pub fn excluded(&self) -> &HashSet<NodeName> { &self.excluded }

    pub fn allows(&self, target: &DropTarget) -> bool {
        if self.excluded.contains(&target.owner) || self.excluded.contains(&target.reference) {
            return false;
        }
        if target.is_swap() {
            let Some(owner) = self.snapshot.node(&target.owner) else { return false };
            // Owner's children get handed to the dragged node
            return self.dragged.can_hold(owner.child_names.len());
        }
        if target.is_replace_as_parent() {
            return self.dragged.has_capacity();
        }

        let Some(parent) = self.snapshot.node(&target.reference) else { return false };
        match &self.current {
            Some((current_parent, idx)) if *current_parent == target.reference => {
                // Own left/right slots would leave the node where it is
                let corrected = self.snapshot.move_index(&self.dragged.name, &target.reference, target.position as usize);
                corrected != *idx
            }
            _ => parent.has_capacity(),
        }
    }

    pub fn visible<'t>(&self, targets: &'t [DropTarget]) -> Vec<&'t DropTarget> {
        targets.iter().filter(|t| self.allows(t)).collect()
    }

    /// Owners whose targets are all hidden for this drag.
    pub fn hidden_owners(&self, targets: &[DropTarget]) -> HashSet<NodeName> {
        let mut shown: HashSet<&str> = HashSet::new();
        let mut all: HashSet<&str> = HashSet::new();
        for t in targets {
            all.insert(t.owner.as_str());
            if self.allows(t) {
                shown.insert(t.owner.as_str());
            }
        }
        let mut hidden: HashSet<NodeName> = all.difference(&shown).map(|s| s.to_string()).collect();
        hidden.extend(self.excluded.iter().cloned());
        hidden
    }
}
