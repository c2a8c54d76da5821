use std::collections::BTreeSet;

use crate::tree_utils::model::{DataWiring, NodeName, TreeSnapshot};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    None,
    Node(NodeName),
    Nodes(BTreeSet<NodeName>),
    Wiring(DataWiring),
}

impl Selection {
    // One name collapses to Node, zero to None
    pub fn from_names<I: IntoIterator<Item = NodeName>>(names: I) -> Self {
        let mut set: BTreeSet<NodeName> = names.into_iter().collect();
        match set.len() {
            0 => Selection::None,
            1 => set.pop_first().map(Selection::Node).unwrap_or_default(),
            _ => Selection::Nodes(set),
        }
    }

    pub fn is_none(&self) -> bool { matches!(self, Selection::None) }

    pub fn contains_node(&self, name: &str) -> bool {
        match self {
            Selection::Node(n) => n == name,
            Selection::Nodes(set) => set.contains(name),
            _ => false,
        }
    }

    pub fn node_names(&self) -> Vec<&str> {
        match self {
            Selection::Node(n) => vec![n.as_str()],
            Selection::Nodes(set) => set.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    pub fn wiring(&self) -> Option<&DataWiring> {
        match self {
            Selection::Wiring(w) => Some(w),
            _ => None,
        }
    }

    /// Add or remove `name`, keeping any other selected nodes.
    pub fn toggled(&self, name: &str) -> Selection {
        let mut names: BTreeSet<NodeName> = self.node_names().into_iter().map(str::to_string).collect();
        if !names.remove(name) {
            names.insert(name.to_string());
        }
        Selection::from_names(names)
    }

    pub fn extended<I: IntoIterator<Item = NodeName>>(&self, more: I) -> Selection {
        let names = self.node_names().into_iter().map(str::to_string).chain(more);
        Selection::from_names(names)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SelectionRequest {
    Applied,
    Unchanged,
    // Held until confirm_discard / cancel_discard
    NeedsConfirmation,
}

type Listener = Box<dyn FnMut(&Selection)>;

/// Current selection, shared with the property panel.
///
/// Listeners run synchronously on every change. Leaving a node that has unsaved
/// edits in the property panel is held back until the discard is confirmed.
#[derive(Default)]
pub struct SelectionBridge {
    current: Selection,
    pending: Option<Selection>,
    unsaved_edits: bool,
    listeners: Vec<Listener>,
}

impl std::fmt::Debug for SelectionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectionBridge")
            .field("current", &self.current)
            .field("pending", &self.pending)
            .field("unsaved_edits", &self.unsaved_edits)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl SelectionBridge {
    pub fn new() -> Self { Self::default() }

    pub fn subscribe(&mut self, listener: impl FnMut(&Selection) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn current(&self) -> &Selection { &self.current }
    pub fn pending(&self) -> Option<&Selection> { self.pending.as_ref() }
    pub fn has_unsaved_edits(&self) -> bool { self.unsaved_edits }

    pub fn set_unsaved_edits(&mut self, unsaved: bool) {
        self.unsaved_edits = unsaved;
    }

    pub fn request(&mut self, selection: Selection) -> SelectionRequest {
        if selection == self.current {
            return SelectionRequest::Unchanged;
        }
        if self.unsaved_edits && matches!(self.current, Selection::Node(_)) {
            log::debug!("selection change held back: unsaved edits on {:?}", self.current);
            self.pending = Some(selection);
            return SelectionRequest::NeedsConfirmation;
        }
        self.apply(selection);
        SelectionRequest::Applied
    }

    /// Drop the unsaved edits and apply the held selection.
    pub fn confirm_discard(&mut self) -> bool {
        let Some(selection) = self.pending.take() else { return false };
        self.unsaved_edits = false;
        self.apply(selection);
        true
    }

    pub fn cancel_discard(&mut self) {
        self.pending = None;
    }

    /// Clear the selection along with any held request and unsaved edits.
    pub fn reset(&mut self) {
        self.pending = None;
        self.unsaved_edits = false;
        if !self.current.is_none() {
            self.apply(Selection::None);
        }
    }

    /// Forget names that are gone from `snapshot`.
    pub fn prune(&mut self, snapshot: &TreeSnapshot) {
        let pruned = match &self.current {
            Selection::None => return,
            Selection::Wiring(w) => {
                if snapshot.data_wirings.contains(w) { return; }
                Selection::None
            }
            current => {
                let names = current.node_names();
                if names.iter().all(|n| snapshot.contains(n)) { return; }
                Selection::from_names(names.into_iter().filter(|n| snapshot.contains(n)).map(str::to_string))
            }
        };
        // The node being edited is gone, nothing left to protect
        self.unsaved_edits = false;
        self.pending = None;
        self.apply(pruned);
    }

    fn apply(&mut self, selection: Selection) {
        self.current = selection;
        for listener in self.listeners.iter_mut() {
            listener(&self.current);
        }
    }
}
