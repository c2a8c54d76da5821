use std::collections::{HashMap, HashSet, VecDeque};
use serde::{Serialize, Deserialize};

// Node names are the identity key everywhere on the client
pub type NodeName = String;

pub const FOREST_ROOT: &str = "__forest_root";
pub const SUBTREE_CLASS: &str = "Subtree";

// Type tags that accept a source of any type
const OBJECT_TYPES: [&str; 3] = ["object", "builtins.object", "__builtin__.object"];

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    #[default]
    Uninitialized,
    Idle,
    Running,
    Succeeded,
    Failed,
    DebugPreTick,
    DebugTick,
    DebugPostTick,
    Shutdown,
    #[serde(other)]
    Unknown,
}

impl NodeState {
    pub fn is_debug(self) -> bool {
        matches!(self, NodeState::DebugPreTick | NodeState::DebugTick | NodeState::DebugPostTick)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinKind {
    Options,
    Inputs,
    Outputs,
}

impl PinKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PinKind::Options => "options",
            PinKind::Inputs => "inputs",
            PinKind::Outputs => "outputs",
        }
    }

    /// The kind a wire from this kind must end on. Options are never wireable.
    pub fn opposite(self) -> Option<PinKind> {
        match self {
            PinKind::Inputs => Some(PinKind::Outputs),
            PinKind::Outputs => Some(PinKind::Inputs),
            PinKind::Options => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPin {
    pub key: String,
    #[serde(default)]
    pub serialized_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub serialized_value: String,
}

impl DataPin {
    pub fn new(key: &str, serialized_type: &str) -> Self {
        Self { key: key.to_string(), serialized_type: serialized_type.to_string(), serialized_value: String::new() }
    }

    /// Type name behind the serialized tag. The runtime sends jsonpickle tags
    /// like `{"py/type": "builtins.int"}`; bare names are taken as they are.
    pub fn type_name(&self) -> String {
        let raw = self.serialized_type.trim();
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Object(tag)) => match tag.get("py/type").and_then(|t| t.as_str()) {
                Some(name) => name.trim().to_string(),
                None => raw.to_string(),
            },
            Ok(serde_json::Value::String(name)) => name.trim().to_string(),
            _ => raw.to_string(),
        }
    }

    pub fn accepts_any(&self) -> bool {
        OBJECT_TYPES.contains(&self.type_name().as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: NodeName,
    #[serde(default)]
    pub module: String,
    pub node_class: String,
    #[serde(default)]
    pub state: NodeState,
    // -1 = unbounded flow control, 0 = leaf, >0 = bounded
    #[serde(default)]
    pub max_children: i32,
    #[serde(default)]
    pub child_names: Vec<NodeName>,
    #[serde(default)]
    pub options: Vec<DataPin>,
    #[serde(default)]
    pub inputs: Vec<DataPin>,
    #[serde(default)]
    pub outputs: Vec<DataPin>,
}

impl NodeRecord {
    pub fn new(name: &str, node_class: &str, max_children: i32) -> Self {
        Self {
            name: name.to_string(),
            module: String::new(),
            node_class: node_class.to_string(),
            state: NodeState::default(),
            max_children,
            child_names: Vec::new(),
            options: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn is_subtree(&self) -> bool { self.node_class == SUBTREE_CLASS }

    /// Whether one more child fits under this node.
    pub fn has_capacity(&self) -> bool {
        self.max_children < 0 || (self.child_names.len() as i64) < self.max_children as i64
    }

    /// Whether `count` children would fit under this node.
    pub fn can_hold(&self, count: usize) -> bool {
        self.max_children < 0 || count as i64 <= self.max_children as i64
    }

    pub fn pins(&self, kind: PinKind) -> &[DataPin] {
        match kind {
            PinKind::Options => &self.options,
            PinKind::Inputs => &self.inputs,
            PinKind::Outputs => &self.outputs,
        }
    }

    pub fn pin(&self, kind: PinKind, key: &str) -> Option<&DataPin> {
        self.pins(kind).iter().find(|p| p.key == key)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WiringEndpoint {
    pub node_name: NodeName,
    pub data_kind: PinKind,
    pub data_key: String,
}

impl WiringEndpoint {
    pub fn new(node_name: &str, data_kind: PinKind, data_key: &str) -> Self {
        Self { node_name: node_name.to_string(), data_kind, data_key: data_key.to_string() }
    }

    // node/kind/key, shared by pins and wires in the scene
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.node_name, self.data_kind.as_str(), self.data_key)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataWiring {
    pub source: WiringEndpoint,
    pub target: WiringEndpoint,
}

impl DataWiring {
    pub fn key(&self) -> String {
        format!("{}+{}", self.source.key(), self.target.key())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub data_wirings: Vec<DataWiring>,
}

impl TreeSnapshot {
    pub fn new(name: &str, nodes: Vec<NodeRecord>) -> Self {
        Self { name: name.to_string(), nodes, data_wirings: Vec::new() }
    }

    pub fn node(&self, name: &str) -> Option<&NodeRecord> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut NodeRecord> {
        self.nodes.iter_mut().find(|n| n.name == name)
    }

    pub fn contains(&self, name: &str) -> bool { self.node(name).is_some() }

    /// The declared parent of `name` and the child's index in the parent's child list.
    pub fn parent_of(&self, name: &str) -> Option<(&NodeRecord, usize)> {
        self.nodes.iter().find_map(|n| {
            n.child_names.iter().position(|c| c == name).map(|idx| (n, idx))
        })
    }

    /// Nodes that no other node lists as a child, in snapshot order.
    pub fn top_level(&self) -> Vec<&NodeRecord> {
        let claimed: HashSet<&str> = self
            .nodes
            .iter()
            .flat_map(|n| n.child_names.iter().map(String::as_str))
            .collect();
        self.nodes.iter().filter(|n| !claimed.contains(n.name.as_str())).collect()
    }

    /// All nodes below `name` (not including `name`). Tolerates cycles.
    pub fn descendants(&self, name: &str) -> HashSet<NodeName> {
        let index: HashMap<&str, &NodeRecord> = self.nodes.iter().map(|n| (n.name.as_str(), n)).collect();
        let mut out = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(name);
        while let Some(cur) = queue.pop_front() {
            let Some(node) = index.get(cur) else { continue };
            for child in &node.child_names {
                if child != name && out.insert(child.clone()) {
                    queue.push_back(child.as_str());
                }
            }
        }
        out
    }

    /// Index to send when moving `node` into `new_parent` at `index`.
    ///
    /// Taking the node out of its old slot shifts later siblings left, so a move
    /// further right within the same parent lands one slot earlier.
    pub fn move_index(&self, node: &str, new_parent: &str, index: usize) -> usize {
        match self.parent_of(node) {
            Some((parent, current)) if parent.name == new_parent && index > current => index - 1,
            _ => index,
        }
    }

    pub fn is_ancestor(&self, ancestor: &str, node: &str) -> bool {
        self.descendants(ancestor).contains(node)
    }
}

/// Orient two pins into a source->target wiring when they can be connected.
///
/// The pins must sit on different nodes and have opposite kinds (one output, one
/// input). The target's type has to match the source's unless the target is
/// declared as the object type, which accepts anything.
pub fn wire_compatible(snapshot: &TreeSnapshot, a: &WiringEndpoint, b: &WiringEndpoint) -> Option<DataWiring> {
    if a.node_name == b.node_name {
        return None;
    }
    if a.data_kind.opposite() != Some(b.data_kind) {
        return None;
    }
    let (source, target) = if a.data_kind == PinKind::Outputs { (a, b) } else { (b, a) };
    let source_pin = snapshot.node(&source.node_name)?.pin(PinKind::Outputs, &source.data_key)?;
    let target_pin = snapshot.node(&target.node_name)?.pin(PinKind::Inputs, &target.data_key)?;
    if target_pin.accepts_any() || target_pin.type_name() == source_pin.type_name() {
        Some(DataWiring { source: source.clone(), target: target.clone() })
    } else {
        None
    }
}
