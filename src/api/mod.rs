use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::tree_utils::model::{DataWiring, NodeName, NodeRecord, NodeState, TreeSnapshot};

pub mod protocol;
pub mod throttle;

pub type CallId = u64;

/// One remote procedure call against the runtime's editing services.
#[derive(Clone, Debug, PartialEq)]
pub enum RuntimeCall {
    // An empty parent detaches the node
    MoveNode { node_name: NodeName, new_parent_name: NodeName, new_child_index: i32 },
    ReplaceNode { old_node_name: NodeName, new_node_name: NodeName },
    AddNodeAtIndex { parent_name: NodeName, node: NodeRecord, new_child_index: i32 },
    WireData { wirings: Vec<DataWiring> },
    UnwireData { wirings: Vec<DataWiring> },
}

impl RuntimeCall {
    pub fn move_node(node: &str, parent: &str, index: i32) -> Self {
        RuntimeCall::MoveNode { node_name: node.to_string(), new_parent_name: parent.to_string(), new_child_index: index }
    }

    pub fn detach(node: &str) -> Self { Self::move_node(node, "", -1) }

    pub fn operation(&self) -> &'static str {
        match self {
            RuntimeCall::MoveNode { .. } => "move_node",
            RuntimeCall::ReplaceNode { .. } => "replace_node",
            RuntimeCall::AddNodeAtIndex { .. } => "add_node_at_index",
            RuntimeCall::WireData { .. } => "wire_data",
            RuntimeCall::UnwireData { .. } => "unwire_data",
        }
    }

    /// Fully qualified service name under the runtime instance's namespace.
    pub fn service(&self, namespace: &str) -> String {
        let ns = namespace.trim_end_matches('/');
        format!("{}/{}", ns, self.operation())
    }

    pub fn args(&self) -> serde_json::Value {
        match self {
            RuntimeCall::MoveNode { node_name, new_parent_name, new_child_index } => json!({
                "node_name": node_name,
                "new_parent_name": new_parent_name,
                "new_child_index": new_child_index,
            }),
            RuntimeCall::ReplaceNode { old_node_name, new_node_name } => json!({
                "old_node_name": old_node_name,
                "new_node_name": new_node_name,
            }),
            RuntimeCall::AddNodeAtIndex { parent_name, node, new_child_index } => json!({
                "parent_name": parent_name,
                "node": node,
                "allow_rename": true,
                "new_child_index": new_child_index,
            }),
            RuntimeCall::WireData { wirings } | RuntimeCall::UnwireData { wirings } => json!({
                "wirings": wirings,
            }),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub success: bool,
    #[serde(default)]
    pub error_message: String,
}

impl RpcResponse {
    pub fn ok() -> Self { Self { success: true, error_message: String::new() } }
    pub fn rejected(message: &str) -> Self { Self { success: false, error_message: message.to_string() } }
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("bridge is not connected")]
    Disconnected,
    #[error("bridge reported: {0}")]
    Bridge(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum BridgeEvent {
    Connected,
    Disconnected(String),
    Response { id: CallId, result: Result<RpcResponse, TransportError> },
    Tree(TreeSnapshot),
    SubtreeStates(Vec<TreeSnapshot>),
    NodeStates { tree_name: String, states: Vec<(NodeName, NodeState)> },
}

/// Seam to whatever carries calls to the runtime.
///
/// Calls are fire-and-forget: `call` returns an id right away and the matching
/// [`BridgeEvent::Response`] shows up in a later `poll`.
pub trait RuntimeClient {
    fn call(&mut self, call: RuntimeCall) -> CallId;
    fn poll(&mut self) -> Vec<BridgeEvent>;
    fn is_connected(&self) -> bool { true }
}

/// Client used when no bridge is configured; every call fails as a transport error.
#[derive(Debug, Default)]
pub struct OfflineClient {
    next_id: CallId,
    queued: VecDeque<BridgeEvent>,
}

impl RuntimeClient for OfflineClient {
    fn call(&mut self, call: RuntimeCall) -> CallId {
        self.next_id += 1;
        log::debug!("offline: dropping {}", call.operation());
        self.queued.push_back(BridgeEvent::Response { id: self.next_id, result: Err(TransportError::Disconnected) });
        self.next_id
    }

    fn poll(&mut self) -> Vec<BridgeEvent> { self.queued.drain(..).collect() }

    fn is_connected(&self) -> bool { false }
}

// Socket transport (feature-gated). Builds without it get a stub that never connects.
#[cfg(feature = "bridge")]
pub mod rosbridge;

#[cfg(not(feature = "bridge"))]
pub mod rosbridge {
    use super::OfflineClient;

    pub type RosbridgeClient = OfflineClient;

    pub fn connect(url: &str, _namespace: &str) -> anyhow::Result<RosbridgeClient> {
        anyhow::bail!("built without the 'bridge' feature, cannot connect to {}", url)
    }
}
