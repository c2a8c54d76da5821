//! rosbridge v2 JSON frames used to talk to the runtime.

use serde::Deserialize;
use serde_json::{Value, json};

use super::{BridgeEvent, CallId, RpcResponse, TransportError};
use crate::tree_utils::model::{NodeName, NodeState, TreeSnapshot};

const TREE_TYPE: &str = "ros_bt_py_msgs/Tree";
const SUBTREE_STATES_TYPE: &str = "ros_bt_py_msgs/SubtreeStates";
const NODE_STATES_TYPE: &str = "ros_bt_py_msgs/NodeStates";
const CALL_PREFIX: &str = "call:";

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("response id '{0}' was not issued by this client")]
    ForeignId(String),
    #[error("unexpected payload on {topic}: {reason}")]
    Payload { topic: String, reason: String },
}

/// Topic names for one runtime instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topics {
    pub tree: String,
    pub subtree_states: String,
    pub node_states: String,
}

impl Topics {
    pub fn new(namespace: &str) -> Self {
        let ns = namespace.trim_end_matches('/');
        Self {
            tree: format!("{}/tree", ns),
            subtree_states: format!("{}/debug/subtree_states", ns),
            node_states: format!("{}/debug/node_states", ns),
        }
    }

    pub fn subscriptions(&self) -> [(&str, &'static str); 3] {
        [
            (self.tree.as_str(), TREE_TYPE),
            (self.subtree_states.as_str(), SUBTREE_STATES_TYPE),
            (self.node_states.as_str(), NODE_STATES_TYPE),
        ]
    }
}

pub fn call_service(id: CallId, service: &str, args: Value) -> String {
    json!({
        "op": "call_service",
        "id": format!("{}{}", CALL_PREFIX, id),
        "service": service,
        "args": args,
    })
    .to_string()
}

pub fn subscribe(topic: &str, msg_type: &str, throttle_ms: u64) -> String {
    json!({
        "op": "subscribe",
        "id": format!("subscribe:{}", topic),
        "topic": topic,
        "type": msg_type,
        "throttle_rate": throttle_ms,
    })
    .to_string()
}

#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Incoming {
    ServiceResponse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        values: Value,
        #[serde(default = "default_true")]
        result: bool,
    },
    Publish {
        topic: String,
        #[serde(default)]
        msg: Value,
    },
    Status {
        #[serde(default)]
        level: String,
        #[serde(default)]
        msg: String,
    },
    #[serde(other)]
    Other,
}

fn default_true() -> bool { true }

#[derive(Deserialize)]
struct SubtreeStatesMsg {
    #[serde(default)]
    subtree_states: Vec<TreeSnapshot>,
}

#[derive(Deserialize)]
struct NodeStateEntry {
    node_name: NodeName,
    state: NodeState,
}

#[derive(Deserialize)]
struct NodeStatesMsg {
    #[serde(default)]
    tree_name: String,
    #[serde(default)]
    states: Vec<NodeStateEntry>,
}

fn payload<T: serde::de::DeserializeOwned>(topic: &str, msg: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(msg).map_err(|e| ProtocolError::Payload { topic: topic.to_string(), reason: e.to_string() })
}

/// Decode one text frame. Frames the editor does not care about yield `Ok(None)`.
pub fn decode(frame: &str, topics: &Topics) -> Result<Option<BridgeEvent>, ProtocolError> {
    let incoming: Incoming = serde_json::from_str(frame)?;
    match incoming {
        Incoming::ServiceResponse { id, values, result } => {
            let call_id = id
                .strip_prefix(CALL_PREFIX)
                .and_then(|n| n.parse::<CallId>().ok())
                .ok_or_else(|| ProtocolError::ForeignId(id.clone()))?;
            let result = if !result {
                // rosbridge could not reach the service at all
                let reason = values.as_str().map(str::to_string).unwrap_or_else(|| values.to_string());
                Err(TransportError::Bridge(reason))
            } else {
                serde_json::from_value::<RpcResponse>(values).map_err(|e| TransportError::Bridge(e.to_string()))
            };
            Ok(Some(BridgeEvent::Response { id: call_id, result }))
        }
        Incoming::Publish { topic, msg } => {
            if topic == topics.tree {
                Ok(Some(BridgeEvent::Tree(payload(&topic, msg)?)))
            } else if topic == topics.subtree_states {
                let m: SubtreeStatesMsg = payload(&topic, msg)?;
                Ok(Some(BridgeEvent::SubtreeStates(m.subtree_states)))
            } else if topic == topics.node_states {
                let m: NodeStatesMsg = payload(&topic, msg)?;
                Ok(Some(BridgeEvent::NodeStates {
                    tree_name: m.tree_name,
                    states: m.states.into_iter().map(|e| (e.node_name, e.state)).collect(),
                }))
            } else {
                Ok(None)
            }
        }
        Incoming::Status { level, msg } => {
            log::info!("bridge status [{}]: {}", level, msg);
            Ok(None)
        }
        Incoming::Other => Ok(None),
    }
}
