use crate::api::TransportError;

/// Failures surfaced to the user through the editor's error callback.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum EditError {
    // Server message, verbatim
    #[error("{message}")]
    Rejected { operation: String, message: String },
    #[error("failed to call {operation}")]
    Transport { operation: String },
    #[error("subtree '{0}' is not published")]
    SubtreeNotPublished(String),
    #[error("unknown node '{0}'")]
    UnknownNode(String),
    #[error("invalid drop: {0}")]
    InvalidDrop(String),
}

impl EditError {
    pub fn rejected(operation: &str, message: &str) -> Self {
        let message = if message.trim().is_empty() {
            format!("{} was rejected by the runtime", operation)
        } else {
            message.to_string()
        };
        EditError::Rejected { operation: operation.to_string(), message }
    }

    pub fn transport(operation: &str, cause: &TransportError) -> Self {
        log::warn!("transport failure on {}: {}", operation, cause);
        EditError::Transport { operation: operation.to_string() }
    }
}
