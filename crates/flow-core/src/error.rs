//! Error taxonomy for the flow runtime.
//!
//! Lookup misses are explicit caller-observed failures; compute and
//! conversion failures are reported through node and graph error events
//! rather than rethrown across the scheduler boundary.

use std::any::Any;

use thiserror::Error;

use crate::types::id::NodeId;

/// Errors produced by the flow runtime.
#[derive(Debug, Error)]
pub enum FlowError {
    /// A node UUID was not present in the graph.
    #[error("node {node_id} not found")]
    NodeNotFound {
        /// Identifier that failed to resolve.
        node_id: NodeId,
    },

    /// A port key was not present on the node.
    #[error("port '{key}' not found on node {node_id}")]
    PortNotFound {
        /// Node that was queried.
        node_id: NodeId,
        /// Port key that failed to resolve.
        key: String,
    },

    /// An input port already has an edge from a different output.
    #[error("input port '{key}' on node {node_id} is already connected")]
    PortAlreadyConnected {
        /// Node owning the input port.
        node_id: NodeId,
        /// Key of the contested input port.
        key: String,
    },

    /// A registered converter failed to produce a value.
    #[error("could not convert '{from}' to '{to}'")]
    Conversion {
        /// Source type name.
        from: String,
        /// Destination type name.
        to: String,
    },

    /// A node's compute failed, either by returning an error or panicking.
    #[error("compute failed: {message}")]
    Compute {
        /// Message describing the compute failure.
        message: String,
    },

    /// A saved graph or node payload could not be restored.
    #[error("restore failed: {message}")]
    Restore {
        /// Message describing the malformed payload.
        message: String,
    },

    /// A module manifest was invalid or a module failed registration.
    #[error("module error: {message}")]
    Module {
        /// Message describing the module failure.
        message: String,
    },

    /// Graph traversal did not reach every node.
    #[error("traversal error: {message}")]
    Traversal {
        /// Message describing the traversal failure.
        message: String,
    },
}

impl FlowError {
    /// Builds a compute error from a free-form message.
    pub fn compute(message: impl Into<String>) -> Self {
        FlowError::Compute {
            message: message.into(),
        }
    }

    /// Builds a restore error from a free-form message.
    pub fn restore(message: impl Into<String>) -> Self {
        FlowError::Restore {
            message: message.into(),
        }
    }
}

/// Extracts a human-readable message from a panic payload.
///
/// Payload classes mirror what user code actually throws: `&str`, `String`,
/// and integers; anything else collapses to "unknown error".
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(code) = payload.downcast_ref::<i32>() {
        code.to_string()
    } else {
        "unknown error".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let node_id = NodeId::new();
        let error = FlowError::PortNotFound {
            node_id,
            key: "in".to_string(),
        };
        let display = format!("{}", error);
        assert!(display.contains("'in'"));
        assert!(display.contains(&node_id.to_string()));
    }

    #[test]
    fn test_panic_message_classes() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&"boom".to_string()), "boom");
        assert_eq!(panic_message(&42i32), "42");
        assert_eq!(panic_message(&3.5f64), "unknown error");
    }
}
