//! Directed edges between output and input ports.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde_json::json;

use flow_core::{ConnectionId, IndexableName, NodeId};

/// A directed edge from an output port to an input port.
///
/// The contained lock serializes value propagation along this edge: two
/// consecutive writes to the same edge reach the receiver in submission
/// order.
pub struct Connection {
    id: ConnectionId,
    start_node: NodeId,
    start_port: IndexableName,
    end_node: NodeId,
    end_port: IndexableName,
    mutex: Mutex<()>,
}

impl Connection {
    pub(crate) fn new(
        start_node: NodeId,
        start_port: IndexableName,
        end_node: NodeId,
        end_port: IndexableName,
    ) -> Self {
        Self {
            id: ConnectionId::new(),
            start_node,
            start_port,
            end_node,
            end_port,
            mutex: Mutex::new(()),
        }
    }

    /// The connection's identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The node the edge starts from.
    pub fn start_node(&self) -> NodeId {
        self.start_node
    }

    /// The output port key the edge starts from.
    pub fn start_port(&self) -> &IndexableName {
        &self.start_port
    }

    /// The node the edge ends at.
    pub fn end_node(&self) -> NodeId {
        self.end_node
    }

    /// The input port key the edge ends at.
    pub fn end_port(&self) -> &IndexableName {
        &self.end_port
    }

    /// Acquires the per-edge propagation lock.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.mutex.lock()
    }

    /// Serializes the edge. `in_*` refers to the output side, `out_*` to
    /// the input side.
    pub fn save(&self) -> serde_json::Value {
        json!({
            "in_id": self.start_node.to_string(),
            "in_var_name": self.start_port.name(),
            "out_id": self.end_node.to_string(),
            "out_var_name": self.end_port.name(),
        })
    }
}

/// Shared handle to a connection.
pub type SharedConnection = Arc<Connection>;

/// Container for a graph's connections.
///
/// An output port may feed several inputs, but an input port accepts a
/// single edge, so edges are keyed by their start node.
#[derive(Default)]
pub struct Connections {
    map: Mutex<HashMap<NodeId, Vec<SharedConnection>>>,
}

impl Connections {
    /// Creates an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new connection and stores it under its start node.
    pub fn add(
        &self,
        start_node: NodeId,
        start_port: IndexableName,
        end_node: NodeId,
        end_port: IndexableName,
    ) -> SharedConnection {
        let connection = Arc::new(Connection::new(start_node, start_port, end_node, end_port));
        self.map
            .lock()
            .entry(start_node)
            .or_default()
            .push(Arc::clone(&connection));
        connection
    }

    /// Removes the connection matching the full endpoint tuple.
    pub fn remove(
        &self,
        start_node: NodeId,
        start_port: &IndexableName,
        end_node: NodeId,
        end_port: &IndexableName,
    ) -> Option<SharedConnection> {
        let mut map = self.map.lock();
        let bucket = map.get_mut(&start_node)?;
        let position = bucket.iter().position(|connection| {
            connection.start_port() == start_port
                && connection.end_node() == end_node
                && connection.end_port() == end_port
        })?;
        let removed = bucket.swap_remove(position);
        if bucket.is_empty() {
            map.remove(&start_node);
        }
        Some(removed)
    }

    /// Removes every connection incident to the node, as start or end.
    pub fn remove_by_node(&self, node_id: NodeId) {
        let mut map = self.map.lock();
        map.remove(&node_id);
        map.retain(|_, bucket| {
            bucket.retain(|connection| connection.end_node() != node_id);
            !bucket.is_empty()
        });
    }

    /// All connections starting at the node.
    pub fn find(&self, start_node: NodeId) -> Vec<SharedConnection> {
        self.map
            .lock()
            .get(&start_node)
            .cloned()
            .unwrap_or_default()
    }

    /// All connections starting at the node's given output port.
    pub fn find_from(&self, start_node: NodeId, start_port: &IndexableName) -> Vec<SharedConnection> {
        let mut connections = self.find(start_node);
        connections.retain(|connection| connection.start_port() == start_port);
        connections
    }

    /// A snapshot of every connection.
    pub fn snapshot(&self) -> Vec<SharedConnection> {
        self.map.lock().values().flatten().cloned().collect()
    }

    /// Removes all connections.
    pub fn clear(&self) {
        self.map.lock().clear();
    }

    /// Total number of connections.
    pub fn len(&self) -> usize {
        self.map.lock().values().map(Vec::len).sum()
    }

    /// Whether no connections exist.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(label: &'static str) -> IndexableName {
        IndexableName::from_static(label)
    }

    #[test]
    fn test_add_and_find() {
        let connections = Connections::new();
        let (a, b, c) = (NodeId::new(), NodeId::new(), NodeId::new());

        connections.add(a, name("out"), b, name("in"));
        connections.add(a, name("out"), c, name("in"));
        connections.add(a, name("other_out"), b, name("other_in"));

        assert_eq!(connections.len(), 3);
        assert_eq!(connections.find(a).len(), 3);
        assert_eq!(connections.find_from(a, &name("out")).len(), 2);
        assert!(connections.find(b).is_empty());
    }

    #[test]
    fn test_remove_matches_full_tuple() {
        let connections = Connections::new();
        let (a, b) = (NodeId::new(), NodeId::new());

        connections.add(a, name("out"), b, name("in"));
        connections.add(a, name("out"), b, name("other_in"));

        assert!(connections
            .remove(a, &name("out"), b, &name("in"))
            .is_some());
        assert_eq!(connections.len(), 1);
        assert_eq!(
            connections.find(a)[0].end_port(),
            &name("other_in")
        );

        assert!(connections
            .remove(a, &name("out"), b, &name("in"))
            .is_none());
    }

    #[test]
    fn test_remove_by_node_covers_both_sides() {
        let connections = Connections::new();
        let (a, b, c) = (NodeId::new(), NodeId::new(), NodeId::new());

        connections.add(a, name("out"), b, name("in"));
        connections.add(c, name("out"), a, name("in"));
        connections.add(c, name("out"), b, name("other_in"));

        connections.remove_by_node(a);

        assert_eq!(connections.len(), 1);
        assert_eq!(connections.find(c)[0].end_node(), b);
    }

    #[test]
    fn test_save_shape() {
        let connections = Connections::new();
        let (a, b) = (NodeId::new(), NodeId::new());
        let connection = connections.add(a, name("out"), b, name("in"));

        let saved = connection.save();
        assert_eq!(saved["in_id"], a.to_string());
        assert_eq!(saved["in_var_name"], "out");
        assert_eq!(saved["out_id"], b.to_string());
        assert_eq!(saved["out_var_name"], "in");
    }
}
