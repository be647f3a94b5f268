//! The graph: topology, propagation, traversal, and save/restore.
//!
//! A graph owns its nodes and connections. Emitted output updates land in
//! `propagate_connections_data`, which submits one task per outgoing edge;
//! each task locks the edge, then the receiving node, coerces the value to
//! the receiver's port type, and delivers it, cascading compute downstream.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::json;

use flow_core::{flow_conn, flow_graph, FlowError, GraphId, IndexableName, NodeId, SharedValue};

use crate::connection::{Connections, SharedConnection};
use crate::env::Env;
use crate::event::EventDispatcher;
use crate::node::Node;
use crate::port::Port;

struct GraphState {
    id: GraphId,
    name: RwLock<String>,
    env: Arc<Env>,

    nodes: Mutex<HashMap<NodeId, Arc<Node>>>,
    connections: Connections,

    on_error: EventDispatcher<FlowError>,
    on_node_added: EventDispatcher<Arc<Node>>,
    on_node_removed: EventDispatcher<Arc<Node>>,
    on_nodes_connected: EventDispatcher<SharedConnection>,
    on_nodes_disconnected: EventDispatcher<SharedConnection>,
}

/// A dataflow graph of nodes and connections.
///
/// Cloning yields another handle to the same graph.
#[derive(Clone)]
pub struct Graph {
    state: Arc<GraphState>,
}

impl Graph {
    /// Creates an empty graph bound to the given environment.
    pub fn new(name: impl Into<String>, env: Arc<Env>) -> Self {
        Self {
            state: Arc::new(GraphState {
                id: GraphId::new(),
                name: RwLock::new(name.into()),
                env,
                nodes: Mutex::new(HashMap::new()),
                connections: Connections::new(),
                on_error: EventDispatcher::new(),
                on_node_added: EventDispatcher::new(),
                on_node_removed: EventDispatcher::new(),
                on_nodes_connected: EventDispatcher::new(),
                on_nodes_disconnected: EventDispatcher::new(),
            }),
        }
    }

    /// The graph's identifier.
    pub fn id(&self) -> GraphId {
        self.state.id
    }

    /// The graph's friendly name.
    pub fn name(&self) -> String {
        self.state.name.read().clone()
    }

    /// Sets the graph's friendly name.
    pub fn set_name(&self, name: impl Into<String>) {
        *self.state.name.write() = name.into();
    }

    /// The shared environment.
    pub fn env(&self) -> &Arc<Env> {
        &self.state.env
    }

    /// Broadcast when propagation or traversal fails.
    pub fn on_error(&self) -> &EventDispatcher<FlowError> {
        &self.state.on_error
    }

    /// Broadcast when a node is added.
    pub fn on_node_added(&self) -> &EventDispatcher<Arc<Node>> {
        &self.state.on_node_added
    }

    /// Broadcast when a node is removed.
    pub fn on_node_removed(&self) -> &EventDispatcher<Arc<Node>> {
        &self.state.on_node_removed
    }

    /// Broadcast when two nodes are connected.
    pub fn on_nodes_connected(&self) -> &EventDispatcher<SharedConnection> {
        &self.state.on_nodes_connected
    }

    /// Broadcast when two nodes are disconnected.
    pub fn on_nodes_disconnected(&self) -> &EventDispatcher<SharedConnection> {
        &self.state.on_nodes_disconnected
    }

    // ---- topology ---------------------------------------------------------

    /// Adds a node, injecting the propagation callback that routes its
    /// emitted outputs into this graph. Adding an id already present is a
    /// no-op.
    pub fn add_node(&self, node: Arc<Node>) {
        {
            let mut nodes = self.state.nodes.lock();
            if nodes.contains_key(&node.id()) {
                return;
            }

            let weak = Arc::downgrade(&self.state);
            node.set_propagate(Box::new(move |id, key, data| {
                if let Some(state) = weak.upgrade() {
                    propagate_connections(&state, id, key, data);
                }
            }));

            nodes.insert(node.id(), Arc::clone(&node));
        }

        flow_graph!(debug, graph = %self.state.id, node_id = %node.id(), class = node.class_name(), "node added");
        self.state.on_node_added.broadcast(&node);
    }

    /// Removes a node, dropping every connection incident to it first.
    pub fn remove_node(&self, node: &Arc<Node>) {
        self.remove_node_by_id(node.id());
    }

    /// Removes a node by id, dropping every connection incident to it
    /// first.
    pub fn remove_node_by_id(&self, id: NodeId) {
        self.state.connections.remove_by_node(id);

        let removed = self.state.nodes.lock().remove(&id);
        if let Some(node) = removed {
            node.stop();
            node.clear_propagate();
            flow_graph!(debug, graph = %self.state.id, node_id = %id, "node removed");
            self.state.on_node_removed.broadcast(&node);
        }
    }

    /// Looks a node up by id.
    pub fn node(&self, id: NodeId) -> Option<Arc<Node>> {
        self.state.nodes.lock().get(&id).cloned()
    }

    /// Number of nodes.
    pub fn size(&self) -> usize {
        self.state.nodes.lock().len()
    }

    /// Number of connections.
    pub fn connection_count(&self) -> usize {
        self.state.connections.len()
    }

    /// The connection container.
    pub fn connections(&self) -> &Connections {
        &self.state.connections
    }

    /// Removes every node and connection.
    pub fn clear(&self) {
        self.state.connections.clear();
        let nodes: Vec<Arc<Node>> = {
            let mut map = self.state.nodes.lock();
            map.drain().map(|(_, node)| node).collect()
        };
        for node in nodes {
            node.clear_propagate();
        }
    }

    fn nodes_snapshot(&self) -> Vec<Arc<Node>> {
        self.state.nodes.lock().values().cloned().collect()
    }

    /// Source nodes: connected outputs and no connected inputs.
    pub fn source_nodes(&self) -> Vec<Arc<Node>> {
        self.nodes_snapshot()
            .into_iter()
            .filter(|node| node.has_connected_outputs() && !node.has_connected_inputs())
            .collect()
    }

    /// Leaf nodes: connected inputs and no connected outputs.
    pub fn leaf_nodes(&self) -> Vec<Arc<Node>> {
        self.nodes_snapshot()
            .into_iter()
            .filter(|node| node.has_connected_inputs() && !node.has_connected_outputs())
            .collect()
    }

    /// Orphan nodes: no connections at all.
    pub fn orphan_nodes(&self) -> Vec<Arc<Node>> {
        self.nodes_snapshot()
            .into_iter()
            .filter(|node| !node.has_connected_inputs() && !node.has_connected_outputs())
            .collect()
    }

    // ---- connections ------------------------------------------------------

    /// Whether the given ports exist, the input side is free, and the
    /// output's declared type is convertible to the input's declared type.
    pub fn can_connect(
        &self,
        start: NodeId,
        start_key: impl Into<IndexableName>,
        end: NodeId,
        end_key: impl Into<IndexableName>,
    ) -> bool {
        let (start_key, end_key) = (start_key.into(), end_key.into());

        let Some(start_node) = self.node(start) else {
            return false;
        };
        let Some(end_node) = self.node(end) else {
            return false;
        };

        let Some(out_type) =
            start_node.with_output_port(&start_key, |port| port.declared_type().to_string())
        else {
            return false;
        };
        let Some((in_type, connected)) = end_node.with_input_port(&end_key, |port| {
            (port.declared_type().to_string(), port.is_connected())
        }) else {
            return false;
        };

        !connected && self.state.env.factory().is_convertible(&out_type, &in_type)
    }

    /// Connects an output port to an input port.
    ///
    /// Repeating an existing connection returns the existing edge. An
    /// input port already fed from a different output is rejected. When
    /// the output port already carries data, propagation along the new
    /// edge starts immediately.
    pub fn connect_nodes(
        &self,
        start: NodeId,
        start_key: impl Into<IndexableName>,
        end: NodeId,
        end_key: impl Into<IndexableName>,
    ) -> Result<SharedConnection, FlowError> {
        let (start_key, end_key) = (start_key.into(), end_key.into());

        let start_node = self
            .node(start)
            .ok_or(FlowError::NodeNotFound { node_id: start })?;
        let end_node = self
            .node(end)
            .ok_or(FlowError::NodeNotFound { node_id: end })?;

        // Both ports must exist before either connected flag is touched, so
        // a failed connect leaves classification untouched.
        if !start_node.has_output_port(start_key.clone()) {
            return Err(FlowError::PortNotFound {
                node_id: start,
                key: start_key.name().to_string(),
            });
        }
        if !end_node.has_input_port(end_key.clone()) {
            return Err(FlowError::PortNotFound {
                node_id: end,
                key: end_key.name().to_string(),
            });
        }

        start_node.with_output_port_mut(&start_key, Port::connect);
        let end_changed = end_node
            .with_input_port_mut(&end_key, Port::connect)
            .unwrap_or(false);

        if !end_changed {
            let existing = self
                .state
                .connections
                .find_from(start, &start_key)
                .into_iter()
                .find(|connection| {
                    connection.end_node() == end && connection.end_port() == &end_key
                });

            if let Some(connection) = existing {
                return Ok(connection);
            }

            if self.state.connections.find_from(start, &start_key).is_empty() {
                start_node.with_output_port_mut(&start_key, |port| port.disconnect());
            }
            return Err(FlowError::PortAlreadyConnected {
                node_id: end,
                key: end_key.name().to_string(),
            });
        }

        let connection =
            self.state
                .connections
                .add(start, start_key.clone(), end, end_key.clone());

        flow_conn!(
            debug,
            graph = %self.state.id,
            connection = %connection.id(),
            start = %start,
            end = %end,
            "nodes connected"
        );
        self.state.on_nodes_connected.broadcast(&connection);

        if let Some(data) = start_node.output_data(start_key.clone()) {
            propagate_connections(&self.state, start, &start_key, Some(data));
        }

        Ok(connection)
    }

    /// Disconnects an input port from an output port. The input port's
    /// value is cleared and its node recomputes.
    pub fn disconnect_nodes(
        &self,
        start: NodeId,
        start_key: impl Into<IndexableName>,
        end: NodeId,
        end_key: impl Into<IndexableName>,
    ) {
        let (start_key, end_key) = (start_key.into(), end_key.into());

        if let Some(connection) = self
            .state
            .connections
            .remove(start, &start_key, end, &end_key)
        {
            flow_conn!(
                debug,
                graph = %self.state.id,
                connection = %connection.id(),
                "nodes disconnected"
            );
            self.state.on_nodes_disconnected.broadcast(&connection);
        }

        let (Some(start_node), Some(end_node)) = (self.node(start), self.node(end)) else {
            return;
        };

        if self.state.connections.find_from(start, &start_key).is_empty() {
            start_node.with_output_port_mut(&start_key, |port| port.disconnect());
        }
        end_node.with_input_port_mut(&end_key, |port| port.disconnect());

        let _ = end_node.set_input_data(end_key, None, true);
    }

    // ---- execution --------------------------------------------------------

    /// Submits compute for every source node onto the pool. No ordering
    /// between source nodes is guaranteed.
    pub fn run(&self) {
        for node in self.source_nodes() {
            self.state.env.add_task(move || {
                let _guard = node.lock();
                node.invoke_compute();
            });
        }
    }

    /// Visits every node breadth-first from the sources, then any node not
    /// reached (orphans and cycle remnants).
    pub fn visit(&self, mut visitor: impl FnMut(&Arc<Node>)) {
        let nodes: HashMap<NodeId, Arc<Node>> = {
            let map = self.state.nodes.lock();
            map.clone()
        };
        if nodes.is_empty() {
            return;
        }

        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut queue: VecDeque<NodeId> = VecDeque::new();

        for node in self.source_nodes() {
            visitor(&node);
            visited.insert(node.id());
            queue.push_back(node.id());
        }

        while let Some(id) = queue.pop_front() {
            for connection in self.state.connections.find(id) {
                let child_id = connection.end_node();
                if visited.contains(&child_id) {
                    continue;
                }
                if let Some(child) = nodes.get(&child_id) {
                    visitor(child);
                    visited.insert(child_id);
                    queue.push_back(child_id);
                }
            }
        }

        for (id, node) in &nodes {
            if !visited.contains(id) {
                visitor(node);
                visited.insert(*id);
            }
        }

        if visited.len() != nodes.len() {
            self.state.on_error.broadcast(&FlowError::Traversal {
                message: "failed to visit some nodes in the graph".to_string(),
            });
        }
    }

    /// Propagates a value along every connection leaving the given output
    /// port.
    pub fn propagate_connections_data(
        &self,
        id: NodeId,
        key: &IndexableName,
        data: Option<SharedValue>,
    ) {
        propagate_connections(&self.state, id, key, data);
    }

    // ---- save / restore ---------------------------------------------------

    /// Serializes the graph's nodes and connections.
    pub fn save(&self) -> serde_json::Value {
        let nodes: Vec<serde_json::Value> = self
            .nodes_snapshot()
            .iter()
            .map(|node| node.save())
            .collect();
        let connections: Vec<serde_json::Value> = self
            .state
            .connections
            .snapshot()
            .iter()
            .map(|connection| connection.save())
            .collect();

        json!({
            "nodes": nodes,
            "connections": connections,
        })
    }

    /// Restores nodes and connections from a saved payload.
    ///
    /// Nodes already present are updated in place; missing nodes are built
    /// through the factory, skipping classes the factory does not know.
    /// The legacy node wrapper (`{id, position, model: {class, name}}`)
    /// and the legacy connection keys (`in_key`/`out_key`) are accepted on
    /// read.
    pub fn restore(&self, value: &serde_json::Value) -> Result<(), FlowError> {
        let nodes = value
            .get("nodes")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| FlowError::restore("graph payload is missing 'nodes'"))?;

        for entry in nodes {
            let record = match entry.get("model") {
                Some(model) => json!({
                    "id": entry.get("id").cloned().unwrap_or_default(),
                    "class": model.get("class").cloned().unwrap_or_default(),
                    "name": model.get("name").cloned().unwrap_or_default(),
                    "inputs": entry.get("inputs").cloned().unwrap_or_else(|| json!({})),
                }),
                None => entry.clone(),
            };

            let id = record
                .get("id")
                .and_then(serde_json::Value::as_str)
                .and_then(|text| NodeId::parse(text).ok())
                .ok_or_else(|| FlowError::restore("node payload has no valid 'id'"))?;

            let node = match self.node(id) {
                Some(existing) => existing,
                None => {
                    let class = record
                        .get("class")
                        .and_then(serde_json::Value::as_str)
                        .ok_or_else(|| FlowError::restore("node payload has no 'class'"))?;
                    let name = record
                        .get("name")
                        .and_then(serde_json::Value::as_str)
                        .ok_or_else(|| FlowError::restore("node payload has no 'name'"))?;

                    match self.state.env.factory().create_node(
                        class,
                        id,
                        name,
                        Arc::clone(&self.state.env),
                    ) {
                        Some(node) => node,
                        None => {
                            flow_graph!(warn, class, "skipping node with unregistered class");
                            continue;
                        }
                    }
                }
            };

            node.restore(&record)?;
            self.add_node(node);
        }

        let Some(connections) = value.get("connections").and_then(serde_json::Value::as_array)
        else {
            return Ok(());
        };

        for entry in connections {
            let parse_id = |field: &str| {
                entry
                    .get(field)
                    .and_then(serde_json::Value::as_str)
                    .and_then(|text| NodeId::parse(text).ok())
                    .ok_or_else(|| {
                        FlowError::restore(format!("connection payload has no valid '{field}'"))
                    })
            };
            let parse_key = |legacy: &str, canonical: &str| {
                entry
                    .get(legacy)
                    .or_else(|| entry.get(canonical))
                    .and_then(serde_json::Value::as_str)
                    .map(IndexableName::new)
                    .ok_or_else(|| {
                        FlowError::restore(format!("connection payload has no '{canonical}'"))
                    })
            };

            let in_id = parse_id("in_id")?;
            let out_id = parse_id("out_id")?;
            let in_key = parse_key("in_key", "in_var_name")?;
            let out_key = parse_key("out_key", "out_var_name")?;

            if let Err(error) = self.connect_nodes(in_id, in_key, out_id, out_key) {
                flow_graph!(warn, error = %error, "skipping unrestorable connection");
            }
        }

        Ok(())
    }
}

/// Per-edge propagation fan-out.
///
/// Each outgoing edge gets its own task. Lock order within a task is
/// always connection first, then destination node; recursive compute
/// triggered by the delivery re-enters only locks this task already
/// holds.
fn propagate_connections(
    state: &Arc<GraphState>,
    id: NodeId,
    key: &IndexableName,
    data: Option<SharedValue>,
) {
    let connections = state.connections.find_from(id, key);

    for connection in connections {
        let weak_connection = Arc::downgrade(&connection);
        let weak_state = Arc::downgrade(state);
        let data = data.clone();

        state.env.add_task(move || {
            let Some(connection) = weak_connection.upgrade() else {
                return;
            };
            let Some(state) = weak_state.upgrade() else {
                return;
            };

            let _edge_guard = connection.lock();

            let node = {
                let nodes = state.nodes.lock();
                nodes.get(&connection.end_node()).cloned()
            };
            let Some(node) = node else {
                return;
            };

            let _node_guard = node.lock();

            let end_key = connection.end_port();
            let Some(to_type) = node.with_input_port(end_key, |port| port.data_type().to_string())
            else {
                state.on_error.broadcast(&FlowError::PortNotFound {
                    node_id: node.id(),
                    key: end_key.name().to_string(),
                });
                return;
            };

            let converted = match data {
                None => None,
                Some(value) => match state.env.factory().convert(&value, &to_type) {
                    Ok(converted) => Some(converted),
                    Err(error) => {
                        flow_conn!(
                            debug,
                            connection = %connection.id(),
                            error = %error,
                            "conversion failed during propagation"
                        );
                        state.on_error.broadcast(&error);
                        return;
                    }
                },
            };

            if let Err(error) = node.set_input_data(end_key.clone(), converted, true) {
                state.on_error.broadcast(&error);
            }
        });
    }
}
