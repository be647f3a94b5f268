//! The executable node of a graph.
//!
//! A `Node` owns its ports and events; the behavior attached to it defines
//! what compute does. Behaviors declare their ports once during setup and
//! the port set is immutable afterward.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde_json::json;

use flow_core::{
    cast_value, flow_node, panic_message, FlowError, IndexableName, NodeId, Render, SharedValue,
    TypeName, TypedValue,
};

use crate::env::Env;
use crate::event::EventDispatcher;
use crate::port::Port;

type PortMap = IndexMap<IndexableName, Port>;

/// Callback injected by the graph so emitted outputs reach propagation.
pub type PropagateFn = Box<dyn Fn(NodeId, &IndexableName, Option<SharedValue>) + Send + Sync>;

/// Payload for port write events.
pub struct PortUpdate {
    /// Key of the written port.
    pub key: IndexableName,
    /// The value that was written.
    pub data: Option<SharedValue>,
}

/// Payload for output emission events.
pub struct EmitUpdate {
    /// Node that emitted the value.
    pub node_id: NodeId,
    /// Key of the emitting output port.
    pub key: IndexableName,
    /// The emitted value.
    pub data: Option<SharedValue>,
}

/// User-defined node logic.
///
/// `setup` declares the node's ports and runs exactly once at construction.
/// `compute` may read any input, perform arbitrary work, and emit through
/// `set_output_data`; returning an error (or panicking) routes the failure
/// to the node's error event rather than unwinding into the scheduler.
pub trait NodeBehavior: Send + Sync + 'static {
    /// Declares the node's ports.
    fn setup(&self, node: &Node);

    /// Computes the node's outputs from its inputs.
    fn compute(&self, node: &Node) -> Result<(), FlowError>;

    /// Serializes the node's input values.
    fn save_inputs(&self, _node: &Node) -> serde_json::Value {
        json!({})
    }

    /// Restores the node's input values.
    fn restore_inputs(&self, _node: &Node, _inputs: &serde_json::Value) {}

    /// Runs after creation, before execution.
    fn start(&self, _node: &Node) {}

    /// Runs after execution, before removal.
    fn stop(&self, _node: &Node) {}
}

/// A node in a dataflow graph.
pub struct Node {
    id: NodeId,
    class_name: String,
    name: RwLock<String>,
    env: Arc<Env>,

    inputs: RwLock<PortMap>,
    outputs: RwLock<PortMap>,

    behavior: Box<dyn NodeBehavior>,
    propagate: RwLock<Option<PropagateFn>>,
    mutex: Mutex<()>,

    /// Broadcast after a successful compute.
    pub on_compute: EventDispatcher<()>,
    /// Broadcast after every input write.
    pub on_set_input: EventDispatcher<PortUpdate>,
    /// Broadcast after every output write.
    pub on_set_output: EventDispatcher<PortUpdate>,
    /// Broadcast when compute or propagation fails.
    pub on_error: EventDispatcher<FlowError>,
    /// Broadcast when an output update is emitted for propagation.
    pub on_emit_output: EventDispatcher<EmitUpdate>,
}

impl Node {
    /// Creates a node and runs the behavior's port setup.
    pub fn new(
        id: NodeId,
        class_name: impl Into<String>,
        name: impl Into<String>,
        env: Arc<Env>,
        behavior: Box<dyn NodeBehavior>,
    ) -> Arc<Self> {
        let node = Arc::new(Self {
            id,
            class_name: class_name.into(),
            name: RwLock::new(name.into()),
            env,
            inputs: RwLock::new(PortMap::new()),
            outputs: RwLock::new(PortMap::new()),
            behavior,
            propagate: RwLock::new(None),
            mutex: Mutex::new(()),
            on_compute: EventDispatcher::new(),
            on_set_input: EventDispatcher::new(),
            on_set_output: EventDispatcher::new(),
            on_error: EventDispatcher::new(),
            on_emit_output: EventDispatcher::new(),
        });
        node.behavior.setup(node.as_ref());
        node
    }

    /// The node's identifier.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The registered class name of the node.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// The friendly display name.
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    /// Sets the friendly display name.
    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.write() = name.into();
    }

    /// The shared environment.
    pub fn env(&self) -> &Arc<Env> {
        &self.env
    }

    /// Acquires the per-node lock used by the scheduler to serialize
    /// compute and input delivery on this node.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.mutex.lock()
    }

    /// Runs the behavior's start hook.
    pub fn start(&self) {
        self.behavior.start(self);
    }

    /// Runs the behavior's stop hook.
    pub fn stop(&self) {
        self.behavior.stop(self);
    }

    // ---- port declaration -------------------------------------------------

    /// Adds an input port of type `T`. Intended to be called from
    /// `NodeBehavior::setup` only.
    pub fn add_input<T>(
        &self,
        key: impl Into<IndexableName>,
        caption: &str,
        data: Option<SharedValue>,
    ) where
        T: Render + Clone + Send + Sync + 'static,
    {
        let mut inputs = self.inputs.write();
        let index = inputs.len();
        let key = key.into();
        let port = Port::new(
            key.clone(),
            caption,
            TypeName::of::<T>().name(),
            data,
            false,
            index,
        );
        inputs.insert(key, port);
    }

    /// Adds a required input port bound to external storage. The port
    /// ignores null writes, and value writes go through to the slot.
    pub fn add_required_input<T>(
        &self,
        key: impl Into<IndexableName>,
        caption: &str,
        slot: Arc<parking_lot::RwLock<T>>,
    ) where
        T: Render + Clone + Send + Sync + 'static,
    {
        let mut inputs = self.inputs.write();
        let index = inputs.len();
        let key = key.into();
        let port = Port::new(
            key.clone(),
            caption,
            TypeName::of::<T>().name(),
            Some(flow_core::make_bound_value(slot)),
            true,
            index,
        );
        inputs.insert(key, port);
    }

    /// Adds an output port of type `T`. Intended to be called from
    /// `NodeBehavior::setup` only.
    pub fn add_output<T>(
        &self,
        key: impl Into<IndexableName>,
        caption: &str,
        data: Option<SharedValue>,
    ) where
        T: Render + Clone + Send + Sync + 'static,
    {
        let mut outputs = self.outputs.write();
        let index = outputs.len();
        let key = key.into();
        let port = Port::new(
            key.clone(),
            caption,
            TypeName::of::<T>().name(),
            data,
            false,
            index,
        );
        outputs.insert(key, port);
    }

    // ---- port access ------------------------------------------------------

    /// Reads a property of an input port. `None` when the key is unknown.
    pub fn with_input_port<R>(
        &self,
        key: &IndexableName,
        read: impl FnOnce(&Port) -> R,
    ) -> Option<R> {
        self.inputs.read().get(key).map(read)
    }

    /// Reads a property of an output port. `None` when the key is unknown.
    pub fn with_output_port<R>(
        &self,
        key: &IndexableName,
        read: impl FnOnce(&Port) -> R,
    ) -> Option<R> {
        self.outputs.read().get(key).map(read)
    }

    /// Mutates an input port. `None` when the key is unknown.
    pub fn with_input_port_mut<R>(
        &self,
        key: &IndexableName,
        write: impl FnOnce(&mut Port) -> R,
    ) -> Option<R> {
        self.inputs.write().get_mut(key).map(write)
    }

    /// Mutates an output port. `None` when the key is unknown.
    pub fn with_output_port_mut<R>(
        &self,
        key: &IndexableName,
        write: impl FnOnce(&mut Port) -> R,
    ) -> Option<R> {
        self.outputs.write().get_mut(key).map(write)
    }

    /// Whether an input port with the key exists.
    pub fn has_input_port(&self, key: impl Into<IndexableName>) -> bool {
        self.inputs.read().contains_key(&key.into())
    }

    /// Whether an output port with the key exists.
    pub fn has_output_port(&self, key: impl Into<IndexableName>) -> bool {
        self.outputs.read().contains_key(&key.into())
    }

    /// Number of input ports.
    pub fn input_port_count(&self) -> usize {
        self.inputs.read().len()
    }

    /// Number of output ports.
    pub fn output_port_count(&self) -> usize {
        self.outputs.read().len()
    }

    /// Input port keys in declaration order.
    pub fn input_keys(&self) -> Vec<IndexableName> {
        self.inputs.read().keys().cloned().collect()
    }

    /// Output port keys in declaration order.
    pub fn output_keys(&self) -> Vec<IndexableName> {
        self.outputs.read().keys().cloned().collect()
    }

    /// Whether any input port has an attached edge.
    pub fn has_connected_inputs(&self) -> bool {
        self.inputs.read().values().any(Port::is_connected)
    }

    /// Whether any output port has an attached edge.
    pub fn has_connected_outputs(&self) -> bool {
        self.outputs.read().values().any(Port::is_connected)
    }

    // ---- data access ------------------------------------------------------

    /// The value currently held by an input port. `None` when the key is
    /// unknown or the port is empty.
    pub fn input_data(&self, key: impl Into<IndexableName>) -> Option<SharedValue> {
        self.inputs
            .read()
            .get(&key.into())
            .and_then(|port| port.data().cloned())
    }

    /// The value currently held by an output port.
    pub fn output_data(&self, key: impl Into<IndexableName>) -> Option<SharedValue> {
        self.outputs
            .read()
            .get(&key.into())
            .and_then(|port| port.data().cloned())
    }

    /// Typed view of an input value. `None` when the key is unknown, the
    /// port is empty, or the carried type is not `T`.
    pub fn input<T: Send + Sync + 'static>(
        &self,
        key: impl Into<IndexableName>,
    ) -> Option<TypedValue<T>> {
        cast_value(&self.input_data(key)?)
    }

    /// Typed view of an output value.
    pub fn output<T: Send + Sync + 'static>(
        &self,
        key: impl Into<IndexableName>,
    ) -> Option<TypedValue<T>> {
        cast_value(&self.output_data(key)?)
    }

    // ---- compute ----------------------------------------------------------

    /// Invokes compute, routing every failure mode through `on_error`.
    ///
    /// Behaviors may return an error or panic; either way the failure is
    /// broadcast and never unwinds past this call. `on_compute` fires only
    /// on success.
    pub fn invoke_compute(&self) {
        match catch_unwind(AssertUnwindSafe(|| self.behavior.compute(self))) {
            Ok(Ok(())) => self.on_compute.broadcast(&()),
            Ok(Err(error)) => {
                flow_node!(debug, node_id = %self.id, error = %error, "compute failed");
                self.on_error.broadcast(&error);
            }
            Err(payload) => {
                let error = FlowError::compute(panic_message(payload.as_ref()));
                flow_node!(debug, node_id = %self.id, error = %error, "compute panicked");
                self.on_error.broadcast(&error);
            }
        }
    }

    /// Writes an input port, broadcasts the update, and optionally runs
    /// compute.
    pub fn set_input_data(
        &self,
        key: impl Into<IndexableName>,
        data: Option<SharedValue>,
        compute: bool,
    ) -> Result<(), FlowError> {
        let key = key.into();
        {
            let mut inputs = self.inputs.write();
            let port = inputs.get_mut(&key).ok_or_else(|| FlowError::PortNotFound {
                node_id: self.id,
                key: key.name().to_string(),
            })?;
            port.set_data(data.clone(), false);
        }

        self.on_set_input.broadcast(&PortUpdate {
            key,
            data,
        });

        if compute {
            self.invoke_compute();
        }

        Ok(())
    }

    /// Writes an output port, broadcasts the update, and optionally emits
    /// the value for propagation.
    pub fn set_output_data(
        &self,
        key: impl Into<IndexableName>,
        data: Option<SharedValue>,
        emit: bool,
    ) -> Result<(), FlowError> {
        let key = key.into();
        {
            let mut outputs = self.outputs.write();
            let port = outputs.get_mut(&key).ok_or_else(|| FlowError::PortNotFound {
                node_id: self.id,
                key: key.name().to_string(),
            })?;
            port.set_data(data.clone(), true);
        }

        self.on_set_output.broadcast(&PortUpdate {
            key: key.clone(),
            data: data.clone(),
        });

        if emit {
            self.emit_update(&key, &data);
        }

        Ok(())
    }

    /// Invokes the graph-injected propagate callback and broadcasts the
    /// emission.
    pub fn emit_update(&self, key: &IndexableName, data: &Option<SharedValue>) {
        if let Some(propagate) = self.propagate.read().as_ref() {
            propagate(self.id, key, data.clone());
        }
        self.on_emit_output.broadcast(&EmitUpdate {
            node_id: self.id,
            key: key.clone(),
            data: data.clone(),
        });
    }

    pub(crate) fn set_propagate(&self, propagate: PropagateFn) {
        *self.propagate.write() = Some(propagate);
    }

    pub(crate) fn clear_propagate(&self) {
        *self.propagate.write() = None;
    }

    // ---- save / restore ---------------------------------------------------

    /// Serializes the node's identity and inputs.
    pub fn save(&self) -> serde_json::Value {
        json!({
            "id": self.id.to_string(),
            "class": self.class_name,
            "name": self.name(),
            "inputs": self.behavior.save_inputs(self),
        })
    }

    /// Restores the node's fields and inputs from a saved payload.
    pub fn restore(&self, value: &serde_json::Value) -> Result<(), FlowError> {
        let record = value
            .as_object()
            .ok_or_else(|| FlowError::restore("node payload is not an object"))?;

        for field in ["id", "class", "name"] {
            if !record.contains_key(field) {
                return Err(FlowError::restore(format!(
                    "node payload is missing '{field}'"
                )));
            }
        }

        if let Some(name) = record["name"].as_str() {
            self.set_name(name);
        }

        if let Some(inputs) = record.get("inputs") {
            self.behavior.restore_inputs(self, inputs);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{Env, EnvConfig};
    use crate::factory::NodeFactory;
    use flow_core::make_value;

    fn env() -> Arc<Env> {
        Env::with_config(Arc::new(NodeFactory::new()), EnvConfig::default().with_workers(2))
    }

    #[derive(Default)]
    struct Relay;

    impl NodeBehavior for Relay {
        fn setup(&self, node: &Node) {
            node.add_input::<i32>("in", "", None);
            node.add_output::<i32>("out", "", None);
        }

        fn compute(&self, node: &Node) -> Result<(), FlowError> {
            if let Some(data) = node.input_data("in") {
                node.set_output_data("out", Some(data), true)?;
            }
            Ok(())
        }
    }

    fn relay(env: &Arc<Env>) -> Arc<Node> {
        Node::new(
            NodeId::new(),
            "tests::Relay",
            "Test",
            Arc::clone(env),
            Box::new(Relay),
        )
    }

    #[test]
    fn test_construction() {
        let env = env();
        let node = relay(&env);
        assert_eq!(node.class_name(), "tests::Relay");
        assert_eq!(node.name(), "Test");
        assert_eq!(node.input_port_count(), 1);
        assert_eq!(node.output_port_count(), 1);
    }

    #[test]
    fn test_port_declaration_order() {
        struct ManyPorts;
        impl NodeBehavior for ManyPorts {
            fn setup(&self, node: &Node) {
                node.add_input::<i32>("first", "", None);
                node.add_input::<i32>("second", "", Some(make_value(101i32)));
                node.add_input::<i32>("third", "", None);
            }
            fn compute(&self, _node: &Node) -> Result<(), FlowError> {
                Ok(())
            }
        }

        let node = Node::new(
            NodeId::new(),
            "tests::ManyPorts",
            "Test",
            env(),
            Box::new(ManyPorts),
        );

        let keys: Vec<String> = node
            .input_keys()
            .iter()
            .map(|key| key.name().to_string())
            .collect();
        assert_eq!(keys, ["first", "second", "third"]);
        assert_eq!(
            node.with_input_port(&"third".into(), Port::index),
            Some(2)
        );
        assert_eq!(node.input::<i32>("second").unwrap().get(), 101);
    }

    #[test]
    fn test_set_input_drives_compute() {
        let env = env();
        let node = relay(&env);

        assert!(node.input_data("in").is_none());
        node.set_input_data("in", Some(make_value(101i32)), true)
            .unwrap();

        assert_eq!(node.input::<i32>("in").unwrap().get(), 101);
        assert_eq!(node.output::<i32>("out").unwrap().get(), 101);
    }

    #[test]
    fn test_unknown_port_is_an_error() {
        let env = env();
        let node = relay(&env);
        let result = node.set_input_data("missing", Some(make_value(1i32)), false);
        assert!(matches!(result, Err(FlowError::PortNotFound { .. })));
    }

    #[test]
    fn test_save_shape() {
        let env = env();
        let node = relay(&env);
        let saved = node.save();
        assert_eq!(saved["id"], node.id().to_string());
        assert_eq!(saved["class"], "tests::Relay");
        assert_eq!(saved["name"], "Test");
        assert!(saved["inputs"].is_object());
    }

    #[test]
    fn test_restore_requires_identity_fields() {
        let env = env();
        let node = relay(&env);
        let result = node.restore(&json!({ "id": node.id().to_string() }));
        assert!(matches!(result, Err(FlowError::Restore { .. })));

        node.restore(&json!({
            "id": node.id().to_string(),
            "class": "tests::Relay",
            "name": "Renamed",
        }))
        .unwrap();
        assert_eq!(node.name(), "Renamed");
    }
}
