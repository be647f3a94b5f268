//! Flow Runtime - the dataflow graph engine.
//!
//! Graphs hold strongly-typed nodes connected by directed edges. Values
//! propagate through ports on a shared worker pool until the graph reaches
//! a steady state; propagation along each edge is serialized by a per-edge
//! lock so updates never overtake one another.

pub mod connection;
pub mod env;
pub mod event;
pub mod factory;
pub mod function_node;
pub mod graph;
pub mod module;
pub mod node;
pub mod pool;
pub mod port;

pub use connection::{Connection, Connections, SharedConnection};
pub use env::{Env, EnvConfig};
pub use event::EventDispatcher;
pub use factory::NodeFactory;
pub use function_node::{FunctionNode, FunctionSignature};
pub use graph::Graph;
pub use module::{Module, ModuleManifest, ModuleVersion};
pub use node::{EmitUpdate, Node, NodeBehavior, PortUpdate};
pub use pool::TaskPool;
pub use port::Port;

pub use flow_core::{
    cast_value, make_bound_value, make_duration_value, make_unique_value, make_value,
    ConnectionId, ConversionRegistry, FlowError, GraphId, IndexableName, NodeId, NodeValue,
    Render, SharedValue, TimeUnit, TypeName, TypedValue, ANY_TYPE,
};
