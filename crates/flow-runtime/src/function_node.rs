//! Function-wrapped nodes.
//!
//! `FunctionNode` adapts an ordinary function into a node behavior: one
//! input port per parameter (named `a`, `b`, ... unless overridden) and a
//! `"return"` output port for the result, omitted when the function
//! returns `()`. Compute early-returns while any input is still null.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

use flow_core::{make_value, FlowError, Render, TypeName};

use crate::node::{Node, NodeBehavior, PortUpdate};

/// Key of the result output port.
pub const RETURN_PORT: &str = "return";

const MAX_FUNCTION_ARGS: usize = 6;
const DEFAULT_ARG_NAMES: [&str; MAX_FUNCTION_ARGS] = ["a", "b", "c", "d", "e", "f"];

/// Ties a callable to its argument tuple and return type so both can be
/// inferred at registration time.
pub trait FunctionSignature<A, R> {}

/// Behavior wrapping a plain function as a node.
pub struct FunctionNode<F, A, R> {
    func: F,
    input_names: [&'static str; MAX_FUNCTION_ARGS],
    _marker: PhantomData<fn() -> (A, R)>,
}

impl<F, A, R> FunctionNode<F, A, R> {
    /// Wraps a function with the default argument port names.
    pub fn new(func: F) -> Self {
        Self {
            func,
            input_names: DEFAULT_ARG_NAMES,
            _marker: PhantomData,
        }
    }

    /// Overrides the leading argument port names.
    pub fn with_arg_names(mut self, names: &[&'static str]) -> Self {
        for (slot, name) in self.input_names.iter_mut().zip(names) {
            *slot = name;
        }
        self
    }
}

macro_rules! impl_function_node {
    ($($idx:tt $arg:ident),*) => {
        impl<F, $($arg,)* R> FunctionSignature<($($arg,)*), R> for F
        where
            F: Fn($($arg),*) -> R,
        {
        }

        impl<F, $($arg,)* R> NodeBehavior for FunctionNode<F, ($($arg,)*), R>
        where
            F: Fn($($arg),*) -> R + Send + Sync + 'static,
            $($arg: Render + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,)*
            R: Render + Clone + Send + Sync + 'static,
        {
            fn setup(&self, node: &Node) {
                $( node.add_input::<$arg>(self.input_names[$idx], "", None); )*
                if TypeName::of::<R>() != TypeName::of::<()>() {
                    node.add_output::<R>(RETURN_PORT, RETURN_PORT, None);
                }
            }

            #[allow(non_snake_case, unused_variables)]
            fn compute(&self, node: &Node) -> Result<(), FlowError> {
                let factory = node.env().factory();

                $(
                    let $arg: $arg = {
                        let Some(data) = node.input_data(self.input_names[$idx]) else {
                            return Ok(());
                        };
                        let Some(value) = factory
                            .convert_to::<$arg>(&data)
                            .and_then(|typed| typed.try_get())
                        else {
                            return Ok(());
                        };
                        value
                    };
                )*

                let result = (self.func)($($arg),*);
                if node.has_output_port(RETURN_PORT) {
                    node.set_output_data(RETURN_PORT, Some(make_value(result)), false)?;
                }

                for key in node.output_keys() {
                    let data = node.output_data(key.clone());
                    node.on_set_output.broadcast(&PortUpdate {
                        key: key.clone(),
                        data: data.clone(),
                    });
                    node.emit_update(&key, &data);
                }

                Ok(())
            }

            #[allow(unused_variables)]
            fn save_inputs(&self, node: &Node) -> serde_json::Value {
                let mut inputs = serde_json::Map::new();
                $(
                    if let Some(value) = node
                        .input::<$arg>(self.input_names[$idx])
                        .and_then(|typed| typed.try_get())
                    {
                        if let Ok(encoded) = serde_json::to_value(&value) {
                            inputs.insert(self.input_names[$idx].to_string(), encoded);
                        }
                    }
                )*
                serde_json::Value::Object(inputs)
            }

            #[allow(unused_variables)]
            fn restore_inputs(&self, node: &Node, inputs: &serde_json::Value) {
                $(
                    if let Some(raw) = inputs.get(self.input_names[$idx]) {
                        if let Ok(decoded) = serde_json::from_value::<$arg>(raw.clone()) {
                            let _ = node.set_input_data(
                                self.input_names[$idx],
                                Some(make_value(decoded)),
                                false,
                            );
                        }
                    }
                )*
            }
        }
    };
}

impl_function_node!();
impl_function_node!(0 A0);
impl_function_node!(0 A0, 1 A1);
impl_function_node!(0 A0, 1 A1, 2 A2);
impl_function_node!(0 A0, 1 A1, 2 A2, 3 A3);
impl_function_node!(0 A0, 1 A1, 2 A2, 3 A3, 4 A4);
impl_function_node!(0 A0, 1 A1, 2 A2, 3 A3, 4 A4, 5 A5);

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::env::{Env, EnvConfig};
    use crate::factory::NodeFactory;
    use crate::node::Node;
    use flow_core::NodeId;

    fn env() -> Arc<Env> {
        Env::with_config(
            Arc::new(NodeFactory::new()),
            EnvConfig::new().with_workers(1),
        )
    }

    fn double_node(env: &Arc<Env>) -> Arc<Node> {
        Node::new(
            NodeId::new(),
            "double",
            "double",
            Arc::clone(env),
            Box::new(FunctionNode::new(|x: i64| x * 2)),
        )
    }

    #[test]
    fn test_ports_from_signature() {
        let env = env();
        let node = Node::new(
            NodeId::new(),
            "add",
            "add",
            Arc::clone(&env),
            Box::new(FunctionNode::new(|a: i64, b: i64| a + b)),
        );

        assert!(node.has_input_port("a"));
        assert!(node.has_input_port("b"));
        assert!(node.has_output_port(RETURN_PORT));
        assert_eq!(node.input_port_count(), 2);
    }

    #[test]
    fn test_custom_arg_names() {
        let env = env();
        let behavior =
            FunctionNode::new(|base: i64, exponent: u32| base.pow(exponent)).with_arg_names(&[
                "base", "exponent",
            ]);
        let node = Node::new(NodeId::new(), "pow", "pow", env, Box::new(behavior));

        assert!(node.has_input_port("base"));
        assert!(node.has_input_port("exponent"));
        assert!(!node.has_input_port("a"));
    }

    #[test]
    fn test_compute_waits_for_all_inputs() {
        let env = env();
        let node = Node::new(
            NodeId::new(),
            "add",
            "add",
            env,
            Box::new(FunctionNode::new(|a: i64, b: i64| a + b)),
        );

        node.set_input_data("a", Some(make_value(40i64)), true)
            .unwrap();
        assert!(node.output_data(RETURN_PORT).is_none());

        node.set_input_data("b", Some(make_value(2i64)), true)
            .unwrap();
        assert_eq!(node.output::<i64>(RETURN_PORT).unwrap().get(), 42);
    }

    #[test]
    fn test_inputs_pass_through_conversion() {
        let env = env();
        let node = double_node(&env);

        // An i32 arrives where the function expects i64; the registered
        // numeric family covers the widening.
        node.set_input_data("a", Some(make_value(21i32)), true)
            .unwrap();
        assert_eq!(node.output::<i64>(RETURN_PORT).unwrap().get(), 42);
    }

    #[test]
    fn test_unit_return_has_no_output_port() {
        let env = env();
        let node = Node::new(
            NodeId::new(),
            "sink",
            "sink",
            env,
            Box::new(FunctionNode::new(|_x: i64| ())),
        );
        assert!(!node.has_output_port(RETURN_PORT));
        node.set_input_data("a", Some(make_value(1i64)), true)
            .unwrap();
    }

    #[test]
    fn test_save_and_restore_inputs() {
        let env = env();
        let node = double_node(&env);
        node.set_input_data("a", Some(make_value(21i64)), false)
            .unwrap();

        let saved = node.save();
        assert_eq!(saved["inputs"]["a"], 21);

        let restored = double_node(&env);
        restored.restore(&saved).unwrap();
        assert_eq!(restored.input::<i64>("a").unwrap().get(), 21);
    }

    #[test]
    fn test_zero_argument_function() {
        let env = env();
        let node = Node::new(
            NodeId::new(),
            "constant",
            "constant",
            env,
            Box::new(FunctionNode::new(|| 7i64)),
        );

        node.invoke_compute();
        assert_eq!(node.output::<i64>(RETURN_PORT).unwrap().get(), 7);
    }
}
