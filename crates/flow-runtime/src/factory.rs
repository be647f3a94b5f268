//! Node factory and class registry.
//!
//! The factory constructs nodes from registered class names and owns the
//! conversion registry used to coerce values between heterogeneously-typed
//! ports.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use flow_core::{
    cast_value, ConversionRegistry, FlowError, NodeId, Render, SharedValue, TypeName, TypedValue,
};

use crate::env::Env;
use crate::event::EventDispatcher;
use crate::function_node::{FunctionNode, FunctionSignature};
use crate::node::{Node, NodeBehavior};

type ConstructorFn = Arc<dyn Fn(NodeId, &str, Arc<Env>) -> Arc<Node> + Send + Sync>;

/// Factory for building nodes from registered classes.
pub struct NodeFactory {
    constructors: DashMap<String, ConstructorFn>,
    categories: DashMap<String, Vec<String>>,
    friendly_names: DashMap<String, String>,
    conversions: ConversionRegistry,

    /// Broadcast with the class name when a node class is registered.
    pub on_class_registered: EventDispatcher<String>,
    /// Broadcast with the class name when a node class is unregistered.
    pub on_class_unregistered: EventDispatcher<String>,
}

impl NodeFactory {
    /// Creates an empty factory.
    pub fn new() -> Self {
        Self {
            constructors: DashMap::new(),
            categories: DashMap::new(),
            friendly_names: DashMap::new(),
            conversions: ConversionRegistry::new(),
            on_class_registered: EventDispatcher::new(),
            on_class_unregistered: EventDispatcher::new(),
        }
    }

    // ---- class registry ---------------------------------------------------

    /// Registers a node class under a category and friendly name. The
    /// class name is the behavior's type name.
    pub fn register_class<B>(&self, category: &str, name: &str)
    where
        B: NodeBehavior + Default,
    {
        let class_name = TypeName::of::<B>().name().to_string();
        let constructor_class = class_name.clone();
        self.register_constructor(
            class_name,
            category,
            name,
            Arc::new(move |id, display_name, env| {
                Node::new(
                    id,
                    constructor_class.clone(),
                    display_name,
                    env,
                    Box::new(B::default()),
                )
            }),
        );
    }

    /// Removes a node class from the registry.
    pub fn unregister_class<B>(&self, category: &str)
    where
        B: NodeBehavior,
    {
        let class_name = TypeName::of::<B>().name().to_string();
        self.unregister_constructor(&class_name, category);
    }

    /// Registers a function-wrapped node class under the given name, with
    /// default argument port names `a`, `b`, ...
    pub fn register_function<F, A, R>(&self, category: &str, name: &str, func: F)
    where
        F: FunctionSignature<A, R> + Clone + Send + Sync + 'static,
        A: Send + Sync + 'static,
        R: Send + Sync + 'static,
        FunctionNode<F, A, R>: NodeBehavior,
    {
        self.register_function_with_args(category, name, func, &[]);
    }

    /// Registers a function-wrapped node class with explicit argument port
    /// names overriding the defaults.
    pub fn register_function_with_args<F, A, R>(
        &self,
        category: &str,
        name: &str,
        func: F,
        arg_names: &[&'static str],
    ) where
        F: FunctionSignature<A, R> + Clone + Send + Sync + 'static,
        A: Send + Sync + 'static,
        R: Send + Sync + 'static,
        FunctionNode<F, A, R>: NodeBehavior,
    {
        let class_name = name.to_string();
        let constructor_class = class_name.clone();
        let arg_names: Vec<&'static str> = arg_names.to_vec();
        self.register_constructor(
            class_name,
            category,
            name,
            Arc::new(move |id, display_name, env| {
                let behavior =
                    FunctionNode::<F, A, R>::new(func.clone()).with_arg_names(&arg_names);
                Node::new(
                    id,
                    constructor_class.clone(),
                    display_name,
                    env,
                    Box::new(behavior),
                )
            }),
        );
    }

    /// Removes a function-wrapped node class by its registered name.
    pub fn unregister_function(&self, category: &str, name: &str) {
        self.unregister_constructor(name, category);
    }

    fn register_constructor(
        &self,
        class_name: String,
        category: &str,
        friendly_name: &str,
        constructor: ConstructorFn,
    ) {
        self.constructors.insert(class_name.clone(), constructor);
        self.categories
            .entry(category.to_string())
            .or_default()
            .push(class_name.clone());
        self.friendly_names
            .insert(class_name.clone(), friendly_name.to_string());

        tracing::debug!(target: "flow::node", class = %class_name, category, "registered node class");
        self.on_class_registered.broadcast(&class_name);
    }

    fn unregister_constructor(&self, class_name: &str, category: &str) {
        if self.constructors.remove(class_name).is_none() {
            return;
        }
        if let Some(mut classes) = self.categories.get_mut(category) {
            classes.retain(|registered| registered != class_name);
        }
        self.friendly_names.remove(class_name);

        tracing::debug!(target: "flow::node", class = %class_name, category, "unregistered node class");
        self.on_class_unregistered.broadcast(&class_name.to_string());
    }

    /// Constructs a node from a registered class name. `None` when the
    /// class is unregistered.
    pub fn create_node(
        &self,
        class_name: &str,
        id: NodeId,
        name: &str,
        env: Arc<Env>,
    ) -> Option<Arc<Node>> {
        let constructor = self.constructors.get(class_name)?.clone();
        Some(constructor(id, name, env))
    }

    /// Whether a class name is registered.
    pub fn is_registered(&self, class_name: &str) -> bool {
        self.constructors.contains_key(class_name)
    }

    /// Snapshot of the category map: category name to registered class
    /// names.
    pub fn categories(&self) -> HashMap<String, Vec<String>> {
        self.categories
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// The friendly name a class was registered under.
    pub fn friendly_name(&self, class_name: &str) -> Option<String> {
        self.friendly_names
            .get(class_name)
            .map(|entry| entry.value().clone())
    }

    // ---- conversions ------------------------------------------------------

    /// The conversion registry.
    pub fn conversions(&self) -> &ConversionRegistry {
        &self.conversions
    }

    /// Registers a one-way conversion.
    pub fn register_unidirectional_conversion<F, T>(
        &self,
        convert: impl Fn(&F) -> Option<T> + Send + Sync + 'static,
    ) where
        F: Render + Clone + Send + Sync + 'static,
        T: Render + Clone + Send + Sync + 'static,
    {
        self.conversions.register_unidirectional::<F, T>(convert);
    }

    /// Registers conversions in both directions.
    pub fn register_bidirectional_conversion<F, T>(
        &self,
        forward: impl Fn(&F) -> Option<T> + Send + Sync + 'static,
        backward: impl Fn(&T) -> Option<F> + Send + Sync + 'static,
    ) where
        F: Render + Clone + Send + Sync + 'static,
        T: Render + Clone + Send + Sync + 'static,
    {
        self.conversions.register_bidirectional(forward, backward);
    }

    /// Coerces a value to the given destination type name.
    pub fn convert(&self, value: &SharedValue, to_type: &str) -> Result<SharedValue, FlowError> {
        self.conversions.convert(value, to_type)
    }

    /// Coerces a value to `T` and downcasts the result.
    pub fn convert_to<T: Send + Sync + 'static>(&self, value: &SharedValue) -> Option<TypedValue<T>> {
        let converted = self.convert(value, TypeName::of::<T>().name()).ok()?;
        cast_value(&converted)
    }

    /// Whether a value of `from_type` can be coerced to `to_type`.
    pub fn is_convertible(&self, from_type: &str, to_type: &str) -> bool {
        self.conversions.is_convertible(from_type, to_type)
    }
}

impl Default for NodeFactory {
    fn default() -> Self {
        Self::new()
    }
}
