//! Save/restore round-trips, including the legacy payload shapes.

use std::sync::Arc;

use serde_json::json;

use flow_runtime::{
    make_value, Env, EnvConfig, FlowError, Graph, Node, NodeBehavior, NodeFactory, TypeName,
};

#[derive(Default)]
struct Register;

impl NodeBehavior for Register {
    fn setup(&self, node: &Node) {
        node.add_input::<i64>("value", "", None);
        node.add_output::<i64>("out", "", None);
    }

    fn compute(&self, node: &Node) -> Result<(), FlowError> {
        if let Some(data) = node.input_data("value") {
            node.set_output_data("out", Some(data), true)?;
        }
        Ok(())
    }

    fn save_inputs(&self, node: &Node) -> serde_json::Value {
        let mut inputs = serde_json::Map::new();
        if let Some(value) = node.input::<i64>("value").and_then(|typed| typed.try_get()) {
            inputs.insert("value".to_string(), json!(value));
        }
        serde_json::Value::Object(inputs)
    }

    fn restore_inputs(&self, node: &Node, inputs: &serde_json::Value) {
        if let Some(value) = inputs.get("value").and_then(serde_json::Value::as_i64) {
            let _ = node.set_input_data("value", Some(make_value(value)), false);
        }
    }
}

fn env() -> Arc<Env> {
    let factory = Arc::new(NodeFactory::new());
    factory.register_class::<Register>("Test", "Register");
    factory.register_function("Math", "add", |a: i64, b: i64| a + b);
    Env::with_config(factory, EnvConfig::new().with_workers(2))
}

fn sorted_strings(values: &[serde_json::Value]) -> Vec<String> {
    let mut strings: Vec<String> = values.iter().map(|value| value.to_string()).collect();
    strings.sort();
    strings
}

#[test]
fn save_restore_round_trip() {
    let env = env();
    let factory = env.factory();
    let register_class = TypeName::of::<Register>().name();

    let graph = Graph::new("original", Arc::clone(&env));
    let adder = factory
        .create_node("add", flow_runtime::NodeId::new(), "adder", Arc::clone(&env))
        .unwrap();
    let register = factory
        .create_node(
            register_class,
            flow_runtime::NodeId::new(),
            "register",
            Arc::clone(&env),
        )
        .unwrap();
    graph.add_node(Arc::clone(&adder));
    graph.add_node(Arc::clone(&register));

    graph
        .connect_nodes(adder.id(), "return", register.id(), "value")
        .unwrap();

    adder
        .set_input_data("a", Some(make_value(2i64)), true)
        .unwrap();
    adder
        .set_input_data("b", Some(make_value(3i64)), true)
        .unwrap();
    env.wait();
    assert_eq!(register.input::<i64>("value").unwrap().get(), 5);

    let saved = graph.save();

    // Restore into a fresh graph sharing the same environment.
    let restored = Graph::new("restored", Arc::clone(&env));
    restored.restore(&saved).unwrap();
    env.wait();

    assert_eq!(restored.size(), 2);
    assert_eq!(restored.connection_count(), 1);

    let restored_adder = restored.node(adder.id()).unwrap();
    let restored_register = restored.node(register.id()).unwrap();
    assert!(!Arc::ptr_eq(&restored_adder, &adder));
    assert_eq!(restored_adder.name(), "adder");
    assert_eq!(restored_adder.input::<i64>("a").unwrap().get(), 2);
    assert_eq!(restored_adder.input::<i64>("b").unwrap().get(), 3);
    assert_eq!(restored_register.input::<i64>("value").unwrap().get(), 5);

    // Saving the restored graph reproduces the same structure.
    let saved_again = restored.save();
    assert_eq!(
        sorted_strings(saved["nodes"].as_array().unwrap()),
        sorted_strings(saved_again["nodes"].as_array().unwrap()),
    );
    assert_eq!(
        sorted_strings(saved["connections"].as_array().unwrap()),
        sorted_strings(saved_again["connections"].as_array().unwrap()),
    );
}

#[test]
fn restore_accepts_legacy_shapes() {
    let env = env();
    let register_class = TypeName::of::<Register>().name();
    let first_id = flow_runtime::NodeId::new();
    let second_id = flow_runtime::NodeId::new();

    // Node records wrapped in the legacy "model" envelope, connection keys
    // under the legacy names, plus an ignored editor position.
    let legacy = json!({
        "nodes": [
            {
                "id": first_id.to_string(),
                "position": { "x": 80, "y": 120 },
                "model": { "class": register_class, "name": "first" },
            },
            {
                "id": second_id.to_string(),
                "position": { "x": 240, "y": 120 },
                "model": { "class": register_class, "name": "second" },
            },
        ],
        "connections": [
            {
                "in_id": first_id.to_string(),
                "in_key": "out",
                "out_id": second_id.to_string(),
                "out_key": "value",
            },
        ],
    });

    let graph = Graph::new("legacy", Arc::clone(&env));
    graph.restore(&legacy).unwrap();

    assert_eq!(graph.size(), 2);
    assert_eq!(graph.connection_count(), 1);
    assert_eq!(graph.node(first_id).unwrap().name(), "first");
    assert_eq!(graph.node(second_id).unwrap().name(), "second");

    // The canonical shape is emitted regardless of what was read.
    let saved = graph.save();
    let connection = &saved["connections"][0];
    assert_eq!(connection["in_var_name"], "out");
    assert_eq!(connection["out_var_name"], "value");
    assert!(connection.get("in_key").is_none());
}

#[test]
fn restore_skips_unknown_classes() {
    let env = env();
    let graph = Graph::new("test", Arc::clone(&env));

    let payload = json!({
        "nodes": [
            {
                "id": flow_runtime::NodeId::new().to_string(),
                "class": "not::Registered",
                "name": "ghost",
            },
        ],
        "connections": [],
    });

    graph.restore(&payload).unwrap();
    assert_eq!(graph.size(), 0);
}

#[test]
fn restore_rejects_malformed_nodes() {
    let env = env();
    let graph = Graph::new("test", Arc::clone(&env));

    let missing_nodes = json!({ "connections": [] });
    assert!(matches!(
        graph.restore(&missing_nodes),
        Err(FlowError::Restore { .. })
    ));

    let missing_id = json!({ "nodes": [ { "class": "x", "name": "y" } ] });
    assert!(matches!(
        graph.restore(&missing_id),
        Err(FlowError::Restore { .. })
    ));
}

#[test]
fn restore_is_idempotent_for_existing_nodes() {
    let env = env();
    let factory = env.factory();
    let register_class = TypeName::of::<Register>().name();

    let graph = Graph::new("test", Arc::clone(&env));
    let node = factory
        .create_node(
            register_class,
            flow_runtime::NodeId::new(),
            "register",
            Arc::clone(&env),
        )
        .unwrap();
    graph.add_node(Arc::clone(&node));

    let saved = graph.save();
    graph.restore(&saved).unwrap();

    assert_eq!(graph.size(), 1);
    assert!(Arc::ptr_eq(&graph.node(node.id()).unwrap(), &node));
}
