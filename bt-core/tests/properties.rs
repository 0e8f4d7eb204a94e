use bt_core::blackboard::{Blackboard, DEFAULT_NAMESPACE};
use bt_core::leaves::{ActionFn, ActionOutcome};
use bt_core::{NodeRegistry, RunnerConfig, Status, TreeDescriptor, TreeManager};
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

fn leaf(name: &str, node_type: &str, props: HashMap<String, serde_json::Value>) -> TreeDescriptor {
    TreeDescriptor {
        name: name.to_string(),
        node_type: node_type.to_string(),
        properties: props,
        children: vec![],
    }
}

fn props(pairs: &[(&str, serde_json::Value)]) -> HashMap<String, serde_json::Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn running_action() -> ActionFn {
    Arc::new(|_client| Box::pin(async { Ok(ActionOutcome::Status(Status::Running)) }))
}

proptest! {
    // P1: a tick always resolves, never panics, for any combination of
    // action outcomes in a sequence.
    #[test]
    fn tick_is_total_over_arbitrary_action_outcomes(succeeds in proptest::collection::vec(any::<bool>(), 1..6)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let mut registry = NodeRegistry::new();
            let mut children = Vec::new();
            for (i, ok) in succeeds.iter().enumerate() {
                let name = format!("step{i}");
                let ok = *ok;
                registry.register_action(name.clone(), Arc::new(move |_client| {
                    Box::pin(async move { Ok(ActionOutcome::Bool(ok)) })
                }));
                children.push(leaf(&name, "action", props(&[("ref", json!(name))])));
            }
            let descriptor = TreeDescriptor {
                name: "root".into(),
                node_type: "sequence".into(),
                properties: HashMap::new(),
                children,
            };
            let mut manager = TreeManager::from_descriptor(&descriptor, &registry, RunnerConfig::default())
                .await
                .unwrap();
            let status = manager.tick_once().await.unwrap();
            assert!(matches!(status, Status::Success | Status::Failure));
        });
    }

    // P7: every write to the same blackboard key strictly increases its
    // version, regardless of the values written.
    #[test]
    fn blackboard_version_increases_monotonically_on_every_set(values in proptest::collection::vec(any::<i64>(), 1..12)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let bb = Blackboard::new();
            let mut prev_version = 0u64;
            for v in values {
                bb.set("k", json!(v), DEFAULT_NAMESPACE, None).await.unwrap();
                let entry = bb.get_entry("k", DEFAULT_NAMESPACE).await.unwrap();
                assert!(entry.version > prev_version);
                prev_version = entry.version;
            }
        });
    }

    // P10: a `Fresh` composite re-checks its guard every external tick
    // instead of resuming at whichever child was last `Running`, for any
    // sequence of guard flips.
    #[test]
    fn fresh_sequence_rechecks_guard_every_external_tick(flips in proptest::collection::vec(any::<bool>(), 1..8)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let mut registry = NodeRegistry::new();
            registry.register_action("keep_running", running_action());
            let descriptor = TreeDescriptor {
                name: "root".into(),
                node_type: "reactive_sequence".into(),
                properties: HashMap::new(),
                children: vec![
                    leaf("gate", "condition", props(&[
                        ("blackboard_key", json!("gate")),
                        ("operator", json!("==")),
                        ("expected_value", json!(true)),
                    ])),
                    leaf("work", "action", props(&[("ref", json!("keep_running"))])),
                ],
            };
            let mut manager = TreeManager::from_descriptor(&descriptor, &registry, RunnerConfig::default())
                .await
                .unwrap();
            for gate in flips {
                manager
                    .blackboard()
                    .set("gate", json!(gate), DEFAULT_NAMESPACE, None)
                    .await
                    .unwrap();
                let status = manager.tick_once().await.unwrap();
                let expected = if gate { Status::Running } else { Status::Failure };
                assert_eq!(status, expected);
            }
        });
    }
}
