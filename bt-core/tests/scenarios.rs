use bt_core::blackboard::DEFAULT_NAMESPACE;
use bt_core::leaves::{ActionFn, ActionOutcome, ConditionFn};
use bt_core::{NodeRegistry, RunnerConfig, Status, TreeDescriptor, TreeManager};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
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

fn battery_above(threshold: i64) -> ConditionFn {
    Arc::new(move |client| {
        Box::pin(async move {
            client
                .get("battery_level", DEFAULT_NAMESPACE)
                .await
                .ok()
                .and_then(|v| v.as_i64())
                .map(|v| v > threshold)
                .unwrap_or(false)
        })
    })
}

fn always_success() -> ActionFn {
    Arc::new(|_client| Box::pin(async move { Ok(ActionOutcome::Bool(true)) }))
}

#[tokio::test]
async fn battery_gate_allows_move_when_charged() {
    let mut registry = NodeRegistry::new();
    registry.register_condition("battery_ok", battery_above(20));
    registry.register_action("move", always_success());

    let descriptor = TreeDescriptor {
        name: "root".into(),
        node_type: "sequence".into(),
        properties: HashMap::new(),
        children: vec![
            leaf("gate", "condition", props(&[("ref", json!("battery_ok"))])),
            leaf("move", "action", props(&[("ref", json!("move"))])),
        ],
    };

    let mut manager = TreeManager::from_descriptor(&descriptor, &registry, RunnerConfig::default())
        .await
        .unwrap();
    manager
        .blackboard()
        .set("battery_level", json!(90), DEFAULT_NAMESPACE, None)
        .await
        .unwrap();

    assert_eq!(manager.tick_once().await.unwrap(), Status::Success);
}

#[tokio::test]
async fn depleted_battery_blocks_move_and_skips_it() {
    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();
    let move_action: ActionFn = Arc::new(move |_client| {
        let c = c.clone();
        Box::pin(async move {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(ActionOutcome::Bool(true))
        })
    });

    let mut registry = NodeRegistry::new();
    registry.register_condition("battery_ok", battery_above(20));
    registry.register_action("move", move_action);

    let descriptor = TreeDescriptor {
        name: "root".into(),
        node_type: "sequence".into(),
        properties: HashMap::new(),
        children: vec![
            leaf("gate", "condition", props(&[("ref", json!("battery_ok"))])),
            leaf("move", "action", props(&[("ref", json!("move"))])),
        ],
    };

    let mut manager = TreeManager::from_descriptor(&descriptor, &registry, RunnerConfig::default())
        .await
        .unwrap();
    manager
        .blackboard()
        .set("battery_level", json!(5), DEFAULT_NAMESPACE, None)
        .await
        .unwrap();

    assert_eq!(manager.tick_once().await.unwrap(), Status::Failure);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn retry_decorator_recovers_from_transient_failures() {
    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();
    let flaky: ActionFn = Arc::new(move |_client| {
        let c = c.clone();
        Box::pin(async move {
            let n = c.fetch_add(1, Ordering::SeqCst);
            Ok(ActionOutcome::Bool(n >= 2))
        })
    });

    let mut registry = NodeRegistry::new();
    registry.register_action("flaky", flaky);

    let descriptor = TreeDescriptor {
        name: "retry".into(),
        node_type: "retry".into(),
        properties: props(&[("max_attempts", json!(5))]),
        children: vec![leaf("flaky", "action", props(&[("ref", json!("flaky"))]))],
    };

    let mut manager = TreeManager::from_descriptor(&descriptor, &registry, RunnerConfig::default())
        .await
        .unwrap();

    // delay=0, so all retries resolve inside a single outer tick.
    let status = manager.tick_once().await.unwrap();
    assert_eq!(status, Status::Success);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn timeout_decorator_fails_a_perpetually_running_child() {
    // Simulates a long-running action that reports progress across many
    // ticks rather than blocking a single tick: it always reports `Running`
    // instantly, so only the decorator's own elapsed-time bookkeeping (not
    // a blocked await) can ever terminate it.
    let never_finishes: ActionFn = Arc::new(|_client| {
        Box::pin(async move { Ok(ActionOutcome::Status(Status::Running)) })
    });

    let mut registry = NodeRegistry::new();
    registry.register_action("stuck", never_finishes);

    let descriptor = TreeDescriptor {
        name: "timeout".into(),
        node_type: "timeout".into(),
        properties: props(&[("duration_ms", json!(20))]),
        children: vec![leaf("stuck", "action", props(&[("ref", json!("stuck"))]))],
    };

    let mut manager = TreeManager::from_descriptor(&descriptor, &registry, RunnerConfig::default())
        .await
        .unwrap();

    let first = manager.tick_once().await.unwrap();
    assert_eq!(first, Status::Running);

    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    let second = manager.tick_once().await.unwrap();
    assert_eq!(second, Status::Failure);
}

#[tokio::test]
async fn parallel_require_one_succeeds_as_soon_as_any_child_does() {
    let mut registry = NodeRegistry::new();
    registry.register_action("fail_a", Arc::new(|_c| Box::pin(async { Ok(ActionOutcome::Bool(false)) })));
    registry.register_action("succeed_b", always_success());
    registry.register_action("fail_c", Arc::new(|_c| Box::pin(async { Ok(ActionOutcome::Bool(false)) })));

    let descriptor = TreeDescriptor {
        name: "parallel".into(),
        node_type: "parallel".into(),
        properties: props(&[("success_threshold", json!(1)), ("failure_threshold", json!(3))]),
        children: vec![
            leaf("a", "action", props(&[("ref", json!("fail_a"))])),
            leaf("b", "action", props(&[("ref", json!("succeed_b"))])),
            leaf("c", "action", props(&[("ref", json!("fail_c"))])),
        ],
    };

    let mut manager = TreeManager::from_descriptor(&descriptor, &registry, RunnerConfig::default())
        .await
        .unwrap();

    assert_eq!(manager.tick_once().await.unwrap(), Status::Success);
}

#[tokio::test]
async fn snapshot_and_restore_preserve_blackboard_across_a_simulated_restart() {
    let mut registry = NodeRegistry::new();
    registry.register_action("move", always_success());
    let descriptor = leaf("move", "action", props(&[("ref", json!("move"))]));

    let dir = std::env::temp_dir().join(format!("bt_scenario_test_{}", uuid::Uuid::new_v4()));
    let mut config = RunnerConfig::default();
    config.data_dir = dir.clone();

    let mut manager = TreeManager::from_descriptor(&descriptor, &registry, config)
        .await
        .unwrap();
    manager
        .blackboard()
        .set("mission_id", json!("alpha"), DEFAULT_NAMESPACE, None)
        .await
        .unwrap();
    let id = manager.take_snapshot().await.unwrap();

    manager
        .blackboard()
        .set("mission_id", json!("beta"), DEFAULT_NAMESPACE, None)
        .await
        .unwrap();
    manager.restore_snapshot(id).await.unwrap();

    let restored = manager
        .blackboard()
        .get("mission_id", DEFAULT_NAMESPACE)
        .await
        .unwrap();
    assert_eq!(restored, json!("alpha"));

    tokio::fs::remove_dir_all(&dir).await.ok();
}

#[tokio::test]
async fn restore_snapshot_reverts_node_stats_not_just_the_blackboard() {
    let mut registry = NodeRegistry::new();
    registry.register_action("flip", Arc::new(|_c| Box::pin(async { Ok(ActionOutcome::Bool(true)) })));
    let descriptor = leaf("flip", "action", props(&[("ref", json!("flip"))]));

    let dir = std::env::temp_dir().join(format!("bt_scenario_test_{}", uuid::Uuid::new_v4()));
    let mut config = RunnerConfig::default();
    config.data_dir = dir.clone();

    let mut manager = TreeManager::from_descriptor(&descriptor, &registry, config)
        .await
        .unwrap();

    manager.tick_once().await.unwrap();
    let id = manager.take_snapshot().await.unwrap();
    let ticks_at_snapshot = manager.node_stats().get(&manager.root().id).unwrap().1.total_ticks;

    for _ in 0..5 {
        manager.tick_once().await.unwrap();
    }
    assert!(manager.node_stats().get(&manager.root().id).unwrap().1.total_ticks > ticks_at_snapshot);

    manager.restore_snapshot(id).await.unwrap();
    let restored_ticks = manager.node_stats().get(&manager.root().id).unwrap().1.total_ticks;
    assert_eq!(restored_ticks, ticks_at_snapshot);

    tokio::fs::remove_dir_all(&dir).await.ok();
}

#[tokio::test]
async fn subtree_registry_hands_out_an_independent_copy_per_instantiation() {
    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();
    let count_and_succeed: ActionFn = Arc::new(move |_client| {
        let c = c.clone();
        Box::pin(async move {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(ActionOutcome::Bool(true))
        })
    });

    let mut registry = NodeRegistry::new();
    registry.register_action("work", count_and_succeed);

    let root_descriptor = leaf("root", "action", props(&[("ref", json!("work"))]));
    let mut manager = TreeManager::from_descriptor(&root_descriptor, &registry, RunnerConfig::default())
        .await
        .unwrap();

    let worker_descriptor = leaf("worker", "action", props(&[("ref", json!("work"))]));
    manager.register_subtree("worker", worker_descriptor);

    let first = manager.instantiate_subtree("worker", &registry).await.unwrap();
    let second = manager.instantiate_subtree("worker", &registry).await.unwrap();
    assert_ne!(first.id, second.id);

    manager
        .instantiate_subtree("missing", &registry)
        .await
        .expect_err("unregistered subtree names must fail to instantiate");
}

#[tokio::test]
async fn execution_context_accumulates_tick_counters_and_bounded_history() {
    let mut registry = NodeRegistry::new();
    registry.register_action("succeed", always_success());
    registry.register_action(
        "fail",
        Arc::new(|_c| Box::pin(async { Ok(ActionOutcome::Bool(false)) })),
    );

    let descriptor = leaf("succeed", "action", props(&[("ref", json!("succeed"))]));
    let mut manager = TreeManager::from_descriptor(&descriptor, &registry, RunnerConfig::default())
        .await
        .unwrap();

    manager.tick_once().await.unwrap();
    manager.tick_once().await.unwrap();
    manager.tick_once().await.unwrap();

    let stats = manager.stats();
    assert_eq!(stats.tick_count, 3);
    assert_eq!(stats.success_count, 3);
    assert_eq!(stats.failure_count, 0);
    assert_eq!(stats.history.len(), 3);
    assert_eq!(stats.history.back().unwrap().tick_no, 3);
}
