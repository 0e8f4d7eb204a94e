use crate::blackboard::{Blackboard, Client, Namespace};
use crate::composites::{CompositeKind, MemoryPolicy, ParallelNode, ParallelPolicy, RandomSelectorNode, SelectorNode, SequenceNode};
use crate::config::{ErrorPolicy, RunnerConfig, TreeDescriptor};
use crate::decorators::{CooldownNode, DecoratorKind, ForceFailureNode, ForceSuccessNode, InverterNode, RepeatNode, RetryNode, TimeoutNode};
use crate::error::{BtError, BtResult};
use crate::event::EventBus;
use crate::leaves::{
    ActionFn, ActionNode, BlackboardDeleteNode, BlackboardSetNode, ConditionFn, ConditionNode,
    DebugLogNode, EventEmitNode, LeafKind, LogLevel, ThrottleNode, TimedConditionNode, WaitNode,
};
use crate::node::{Node, NodeKind, Predicate, TickContext};
use crate::status::Status;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Bound on [`ExecutionContext::history`], mirroring the blackboard's
/// bounded activity log.
const EXECUTION_HISTORY_CAPACITY: usize = 256;

/// Named, user-registered functions a [`TreeDescriptor`] can reference by
/// name from a leaf's `"ref"` property, since arbitrary closures cannot be
/// described in a data file.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    actions: HashMap<String, ActionFn>,
    conditions: HashMap<String, ConditionFn>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_action(&mut self, name: impl Into<String>, func: ActionFn) -> &mut Self {
        self.actions.insert(name.into(), func);
        self
    }

    pub fn register_condition(&mut self, name: impl Into<String>, func: ConditionFn) -> &mut Self {
        self.conditions.insert(name.into(), func);
        self
    }
}

fn prop_str<'a>(props: &'a HashMap<String, Value>, key: &str) -> Option<&'a str> {
    props.get(key).and_then(Value::as_str)
}

fn prop_u64(props: &HashMap<String, Value>, key: &str, default: u64) -> u64 {
    props.get(key).and_then(Value::as_u64).unwrap_or(default)
}

fn prop_bool(props: &HashMap<String, Value>, key: &str, default: bool) -> bool {
    props.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn ref_name(descriptor: &TreeDescriptor) -> BtResult<&str> {
    prop_str(&descriptor.properties, "ref").ok_or_else(|| BtError::ConfigInvalid(format!(
        "node '{}' of type '{}' requires a 'ref' property naming a registered function",
        descriptor.name, descriptor.node_type
    )))
}

/// Resolves a condition descriptor to a [`ConditionFn`], either by looking up
/// a registered `"ref"` or, lacking one, building a purely declarative check
/// against a blackboard entry from `blackboard_key`/`namespace`/`operator`/
/// `expected_value` properties.
fn resolve_condition(descriptor: &TreeDescriptor, registry: &NodeRegistry) -> BtResult<ConditionFn> {
    let props = &descriptor.properties;
    if let Some(name) = prop_str(props, "ref") {
        return registry
            .conditions
            .get(name)
            .cloned()
            .ok_or_else(|| BtError::ConfigInvalid(format!("no registered condition named '{name}'")));
    }
    if let Some(key) = prop_str(props, "blackboard_key") {
        let namespace = prop_str(props, "namespace").unwrap_or(crate::blackboard::DEFAULT_NAMESPACE).to_string();
        let operator = prop_str(props, "operator").unwrap_or("==").to_string();
        let expected = props.get("expected_value").cloned().unwrap_or(Value::Null);
        return Ok(declarative_condition(key.to_string(), namespace, operator, expected));
    }
    Err(BtError::ConfigInvalid(format!(
        "node '{}' of type '{}' requires either a 'ref' property or a 'blackboard_key'/'operator'/'expected_value' property set",
        descriptor.name, descriptor.node_type
    )))
}

/// Builds a [`ConditionFn`] that reads `key` from `namespace` and compares it
/// against `expected` using `operator` (`==`, `!=`, `<`, `<=`, `>`, `>=`); a
/// missing key or a non-numeric comparison on non-numeric values is `false`.
fn declarative_condition(key: String, namespace: String, operator: String, expected: Value) -> ConditionFn {
    Arc::new(move |client: Client| {
        let key = key.clone();
        let namespace = namespace.clone();
        let operator = operator.clone();
        let expected = expected.clone();
        Box::pin(async move {
            let actual = match client.get(&key, &namespace).await {
                Ok(v) => v,
                Err(_) => return false,
            };
            compare_values(&operator, &actual, &expected)
        })
    })
}

fn compare_values(operator: &str, actual: &Value, expected: &Value) -> bool {
    match operator {
        "==" => actual == expected,
        "!=" => actual != expected,
        "<" | "<=" | ">" | ">=" => match (actual.as_f64(), expected.as_f64()) {
            (Some(a), Some(b)) => match operator {
                "<" => a < b,
                "<=" => a <= b,
                ">" => a > b,
                ">=" => a >= b,
                _ => unreachable!(),
            },
            _ => false,
        },
        _ => false,
    }
}

/// Recursively builds a live [`Node`] tree from a [`TreeDescriptor`],
/// resolving leaf `"ref"` properties against `registry`.
pub fn build_node(descriptor: &TreeDescriptor, registry: &NodeRegistry) -> BtResult<Node> {
    let props = &descriptor.properties;
    let mut node = match descriptor.node_type.as_str() {
        "sequence" | "reactive_sequence" => {
            let memory = if descriptor.node_type == "reactive_sequence" {
                MemoryPolicy::Fresh
            } else {
                MemoryPolicy::Persistent
            };
            let children = build_children(descriptor, registry)?;
            Node::new(
                &descriptor.name,
                NodeKind::Composite(CompositeKind::Sequence(SequenceNode::new(memory)), children),
            )
        }
        "selector" | "reactive_selector" => {
            let memory = if descriptor.node_type == "reactive_selector" {
                MemoryPolicy::Fresh
            } else {
                MemoryPolicy::Persistent
            };
            let children = build_children(descriptor, registry)?;
            Node::new(
                &descriptor.name,
                NodeKind::Composite(CompositeKind::Selector(SelectorNode::new(memory)), children),
            )
        }
        "random_selector" => {
            let children = build_children(descriptor, registry)?;
            Node::new(
                &descriptor.name,
                NodeKind::Composite(CompositeKind::RandomSelector(RandomSelectorNode::new()), children),
            )
        }
        "parallel" => {
            let children = build_children(descriptor, registry)?;
            let n = children.len();
            let success_threshold = props
                .get("success_threshold")
                .and_then(Value::as_u64)
                .map(|v| v as usize)
                .unwrap_or(n);
            let failure_threshold = props
                .get("failure_threshold")
                .and_then(Value::as_u64)
                .map(|v| v as usize)
                .unwrap_or(1);
            let policy = ParallelPolicy {
                success_threshold,
                failure_threshold,
                synchronized: prop_bool(props, "synchronized", false),
            };
            Node::new(
                &descriptor.name,
                NodeKind::Composite(CompositeKind::Parallel(ParallelNode::new(policy, n)), children),
            )
        }
        "inverter" => {
            let child = build_only_child(descriptor, registry)?;
            Node::new(&descriptor.name, NodeKind::Decorator(DecoratorKind::Inverter(InverterNode), Box::new(child)))
        }
        "force_success" => {
            let child = build_only_child(descriptor, registry)?;
            Node::new(&descriptor.name, NodeKind::Decorator(DecoratorKind::ForceSuccess(ForceSuccessNode), Box::new(child)))
        }
        "force_failure" => {
            let child = build_only_child(descriptor, registry)?;
            Node::new(&descriptor.name, NodeKind::Decorator(DecoratorKind::ForceFailure(ForceFailureNode), Box::new(child)))
        }
        "repeat" => {
            let child = build_only_child(descriptor, registry)?;
            let count = props.get("count").and_then(Value::as_u64).map(|v| v as u32);
            Node::new(&descriptor.name, NodeKind::Decorator(DecoratorKind::Repeat(RepeatNode::new(count)), Box::new(child)))
        }
        "retry" => {
            let child = build_only_child(descriptor, registry)?;
            let max_attempts = prop_u64(props, "max_attempts", 1) as u32;
            let delay_ms = prop_u64(props, "delay_ms", prop_u64(props, "delay", 0) * 1000);
            Node::new(
                &descriptor.name,
                NodeKind::Decorator(DecoratorKind::Retry(RetryNode::with_delay(max_attempts, Duration::from_millis(delay_ms))), Box::new(child)),
            )
        }
        "timeout" => {
            let child = build_only_child(descriptor, registry)?;
            let ms = prop_u64(props, "duration_ms", 1000);
            Node::new(&descriptor.name, NodeKind::Decorator(DecoratorKind::Timeout(TimeoutNode::new(Duration::from_millis(ms))), Box::new(child)))
        }
        "cooldown" => {
            let child = build_only_child(descriptor, registry)?;
            let ms = prop_u64(props, "interval_ms", 1000);
            Node::new(&descriptor.name, NodeKind::Decorator(DecoratorKind::Cooldown(CooldownNode::new(Duration::from_millis(ms))), Box::new(child)))
        }
        "action" => {
            let name = ref_name(descriptor)?;
            let func = registry
                .actions
                .get(name)
                .cloned()
                .ok_or_else(|| BtError::ConfigInvalid(format!("no registered action named '{name}'")))?;
            let mut action = ActionNode::new(func);
            if let Some(secs) = props.get("timeout").and_then(Value::as_f64) {
                action = action.with_timeout(Duration::from_secs_f64(secs));
            }
            let retry_count = prop_u64(props, "retry_count", 0) as u32;
            if retry_count > 0 {
                action = action.with_retry_count(retry_count);
            }
            Node::new(&descriptor.name, NodeKind::Leaf(LeafKind::Action(action)))
        }
        "condition" => {
            let func = resolve_condition(descriptor, registry)?;
            Node::new(&descriptor.name, NodeKind::Leaf(LeafKind::Condition(ConditionNode::new(func))))
        }
        "timed_condition" => {
            let func = resolve_condition(descriptor, registry)?;
            let ms = prop_u64(props, "window_ms", 1000);
            Node::new(
                &descriptor.name,
                NodeKind::Leaf(LeafKind::TimedCondition(TimedConditionNode::new(func, Duration::from_millis(ms)))),
            )
        }
        "wait" => {
            let ms = prop_u64(props, "duration_ms", 1000);
            Node::new(&descriptor.name, NodeKind::Leaf(LeafKind::Wait(WaitNode::new(Duration::from_millis(ms)))))
        }
        "throttle" => {
            let ms = prop_u64(props, "interval_ms", 1000);
            let sticky = prop_bool(props, "sticky", false);
            Node::new(&descriptor.name, NodeKind::Leaf(LeafKind::Throttle(ThrottleNode::new(Duration::from_millis(ms), sticky))))
        }
        "debug_log" => {
            let message = prop_str(props, "message").unwrap_or(&descriptor.name).to_string();
            let level = match prop_str(props, "level").unwrap_or("info") {
                "error" => LogLevel::Error,
                "warn" => LogLevel::Warn,
                "debug" => LogLevel::Debug,
                "trace" => LogLevel::Trace,
                _ => LogLevel::Info,
            };
            Node::new(&descriptor.name, NodeKind::Leaf(LeafKind::DebugLog(DebugLogNode::new(message, level))))
        }
        "event_emit" => {
            let event_name = prop_str(props, "event_name").unwrap_or(&descriptor.name).to_string();
            let payload = props.get("payload").cloned();
            Node::new(&descriptor.name, NodeKind::Leaf(LeafKind::EventEmit(EventEmitNode::new(event_name, payload))))
        }
        "blackboard_set" => {
            let key = prop_str(props, "key").ok_or_else(|| BtError::ConfigInvalid(format!("'{}' requires a 'key' property", descriptor.name)))?.to_string();
            let namespace = prop_str(props, "namespace").unwrap_or(crate::blackboard::DEFAULT_NAMESPACE).to_string();
            let value = props.get("value").cloned().unwrap_or(Value::Null);
            Node::new(&descriptor.name, NodeKind::Leaf(LeafKind::BlackboardSet(BlackboardSetNode::new(key, namespace, value))))
        }
        "blackboard_delete" => {
            let key = prop_str(props, "key").ok_or_else(|| BtError::ConfigInvalid(format!("'{}' requires a 'key' property", descriptor.name)))?.to_string();
            let namespace = prop_str(props, "namespace").unwrap_or(crate::blackboard::DEFAULT_NAMESPACE).to_string();
            Node::new(&descriptor.name, NodeKind::Leaf(LeafKind::BlackboardDelete(BlackboardDeleteNode::new(key, namespace))))
        }
        other => {
            return Err(BtError::ConfigInvalid(format!("unknown node type '{other}' for node '{}'", descriptor.name)));
        }
    };

    if let Some(pre_name) = prop_str(props, "precondition") {
        let func = registry
            .conditions
            .get(pre_name)
            .cloned()
            .ok_or_else(|| BtError::ConfigInvalid(format!("no registered condition named '{pre_name}'")))?;
        let predicate: Predicate = Arc::new(move |client: Client| {
            let func = func.clone();
            Box::pin(async move { func(client).await })
        });
        node = node.with_precondition(predicate);
    }

    if let Some(post_name) = prop_str(props, "postcondition") {
        let func = registry
            .conditions
            .get(post_name)
            .cloned()
            .ok_or_else(|| BtError::ConfigInvalid(format!("no registered condition named '{post_name}'")))?;
        let predicate: Predicate = Arc::new(move |client: Client| {
            let func = func.clone();
            Box::pin(async move { func(client).await })
        });
        node = node.with_postcondition(predicate);
    }

    Ok(node)
}

fn build_children(descriptor: &TreeDescriptor, registry: &NodeRegistry) -> BtResult<Vec<Node>> {
    descriptor.children.iter().map(|c| build_node(c, registry)).collect()
}

fn build_only_child(descriptor: &TreeDescriptor, registry: &NodeRegistry) -> BtResult<Node> {
    descriptor
        .children
        .first()
        .ok_or_else(|| BtError::ConfigInvalid(format!("decorator '{}' requires exactly one child", descriptor.name)))
        .and_then(|c| build_node(c, registry))
}

/// One completed tick's outcome, kept in [`ExecutionContext::history`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TickRecord {
    pub tick_no: u64,
    pub status: Status,
    #[serde(with = "crate::node::duration_secs")]
    pub duration: Duration,
}

/// Per-manager aggregate tick counters and a bounded history of recent
/// ticks, returned by [`TreeManager::stats`].
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub tick_count: u64,
    pub total_duration: Duration,
    pub success_count: u64,
    pub failure_count: u64,
    pub error_count: u64,
    pub last_tick_duration: Duration,
    pub history: VecDeque<TickRecord>,
}

impl ExecutionContext {
    fn record(&mut self, tick_no: u64, status: Status, duration: Duration) {
        self.tick_count += 1;
        self.total_duration += duration;
        self.last_tick_duration = duration;
        match status {
            Status::Success => self.success_count += 1,
            Status::Failure => self.failure_count += 1,
            Status::Error => self.error_count += 1,
            Status::Running | Status::Invalid => {}
        }
        if self.history.len() >= EXECUTION_HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(TickRecord { tick_no, status, duration });
    }
}

/// A frozen point-in-time capture taken by [`TreeManager::take_snapshot`]:
/// the blackboard's namespaces and every node's `(status, stats)`, neither of
/// which is touched again once pushed into [`TreeManager::snapshots`].
#[derive(Clone)]
pub struct Snapshot {
    pub id: u64,
    pub tick_no: u64,
    pub taken_at: chrono::DateTime<Utc>,
    pub blackboard: HashMap<String, Namespace>,
    pub node_stats: HashMap<uuid::Uuid, (Status, crate::node::NodeStats)>,
}

/// Owns a live tree, its blackboard, and the tick loop that drives it.
///
/// Mirrors the teacher's snapshot/auto-save split: [`TreeManager::run`]
/// spawns a ticking task the way `PersistenceManager::start_auto_save`
/// spawns a saving task, and snapshots are written atomically via a
/// temp-file-plus-rename, same as `PersistenceManager::save_snapshot_static`.
pub struct TreeManager {
    root: Node,
    blackboard: Blackboard,
    events: EventBus,
    config: RunnerConfig,
    tick_no: u64,
    /// Rolling cache of the most recent tick's per-node `(status, stats)`,
    /// continuously overwritten every [`TreeManager::tick_once`]; exposed via
    /// [`TreeManager::node_stats`]. Distinct from the frozen copies held in
    /// `snapshots`.
    live_stats: HashMap<uuid::Uuid, (Status, crate::node::NodeStats)>,
    execution: ExecutionContext,
    snapshots: VecDeque<Snapshot>,
    next_snapshot_id: u64,
    subtrees: HashMap<String, TreeDescriptor>,
}

impl TreeManager {
    pub async fn from_descriptor(
        descriptor: &TreeDescriptor,
        registry: &NodeRegistry,
        config: RunnerConfig,
    ) -> BtResult<Self> {
        let blackboard = Blackboard::with_implicit_namespaces(config.implicit_namespaces);
        let events = EventBus::new();
        let mut root = build_node(descriptor, registry)?;
        root.setup(&blackboard, &events).await?;
        Ok(Self {
            root,
            blackboard,
            events,
            config,
            tick_no: 0,
            live_stats: HashMap::new(),
            execution: ExecutionContext::default(),
            snapshots: VecDeque::new(),
            next_snapshot_id: 1,
            subtrees: HashMap::new(),
        })
    }

    /// Loads a tree file (config crate format detection: JSON/YAML/TOML)
    /// and a runner config the same way `Config::load` does, then builds
    /// and wires the named tree (or the file's `main_tree`).
    pub async fn load_from_config(
        tree_path: &str,
        config_path: Option<&str>,
        tree_name: Option<&str>,
        registry: &NodeRegistry,
    ) -> BtResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(tree_path))
            .build()
            .map_err(|e| BtError::ConfigInvalid(e.to_string()))?;
        let tree_file: crate::config::TreeFile = settings
            .try_deserialize()
            .map_err(|e| BtError::ConfigInvalid(e.to_string()))?;

        let name = tree_name
            .map(str::to_string)
            .or(tree_file.main_tree.clone())
            .ok_or_else(|| BtError::ConfigInvalid("no tree name given and no main_tree set".to_string()))?;
        let descriptor = tree_file
            .trees
            .get(&name)
            .ok_or_else(|| BtError::ConfigInvalid(format!("tree '{name}' not found in {tree_path}")))?;

        let runner_config = match config_path {
            Some(path) => RunnerConfig::load(path)?,
            None => RunnerConfig::default(),
        };

        Self::from_descriptor(descriptor, registry, runner_config).await
    }

    pub fn blackboard(&self) -> &Blackboard {
        &self.blackboard
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Runs one tick through the whole tree and returns the root's status.
    #[instrument(skip(self), fields(tick_no = self.tick_no))]
    pub async fn tick_once(&mut self) -> BtResult<Status> {
        self.tick_no += 1;
        let ctx = TickContext {
            blackboard: self.blackboard.clone(),
            events: self.events.clone(),
            tick_no: self.tick_no,
            now: Utc::now(),
        };
        let started = std::time::Instant::now();
        let status = self.root.tick(&ctx).await?;
        let elapsed = started.elapsed();
        if status == Status::Error {
            match self.config.error_policy {
                ErrorPolicy::Halt => {
                    return Err(BtError::TickError {
                        node: self.root.name.clone(),
                        reason: "root returned Error under a Halt error policy".to_string(),
                    })
                }
                ErrorPolicy::Continue => {
                    warn!("root tick produced Error; continuing per configured error policy");
                }
            }
        }
        self.root.collect_stats(&mut self.live_stats);
        self.execution.record(self.tick_no, status, elapsed);
        Ok(status)
    }

    /// Ticks at `config.tick_rate_hz` until `shutdown` resolves or a tick
    /// returns an error under [`ErrorPolicy::Halt`].
    pub async fn run(&mut self, mut shutdown: tokio::sync::oneshot::Receiver<()>) -> BtResult<()> {
        let period = Duration::from_secs_f64(1.0 / self.config.tick_rate_hz.max(0.001));
        let mut interval = tokio::time::interval(period);
        let mut since_snapshot = Duration::ZERO;
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("tree manager received shutdown signal");
                    break;
                }
                _ = interval.tick() => {
                    self.tick_once().await?;
                    since_snapshot += period;
                    if since_snapshot >= Duration::from_secs(self.config.snapshot_interval_secs) {
                        since_snapshot = Duration::ZERO;
                        if let Err(e) = self.take_snapshot().await {
                            error!(error = %e, "periodic snapshot failed");
                        }
                    }
                }
            }
        }
        self.root.shutdown(&self.events).await;
        Ok(())
    }

    fn snapshot_path(&self) -> std::path::PathBuf {
        self.config.data_dir.join("blackboard_snapshot.json")
    }

    /// Freezes the blackboard and every node's `(status, stats)` at this
    /// instant into a new [`Snapshot`], pushed onto the bounded in-memory
    /// history (oldest evicted once `config.max_snapshots` is exceeded), and
    /// returns its id for a later [`TreeManager::restore_snapshot`] call.
    ///
    /// Also atomically persists the blackboard to disk (temp file + rename)
    /// so it survives a process restart, independent of the in-memory
    /// history.
    pub async fn take_snapshot(&mut self) -> BtResult<u64> {
        tokio::fs::create_dir_all(&self.config.data_dir)
            .await
            .map_err(|e| BtError::Other(anyhow::anyhow!(e)))?;
        self.blackboard.save(self.snapshot_path()).await?;

        let mut node_stats = HashMap::new();
        self.root.collect_stats(&mut node_stats);
        let id = self.next_snapshot_id;
        self.next_snapshot_id += 1;
        let snapshot = Snapshot {
            id,
            tick_no: self.tick_no,
            taken_at: Utc::now(),
            blackboard: self.blackboard.deep_copy().await,
            node_stats,
        };
        if self.snapshots.len() >= self.config.max_snapshots.max(1) {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(snapshot);
        Ok(id)
    }

    /// Restores the blackboard and every node's `(status, stats)` to exactly
    /// what they were when snapshot `id` was taken.
    pub async fn restore_snapshot(&mut self, id: u64) -> BtResult<()> {
        let snapshot = self
            .snapshots
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| BtError::ConfigInvalid(format!("no snapshot with id {id}")))?
            .clone();
        self.blackboard.restore(snapshot.blackboard).await;
        self.root.restore_stats(&snapshot.node_stats);
        self.live_stats = snapshot.node_stats;
        Ok(())
    }

    /// Restores the blackboard from the last snapshot written to disk by
    /// [`TreeManager::take_snapshot`], e.g. after a process restart when the
    /// in-memory snapshot history is gone. Node stats are not persisted to
    /// disk, so they are left as-is.
    pub async fn restore_snapshot_from_disk(&mut self) -> BtResult<()> {
        self.blackboard.load(self.snapshot_path()).await
    }

    /// The ids of snapshots currently retained in memory, oldest first.
    pub fn snapshot_ids(&self) -> Vec<u64> {
        self.snapshots.iter().map(|s| s.id).collect()
    }

    /// The manager's aggregate tick counters and bounded tick history.
    pub fn stats(&self) -> &ExecutionContext {
        &self.execution
    }

    /// The most recent tick's per-node `(status, stats)`, keyed by node id.
    pub fn node_stats(&self) -> &HashMap<uuid::Uuid, (Status, crate::node::NodeStats)> {
        &self.live_stats
    }

    /// Registers a named, reusable subtree descriptor. Does not build any
    /// `Node`s; building happens per mount point in
    /// [`TreeManager::instantiate_subtree`].
    pub fn register_subtree(&mut self, name: impl Into<String>, descriptor: TreeDescriptor) {
        self.subtrees.insert(name.into(), descriptor);
    }

    /// Builds a fresh, independent copy of a subtree registered under `name`
    /// and wires it to this manager's blackboard and event bus. Each call
    /// returns a brand-new `Node` tree, so multiple mount points never share
    /// state through the subtree registry.
    pub async fn instantiate_subtree(&self, name: &str, registry: &NodeRegistry) -> BtResult<Node> {
        let descriptor = self
            .subtrees
            .get(name)
            .ok_or_else(|| BtError::ConfigInvalid(format!("no subtree registered under '{name}'")))?;
        let mut node = build_node(descriptor, registry)?;
        node.setup(&self.blackboard, &self.events).await?;
        Ok(node)
    }
}
