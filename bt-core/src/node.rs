use crate::blackboard::{Blackboard, Client};
use crate::composites::CompositeKind;
use crate::decorators::DecoratorKind;
use crate::error::{BtError, BtResult};
use crate::event::{Event, EventBus, EventKind};
use crate::leaves::LeafKind;
use crate::status::Status;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, instrument, warn};
use uuid::Uuid;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A user-supplied pre/post-condition predicate.
pub type Predicate = Arc<dyn Fn(Client) -> BoxFuture<'static, bool> + Send + Sync>;

/// Cooperative cancellation signal shared between a node and its
/// currently-running leaf work. Checked at suspension points; never
/// preempts.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    notify: Arc<tokio::sync::Notify>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Resolves once `cancel()` has been called, for use in `tokio::select!`.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Per-tick context threaded through the node tree.
#[derive(Clone)]
pub struct TickContext {
    pub blackboard: Blackboard,
    pub events: EventBus,
    pub tick_no: u64,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStats {
    pub created_at: DateTime<Utc>,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub total_ticks: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub error_count: u64,
    #[serde(with = "duration_secs")]
    pub average_duration: Duration,
    pub last_error: Option<String>,
    #[serde(skip)]
    completed_count: u64,
}

impl NodeStats {
    fn new() -> Self {
        Self {
            created_at: Utc::now(),
            last_tick_at: None,
            total_ticks: 0,
            success_count: 0,
            failure_count: 0,
            error_count: 0,
            average_duration: Duration::ZERO,
            last_error: None,
            completed_count: 0,
        }
    }

    fn record(&mut self, status: Status, duration: Duration) {
        self.last_tick_at = Some(Utc::now());
        self.total_ticks += 1;
        match status {
            Status::Success => self.success_count += 1,
            Status::Failure => self.failure_count += 1,
            Status::Error => self.error_count += 1,
            Status::Running | Status::Invalid => {}
        }
        if status.is_terminal() {
            self.completed_count += 1;
            let delta = duration.as_secs_f64() - self.average_duration.as_secs_f64();
            let new_avg = self.average_duration.as_secs_f64() + delta / self.completed_count as f64;
            self.average_duration = Duration::from_secs_f64(new_avg.max(0.0));
        }
    }
}

pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

/// The closed set of behaviors a [`Node`] may wrap. Dispatch is by `match`,
/// never by dynamic trait dispatch, per the runtime's "closed set of node
/// kinds" design (composites hold a child list, decorators a single child,
/// leaves none).
pub enum NodeKind {
    Leaf(LeafKind),
    Decorator(DecoratorKind, Box<Node>),
    Composite(CompositeKind, Vec<Node>),
}

impl NodeKind {
    fn children_mut(&mut self) -> &mut [Node] {
        match self {
            NodeKind::Leaf(_) => &mut [],
            NodeKind::Decorator(_, child) => std::slice::from_mut(child),
            NodeKind::Composite(_, children) => children.as_mut_slice(),
        }
    }

    fn children(&self) -> &[Node] {
        match self {
            NodeKind::Leaf(_) => &[],
            NodeKind::Decorator(_, child) => std::slice::from_ref(child),
            NodeKind::Composite(_, children) => children.as_slice(),
        }
    }

    fn reset_self(&mut self) {
        match self {
            NodeKind::Leaf(leaf) => leaf.reset(),
            NodeKind::Decorator(dec, _) => dec.reset(),
            NodeKind::Composite(comp, _) => comp.reset(),
        }
    }

    async fn tick_self(
        &mut self,
        ctx: &TickContext,
        cancel: &CancelToken,
        client: &Client,
    ) -> BtResult<Status> {
        match self {
            NodeKind::Leaf(leaf) => crate::leaves::tick(leaf, ctx, cancel, client).await,
            NodeKind::Decorator(dec, child) => {
                crate::decorators::tick(dec, child, ctx, cancel).await
            }
            NodeKind::Composite(comp, children) => {
                crate::composites::tick(comp, children, ctx).await
            }
        }
    }
}

/// A node in the behavior tree: the common lifecycle, stats, and event
/// envelope around a [`NodeKind`].
pub struct Node {
    pub id: Uuid,
    pub name: String,
    pub status: Status,
    pub properties: HashMap<String, Value>,
    pub stats: NodeStats,
    pub kind: NodeKind,
    setup_done: bool,
    precondition: Option<Predicate>,
    postcondition: Option<Predicate>,
    cancel_token: CancelToken,
    client: Option<Client>,
}

impl Node {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            status: Status::Invalid,
            properties: HashMap::new(),
            stats: NodeStats::new(),
            kind,
            setup_done: false,
            precondition: None,
            postcondition: None,
            cancel_token: CancelToken::new(),
            client: None,
        }
    }

    pub fn with_precondition(mut self, predicate: Predicate) -> Self {
        self.precondition = Some(predicate);
        self
    }

    pub fn with_postcondition(mut self, predicate: Predicate) -> Self {
        self.postcondition = Some(predicate);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Wires the blackboard client and recursively sets up children.
    /// Called once before the first tick; failure aborts tree initialization.
    pub fn setup<'a>(&'a mut self, blackboard: &'a Blackboard, events: &'a EventBus) -> BoxFuture<'a, BtResult<()>> {
        Box::pin(async move {
            let client = Client::new(blackboard.clone(), self.name.clone());
            self.client = Some(client);
            for child in self.kind.children_mut() {
                child.setup(blackboard, events).await?;
            }
            self.setup_done = true;
            events.emit(Event::new(EventKind::Setup, self.id, self.name.clone()));
            Ok(())
        })
    }

    /// Runs one tick through the full lifecycle: precondition check, entry
    /// event, node-specific logic, postcondition check, exit/status-changed
    /// events, and stats update.
    pub fn tick<'a>(&'a mut self, ctx: &'a TickContext) -> BoxFuture<'a, BtResult<Status>> {
        Box::pin(async move {
            if !self.setup_done {
                return Err(BtError::SetupFailed {
                    node: self.name.clone(),
                    reason: "tick() called before setup()".to_string(),
                });
            }

            let previous_status = self.status;
            let started = Instant::now();

            if let Some(pre) = &self.precondition {
                let client = self.client.clone().expect("wired at setup");
                if !(pre)(client).await {
                    self.status = Status::Failure;
                    ctx.events
                        .emit(Event::new(EventKind::StatusChanged, self.id, self.name.clone()));
                    self.stats.record(Status::Failure, started.elapsed());
                    return Ok(Status::Failure);
                }
            }

            ctx.events
                .emit(Event::new(EventKind::Entering, self.id, self.name.clone()));

            let client = self.client.clone().expect("wired at setup");
            let tick_result = self.kind.tick_self(ctx, &self.cancel_token, &client).await;

            let mut status = match tick_result {
                Ok(status) => status,
                Err(err) => {
                    error!(node = %self.name, error = %err, "node tick failed");
                    self.stats.last_error = Some(err.to_string());
                    Status::Error
                }
            };

            if status == Status::Success {
                if let Some(post) = &self.postcondition {
                    let client = self.client.clone().expect("wired at setup");
                    if !(post)(client).await {
                        status = Status::Failure;
                    }
                }
            }

            self.status = status;
            ctx.events
                .emit(Event::new(EventKind::Exiting, self.id, self.name.clone()));
            if status != previous_status {
                ctx.events
                    .emit(Event::new(EventKind::StatusChanged, self.id, self.name.clone()));
            }
            if status == Status::Error {
                ctx.events
                    .emit(Event::new(EventKind::Error, self.id, self.name.clone()));
            }

            self.stats.record(status, started.elapsed());
            Ok(status)
        })
    }

    /// Requests cooperative cancellation of this node and its children.
    pub fn cancel(&mut self) {
        self.cancel_token.cancel();
        for child in self.kind.children_mut() {
            child.cancel();
        }
    }

    /// Sets status to `Invalid` and recursively resets children; stats are
    /// preserved.
    pub fn reset(&mut self) {
        self.status = Status::Invalid;
        self.cancel_token.reset();
        self.kind.reset_self();
        for child in self.kind.children_mut() {
            child.reset();
        }
    }

    /// Idempotent: a second call is a no-op.
    #[instrument(skip(self, events), fields(node = %self.name))]
    pub fn shutdown<'a>(&'a mut self, events: &'a EventBus) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if !self.setup_done {
                return;
            }
            for child in self.kind.children_mut() {
                child.shutdown(events).await;
            }
            events.emit(Event::new(EventKind::Shutdown, self.id, self.name.clone()));
            self.setup_done = false;
            self.client = None;
        })
    }

    pub fn children(&self) -> &[Node] {
        self.kind.children()
    }

    pub fn find(&self, id: Uuid) -> Option<&Node> {
        if self.id == id {
            return Some(self);
        }
        self.kind.children().iter().find_map(|c| c.find(id))
    }

    pub fn collect_stats(&self, out: &mut HashMap<Uuid, (Status, NodeStats)>) {
        out.insert(self.id, (self.status, self.stats.clone()));
        for child in self.kind.children() {
            child.collect_stats(out);
        }
    }

    pub fn restore_stats(&mut self, saved: &HashMap<Uuid, (Status, NodeStats)>) {
        if let Some((status, stats)) = saved.get(&self.id) {
            self.status = *status;
            self.stats = stats.clone();
        } else {
            warn!(node = %self.name, "no saved stats for node during snapshot restore");
        }
        for child in self.kind.children_mut() {
            child.restore_stats(saved);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaves::{ActionFn, ActionNode, ActionOutcome};

    fn ctx() -> TickContext {
        TickContext {
            blackboard: Blackboard::new(),
            events: EventBus::new(),
            tick_no: 1,
            now: Utc::now(),
        }
    }

    fn always_success_action() -> ActionFn {
        Arc::new(|_client| Box::pin(async move { Ok(ActionOutcome::Status(Status::Success)) }))
    }

    #[tokio::test]
    async fn node_requires_setup_before_tick() {
        let mut node = Node::new("leaf", NodeKind::Leaf(LeafKind::Action(ActionNode::new(always_success_action()))));
        let ctx = ctx();
        let err = node.tick(&ctx).await.unwrap_err();
        assert!(matches!(err, BtError::SetupFailed { .. }));
    }

    #[tokio::test]
    async fn failing_precondition_skips_node_logic() {
        let bb = Blackboard::new();
        let events = EventBus::new();
        let mut node = Node::new(
            "leaf",
            NodeKind::Leaf(LeafKind::Action(ActionNode::new(always_success_action()))),
        )
        .with_precondition(Arc::new(|_c| Box::pin(async move { false })));
        node.setup(&bb, &events).await.unwrap();
        let ctx = TickContext {
            blackboard: bb,
            events,
            tick_no: 1,
            now: Utc::now(),
        };
        let status = node.tick(&ctx).await.unwrap();
        assert_eq!(status, Status::Failure);
        assert_eq!(node.stats.total_ticks, 1);
    }

    #[tokio::test]
    async fn idempotent_shutdown() {
        let bb = Blackboard::new();
        let events = EventBus::new();
        let mut node = Node::new(
            "leaf",
            NodeKind::Leaf(LeafKind::Action(ActionNode::new(always_success_action()))),
        );
        node.setup(&bb, &events).await.unwrap();
        node.shutdown(&events).await;
        node.shutdown(&events).await;
        assert!(!node.setup_done);
    }
}
