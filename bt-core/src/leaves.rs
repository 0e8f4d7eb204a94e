use crate::blackboard::Client;
use crate::error::BtResult;
use crate::node::{BoxFuture, CancelToken, TickContext};
use crate::status::Status;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Severity for a [`DebugLogNode`], mapped onto the corresponding `tracing` macro.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Outcome of a user-supplied action/condition function. `Bool` is the
/// truthy/falsy shorthand; `Status` passes a specific terminal status
/// straight through.
pub enum ActionOutcome {
    Bool(bool),
    Status(Status),
}

impl ActionOutcome {
    fn into_status(self) -> Status {
        match self {
            ActionOutcome::Bool(true) => Status::Success,
            ActionOutcome::Bool(false) => Status::Failure,
            ActionOutcome::Status(s) => s,
        }
    }
}

pub type ActionFn = Arc<dyn Fn(Client) -> BoxFuture<'static, BtResult<ActionOutcome>> + Send + Sync>;
pub type ConditionFn = Arc<dyn Fn(Client) -> BoxFuture<'static, bool> + Send + Sync>;

pub struct ActionNode {
    func: ActionFn,
    pub timeout: Option<Duration>,
    pub retry_count: u32,
    runs: u32,
}

impl ActionNode {
    pub fn new(func: ActionFn) -> Self {
        Self {
            func,
            timeout: None,
            retry_count: 0,
            runs: 0,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn runs(&self) -> u32 {
        self.runs
    }

    fn reset(&mut self) {
        self.runs = 0;
    }

    async fn invoke_once(&self, client: &Client, cancel: &CancelToken) -> Status {
        let call = (self.func)(client.clone());
        let outcome = match self.timeout {
            Some(timeout) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Status::Failure,
                    result = tokio::time::timeout(timeout, call) => match result {
                        Ok(Ok(outcome)) => Ok(outcome),
                        Ok(Err(e)) => Err(e),
                        Err(_) => return Status::Failure,
                    },
                }
            }
            None => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Status::Failure,
                    result = call => result,
                }
            }
        };
        match outcome {
            Ok(outcome) => outcome.into_status(),
            Err(_) => Status::Error,
        }
    }

    async fn tick(&mut self, client: &Client, cancel: &CancelToken) -> Status {
        let mut attempts_left = self.retry_count + 1;
        loop {
            self.runs += 1;
            let status = self.invoke_once(client, cancel).await;
            attempts_left -= 1;
            if status != Status::Failure || attempts_left == 0 || cancel.is_cancelled() {
                return status;
            }
        }
    }
}

pub struct ConditionNode {
    func: ConditionFn,
}

impl ConditionNode {
    pub fn new(func: ConditionFn) -> Self {
        Self { func }
    }

    async fn tick(&mut self, client: &Client) -> Status {
        if (self.func)(client.clone()).await {
            Status::Success
        } else {
            Status::Failure
        }
    }
}

/// Evaluates a condition repeatedly over a window; succeeds on first
/// satisfaction, fails at window expiry.
pub struct TimedConditionNode {
    func: ConditionFn,
    window: Duration,
    started_at: Option<Instant>,
}

impl TimedConditionNode {
    pub fn new(func: ConditionFn, window: Duration) -> Self {
        Self {
            func,
            window,
            started_at: None,
        }
    }

    fn reset(&mut self) {
        self.started_at = None;
    }

    async fn tick(&mut self, client: &Client) -> Status {
        let start = *self.started_at.get_or_insert_with(Instant::now);
        if (self.func)(client.clone()).await {
            self.started_at = None;
            return Status::Success;
        }
        if start.elapsed() >= self.window {
            self.started_at = None;
            Status::Failure
        } else {
            Status::Running
        }
    }
}

/// Yields `Running` until `duration` has elapsed since the first tick.
pub struct WaitNode {
    pub duration: Duration,
    started_at: Option<Instant>,
}

impl WaitNode {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            started_at: None,
        }
    }

    fn reset(&mut self) {
        self.started_at = None;
    }

    fn tick(&mut self, cancel: &CancelToken) -> Status {
        if cancel.is_cancelled() {
            self.started_at = None;
            return Status::Failure;
        }
        let start = *self.started_at.get_or_insert_with(Instant::now);
        if start.elapsed() >= self.duration {
            self.started_at = None;
            Status::Success
        } else {
            Status::Running
        }
    }
}

/// At most one successful invocation per `interval`.
pub struct ThrottleNode {
    pub interval: Duration,
    pub sticky: bool,
    last_success: Option<Instant>,
}

impl ThrottleNode {
    pub fn new(interval: Duration, sticky: bool) -> Self {
        Self {
            interval,
            sticky,
            last_success: None,
        }
    }

    fn reset(&mut self) {
        self.last_success = None;
    }

    fn tick(&mut self) -> Status {
        let allowed = match self.last_success {
            None => true,
            Some(last) => last.elapsed() >= self.interval,
        };
        if allowed {
            self.last_success = Some(Instant::now());
            Status::Success
        } else if self.sticky {
            Status::Success
        } else {
            Status::Failure
        }
    }
}

pub struct DebugLogNode {
    pub message: String,
    pub level: LogLevel,
}

impl DebugLogNode {
    pub fn new(message: impl Into<String>, level: LogLevel) -> Self {
        Self {
            message: message.into(),
            level,
        }
    }

    fn tick(&mut self) -> Status {
        match self.level {
            LogLevel::Error => tracing::error!("{}", self.message),
            LogLevel::Warn => tracing::warn!("{}", self.message),
            LogLevel::Info => tracing::info!("{}", self.message),
            LogLevel::Debug => debug!("{}", self.message),
            LogLevel::Trace => tracing::trace!("{}", self.message),
        }
        Status::Success
    }
}

/// Publishes a user-defined event to the tick's event bus; always succeeds.
///
/// The core `Event` kind enumeration (spec §3/§4.1) is closed, so the
/// user-defined event is carried as a `STATUS_CHANGED`-kind event whose
/// payload names it; see DESIGN.md for the rationale.
pub struct EventEmitNode {
    pub event_name: String,
    pub payload: Option<Value>,
}

impl EventEmitNode {
    pub fn new(event_name: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            event_name: event_name.into(),
            payload,
        }
    }

    fn tick(&mut self, ctx: &TickContext) -> Status {
        use crate::event::{Event, EventKind};
        use uuid::Uuid;

        let mut payload = serde_json::json!({ "user_event": self.event_name });
        if let Some(extra) = &self.payload {
            if let Value::Object(map) = &mut payload {
                map.insert("data".to_string(), extra.clone());
            }
        }
        ctx.events.emit(
            Event::new(EventKind::StatusChanged, Uuid::nil(), self.event_name.clone())
                .with_payload(payload),
        );
        Status::Success
    }
}

pub struct BlackboardSetNode {
    pub key: String,
    pub namespace: String,
    pub value: Value,
}

impl BlackboardSetNode {
    pub fn new(key: impl Into<String>, namespace: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            namespace: namespace.into(),
            value,
        }
    }

    async fn tick(&mut self, client: &Client) -> Status {
        match client.set(&self.key, self.value.clone(), &self.namespace).await {
            Ok(()) => Status::Success,
            Err(_) => Status::Failure,
        }
    }
}

pub struct BlackboardDeleteNode {
    pub key: String,
    pub namespace: String,
}

impl BlackboardDeleteNode {
    pub fn new(key: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            namespace: namespace.into(),
        }
    }

    async fn tick(&mut self, client: &Client) -> Status {
        match client.delete(&self.key, &self.namespace).await {
            Ok(_) => Status::Success,
            Err(_) => Status::Failure,
        }
    }
}

pub enum LeafKind {
    Action(ActionNode),
    Condition(ConditionNode),
    TimedCondition(TimedConditionNode),
    Wait(WaitNode),
    Throttle(ThrottleNode),
    DebugLog(DebugLogNode),
    EventEmit(EventEmitNode),
    BlackboardSet(BlackboardSetNode),
    BlackboardDelete(BlackboardDeleteNode),
}

impl LeafKind {
    pub(crate) fn reset(&mut self) {
        match self {
            LeafKind::Action(n) => n.reset(),
            LeafKind::TimedCondition(n) => n.reset(),
            LeafKind::Wait(n) => n.reset(),
            LeafKind::Throttle(n) => n.reset(),
            LeafKind::Condition(_)
            | LeafKind::DebugLog(_)
            | LeafKind::EventEmit(_)
            | LeafKind::BlackboardSet(_)
            | LeafKind::BlackboardDelete(_) => {}
        }
    }
}

pub(crate) async fn tick(
    leaf: &mut LeafKind,
    ctx: &TickContext,
    cancel: &CancelToken,
    client: &Client,
) -> BtResult<Status> {
    let status = match leaf {
        LeafKind::Action(n) => n.tick(client, cancel).await,
        LeafKind::Condition(n) => n.tick(client).await,
        LeafKind::TimedCondition(n) => n.tick(client).await,
        LeafKind::Wait(n) => n.tick(cancel),
        LeafKind::Throttle(n) => n.tick(),
        LeafKind::DebugLog(n) => n.tick(),
        LeafKind::EventEmit(n) => n.tick(ctx),
        LeafKind::BlackboardSet(n) => n.tick(client).await,
        LeafKind::BlackboardDelete(n) => n.tick(client).await,
    };
    Ok(status)
}
