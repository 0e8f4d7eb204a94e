use crate::error::BtResult;
use crate::node::{CancelToken, Node, TickContext};
use crate::status::Status;
use std::time::{Duration, Instant};

/// Always succeeds, running its child to completion first.
pub struct ForceSuccessNode;

/// Always fails, running its child to completion first.
pub struct ForceFailureNode;

/// Flips `Success`/`Failure`; `Running` and `Error` pass through unchanged.
pub struct InverterNode;

/// Re-runs the child up to `count` times (or forever, if `count` is `None`),
/// as long as it succeeds; a single failure propagates immediately.
pub struct RepeatNode {
    pub count: Option<u32>,
    completed: u32,
}

impl RepeatNode {
    pub fn new(count: Option<u32>) -> Self {
        Self { count, completed: 0 }
    }

    fn reset(&mut self) {
        self.completed = 0;
    }

    fn on_child_result(&mut self, status: Status) -> Status {
        match status {
            Status::Success => {
                self.completed += 1;
                match self.count {
                    Some(n) if self.completed >= n => Status::Success,
                    _ => Status::Running,
                }
            }
            Status::Running => Status::Running,
            other => other,
        }
    }
}

/// Re-runs the child on failure up to `max_attempts`, waiting `delay`
/// between attempts; succeeds on first success, fails once the attempt
/// budget is exhausted.
pub struct RetryNode {
    pub max_attempts: u32,
    pub delay: Duration,
    attempts: u32,
}

impl RetryNode {
    pub fn new(max_attempts: u32) -> Self {
        Self::with_delay(max_attempts, Duration::ZERO)
    }

    pub fn with_delay(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            attempts: 0,
        }
    }

    fn reset(&mut self) {
        self.attempts = 0;
    }
}

/// Fails the child (and cancels it) if it has not reached a terminal status
/// within `duration` of first being ticked.
pub struct TimeoutNode {
    pub duration: Duration,
    started_at: Option<Instant>,
}

impl TimeoutNode {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            started_at: None,
        }
    }

    fn reset(&mut self) {
        self.started_at = None;
    }
}

/// Skips ticking the child (returning `Failure`) until `interval` has
/// elapsed since the child last completed.
pub struct CooldownNode {
    pub interval: Duration,
    last_completed: Option<Instant>,
}

impl CooldownNode {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_completed: None,
        }
    }

    fn reset(&mut self) {
        self.last_completed = None;
    }

    fn ready(&self) -> bool {
        match self.last_completed {
            None => true,
            Some(t) => t.elapsed() >= self.interval,
        }
    }
}

pub enum DecoratorKind {
    ForceSuccess(ForceSuccessNode),
    ForceFailure(ForceFailureNode),
    Inverter(InverterNode),
    Repeat(RepeatNode),
    Retry(RetryNode),
    Timeout(TimeoutNode),
    Cooldown(CooldownNode),
}

impl DecoratorKind {
    pub(crate) fn reset(&mut self) {
        match self {
            DecoratorKind::Repeat(n) => n.reset(),
            DecoratorKind::Retry(n) => n.reset(),
            DecoratorKind::Timeout(n) => n.reset(),
            DecoratorKind::Cooldown(n) => n.reset(),
            DecoratorKind::ForceSuccess(_) | DecoratorKind::ForceFailure(_) | DecoratorKind::Inverter(_) => {}
        }
    }
}

pub(crate) async fn tick(
    dec: &mut DecoratorKind,
    child: &mut Node,
    ctx: &TickContext,
    cancel: &CancelToken,
) -> BtResult<Status> {
    match dec {
        DecoratorKind::ForceSuccess(_) => {
            let status = child.tick(ctx).await?;
            Ok(if status.is_running() { status } else { Status::Success })
        }
        DecoratorKind::ForceFailure(_) => {
            let status = child.tick(ctx).await?;
            Ok(if status.is_running() { status } else { Status::Failure })
        }
        DecoratorKind::Inverter(_) => {
            let status = child.tick(ctx).await?;
            Ok(match status {
                Status::Success => Status::Failure,
                Status::Failure => Status::Success,
                other => other,
            })
        }
        DecoratorKind::Repeat(n) => {
            let status = child.tick(ctx).await?;
            let result = n.on_child_result(status);
            if result == Status::Running && status.is_terminal() {
                child.reset();
            }
            Ok(result)
        }
        DecoratorKind::Retry(n) => {
            loop {
                let status = child.tick(ctx).await?;
                match status {
                    Status::Running => return Ok(Status::Running),
                    Status::Success => {
                        n.reset();
                        return Ok(Status::Success);
                    }
                    Status::Failure | Status::Error => {
                        n.attempts += 1;
                        child.reset();
                        if n.attempts >= n.max_attempts {
                            n.reset();
                            return Ok(Status::Failure);
                        }
                        if !n.delay.is_zero() {
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => {
                                    n.reset();
                                    return Ok(Status::Failure);
                                }
                                _ = tokio::time::sleep(n.delay) => {}
                            }
                        }
                    }
                    Status::Invalid => unreachable!("tick never yields Invalid"),
                }
            }
        }
        DecoratorKind::Timeout(n) => {
            let start = *n.started_at.get_or_insert_with(Instant::now);
            if start.elapsed() >= n.duration {
                child.cancel();
                let _ = child.tick(ctx).await;
                n.started_at = None;
                return Ok(Status::Failure);
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    n.started_at = None;
                    Ok(Status::Failure)
                }
                status = child.tick(ctx) => {
                    let status = status?;
                    if status.is_terminal() {
                        n.started_at = None;
                    }
                    Ok(status)
                }
            }
        }
        DecoratorKind::Cooldown(n) => {
            if !n.ready() {
                return Ok(Status::Failure);
            }
            let status = child.tick(ctx).await?;
            if status.is_terminal() {
                n.last_completed = Some(Instant::now());
            }
            Ok(status)
        }
    }
}
