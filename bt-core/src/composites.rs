use crate::error::BtResult;
use crate::node::{Node, TickContext};
use crate::status::Status;

/// Whether a composite re-evaluates already-succeeded children on every
/// tick (`Fresh`) or remembers the running index and resumes from it
/// (`Persistent`), per the reactive vs. plain composite split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPolicy {
    Persistent,
    Fresh,
}

/// Ticks children `index..` in order, stopping at the first `Failure`;
/// `Success` advances to the next child, `Running` is remembered (in
/// `Persistent` mode) so the next tick resumes there instead of
/// re-running completed siblings.
pub struct SequenceNode {
    pub memory: MemoryPolicy,
    index: usize,
    /// Which child is currently `Running`, used only in `Fresh` mode to
    /// detect when re-evaluating prior children has handed `Running` to a
    /// different child than last tick, so the previous one can be reset.
    running: Option<usize>,
}

impl SequenceNode {
    pub fn new(memory: MemoryPolicy) -> Self {
        Self { index: 0, memory, running: None }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.running = None;
    }
}

/// Ticks children `index..` in order, stopping at the first `Success`;
/// `Failure` advances to the next child.
pub struct SelectorNode {
    pub memory: MemoryPolicy,
    index: usize,
    running: Option<usize>,
}

impl SelectorNode {
    pub fn new(memory: MemoryPolicy) -> Self {
        Self { index: 0, memory, running: None }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.running = None;
    }
}

/// Like [`SelectorNode`] but picks the next child to try uniformly at
/// random rather than in order, reshuffling whenever it starts fresh.
pub struct RandomSelectorNode {
    order: Vec<usize>,
    cursor: usize,
}

impl RandomSelectorNode {
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            cursor: 0,
        }
    }

    fn reset(&mut self) {
        self.order.clear();
        self.cursor = 0;
    }

    fn ensure_order(&mut self, len: usize) {
        if self.order.is_empty() && len > 0 {
            use rand::seq::SliceRandom;
            self.order = (0..len).collect();
            self.order.shuffle(&mut rand::thread_rng());
            self.cursor = 0;
        }
    }
}

impl Default for RandomSelectorNode {
    fn default() -> Self {
        Self::new()
    }
}

/// How many children's outcome counts toward a [`ParallelNode`]'s overall
/// result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelPolicy {
    pub success_threshold: usize,
    pub failure_threshold: usize,
    /// When true, all children complete their current tick before the
    /// composite returns, even once a threshold is already met.
    pub synchronized: bool,
}

impl ParallelPolicy {
    pub fn require_all(n: usize) -> Self {
        Self {
            success_threshold: n,
            failure_threshold: 1,
            synchronized: false,
        }
    }

    pub fn require_one(n: usize) -> Self {
        Self {
            success_threshold: 1,
            failure_threshold: n,
            synchronized: false,
        }
    }
}

/// Ticks every non-terminal child once per tick; completes once enough
/// children have succeeded or failed to cross a threshold.
pub struct ParallelNode {
    pub policy: ParallelPolicy,
    child_status: Vec<Status>,
}

impl ParallelNode {
    pub fn new(policy: ParallelPolicy, child_count: usize) -> Self {
        Self {
            policy,
            child_status: vec![Status::Invalid; child_count],
        }
    }

    fn reset(&mut self) {
        self.child_status.iter_mut().for_each(|s| *s = Status::Invalid);
    }
}

pub enum CompositeKind {
    Sequence(SequenceNode),
    Selector(SelectorNode),
    RandomSelector(RandomSelectorNode),
    Parallel(ParallelNode),
}

impl CompositeKind {
    pub(crate) fn reset(&mut self) {
        match self {
            CompositeKind::Sequence(n) => n.reset(),
            CompositeKind::Selector(n) => n.reset(),
            CompositeKind::RandomSelector(n) => n.reset(),
            CompositeKind::Parallel(n) => n.reset(),
        }
    }
}

pub(crate) async fn tick(
    comp: &mut CompositeKind,
    children: &mut [Node],
    ctx: &TickContext,
) -> BtResult<Status> {
    match comp {
        CompositeKind::Sequence(n) => tick_sequence(n, children, ctx).await,
        CompositeKind::Selector(n) => tick_selector(n, children, ctx).await,
        CompositeKind::RandomSelector(n) => tick_random_selector(n, children, ctx).await,
        CompositeKind::Parallel(n) => tick_parallel(n, children, ctx).await,
    }
}

async fn tick_sequence(n: &mut SequenceNode, children: &mut [Node], ctx: &TickContext) -> BtResult<Status> {
    // FRESH re-evaluates every prior child from the top on each external
    // tick; PERSISTENT resumes at the index a previous RUNNING left off.
    let mut i = if n.memory == MemoryPolicy::Fresh { 0 } else { n.index };
    while i < children.len() {
        let status = children[i].tick(ctx).await?;
        match status {
            Status::Running => {
                if n.memory == MemoryPolicy::Fresh {
                    if n.running != Some(i) {
                        if let Some(prev) = n.running {
                            children[prev].reset();
                        }
                        n.running = Some(i);
                    }
                } else {
                    n.index = i;
                }
                return Ok(Status::Running);
            }
            Status::Failure | Status::Error => {
                n.reset();
                for c in children.iter_mut() {
                    c.reset();
                }
                return Ok(status);
            }
            Status::Success => i += 1,
            Status::Invalid => unreachable!("tick never yields Invalid"),
        }
    }
    n.reset();
    for c in children.iter_mut() {
        c.reset();
    }
    Ok(Status::Success)
}

async fn tick_selector(n: &mut SelectorNode, children: &mut [Node], ctx: &TickContext) -> BtResult<Status> {
    let mut i = if n.memory == MemoryPolicy::Fresh { 0 } else { n.index };
    while i < children.len() {
        let status = children[i].tick(ctx).await?;
        match status {
            Status::Running => {
                if n.memory == MemoryPolicy::Fresh {
                    if n.running != Some(i) {
                        if let Some(prev) = n.running {
                            children[prev].reset();
                        }
                        n.running = Some(i);
                    }
                } else {
                    n.index = i;
                }
                return Ok(Status::Running);
            }
            Status::Success => {
                n.reset();
                for c in children.iter_mut() {
                    c.reset();
                }
                return Ok(Status::Success);
            }
            Status::Failure | Status::Error => i += 1,
            Status::Invalid => unreachable!("tick never yields Invalid"),
        }
    }
    n.reset();
    for c in children.iter_mut() {
        c.reset();
    }
    Ok(Status::Failure)
}

async fn tick_random_selector(
    n: &mut RandomSelectorNode,
    children: &mut [Node],
    ctx: &TickContext,
) -> BtResult<Status> {
    n.ensure_order(children.len());
    while n.cursor < n.order.len() {
        let idx = n.order[n.cursor];
        let status = children[idx].tick(ctx).await?;
        match status {
            Status::Running => return Ok(Status::Running),
            Status::Success => {
                n.reset();
                for c in children.iter_mut() {
                    c.reset();
                }
                return Ok(Status::Success);
            }
            Status::Failure | Status::Error => n.cursor += 1,
            Status::Invalid => unreachable!("tick never yields Invalid"),
        }
    }
    n.reset();
    for c in children.iter_mut() {
        c.reset();
    }
    Ok(Status::Failure)
}

async fn tick_parallel(n: &mut ParallelNode, children: &mut [Node], ctx: &TickContext) -> BtResult<Status> {
    for (i, child) in children.iter_mut().enumerate() {
        if n.child_status[i].is_terminal() {
            continue;
        }
        n.child_status[i] = child.tick(ctx).await?.as_failure_equivalent();
    }

    let successes = n.child_status.iter().filter(|s| **s == Status::Success).count();
    let failures = n.child_status.iter().filter(|s| **s == Status::Failure).count();

    let decided = if successes >= n.policy.success_threshold {
        Some(Status::Success)
    } else if failures >= n.policy.failure_threshold {
        Some(Status::Failure)
    } else {
        None
    };

    match decided {
        Some(status) if !n.policy.synchronized => {
            for child in children.iter_mut() {
                child.cancel();
            }
            n.reset();
            for c in children.iter_mut() {
                c.reset();
            }
            Ok(status)
        }
        Some(status) => {
            let all_terminal = n.child_status.iter().all(|s| s.is_terminal());
            if all_terminal {
                n.reset();
                for c in children.iter_mut() {
                    c.reset();
                }
                Ok(status)
            } else {
                Ok(Status::Running)
            }
        }
        None => Ok(Status::Running),
    }
}
