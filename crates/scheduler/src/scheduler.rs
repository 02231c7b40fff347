//! The cooperative dispatch loop.

use crate::jobs::{JobContext, JobOutcome};
use crate::queue::{Queue, QueueType};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use strata_core::{ElementSet, Result, keys};

/// What to do when an element fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop dispatching new work after the first failure; in-flight work
    /// drains.
    #[default]
    FailFast,
    /// Keep dispatching elements whose prerequisites still hold; report
    /// transitively blocked elements as skipped.
    KeepGoing,
}

/// Per-queue-type concurrency budgets.
#[derive(Debug, Clone, Copy)]
pub struct JobLimits {
    /// Budget shared by fetch and track queues (network-bound).
    pub fetchers: usize,
    /// Budget for build queues (CPU/IO-bound).
    pub builders: usize,
    /// Budget for push queues.
    pub pushers: usize,
}

impl Default for JobLimits {
    fn default() -> Self {
        let cpus = num_cpus::get();
        Self {
            fetchers: cpus.min(10),
            builders: cpus,
            pushers: cpus.min(4),
        }
    }
}

impl JobLimits {
    fn limit_for(&self, queue_type: QueueType) -> usize {
        match queue_type {
            QueueType::Fetch | QueueType::Track => self.fetchers,
            QueueType::Build => self.builders,
            QueueType::Push => self.pushers,
        }
        .max(1)
    }
}

/// Where every element ended up after a run.
#[derive(Debug, Default)]
pub struct SchedulerReport {
    /// Elements that cleared the whole queue chain.
    pub succeeded: Vec<String>,
    /// Elements that failed in some queue.
    pub failed: Vec<String>,
    /// Elements never dispatched: blocked by a failed dependency, or left
    /// over when the run drained early.
    pub skipped: Vec<String>,
    /// Whether the run ended due to an external termination signal.
    pub cancelled: bool,
}

impl SchedulerReport {
    /// Whether everything that was asked for succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty() && !self.cancelled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementStatus {
    Active,
    Done,
    Failed,
    Blocked,
}

/// The scheduler: owns the queue chain and drives elements through it.
///
/// Single-threaded and cooperative: all element state is mutated here, on
/// completion events pulled one at a time from the workers' channel.
pub struct Scheduler {
    queues: Vec<Box<dyn Queue>>,
    limits: JobLimits,
    policy: FailurePolicy,
}

struct RunState {
    status: HashMap<usize, ElementStatus>,
    queue_pos: HashMap<usize, usize>,
    waiting: Vec<HashSet<usize>>,
    ready: Vec<VecDeque<usize>>,
    in_flight: HashMap<QueueType, usize>,
    in_flight_total: usize,
    checks: VecDeque<usize>,
    draining: bool,
    cancelled: bool,
}

impl Scheduler {
    /// Build a scheduler over an ordered queue chain.
    #[must_use]
    pub fn new(queues: Vec<Box<dyn Queue>>, limits: JobLimits, policy: FailurePolicy) -> Self {
        Self {
            queues,
            limits,
            policy,
        }
    }

    /// Drive the goal elements (and their dependency closure) through the
    /// queue chain.
    pub async fn run(
        &self,
        set: &mut ElementSet,
        goals: &[String],
        ctx: &Arc<JobContext>,
    ) -> Result<SchedulerReport> {
        let plan_names = set
            .closure(goals)
            .map_err(|e| strata_core::Error::load(e.to_string()))?;
        let plan: Vec<usize> = plan_names
            .iter()
            .filter_map(|name| set.index_of(name))
            .collect();
        if self.queues.is_empty() || plan.is_empty() {
            return Ok(SchedulerReport::default());
        }

        // Fingerprint whatever is fingerprintable before dispatch, then
        // take a fresh look at what the store already holds
        keys::compute_keys(set, &ctx.project, &ctx.registry)?;
        refresh_cached(set, &plan, ctx);

        let mut state = RunState {
            status: plan.iter().map(|&i| (i, ElementStatus::Active)).collect(),
            queue_pos: HashMap::new(),
            waiting: (0..self.queues.len()).map(|_| HashSet::new()).collect(),
            ready: (0..self.queues.len()).map(|_| VecDeque::new()).collect(),
            in_flight: HashMap::new(),
            in_flight_total: 0,
            checks: VecDeque::new(),
            draining: false,
            cancelled: false,
        };
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, usize, JobOutcome)>();

        // Seed the first queue in topological order
        for &idx in &plan {
            self.enter_queue(set, &mut state, idx, 0);
        }

        loop {
            if !state.draining && ctx.cancel.is_cancelled() {
                info!("Termination requested, refusing new dispatch");
                state.draining = true;
                state.cancelled = true;
            }

            if !state.draining {
                self.drain_checks(set, &mut state);
                self.dispatch(set, &mut state, ctx, &tx);
            }

            if state.in_flight_total == 0 {
                let unfinished = state
                    .status
                    .values()
                    .any(|s| *s == ElementStatus::Active);
                if !unfinished || state.draining {
                    break;
                }
                // Backstop: a stalled element whose readiness can never be
                // satisfied (e.g. unresolved sources in a build queue).
                // One full rescan, then declare the remainder failed.
                state.checks.extend(
                    state
                        .status
                        .iter()
                        .filter(|(_, s)| **s == ElementStatus::Active)
                        .map(|(i, _)| *i),
                );
                self.drain_checks(set, &mut state);
                self.dispatch(set, &mut state, ctx, &tx);
                if state.in_flight_total == 0 {
                    for (&idx, status) in &mut state.status {
                        if *status == ElementStatus::Active {
                            warn!(
                                element = %set.by_index(idx).name,
                                "Element can never become ready; marking failed"
                            );
                            *status = ElementStatus::Failed;
                            set.by_index_mut(idx).mark_failed();
                        }
                    }
                    break;
                }
            }

            let Some((idx, queue_index, outcome)) = rx.recv().await else {
                break;
            };
            state.in_flight_total -= 1;
            let queue_type = self.queues[queue_index].queue_type();
            if let Some(count) = state.in_flight.get_mut(&queue_type) {
                *count = count.saturating_sub(1);
            }

            if state.status.get(&idx) != Some(&ElementStatus::Active) {
                // Blocked while in flight; drop the completion
                continue;
            }

            let ok = {
                let element = set.by_index_mut(idx);
                self.queues[queue_index].done(element, &outcome, ctx)
            };

            if outcome.returncode != 0 || !ok {
                let name = set.by_index(idx).name.clone();
                error!(
                    element = %name,
                    action = self.queues[queue_index].action_name(),
                    code = outcome.returncode,
                    message = outcome.message.as_deref().unwrap_or(""),
                    "Element failed"
                );
                state.status.insert(idx, ElementStatus::Failed);
                set.by_index_mut(idx).mark_failed();
                self.block_dependents(set, &mut state, &name);
                if self.policy == FailurePolicy::FailFast {
                    state.draining = true;
                }
                continue;
            }

            debug!(
                element = %set.by_index(idx).name,
                action = self.queues[queue_index].complete_name(),
                "Queue completed"
            );

            // Tracking pins refs, which can make keys computable and
            // reveal artifacts the store already holds
            if queue_type == QueueType::Track {
                keys::compute_keys(set, &ctx.project, &ctx.registry)?;
                refresh_cached(set, &plan, ctx);
            }

            self.enter_queue(set, &mut state, idx, queue_index + 1);

            // Local readiness recomputation: this element's state changed,
            // so only its dependents need re-evaluation
            let name = set.by_index(idx).name.clone();
            for dependent in set.dependents_of(&name).ok().unwrap_or_default() {
                if let Some(dep_idx) = set.index_of(&dependent)
                    && state.status.get(&dep_idx) == Some(&ElementStatus::Active)
                {
                    state.checks.push_back(dep_idx);
                }
            }
        }

        Ok(self.report(set, &state))
    }

    /// Enter an element into queue `queue_index`, cascading over skips.
    /// Entering past the last queue completes the element.
    fn enter_queue(
        &self,
        set: &ElementSet,
        state: &mut RunState,
        idx: usize,
        mut queue_index: usize,
    ) {
        loop {
            if queue_index >= self.queues.len() {
                state.status.insert(idx, ElementStatus::Done);
                info!(element = %set.by_index(idx).name, "Element complete");
                return;
            }
            let element = set.by_index(idx);
            if self.queues[queue_index].skip(element) {
                debug!(
                    element = %element.name,
                    action = self.queues[queue_index].action_name(),
                    "Skipped"
                );
                queue_index += 1;
                continue;
            }
            state.queue_pos.insert(idx, queue_index);
            state.waiting[queue_index].insert(idx);
            state.checks.push_back(idx);
            return;
        }
    }

    /// Re-evaluate readiness for the queued checks, promoting elements
    /// from waiting to ready.
    fn drain_checks(&self, set: &ElementSet, state: &mut RunState) {
        while let Some(idx) = state.checks.pop_front() {
            if state.status.get(&idx) != Some(&ElementStatus::Active) {
                continue;
            }
            let Some(&queue_index) = state.queue_pos.get(&idx) else {
                continue;
            };
            if !state.waiting[queue_index].contains(&idx) {
                continue;
            }
            if self.queues[queue_index].ready(set.by_index(idx), set) {
                state.waiting[queue_index].remove(&idx);
                state.ready[queue_index].push_back(idx);
            }
        }
    }

    /// Dispatch ready elements up to the per-queue-type limits.
    fn dispatch(
        &self,
        set: &ElementSet,
        state: &mut RunState,
        ctx: &Arc<JobContext>,
        tx: &mpsc::UnboundedSender<(usize, usize, JobOutcome)>,
    ) {
        for (queue_index, queue) in self.queues.iter().enumerate() {
            let queue_type = queue.queue_type();
            let limit = self.limits.limit_for(queue_type);
            while !state.ready[queue_index].is_empty() {
                let active = state.in_flight.get(&queue_type).copied().unwrap_or(0);
                if active >= limit {
                    break;
                }
                let Some(idx) = state.ready[queue_index].pop_front() else {
                    break;
                };
                if state.status.get(&idx) != Some(&ElementStatus::Active) {
                    continue;
                }
                let element = set.by_index(idx);
                debug!(
                    element = %element.name,
                    action = queue.action_name(),
                    "Dispatching"
                );
                let job = queue.process(element, set, ctx);
                let tx = tx.clone();
                tokio::spawn(async move {
                    let outcome = job.await;
                    let _ = tx.send((idx, queue_index, outcome));
                });
                *state.in_flight.entry(queue_type).or_insert(0) += 1;
                state.in_flight_total += 1;
            }
        }
    }

    /// Transitively mark dependents of a failed element as blocked.
    fn block_dependents(&self, set: &ElementSet, state: &mut RunState, failed: &str) {
        let mut stack = vec![failed.to_string()];
        let mut visited = HashSet::new();
        while let Some(name) = stack.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            for dependent in set.dependents_of(&name).ok().unwrap_or_default() {
                if let Some(idx) = set.index_of(&dependent)
                    && state.status.get(&idx) == Some(&ElementStatus::Active)
                {
                    warn!(element = %dependent, dependency = %name, "Blocked by failed dependency");
                    state.status.insert(idx, ElementStatus::Blocked);
                    if let Some(&queue_index) = state.queue_pos.get(&idx) {
                        state.waiting[queue_index].remove(&idx);
                        state.ready[queue_index].retain(|&i| i != idx);
                    }
                }
                stack.push(dependent);
            }
        }
    }

    fn report(&self, set: &ElementSet, state: &RunState) -> SchedulerReport {
        let mut report = SchedulerReport {
            cancelled: state.cancelled,
            ..Default::default()
        };
        for (&idx, status) in &state.status {
            let name = set.by_index(idx).name.clone();
            match status {
                ElementStatus::Done => report.succeeded.push(name),
                ElementStatus::Failed => report.failed.push(name),
                ElementStatus::Blocked | ElementStatus::Active => report.skipped.push(name),
            }
        }
        report.succeeded.sort();
        report.failed.sort();
        report.skipped.sort();
        report
    }
}

/// Re-query the store for every keyed element that is not yet marked
/// cached. The cached bit only ever rises during a run; artifacts are
/// never deleted out from under a scheduler.
fn refresh_cached(set: &mut ElementSet, plan: &[usize], ctx: &JobContext) {
    for &idx in plan {
        let element = set.by_index(idx);
        if element.is_cached() {
            continue;
        }
        let Some(key) = element.cache_key().map(str::to_string) else {
            continue;
        };
        if ctx.store.contains(&key) {
            set.by_index_mut(idx).update_cached(true);
        }
    }
}
