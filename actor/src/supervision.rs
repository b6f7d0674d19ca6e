// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Supervision
//!
//! Every actor is watched by a supervisor: its parent actor, or the system guardian for top
//! level actors. When a child faults, the supervisor looks at the child's
//! [`SupervisionStrategy`] and either stops it, restarts it, or escalates the failure to its own
//! supervisor.
//!
//! Restarts are bounded by a sliding window ([`RestartPolicy`]): at most `max_restarts` within
//! `within`. The next fault inside the window stops the child and escalates
//! [`Error::RestartLimitExceeded`]. An optional backoff delays each restart.
//!

use crate::{
    ActorId, ActorPath, Error,
    actor::ChildAction,
    cell::{ControlHandle, SystemMessage},
};

use backoff::backoff::Backoff;
use tokio::{sync::oneshot, time::Instant};
use tracing::{debug, error, warn};

use std::{
    collections::{BTreeMap, VecDeque},
    fmt::Debug,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// Trait to define a RetryStrategy: the wait before each restart.
pub trait RetryStrategy: Debug + Send + Sync {
    /// Wait duration before the next restart. `None` restarts immediately.
    fn next_backoff(&mut self) -> Option<Duration>;

    /// Called when the restart window is empty again.
    fn reset(&mut self) {}
}

/// Restart immediately.
#[derive(Debug, Default, Clone)]
pub struct NoIntervalStrategy;

impl RetryStrategy for NoIntervalStrategy {
    fn next_backoff(&mut self) -> Option<Duration> {
        None
    }
}

/// Wait a fixed period before every restart.
#[derive(Debug, Default, Clone)]
pub struct FixedIntervalStrategy {
    duration: Duration,
}

impl FixedIntervalStrategy {
    pub fn new(duration: Duration) -> Self {
        FixedIntervalStrategy { duration }
    }
}

impl RetryStrategy for FixedIntervalStrategy {
    fn next_backoff(&mut self) -> Option<Duration> {
        Some(self.duration)
    }
}

/// Walk through a user provided list of delays; the last one repeats.
#[derive(Debug, Default, Clone)]
pub struct CustomIntervalStrategy {
    durations: Vec<Duration>,
    position: usize,
}

impl CustomIntervalStrategy {
    pub fn new(durations: Vec<Duration>) -> Self {
        Self {
            durations,
            position: 0,
        }
    }
}

impl RetryStrategy for CustomIntervalStrategy {
    fn next_backoff(&mut self) -> Option<Duration> {
        let duration = self
            .durations
            .get(self.position)
            .or_else(|| self.durations.last())
            .copied();
        self.position = (self.position + 1).min(self.durations.len());
        duration
    }

    fn reset(&mut self) {
        self.position = 0;
    }
}

/// Exponential backoff with jitter between `initial` and `max`.
#[derive(Debug)]
pub struct ExponentialBackoffStrategy {
    inner: backoff::ExponentialBackoff,
}

impl ExponentialBackoffStrategy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let inner = backoff::ExponentialBackoffBuilder::new()
            .with_initial_interval(initial)
            .with_max_interval(max)
            // The restart window decides when to give up, not the backoff.
            .with_max_elapsed_time(None)
            .build();
        Self { inner }
    }
}

impl Default for ExponentialBackoffStrategy {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(10))
    }
}

impl RetryStrategy for ExponentialBackoffStrategy {
    fn next_backoff(&mut self) -> Option<Duration> {
        self.inner.next_backoff()
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

/// Available backoff strategies.
#[derive(Debug)]
pub enum Strategy {
    NoInterval(NoIntervalStrategy),
    FixedInterval(FixedIntervalStrategy),
    CustomInterval(CustomIntervalStrategy),
    Exponential(ExponentialBackoffStrategy),
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::NoInterval(NoIntervalStrategy)
    }
}

impl RetryStrategy for Strategy {
    fn next_backoff(&mut self) -> Option<Duration> {
        match self {
            Strategy::NoInterval(strategy) => strategy.next_backoff(),
            Strategy::FixedInterval(strategy) => strategy.next_backoff(),
            Strategy::CustomInterval(strategy) => strategy.next_backoff(),
            Strategy::Exponential(strategy) => strategy.next_backoff(),
        }
    }

    fn reset(&mut self) {
        match self {
            Strategy::NoInterval(strategy) => strategy.reset(),
            Strategy::FixedInterval(strategy) => strategy.reset(),
            Strategy::CustomInterval(strategy) => strategy.reset(),
            Strategy::Exponential(strategy) => strategy.reset(),
        }
    }
}

/// What happens to the messages still queued when an actor restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MailboxOnRestart {
    /// Keep them; they are processed by the fresh instance in order.
    #[default]
    Keep,
    /// Drop them; their callers get [`Error::ActorStopped`].
    Clear,
}

/// Bounded restart policy.
#[derive(Debug)]
pub struct RestartPolicy {
    /// Restarts allowed inside the window.
    pub max_restarts: usize,
    /// Length of the sliding window.
    pub within: Duration,
    /// Delay before each restart.
    pub backoff: Strategy,
    /// Fate of queued messages.
    pub mailbox: MailboxOnRestart,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

impl RestartPolicy {
    pub fn new(max_restarts: usize, within: Duration) -> Self {
        Self {
            max_restarts,
            within,
            backoff: Strategy::default(),
            mailbox: MailboxOnRestart::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Strategy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_mailbox(mut self, mailbox: MailboxOnRestart) -> Self {
        self.mailbox = mailbox;
        self
    }
}

/// A SupervisionStrategy defines what the supervisor does when the actor faults.
#[derive(Debug)]
pub enum SupervisionStrategy {
    /// Stop the actor.
    Stop,
    /// Restart the actor with a fresh state, within the policy bounds.
    Restart(RestartPolicy),
    /// Hand the failure to the supervisor's own supervisor.
    Escalate,
}

impl Default for SupervisionStrategy {
    fn default() -> Self {
        SupervisionStrategy::Restart(RestartPolicy::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StrategyKind {
    Stop,
    Restart,
    Escalate,
}

impl SupervisionStrategy {
    /// Non restart strategies still get bounds, used when a parent forces a restart.
    fn split(self) -> (StrategyKind, RestartPolicy) {
        match self {
            SupervisionStrategy::Stop => {
                (StrategyKind::Stop, RestartPolicy::default())
            }
            SupervisionStrategy::Restart(policy) => {
                (StrategyKind::Restart, policy)
            }
            SupervisionStrategy::Escalate => {
                (StrategyKind::Escalate, RestartPolicy::default())
            }
        }
    }
}

/// Supervisor side view of a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChildState {
    Running,
    Restarting,
    Stopped,
}

/// Restart timestamps inside the sliding window.
#[derive(Debug, Default)]
pub(crate) struct RestartWindow {
    history: VecDeque<Instant>,
}

impl RestartWindow {
    /// Forgets restarts older than `within`. Returns true if none is left.
    pub(crate) fn prune(&mut self, now: Instant, within: Duration) -> bool {
        while let Some(oldest) = self.history.front() {
            if now.saturating_duration_since(*oldest) >= within {
                self.history.pop_front();
            } else {
                break;
            }
        }
        self.history.is_empty()
    }

    /// Records a restart if the window still has room for one.
    pub(crate) fn permit(
        &mut self,
        now: Instant,
        max_restarts: usize,
        within: Duration,
    ) -> bool {
        self.prune(now, within);
        if self.history.len() >= max_restarts {
            false
        } else {
            self.history.push_back(now);
            true
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.history.len()
    }
}

struct ChildRecord {
    control: Arc<dyn ControlHandle>,
    kind: StrategyKind,
    policy: RestartPolicy,
    state: ChildState,
    window: RestartWindow,
}

impl ChildRecord {
    fn stop(&mut self) {
        self.state = ChildState::Stopped;
        if self
            .control
            .send_system(SystemMessage::Stop { ack: None })
            .is_err()
        {
            debug!("Child {} already stopped.", self.control.path());
        }
    }

    fn restart(&mut self, now: Instant) -> Option<Error> {
        let path = self.control.path().clone();
        if self.window.prune(now, self.policy.within) {
            self.policy.backoff.reset();
        }
        if !self
            .window
            .permit(now, self.policy.max_restarts, self.policy.within)
        {
            warn!(
                "Actor {} exceeded its restart limit, stopping it.",
                &path
            );
            self.stop();
            return Some(Error::RestartLimitExceeded {
                path,
                max_restarts: self.policy.max_restarts,
                within: self.policy.within,
            });
        }

        self.state = ChildState::Restarting;
        let clear_mailbox = self.policy.mailbox == MailboxOnRestart::Clear;
        match self.policy.backoff.next_backoff() {
            Some(delay) if !delay.is_zero() => {
                debug!("Restarting actor {} in {:?}.", &path, &delay);
                let control = self.control.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if control
                        .send_system(SystemMessage::Restart { clear_mailbox })
                        .is_err()
                    {
                        error!("Can not restart actor {}!", control.path());
                    }
                });
            }
            _ => {
                debug!("Restarting actor {}.", &path);
                if self
                    .control
                    .send_system(SystemMessage::Restart { clear_mailbox })
                    .is_err()
                {
                    error!("Can not restart actor {}!", &path);
                }
            }
        }
        None
    }
}

/// Supervision node: the set of children watched by one actor (or by the guardian).
#[derive(Default)]
pub(crate) struct Supervisor {
    children: BTreeMap<ActorId, ChildRecord>,
    /// The supervising actor is inside a handler or a lifecycle hook.
    busy: bool,
}

impl Supervisor {
    /// Starts watching a child with its strategy.
    pub(crate) fn watch(
        &mut self,
        control: Arc<dyn ControlHandle>,
        strategy: SupervisionStrategy,
    ) {
        let (kind, policy) = strategy.split();
        self.children.insert(
            control.id(),
            ChildRecord {
                control,
                kind,
                policy,
                state: ChildState::Running,
                window: RestartWindow::default(),
            },
        );
    }

    /// Forgets a terminated child.
    pub(crate) fn unwatch(&mut self, child: ActorId) {
        self.children.remove(&child);
    }

    /// Restarting -> Running once the child reports a successful restart.
    pub(crate) fn child_restarted(&mut self, child: ActorId) {
        if let Some(record) = self.children.get_mut(&child) {
            if record.state == ChildState::Restarting {
                record.state = ChildState::Running;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn child_state(&self, child: ActorId) -> Option<ChildState> {
        self.children.get(&child).map(|record| record.state)
    }

    #[cfg(test)]
    pub(crate) fn restarts(&self, child: ActorId) -> usize {
        self.children
            .get(&child)
            .map(|record| record.window.len())
            .unwrap_or_default()
    }

    pub(crate) fn paths(&self) -> Vec<ActorPath> {
        self.children
            .values()
            .map(|record| record.control.path().clone())
            .collect()
    }

    /// Applies the child's strategy (or the parent's override) to a fault. Returns the error to
    /// escalate, if any.
    pub(crate) fn handle_failure(
        &mut self,
        child: ActorId,
        error: &Error,
        action: ChildAction,
    ) -> Option<Error> {
        let Some(record) = self.children.get_mut(&child) else {
            debug!("Failure reported by unknown child {}.", child);
            return None;
        };
        if record.state == ChildState::Stopped {
            return None;
        }
        debug!(
            "Supervising child {} after fault: {}",
            record.control.path(),
            error
        );
        match (action, record.kind) {
            (ChildAction::Stop, _)
            | (ChildAction::Delegate, StrategyKind::Stop) => {
                record.stop();
                None
            }
            (ChildAction::Escalate, _)
            | (ChildAction::Delegate, StrategyKind::Escalate) => {
                record.stop();
                Some(error.clone())
            }
            (ChildAction::Restart, _)
            | (ChildAction::Delegate, StrategyKind::Restart) => {
                record.restart(Instant::now())
            }
        }
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.busy
    }

    pub(crate) fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    /// Stops watching the newest child and hands it back.
    fn pop_newest(&mut self) -> Option<Arc<dyn ControlHandle>> {
        self.children.pop_last().map(|(_, record)| record.control)
    }

    /// Stops every watched child, newest first, and waits for each to terminate.
    pub(crate) async fn stop_all(&mut self) {
        while let Some(control) = self.pop_newest() {
            stop_and_wait(control).await;
        }
    }
}

async fn stop_and_wait(control: Arc<dyn ControlHandle>) {
    let (sender, receiver) = oneshot::channel();
    if control
        .send_system(SystemMessage::Stop { ack: Some(sender) })
        .is_ok()
    {
        let _ = receiver.await;
    }
}

/// Supervision node of an actor, shared by its cell, which receives the fault reports of the
/// children, and its context, which creates them.
#[derive(Clone, Default)]
pub(crate) struct SharedSupervisor(Arc<Mutex<Supervisor>>);

impl SharedSupervisor {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Supervisor> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stops every watched child, newest first. The lock is not held while waiting.
    pub(crate) async fn stop_all(&self) {
        loop {
            let next = self.lock().pop_newest();
            let Some(control) = next else {
                break;
            };
            stop_and_wait(control).await;
        }
    }
}
