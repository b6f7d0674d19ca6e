// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor cell
//!
//! The cell is the runtime container of one actor: its mailbox, its system queue, its
//! lifecycle status and the actor instance itself. Everything mutable lives in a [`CellCore`]
//! that is taken out of the cell for the length of a turn, so only the turn holding the
//! execution token can touch the actor.
//!
//! A turn first drains the system queue (start, stop, restart, child notifications) and then
//! processes at most `batch_size` user messages. User messages are only processed while the
//! actor is running; a faulted actor keeps them queued until its supervisor decides.
//!

use crate::{
    ActorId, ActorPath, Error,
    actor::{Actor, ActorContext, ActorRef, ChildAction},
    config::{MailboxConfig, OverflowPolicy},
    mailbox::{EnqueueError, Envelope, Mailbox, MailboxSender, mailbox},
    scheduler::{ExecutionToken, Runnable, Scheduler, Turn},
    supervision::{SharedSupervisor, SupervisionStrategy},
    system::{SystemEvent, SystemRef},
};

use futures::{FutureExt, future::BoxFuture};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

/// Builds a fresh instance of the actor.
pub(crate) type Constructor<A> = Arc<dyn Fn() -> A + Send + Sync>;

/// Control plane messages. They are processed before any user message.
pub(crate) enum SystemMessage {
    /// Run `pre_start` and begin processing user messages.
    Start {
        ack: oneshot::Sender<Result<(), Error>>,
    },
    /// Stop the actor and its children. The ack fires once it is terminated.
    Stop { ack: Option<oneshot::Sender<()>> },
    /// Replace the faulted instance with a fresh one.
    Restart { clear_mailbox: bool },
    /// Start supervising a top level actor. Only sent to the guardian.
    Watch {
        child: Arc<dyn ControlHandle>,
        strategy: SupervisionStrategy,
    },
    ChildFailed {
        child: ActorId,
        path: ActorPath,
        error: Error,
    },
    ChildRestarted { child: ActorId },
    ChildTerminated { child: ActorId },
    /// A child fault was decided while the actor was busy and must be escalated.
    Escalate { child: ActorPath, error: Error },
}

/// Untyped handle on a cell's control plane. Used by supervisors and the registry.
pub(crate) trait ControlHandle: Send + Sync + 'static {
    fn id(&self) -> ActorId;

    fn path(&self) -> &ActorPath;

    /// Enqueues a system message and schedules the cell.
    fn send_system(&self, message: SystemMessage) -> Result<(), Error>;

    /// Reports the fault of a child supervised by this handle.
    fn child_failed(
        &self,
        child: ActorId,
        path: ActorPath,
        error: Error,
    ) -> Result<(), Error> {
        self.send_system(SystemMessage::ChildFailed { child, path, error })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Created,
    Running,
    Faulted,
    Stopped,
}

/// Runtime container of an actor.
pub(crate) struct ActorCell<A: Actor> {
    id: ActorId,
    path: ActorPath,
    myself: Weak<ActorCell<A>>,
    token: ExecutionToken,
    /// User messages may be processed. Cleared while starting and while faulted.
    runnable: AtomicBool,
    mailbox: MailboxSender<Envelope<A>>,
    system_queue: MailboxSender<SystemMessage>,
    scheduler: Scheduler,
    supervisor: SharedSupervisor,
    core: Mutex<Option<Box<CellCore<A>>>>,
}

/// State owned by the turn in progress.
struct CellCore<A: Actor> {
    actor: A,
    constructor: Constructor<A>,
    mailbox: Mailbox<Envelope<A>>,
    system_queue: Mailbox<SystemMessage>,
    ctx: ActorContext<A>,
    parent: Weak<dyn ControlHandle>,
    status: Status,
    last_fault: Option<Error>,
}

impl<A: Actor> ActorCell<A> {
    /// Creates a cell in the `Created` status. Nothing runs until it receives `Start`.
    pub(crate) fn create(
        id: ActorId,
        path: ActorPath,
        constructor: Constructor<A>,
        mailbox_config: &MailboxConfig,
        system: SystemRef,
        parent: Weak<dyn ControlHandle>,
    ) -> Arc<Self> {
        let (sender, receiver) = mailbox(mailbox_config);
        let (system_sender, system_receiver) =
            mailbox(&MailboxConfig::unbounded());
        let scheduler = system.scheduler().clone();
        let supervisor = SharedSupervisor::default();
        Arc::new_cyclic(|myself| {
            let ctx = ActorContext::new(
                id,
                path.clone(),
                system,
                myself.clone(),
                supervisor.clone(),
            );
            ActorCell {
                id,
                path: path.clone(),
                myself: myself.clone(),
                token: ExecutionToken::default(),
                runnable: AtomicBool::new(false),
                mailbox: sender,
                system_queue: system_sender,
                scheduler,
                supervisor,
                core: Mutex::new(Some(Box::new(CellCore {
                    actor: constructor(),
                    constructor,
                    mailbox: receiver,
                    system_queue: system_receiver,
                    ctx,
                    parent,
                    status: Status::Created,
                    last_fault: None,
                }))),
            }
        })
    }

    pub(crate) fn reference(&self) -> ActorRef<A> {
        ActorRef::new(self.id, self.path.clone(), self.myself.clone())
    }

    /// Enqueues a user message and schedules the cell.
    pub(crate) fn deliver(&self, envelope: Envelope<A>) -> Result<(), Error> {
        match self.mailbox.enqueue(envelope) {
            Ok(()) => {
                self.schedule();
                Ok(())
            }
            Err(EnqueueError::Closed(_)) => {
                Err(Error::MailboxClosed(self.path.clone()))
            }
            Err(EnqueueError::Full(envelope)) => {
                if envelope.reply.is_none()
                    && self.mailbox.overflow() == OverflowPolicy::DropNewest
                {
                    warn!("Mailbox of {} is full, message dropped.", &self.path);
                    Ok(())
                } else {
                    Err(Error::MailboxFull(self.path.clone()))
                }
            }
        }
    }

    /// True once the mailbox refuses messages.
    pub(crate) fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    fn schedule(&self) {
        if let Some(cell) = self.myself.upgrade() {
            self.scheduler.schedule(cell);
        }
    }

    fn take_core(&self) -> Option<Box<CellCore<A>>> {
        match self.core.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn put_core(&self, core: Box<CellCore<A>>) {
        match self.core.lock() {
            Ok(mut slot) => *slot = Some(core),
            Err(poisoned) => *poisoned.into_inner() = Some(core),
        }
    }

    async fn turn(&self, batch: usize) -> Turn {
        let Some(mut core) = self.take_core() else {
            error!("Actor {} was scheduled without its state!", &self.path);
            return Turn::Terminated;
        };
        let turn = core.run(self, batch).await;
        if turn == Turn::Yield {
            self.put_core(core);
        }
        turn
    }
}

impl<A: Actor> ControlHandle for ActorCell<A> {
    fn id(&self) -> ActorId {
        self.id
    }

    fn path(&self) -> &ActorPath {
        &self.path
    }

    fn send_system(&self, message: SystemMessage) -> Result<(), Error> {
        self.system_queue
            .enqueue(message)
            .map_err(|_| Error::MailboxClosed(self.path.clone()))?;
        self.schedule();
        Ok(())
    }

    fn child_failed(
        &self,
        child: ActorId,
        path: ActorPath,
        error: Error,
    ) -> Result<(), Error> {
        let mut supervisor = self.supervisor.lock();
        if !supervisor.is_busy() {
            return self.send_system(SystemMessage::ChildFailed {
                child,
                path,
                error,
            });
        }
        // The actor may be awaiting this very child: decide without it.
        debug!(
            "Actor {} is busy, applying the strategy of {}.",
            &self.path, &path
        );
        match supervisor.handle_failure(child, &error, ChildAction::Delegate) {
            Some(escalated) => self.send_system(SystemMessage::Escalate {
                child: path,
                error: escalated,
            }),
            None => Ok(()),
        }
    }
}

impl<A: Actor> Runnable for ActorCell<A> {
    fn token(&self) -> &ExecutionToken {
        &self.token
    }

    fn has_work(&self) -> bool {
        !self.system_queue.is_empty()
            || (self.runnable.load(Ordering::SeqCst) && !self.mailbox.is_empty())
    }

    fn run_turn(self: Arc<Self>, batch: usize) -> BoxFuture<'static, Turn> {
        async move { self.turn(batch).await }.boxed()
    }
}

impl<A: Actor> CellCore<A> {
    async fn run(&mut self, cell: &ActorCell<A>, batch: usize) -> Turn {
        let mut processed = 0;
        loop {
            while let Some(message) = self.system_queue.dequeue() {
                self.handle_system(cell, message).await;
                if self.status == Status::Stopped {
                    return Turn::Terminated;
                }
            }
            if self.status != Status::Running || processed >= batch {
                return Turn::Yield;
            }
            if !self.enter(cell) {
                continue;
            }
            let handled = self.process_next(cell).await;
            self.set_busy(false);
            if !handled {
                return Turn::Yield;
            }
            processed += 1;
        }
    }

    /// Marks the actor busy unless a system message is waiting. From here on a child fault is
    /// decided without this turn.
    fn enter(&self, cell: &ActorCell<A>) -> bool {
        let mut supervisor = self.ctx.supervisor.lock();
        if !cell.system_queue.is_empty() {
            return false;
        }
        supervisor.set_busy(true);
        true
    }

    fn set_busy(&self, busy: bool) {
        self.ctx.supervisor.lock().set_busy(busy);
    }

    /// Outcome of a lifecycle hook: its own result, or the fault it raised through the context.
    fn hook_outcome(&mut self, result: Result<(), Error>) -> Result<(), Error> {
        let fault = self.ctx.take_fault();
        result.and_then(|()| fault.map_or(Ok(()), Err))
    }

    /// Processes the message at the head of the mailbox. False if there was none.
    async fn process_next(&mut self, cell: &ActorCell<A>) -> bool {
        let Some(Envelope { message, mut reply }) = self.mailbox.dequeue()
        else {
            return false;
        };

        self.ctx.take_fault();
        let outcome =
            AssertUnwindSafe(self.actor.handle_message(message, &mut self.ctx))
                .catch_unwind()
                .await;
        let raised = self.ctx.take_fault();
        let fault = match outcome {
            Ok(result) => match raised {
                Some(error) => Some(error.to_string()),
                None => {
                    if let Some(reply) = reply.as_mut() {
                        if let Err(e) = reply.complete(result) {
                            error!("Can not answer from {}: {}", self.ctx.path(), e);
                        }
                    }
                    None
                }
            },
            Err(panic) => Some(format!("panicked: {}", panic_message(panic))),
        };

        if let Some(reason) = fault {
            let error = Error::HandlerFault(self.ctx.path().clone(), reason);
            if let Some(reply) = reply.as_mut() {
                let _ = reply.complete(Err(error.clone()));
            }
            self.fault(cell, error);
        }
        true
    }

    async fn handle_system(
        &mut self,
        cell: &ActorCell<A>,
        message: SystemMessage,
    ) {
        match message {
            SystemMessage::Start { ack } => self.start(cell, ack).await,
            SystemMessage::Stop { ack } => {
                self.shutdown(cell, true).await;
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            SystemMessage::Restart { clear_mailbox } => {
                self.restart(cell, clear_mailbox).await
            }
            SystemMessage::Watch { child, strategy } => {
                self.ctx.supervisor.lock().watch(child, strategy)
            }
            SystemMessage::ChildFailed { child, path, error } => {
                self.ctx.take_fault();
                let action =
                    self.actor.on_child_fault(&path, &error, &mut self.ctx).await;
                if let Some(ignored) = self.ctx.take_fault() {
                    warn!(
                        "Actor {} raised a fault while supervising {}, ignored: {}",
                        self.ctx.path(),
                        &path,
                        ignored
                    );
                }
                let escalated =
                    self.ctx.supervisor.lock().handle_failure(child, &error, action);
                if let Some(escalated) = escalated {
                    self.escalate(cell, path, escalated);
                }
            }
            SystemMessage::Escalate { child, error } => {
                self.escalate(cell, child, error)
            }
            SystemMessage::ChildRestarted { child } => {
                self.ctx.supervisor.lock().child_restarted(child)
            }
            SystemMessage::ChildTerminated { child } => {
                self.ctx.supervisor.lock().unwatch(child)
            }
        }
    }

    /// Takes over the fault of a child as this actor's own.
    fn escalate(&mut self, cell: &ActorCell<A>, child: ActorPath, error: Error) {
        warn!(
            "Actor {} escalates the fault of {}: {}",
            self.ctx.path(),
            &child,
            &error
        );
        self.ctx.system().publish(SystemEvent::Escalated {
            supervisor: self.ctx.path().clone(),
            child,
            error: error.clone(),
        });
        match self.status {
            Status::Created | Status::Running => self.fault(cell, error),
            _ => debug!(
                "Actor {} is already waiting for its supervisor.",
                self.ctx.path()
            ),
        }
    }

    async fn start(
        &mut self,
        cell: &ActorCell<A>,
        ack: oneshot::Sender<Result<(), Error>>,
    ) {
        self.ctx.take_fault();
        self.set_busy(true);
        let result = self.actor.pre_start(&mut self.ctx).await;
        self.set_busy(false);
        match self.hook_outcome(result) {
            Ok(()) => {
                self.status = Status::Running;
                cell.runnable.store(true, Ordering::SeqCst);
                debug!("Actor '{}' has started successfully.", self.ctx.path());
                self.ctx.system().publish(SystemEvent::ActorStarted {
                    id: self.ctx.id(),
                    path: self.ctx.path().clone(),
                });
                let _ = ack.send(Ok(()));
            }
            Err(e) => {
                error!("Actor {} failed to start: {}", self.ctx.path(), &e);
                self.shutdown(cell, false).await;
                let _ = ack.send(Err(Error::Start(format!(
                    "{}: {}",
                    self.ctx.path(),
                    e
                ))));
            }
        }
    }

    /// Running -> Faulted. The parent decides what happens next.
    fn fault(&mut self, cell: &ActorCell<A>, error: Error) {
        error!("Actor {} faulted: {}", self.ctx.path(), &error);
        self.status = Status::Faulted;
        cell.runnable.store(false, Ordering::SeqCst);
        self.last_fault = Some(error.clone());
        self.ctx.system().publish(SystemEvent::ActorFaulted {
            id: self.ctx.id(),
            path: self.ctx.path().clone(),
            error: error.clone(),
        });

        let reported = self.parent.upgrade().is_some_and(|parent| {
            parent
                .child_failed(self.ctx.id(), self.ctx.path().clone(), error)
                .is_ok()
        });
        if !reported {
            warn!("No supervisor for {}, stopping it.", self.ctx.path());
            let _ = cell.send_system(SystemMessage::Stop { ack: None });
        }
    }

    async fn restart(&mut self, cell: &ActorCell<A>, clear_mailbox: bool) {
        if self.status != Status::Faulted {
            debug!("Actor {} is not faulted, restart ignored.", self.ctx.path());
            return;
        }
        if clear_mailbox {
            for envelope in self.mailbox.clear() {
                resolve_stopped(self.ctx.path(), envelope);
            }
        }

        self.actor = (self.constructor)();
        let last_fault = self.last_fault.take();
        self.ctx.take_fault();
        self.set_busy(true);
        let result =
            self.actor.pre_restart(&mut self.ctx, last_fault.as_ref()).await;
        self.set_busy(false);
        match self.hook_outcome(result) {
            Ok(()) => {
                self.status = Status::Running;
                cell.runnable.store(true, Ordering::SeqCst);
                debug!("Actor {} restarted.", self.ctx.path());
                self.ctx.system().publish(SystemEvent::ActorRestarted {
                    id: self.ctx.id(),
                    path: self.ctx.path().clone(),
                });
                if let Some(parent) = self.parent.upgrade() {
                    let _ = parent.send_system(SystemMessage::ChildRestarted {
                        child: self.ctx.id(),
                    });
                }
            }
            Err(e) => {
                error!("Actor {} failed to restart: {}", self.ctx.path(), &e);
                self.fault(cell, e);
            }
        }
    }

    /// Drains the mailbox, stops the children and leaves the registry. `run_hooks` is false
    /// for an actor that never started.
    async fn shutdown(&mut self, cell: &ActorCell<A>, run_hooks: bool) {
        debug!("Stopping actor {}.", self.ctx.path());
        cell.runnable.store(false, Ordering::SeqCst);
        // Closed first, so a child blocked on asking us gets its answer and can stop.
        for envelope in self.mailbox.drain() {
            resolve_stopped(self.ctx.path(), envelope);
        }
        if run_hooks {
            self.ctx.take_fault();
            self.set_busy(true);
            let result = self.actor.pre_stop(&mut self.ctx).await;
            self.set_busy(false);
            if self.hook_outcome(result).is_err() {
                error!("Actor '{}' failed to stop!", self.ctx.path());
            }
        }

        self.ctx.supervisor.stop_all().await;

        self.status = Status::Stopped;
        if run_hooks {
            self.ctx.take_fault();
            let result = self.actor.post_stop(&mut self.ctx).await;
            if self.hook_outcome(result).is_err() {
                error!("Actor '{}' post_stop failed!", self.ctx.path());
            }
        }

        self.ctx.system().remove_actor(self.ctx.id()).await;

        for message in self.system_queue.drain() {
            match message {
                SystemMessage::Stop { ack: Some(ack) } => {
                    let _ = ack.send(());
                }
                SystemMessage::Start { ack } => {
                    let _ = ack.send(Err(Error::ActorStopped(
                        self.ctx.path().clone(),
                    )));
                }
                _ => {}
            }
        }

        if let Some(parent) = self.parent.upgrade() {
            let _ = parent.send_system(SystemMessage::ChildTerminated {
                child: self.ctx.id(),
            });
        }
        self.ctx.system().publish(SystemEvent::ActorStopped {
            id: self.ctx.id(),
            path: self.ctx.path().clone(),
        });
        debug!("Actor {} is terminated.", self.ctx.path());
    }
}

fn resolve_stopped<A: Actor>(path: &ActorPath, envelope: Envelope<A>) {
    if let Some(mut reply) = envelope.reply {
        let _ = reply.complete(Err(Error::ActorStopped(path.clone())));
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}
