// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor system
//!
//! The `system` module provides the `ActorSystem` type. The `ActorSystem` type is the responsible for
//! creating and managing actors.
//!
//! A system is made of a scheduler, a registry of live actors, a lifecycle event bus and the
//! guardian: the supervisor of every top level actor. The guardian runs until the system is
//! stopped, either through the cancellation token or because a fault escalated past the top
//! level actors. On the way out it stops every actor, newest first, and reports the outcome to
//! the [`SystemRunner`].
//!

use crate::{
    Actor, ActorId, ActorPath, ActorRef, Error, Event, Handler,
    actor::{ChildAction, Props},
    cell::{ActorCell, ControlHandle, SystemMessage},
    config::SystemConfig,
    registry::Registry,
    reply::Reply,
    scheduler::Scheduler,
    sink::Sink,
    supervision::{SupervisionStrategy, Supervisor},
};

use serde::{Deserialize, Serialize};
use tokio::{
    select,
    sync::{broadcast, mpsc, oneshot},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use std::sync::{Arc, Weak};

/// Actor system.
///
pub struct ActorSystem {}

/// Default implementation for `ActorSystem`.
impl ActorSystem {
    /// Create a new actor system.
    ///
    /// # Returns
    ///
    /// Returns a tuple with the system reference and the system runner.
    pub fn create(
        config: SystemConfig,
        token: CancellationToken,
    ) -> (SystemRef, SystemRunner) {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let scheduler = Scheduler::start(config.batch_size);
        let (guardian_sender, guardian_receiver) = mpsc::unbounded_channel();
        let (done_sender, done_receiver) = oneshot::channel();

        let guardian = Arc::new(Guardian {
            path: ActorPath::from("/user"),
            sender: guardian_sender,
        });
        tokio::spawn(run_guardian(
            guardian_receiver,
            scheduler.clone(),
            events.clone(),
            token.clone(),
            done_sender,
        ));

        let system = SystemRef {
            registry: Arc::new(Registry::default()),
            scheduler,
            guardian,
            events,
            config: Arc::new(config),
            token,
        };
        (system, SystemRunner { done: done_receiver })
    }
}

/// Lifecycle event published on the system event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SystemEvent {
    /// `pre_start` succeeded; the actor processes messages.
    ActorStarted { id: ActorId, path: ActorPath },
    /// The actor faulted and waits for its supervisor.
    ActorFaulted {
        id: ActorId,
        path: ActorPath,
        error: Error,
    },
    /// A fresh instance replaced the faulted one.
    ActorRestarted { id: ActorId, path: ActorPath },
    /// The actor is terminated and unregistered.
    ActorStopped { id: ActorId, path: ActorPath },
    /// `supervisor` handed the fault of `child` to its own supervisor.
    Escalated {
        supervisor: ActorPath,
        child: ActorPath,
        error: Error,
    },
    /// Every actor is stopped. `error` is set when a fault escalated past the top level.
    SystemStopped { error: Option<Error> },
}

impl Event for SystemEvent {}

/// System reference.
///
#[derive(Clone)]
pub struct SystemRef {
    /// The live actors of this actor system.
    registry: Arc<Registry>,
    /// The run queue.
    scheduler: Scheduler,
    /// Supervisor of the top level actors.
    guardian: Arc<Guardian>,
    /// The lifecycle event bus.
    events: broadcast::Sender<SystemEvent>,
    config: Arc<SystemConfig>,
    token: CancellationToken,
}

impl SystemRef {
    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// Creates and registers a cell. The actor does not run until [`SystemRef::start_cell`].
    pub(crate) async fn create_cell<A>(
        &self,
        path: ActorPath,
        props: Props<A>,
        parent: Weak<dyn ControlHandle>,
    ) -> Result<(Arc<ActorCell<A>>, SupervisionStrategy), Error>
    where
        A: Actor + Handler<A>,
    {
        if self.token.is_cancelled() {
            error!("Can not create actor {}, the system is stopped.", &path);
            return Err(Error::System("actor system is stopped".to_owned()));
        }
        let (constructor, strategy, mailbox) = props.into_parts();
        let mailbox = mailbox.unwrap_or_else(|| self.config.mailbox.clone());
        let id = ActorId::next();
        let cell = ActorCell::create(
            id,
            path.clone(),
            constructor,
            &mailbox,
            self.clone(),
            parent,
        );
        self.registry
            .register(id, path, Box::new(cell.reference()), cell.clone())
            .await?;
        Ok((cell, strategy))
    }

    /// Runs `pre_start` on the cell and waits for the outcome.
    pub(crate) async fn start_cell<A>(
        &self,
        cell: &Arc<ActorCell<A>>,
    ) -> Result<ActorRef<A>, Error>
    where
        A: Actor + Handler<A>,
    {
        let (sender, receiver) = oneshot::channel();
        cell.send_system(SystemMessage::Start { ack: sender })?;
        receiver.await.map_err(|_| {
            Error::Start(format!("Runner can not init {}", cell.path()))
        })??;
        Ok(cell.reference())
    }

    /// Spawns a top level actor under `/user`, built by `constructor`.
    ///
    /// # Error
    ///
    /// Returns [`Error::Exists`] if the path is taken and [`Error::Start`] if `pre_start`
    /// fails.
    pub async fn spawn<A, F>(
        &self,
        name: &str,
        constructor: F,
    ) -> Result<ActorRef<A>, Error>
    where
        A: Actor + Handler<A>,
        F: Fn() -> A + Send + Sync + 'static,
    {
        self.spawn_with(name, Props::new(constructor)).await
    }

    /// Spawns a top level actor from explicit props.
    pub async fn spawn_with<A>(
        &self,
        name: &str,
        props: Props<A>,
    ) -> Result<ActorRef<A>, Error>
    where
        A: Actor + Handler<A>,
    {
        let path = self.guardian.path.clone() / name;
        let guardian: Arc<dyn ControlHandle> = self.guardian.clone();
        let parent = Arc::downgrade(&guardian);
        let (cell, strategy) = self.create_cell(path, props, parent).await?;
        self.guardian.send_system(SystemMessage::Watch {
            child: cell.clone(),
            strategy,
        })?;
        self.start_cell(&cell).await
    }

    /// Launches a new top level actor on this actor system at the '/user' actor path.
    /// Restarts begin again from a copy of `actor`.
    pub async fn create_root_actor<A>(
        &self,
        name: &str,
        actor: A,
    ) -> Result<ActorRef<A>, Error>
    where
        A: Actor + Handler<A> + Clone,
    {
        self.spawn_with(name, Props::from_actor(actor)).await
    }

    /// Retrieves an actor running in this actor system. If actor does not exist, a None
    /// is returned instead.
    pub async fn get_actor<A>(&self, path: &ActorPath) -> Option<ActorRef<A>>
    where
        A: Actor + Handler<A>,
    {
        self.registry.lookup_path(path).await
    }

    /// Resolves an identity to a typed reference.
    pub async fn lookup<A>(&self, id: ActorId) -> Result<ActorRef<A>, Error>
    where
        A: Actor + Handler<A>,
    {
        self.registry.lookup(id).await
    }

    /// Sends a request to the actor with the given identity.
    pub async fn send<A>(
        &self,
        id: ActorId,
        message: A::Message,
    ) -> Result<Reply<A::Response>, Error>
    where
        A: Actor + Handler<A>,
    {
        self.lookup::<A>(id).await?.send(message)
    }

    pub async fn tell<A>(
        &self,
        id: ActorId,
        message: A::Message,
    ) -> Result<(), Error>
    where
        A: Actor + Handler<A>,
    {
        self.lookup::<A>(id).await?.tell(message).await
    }

    pub async fn ask<A>(
        &self,
        id: ActorId,
        message: A::Message,
    ) -> Result<A::Response, Error>
    where
        A: Actor + Handler<A>,
    {
        self.send::<A>(id, message).await?.await
    }

    /// Stops an actor and its children, and waits until it is terminated.
    pub async fn stop(&self, id: ActorId) -> Result<(), Error> {
        let control = self
            .registry
            .control(id)
            .await
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let (sender, receiver) = oneshot::channel();
        if control
            .send_system(SystemMessage::Stop { ack: Some(sender) })
            .is_ok()
        {
            drop(control);
            let _ = receiver.await;
        }
        Ok(())
    }

    /// Stops the actor at `path`.
    pub async fn stop_actor(&self, path: &ActorPath) -> Result<(), Error> {
        let id = self
            .registry
            .id_of(path)
            .await
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        self.stop(id).await
    }

    /// Remove a terminated actor from this actor system.
    pub(crate) async fn remove_actor(&self, id: ActorId) {
        self.registry.unregister(id).await;
    }

    /// Get the actor's children.
    pub async fn children(&self, path: &ActorPath) -> Vec<ActorPath> {
        self.registry.children(path).await
    }

    /// Subscribes to the lifecycle event bus.
    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: SystemEvent) {
        // No subscriber is not an error.
        let _ = self.events.send(event);
    }

    /// Run a sink. The sink will be run in a separate task until the system stops.
    ///
    pub async fn run_sink<E>(&self, sink: Sink<E>)
    where
        E: Event,
    {
        let token = self.token.clone();
        tokio::spawn(async move {
            sink.run(token).await;
        });
    }

    pub fn stop_system(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// System runner.
pub struct SystemRunner {
    done: oneshot::Receiver<Result<(), Error>>,
}

impl SystemRunner {
    /// Waits until the actor system is stopped. Returns the fault that stopped it, if any.
    pub async fn run(self) -> Result<(), Error> {
        self.done.await.unwrap_or_else(|_| {
            Err(Error::System("guardian task ended unexpectedly".to_owned()))
        })
    }
}

/// Root of the supervision tree.
struct Guardian {
    path: ActorPath,
    sender: mpsc::UnboundedSender<SystemMessage>,
}

impl ControlHandle for Guardian {
    fn id(&self) -> ActorId {
        ActorId::guardian()
    }

    fn path(&self) -> &ActorPath {
        &self.path
    }

    fn send_system(&self, message: SystemMessage) -> Result<(), Error> {
        self.sender
            .send(message)
            .map_err(|_| Error::System("actor system is stopped".to_owned()))
    }
}

async fn run_guardian(
    mut receiver: mpsc::UnboundedReceiver<SystemMessage>,
    scheduler: Scheduler,
    events: broadcast::Sender<SystemEvent>,
    token: CancellationToken,
    done: oneshot::Sender<Result<(), Error>>,
) {
    let path = ActorPath::from("/user");
    let mut supervisor = Supervisor::default();
    let mut fatal = None;
    debug!("Running actor system...");

    loop {
        select! {
            _ = token.cancelled() => break,
            message = receiver.recv() => {
                let Some(message) = message else {
                    break;
                };
                match message {
                    SystemMessage::Watch { child, strategy } => {
                        supervisor.watch(child, strategy)
                    }
                    SystemMessage::ChildFailed { child, path: child_path, error } => {
                        if let Some(escalated) = supervisor.handle_failure(
                            child,
                            &error,
                            ChildAction::Delegate,
                        ) {
                            error!(
                                "Top level actor {} escalated: {}. Stopping actor system.",
                                &child_path, &escalated
                            );
                            let _ = events.send(SystemEvent::Escalated {
                                supervisor: path.clone(),
                                child: child_path,
                                error: escalated.clone(),
                            });
                            fatal = Some(escalated);
                            break;
                        }
                    }
                    SystemMessage::ChildRestarted { child } => {
                        supervisor.child_restarted(child)
                    }
                    SystemMessage::ChildTerminated { child } => {
                        supervisor.unwatch(child)
                    }
                    SystemMessage::Stop { ack } => {
                        if let Some(ack) = ack {
                            let _ = ack.send(());
                        }
                        break;
                    }
                    SystemMessage::Start { .. }
                    | SystemMessage::Restart { .. }
                    | SystemMessage::Escalate { .. } => {}
                }
            }
        }
    }

    debug!("Stopping actor system...");
    token.cancel();
    supervisor.stop_all().await;
    scheduler.shutdown().await;
    let _ = events.send(SystemEvent::SystemStopped {
        error: fatal.clone(),
    });
    debug!("Actor system stopped.");
    let _ = done.send(fatal.map_or(Ok(()), Err));
}
