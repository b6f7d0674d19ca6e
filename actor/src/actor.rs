// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor
//!
//! The `actor` module provides the traits an actor implements ([`Actor`], [`Handler`]), the
//! context handed to it while it runs ([`ActorContext`]), the typed handle other code uses to
//! talk to it ([`ActorRef`]) and the recipe used to build and rebuild it ([`Props`]).
//!
//! An actor is a piece of state plus behavior. The state is created by a constructor at spawn
//! time and again on every restart, and it is only ever touched by the message currently being
//! processed.
//!

use crate::{
    ActorId, ActorPath, Error,
    cell::{ActorCell, ControlHandle, SystemMessage},
    config::MailboxConfig,
    mailbox::Envelope,
    reply::{Reply, reply_channel},
    supervision::{SharedSupervisor, SupervisionStrategy},
    system::SystemRef,
};

use async_trait::async_trait;

use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::oneshot;
use tracing::debug;

use std::{
    fmt::Debug,
    sync::{Arc, Weak},
};

/// The context of a running actor.
///
/// It is owned by the actor cell and lent to the actor for each message and lifecycle hook.
pub struct ActorContext<A: Actor + Handler<A>> {
    /// The identity of the actor.
    id: ActorId,
    /// The path of the actor.
    path: ActorPath,
    /// The actor system.
    system: SystemRef,
    /// The cell running the actor.
    myself: Weak<ActorCell<A>>,
    /// The children watched by this actor.
    pub(crate) supervisor: SharedSupervisor,
    /// Fault raised by the current handler.
    fault: Option<Error>,
}

impl<A> ActorContext<A>
where
    A: Actor + Handler<A>,
{
    pub(crate) fn new(
        id: ActorId,
        path: ActorPath,
        system: SystemRef,
        myself: Weak<ActorCell<A>>,
        supervisor: SharedSupervisor,
    ) -> Self {
        Self {
            id,
            path,
            system,
            myself,
            supervisor,
            fault: None,
        }
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn path(&self) -> &ActorPath {
        &self.path
    }

    pub fn system(&self) -> &SystemRef {
        &self.system
    }

    /// A reference to the actor itself.
    ///
    /// Asking yourself from inside a handler never completes: the reply can only be produced
    /// after the current message.
    pub fn reference(&self) -> ActorRef<A> {
        ActorRef::new(self.id, self.path.clone(), self.myself.clone())
    }

    /// Stops the actor once the current message has been processed.
    pub fn stop(&self) {
        debug!("Actor {} asked to stop itself.", &self.path);
        if let Some(cell) = self.myself.upgrade() {
            let _ = cell.send_system(SystemMessage::Stop { ack: None });
        }
    }

    /// Marks the current message as faulted. Its caller gets
    /// [`Error::HandlerFault`] and the supervisor decides what happens to the actor.
    ///
    /// Inside `pre_start` or `pre_restart` it fails the hook. The flag is cleared before every
    /// handler and hook, so it never outlives the call that raised it.
    pub fn fail(&mut self, error: Error) {
        debug!("Actor {} raised a fault: {}", &self.path, &error);
        self.fault = Some(error);
    }

    /// Creates a child actor supervised by this actor, using the child's default props.
    pub async fn create_child<C, F>(
        &mut self,
        name: &str,
        constructor: F,
    ) -> Result<ActorRef<C>, Error>
    where
        C: Actor + Handler<C>,
        F: Fn() -> C + Send + Sync + 'static,
    {
        self.create_child_with(name, Props::new(constructor)).await
    }

    /// Creates a child actor supervised by this actor.
    pub async fn create_child_with<C>(
        &mut self,
        name: &str,
        props: Props<C>,
    ) -> Result<ActorRef<C>, Error>
    where
        C: Actor + Handler<C>,
    {
        let path = self.path.clone() / name;
        let parent: Weak<dyn ControlHandle> = self.myself.clone();
        let (cell, strategy) =
            self.system.create_cell(path, props, parent).await?;
        self.supervisor.lock().watch(cell.clone(), strategy);
        match self.system.start_cell(&cell).await {
            Ok(actor_ref) => Ok(actor_ref),
            Err(error) => {
                self.supervisor.lock().unwatch(cell.id());
                Err(error)
            }
        }
    }

    /// Retrieves a running child by name.
    pub async fn get_child<C>(&self, name: &str) -> Option<ActorRef<C>>
    where
        C: Actor + Handler<C>,
    {
        let path = self.path.clone() / name;
        self.system.get_actor(&path).await
    }

    /// Paths of the children this actor supervises.
    pub fn children(&self) -> Vec<ActorPath> {
        self.supervisor.lock().paths()
    }

    pub(crate) fn take_fault(&mut self) -> Option<Error> {
        self.fault.take()
    }
}

/// Action a parent takes when a child faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildAction {
    /// Stop the child.
    Stop,
    /// Restart the child, within the bounds of its restart policy.
    Restart,
    /// Stop the child and escalate the fault to this actor's supervisor.
    Escalate,
    /// Apply the child's own supervision strategy.
    Delegate,
}

/// The `Actor` trait is the main trait that actors must implement.
#[async_trait]
pub trait Actor: Send + Sync + Sized + 'static + Handler<Self> {
    /// The type of messages this actor handles.
    type Message: Message;

    /// The type of the successful replies.
    type Response: Response;

    /// How the supervisor treats a fault of this actor.
    fn supervision_strategy() -> SupervisionStrategy {
        SupervisionStrategy::default()
    }

    /// Mailbox of this actor. `None` uses the system default.
    fn mailbox_config() -> Option<MailboxConfig> {
        None
    }

    /// Runs before the first message. An error aborts the spawn.
    async fn pre_start(
        &mut self,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Runs on the fresh instance after a fault. An error counts as a new fault.
    async fn pre_restart(
        &mut self,
        ctx: &mut ActorContext<Self>,
        _error: Option<&Error>,
    ) -> Result<(), Error> {
        self.pre_start(ctx).await
    }

    /// Runs before the children are stopped.
    async fn pre_stop(
        &mut self,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Runs after the mailbox has been drained.
    async fn post_stop(
        &mut self,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        Ok(())
    }
}

/// Payload of a lifecycle or domain event.
pub trait Event:
    Serialize + DeserializeOwned + Debug + Clone + Send + Sync + 'static
{
}

/// Message of an actor. Moved into the mailbox, so it never needs to be `Clone`.
pub trait Message: Send + Sync + 'static {}

/// Reply of an actor.
pub trait Response: Send + Sync + 'static {}

impl Response for () {}

/// Message handler. The message type is usually an enum and the handler matches on its variant.
#[async_trait]
pub trait Handler<A: Actor + Handler<A>>: Send + Sync {
    /// Handles one message. `Err` is delivered to the caller; the actor keeps running.
    /// A panic, or [`ActorContext::fail`], is a fault handled by the supervisor.
    async fn handle_message(
        &mut self,
        msg: A::Message,
        ctx: &mut ActorContext<A>,
    ) -> Result<A::Response, Error>;

    /// Called when a child faults. The default applies the child's own strategy.
    ///
    /// Consulted between messages. A child that faults while this actor is inside a handler or
    /// a lifecycle hook gets its own strategy right away, so a handler awaiting that child is
    /// never blocked by it.
    async fn on_child_fault(
        &mut self,
        child: &ActorPath,
        error: &Error,
        _ctx: &mut ActorContext<A>,
    ) -> ChildAction {
        debug!("Handling fault of child {}: {:?}", child, error);
        ChildAction::Delegate
    }
}

/// Recipe to build an actor: a constructor plus optional overrides of the actor's defaults.
pub struct Props<A: Actor> {
    constructor: Arc<dyn Fn() -> A + Send + Sync>,
    supervision: Option<SupervisionStrategy>,
    mailbox: Option<MailboxConfig>,
}

impl<A: Actor> Props<A> {
    pub fn new<F>(constructor: F) -> Self
    where
        F: Fn() -> A + Send + Sync + 'static,
    {
        Self {
            constructor: Arc::new(constructor),
            supervision: None,
            mailbox: None,
        }
    }

    /// Props that restart from a copy of `actor`.
    pub fn from_actor(actor: A) -> Self
    where
        A: Clone,
    {
        Self::new(move || actor.clone())
    }

    pub fn with_supervision(mut self, strategy: SupervisionStrategy) -> Self {
        self.supervision = Some(strategy);
        self
    }

    pub fn with_mailbox(mut self, mailbox: MailboxConfig) -> Self {
        self.mailbox = Some(mailbox);
        self
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        Arc<dyn Fn() -> A + Send + Sync>,
        SupervisionStrategy,
        Option<MailboxConfig>,
    ) {
        let supervision =
            self.supervision.unwrap_or_else(A::supervision_strategy);
        let mailbox = self.mailbox.or_else(A::mailbox_config);
        (self.constructor, supervision, mailbox)
    }
}

/// Typed reference to an actor.
///
/// The reference does not keep the actor alive: once the actor is stopped every send fails with
/// [`Error::MailboxClosed`].
pub struct ActorRef<A>
where
    A: Actor + Handler<A>,
{
    id: ActorId,
    path: ActorPath,
    cell: Weak<ActorCell<A>>,
}

impl<A> ActorRef<A>
where
    A: Actor + Handler<A>,
{
    pub(crate) fn new(
        id: ActorId,
        path: ActorPath,
        cell: Weak<ActorCell<A>>,
    ) -> Self {
        Self { id, path, cell }
    }

    fn cell(&self) -> Result<Arc<ActorCell<A>>, Error> {
        self.cell
            .upgrade()
            .ok_or_else(|| Error::MailboxClosed(self.path.clone()))
    }

    /// Sends a message without waiting for a reply.
    pub async fn tell(&self, message: A::Message) -> Result<(), Error> {
        self.cell()?.deliver(Envelope::new(message, None))
    }

    /// Sends a request. Enqueue errors are returned immediately; the returned [`Reply`]
    /// resolves with the handler's result.
    pub fn send(
        &self,
        message: A::Message,
    ) -> Result<Reply<A::Response>, Error> {
        let cell = self.cell()?;
        let (channel, reply) = reply_channel(self.path.clone());
        cell.deliver(Envelope::new(message, Some(channel)))?;
        Ok(reply)
    }

    /// Sends a request and waits for the reply.
    pub async fn ask(&self, message: A::Message) -> Result<A::Response, Error> {
        self.send(message)?.await
    }

    /// Stops the actor and waits until it is terminated.
    pub async fn ask_stop(&self) -> Result<(), Error> {
        debug!("Stopping actor {} from reference.", &self.path);
        let Ok(cell) = self.cell() else {
            return Ok(());
        };
        let (sender, receiver) = oneshot::channel();
        if cell
            .send_system(SystemMessage::Stop { ack: Some(sender) })
            .is_ok()
        {
            drop(cell);
            let _ = receiver.await;
        }
        Ok(())
    }

    /// Asks the actor to stop without waiting.
    pub fn tell_stop(&self) {
        debug!("Stopping actor {} from reference.", &self.path);
        if let Ok(cell) = self.cell() {
            let _ = cell.send_system(SystemMessage::Stop { ack: None });
        }
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn path(&self) -> ActorPath {
        self.path.clone()
    }

    /// True once the actor no longer accepts messages.
    pub fn is_closed(&self) -> bool {
        self.cell().map(|cell| cell.is_closed()).unwrap_or(true)
    }
}

impl<A> Clone for ActorRef<A>
where
    A: Actor + Handler<A>,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            path: self.path.clone(),
            cell: self.cell.clone(),
        }
    }
}

impl<A> Debug for ActorRef<A>
where
    A: Actor + Handler<A>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorRef")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish()
    }
}
