// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Ensemble Actor Runtime
//!
//! A small actor runtime on top of tokio. Actors own private state, talk only through
//! messages and are organized in a supervision tree that restarts them when they fault.
//!
//! ## Overview
//!
//! In response to a message, an actor can:
//! - Update its private state
//! - Reply to the caller
//! - Send messages to other actors, and await their replies
//! - Create child actors that it supervises
//!
//! ## Core Architecture
//!
//! ### Mailboxes and cells
//!
//! Each actor lives in a cell that owns a FIFO mailbox of user messages and a separate queue
//! of control messages (start, stop, restart, child notifications). Control messages always
//! go first.
//!
//! ### Scheduling
//!
//! Cells with pending work wait in a shared run queue. Each scheduling turn runs as its own
//! tokio task and processes at most `batch_size` messages, then the cell goes back to the
//! tail of the queue if it still has work. A per-cell execution token guarantees that an actor
//! never processes two messages at the same time, while different actors run in parallel on
//! the tokio worker pool.
//!
//! ### Supervision
//!
//! A handler that panics, or that calls [`ActorContext::fail`], faults its actor. The caller of
//! the faulting message gets [`Error::HandlerFault`] and the parent applies the child's
//! [`SupervisionStrategy`]: stop it, restart it with a fresh state (bounded by a sliding
//! window and an optional backoff), or escalate to its own parent. A fault that escalates past
//! the top level actors stops the whole system and is returned by [`SystemRunner::run`].
//!
//! A handler returning `Err` is not a fault: the error is the reply.
//!
//! ## Getting Started
//!
//! ```ignore
//! use actor::{
//!     Actor, ActorContext, ActorSystem, Error, Handler, Message, Response, SystemConfig,
//! };
//! use async_trait::async_trait;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Default)]
//! struct Counter {
//!     value: u64,
//! }
//!
//! enum CounterCommand {
//!     Increment(u64),
//!     Get,
//! }
//!
//! impl Message for CounterCommand {}
//!
//! struct Value(u64);
//!
//! impl Response for Value {}
//!
//! impl Actor for Counter {
//!     type Message = CounterCommand;
//!     type Response = Value;
//! }
//!
//! #[async_trait]
//! impl Handler<Counter> for Counter {
//!     async fn handle_message(
//!         &mut self,
//!         msg: CounterCommand,
//!         _ctx: &mut ActorContext<Counter>,
//!     ) -> Result<Value, Error> {
//!         if let CounterCommand::Increment(n) = msg {
//!             self.value += n;
//!         }
//!         Ok(Value(self.value))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let token = CancellationToken::new();
//!     let (system, runner) = ActorSystem::create(SystemConfig::default(), token.clone());
//!
//!     let counter = system.spawn("counter", Counter::default).await?;
//!     counter.tell(CounterCommand::Increment(5)).await?;
//!     let Value(value) = counter.ask(CounterCommand::Get).await?;
//!     assert_eq!(value, 5);
//!
//!     token.cancel();
//!     runner.run().await
//! }
//! ```
//!
//! ## API Organization
//!
//! - **Core Actor Types**: [`Actor`], [`ActorContext`], [`ActorRef`], [`Handler`], [`Message`], [`Response`], [`Props`]
//! - **System Management**: [`ActorSystem`], [`SystemRef`], [`SystemRunner`], [`SystemEvent`], [`SystemConfig`]
//! - **Replies**: [`Reply`], [`ReplyChannel`]
//! - **Fault Tolerance**: [`SupervisionStrategy`], [`RestartPolicy`], [`Strategy`], [`ChildAction`]
//! - **Event Handling**: [`Event`], [`Sink`], [`Subscriber`]
//! - **Actor Addressing**: [`ActorId`], [`ActorPath`]
//! - **Error Handling**: [`Error`]
//!

// Private modules containing the implementation
mod actor;
mod cell;
mod config;
mod error;
mod mailbox;
mod path;
mod registry;
mod reply;
mod scheduler;
mod sink;
mod supervision;
mod system;

//
// Core Actor System Types
//

/// The fundamental actor trait: message and reply types, supervision defaults and lifecycle
/// hooks.
pub use actor::Actor;

/// Execution context lent to an actor while it processes a message or runs a hook. Gives
/// access to the system, to the actor's own reference and to its children.
pub use actor::ActorContext;

/// Typed reference to an actor. Supports fire-and-forget (`tell`) and request-response
/// (`send`, `ask`) messaging.
pub use actor::ActorRef;

/// Action a parent takes when one of its children faults.
pub use actor::ChildAction;

/// Trait for lifecycle and domain events that can be broadcast to subscribers.
pub use actor::Event;

/// Message handler of an actor.
pub use actor::Handler;

/// Marker trait for actor messages.
pub use actor::Message;

/// Constructor plus optional overrides used to spawn, and later restart, an actor.
pub use actor::Props;

/// Marker trait for actor replies.
pub use actor::Response;

//
// Configuration
//

/// Capacity and overflow behavior of a mailbox.
pub use config::MailboxConfig;

/// What a full bounded mailbox does with a new message.
pub use config::OverflowPolicy;

/// Knobs of an actor system.
pub use config::SystemConfig;

//
// Error Handling
//

/// Error type for all actor system operations.
pub use error::Error;

//
// Messaging
//

/// Future resolving with the reply to a request.
pub use reply::Reply;

/// Producer side of a reply slot.
pub use reply::ReplyChannel;

/// State of a reply slot.
pub use reply::ReplyState;

//
// Actor Addressing
//

/// Opaque, process-unique identity of an actor.
pub use path::ActorId;

/// Hierarchical path identifying actors within the supervision tree.
pub use path::ActorPath;

//
// Event System
//

/// Connects an event stream to a [`Subscriber`].
pub use sink::Sink;

/// Trait for components that process events.
pub use sink::Subscriber;

//
// Supervision and Fault Tolerance
//

/// Backoff walking through a user provided list of delays.
pub use supervision::CustomIntervalStrategy;

/// Exponential backoff with jitter.
pub use supervision::ExponentialBackoffStrategy;

/// Backoff with a constant delay.
pub use supervision::FixedIntervalStrategy;

/// What happens to queued messages when an actor restarts.
pub use supervision::MailboxOnRestart;

/// Restart immediately.
pub use supervision::NoIntervalStrategy;

/// Bounded restart policy: sliding window, backoff and mailbox treatment.
pub use supervision::RestartPolicy;

/// Trait for custom backoff strategies.
pub use supervision::RetryStrategy;

/// The available backoff strategies.
pub use supervision::Strategy;

/// How a supervisor treats a faulting child.
pub use supervision::SupervisionStrategy;

//
// System Management
//

/// Entry point to create an actor system.
pub use system::ActorSystem;

/// Lifecycle events published on the system event bus.
pub use system::SystemEvent;

/// Cloneable handle on a running actor system.
pub use system::SystemRef;

/// Awaits the end of an actor system and reports how it ended.
pub use system::SystemRunner;
