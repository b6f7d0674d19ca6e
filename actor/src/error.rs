// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Errors module
//!
//! Every fallible operation of the runtime returns [`Error`]. Errors are plain data: they can be
//! cloned into replies, compared in tests and carried inside lifecycle events.
//!

use crate::ActorPath;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::time::Duration;

/// Error type for the actor system.
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// The actor was stopped and its mailbox no longer accepts messages.
    #[error("Mailbox of actor {0} is closed.")]
    MailboxClosed(ActorPath),
    /// The bounded mailbox of the actor is full.
    #[error("Mailbox of actor {0} is full.")]
    MailboxFull(ActorPath),
    /// No live actor is registered under the given identity or path.
    #[error("Actor {0} not found.")]
    NotFound(String),
    /// The handler faulted while processing the message.
    #[error("Actor {0} faulted while handling a message: {1}")]
    HandlerFault(ActorPath, String),
    /// The actor stopped before the reply was produced.
    #[error("Actor {0} stopped before replying.")]
    ActorStopped(ActorPath),
    /// A reply channel was written twice.
    #[error("Reply channel already completed.")]
    AlreadyCompleted,
    /// The restart budget of an actor was exhausted.
    #[error(
        "Actor {path} exceeded {max_restarts} restarts within {within:?}."
    )]
    RestartLimitExceeded {
        path: ActorPath,
        max_restarts: usize,
        within: Duration,
    },
    /// An actor with the same path already exists.
    #[error("Actor {0} exist.")]
    Exists(ActorPath),
    /// An error occurred while starting an actor.
    #[error("An error occurred while starting an actor: {0}.")]
    Start(String),
    /// The caller cancelled the reply before awaiting it.
    #[error("Reply was cancelled by the caller.")]
    ReplyCancelled,
    /// Error that does not compromise the operation of the system.
    #[error("Error: {0}")]
    Functional(String),
    /// The actor system is shutting down or gone.
    #[error("Actor system error: {0}")]
    System(String),
}

impl Error {
    /// True if the error is a fault escalated after exhausting a restart policy.
    pub fn is_restart_limit(&self) -> bool {
        matches!(self, Error::RestartLimitExceeded { .. })
    }
}
