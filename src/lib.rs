// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Core library for the Ensemble framework.
//! Provides an actor runtime with typed mailboxes, request-response messaging and supervision.

pub use actor::{
    Actor, ActorContext, ActorId, ActorPath, ActorRef, ActorSystem, ChildAction,
    CustomIntervalStrategy, Error as ActorError, Event,
    ExponentialBackoffStrategy, FixedIntervalStrategy, Handler, MailboxConfig,
    MailboxOnRestart, Message, NoIntervalStrategy, OverflowPolicy, Props, Reply,
    ReplyChannel, ReplyState, Response, RestartPolicy, RetryStrategy, Sink,
    Strategy, Subscriber, SupervisionStrategy, SystemConfig, SystemEvent,
    SystemRef, SystemRunner,
};
