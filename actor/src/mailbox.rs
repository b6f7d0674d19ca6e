// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Mailbox
//!
//! Per-actor FIFO queue of pending messages. The sending half ([`MailboxSender`]) is shared by
//! every reference to the actor; the receiving half ([`Mailbox`]) is owned by the actor cell and
//! only touched by the turn that currently holds the cell's execution token.
//!
//! Both halves share a pending counter. It is incremented before a message is pushed and
//! decremented after it is popped, so it never under-reports: the scheduler relies on that to
//! never miss a cell that has work.
//!

use crate::{
    Actor,
    config::{MailboxConfig, OverflowPolicy},
    reply::ReplyChannel,
};

use tokio::sync::mpsc::{self, error::TrySendError};

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

/// A user message on its way to an actor, with the reply slot of the caller (if any).
pub(crate) struct Envelope<A: Actor> {
    pub(crate) message: A::Message,
    pub(crate) reply: Option<ReplyChannel<A::Response>>,
}

impl<A: Actor> Envelope<A> {
    pub(crate) fn new(
        message: A::Message,
        reply: Option<ReplyChannel<A::Response>>,
    ) -> Self {
        Self { message, reply }
    }
}

/// Why an enqueue was refused. The message is handed back to the caller.
#[derive(Debug)]
pub enum EnqueueError<M> {
    /// The receiving side was closed; the actor is stopped.
    Closed(M),
    /// The mailbox is bounded and at capacity.
    Full(M),
}

#[cfg(test)]
impl<M> EnqueueError<M> {
    pub fn into_inner(self) -> M {
        match self {
            EnqueueError::Closed(message) | EnqueueError::Full(message) => {
                message
            }
        }
    }
}

enum SenderKind<M> {
    Bounded(mpsc::Sender<M>),
    Unbounded(mpsc::UnboundedSender<M>),
}

enum ReceiverKind<M> {
    Bounded(mpsc::Receiver<M>),
    Unbounded(mpsc::UnboundedReceiver<M>),
}

/// Sending half of a mailbox.
pub struct MailboxSender<M> {
    inner: SenderKind<M>,
    pending: Arc<AtomicUsize>,
    overflow: OverflowPolicy,
}

/// Receiving half of a mailbox.
pub struct Mailbox<M> {
    inner: ReceiverKind<M>,
    pending: Arc<AtomicUsize>,
}

/// Creates a mailbox with the given configuration.
pub fn mailbox<M>(config: &MailboxConfig) -> (MailboxSender<M>, Mailbox<M>) {
    let pending = Arc::new(AtomicUsize::new(0));
    let (sender, receiver) = match config.capacity {
        Some(capacity) => {
            // A zero sized tokio channel is not allowed.
            let (sender, receiver) = mpsc::channel(capacity.max(1));
            (SenderKind::Bounded(sender), ReceiverKind::Bounded(receiver))
        }
        None => {
            let (sender, receiver) = mpsc::unbounded_channel();
            (
                SenderKind::Unbounded(sender),
                ReceiverKind::Unbounded(receiver),
            )
        }
    };
    (
        MailboxSender {
            inner: sender,
            pending: pending.clone(),
            overflow: config.overflow,
        },
        Mailbox {
            inner: receiver,
            pending,
        },
    )
}

impl<M> MailboxSender<M> {
    /// Appends a message at the tail of the mailbox.
    pub fn enqueue(&self, message: M) -> Result<(), EnqueueError<M>> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let result = match &self.inner {
            SenderKind::Bounded(sender) => {
                sender.try_send(message).map_err(|error| match error {
                    TrySendError::Full(message) => EnqueueError::Full(message),
                    TrySendError::Closed(message) => {
                        EnqueueError::Closed(message)
                    }
                })
            }
            SenderKind::Unbounded(sender) => sender
                .send(message)
                .map_err(|error| EnqueueError::Closed(error.0)),
        };
        if result.is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        result
    }

    /// Number of messages waiting to be processed.
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the receiving side is closed.
    pub fn is_closed(&self) -> bool {
        match &self.inner {
            SenderKind::Bounded(sender) => sender.is_closed(),
            SenderKind::Unbounded(sender) => sender.is_closed(),
        }
    }

    pub fn overflow(&self) -> OverflowPolicy {
        self.overflow
    }
}

impl<M> Clone for MailboxSender<M> {
    fn clone(&self) -> Self {
        let inner = match &self.inner {
            SenderKind::Bounded(sender) => SenderKind::Bounded(sender.clone()),
            SenderKind::Unbounded(sender) => {
                SenderKind::Unbounded(sender.clone())
            }
        };
        Self {
            inner,
            pending: self.pending.clone(),
            overflow: self.overflow,
        }
    }
}

impl<M> Mailbox<M> {
    /// Pops the message at the head of the mailbox, `None` if it is empty.
    pub fn dequeue(&mut self) -> Option<M> {
        let message = match &mut self.inner {
            ReceiverKind::Bounded(receiver) => receiver.try_recv().ok(),
            ReceiverKind::Unbounded(receiver) => receiver.try_recv().ok(),
        };
        if message.is_some() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        message
    }

    /// Refuses further enqueues. Messages already queued stay available.
    pub fn close(&mut self) {
        match &mut self.inner {
            ReceiverKind::Bounded(receiver) => receiver.close(),
            ReceiverKind::Unbounded(receiver) => receiver.close(),
        }
    }

    /// Closes the mailbox and returns every pending message in FIFO order.
    pub fn drain(&mut self) -> Vec<M> {
        self.close();
        std::iter::from_fn(|| self.dequeue()).collect()
    }

    /// Pops every pending message without closing the mailbox.
    pub fn clear(&mut self) -> Vec<M> {
        std::iter::from_fn(|| self.dequeue()).collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
