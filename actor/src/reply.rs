// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Replies
//!
//! A request carries a [`ReplyChannel`], the single producer side of a one-shot slot, into the
//! target's mailbox. The caller keeps the matching [`Reply`], a future that resolves with the
//! handler's result. Awaiting a `Reply` suspends the awaiting task only; it never blocks a
//! worker thread.
//!
//! The slot is written at most once and read at most once. A caller may cancel a pending reply:
//! the message is still processed, but its result is discarded.
//!

use crate::{ActorPath, Error};

use tokio::sync::oneshot;
use tracing::debug;

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

type Slot<R> = oneshot::Sender<Result<R, Error>>;

/// State of a reply slot, as seen from the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyState {
    /// Not written yet and the caller is still waiting.
    Pending,
    /// A value was delivered.
    Resolved,
    /// The caller cancelled (or dropped) its [`Reply`].
    Cancelled,
}

/// Creates a connected reply pair for a request sent to the actor at `path`.
pub(crate) fn reply_channel<R>(path: ActorPath) -> (ReplyChannel<R>, Reply<R>) {
    let (sender, receiver) = oneshot::channel();
    (
        ReplyChannel {
            slot: Some(sender),
            state: ReplyState::Pending,
        },
        Reply {
            receiver: Some(receiver),
            path,
        },
    )
}

/// Producer side of a reply slot.
pub struct ReplyChannel<R> {
    slot: Option<Slot<R>>,
    state: ReplyState,
}

impl<R> ReplyChannel<R> {
    /// Writes the result. A second write fails with [`Error::AlreadyCompleted`]. Writing into a
    /// cancelled slot succeeds and the value is discarded.
    pub fn complete(&mut self, result: Result<R, Error>) -> Result<(), Error> {
        let Some(slot) = self.slot.take() else {
            return Err(Error::AlreadyCompleted);
        };
        if slot.send(result).is_err() {
            debug!("Reply discarded, the caller is gone.");
            self.state = ReplyState::Cancelled;
        } else {
            self.state = ReplyState::Resolved;
        }
        Ok(())
    }

    pub fn state(&self) -> ReplyState {
        match &self.slot {
            Some(slot) if slot.is_closed() => ReplyState::Cancelled,
            _ => self.state,
        }
    }

    /// True if the caller no longer waits for this reply.
    pub fn is_cancelled(&self) -> bool {
        self.state() == ReplyState::Cancelled
    }
}

/// Consumer side of a reply slot.
///
/// Resolves with the handler's result, with [`Error::ActorStopped`] if the actor went away
/// without answering, or with [`Error::ReplyCancelled`] after [`Reply::cancel`].
#[must_use = "a reply does nothing unless awaited"]
pub struct Reply<R> {
    receiver: Option<oneshot::Receiver<Result<R, Error>>>,
    path: ActorPath,
}

impl<R> Reply<R> {
    /// Path of the actor that will produce this reply.
    pub fn path(&self) -> &ActorPath {
        &self.path
    }

    /// Gives up on the reply. A message already in the mailbox is still processed.
    pub fn cancel(&mut self) {
        if let Some(mut receiver) = self.receiver.take() {
            receiver.close();
        }
    }
}

impl<R> Future for Reply<R> {
    type Output = Result<R, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(receiver) = this.receiver.as_mut() else {
            return Poll::Ready(Err(Error::ReplyCancelled));
        };
        match Pin::new(receiver).poll(cx) {
            Poll::Ready(result) => {
                this.receiver = None;
                Poll::Ready(
                    result.unwrap_or_else(|_| {
                        Err(Error::ActorStopped(this.path.clone()))
                    }),
                )
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[tokio::test]
    async fn test_reply_written_once() {
        let (mut channel, reply) = reply_channel::<u32>(ActorPath::from("/user/test"));
        assert_eq!(channel.state(), ReplyState::Pending);
        channel.complete(Ok(7)).unwrap();
        assert_eq!(channel.state(), ReplyState::Resolved);
        assert_eq!(channel.complete(Ok(8)), Err(Error::AlreadyCompleted));
        assert_eq!(reply.await, Ok(7));
    }

    #[tokio::test]
    async fn test_cancelled_reply() {
        let (mut channel, mut reply) =
            reply_channel::<u32>(ActorPath::from("/user/test"));
        reply.cancel();
        assert!(channel.is_cancelled());
        channel.complete(Ok(7)).unwrap();
        assert_eq!(channel.state(), ReplyState::Cancelled);
        assert_eq!(reply.await, Err(Error::ReplyCancelled));
    }

    #[tokio::test]
    async fn test_dropped_channel_resolves_stopped() {
        let path = ActorPath::from("/user/test");
        let (channel, reply) = reply_channel::<u32>(path.clone());
        drop(channel);
        assert_eq!(reply.await, Err(Error::ActorStopped(path)));
    }
}
