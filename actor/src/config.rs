// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Runtime configuration
//!
//! [`SystemConfig`] holds the knobs of an actor system. It deserializes with serde so hosts can
//! load it from whatever format they already use; every field has a default.
//!

use serde::{Deserialize, Serialize};

/// What a bounded mailbox does with a message that does not fit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverflowPolicy {
    /// Return [`Error::MailboxFull`](crate::Error::MailboxFull) to the sender, who may retry.
    #[default]
    Reject,
    /// Silently drop fire-and-forget messages. Requests still fail with `MailboxFull`.
    DropNewest,
}

/// Mailbox configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    /// Maximum number of pending messages. `None` means unbounded.
    pub capacity: Option<usize>,
    /// Behavior when a bounded mailbox is full.
    pub overflow: OverflowPolicy,
}

impl MailboxConfig {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn bounded(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self {
            capacity: Some(capacity),
            overflow,
        }
    }
}

/// Actor system configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Maximum number of user messages a cell processes per scheduling turn.
    pub batch_size: usize,
    /// Mailbox configuration for actors that do not provide their own.
    pub mailbox: MailboxConfig,
    /// Capacity of the lifecycle event bus.
    pub event_buffer: usize,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            mailbox: MailboxConfig::unbounded(),
            event_buffer: 1024,
        }
    }
}

impl SystemConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_mailbox(mut self, mailbox: MailboxConfig) -> Self {
        self.mailbox = mailbox;
        self
    }
}
