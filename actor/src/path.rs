// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor addressing
//!
//! Two ways to name an actor live here:
//!
//! - [`ActorId`] is the opaque, process-unique identity handed out at spawn time. It owns
//!   nothing: it is only a key into the system registry.
//! - [`ActorPath`] is the hierarchical name of the actor (`/user/bank/account-1`). It mirrors
//!   the supervision tree and is what logs and lifecycle events print.
//!

use serde::{Deserialize, Serialize};

use std::cmp::Ordering;
use std::fmt::{Error, Formatter};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Identity `0` is reserved for the system guardian.
static NEXT_ACTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique actor identity.
#[derive(
    Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ActorId(u64);

impl ActorId {
    /// Allocates a fresh identity. Identities are never reused within a process.
    pub(crate) fn next() -> Self {
        ActorId(NEXT_ACTOR_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }

    /// Identity of the system guardian, the root of the supervision tree.
    pub(crate) const fn guardian() -> Self {
        ActorId(0)
    }

    /// Raw numeric value of the identity.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "#{}", self.0)
    }
}

/// Hierarchical path of an actor in the supervision tree.
#[derive(
    Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ActorPath(Vec<String>);

impl ActorPath {
    /// The top level segment of the path (`/user` for `/user/bank/account`).
    pub fn root(&self) -> Self {
        ActorPath(self.0.iter().take(1).cloned().collect())
    }

    /// The path of the supervising actor. The parent of a top level path is the empty path.
    pub fn parent(&self) -> Self {
        let mut tokens = self.0.clone();
        tokens.pop();
        ActorPath(tokens)
    }

    /// Last segment of the path, the actor's own name.
    pub fn key(&self) -> String {
        self.0.last().cloned().unwrap_or_default()
    }

    /// Number of segments.
    pub fn level(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if `self` lives anywhere below `other`.
    pub fn is_descendant_of(&self, other: &ActorPath) -> bool {
        self.level() > other.level() && self.0.starts_with(&other.0)
    }

    /// True if `self` is directly supervised by `other`.
    pub fn is_child_of(&self, other: &ActorPath) -> bool {
        !self.is_empty() && self.parent() == *other
    }

    pub fn is_top_level(&self) -> bool {
        self.0.len() == 1
    }
}

fn tokens(str: &str) -> impl Iterator<Item = String> + '_ {
    str.split('/')
        .filter(|x| !x.trim().is_empty())
        .map(|s| s.to_string())
}

impl From<&str> for ActorPath {
    fn from(str: &str) -> Self {
        ActorPath(tokens(str).collect())
    }
}

impl From<String> for ActorPath {
    fn from(string: String) -> Self {
        ActorPath::from(string.as_str())
    }
}

impl std::ops::Div<&str> for ActorPath {
    type Output = ActorPath;

    fn div(self, rhs: &str) -> Self::Output {
        let mut keys = self.0;
        keys.extend(tokens(rhs));
        ActorPath(keys)
    }
}

impl std::fmt::Display for ActorPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        match self.level().cmp(&1) {
            Ordering::Less => write!(f, "/"),
            Ordering::Equal => write!(f, "/{}", self.0[0]),
            Ordering::Greater => write!(f, "/{}", self.0.join("/")),
        }
    }
}

impl std::fmt::Debug for ActorPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        std::fmt::Display::fmt(self, f)
    }
}
