// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Registry
//!
//! Process wide map from actor identity to a live actor. Each entry holds the typed reference
//! (type erased, recovered with a downcast) and the untyped control handle of the cell. A path
//! index allows lookups by name and enforces that a path is used by one live actor at a time.
//!
//! Entries are removed when the actor terminates, so a lookup after `stop` fails with
//! [`Error::NotFound`].
//!

use crate::{ActorId, ActorPath, Error, cell::ControlHandle};

use tokio::sync::RwLock;
use tracing::{debug, error};

use std::{any::Any, collections::HashMap, sync::Arc};

struct Entry {
    path: ActorPath,
    handle: Box<dyn Any + Send + Sync>,
    control: Arc<dyn ControlHandle>,
}

#[derive(Default)]
struct Entries {
    by_id: HashMap<ActorId, Entry>,
    by_path: HashMap<ActorPath, ActorId>,
}

#[derive(Default)]
pub(crate) struct Registry {
    entries: RwLock<Entries>,
}

impl Registry {
    /// Registers a live actor. Fails with [`Error::Exists`] if its path is taken.
    pub(crate) async fn register(
        &self,
        id: ActorId,
        path: ActorPath,
        handle: Box<dyn Any + Send + Sync>,
        control: Arc<dyn ControlHandle>,
    ) -> Result<(), Error> {
        let mut entries = self.entries.write().await;
        if entries.by_path.contains_key(&path) {
            error!("Actor '{}' already exists!", &path);
            return Err(Error::Exists(path));
        }
        debug!("Registering actor {} as {}.", &path, id);
        entries.by_path.insert(path.clone(), id);
        entries.by_id.insert(
            id,
            Entry {
                path,
                handle,
                control,
            },
        );
        Ok(())
    }

    /// Typed handle of a live actor. A wrong type is reported as not found.
    pub(crate) async fn lookup<H>(&self, id: ActorId) -> Result<H, Error>
    where
        H: Clone + 'static,
    {
        let entries = self.entries.read().await;
        entries
            .by_id
            .get(&id)
            .and_then(|entry| entry.handle.downcast_ref::<H>().cloned())
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    pub(crate) async fn lookup_path<H>(&self, path: &ActorPath) -> Option<H>
    where
        H: Clone + 'static,
    {
        let entries = self.entries.read().await;
        entries
            .by_path
            .get(path)
            .and_then(|id| entries.by_id.get(id))
            .and_then(|entry| entry.handle.downcast_ref::<H>().cloned())
    }

    pub(crate) async fn id_of(&self, path: &ActorPath) -> Option<ActorId> {
        self.entries.read().await.by_path.get(path).copied()
    }

    pub(crate) async fn control(
        &self,
        id: ActorId,
    ) -> Option<Arc<dyn ControlHandle>> {
        let entries = self.entries.read().await;
        entries.by_id.get(&id).map(|entry| entry.control.clone())
    }

    /// Removes a terminated actor. Returns false if it was not registered.
    pub(crate) async fn unregister(&self, id: ActorId) -> bool {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.by_id.remove(&id) else {
            return false;
        };
        if entries.by_path.get(&entry.path) == Some(&id) {
            entries.by_path.remove(&entry.path);
        }
        debug!("Actor {} unregistered.", &entry.path);
        true
    }

    /// Paths of the live direct children of `path`.
    pub(crate) async fn children(&self, path: &ActorPath) -> Vec<ActorPath> {
        let entries = self.entries.read().await;
        let mut children: Vec<ActorPath> = entries
            .by_path
            .keys()
            .filter(|candidate| candidate.is_child_of(path))
            .cloned()
            .collect();
        children.sort();
        children
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.entries.read().await.by_id.len()
    }
}
