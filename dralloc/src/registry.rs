// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! The per-process table of BOs known by handle.

use super::backends::MapFlags;
use super::bo::{Bo, BufferId, MappedPlane};
use super::handle::Handle;
use super::types::{Access, Error, Rect, Result};
use super::utils;
use std::collections::HashMap;
use std::os::fd::{BorrowedFd, OwnedFd};
use std::sync::{Arc, Mutex, PoisonError};

const FENCE_TIMEOUT_MS: u16 = 1000;

/// Waits for a sync fence to signal.
pub(crate) fn wait_fence(fence: BorrowedFd) -> Result<()> {
    utils::poll(fence, Access::Read, FENCE_TIMEOUT_MS)
}

struct Entry {
    bo: Arc<Bo>,
    refcount: u32,
}

#[derive(Default)]
pub struct Registry {
    entries: Mutex<HashMap<BufferId, Entry>>,
}

impl Registry {
    pub fn new() -> Self {
        Default::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<BufferId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new BO with a refcount of 1 and returns its handle.
    pub fn insert(&self, bo: Bo) -> Result<Handle> {
        let handle = bo.export()?;
        let id = BufferId::from_handle(&handle)?;

        let mut entries = self.entries();
        if entries.contains_key(&id) {
            return Error::ctx("BO registered twice");
        }
        entries.insert(
            id,
            Entry {
                bo: Arc::new(bo),
                refcount: 1,
            },
        );

        Ok(handle)
    }

    /// Takes a reference to the BO of `handle`.
    ///
    /// A BO not yet known to this process is imported with `import`.
    pub fn retain<F>(&self, handle: &Handle, import: F) -> Result<()>
    where
        F: FnOnce(&Handle) -> Result<Bo>,
    {
        let id = BufferId::from_handle(handle)?;

        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(&id) {
            entry.refcount = entry
                .refcount
                .checked_add(1)
                .ok_or(Error::InvalidArgument)?;
            return Ok(());
        }

        let bo = import(handle)?;
        entries.insert(
            id,
            Entry {
                bo: Arc::new(bo),
                refcount: 1,
            },
        );

        Ok(())
    }

    /// Drops a reference to the BO of `handle`.  The BO is destroyed with its last reference.
    pub fn release(&self, handle: &Handle) -> Result<()> {
        let id = BufferId::from_handle(handle)?;

        let removed = {
            let mut entries = self.entries();
            let entry = entries.get_mut(&id).ok_or(Error::InvalidArgument)?;

            entry.refcount -= 1;
            if entry.refcount > 0 {
                return Ok(());
            }

            entries.remove(&id)
        };

        // destroyed outside of the lock, or later by the last user
        drop(removed);

        Ok(())
    }

    pub fn get(&self, handle: &Handle) -> Result<Arc<Bo>> {
        let id = BufferId::from_handle(handle)?;
        self.entries()
            .get(&id)
            .map(|entry| entry.bo.clone())
            .ok_or(Error::InvalidArgument)
    }

    pub fn refcount(&self, handle: &Handle) -> Result<u32> {
        let id = BufferId::from_handle(handle)?;
        self.entries()
            .get(&id)
            .map(|entry| entry.refcount)
            .ok_or(Error::InvalidArgument)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Waits for `fence` and locks the BO of `handle` for CPU access.
    pub fn lock(
        &self,
        handle: &Handle,
        rect: Rect,
        flags: MapFlags,
        fence: Option<BorrowedFd>,
    ) -> Result<Vec<MappedPlane>> {
        let bo = self.get(handle)?;

        if let Some(fence) = fence {
            wait_fence(fence)?;
        }

        bo.lock(rect, flags)
    }

    /// Unlocks the BO of `handle`.
    ///
    /// CPU access is complete on return, so there is never a release fence.
    pub fn unlock(&self, handle: &Handle) -> Result<Option<OwnedFd>> {
        let bo = self.get(handle)?;
        bo.unlock()?;

        Ok(None)
    }
}
