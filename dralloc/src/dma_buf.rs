// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! dma-buf helpers for backends whose BOs are plain dma-bufs.

use super::backends::{Layout, MapFlags, Vma, MAX_PLANES};
use super::types::{Error, Mapping, Result, Size};
use super::utils;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

/// Per-plane dma-bufs of a BO.
///
/// Planes may share a dma-buf, in which case their fds are dups of each other.
pub struct Resource {
    fds: Vec<OwnedFd>,
}

impl Resource {
    pub fn new(fds: Vec<OwnedFd>) -> Self {
        Self { fds }
    }

    /// Dups `plane_count` fds from `fd`.
    pub fn from_shared(fd: OwnedFd, plane_count: u32) -> Result<Self> {
        let mut fds = Vec::with_capacity(plane_count as usize);
        for _ in 1..plane_count {
            fds.push(fd.try_clone()?);
        }
        fds.push(fd);

        Ok(Self::new(fds))
    }

    /// Dups borrowed fds, one per plane.
    pub fn from_borrowed(fds: &[BorrowedFd]) -> Result<Self> {
        let fds = fds
            .iter()
            .map(|fd| fd.try_clone_to_owned())
            .collect::<std::io::Result<Vec<_>>>()?;

        Ok(Self::new(fds))
    }

    pub fn plane_count(&self) -> u32 {
        self.fds.len() as u32
    }

    pub fn dmabuf(&self, plane: usize) -> Result<BorrowedFd<'_>> {
        self.fds
            .get(plane)
            .map(|fd| fd.as_fd())
            .ok_or(Error::InvalidArgument)
    }

    pub fn export(&self, plane: usize) -> Result<OwnedFd> {
        let fd = self.dmabuf(plane)?.try_clone_to_owned()?;
        Ok(fd)
    }

    pub fn set_name(&self, name: &str) {
        if let Ok(fd) = self.dmabuf(0) {
            // not all exporters support naming
            let _ = utils::dma_buf_set_name(fd, name);
        }
    }

    /// Returns the allocation key and size of each plane's dma-buf.
    pub fn allocations(&self) -> Result<(Vec<u64>, Vec<Size>)> {
        let mut keys = Vec::with_capacity(self.fds.len());
        let mut sizes = Vec::with_capacity(self.fds.len());
        for fd in &self.fds {
            let (_, ino) = utils::file_id(fd)?;
            keys.push(ino);
            sizes.push(utils::seek_end(fd)?);
        }

        Ok((keys, sizes))
    }
}

/// Maps each distinct allocation of `res` once.
///
/// Planes sharing an allocation key share a mapping, and each mapping covers its whole
/// allocation.
pub fn map(res: &Resource, layout: &Layout, flags: MapFlags) -> Result<Vma> {
    let access = flags.access().ok_or(Error::InvalidArgument)?;
    let count = layout.plane_count as usize;
    if count == 0 || count > MAX_PLANES || count > res.fds.len() {
        return Error::invalid();
    }

    let (keys, sizes) = res.allocations()?;

    let mut mappings: Vec<Mapping> = Vec::with_capacity(count);
    let mut plane_mappings = [0; MAX_PLANES];
    for plane in 0..count {
        if let Some(prev) = (0..plane).find(|&prev| keys[prev] == keys[plane]) {
            plane_mappings[plane] = plane_mappings[prev];
            continue;
        }

        match utils::mmap(&res.fds[plane], sizes[plane], access) {
            Ok(mapping) => {
                plane_mappings[plane] = mappings.len();
                mappings.push(mapping);
            }
            Err(err) => {
                if let Err(unmap_err) = munmap_all(mappings) {
                    log::error!("failed to unmap a partial mapping: {unmap_err}");
                }
                return Err(err);
            }
        }
    }

    Ok(Vma::with_mappings(mappings, plane_mappings, layout.strides, flags))
}

fn munmap_all(mappings: Vec<Mapping>) -> Result<()> {
    let mut res = Ok(());
    for mapping in mappings {
        if let Err(err) = utils::munmap(mapping) {
            res = Err(err);
        }
    }

    res
}

pub fn unmap(_res: &Resource, vma: Vma) -> Result<()> {
    munmap_all(vma.mappings)
}

// the first plane of each mapping, which names its allocation
fn allocation_planes(vma: &Vma) -> impl Iterator<Item = usize> + '_ {
    (0..vma.mappings.len()).filter_map(|idx| vma.plane_mappings.iter().position(|&m| m == idx))
}

// utils::dma_buf_sync is supposed to bracket cpu access
//
//  - utils::dma_buf_sync(dmabuf, access, true)
//  - cpu access with the specified access type
//  - utils::dma_buf_sync(dmabuf, access, false)
//
// lock starts the cpu access and unlock ends it.

pub fn invalidate(res: &Resource, vma: &Vma) -> Result<()> {
    let access = vma.map_flags.access().ok_or(Error::InvalidArgument)?;
    for plane in allocation_planes(vma) {
        utils::dma_buf_sync(res.dmabuf(plane)?, access, true)?;
    }

    Ok(())
}

pub fn flush(res: &Resource, vma: &Vma) -> Result<()> {
    let access = vma.map_flags.access().ok_or(Error::InvalidArgument)?;
    for plane in allocation_planes(vma) {
        utils::dma_buf_sync(res.dmabuf(plane)?, access, false)?;
    }

    Ok(())
}
