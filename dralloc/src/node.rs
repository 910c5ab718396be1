// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

use super::types::{Error, Result};
use super::utils;
use drm::Device as DrmDevice;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// An opened DRM node.
pub struct Node(OwnedFd);

impl AsFd for Node {
    fn as_fd(&self) -> BorrowedFd {
        self.0.as_fd()
    }
}

impl DrmDevice for Node {}

impl Node {
    /// Opens a DRM node.
    ///
    /// `node_path` selects a node by path and `device_id` by st_rdev.  Without either, the first
    /// render node is opened, or the first primary node when there is no render node.
    pub fn open(node_path: Option<&Path>, device_id: Option<u64>) -> Result<Self> {
        if let Some(node_path) = node_path {
            return Ok(Self(utils::open(node_path)?));
        }

        let paths: Vec<PathBuf> = utils::drm_scan_nodes().map_err(|_| Error::NoDevice)?;
        for path in paths {
            if let Some(device_id) = device_id {
                if !path.metadata().is_ok_and(|s| device_id == s.rdev()) {
                    continue;
                }
            }

            if let Ok(fd) = utils::open(&path) {
                return Ok(Self(fd));
            }
        }

        Err(Error::NoDevice)
    }

    /// Returns the name of the kernel driver.
    pub fn driver_name(&self) -> Result<String> {
        let driver = self.get_driver()?;
        let name = driver
            .name()
            .to_str()
            .ok_or(Error::StringConversion)?
            .to_string();

        Ok(name)
    }

    pub fn set_master(&self) -> Result<()> {
        self.acquire_master_lock()?;
        Ok(())
    }

    pub fn drop_master(&self) -> Result<()> {
        self.release_master_lock()?;
        Ok(())
    }

    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self(self.0.try_clone()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open() {
        let path = std::env::temp_dir().join("dralloc-no-such-node");
        assert!(Node::open(Some(&path), None).is_err());

        // there is no node with device id 0
        assert!(matches!(Node::open(None, Some(0)), Err(Error::NoDevice)));
    }
}
