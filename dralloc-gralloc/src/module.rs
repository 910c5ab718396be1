// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! Process-wide module state.
//!
//! The device is created by the first `init` and shared until `teardown`.

use dralloc::{BackendKind, Builder, Device, Error, Result};
use std::env;
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const ENV_BACKEND: &str = "DRALLOC_BACKEND";
pub const ENV_NODE: &str = "DRALLOC_NODE";
pub const ENV_DRI_DIR: &str = "DRALLOC_DRI_DIR";
pub const ENV_HEAP_DIR: &str = "DRALLOC_HEAP_DIR";
pub const ENV_TILING: &str = "DRALLOC_TILING";

/// Device configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Config {
    pub kind: BackendKind,
    pub node_path: Option<PathBuf>,
    pub dri_dir: Option<PathBuf>,
    pub heap_dir: Option<PathBuf>,
    pub tiling: bool,
}

impl Config {
    /// Reads the configuration from `DRALLOC_*` environment variables.
    ///
    /// `DRALLOC_BACKEND` is one of `auto`, `kernel` and `dri`.  `DRALLOC_TILING` is enabled by
    /// `1` or `true`.
    pub fn from_env() -> Self {
        Self::from_vars(|key| env::var_os(key))
    }

    fn from_vars<F>(var: F) -> Self
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let kind = match var(ENV_BACKEND).as_deref().map(OsStr::to_str) {
            None | Some(Some("auto")) => BackendKind::Auto,
            Some(Some("kernel")) => BackendKind::KernelDirect,
            Some(Some("dri")) => BackendKind::Mediated,
            Some(other) => {
                log::warn!("unknown backend {other:?}; using auto");
                BackendKind::Auto
            }
        };

        let tiling = matches!(
            var(ENV_TILING).as_deref().and_then(OsStr::to_str),
            Some("1" | "true")
        );

        Self {
            kind,
            node_path: var(ENV_NODE).map(PathBuf::from),
            dri_dir: var(ENV_DRI_DIR).map(PathBuf::from),
            heap_dir: var(ENV_HEAP_DIR).map(PathBuf::from),
            tiling,
        }
    }

    pub fn builder(&self) -> Builder {
        let mut builder = Builder::new().kind(self.kind).tiling(self.tiling);
        if let Some(node_path) = &self.node_path {
            builder = builder.node_path(node_path);
        }
        if let Some(dri_dir) = &self.dri_dir {
            builder = builder.dri_dir(dri_dir);
        }
        if let Some(heap_dir) = &self.heap_dir {
            builder = builder.heap_dir(heap_dir);
        }

        builder
    }
}

static DEVICE: Mutex<Option<Arc<Device>>> = Mutex::new(None);

fn device() -> MutexGuard<'static, Option<Arc<Device>>> {
    DEVICE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Creates the device from `config` unless it exists.
pub fn init(config: &Config) -> Result<Arc<Device>> {
    init_with(config.builder())
}

/// Creates the device from `builder` unless it exists.
pub fn init_with(builder: Builder) -> Result<Arc<Device>> {
    let mut dev = device();
    if let Some(dev) = dev.as_ref() {
        return Ok(dev.clone());
    }

    let new_dev = builder.build().map_err(|err| {
        log::error!("failed to initialize the device: {err}");
        Error::NoDevice
    })?;
    *dev = Some(new_dev.clone());

    Ok(new_dev)
}

/// Returns the device created by `init`.
pub fn get() -> Result<Arc<Device>> {
    device().clone().ok_or(Error::NoDevice)
}

/// Drops the process-wide device.
///
/// BOs and users holding the device keep it alive until they are gone.
pub fn teardown() {
    if device().take().is_some() {
        log::debug!("module torn down");
    }
}
