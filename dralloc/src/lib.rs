// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! dralloc is a gralloc-style graphics buffer allocator.
//!
//! This crate allocates, shares, and maps buffer objects (BOs) for graphics, display, camera, and
//! video.
//!
//! An allocation request is a `Descriptor`.  The device resolves its format, checks it against
//! the capabilities of the backend, and creates a BO.  BOs are shared between processes as
//! `Handle`s and are reference counted per process.

mod backends;
mod bo;
mod capability;
mod descriptor;
mod device;
pub mod dma_buf;
#[cfg(feature = "dri")]
mod dri_interface;
pub mod formats;
mod handle;
#[cfg(feature = "drm")]
mod node;
mod registry;
mod types;
mod utils;

pub use backends::{
    dma_heap, Backend, ImportData, Layout, MapFlags, Metadata, Payload, UseFlags, Vma, MAX_PLANES,
};
#[cfg(feature = "dri")]
pub use backends::dri;
pub use bo::{Bo, BufferId, MappedPlane};
pub use capability::{is_supported, relax_scanout, Combination, Combinations};
pub use descriptor::Descriptor;
pub use device::{BackendKind, Builder, Device, Ycbcr};
pub use handle::{Handle, HandleInfo, WIRE_WORDS};
#[cfg(feature = "drm")]
pub use node::Node;
pub use registry::Registry;
pub use types::{Error, Format, HalFormat, Mapping, Modifier, Rect, Result, Size};
