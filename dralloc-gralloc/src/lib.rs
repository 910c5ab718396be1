// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! Gralloc HAL glue for dralloc.
//!
//! This crate translates gralloc usage bits, owns the process-wide device, and exposes the
//! gralloc module entry points as a Rust API and an unstable C API.

#[cfg(feature = "capi")]
#[allow(non_camel_case_types)]
pub mod capi;
pub mod hal;
mod log;
pub mod module;
#[cfg(test)]
mod testing;
pub mod usage;

pub use hal::Gralloc;
pub use module::Config;
