// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

use super::backends::UseFlags;
use super::formats;
use super::types::{Format, HalFormat, Modifier};

/// A BO allocation request.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct Descriptor {
    pub width: u32,
    pub height: u32,
    /// The OS-level format, carried into handles as is.
    pub hal_format: HalFormat,
    /// The device format.
    pub format: Format,
    /// Opaque usage bits, carried into handles as is.
    pub producer_usage: u64,
    pub consumer_usage: u64,
    pub use_flags: UseFlags,
    /// When non-empty, the BO must use one of these modifiers.
    pub modifiers: Vec<Modifier>,
}

impl Descriptor {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Sets the OS-level format and resolves the device format from it.
    pub fn hal_format(mut self, hal_fmt: HalFormat) -> Self {
        self.hal_format = hal_fmt;
        self.format = formats::resolve(hal_fmt);
        self
    }

    pub fn format(mut self, fmt: Format) -> Self {
        self.format = fmt;
        self
    }

    pub fn usage(mut self, producer_usage: u64, consumer_usage: u64) -> Self {
        self.producer_usage = producer_usage;
        self.consumer_usage = consumer_usage;
        self
    }

    pub fn use_flags(mut self, use_flags: UseFlags) -> Self {
        self.use_flags = use_flags;
        self
    }

    pub fn modifiers(mut self, modifiers: Vec<Modifier>) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && !self.format.is_invalid()
            && !self.modifiers.iter().any(|m| m.is_invalid())
    }
}
