// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! Simple types.
//!
//! This module defines simple dralloc-specific types.

use super::formats;
use std::{ffi, fmt, io, num, ptr, result};

/// The error type for dralloc operations.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A generic error with a descriptive message to provide the context.
    #[error("{0}")]
    Context(&'static str),
    /// A validation error indicating a bad user input.  It is reported before any backend call.
    #[error("invalid argument")]
    InvalidArgument,
    /// The format/usage combination cannot be satisfied.
    #[error("unsupported combination")]
    Unsupported,
    /// The device node or the driver could not be initialized.
    #[error("no such device")]
    NoDevice,
    /// An optional driver entry point is missing.
    #[error("missing driver capability {0}")]
    MissingCapability(&'static str),
    /// A kernel or driver error.  The errno is preserved.
    #[error("{0}")]
    Io(#[from] io::Error),
    /// Waiting on a fence failed or timed out.
    #[error("fence wait failed: {0}")]
    Fence(io::Error),
    /// A validation error indicating a bad integer.
    #[error("bad integer conversion")]
    IntegerConversion,
    /// A validation error indicating a bad string.
    #[error("bad string conversion")]
    StringConversion,
}

impl Error {
    pub(crate) fn ctx<T>(s: &'static str) -> Result<T> {
        Err(Error::Context(s))
    }

    pub(crate) fn invalid<T>() -> Result<T> {
        Err(Error::InvalidArgument)
    }

    pub(crate) fn unsupported<T>() -> Result<T> {
        Err(Error::Unsupported)
    }

    /// Returns the positive errno value that best describes the error.
    pub fn errno(&self) -> i32 {
        match self {
            Error::Context(_) | Error::InvalidArgument | Error::Unsupported => libc_errno::EINVAL,
            Error::NoDevice => libc_errno::ENODEV,
            Error::MissingCapability(_) => libc_errno::ENOSYS,
            Error::Io(err) | Error::Fence(err) => err.raw_os_error().unwrap_or(libc_errno::EIO),
            Error::IntegerConversion | Error::StringConversion => libc_errno::EINVAL,
        }
    }
}

mod libc_errno {
    pub const EINVAL: i32 = nix::errno::Errno::EINVAL as i32;
    pub const ENODEV: i32 = nix::errno::Errno::ENODEV as i32;
    pub const ENOSYS: i32 = nix::errno::Errno::ENOSYS as i32;
    pub const EIO: i32 = nix::errno::Errno::EIO as i32;
}

impl From<num::TryFromIntError> for Error {
    fn from(_err: num::TryFromIntError) -> Self {
        Self::IntegerConversion
    }
}

impl From<ffi::NulError> for Error {
    fn from(_err: ffi::NulError) -> Self {
        Self::StringConversion
    }
}

impl From<nix::Error> for Error {
    fn from(err: nix::Error) -> Self {
        Self::from(io::Error::from(err))
    }
}

/// A specialized `Result` type for dralloc operations.
pub type Result<T> = result::Result<T, Error>;

/// The type for the BO size.
pub type Size = u64;

/// A 32-bit DRM format.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Format(pub u32);

impl Format {
    pub(crate) fn is_invalid(&self) -> bool {
        *self == formats::INVALID
    }
}

impl Default for Format {
    fn default() -> Self {
        formats::INVALID
    }
}

impl<T> From<T> for Format
where
    T: Into<u32>,
{
    fn from(val: T) -> Self {
        Self(val.into())
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(name) = formats::name(*self) {
            write!(f, "{}", name)
        } else {
            write!(f, "{}", formats::fourcc(*self))
        }
    }
}

/// An Android HAL pixel format.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct HalFormat(pub i32);

/// A 64-bit DRM format modifier.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Modifier(pub u64);

impl Modifier {
    pub(crate) fn is_invalid(&self) -> bool {
        *self == formats::MOD_INVALID
    }

    pub(crate) fn is_linear(&self) -> bool {
        *self == formats::MOD_LINEAR
    }
}

impl Default for Modifier {
    fn default() -> Self {
        formats::MOD_INVALID
    }
}

impl<T> From<T> for Modifier
where
    T: Into<u64>,
{
    fn from(val: T) -> Self {
        Self(val.into())
    }
}

/// An access type for memory mapping and cache maintenance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Access {
    Read,
    Write,
    ReadWrite,
}

/// A memory mapping.
#[derive(Clone, Copy, Debug)]
pub struct Mapping {
    /// Pointer of a mapping.
    pub ptr: ptr::NonNull<ffi::c_void>,
    /// Size of a mapping.
    pub len: num::NonZeroUsize,
}

// SAFETY: a mapping is a plain address range; synchronization is the caller's responsibility
unsafe impl Send for Mapping {}
// SAFETY: see above
unsafe impl Sync for Mapping {}

/// A rectangle within a buffer, in pixels.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Rect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

impl Rect {
    /// Creates a rectangle.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub(crate) fn fits(&self, width: u32, height: u32) -> bool {
        let right = self.x.checked_add(self.width);
        let bottom = self.y.checked_add(self.height);

        right.is_some_and(|r| r <= width) && bottom.is_some_and(|b| b <= height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format() {
        assert_eq!(Format::default(), formats::INVALID);
        assert_eq!(format!("{}", formats::NV12), "NV12");
        assert_eq!(format!("{}", Format(0xffffffff)), "0xffffffff");
    }

    #[test]
    fn test_modifier() {
        assert_eq!(Modifier::default(), formats::MOD_INVALID);
        assert!(formats::MOD_LINEAR.is_linear());
        assert!(!formats::MOD_LINEAR.is_invalid());
    }

    #[test]
    fn test_rect() {
        assert!(Rect::new(0, 0, 10, 10).fits(10, 10));
        assert!(Rect::new(5, 5, 5, 5).fits(10, 10));
        assert!(!Rect::new(5, 5, 6, 5).fits(10, 10));
        assert!(!Rect::new(u32::MAX, 0, 2, 1).fits(10, 10));
    }

    #[test]
    fn test_errno() {
        assert_eq!(Error::InvalidArgument.errno(), libc_errno::EINVAL);
        assert_eq!(Error::NoDevice.errno(), libc_errno::ENODEV);
        assert_eq!(Error::MissingCapability("x").errno(), libc_errno::ENOSYS);

        let nomem = nix::errno::Errno::ENOMEM as i32;
        let err = Error::from(io::Error::from_raw_os_error(nomem));
        assert_eq!(err.errno(), nomem);
    }
}
