// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! Shareable buffer handles.
//!
//! A handle is transported as its plane fds, which travel out of band, and a flat array of
//! `u32` words describing the BO.

use super::backends::{UseFlags, MAX_PLANES};
use super::types::{Error, Format, HalFormat, Modifier, Result, Size};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

const MAGIC: u32 = 0x6472_6c63;
const VERSION: u32 = 1;

/// Metadata of a BO carried in its handle.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct HandleInfo {
    pub hal_format: HalFormat,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub producer_usage: u64,
    pub consumer_usage: u64,
    pub use_flags: UseFlags,
    pub plane_count: u32,
    pub strides: [Size; MAX_PLANES],
    pub offsets: [Size; MAX_PLANES],
    pub sizes: [Size; MAX_PLANES],
    pub size: Size,
    /// The stride of plane 0 in pixels.
    pub pixel_stride: u32,
    pub modifier: Modifier,
}

// magic, version
const HEADER_WORDS: usize = 2;
// 4 formats and extents, 3 usages, plane count, per-plane stride/offset/size, size, pixel stride,
// and modifier
const INFO_WORDS: usize = 4 + 3 * 2 + 1 + MAX_PLANES * 3 * 2 + 2 + 1 + 2;

/// The length of the wire form in words.
pub const WIRE_WORDS: usize = HEADER_WORDS + INFO_WORDS;

struct Writer(Vec<u32>);

impl Writer {
    fn u32(&mut self, val: u32) {
        self.0.push(val);
    }

    fn u64(&mut self, val: u64) {
        self.0.push(val as u32);
        self.0.push((val >> 32) as u32);
    }
}

struct Reader<'a>(std::slice::Iter<'a, u32>);

impl Reader<'_> {
    fn u32(&mut self) -> Result<u32> {
        self.0.next().copied().ok_or(Error::InvalidArgument)
    }

    fn u64(&mut self) -> Result<u64> {
        let lo = self.u32()? as u64;
        let hi = self.u32()? as u64;
        Ok((hi << 32) | lo)
    }
}

impl HandleInfo {
    fn write(&self, w: &mut Writer) {
        w.u32(self.hal_format.0 as u32);
        w.u32(self.format.0);
        w.u32(self.width);
        w.u32(self.height);
        w.u64(self.producer_usage);
        w.u64(self.consumer_usage);
        w.u64(self.use_flags.bits());
        w.u32(self.plane_count);
        for plane in 0..MAX_PLANES {
            w.u64(self.strides[plane]);
            w.u64(self.offsets[plane]);
            w.u64(self.sizes[plane]);
        }
        w.u64(self.size);
        w.u32(self.pixel_stride);
        w.u64(self.modifier.0);
    }

    fn read(r: &mut Reader) -> Result<Self> {
        let mut info = Self {
            hal_format: HalFormat(r.u32()? as i32),
            format: Format(r.u32()?),
            width: r.u32()?,
            height: r.u32()?,
            producer_usage: r.u64()?,
            consumer_usage: r.u64()?,
            use_flags: UseFlags::from_bits_retain(r.u64()?),
            plane_count: r.u32()?,
            ..Default::default()
        };
        for plane in 0..MAX_PLANES {
            info.strides[plane] = r.u64()?;
            info.offsets[plane] = r.u64()?;
            info.sizes[plane] = r.u64()?;
        }
        info.size = r.u64()?;
        info.pixel_stride = r.u32()?;
        info.modifier = Modifier(r.u64()?);

        Ok(info)
    }
}

/// A shareable BO handle.
#[derive(Debug)]
pub struct Handle {
    /// One dma-buf per plane.  Planes of a single allocation share a dma-buf.
    pub fds: Vec<OwnedFd>,
    pub info: HandleInfo,
}

impl Handle {
    pub fn new(fds: Vec<OwnedFd>, info: HandleInfo) -> Result<Self> {
        if fds.is_empty() || fds.len() > MAX_PLANES || fds.len() != info.plane_count as usize {
            return Error::invalid();
        }

        Ok(Self { fds, info })
    }

    pub fn fds(&self) -> Vec<BorrowedFd<'_>> {
        self.fds.iter().map(|fd| fd.as_fd()).collect()
    }

    pub fn try_clone(&self) -> Result<Self> {
        let fds = self
            .fds
            .iter()
            .map(|fd| fd.try_clone())
            .collect::<std::io::Result<Vec<_>>>()?;

        Ok(Self {
            fds,
            info: self.info,
        })
    }

    /// Serializes the metadata.  The fds are transported separately.
    pub fn to_wire(&self) -> Vec<u32> {
        let mut w = Writer(Vec::with_capacity(WIRE_WORDS));
        w.u32(MAGIC);
        w.u32(VERSION);
        self.info.write(&mut w);

        w.0
    }

    /// Reconstructs a handle from transported fds and metadata.
    pub fn from_wire(fds: Vec<OwnedFd>, words: &[u32]) -> Result<Self> {
        if words.len() != WIRE_WORDS {
            log::debug!("bad handle length {}", words.len());
            return Error::invalid();
        }

        let mut r = Reader(words.iter());
        if r.u32()? != MAGIC || r.u32()? != VERSION {
            log::debug!("bad handle magic or version");
            return Error::invalid();
        }

        let info = HandleInfo::read(&mut r)?;

        Self::new(fds, info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats;
    use crate::utils;

    fn test_info() -> HandleInfo {
        HandleInfo {
            hal_format: formats::hal::YV12,
            format: formats::YVU420_ANDROID,
            width: 100,
            height: 10,
            producer_usage: 0x1_0000_0003,
            consumer_usage: 0x900,
            use_flags: UseFlags::TEXTURE | UseFlags::SW_READ_OFTEN,
            plane_count: 3,
            strides: [128, 64, 64, 0],
            offsets: [0, 1280, 1600, 0],
            sizes: [1280, 320, 320, 0],
            size: 1920,
            pixel_stride: 128,
            modifier: formats::MOD_LINEAR,
        }
    }

    fn test_fds(count: usize) -> Vec<OwnedFd> {
        let memfd = utils::memfd_create("handle", 4096).unwrap();
        (0..count).map(|_| memfd.try_clone().unwrap()).collect()
    }

    #[test]
    fn test_wire() {
        let handle = Handle::new(test_fds(3), test_info()).unwrap();
        let words = handle.to_wire();
        assert_eq!(words.len(), WIRE_WORDS);
        assert_eq!(words[0], MAGIC);

        let fds = handle.try_clone().unwrap().fds;
        let decoded = Handle::from_wire(fds, &words).unwrap();
        assert_eq!(decoded.info, handle.info);
        assert_eq!(decoded.fds().len(), 3);
    }

    #[test]
    fn test_wire_validation() {
        let handle = Handle::new(test_fds(3), test_info()).unwrap();
        let words = handle.to_wire();

        let mut bad_magic = words.clone();
        bad_magic[0] ^= 1;
        assert!(Handle::from_wire(test_fds(3), &bad_magic).is_err());

        let mut bad_version = words.clone();
        bad_version[1] = VERSION + 1;
        assert!(Handle::from_wire(test_fds(3), &bad_version).is_err());

        assert!(Handle::from_wire(test_fds(3), &words[..WIRE_WORDS - 1]).is_err());

        // plane count disagrees with the fds
        let err = Handle::from_wire(test_fds(2), &words).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument));
    }

    #[test]
    fn test_new() {
        assert!(Handle::new(Vec::new(), HandleInfo::default()).is_err());
        assert!(Handle::new(test_fds(5), test_info()).is_err());
    }
}
