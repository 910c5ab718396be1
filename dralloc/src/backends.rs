// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

pub mod dma_heap;
#[cfg(feature = "dri")]
pub mod dri;

use super::capability::Combinations;
use super::descriptor::Descriptor;
use super::dma_buf;
use super::formats;
use super::types::{Access, Error, Format, Mapping, Modifier, Result, Size};
use std::ffi::c_void;
use std::os::fd::{BorrowedFd, OwnedFd};
use std::ptr::NonNull;

/// The maximum number of planes of a BO.
pub const MAX_PLANES: usize = 4;

bitflags::bitflags! {
    /// Intended uses of a BO.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct UseFlags: u64 {
        const SCANOUT = 1 << 0;
        const CURSOR = 1 << 1;
        const RENDERING = 1 << 2;
        const LINEAR = 1 << 3;
        const TEXTURE = 1 << 4;
        const CAMERA_WRITE = 1 << 5;
        const CAMERA_READ = 1 << 6;
        const PROTECTED = 1 << 7;
        const SW_READ_OFTEN = 1 << 8;
        const SW_READ_RARELY = 1 << 9;
        const SW_WRITE_OFTEN = 1 << 10;
        const SW_WRITE_RARELY = 1 << 11;
        const HW_VIDEO_DECODER = 1 << 12;
        const HW_VIDEO_ENCODER = 1 << 13;
        const TEST_ALLOC = 1 << 15;
        const FRONT_RENDERING = 1 << 16;
        const RENDERSCRIPT = 1 << 17;
        const GPU_DATA_BUFFER = 1 << 18;
        const SENSOR_DIRECT_DATA = 1 << 19;
        const FRAMEBUFFER = 1 << 20;

        const SW_MASK = Self::SW_READ_OFTEN.bits()
            | Self::SW_READ_RARELY.bits()
            | Self::SW_WRITE_OFTEN.bits()
            | Self::SW_WRITE_RARELY.bits()
            | Self::FRONT_RENDERING.bits();
        const TEXTURE_MASK = Self::SW_MASK.bits()
            | Self::LINEAR.bits()
            | Self::RENDERSCRIPT.bits()
            | Self::TEXTURE.bits();
        const RENDER_MASK = Self::TEXTURE_MASK.bits() | Self::RENDERING.bits();
    }
}

bitflags::bitflags! {
    /// CPU access of a mapping.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct MapFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

impl MapFlags {
    pub(crate) fn access(&self) -> Option<Access> {
        if self.contains(Self::READ | Self::WRITE) {
            Some(Access::ReadWrite)
        } else if self.contains(Self::READ) {
            Some(Access::Read)
        } else if self.contains(Self::WRITE) {
            Some(Access::Write)
        } else {
            None
        }
    }
}

/// The physical layout of a BO.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct Layout {
    pub size: Size,
    pub modifier: Modifier,
    pub plane_count: u32,
    pub offsets: [Size; MAX_PLANES],
    pub strides: [Size; MAX_PLANES],
    pub sizes: [Size; MAX_PLANES],
}

impl Layout {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn size(mut self, size: Size) -> Self {
        self.size = size;
        self
    }

    pub fn modifier(mut self, modifier: Modifier) -> Self {
        self.modifier = modifier;
        self
    }

    pub fn plane_count(mut self, plane_count: u32) -> Self {
        self.plane_count = plane_count;
        self
    }

    pub fn offset(mut self, plane: usize, offset: Size) -> Self {
        self.offsets[plane] = offset;
        self
    }

    pub fn stride(mut self, plane: usize, stride: Size) -> Self {
        self.strides[plane] = stride;
        self
    }

    pub fn plane_size(mut self, plane: usize, size: Size) -> Self {
        self.sizes[plane] = size;
        self
    }

    /// Derives plane sizes from plane offsets.
    ///
    /// A plane extends to the next higher offset of a plane sharing its allocation key, or to the
    /// end of its allocation.  The total size becomes the sum of plane sizes.  Distinct
    /// allocations that happen to share a key are indistinguishable here.
    pub fn derive_plane_sizes(&mut self, keys: &[u64], allocation_sizes: &[Size]) -> Result<()> {
        let count = self.plane_count as usize;
        if count == 0 || count > MAX_PLANES || keys.len() < count || allocation_sizes.len() < count
        {
            return Error::invalid();
        }

        let mut total: Size = 0;
        for plane in 0..count {
            let offset = self.offsets[plane];
            let mut next_offset = allocation_sizes[plane];
            for other in 0..count {
                let other_offset = self.offsets[other];
                if other_offset < next_offset
                    && other_offset > offset
                    && keys[other] == keys[plane]
                {
                    next_offset = other_offset;
                }
            }

            let size = next_offset
                .checked_sub(offset)
                .ok_or(Error::InvalidArgument)?;
            self.sizes[plane] = size;
            total += size;
        }

        self.size = total;

        Ok(())
    }
}

/// The geometry of a BO as seen by its backend.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Metadata {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub layout: Layout,
}

/// Backend-private state of a BO.  Dropping it releases the backend resources.
pub enum Payload {
    DmaBuf(dma_buf::Resource),
    #[cfg(feature = "dri")]
    Dri(dri::Image),
}

impl Payload {
    pub fn dma_buf(&self) -> Result<&dma_buf::Resource> {
        match self {
            Payload::DmaBuf(res) => Ok(res),
            #[allow(unreachable_patterns)]
            _ => Error::invalid(),
        }
    }

    #[cfg(feature = "dri")]
    pub(crate) fn dri(&self) -> Result<&dri::Image> {
        match self {
            Payload::Dri(img) => Ok(img),
            _ => Error::invalid(),
        }
    }
}

/// The inputs to [`Backend::import`].
pub struct ImportData<'a> {
    pub fds: Vec<BorrowedFd<'a>>,
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub modifier: Modifier,
    pub offsets: [Size; MAX_PLANES],
    pub strides: [Size; MAX_PLANES],
}

impl ImportData<'_> {
    pub fn plane_count(&self) -> u32 {
        self.fds.len() as u32
    }
}

/// A CPU mapping of a BO.
///
/// Planes in distinct allocations have distinct mappings.
pub struct Vma {
    pub(crate) mappings: Vec<Mapping>,
    // index into mappings
    pub(crate) plane_mappings: [usize; MAX_PLANES],
    pub(crate) map_strides: [Size; MAX_PLANES],
    pub(crate) token: Option<NonNull<c_void>>,
    pub(crate) map_flags: MapFlags,
}

// SAFETY: token is only dereferenced by the backend that created the vma, under its own lock
unsafe impl Send for Vma {}

impl Vma {
    /// Creates a vma where all planes share one mapping.
    pub(crate) fn new(mapping: Mapping, map_strides: [Size; MAX_PLANES], flags: MapFlags) -> Self {
        Self::with_mappings(vec![mapping], [0; MAX_PLANES], map_strides, flags)
    }

    pub(crate) fn with_mappings(
        mappings: Vec<Mapping>,
        plane_mappings: [usize; MAX_PLANES],
        map_strides: [Size; MAX_PLANES],
        flags: MapFlags,
    ) -> Self {
        Self {
            mappings,
            plane_mappings,
            map_strides,
            token: None,
            map_flags: flags,
        }
    }

    pub(crate) fn token(mut self, token: NonNull<c_void>) -> Self {
        self.token = Some(token);
        self
    }

    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }

    /// Returns the mapping holding `plane`.
    pub fn plane_mapping(&self, plane: usize) -> Option<Mapping> {
        let idx = *self.plane_mappings.get(plane)?;
        self.mappings.get(idx).copied()
    }

    pub fn map_strides(&self) -> &[Size; MAX_PLANES] {
        &self.map_strides
    }
}

/// A buffer allocation backend.
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns the supported (format, modifier, use flags) combinations.
    fn combinations(&self) -> &Combinations;

    /// Resolves a flexible format to a concrete one.
    fn resolve_format(&self, fmt: Format, use_flags: UseFlags) -> Format {
        formats::resolve_flex(fmt, use_flags)
    }

    /// Returns the plane count of a format with a modifier.  Backends that cannot tell return
    /// `Error::Unsupported` and callers fall back to [`formats::num_planes`].
    fn num_planes_for_modifier(&self, _fmt: Format, _modifier: Modifier) -> Result<u32> {
        Error::unsupported()
    }

    fn create(&self, desc: &Descriptor) -> Result<(Payload, Layout)>;

    fn import(&self, data: &ImportData) -> Result<(Payload, Layout)>;

    /// Returns a new fd for the dma-buf backing a plane.
    fn plane_fd(&self, payload: &Payload, plane: usize) -> Result<OwnedFd>;

    fn map(&self, payload: &Payload, meta: &Metadata, flags: MapFlags) -> Result<Vma>;

    fn unmap(&self, payload: &Payload, vma: Vma) -> Result<()>;

    fn invalidate(&self, _payload: &Payload, _vma: &Vma) -> Result<()> {
        Ok(())
    }

    fn flush(&self, _payload: &Payload, _vma: &Vma) -> Result<()> {
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_use_flags() {
        assert!(UseFlags::RENDER_MASK.contains(UseFlags::TEXTURE_MASK));
        assert!(UseFlags::TEXTURE_MASK.contains(UseFlags::SW_MASK));
        assert!(!UseFlags::TEXTURE_MASK.contains(UseFlags::RENDERING));
        assert!(!UseFlags::RENDER_MASK.contains(UseFlags::SCANOUT));
    }

    #[test]
    fn test_map_flags() {
        assert_eq!(MapFlags::READ.access(), Some(Access::Read));
        assert_eq!(MapFlags::WRITE.access(), Some(Access::Write));
        assert_eq!((MapFlags::READ | MapFlags::WRITE).access(), Some(Access::ReadWrite));
        assert_eq!(MapFlags::empty().access(), None);
    }

    #[test]
    fn test_layout() {
        let layout = Layout::new()
            .size(100)
            .modifier(formats::MOD_LINEAR)
            .plane_count(2)
            .offset(1, 60)
            .stride(0, 10)
            .stride(1, 10);
        assert_eq!(layout.offsets, [0, 60, 0, 0]);
        assert_eq!(layout.strides, [10, 10, 0, 0]);
        assert_eq!(layout.sizes, [0; MAX_PLANES]);
    }

    #[test]
    fn test_derive_plane_sizes() {
        // two planes in one allocation
        let mut layout = Layout::new().plane_count(2).offset(1, 60);
        layout.derive_plane_sizes(&[7, 7], &[100, 100]).unwrap();
        assert_eq!(layout.sizes[..2], [60, 40]);
        assert_eq!(layout.size, 100);

        // planes in separate allocations
        let mut layout = Layout::new().plane_count(2).offset(1, 60);
        layout.derive_plane_sizes(&[7, 8], &[100, 80]).unwrap();
        assert_eq!(layout.sizes[..2], [100, 20]);
        assert_eq!(layout.size, 120);

        // three planes, out of order
        let mut layout = Layout::new()
            .plane_count(3)
            .offset(0, 0)
            .offset(1, 80)
            .offset(2, 64);
        layout.derive_plane_sizes(&[1, 1, 1], &[96, 96, 96]).unwrap();
        assert_eq!(layout.sizes[..3], [64, 16, 16]);

        // distinct allocations with equal keys are treated as one
        let mut layout = Layout::new().plane_count(2).offset(1, 60);
        layout.derive_plane_sizes(&[7, 7], &[100, 80]).unwrap();
        assert_eq!(layout.sizes[..2], [60, 20]);

        let mut layout = Layout::new().plane_count(1).offset(0, 200);
        assert!(layout.derive_plane_sizes(&[1], &[100]).is_err());

        let mut layout = Layout::new();
        assert!(layout.derive_plane_sizes(&[], &[]).is_err());
    }
}
