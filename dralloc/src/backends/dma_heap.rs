// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! The kernel-direct backend.
//!
//! BOs are allocated from dma-heaps and are always linear unless block tiling is enabled.

use super::{ImportData, Layout, MapFlags, Metadata, Payload, UseFlags, Vma};
use crate::capability::Combinations;
use crate::descriptor::Descriptor;
use crate::dma_buf;
use crate::formats;
use crate::types::{Error, Format, Modifier, Result};
use crate::utils;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};

const SYSTEM_HEAP: &str = "system";
const SYSTEM_UNCACHED_HEAP: &str = "system-uncached";
const CMA_HEAPS: [&str; 2] = ["linux,cma", "reserved"];

const SIZE_ALIGN: u64 = 4096;

const SCANOUT_RENDER_FORMATS: [Format; 5] = [
    formats::ARGB8888,
    formats::XRGB8888,
    formats::ABGR8888,
    formats::XBGR8888,
    formats::RGB565,
];

const TEXTURE_ONLY_FORMATS: [Format; 4] = [
    formats::NV12,
    formats::NV21,
    formats::YVU420,
    formats::YVU420_ANDROID,
];

fn combinations(tiling: bool) -> Combinations {
    let mut combos = Combinations::new();

    combos.add(
        &SCANOUT_RENDER_FORMATS,
        formats::MOD_LINEAR,
        UseFlags::RENDER_MASK | UseFlags::SCANOUT,
    );
    combos.add(
        &TEXTURE_ONLY_FORMATS,
        formats::MOD_LINEAR,
        UseFlags::TEXTURE_MASK | UseFlags::SCANOUT,
    );

    combos.modify(
        formats::NV12,
        formats::MOD_LINEAR,
        UseFlags::HW_VIDEO_ENCODER
            | UseFlags::HW_VIDEO_DECODER
            | UseFlags::CAMERA_READ
            | UseFlags::CAMERA_WRITE,
    );
    combos.modify(
        formats::NV21,
        formats::MOD_LINEAR,
        UseFlags::HW_VIDEO_ENCODER,
    );
    combos.modify_linear();

    if tiling {
        let tiled = formats::MOD_ARM_16X16_BLOCK_U_INTERLEAVED;
        let untiled = UseFlags::SW_MASK | UseFlags::LINEAR;

        combos.add(&SCANOUT_RENDER_FORMATS, tiled, UseFlags::RENDER_MASK - untiled);
        combos.add(&TEXTURE_ONLY_FORMATS, tiled, UseFlags::TEXTURE_MASK - untiled);
        combos.modify(
            formats::NV12,
            tiled,
            UseFlags::HW_VIDEO_ENCODER | UseFlags::HW_VIDEO_DECODER,
        );
    }

    combos
}

/// Computes the layout of a new BO.
///
/// With `tiling`, BOs that are neither CPU-accessed nor scanned out use 16x16 block tiling.
/// Tiled and rendered BOs have their dimensions aligned to 16.
pub fn gen_layout(
    fmt: Format,
    width: u32,
    height: u32,
    use_flags: UseFlags,
    tiling: bool,
) -> Result<Layout> {
    let tiled = tiling && !use_flags.intersects(UseFlags::SW_MASK | UseFlags::SCANOUT);

    let (width, height) = if tiled || use_flags.contains(UseFlags::RENDERING) {
        (width.next_multiple_of(16), height.next_multiple_of(16))
    } else {
        (width, height)
    };

    let stride = formats::stride_from_format(fmt, width, 0)?;
    let mut layout = formats::packed_layout(fmt, stride, height)?;

    if tiled {
        layout.modifier = formats::MOD_ARM_16X16_BLOCK_U_INTERLEAVED;
    }

    layout.size = layout.size.next_multiple_of(SIZE_ALIGN);

    Ok(layout)
}

pub struct Backend {
    system_heap: OwnedFd,
    system_uncached_heap: OwnedFd,
    cma_heap: OwnedFd,
    tiling: bool,
    combos: Combinations,
}

impl Backend {
    /// Computes the layout of `desc` with a modifier it allows.
    fn layout_for(&self, desc: &Descriptor) -> Result<Layout> {
        let allows = |modifier: Modifier| {
            desc.modifiers.is_empty() || desc.modifiers.contains(&modifier)
        };

        let tiling = self.tiling && allows(formats::MOD_ARM_16X16_BLOCK_U_INTERLEAVED);
        let layout = gen_layout(
            desc.format,
            desc.width,
            desc.height,
            desc.use_flags,
            tiling,
        )?;

        if !allows(layout.modifier) {
            log::debug!("no allowed modifier for {} with {:?}", desc.format, desc.use_flags);
            return Error::unsupported();
        }

        Ok(layout)
    }

    fn select_heap(&self, use_flags: UseFlags) -> &OwnedFd {
        if use_flags.contains(UseFlags::SCANOUT) {
            &self.cma_heap
        } else if use_flags.intersects(UseFlags::SW_MASK) {
            &self.system_heap
        } else {
            &self.system_uncached_heap
        }
    }
}

impl super::Backend for Backend {
    fn name(&self) -> &'static str {
        "dma-heap"
    }

    fn combinations(&self) -> &Combinations {
        &self.combos
    }

    fn resolve_format(&self, fmt: Format, use_flags: UseFlags) -> Format {
        match fmt {
            // rendering drivers lack BGR565
            formats::BGR565 => formats::RGB565,
            _ => formats::resolve_flex(fmt, use_flags),
        }
    }

    fn create(&self, desc: &Descriptor) -> Result<(Payload, Layout)> {
        let layout = self.layout_for(desc)?;

        let heap = self.select_heap(desc.use_flags);
        let dmabuf = utils::dma_heap_alloc(heap, layout.size).inspect_err(|err| {
            log::error!("dma-heap allocation of {} bytes failed: {err}", layout.size);
        })?;

        let res = dma_buf::Resource::from_shared(dmabuf, layout.plane_count)?;
        res.set_name(&format!("{}x{} {}", desc.width, desc.height, desc.format));

        Ok((Payload::DmaBuf(res), layout))
    }

    fn import(&self, data: &ImportData) -> Result<(Payload, Layout)> {
        let res = dma_buf::Resource::from_borrowed(&data.fds)?;
        let (keys, sizes) = res.allocations()?;

        let mut layout = Layout::new()
            .modifier(data.modifier)
            .plane_count(data.plane_count());
        layout.offsets = data.offsets;
        layout.strides = data.strides;
        layout.derive_plane_sizes(&keys, &sizes)?;

        Ok((Payload::DmaBuf(res), layout))
    }

    fn plane_fd(&self, payload: &Payload, plane: usize) -> Result<OwnedFd> {
        payload.dma_buf()?.export(plane)
    }

    fn map(&self, payload: &Payload, meta: &Metadata, flags: MapFlags) -> Result<Vma> {
        dma_buf::map(payload.dma_buf()?, &meta.layout, flags)
    }

    fn unmap(&self, payload: &Payload, vma: Vma) -> Result<()> {
        dma_buf::unmap(payload.dma_buf()?, vma)
    }

    fn invalidate(&self, payload: &Payload, vma: &Vma) -> Result<()> {
        dma_buf::invalidate(payload.dma_buf()?, vma)
    }

    fn flush(&self, payload: &Payload, vma: &Vma) -> Result<()> {
        dma_buf::flush(payload.dma_buf()?, vma)
    }
}

pub struct Builder {
    heap_dir: PathBuf,
    system_heap_fd: Option<OwnedFd>,
    system_uncached_heap_fd: Option<OwnedFd>,
    cma_heap_fd: Option<OwnedFd>,
    tiling: bool,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            heap_dir: PathBuf::from(utils::DMA_HEAP_PATH),
            system_heap_fd: None,
            system_uncached_heap_fd: None,
            cma_heap_fd: None,
            tiling: false,
        }
    }
}

impl Builder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn heap_dir(mut self, heap_dir: impl AsRef<Path>) -> Self {
        self.heap_dir = PathBuf::from(heap_dir.as_ref());
        self
    }

    /// Uses the given heaps instead of opening them from the heap directory.
    pub fn heap_fds(
        mut self,
        system: OwnedFd,
        system_uncached: Option<OwnedFd>,
        cma: Option<OwnedFd>,
    ) -> Self {
        self.system_heap_fd = Some(system);
        self.system_uncached_heap_fd = system_uncached;
        self.cma_heap_fd = cma;
        self
    }

    pub fn tiling(mut self, tiling: bool) -> Self {
        self.tiling = tiling;
        self
    }

    fn open_heap(&self, name: &str) -> Option<OwnedFd> {
        utils::dma_heap_open(&self.heap_dir, name).ok()
    }

    pub fn build(mut self) -> Result<Backend> {
        let explicit = self.system_heap_fd.is_some();

        let system_heap = match self.system_heap_fd.take() {
            Some(fd) => fd,
            None => utils::dma_heap_open(&self.heap_dir, SYSTEM_HEAP).map_err(|err| {
                log::error!("failed to open the system heap: {err}");
                Error::NoDevice
            })?,
        };

        let system_uncached_heap = match self.system_uncached_heap_fd.take() {
            Some(fd) => Some(fd),
            None if !explicit => self.open_heap(SYSTEM_UNCACHED_HEAP),
            None => None,
        };
        let system_uncached_heap = match system_uncached_heap {
            Some(fd) => fd,
            None => {
                log::warn!("no system-uncached heap; falling back to system");
                system_heap.try_clone()?
            }
        };

        let cma_heap = match self.cma_heap_fd.take() {
            Some(fd) => Some(fd),
            None if !explicit => CMA_HEAPS.iter().find_map(|name| self.open_heap(name)),
            None => None,
        };
        let cma_heap = match cma_heap {
            Some(fd) => fd,
            None => {
                log::warn!("no cma heap; falling back to system");
                system_heap.try_clone()?
            }
        };

        log::info!("dma-heap backend initialized (tiling: {})", self.tiling);

        let backend = Backend {
            system_heap,
            system_uncached_heap,
            cma_heap,
            tiling: self.tiling,
            combos: combinations(self.tiling),
        };

        Ok(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::super::Backend as _;
    use super::*;
    use crate::capability::is_supported;

    fn memfd_backend() -> Backend {
        let system = utils::memfd_create("system", 0).unwrap();
        Builder::new().heap_fds(system, None, None).build().unwrap()
    }

    #[test]
    fn test_builder() {
        let dir = std::env::temp_dir().join("dralloc-no-such-heap-dir");
        let err = Builder::new().heap_dir(&dir).build().err().unwrap();
        assert!(matches!(err, Error::NoDevice));

        let backend = memfd_backend();
        assert_eq!(backend.name(), "dma-heap");
        assert_eq!(
            utils::file_id(&backend.system_heap).unwrap(),
            utils::file_id(&backend.cma_heap).unwrap()
        );
    }

    #[test]
    fn test_select_heap() {
        let system = utils::memfd_create("system", 0).unwrap();
        let uncached = utils::memfd_create("uncached", 0).unwrap();
        let cma = utils::memfd_create("cma", 0).unwrap();
        let ids = [&system, &uncached, &cma].map(|fd| utils::file_id(fd).unwrap());

        let backend = Builder::new()
            .heap_fds(system, Some(uncached), Some(cma))
            .build()
            .unwrap();

        let id = |flags| utils::file_id(backend.select_heap(flags)).unwrap();
        assert_eq!(id(UseFlags::SW_READ_OFTEN | UseFlags::TEXTURE), ids[0]);
        assert_eq!(id(UseFlags::TEXTURE), ids[1]);
        assert_eq!(id(UseFlags::SCANOUT | UseFlags::SW_WRITE_RARELY), ids[2]);
    }

    #[test]
    fn test_combinations() {
        let combos = combinations(false);

        let nv12 = UseFlags::TEXTURE | UseFlags::HW_VIDEO_DECODER | UseFlags::CAMERA_WRITE;
        assert!(combos.find(formats::NV12, nv12).is_some());
        assert!(combos.find(formats::NV21, nv12).is_none());
        assert!(combos
            .find(formats::NV21, UseFlags::HW_VIDEO_ENCODER)
            .is_some());
        assert!(combos.find(formats::NV12, UseFlags::RENDERING).is_none());
        assert!(combos.find(formats::XRGB8888, UseFlags::CURSOR).is_some());
        assert!(combos.find(formats::ABGR8888, UseFlags::CURSOR).is_none());
        assert!(combos.find(formats::R8, UseFlags::TEXTURE).is_none());

        let tiled = [formats::MOD_ARM_16X16_BLOCK_U_INTERLEAVED];
        assert!(combos
            .find_with_modifiers(formats::ABGR8888, UseFlags::TEXTURE, &tiled)
            .is_none());

        let combos = combinations(true);
        assert!(combos
            .find_with_modifiers(formats::ABGR8888, UseFlags::RENDERING, &tiled)
            .is_some());
        assert!(combos
            .find_with_modifiers(formats::NV12, UseFlags::HW_VIDEO_DECODER, &tiled)
            .is_some());
        for flags in [UseFlags::SW_READ_OFTEN, UseFlags::SCANOUT, UseFlags::LINEAR] {
            assert!(combos
                .find_with_modifiers(formats::ABGR8888, flags, &tiled)
                .is_none());
        }
    }

    #[test]
    fn test_layout_for() {
        let tiled = formats::MOD_ARM_16X16_BLOCK_U_INTERLEAVED;
        let desc = Descriptor::new()
            .size(64, 64)
            .format(formats::ABGR8888)
            .use_flags(UseFlags::TEXTURE);

        let backend = memfd_backend();
        assert_eq!(backend.layout_for(&desc).unwrap().modifier, formats::MOD_LINEAR);
        assert!(!is_supported(&backend, &desc.clone().modifiers(vec![tiled])));
        assert!(matches!(
            backend.layout_for(&desc.clone().modifiers(vec![tiled])),
            Err(Error::Unsupported)
        ));
        // rejected before the heap is asked
        assert!(matches!(
            backend.create(&desc.clone().modifiers(vec![tiled])),
            Err(Error::Unsupported)
        ));

        let system = utils::memfd_create("system", 0).unwrap();
        let backend = Builder::new()
            .heap_fds(system, None, None)
            .tiling(true)
            .build()
            .unwrap();
        assert!(is_supported(&backend, &desc.clone().modifiers(vec![tiled])));
        assert_eq!(backend.layout_for(&desc).unwrap().modifier, tiled);

        let linear = desc.clone().modifiers(vec![formats::MOD_LINEAR]);
        assert_eq!(backend.layout_for(&linear).unwrap().modifier, formats::MOD_LINEAR);
        let either = desc.clone().modifiers(vec![formats::MOD_LINEAR, tiled]);
        assert_eq!(backend.layout_for(&either).unwrap().modifier, tiled);

        // CPU access keeps the layout linear
        let sw = desc
            .use_flags(UseFlags::TEXTURE | UseFlags::SW_READ_OFTEN)
            .modifiers(vec![tiled]);
        assert!(!is_supported(&backend, &sw));
        assert!(matches!(backend.layout_for(&sw), Err(Error::Unsupported)));
    }

    #[test]
    fn test_resolve_format() {
        let backend = memfd_backend();
        assert_eq!(
            backend.resolve_format(formats::BGR565, UseFlags::TEXTURE),
            formats::RGB565
        );
        assert_eq!(
            backend.resolve_format(formats::FLEX_IMPLEMENTATION_DEFINED, UseFlags::CAMERA_READ),
            formats::NV12
        );
    }

    #[test]
    fn test_gen_layout() {
        let layout = gen_layout(formats::ABGR8888, 100, 50, UseFlags::TEXTURE, false).unwrap();
        assert_eq!(layout.modifier, formats::MOD_LINEAR);
        assert_eq!(layout.strides[0], 400);
        assert_eq!(layout.size, (400u64 * 50).next_multiple_of(SIZE_ALIGN));

        let layout = gen_layout(formats::ABGR8888, 100, 50, UseFlags::RENDERING, false).unwrap();
        assert_eq!(layout.modifier, formats::MOD_LINEAR);
        assert_eq!(layout.strides[0], 112 * 4);
        assert_eq!(layout.sizes[0], 112 * 4 * 64);

        let layout = gen_layout(formats::ABGR8888, 100, 50, UseFlags::TEXTURE, true).unwrap();
        assert_eq!(layout.modifier, formats::MOD_ARM_16X16_BLOCK_U_INTERLEAVED);
        assert_eq!(layout.strides[0], 112 * 4);

        // CPU access and scanout keep the layout linear
        for flags in [UseFlags::SW_READ_RARELY, UseFlags::SCANOUT] {
            let layout = gen_layout(formats::ABGR8888, 100, 50, flags, true).unwrap();
            assert_eq!(layout.modifier, formats::MOD_LINEAR);
        }

        let flags = UseFlags::TEXTURE | UseFlags::HW_VIDEO_DECODER;
        let layout = gen_layout(formats::NV12, 1920, 1080, flags, false).unwrap();
        assert_eq!(layout.plane_count, 2);
        assert!(layout.strides[0] >= 1920);
        assert_eq!(layout.strides[1], layout.strides[0]);
        assert!(layout.size >= layout.sizes[0] + layout.sizes[1]);
        assert_eq!(layout.size % SIZE_ALIGN, 0);

        assert!(gen_layout(formats::INVALID, 16, 16, UseFlags::TEXTURE, false).is_err());
    }

    #[test]
    fn test_create() {
        let backend = memfd_backend();
        let desc = Descriptor::new()
            .size(64, 64)
            .format(formats::ABGR8888)
            .use_flags(UseFlags::TEXTURE);

        // a memfd does not implement the dma-heap ioctl; the errno must be preserved
        let err = backend.create(&desc).err().unwrap();
        assert_eq!(err.errno(), nix::errno::Errno::ENOTTY as i32);
    }

    #[test]
    fn test_import() {
        let backend = memfd_backend();
        let memfd = utils::memfd_create("bo", 8192).unwrap();
        let fd = std::os::fd::AsFd::as_fd(&memfd);

        let mut data = ImportData {
            fds: vec![fd, fd],
            width: 64,
            height: 64,
            format: formats::NV12,
            modifier: formats::MOD_LINEAR,
            offsets: [0; super::super::MAX_PLANES],
            strides: [0; super::super::MAX_PLANES],
        };
        data.offsets[1] = 4096;
        data.strides[..2].copy_from_slice(&[64, 64]);

        let (payload, layout) = backend.import(&data).unwrap();
        assert_eq!(layout.plane_count, 2);
        assert_eq!(layout.sizes[..2], [4096, 4096]);
        assert_eq!(layout.size, 8192);

        let exported = backend.plane_fd(&payload, 1).unwrap();
        assert_eq!(
            utils::file_id(&exported).unwrap(),
            utils::file_id(&memfd).unwrap()
        );
    }
}
