// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! Device-related types.
//!
//! This module defines `Device` and `Builder`.

use super::backends::{self, Backend, MapFlags};
use super::bo::{Bo, BufferId, MappedPlane};
use super::capability;
use super::descriptor::Descriptor;
use super::formats;
use super::handle::Handle;
#[cfg(feature = "drm")]
use super::node::Node;
use super::registry::{self, Registry};
use super::types::{Error, Format, Modifier, Rect, Result, Size};
#[cfg(feature = "drm")]
use std::os::fd::AsFd;
use std::os::fd::{BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;

/// The backend of a device.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum BackendKind {
    /// The mediated backend when it initializes, else the kernel-direct backend.
    #[default]
    Auto,
    /// Allocates from dma-heaps.
    KernelDirect,
    /// Allocates through the userspace rendering driver.
    Mediated,
}

/// A locked YCbCr BO.
#[derive(Clone, Copy, Debug)]
pub struct Ycbcr {
    pub y: NonNull<u8>,
    pub cb: NonNull<u8>,
    pub cr: NonNull<u8>,
    pub y_stride: Size,
    pub c_stride: Size,
    /// The distance between two chroma samples in bytes.
    pub chroma_step: u32,
}

/// A device.
///
/// A device owns a backend and the BOs registered in this process.
pub struct Device {
    backend: Arc<dyn Backend>,
    registry: Registry,
    #[cfg(feature = "drm")]
    node: Option<Node>,
}

impl Device {
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Resolves the device format of a descriptor for this backend.
    pub fn resolve(&self, desc: &Descriptor) -> Descriptor {
        let fmt = self.backend.resolve_format(desc.format, desc.use_flags);
        desc.clone().format(fmt)
    }

    pub fn is_supported(&self, desc: &Descriptor) -> bool {
        desc.is_valid() && capability::is_supported(self.backend.as_ref(), &self.resolve(desc))
    }

    /// Allocates and registers a BO.
    ///
    /// When the request is not supported and asks for scanout along with texturing, the
    /// allocation is retried once without scanout.
    pub fn allocate(&self, desc: &Descriptor) -> Result<Handle> {
        if !desc.is_valid() {
            return Error::invalid();
        }

        let mut desc = self.resolve(desc);
        if !capability::is_supported(self.backend.as_ref(), &desc) {
            let relaxed = capability::relax_scanout(&desc)
                .filter(|relaxed| capability::is_supported(self.backend.as_ref(), relaxed));
            let Some(relaxed) = relaxed else {
                log::debug!(
                    "unsupported {}x{} {} with {:?}",
                    desc.width,
                    desc.height,
                    desc.format,
                    desc.use_flags
                );
                return Error::unsupported();
            };

            log::debug!("falling back to composition for {}", desc.format);
            desc = relaxed;
        }

        let bo = Bo::new(self.backend.clone(), &desc)?;

        self.registry.insert(bo)
    }

    /// Imports a BO without registering it.
    pub fn import(&self, handle: &Handle) -> Result<Bo> {
        Bo::with_handle(self.backend.clone(), handle)
    }

    /// Takes a reference to a BO, importing it on first sight.
    pub fn retain(&self, handle: &Handle) -> Result<()> {
        self.registry.retain(handle, |handle| self.import(handle))
    }

    pub fn release(&self, handle: &Handle) -> Result<()> {
        self.registry.release(handle)
    }

    pub fn refcount(&self, handle: &Handle) -> Result<u32> {
        self.registry.refcount(handle)
    }

    pub fn lock(
        &self,
        handle: &Handle,
        rect: Rect,
        flags: MapFlags,
        fence: Option<BorrowedFd>,
    ) -> Result<Vec<MappedPlane>> {
        // flexible YCbCr must be locked with lock_ycbcr
        if handle.info.hal_format == formats::hal::YCBCR_420_888 {
            return Error::invalid();
        }

        self.registry.lock(handle, rect, flags, fence)
    }

    pub fn lock_ycbcr(
        &self,
        handle: &Handle,
        rect: Rect,
        flags: MapFlags,
        fence: Option<BorrowedFd>,
    ) -> Result<Ycbcr> {
        match handle.info.hal_format {
            formats::hal::YCBCR_420_888
            | formats::hal::YV12
            | formats::hal::IMPLEMENTATION_DEFINED => (),
            _ => return Error::invalid(),
        }

        let planes = self.registry.lock(handle, rect, flags, fence)?;
        match ycbcr_from_planes(handle.info.format, &planes) {
            Some(ycbcr) => Ok(ycbcr),
            None => {
                self.registry.unlock(handle)?;
                Error::invalid()
            }
        }
    }

    /// Unlocks a BO.  There is never a release fence.
    pub fn unlock(&self, handle: &Handle) -> Result<Option<OwnedFd>> {
        self.registry.unlock(handle)
    }

    /// Waits for a release fence returned by [`Device::unlock`].
    pub fn wait_fence(&self, fence: BorrowedFd) -> Result<()> {
        registry::wait_fence(fence)
    }

    /// Returns the plane count of a format with a modifier.
    pub fn num_planes(&self, fmt: Format, modifier: Modifier) -> u32 {
        match self.backend.num_planes_for_modifier(fmt, modifier) {
            Ok(count) => count,
            Err(_) => formats::num_planes(fmt),
        }
    }

    /// Returns an id of the backing storage of a BO, identical in every process.
    pub fn backing_store(&self, handle: &Handle) -> Result<u64> {
        Ok(BufferId::from_handle(handle)?.ino)
    }

    #[cfg(feature = "drm")]
    fn node(&self) -> Result<&Node> {
        self.node.as_ref().ok_or(Error::NoDevice)
    }

    #[cfg(feature = "drm")]
    pub fn drm_fd(&self) -> Result<BorrowedFd<'_>> {
        Ok(self.node()?.as_fd())
    }

    #[cfg(feature = "drm")]
    pub fn set_master(&self) -> Result<()> {
        self.node()?.set_master()
    }

    #[cfg(feature = "drm")]
    pub fn drop_master(&self) -> Result<()> {
        self.node()?.drop_master()
    }

    #[cfg(not(feature = "drm"))]
    pub fn drm_fd(&self) -> Result<BorrowedFd<'_>> {
        Err(Error::NoDevice)
    }

    #[cfg(not(feature = "drm"))]
    pub fn set_master(&self) -> Result<()> {
        Err(Error::NoDevice)
    }

    #[cfg(not(feature = "drm"))]
    pub fn drop_master(&self) -> Result<()> {
        Err(Error::NoDevice)
    }
}

fn ycbcr_from_planes(fmt: Format, planes: &[MappedPlane]) -> Option<Ycbcr> {
    let plane = |idx: usize| planes.get(idx).copied();
    // SAFETY: interleaved chroma planes have at least 2 bytes
    let next = |p: MappedPlane| NonNull::new(unsafe { p.ptr.as_ptr().add(1) });

    let ycbcr = match fmt {
        formats::NV12 => {
            let (y, c) = (plane(0)?, plane(1)?);
            Ycbcr {
                y: y.ptr,
                cb: c.ptr,
                cr: next(c)?,
                y_stride: y.stride,
                c_stride: c.stride,
                chroma_step: 2,
            }
        }
        formats::NV21 => {
            let (y, c) = (plane(0)?, plane(1)?);
            Ycbcr {
                y: y.ptr,
                cb: next(c)?,
                cr: c.ptr,
                y_stride: y.stride,
                c_stride: c.stride,
                chroma_step: 2,
            }
        }
        formats::YVU420 | formats::YVU420_ANDROID => {
            let (y, cr, cb) = (plane(0)?, plane(1)?, plane(2)?);
            Ycbcr {
                y: y.ptr,
                cb: cb.ptr,
                cr: cr.ptr,
                y_stride: y.stride,
                c_stride: cr.stride,
                chroma_step: 1,
            }
        }
        _ => return None,
    };

    Some(ycbcr)
}

/// A device builder.
#[derive(Default)]
pub struct Builder {
    kind: BackendKind,
    node_path: Option<PathBuf>,
    device_id: Option<u64>,
    dri_dir: Option<PathBuf>,
    heap_dir: Option<PathBuf>,
    tiling: bool,
    backend: Option<Arc<dyn Backend>>,
}

impl Builder {
    /// Creates a device builder.
    pub fn new() -> Self {
        Default::default()
    }

    pub fn kind(mut self, kind: BackendKind) -> Self {
        self.kind = kind;
        self
    }

    /// Selects the DRM node by path.
    pub fn node_path(mut self, node_path: impl AsRef<Path>) -> Self {
        self.node_path = Some(PathBuf::from(node_path.as_ref()));
        self
    }

    /// Selects the DRM node by device id.
    pub fn device_id(mut self, device_id: u64) -> Self {
        self.device_id = Some(device_id);
        self
    }

    pub fn dri_dir(mut self, dri_dir: impl AsRef<Path>) -> Self {
        self.dri_dir = Some(PathBuf::from(dri_dir.as_ref()));
        self
    }

    pub fn heap_dir(mut self, heap_dir: impl AsRef<Path>) -> Self {
        self.heap_dir = Some(PathBuf::from(heap_dir.as_ref()));
        self
    }

    /// Enables block tiling on the kernel-direct backend.
    pub fn tiling(mut self, tiling: bool) -> Self {
        self.tiling = tiling;
        self
    }

    /// Uses an already built backend.
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    fn build_kernel_direct(&self) -> Result<Arc<dyn Backend>> {
        let mut builder = backends::dma_heap::Builder::new().tiling(self.tiling);
        if let Some(heap_dir) = &self.heap_dir {
            builder = builder.heap_dir(heap_dir);
        }

        Ok(Arc::new(builder.build()?))
    }

    #[cfg(feature = "dri")]
    fn build_mediated(&self, node: Option<&NodeRef>) -> Result<Arc<dyn Backend>> {
        let mut builder = backends::dri::Builder::new();
        if let Some(node) = node {
            builder = builder.node(node.try_clone()?);
        }
        if let Some(dri_dir) = &self.dri_dir {
            builder = builder.dri_dir(dri_dir);
        }

        Ok(Arc::new(builder.build()?))
    }

    #[cfg(not(feature = "dri"))]
    fn build_mediated(&self, _node: Option<&NodeRef>) -> Result<Arc<dyn Backend>> {
        log::error!("dralloc is built without the dri backend");
        Err(Error::NoDevice)
    }

    fn build_backend(&self, node: Option<&NodeRef>) -> Result<Arc<dyn Backend>> {
        if let Some(backend) = &self.backend {
            return Ok(backend.clone());
        }

        match self.kind {
            BackendKind::KernelDirect => self.build_kernel_direct(),
            BackendKind::Mediated => self.build_mediated(node),
            BackendKind::Auto => self.build_mediated(node).or_else(|err| {
                log::info!("dri backend unavailable ({err}); using dma-heap");
                self.build_kernel_direct()
            }),
        }
    }

    /// Builds a device.
    pub fn build(self) -> Result<Arc<Device>> {
        #[cfg(feature = "drm")]
        let node = match Node::open(self.node_path.as_deref(), self.device_id) {
            Ok(node) => Some(node),
            Err(err) => {
                log::warn!("no DRM node: {err}");
                None
            }
        };
        #[cfg(not(feature = "drm"))]
        let node: Option<NodeRef> = None;

        let backend = self.build_backend(node.as_ref())?;
        log::info!("using the {} backend", backend.name());

        let device = Device {
            backend,
            registry: Registry::new(),
            #[cfg(feature = "drm")]
            node,
        };

        Ok(Arc::new(device))
    }
}

#[cfg(feature = "drm")]
type NodeRef = Node;
#[cfg(not(feature = "drm"))]
type NodeRef = ();
