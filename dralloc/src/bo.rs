// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

use super::backends::{Backend, ImportData, MapFlags, Metadata, Payload, Vma, MAX_PLANES};
use super::descriptor::Descriptor;
use super::formats;
use super::handle::{Handle, HandleInfo};
use super::types::{Error, Rect, Result, Size};
use super::utils;
use std::os::fd::{AsFd, OwnedFd};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, PoisonError};

/// The process-independent identity of a BO.
///
/// It is the (st_dev, st_ino) pair of the dma-buf of plane 0.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct BufferId {
    pub dev: u64,
    pub ino: u64,
}

impl BufferId {
    pub fn from_fd(fd: impl AsFd) -> Result<Self> {
        let (dev, ino) = utils::file_id(fd)?;
        Ok(Self { dev, ino })
    }

    pub fn from_handle(handle: &Handle) -> Result<Self> {
        let fd = handle.fds.first().ok_or(Error::InvalidArgument)?;
        Self::from_fd(fd)
    }
}

/// A CPU-accessible plane of a locked BO.
#[derive(Clone, Copy, Debug)]
pub struct MappedPlane {
    pub ptr: NonNull<u8>,
    pub stride: Size,
}

struct MappingState {
    lock_count: u32,
    vma: Option<Vma>,
}

/// A buffer object.  Backend resources are released when it is dropped.
pub struct Bo {
    backend: Arc<dyn Backend>,
    info: HandleInfo,

    // dropped after the vma is unmapped
    payload: Payload,
    metadata: Metadata,

    state: Mutex<MappingState>,
}

impl Bo {
    /// Creates a BO.  `desc` must carry the format resolved by `backend`.
    pub fn new(backend: Arc<dyn Backend>, desc: &Descriptor) -> Result<Self> {
        let (payload, layout) = backend.create(desc)?;

        let pixel_stride = match formats::bytes_per_pixel(desc.format, 0) {
            Ok(bpp) if bpp > 0 => u32::try_from(layout.strides[0] / Size::from(bpp))?,
            _ => 0,
        };

        let info = HandleInfo {
            hal_format: desc.hal_format,
            format: desc.format,
            width: desc.width,
            height: desc.height,
            producer_usage: desc.producer_usage,
            consumer_usage: desc.consumer_usage,
            use_flags: desc.use_flags,
            plane_count: layout.plane_count,
            strides: layout.strides,
            offsets: layout.offsets,
            sizes: layout.sizes,
            size: layout.size,
            pixel_stride,
            modifier: layout.modifier,
        };

        let metadata = Metadata {
            width: desc.width,
            height: desc.height,
            format: desc.format,
            layout,
        };

        Ok(Self::with_payload(backend, info, payload, metadata))
    }

    /// Imports a BO from a handle.
    ///
    /// The handle metadata is validated against the format and the dma-bufs before the backend
    /// sees it.
    pub fn with_handle(backend: Arc<dyn Backend>, handle: &Handle) -> Result<Self> {
        validate_handle(backend.as_ref(), handle)?;

        let info = handle.info;
        let data = ImportData {
            fds: handle.fds(),
            width: info.width,
            height: info.height,
            format: info.format,
            modifier: info.modifier,
            offsets: info.offsets,
            strides: info.strides,
        };

        let (payload, mut layout) = backend.import(&data)?;
        if layout.plane_count != info.plane_count {
            log::debug!(
                "imported {} planes from a handle with {}",
                layout.plane_count,
                info.plane_count
            );
            return Error::invalid();
        }

        // the exporter knows the layout better than the heuristics
        layout.strides = info.strides;
        layout.offsets = info.offsets;

        let metadata = Metadata {
            width: info.width,
            height: info.height,
            format: info.format,
            layout,
        };

        Ok(Self::with_payload(backend, info, payload, metadata))
    }

    fn with_payload(
        backend: Arc<dyn Backend>,
        info: HandleInfo,
        payload: Payload,
        metadata: Metadata,
    ) -> Self {
        Self {
            backend,
            info,
            payload,
            metadata,
            state: Mutex::new(MappingState {
                lock_count: 0,
                vma: None,
            }),
        }
    }

    pub fn info(&self) -> &HandleInfo {
        &self.info
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn plane_fd(&self, plane: usize) -> Result<OwnedFd> {
        if plane >= self.metadata.layout.plane_count as usize {
            return Error::invalid();
        }

        self.backend.plane_fd(&self.payload, plane)
    }

    /// Exports the BO as a handle.
    pub fn export(&self) -> Result<Handle> {
        let fds = (0..self.info.plane_count as usize)
            .map(|plane| self.plane_fd(plane))
            .collect::<Result<Vec<_>>>()?;

        Handle::new(fds, self.info)
    }

    pub fn id(&self) -> Result<BufferId> {
        BufferId::from_fd(self.plane_fd(0)?)
    }

    /// Maps the BO for CPU access.
    ///
    /// The first lock maps the BO and later locks share the mapping.  Caches are invalidated on
    /// every lock for reading.
    pub fn lock(&self, rect: Rect, flags: MapFlags) -> Result<Vec<MappedPlane>> {
        if flags.is_empty() || !rect.fits(self.metadata.width, self.metadata.height) {
            return Error::invalid();
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if state.vma.is_none() {
            let vma = self.backend.map(&self.payload, &self.metadata, flags)?;
            state.vma = Some(vma);
        }
        let Some(vma) = state.vma.as_ref() else {
            return Error::ctx("no mapping");
        };

        if !vma.map_flags.contains(flags) {
            log::debug!("lock flags {flags:?} exceed the mapping flags {:?}", vma.map_flags);
            if state.lock_count == 0 {
                if let Some(vma) = state.vma.take() {
                    self.backend.unmap(&self.payload, vma)?;
                }
            }
            return Error::invalid();
        }

        if flags.contains(MapFlags::READ) {
            self.backend.invalidate(&self.payload, vma)?;
        }

        let planes = self.mapped_planes(vma)?;
        state.lock_count += 1;

        Ok(planes)
    }

    fn mapped_planes(&self, vma: &Vma) -> Result<Vec<MappedPlane>> {
        let layout = &self.metadata.layout;

        let mut planes = Vec::with_capacity(layout.plane_count as usize);
        for plane in 0..(layout.plane_count as usize).min(MAX_PLANES) {
            let mapping = vma
                .plane_mapping(plane)
                .ok_or(Error::Context("plane without a mapping"))?;
            let base = mapping.ptr.cast::<u8>();

            let offset = usize::try_from(layout.offsets[plane])?;
            if offset >= mapping.len.get() {
                return Error::ctx("plane outside of the mapping");
            }

            // SAFETY: offset is within the mapping
            let ptr = unsafe { base.as_ptr().add(offset) };
            let ptr = NonNull::new(ptr).ok_or(Error::Context("null plane address"))?;
            planes.push(MappedPlane {
                ptr,
                stride: vma.map_strides[plane],
            });
        }

        Ok(planes)
    }

    /// Ends a CPU access started by [`Bo::lock`].
    ///
    /// Caches are flushed for writing, and the last unlock unmaps the BO.
    pub fn unlock(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.lock_count == 0 {
            return Error::invalid();
        }

        let Some(vma) = state.vma.as_ref() else {
            return Error::ctx("no mapping");
        };
        if vma.map_flags.contains(MapFlags::WRITE) {
            self.backend.flush(&self.payload, vma)?;
        }

        state.lock_count -= 1;
        if state.lock_count == 0 {
            if let Some(vma) = state.vma.take() {
                self.backend.unmap(&self.payload, vma)?;
            }
        }

        Ok(())
    }

    pub fn lock_count(&self) -> u32 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .lock_count
    }
}

fn validate_handle(backend: &dyn Backend, handle: &Handle) -> Result<()> {
    let info = &handle.info;
    let count = info.plane_count as usize;
    if count == 0 || count > MAX_PLANES || handle.fds.len() != count {
        return Error::invalid();
    }

    let expected = if info.modifier.is_linear() || info.modifier.is_invalid() {
        formats::num_planes(info.format)
    } else {
        match backend.num_planes_for_modifier(info.format, info.modifier) {
            Err(Error::Unsupported) => formats::num_planes(info.format),
            res => res?,
        }
    };
    if info.plane_count != expected {
        log::debug!(
            "handle of {} has {} planes instead of {expected}",
            info.format,
            info.plane_count
        );
        return Error::invalid();
    }

    for (plane, fd) in handle.fds.iter().enumerate() {
        let end = info.offsets[plane]
            .checked_add(info.sizes[plane])
            .ok_or(Error::InvalidArgument)?;
        if end > utils::seek_end(fd)? {
            log::debug!("plane {plane} of the handle is outside of its dma-buf");
            return Error::invalid();
        }
    }

    Ok(())
}

impl Drop for Bo {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(vma) = state.vma.take() {
            if let Err(err) = self.backend.unmap(&self.payload, vma) {
                log::error!("failed to unmap a locked BO: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{fake, UseFlags};
    use std::fs::File;
    use std::os::unix::fs::FileExt;
    use std::sync::atomic::Ordering;

    fn fake_backend() -> Arc<dyn Backend> {
        Arc::new(fake::Backend::new())
    }

    fn nv12_desc() -> Descriptor {
        Descriptor::new()
            .size(1920, 1080)
            .format(formats::NV12)
            .use_flags(UseFlags::TEXTURE | UseFlags::HW_VIDEO_DECODER)
    }

    #[test]
    fn test_new() {
        let bo = Bo::new(fake_backend(), &nv12_desc()).unwrap();
        let info = bo.info();
        assert_eq!(info.plane_count, 2);
        assert!(info.strides[0] >= 1920);
        assert_eq!(info.strides[1], info.strides[0]);
        assert!(info.size >= info.sizes[0] + info.sizes[1]);
        assert_eq!(info.pixel_stride as Size, info.strides[0]);

        assert!(bo.plane_fd(1).is_ok());
        assert!(bo.plane_fd(2).is_err());
    }

    #[test]
    fn test_export_import() {
        let backend = fake_backend();
        let bo = Bo::new(backend.clone(), &nv12_desc()).unwrap();
        let handle = bo.export().unwrap();
        assert_eq!(BufferId::from_handle(&handle).unwrap(), bo.id().unwrap());

        let imported = Bo::with_handle(backend, &handle).unwrap();
        assert_eq!(imported.info(), bo.info());
        assert_eq!(imported.metadata().width, 1920);
        assert_eq!(imported.metadata().height, 1080);
        assert_eq!(imported.metadata().format, formats::NV12);
        assert_eq!(imported.metadata().layout.strides, bo.metadata().layout.strides);
        assert_eq!(imported.metadata().layout.plane_count, 2);
        assert_eq!(imported.id().unwrap(), bo.id().unwrap());
    }

    #[test]
    fn test_lock() {
        let desc = Descriptor::new()
            .size(64, 64)
            .format(formats::ABGR8888)
            .use_flags(UseFlags::SW_READ_OFTEN | UseFlags::SW_WRITE_OFTEN);
        let bo = Bo::new(fake_backend(), &desc).unwrap();
        let rect = Rect::new(0, 0, 64, 64);
        let rw = MapFlags::READ | MapFlags::WRITE;

        assert!(bo.lock(rect, MapFlags::empty()).is_err());
        assert!(bo.lock(Rect::new(1, 0, 64, 64), rw).is_err());
        assert!(bo.unlock().is_err());

        let planes = bo.lock(rect, rw).unwrap();
        assert_eq!(planes.len(), 1);
        assert_eq!(planes[0].stride, 256);
        // SAFETY: the plane is mapped for writing
        unsafe { planes[0].ptr.as_ptr().write(0x5a) };

        // nested locks share the mapping
        let again = bo.lock(rect, MapFlags::READ).unwrap();
        assert_eq!(again[0].ptr, planes[0].ptr);
        // SAFETY: the plane is mapped for reading
        assert_eq!(unsafe { again[0].ptr.as_ptr().read() }, 0x5a);
        assert_eq!(bo.lock_count(), 2);

        bo.unlock().unwrap();
        bo.unlock().unwrap();
        assert_eq!(bo.lock_count(), 0);
        assert!(bo.unlock().is_err());

        // a read-only mapping cannot serve a write lock
        let _ = bo.lock(rect, MapFlags::READ).unwrap();
        assert!(bo.lock(rect, MapFlags::WRITE).is_err());
        assert_eq!(bo.lock_count(), 1);

        // dropping a locked BO unmaps it
        drop(bo);
    }

    fn nv12_info() -> HandleInfo {
        let mut info = HandleInfo {
            format: formats::NV12,
            width: 64,
            height: 64,
            plane_count: 2,
            size: 6144,
            modifier: formats::MOD_LINEAR,
            ..Default::default()
        };
        info.strides[..2].copy_from_slice(&[64, 64]);
        info.sizes[..2].copy_from_slice(&[4096, 2048]);

        info
    }

    fn filled_memfd(name: &str, size: Size, val: u8) -> OwnedFd {
        let memfd = utils::memfd_create(name, size).unwrap();
        let file = File::from(memfd.try_clone().unwrap());
        file.write_all_at(&vec![val; size as usize], 0).unwrap();

        memfd
    }

    #[test]
    fn test_invalid_handle() {
        let backend = Arc::new(fake::Backend::new());
        let import = |handle: &Handle| {
            let backend: Arc<dyn Backend> = backend.clone();
            Bo::with_handle(backend, handle)
        };

        // NV12 has two planes
        let mut info = nv12_info();
        info.plane_count = 1;
        let handle = Handle::new(vec![utils::memfd_create("bo", 6144).unwrap()], info).unwrap();
        assert!(matches!(import(&handle), Err(Error::InvalidArgument)));

        // plane 1 extends past its dma-buf
        let mut info = nv12_info();
        info.offsets[1] = 1024;
        let fds = vec![filled_memfd("y", 4096, 0), filled_memfd("uv", 2048, 0)];
        let handle = Handle::new(fds, info).unwrap();
        assert!(matches!(import(&handle), Err(Error::InvalidArgument)));

        // fds and plane count disagree
        let fds = vec![filled_memfd("y", 4096, 0), filled_memfd("uv", 2048, 0)];
        let mut handle = Handle::new(fds, nv12_info()).unwrap();
        handle.fds.pop();
        assert!(matches!(import(&handle), Err(Error::InvalidArgument)));

        // none of them reached the backend
        assert_eq!(backend.imported.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_separate_allocations() {
        let fds = vec![filled_memfd("y", 4096, 0x11), filled_memfd("uv", 2048, 0x22)];
        let handle = Handle::new(fds, nv12_info()).unwrap();

        let bo = Bo::with_handle(fake_backend(), &handle).unwrap();
        assert_eq!(bo.metadata().layout.sizes[..2], [4096, 2048]);

        let planes = bo.lock(Rect::new(0, 0, 64, 64), MapFlags::READ).unwrap();
        assert_eq!(planes.len(), 2);
        assert_ne!(planes[0].ptr, planes[1].ptr);
        // SAFETY: plane 0 is mapped for reading
        assert_eq!(unsafe { planes[0].ptr.as_ptr().read() }, 0x11);
        // SAFETY: plane 1 is mapped for reading
        assert_eq!(unsafe { planes[1].ptr.as_ptr().read() }, 0x22);
        // SAFETY: the last byte of plane 1 is within its own dma-buf
        let last = unsafe { planes[1].ptr.as_ptr().add(2047) };
        // SAFETY: see above
        assert_eq!(unsafe { last.read() }, 0x22);

        bo.unlock().unwrap();
    }

    #[test]
    fn test_multi_planar_lock() {
        let bo = Bo::new(fake_backend(), &nv12_desc()).unwrap();
        let planes = bo.lock(Rect::new(0, 0, 1920, 1080), MapFlags::READ).unwrap();
        assert_eq!(planes.len(), 2);

        let offset = bo.info().offsets[1] as usize;
        // SAFETY: plane 0 is at the start of the mapping
        let expected = unsafe { planes[0].ptr.as_ptr().add(offset) };
        assert_eq!(planes[1].ptr.as_ptr(), expected);
        bo.unlock().unwrap();
    }
}
