// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! The gralloc module surface.
//!
//! `Gralloc` mirrors the entry points of a gralloc 0.3 module.  The variadic `perform` is
//! replaced by one method per query.

use super::module::{self, Config};
use super::usage;
use dralloc::{Descriptor, Device, Error, HalFormat, Handle, Rect, Result, Ycbcr};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::ptr::NonNull;
use std::sync::Arc;

/// The name of the allocator device.
pub const HARDWARE_GPU0: &str = "gpu0";
/// The name of the framebuffer device.
pub const HARDWARE_FB0: &str = "fb0";

/// An opened gralloc module.
pub struct Gralloc {
    device: Arc<Device>,
}

impl Gralloc {
    /// Opens the device `name`, initializing the module on first use.
    pub fn open(name: &str) -> Result<Self> {
        match name {
            HARDWARE_GPU0 => {
                let device = module::init(&Config::from_env())?;
                Ok(Self::with_device(device))
            }
            HARDWARE_FB0 => {
                log::error!("the framebuffer device is not supported");
                Err(Error::Unsupported)
            }
            _ => {
                log::error!("incorrect device name {name}");
                Err(Error::InvalidArgument)
            }
        }
    }

    pub fn with_device(device: Arc<Device>) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Allocates a BO and returns its handle and its stride in pixels.
    pub fn alloc(
        &self,
        width: u32,
        height: u32,
        format: HalFormat,
        usage: u32,
    ) -> Result<(Handle, u32)> {
        let desc = Descriptor::new()
            .size(width, height)
            .hal_format(format)
            .usage(usage.into(), usage.into())
            .use_flags(usage::convert_usage(usage));

        let handle = self.device.allocate(&desc).map_err(|err| {
            log::error!(
                "failed to allocate {width}x{height} with format {} and usage {usage:#x}: {err}",
                format.0
            );
            err
        })?;
        let stride = handle.info.pixel_stride;

        Ok((handle, stride))
    }

    /// Drops the reference taken by `alloc`.
    pub fn free(&self, handle: &Handle) -> Result<()> {
        self.device.release(handle)
    }

    pub fn register(&self, handle: &Handle) -> Result<()> {
        self.device.retain(handle)
    }

    pub fn unregister(&self, handle: &Handle) -> Result<()> {
        self.device.release(handle)
    }

    pub fn lock(&self, handle: &Handle, usage: u32, rect: Rect) -> Result<NonNull<u8>> {
        self.lock_async(handle, usage, rect, None)
    }

    /// Locks a BO for CPU access once `fence` signals, and returns the address of plane 0.
    pub fn lock_async(
        &self,
        handle: &Handle,
        usage: u32,
        rect: Rect,
        fence: Option<OwnedFd>,
    ) -> Result<NonNull<u8>> {
        let flags = usage::convert_map_usage(usage);
        let fence = fence.as_ref().map(|fence| fence.as_fd());
        let planes = self.device.lock(handle, rect, flags, fence)?;

        planes
            .first()
            .map(|plane| plane.ptr)
            .ok_or(Error::Context("no plane"))
    }

    /// Unlocks a BO and waits for the CPU access to complete.
    pub fn unlock(&self, handle: &Handle) -> Result<()> {
        if let Some(fence) = self.unlock_async(handle)? {
            self.device.wait_fence(fence.as_fd())?;
        }

        Ok(())
    }

    /// Unlocks a BO and returns a fence that signals when the CPU access completes.
    pub fn unlock_async(&self, handle: &Handle) -> Result<Option<OwnedFd>> {
        self.device.unlock(handle)
    }

    pub fn lock_ycbcr(&self, handle: &Handle, usage: u32, rect: Rect) -> Result<Ycbcr> {
        self.lock_async_ycbcr(handle, usage, rect, None)
    }

    pub fn lock_async_ycbcr(
        &self,
        handle: &Handle,
        usage: u32,
        rect: Rect,
        fence: Option<OwnedFd>,
    ) -> Result<Ycbcr> {
        let flags = usage::convert_map_usage(usage);
        let fence = fence.as_ref().map(|fence| fence.as_fd());

        self.device.lock_ycbcr(handle, rect, flags, fence)
    }

    pub fn drm_fd(&self) -> Result<BorrowedFd<'_>> {
        self.device.drm_fd()
    }

    /// Becomes the DRM master.
    pub fn enter_vt(&self) -> Result<()> {
        self.device.set_master()
    }

    pub fn leave_vt(&self) -> Result<()> {
        self.device.drop_master()
    }

    pub fn stride(&self, handle: &Handle) -> u32 {
        handle.info.pixel_stride
    }

    pub fn format(&self, handle: &Handle) -> HalFormat {
        handle.info.hal_format
    }

    pub fn dimensions(&self, handle: &Handle) -> (u32, u32) {
        (handle.info.width, handle.info.height)
    }

    pub fn backing_store(&self, handle: &Handle) -> Result<u64> {
        self.device.backing_store(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use crate::usage::*;
    use dralloc::{formats, UseFlags};

    fn gralloc() -> Gralloc {
        Gralloc::with_device(testing::device())
    }

    #[test]
    fn test_open() {
        assert!(matches!(
            Gralloc::open(HARDWARE_FB0),
            Err(Error::Unsupported)
        ));
        assert!(matches!(
            Gralloc::open("gpu1"),
            Err(Error::InvalidArgument)
        ));
    }

    #[test]
    fn test_alloc() {
        let gr = gralloc();
        let usage = HW_TEXTURE | SW_READ_OFTEN;
        let (handle, stride) = gr.alloc(100, 10, formats::hal::RGBA_8888, usage).unwrap();

        assert_eq!(stride, 112);
        assert_eq!(gr.stride(&handle), stride);
        assert_eq!(gr.format(&handle), formats::hal::RGBA_8888);
        assert_eq!(gr.dimensions(&handle), (100, 10));
        assert_eq!(handle.info.format, formats::ABGR8888);
        assert_eq!(handle.info.producer_usage, usage as u64);
        assert_eq!(handle.info.consumer_usage, usage as u64);
        assert!(gr.backing_store(&handle).is_ok());

        gr.free(&handle).unwrap();
        assert!(gr.free(&handle).is_err());

        // zero-sized
        assert!(matches!(
            gr.alloc(0, 10, formats::hal::RGBA_8888, usage),
            Err(Error::InvalidArgument)
        ));
    }

    #[test]
    fn test_alloc_composer() {
        let gr = gralloc();

        // composition by the GPU when the display cannot take the format
        let (handle, _) = gr
            .alloc(64, 64, formats::hal::RGBA_8888, HW_COMPOSER)
            .unwrap();
        assert_eq!(handle.info.use_flags, UseFlags::TEXTURE);

        // codes that are not HAL formats are taken as fourccs
        let xrgb = HalFormat(formats::XRGB8888.0 as i32);
        let (handle, _) = gr.alloc(64, 64, xrgb, HW_COMPOSER).unwrap();
        assert_eq!(
            handle.info.use_flags,
            UseFlags::SCANOUT | UseFlags::TEXTURE
        );

        // no fallback without composition
        assert!(matches!(
            gr.alloc(64, 64, formats::hal::RGBA_8888, HW_FB),
            Err(Error::Unsupported)
        ));
    }

    #[test]
    fn test_register() {
        let gr = gralloc();
        let (handle, _) = gr
            .alloc(64, 64, formats::hal::RGBX_8888, HW_TEXTURE)
            .unwrap();

        // another process
        let other = gralloc();
        let imported = handle.try_clone().unwrap();
        other.register(&imported).unwrap();
        other.register(&imported).unwrap();
        assert_eq!(other.device().refcount(&imported).unwrap(), 2);
        assert_eq!(
            other.backing_store(&imported).unwrap(),
            gr.backing_store(&handle).unwrap()
        );
        other.unregister(&imported).unwrap();
        other.unregister(&imported).unwrap();
        assert!(other.unregister(&imported).is_err());
    }

    #[test]
    fn test_lock() {
        let gr = gralloc();
        let rect = Rect::new(0, 0, 64, 64);
        let (handle, _) = gr
            .alloc(64, 64, formats::hal::RGBA_8888, SW_READ_OFTEN | SW_WRITE_OFTEN)
            .unwrap();

        let ptr = gr.lock(&handle, SW_WRITE_OFTEN | SW_READ_OFTEN, rect).unwrap();
        // SAFETY: the BO is locked for writing
        unsafe { ptr.as_ptr().write(0xa5) };
        gr.unlock(&handle).unwrap();

        let ptr = gr.lock(&handle, SW_READ_RARELY, rect).unwrap();
        // SAFETY: the BO is locked for reading
        assert_eq!(unsafe { ptr.as_ptr().read() }, 0xa5);
        assert!(gr.unlock_async(&handle).unwrap().is_none());

        // no CPU access requested
        assert!(gr.lock(&handle, HW_TEXTURE, rect).is_err());
        assert!(gr.unlock(&handle).is_err());
    }

    #[test]
    fn test_lock_ycbcr() {
        let gr = gralloc();
        let rect = Rect::new(0, 0, 64, 64);
        let usage = HW_CAMERA_WRITE | SW_READ_OFTEN;

        let (flex, _) = gr
            .alloc(64, 64, formats::hal::YCBCR_420_888, usage)
            .unwrap();
        assert_eq!(flex.info.format, formats::NV12);
        assert!(gr.lock(&flex, SW_READ_OFTEN, rect).is_err());

        let ycbcr = gr.lock_ycbcr(&flex, SW_READ_OFTEN, rect).unwrap();
        assert_eq!(ycbcr.chroma_step, 2);
        assert_eq!(ycbcr.y_stride, flex.info.strides[0]);
        gr.unlock(&flex).unwrap();

        let (yv12, _) = gr
            .alloc(64, 64, formats::hal::YV12, HW_TEXTURE | SW_READ_OFTEN)
            .unwrap();
        let ycbcr = gr.lock_ycbcr(&yv12, SW_READ_OFTEN, rect).unwrap();
        assert_eq!(ycbcr.chroma_step, 1);
        assert!(ycbcr.cb.as_ptr() > ycbcr.cr.as_ptr());
        gr.unlock(&yv12).unwrap();

        let (rgba, _) = gr
            .alloc(64, 64, formats::hal::RGBA_8888, HW_TEXTURE | SW_READ_OFTEN)
            .unwrap();
        assert!(matches!(
            gr.lock_ycbcr(&rgba, SW_READ_OFTEN, rect),
            Err(Error::InvalidArgument)
        ));
    }
}
