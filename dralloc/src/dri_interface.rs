// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! Bindings to the DRI driver interface.
//!
//! A DRI driver exports a null-terminated array of versioned extensions.  Required extensions are
//! looked up and version-checked once at load time.  Entry points added in later versions are
//! checked again at each call site.

#![allow(non_camel_case_types)]

use super::node::Node;
use super::types::{Error, Modifier, Result};
use std::ffi::{c_char, c_int, c_uint, c_void, CStr};
use std::io;
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::path::Path;
use std::ptr::{self, NonNull};
use std::sync::{Mutex, PoisonError};

// from dri_interface.h
pub mod consts {
    use std::ffi::{c_int, c_uint};

    pub const DRI_IMAGE_FORMAT_RGB565: c_int = 0x1001;
    pub const DRI_IMAGE_FORMAT_XRGB8888: c_int = 0x1002;
    pub const DRI_IMAGE_FORMAT_ARGB8888: c_int = 0x1003;
    pub const DRI_IMAGE_FORMAT_ABGR8888: c_int = 0x1004;
    pub const DRI_IMAGE_FORMAT_XBGR8888: c_int = 0x1005;
    pub const DRI_IMAGE_FORMAT_R8: c_int = 0x1006;
    pub const DRI_IMAGE_FORMAT_GR88: c_int = 0x1007;
    pub const DRI_IMAGE_FORMAT_XRGB2101010: c_int = 0x1009;
    pub const DRI_IMAGE_FORMAT_ARGB2101010: c_int = 0x100a;
    pub const DRI_IMAGE_FORMAT_XBGR2101010: c_int = 0x1010;
    pub const DRI_IMAGE_FORMAT_ABGR2101010: c_int = 0x1011;

    pub const DRI_IMAGE_USE_SHARE: c_uint = 0x0001;
    pub const DRI_IMAGE_USE_SCANOUT: c_uint = 0x0002;
    pub const DRI_IMAGE_USE_CURSOR: c_uint = 0x0004;
    pub const DRI_IMAGE_USE_LINEAR: c_uint = 0x0008;
    pub const DRI_IMAGE_USE_PROTECTED: c_uint = 0x0010;

    pub const DRI_IMAGE_ATTRIB_STRIDE: c_int = 0x2000;
    pub const DRI_IMAGE_ATTRIB_HANDLE: c_int = 0x2001;
    pub const DRI_IMAGE_ATTRIB_FD: c_int = 0x2007;
    pub const DRI_IMAGE_ATTRIB_NUM_PLANES: c_int = 0x2009;
    pub const DRI_IMAGE_ATTRIB_OFFSET: c_int = 0x200a;
    pub const DRI_IMAGE_ATTRIB_MODIFIER_LOWER: c_int = 0x200b;
    pub const DRI_IMAGE_ATTRIB_MODIFIER_UPPER: c_int = 0x200c;

    pub const DRI_IMAGE_TRANSFER_READ: c_uint = 0x1;
    pub const DRI_IMAGE_TRANSFER_WRITE: c_uint = 0x2;

    pub const DRI_YUV_COLOR_SPACE_UNDEFINED: c_int = 0;
    pub const DRI_YUV_RANGE_UNDEFINED: c_int = 0;
    pub const DRI_YUV_CHROMA_SITING_UNDEFINED: c_int = 0;

    pub const DRI2_FLUSH_CONTEXT: c_uint = 1 << 1;
    pub const DRI2_THROTTLE_SWAPBUFFER: c_int = 0;
}

use consts::*;

const DRI_CORE: &CStr = c"DRI_Core";
const DRI_DRI2: &CStr = c"DRI_DRI2";
const DRI_IMAGE: &CStr = c"DRI_IMAGE";
const DRI2_FLUSH: &CStr = c"DRI2_Flush";

const DRI_CORE_VERSION: c_int = 2;
// createNewScreen2
const DRI_DRI2_VERSION: c_int = 4;
// mapImage and unmapImage
const DRI_IMAGE_VERSION: c_int = 12;
// flush_with_flags
const DRI2_FLUSH_VERSION: c_int = 4;

const DRI_IMAGE_VERSION_WITH_MODIFIERS: c_int = 14;
const DRI_IMAGE_VERSION_FROM_DMA_BUFS2: c_int = 14;
const DRI_IMAGE_VERSION_QUERY_MODIFIERS: c_int = 15;
const DRI_IMAGE_VERSION_MODIFIER_ATTRIBS: c_int = 16;

#[repr(C)]
pub struct __DRIscreen {
    _unused: [u8; 0],
}

#[repr(C)]
pub struct __DRIcontext {
    _unused: [u8; 0],
}

#[repr(C)]
pub struct __DRIconfig {
    _unused: [u8; 0],
}

#[repr(C)]
pub struct __DRIdrawable {
    _unused: [u8; 0],
}

#[repr(C)]
pub struct __DRIimage {
    _unused: [u8; 0],
}

#[repr(C)]
pub struct __DRIextension {
    name: *const c_char,
    version: c_int,
}

// entry points that are never called are kept as opaque pointers to preserve the layout
type Unused = *const c_void;

#[allow(dead_code)]
#[repr(C)]
struct __DRIcoreExtension {
    base: __DRIextension,
    create_new_screen: Unused,
    destroy_screen: Option<unsafe extern "C" fn(*mut __DRIscreen)>,
    get_extensions: Option<unsafe extern "C" fn(*mut __DRIscreen) -> *const *const __DRIextension>,
    get_config_attrib: Unused,
    index_config_attrib: Unused,
    create_new_drawable: Unused,
    destroy_drawable: Unused,
    swap_buffers: Unused,
    create_new_context: Unused,
    copy_context: Unused,
    destroy_context: Option<unsafe extern "C" fn(*mut __DRIcontext)>,
    bind_context: Unused,
    unbind_context: Unused,
}

#[allow(dead_code)]
#[repr(C)]
struct __DRIdri2Extension {
    base: __DRIextension,
    create_new_screen: Unused,
    create_new_drawable: Unused,
    create_new_context: Option<
        unsafe extern "C" fn(
            *mut __DRIscreen,
            *const __DRIconfig,
            *mut __DRIcontext,
            *mut c_void,
        ) -> *mut __DRIcontext,
    >,
    get_api_mask: Unused,
    create_new_context_for_api: Unused,
    allocate_buffer: Unused,
    release_buffer: Unused,
    create_context_attribs: Unused,
    create_new_screen2: Option<
        unsafe extern "C" fn(
            c_int,
            c_int,
            *const *const __DRIextension,
            *const *const __DRIextension,
            *mut *mut *const __DRIconfig,
            *mut c_void,
        ) -> *mut __DRIscreen,
    >,
    create_new_screen3: Unused,
}

#[allow(dead_code)]
#[repr(C)]
struct __DRIimageExtension {
    base: __DRIextension,
    create_image_from_name: Unused,
    create_image_from_renderbuffer: Unused,
    destroy_image: Option<unsafe extern "C" fn(*mut __DRIimage)>,
    create_image: Option<
        unsafe extern "C" fn(
            *mut __DRIscreen,
            c_int,
            c_int,
            c_int,
            c_uint,
            *mut c_void,
        ) -> *mut __DRIimage,
    >,
    query_image: Option<unsafe extern "C" fn(*mut __DRIimage, c_int, *mut c_int) -> u8>,
    dup_image: Unused,
    validate_usage: Unused,
    create_image_from_names: Unused,
    from_planar: Option<unsafe extern "C" fn(*mut __DRIimage, c_int, *mut c_void) -> *mut __DRIimage>,
    create_image_from_texture: Unused,
    create_image_from_fds: Option<
        unsafe extern "C" fn(
            *mut __DRIscreen,
            c_int,
            c_int,
            c_int,
            *mut c_int,
            c_int,
            *mut c_int,
            *mut c_int,
            *mut c_void,
        ) -> *mut __DRIimage,
    >,
    create_image_from_dma_bufs: Unused,
    blit_image: Unused,
    get_capabilities: Unused,
    map_image: Option<
        unsafe extern "C" fn(
            *mut __DRIcontext,
            *mut __DRIimage,
            c_int,
            c_int,
            c_int,
            c_int,
            c_uint,
            *mut c_int,
            *mut *mut c_void,
        ) -> *mut c_void,
    >,
    unmap_image: Option<unsafe extern "C" fn(*mut __DRIcontext, *mut __DRIimage, *mut c_void)>,
    create_image_with_modifiers: Option<
        unsafe extern "C" fn(
            *mut __DRIscreen,
            c_int,
            c_int,
            c_int,
            *const u64,
            c_uint,
            *mut c_void,
        ) -> *mut __DRIimage,
    >,
    create_image_from_dma_bufs2: Option<
        unsafe extern "C" fn(
            *mut __DRIscreen,
            c_int,
            c_int,
            c_int,
            u64,
            *mut c_int,
            c_int,
            *mut c_int,
            *mut c_int,
            c_int,
            c_int,
            c_int,
            c_int,
            *mut c_uint,
            *mut c_void,
        ) -> *mut __DRIimage,
    >,
    query_dma_buf_formats: Unused,
    query_dma_buf_modifiers: Option<
        unsafe extern "C" fn(
            *mut __DRIscreen,
            c_int,
            c_int,
            *mut u64,
            *mut c_uint,
            *mut c_int,
        ) -> u8,
    >,
    query_dma_buf_format_modifier_attribs:
        Option<unsafe extern "C" fn(*mut __DRIscreen, u32, u64, c_int, *mut u64) -> u8>,
}

#[allow(dead_code)]
#[repr(C)]
struct __DRI2flushExtension {
    base: __DRIextension,
    flush: Unused,
    invalidate: Unused,
    flush_with_flags:
        Option<unsafe extern "C" fn(*mut __DRIcontext, *mut __DRIdrawable, c_uint, c_int)>,
}

type GetExtensionsFn = unsafe extern "C" fn() -> *const *const __DRIextension;

fn lookup_extension<T>(
    exts: *const *const __DRIextension,
    name: &CStr,
    min_version: c_int,
) -> Option<NonNull<T>> {
    if exts.is_null() {
        return None;
    }

    let mut iter = exts;
    loop {
        // SAFETY: iter points into a null-terminated array
        let ext = unsafe { *iter };
        if ext.is_null() {
            return None;
        }

        // SAFETY: non-null entries point to valid extensions
        let base = unsafe { &*ext };
        if !base.name.is_null() {
            // SAFETY: extension names are nul-terminated
            let ext_name = unsafe { CStr::from_ptr(base.name) };
            if ext_name == name && base.version >= min_version {
                return NonNull::new(ext as *mut __DRIextension).map(NonNull::cast);
            }
        }

        // SAFETY: ext is not the terminator, so the next entry is in the array
        iter = unsafe { iter.add(1) };
    }
}

fn dri_error(what: &'static str) -> Error {
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(0) | None => Error::Context(what),
        _ => Error::Io(err),
    }
}

fn to_c_int<T: TryInto<c_int>>(val: T) -> Result<c_int> {
    val.try_into().map_err(|_| Error::IntegerConversion)
}

/// A loaded DRI driver with a screen and a context.
pub struct Driver {
    core: NonNull<__DRIcoreExtension>,
    image: NonNull<__DRIimageExtension>,
    flush: NonNull<__DRI2flushExtension>,
    screen: NonNull<__DRIscreen>,
    context: NonNull<__DRIcontext>,

    // the context is single-threaded
    context_lock: Mutex<()>,

    // keeps the screen fd open
    _node: Node,
    name: String,
    _lib: libloading::Library,
}

// SAFETY: DRI screens are thread-safe and the context is only used under context_lock
unsafe impl Send for Driver {}
// SAFETY: see above
unsafe impl Sync for Driver {}

impl Driver {
    /// Loads `<dri_dir>/<name>_dri.so`, where `name` is the kernel driver name of `node`.
    pub fn load(node: Node, dri_dir: &Path) -> Result<Self> {
        let name = node.driver_name()?;
        let path = dri_dir.join(format!("{name}_dri.so"));
        let symbol = format!("__driDriverGetExtensions_{}", name.replace('-', "_"));

        let flags = libloading::os::unix::RTLD_NOW | libloading::os::unix::RTLD_GLOBAL;
        // SAFETY: loading a DRI driver runs its initializers, which we trust
        let lib = unsafe { libloading::os::unix::Library::open(Some(&path), flags) }
            .map_err(|err| {
                log::error!("failed to load {}: {err}", path.display());
                Error::NoDevice
            })?;
        let lib = libloading::Library::from(lib);

        let exts = {
            // SAFETY: the symbol is the driver entry point
            let get_extensions: libloading::Symbol<GetExtensionsFn> =
                unsafe { lib.get(symbol.as_bytes()) }.map_err(|err| {
                    log::error!("failed to find {symbol}: {err}");
                    Error::NoDevice
                })?;

            // SAFETY: the entry point takes no argument
            unsafe { get_extensions() }
        };

        let core: NonNull<__DRIcoreExtension> =
            lookup_extension(exts, DRI_CORE, DRI_CORE_VERSION).ok_or(Error::NoDevice)?;
        let dri2: NonNull<__DRIdri2Extension> =
            lookup_extension(exts, DRI_DRI2, DRI_DRI2_VERSION).ok_or(Error::NoDevice)?;

        // SAFETY: core points to a valid extension of lib
        let core_ext = unsafe { core.as_ref() };
        // SAFETY: dri2 points to a valid extension of lib
        let dri2_ext = unsafe { dri2.as_ref() };

        let create_new_screen2 = dri2_ext.create_new_screen2.ok_or(Error::NoDevice)?;
        let create_new_context = dri2_ext.create_new_context.ok_or(Error::NoDevice)?;
        let get_extensions = core_ext.get_extensions.ok_or(Error::NoDevice)?;
        let destroy_screen = core_ext.destroy_screen.ok_or(Error::NoDevice)?;
        let destroy_context = core_ext.destroy_context.ok_or(Error::NoDevice)?;

        let loader_exts: [*const __DRIextension; 1] = [ptr::null()];
        let mut configs: *mut *const __DRIconfig = ptr::null_mut();
        // SAFETY: the fd outlives the screen and the arrays are null-terminated
        let screen = unsafe {
            create_new_screen2(
                0,
                node.as_fd().as_raw_fd(),
                loader_exts.as_ptr(),
                exts,
                &mut configs,
                ptr::null_mut(),
            )
        };
        let screen = NonNull::new(screen).ok_or_else(|| {
            log::error!("failed to create a DRI screen");
            Error::NoDevice
        })?;

        let config = if configs.is_null() {
            ptr::null()
        } else {
            // SAFETY: configs is a null-terminated array
            unsafe { *configs }
        };

        // SAFETY: screen is valid and config is either null or a config of screen
        let context = unsafe {
            create_new_context(screen.as_ptr(), config, ptr::null_mut(), ptr::null_mut())
        };
        let Some(context) = NonNull::new(context) else {
            log::error!("failed to create a DRI context");
            // SAFETY: screen is valid and unused
            unsafe { destroy_screen(screen.as_ptr()) };
            return Err(Error::NoDevice);
        };

        // SAFETY: screen is valid
        let screen_exts = unsafe { get_extensions(screen.as_ptr()) };
        let image = lookup_extension(screen_exts, DRI_IMAGE, DRI_IMAGE_VERSION);
        let flush = lookup_extension(screen_exts, DRI2_FLUSH, DRI2_FLUSH_VERSION);
        let (Some(image), Some(flush)) = (image, flush) else {
            log::error!("{name} lacks the required DRI image or flush extension");
            // SAFETY: context is valid and unused
            unsafe { destroy_context(context.as_ptr()) };
            // SAFETY: screen is valid and unused
            unsafe { destroy_screen(screen.as_ptr()) };
            return Err(Error::NoDevice);
        };

        log::info!("loaded DRI driver {}", path.display());

        let driver = Self {
            core,
            image,
            flush,
            screen,
            context,
            context_lock: Mutex::new(()),
            _node: node,
            name,
            _lib: lib,
        };

        Ok(driver)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn core_ext(&self) -> &__DRIcoreExtension {
        // SAFETY: the extension lives as long as the library
        unsafe { self.core.as_ref() }
    }

    fn image_ext(&self) -> &__DRIimageExtension {
        // SAFETY: the extension lives as long as the library
        unsafe { self.image.as_ref() }
    }

    fn flush_ext(&self) -> &__DRI2flushExtension {
        // SAFETY: the extension lives as long as the library
        unsafe { self.flush.as_ref() }
    }

    fn image_ext_since(&self, version: c_int, what: &'static str) -> Result<&__DRIimageExtension> {
        let ext = self.image_ext();
        if ext.base.version < version {
            return Err(Error::MissingCapability(what));
        }

        Ok(ext)
    }

    pub fn create_image(
        &self,
        width: u32,
        height: u32,
        dri_format: c_int,
        dri_use: c_uint,
    ) -> Result<NonNull<__DRIimage>> {
        let create_image = self
            .image_ext()
            .create_image
            .ok_or(Error::MissingCapability("createImage"))?;

        // SAFETY: screen is valid
        let img = unsafe {
            create_image(
                self.screen.as_ptr(),
                to_c_int(width)?,
                to_c_int(height)?,
                dri_format,
                dri_use,
                ptr::null_mut(),
            )
        };

        NonNull::new(img).ok_or_else(|| dri_error("createImage failed"))
    }

    pub fn create_image_with_modifiers(
        &self,
        width: u32,
        height: u32,
        dri_format: c_int,
        modifiers: &[Modifier],
    ) -> Result<NonNull<__DRIimage>> {
        const WHAT: &str = "createImageWithModifiers";
        let create_image_with_modifiers = self
            .image_ext_since(DRI_IMAGE_VERSION_WITH_MODIFIERS, WHAT)?
            .create_image_with_modifiers
            .ok_or(Error::MissingCapability(WHAT))?;

        let modifiers: Vec<u64> = modifiers.iter().map(|m| m.0).collect();
        // SAFETY: screen is valid and modifiers has the given count
        let img = unsafe {
            create_image_with_modifiers(
                self.screen.as_ptr(),
                to_c_int(width)?,
                to_c_int(height)?,
                dri_format,
                modifiers.as_ptr(),
                modifiers.len().try_into()?,
                ptr::null_mut(),
            )
        };

        NonNull::new(img).ok_or_else(|| dri_error("createImageWithModifiers failed"))
    }

    pub fn create_image_from_fds(
        &self,
        width: u32,
        height: u32,
        fourcc: u32,
        fds: &[RawFd],
        strides: &[c_int],
        offsets: &[c_int],
    ) -> Result<NonNull<__DRIimage>> {
        let create_image_from_fds = self
            .image_ext()
            .create_image_from_fds
            .ok_or(Error::MissingCapability("createImageFromFds"))?;

        let mut fds = fds.to_vec();
        let mut strides = strides.to_vec();
        let mut offsets = offsets.to_vec();
        // SAFETY: screen is valid and the arrays have num_fds entries
        let img = unsafe {
            create_image_from_fds(
                self.screen.as_ptr(),
                to_c_int(width)?,
                to_c_int(height)?,
                fourcc as c_int,
                fds.as_mut_ptr(),
                to_c_int(fds.len())?,
                strides.as_mut_ptr(),
                offsets.as_mut_ptr(),
                ptr::null_mut(),
            )
        };

        NonNull::new(img).ok_or_else(|| dri_error("createImageFromFds failed"))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_image_from_dma_bufs2(
        &self,
        width: u32,
        height: u32,
        fourcc: u32,
        modifier: Modifier,
        fds: &[RawFd],
        strides: &[c_int],
        offsets: &[c_int],
    ) -> Result<NonNull<__DRIimage>> {
        const WHAT: &str = "createImageFromDmaBufs2";
        let create_image_from_dma_bufs2 = self
            .image_ext_since(DRI_IMAGE_VERSION_FROM_DMA_BUFS2, WHAT)?
            .create_image_from_dma_bufs2
            .ok_or(Error::MissingCapability(WHAT))?;

        let mut fds = fds.to_vec();
        let mut strides = strides.to_vec();
        let mut offsets = offsets.to_vec();
        let mut error: c_uint = 0;
        // SAFETY: screen is valid and the arrays have num_fds entries
        let img = unsafe {
            create_image_from_dma_bufs2(
                self.screen.as_ptr(),
                to_c_int(width)?,
                to_c_int(height)?,
                fourcc as c_int,
                modifier.0,
                fds.as_mut_ptr(),
                to_c_int(fds.len())?,
                strides.as_mut_ptr(),
                offsets.as_mut_ptr(),
                DRI_YUV_COLOR_SPACE_UNDEFINED,
                DRI_YUV_RANGE_UNDEFINED,
                DRI_YUV_CHROMA_SITING_UNDEFINED,
                DRI_YUV_CHROMA_SITING_UNDEFINED,
                &mut error,
                ptr::null_mut(),
            )
        };

        NonNull::new(img).ok_or_else(|| {
            log::debug!("createImageFromDmaBufs2 failed with DRI error {error}");
            Error::Io(io::Error::from_raw_os_error(nix::errno::Errno::ENOSYS as i32))
        })
    }

    /// Destroys an image.  `img` must not be used afterwards.
    pub fn destroy_image(&self, img: NonNull<__DRIimage>) {
        if let Some(destroy_image) = self.image_ext().destroy_image {
            // SAFETY: img is a valid image of this screen
            unsafe { destroy_image(img.as_ptr()) };
        }
    }

    pub fn query_image(&self, img: NonNull<__DRIimage>, attrib: c_int) -> Result<c_int> {
        let query_image = self
            .image_ext()
            .query_image
            .ok_or(Error::MissingCapability("queryImage"))?;

        let mut val: c_int = 0;
        // SAFETY: img is valid and val outlives the call
        let ok = unsafe { query_image(img.as_ptr(), attrib, &mut val) };
        if ok == 0 {
            return Err(dri_error("queryImage failed"));
        }

        Ok(val)
    }

    /// Calls `f` with the image of a plane.
    ///
    /// Drivers that do not split planes into images return the image itself.
    pub fn with_plane<T>(
        &self,
        img: NonNull<__DRIimage>,
        plane: usize,
        f: impl FnOnce(NonNull<__DRIimage>) -> T,
    ) -> Result<T> {
        let plane_img = match self.image_ext().from_planar {
            Some(from_planar) => {
                let plane = to_c_int(plane)?;
                // SAFETY: img is valid
                let plane_img = unsafe { from_planar(img.as_ptr(), plane, ptr::null_mut()) };
                NonNull::new(plane_img)
            }
            None => None,
        };

        let ret = f(plane_img.unwrap_or(img));

        if let Some(plane_img) = plane_img {
            self.destroy_image(plane_img);
        }

        Ok(ret)
    }

    /// Maps an image.  Returns the address, the stride of plane 0, and the map token.
    pub fn map_image(
        &self,
        img: NonNull<__DRIimage>,
        width: u32,
        height: u32,
        flags: c_uint,
    ) -> Result<(NonNull<c_void>, c_int, NonNull<c_void>)> {
        let map_image = self
            .image_ext()
            .map_image
            .ok_or(Error::MissingCapability("mapImage"))?;

        let mut stride: c_int = 0;
        let mut data: *mut c_void = ptr::null_mut();

        let addr = {
            let _guard = self
                .context_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            // SAFETY: context and img are valid and the context is locked
            unsafe {
                map_image(
                    self.context.as_ptr(),
                    img.as_ptr(),
                    0,
                    0,
                    to_c_int(width)?,
                    to_c_int(height)?,
                    flags,
                    &mut stride,
                    &mut data,
                )
            }
        };

        let addr = NonNull::new(addr).ok_or_else(|| dri_error("mapImage failed"))?;
        let data = NonNull::new(data).ok_or(Error::Context("mapImage returned no token"))?;

        Ok((addr, stride, data))
    }

    /// Unmaps an image and flushes the context.
    pub fn unmap_image(&self, img: NonNull<__DRIimage>, data: NonNull<c_void>) -> Result<()> {
        let unmap_image = self
            .image_ext()
            .unmap_image
            .ok_or(Error::MissingCapability("unmapImage"))?;
        let flush_with_flags = self
            .flush_ext()
            .flush_with_flags
            .ok_or(Error::MissingCapability("flush_with_flags"))?;

        let _guard = self
            .context_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // SAFETY: context and img are valid, data is from mapImage, and the context is locked
        unsafe { unmap_image(self.context.as_ptr(), img.as_ptr(), data.as_ptr()) };

        // drivers may queue DMA operations on the mapping context
        // SAFETY: context is valid and locked
        unsafe {
            flush_with_flags(
                self.context.as_ptr(),
                ptr::null_mut(),
                DRI2_FLUSH_CONTEXT,
                DRI2_THROTTLE_SWAPBUFFER,
            )
        };

        Ok(())
    }

    /// Returns the modifiers the driver supports for a format.
    pub fn query_modifiers(&self, fourcc: u32) -> Result<Vec<Modifier>> {
        const WHAT: &str = "queryDmaBufModifiers";
        let query_dma_buf_modifiers = self
            .image_ext_since(DRI_IMAGE_VERSION_QUERY_MODIFIERS, WHAT)?
            .query_dma_buf_modifiers
            .ok_or(Error::MissingCapability(WHAT))?;

        let mut count: c_int = 0;
        // SAFETY: screen is valid and a zero max only queries the count
        let ok = unsafe {
            query_dma_buf_modifiers(
                self.screen.as_ptr(),
                fourcc as c_int,
                0,
                ptr::null_mut(),
                ptr::null_mut(),
                &mut count,
            )
        };
        if ok == 0 {
            return Error::unsupported();
        }

        let mut modifiers = vec![0u64; usize::try_from(count)?];
        // SAFETY: screen is valid and modifiers has room for count entries
        let ok = unsafe {
            query_dma_buf_modifiers(
                self.screen.as_ptr(),
                fourcc as c_int,
                count,
                modifiers.as_mut_ptr(),
                ptr::null_mut(),
                &mut count,
            )
        };
        if ok == 0 {
            return Error::unsupported();
        }

        modifiers.truncate(usize::try_from(count)?);

        Ok(modifiers.into_iter().map(Modifier).collect())
    }

    /// Returns the plane count of a format with a modifier, or 0 when the pair is unsupported.
    pub fn query_num_planes(&self, fourcc: u32, modifier: Modifier) -> Result<u32> {
        const WHAT: &str = "queryDmaBufFormatModifierAttribs";
        let query_attribs = self
            .image_ext_since(DRI_IMAGE_VERSION_MODIFIER_ATTRIBS, WHAT)?
            .query_dma_buf_format_modifier_attribs
            .ok_or(Error::MissingCapability(WHAT))?;

        let mut planes: u64 = 0;
        // SAFETY: screen is valid and planes outlives the call
        let ok = unsafe {
            query_attribs(
                self.screen.as_ptr(),
                fourcc,
                modifier.0,
                DRI_IMAGE_ATTRIB_NUM_PLANES,
                &mut planes,
            )
        };
        if ok == 0 {
            return Ok(0);
        }

        Ok(planes.try_into()?)
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        let core = self.core_ext();
        let (destroy_context, destroy_screen) = (core.destroy_context, core.destroy_screen);

        if let Some(destroy_context) = destroy_context {
            // SAFETY: context is valid and no longer used
            unsafe { destroy_context(self.context.as_ptr()) };
        }
        if let Some(destroy_screen) = destroy_screen {
            // SAFETY: screen is valid and no longer used
            unsafe { destroy_screen(self.screen.as_ptr()) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn test_layouts() {
        // pointers and nullable function pointers have the same size
        let ptr_size = mem::size_of::<*const c_void>();
        assert_eq!(mem::size_of::<__DRIextension>(), 2 * ptr_size);
        assert_eq!(mem::size_of::<__DRIcoreExtension>(), 15 * ptr_size);
        assert_eq!(mem::size_of::<__DRIdri2Extension>(), 12 * ptr_size);
        assert_eq!(mem::size_of::<__DRIimageExtension>(), 23 * ptr_size);
        assert_eq!(mem::size_of::<__DRI2flushExtension>(), 5 * ptr_size);
    }

    #[test]
    fn test_lookup_extension() {
        let core = __DRIextension {
            name: DRI_CORE.as_ptr(),
            version: 3,
        };
        let image = __DRIextension {
            name: DRI_IMAGE.as_ptr(),
            version: 11,
        };
        let nameless = __DRIextension {
            name: ptr::null(),
            version: 100,
        };
        let exts: [*const __DRIextension; 4] = [&nameless, &core, &image, ptr::null()];

        let found: Option<NonNull<__DRIextension>> =
            lookup_extension(exts.as_ptr(), DRI_CORE, DRI_CORE_VERSION);
        assert_eq!(found.map(|p| p.as_ptr() as *const _), Some(&core as *const _));

        // too old
        let found: Option<NonNull<__DRIextension>> =
            lookup_extension(exts.as_ptr(), DRI_IMAGE, DRI_IMAGE_VERSION);
        assert!(found.is_none());

        let found: Option<NonNull<__DRIextension>> =
            lookup_extension(exts.as_ptr(), DRI2_FLUSH, 1);
        assert!(found.is_none());

        let found: Option<NonNull<__DRIextension>> =
            lookup_extension(ptr::null(), DRI_CORE, 1);
        assert!(found.is_none());
    }
}
