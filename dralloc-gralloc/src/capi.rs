// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! An unstable C API.
//!
//! Functions returning `i32` return 0 on success and a negative errno on failure.

use super::hal::Gralloc;
use dralloc::{Error, HalFormat, Handle, Rect, Result, WIRE_WORDS};
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::{ffi, slice};

#[repr(C)]
pub enum dralloc_log_level {
    Off,
    Error,
    Warn,
    Info,
    Debug,
}

pub type dralloc_log_callback = Option<
    unsafe extern "C" fn(
        lv: dralloc_log_level,
        msg: *const ffi::c_char,
        cb_data: *mut ffi::c_void,
    ),
>;

#[repr(C)]
pub struct dralloc_gralloc {
    _data: [u8; 0],
}

#[repr(C)]
pub struct dralloc_handle {
    _data: [u8; 0],
}

/// A locked YCbCr BO.  It matches `struct android_ycbcr`.
#[repr(C)]
pub struct dralloc_ycbcr {
    pub y: *mut ffi::c_void,
    pub cb: *mut ffi::c_void,
    pub cr: *mut ffi::c_void,
    pub ystride: usize,
    pub cstride: usize,
    pub chroma_step: usize,
    pub reserved: [u32; 8],
}

fn gralloc_into(gr: Gralloc) -> *mut dralloc_gralloc {
    Box::into_raw(Box::new(gr)) as *mut dralloc_gralloc
}

fn gralloc_from(gr: *mut dralloc_gralloc) -> Box<Gralloc> {
    // SAFETY: gr was created by gralloc_into
    unsafe { Box::from_raw(gr as *mut Gralloc) }
}

fn gralloc_as_ref<'a>(gr: *const dralloc_gralloc) -> Result<&'a Gralloc> {
    // SAFETY: gr is null or was created by gralloc_into
    unsafe { (gr as *const Gralloc).as_ref() }.ok_or(Error::InvalidArgument)
}

fn handle_into(handle: Handle) -> *mut dralloc_handle {
    Box::into_raw(Box::new(handle)) as *mut dralloc_handle
}

fn handle_from(handle: *mut dralloc_handle) -> Box<Handle> {
    // SAFETY: handle was created by handle_into
    unsafe { Box::from_raw(handle as *mut Handle) }
}

fn handle_as_ref<'a>(handle: *const dralloc_handle) -> Result<&'a Handle> {
    // SAFETY: handle is null or was created by handle_into
    unsafe { (handle as *const Handle).as_ref() }.ok_or(Error::InvalidArgument)
}

fn to_errno(res: Result<()>) -> i32 {
    match res {
        Ok(()) => 0,
        Err(err) => {
            log::debug!("{err}");
            -err.errno()
        }
    }
}

fn to_rect(l: i32, t: i32, w: i32, h: i32) -> Result<Rect> {
    Ok(Rect::new(
        u32::try_from(l)?,
        u32::try_from(t)?,
        u32::try_from(w)?,
        u32::try_from(h)?,
    ))
}

fn take_fd(fd: RawFd) -> Option<OwnedFd> {
    if fd < 0 {
        return None;
    }

    // SAFETY: the caller transfers the ownership of fd
    Some(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn write_out<T>(out: *mut T, val: T) -> Result<()> {
    // SAFETY: out is null or points to a writable T
    let out = unsafe { out.as_mut() }.ok_or(Error::InvalidArgument)?;
    *out = val;

    Ok(())
}

/// Forwards log records up to `max_lv` to `log_cb`.
///
/// # Safety
///
/// `log_cb` must be callable from any thread with `cb_data`.
#[no_mangle]
pub unsafe extern "C" fn dralloc_log_init(
    max_lv: dralloc_log_level,
    log_cb: dralloc_log_callback,
    cb_data: *mut ffi::c_void,
) {
    let filter = match max_lv {
        dralloc_log_level::Off => log::LevelFilter::Off,
        dralloc_log_level::Error => log::LevelFilter::Error,
        dralloc_log_level::Warn => log::LevelFilter::Warn,
        dralloc_log_level::Info => log::LevelFilter::Info,
        dralloc_log_level::Debug => log::LevelFilter::Debug,
    };

    let Some(log_cb) = log_cb.filter(|_| filter != log::LevelFilter::Off) else {
        super::log::init(log::LevelFilter::Off, Box::new(|_| {}));
        return;
    };

    let cb_data = cb_data as usize;
    let cb = move |rec: &log::Record| {
        let lv = match rec.level() {
            log::Level::Error => dralloc_log_level::Error,
            log::Level::Warn => dralloc_log_level::Warn,
            log::Level::Info => dralloc_log_level::Info,
            log::Level::Debug => dralloc_log_level::Debug,
            log::Level::Trace => dralloc_log_level::Debug,
        };
        let msg = format!("{}", rec.args());
        if let Ok(c_msg) = ffi::CString::new(msg) {
            // SAFETY: we trust the client
            unsafe { log_cb(lv, c_msg.as_ptr(), cb_data as *mut ffi::c_void) };
        }
    };

    super::log::init(filter, Box::new(cb));
}

/// Opens the gralloc device `name`.
///
/// # Safety
///
/// `name` must be a valid C string and `out_gr` must be writable.
#[no_mangle]
pub unsafe extern "C" fn dralloc_gralloc_open(
    name: *const ffi::c_char,
    out_gr: *mut *mut dralloc_gralloc,
) -> i32 {
    if name.is_null() {
        return -libc::EINVAL;
    }

    // SAFETY: name is a valid C string
    let name = unsafe { ffi::CStr::from_ptr(name) };
    let res = name
        .to_str()
        .map_err(|_| Error::StringConversion)
        .and_then(Gralloc::open)
        .and_then(|gr| {
            let gr = gralloc_into(gr);
            write_out(out_gr, gr).inspect_err(|_| drop(gralloc_from(gr)))
        });

    to_errno(res)
}

/// # Safety
///
/// `gr` must have been returned by `dralloc_gralloc_open`.
#[no_mangle]
pub unsafe extern "C" fn dralloc_gralloc_close(gr: *mut dralloc_gralloc) {
    if !gr.is_null() {
        let _ = gralloc_from(gr);
    }
}

/// Allocates a BO.  The stride is in pixels.
///
/// # Safety
///
/// `gr` must be valid.  `out_handle` and `out_stride` must be writable.
#[no_mangle]
pub unsafe extern "C" fn dralloc_gralloc_alloc(
    gr: *const dralloc_gralloc,
    width: i32,
    height: i32,
    format: i32,
    usage: i32,
    out_handle: *mut *mut dralloc_handle,
    out_stride: *mut i32,
) -> i32 {
    let res = || -> Result<()> {
        let gr = gralloc_as_ref(gr)?;
        let (handle, stride) = gr.alloc(
            u32::try_from(width)?,
            u32::try_from(height)?,
            HalFormat(format),
            usage as u32,
        )?;

        let stride = i32::try_from(stride)?;
        write_out(out_stride, stride)?;
        write_out(out_handle, handle_into(handle))
    };

    to_errno(res())
}

/// Drops the reference taken by `dralloc_gralloc_alloc`.  The handle itself is destroyed by
/// `dralloc_handle_destroy`.
///
/// # Safety
///
/// `gr` and `handle` must be valid.
#[no_mangle]
pub unsafe extern "C" fn dralloc_gralloc_free(
    gr: *const dralloc_gralloc,
    handle: *const dralloc_handle,
) -> i32 {
    to_errno(gralloc_as_ref(gr).and_then(|gr| gr.free(handle_as_ref(handle)?)))
}

/// # Safety
///
/// `gr` and `handle` must be valid.
#[no_mangle]
pub unsafe extern "C" fn dralloc_gralloc_register(
    gr: *const dralloc_gralloc,
    handle: *const dralloc_handle,
) -> i32 {
    to_errno(gralloc_as_ref(gr).and_then(|gr| gr.register(handle_as_ref(handle)?)))
}

/// # Safety
///
/// `gr` and `handle` must be valid.
#[no_mangle]
pub unsafe extern "C" fn dralloc_gralloc_unregister(
    gr: *const dralloc_gralloc,
    handle: *const dralloc_handle,
) -> i32 {
    to_errno(gralloc_as_ref(gr).and_then(|gr| gr.unregister(handle_as_ref(handle)?)))
}

/// Locks a BO once `fence_fd` signals.  `fence_fd` is -1 or owned by the callee.
///
/// # Safety
///
/// `gr` and `handle` must be valid.  `out_addr` must be writable.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn dralloc_gralloc_lock(
    gr: *const dralloc_gralloc,
    handle: *const dralloc_handle,
    usage: i32,
    left: i32,
    top: i32,
    width: i32,
    height: i32,
    fence_fd: i32,
    out_addr: *mut *mut ffi::c_void,
) -> i32 {
    let fence = take_fd(fence_fd);
    let res = || -> Result<()> {
        let gr = gralloc_as_ref(gr)?;
        let rect = to_rect(left, top, width, height)?;
        let ptr = gr.lock_async(handle_as_ref(handle)?, usage as u32, rect, fence)?;

        write_out(out_addr, ptr.as_ptr() as *mut ffi::c_void)
    };

    to_errno(res())
}

/// Locks a YCbCr BO once `fence_fd` signals.  `fence_fd` is -1 or owned by the callee.
///
/// # Safety
///
/// `gr` and `handle` must be valid.  `out_ycbcr` must be writable.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn dralloc_gralloc_lock_ycbcr(
    gr: *const dralloc_gralloc,
    handle: *const dralloc_handle,
    usage: i32,
    left: i32,
    top: i32,
    width: i32,
    height: i32,
    fence_fd: i32,
    out_ycbcr: *mut dralloc_ycbcr,
) -> i32 {
    let fence = take_fd(fence_fd);
    let res = || -> Result<()> {
        let gr = gralloc_as_ref(gr)?;
        let rect = to_rect(left, top, width, height)?;
        let ycbcr = gr.lock_async_ycbcr(handle_as_ref(handle)?, usage as u32, rect, fence)?;

        let out = dralloc_ycbcr {
            y: ycbcr.y.as_ptr() as *mut ffi::c_void,
            cb: ycbcr.cb.as_ptr() as *mut ffi::c_void,
            cr: ycbcr.cr.as_ptr() as *mut ffi::c_void,
            ystride: usize::try_from(ycbcr.y_stride)?,
            cstride: usize::try_from(ycbcr.c_stride)?,
            chroma_step: ycbcr.chroma_step as usize,
            reserved: [0; 8],
        };
        write_out(out_ycbcr, out)
    };

    to_errno(res())
}

/// Unlocks a BO and waits for the CPU access to complete.
///
/// # Safety
///
/// `gr` and `handle` must be valid.
#[no_mangle]
pub unsafe extern "C" fn dralloc_gralloc_unlock(
    gr: *const dralloc_gralloc,
    handle: *const dralloc_handle,
) -> i32 {
    to_errno(gralloc_as_ref(gr).and_then(|gr| gr.unlock(handle_as_ref(handle)?)))
}

/// Unlocks a BO.  `out_fence_fd` receives -1 or a fence owned by the caller.
///
/// # Safety
///
/// `gr` and `handle` must be valid.  `out_fence_fd` must be writable.
#[no_mangle]
pub unsafe extern "C" fn dralloc_gralloc_unlock_async(
    gr: *const dralloc_gralloc,
    handle: *const dralloc_handle,
    out_fence_fd: *mut i32,
) -> i32 {
    let res = || -> Result<()> {
        let gr = gralloc_as_ref(gr)?;
        let fence = gr.unlock_async(handle_as_ref(handle)?)?;
        let fence_fd = fence.map_or(-1, IntoRawFd::into_raw_fd);

        write_out(out_fence_fd, fence_fd).inspect_err(|_| drop(take_fd(fence_fd)))
    };

    to_errno(res())
}

/// Returns the DRM fd of the device.  The fd is owned by the device.
///
/// # Safety
///
/// `gr` must be valid.  `out_fd` must be writable.
#[no_mangle]
pub unsafe extern "C" fn dralloc_gralloc_get_drm_fd(
    gr: *const dralloc_gralloc,
    out_fd: *mut i32,
) -> i32 {
    let res = gralloc_as_ref(gr)
        .and_then(|gr| gr.drm_fd().map(|fd| fd.as_raw_fd()))
        .and_then(|fd| write_out(out_fd, fd));

    to_errno(res)
}

/// # Safety
///
/// `gr` must be valid.
#[no_mangle]
pub unsafe extern "C" fn dralloc_gralloc_enter_vt(gr: *const dralloc_gralloc) -> i32 {
    to_errno(gralloc_as_ref(gr).and_then(Gralloc::enter_vt))
}

/// # Safety
///
/// `gr` must be valid.
#[no_mangle]
pub unsafe extern "C" fn dralloc_gralloc_leave_vt(gr: *const dralloc_gralloc) -> i32 {
    to_errno(gralloc_as_ref(gr).and_then(Gralloc::leave_vt))
}

/// # Safety
///
/// `gr` and `handle` must be valid.  `out_store` must be writable.
#[no_mangle]
pub unsafe extern "C" fn dralloc_gralloc_get_backing_store(
    gr: *const dralloc_gralloc,
    handle: *const dralloc_handle,
    out_store: *mut u64,
) -> i32 {
    let res = gralloc_as_ref(gr)
        .and_then(|gr| gr.backing_store(handle_as_ref(handle)?))
        .and_then(|store| write_out(out_store, store));

    to_errno(res)
}

/// Returns the stride of plane 0 in pixels.
///
/// # Safety
///
/// `handle` must be valid.  `out_stride` must be writable.
#[no_mangle]
pub unsafe extern "C" fn dralloc_handle_get_stride(
    handle: *const dralloc_handle,
    out_stride: *mut u32,
) -> i32 {
    let res = handle_as_ref(handle).and_then(|h| write_out(out_stride, h.info.pixel_stride));

    to_errno(res)
}

/// Returns the HAL format.
///
/// # Safety
///
/// `handle` must be valid.  `out_format` must be writable.
#[no_mangle]
pub unsafe extern "C" fn dralloc_handle_get_format(
    handle: *const dralloc_handle,
    out_format: *mut i32,
) -> i32 {
    let res = handle_as_ref(handle).and_then(|h| write_out(out_format, h.info.hal_format.0));

    to_errno(res)
}

/// # Safety
///
/// `handle` must be valid.  `out_width` and `out_height` must be writable.
#[no_mangle]
pub unsafe extern "C" fn dralloc_handle_get_dimensions(
    handle: *const dralloc_handle,
    out_width: *mut u32,
    out_height: *mut u32,
) -> i32 {
    let res = handle_as_ref(handle).and_then(|handle| {
        write_out(out_width, handle.info.width)?;
        write_out(out_height, handle.info.height)
    });

    to_errno(res)
}

/// Returns the number of fds of a handle.
///
/// # Safety
///
/// `handle` must be valid.
#[no_mangle]
pub unsafe extern "C" fn dralloc_handle_get_fd_count(handle: *const dralloc_handle) -> u32 {
    handle_as_ref(handle).map_or(0, |handle| handle.fds.len() as u32)
}

/// Returns the number of words of a serialized handle.
#[no_mangle]
pub extern "C" fn dralloc_handle_get_word_count() -> u32 {
    WIRE_WORDS as u32
}

/// Serializes a handle.  The fds stay owned by the handle.
///
/// # Safety
///
/// `handle` must be valid.  `out_fds` must have room for `fd_count` fds and `out_words` for
/// `word_count` words.
#[no_mangle]
pub unsafe extern "C" fn dralloc_handle_serialize(
    handle: *const dralloc_handle,
    out_fds: *mut i32,
    fd_count: u32,
    out_words: *mut u32,
    word_count: u32,
) -> i32 {
    let res = || -> Result<()> {
        let handle = handle_as_ref(handle)?;
        if out_fds.is_null()
            || out_words.is_null()
            || fd_count as usize != handle.fds.len()
            || word_count as usize != WIRE_WORDS
        {
            return Err(Error::InvalidArgument);
        }

        // SAFETY: out_fds has room for fd_count fds
        let fds = unsafe { slice::from_raw_parts_mut(out_fds, fd_count as usize) };
        for (dst, fd) in fds.iter_mut().zip(&handle.fds) {
            *dst = fd.as_raw_fd();
        }

        // SAFETY: out_words has room for word_count words
        let words = unsafe { slice::from_raw_parts_mut(out_words, word_count as usize) };
        words.copy_from_slice(&handle.to_wire());

        Ok(())
    };

    to_errno(res())
}

/// Reconstructs a handle.  The fds are owned by the callee, even on failure.
///
/// # Safety
///
/// `fds` must point to `fd_count` open fds and `words` to `word_count` words.  `out_handle`
/// must be writable.
#[no_mangle]
pub unsafe extern "C" fn dralloc_handle_deserialize(
    fds: *const i32,
    fd_count: u32,
    words: *const u32,
    word_count: u32,
    out_handle: *mut *mut dralloc_handle,
) -> i32 {
    let fds: Vec<OwnedFd> = if fds.is_null() {
        Vec::new()
    } else {
        // SAFETY: fds points to fd_count fds
        let raw = unsafe { slice::from_raw_parts(fds, fd_count as usize) };
        raw.iter()
            .filter_map(|&fd| take_fd(fd))
            .collect()
    };

    let res = || -> Result<()> {
        if words.is_null() {
            return Err(Error::InvalidArgument);
        }

        // SAFETY: words points to word_count words
        let words = unsafe { slice::from_raw_parts(words, word_count as usize) };
        let handle = Handle::from_wire(fds, words)?;

        let handle = handle_into(handle);
        write_out(out_handle, handle).inspect_err(|_| drop(handle_from(handle)))
    };

    to_errno(res())
}

/// Destroys a handle and closes its fds.
///
/// # Safety
///
/// `handle` must have been returned by this API and must not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn dralloc_handle_destroy(handle: *mut dralloc_handle) {
    if !handle.is_null() {
        let _ = handle_from(handle);
    }
}
