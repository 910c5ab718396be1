// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

use super::types::{Access, Error, Mapping, Result, Size};
use nix::{fcntl, poll, sys, unistd};
use std::ffi::CString;
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd};
use std::path::Path;
use std::{io, num, slice};

pub fn open(path: impl AsRef<Path>) -> Result<OwnedFd> {
    let oflag = fcntl::OFlag::O_RDWR | fcntl::OFlag::O_CLOEXEC;
    open_with(path, oflag)
}

pub fn open_readonly(path: impl AsRef<Path>) -> Result<OwnedFd> {
    let oflag = fcntl::OFlag::O_RDONLY | fcntl::OFlag::O_CLOEXEC;
    open_with(path, oflag)
}

fn open_with(path: impl AsRef<Path>, oflag: fcntl::OFlag) -> Result<OwnedFd> {
    let mode = sys::stat::Mode::empty();

    let raw_fd = fcntl::open(path.as_ref(), oflag, mode)?;

    // SAFETY: raw_fd is valid
    let owned_fd = unsafe { OwnedFd::from_raw_fd(raw_fd) };

    Ok(owned_fd)
}

pub fn seek_end(fd: impl AsFd) -> Result<Size> {
    let raw_fd = fd.as_fd().as_raw_fd();
    let offset = unistd::lseek(raw_fd, 0, unistd::Whence::SeekEnd)?;
    unistd::lseek(raw_fd, 0, unistd::Whence::SeekSet)?;

    Ok(offset.try_into()?)
}

/// Returns the (st_dev, st_ino) pair of a file.
///
/// A dma-buf has the same pair in every process that holds an fd to it.
pub fn file_id(fd: impl AsFd) -> Result<(u64, u64)> {
    let stat = sys::stat::fstat(fd.as_fd().as_raw_fd())?;

    #[allow(clippy::unnecessary_cast)]
    Ok((stat.st_dev as u64, stat.st_ino as u64))
}

pub fn mmap(fd: impl AsFd, size: Size, access: Access) -> Result<Mapping> {
    let prot = match access {
        Access::Read => sys::mman::ProtFlags::PROT_READ,
        Access::Write => sys::mman::ProtFlags::PROT_WRITE,
        Access::ReadWrite => sys::mman::ProtFlags::PROT_READ | sys::mman::ProtFlags::PROT_WRITE,
    };
    let flags = sys::mman::MapFlags::MAP_SHARED;

    let len = num::NonZeroUsize::try_from(usize::try_from(size)?)?;
    let ptr =
        // SAFETY: clients assume the responsibility
        unsafe { sys::mman::mmap(None, len, prot, flags, fd, 0) }?;
    let mapping = Mapping { ptr, len };

    Ok(mapping)
}

pub fn munmap(mapping: Mapping) -> Result<()> {
    // SAFETY: ptr and len are from sys::mman::mmap
    unsafe { sys::mman::munmap(mapping.ptr, mapping.len.into()) }?;

    Ok(())
}

/// Waits until a sync fd signals, for at most `timeout_ms` milliseconds.
///
/// A timeout is reported as `ETIME`.
pub fn poll(fd: impl AsFd, access: Access, timeout_ms: u16) -> Result<()> {
    let timeout = poll::PollTimeout::from(timeout_ms);

    let events = match access {
        Access::Read => poll::PollFlags::POLLIN,
        Access::Write => poll::PollFlags::POLLOUT,
        Access::ReadWrite => poll::PollFlags::POLLIN | poll::PollFlags::POLLOUT,
    };

    loop {
        let mut poll_fd = poll::PollFd::new(fd.as_fd(), events);

        match poll::poll(slice::from_mut(&mut poll_fd), timeout) {
            Ok(0) => return Err(Error::Fence(io::Error::from(nix::Error::ETIME))),
            Ok(_) => {
                let revents = poll_fd.revents().unwrap_or(poll::PollFlags::POLLNVAL);
                if !(revents & !events).is_empty() {
                    return Err(Error::Fence(io::Error::from(nix::Error::EINVAL)));
                }

                return Ok(());
            }
            Err(err) => {
                if err == nix::Error::EINTR || err == nix::Error::EAGAIN {
                    continue;
                }
                return Err(Error::Fence(io::Error::from(err)));
            }
        }
    }
}

#[cfg(test)]
pub fn memfd_create(name: &str, size: Size) -> Result<OwnedFd> {
    let create_flags =
        sys::memfd::MemFdCreateFlag::MFD_CLOEXEC | sys::memfd::MemFdCreateFlag::MFD_ALLOW_SEALING;
    let seal_flags = fcntl::SealFlag::F_SEAL_SHRINK
        | fcntl::SealFlag::F_SEAL_GROW
        | fcntl::SealFlag::F_SEAL_SEAL;
    let fcntl_arg = fcntl::FcntlArg::F_ADD_SEALS(seal_flags);

    let c_name = CString::new(name)?;
    let memfd = sys::memfd::memfd_create(&c_name, create_flags)?;

    unistd::ftruncate(&memfd, size.try_into()?)?;
    fcntl::fcntl(memfd.as_raw_fd(), fcntl_arg)?;

    Ok(memfd)
}

// Based on
//
//   $ bindgen --no-doc-comments --no-layout-tests \
//       --allowlist-item '(dma_buf|DMA_BUF)_.*' \
//       /usr/include/linux/dma-buf.h
mod dma_buf {
    use super::*;

    const DMA_BUF_SYNC_READ: u64 = 1;
    const DMA_BUF_SYNC_WRITE: u64 = 2;
    const DMA_BUF_SYNC_START: u64 = 0;
    const DMA_BUF_SYNC_END: u64 = 4;

    #[repr(C)]
    struct dma_buf_sync {
        pub flags: u64,
    }

    const DMA_BUF_BASE: u8 = b'b';

    nix::ioctl_write_ptr!(dma_buf_ioctl_sync, DMA_BUF_BASE, 0, dma_buf_sync);
    nix::ioctl_write_ptr!(dma_buf_ioctl_set_name, DMA_BUF_BASE, 1, u64);

    pub fn dma_buf_sync(dmabuf: impl AsFd, access: Access, start: bool) -> Result<()> {
        let flags = match access {
            Access::Read => DMA_BUF_SYNC_READ,
            Access::Write => DMA_BUF_SYNC_WRITE,
            Access::ReadWrite => DMA_BUF_SYNC_READ | DMA_BUF_SYNC_WRITE,
        } | match start {
            true => DMA_BUF_SYNC_START,
            false => DMA_BUF_SYNC_END,
        };

        let dmabuf = dmabuf.as_fd().as_raw_fd();
        let arg = dma_buf_sync { flags };
        loop {
            // SAFETY: dmabuf and arg are valid
            let res = unsafe { dma_buf_ioctl_sync(dmabuf, &arg) };
            match res {
                Ok(_) => {
                    return Ok(());
                }
                Err(err) => {
                    if err == nix::Error::EINTR || err == nix::Error::EAGAIN {
                        continue;
                    }
                    return Err(Error::from(err));
                }
            }
        }
    }

    pub fn dma_buf_set_name(dmabuf: impl AsFd, name: &str) -> Result<()> {
        let dmabuf = dmabuf.as_fd().as_raw_fd();
        let c_name = CString::new(name)?;

        // SAFETY: dmabuf and c_name are valid
        unsafe { dma_buf_ioctl_set_name(dmabuf, c_name.as_ptr() as *const u64) }?;

        Ok(())
    }
}

pub use dma_buf::{dma_buf_set_name, dma_buf_sync};

// Based on
//
//   $ bindgen --no-doc-comments --no-layout-tests \
//       --allowlist-item '(dma_heap|DMA_HEAP)_.*' \
//       /usr/include/linux/dma-heap.h
mod dma_heap {
    use super::*;

    #[repr(C)]
    struct dma_heap_allocation_data {
        len: u64,
        fd: u32,
        fd_flags: u32,
        heap_flags: u64,
    }

    const DMA_HEAP_IOC_MAGIC: u8 = b'H';

    nix::ioctl_readwrite!(
        dma_heap_ioctl_alloc,
        DMA_HEAP_IOC_MAGIC,
        0x0,
        dma_heap_allocation_data
    );

    pub const DMA_HEAP_PATH: &str = "/dev/dma_heap";

    pub fn dma_heap_open(heap_dir: &Path, heap_name: &str) -> Result<OwnedFd> {
        open_readonly(heap_dir.join(heap_name))
    }

    pub fn dma_heap_alloc(heap_fd: impl AsFd, size: Size) -> Result<OwnedFd> {
        let fd_flags = (fcntl::OFlag::O_RDWR | fcntl::OFlag::O_CLOEXEC).bits() as u32;
        let mut arg = dma_heap_allocation_data {
            len: size,
            fd: 0,
            fd_flags,
            heap_flags: 0,
        };

        let heap_fd = heap_fd.as_fd().as_raw_fd();
        // SAFETY: heap_fd and arg are valid
        unsafe { dma_heap_ioctl_alloc(heap_fd, &mut arg) }?;

        // SAFETY: arg.fd is valid
        let dmabuf = unsafe { OwnedFd::from_raw_fd(arg.fd as i32) };
        Ok(dmabuf)
    }
}

pub use dma_heap::{dma_heap_alloc, dma_heap_open, DMA_HEAP_PATH};

#[cfg(feature = "drm")]
mod drm {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    pub const DRM_DIR_NAME: &str = "/dev/dri";
    const DRM_RENDER_MINOR_NAME: &str = "renderD";
    const DRM_PRIMARY_MINOR_NAME: &str = "card";

    fn scan(prefix: &str) -> Result<Vec<PathBuf>> {
        let mut paths: Vec<PathBuf> = fs::read_dir(DRM_DIR_NAME)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|s| s.starts_with(prefix))
            })
            .map(|entry| entry.path())
            .collect();
        paths.sort();

        Ok(paths)
    }

    /// Returns the DRM nodes, render nodes first.
    pub fn drm_scan_nodes() -> Result<Vec<PathBuf>> {
        let mut paths = scan(DRM_RENDER_MINOR_NAME)?;
        paths.append(&mut scan(DRM_PRIMARY_MINOR_NAME)?);

        Ok(paths)
    }
}

#[cfg(feature = "drm")]
pub use drm::drm_scan_nodes;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memfd() {
        let memfd = memfd_create("test", 4096).unwrap();
        assert_eq!(seek_end(&memfd).unwrap(), 4096);

        let dup = memfd.try_clone().unwrap();
        assert_eq!(file_id(&memfd).unwrap(), file_id(&dup).unwrap());

        let other = memfd_create("other", 4096).unwrap();
        assert_ne!(file_id(&memfd).unwrap(), file_id(&other).unwrap());
    }

    #[test]
    fn test_mmap() {
        let memfd = memfd_create("test", 64).unwrap();
        let mapping = mmap(&memfd, 64, Access::ReadWrite).unwrap();
        assert_eq!(mapping.len.get(), 64);
        munmap(mapping).unwrap();
    }

    #[test]
    fn test_poll() {
        use std::io::Write;
        use std::os::unix::net::UnixStream;

        let (rd, mut wr) = UnixStream::pair().unwrap();

        let err = poll(&rd, Access::Read, 1).unwrap_err();
        assert!(matches!(err, Error::Fence(_)));

        wr.write_all(&[0]).unwrap();
        poll(&rd, Access::Read, 1000).unwrap();
    }
}
