// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! A memfd-backed backend for tests.

use dralloc::{
    dma_buf, formats, Backend, Builder, Combinations, Descriptor, ImportData, Layout,
    MapFlags, Metadata, Payload, Result, UseFlags, Vma,
};
use std::fs::File;
use std::os::fd::{FromRawFd, OwnedFd};
use std::sync::Arc;

fn memfd(size: u64) -> OwnedFd {
    // SAFETY: the name is a valid C string
    let fd = unsafe { libc::memfd_create(c"dralloc-test".as_ptr(), libc::MFD_CLOEXEC) };
    assert!(fd >= 0);

    // SAFETY: fd is a new fd owned by nobody else
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };
    let file = File::from(fd);
    file.set_len(size).unwrap();

    OwnedFd::from(file)
}

struct Memfd {
    combos: Combinations,
}

impl Memfd {
    fn new() -> Self {
        let mut combos = Combinations::new();
        combos.add(
            &[formats::XBGR8888, formats::ABGR8888],
            formats::MOD_LINEAR,
            UseFlags::RENDER_MASK,
        );
        combos.add(
            &[formats::XRGB8888],
            formats::MOD_LINEAR,
            UseFlags::RENDER_MASK | UseFlags::SCANOUT,
        );
        combos.add(
            &[formats::NV12, formats::YVU420_ANDROID, formats::R8],
            formats::MOD_LINEAR,
            UseFlags::TEXTURE_MASK | UseFlags::CAMERA_READ | UseFlags::CAMERA_WRITE,
        );

        Self { combos }
    }
}

impl Backend for Memfd {
    fn name(&self) -> &'static str {
        "memfd"
    }

    fn combinations(&self) -> &Combinations {
        &self.combos
    }

    fn create(&self, desc: &Descriptor) -> Result<(Payload, Layout)> {
        let width = desc.width.next_multiple_of(16);
        let stride = formats::stride_from_format(desc.format, width, 0)?;
        let layout = formats::packed_layout(desc.format, stride, desc.height)?;

        let res = dma_buf::Resource::from_shared(memfd(layout.size), layout.plane_count)?;

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
}

/// Returns a device builder with the memfd backend.
pub fn builder() -> Builder {
    Builder::new().backend(Arc::new(Memfd::new()))
}

pub fn device() -> Arc<dralloc::Device> {
    builder().build().unwrap()
}
