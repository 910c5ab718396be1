// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

use dralloc::{formats, BackendKind, Descriptor, MapFlags, Rect, UseFlags};
use std::env;

fn main() {
    env_logger::init();

    let kind = match env::args().nth(1).as_deref() {
        Some("kernel") => BackendKind::KernelDirect,
        Some("dri") => BackendKind::Mediated,
        _ => BackendKind::Auto,
    };
    let dev = dralloc::Builder::new().kind(kind).build().unwrap();
    println!("backend {}", dev.backend_name());

    let width = 1920;
    let height = 1080;
    let desc = Descriptor::new()
        .size(width, height)
        .hal_format(formats::hal::YCBCR_420_888)
        .use_flags(UseFlags::TEXTURE | UseFlags::HW_VIDEO_DECODER | UseFlags::SW_WRITE_OFTEN);
    let handle = dev.allocate(&desc).unwrap();

    let info = handle.info;
    println!(
        "bo size {}x{} alloc {} format {} modifier 0x{:x}",
        width, height, info.size, info.format, info.modifier.0,
    );
    for plane in 0..(info.plane_count as usize) {
        println!(
            "  plane {}: offset {} stride {} size {}",
            plane, info.offsets[plane], info.strides[plane], info.sizes[plane]
        );
    }

    // another process would receive the fds and the words
    let words = handle.to_wire();
    let received = dralloc::Handle::from_wire(handle.try_clone().unwrap().fds, &words).unwrap();
    dev.retain(&received).unwrap();
    println!("refcount {}", dev.refcount(&received).unwrap());

    let ycbcr = dev
        .lock_ycbcr(&received, Rect::new(0, 0, width, height), MapFlags::WRITE, None)
        .unwrap();
    println!(
        "ycbcr y stride {} c stride {} chroma step {}",
        ycbcr.y_stride, ycbcr.c_stride, ycbcr.chroma_step
    );
    dev.unlock(&received).unwrap();

    dev.release(&received).unwrap();
    dev.release(&handle).unwrap();
}
