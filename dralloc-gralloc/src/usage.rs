// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! Gralloc usage bits and their translation.

use dralloc::{MapFlags, UseFlags};

pub const SW_READ_NEVER: u32 = 0x0;
pub const SW_READ_RARELY: u32 = 0x2;
pub const SW_READ_OFTEN: u32 = 0x3;
pub const SW_READ_MASK: u32 = 0xf;
pub const SW_WRITE_NEVER: u32 = 0x0;
pub const SW_WRITE_RARELY: u32 = 0x20;
pub const SW_WRITE_OFTEN: u32 = 0x30;
pub const SW_WRITE_MASK: u32 = 0xf0;
pub const HW_TEXTURE: u32 = 0x100;
pub const HW_RENDER: u32 = 0x200;
pub const HW_2D: u32 = 0x400;
pub const HW_COMPOSER: u32 = 0x800;
pub const HW_FB: u32 = 0x1000;
pub const EXTERNAL_DISP: u32 = 0x2000;
pub const PROTECTED: u32 = 0x4000;
pub const CURSOR: u32 = 0x8000;
pub const HW_VIDEO_ENCODER: u32 = 0x10000;
pub const HW_CAMERA_WRITE: u32 = 0x20000;
pub const HW_CAMERA_READ: u32 = 0x40000;
pub const RENDERSCRIPT: u32 = 0x100000;

/// Translates gralloc usage bits to BO use flags.
///
/// CURSOR and EXTERNAL_DISP are ignored.
pub fn convert_usage(usage: u32) -> UseFlags {
    let mut use_flags = UseFlags::empty();

    match usage & SW_READ_MASK {
        SW_READ_RARELY => use_flags |= UseFlags::SW_READ_RARELY,
        SW_READ_OFTEN => use_flags |= UseFlags::SW_READ_OFTEN,
        _ => (),
    }
    match usage & SW_WRITE_MASK {
        SW_WRITE_RARELY => use_flags |= UseFlags::SW_WRITE_RARELY,
        SW_WRITE_OFTEN => use_flags |= UseFlags::SW_WRITE_OFTEN,
        _ => (),
    }

    let table = [
        (HW_TEXTURE, UseFlags::TEXTURE),
        (HW_RENDER, UseFlags::RENDERING),
        (HW_2D, UseFlags::RENDERING),
        // composition by the GPU is an acceptable fallback
        (HW_COMPOSER, UseFlags::SCANOUT | UseFlags::TEXTURE),
        (HW_FB, UseFlags::FRAMEBUFFER),
        (PROTECTED, UseFlags::PROTECTED),
        // encoders read the buffer with the CPU
        (HW_VIDEO_ENCODER, UseFlags::SW_READ_OFTEN),
        (HW_CAMERA_WRITE, UseFlags::CAMERA_WRITE),
        (HW_CAMERA_READ, UseFlags::CAMERA_READ),
        (RENDERSCRIPT, UseFlags::RENDERSCRIPT),
    ];
    for (bit, flags) in table {
        if usage & bit != 0 {
            use_flags |= flags;
        }
    }

    use_flags
}

/// Translates the usage bits of a lock to map flags.
pub fn convert_map_usage(usage: u32) -> MapFlags {
    let mut map_flags = MapFlags::empty();
    if usage & SW_READ_MASK != 0 {
        map_flags |= MapFlags::READ;
    }
    if usage & SW_WRITE_MASK != 0 {
        map_flags |= MapFlags::WRITE;
    }

    map_flags
}
