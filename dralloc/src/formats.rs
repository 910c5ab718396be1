// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! Format and modifier resolution.
//!
//! This module translates OS-level pixel formats to device formats and describes the plane
//! geometry of every device format dralloc knows about.

use super::backends::{Layout, UseFlags};
use super::types::{Error, Format, HalFormat, Modifier, Result, Size};
use std::str;

// from drm_fourcc.h
mod consts {
    macro_rules! fourcc_code {
        ($a:literal, $b:literal, $c:literal, $d:literal) => {
            ($a as u32) | (($b as u32) << 8) | (($c as u32) << 16) | (($d as u32) << 24)
        };
    }

    macro_rules! fourcc_mod_code {
        ($vendor:ident, $val:expr) => {
            (($vendor as u64) << 56) | (($val as u64) & ((1 << 56) - 1))
        };
    }

    pub const DRM_FORMAT_INVALID: u32 = 0;
    pub const DRM_FORMAT_R8: u32 = fourcc_code!('R', '8', ' ', ' ');
    pub const DRM_FORMAT_GR88: u32 = fourcc_code!('G', 'R', '8', '8');
    pub const DRM_FORMAT_R16: u32 = fourcc_code!('R', '1', '6', ' ');
    pub const DRM_FORMAT_BGR565: u32 = fourcc_code!('B', 'G', '1', '6');
    pub const DRM_FORMAT_RGB565: u32 = fourcc_code!('R', 'G', '1', '6');
    pub const DRM_FORMAT_BGR888: u32 = fourcc_code!('B', 'G', '2', '4');
    pub const DRM_FORMAT_RGB888: u32 = fourcc_code!('R', 'G', '2', '4');
    pub const DRM_FORMAT_ABGR8888: u32 = fourcc_code!('A', 'B', '2', '4');
    pub const DRM_FORMAT_XBGR8888: u32 = fourcc_code!('X', 'B', '2', '4');
    pub const DRM_FORMAT_ARGB8888: u32 = fourcc_code!('A', 'R', '2', '4');
    pub const DRM_FORMAT_XRGB8888: u32 = fourcc_code!('X', 'R', '2', '4');
    pub const DRM_FORMAT_ABGR2101010: u32 = fourcc_code!('A', 'B', '3', '0');
    pub const DRM_FORMAT_XBGR2101010: u32 = fourcc_code!('X', 'B', '3', '0');
    pub const DRM_FORMAT_ARGB2101010: u32 = fourcc_code!('A', 'R', '3', '0');
    pub const DRM_FORMAT_XRGB2101010: u32 = fourcc_code!('X', 'R', '3', '0');
    pub const DRM_FORMAT_ABGR16161616F: u32 = fourcc_code!('A', 'B', '4', 'H');
    pub const DRM_FORMAT_YUYV: u32 = fourcc_code!('Y', 'U', 'Y', 'V');
    pub const DRM_FORMAT_UYVY: u32 = fourcc_code!('U', 'Y', 'V', 'Y');
    pub const DRM_FORMAT_NV12: u32 = fourcc_code!('N', 'V', '1', '2');
    pub const DRM_FORMAT_NV21: u32 = fourcc_code!('N', 'V', '2', '1');
    pub const DRM_FORMAT_P010: u32 = fourcc_code!('P', '0', '1', '0');
    pub const DRM_FORMAT_YUV420: u32 = fourcc_code!('Y', 'U', '1', '2');
    pub const DRM_FORMAT_YVU420: u32 = fourcc_code!('Y', 'V', '1', '2');

    // Android-private fourccs
    pub const DRM_FORMAT_YVU420_ANDROID: u32 = fourcc_code!('9', '9', '9', '7');
    pub const DRM_FORMAT_FLEX_IMPLEMENTATION_DEFINED: u32 = fourcc_code!('9', '9', '9', '8');
    pub const DRM_FORMAT_FLEX_YCBCR_420_888: u32 = fourcc_code!('9', '9', '9', '9');

    const DRM_FORMAT_MOD_VENDOR_NONE: u64 = 0;
    const DRM_FORMAT_MOD_VENDOR_ARM: u64 = 0x08;
    const DRM_FORMAT_RESERVED: u64 = (1u64 << 56) - 1;

    // DRM_FORMAT_MOD_ARM_CODE(DRM_FORMAT_MOD_ARM_TYPE_MISC, ..)
    const DRM_FORMAT_MOD_ARM_TYPE_MISC: u64 = 0x3 << 52;

    pub const DRM_FORMAT_MOD_INVALID: u64 =
        fourcc_mod_code!(DRM_FORMAT_MOD_VENDOR_NONE, DRM_FORMAT_RESERVED);
    pub const DRM_FORMAT_MOD_LINEAR: u64 = fourcc_mod_code!(DRM_FORMAT_MOD_VENDOR_NONE, 0);
    pub const DRM_FORMAT_MOD_ARM_16X16_BLOCK_U_INTERLEAVED: u64 =
        fourcc_mod_code!(DRM_FORMAT_MOD_VENDOR_ARM, DRM_FORMAT_MOD_ARM_TYPE_MISC | 1);
}

pub const INVALID: Format = Format(consts::DRM_FORMAT_INVALID);
pub const R8: Format = Format(consts::DRM_FORMAT_R8);
pub const GR88: Format = Format(consts::DRM_FORMAT_GR88);
pub const R16: Format = Format(consts::DRM_FORMAT_R16);
pub const BGR565: Format = Format(consts::DRM_FORMAT_BGR565);
pub const RGB565: Format = Format(consts::DRM_FORMAT_RGB565);
pub const BGR888: Format = Format(consts::DRM_FORMAT_BGR888);
pub const RGB888: Format = Format(consts::DRM_FORMAT_RGB888);
pub const ABGR8888: Format = Format(consts::DRM_FORMAT_ABGR8888);
pub const XBGR8888: Format = Format(consts::DRM_FORMAT_XBGR8888);
pub const ARGB8888: Format = Format(consts::DRM_FORMAT_ARGB8888);
pub const XRGB8888: Format = Format(consts::DRM_FORMAT_XRGB8888);
pub const ABGR2101010: Format = Format(consts::DRM_FORMAT_ABGR2101010);
pub const XBGR2101010: Format = Format(consts::DRM_FORMAT_XBGR2101010);
pub const ARGB2101010: Format = Format(consts::DRM_FORMAT_ARGB2101010);
pub const XRGB2101010: Format = Format(consts::DRM_FORMAT_XRGB2101010);
pub const ABGR16161616F: Format = Format(consts::DRM_FORMAT_ABGR16161616F);
pub const YUYV: Format = Format(consts::DRM_FORMAT_YUYV);
pub const UYVY: Format = Format(consts::DRM_FORMAT_UYVY);
pub const NV12: Format = Format(consts::DRM_FORMAT_NV12);
pub const NV21: Format = Format(consts::DRM_FORMAT_NV21);
pub const P010: Format = Format(consts::DRM_FORMAT_P010);
pub const YUV420: Format = Format(consts::DRM_FORMAT_YUV420);
pub const YVU420: Format = Format(consts::DRM_FORMAT_YVU420);
pub const YVU420_ANDROID: Format = Format(consts::DRM_FORMAT_YVU420_ANDROID);
pub const FLEX_IMPLEMENTATION_DEFINED: Format =
    Format(consts::DRM_FORMAT_FLEX_IMPLEMENTATION_DEFINED);
pub const FLEX_YCBCR_420_888: Format = Format(consts::DRM_FORMAT_FLEX_YCBCR_420_888);

pub const MOD_INVALID: Modifier = Modifier(consts::DRM_FORMAT_MOD_INVALID);
pub const MOD_LINEAR: Modifier = Modifier(consts::DRM_FORMAT_MOD_LINEAR);
pub const MOD_ARM_16X16_BLOCK_U_INTERLEAVED: Modifier =
    Modifier(consts::DRM_FORMAT_MOD_ARM_16X16_BLOCK_U_INTERLEAVED);

/// Android HAL pixel formats.
pub mod hal {
    use crate::types::HalFormat;

    pub const RGBA_8888: HalFormat = HalFormat(1);
    pub const RGBX_8888: HalFormat = HalFormat(2);
    pub const RGB_888: HalFormat = HalFormat(3);
    pub const RGB_565: HalFormat = HalFormat(4);
    pub const BGRA_8888: HalFormat = HalFormat(5);
    pub const YCRCB_420_SP: HalFormat = HalFormat(0x11);
    pub const RGBA_FP16: HalFormat = HalFormat(0x16);
    pub const RAW16: HalFormat = HalFormat(0x20);
    pub const BLOB: HalFormat = HalFormat(0x21);
    pub const IMPLEMENTATION_DEFINED: HalFormat = HalFormat(0x22);
    pub const YCBCR_420_888: HalFormat = HalFormat(0x23);
    pub const RGBA_1010102: HalFormat = HalFormat(0x2b);
    pub const Y8: HalFormat = HalFormat(0x20203859);
    pub const YV12: HalFormat = HalFormat(0x32315659);
}

/// Resolves an OS-level pixel format to a device format.
///
/// Unknown codes are passed through unchanged, on the assumption that they are already fourccs.
pub fn resolve(hal_fmt: HalFormat) -> Format {
    match hal_fmt {
        hal::BGRA_8888 => ARGB8888,
        hal::IMPLEMENTATION_DEFINED => FLEX_IMPLEMENTATION_DEFINED,
        hal::RAW16 => R16,
        hal::RGB_565 => RGB565,
        hal::RGB_888 => BGR888,
        hal::RGBA_8888 => ABGR8888,
        hal::RGBX_8888 => XBGR8888,
        hal::YCBCR_420_888 => FLEX_YCBCR_420_888,
        hal::YV12 => YVU420_ANDROID,
        hal::BLOB | hal::Y8 => R8,
        hal::RGBA_1010102 => ABGR2101010,
        hal::RGBA_FP16 => ABGR16161616F,
        // YCrCb_420_SP
        hal::YCRCB_420_SP => NV21,
        HalFormat(code) => Format(code as u32),
    }
}

/// Resolves a flexible format to a concrete one, given the intended use.
pub fn resolve_flex(fmt: Format, use_flags: UseFlags) -> Format {
    match fmt {
        FLEX_IMPLEMENTATION_DEFINED => {
            if use_flags.intersects(UseFlags::CAMERA_READ | UseFlags::CAMERA_WRITE) {
                NV12
            } else {
                XBGR8888
            }
        }
        FLEX_YCBCR_420_888 => NV12,
        _ => fmt,
    }
}

pub fn fourcc(fmt: Format) -> String {
    let bytes = fmt.0.to_le_bytes();
    match str::from_utf8(&bytes) {
        Ok(s) if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') => format!("'{s}'"),
        _ => format!("0x{:x}", fmt.0),
    }
}

pub fn name(fmt: Format) -> Option<&'static str> {
    let name = match fmt.0 {
        consts::DRM_FORMAT_R8 => "R8",
        consts::DRM_FORMAT_GR88 => "GR88",
        consts::DRM_FORMAT_R16 => "R16",
        consts::DRM_FORMAT_BGR565 => "BGR565",
        consts::DRM_FORMAT_RGB565 => "RGB565",
        consts::DRM_FORMAT_BGR888 => "BGR888",
        consts::DRM_FORMAT_RGB888 => "RGB888",
        consts::DRM_FORMAT_ABGR8888 => "ABGR8888",
        consts::DRM_FORMAT_XBGR8888 => "XBGR8888",
        consts::DRM_FORMAT_ARGB8888 => "ARGB8888",
        consts::DRM_FORMAT_XRGB8888 => "XRGB8888",
        consts::DRM_FORMAT_ABGR2101010 => "ABGR2101010",
        consts::DRM_FORMAT_XBGR2101010 => "XBGR2101010",
        consts::DRM_FORMAT_ARGB2101010 => "ARGB2101010",
        consts::DRM_FORMAT_XRGB2101010 => "XRGB2101010",
        consts::DRM_FORMAT_ABGR16161616F => "ABGR16161616F",
        consts::DRM_FORMAT_YUYV => "YUYV",
        consts::DRM_FORMAT_UYVY => "UYVY",
        consts::DRM_FORMAT_NV12 => "NV12",
        consts::DRM_FORMAT_NV21 => "NV21",
        consts::DRM_FORMAT_P010 => "P010",
        consts::DRM_FORMAT_YUV420 => "YUV420",
        consts::DRM_FORMAT_YVU420 => "YVU420",
        consts::DRM_FORMAT_YVU420_ANDROID => "YVU420_ANDROID",
        consts::DRM_FORMAT_FLEX_IMPLEMENTATION_DEFINED => "FLEX_IMPLEMENTATION_DEFINED",
        consts::DRM_FORMAT_FLEX_YCBCR_420_888 => "FLEX_YCbCr_420_888",
        _ => {
            return None;
        }
    };

    Some(name)
}

struct PlanarLayout {
    num_planes: u8,
    horizontal_subsampling: [u8; 3],
    vertical_subsampling: [u8; 3],
    bytes_per_pixel: [u8; 3],
}

fn planar_layout(fmt: Format) -> Option<&'static PlanarLayout> {
    const PACKED_1BPP: PlanarLayout = PlanarLayout {
        num_planes: 1,
        horizontal_subsampling: [1, 0, 0],
        vertical_subsampling: [1, 0, 0],
        bytes_per_pixel: [1, 0, 0],
    };
    const PACKED_2BPP: PlanarLayout = PlanarLayout {
        bytes_per_pixel: [2, 0, 0],
        ..PACKED_1BPP
    };
    const PACKED_3BPP: PlanarLayout = PlanarLayout {
        bytes_per_pixel: [3, 0, 0],
        ..PACKED_1BPP
    };
    const PACKED_4BPP: PlanarLayout = PlanarLayout {
        bytes_per_pixel: [4, 0, 0],
        ..PACKED_1BPP
    };
    const PACKED_8BPP: PlanarLayout = PlanarLayout {
        bytes_per_pixel: [8, 0, 0],
        ..PACKED_1BPP
    };
    const BIPLANAR_YUV420: PlanarLayout = PlanarLayout {
        num_planes: 2,
        horizontal_subsampling: [1, 2, 0],
        vertical_subsampling: [1, 2, 0],
        bytes_per_pixel: [1, 2, 0],
    };
    const BIPLANAR_YUV420_2BPP: PlanarLayout = PlanarLayout {
        bytes_per_pixel: [2, 4, 0],
        ..BIPLANAR_YUV420
    };
    const TRIPLANAR_YUV420: PlanarLayout = PlanarLayout {
        num_planes: 3,
        horizontal_subsampling: [1, 2, 2],
        vertical_subsampling: [1, 2, 2],
        bytes_per_pixel: [1, 1, 1],
    };

    let layout = match fmt.0 {
        consts::DRM_FORMAT_R8 => &PACKED_1BPP,
        consts::DRM_FORMAT_GR88
        | consts::DRM_FORMAT_R16
        | consts::DRM_FORMAT_BGR565
        | consts::DRM_FORMAT_RGB565
        | consts::DRM_FORMAT_YUYV
        | consts::DRM_FORMAT_UYVY => &PACKED_2BPP,
        consts::DRM_FORMAT_BGR888 | consts::DRM_FORMAT_RGB888 => &PACKED_3BPP,
        consts::DRM_FORMAT_ABGR8888
        | consts::DRM_FORMAT_XBGR8888
        | consts::DRM_FORMAT_ARGB8888
        | consts::DRM_FORMAT_XRGB8888
        | consts::DRM_FORMAT_ABGR2101010
        | consts::DRM_FORMAT_XBGR2101010
        | consts::DRM_FORMAT_ARGB2101010
        | consts::DRM_FORMAT_XRGB2101010 => &PACKED_4BPP,
        consts::DRM_FORMAT_ABGR16161616F => &PACKED_8BPP,
        consts::DRM_FORMAT_NV12 | consts::DRM_FORMAT_NV21 => &BIPLANAR_YUV420,
        consts::DRM_FORMAT_P010 => &BIPLANAR_YUV420_2BPP,
        consts::DRM_FORMAT_YUV420
        | consts::DRM_FORMAT_YVU420
        | consts::DRM_FORMAT_YVU420_ANDROID => &TRIPLANAR_YUV420,
        _ => return None,
    };

    Some(layout)
}

/// Returns the plane count of a device format, or 0 for formats without a known layout.
pub fn num_planes(fmt: Format) -> u32 {
    planar_layout(fmt).map_or(0, |layout| layout.num_planes as u32)
}

pub fn bytes_per_pixel(fmt: Format, plane: u32) -> Result<u32> {
    let layout = planar_layout(fmt).ok_or(Error::Unsupported)?;
    if plane >= layout.num_planes as u32 {
        return Error::invalid();
    }

    Ok(layout.bytes_per_pixel[plane as usize] as u32)
}

/// Returns the minimum stride of a plane for the given width.
pub fn stride_from_format(fmt: Format, width: u32, plane: u32) -> Result<u32> {
    let layout = planar_layout(fmt).ok_or(Error::Unsupported)?;
    if plane >= layout.num_planes as u32 {
        return Error::invalid();
    }
    let plane = plane as usize;

    let plane_width = width.div_ceil(layout.horizontal_subsampling[plane] as u32);
    let mut stride = plane_width
        .checked_mul(layout.bytes_per_pixel[plane] as u32)
        .ok_or(Error::IntegerConversion)?;

    // Android YV12 requires 16-byte aligned chroma strides
    if fmt == YVU420_ANDROID {
        stride = if plane == 0 {
            stride.next_multiple_of(32)
        } else {
            stride.next_multiple_of(16)
        };
    }

    Ok(stride)
}

fn subsample_stride(fmt: Format, stride: Size, plane: usize) -> Size {
    if plane == 0 {
        return stride;
    }

    match fmt {
        YVU420_ANDROID => (stride / 2).next_multiple_of(16),
        YUV420 | YVU420 => stride.div_ceil(2),
        _ => stride,
    }
}

/// Computes a linear layout with planes packed back to back.
///
/// The stride of every plane is derived from the stride of plane 0.
pub fn packed_layout(fmt: Format, stride: u32, aligned_height: u32) -> Result<Layout> {
    let planar = planar_layout(fmt).ok_or(Error::Unsupported)?;

    let mut layout = Layout::new()
        .modifier(MOD_LINEAR)
        .plane_count(planar.num_planes as u32);

    let mut offset: Size = 0;
    for plane in 0..(planar.num_planes as usize) {
        let stride = subsample_stride(fmt, stride as Size, plane);
        let height = aligned_height.div_ceil(planar.vertical_subsampling[plane] as u32) as Size;
        let size = stride.checked_mul(height).ok_or(Error::IntegerConversion)?;

        layout.offsets[plane] = offset;
        layout.strides[plane] = stride;
        layout.sizes[plane] = size;
        offset = offset.checked_add(size).ok_or(Error::IntegerConversion)?;
    }

    layout.size = offset;

    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use drm_fourcc::{DrmFourcc, DrmModifier};

    const KNOWN_FORMATS: [(Format, DrmFourcc); 22] = [
        (R8, DrmFourcc::R8),
        (GR88, DrmFourcc::Gr88),
        (R16, DrmFourcc::R16),
        (BGR565, DrmFourcc::Bgr565),
        (RGB565, DrmFourcc::Rgb565),
        (BGR888, DrmFourcc::Bgr888),
        (RGB888, DrmFourcc::Rgb888),
        (ABGR8888, DrmFourcc::Abgr8888),
        (XBGR8888, DrmFourcc::Xbgr8888),
        (ARGB8888, DrmFourcc::Argb8888),
        (XRGB8888, DrmFourcc::Xrgb8888),
        (ABGR2101010, DrmFourcc::Abgr2101010),
        (XBGR2101010, DrmFourcc::Xbgr2101010),
        (ARGB2101010, DrmFourcc::Argb2101010),
        (XRGB2101010, DrmFourcc::Xrgb2101010),
        (YUYV, DrmFourcc::Yuyv),
        (UYVY, DrmFourcc::Uyvy),
        (NV12, DrmFourcc::Nv12),
        (NV21, DrmFourcc::Nv21),
        (P010, DrmFourcc::P010),
        (YUV420, DrmFourcc::Yuv420),
        (YVU420, DrmFourcc::Yvu420),
    ];

    #[test]
    fn consts() {
        assert_eq!(consts::DRM_FORMAT_INVALID, 0);
        for (fmt, drm_fmt) in KNOWN_FORMATS {
            assert_eq!(fmt.0, drm_fmt as u32, "{fmt}");
        }

        assert_eq!(MOD_INVALID.0, u64::from(DrmModifier::Invalid));
        assert_eq!(MOD_LINEAR.0, u64::from(DrmModifier::Linear));
        assert_eq!(MOD_ARM_16X16_BLOCK_U_INTERLEAVED.0, 0x0830000000000001);
    }

    #[test]
    fn fourcc() {
        assert_eq!(super::fourcc(R8), String::from("'R8  '"));
        assert_eq!(super::fourcc(YVU420_ANDROID), String::from("'9997'"));
        assert_eq!(
            super::fourcc(Format(0xffffffff)),
            String::from("0xffffffff")
        );
    }

    #[test]
    fn name() {
        assert_eq!(super::name(R8), Some("R8"));
        assert_eq!(super::name(INVALID), None);
        for (fmt, _) in KNOWN_FORMATS {
            assert!(super::name(fmt).is_some());
        }
    }

    #[test]
    fn resolve() {
        let table = [
            (hal::BGRA_8888, ARGB8888),
            (hal::IMPLEMENTATION_DEFINED, FLEX_IMPLEMENTATION_DEFINED),
            (hal::RAW16, R16),
            (hal::RGB_565, RGB565),
            (hal::RGB_888, BGR888),
            (hal::RGBA_8888, ABGR8888),
            (hal::RGBX_8888, XBGR8888),
            (hal::YCBCR_420_888, FLEX_YCBCR_420_888),
            (hal::YV12, YVU420_ANDROID),
            (hal::BLOB, R8),
            (hal::RGBA_1010102, ABGR2101010),
            (hal::RGBA_FP16, ABGR16161616F),
            (hal::Y8, R8),
        ];
        for (hal_fmt, fmt) in table {
            assert_eq!(super::resolve(hal_fmt), fmt);
        }

        // unknown codes are fourccs already
        assert_eq!(super::resolve(HalFormat(NV12.0 as i32)), NV12);
        assert_eq!(super::resolve(HalFormat(0x7777)), Format(0x7777));
    }

    #[test]
    fn resolve_flex() {
        assert_eq!(
            super::resolve_flex(FLEX_IMPLEMENTATION_DEFINED, UseFlags::CAMERA_WRITE),
            NV12
        );
        assert_eq!(
            super::resolve_flex(FLEX_IMPLEMENTATION_DEFINED, UseFlags::TEXTURE),
            XBGR8888
        );
        assert_eq!(
            super::resolve_flex(FLEX_YCBCR_420_888, UseFlags::empty()),
            NV12
        );
        assert_eq!(super::resolve_flex(RGB565, UseFlags::TEXTURE), RGB565);
    }

    #[test]
    fn num_planes() {
        assert_eq!(super::num_planes(R8), 1);
        assert_eq!(super::num_planes(NV12), 2);
        assert_eq!(super::num_planes(YVU420_ANDROID), 3);
        assert_eq!(super::num_planes(FLEX_YCBCR_420_888), 0);
        assert_eq!(super::num_planes(INVALID), 0);
        for (fmt, _) in KNOWN_FORMATS {
            assert_ne!(super::num_planes(fmt), 0);
        }
    }

    #[test]
    fn stride_from_format() {
        assert_eq!(super::stride_from_format(ABGR8888, 10, 0).unwrap(), 40);
        assert_eq!(super::stride_from_format(NV12, 11, 1).unwrap(), 12);
        assert_eq!(super::stride_from_format(YVU420_ANDROID, 100, 0).unwrap(), 128);
        assert_eq!(super::stride_from_format(YVU420_ANDROID, 100, 1).unwrap(), 64);
        assert!(super::stride_from_format(R8, 10, 1).is_err());
        assert!(super::stride_from_format(INVALID, 10, 0).is_err());
        assert_eq!(super::bytes_per_pixel(P010, 1).unwrap(), 4);
    }

    #[test]
    fn packed_layout() {
        let layout = super::packed_layout(R8, 16, 10).unwrap();
        let expected = Layout::new()
            .size(160)
            .modifier(MOD_LINEAR)
            .plane_count(1)
            .stride(0, 16)
            .plane_size(0, 160);
        assert_eq!(layout, expected);

        let layout = super::packed_layout(NV12, 1920, 1080).unwrap();
        assert_eq!(layout.plane_count, 2);
        assert_eq!(layout.strides[0], 1920);
        assert_eq!(layout.strides[1], 1920);
        assert_eq!(layout.offsets[1], 1920 * 1080);
        assert_eq!(layout.sizes[1], 1920 * 540);
        assert_eq!(layout.size, 1920 * 1080 * 3 / 2);

        let layout = super::packed_layout(YVU420_ANDROID, 128, 10).unwrap();
        assert_eq!(layout.strides[..3], [128, 64, 64]);
        assert_eq!(layout.offsets[..3], [0, 1280, 1280 + 320]);
        assert_eq!(layout.size, 1280 + 320 * 2);

        assert!(super::packed_layout(FLEX_YCBCR_420_888, 16, 16).is_err());
    }
}
