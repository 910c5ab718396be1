// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! The rendering-driver-mediated backend.
//!
//! BOs are DRI images created by the userspace rendering driver, which picks layouts that its
//! hardware can sample and render.

use super::{ImportData, Layout, MapFlags, Metadata, Payload, UseFlags, Vma, MAX_PLANES};
use crate::capability::Combinations;
use crate::descriptor::Descriptor;
use crate::dri_interface::{consts::*, Driver, __DRIimage};
use crate::formats;
use crate::node::Node;
use crate::types::{Error, Format, Mapping, Modifier, Result, Size};
use crate::utils;
use std::ffi::{c_int, c_uint};
use std::num::NonZeroUsize;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;

#[cfg(target_pointer_width = "64")]
const DEFAULT_DRI_DIR: &str = "/vendor/lib64/dri";
#[cfg(not(target_pointer_width = "64"))]
const DEFAULT_DRI_DIR: &str = "/vendor/lib/dri";

const RENDER_FORMATS: [Format; 9] = [
    formats::ARGB8888,
    formats::XRGB8888,
    formats::ABGR8888,
    formats::XBGR8888,
    formats::RGB565,
    formats::ABGR2101010,
    formats::XBGR2101010,
    formats::ARGB2101010,
    formats::XRGB2101010,
];

const TEXTURE_FORMATS: [Format; 5] = [
    formats::R8,
    formats::NV12,
    formats::NV21,
    formats::YVU420,
    formats::YVU420_ANDROID,
];

fn combinations() -> Combinations {
    let mut combos = Combinations::new();

    combos.add(
        &RENDER_FORMATS,
        formats::MOD_LINEAR,
        UseFlags::RENDER_MASK | UseFlags::SCANOUT,
    );
    combos.add(
        &TEXTURE_FORMATS,
        formats::MOD_LINEAR,
        UseFlags::TEXTURE_MASK,
    );

    let video_camera = UseFlags::HW_VIDEO_ENCODER
        | UseFlags::HW_VIDEO_DECODER
        | UseFlags::CAMERA_READ
        | UseFlags::CAMERA_WRITE;
    combos.modify(formats::NV12, formats::MOD_LINEAR, video_camera);
    // BLOB buffers back camera and codec bitstreams
    combos.modify(formats::R8, formats::MOD_LINEAR, video_camera);
    combos.modify(formats::NV21, formats::MOD_LINEAR, UseFlags::HW_VIDEO_ENCODER);
    combos.modify_linear();

    combos
}

fn dri_format(fmt: Format) -> Option<c_int> {
    let dri_fmt = match fmt {
        formats::RGB565 => DRI_IMAGE_FORMAT_RGB565,
        formats::XRGB8888 => DRI_IMAGE_FORMAT_XRGB8888,
        formats::ARGB8888 => DRI_IMAGE_FORMAT_ARGB8888,
        formats::ABGR8888 => DRI_IMAGE_FORMAT_ABGR8888,
        formats::XBGR8888 => DRI_IMAGE_FORMAT_XBGR8888,
        formats::R8 => DRI_IMAGE_FORMAT_R8,
        formats::GR88 => DRI_IMAGE_FORMAT_GR88,
        formats::XRGB2101010 => DRI_IMAGE_FORMAT_XRGB2101010,
        formats::ARGB2101010 => DRI_IMAGE_FORMAT_ARGB2101010,
        formats::XBGR2101010 => DRI_IMAGE_FORMAT_XBGR2101010,
        formats::ABGR2101010 => DRI_IMAGE_FORMAT_ABGR2101010,
        _ => return None,
    };

    Some(dri_fmt)
}

fn dri_use(use_flags: UseFlags) -> c_uint {
    // the handle and the stride are only queryable from shared images
    let mut dri_use = DRI_IMAGE_USE_SHARE;

    if use_flags.contains(UseFlags::SCANOUT) {
        dri_use |= DRI_IMAGE_USE_SCANOUT;
    }
    if use_flags.contains(UseFlags::CURSOR) {
        dri_use |= DRI_IMAGE_USE_CURSOR;
    }
    if use_flags.intersects(UseFlags::LINEAR | UseFlags::SW_MASK) {
        dri_use |= DRI_IMAGE_USE_LINEAR;
    }
    if use_flags.contains(UseFlags::PROTECTED) {
        dri_use |= DRI_IMAGE_USE_PROTECTED;
    }

    dri_use
}

fn dri_map_flags(flags: MapFlags) -> c_uint {
    let mut dri_flags = 0;
    if flags.contains(MapFlags::READ) {
        dri_flags |= DRI_IMAGE_TRANSFER_READ;
    }
    if flags.contains(MapFlags::WRITE) {
        dri_flags |= DRI_IMAGE_TRANSFER_WRITE;
    }

    dri_flags
}

/// Returns the dimensions of an R8 surface that holds the packed layout of `fmt`.
fn r8_extent(fmt: Format, width: u32, height: u32) -> Result<(u32, u32)> {
    let stride = formats::stride_from_format(fmt, width, 0)?;
    let layout = formats::packed_layout(fmt, stride, height)?;

    let r8_width = stride / formats::bytes_per_pixel(formats::R8, 0)?;
    let r8_height = layout.size.div_ceil(Size::from(stride)).try_into()?;

    Ok((r8_width, r8_height))
}

/// A DRI image.  Dropping it destroys the image.
pub struct Image {
    driver: Arc<Driver>,
    ptr: NonNull<__DRIimage>,
    // the extent of the image itself, which differs from the BO for R8 surfaces
    width: u32,
    height: u32,
    // all planes live in plane 0 of an R8 surface
    r8: bool,
}

// SAFETY: DRI images are not tied to a thread and are only mapped under the context lock
unsafe impl Send for Image {}
// SAFETY: see above
unsafe impl Sync for Image {}

impl Image {
    fn plane_fd(&self, plane: usize) -> Result<OwnedFd> {
        let plane = if self.r8 { 0 } else { plane };
        let fd: RawFd = self
            .driver
            .with_plane(self.ptr, plane, |img| {
                self.driver.query_image(img, DRI_IMAGE_ATTRIB_FD)
            })??;
        if fd < 0 {
            return Error::ctx("bad DRI image fd");
        }

        // SAFETY: queryImage returns a new fd owned by the caller
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        Ok(fd)
    }

    fn query(&self, attrib: c_int) -> Result<c_int> {
        self.driver.query_image(self.ptr, attrib)
    }

    fn query_plane(&self, plane: usize, attrib: c_int) -> Result<c_int> {
        self.driver
            .with_plane(self.ptr, plane, |img| self.driver.query_image(img, attrib))?
    }

    fn query_modifier(&self) -> Modifier {
        let upper = self.query(DRI_IMAGE_ATTRIB_MODIFIER_UPPER);
        let lower = self.query(DRI_IMAGE_ATTRIB_MODIFIER_LOWER);
        match (upper, lower) {
            (Ok(upper), Ok(lower)) => {
                Modifier(((upper as u32 as u64) << 32) | lower as u32 as u64)
            }
            _ => formats::MOD_INVALID,
        }
    }

    /// Queries the layout chosen by the driver.
    fn query_layout(&self) -> Result<Layout> {
        let plane_count = match self.query(DRI_IMAGE_ATTRIB_NUM_PLANES) {
            Ok(count) => u32::try_from(count)?,
            Err(_) => 1,
        };
        if plane_count == 0 || plane_count as usize > MAX_PLANES {
            return Error::ctx("bad DRI plane count");
        }

        let mut layout = Layout::new()
            .modifier(self.query_modifier())
            .plane_count(plane_count);

        let mut keys = [0u64; MAX_PLANES];
        let mut sizes = [0 as Size; MAX_PLANES];
        for plane in 0..(plane_count as usize) {
            let stride = self.query_plane(plane, DRI_IMAGE_ATTRIB_STRIDE)?;
            let offset = self.query_plane(plane, DRI_IMAGE_ATTRIB_OFFSET)?;
            let handle = self.query_plane(plane, DRI_IMAGE_ATTRIB_HANDLE)?;
            let fd = self.plane_fd(plane)?;

            layout.strides[plane] = stride.try_into()?;
            layout.offsets[plane] = offset.try_into()?;
            keys[plane] = handle as u32 as u64;
            sizes[plane] = utils::seek_end(&fd)?;
        }

        layout.derive_plane_sizes(&keys, &sizes)?;

        Ok(layout)
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        self.driver.destroy_image(self.ptr);
    }
}

pub struct Backend {
    driver: Arc<Driver>,
    combos: Combinations,
}

impl Backend {
    fn image(&self, ptr: NonNull<__DRIimage>, width: u32, height: u32, r8: bool) -> Image {
        Image {
            driver: self.driver.clone(),
            ptr,
            width,
            height,
            r8,
        }
    }

    fn supported_modifiers(&self, fmt: Format, modifiers: &[Modifier]) -> Result<Vec<Modifier>> {
        let modifiers = match self.driver.query_modifiers(fmt.0) {
            Ok(supported) => modifiers
                .iter()
                .filter(|m| supported.contains(m))
                .copied()
                .collect(),
            Err(_) => modifiers.to_vec(),
        };

        if modifiers.is_empty() {
            log::debug!("no supported modifier for {fmt}");
            return Error::unsupported();
        }

        Ok(modifiers)
    }

    fn create_r8(&self, desc: &Descriptor) -> Result<(Payload, Layout)> {
        let (width, height) = r8_extent(desc.format, desc.width, desc.height)?;
        let dri_fmt = DRI_IMAGE_FORMAT_R8;

        let ptr = if desc.modifiers.is_empty() {
            let dri_use = dri_use(desc.use_flags | UseFlags::LINEAR);
            self.driver.create_image(width, height, dri_fmt, dri_use)?
        } else {
            let modifiers = self.supported_modifiers(formats::R8, &desc.modifiers)?;
            self.driver
                .create_image_with_modifiers(width, height, dri_fmt, &modifiers)?
        };
        let img = self.image(ptr, width, height, true);

        let stride = u32::try_from(img.query(DRI_IMAGE_ATTRIB_STRIDE)?)?;
        let mut layout = formats::packed_layout(desc.format, stride, desc.height)?;
        layout.size = Size::from(stride) * Size::from(height);

        Ok((Payload::Dri(img), layout))
    }
}

impl super::Backend for Backend {
    fn name(&self) -> &'static str {
        "dri"
    }

    fn combinations(&self) -> &Combinations {
        &self.combos
    }

    fn num_planes_for_modifier(&self, fmt: Format, modifier: Modifier) -> Result<u32> {
        match self.driver.query_num_planes(fmt.0, modifier) {
            Err(Error::MissingCapability(_)) => Error::unsupported(),
            res => res,
        }
    }

    fn create(&self, desc: &Descriptor) -> Result<(Payload, Layout)> {
        let Some(dri_fmt) = dri_format(desc.format) else {
            return self.create_r8(desc);
        };

        let ptr = if desc.modifiers.is_empty() {
            let dri_use = dri_use(desc.use_flags);
            self.driver
                .create_image(desc.width, desc.height, dri_fmt, dri_use)?
        } else {
            let modifiers = self.supported_modifiers(desc.format, &desc.modifiers)?;
            self.driver
                .create_image_with_modifiers(desc.width, desc.height, dri_fmt, &modifiers)?
        };
        let img = self.image(ptr, desc.width, desc.height, false);
        let layout = img.query_layout()?;

        Ok((Payload::Dri(img), layout))
    }

    fn import(&self, data: &ImportData) -> Result<(Payload, Layout)> {
        let count = data.plane_count() as usize;
        if count == 0 || count > MAX_PLANES {
            return Error::invalid();
        }

        let fds: Vec<RawFd> = data.fds.iter().map(|fd| fd.as_raw_fd()).collect();
        let mut strides: Vec<c_int> = Vec::with_capacity(count);
        let mut offsets: Vec<c_int> = Vec::with_capacity(count);
        for plane in 0..count {
            strides.push(data.strides[plane].try_into()?);
            offsets.push(data.offsets[plane].try_into()?);
        }

        let ptr = if data.modifier.is_invalid() {
            self.driver.create_image_from_fds(
                data.width,
                data.height,
                data.format.0,
                &fds,
                &strides,
                &offsets,
            )?
        } else {
            self.driver.create_image_from_dma_bufs2(
                data.width,
                data.height,
                data.format.0,
                data.modifier,
                &fds,
                &strides,
                &offsets,
            )?
        };
        let img = self.image(ptr, data.width, data.height, false);
        let layout = img.query_layout()?;

        Ok((Payload::Dri(img), layout))
    }

    fn plane_fd(&self, payload: &Payload, plane: usize) -> Result<OwnedFd> {
        payload.dri()?.plane_fd(plane)
    }

    fn map(&self, payload: &Payload, meta: &Metadata, flags: MapFlags) -> Result<Vma> {
        let img = payload.dri()?;
        if flags.is_empty() {
            return Error::invalid();
        }

        let (addr, stride, token) =
            self.driver
                .map_image(img.ptr, img.width, img.height, dri_map_flags(flags))?;

        let len = NonZeroUsize::new(meta.layout.size.try_into()?).ok_or(Error::InvalidArgument)?;
        let mapping = Mapping { ptr: addr, len };

        let mut map_strides = meta.layout.strides;
        if !img.r8 {
            map_strides[0] = stride.try_into()?;
        }

        Ok(Vma::new(mapping, map_strides, flags).token(token))
    }

    fn unmap(&self, payload: &Payload, vma: Vma) -> Result<()> {
        let img = payload.dri()?;
        let token = vma.token.ok_or(Error::InvalidArgument)?;

        self.driver.unmap_image(img.ptr, token)
    }
}

pub struct Builder {
    node: Option<Node>,
    node_path: Option<PathBuf>,
    device_id: Option<u64>,
    dri_dir: PathBuf,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            node: None,
            node_path: None,
            device_id: None,
            dri_dir: PathBuf::from(DEFAULT_DRI_DIR),
        }
    }
}

impl Builder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Uses an opened node instead of opening one.
    pub fn node(mut self, node: Node) -> Self {
        self.node = Some(node);
        self
    }

    pub fn node_path(mut self, node_path: impl AsRef<Path>) -> Self {
        self.node_path = Some(PathBuf::from(node_path.as_ref()));
        self
    }

    pub fn device_id(mut self, device_id: u64) -> Self {
        self.device_id = Some(device_id);
        self
    }

    pub fn dri_dir(mut self, dri_dir: impl AsRef<Path>) -> Self {
        self.dri_dir = PathBuf::from(dri_dir.as_ref());
        self
    }

    pub fn build(self) -> Result<Backend> {
        let node = match self.node {
            Some(node) => node,
            None => Node::open(self.node_path.as_deref(), self.device_id)?,
        };

        let driver = Driver::load(node, &self.dri_dir)?;
        log::info!("dri backend initialized (driver: {})", driver.name());

        let backend = Backend {
            driver: Arc::new(driver),
            combos: combinations(),
        };

        Ok(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combinations() {
        let combos = combinations();

        assert!(combos
            .find(formats::ABGR8888, UseFlags::RENDERING | UseFlags::SCANOUT)
            .is_some());
        assert!(combos.find(formats::XRGB8888, UseFlags::CURSOR).is_some());

        let camera = UseFlags::CAMERA_WRITE | UseFlags::SW_READ_OFTEN;
        assert!(combos.find(formats::R8, camera).is_some());
        assert!(combos.find(formats::NV12, camera).is_some());
        assert!(combos.find(formats::NV21, camera).is_none());
        assert!(combos.find(formats::NV12, UseFlags::RENDERING).is_none());
        assert!(combos.find(formats::NV12, UseFlags::SCANOUT).is_none());
    }

    #[test]
    fn test_dri_format() {
        assert_eq!(dri_format(formats::XBGR8888), Some(DRI_IMAGE_FORMAT_XBGR8888));
        assert_eq!(dri_format(formats::R8), Some(DRI_IMAGE_FORMAT_R8));
        assert_eq!(dri_format(formats::NV12), None);
        assert_eq!(dri_format(formats::YVU420_ANDROID), None);
    }

    #[test]
    fn test_dri_use() {
        assert_eq!(dri_use(UseFlags::TEXTURE), DRI_IMAGE_USE_SHARE);
        assert_eq!(
            dri_use(UseFlags::SCANOUT | UseFlags::CURSOR),
            DRI_IMAGE_USE_SHARE | DRI_IMAGE_USE_SCANOUT | DRI_IMAGE_USE_CURSOR
        );
        assert_eq!(
            dri_use(UseFlags::SW_READ_RARELY),
            DRI_IMAGE_USE_SHARE | DRI_IMAGE_USE_LINEAR
        );
        assert_eq!(
            dri_use(UseFlags::PROTECTED),
            DRI_IMAGE_USE_SHARE | DRI_IMAGE_USE_PROTECTED
        );
    }

    #[test]
    fn test_dri_map_flags() {
        assert_eq!(dri_map_flags(MapFlags::READ), DRI_IMAGE_TRANSFER_READ);
        assert_eq!(
            dri_map_flags(MapFlags::READ | MapFlags::WRITE),
            DRI_IMAGE_TRANSFER_READ | DRI_IMAGE_TRANSFER_WRITE
        );
    }

    #[test]
    fn test_r8_extent() {
        // 1.5 bytes per pixel
        assert_eq!(r8_extent(formats::NV12, 64, 64).unwrap(), (64, 96));
        assert_eq!(r8_extent(formats::NV12, 1920, 1080).unwrap(), (1920, 1620));

        // luma stride aligned to 32, chroma strides to 16
        let (width, height) = r8_extent(formats::YVU420_ANDROID, 100, 10).unwrap();
        assert_eq!(width, 128);
        assert_eq!(u64::from(width) * u64::from(height), 128 * 10 + 2 * 64 * 5);

        assert!(r8_extent(formats::INVALID, 64, 64).is_err());
    }
}
