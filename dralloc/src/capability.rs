// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

//! Capability queries.
//!
//! Every backend declares what it can allocate as a table of combinations.  A request is
//! supported when a combination of its format covers all of its use flags.

use super::backends::{Backend, UseFlags};
use super::descriptor::Descriptor;
use super::formats;
use super::types::{Error, Format, Modifier};

/// A supported (format, modifier, use flags) combination.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Combination {
    pub format: Format,
    pub modifier: Modifier,
    pub use_flags: UseFlags,
}

impl Combination {
    pub fn new(format: Format, modifier: Modifier, use_flags: UseFlags) -> Self {
        Self {
            format,
            modifier,
            use_flags,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Combinations(Vec<Combination>);

impl Combinations {
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds a combination for each of `fmts`.
    pub fn add(&mut self, fmts: &[Format], modifier: Modifier, use_flags: UseFlags) {
        for &format in fmts {
            self.0.push(Combination::new(format, modifier, use_flags));
        }
    }

    /// Adds `use_flags` to the combinations of `fmt` with `modifier`.
    pub fn modify(&mut self, fmt: Format, modifier: Modifier, use_flags: UseFlags) {
        for combo in self.0.iter_mut() {
            if combo.format == fmt && combo.modifier == modifier {
                combo.use_flags |= use_flags;
            }
        }
    }

    /// Makes linear XRGB8888 and ARGB8888 usable as cursors and for scanout.
    pub fn modify_linear(&mut self) {
        let use_flags = UseFlags::CURSOR | UseFlags::SCANOUT;
        self.modify(formats::XRGB8888, formats::MOD_LINEAR, use_flags);
        self.modify(formats::ARGB8888, formats::MOD_LINEAR, use_flags);
    }

    /// Finds the first combination of `fmt` whose use flags cover `use_flags`.
    pub fn find(&self, fmt: Format, use_flags: UseFlags) -> Option<&Combination> {
        self.0
            .iter()
            .find(|combo| combo.format == fmt && combo.use_flags.contains(use_flags))
    }

    /// Finds the first combination of `fmt` with one of `modifiers` whose use flags cover
    /// `use_flags`.
    pub fn find_with_modifiers(
        &self,
        fmt: Format,
        use_flags: UseFlags,
        modifiers: &[Modifier],
    ) -> Option<&Combination> {
        self.0.iter().find(|combo| {
            combo.format == fmt
                && combo.use_flags.contains(use_flags)
                && modifiers.contains(&combo.modifier)
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Combination> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Returns true when `backend` can allocate `desc`.
///
/// `desc` must carry a resolved device format.  When `desc` lists modifiers, the BO must be
/// allocatable with one of them.
pub fn is_supported(backend: &dyn Backend, desc: &Descriptor) -> bool {
    let fmt = backend.resolve_format(desc.format, desc.use_flags);
    if formats::num_planes(fmt) == 0 {
        return false;
    }

    let combos = backend.combinations();
    if desc.modifiers.is_empty() {
        return combos
            .find(fmt, desc.use_flags)
            .is_some_and(|combo| has_planes(backend, fmt, combo.modifier));
    }

    if let Some(combo) = combos.find_with_modifiers(fmt, desc.use_flags, &desc.modifiers) {
        return has_planes(backend, fmt, combo.modifier);
    }

    // modifiers the backend can describe without listing them
    combos.find(fmt, desc.use_flags).is_some()
        && desc.modifiers.iter().any(|&modifier| {
            matches!(backend.num_planes_for_modifier(fmt, modifier), Ok(count) if count > 0)
        })
}

fn has_planes(backend: &dyn Backend, fmt: Format, modifier: Modifier) -> bool {
    match backend.num_planes_for_modifier(fmt, modifier) {
        Ok(count) => count > 0,
        Err(Error::Unsupported) => true,
        Err(_) => false,
    }
}

/// Returns a copy of `desc` without scanout, when scanout was requested along with texturing.
///
/// A display request can be served by GPU composition instead.  Scanout-only requests are
/// never relaxed.
pub fn relax_scanout(desc: &Descriptor) -> Option<Descriptor> {
    let use_flags = desc.use_flags;
    if !use_flags.contains(UseFlags::SCANOUT | UseFlags::TEXTURE) {
        return None;
    }

    Some(desc.clone().use_flags(use_flags - UseFlags::SCANOUT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::fake;

    #[test]
    fn test_combinations() {
        let mut combos = Combinations::new();
        assert!(combos.is_empty());

        combos.add(
            &[formats::XRGB8888, formats::NV12],
            formats::MOD_LINEAR,
            UseFlags::TEXTURE_MASK,
        );
        assert_eq!(combos.len(), 2);
        assert!(combos.find(formats::NV12, UseFlags::TEXTURE).is_some());
        assert!(combos.find(formats::NV12, UseFlags::RENDERING).is_none());
        assert!(combos.find(formats::R8, UseFlags::TEXTURE).is_none());

        combos.modify(formats::NV12, formats::MOD_LINEAR, UseFlags::HW_VIDEO_DECODER);
        let request = UseFlags::TEXTURE | UseFlags::HW_VIDEO_DECODER;
        assert!(combos.find(formats::NV12, request).is_some());
        assert!(combos.find(formats::XRGB8888, request).is_none());
        assert!(combos
            .find_with_modifiers(formats::NV12, request, &[formats::MOD_LINEAR])
            .is_some());
        assert!(combos
            .find_with_modifiers(formats::NV12, request, &[formats::MOD_INVALID])
            .is_none());

        // a different modifier is left alone
        combos.modify(formats::NV12, formats::MOD_INVALID, UseFlags::PROTECTED);
        assert!(combos.find(formats::NV12, UseFlags::PROTECTED).is_none());

        combos.modify_linear();
        let combo = combos.find(formats::XRGB8888, UseFlags::CURSOR).unwrap();
        assert!(combo.use_flags.contains(UseFlags::SCANOUT));
        assert!(combos.find(formats::NV12, UseFlags::SCANOUT).is_none());
    }

    #[test]
    fn test_is_supported() {
        let backend = fake::Backend::new();

        let desc = Descriptor::new()
            .size(64, 64)
            .format(formats::NV12)
            .use_flags(UseFlags::TEXTURE | UseFlags::HW_VIDEO_DECODER);
        assert!(is_supported(&backend, &desc));

        // flexible formats are resolved by the backend
        let desc = desc.format(formats::FLEX_YCBCR_420_888);
        assert!(is_supported(&backend, &desc));

        let desc = desc.format(formats::NV12).use_flags(UseFlags::SCANOUT);
        assert!(!is_supported(&backend, &desc));

        let desc = desc.format(formats::INVALID).use_flags(UseFlags::TEXTURE);
        assert!(!is_supported(&backend, &desc));
    }

    #[test]
    fn test_is_supported_with_modifiers() {
        let tiled = formats::MOD_ARM_16X16_BLOCK_U_INTERLEAVED;
        let mut combos = Combinations::new();
        combos.add(&[formats::ABGR8888], formats::MOD_LINEAR, UseFlags::TEXTURE_MASK);
        combos.add(&[formats::ABGR8888], tiled, UseFlags::TEXTURE);
        let backend = fake::Backend::with_combinations(combos);

        let desc = Descriptor::new()
            .size(64, 64)
            .format(formats::ABGR8888)
            .use_flags(UseFlags::TEXTURE);
        assert!(is_supported(&backend, &desc.clone().modifiers(vec![tiled])));
        assert!(is_supported(&backend, &desc.clone().modifiers(vec![formats::MOD_LINEAR])));

        // the tiled combination has no CPU access
        let sw = desc.clone().use_flags(UseFlags::TEXTURE | UseFlags::SW_READ_OFTEN);
        assert!(!is_supported(&backend, &sw.clone().modifiers(vec![tiled])));
        assert!(is_supported(&backend, &sw.modifiers(vec![tiled, formats::MOD_LINEAR])));

        let unknown = Modifier(0x0100_0000_0000_0001);
        assert!(!is_supported(&backend, &desc.modifiers(vec![unknown])));
    }

    #[test]
    fn test_relax_scanout() {
        let desc = Descriptor::new()
            .size(64, 64)
            .format(formats::ABGR8888)
            .use_flags(UseFlags::SCANOUT | UseFlags::TEXTURE | UseFlags::RENDERING);
        let relaxed = relax_scanout(&desc).unwrap();
        assert_eq!(relaxed.use_flags, UseFlags::TEXTURE | UseFlags::RENDERING);
        assert_eq!(relaxed.format, desc.format);

        let desc = desc.use_flags(UseFlags::SCANOUT);
        assert!(relax_scanout(&desc).is_none());

        let desc = desc.use_flags(UseFlags::TEXTURE);
        assert!(relax_scanout(&desc).is_none());
    }
}
