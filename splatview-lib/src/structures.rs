use crate::common::{float_to_unorm8, quantize_rot, unorm8_to_float, unquantize_rot};
use zerocopy::byteorder::little_endian::F32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const SPLAT_RECORD_SIZE: usize = 32;

/// One `.splat` record exactly as it sits in the file.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct RawSplat {
    pub position: [F32; 3],
    pub scale: [F32; 3],
    pub color: [u8; 4],
    pub rotation: [u8; 4],
}

const _: () = assert!(std::mem::size_of::<RawSplat>() == SPLAT_RECORD_SIZE);

/// A decoded splat. Scale and rotation are carried for completeness, the
/// renderer only reads position and color.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Splat {
    pub position: [f32; 3],
    pub scale: [f32; 3],
    pub color: [f32; 4],
    /// Quaternion (x, y, z, w), not renormalized after dequantization.
    pub rotation: [f32; 4],
}

impl From<&RawSplat> for Splat {
    fn from(raw: &RawSplat) -> Self {
        Splat {
            position: raw.position.map(|v| v.get()),
            scale: raw.scale.map(|v| v.get()),
            color: raw.color.map(unorm8_to_float),
            rotation: raw.rotation.map(unquantize_rot),
        }
    }
}

impl From<&Splat> for RawSplat {
    fn from(splat: &Splat) -> Self {
        RawSplat {
            position: splat.position.map(F32::new),
            scale: splat.scale.map(F32::new),
            color: splat.color.map(float_to_unorm8),
            rotation: splat.rotation.map(quantize_rot),
        }
    }
}

/// Splats in file order together with the order they should be drawn in.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SplatSet {
    splats: Vec<Splat>,
    order: Vec<u32>,
}

impl SplatSet {
    pub fn from_file_order(splats: Vec<Splat>) -> Self {
        let order = (0..splats.len() as u32).collect();
        SplatSet { splats, order }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.splats.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.splats.is_empty()
    }

    /// Splats as decoded, ignoring any depth sort.
    #[inline]
    pub fn file_order(&self) -> &[Splat] {
        &self.splats
    }

    /// Current draw order as indices into [`SplatSet::file_order`].
    #[inline]
    pub fn order(&self) -> &[u32] {
        &self.order
    }

    pub fn get(&self, i: usize) -> Option<&Splat> {
        self.order.get(i).map(|&idx| &self.splats[idx as usize])
    }

    /// Iterates in draw order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Splat> + '_ {
        self.order.iter().map(move |&idx| &self.splats[idx as usize])
    }

    pub(crate) fn set_order(&mut self, order: Vec<u32>) {
        debug_assert_eq!(order.len(), self.splats.len());
        self.order = order;
    }
}
