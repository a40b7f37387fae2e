use crate::config::{DepthOrder, RenderConfig};
use crate::structures::SplatSet;
use glam::{Mat4, Vec3};
use std::cmp::Ordering;

/// What a splat's depth is measured against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DepthKey {
    /// Signed distance along a viewing direction in world space.
    Axis(Vec3),
    /// View-space depth, `-(view * p).z`.
    View(Mat4),
}

impl DepthKey {
    /// Depth of `position` under this key. `-0.0` comes back as `0.0`, and
    /// coordinates along zero axis components are ignored, so an infinite
    /// `x` does not poison a pure Z key.
    #[inline]
    pub fn depth(&self, position: [f32; 3]) -> f32 {
        let depth = match self {
            DepthKey::Axis(axis) => axis
                .to_array()
                .iter()
                .zip(position)
                .filter(|(a, _)| **a != 0.0)
                .map(|(a, p)| a * p)
                .sum::<f32>(),
            DepthKey::View(view) => -view.transform_point3(Vec3::from_array(position)).z,
        };
        depth + 0.0
    }
}

/// Draw-order comparison of two depth keys. NaN keys have no place on the
/// depth axis and go last in either direction.
#[inline]
fn draw_cmp(a: f32, b: f32, order: DepthOrder) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => match order {
            DepthOrder::FarToNear => b.total_cmp(&a),
            DepthOrder::NearToFar => a.total_cmp(&b),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthSort {
    pub key: DepthKey,
    pub order: DepthOrder,
}

impl Default for DepthSort {
    /// Camera looking down +Z, farthest splats first.
    fn default() -> Self {
        DepthSort {
            key: DepthKey::Axis(Vec3::Z),
            order: DepthOrder::FarToNear,
        }
    }
}

impl DepthSort {
    pub fn from_config(config: &RenderConfig) -> Self {
        DepthSort {
            key: DepthKey::Axis(Vec3::from_array(config.sort_axis)),
            order: config.depth_order,
        }
    }
}

/// Reorders `set` for drawing. Always sorts the file order from scratch, so
/// ties fall back to file order and running it twice changes nothing.
pub fn sort_by_depth(set: &mut SplatSet, sort: &DepthSort) {
    let _span = tracing::debug_span!("sort_by_depth", splats = set.len()).entered();

    let keys: Vec<f32> = set
        .file_order()
        .iter()
        .map(|s| sort.key.depth(s.position))
        .collect();

    let mut order: Vec<u32> = (0..set.len() as u32).collect();
    // slice::sort_by is stable, the identity start gives the file order tie break
    order.sort_by(|&a, &b| draw_cmp(keys[a as usize], keys[b as usize], sort.order));
    set.set_order(order);
}

/// Convenience for callers that want to keep the unsorted set around.
pub fn sorted_by_depth(set: &SplatSet, sort: &DepthSort) -> SplatSet {
    let mut out = set.clone();
    sort_by_depth(&mut out, sort);
    out
}
