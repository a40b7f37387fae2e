use crate::config::{BlendMode, RenderConfig, Topology};
use crate::structures::{Splat, SplatSet};

/// Billboard corners in local space: bottom-left, bottom-right, top-right,
/// top-left.
pub const CORNERS: [[f32; 2]; 4] = [[-1.0, -1.0], [1.0, -1.0], [1.0, 1.0], [-1.0, 1.0]];

/// Two triangles over a splat's four corners.
pub const QUAD_INDICES: [u32; 6] = [0, 1, 2, 0, 2, 3];

/// CPU-side geometry ready for upload. All vectors are parallel per vertex.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct VertexBuffers {
    pub topology: Topology,
    pub positions: Vec<[f32; 3]>,
    pub colors: Vec<[f32; 4]>,
    /// Empty in point mode.
    pub corners: Vec<[f32; 2]>,
    /// `None` in point mode.
    pub indices: Option<Vec<u32>>,
    /// Magnitude the corners were scaled by.
    pub corner_extent: f32,
}

impl VertexBuffers {
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn index_count(&self) -> usize {
        self.indices.as_ref().map_or(0, Vec::len)
    }

    #[inline]
    pub fn splat_count(&self) -> usize {
        match self.topology {
            Topology::Point => self.positions.len(),
            Topology::Quad => self.positions.len() / 4,
        }
    }

    pub fn position_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.positions)
    }

    pub fn color_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.colors)
    }

    pub fn corner_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.corners)
    }

    pub fn index_bytes(&self) -> Option<&[u8]> {
        self.indices.as_deref().map(bytemuck::cast_slice)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BillboardExpander {
    pub topology: Topology,
    pub blend: BlendMode,
    pub corner_offset: f32,
}

impl BillboardExpander {
    pub fn new(topology: Topology, blend: BlendMode, corner_offset: f32) -> Self {
        BillboardExpander {
            topology,
            blend,
            corner_offset,
        }
    }

    pub fn from_config(config: &RenderConfig) -> Self {
        Self::new(config.topology, config.blend, config.corner_offset)
    }

    #[inline]
    fn vertex_color(&self, splat: &Splat) -> [f32; 4] {
        let [r, g, b, a] = splat.color;
        match self.blend {
            BlendMode::Premultiplied => [r * a, g * a, b * a, a],
            BlendMode::Straight => splat.color,
        }
    }

    /// Builds the vertex buffers for `set` in its current draw order.
    pub fn expand(&self, set: &SplatSet) -> VertexBuffers {
        let _span = tracing::debug_span!("expand", splats = set.len(), topology = ?self.topology)
            .entered();

        match self.topology {
            Topology::Point => VertexBuffers {
                topology: Topology::Point,
                positions: set.iter().map(|s| s.position).collect(),
                colors: set.iter().map(|s| self.vertex_color(s)).collect(),
                corners: Vec::new(),
                indices: None,
                corner_extent: self.corner_offset,
            },
            Topology::Quad => {
                let n = set.len();
                let mut positions = Vec::with_capacity(n * 4);
                let mut colors = Vec::with_capacity(n * 4);
                let mut corners = Vec::with_capacity(n * 4);
                let mut indices = Vec::with_capacity(n * 6);

                for (i, splat) in set.iter().enumerate() {
                    let color = self.vertex_color(splat);
                    for corner in CORNERS {
                        positions.push(splat.position);
                        colors.push(color);
                        corners.push(corner.map(|c| c * self.corner_offset));
                    }
                    let base = (i * 4) as u32;
                    indices.extend(QUAD_INDICES.iter().map(|&k| base + k));
                }

                VertexBuffers {
                    topology: Topology::Quad,
                    positions,
                    colors,
                    corners,
                    indices: Some(indices),
                    corner_extent: self.corner_offset,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_set() -> SplatSet {
        SplatSet::from_file_order(vec![
            Splat {
                position: [1.0, 2.0, 3.0],
                color: [1.0, 0.5, 0.25, 0.5],
                ..Default::default()
            },
            Splat {
                position: [-1.0, 0.0, 7.0],
                color: [0.0, 1.0, 0.0, 1.0],
                ..Default::default()
            },
        ])
    }

    #[test]
    fn point_mode_copies_positions() {
        let expander = BillboardExpander::new(Topology::Point, BlendMode::Straight, 0.5);
        let buffers = expander.expand(&sample_set());
        assert_eq!(buffers.positions, vec![[1.0, 2.0, 3.0], [-1.0, 0.0, 7.0]]);
        assert_eq!(buffers.colors[0], [1.0, 0.5, 0.25, 0.5]);
        assert!(buffers.corners.is_empty());
        assert_eq!(buffers.indices, None);
        assert_eq!(buffers.splat_count(), 2);
    }

    #[test]
    fn premultiplied_scales_rgb_by_alpha() {
        let expander = BillboardExpander::new(Topology::Point, BlendMode::Premultiplied, 0.5);
        let buffers = expander.expand(&sample_set());
        assert_eq!(buffers.colors[0], [0.5, 0.25, 0.125, 0.5]);
        assert_eq!(buffers.colors[1], [0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn quad_mode_emits_four_corners_and_two_triangles() {
        let expander = BillboardExpander::new(Topology::Quad, BlendMode::Premultiplied, 0.5);
        let buffers = expander.expand(&sample_set());
        assert_eq!(buffers.vertex_count(), 8);
        assert_eq!(buffers.splat_count(), 2);
        assert!(buffers.positions[..4].iter().all(|p| *p == [1.0, 2.0, 3.0]));
        assert!(buffers.positions[4..].iter().all(|p| *p == [-1.0, 0.0, 7.0]));
        assert_eq!(
            &buffers.corners[..4],
            &[[-0.5, -0.5], [0.5, -0.5], [0.5, 0.5], [-0.5, 0.5]]
        );
        assert_eq!(buffers.corners[4..], buffers.corners[..4]);
        assert_eq!(
            buffers.indices.as_deref(),
            Some(&[0, 1, 2, 0, 2, 3, 4, 5, 6, 4, 6, 7][..])
        );
    }

    #[test]
    fn expansion_follows_draw_order() {
        let mut set = sample_set();
        set.set_order(vec![1, 0]);
        let buffers =
            BillboardExpander::new(Topology::Point, BlendMode::Straight, 0.5).expand(&set);
        assert_eq!(buffers.positions[0], [-1.0, 0.0, 7.0]);
    }

    #[test]
    fn expansion_is_byte_identical_across_runs() {
        let set = sample_set();
        let expander = BillboardExpander::new(Topology::Quad, BlendMode::Straight, 0.75);
        let a = expander.expand(&set);
        let b = expander.expand(&set);
        assert_eq!(a.position_bytes(), b.position_bytes());
        assert_eq!(a.color_bytes(), b.color_bytes());
        assert_eq!(a.corner_bytes(), b.corner_bytes());
        assert_eq!(a.index_bytes(), b.index_bytes());
        assert_eq!(a.position_bytes().len(), 8 * 12);
    }

    #[test]
    fn empty_set_expands_to_empty_buffers() {
        let buffers = BillboardExpander::new(Topology::Quad, BlendMode::Premultiplied, 0.5)
            .expand(&SplatSet::default());
        assert_eq!(buffers.vertex_count(), 0);
        assert_eq!(buffers.index_count(), 0);
    }
}
