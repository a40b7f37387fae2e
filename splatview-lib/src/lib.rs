pub mod archive;
pub mod billboard;
pub mod common;
pub mod compositor;
pub mod config;
pub mod error;
pub mod loader;
pub mod ordering;
pub mod projection;
pub mod shaders;
pub mod software;
mod structures;

pub use archive::{pack, unpack, PackOptions};
#[cfg(feature = "async")]
pub use archive::{pack_async, unpack_async};
pub use billboard::{BillboardExpander, VertexBuffers};
pub use compositor::{Compositor, GraphicsDevice, RenderContext};
pub use config::{BlendMode, CameraConfig, DepthOrder, RenderConfig, Topology};
pub use loader::{LoadTicket, SceneLoader};
pub use ordering::{sort_by_depth, DepthKey, DepthSort};
pub use projection::{perspective_scale, ProjectionPipeline};
pub use software::SoftwareDevice;
pub use structures::{RawSplat, Splat, SplatSet, SPLAT_RECORD_SIZE};

use error::SplatError;
use tracing::{debug, warn};
use zerocopy::{FromBytes, IntoBytes};

#[inline]
fn whole_records(raw_data: &[u8]) -> &[u8] {
    let whole = raw_data.len() / SPLAT_RECORD_SIZE * SPLAT_RECORD_SIZE;
    &raw_data[..whole]
}

/// Lazily decodes `raw_data` record by record, in file order. Bytes past
/// the last complete record are skipped.
pub fn records(raw_data: &[u8]) -> impl Iterator<Item = Splat> + '_ {
    whole_records(raw_data)
        .chunks_exact(SPLAT_RECORD_SIZE)
        .filter_map(|chunk| RawSplat::ref_from_bytes(chunk).ok())
        .map(Splat::from)
}

/// Decodes an uncompressed `.splat` buffer.
///
/// An empty buffer is a valid, empty scene. A length that is not a multiple
/// of 32 is not an error either: the trailing partial record is dropped.
#[inline(never)]
pub fn decode(raw_data: &[u8]) -> Result<SplatSet, SplatError> {
    let data = whole_records(raw_data);
    let trailing = raw_data.len() - data.len();
    if trailing != 0 {
        warn!(
            trailing,
            "Ignoring bytes past the last complete {}-byte record", SPLAT_RECORD_SIZE
        );
    }

    let raw = <[RawSplat]>::ref_from_bytes(data).map_err(|_| {
        SplatError::Format(format!(
            "Cannot view {} bytes as {}-byte records",
            data.len(),
            SPLAT_RECORD_SIZE
        ))
    })?;
    let splats: Vec<Splat> = raw.iter().map(Splat::from).collect();
    debug!(splats = splats.len(), "Decoded splat buffer");
    Ok(SplatSet::from_file_order(splats))
}

/// Appends `splats` to `output` in the 32-byte record layout.
pub fn encode<'a>(splats: impl IntoIterator<Item = &'a Splat>, output: &mut Vec<u8>) {
    for splat in splats {
        output.extend_from_slice(RawSplat::from(splat).as_bytes());
    }
}

/// Decode, sort and expand: everything that has to happen before the first
/// upload, none of which depends on the scaling factor.
pub fn prepare_scene(raw_data: &[u8], config: &RenderConfig) -> Result<VertexBuffers, SplatError> {
    config.validate()?;
    let mut set = decode(raw_data)?;
    sort_by_depth(&mut set, &DepthSort::from_config(config));
    Ok(BillboardExpander::from_config(config).expand(&set))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(position: [f32; 3], scale: [f32; 3], color: [u8; 4], rotation: [u8; 4]) -> Vec<u8> {
        let mut out = Vec::with_capacity(SPLAT_RECORD_SIZE);
        for v in position.iter().chain(scale.iter()) {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&color);
        out.extend_from_slice(&rotation);
        out
    }

    /// Record 1 red at z=5, record 2 green at z=2.
    fn red_green() -> Vec<u8> {
        let mut data = record(
            [0.0, 0.0, 5.0],
            [0.1, 0.2, 0.3],
            [255, 0, 0, 255],
            [128, 128, 128, 255],
        );
        data.extend(record(
            [0.0, 0.0, 2.0],
            [1.0, 1.0, 1.0],
            [0, 255, 0, 255],
            [0, 64, 192, 255],
        ));
        data
    }

    #[test]
    fn empty_buffer_is_an_empty_scene() {
        let set = decode(&[]).expect("empty input decodes");
        assert!(set.is_empty());
        assert_eq!(records(&[]).count(), 0);
    }

    #[test]
    fn decodes_the_two_record_scenario() {
        let data = red_green();
        assert_eq!(data.len(), 64);
        let mut set = decode(&data).expect("decode");
        assert_eq!(set.len(), 2);

        let red = set.file_order()[0];
        assert_eq!(red.position, [0.0, 0.0, 5.0]);
        assert_eq!(red.color, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(red.scale, [0.1, 0.2, 0.3]);
        assert_eq!(red.rotation, [0.0, 0.0, 0.0, 127.0 / 128.0]);

        let green = set.file_order()[1];
        assert_eq!(green.position, [0.0, 0.0, 2.0]);
        assert_eq!(green.color, [0.0, 1.0, 0.0, 1.0]);
        assert_eq!(green.rotation, [-1.0, -0.5, 0.5, 127.0 / 128.0]);

        sort_by_depth(&mut set, &DepthSort::default());
        assert_eq!(set.get(0), Some(&red));
        assert_eq!(set.get(1), Some(&green));
    }

    #[test]
    fn record_count_is_length_over_32() {
        let one = record([1.0, 2.0, 3.0], [0.0; 3], [1, 2, 3, 4], [5, 6, 7, 8]);
        for n in [0usize, 1, 3, 17] {
            let data = one.repeat(n);
            assert_eq!(decode(&data).expect("decode").len(), data.len() / 32);
        }
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut data = red_green();
        let full = decode(&data).expect("decode");
        for extra in [1usize, 7, 31] {
            data.truncate(64);
            data.extend(std::iter::repeat(0xAB).take(extra));
            let set = decode(&data).expect("unaligned input still decodes");
            assert_eq!(set, full);
            assert_eq!(records(&data).count(), 2);
        }
        assert!(decode(&[0u8; 31]).expect("short input").is_empty());
    }

    #[test]
    fn decoding_is_idempotent_and_matches_lazy_records() {
        let data = red_green();
        let a = decode(&data).expect("first");
        let b = decode(&data).expect("second");
        assert_eq!(a, b);
        assert_eq!(records(&data).collect::<Vec<_>>(), a.file_order());
    }

    #[test]
    fn encode_round_trip_within_quantization() {
        let original = vec![
            Splat {
                position: [0.123_456, -9.5, 1e-3],
                scale: [0.25, 3.5, -0.75],
                color: [0.2, 0.4, 0.6, 0.8],
                rotation: [0.5, -0.5, 0.25, 0.66],
            },
            Splat {
                position: [f32::MAX, f32::MIN_POSITIVE, -0.0],
                scale: [1.0, 1.0, 1.0],
                color: [1.0, 0.0, 0.333, 0.999],
                rotation: [-1.0, 0.0, 0.99, -0.33],
            },
        ];
        let mut bytes = Vec::new();
        encode(&original, &mut bytes);
        assert_eq!(bytes.len(), 64);

        let decoded = decode(&bytes).expect("decode");
        for (a, b) in original.iter().zip(decoded.file_order()) {
            assert_eq!(a.position.map(f32::to_bits), b.position.map(f32::to_bits));
            assert_eq!(a.scale, b.scale);
            for (x, y) in a.color.iter().zip(b.color) {
                assert!((x - y).abs() <= 1.0 / 255.0, "color {} vs {}", x, y);
            }
            for (x, y) in a.rotation.iter().zip(b.rotation) {
                assert!((x - y).abs() <= 1.0 / 128.0, "rotation {} vs {}", x, y);
            }
        }
    }

    #[test]
    fn records_that_look_like_a_zstd_header_decode_as_records() {
        // 28 B5 2F FD is a finite x of about -1.46e37
        let x = f32::from_le_bytes([0x28, 0xB5, 0x2F, 0xFD]);
        assert!(x.is_finite());
        let data = record([x, 0.0, 1.0], [1.0; 3], [10, 20, 30, 255], [128; 4]);

        let set = decode(&data).expect("decode");
        assert_eq!(set.file_order()[0].position[0].to_bits(), x.to_bits());

        let buffers = prepare_scene(&data, &RenderConfig::default()).expect("prepare");
        assert_eq!(buffers.positions, vec![[x, 0.0, 1.0]]);

        let loader = SceneLoader::new();
        let ticket = loader.begin();
        assert_eq!(loader.finish(&ticket, &data).expect("load").len(), 1);
    }

    #[test]
    fn archived_scene_is_decoded_after_unpacking() {
        let raw = red_green();
        let packed = pack(&raw, PackOptions::default()).expect("pack");
        let set = decode(&unpack(&packed).expect("unpack")).expect("decode");
        assert_eq!(set, decode(&raw).expect("decode"));
    }

    #[test]
    fn prepare_scene_sorts_before_expanding() {
        let buffers = prepare_scene(&red_green(), &RenderConfig::default()).expect("prepare");
        assert_eq!(buffers.positions, vec![[0.0, 0.0, 5.0], [0.0, 0.0, 2.0]]);

        let quad = RenderConfig {
            topology: Topology::Quad,
            ..Default::default()
        };
        let buffers = prepare_scene(&red_green(), &quad).expect("prepare");
        assert_eq!(buffers.vertex_count(), 8);
        assert_eq!(buffers.index_count(), 12);
    }

    fn render(config: &RenderConfig, data: &[u8], size: u32) -> Compositor<SoftwareDevice> {
        let buffers = prepare_scene(data, config).expect("prepare");
        let mut compositor =
            Compositor::new(SoftwareDevice::new(size, size), config).expect("compositor");
        compositor.upload(&buffers).expect("upload");
        compositor.draw().expect("draw");
        compositor
    }

    fn centered_camera() -> CameraConfig {
        CameraConfig {
            translation: [0.0, 0.0, -5.0],
            ..Default::default()
        }
    }

    #[test]
    fn software_point_render_draws_a_soft_splat() {
        let config = RenderConfig {
            scaling_factor: 50.0,
            camera: centered_camera(),
            ..Default::default()
        };
        let data = record([0.0; 3], [0.0; 3], [255, 0, 0, 255], [128; 4]);
        let compositor = render(&config, &data, 32);
        let device = compositor.device();

        // size = 50 / 5 = 10 px around the viewport center
        let center = device.pixel(16, 16).expect("in bounds");
        let rim = device.pixel(20, 16).expect("in bounds");
        let outside = device.pixel(2, 2).expect("in bounds");
        assert!(center[0] > 0.9, "center {:?}", center);
        assert!(rim[0] > 0.0 && rim[0] < center[0], "rim {:?}", rim);
        assert_eq!(outside, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(center[1], 0.0);
        assert!(device.depth_write());
    }

    #[test]
    fn nearer_splat_composites_over_farther() {
        let config = RenderConfig {
            scaling_factor: 60.0,
            camera: centered_camera(),
            ..Default::default()
        };
        // green is nearer to the eye (z=1 is 4 units away, z=0 is 5)
        let mut data = record([0.0, 0.0, 1.0], [0.0; 3], [0, 255, 0, 255], [128; 4]);
        data.extend(record([0.0, 0.0, 0.0], [0.0; 3], [255, 0, 0, 255], [128; 4]));

        // the reference +Z policy would draw green first here, so sort on view depth
        let buffers = {
            let mut set = decode(&data).expect("decode");
            let view = *ProjectionPipeline::new(&config.camera, 32, 32).view_matrix();
            sort_by_depth(
                &mut set,
                &DepthSort {
                    key: DepthKey::View(view),
                    order: DepthOrder::FarToNear,
                },
            );
            assert_eq!(set.order(), &[1, 0]);
            BillboardExpander::from_config(&config).expand(&set)
        };
        let mut compositor =
            Compositor::new(SoftwareDevice::new(32, 32), &config).expect("compositor");
        compositor.upload(&buffers).expect("upload");
        compositor.draw().expect("draw");

        let center = compositor.device().pixel(16, 16).expect("in bounds");
        assert!(center[1] > center[0], "green should win: {:?}", center);
    }

    #[test]
    fn software_quad_render_covers_the_center() {
        let config = RenderConfig {
            topology: Topology::Quad,
            scaling_factor: 2.5,
            camera: centered_camera(),
            ..Default::default()
        };
        let data = record([0.0; 3], [0.0; 3], [0, 0, 255, 255], [128; 4]);
        let compositor = render(&config, &data, 64);
        let device = compositor.device();

        let center = device.pixel(32, 32).expect("in bounds");
        assert!(center[2] > 0.9, "center {:?}", center);
        assert_eq!(device.pixel(1, 1), Some([0.0, 0.0, 0.0, 1.0]));
        assert!(device.fragments() > 0);
    }

    #[test]
    fn scaling_factor_change_keeps_the_scene() {
        let config = RenderConfig {
            camera: centered_camera(),
            ..Default::default()
        };
        let data = red_green();
        let set_before = decode(&data).expect("decode");
        let buffers = prepare_scene(&data, &config).expect("prepare");
        let buffers_before = buffers.clone();

        let mut compositor =
            Compositor::new(SoftwareDevice::new(16, 16), &config).expect("compositor");
        compositor.upload(&buffers).expect("upload");
        compositor.draw().expect("draw");
        let live = compositor.device().live_buffers();

        compositor.set_scaling_factor(2.0).expect("redraw");
        assert_eq!(compositor.frames(), 2);
        assert_eq!(compositor.context().scaling_factor, 2.0);
        assert_eq!(compositor.device().live_buffers(), live);
        assert_eq!(buffers, buffers_before);
        assert_eq!(decode(&data).expect("decode"), set_before);
    }

    #[test]
    fn empty_scene_renders_a_cleared_frame() {
        let config = RenderConfig {
            clear_color: [0.1, 0.2, 0.3, 1.0],
            ..Default::default()
        };
        let compositor = render(&config, &[], 4);
        assert!(compositor
            .device()
            .frame()
            .iter()
            .all(|p| *p == [0.1, 0.2, 0.3, 1.0]));
        assert_eq!(compositor.frames(), 1);
    }
}
