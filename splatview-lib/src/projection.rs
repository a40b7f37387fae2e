use crate::config::CameraConfig;
use glam::{Mat4, Vec2, Vec3, Vec4};

/// Point size used when the inverse-depth law has no usable answer.
pub const DEFAULT_POINT_SCALE: f32 = 1.0;

/// Inverse-depth perspective law for splat size.
///
/// `depth` is the view-space distance `-view.z`. A zero depth, and any input
/// that would produce NaN or infinity, yields [`DEFAULT_POINT_SCALE`].
#[inline]
pub fn perspective_scale(scaling_factor: f32, depth: f32) -> f32 {
    if depth == 0.0 {
        return DEFAULT_POINT_SCALE;
    }
    let size = scaling_factor / depth;
    if size.is_finite() {
        size
    } else {
        DEFAULT_POINT_SCALE
    }
}

/// Output of the splat vertex stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadedVertex {
    pub clip: Vec4,
    /// Point size in pixels (point mode) or the quad scale (quad mode).
    pub size: f32,
}

/// Vertex stage shared by every device: the GLSL in `shaders` computes the
/// same thing on a GPU.
#[inline]
pub fn shade_vertex(
    model_view: &Mat4,
    projection: &Mat4,
    position: Vec3,
    corner: Option<Vec2>,
    scaling_factor: f32,
) -> ShadedVertex {
    let mut view = *model_view * position.extend(1.0);
    let size = perspective_scale(scaling_factor, -view.z);
    if let Some(corner) = corner {
        let offset = corner * (2.0 * size);
        view.x += offset.x;
        view.y += offset.y;
    }
    ShadedVertex {
        clip: *projection * view,
        size,
    }
}

/// Camera state: a perspective projection and a translate/flip view.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionPipeline {
    camera: CameraConfig,
    aspect: f32,
    projection: Mat4,
    view: Mat4,
}

impl ProjectionPipeline {
    pub fn new(camera: &CameraConfig, width: u32, height: u32) -> Self {
        let mut pipeline = ProjectionPipeline {
            camera: camera.clone(),
            aspect: 1.0,
            projection: Mat4::IDENTITY,
            view: view_matrix(camera),
        };
        pipeline.set_viewport(width, height);
        pipeline
    }

    /// Rebuilds the projection for a resized viewport.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.aspect = if height == 0 {
            1.0
        } else {
            width as f32 / height as f32
        };
        self.projection = Mat4::perspective_rh_gl(
            self.camera.fov_y_degrees.to_radians(),
            self.aspect,
            self.camera.near,
            self.camera.far,
        );
    }

    pub fn set_camera(&mut self, camera: &CameraConfig) {
        self.camera = camera.clone();
        self.view = view_matrix(camera);
        self.projection = Mat4::perspective_rh_gl(
            camera.fov_y_degrees.to_radians(),
            self.aspect,
            camera.near,
            camera.far,
        );
    }

    #[inline]
    pub fn projection_matrix(&self) -> &Mat4 {
        &self.projection
    }

    #[inline]
    pub fn view_matrix(&self) -> &Mat4 {
        &self.view
    }

    #[inline]
    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    /// `-viewSpace.z` for a world-space position.
    #[inline]
    pub fn view_depth(&self, position: [f32; 3]) -> f32 {
        -self.view.transform_point3(Vec3::from_array(position)).z
    }

    pub fn point_scale(&self, position: [f32; 3], scaling_factor: f32) -> f32 {
        perspective_scale(scaling_factor, self.view_depth(position))
    }

    pub fn shade(
        &self,
        position: [f32; 3],
        corner: Option<[f32; 2]>,
        scaling_factor: f32,
    ) -> ShadedVertex {
        shade_vertex(
            &self.view,
            &self.projection,
            Vec3::from_array(position),
            corner.map(Vec2::from_array),
            scaling_factor,
        )
    }
}

fn view_matrix(camera: &CameraConfig) -> Mat4 {
    let translation = Mat4::from_translation(Vec3::from_array(camera.translation));
    if camera.flip_y {
        translation * Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0))
    } else {
        translation
    }
}
