use crate::billboard::VertexBuffers;
use crate::config::{CameraConfig, RenderConfig, Topology};
use crate::error::SplatError;
use crate::projection::ProjectionPipeline;
use crate::shaders::{
    program_source, ATTR_COLOR, ATTR_CORNER, ATTR_POSITION, UNIFORM_CORNER_EXTENT,
    UNIFORM_MODEL_VIEW, UNIFORM_PROJECTION, UNIFORM_SCALING_FACTOR,
};
use glam::Vec2;
use std::ops::{Deref, DerefMut};
use tracing::{debug, debug_span, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferTarget {
    Vertex,
    Index,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Points,
    Triangles,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Uniform {
    Float(f32),
    /// Column-major.
    Mat4([f32; 16]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendState {
    pub src: BlendFactor,
    pub dst: BlendFactor,
}

impl BlendState {
    /// `src * 1 + dst * (1 - src.a)`, the only state splats are drawn with.
    pub const PREMULTIPLIED_OVER: BlendState = BlendState {
        src: BlendFactor::One,
        dst: BlendFactor::OneMinusSrcAlpha,
    };
}

/// What the renderer needs from a graphics context. Locations returned by
/// the lookup methods are only valid for the program they were queried on.
pub trait GraphicsDevice {
    fn viewport(&self) -> (u32, u32);
    fn set_viewport(&mut self, width: u32, height: u32);

    fn create_buffer(&mut self, target: BufferTarget, data: &[u8]) -> Result<BufferId, SplatError>;
    fn delete_buffer(&mut self, buffer: BufferId);

    /// Compiles and links a program. Failures carry the compiler or linker log.
    fn create_program(&mut self, vertex: &str, fragment: &str) -> Result<ProgramId, SplatError>;
    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<u32>;
    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<u32>;

    fn use_program(&mut self, program: ProgramId);
    fn set_uniform(&mut self, location: u32, value: Uniform);
    fn bind_attribute(&mut self, location: u32, buffer: BufferId, components: u32);

    fn set_blend(&mut self, blend: Option<BlendState>);
    fn depth_write(&self) -> bool;
    fn set_depth_write(&mut self, enabled: bool);

    fn clear(&mut self, color: [f32; 4]);
    fn draw_arrays(
        &mut self,
        primitive: Primitive,
        first: u32,
        count: u32,
    ) -> Result<(), SplatError>;
    fn draw_elements(
        &mut self,
        primitive: Primitive,
        indices: BufferId,
        count: u32,
    ) -> Result<(), SplatError>;
}

/// Gaussian falloff across a splat. `local` spans `[-1, 1]` from the center
/// to the edge and `radius` is half the point size.
#[inline]
pub fn gaussian_falloff(local: Vec2, radius: f32) -> f32 {
    if !(radius > 0.0 && radius.is_finite()) {
        return 0.0;
    }
    let distance = local.length() * radius;
    (-0.5 * distance * distance / radius).exp()
}

/// Fragment stage matching the GLSL in `shaders`.
#[inline]
pub fn shade_fragment(color: [f32; 4], local: Vec2, radius: f32) -> [f32; 4] {
    let falloff = gaussian_falloff(local, radius);
    color.map(|c| c * falloff)
}

/// Slots for every attribute and uniform the splat program uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingTable {
    pub position: u32,
    pub color: u32,
    pub corner: Option<u32>,
    pub model_view: u32,
    pub projection: u32,
    pub scaling_factor: u32,
    pub corner_extent: Option<u32>,
}

impl BindingTable {
    pub fn resolve<D: GraphicsDevice + ?Sized>(
        device: &D,
        program: ProgramId,
        topology: Topology,
    ) -> Result<Self, SplatError> {
        let attribute = |name: &str| {
            device.attribute_location(program, name).ok_or_else(|| {
                SplatError::Device(format!("attribute '{}' not found in linked program", name))
            })
        };
        let uniform = |name: &str| {
            device.uniform_location(program, name).ok_or_else(|| {
                SplatError::Device(format!("uniform '{}' not found in linked program", name))
            })
        };

        let (corner, corner_extent) = match topology {
            Topology::Point => (None, None),
            Topology::Quad => (
                Some(attribute(ATTR_CORNER)?),
                Some(uniform(UNIFORM_CORNER_EXTENT)?),
            ),
        };

        Ok(BindingTable {
            position: attribute(ATTR_POSITION)?,
            color: attribute(ATTR_COLOR)?,
            corner,
            model_view: uniform(UNIFORM_MODEL_VIEW)?,
            projection: uniform(UNIFORM_PROJECTION)?,
            scaling_factor: uniform(UNIFORM_SCALING_FACTOR)?,
            corner_extent,
        })
    }
}

/// Disables depth writes for its lifetime and restores the previous state on
/// drop, including when the draw in between fails.
struct DepthWriteGuard<'a, D: GraphicsDevice + ?Sized> {
    device: &'a mut D,
    previous: bool,
}

impl<'a, D: GraphicsDevice + ?Sized> DepthWriteGuard<'a, D> {
    fn disable(device: &'a mut D) -> Self {
        let previous = device.depth_write();
        device.set_depth_write(false);
        DepthWriteGuard { device, previous }
    }
}

impl<D: GraphicsDevice + ?Sized> Deref for DepthWriteGuard<'_, D> {
    type Target = D;

    fn deref(&self) -> &D {
        self.device
    }
}

impl<D: GraphicsDevice + ?Sized> DerefMut for DepthWriteGuard<'_, D> {
    fn deref_mut(&mut self) -> &mut D {
        self.device
    }
}

impl<D: GraphicsDevice + ?Sized> Drop for DepthWriteGuard<'_, D> {
    fn drop(&mut self) {
        self.device.set_depth_write(self.previous);
    }
}

/// Buffers created by an upload in progress. Unless committed, they are
/// deleted on drop so a failed upload leaves nothing behind.
struct PendingBuffers<'a, D: GraphicsDevice + ?Sized> {
    device: &'a mut D,
    created: Vec<BufferId>,
}

impl<'a, D: GraphicsDevice + ?Sized> PendingBuffers<'a, D> {
    fn new(device: &'a mut D) -> Self {
        PendingBuffers {
            device,
            created: Vec::with_capacity(4),
        }
    }

    fn create(&mut self, target: BufferTarget, data: &[u8]) -> Result<BufferId, SplatError> {
        let id = self.device.create_buffer(target, data)?;
        self.created.push(id);
        Ok(id)
    }

    fn commit(mut self) {
        self.created.clear();
    }
}

impl<D: GraphicsDevice + ?Sized> Drop for PendingBuffers<'_, D> {
    fn drop(&mut self) {
        for id in self.created.drain(..) {
            self.device.delete_buffer(id);
        }
    }
}

/// Per-draw state. Owned by the compositor, handed to the draw by reference.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderContext {
    pub scaling_factor: f32,
    pub projection: ProjectionPipeline,
}

#[derive(Debug, Clone, Copy)]
struct UploadedScene {
    positions: BufferId,
    colors: BufferId,
    corners: Option<BufferId>,
    indices: Option<BufferId>,
    vertex_count: u32,
    index_count: u32,
    corner_extent: f32,
}

impl UploadedScene {
    fn buffers(&self) -> impl Iterator<Item = BufferId> {
        [Some(self.positions), Some(self.colors), self.corners, self.indices]
            .into_iter()
            .flatten()
    }
}

pub struct Compositor<D: GraphicsDevice> {
    device: D,
    program: ProgramId,
    bindings: BindingTable,
    topology: Topology,
    clear_color: [f32; 4],
    context: RenderContext,
    scene: Option<UploadedScene>,
    frames: u64,
}

impl<D: GraphicsDevice> Compositor<D> {
    /// Builds the splat program for the configured topology and resolves its
    /// bindings once.
    pub fn new(mut device: D, config: &RenderConfig) -> Result<Self, SplatError> {
        config.validate()?;
        let source = program_source(config.topology);
        let program = device.create_program(source.vertex, source.fragment)?;
        let bindings = BindingTable::resolve(&device, program, config.topology)?;
        let (width, height) = device.viewport();
        debug!(?bindings, width, height, "Splat program linked");

        Ok(Compositor {
            device,
            program,
            bindings,
            topology: config.topology,
            clear_color: config.clear_color,
            context: RenderContext {
                scaling_factor: config.scaling_factor,
                projection: ProjectionPipeline::new(&config.camera, width, height),
            },
            scene: None,
            frames: 0,
        })
    }

    #[inline]
    pub fn device(&self) -> &D {
        &self.device
    }

    #[inline]
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }

    #[inline]
    pub fn context(&self) -> &RenderContext {
        &self.context
    }

    #[inline]
    pub fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    #[inline]
    pub fn topology(&self) -> Topology {
        self.topology
    }

    /// Number of completed draw sequences.
    #[inline]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Hands the geometry to the device. Any previously uploaded scene is
    /// released first; `buffers` may be dropped afterwards.
    pub fn upload(&mut self, buffers: &VertexBuffers) -> Result<(), SplatError> {
        if buffers.topology != self.topology {
            return Err(SplatError::Config(format!(
                "vertex buffers were built for {:?} topology but the compositor draws {:?}",
                buffers.topology, self.topology
            )));
        }
        let _span = debug_span!("upload", vertices = buffers.vertex_count()).entered();
        self.release();

        let vertex_count = u32::try_from(buffers.vertex_count())
            .map_err(|_| SplatError::Device("too many vertices for one draw".to_string()))?;
        let index_count = u32::try_from(buffers.index_count())
            .map_err(|_| SplatError::Device("too many indices for one draw".to_string()))?;

        let mut pending = PendingBuffers::new(&mut self.device);
        let positions = pending.create(BufferTarget::Vertex, buffers.position_bytes())?;
        let colors = pending.create(BufferTarget::Vertex, buffers.color_bytes())?;
        let (corners, indices) = match (self.topology, buffers.index_bytes()) {
            (Topology::Quad, Some(index_bytes)) => (
                Some(pending.create(BufferTarget::Vertex, buffers.corner_bytes())?),
                Some(pending.create(BufferTarget::Index, index_bytes)?),
            ),
            (Topology::Quad, None) => {
                return Err(SplatError::Config(
                    "quad topology requires an index buffer".to_string(),
                ));
            }
            (Topology::Point, _) => (None, None),
        };
        pending.commit();

        self.scene = Some(UploadedScene {
            positions,
            colors,
            corners,
            indices,
            vertex_count,
            index_count,
            corner_extent: buffers.corner_extent,
        });
        info!(
            splats = buffers.splat_count(),
            vertices = vertex_count,
            indices = index_count,
            "Scene uploaded"
        );
        Ok(())
    }

    /// Deletes the uploaded scene's device buffers.
    pub fn release(&mut self) {
        if let Some(scene) = self.scene.take() {
            for buffer in scene.buffers() {
                self.device.delete_buffer(buffer);
            }
        }
    }

    /// Clears and draws the uploaded scene. With nothing uploaded, or an
    /// empty scene, the frame is only cleared.
    pub fn draw(&mut self) -> Result<(), SplatError> {
        let _span = debug_span!("draw", scaling_factor = self.context.scaling_factor).entered();
        self.device.clear(self.clear_color);

        if let Some(scene) = self.scene.as_ref().filter(|s| s.vertex_count > 0) {
            issue_draw(
                &mut self.device,
                self.program,
                &self.bindings,
                scene,
                &self.context,
            )?;
        }
        self.frames += 1;
        Ok(())
    }

    /// Updates the user scale and redraws from the uploaded buffers.
    pub fn set_scaling_factor(&mut self, value: f32) -> Result<(), SplatError> {
        if !value.is_finite() {
            return Err(SplatError::Config(format!(
                "scaling factor must be finite, got {}",
                value
            )));
        }
        self.context.scaling_factor = value;
        self.draw()
    }

    /// Moves the camera and redraws. A scene sorted on view depth is not
    /// re-sorted here; re-sort, expand and upload it again for the new view.
    pub fn set_camera(&mut self, camera: &CameraConfig) -> Result<(), SplatError> {
        camera.validate()?;
        self.context.projection.set_camera(camera);
        self.draw()
    }

    /// Resizes the device viewport and the projection with it.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.device.set_viewport(width, height);
        self.context.projection.set_viewport(width, height);
    }
}

fn issue_draw<D: GraphicsDevice + ?Sized>(
    device: &mut D,
    program: ProgramId,
    bindings: &BindingTable,
    scene: &UploadedScene,
    context: &RenderContext,
) -> Result<(), SplatError> {
    device.use_program(program);
    device.set_uniform(
        bindings.model_view,
        Uniform::Mat4(context.projection.view_matrix().to_cols_array()),
    );
    device.set_uniform(
        bindings.projection,
        Uniform::Mat4(context.projection.projection_matrix().to_cols_array()),
    );
    device.set_uniform(bindings.scaling_factor, Uniform::Float(context.scaling_factor));
    if let Some(location) = bindings.corner_extent {
        device.set_uniform(location, Uniform::Float(scene.corner_extent));
    }

    device.bind_attribute(bindings.position, scene.positions, 3);
    device.bind_attribute(bindings.color, scene.colors, 4);
    if let (Some(location), Some(corners)) = (bindings.corner, scene.corners) {
        device.bind_attribute(location, corners, 2);
    }

    device.set_blend(Some(BlendState::PREMULTIPLIED_OVER));
    let mut device = DepthWriteGuard::disable(device);
    match scene.indices {
        Some(indices) => device.draw_elements(Primitive::Triangles, indices, scene.index_count),
        None => device.draw_arrays(Primitive::Points, 0, scene.vertex_count),
    }
}
