//! CPU implementation of [`GraphicsDevice`].
//!
//! The device does not interpret GLSL. Compiling a program scans its
//! declarations to build the attribute/uniform tables and report the usual
//! compile and link diagnostics; drawing runs the splat vertex and fragment
//! stages natively through [`shade_vertex`] and [`shade_fragment`]. Programs
//! therefore have to expose the splat interface declared in `shaders`.

use bytemuck::allocation::pod_collect_to_vec;
use crate::common::float_to_unorm8;
use crate::compositor::{
    shade_fragment, BlendFactor, BlendState, BufferId, BufferTarget, GraphicsDevice, Primitive,
    ProgramId, Uniform,
};
use crate::error::SplatError;
use crate::projection::shade_vertex;
use crate::shaders::{
    ATTR_COLOR, ATTR_CORNER, ATTR_POSITION, UNIFORM_CORNER_EXTENT, UNIFORM_MODEL_VIEW,
    UNIFORM_PROJECTION, UNIFORM_SCALING_FACTOR,
};
use foldhash::{HashMap, HashMapExt};
use glam::{Mat4, Vec2, Vec3, Vec4};
use std::path::Path;
use tracing::{debug, trace};

#[inline]
fn next_line<'b>(buffer: &'b [u8], offset: &mut usize) -> Option<&'b [u8]> {
    if *offset >= buffer.len() {
        return None;
    }
    let start = *offset;

    match memchr::memchr(b'\n', &buffer[*offset..]) {
        Some(pos) => {
            *offset = start + pos + 1;
            Some(&buffer[start..start + pos])
        }
        None => {
            *offset = buffer.len();
            Some(&buffer[start..])
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Storage {
    Attribute,
    Uniform,
    Varying,
}

#[derive(Debug, Default)]
struct ShaderInterface {
    attributes: Vec<String>,
    uniforms: Vec<String>,
    varyings: Vec<String>,
}

/// Collects the global declarations of one shader stage.
fn scan_shader(stage: &str, source: &str) -> Result<ShaderInterface, SplatError> {
    let bytes = source.as_bytes();
    let mut offset = 0;
    let mut line_no = 0;
    let mut depth: i32 = 0;
    let mut has_main = false;
    let mut iface = ShaderInterface::default();

    while let Some(line) = next_line(bytes, &mut offset) {
        line_no += 1;
        let line = std::str::from_utf8(line).map_err(|e| {
            SplatError::Device(format!("{} shader: 0:{}: invalid UTF-8: {}", stage, line_no, e))
        })?;
        let code = line.split("//").next().unwrap_or("").trim();
        if code.is_empty() {
            continue;
        }
        if code.starts_with("void main") {
            has_main = true;
        }

        if depth == 0 {
            let mut words = code.trim_end_matches(';').split_whitespace();
            let storage = match words.next() {
                Some("attribute") => Some(Storage::Attribute),
                Some("uniform") => Some(Storage::Uniform),
                Some("varying") => Some(Storage::Varying),
                _ => None,
            };
            if let Some(storage) = storage {
                if !code.ends_with(';') {
                    return Err(SplatError::Device(format!(
                        "{} shader: 0:{}: expected ';' after declaration",
                        stage, line_no
                    )));
                }
                // optional precision qualifier, then type, then name
                let rest: Vec<&str> = words.collect();
                let name = match rest.as_slice() {
                    [_ty, name] | [_, _ty, name] => *name,
                    _ => {
                        return Err(SplatError::Device(format!(
                            "{} shader: 0:{}: malformed declaration '{}'",
                            stage, line_no, code
                        )))
                    }
                };
                let list = match storage {
                    Storage::Attribute => &mut iface.attributes,
                    Storage::Uniform => &mut iface.uniforms,
                    Storage::Varying => &mut iface.varyings,
                };
                list.push(name.to_string());
            }
        }

        depth += code.matches('{').count() as i32;
        depth -= code.matches('}').count() as i32;
        if depth < 0 {
            return Err(SplatError::Device(format!(
                "{} shader: 0:{}: unexpected '}}'",
                stage, line_no
            )));
        }
    }

    if depth != 0 {
        return Err(SplatError::Device(format!(
            "{} shader: 0:{}: unexpected end of source, missing '}}'",
            stage, line_no
        )));
    }
    if !has_main {
        return Err(SplatError::Device(format!(
            "{} shader: 'main' : function not defined",
            stage
        )));
    }
    Ok(iface)
}

#[derive(Debug)]
struct LinkedProgram {
    attributes: HashMap<String, u32>,
    uniforms: HashMap<String, u32>,
    values: HashMap<u32, Uniform>,
}

impl LinkedProgram {
    fn link(vertex: &str, fragment: &str) -> Result<Self, SplatError> {
        let vs = scan_shader("vertex", vertex)?;
        let fs = scan_shader("fragment", fragment)?;

        if !vertex.contains("gl_Position") {
            return Err(SplatError::Device(
                "link: vertex shader never writes gl_Position".to_string(),
            ));
        }
        if let Some(missing) = fs.varyings.iter().find(|v| !vs.varyings.contains(v)) {
            return Err(SplatError::Device(format!(
                "link: varying '{}' is read by the fragment shader \
                 but not declared in the vertex shader",
                missing
            )));
        }

        let mut attributes = HashMap::with_capacity(vs.attributes.len());
        for name in vs.attributes {
            let next = attributes.len() as u32;
            attributes.entry(name).or_insert(next);
        }
        let mut uniforms = HashMap::with_capacity(vs.uniforms.len() + fs.uniforms.len());
        for name in vs.uniforms.into_iter().chain(fs.uniforms) {
            let next = uniforms.len() as u32;
            uniforms.entry(name).or_insert(next);
        }

        Ok(LinkedProgram {
            attributes,
            uniforms,
            values: HashMap::new(),
        })
    }

    fn float(&self, name: &str) -> Option<f32> {
        match self.uniforms.get(name).and_then(|loc| self.values.get(loc)) {
            Some(Uniform::Float(v)) => Some(*v),
            _ => None,
        }
    }

    fn mat4(&self, name: &str) -> Option<Mat4> {
        match self.uniforms.get(name).and_then(|loc| self.values.get(loc)) {
            Some(Uniform::Mat4(m)) => Some(Mat4::from_cols_array(m)),
            _ => None,
        }
    }
}

#[derive(Debug)]
enum DeviceBuffer {
    Vertex(Vec<f32>),
    Index(Vec<u32>),
}

/// Vertex after the vertex stage, in window coordinates.
#[derive(Debug, Clone, Copy)]
struct WindowVertex {
    xy: Vec2,
    color: [f32; 4],
    local: Vec2,
    radius: f32,
}

pub struct SoftwareDevice {
    width: u32,
    height: u32,
    frame: Vec<[f32; 4]>,
    buffers: HashMap<u32, DeviceBuffer>,
    next_buffer: u32,
    programs: Vec<LinkedProgram>,
    current: Option<usize>,
    attributes: HashMap<u32, (BufferId, u32)>,
    blend: Option<BlendState>,
    depth_write: bool,
    fragments: u64,
}

impl SoftwareDevice {
    pub fn new(width: u32, height: u32) -> Self {
        SoftwareDevice {
            width,
            height,
            frame: vec![[0.0; 4]; width as usize * height as usize],
            buffers: HashMap::new(),
            next_buffer: 0,
            programs: Vec::new(),
            current: None,
            attributes: HashMap::new(),
            blend: None,
            depth_write: true,
            fragments: 0,
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row-major RGBA, top row first.
    #[inline]
    pub fn frame(&self) -> &[[f32; 4]] {
        &self.frame
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.frame[(y * self.width + x) as usize])
    }

    /// Fragments shaded since the device was created.
    #[inline]
    pub fn fragments(&self) -> u64 {
        self.fragments
    }

    #[inline]
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn to_rgba8(&self) -> image::RgbaImage {
        image::RgbaImage::from_fn(self.width, self.height, |x, y| {
            image::Rgba(self.frame[(y * self.width + x) as usize].map(float_to_unorm8))
        })
    }

    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<(), SplatError> {
        self.to_rgba8()
            .save_with_format(path, image::ImageFormat::Png)
            .map_err(|e| SplatError::Image(e.to_string()))
    }

    fn program(&self) -> Result<&LinkedProgram, SplatError> {
        self.current
            .and_then(|i| self.programs.get(i))
            .ok_or_else(|| SplatError::Device("draw issued without a program in use".to_string()))
    }

    fn vertex_attribute(
        &self,
        program: &LinkedProgram,
        name: &str,
        components: u32,
        vertices: usize,
    ) -> Result<&[f32], SplatError> {
        let location = program.attributes.get(name).ok_or_else(|| {
            SplatError::Device(format!("program does not declare attribute '{}'", name))
        })?;
        let (buffer, bound_components) = self.attributes.get(location).ok_or_else(|| {
            SplatError::Device(format!("attribute '{}' has no buffer bound", name))
        })?;
        if *bound_components != components {
            return Err(SplatError::Device(format!(
                "attribute '{}' bound with {} components, expected {}",
                name, bound_components, components
            )));
        }
        let data = match self.buffers.get(&buffer.0) {
            Some(DeviceBuffer::Vertex(data)) => data,
            Some(DeviceBuffer::Index(_)) => {
                return Err(SplatError::Device(format!(
                    "attribute '{}' is bound to an index buffer",
                    name
                )))
            }
            None => {
                return Err(SplatError::Device(format!(
                    "attribute '{}' is bound to deleted buffer {}",
                    name, buffer.0
                )))
            }
        };
        let needed = vertices * components as usize;
        if data.len() < needed {
            return Err(SplatError::Device(format!(
                "attribute '{}' holds {} floats, draw needs {}",
                name,
                data.len(),
                needed
            )));
        }
        Ok(&data[..needed])
    }

    /// Runs the vertex stage over `vertices` vertices of the bound buffers.
    fn shade_vertices(&self, vertices: usize) -> Result<Vec<Option<WindowVertex>>, SplatError> {
        let program = self.program()?;
        let model_view = program.mat4(UNIFORM_MODEL_VIEW).unwrap_or(Mat4::ZERO);
        let projection = program.mat4(UNIFORM_PROJECTION).unwrap_or(Mat4::ZERO);
        let scaling_factor = program.float(UNIFORM_SCALING_FACTOR).unwrap_or(0.0);
        let quad = program.attributes.contains_key(ATTR_CORNER);
        let corner_extent = program.float(UNIFORM_CORNER_EXTENT).unwrap_or(0.0);

        let positions = self.vertex_attribute(program, ATTR_POSITION, 3, vertices)?;
        let colors = self.vertex_attribute(program, ATTR_COLOR, 4, vertices)?;
        let corners = if quad {
            Some(self.vertex_attribute(program, ATTR_CORNER, 2, vertices)?)
        } else {
            None
        };

        let out = (0..vertices)
            .map(|i| {
                let position = Vec3::from_slice(&positions[i * 3..i * 3 + 3]);
                let corner = corners.map(|c| Vec2::from_slice(&c[i * 2..i * 2 + 2]));
                let shaded =
                    shade_vertex(&model_view, &projection, position, corner, scaling_factor);
                let xy = self.to_window(shaded.clip)?;
                let local = match corner {
                    Some(c) if corner_extent != 0.0 => c / corner_extent,
                    _ => Vec2::ZERO,
                };
                let c = &colors[i * 4..i * 4 + 4];
                Some(WindowVertex {
                    xy,
                    color: [c[0], c[1], c[2], c[3]],
                    local,
                    radius: shaded.size * 0.5,
                })
            })
            .collect();
        Ok(out)
    }

    /// Clip space to window pixels, dropping anything outside the depth range
    /// or behind the eye.
    fn to_window(&self, clip: Vec4) -> Option<Vec2> {
        if !(clip.w > 0.0) {
            return None;
        }
        let ndc = clip.truncate() / clip.w;
        if !(-1.0..=1.0).contains(&ndc.z) {
            return None;
        }
        Some(Vec2::new(
            (ndc.x * 0.5 + 0.5) * self.width as f32,
            (0.5 - ndc.y * 0.5) * self.height as f32,
        ))
    }

    fn blend_pixel(&mut self, x: u32, y: u32, src: [f32; 4]) {
        let idx = (y * self.width + x) as usize;
        let dst = self.frame[idx];
        self.frame[idx] = match self.blend {
            None => src,
            Some(state) => {
                let sf = blend_factor(state.src, src);
                let df = blend_factor(state.dst, src);
                [0, 1, 2, 3].map(|c| src[c] * sf + dst[c] * df)
            }
        };
        self.fragments += 1;
    }

    /// Pixel range covering `[lo, hi)` along an axis of `extent` pixels.
    fn span(lo: f32, hi: f32, extent: u32) -> (u32, u32) {
        let lo = lo.floor().max(0.0);
        let hi = hi.ceil().min(extent as f32);
        if !(lo < hi) {
            return (0, 0);
        }
        (lo as u32, hi as u32)
    }

    fn rasterize_point(&mut self, v: &WindowVertex) {
        let size = v.radius * 2.0;
        if !(size > 0.0 && size.is_finite()) {
            return;
        }
        let origin = v.xy - Vec2::splat(v.radius);
        let (x0, x1) = Self::span(origin.x, origin.x + size, self.width);
        let (y0, y1) = Self::span(origin.y, origin.y + size, self.height);
        for y in y0..y1 {
            for x in x0..x1 {
                let coord = (Vec2::new(x as f32 + 0.5, y as f32 + 0.5) - origin) / size;
                if coord.cmplt(Vec2::ZERO).any() || coord.cmpgt(Vec2::ONE).any() {
                    continue;
                }
                let local = coord * 2.0 - Vec2::ONE;
                let frag = shade_fragment(v.color, local, v.radius);
                self.blend_pixel(x, y, frag);
            }
        }
    }

    fn rasterize_triangle(&mut self, a: &WindowVertex, b: &WindowVertex, c: &WindowVertex) {
        let area = edge(a.xy, b.xy, c.xy);
        if area.abs() < f32::EPSILON {
            return;
        }
        let min = a.xy.min(b.xy).min(c.xy);
        let max = a.xy.max(b.xy).max(c.xy);
        let (x0, x1) = Self::span(min.x, max.x, self.width);
        let (y0, y1) = Self::span(min.y, max.y, self.height);

        for y in y0..y1 {
            for x in x0..x1 {
                let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                let wa = edge(b.xy, c.xy, p) / area;
                let wb = edge(c.xy, a.xy, p) / area;
                let wc = edge(a.xy, b.xy, p) / area;
                if wa < 0.0 || wb < 0.0 || wc < 0.0 {
                    continue;
                }
                let color =
                    [0, 1, 2, 3].map(|i| a.color[i] * wa + b.color[i] * wb + c.color[i] * wc);
                let local = a.local * wa + b.local * wb + c.local * wc;
                let radius = a.radius * wa + b.radius * wb + c.radius * wc;
                let frag = shade_fragment(color, local, radius);
                self.blend_pixel(x, y, frag);
            }
        }
    }
}

#[inline]
fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

#[inline]
fn blend_factor(factor: BlendFactor, src: [f32; 4]) -> f32 {
    match factor {
        BlendFactor::Zero => 0.0,
        BlendFactor::One => 1.0,
        BlendFactor::SrcAlpha => src[3],
        BlendFactor::OneMinusSrcAlpha => 1.0 - src[3],
    }
}

impl GraphicsDevice for SoftwareDevice {
    fn viewport(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.frame = vec![[0.0; 4]; width as usize * height as usize];
    }

    fn create_buffer(&mut self, target: BufferTarget, data: &[u8]) -> Result<BufferId, SplatError> {
        if data.len() % 4 != 0 {
            return Err(SplatError::Device(format!(
                "buffer of {} bytes is not made of 4-byte elements",
                data.len()
            )));
        }
        let buffer = match target {
            BufferTarget::Vertex => DeviceBuffer::Vertex(pod_collect_to_vec(data)),
            BufferTarget::Index => DeviceBuffer::Index(pod_collect_to_vec(data)),
        };
        self.next_buffer += 1;
        self.buffers.insert(self.next_buffer, buffer);
        trace!(id = self.next_buffer, bytes = data.len(), ?target, "Buffer created");
        Ok(BufferId(self.next_buffer))
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer.0);
        self.attributes.retain(|_, (bound, _)| *bound != buffer);
    }

    fn create_program(&mut self, vertex: &str, fragment: &str) -> Result<ProgramId, SplatError> {
        let program = LinkedProgram::link(vertex, fragment)?;
        debug!(
            attributes = program.attributes.len(),
            uniforms = program.uniforms.len(),
            "Program linked"
        );
        self.programs.push(program);
        Ok(ProgramId(self.programs.len() as u32 - 1))
    }

    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        self.programs
            .get(program.0 as usize)
            .and_then(|p| p.attributes.get(name).copied())
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        self.programs
            .get(program.0 as usize)
            .and_then(|p| p.uniforms.get(name).copied())
    }

    fn use_program(&mut self, program: ProgramId) {
        self.current = Some(program.0 as usize).filter(|&i| i < self.programs.len());
    }

    fn set_uniform(&mut self, location: u32, value: Uniform) {
        if let Some(program) = self.current.and_then(|i| self.programs.get_mut(i)) {
            program.values.insert(location, value);
        }
    }

    fn bind_attribute(&mut self, location: u32, buffer: BufferId, components: u32) {
        self.attributes.insert(location, (buffer, components));
    }

    fn set_blend(&mut self, blend: Option<BlendState>) {
        self.blend = blend;
    }

    fn depth_write(&self) -> bool {
        self.depth_write
    }

    fn set_depth_write(&mut self, enabled: bool) {
        self.depth_write = enabled;
    }

    fn clear(&mut self, color: [f32; 4]) {
        self.frame.fill(color);
    }

    fn draw_arrays(
        &mut self,
        primitive: Primitive,
        first: u32,
        count: u32,
    ) -> Result<(), SplatError> {
        let end = first as usize + count as usize;
        let shaded = self.shade_vertices(end)?;
        match primitive {
            Primitive::Points => {
                for v in shaded[first as usize..].iter().flatten() {
                    self.rasterize_point(v);
                }
            }
            Primitive::Triangles => {
                for tri in shaded[first as usize..].chunks_exact(3) {
                    if let [Some(a), Some(b), Some(c)] = tri {
                        self.rasterize_triangle(a, b, c);
                    }
                }
            }
        }
        Ok(())
    }

    fn draw_elements(
        &mut self,
        primitive: Primitive,
        indices: BufferId,
        count: u32,
    ) -> Result<(), SplatError> {
        let indices = match self.buffers.get(&indices.0) {
            Some(DeviceBuffer::Index(data)) if data.len() >= count as usize => {
                data[..count as usize].to_vec()
            }
            Some(DeviceBuffer::Index(data)) => {
                return Err(SplatError::Device(format!(
                    "index buffer holds {} indices, draw needs {}",
                    data.len(),
                    count
                )))
            }
            _ => {
                return Err(SplatError::Device(format!(
                    "buffer {} is not an index buffer",
                    indices.0
                )))
            }
        };
        let vertices = indices.iter().max().map_or(0, |&m| m as usize + 1);
        let shaded = self.shade_vertices(vertices)?;

        match primitive {
            Primitive::Points => {
                for &i in &indices {
                    if let Some(v) = shaded[i as usize] {
                        self.rasterize_point(&v);
                    }
                }
            }
            Primitive::Triangles => {
                for tri in indices.chunks_exact(3) {
                    let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| shaded[i as usize]);
                    if let (Some(a), Some(b), Some(c)) = (a, b, c) {
                        self.rasterize_triangle(&a, &b, &c);
                    }
                }
            }
        }
        Ok(())
    }
}
