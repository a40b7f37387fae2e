use crate::config::Topology;

pub const ATTR_POSITION: &str = "aVertexPosition";
pub const ATTR_COLOR: &str = "aVertexColor";
pub const ATTR_CORNER: &str = "aCornerOffset";

pub const UNIFORM_MODEL_VIEW: &str = "uModelViewMatrix";
pub const UNIFORM_PROJECTION: &str = "uProjectionMatrix";
pub const UNIFORM_SCALING_FACTOR: &str = "uScalingFactor";
pub const UNIFORM_CORNER_EXTENT: &str = "uCornerExtent";

const POINT_VERTEX_SHADER: &str = r#"attribute vec3 aVertexPosition;
attribute vec4 aVertexColor;

uniform mat4 uModelViewMatrix;
uniform mat4 uProjectionMatrix;
uniform float uScalingFactor;

varying lowp vec4 vColor;
varying float vRadius;

void main(void) {
    vec4 viewModelPosition = uModelViewMatrix * vec4(aVertexPosition, 1.0);
    gl_Position = uProjectionMatrix * viewModelPosition;
    float distance = -viewModelPosition.z;
    float size = (distance != 0.0) ? uScalingFactor / distance : 1.0;
    gl_PointSize = size;
    vRadius = size * 0.5;
    vColor = aVertexColor;
}
"#;

const QUAD_VERTEX_SHADER: &str = r#"attribute vec3 aVertexPosition;
attribute vec4 aVertexColor;
attribute vec2 aCornerOffset;

uniform mat4 uModelViewMatrix;
uniform mat4 uProjectionMatrix;
uniform float uScalingFactor;
uniform float uCornerExtent;

varying lowp vec4 vColor;
varying float vRadius;
varying vec2 vLocal;

void main(void) {
    vec4 viewModelPosition = uModelViewMatrix * vec4(aVertexPosition, 1.0);
    float distance = -viewModelPosition.z;
    float size = (distance != 0.0) ? uScalingFactor / distance : 1.0;
    viewModelPosition.xy += aCornerOffset * 2.0 * size;
    gl_Position = uProjectionMatrix * viewModelPosition;
    vRadius = size * 0.5;
    vLocal = aCornerOffset / uCornerExtent;
    vColor = aVertexColor;
}
"#;

const POINT_FRAGMENT_SHADER: &str = r#"precision mediump float;

varying lowp vec4 vColor;
varying float vRadius;

void main(void) {
    vec2 local = gl_PointCoord * 2.0 - 1.0;
    float distance = length(local) * vRadius;
    float falloff = exp(-0.5 * distance * distance / vRadius);
    gl_FragColor = vec4(vColor.rgb * falloff, vColor.a * falloff);
}
"#;

const QUAD_FRAGMENT_SHADER: &str = r#"precision mediump float;

varying lowp vec4 vColor;
varying float vRadius;
varying vec2 vLocal;

void main(void) {
    float distance = length(vLocal) * vRadius;
    float falloff = exp(-0.5 * distance * distance / vRadius);
    gl_FragColor = vec4(vColor.rgb * falloff, vColor.a * falloff);
}
"#;

/// Vertex and fragment sources for one topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramSource {
    pub vertex: &'static str,
    pub fragment: &'static str,
}

pub fn program_source(topology: Topology) -> ProgramSource {
    match topology {
        Topology::Point => ProgramSource {
            vertex: POINT_VERTEX_SHADER,
            fragment: POINT_FRAGMENT_SHADER,
        },
        Topology::Quad => ProgramSource {
            vertex: QUAD_VERTEX_SHADER,
            fragment: QUAD_FRAGMENT_SHADER,
        },
    }
}
