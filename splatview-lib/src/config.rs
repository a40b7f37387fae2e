use crate::error::SplatError;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// One vertex per splat, sized in the vertex stage.
    #[default]
    Point,
    /// Four vertices and six indices per splat.
    Quad,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    #[default]
    Premultiplied,
    Straight,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthOrder {
    #[default]
    FarToNear,
    NearToFar,
}

impl FromStr for Topology {
    type Err = SplatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "point" | "points" => Ok(Topology::Point),
            "quad" | "quads" => Ok(Topology::Quad),
            other => Err(SplatError::Config(format!(
                "Unknown topology '{}', expected 'point' or 'quad'",
                other
            ))),
        }
    }
}

impl FromStr for BlendMode {
    type Err = SplatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "premultiplied" => Ok(BlendMode::Premultiplied),
            "straight" => Ok(BlendMode::Straight),
            other => Err(SplatError::Config(format!(
                "Unknown blend mode '{}', expected 'premultiplied' or 'straight'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CameraConfig {
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
    pub translation: [f32; 3],
    /// Mirror the scene vertically before translating it.
    pub flip_y: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        CameraConfig {
            fov_y_degrees: 60.0,
            near: 0.1,
            far: 100.0,
            translation: [0.9, -1.5, -5.0],
            flip_y: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    pub topology: Topology,
    pub blend: BlendMode,
    /// Magnitude of the billboard corner offsets in quad mode.
    pub corner_offset: f32,
    pub scaling_factor: f32,
    pub clear_color: [f32; 4],
    pub depth_order: DepthOrder,
    pub sort_axis: [f32; 3],
    pub camera: CameraConfig,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            topology: Topology::default(),
            blend: BlendMode::default(),
            corner_offset: 0.5,
            scaling_factor: 1.0,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            depth_order: DepthOrder::default(),
            sort_axis: [0.0, 0.0, 1.0],
            camera: CameraConfig::default(),
        }
    }
}

impl CameraConfig {
    pub fn validate(&self) -> Result<(), SplatError> {
        if !(self.fov_y_degrees > 0.0 && self.fov_y_degrees < 180.0) {
            return Err(SplatError::Config(format!(
                "fov_y_degrees must be in (0, 180), got {}",
                self.fov_y_degrees
            )));
        }
        if !(self.near > 0.0 && self.near.is_finite()) {
            return Err(SplatError::Config(format!(
                "near plane must be positive, got {}",
                self.near
            )));
        }
        if !(self.far > self.near && self.far.is_finite()) {
            return Err(SplatError::Config(format!(
                "far plane ({}) must lie beyond the near plane ({})",
                self.far, self.near
            )));
        }
        if self.translation.iter().any(|v| !v.is_finite()) {
            return Err(SplatError::Config("camera translation must be finite".to_string()));
        }
        Ok(())
    }
}

impl RenderConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, SplatError> {
        let config: RenderConfig =
            toml::from_str(text).map_err(|e| SplatError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SplatError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SplatError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), SplatError> {
        self.camera.validate()?;
        if !(self.corner_offset > 0.0 && self.corner_offset.is_finite()) {
            return Err(SplatError::Config(format!(
                "corner_offset must be positive, got {}",
                self.corner_offset
            )));
        }
        if !self.scaling_factor.is_finite() {
            return Err(SplatError::Config("scaling_factor must be finite".to_string()));
        }
        if self.sort_axis.iter().any(|v| !v.is_finite()) {
            return Err(SplatError::Config("sort_axis must be finite".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_camera() {
        let config = RenderConfig::default();
        assert_eq!(config.camera.fov_y_degrees, 60.0);
        assert_eq!(config.camera.near, 0.1);
        assert_eq!(config.camera.far, 100.0);
        assert_eq!(config.camera.translation, [0.9, -1.5, -5.0]);
        assert_eq!(config.topology, Topology::Point);
        assert_eq!(config.blend, BlendMode::Premultiplied);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = RenderConfig::from_toml_str(
            r#"
topology = "quad"
blend = "straight"

[camera]
flip_y = true
fov_y_degrees = 45.0
"#,
        )
        .expect("valid config");
        assert_eq!(config.topology, Topology::Quad);
        assert_eq!(config.blend, BlendMode::Straight);
        assert!(config.camera.flip_y);
        assert_eq!(config.camera.fov_y_degrees, 45.0);
        assert_eq!(config.camera.near, 0.1);
        assert_eq!(config.scaling_factor, 1.0);
    }

    #[test]
    fn rejects_unknown_keys_and_bad_planes() {
        assert!(matches!(
            RenderConfig::from_toml_str("colour = 1"),
            Err(SplatError::Config(_))
        ));
        assert!(matches!(
            RenderConfig::from_toml_str("[camera]\nnear = 5.0\nfar = 1.0"),
            Err(SplatError::Config(_))
        ));
        assert!(matches!(
            RenderConfig::from_toml_str("corner_offset = 0.0"),
            Err(SplatError::Config(_))
        ));
    }

    #[test]
    fn parses_cli_enums() {
        assert_eq!("Quad".parse::<Topology>().ok(), Some(Topology::Quad));
        assert_eq!("points".parse::<Topology>().ok(), Some(Topology::Point));
        assert_eq!(
            "straight".parse::<BlendMode>().ok(),
            Some(BlendMode::Straight)
        );
        assert!("lines".parse::<Topology>().is_err());
    }
}
