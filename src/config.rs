//! Render configuration, loaded from JSON.

use std::path::Path;
use std::time::Duration;

use glam::{UVec2, UVec3, Vec3};
use serde::{Deserialize, Serialize};

use crate::core::Camera;
use crate::shader::{builtin, Backend, DEFAULT_MAX_STEPS};
use crate::util::{Error, Result};

/// Camera placement as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub position: [f32; 3],
    pub target: [f32; 3],
    pub up: [f32; 3],
    pub fovy_degrees: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            position: [0.0, 0.0, 40.0],
            target: [0.0; 3],
            up: [0.0, 1.0, 0.0],
            fovy_degrees: 60.0,
        }
    }
}

impl CameraConfig {
    pub fn to_camera(&self) -> Camera {
        Camera {
            position: Vec3::from(self.position),
            target: Vec3::from(self.target),
            up: Vec3::from(self.up),
            fovy: self.fovy_degrees.to_radians(),
        }
    }
}

/// Settings for one render run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    // Output
    pub resolution: [u32; 2],
    pub device: Backend,
    pub shader: String,

    // Volume
    pub grid: [u32; 3],
    pub density: f32,
    pub step: f32,
    pub max_steps: i32,
    pub march_passes: u32,

    // Cluster
    pub ranks: usize,
    pub protocol_timeout_ms: u64,
    /// CPU worker count, 0 = hardware concurrency
    pub threads: usize,

    // Camera
    pub camera: CameraConfig,
    pub orbit_degrees_per_frame: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            resolution: [512, 512],
            device: Backend::Cpu,
            shader: builtin::DENSITY.to_owned(),
            grid: [64, 64, 64],
            density: 0.05,
            step: 1.0,
            max_steps: DEFAULT_MAX_STEPS,
            march_passes: 16,
            ranks: 4,
            protocol_timeout_ms: 30_000,
            threads: 0,
            camera: CameraConfig::default(),
            orbit_degrees_per_frame: 2.0,
        }
    }
}

impl RenderConfig {
    /// Load and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    /// Parse and validate a JSON document. Missing keys take defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject values no render can start with.
    pub fn validate(&self) -> Result<()> {
        if self.ranks == 0 {
            return Err(Error::InvalidRankCount(0));
        }
        if self.resolution.contains(&0) {
            return Err(Error::config(format!("resolution {:?} has a zero extent", self.resolution)));
        }
        if self.grid.contains(&0) {
            return Err(Error::config(format!("grid {:?} has a zero extent", self.grid)));
        }
        if !(self.density > 0.0) {
            return Err(Error::config(format!("density must be positive, got {}", self.density)));
        }
        if !(self.step > 0.0) {
            return Err(Error::config(format!("step must be positive, got {}", self.step)));
        }
        if self.max_steps <= 0 {
            return Err(Error::config(format!("max_steps must be positive, got {}", self.max_steps)));
        }
        if ![builtin::DENSITY, builtin::MIP].contains(&self.shader.as_str()) {
            return Err(Error::config(format!(
                "unknown shader '{}' (expected {} or {})",
                self.shader,
                builtin::DENSITY,
                builtin::MIP
            )));
        }
        if !(self.camera.fovy_degrees > 0.0 && self.camera.fovy_degrees < 180.0) {
            return Err(Error::config(format!(
                "fovy_degrees must lie in (0, 180), got {}",
                self.camera.fovy_degrees
            )));
        }
        Ok(())
    }

    pub fn resolution(&self) -> UVec2 {
        UVec2::from(self.resolution)
    }

    pub fn grid(&self) -> UVec3 {
        UVec3::from(self.grid)
    }

    pub fn protocol_timeout(&self) -> Duration {
        Duration::from_millis(self.protocol_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        RenderConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg = RenderConfig::from_json(r#"{ "ranks": 2, "device": "gpu" }"#).unwrap();
        assert_eq!(cfg.ranks, 2);
        assert_eq!(cfg.device, Backend::Gpu);
        assert_eq!(cfg.grid, [64, 64, 64]);
    }

    #[test]
    fn test_zero_ranks_is_configuration_error() {
        let err = RenderConfig::from_json(r#"{ "ranks": 0 }"#).unwrap_err();
        assert!(matches!(err, Error::InvalidRankCount(0)));
        assert_eq!(err.kind(), crate::util::ErrorKind::Configuration);
    }

    #[test]
    fn test_bad_values_rejected() {
        assert!(RenderConfig::from_json(r#"{ "grid": [0, 4, 4] }"#).is_err());
        assert!(RenderConfig::from_json(r#"{ "density": -1.0 }"#).is_err());
        assert!(RenderConfig::from_json(r#"{ "device": "tpu" }"#).is_err());
        assert!(RenderConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_unknown_shader_rejected() {
        let err = RenderConfig::from_json(r#"{ "shader": "volume.isosurface" }"#).unwrap_err();
        assert_eq!(err.kind(), crate::util::ErrorKind::Configuration);
        assert!(err.to_string().contains("volume.isosurface"));
        let mip = RenderConfig::from_json(r#"{ "shader": "volume.mip" }"#).unwrap();
        assert_eq!(mip.shader, builtin::MIP);
    }

    #[test]
    fn test_json_roundtrip() {
        let cfg = RenderConfig {
            ranks: 3,
            ..Default::default()
        };
        let back = RenderConfig::from_json(&cfg.to_json().unwrap()).unwrap();
        assert_eq!(back, cfg);
    }
}
