//! Value types carried inside commands and completions.

use serde::{Deserialize, Serialize};

use crate::types::{BodyId, UserDataId};

/// Cartesian vector.
pub type Vec3 = [f64; 3];

/// Quaternion in `[x, y, z, w]` order.
pub type Quat = [f64; 4];

/// Column-major 4x4 matrix.
pub type Matrix4 = [f32; 16];

/// Identity rotation.
pub const IDENTITY_QUAT: Quat = [0.0, 0.0, 0.0, 1.0];

/// Column-major identity matrix.
pub const IDENTITY_MATRIX: Matrix4 = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Position plus orientation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            orientation: IDENTITY_QUAT,
        }
    }
}

/// Body summary exchanged by the body-info handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyInfo {
    pub body: BodyId,
    pub name: String,
    pub base_pose: Pose,
    pub num_joints: u32,
}

/// One user data entry attached to a body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDataEntry {
    pub id: UserDataId,
    pub body: BodyId,
    pub key: String,
    pub value: String,
}

/// Primitive or mesh geometry used for collision and visual shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Geometry {
    Sphere { radius: f64 },
    Box { half_extents: Vec3 },
    Capsule { radius: f64, height: f64 },
    Cylinder { radius: f64, height: f64 },
    Plane { normal: Vec3 },
    Mesh { file_name: String, scale: Vec3 },
}

impl Geometry {
    /// Rejects non-positive extents and empty mesh names.
    pub fn validate(&self) -> Result<(), String> {
        let positive = |name: &str, v: f64| {
            if v > 0.0 && v.is_finite() {
                Ok(())
            } else {
                Err(format!("{} must be positive, got {}", name, v))
            }
        };
        match self {
            Geometry::Sphere { radius } => positive("radius", *radius),
            Geometry::Box { half_extents } => half_extents
                .iter()
                .try_for_each(|e| positive("half extent", *e)),
            Geometry::Capsule { radius, height } | Geometry::Cylinder { radius, height } => {
                positive("radius", *radius)?;
                positive("height", *height)
            }
            Geometry::Plane { normal } => {
                if normal.iter().all(|c| *c == 0.0) {
                    Err("plane normal must be non-zero".to_string())
                } else {
                    Ok(())
                }
            }
            Geometry::Mesh { file_name, scale } => {
                if file_name.is_empty() {
                    return Err("mesh file name is empty".to_string());
                }
                scale.iter().try_for_each(|s| positive("mesh scale", *s))
            }
        }
    }
}

/// Frame an external force is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForceFrame {
    #[default]
    Link,
    World,
}

/// Rendered camera image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraImage {
    pub width: u32,
    pub height: u32,
    /// Row-major RGBA8 samples, `width * height * 4` bytes.
    pub rgba: Vec<u8>,
    /// Row-major depth buffer in `[0, 1]`.
    pub depth: Vec<f32>,
    /// Row-major body id per pixel, `-1` for background.
    pub segmentation: Vec<i32>,
}

impl CameraImage {
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// One contact between two bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactPoint {
    pub body_a: BodyId,
    pub body_b: BodyId,
    pub link_a: i32,
    pub link_b: i32,
    pub position_on_a: Vec3,
    pub position_on_b: Vec3,
    pub normal_on_b: Vec3,
    pub distance: f64,
    pub normal_force: f64,
}

/// Effective physics parameters after a set-physics-parameters command.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicsParameters {
    pub gravity: Vec3,
    pub time_step: f64,
    pub num_solver_iterations: u32,
    pub num_sub_steps: u32,
}

impl Default for PhysicsParameters {
    fn default() -> Self {
        Self {
            gravity: [0.0, 0.0, 0.0],
            time_step: 1.0 / 240.0,
            num_solver_iterations: 50,
            num_sub_steps: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_validation() {
        assert!(Geometry::Sphere { radius: 0.5 }.validate().is_ok());
        assert!(Geometry::Sphere { radius: 0.0 }.validate().is_err());
        assert!(Geometry::Box {
            half_extents: [1.0, -1.0, 1.0]
        }
        .validate()
        .is_err());
        assert!(Geometry::Plane {
            normal: [0.0, 0.0, 0.0]
        }
        .validate()
        .is_err());
        assert!(Geometry::Mesh {
            file_name: String::new(),
            scale: [1.0; 3]
        }
        .validate()
        .is_err());
        assert!(Geometry::Capsule {
            radius: 0.1,
            height: f64::NAN
        }
        .validate()
        .is_err());
    }
}
