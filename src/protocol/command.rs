//! Outgoing commands.
//!
//! A [`Command`] is created for one target connection, parameterized through
//! the typed setters of its parameter struct, then consumed by submission.
//! It is deliberately not `Clone`: once submitted it cannot be sent again.

use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

use super::kinds::CommandKind;
use super::payload::{ForceFrame, Geometry, Matrix4, Quat, Vec3};
use crate::types::{BodyId, ClientId};

/// Parameter struct of one command kind.
pub trait CommandParams: Into<Request> + std::fmt::Debug + Send {
    const KIND: CommandKind;
}

/// A single-use request bound to one connection.
#[derive(Debug)]
pub struct Command<P: CommandParams> {
    target: ClientId,
    params: P,
}

impl<P: CommandParams> Command<P> {
    pub fn new(target: ClientId, params: P) -> Self {
        Self { target, params }
    }

    pub fn target(&self) -> ClientId {
        self.target
    }

    pub fn kind(&self) -> CommandKind {
        P::KIND
    }

    pub fn params(&self) -> &P {
        &self.params
    }

    pub(crate) fn into_request(self) -> Request {
        self.params.into()
    }
}

impl<P: CommandParams> Deref for Command<P> {
    type Target = P;

    fn deref(&self) -> &P {
        &self.params
    }
}

impl<P: CommandParams> DerefMut for Command<P> {
    fn deref_mut(&mut self) -> &mut P {
        &mut self.params
    }
}

/// Encoded form of a command as it crosses a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Request {
    SyncBodyInfo,
    SyncUserData,
    StepSimulation,
    ResetSimulation,
    SetPhysicsParameters(SetPhysicsParameters),
    LoadModel(LoadModel),
    CreateCollisionShape(CreateCollisionShape),
    CreateVisualShape(CreateVisualShape),
    AddUserData(AddUserData),
    ApplyExternalForce(ApplyExternalForce),
    RequestCameraImage(RequestCameraImage),
    ComputeInverseKinematics(ComputeInverseKinematics),
    RequestContactPoints(RequestContactPoints),
}

impl Request {
    pub fn kind(&self) -> CommandKind {
        match self {
            Request::SyncBodyInfo => CommandKind::SyncBodyInfo,
            Request::SyncUserData => CommandKind::SyncUserData,
            Request::StepSimulation => CommandKind::StepSimulation,
            Request::ResetSimulation => CommandKind::ResetSimulation,
            Request::SetPhysicsParameters(_) => CommandKind::SetPhysicsParameters,
            Request::LoadModel(_) => CommandKind::LoadModel,
            Request::CreateCollisionShape(_) => CommandKind::CreateCollisionShape,
            Request::CreateVisualShape(_) => CommandKind::CreateVisualShape,
            Request::AddUserData(_) => CommandKind::AddUserData,
            Request::ApplyExternalForce(_) => CommandKind::ApplyExternalForce,
            Request::RequestCameraImage(_) => CommandKind::RequestCameraImage,
            Request::ComputeInverseKinematics(_) => CommandKind::ComputeInverseKinematics,
            Request::RequestContactPoints(_) => CommandKind::RequestContactPoints,
        }
    }
}

// =============================================================================
// Parameterless kinds
// =============================================================================

macro_rules! unit_params {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name;

        impl From<$name> for Request {
            fn from(_: $name) -> Request {
                Request::$name
            }
        }

        impl CommandParams for $name {
            const KIND: CommandKind = CommandKind::$name;
        }
    };
}

macro_rules! struct_params {
    ($name:ident) => {
        impl From<$name> for Request {
            fn from(p: $name) -> Request {
                Request::$name(p)
            }
        }

        impl CommandParams for $name {
            const KIND: CommandKind = CommandKind::$name;
        }
    };
}

unit_params!(
    /// Fetch the engine's body table (first handshake step).
    SyncBodyInfo
);
unit_params!(
    /// Fetch all user data entries (second handshake step).
    SyncUserData
);
unit_params!(
    /// Advance the simulation by one time step.
    StepSimulation
);
unit_params!(
    /// Remove every body, shape and user data entry.
    ResetSimulation
);

// =============================================================================
// Parameterized kinds
// =============================================================================

/// Change gravity, time step or solver settings. Unset fields keep the
/// engine's current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetPhysicsParameters {
    pub gravity: Option<Vec3>,
    pub time_step: Option<f64>,
    pub num_solver_iterations: Option<u32>,
    pub num_sub_steps: Option<u32>,
}
struct_params!(SetPhysicsParameters);

impl SetPhysicsParameters {
    pub fn set_gravity(&mut self, gravity: Vec3) -> &mut Self {
        self.gravity = Some(gravity);
        self
    }

    pub fn set_time_step(&mut self, seconds: f64) -> &mut Self {
        self.time_step = Some(seconds);
        self
    }

    pub fn set_num_solver_iterations(&mut self, iterations: u32) -> &mut Self {
        self.num_solver_iterations = Some(iterations);
        self
    }

    pub fn set_num_sub_steps(&mut self, sub_steps: u32) -> &mut Self {
        self.num_sub_steps = Some(sub_steps);
        self
    }
}

/// Load a model description file into the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadModel {
    pub file_name: String,
    pub base_position: Option<Vec3>,
    pub base_orientation: Option<Quat>,
    pub use_fixed_base: Option<bool>,
    pub global_scaling: Option<f64>,
}
struct_params!(LoadModel);

impl LoadModel {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            base_position: None,
            base_orientation: None,
            use_fixed_base: None,
            global_scaling: None,
        }
    }

    pub fn set_base_position(&mut self, position: Vec3) -> &mut Self {
        self.base_position = Some(position);
        self
    }

    pub fn set_base_orientation(&mut self, orientation: Quat) -> &mut Self {
        self.base_orientation = Some(orientation);
        self
    }

    pub fn set_use_fixed_base(&mut self, fixed: bool) -> &mut Self {
        self.use_fixed_base = Some(fixed);
        self
    }

    pub fn set_global_scaling(&mut self, scaling: f64) -> &mut Self {
        self.global_scaling = Some(scaling);
        self
    }
}

/// Register a collision shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateCollisionShape {
    pub geometry: Geometry,
    pub frame_position: Option<Vec3>,
    pub frame_orientation: Option<Quat>,
}
struct_params!(CreateCollisionShape);

impl CreateCollisionShape {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            frame_position: None,
            frame_orientation: None,
        }
    }

    pub fn set_frame_position(&mut self, position: Vec3) -> &mut Self {
        self.frame_position = Some(position);
        self
    }

    pub fn set_frame_orientation(&mut self, orientation: Quat) -> &mut Self {
        self.frame_orientation = Some(orientation);
        self
    }
}

/// Register a visual shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateVisualShape {
    pub geometry: Geometry,
    pub rgba_color: Option<[f32; 4]>,
    pub specular_color: Option<[f32; 3]>,
}
struct_params!(CreateVisualShape);

impl CreateVisualShape {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            rgba_color: None,
            specular_color: None,
        }
    }

    pub fn set_rgba_color(&mut self, rgba: [f32; 4]) -> &mut Self {
        self.rgba_color = Some(rgba);
        self
    }

    pub fn set_specular_color(&mut self, rgb: [f32; 3]) -> &mut Self {
        self.specular_color = Some(rgb);
        self
    }
}

/// Attach a key/value string to a body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddUserData {
    pub body: BodyId,
    pub key: String,
    pub value: String,
}
struct_params!(AddUserData);

impl AddUserData {
    pub fn new(body: BodyId, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            body,
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Apply a force to a body for the next step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyExternalForce {
    pub body: BodyId,
    /// Link index; `None` targets the base.
    pub link: Option<i32>,
    pub force: Vec3,
    pub position: Option<Vec3>,
    pub frame: ForceFrame,
}
struct_params!(ApplyExternalForce);

impl ApplyExternalForce {
    pub fn new(body: BodyId, force: Vec3) -> Self {
        Self {
            body,
            link: None,
            force,
            position: None,
            frame: ForceFrame::default(),
        }
    }

    pub fn set_link(&mut self, link: i32) -> &mut Self {
        self.link = Some(link);
        self
    }

    pub fn set_position(&mut self, position: Vec3) -> &mut Self {
        self.position = Some(position);
        self
    }

    pub fn set_frame(&mut self, frame: ForceFrame) -> &mut Self {
        self.frame = frame;
        self
    }
}

/// Render the scene from a camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestCameraImage {
    pub width: u32,
    pub height: u32,
    pub view_matrix: Option<Matrix4>,
    pub projection_matrix: Option<Matrix4>,
    pub light_direction: Option<Vec3>,
}
struct_params!(RequestCameraImage);

impl RequestCameraImage {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            view_matrix: None,
            projection_matrix: None,
            light_direction: None,
        }
    }

    pub fn set_view_matrix(&mut self, view: Matrix4) -> &mut Self {
        self.view_matrix = Some(view);
        self
    }

    pub fn set_projection_matrix(&mut self, projection: Matrix4) -> &mut Self {
        self.projection_matrix = Some(projection);
        self
    }

    pub fn set_light_direction(&mut self, direction: Vec3) -> &mut Self {
        self.light_direction = Some(direction);
        self
    }
}

/// Solve joint positions that bring a link to a target pose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeInverseKinematics {
    pub body: BodyId,
    pub end_effector_link: i32,
    pub target_position: Vec3,
    pub target_orientation: Option<Quat>,
    pub max_iterations: Option<u32>,
    pub residual_threshold: Option<f64>,
}
struct_params!(ComputeInverseKinematics);

impl ComputeInverseKinematics {
    pub fn new(body: BodyId, end_effector_link: i32, target_position: Vec3) -> Self {
        Self {
            body,
            end_effector_link,
            target_position,
            target_orientation: None,
            max_iterations: None,
            residual_threshold: None,
        }
    }

    pub fn set_target_orientation(&mut self, orientation: Quat) -> &mut Self {
        self.target_orientation = Some(orientation);
        self
    }

    pub fn set_max_iterations(&mut self, iterations: u32) -> &mut Self {
        self.max_iterations = Some(iterations);
        self
    }

    pub fn set_residual_threshold(&mut self, threshold: f64) -> &mut Self {
        self.residual_threshold = Some(threshold);
        self
    }
}

/// Query contacts, optionally filtered by body and link.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContactPoints {
    pub body_a: Option<BodyId>,
    pub body_b: Option<BodyId>,
    pub link_a: Option<i32>,
    pub link_b: Option<i32>,
}
struct_params!(RequestContactPoints);

impl RequestContactPoints {
    pub fn set_body_a(&mut self, body: BodyId) -> &mut Self {
        self.body_a = Some(body);
        self
    }

    pub fn set_body_b(&mut self, body: BodyId) -> &mut Self {
        self.body_b = Some(body);
        self
    }

    pub fn set_link_a(&mut self, link: i32) -> &mut Self {
        self.link_a = Some(link);
        self
    }

    pub fn set_link_b(&mut self, link: i32) -> &mut Self {
        self.link_b = Some(link);
        self
    }
}
