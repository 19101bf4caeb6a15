//! Replies and statuses.
//!
//! [`Reply`] is what an engine sends back over a transport. [`Status`] is what
//! a caller receives from `submit`: a reply plus the `Disconnected` outcome a
//! transport break produces. Status variants are `#[non_exhaustive]` so only
//! this crate's dispatcher can build one.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::kinds::CommandKind;
use super::payload::{BodyInfo, CameraImage, ContactPoint, PhysicsParameters, UserDataEntry};
use crate::types::{BodyId, Error, Result, ShapeId, UserDataId};

/// Success payload, one variant per command kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    BodyInfoSynced { bodies: Vec<BodyInfo> },
    UserDataSynced { entries: Vec<UserDataEntry> },
    SimulationStepped { step_count: u64 },
    SimulationReset,
    PhysicsParametersSet(PhysicsParameters),
    ModelLoaded { body: BodyId, num_joints: u32 },
    CollisionShapeCreated { shape: ShapeId },
    VisualShapeCreated { shape: ShapeId },
    UserDataAdded { id: UserDataId },
    ExternalForceApplied,
    CameraImageRendered(CameraImage),
    InverseKinematicsSolved { joint_positions: Vec<f64> },
    ContactPointsReported { contacts: Vec<ContactPoint> },
}

impl Completion {
    /// The command kind this completion answers.
    pub fn kind(&self) -> CommandKind {
        match self {
            Completion::BodyInfoSynced { .. } => CommandKind::SyncBodyInfo,
            Completion::UserDataSynced { .. } => CommandKind::SyncUserData,
            Completion::SimulationStepped { .. } => CommandKind::StepSimulation,
            Completion::SimulationReset => CommandKind::ResetSimulation,
            Completion::PhysicsParametersSet(_) => CommandKind::SetPhysicsParameters,
            Completion::ModelLoaded { .. } => CommandKind::LoadModel,
            Completion::CollisionShapeCreated { .. } => CommandKind::CreateCollisionShape,
            Completion::VisualShapeCreated { .. } => CommandKind::CreateVisualShape,
            Completion::UserDataAdded { .. } => CommandKind::AddUserData,
            Completion::ExternalForceApplied => CommandKind::ApplyExternalForce,
            Completion::CameraImageRendered(_) => CommandKind::RequestCameraImage,
            Completion::InverseKinematicsSolved { .. } => CommandKind::ComputeInverseKinematics,
            Completion::ContactPointsReported { .. } => CommandKind::RequestContactPoints,
        }
    }
}

/// Engine answer to one request, as carried by a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Completed(Completion),
    Failed { kind: CommandKind, reason: String },
}

impl Reply {
    pub fn failed(kind: CommandKind, reason: impl Into<String>) -> Self {
        Reply::Failed {
            kind,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Reply::Completed(c) => c.kind(),
            Reply::Failed { kind, .. } => *kind,
        }
    }
}

impl From<Completion> for Reply {
    fn from(c: Completion) -> Self {
        Reply::Completed(c)
    }
}

/// Completion tag a caller branches on before extracting a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    Completed(CommandKind),
    Failed(CommandKind),
    Disconnected,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusKind::Completed(k) => write!(f, "completed({})", k),
            StatusKind::Failed(k) => write!(f, "failed({})", k),
            StatusKind::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// The single result of one submitted command.
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    #[non_exhaustive]
    Completed { completion: Completion },
    #[non_exhaustive]
    Failed { kind: CommandKind, reason: String },
    /// The transport broke while `kind` was in flight.
    #[non_exhaustive]
    Disconnected { kind: CommandKind },
}

impl Status {
    pub(crate) fn completed(completion: Completion) -> Self {
        Status::Completed { completion }
    }

    pub(crate) fn failed(kind: CommandKind, reason: impl Into<String>) -> Self {
        Status::Failed {
            kind,
            reason: reason.into(),
        }
    }

    pub(crate) fn disconnected(kind: CommandKind) -> Self {
        Status::Disconnected { kind }
    }

    pub fn kind(&self) -> StatusKind {
        match self {
            Status::Completed { completion } => StatusKind::Completed(completion.kind()),
            Status::Failed { kind, .. } => StatusKind::Failed(*kind),
            Status::Disconnected { .. } => StatusKind::Disconnected,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Status::Completed { .. })
    }

    /// Failure reason, for `Failed` statuses only.
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Status::Failed { reason, .. } => Some(reason),
            _ => None,
        }
    }

    pub fn completion(&self) -> Option<&Completion> {
        match self {
            Status::Completed { completion } => Some(completion),
            _ => None,
        }
    }

    /// Convert into the completion for `expected`, surfacing failures and
    /// mismatched completions as errors.
    pub fn into_completion(self, expected: CommandKind) -> Result<Completion> {
        match self {
            Status::Completed { completion } if completion.kind() == expected => Ok(completion),
            Status::Completed { completion } => Err(Error::command_failed(
                expected,
                format!("unexpected {} completion", completion.kind()),
            )),
            Status::Failed { kind, reason } => Err(Error::command_failed(kind, reason)),
            Status::Disconnected { kind } => Err(Error::Disconnected(kind)),
        }
    }

    // =========================================================================
    // Typed extraction (each Some only for its own kind)
    // =========================================================================

    pub fn synced_bodies(&self) -> Option<&[BodyInfo]> {
        match self.completion()? {
            Completion::BodyInfoSynced { bodies } => Some(bodies),
            _ => None,
        }
    }

    pub fn synced_user_data(&self) -> Option<&[UserDataEntry]> {
        match self.completion()? {
            Completion::UserDataSynced { entries } => Some(entries),
            _ => None,
        }
    }

    pub fn step_count(&self) -> Option<u64> {
        match self.completion()? {
            Completion::SimulationStepped { step_count } => Some(*step_count),
            _ => None,
        }
    }

    pub fn reset_completed(&self) -> bool {
        matches!(self.completion(), Some(Completion::SimulationReset))
    }

    pub fn physics_parameters(&self) -> Option<&PhysicsParameters> {
        match self.completion()? {
            Completion::PhysicsParametersSet(params) => Some(params),
            _ => None,
        }
    }

    pub fn loaded_body(&self) -> Option<BodyId> {
        match self.completion()? {
            Completion::ModelLoaded { body, .. } => Some(*body),
            _ => None,
        }
    }

    pub fn collision_shape(&self) -> Option<ShapeId> {
        match self.completion()? {
            Completion::CollisionShapeCreated { shape } => Some(*shape),
            _ => None,
        }
    }

    pub fn visual_shape(&self) -> Option<ShapeId> {
        match self.completion()? {
            Completion::VisualShapeCreated { shape } => Some(*shape),
            _ => None,
        }
    }

    pub fn user_data_id(&self) -> Option<UserDataId> {
        match self.completion()? {
            Completion::UserDataAdded { id } => Some(*id),
            _ => None,
        }
    }

    pub fn external_force_applied(&self) -> bool {
        matches!(self.completion(), Some(Completion::ExternalForceApplied))
    }

    pub fn camera_image(&self) -> Option<&CameraImage> {
        match self.completion()? {
            Completion::CameraImageRendered(image) => Some(image),
            _ => None,
        }
    }

    pub fn joint_positions(&self) -> Option<&[f64]> {
        match self.completion()? {
            Completion::InverseKinematicsSolved { joint_positions } => Some(joint_positions),
            _ => None,
        }
    }

    pub fn contact_points(&self) -> Option<&[ContactPoint]> {
        match self.completion()? {
            Completion::ContactPointsReported { contacts } => Some(contacts),
            _ => None,
        }
    }
}
