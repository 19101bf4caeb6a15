//! Command kind enumeration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Every request kind the protocol carries. Each kind has exactly one
/// success completion and an implicit failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    // Handshake
    SyncBodyInfo,
    SyncUserData,
    // Simulation control
    StepSimulation,
    ResetSimulation,
    SetPhysicsParameters,
    // World construction
    LoadModel,
    CreateCollisionShape,
    CreateVisualShape,
    AddUserData,
    // Queries and actuation
    ApplyExternalForce,
    RequestCameraImage,
    ComputeInverseKinematics,
    RequestContactPoints,
}

impl CommandKind {
    /// All kinds, in declaration order.
    pub const ALL: [CommandKind; 13] = [
        CommandKind::SyncBodyInfo,
        CommandKind::SyncUserData,
        CommandKind::StepSimulation,
        CommandKind::ResetSimulation,
        CommandKind::SetPhysicsParameters,
        CommandKind::LoadModel,
        CommandKind::CreateCollisionShape,
        CommandKind::CreateVisualShape,
        CommandKind::AddUserData,
        CommandKind::ApplyExternalForce,
        CommandKind::RequestCameraImage,
        CommandKind::ComputeInverseKinematics,
        CommandKind::RequestContactPoints,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::SyncBodyInfo => "sync_body_info",
            CommandKind::SyncUserData => "sync_user_data",
            CommandKind::StepSimulation => "step_simulation",
            CommandKind::ResetSimulation => "reset_simulation",
            CommandKind::SetPhysicsParameters => "set_physics_parameters",
            CommandKind::LoadModel => "load_model",
            CommandKind::CreateCollisionShape => "create_collision_shape",
            CommandKind::CreateVisualShape => "create_visual_shape",
            CommandKind::AddUserData => "add_user_data",
            CommandKind::ApplyExternalForce => "apply_external_force",
            CommandKind::RequestCameraImage => "request_camera_image",
            CommandKind::ComputeInverseKinematics => "compute_inverse_kinematics",
            CommandKind::RequestContactPoints => "request_contact_points",
        }
    }

    /// Reverse of [`CommandKind::as_str`], used for RPC method names.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_match_serde() {
        for kind in CommandKind::ALL {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json.as_str().unwrap(), kind.as_str());
            assert_eq!(CommandKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(CommandKind::from_name("teleport"), None);
    }
}
