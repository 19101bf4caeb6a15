//! Command/status protocol.
//!
//! Commands are built per request and consumed by submission; every
//! submission yields exactly one [`Status`].

mod command;
mod kinds;
mod payload;
mod status;

pub use command::{
    AddUserData, ApplyExternalForce, Command, CommandParams, ComputeInverseKinematics,
    CreateCollisionShape, CreateVisualShape, LoadModel, Request, RequestCameraImage,
    RequestContactPoints, ResetSimulation, SetPhysicsParameters, StepSimulation, SyncBodyInfo,
    SyncUserData,
};
pub use kinds::CommandKind;
pub use payload::{
    BodyInfo, CameraImage, ContactPoint, ForceFrame, Geometry, Matrix4, PhysicsParameters, Pose,
    Quat, UserDataEntry, Vec3, IDENTITY_MATRIX, IDENTITY_QUAT,
};
pub use status::{Completion, Reply, Status, StatusKind};
