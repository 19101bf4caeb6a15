//! Reference engine: world bookkeeping without dynamics.
//!
//! Tracks bodies, shapes, user data, physics parameters and a step counter so
//! that every command kind has a well-defined answer. It performs no
//! collision detection or integration: contact queries report no contacts and
//! inverse kinematics reports the rest configuration.

use std::collections::BTreeMap;
use std::path::Path;

use super::{EngineOptions, SimulationEngine, DEFAULT_BACKEND};
use crate::protocol::{
    AddUserData, ApplyExternalForce, BodyInfo, CameraImage, CommandKind, Completion,
    ComputeInverseKinematics, CreateCollisionShape, CreateVisualShape, Geometry, LoadModel,
    PhysicsParameters, Pose, Reply, Request, RequestCameraImage, RequestContactPoints,
    SetPhysicsParameters, UserDataEntry, Vec3,
};
use crate::types::{BodyId, Result, ShapeId, UserDataId};

/// Largest accepted camera edge in pixels.
const MAX_IMAGE_EDGE: u32 = 4096;

/// Model file extensions the engine accepts.
const MODEL_EXTENSIONS: &[&str] = &["urdf", "sdf", "xml", "obj", "bullet"];

/// Background color of rendered images.
const BACKGROUND_RGBA: [u8; 4] = [178, 204, 229, 255];

#[derive(Debug, Clone)]
struct BodyRecord {
    info: BodyInfo,
    fixed_base: bool,
    /// Force accumulated since the last step, world frame.
    applied_force: Vec3,
}

/// Bookkeeping engine used for in-process connections and test servers.
#[derive(Debug)]
pub struct ReferenceEngine {
    bodies: BTreeMap<BodyId, BodyRecord>,
    shapes: BTreeMap<ShapeId, Geometry>,
    user_data: BTreeMap<UserDataId, UserDataEntry>,
    params: PhysicsParameters,
    step_count: u64,
    next_body: u32,
    next_shape: u32,
    next_user_data: u32,
}

impl ReferenceEngine {
    pub fn new() -> Self {
        Self {
            bodies: BTreeMap::new(),
            shapes: BTreeMap::new(),
            user_data: BTreeMap::new(),
            params: PhysicsParameters::default(),
            step_count: 0,
            next_body: 0,
            next_shape: 0,
            next_user_data: 0,
        }
    }

    /// Build from `--time-step=<secs>` and `--solver-iterations=<n>` options.
    pub fn from_options(options: &EngineOptions) -> Result<Self> {
        let mut engine = Self::new();
        if let Some(time_step) = options.parsed::<f64>("time-step")? {
            engine.params.time_step = time_step;
        }
        if let Some(iterations) = options.parsed::<u32>("solver-iterations")? {
            engine.params.num_solver_iterations = iterations;
        }
        Ok(engine)
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    fn body(&self, kind: CommandKind, body: BodyId) -> std::result::Result<&BodyRecord, Reply> {
        self.bodies
            .get(&body)
            .ok_or_else(|| Reply::failed(kind, format!("unknown {}", body)))
    }

    fn sync_body_info(&self) -> Reply {
        let bodies = self.bodies.values().map(|b| b.info.clone()).collect();
        Completion::BodyInfoSynced { bodies }.into()
    }

    fn sync_user_data(&self) -> Reply {
        let entries = self.user_data.values().cloned().collect();
        Completion::UserDataSynced { entries }.into()
    }

    fn step(&mut self) -> Reply {
        self.step_count += 1;
        for body in self.bodies.values_mut() {
            body.applied_force = [0.0; 3];
        }
        Completion::SimulationStepped {
            step_count: self.step_count,
        }
        .into()
    }

    fn reset(&mut self) -> Reply {
        let params = self.params;
        *self = Self::new();
        self.params = params;
        Completion::SimulationReset.into()
    }

    fn set_physics_parameters(&mut self, p: SetPhysicsParameters) -> Reply {
        let kind = CommandKind::SetPhysicsParameters;
        if let Some(dt) = p.time_step {
            if !(dt > 0.0 && dt.is_finite()) {
                return Reply::failed(kind, format!("time step must be positive, got {}", dt));
            }
        }
        if let Some(g) = p.gravity {
            if g.iter().any(|c| !c.is_finite()) {
                return Reply::failed(kind, "gravity must be finite");
            }
        }

        // Validated; apply all or nothing.
        let mut params = self.params;
        if let Some(dt) = p.time_step {
            params.time_step = dt;
        }
        if let Some(g) = p.gravity {
            params.gravity = g;
        }
        if let Some(n) = p.num_solver_iterations {
            params.num_solver_iterations = n;
        }
        if let Some(n) = p.num_sub_steps {
            params.num_sub_steps = n;
        }
        self.params = params;
        Completion::PhysicsParametersSet(params).into()
    }

    fn load_model(&mut self, p: LoadModel) -> Reply {
        let kind = CommandKind::LoadModel;
        let path = Path::new(&p.file_name);
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !MODEL_EXTENSIONS.contains(&extension.as_str()) {
            return Reply::failed(
                kind,
                format!("unsupported model format `{}`", p.file_name),
            );
        }
        let scaling = p.global_scaling.unwrap_or(1.0);
        if !(scaling > 0.0 && scaling.is_finite()) {
            return Reply::failed(kind, format!("global scaling must be positive, got {}", scaling));
        }
        let text = match std::fs::read(path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                return Reply::failed(kind, format!("cannot read `{}`: {}", p.file_name, e))
            }
        };
        // Joint count sizes inverse kinematics replies; only text formats declare joints.
        let num_joints = match extension.as_str() {
            "urdf" | "sdf" | "xml" => text.matches("<joint").count() as u32,
            _ => 0,
        };

        let body = BodyId::new(self.next_body);
        self.next_body += 1;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("body")
            .to_string();
        let base_pose = Pose {
            position: p.base_position.unwrap_or([0.0; 3]),
            orientation: p.base_orientation.unwrap_or(Pose::default().orientation),
        };
        tracing::debug!(%body, %name, num_joints, "model loaded");
        self.bodies.insert(
            body,
            BodyRecord {
                info: BodyInfo {
                    body,
                    name,
                    base_pose,
                    num_joints,
                },
                fixed_base: p.use_fixed_base.unwrap_or(false),
                applied_force: [0.0; 3],
            },
        );
        Completion::ModelLoaded { body, num_joints }.into()
    }

    fn create_shape(&mut self, kind: CommandKind, geometry: Geometry, visual: bool) -> Reply {
        if let Err(reason) = geometry.validate() {
            return Reply::failed(kind, reason);
        }
        let shape = ShapeId::new(self.next_shape);
        self.next_shape += 1;
        self.shapes.insert(shape, geometry);
        if visual {
            Completion::VisualShapeCreated { shape }.into()
        } else {
            Completion::CollisionShapeCreated { shape }.into()
        }
    }

    fn create_collision_shape(&mut self, p: CreateCollisionShape) -> Reply {
        self.create_shape(CommandKind::CreateCollisionShape, p.geometry, false)
    }

    fn create_visual_shape(&mut self, p: CreateVisualShape) -> Reply {
        let kind = CommandKind::CreateVisualShape;
        if let Some(rgba) = p.rgba_color {
            if rgba.iter().any(|c| !(0.0..=1.0).contains(c)) {
                return Reply::failed(kind, "rgba components must lie in [0, 1]");
            }
        }
        self.create_shape(kind, p.geometry, true)
    }

    fn add_user_data(&mut self, p: AddUserData) -> Reply {
        let kind = CommandKind::AddUserData;
        if let Err(reply) = self.body(kind, p.body) {
            return reply;
        }
        if p.key.is_empty() {
            return Reply::failed(kind, "user data key is empty");
        }
        // Same body and key updates the existing entry in place.
        if let Some(entry) = self
            .user_data
            .values_mut()
            .find(|e| e.body == p.body && e.key == p.key)
        {
            entry.value = p.value;
            return Completion::UserDataAdded { id: entry.id }.into();
        }
        let id = UserDataId::new(self.next_user_data);
        self.next_user_data += 1;
        self.user_data.insert(
            id,
            UserDataEntry {
                id,
                body: p.body,
                key: p.key,
                value: p.value,
            },
        );
        Completion::UserDataAdded { id }.into()
    }

    fn apply_external_force(&mut self, p: ApplyExternalForce) -> Reply {
        let kind = CommandKind::ApplyExternalForce;
        let record = match self.bodies.get_mut(&p.body) {
            Some(r) => r,
            None => return Reply::failed(kind, format!("unknown {}", p.body)),
        };
        if let Some(link) = p.link {
            if link < -1 || link >= record.info.num_joints as i32 {
                return Reply::failed(kind, format!("{} has no link {}", p.body, link));
            }
        }
        if p.force.iter().any(|c| !c.is_finite()) {
            return Reply::failed(kind, "force must be finite");
        }
        if !record.fixed_base {
            for (acc, f) in record.applied_force.iter_mut().zip(p.force) {
                *acc += f;
            }
        }
        Completion::ExternalForceApplied.into()
    }

    fn render(&self, p: RequestCameraImage) -> Reply {
        let kind = CommandKind::RequestCameraImage;
        if p.width == 0 || p.height == 0 || p.width > MAX_IMAGE_EDGE || p.height > MAX_IMAGE_EDGE {
            return Reply::failed(
                kind,
                format!("image size {}x{} out of range", p.width, p.height),
            );
        }
        let pixels = p.width as usize * p.height as usize;
        let image = CameraImage {
            width: p.width,
            height: p.height,
            rgba: BACKGROUND_RGBA.repeat(pixels),
            depth: vec![1.0; pixels],
            segmentation: vec![-1; pixels],
        };
        Completion::CameraImageRendered(image).into()
    }

    fn inverse_kinematics(&self, p: ComputeInverseKinematics) -> Reply {
        let kind = CommandKind::ComputeInverseKinematics;
        let record = match self.body(kind, p.body) {
            Ok(r) => r,
            Err(reply) => return reply,
        };
        let joints = record.info.num_joints as i32;
        if p.end_effector_link < 0 || p.end_effector_link >= joints {
            return Reply::failed(
                kind,
                format!(
                    "end effector link {} out of range for {} ({} joints)",
                    p.end_effector_link, p.body, joints
                ),
            );
        }
        if p.target_position.iter().any(|c| !c.is_finite()) {
            return Reply::failed(kind, "target position must be finite");
        }
        Completion::InverseKinematicsSolved {
            joint_positions: vec![0.0; record.info.num_joints as usize],
        }
        .into()
    }

    fn contact_points(&self, p: RequestContactPoints) -> Reply {
        let kind = CommandKind::RequestContactPoints;
        for body in [p.body_a, p.body_b].into_iter().flatten() {
            if let Err(reply) = self.body(kind, body) {
                return reply;
            }
        }
        Completion::ContactPointsReported { contacts: Vec::new() }.into()
    }
}

impl Default for ReferenceEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulationEngine for ReferenceEngine {
    fn name(&self) -> &str {
        DEFAULT_BACKEND
    }

    fn handle(&mut self, request: Request) -> Reply {
        match request {
            Request::SyncBodyInfo => self.sync_body_info(),
            Request::SyncUserData => self.sync_user_data(),
            Request::StepSimulation => self.step(),
            Request::ResetSimulation => self.reset(),
            Request::SetPhysicsParameters(p) => self.set_physics_parameters(p),
            Request::LoadModel(p) => self.load_model(p),
            Request::CreateCollisionShape(p) => self.create_collision_shape(p),
            Request::CreateVisualShape(p) => self.create_visual_shape(p),
            Request::AddUserData(p) => self.add_user_data(p),
            Request::ApplyExternalForce(p) => self.apply_external_force(p),
            Request::RequestCameraImage(p) => self.render(p),
            Request::ComputeInverseKinematics(p) => self.inverse_kinematics(p),
            Request::RequestContactPoints(p) => self.contact_points(p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn model_file(extension: &str, body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .prefix("arm")
            .suffix(&format!(".{}", extension))
            .tempfile()
            .unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    fn load(engine: &mut ReferenceEngine, path: &Path) -> BodyId {
        match engine.handle(LoadModel::new(path.to_string_lossy()).into()) {
            Reply::Completed(Completion::ModelLoaded { body, .. }) => body,
            other => panic!("load failed: {:?}", other),
        }
    }

    const TWO_JOINT_URDF: &str = r#"<robot name="arm">
  <link name="base"/><link name="upper"/><link name="lower"/>
  <joint name="shoulder" type="revolute"/>
  <joint name="elbow" type="revolute"/>
</robot>"#;

    #[test]
    fn test_load_model_counts_joints() {
        let file = model_file("urdf", TWO_JOINT_URDF);
        let mut engine = ReferenceEngine::new();
        let reply = engine.handle(LoadModel::new(file.path().to_string_lossy()).into());
        assert_eq!(
            reply,
            Reply::Completed(Completion::ModelLoaded {
                body: BodyId::new(0),
                num_joints: 2
            })
        );
        assert_eq!(engine.body_count(), 1);
    }

    #[test]
    fn test_load_model_failures() {
        let mut engine = ReferenceEngine::new();
        let reply = engine.handle(LoadModel::new("/definitely/not/here.urdf").into());
        assert!(matches!(reply, Reply::Failed { kind: CommandKind::LoadModel, .. }));

        let reply = engine.handle(LoadModel::new("scene.png").into());
        match reply {
            Reply::Failed { reason, .. } => assert!(reason.contains("unsupported model format")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(engine.body_count(), 0);
    }

    #[test]
    fn test_sync_reflects_world() {
        let file = model_file("urdf", TWO_JOINT_URDF);
        let mut engine = ReferenceEngine::new();
        let body = load(&mut engine, file.path());
        engine.handle(AddUserData::new(body, "color", "red").into());

        match engine.handle(Request::SyncBodyInfo) {
            Reply::Completed(Completion::BodyInfoSynced { bodies }) => {
                assert_eq!(bodies.len(), 1);
                assert_eq!(bodies[0].body, body);
                assert!(bodies[0].name.starts_with("arm"));
            }
            other => panic!("unexpected {:?}", other),
        }
        match engine.handle(Request::SyncUserData) {
            Reply::Completed(Completion::UserDataSynced { entries }) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].key, "color");
                assert_eq!(entries[0].value, "red");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_user_data_update_keeps_id() {
        let file = model_file("urdf", TWO_JOINT_URDF);
        let mut engine = ReferenceEngine::new();
        let body = load(&mut engine, file.path());

        let first = engine.handle(AddUserData::new(body, "k", "v1").into());
        let second = engine.handle(AddUserData::new(body, "k", "v2").into());
        assert_eq!(first, second);
        assert_eq!(engine.user_data.len(), 1);
        assert_eq!(engine.user_data.values().next().unwrap().value, "v2");

        let missing = engine.handle(AddUserData::new(BodyId::new(9), "k", "v").into());
        assert!(matches!(missing, Reply::Failed { .. }));
    }

    #[test]
    fn test_step_and_reset() {
        let mut engine = ReferenceEngine::new();
        engine.handle(Request::StepSimulation);
        engine.handle(Request::StepSimulation);
        assert_eq!(engine.step_count(), 2);

        let mut params = SetPhysicsParameters::default();
        params.set_gravity([0.0, 0.0, -9.8]);
        engine.handle(params.into());

        assert_eq!(
            engine.handle(Request::ResetSimulation),
            Reply::Completed(Completion::SimulationReset)
        );
        assert_eq!(engine.step_count(), 0);
        assert_eq!(engine.params.gravity, [0.0, 0.0, -9.8]);
    }

    #[test]
    fn test_physics_parameters_validation() {
        let mut engine = ReferenceEngine::new();
        let mut params = SetPhysicsParameters::default();
        params.set_time_step(-1.0);
        assert!(matches!(engine.handle(params.into()), Reply::Failed { .. }));

        let mut params = SetPhysicsParameters::default();
        params.set_time_step(0.01).set_num_solver_iterations(10);
        match engine.handle(params.into()) {
            Reply::Completed(Completion::PhysicsParametersSet(p)) => {
                assert_eq!(p.time_step, 0.01);
                assert_eq!(p.num_solver_iterations, 10);
                assert_eq!(p.gravity, [0.0; 3]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rejected_parameters_leave_engine_unchanged() {
        let mut engine = ReferenceEngine::new();
        let before = engine.params;

        let mut params = SetPhysicsParameters::default();
        params
            .set_time_step(0.5)
            .set_gravity([f64::NAN, 0.0, 0.0])
            .set_num_solver_iterations(99);
        assert!(matches!(engine.handle(params.into()), Reply::Failed { .. }));
        assert_eq!(engine.params, before);
    }

    #[test]
    fn test_shapes_get_distinct_ids() {
        let mut engine = ReferenceEngine::new();
        let a = engine.handle(CreateCollisionShape::new(Geometry::Sphere { radius: 1.0 }).into());
        let b = engine.handle(CreateVisualShape::new(Geometry::Box { half_extents: [1.0; 3] }).into());
        assert_eq!(
            a,
            Reply::Completed(Completion::CollisionShapeCreated { shape: ShapeId::new(0) })
        );
        assert_eq!(
            b,
            Reply::Completed(Completion::VisualShapeCreated { shape: ShapeId::new(1) })
        );

        let mut bad = CreateVisualShape::new(Geometry::Sphere { radius: 1.0 });
        bad.set_rgba_color([2.0, 0.0, 0.0, 1.0]);
        assert!(matches!(engine.handle(bad.into()), Reply::Failed { .. }));
    }

    #[test]
    fn test_camera_image_dimensions() {
        let mut engine = ReferenceEngine::new();
        match engine.handle(RequestCameraImage::new(8, 4).into()) {
            Reply::Completed(Completion::CameraImageRendered(image)) => {
                assert_eq!(image.pixel_count(), 32);
                assert_eq!(image.rgba.len(), 128);
                assert_eq!(image.depth.len(), 32);
                assert!(image.segmentation.iter().all(|s| *s == -1));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            engine.handle(RequestCameraImage::new(0, 4).into()),
            Reply::Failed { .. }
        ));
    }

    #[test]
    fn test_inverse_kinematics_and_forces() {
        let file = model_file("urdf", TWO_JOINT_URDF);
        let mut engine = ReferenceEngine::new();
        let body = load(&mut engine, file.path());

        let reply = engine.handle(ComputeInverseKinematics::new(body, 1, [0.3, 0.0, 0.5]).into());
        assert_eq!(
            reply,
            Reply::Completed(Completion::InverseKinematicsSolved {
                joint_positions: vec![0.0, 0.0]
            })
        );
        let out_of_range = engine.handle(ComputeInverseKinematics::new(body, 2, [0.0; 3]).into());
        assert!(matches!(out_of_range, Reply::Failed { .. }));

        let mut force = ApplyExternalForce::new(body, [1.0, 0.0, 0.0]);
        force.set_link(1);
        assert_eq!(
            engine.handle(force.into()),
            Reply::Completed(Completion::ExternalForceApplied)
        );
        assert_eq!(engine.bodies[&body].applied_force, [1.0, 0.0, 0.0]);

        engine.handle(Request::StepSimulation);
        assert_eq!(engine.bodies[&body].applied_force, [0.0; 3]);

        let mut bad_link = ApplyExternalForce::new(body, [1.0, 0.0, 0.0]);
        bad_link.set_link(5);
        assert!(matches!(engine.handle(bad_link.into()), Reply::Failed { .. }));
    }

    #[test]
    fn test_contact_points_filters() {
        let mut engine = ReferenceEngine::new();
        assert_eq!(
            engine.handle(RequestContactPoints::default().into()),
            Reply::Completed(Completion::ContactPointsReported { contacts: vec![] })
        );
        let mut filtered = RequestContactPoints::default();
        filtered.set_body_a(BodyId::new(3));
        assert!(matches!(engine.handle(filtered.into()), Reply::Failed { .. }));
    }

    #[test]
    fn test_from_options() {
        let opts = EngineOptions::parse(["--time-step=0.002", "--solver-iterations=7"]).unwrap();
        let engine = ReferenceEngine::from_options(&opts).unwrap();
        assert_eq!(engine.params.time_step, 0.002);
        assert_eq!(engine.params.num_solver_iterations, 7);
    }
}
