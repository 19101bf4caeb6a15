//! Registry integration tests - connect → handshake → submit → status over
//! in-process engines.

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use simlink::engine::{BackendCatalog, SimulationEngine};
use simlink::protocol::{
    AddUserData, CommandKind, Completion, LoadModel, Reply, Request, ResetSimulation,
    SetPhysicsParameters, StatusKind, StepSimulation, SyncBodyInfo, SyncUserData,
};
use simlink::types::{BodyId, ClientConfig, DEFAULT_MAX_CONNECTIONS};
use simlink::{ClientId, ConnectOptions, ConnectionMethod, ConnectionRegistry, Error};
use std::io::Write;
use std::sync::Arc;

const ARM_URDF: &str = r#"<robot name="arm">
  <link name="base"/><link name="forearm"/>
  <joint name="elbow" type="revolute"/>
</robot>"#;

fn small_registry(max_connections: usize) -> ConnectionRegistry {
    ConnectionRegistry::new(ClientConfig {
        max_connections,
        ..ClientConfig::default()
    })
}

async fn connect_direct(registry: &ConnectionRegistry) -> simlink::Result<ClientId> {
    registry
        .connect(ConnectionMethod::InProcessDirect, ConnectOptions::default())
        .await
}

fn urdf_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".urdf")
        .tempfile()
        .unwrap();
    file.write_all(ARM_URDF.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_step_then_disconnect_scenario() {
    let registry = ConnectionRegistry::default();
    let id = connect_direct(&registry).await.unwrap();
    assert_eq!(id, ClientId::new(0));

    let command = registry.init_command(id, StepSimulation).await.unwrap();
    let status = registry.submit(command).await.unwrap();
    assert_eq!(status.kind(), StatusKind::Completed(CommandKind::StepSimulation));
    assert_eq!(status.step_count(), Some(1));

    registry.disconnect(id).await;
    let command = simlink::Command::new(id, StepSimulation);
    assert!(matches!(
        registry.submit(command).await,
        Err(Error::NotConnected(missing)) if missing == id
    ));
}

#[tokio::test]
async fn test_fill_to_capacity() {
    let registry = ConnectionRegistry::default();
    for expected in 0..DEFAULT_MAX_CONNECTIONS {
        let id = connect_direct(&registry).await.unwrap();
        assert_eq!(id.get() as usize, expected);
    }
    assert_eq!(registry.len(), DEFAULT_MAX_CONNECTIONS);

    let err = connect_direct(&registry).await.unwrap_err();
    assert!(matches!(
        err,
        Error::CapacityExceeded {
            capacity: DEFAULT_MAX_CONNECTIONS
        }
    ));

    registry.disconnect(ClientId::new(17)).await;
    assert_eq!(connect_direct(&registry).await.unwrap(), ClientId::new(17));
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let registry = small_registry(4);
    let first = connect_direct(&registry).await.unwrap();
    let second = connect_direct(&registry).await.unwrap();

    registry.disconnect(first).await;
    let after_once = (registry.live_ids(), registry.len());
    registry.disconnect(first).await;
    assert_eq!((registry.live_ids(), registry.len()), after_once);
    assert_eq!(registry.live_ids(), vec![second]);

    // Never-issued ids are ignored too.
    registry.disconnect(ClientId::new(99)).await;
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_every_operation_fails_after_disconnect() {
    let registry = small_registry(4);
    let id = connect_direct(&registry).await.unwrap();
    let info = registry.connection_info(id).await;
    assert!(info.connected);
    assert_eq!(info.method, Some(ConnectionMethod::InProcessDirect));
    assert!(info.connected_at.is_some());

    registry.disconnect(id).await;

    assert!(!registry.is_connected(id).await);
    let info = registry.connection_info(id).await;
    assert!(!info.connected);
    assert_eq!(info.method, None);
    assert!(matches!(
        registry.init_command(id, StepSimulation).await,
        Err(Error::NotConnected(_))
    ));
    assert!(matches!(
        registry.set_timeout(id, std::time::Duration::from_secs(1)).await,
        Err(Error::NotConnected(_))
    ));
    assert!(matches!(
        registry.synced_bodies(id).await,
        Err(Error::NotConnected(_))
    ));
    assert!(matches!(
        registry.synced_user_data(id).await,
        Err(Error::NotConnected(_))
    ));
}

#[tokio::test]
async fn test_commands_on_one_connection_complete_in_order() {
    let registry = Arc::new(small_registry(4));
    let id = connect_direct(&registry).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            let command = registry.init_command(id, StepSimulation).await.unwrap();
            registry.submit(command).await.unwrap().step_count().unwrap()
        }));
    }
    let mut counts = Vec::new();
    for task in tasks {
        counts.push(task.await.unwrap());
    }
    counts.sort_unstable();
    assert_eq!(counts, (1..=16).collect::<Vec<u64>>());

    for expected in 17..=20 {
        let command = registry.init_command(id, StepSimulation).await.unwrap();
        let status = registry.submit(command).await.unwrap();
        assert_eq!(status.step_count(), Some(expected));
    }
}

#[tokio::test]
async fn test_parameterized_command_lifecycle() {
    let registry = small_registry(4);
    let id = connect_direct(&registry).await.unwrap();
    let model = urdf_file();

    let mut command = registry
        .init_command(id, LoadModel::new(model.path().to_string_lossy()))
        .await
        .unwrap();
    command
        .set_base_position([0.0, 0.0, 0.5])
        .set_use_fixed_base(true);
    assert_eq!(command.kind(), CommandKind::LoadModel);
    let status = registry.submit(command).await.unwrap();
    let body = status.loaded_body().unwrap();
    assert_eq!(status.step_count(), None);

    let mut params = SetPhysicsParameters::default();
    params.set_gravity([0.0, 0.0, -3.7]).set_time_step(0.01);
    let status = registry
        .submit(registry.init_command(id, params).await.unwrap())
        .await
        .unwrap();
    assert_eq!(status.physics_parameters().unwrap().gravity, [0.0, 0.0, -3.7]);

    let status = registry
        .submit(registry.init_command(id, SyncBodyInfo).await.unwrap())
        .await
        .unwrap();
    let bodies = status.synced_bodies().unwrap();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0].body, body);
    assert_eq!(bodies[0].num_joints, 1);

    let status = registry
        .submit(registry.init_command(id, ResetSimulation).await.unwrap())
        .await
        .unwrap();
    assert!(status.reset_completed());
}

#[tokio::test]
async fn test_engine_rejection_is_a_failed_status() {
    let registry = small_registry(4);
    let id = connect_direct(&registry).await.unwrap();

    let command = registry
        .init_command(id, LoadModel::new("/nonexistent/robot.urdf"))
        .await
        .unwrap();
    let status = registry.submit(command).await.unwrap();
    assert_eq!(status.kind(), StatusKind::Failed(CommandKind::LoadModel));
    assert!(status.failure_reason().unwrap().contains("cannot read"));
    assert!(matches!(
        status.into_completion(CommandKind::LoadModel),
        Err(Error::CommandFailed {
            kind: CommandKind::LoadModel,
            ..
        })
    ));

    // The connection stays usable after a business failure.
    assert!(registry.is_connected(id).await);
}

#[tokio::test]
async fn test_handshake_cache_matches_later_sync() {
    let registry = small_registry(4);
    let id = connect_direct(&registry).await.unwrap();
    assert!(registry.synced_bodies(id).await.unwrap().is_empty());
    assert!(registry.synced_user_data(id).await.unwrap().is_empty());

    let status = registry
        .submit(registry.init_command(id, SyncUserData).await.unwrap())
        .await
        .unwrap();
    assert_eq!(
        status.synced_user_data().unwrap(),
        registry.synced_user_data(id).await.unwrap().as_slice()
    );
}

#[tokio::test]
async fn test_user_data_requires_known_body() {
    let registry = small_registry(4);
    let id = connect_direct(&registry).await.unwrap();
    let command = registry
        .init_command(id, AddUserData::new(BodyId::new(5), "color", "red"))
        .await
        .unwrap();
    let status = registry.submit(command).await.unwrap();
    assert_eq!(status.kind(), StatusKind::Failed(CommandKind::AddUserData));
    assert_eq!(status.user_data_id(), None);
}

// =============================================================================
// Handshake failures
// =============================================================================

/// Engine that answers the body sync but rejects the user data sync.
#[derive(Debug)]
struct NoUserData;

impl SimulationEngine for NoUserData {
    fn name(&self) -> &str {
        "no-user-data"
    }

    fn handle(&mut self, request: Request) -> Reply {
        match request {
            Request::SyncBodyInfo => Completion::BodyInfoSynced { bodies: Vec::new() }.into(),
            other => Reply::failed(other.kind(), "user data unavailable"),
        }
    }
}

#[tokio::test]
async fn test_handshake_failure_tears_down() {
    let mut catalog = BackendCatalog::default();
    catalog.register("no-user-data", |_| {
        Ok(Box::new(NoUserData) as Box<dyn SimulationEngine>)
    });
    let registry = ConnectionRegistry::with_catalog(ClientConfig::default(), catalog);

    let err = registry
        .connect(
            ConnectionMethod::AlternateBackend,
            ConnectOptions::tokenized("--backend=no-user-data"),
        )
        .await
        .unwrap_err();
    match err {
        Error::HandshakeFailed { method, reason } => {
            assert_eq!(method, ConnectionMethod::AlternateBackend);
            assert!(reason.contains("user data unavailable"));
        }
        other => panic!("expected HandshakeFailed, got {other:?}"),
    }
    assert!(registry.is_empty());

    // The failed id is handed out again.
    let id = registry
        .connect(
            ConnectionMethod::AlternateBackend,
            ConnectOptions::tokenized("--backend=reference --time-step=0.002"),
        )
        .await
        .unwrap();
    assert_eq!(id, ClientId::new(0));
}

#[tokio::test]
async fn test_alternate_backend_needs_a_backend_token() {
    let registry = small_registry(4);
    let err = registry
        .connect(ConnectionMethod::AlternateBackend, ConnectOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOptions(_)));

    let err = registry
        .connect(
            ConnectionMethod::InProcessDirect,
            ConnectOptions::tokenized("--time-step=fast"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOptions(_)));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_disconnect_all() {
    let registry = small_registry(8);
    for _ in 0..5 {
        connect_direct(&registry).await.unwrap();
    }
    registry.disconnect_all().await;
    assert!(registry.is_empty());
    assert_eq!(connect_direct(&registry).await.unwrap(), ClientId::new(0));
}

// =============================================================================
// Properties
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    Connect,
    Disconnect(u32),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Connect),
        2 => (0u32..8).prop_map(Op::Disconnect),
    ]
}

proptest! {
    /// Property: live ids never exceed capacity and are always the lowest free.
    #[test]
    fn prop_capacity_never_exceeded(
        capacity in 1usize..6,
        ops in proptest::collection::vec(op_strategy(), 1..40),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let registry = small_registry(capacity);
            let mut live: std::collections::BTreeSet<u32> = Default::default();
            for op in ops {
                match op {
                    Op::Connect => match connect_direct(&registry).await {
                        Ok(id) => {
                            let lowest_free = (0u32..).find(|n| !live.contains(n)).unwrap();
                            prop_assert_eq!(id.get(), lowest_free);
                            live.insert(id.get());
                        }
                        Err(Error::CapacityExceeded { .. }) => {
                            prop_assert_eq!(live.len(), capacity);
                        }
                        Err(other) => prop_assert!(false, "unexpected error: {}", other),
                    },
                    Op::Disconnect(raw) => {
                        registry.disconnect(ClientId::new(raw)).await;
                        live.remove(&raw);
                    }
                }
                prop_assert!(registry.len() <= capacity);
                prop_assert_eq!(
                    registry.live_ids().into_iter().map(|id| id.get()).collect::<Vec<_>>(),
                    live.iter().copied().collect::<Vec<_>>()
                );
            }
            Ok(())
        })?;
    }
}
