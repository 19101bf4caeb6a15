//! Transport integration tests - registry connections through a live
//! `SimulationServer` over TCP, RPC channel, UDP and shared memory.

use pretty_assertions::assert_eq;
use simlink::engine::{shared, ReferenceEngine};
use simlink::protocol::{
    AddUserData, CommandKind, LoadModel, RequestCameraImage, StatusKind, StepSimulation,
    SyncBodyInfo, SyncUserData,
};
use simlink::types::{ClientConfig, IpcConfig};
use simlink::{
    ClientId, ConnectOptions, ConnectionMethod, ConnectionRegistry, Error, SimulationServer,
};
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};

/// Helper: serve a fresh reference engine on random TCP and UDP ports.
async fn start_test_server() -> (Arc<SimulationServer>, SocketAddr, SocketAddr) {
    let server = Arc::new(SimulationServer::new(
        shared(ReferenceEngine::new()),
        IpcConfig::default(),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let tcp_addr = listener.local_addr().unwrap();
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let udp_addr = socket.local_addr().unwrap();

    tokio::spawn({
        let server = server.clone();
        async move {
            let _ = server.serve_tcp_on(listener).await;
        }
    });
    tokio::spawn({
        let server = server.clone();
        async move {
            let _ = server.serve_udp_on(socket).await;
        }
    });

    (server, tcp_addr, udp_addr)
}

fn registry() -> ConnectionRegistry {
    ConnectionRegistry::new(ClientConfig {
        default_timeout: Duration::from_secs(2),
        ..ClientConfig::default()
    })
}

fn network(addr: SocketAddr) -> ConnectOptions {
    ConnectOptions::network(addr.ip().to_string(), addr.port())
}

fn urdf_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".urdf")
        .tempfile()
        .unwrap();
    file.write_all(br#"<robot name="cart"><link name="chassis"/></robot>"#)
        .unwrap();
    file
}

async fn step(registry: &ConnectionRegistry, id: ClientId) -> simlink::Status {
    let command = registry.init_command(id, StepSimulation).await.unwrap();
    registry.submit(command).await.unwrap()
}

#[tokio::test]
async fn test_tcp_round_trip() {
    let (_server, tcp_addr, _) = start_test_server().await;
    let registry = registry();
    let id = registry
        .connect(ConnectionMethod::Tcp, network(tcp_addr))
        .await
        .unwrap();

    assert_eq!(step(&registry, id).await.step_count(), Some(1));
    assert_eq!(step(&registry, id).await.step_count(), Some(2));

    let model = urdf_file();
    let command = registry
        .init_command(id, LoadModel::new(model.path().to_string_lossy()))
        .await
        .unwrap();
    let body = registry.submit(command).await.unwrap().loaded_body().unwrap();

    let status = registry
        .submit(registry.init_command(id, SyncBodyInfo).await.unwrap())
        .await
        .unwrap();
    let bodies = status.synced_bodies().unwrap();
    assert_eq!(bodies[0].body, body);
    assert_eq!(
        bodies[0].name.as_str(),
        model.path().file_stem().unwrap().to_str().unwrap()
    );
}

#[tokio::test]
async fn test_rpc_channel_round_trip() {
    let (_server, tcp_addr, _) = start_test_server().await;
    let registry = registry();
    let id = registry
        .connect(ConnectionMethod::RpcChannel, network(tcp_addr))
        .await
        .unwrap();

    assert_eq!(step(&registry, id).await.step_count(), Some(1));

    let command = registry
        .init_command(id, LoadModel::new("/nonexistent/robot.urdf"))
        .await
        .unwrap();
    let status = registry.submit(command).await.unwrap();
    assert_eq!(status.kind(), StatusKind::Failed(CommandKind::LoadModel));
    assert!(registry.is_connected(id).await);

    let mut camera = registry
        .init_command(id, RequestCameraImage::new(4, 3))
        .await
        .unwrap();
    camera.set_light_direction([0.0, 0.0, 1.0]);
    let status = registry.submit(camera).await.unwrap();
    let image = status.camera_image().unwrap();
    assert_eq!((image.width, image.height), (4, 3));
    assert_eq!(image.pixel_count(), 12);
}

#[tokio::test]
async fn test_tcp_and_rpc_share_one_engine() {
    let (_server, tcp_addr, udp_addr) = start_test_server().await;
    let registry = registry();
    let tcp = registry
        .connect(ConnectionMethod::Tcp, network(tcp_addr))
        .await
        .unwrap();
    let rpc = registry
        .connect(ConnectionMethod::RpcChannel, network(tcp_addr))
        .await
        .unwrap();
    let udp = registry
        .connect(ConnectionMethod::Udp, network(udp_addr))
        .await
        .unwrap();
    assert_eq!(registry.live_ids(), vec![tcp, rpc, udp]);

    step(&registry, tcp).await;
    step(&registry, rpc).await;
    assert_eq!(step(&registry, udp).await.step_count(), Some(3));
}

#[tokio::test]
async fn test_udp_round_trip() {
    let (_server, _, udp_addr) = start_test_server().await;
    let registry = registry();
    let id = registry
        .connect(ConnectionMethod::Udp, network(udp_addr))
        .await
        .unwrap();
    assert_eq!(
        registry.connection_info(id).await.method,
        Some(ConnectionMethod::Udp)
    );
    assert_eq!(step(&registry, id).await.step_count(), Some(1));

    // Oversized replies fail the command, not the connection.
    let command = registry
        .init_command(id, RequestCameraImage::new(256, 256))
        .await
        .unwrap();
    let status = registry.submit(command).await.unwrap();
    assert_eq!(status.kind(), StatusKind::Failed(CommandKind::RequestCameraImage));
    assert!(registry.is_connected(id).await);
}

#[tokio::test]
async fn test_unreachable_tcp_fails_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let registry = registry();
    let err = registry
        .connect(ConnectionMethod::Tcp, network(addr))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::TransportOpen {
            method: ConnectionMethod::Tcp,
            ..
        }
    ));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_udp_without_server_fails_handshake() {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    drop(socket);

    let registry = ConnectionRegistry::new(ClientConfig {
        default_timeout: Duration::from_millis(300),
        ..ClientConfig::default()
    });
    let err = registry
        .connect(ConnectionMethod::Udp, network(addr))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::HandshakeFailed {
            method: ConnectionMethod::Udp,
            ..
        }
    ));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_server_shutdown_evicts_slot() {
    let (server, tcp_addr, _) = start_test_server().await;
    let registry = registry();
    let id = registry
        .connect(ConnectionMethod::Tcp, network(tcp_addr))
        .await
        .unwrap();
    assert!(step(&registry, id).await.is_completed());

    server.shutdown();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let status = step(&registry, id).await;
    assert_eq!(status.kind(), StatusKind::Disconnected);
    assert!(!registry.is_connected(id).await);
    assert!(registry.live_ids().is_empty());
    assert!(matches!(
        registry.init_command(id, StepSimulation).await,
        Err(Error::NotConnected(_))
    ));
}

#[tokio::test]
async fn test_short_timeout_reports_break() {
    // A listener that accepts but never answers.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let registry = ConnectionRegistry::new(ClientConfig {
        default_timeout: Duration::from_millis(200),
        ..ClientConfig::default()
    });
    let err = registry
        .connect(ConnectionMethod::Tcp, network(addr))
        .await
        .unwrap_err();
    match err {
        Error::HandshakeFailed { reason, .. } => assert!(reason.contains("connection lost")),
        other => panic!("expected HandshakeFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_client_frame_limit_comes_from_config() {
    let (_server, tcp_addr, _) = start_test_server().await;
    let registry = ConnectionRegistry::new(ClientConfig {
        default_timeout: Duration::from_secs(2),
        max_frame_bytes: 16,
        ..ClientConfig::default()
    });

    for method in [ConnectionMethod::Tcp, ConnectionMethod::RpcChannel] {
        let err = registry.connect(method, network(tcp_addr)).await.unwrap_err();
        assert!(
            matches!(err, Error::HandshakeFailed { method: m, .. } if m == method),
            "{method}: {err:?}"
        );
    }
    assert!(registry.is_empty());
}

// =============================================================================
// Shared memory
// =============================================================================

#[tokio::test]
async fn test_shared_memory_handshake_round_trip_law() {
    let registry = registry();
    let server = registry
        .connect(
            ConnectionMethod::SharedMemoryServer,
            ConnectOptions::shared_memory(53_001),
        )
        .await
        .unwrap();

    let model = urdf_file();
    let command = registry
        .init_command(server, LoadModel::new(model.path().to_string_lossy()))
        .await
        .unwrap();
    let body = registry.submit(command).await.unwrap().loaded_body().unwrap();
    for (key, value) in [("color", "red"), ("owner", "lab-3")] {
        let command = registry
            .init_command(server, AddUserData::new(body, key, value))
            .await
            .unwrap();
        assert!(registry.submit(command).await.unwrap().user_data_id().is_some());
    }

    let client = registry
        .connect(
            ConnectionMethod::SharedMemory,
            ConnectOptions::shared_memory(53_001),
        )
        .await
        .unwrap();
    let cached = registry.synced_user_data(client).await.unwrap();
    assert_eq!(cached.len(), 2);

    let status = registry
        .submit(registry.init_command(client, SyncUserData).await.unwrap())
        .await
        .unwrap();
    assert_eq!(status.synced_user_data().unwrap(), cached.as_slice());
    assert_eq!(
        registry.synced_bodies(client).await.unwrap()[0].body,
        body
    );
}

#[tokio::test]
async fn test_shared_memory_magic_mismatch_fails_connect() {
    let registry = registry();
    registry
        .connect(
            ConnectionMethod::SharedMemoryServer,
            ConnectOptions::shared_memory(53_002),
        )
        .await
        .unwrap();

    let err = registry
        .connect(
            ConnectionMethod::SharedMemory,
            ConnectOptions::shared_memory(53_002).with_magic(0x0bad_cafe),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TransportOpen { .. }));
    assert!(err.to_string().contains("magic"));

    let err = registry
        .connect(
            ConnectionMethod::SharedMemory,
            ConnectOptions::shared_memory(53_999),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TransportOpen { .. }));
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_server_published_segment() {
    let server = SimulationServer::new(shared(ReferenceEngine::new()), IpcConfig::default());
    let segment = server.publish_shared_memory(53_003, 1 << 20).unwrap();

    let registry = registry();
    let id = registry
        .connect(
            ConnectionMethod::SharedMemoryGui,
            ConnectOptions::shared_memory(53_003),
        )
        .await
        .unwrap();
    assert_eq!(step(&registry, id).await.step_count(), Some(1));
    // Two handshake commands plus one step.
    assert_eq!(segment.counters(), (3, 3));

    drop(segment);
    assert!(!registry.is_connected(id).await);
}
