//! simlink simulation server - main entry point.
//!
//! Hosts a reference engine behind TCP (plain frames and RPC envelopes) and
//! UDP until interrupted.

use simlink::engine::{shared, ReferenceEngine};
use simlink::{Config, SimulationServer};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env();

    // Initialize observability
    simlink::observability::init_tracing(&config.observability);

    let tcp_addr: SocketAddr = config.server.tcp_addr.parse()?;
    let udp_addr: SocketAddr = config.server.udp_addr.parse()?;

    let engine = shared(ReferenceEngine::new());
    let server = Arc::new(SimulationServer::new(engine, config.ipc.clone()));

    tracing::info!("simlink server starting (tcp={}, udp={})", tcp_addr, udp_addr);

    let tcp = tokio::spawn({
        let server = server.clone();
        async move { server.serve_tcp(tcp_addr).await }
    });
    let udp = tokio::spawn({
        let server = server.clone();
        async move { server.serve_udp(udp_addr).await }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received, shutting down");
    server.shutdown();

    tcp.await??;
    udp.await??;
    Ok(())
}
