//! VPN Connect Agent - 本地 OpenVPN 会话代理
//!
//! 启动并监管外部 OpenVPN 客户端进程，通过本地 HTTP API 暴露会话状态与实时遥测

pub mod error;
pub mod infra;
pub mod domain;
pub mod config;
pub mod state;
pub mod api;
pub mod services;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::env::constants::VERSION;
use crate::config::EnvConfig;
use crate::state::app_state::{get_shutdown_token, trigger_shutdown};
use crate::state::AppState;

/// 命令行覆盖项
#[derive(Clone, Debug, Default)]
pub struct RuntimeConfig {
    /// 覆盖 VPN_CONNECT_PORT
    pub port_override: Option<u16>,
}

/// 初始化并运行代理，直到收到 Ctrl-C
pub async fn init_and_run_agent_with_config(runtime: RuntimeConfig) {
    if let Err(e) = run(runtime).await {
        error!(error = %e, "Agent exited with error");
    }
}

async fn run(runtime: RuntimeConfig) -> anyhow::Result<()> {
    let mut config = EnvConfig::from_env();
    if let Some(port) = runtime.port_override {
        config.port = port;
    }

    info!(
        version = VERSION,
        port = config.port,
        openvpn = %config.openvpn.binary,
        sudo = config.openvpn.use_sudo,
        credentials = %config.credentials_file.display(),
        "Starting VPN Connect Agent"
    );
    match &config.static_dir {
        Some(dir) if dir.is_dir() => info!(dir = %dir.display(), "Serving frontend"),
        Some(dir) => warn!(dir = %dir.display(), "Static directory does not exist"),
        None => warn!("VPN_CONNECT_STATIC not set, frontend will not be served"),
    }

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let state = Arc::new(AppState::new(config));
    let shutdown = get_shutdown_token();
    let pollers = state.spawn_pollers(shutdown.clone());

    let app = api::router(state.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(url = %format!("http://{}", addr), "VPN Connect backend listening");

    tokio::spawn(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, shutting down"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
        }
        trigger_shutdown();
    });

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await?;

    // 不留下孤儿 VPN 进程
    state.controller.disconnect().await;

    for poller in pollers {
        if tokio::time::timeout(Duration::from_secs(2), poller).await.is_err() {
            warn!("Telemetry poller did not stop in time");
        }
    }

    info!("VPN Connect Agent stopped");
    Ok(())
}
