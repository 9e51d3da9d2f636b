//! 应用状态

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::EnvConfig;
use crate::infra::{
    FsProfileSource, HttpPublicAddressResolver, OpenVpnPlatform, PingProbe, ProfileSource,
    SysfsInterfaceStats,
};
use crate::services::credentials::{CredentialStore, FileCredentialStore};
use crate::services::session::SessionController;
use crate::services::telemetry::{LatencyPoller, ThroughputPoller};

use super::session_store::SessionStore;

/// 全局 shutdown token，用于优雅关闭所有后台任务
static GLOBAL_SHUTDOWN: std::sync::OnceLock<CancellationToken> = std::sync::OnceLock::new();

/// 获取全局 shutdown token
pub fn get_shutdown_token() -> CancellationToken {
    GLOBAL_SHUTDOWN
        .get_or_init(CancellationToken::new)
        .clone()
}

/// 触发全局 shutdown
pub fn trigger_shutdown() {
    if let Some(token) = GLOBAL_SHUTDOWN.get() {
        token.cancel();
    }
}

/// 应用状态
pub struct AppState {
    /// 环境配置
    pub config: EnvConfig,
    /// 会话状态存储（唯一的共享可变状态）
    pub store: Arc<SessionStore>,
    /// 会话控制器
    pub controller: SessionController,
    /// 已保存的连接档案
    pub credentials: Arc<dyn CredentialStore>,
    /// 连接配置来源
    pub profiles: Arc<dyn ProfileSource>,
    /// 启动时间
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// 使用真实的进程/文件系统实现创建状态
    pub fn new(config: EnvConfig) -> Self {
        let store = Arc::new(SessionStore::new());
        let profiles: Arc<dyn ProfileSource> = Arc::new(FsProfileSource);

        let controller = SessionController::new(
            store.clone(),
            Arc::new(OpenVpnPlatform::new(config.openvpn.clone())),
            profiles.clone(),
            Arc::new(HttpPublicAddressResolver::new(
                config.telemetry.public_ip_url.clone(),
            )),
            config.openvpn.process_name.clone(),
        );
        let credentials = Arc::new(FileCredentialStore::new(config.credentials_file.clone()));

        Self::from_parts(config, store, controller, credentials, profiles)
    }

    /// 由已构造的组件组装（测试中替换外部依赖）
    pub fn from_parts(
        config: EnvConfig,
        store: Arc<SessionStore>,
        controller: SessionController,
        credentials: Arc<dyn CredentialStore>,
        profiles: Arc<dyn ProfileSource>,
    ) -> Self {
        Self {
            config,
            store,
            controller,
            credentials,
            profiles,
            started_at: Utc::now(),
        }
    }

    /// 启动吞吐量与延迟两个后台采样任务
    pub fn spawn_pollers(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let telemetry = &self.config.telemetry;

        let throughput = ThroughputPoller::new(
            self.store.clone(),
            Arc::new(SysfsInterfaceStats::new()),
            telemetry.tunnel_interfaces.clone(),
            telemetry.throughput_interval,
        );
        let latency = LatencyPoller::new(
            self.store.clone(),
            self.profiles.clone(),
            Arc::new(PingProbe),
            telemetry.ping_fallback.clone(),
            telemetry.latency_interval,
            telemetry.probe_timeout,
        );

        vec![
            tokio::spawn(throughput.run(shutdown.clone())),
            tokio::spawn(latency.run(shutdown)),
        ]
    }

    /// 运行时长（秒）
    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds().max(0)
    }
}
