//! 会话 API
//!
//! 包含 /api/status, /api/connect, /api/disconnect, /api/logs, /api/upload-config 端点

use axum::{
    extract::{Multipart, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::env::constants::STATUS_LOG_TAIL;
use crate::domain::profile::{display_name, SavedProfile};
use crate::domain::session::{Lifecycle, LogEntry, SessionSnapshot};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// 状态响应
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub connected: bool,
    pub connecting: bool,
    pub status: &'static str,
    pub duration_seconds: i64,
    /// 隧道地址，未知时为占位符
    pub ip: String,
    pub public_ip: Option<String>,
    pub pid: Option<u32>,
    pub down_mbps: f64,
    pub up_mbps: f64,
    pub ping_ms: Option<u64>,
    pub config_file: String,
    pub config_name: String,
    pub encryption: String,
    pub saved_profiles: Vec<SavedProfile>,
    pub logs: Vec<LogEntry>,
}

impl StatusResponse {
    /// 由同一时刻的快照与日志构建
    pub fn build(
        snapshot: &SessionSnapshot,
        logs: Vec<LogEntry>,
        saved_profiles: Vec<SavedProfile>,
        encryption: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            connected: snapshot.lifecycle == Lifecycle::Connected,
            connecting: snapshot.lifecycle == Lifecycle::Connecting,
            status: snapshot.lifecycle.as_str(),
            duration_seconds: snapshot.duration_seconds(now),
            ip: snapshot.tunnel_address_display(),
            public_ip: snapshot.public_address.clone(),
            pid: snapshot.pid,
            down_mbps: snapshot.down_rate_mbps,
            up_mbps: snapshot.up_rate_mbps,
            ping_ms: snapshot.ping_ms,
            config_file: snapshot.config_path.clone(),
            config_name: display_name(&snapshot.config_path),
            encryption: encryption.to_string(),
            saved_profiles,
            logs,
        }
    }
}

/// 连接请求
#[derive(Debug, Default, Deserialize)]
pub struct ConnectRequest {
    #[serde(default)]
    pub config_path: String,
    #[serde(default)]
    pub password: String,
}

/// 通用成功响应
#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    fn ok() -> Json<Self> {
        Json(Self { ok: true })
    }
}

/// 日志响应
#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<LogEntry>,
}

/// 上传响应
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub ok: bool,
    pub path: String,
    pub name: String,
}

/// 创建会话路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/connect", post(connect))
        .route("/api/disconnect", post(disconnect))
        .route("/api/logs", get(get_logs))
        .route("/api/upload-config", post(upload_config))
}

/// 获取会话状态与最近日志
///
/// GET /api/status
async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let (snapshot, logs) = state.store.status(STATUS_LOG_TAIL);
    let saved_profiles = state.credentials.list_profiles().await;

    Json(StatusResponse::build(
        &snapshot,
        logs,
        saved_profiles,
        &state.config.encryption,
        Utc::now(),
    ))
}

/// 建立连接
///
/// POST /api/connect
/// 校验通过后先保存凭据，保存失败不影响连接
async fn connect(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConnectRequest>,
) -> ApiResult<Json<OkResponse>> {
    let config_path = req.config_path.trim();
    state.controller.validate(config_path, &req.password).await?;

    if let Err(e) = state.credentials.upsert(config_path, &req.password).await {
        warn!(config = %config_path, error = %e, "Failed to save connection profile");
    }

    state.controller.connect(config_path, &req.password).await?;
    Ok(OkResponse::ok())
}

/// 断开连接（幂等）
///
/// POST /api/disconnect
async fn disconnect(State(state): State<Arc<AppState>>) -> Json<OkResponse> {
    state.controller.disconnect().await;
    OkResponse::ok()
}

/// 获取完整日志
///
/// GET /api/logs
async fn get_logs(State(state): State<Arc<AppState>>) -> Json<LogsResponse> {
    Json(LogsResponse {
        logs: state.store.logs(),
    })
}

/// 上传 .ovpn 配置文件
///
/// POST /api/upload-config (multipart, 字段名 `file`)
async fn upload_config(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        if file_name.is_empty() {
            return Err(ApiError::bad_request("No file selected."));
        }
        let name = sanitize_upload_name(&file_name)
            .ok_or_else(|| ApiError::bad_request("Only .ovpn files are allowed."))?;

        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(e.to_string()))?;

        let dir = &state.config.upload_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?;
        let dest = dir.join(&name);
        tokio::fs::write(&dest, &data)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?;

        let path = tokio::fs::canonicalize(&dest).await.unwrap_or(dest);
        info!(path = %path.display(), bytes = data.len(), "Stored uploaded config");

        return Ok(Json(UploadResponse {
            ok: true,
            path: path.to_string_lossy().to_string(),
            name,
        }));
    }

    Err(ApiError::bad_request("No file selected."))
}

/// 上传文件名：只保留文件名部分，且必须是 .ovpn
pub fn sanitize_upload_name(file_name: &str) -> Option<String> {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .replace("..", "_");
    let base = base.trim();

    if base.len() <= ".ovpn".len() || !base.to_ascii_lowercase().ends_with(".ovpn") {
        return None;
    }
    Some(base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::SessionState;
    use chrono::Duration;

    #[test]
    fn test_status_when_disconnected() {
        let state = SessionState::default();
        let resp = StatusResponse::build(&state.snapshot(), Vec::new(), Vec::new(), "AES-256-GCM", Utc::now());

        assert!(!resp.connected);
        assert!(!resp.connecting);
        assert_eq!(resp.status, "disconnected");
        assert_eq!(resp.ip, "---.---.---.---");
        assert_eq!(resp.duration_seconds, 0);
        assert_eq!(resp.config_file, "");
        assert_eq!(resp.config_name, "");
        assert!(resp.pid.is_none());
    }

    #[test]
    fn test_status_when_connected() {
        let mut state = SessionState::default();
        state.begin_connecting("/etc/vpn/office.ovpn", Some(77));
        state.observe_tunnel_address("10.8.0.6".parse().unwrap());
        let started = Utc::now() - Duration::seconds(90);
        state.mark_connected(started);
        state.public_address = Some("203.0.113.9".to_string());

        let profiles = vec![SavedProfile::new("/etc/vpn/office.ovpn", "pw").with_display_name()];
        let resp = StatusResponse::build(&state.snapshot(), Vec::new(), profiles, "AES-256-GCM", Utc::now());

        assert!(resp.connected);
        assert_eq!(resp.status, "connected");
        assert_eq!(resp.ip, "10.8.0.6");
        assert_eq!(resp.public_ip.as_deref(), Some("203.0.113.9"));
        assert_eq!(resp.pid, Some(77));
        assert!(resp.duration_seconds >= 90);
        assert_eq!(resp.config_name, "office.ovpn");

        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["saved_profiles"][0]["name"], "office.ovpn");
        assert_eq!(json["encryption"], "AES-256-GCM");
    }

    #[test]
    fn test_connect_request_defaults() {
        let req: ConnectRequest = serde_json::from_str("{}").unwrap();
        assert!(req.config_path.is_empty());
        assert!(req.password.is_empty());
    }

    #[test]
    fn test_sanitize_upload_name() {
        assert_eq!(sanitize_upload_name("office.ovpn"), Some("office.ovpn".to_string()));
        assert_eq!(sanitize_upload_name("C:\\Users\\me\\Home.OVPN"), Some("Home.OVPN".to_string()));
        assert_eq!(sanitize_upload_name("../../etc/x.ovpn"), Some("x.ovpn".to_string()));
        assert_eq!(sanitize_upload_name("a..b.ovpn"), Some("a_b.ovpn".to_string()));
        assert_eq!(sanitize_upload_name("notes.txt"), None);
        assert_eq!(sanitize_upload_name(".ovpn"), None);
    }
}
