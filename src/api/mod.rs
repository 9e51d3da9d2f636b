//! API 模块
//!
//! HTTP handlers 和路由组装

pub mod health;
pub mod session;

use axum::{http::StatusCode, response::Html, Router};
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};

use crate::state::AppState;

/// 前端未构建时的提示页
const FRONTEND_MISSING: &str =
    "<h1>VPN Connect</h1><p>Frontend not built. Set VPN_CONNECT_STATIC to the built frontend directory.</p>";

/// 构建完整的 API 路由
///
/// 其余路径由前端静态资源处理，未命中时回退到 index.html
pub fn router(state: Arc<AppState>) -> Router {
    let router = Router::new()
        // Health
        .merge(health::router())
        // Session
        .merge(session::router());

    let router = match state.config.static_dir.as_ref().filter(|dir| dir.is_dir()) {
        Some(dir) => router.fallback_service(
            ServeDir::new(dir).fallback(ServeFile::new(dir.join("index.html"))),
        ),
        None => router.fallback(|| async { (StatusCode::NOT_FOUND, Html(FRONTEND_MISSING)) }),
    };

    router
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
