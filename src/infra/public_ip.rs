//! 公网出口地址查询

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::config::env::constants::PUBLIC_IP_TIMEOUT_SECS;

/// 公网地址解析器
#[async_trait]
pub trait PublicAddressResolver: Send + Sync {
    /// 查询当前出口 IPv4 地址，失败返回 None
    async fn resolve(&self) -> Option<String>;
}

/// 通过 HTTP 纯文本接口（如 api.ipify.org）查询
pub struct HttpPublicAddressResolver {
    http: reqwest::Client,
    url: String,
}

impl HttpPublicAddressResolver {
    pub fn new(url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(PUBLIC_IP_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to build HTTP client, using defaults");
                reqwest::Client::new()
            });

        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl PublicAddressResolver for HttpPublicAddressResolver {
    async fn resolve(&self) -> Option<String> {
        let resp = match self.http.get(&self.url).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::debug!(status = %r.status(), url = %self.url, "Public IP lookup rejected");
                return None;
            }
            Err(e) => {
                tracing::debug!(error = %e, url = %self.url, "Public IP lookup failed");
                return None;
            }
        };

        let body = resp.text().await.ok()?;
        parse_ipv4_body(&body)
    }
}

/// 响应体必须是单个 IPv4 地址
pub fn parse_ipv4_body(body: &str) -> Option<String> {
    body.trim()
        .parse::<Ipv4Addr>()
        .ok()
        .map(|addr| addr.to_string())
}
