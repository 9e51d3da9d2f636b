//! 会话领域模型
//!
//! 生命周期状态机、日志条目和有界日志缓冲区

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::net::Ipv4Addr;

use crate::config::env::constants::{LOG_CAPACITY, TUNNEL_ADDRESS_SENTINEL};

/// 会话生命周期
#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl Lifecycle {
    /// 转换为字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Disconnected => "disconnected",
            Lifecycle::Connecting => "connecting",
            Lifecycle::Connected => "connected",
        }
    }

    /// 是否存在活跃会话（Connecting 或 Connected）
    pub fn is_active(&self) -> bool {
        !matches!(self, Lifecycle::Disconnected)
    }
}

/// 日志级别
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Success,
    Error,
    Tun,
    Tcp,
    Tls,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Success => "SUCCESS",
            Severity::Error => "ERROR",
            Severity::Tun => "TUN",
            Severity::Tcp => "TCP",
            Severity::Tls => "TLS",
        }
    }
}

/// 日志条目（创建后不可变）
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct LogEntry {
    /// 本地时间 HH:MM:SS
    pub timestamp: String,
    #[serde(rename = "level")]
    pub severity: Severity,
    pub message: String,
}

impl LogEntry {
    /// 使用当前本地时间创建日志条目
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now().format("%H:%M:%S").to_string(),
            severity,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(Severity::Success, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }
}

/// 有界日志环形缓冲区
///
/// 超出容量时从头部淘汰最旧条目，保持时间顺序
#[derive(Clone, Debug)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl LogBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// 追加日志条目
    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// 获取最近 `n` 条
    pub fn tail(&self, n: usize) -> Vec<LogEntry> {
        let start = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(start).cloned().collect()
    }

    pub fn to_vec(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::with_capacity(LOG_CAPACITY)
    }
}

/// 会话状态（单例，由 `SessionStore` 持有）
///
/// 字段只能通过 `SessionStore::mutate` 修改
#[derive(Debug, Default)]
pub struct SessionState {
    pub lifecycle: Lifecycle,
    /// 每次进入 Connecting 时递增，用于丢弃过期的异步写入
    pub session_id: u64,
    pub config_path: String,
    pub pid: Option<u32>,
    pub connect_started_at: Option<DateTime<Utc>>,
    pub tunnel_address: Option<Ipv4Addr>,
    /// Connecting 阶段观察到的隧道地址，进入 Connected 时提升
    tunnel_candidate: Option<Ipv4Addr>,
    pub public_address: Option<String>,
    pub down_rate_mbps: f64,
    pub up_rate_mbps: f64,
    pub ping_ms: Option<u64>,
    pub logs: LogBuffer,
}

impl SessionState {
    /// 进入 Connecting，返回新的会话 ID
    pub fn begin_connecting(&mut self, config_path: &str, pid: Option<u32>) -> u64 {
        self.reset_to_disconnected();
        self.session_id = self.session_id.wrapping_add(1);
        self.lifecycle = Lifecycle::Connecting;
        self.config_path = config_path.to_string();
        self.pid = pid;
        self.session_id
    }

    /// Connecting -> Connected
    ///
    /// 只有当前处于 Connecting 时才会转换，返回是否发生了转换
    pub fn mark_connected(&mut self, now: DateTime<Utc>) -> bool {
        if self.lifecycle != Lifecycle::Connecting {
            return false;
        }
        self.lifecycle = Lifecycle::Connected;
        self.connect_started_at = Some(now);
        if let Some(addr) = self.tunnel_candidate.take() {
            self.tunnel_address = Some(addr);
        }
        true
    }

    /// 记录从输出中提取的隧道地址
    pub fn observe_tunnel_address(&mut self, addr: Ipv4Addr) {
        match self.lifecycle {
            Lifecycle::Connected => self.tunnel_address = Some(addr),
            Lifecycle::Connecting => self.tunnel_candidate = Some(addr),
            Lifecycle::Disconnected => {}
        }
    }

    /// 进入 Disconnected，清空所有会话相关字段（保留日志与会话 ID）
    pub fn reset_to_disconnected(&mut self) {
        self.lifecycle = Lifecycle::Disconnected;
        self.config_path.clear();
        self.pid = None;
        self.connect_started_at = None;
        self.tunnel_address = None;
        self.tunnel_candidate = None;
        self.public_address = None;
        self.down_rate_mbps = 0.0;
        self.up_rate_mbps = 0.0;
        self.ping_ms = None;
    }

    /// 当前是否仍是指定会话且处于 Connected
    pub fn is_current(&self, session_id: u64) -> bool {
        self.lifecycle == Lifecycle::Connected && self.session_id == session_id
    }

    pub fn is_connected(&self) -> bool {
        self.lifecycle == Lifecycle::Connected
    }

    /// 不含日志的状态拷贝
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            lifecycle: self.lifecycle,
            session_id: self.session_id,
            config_path: self.config_path.clone(),
            pid: self.pid,
            connect_started_at: self.connect_started_at,
            tunnel_address: self.tunnel_address,
            public_address: self.public_address.clone(),
            down_rate_mbps: self.down_rate_mbps,
            up_rate_mbps: self.up_rate_mbps,
            ping_ms: self.ping_ms,
        }
    }
}

/// 会话状态快照
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct SessionSnapshot {
    pub lifecycle: Lifecycle,
    pub session_id: u64,
    pub config_path: String,
    pub pid: Option<u32>,
    pub connect_started_at: Option<DateTime<Utc>>,
    pub tunnel_address: Option<Ipv4Addr>,
    pub public_address: Option<String>,
    pub down_rate_mbps: f64,
    pub up_rate_mbps: f64,
    pub ping_ms: Option<u64>,
}

impl SessionSnapshot {
    /// 隧道地址，未知时返回占位符
    pub fn tunnel_address_display(&self) -> String {
        self.tunnel_address
            .map(|a| a.to_string())
            .unwrap_or_else(|| TUNNEL_ADDRESS_SENTINEL.to_string())
    }

    /// 已连接时长（秒）
    pub fn duration_seconds(&self, now: DateTime<Utc>) -> i64 {
        match (self.lifecycle, self.connect_started_at) {
            (Lifecycle::Connected, Some(started)) => (now - started).num_seconds().max(0),
            _ => 0,
        }
    }
}
