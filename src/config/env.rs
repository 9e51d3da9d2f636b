//! 环境变量配置加载

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use self::constants::*;

/// 环境配置
#[derive(Clone, Debug)]
pub struct EnvConfig {
    /// 服务监听端口（仅绑定 127.0.0.1）
    pub port: u16,
    /// OpenVPN 客户端配置
    pub openvpn: OpenVpnConfig,
    /// 遥测配置
    pub telemetry: TelemetryConfig,
    /// 已保存凭据文件路径
    pub credentials_file: PathBuf,
    /// 前端静态资源目录
    pub static_dir: Option<PathBuf>,
    /// 上传的 .ovpn 文件存放目录
    pub upload_dir: PathBuf,
    /// 状态中展示的加密套件
    pub encryption: String,
}

/// OpenVPN 进程配置
#[derive(Clone, Debug)]
pub struct OpenVpnConfig {
    /// openvpn 可执行文件
    pub binary: String,
    /// 是否通过 sudo 启动与结束进程
    pub use_sudo: bool,
    /// killall 使用的进程名
    pub process_name: String,
    /// --verb 日志级别
    pub verbosity: u8,
}

/// 遥测配置
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// 隧道网卡名（按顺序尝试）
    pub tunnel_interfaces: Vec<String>,
    /// 配置中没有 remote 时的 ping 目标
    pub ping_fallback: String,
    /// 公网 IP 查询地址
    pub public_ip_url: String,
    pub throughput_interval: Duration,
    pub latency_interval: Duration,
    pub probe_timeout: Duration,
}

impl EnvConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        let port = parse_var("VPN_CONNECT_PORT").unwrap_or(DEFAULT_PORT);

        let config_dir_name =
            env::var("VPN_CONNECT_CONFIG_DIR").unwrap_or_else(|_| "vpn-connect".to_string());
        let credentials_file = home_dir()
            .join(".config")
            .join(config_dir_name)
            .join(CREDENTIALS_FILE_NAME);

        let static_dir = env::var("VPN_CONNECT_STATIC")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let upload_dir = env::var("VPN_CONNECT_UPLOAD_DIR")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| env::temp_dir().join("vpn-connect-uploads"));

        let encryption =
            env::var("VPN_CONNECT_ENCRYPTION").unwrap_or_else(|_| "AES-256-GCM".to_string());

        Self {
            port,
            openvpn: OpenVpnConfig::from_env(),
            telemetry: TelemetryConfig::from_env(),
            credentials_file,
            static_dir,
            upload_dir,
            encryption,
        }
    }
}

impl OpenVpnConfig {
    pub fn from_env() -> Self {
        let binary = env::var("VPN_CONNECT_OPENVPN_PATH").unwrap_or_else(|_| "openvpn".to_string());
        let use_sudo = parse_bool("VPN_CONNECT_USE_SUDO").unwrap_or(true);
        let process_name =
            env::var("VPN_CONNECT_PROCESS_NAME").unwrap_or_else(|_| "openvpn".to_string());
        let verbosity = parse_var("VPN_CONNECT_VERB").unwrap_or(3);

        Self {
            binary,
            use_sudo,
            process_name,
            verbosity,
        }
    }
}

impl Default for OpenVpnConfig {
    fn default() -> Self {
        Self {
            binary: "openvpn".to_string(),
            use_sudo: true,
            process_name: "openvpn".to_string(),
            verbosity: 3,
        }
    }
}

impl TelemetryConfig {
    pub fn from_env() -> Self {
        let tunnel_interfaces = env::var("VPN_CONNECT_TUN_IFACES")
            .map(|v| parse_list(&v))
            .ok()
            .filter(|l| !l.is_empty())
            .unwrap_or_else(default_tunnel_interfaces);

        let ping_fallback = env::var("VPN_CONNECT_PING_FALLBACK")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_PING_TARGET.to_string());

        let public_ip_url = env::var("VPN_CONNECT_PUBLIC_IP_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_PUBLIC_IP_URL.to_string());

        Self {
            tunnel_interfaces,
            ping_fallback,
            public_ip_url,
            ..Self::default()
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            tunnel_interfaces: default_tunnel_interfaces(),
            ping_fallback: DEFAULT_PING_TARGET.to_string(),
            public_ip_url: DEFAULT_PUBLIC_IP_URL.to_string(),
            throughput_interval: Duration::from_secs(THROUGHPUT_INTERVAL_SECS),
            latency_interval: Duration::from_secs(LATENCY_INTERVAL_SECS),
            probe_timeout: Duration::from_secs(PROBE_TIMEOUT_SECS),
        }
    }
}

fn default_tunnel_interfaces() -> Vec<String> {
    vec!["tun0".to_string(), "tun1".to_string()]
}

fn home_dir() -> PathBuf {
    match env::var("HOME") {
        Ok(home) if !home.is_empty() => PathBuf::from(home),
        _ => {
            warn!("HOME is not set, storing credentials under the temp directory");
            env::temp_dir()
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_bool(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// 解析逗号分隔列表
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// 常量
pub mod constants {
    /// 默认监听端口
    pub const DEFAULT_PORT: u16 = 8765;

    /// 日志缓冲区容量
    pub const LOG_CAPACITY: usize = 1024;

    /// /api/status 返回的日志条数
    pub const STATUS_LOG_TAIL: usize = 200;

    /// 吞吐量采样间隔（秒）
    pub const THROUGHPUT_INTERVAL_SECS: u64 = 1;

    /// 延迟采样间隔（秒）
    pub const LATENCY_INTERVAL_SECS: u64 = 2;

    /// ping 超时（秒）
    pub const PROBE_TIMEOUT_SECS: u64 = 3;

    /// 默认 ping 目标
    pub const DEFAULT_PING_TARGET: &str = "8.8.8.8";

    /// 默认公网 IP 查询地址
    pub const DEFAULT_PUBLIC_IP_URL: &str = "https://api.ipify.org";

    /// 公网 IP 查询次数与间隔
    pub const PUBLIC_IP_ATTEMPTS: u32 = 5;
    pub const PUBLIC_IP_RETRY_SECS: u64 = 2;

    /// 公网 IP 请求超时（秒）
    pub const PUBLIC_IP_TIMEOUT_SECS: u64 = 10;

    /// 客户端单行输出上限，超出部分按新行处理
    pub const MAX_OUTPUT_LINE_BYTES: u64 = 16 * 1024;

    /// 进程退出后等待读取任务结束的上限（秒）
    pub const READER_DRAIN_TIMEOUT_SECS: u64 = 2;

    /// disconnect 等待进程确认退出的上限（秒）
    pub const DISCONNECT_WAIT_SECS: u64 = 10;

    /// killall 超时（秒）
    pub const KILL_TIMEOUT_SECS: u64 = 5;

    /// 隧道地址未知时的占位符
    pub const TUNNEL_ADDRESS_SENTINEL: &str = "---.---.---.---";

    /// 凭据文件名
    pub const CREDENTIALS_FILE_NAME: &str = "saved.json";

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list("tun0, tun1,,"), vec!["tun0", "tun1"]);
        assert!(parse_list(" , ").is_empty());
    }

    #[test]
    fn test_parse_bool() {
        env::set_var("VPN_CONNECT_TEST_BOOL", "TRUE");
        assert_eq!(parse_bool("VPN_CONNECT_TEST_BOOL"), Some(true));
        env::set_var("VPN_CONNECT_TEST_BOOL", "0");
        assert_eq!(parse_bool("VPN_CONNECT_TEST_BOOL"), Some(false));
        env::remove_var("VPN_CONNECT_TEST_BOOL");
        assert_eq!(parse_bool("VPN_CONNECT_TEST_BOOL"), None);
    }

    #[test]
    fn test_telemetry_defaults() {
        let cfg = TelemetryConfig::default();
        assert_eq!(cfg.tunnel_interfaces, vec!["tun0", "tun1"]);
        assert_eq!(cfg.throughput_interval, Duration::from_secs(1));
        assert_eq!(cfg.latency_interval, Duration::from_secs(2));
        assert_eq!(cfg.probe_timeout, Duration::from_secs(3));
    }
}
