//! 网卡字节计数读取
//!
//! 优先读取 `/sys/class/net/<iface>/statistics`，失败时解析 `/proc/net/dev`

use async_trait::async_trait;
use std::path::PathBuf;

/// 网卡累计收发字节
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InterfaceCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// 网卡统计来源
#[async_trait]
pub trait InterfaceStats: Send + Sync {
    /// 读取计数，网卡不存在或不可读时返回 None
    async fn read_counters(&self, iface: &str) -> Option<InterfaceCounters>;
}

/// Linux sysfs / procfs 实现
#[derive(Debug, Clone)]
pub struct SysfsInterfaceStats {
    sys_class_net: PathBuf,
    proc_net_dev: PathBuf,
}

impl SysfsInterfaceStats {
    pub fn new() -> Self {
        Self {
            sys_class_net: PathBuf::from("/sys/class/net"),
            proc_net_dev: PathBuf::from("/proc/net/dev"),
        }
    }

    /// 使用自定义根路径（测试用）
    pub fn with_paths(sys_class_net: impl Into<PathBuf>, proc_net_dev: impl Into<PathBuf>) -> Self {
        Self {
            sys_class_net: sys_class_net.into(),
            proc_net_dev: proc_net_dev.into(),
        }
    }

    async fn read_sysfs(&self, iface: &str) -> Option<InterfaceCounters> {
        let stats = self.sys_class_net.join(iface).join("statistics");
        let rx = tokio::fs::read_to_string(stats.join("rx_bytes")).await.ok()?;
        let tx = tokio::fs::read_to_string(stats.join("tx_bytes")).await.ok()?;
        Some(InterfaceCounters {
            rx_bytes: rx.trim().parse().ok()?,
            tx_bytes: tx.trim().parse().ok()?,
        })
    }

    async fn read_procfs(&self, iface: &str) -> Option<InterfaceCounters> {
        let content = tokio::fs::read_to_string(&self.proc_net_dev).await.ok()?;
        parse_proc_net_dev(&content, iface)
    }
}

impl Default for SysfsInterfaceStats {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InterfaceStats for SysfsInterfaceStats {
    async fn read_counters(&self, iface: &str) -> Option<InterfaceCounters> {
        if let Some(counters) = self.read_sysfs(iface).await {
            return Some(counters);
        }
        self.read_procfs(iface).await
    }
}

/// 解析 `/proc/net/dev`
///
/// 格式: `iface: rx_bytes rx_packets ... (8 列) tx_bytes ...`。
/// 查询 `tun0` 时接受任意 `tun*` 网卡。
pub fn parse_proc_net_dev(content: &str, iface: &str) -> Option<InterfaceCounters> {
    for line in content.lines().skip(2) {
        let Some((name, rest)) = line.trim().split_once(':') else {
            continue;
        };
        let name = name.trim();
        let matches = name == iface || (iface == "tun0" && name.starts_with("tun"));
        if !matches {
            continue;
        }

        let fields: Vec<&str> = rest.split_whitespace().collect();
        if fields.len() < 16 {
            continue;
        }
        let rx_bytes = fields[0].parse().ok()?;
        let tx_bytes = fields[8].parse().ok()?;
        return Some(InterfaceCounters { rx_bytes, tx_bytes });
    }
    None
}
