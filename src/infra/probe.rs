//! ICMP 往返时延探测

use async_trait::async_trait;
use std::time::Duration;

use crate::infra::command::CommandRunner;

/// 单次往返时延探测
#[async_trait]
pub trait EchoProbe: Send + Sync {
    /// 返回毫秒级 RTT，失败或超时返回 None
    async fn probe(&self, target: &str, timeout: Duration) -> Option<f64>;
}

/// 调用系统 `ping -c 1 -W <secs>`
#[derive(Debug, Default, Clone)]
pub struct PingProbe;

#[async_trait]
impl EchoProbe for PingProbe {
    async fn probe(&self, target: &str, timeout: Duration) -> Option<f64> {
        let wait_secs = timeout.as_secs().max(1).to_string();
        // ping 自身的 -W 之外再留出进程启动的余量
        let outer = timeout + Duration::from_secs(2);

        match CommandRunner::run_simple("ping", &["-c", "1", "-W", &wait_secs, target], false, outer)
            .await
        {
            Ok(output) if output.status.success() => {
                parse_ping_rtt(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(target, error = %e, "ping failed");
                None
            }
        }
    }
}

/// 解析 ping 输出中的 RTT
///
/// 优先取回复行中的 `time=12.3 ms`（兼容 `time 12.3 ms` 与 `time<1 ms`），
/// 否则取汇总行 `min/avg/max` 的平均值。
pub fn parse_ping_rtt(output: &str) -> Option<f64> {
    for line in output.lines() {
        if let Some(value) = reply_time(line) {
            return Some(value);
        }
    }

    output
        .lines()
        .find(|line| line.contains("min/avg/max"))
        .and_then(|line| {
            let (_, values) = line.split_once('=')?;
            let avg = values.trim().split('/').nth(1)?;
            avg.trim().parse::<f64>().ok()
        })
}

fn reply_time(line: &str) -> Option<f64> {
    // 主机名里也可能出现 "time"，逐个位置尝试
    line.match_indices("time")
        .find_map(|(idx, _)| time_value(&line[idx + "time".len()..]))
}

fn time_value(rest: &str) -> Option<f64> {
    let separator = rest.chars().next()?;
    if !matches!(separator, '=' | ' ' | '<') {
        return None;
    }
    let rest = &rest[1..];
    let number: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let unit = &rest[number.len()..];
    if number.is_empty() || !unit.trim_start().starts_with("ms") {
        return None;
    }
    // 汇总行 `time 0ms` 是总耗时，不是单次回复
    if separator == ' ' && !unit.starts_with(' ') {
        return None;
    }
    number.parse().ok()
}
