//! 命令执行器
//!
//! 提供统一的外部命令执行接口，支持：
//! - 超时控制（超时后进程被 kill）
//! - 可选 sudo 前缀

use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

/// 命令执行器
pub struct CommandRunner;

/// 命令执行错误
#[derive(Debug)]
pub enum CommandError {
    /// 命令启动失败
    SpawnFailed(std::io::Error),
    /// 命令超时
    Timeout,
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::SpawnFailed(e) => write!(f, "Failed to spawn command: {}", e),
            CommandError::Timeout => write!(f, "Command timed out"),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::SpawnFailed(e) => Some(e),
            CommandError::Timeout => None,
        }
    }
}

impl From<CommandError> for std::io::Error {
    fn from(e: CommandError) -> Self {
        match e {
            CommandError::SpawnFailed(io) => io,
            CommandError::Timeout => std::io::Error::new(std::io::ErrorKind::TimedOut, "Command timed out"),
        }
    }
}

impl CommandRunner {
    /// 构造命令，`use_sudo` 时以 `sudo -n program args...` 执行
    pub fn build(program: &str, args: &[&str], use_sudo: bool) -> Command {
        let mut cmd = if use_sudo {
            let mut c = Command::new("sudo");
            c.arg("-n").arg(program);
            c
        } else {
            Command::new(program)
        };
        cmd.args(args);
        cmd
    }

    /// 执行简单命令并收集输出
    ///
    /// 超时后子进程随 future 一起被丢弃并 kill
    pub async fn run_simple(
        program: &str,
        args: &[&str],
        use_sudo: bool,
        timeout: Duration,
    ) -> Result<Output, CommandError> {
        let mut cmd = Self::build(program, args, use_sudo);
        cmd.kill_on_drop(true);

        match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(result) => result.map_err(CommandError::SpawnFailed),
            Err(_) => Err(CommandError::Timeout),
        }
    }
}
