//! 外部进程平台
//!
//! 启动 OpenVPN 客户端、按 PID 发送 SIGTERM、按进程名 killall。
//! 控制器只依赖 `ProcessPlatform` trait，测试中可替换为脚本化实现。

use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::process::Child;

use crate::config::env::constants::KILL_TIMEOUT_SECS;
use crate::config::env::OpenVpnConfig;
use crate::infra::command::CommandRunner;

/// 进程输出流
pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// 启动参数
#[derive(Clone, Debug)]
pub struct LaunchRequest {
    /// 连接配置文件
    pub config_path: PathBuf,
    /// 一次性密码文件
    pub askpass_path: PathBuf,
    /// 工作目录（配置文件所在目录，保证配置内的相对路径可解析）
    pub working_dir: PathBuf,
}

/// 已启动的进程
pub struct SpawnedProcess {
    pub pid: u32,
    pub stdout: Option<OutputStream>,
    pub stderr: Option<OutputStream>,
    pub handle: Box<dyn ProcessHandle>,
}

/// 等待进程退出的句柄
#[async_trait]
pub trait ProcessHandle: Send {
    /// 等待退出，返回退出码（被信号结束时为 None）
    async fn wait(&mut self) -> io::Result<Option<i32>>;
}

/// 进程平台
#[async_trait]
pub trait ProcessPlatform: Send + Sync {
    /// 启动客户端进程
    async fn spawn(&self, request: &LaunchRequest) -> io::Result<SpawnedProcess>;

    /// 请求进程优雅退出
    async fn terminate(&self, pid: u32) -> io::Result<()>;

    /// 按进程名强制结束
    async fn kill_by_name(&self, name: &str) -> io::Result<()>;
}

/// tokio `Child` 句柄
struct ChildHandle(Child);

#[async_trait]
impl ProcessHandle for ChildHandle {
    async fn wait(&mut self) -> io::Result<Option<i32>> {
        let status = self.0.wait().await?;
        Ok(status.code())
    }
}

/// 基于 tokio::process 的 OpenVPN 平台实现
pub struct OpenVpnPlatform {
    config: OpenVpnConfig,
}

impl OpenVpnPlatform {
    pub fn new(config: OpenVpnConfig) -> Self {
        Self { config }
    }

    /// 客户端参数；密码只通过文件传入，不出现在命令行上
    fn launch_args(&self, request: &LaunchRequest) -> Vec<String> {
        vec![
            "--config".to_string(),
            request.config_path.to_string_lossy().to_string(),
            "--askpass".to_string(),
            request.askpass_path.to_string_lossy().to_string(),
            "--auth-nocache".to_string(),
            "--verb".to_string(),
            self.config.verbosity.to_string(),
        ]
    }
}

#[async_trait]
impl ProcessPlatform for OpenVpnPlatform {
    async fn spawn(&self, request: &LaunchRequest) -> io::Result<SpawnedProcess> {
        let args = self.launch_args(request);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        let mut child = CommandRunner::build(&self.config.binary, &arg_refs, self.config.use_sudo)
            .current_dir(&request.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let Some(pid) = child.id() else {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "process exited before its pid could be read",
            ));
        };

        let stdout = child.stdout.take().map(|s| Box::new(s) as OutputStream);
        let stderr = child.stderr.take().map(|s| Box::new(s) as OutputStream);

        tracing::info!(
            pid,
            binary = %self.config.binary,
            sudo = self.config.use_sudo,
            config = %request.config_path.display(),
            "Spawned VPN client"
        );

        Ok(SpawnedProcess {
            pid,
            stdout,
            stderr,
            handle: Box::new(ChildHandle(child)),
        })
    }

    async fn terminate(&self, pid: u32) -> io::Result<()> {
        let pid = pid.to_string();
        let output = CommandRunner::run_simple(
            "kill",
            &["-TERM", &pid],
            false,
            Duration::from_secs(KILL_TIMEOUT_SECS),
        )
        .await?;

        if output.status.success() {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::Other,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    async fn kill_by_name(&self, name: &str) -> io::Result<()> {
        let output = CommandRunner::run_simple(
            "killall",
            &[name],
            self.config.use_sudo,
            Duration::from_secs(KILL_TIMEOUT_SECS),
        )
        .await?;

        // killall 在没有匹配进程时返回非零，这里不算失败
        if !output.status.success() {
            tracing::debug!(
                name,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "killall matched nothing"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn echo_platform() -> OpenVpnPlatform {
        OpenVpnPlatform::new(OpenVpnConfig {
            binary: "echo".to_string(),
            use_sudo: false,
            process_name: "echo".to_string(),
            verbosity: 4,
        })
    }

    #[test]
    fn test_launch_args_never_contain_secret_content() {
        let platform = echo_platform();
        let req = LaunchRequest {
            config_path: PathBuf::from("/etc/vpn/office.ovpn"),
            askpass_path: PathBuf::from("/tmp/x.pass"),
            working_dir: PathBuf::from("/etc/vpn"),
        };
        let args = platform.launch_args(&req);
        assert_eq!(
            args,
            vec![
                "--config",
                "/etc/vpn/office.ovpn",
                "--askpass",
                "/tmp/x.pass",
                "--auth-nocache",
                "--verb",
                "4"
            ]
        );
    }

    #[tokio::test]
    async fn test_spawn_streams_and_wait() {
        let dir = tempfile::tempdir().unwrap();
        let platform = echo_platform();
        let req = LaunchRequest {
            config_path: dir.path().join("a.ovpn"),
            askpass_path: dir.path().join("a.pass"),
            working_dir: dir.path().to_path_buf(),
        };

        let mut proc = platform.spawn(&req).await.unwrap();
        assert!(proc.pid > 0);

        let mut out = String::new();
        proc.stdout.take().unwrap().read_to_string(&mut out).await.unwrap();
        assert!(out.contains("--askpass"));

        let code = proc.handle.wait().await.unwrap();
        assert_eq!(code, Some(0));
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let platform = OpenVpnPlatform::new(OpenVpnConfig {
            binary: "nonexistent_vpn_binary_12345".to_string(),
            use_sudo: false,
            ..OpenVpnConfig::default()
        });
        let req = LaunchRequest {
            config_path: PathBuf::from("/tmp/a.ovpn"),
            askpass_path: PathBuf::from("/tmp/a.pass"),
            working_dir: std::env::temp_dir(),
        };
        assert!(platform.spawn(&req).await.is_err());
    }
}
