//! VPN session controller.
//!
//! Drives the external client through `Disconnected -> Connecting -> Connected
//! -> Disconnected`. One supervision task per session owns the child process:
//! it runs a reader per output stream, waits for exit and performs the only
//! transition back to `Disconnected`. `pid` is therefore set exactly while a
//! session is active, and a new connect cannot race a client that is still
//! shutting down.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::env::constants::{
    DISCONNECT_WAIT_SECS, MAX_OUTPUT_LINE_BYTES, PUBLIC_IP_ATTEMPTS, PUBLIC_IP_RETRY_SECS,
    READER_DRAIN_TIMEOUT_SECS,
};
use crate::domain::profile::display_name;
use crate::domain::session::LogEntry;
use crate::error::SessionError;
use crate::infra::process::{
    LaunchRequest, OutputStream, ProcessHandle, ProcessPlatform, SpawnedProcess,
};
use crate::infra::profiles::ProfileSource;
use crate::infra::public_ip::PublicAddressResolver;
use crate::infra::secret::SecretArtifact;
use crate::services::classifier::{classify, Signal};
use crate::state::session_store::SessionStore;

/// Timeouts and retry policy of a session.
#[derive(Clone, Debug)]
pub struct SessionTimings {
    /// How long to wait for output readers once the client has exited.
    pub reader_drain: Duration,
    /// How long `disconnect` waits for the client to exit.
    pub disconnect_wait: Duration,
    pub public_ip_attempts: u32,
    pub public_ip_retry: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            reader_drain: Duration::from_secs(READER_DRAIN_TIMEOUT_SECS),
            disconnect_wait: Duration::from_secs(DISCONNECT_WAIT_SECS),
            public_ip_attempts: PUBLIC_IP_ATTEMPTS,
            public_ip_retry: Duration::from_secs(PUBLIC_IP_RETRY_SECS),
        }
    }
}

struct ActiveSession {
    session_id: u64,
    pid: u32,
    cancel: CancellationToken,
    artifact: Arc<SecretArtifact>,
    supervisor: JoinHandle<()>,
}

/// Shared by the supervision task, the output readers and the
/// public address lookup of one session.
struct SessionContext {
    session_id: u64,
    store: Arc<SessionStore>,
    artifact: Arc<SecretArtifact>,
    resolver: Arc<dyn PublicAddressResolver>,
    timings: SessionTimings,
}

pub struct SessionController {
    store: Arc<SessionStore>,
    platform: Arc<dyn ProcessPlatform>,
    profiles: Arc<dyn ProfileSource>,
    resolver: Arc<dyn PublicAddressResolver>,
    process_name: String,
    secret_dir: PathBuf,
    timings: SessionTimings,
    // serializes connect/disconnect
    active: Mutex<Option<ActiveSession>>,
}

impl SessionController {
    pub fn new(
        store: Arc<SessionStore>,
        platform: Arc<dyn ProcessPlatform>,
        profiles: Arc<dyn ProfileSource>,
        resolver: Arc<dyn PublicAddressResolver>,
        process_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            platform,
            profiles,
            resolver,
            process_name: process_name.into(),
            secret_dir: std::env::temp_dir(),
            timings: SessionTimings::default(),
            active: Mutex::new(None),
        }
    }

    /// Directory for the one-time askpass file.
    pub fn with_secret_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.secret_dir = dir.into();
        self
    }

    pub fn with_timings(mut self, timings: SessionTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Start a session for `config_path`, returning its session id.
    ///
    /// Validation failures leave the state untouched. A launch failure is
    /// logged to the session log and leaves the state `Disconnected`.
    pub async fn connect(&self, config_path: &str, secret: &str) -> Result<u64, SessionError> {
        let config_path = config_path.trim();
        let mut slot = self.active.lock().await;
        self.validate(config_path, secret).await?;

        self.store.append_log(LogEntry::info(format!(
            "Connecting: {}",
            display_name(config_path)
        )));

        let (spawned, artifact) = match self.launch(config_path, secret).await {
            Ok(launched) => launched,
            Err(e) => {
                error!(config = %config_path, error = %e, "Failed to launch VPN client");
                self.store.append_log(LogEntry::error(e.to_string()));
                self.store.append_log(LogEntry::info("Disconnected."));
                return Err(SessionError::launch(format!("Failed to start VPN client: {}", e)));
            }
        };

        let pid = spawned.pid;
        let session_id = self
            .store
            .mutate(|s| s.begin_connecting(config_path, Some(pid)));

        let ctx = Arc::new(SessionContext {
            session_id,
            store: self.store.clone(),
            artifact: artifact.clone(),
            resolver: self.resolver.clone(),
            timings: self.timings.clone(),
        });
        let cancel = CancellationToken::new();
        let supervisor = tokio::spawn(supervise(
            ctx,
            pid,
            spawned.stdout,
            spawned.stderr,
            spawned.handle,
            cancel.clone(),
        ));

        info!(pid, session_id, config = %config_path, "VPN session started");

        *slot = Some(ActiveSession {
            session_id,
            pid,
            cancel,
            artifact,
            supervisor,
        });
        Ok(session_id)
    }

    /// Checks a connect request without starting anything.
    pub async fn validate(&self, config_path: &str, secret: &str) -> Result<(), SessionError> {
        let config_path = config_path.trim();
        if config_path.is_empty() || !self.profiles.exists(config_path).await {
            return Err(SessionError::validation("Select a valid .ovpn file."));
        }
        if secret.is_empty() {
            return Err(SessionError::validation("Enter your private key password."));
        }
        let current = self.store.snapshot();
        if current.lifecycle.is_active() || current.pid.is_some() {
            return Err(SessionError::validation("Already connected or connecting."));
        }
        Ok(())
    }

    async fn launch(
        &self,
        config_path: &str,
        secret: &str,
    ) -> io::Result<(SpawnedProcess, Arc<SecretArtifact>)> {
        // the client runs from the profile's directory, so pass an absolute path
        let config = tokio::fs::canonicalize(config_path)
            .await
            .unwrap_or_else(|_| PathBuf::from(config_path));
        let working_dir = config
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let artifact = Arc::new(SecretArtifact::create_in(&self.secret_dir, secret)?);
        let askpass_path = artifact
            .path()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "askpass file already removed"))?;

        let request = LaunchRequest {
            config_path: config,
            askpass_path,
            working_dir,
        };
        // on error the artifact is dropped and its file removed
        let spawned = self.platform.spawn(&request).await?;
        Ok((spawned, artifact))
    }

    /// Stop the active session, if any.
    ///
    /// Sends a graceful terminate, then always a kill-by-name, removes the
    /// askpass file and waits (bounded) for the supervision task to record
    /// the exit. Safe to call at any time.
    pub async fn disconnect(&self) {
        let mut slot = self.active.lock().await;
        let Some(mut active) = slot.take() else {
            return;
        };

        let current = self.store.snapshot();
        if !current.lifecycle.is_active() || current.session_id != active.session_id {
            // already exited on its own
            active.artifact.remove();
            return;
        }

        let pid = current.pid.unwrap_or(active.pid);
        info!(pid, session_id = active.session_id, "Disconnecting VPN session");

        if let Err(e) = self.platform.terminate(pid).await {
            debug!(pid, error = %e, "Graceful terminate failed");
        }
        if let Err(e) = self.platform.kill_by_name(&self.process_name).await {
            warn!(name = %self.process_name, error = %e, "Kill by name failed");
        }
        active.artifact.remove();
        self.store.append_log(LogEntry::info("Disconnecting..."));
        active.cancel.cancel();

        if tokio::time::timeout(self.timings.disconnect_wait, &mut active.supervisor)
            .await
            .is_err()
        {
            warn!(
                pid,
                wait_secs = self.timings.disconnect_wait.as_secs(),
                "VPN client has not exited yet"
            );
            // keep it so a later disconnect can retry
            *slot = Some(active);
        }
    }
}

/// Owns the child until it exits, then records the `Disconnected` transition.
async fn supervise(
    ctx: Arc<SessionContext>,
    pid: u32,
    stdout: Option<OutputStream>,
    stderr: Option<OutputStream>,
    mut handle: Box<dyn ProcessHandle>,
    cancel: CancellationToken,
) {
    let mut readers: Vec<JoinHandle<()>> = Vec::new();
    if let Some(stream) = stdout {
        readers.push(tokio::spawn(read_output(ctx.clone(), stream, "stdout")));
    }
    if let Some(stream) = stderr {
        readers.push(tokio::spawn(read_output(ctx.clone(), stream, "stderr")));
    }

    let drain = ctx.timings.reader_drain;
    let mut drained = true;
    let exit = {
        let all_read = join_readers(&mut readers);
        tokio::pin!(all_read);

        tokio::select! {
            _ = &mut all_read => None,
            _ = cancel.cancelled() => {
                drained = tokio::time::timeout(drain, &mut all_read).await.is_ok();
                None
            }
            status = handle.wait() => {
                drained = tokio::time::timeout(drain, &mut all_read).await.is_ok();
                Some(status)
            }
        }
    };

    if !drained {
        debug!(pid, "Output readers still open after exit, aborting them");
        for reader in &readers {
            reader.abort();
        }
    }

    let status = match exit {
        Some(status) => status,
        None => handle.wait().await,
    };
    match status {
        Ok(code) => info!(pid, code = ?code, session_id = ctx.session_id, "VPN client exited"),
        Err(e) => {
            warn!(pid, error = %e, "Failed to wait for VPN client");
            ctx.store
                .append_log(LogEntry::error(format!("Failed to wait for VPN client: {}", e)));
        }
    }

    ctx.artifact.remove();
    ctx.store.append_log(LogEntry::info("Disconnected."));
    let session_id = ctx.session_id;
    ctx.store.mutate(|s| {
        if s.session_id == session_id {
            s.reset_to_disconnected();
        }
    });
}

async fn join_readers(readers: &mut [JoinHandle<()>]) {
    for reader in readers.iter_mut() {
        if let Err(e) = reader.await {
            if !e.is_cancelled() {
                warn!(error = %e, "Output reader task failed");
            }
        }
    }
}

async fn read_output(ctx: Arc<SessionContext>, stream: OutputStream, name: &'static str) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        // an unterminated line is cut into MAX_OUTPUT_LINE_BYTES chunks
        let mut line_reader = (&mut reader).take(MAX_OUTPUT_LINE_BYTES);
        match line_reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim();
                if !line.is_empty() {
                    handle_line(&ctx, line);
                }
            }
            Err(e) => {
                warn!(stream = name, error = %e, "Failed to read VPN client output");
                ctx.store
                    .append_log(LogEntry::error(format!("Output stream error: {}", e)));
                break;
            }
        }
    }

    debug!(stream = name, session_id = ctx.session_id, "Output stream closed");
}

fn handle_line(ctx: &Arc<SessionContext>, line: &str) {
    let classified = classify(line);
    ctx.store.append_log(LogEntry::new(classified.severity, line));

    for signal in classified.signals {
        match signal {
            Signal::SequenceCompleted => on_sequence_completed(ctx),
            Signal::AuthFailed => ctx
                .store
                .append_log(LogEntry::error("VPN authentication failed.")),
            Signal::DecryptFailed => ctx
                .store
                .append_log(LogEntry::error("Wrong private key password.")),
            Signal::TunnelAddress(addr) => {
                let session_id = ctx.session_id;
                ctx.store.mutate(|s| {
                    if s.session_id == session_id {
                        s.observe_tunnel_address(addr);
                    }
                });
            }
        }
    }
}

fn on_sequence_completed(ctx: &Arc<SessionContext>) {
    let session_id = ctx.session_id;
    let now = Utc::now();
    let transitioned = ctx
        .store
        .mutate(|s| s.session_id == session_id && s.mark_connected(now));
    if !transitioned {
        return;
    }

    info!(session_id, "VPN connected");
    ctx.store.append_log(LogEntry::success("VPN Connected!"));
    ctx.artifact.remove();
    tokio::spawn(resolve_public_address(ctx.clone()));
}

/// Look up the public address while this session stays connected.
async fn resolve_public_address(ctx: Arc<SessionContext>) {
    let session_id = ctx.session_id;
    let attempts = ctx.timings.public_ip_attempts.max(1);

    for attempt in 1..=attempts {
        if !ctx.store.mutate(|s| s.is_current(session_id)) {
            return;
        }

        if let Some(address) = ctx.resolver.resolve().await {
            let committed = ctx.store.mutate(|s| {
                if s.is_current(session_id) {
                    s.public_address = Some(address.clone());
                    true
                } else {
                    false
                }
            });
            if committed {
                info!(session_id, public_ip = %address, "Resolved public address");
            }
            return;
        }

        if attempt < attempts {
            tokio::time::sleep(ctx.timings.public_ip_retry).await;
        }
    }

    debug!(session_id, attempts, "Public address unavailable");
}
