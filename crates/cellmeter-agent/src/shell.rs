//! Remote shell — persistent command channel to the router.
//!
//! Drives the system OpenSSH client with a ControlMaster socket so every
//! command reuses one authenticated connection. The master is established
//! lazily under a mutex (concurrent callers cannot open duplicates) and is
//! torn down after any execution failure, since a failed command leaves the
//! channel state ambiguous; the next call transparently reconnects.
//!
//! Authentication is key-based (`BatchMode=yes`) — the client runs
//! non-interactively on an unattended field device.

use std::path::PathBuf;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::Mutex;

use cellmeter_common::config::RouterConfig;

pub struct RemoteShell {
    /// `user@host` target handed to ssh.
    target: String,
    port: u16,
    identity: Option<PathBuf>,
    connect_timeout: Duration,
    control_path: PathBuf,
    /// Serializes master-channel establishment and teardown. Command
    /// execution itself does not hold this lock.
    connect_lock: Mutex<()>,
}

impl RemoteShell {
    pub fn new(cfg: &RouterConfig) -> Self {
        let control_path =
            std::env::temp_dir().join(format!("cellmeter-ssh-{}.sock", std::process::id()));
        RemoteShell {
            target: format!("{}@{}", cfg.ssh_user, cfg.host),
            port: cfg.ssh_port,
            identity: cfg.ssh_key.clone(),
            connect_timeout: Duration::from_secs(cfg.ssh_connect_timeout_s),
            control_path,
            connect_lock: Mutex::new(()),
        }
    }

    /// Options shared by every ssh invocation (master and per-command).
    fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".into(),
            format!("ControlPath={}", self.control_path.display()),
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            "StrictHostKeyChecking=no".into(),
            "-o".into(),
            "UserKnownHostsFile=/dev/null".into(),
            "-o".into(),
            "LogLevel=ERROR".into(),
            "-p".into(),
            self.port.to_string(),
        ];
        if let Some(ref identity) = self.identity {
            args.push("-i".into());
            args.push(identity.display().to_string());
        }
        args
    }

    /// `ssh -O check` exits zero when the master socket is live.
    async fn master_alive(&self) -> bool {
        Command::new("ssh")
            .args(self.base_args())
            .arg("-O")
            .arg("check")
            .arg(&self.target)
            .output()
            .await
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    /// Establish the master channel if none exists or the existing one is
    /// dead. Failures are logged; the channel stays absent for the next
    /// caller to retry.
    pub async fn connect(&self) {
        let _guard = self.connect_lock.lock().await;
        if self.master_alive().await {
            return;
        }
        tracing::info!(target = %self.target, "establishing SSH control channel");
        let result = Command::new("ssh")
            .args(self.base_args())
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs()))
            .arg("-o")
            .arg("ControlMaster=yes")
            .arg("-o")
            .arg("ControlPersist=yes")
            .arg("-N")
            .arg("-f")
            .arg(&self.target)
            .output()
            .await;
        match result {
            Ok(out) if out.status.success() => {
                tracing::info!("SSH control channel established");
            }
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                tracing::warn!(stderr = %stderr.trim(), "failed to establish SSH control channel");
            }
            Err(e) => tracing::warn!(error = %e, "failed to spawn ssh"),
        }
    }

    /// Run a command over the shared channel and return captured stdout.
    ///
    /// Any failure — spawn error, non-zero exit, timeout — invalidates the
    /// shared channel so the next call reconnects. The failed command is
    /// not retried here; retry policy belongs to the caller.
    pub async fn execute(&self, command: &str, timeout: Duration) -> Option<String> {
        if !self.master_alive().await {
            self.connect().await;
            if !self.master_alive().await {
                return None;
            }
        }

        let mut cmd = Command::new("ssh");
        cmd.args(self.base_args())
            .arg(&self.target)
            .arg("--")
            .arg(command)
            .kill_on_drop(true);

        match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(out)) if out.status.success() => {
                Some(String::from_utf8_lossy(&out.stdout).into_owned())
            }
            Ok(Ok(out)) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                tracing::warn!(
                    command,
                    code = out.status.code().unwrap_or(-1),
                    stderr = %stderr.trim(),
                    "remote command failed"
                );
                self.invalidate().await;
                None
            }
            Ok(Err(e)) => {
                tracing::warn!(command, error = %e, "failed to run remote command");
                self.invalidate().await;
                None
            }
            Err(_) => {
                tracing::warn!(command, timeout_s = timeout.as_secs(), "remote command timed out");
                self.invalidate().await;
                None
            }
        }
    }

    /// Drop the master socket so the next `execute` reconnects.
    async fn invalidate(&self) {
        let _guard = self.connect_lock.lock().await;
        let _ = Command::new("ssh")
            .args(self.base_args())
            .arg("-O")
            .arg("exit")
            .arg(&self.target)
            .output()
            .await;
    }

    /// Gracefully close the channel; used at orchestrated shutdown.
    pub async fn disconnect(&self) {
        let _guard = self.connect_lock.lock().await;
        let result = Command::new("ssh")
            .args(self.base_args())
            .arg("-O")
            .arg("exit")
            .arg(&self.target)
            .output()
            .await;
        match result {
            Ok(out) if out.status.success() => tracing::info!("SSH control channel closed"),
            // Nothing to close is the common case at shutdown.
            Ok(_) => tracing::debug!("no SSH control channel to close"),
            Err(e) => tracing::warn!(error = %e, "failed to close SSH control channel"),
        }
    }
}
