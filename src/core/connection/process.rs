use crate::core::errors::KernelError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Placeholder in a kernel argv replaced by the connection file path
pub const CONNECTION_FILE_PLACEHOLDER: &str = "{connection_file}";

/// How a kernel expects to be interrupted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterruptMode {
    #[default]
    Signal,
    Message,
}

/// Launch description of a kernel, in the shape of a `kernel.json` file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSpec {
    pub argv: Vec<String>,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub interrupt_mode: InterruptMode,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl KernelSpec {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            display_name: String::new(),
            language: String::new(),
            interrupt_mode: InterruptMode::default(),
            env: HashMap::new(),
        }
    }

    /// Read a `kernel.json` file
    pub fn from_file(path: &Path) -> Result<Self, KernelError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Program and arguments with the connection file substituted
    pub fn command_for(&self, connection_file: &Path) -> Result<(String, Vec<String>), KernelError> {
        let path = connection_file.to_string_lossy();
        let mut argv = self
            .argv
            .iter()
            .map(|arg| arg.replace(CONNECTION_FILE_PLACEHOLDER, &path));

        let program = argv
            .next()
            .ok_or_else(|| KernelError::KernelLaunch("kernel argv is empty".to_string()))?;
        Ok((program, argv.collect()))
    }
}

/// Observed state of the kernel process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    /// Exit code, `None` when terminated by a signal
    Exited(Option<i32>),
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => f.write_str("running"),
            Self::Exited(Some(code)) => write!(f, "exited with code {}", code),
            Self::Exited(None) => f.write_str("terminated by signal"),
        }
    }
}

/// A running kernel process watched by a supervisor task
///
/// The supervisor owns the child; this handle observes its state and can
/// request a kill. Dropping the handle kills a still-running kernel.
pub struct KernelProcess {
    pid: Option<u32>,
    state: watch::Receiver<ProcessState>,
    kill: CancellationToken,
}

impl KernelProcess {
    /// Start the kernel and make sure it survives the startup grace period
    ///
    /// # Arguments
    /// * `spec` - Kernel launch description
    /// * `connection_file` - Path substituted for `{connection_file}`
    /// * `grace` - A process exiting within this window is a launch failure
    #[instrument(skip(spec), fields(argv0 = spec.argv.first().map(String::as_str).unwrap_or("")))]
    pub async fn spawn(
        spec: &KernelSpec,
        connection_file: &Path,
        grace: Duration,
    ) -> Result<Self, KernelError> {
        let (program, args) = spec.command_for(connection_file)?;

        let mut child = Command::new(&program)
            .args(&args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| KernelError::KernelLaunch(format!("cannot start '{}': {}", program, e)))?;

        let pid = child.id();
        info!(?pid, program = %program, "kernel process started");

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, "stderr"));
        }

        let (state_tx, state_rx) = watch::channel(ProcessState::Running);
        let kill = CancellationToken::new();
        tokio::spawn(supervise(child, state_tx, kill.clone()));

        let process = Self {
            pid,
            state: state_rx,
            kill,
        };

        if let Some(state) = process.wait_for_exit(grace).await {
            return Err(KernelError::KernelLaunch(format!(
                "kernel {} during startup",
                state
            )));
        }

        Ok(process)
    }

    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ProcessState::Running
    }

    /// Watch for state changes
    pub fn subscribe(&self) -> watch::Receiver<ProcessState> {
        self.state.clone()
    }

    /// Wait up to `timeout` for the process to exit
    ///
    /// Returns the final state, or `None` if it is still running.
    pub async fn wait_for_exit(&self, timeout: Duration) -> Option<ProcessState> {
        let mut state = self.state.clone();
        let outcome = tokio::time::timeout(timeout, state.wait_for(|s| *s != ProcessState::Running))
            .await
            .map(|exited| exited.map(|s| *s).ok());

        match outcome {
            Ok(Some(exited)) => Some(exited),
            // supervisor vanished without publishing an exit
            Ok(None) => Some(ProcessState::Exited(None)),
            Err(_) => None,
        }
    }

    /// Kill the process and wait for the supervisor to observe the exit
    pub async fn kill(&self) -> ProcessState {
        self.kill.cancel();
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s != ProcessState::Running)
            .await
            .map(|s| *s)
            .unwrap_or(ProcessState::Exited(None))
    }
}

impl Drop for KernelProcess {
    fn drop(&mut self) {
        self.kill.cancel();
    }
}

async fn supervise(mut child: Child, state: watch::Sender<ProcessState>, kill: CancellationToken) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill.cancelled() => {
            debug!("killing kernel process");
            if let Err(e) = child.start_kill() {
                warn!("failed to signal kernel process: {}", e);
            }
            child.wait().await
        }
    };

    let exited = match status {
        Ok(status) => ProcessState::Exited(status.code()),
        Err(e) => {
            warn!("failed to wait for kernel process: {}", e);
            ProcessState::Exited(None)
        }
    };
    info!(state = %exited, "kernel process ended");
    let _ = state.send(exited);
}

async fn forward_output<R: AsyncRead + Unpin>(stream: R, name: &'static str) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(target: "jupyter_bridge::kernel", stream = name, "{}", line),
            Ok(None) => break,
            Err(e) => {
                warn!(stream = name, "stopped reading kernel output: {}", e);
                break;
            }
        }
    }
}
