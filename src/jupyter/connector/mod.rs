use crate::core::config::EngineConfig;
use crate::core::connection::{HeartbeatMonitor, HeartbeatState, KernelProcess, ProcessState};
use crate::core::context::InvocationContext;
use crate::core::errors::KernelError;
use crate::core::traits::{CodeExecutor, KernelConnector, KernelIntrospection, LanguageServices};
use crate::core::types::LinePosition;
use crate::jupyter::correlation::{ReplyOutcome, ReplyStream};
use crate::jupyter::session::KernelSession;
use crate::jupyter::types::{KernelInfoReply, MessageContent, ShutdownReply, ShutdownRequest};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub mod execute;
pub mod info;
pub mod language;

pub use execute::Execution;
pub use info::Introspection;
pub use language::Language;

/// Failure message published when the caller cancels a command
pub const CANCELLED_MESSAGE: &str = "Command cancelled";

/// Wait for the typed reply to a request
///
/// An `error` message or cancellation publishes `CommandFailed` and yields
/// `None`.
pub(crate) async fn await_reply<T: MessageContent>(
    replies: &mut ReplyStream,
    context: &InvocationContext,
) -> Result<Option<T>, KernelError> {
    match replies
        .until_reply(T::MSG_TYPE, context.cancellation_token())
        .await?
    {
        ReplyOutcome::Reply(message) => Ok(Some(message.content_as()?)),
        ReplyOutcome::KernelError(error) => {
            context.fail(error.failure_message());
            Ok(None)
        }
        ReplyOutcome::Cancelled => {
            context.fail(CANCELLED_MESSAGE);
            Ok(None)
        }
    }
}

/// Jupyter connector that composes all sub-trait implementations
///
/// Owns the session and, when it launched the kernel, the process, the
/// connection file and the heartbeat monitor.
pub struct JupyterConnector {
    pub execution: Execution,
    pub language: Language,
    pub introspection: Introspection,
    session: Arc<KernelSession>,
    process: Option<KernelProcess>,
    connection_file: Option<PathBuf>,
    heartbeat: Option<HeartbeatMonitor>,
    shutdown_timeout: Duration,
}

impl JupyterConnector {
    pub fn new(session: Arc<KernelSession>, config: &EngineConfig) -> Self {
        Self {
            execution: Execution::new(
                session.clone(),
                config.interrupt_timeout_duration(),
                config.execute_reply_grace_duration(),
            ),
            language: Language::new(session.clone()),
            introspection: Introspection::new(session.clone()),
            session,
            process: None,
            connection_file: None,
            heartbeat: None,
            shutdown_timeout: config.shutdown_timeout_duration(),
        }
    }

    /// Take ownership of a launched kernel and its connection file
    #[must_use]
    pub fn with_process(mut self, process: KernelProcess, connection_file: PathBuf) -> Self {
        self.process = Some(process);
        self.connection_file = Some(connection_file);
        self
    }

    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatMonitor) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    pub fn session(&self) -> &Arc<KernelSession> {
        &self.session
    }

    /// Cached `kernel_info_reply`
    pub fn kernel_info(&self) -> Option<KernelInfoReply> {
        self.introspection.kernel_info()
    }

    pub fn heartbeat_state(&self) -> Option<HeartbeatState> {
        self.heartbeat.as_ref().map(HeartbeatMonitor::state)
    }

    pub fn process_state(&self) -> Option<ProcessState> {
        self.process.as_ref().map(KernelProcess::state)
    }

    pub fn connection_file(&self) -> Option<&Path> {
        self.connection_file.as_deref()
    }

    /// Ask the kernel to interrupt whatever it is running
    pub fn interrupt(&self) {
        self.execution.interrupt();
    }

    /// Shut the kernel down and release everything the connector owns
    ///
    /// Sends `shutdown_request` on control, waits for the process to exit and
    /// kills it if it does not, then closes every channel and removes the
    /// connection file. Calling it again is a no-op.
    #[instrument(skip(self), fields(session = %self.session.session_id()))]
    pub async fn shutdown(&self) -> Result<(), KernelError> {
        if self.session.is_closed() {
            return Ok(());
        }

        match self
            .session
            .send_request(&ShutdownRequest { restart: false })
            .await
        {
            Ok(mut replies) => {
                let uncancellable = CancellationToken::new();
                let reply = tokio::time::timeout(
                    self.shutdown_timeout,
                    replies.until_reply(ShutdownReply::MSG_TYPE, &uncancellable),
                )
                .await;
                match reply {
                    Ok(Ok(ReplyOutcome::Reply(_))) => debug!("kernel acknowledged shutdown"),
                    Ok(Ok(_)) => warn!("kernel did not acknowledge shutdown"),
                    Ok(Err(e)) => warn!("shutdown reply lost: {}", e),
                    Err(_) => warn!("no shutdown_reply within {:?}", self.shutdown_timeout),
                }
            }
            Err(e) => warn!("failed to send shutdown_request: {}", e),
        }

        if let Some(process) = &self.process {
            match process.wait_for_exit(self.shutdown_timeout).await {
                Some(state) => info!(%state, "kernel process exited"),
                None => {
                    warn!("kernel still running after shutdown request, killing it");
                    let state = process.kill().await;
                    info!(%state, "kernel process killed");
                }
            }
        }

        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.stop();
        }
        self.session.close().await;

        if let Some(path) = &self.connection_file {
            std::fs::remove_file(path)?;
            debug!(path = %path.display(), "removed connection file");
        }
        Ok(())
    }
}

impl Drop for JupyterConnector {
    fn drop(&mut self) {
        self.session.shutdown_token().cancel();
        if let Some(path) = &self.connection_file {
            if path.exists() {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

// Implement traits for the connector by delegating to sub-components
#[async_trait]
impl CodeExecutor for JupyterConnector {
    async fn submit_code(
        &self,
        code: &str,
        context: &InvocationContext,
    ) -> Result<(), KernelError> {
        self.execution.submit_code(code, context).await
    }
}

#[async_trait]
impl LanguageServices for JupyterConnector {
    async fn request_completions(
        &self,
        code: &str,
        position: LinePosition,
        context: &InvocationContext,
    ) -> Result<(), KernelError> {
        self.language
            .request_completions(code, position, context)
            .await
    }

    async fn request_hover_text(
        &self,
        code: &str,
        position: LinePosition,
        context: &InvocationContext,
    ) -> Result<(), KernelError> {
        self.language
            .request_hover_text(code, position, context)
            .await
    }

    async fn request_signature_help(
        &self,
        code: &str,
        position: LinePosition,
        context: &InvocationContext,
    ) -> Result<(), KernelError> {
        self.language
            .request_signature_help(code, position, context)
            .await
    }
}

#[async_trait]
impl KernelIntrospection for JupyterConnector {
    async fn request_kernel_info(&self, context: &InvocationContext) -> Result<(), KernelError> {
        self.introspection.request_kernel_info(context).await
    }

    async fn request_value_infos(&self, context: &InvocationContext) -> Result<(), KernelError> {
        self.introspection.request_value_infos(context).await
    }

    async fn request_value(
        &self,
        name: &str,
        mime_type: &str,
        context: &InvocationContext,
    ) -> Result<(), KernelError> {
        self.introspection
            .request_value(name, mime_type, context)
            .await
    }
}

impl KernelConnector for JupyterConnector {}
