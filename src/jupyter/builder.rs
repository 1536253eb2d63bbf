use crate::core::config::EngineConfig;
use crate::core::connection::{
    runtime_dir, ConnectionDescriptor, HeartbeatMonitor, KernelProcess, KernelSpec, ProcessState,
};
use crate::core::errors::KernelError;
use crate::core::wire::{Channel, DealerTransport, FrameTransport, HmacSigner, SubscriberTransport};
use crate::jupyter::codec::JupyterCodec;
use crate::jupyter::connector::JupyterConnector;
use crate::jupyter::message::JupyterMessage;
use crate::jupyter::session::{ChannelTransports, KernelSession};
use crate::jupyter::types::{KernelInfoReply, KernelInfoRequest, MessageContent};
use secrecy::ExposeSecret;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Launches a kernel process and connects a `JupyterConnector` to it
///
/// # Example
/// ```rust,no_run
/// use jupyter_bridge::core::config::EngineConfig;
/// use jupyter_bridge::core::connection::KernelSpec;
/// use jupyter_bridge::jupyter::JupyterKernelBuilder;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let spec = KernelSpec::new(
///     ["python3", "-m", "ipykernel_launcher", "-f", "{connection_file}"]
///         .map(String::from)
///         .to_vec(),
/// );
/// let connector = JupyterKernelBuilder::new(spec)
///     .with_config(EngineConfig::from_env("JUPYTER_BRIDGE")?)
///     .with_kernel_name("python3")
///     .launch()
///     .await?;
/// connector.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct JupyterKernelBuilder {
    spec: KernelSpec,
    config: EngineConfig,
    kernel_name: Option<String>,
}

impl JupyterKernelBuilder {
    pub fn new(spec: KernelSpec) -> Self {
        Self {
            spec,
            config: EngineConfig::default(),
            kernel_name: None,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_kernel_name(mut self, name: impl Into<String>) -> Self {
        self.kernel_name = Some(name.into());
        self
    }

    /// Write the connection file, start the kernel and wait until it answers
    ///
    /// On failure everything created so far is torn down: the process is
    /// killed and the connection file removed.
    #[instrument(skip(self), fields(kernel = ?self.kernel_name))]
    pub async fn launch(self) -> Result<JupyterConnector, KernelError> {
        self.config.validate()?;

        let dir = runtime_dir(&self.config)?;
        let descriptor = ConnectionDescriptor::generate(&self.config, self.kernel_name.clone())?;
        let connection_file = descriptor.write_to(&dir)?;

        match self.start(&descriptor, &connection_file).await {
            Ok(connector) => {
                info!(connection_file = %connection_file.display(), "kernel ready");
                Ok(connector)
            }
            Err(e) => {
                if let Err(remove) = std::fs::remove_file(&connection_file) {
                    warn!("failed to remove connection file: {}", remove);
                }
                Err(e)
            }
        }
    }

    async fn start(
        &self,
        descriptor: &ConnectionDescriptor,
        connection_file: &Path,
    ) -> Result<JupyterConnector, KernelError> {
        let codec = create_codec(
            descriptor.key.expose_secret(),
            &descriptor.signature_scheme,
            self.config.verify_signatures,
        )?;

        let process = KernelProcess::spawn(
            &self.spec,
            connection_file,
            self.config.startup_grace_duration(),
        )
        .await?;

        let transports = tokio::time::timeout(
            self.config.startup_timeout_duration(),
            connect_transports(descriptor),
        )
        .await
        .map_err(|_| KernelError::KernelStart("kernel sockets did not accept connections".to_string()))?
        .map_err(|e| KernelError::KernelStart(format!("cannot connect to kernel: {}", e)))?;

        let shutdown = CancellationToken::new();
        let session = Arc::new(KernelSession::start(
            transports,
            codec,
            &self.config,
            shutdown.clone(),
        ));

        let kernel_info = match wait_until_ready(&session, &self.config, Some(&process)).await {
            Ok(kernel_info) => kernel_info,
            Err(e) => {
                session.close().await;
                let state = process.kill().await;
                debug!(%state, "kernel stopped after failed startup");
                return Err(e);
            }
        };

        let mut connector = JupyterConnector::new(session, &self.config)
            .with_process(process, connection_file.to_path_buf());
        if let Some(interval) = self.config.heartbeat_interval_duration() {
            connector = connector.with_heartbeat(HeartbeatMonitor::spawn(
                descriptor.heartbeat_endpoint(),
                interval,
                &shutdown,
            ));
        }
        connector.introspection.seed_kernel_info(kernel_info);
        Ok(connector)
    }
}

fn create_codec(key: &str, scheme: &str, verify: bool) -> Result<Arc<JupyterCodec>, KernelError> {
    let signer = HmacSigner::from_scheme_name(key, scheme)?;
    Ok(Arc::new(JupyterCodec::new(Arc::new(signer), verify)))
}

async fn connect_transports(
    descriptor: &ConnectionDescriptor,
) -> Result<
    ChannelTransports<DealerTransport, DealerTransport, DealerTransport, SubscriberTransport>,
    KernelError,
> {
    Ok(ChannelTransports {
        shell: DealerTransport::connect(&descriptor.shell_endpoint()).await?,
        control: DealerTransport::connect(&descriptor.control_endpoint()).await?,
        stdin: DealerTransport::connect(&descriptor.stdin_endpoint()).await?,
        iopub: SubscriberTransport::connect(&descriptor.iopub_endpoint()).await?,
    })
}

async fn process_exit(process: Option<&KernelProcess>) -> ProcessState {
    match process {
        Some(process) => {
            let mut state = process.subscribe();
            state
                .wait_for(|s| *s != ProcessState::Running)
                .await
                .map(|s| *s)
                .unwrap_or(ProcessState::Exited(None))
        }
        None => std::future::pending().await,
    }
}

/// Resend `kernel_info_request` until one is answered
///
/// Requests sent before the kernel binds its sockets are dropped silently,
/// so any reply to any attempt counts.
async fn wait_until_ready(
    session: &KernelSession,
    config: &EngineConfig,
    process: Option<&KernelProcess>,
) -> Result<KernelInfoReply, KernelError> {
    let mut hub = session.subscribe();
    let mut attempts: HashSet<String> = HashSet::new();
    let mut retry = tokio::time::interval(config.kernel_info_retry_duration());
    let deadline = tokio::time::sleep(config.startup_timeout_duration());
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                return Err(KernelError::KernelStart(format!(
                    "no kernel_info_reply after {} attempts within {:?}",
                    attempts.len(),
                    config.startup_timeout_duration()
                )));
            }
            state = process_exit(process) => {
                return Err(KernelError::KernelStart(format!(
                    "kernel {} before it became ready",
                    state
                )));
            }
            _ = retry.tick() => {
                let request: JupyterMessage = session.message(Channel::Shell, &KernelInfoRequest {})?;
                attempts.insert(request.msg_id().to_string());
                session.send(&request).await?;
                debug!(attempt = attempts.len(), "kernel_info_request sent");
            }
            received = hub.recv() => match received {
                Ok(message)
                    if message.msg_type() == KernelInfoReply::MSG_TYPE
                        && message.parent_id().is_some_and(|id| attempts.contains(id)) =>
                {
                    return message.content_as();
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("readiness wait lagged, {} messages skipped", skipped);
                }
                Err(RecvError::Closed) => {
                    return Err(KernelError::KernelStart("kernel connection closed".to_string()));
                }
            },
        }
    }
}

/// Launch a kernel from `spec` with `config`
pub async fn build_connector(
    spec: KernelSpec,
    config: EngineConfig,
) -> Result<JupyterConnector, KernelError> {
    JupyterKernelBuilder::new(spec).with_config(config).launch().await
}

/// Connect to a kernel reachable over already-open transports
///
/// No process is started and no readiness handshake is performed; this is
/// how an in-process kernel is driven through `MemoryTransport`.
pub fn build_connector_with_transports<S, C, I, P>(
    transports: ChannelTransports<S, C, I, P>,
    key: &str,
    config: EngineConfig,
) -> Result<JupyterConnector, KernelError>
where
    S: FrameTransport,
    C: FrameTransport,
    I: FrameTransport,
    P: FrameTransport,
{
    config.validate()?;
    let codec = create_codec(key, &config.signature_scheme, config.verify_signatures)?;
    let session = Arc::new(KernelSession::start(
        transports,
        codec,
        &config,
        CancellationToken::new(),
    ));
    Ok(JupyterConnector::new(session, &config))
}

/// Wait for a `kernel_info_reply` on an existing connector
///
/// Used after `build_connector_with_transports` when the kernel may not be
/// listening yet. The reply is cached on the connector.
pub async fn wait_for_kernel(
    connector: &JupyterConnector,
    config: &EngineConfig,
) -> Result<KernelInfoReply, KernelError> {
    let info = wait_until_ready(connector.session(), config, None).await?;
    connector.introspection.seed_kernel_info(info.clone());
    Ok(info)
}
