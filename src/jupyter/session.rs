use crate::core::config::EngineConfig;
use crate::core::errors::KernelError;
use crate::core::wire::{Channel, FrameTransport, SocketChannel};
use crate::jupyter::codec::JupyterCodec;
use crate::jupyter::correlation::{ReplyRouter, ReplyStream};
use crate::jupyter::message::JupyterMessage;
use crate::jupyter::types::{InputReply, MessageContent, Request};
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Transports for the four message channels of one kernel
pub struct ChannelTransports<S, C, I, P> {
    pub shell: S,
    pub control: C,
    pub stdin: I,
    pub iopub: P,
}

/// A connected client session: one channel task per socket and a shared router
///
/// Every decoded message from every channel goes through the router; requests
/// register before sending and receive only their own children.
pub struct KernelSession {
    session_id: String,
    username: String,
    shell: SocketChannel<JupyterCodec>,
    control: SocketChannel<JupyterCodec>,
    stdin: SocketChannel<JupyterCodec>,
    iopub: SocketChannel<JupyterCodec>,
    router: ReplyRouter,
    shutdown: CancellationToken,
}

impl KernelSession {
    /// Spawn the channel tasks over already-connected transports
    pub fn start<S, C, I, P>(
        transports: ChannelTransports<S, C, I, P>,
        codec: Arc<JupyterCodec>,
        config: &EngineConfig,
        shutdown: CancellationToken,
    ) -> Self
    where
        S: FrameTransport,
        C: FrameTransport,
        I: FrameTransport,
        P: FrameTransport,
    {
        let router = ReplyRouter::new(config.channel_capacity);
        let session_id = uuid::Uuid::new_v4().to_string();

        let shell = SocketChannel::spawn(
            Channel::Shell,
            transports.shell,
            codec.clone(),
            router.clone(),
            shutdown.clone(),
        );
        let control = SocketChannel::spawn(
            Channel::Control,
            transports.control,
            codec.clone(),
            router.clone(),
            shutdown.clone(),
        );
        let stdin = SocketChannel::spawn(
            Channel::Stdin,
            transports.stdin,
            codec.clone(),
            router.clone(),
            shutdown.clone(),
        );
        let iopub = SocketChannel::spawn(
            Channel::IoPub,
            transports.iopub,
            codec,
            router.clone(),
            shutdown.clone(),
        );

        debug!(session = %session_id, "kernel session started");

        Self {
            session_id,
            username: config.username.clone(),
            shell,
            control,
            stdin,
            iopub,
            router,
            shutdown,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Connection-wide token; cancelling it stops every channel and wait
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Listen to every message from every channel
    ///
    /// The broadcast is bounded by `channel_capacity`; slow listeners lag.
    pub fn subscribe(&self) -> broadcast::Receiver<JupyterMessage> {
        self.router.subscribe()
    }

    /// Requests still waiting for replies
    pub fn pending_requests(&self) -> usize {
        self.router.pending()
    }

    fn socket(&self, channel: Channel) -> &SocketChannel<JupyterCodec> {
        match channel {
            Channel::Shell => &self.shell,
            Channel::Control => &self.control,
            Channel::Stdin => &self.stdin,
            Channel::IoPub => &self.iopub,
        }
    }

    /// Build a message for this session
    pub fn message<T: MessageContent>(
        &self,
        channel: Channel,
        content: &T,
    ) -> Result<JupyterMessage, KernelError> {
        JupyterMessage::from_content(channel, content, &self.session_id, &self.username)
    }

    /// Send a message on the channel it is tagged with
    pub async fn send(&self, message: &JupyterMessage) -> Result<(), KernelError> {
        if message.channel == Channel::IoPub {
            return Err(KernelError::Other(
                "iopub is receive-only; cannot send on it".to_string(),
            ));
        }
        if self.is_closed() {
            return Err(KernelError::ChannelClosed(format!(
                "session {} is shut down",
                self.session_id
            )));
        }
        self.socket(message.channel).send(message).await
    }

    /// Send a request and return the stream of messages it caused
    #[instrument(skip(self, content), fields(session = %self.session_id, msg_type = T::MSG_TYPE))]
    pub async fn send_request<T: Request>(&self, content: &T) -> Result<ReplyStream, KernelError> {
        let message = self.message(T::CHANNEL, content)?;
        let replies = self
            .router
            .register(message.msg_id(), self.shutdown.clone());
        self.send(&message).await?;
        debug!(msg_id = %message.msg_id(), channel = %T::CHANNEL, "request sent");
        Ok(replies)
    }

    /// Answer an `input_request` on stdin
    #[instrument(skip(self, request, value), fields(session = %self.session_id))]
    pub async fn reply_input(
        &self,
        request: &JupyterMessage,
        value: String,
    ) -> Result<(), KernelError> {
        let reply = self
            .message(Channel::Stdin, &InputReply { value })?
            .with_parent(request.header.clone())
            .with_identifiers(request.identifiers.clone());
        self.send(&reply).await
    }

    /// Stop every channel task and wait for them to finish
    pub async fn close(&self) {
        self.shutdown.cancel();
        join_all([
            self.shell.join(),
            self.control.join(),
            self.stdin.join(),
            self.iopub.join(),
        ])
        .await;
        debug!(session = %self.session_id, "kernel session closed");
    }

    /// Channels whose read loop has stopped
    pub fn closed_channels(&self) -> Vec<Channel> {
        [&self.shell, &self.control, &self.stdin, &self.iopub]
            .into_iter()
            .filter(|socket| socket.is_closed())
            .map(|socket| socket.channel())
            .collect()
    }
}
