use crate::core::errors::KernelError;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::instrument;
use zeromq::{DealerSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqMessage};

/// Multipart frame transport - pure byte plumbing, no protocol knowledge
///
/// One transport is owned by exactly one channel task; the task is the only
/// caller of `send_frames`/`recv_frames`, so implementations need not be `Sync`.
#[async_trait]
pub trait FrameTransport: Send + 'static {
    /// Send one complete multipart message
    async fn send_frames(&mut self, frames: Vec<Bytes>) -> Result<(), KernelError>;

    /// Receive the next complete multipart message
    ///
    /// Returns `KernelError::ChannelClosed` once the peer is gone for good.
    async fn recv_frames(&mut self) -> Result<Vec<Bytes>, KernelError>;

    /// Endpoint description for logging
    fn endpoint(&self) -> &str;
}

fn to_zmq_message(frames: Vec<Bytes>) -> Result<ZmqMessage, KernelError> {
    let mut frames = frames.into_iter();
    let first = frames
        .next()
        .ok_or_else(|| KernelError::MalformedMessage("cannot send an empty message".to_string()))?;

    let mut message = ZmqMessage::from(first);
    for frame in frames {
        message.push_back(frame);
    }
    Ok(message)
}

/// DEALER socket transport used for shell, control and stdin
pub struct DealerTransport {
    socket: DealerSocket,
    endpoint: String,
}

impl DealerTransport {
    /// Connect a DEALER socket to `endpoint` (e.g. `tcp://127.0.0.1:5555`)
    #[instrument]
    pub async fn connect(endpoint: &str) -> Result<Self, KernelError> {
        let mut socket = DealerSocket::new();
        socket.connect(endpoint).await?;
        Ok(Self {
            socket,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl FrameTransport for DealerTransport {
    async fn send_frames(&mut self, frames: Vec<Bytes>) -> Result<(), KernelError> {
        let message = to_zmq_message(frames)?;
        self.socket.send(message).await?;
        Ok(())
    }

    async fn recv_frames(&mut self) -> Result<Vec<Bytes>, KernelError> {
        let message = self.socket.recv().await?;
        Ok(message.into_vec())
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// SUB socket transport used for iopub; subscribed to every topic
pub struct SubscriberTransport {
    socket: SubSocket,
    endpoint: String,
}

impl SubscriberTransport {
    #[instrument]
    pub async fn connect(endpoint: &str) -> Result<Self, KernelError> {
        let mut socket = SubSocket::new();
        socket.connect(endpoint).await?;
        socket.subscribe("").await?;
        Ok(Self {
            socket,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl FrameTransport for SubscriberTransport {
    async fn send_frames(&mut self, _frames: Vec<Bytes>) -> Result<(), KernelError> {
        Err(KernelError::Other(format!(
            "{} is a receive-only subscriber endpoint",
            self.endpoint
        )))
    }

    async fn recv_frames(&mut self) -> Result<Vec<Bytes>, KernelError> {
        let message = self.socket.recv().await?;
        Ok(message.into_vec())
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// In-process transport: two connected ends exchanging whole messages
///
/// Used to embed a kernel that lives in the same process and to script a
/// kernel in tests without sockets.
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<Vec<Bytes>>,
    rx: mpsc::UnboundedReceiver<Vec<Bytes>>,
    endpoint: String,
}

impl MemoryTransport {
    /// Create both ends of an in-process connection
    pub fn pair(name: &str) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: a_tx,
                rx: a_rx,
                endpoint: format!("memory://{}/client", name),
            },
            Self {
                tx: b_tx,
                rx: b_rx,
                endpoint: format!("memory://{}/kernel", name),
            },
        )
    }
}

#[async_trait]
impl FrameTransport for MemoryTransport {
    async fn send_frames(&mut self, frames: Vec<Bytes>) -> Result<(), KernelError> {
        self.tx
            .send(frames)
            .map_err(|_| KernelError::ChannelClosed(self.endpoint.clone()))
    }

    async fn recv_frames(&mut self) -> Result<Vec<Bytes>, KernelError> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| KernelError::ChannelClosed(self.endpoint.clone()))
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
