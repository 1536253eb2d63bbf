use crate::core::errors::KernelError;
use crate::core::wire::codec::WireCodec;
use crate::core::wire::transport::FrameTransport;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

/// Logical Jupyter channels; each is carried by its own socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Shell,
    Control,
    #[serde(rename = "iopub")]
    IoPub,
    Stdin,
}

impl Channel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Shell => "shell",
            Self::Control => "control",
            Self::IoPub => "iopub",
            Self::Stdin => "stdin",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination for decoded inbound messages
pub trait Inbound<M>: Send + Sync + 'static {
    fn deliver(&self, message: M);
}

impl<M: Clone + Send + 'static> Inbound<M> for broadcast::Sender<M> {
    fn deliver(&self, message: M) {
        // no receivers just means nobody is waiting right now
        let _ = self.send(message);
    }
}

struct Outbound {
    frames: Vec<Bytes>,
    ack: oneshot::Sender<Result<(), KernelError>>,
}

/// One socket endpoint plus the task that drives it
///
/// The task owns the transport: it writes queued outbound messages and reads
/// inbound frames, decoding them into an `Inbound` sink. Sends from
/// any number of callers are serialized by `send_lock`, held for one complete
/// frame sequence.
pub struct SocketChannel<C: WireCodec> {
    channel: Channel,
    endpoint: String,
    codec: Arc<C>,
    outbound: mpsc::Sender<Outbound>,
    send_lock: Mutex<()>,
    closed: CancellationToken,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<C: WireCodec> SocketChannel<C> {
    /// Start the channel task for `transport`
    ///
    /// # Arguments
    /// * `channel` - Logical channel carried by this socket
    /// * `transport` - Connected transport, moved into the task
    /// * `codec` - Shared codec (and therefore shared signer)
    /// * `inbound` - Receives every decoded message
    /// * `shutdown` - Connection-wide token that stops the loop
    pub fn spawn<T: FrameTransport, I: Inbound<C::Message>>(
        channel: Channel,
        transport: T,
        codec: Arc<C>,
        inbound: I,
        shutdown: CancellationToken,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let closed = CancellationToken::new();
        let endpoint = transport.endpoint().to_string();

        let task = tokio::spawn(run_channel(
            channel,
            transport,
            codec.clone(),
            inbound,
            outbound_rx,
            shutdown,
            closed.clone(),
        ));

        Self {
            channel,
            endpoint,
            codec,
            outbound: outbound_tx,
            send_lock: Mutex::new(()),
            closed,
            task: std::sync::Mutex::new(Some(task)),
        }
    }

    /// Encode and send one message, waiting until the transport accepted it
    #[instrument(skip(self, message), fields(channel = %self.channel))]
    pub async fn send(&self, message: &C::Message) -> Result<(), KernelError> {
        let _guard = self.send_lock.lock().await;

        if self.closed.is_cancelled() {
            return Err(KernelError::ChannelClosed(self.endpoint.clone()));
        }

        let frames = self.codec.encode_message(message)?;
        let (ack_tx, ack_rx) = oneshot::channel();
        self.outbound
            .send(Outbound {
                frames,
                ack: ack_tx,
            })
            .await
            .map_err(|_| KernelError::ChannelClosed(self.endpoint.clone()))?;

        ack_rx
            .await
            .map_err(|_| KernelError::ChannelClosed(self.endpoint.clone()))?
    }

    pub const fn channel(&self) -> Channel {
        self.channel
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// True once the read loop has stopped
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Wait for the channel task to finish
    ///
    /// Only the first caller observes the task; later calls return at once.
    pub async fn join(&self) {
        let handle = self
            .task
            .lock()
            .ok()
            .and_then(|mut task| task.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(channel = %self.channel, "channel task ended abnormally: {}", e);
            }
        }
    }
}

async fn run_channel<T: FrameTransport, C: WireCodec, I: Inbound<C::Message>>(
    channel: Channel,
    mut transport: T,
    codec: Arc<C>,
    inbound: I,
    mut outbound: mpsc::Receiver<Outbound>,
    shutdown: CancellationToken,
    closed: CancellationToken,
) {
    debug!(channel = %channel, endpoint = %transport.endpoint(), "channel loop started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(message) = outbound.recv() => {
                let result = transport.send_frames(message.frames).await;
                if let Err(e) = &result {
                    warn!(channel = %channel, "send failed: {}", e);
                }
                let _ = message.ack.send(result);
            }
            received = transport.recv_frames() => match received {
                Ok(frames) => match codec.decode_message(channel, frames) {
                    Ok(Some(message)) => inbound.deliver(message),
                    Ok(None) => {}
                    Err(e) => warn!(channel = %channel, "dropping message: {}", e),
                },
                Err(KernelError::ChannelClosed(endpoint)) => {
                    debug!(channel = %channel, "peer closed {}", endpoint);
                    break;
                }
                Err(e) => {
                    error!(channel = %channel, "receive failed, stopping channel: {}", e);
                    break;
                }
            }
        }
    }

    closed.cancel();
    debug!(channel = %channel, "channel loop stopped");
}
