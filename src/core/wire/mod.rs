/// Wire layer - multipart framing, signing and per-socket channel tasks
///
/// This module knows how to move signed multipart messages over a socket. It
/// contains no Jupyter message semantics beyond the channel names; the
/// protocol codec plugs in through `WireCodec`.
///
/// # Architecture
///
/// ## Transport
/// - `FrameTransport`: send/receive whole multipart messages
/// - `DealerTransport`: ZeroMQ DEALER socket (shell, control, stdin)
/// - `SubscriberTransport`: ZeroMQ SUB socket (iopub)
/// - `MemoryTransport`: in-process pair for embedded kernels and tests
///
/// ## Authentication
/// - `Signer`: pluggable message authentication
/// - `HmacSigner`: HMAC-SHA256 / HMAC-SHA512 keyed from the connection file
///
/// ## Channels
/// - `WireCodec`: frame <-> message conversion
/// - `Inbound`: where decoded messages go (a broadcast hub, or a router)
/// - `SocketChannel`: one task per socket, exclusive sends, decoded messages
///   handed to its `Inbound` sink
///
/// # Example
/// ```rust,no_run
/// use jupyter_bridge::core::wire::*;
/// use jupyter_bridge::jupyter::codec::JupyterCodec;
/// use std::sync::Arc;
/// use tokio::sync::broadcast;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let signer = Arc::new(HmacSigner::new("secret", SignatureScheme::HmacSha256)?);
/// let codec = Arc::new(JupyterCodec::new(signer, true));
/// let (hub, _rx) = broadcast::channel(1024);
///
/// let transport = DealerTransport::connect("tcp://127.0.0.1:5555").await?;
/// let shell = SocketChannel::spawn(
///     Channel::Shell,
///     transport,
///     codec,
///     hub,
///     CancellationToken::new(),
/// );
/// assert!(!shell.is_closed());
/// # Ok(())
/// # }
/// ```
pub mod channel;
pub mod codec;
pub mod signer;
pub mod transport;

pub use channel::{Channel, Inbound, SocketChannel};
pub use codec::WireCodec;
pub use signer::{HmacSigner, SignatureScheme, Signer};
pub use transport::{DealerTransport, FrameTransport, MemoryTransport, SubscriberTransport};
