use crate::core::errors::KernelError;
use crate::core::wire::channel::Channel;
use bytes::Bytes;

/// Codec trait for converting between multipart frames and typed messages
///
/// This trait defines the contract a socket channel relies on: it never looks
/// inside frames itself, it only hands them to the codec.
pub trait WireCodec: Send + Sync + 'static {
    /// The message type produced and consumed by this codec
    type Message: Clone + Send + Sync + 'static;

    /// Encode a message into frames ready for the transport
    ///
    /// Encoding includes computing the signature frame.
    fn encode_message(&self, message: &Self::Message) -> Result<Vec<Bytes>, KernelError>;

    /// Decode frames received on `channel`
    ///
    /// # Returns
    /// - `Ok(Some(message))` - Successfully decoded message
    /// - `Ok(None)` - Frames were ignored by the codec
    /// - `Err(error)` - Malformed frames or failed verification
    fn decode_message(
        &self,
        channel: Channel,
        frames: Vec<Bytes>,
    ) -> Result<Option<Self::Message>, KernelError>;
}
