use crate::core::errors::KernelError;
use crate::core::wire::{Channel, Signer, WireCodec};
use crate::jupyter::message::{Header, JupyterMessage, DELIMITER};
use bytes::Bytes;
use serde_json::{Map, Value};
use std::sync::Arc;

const EMPTY_OBJECT: &[u8] = b"{}";

/// Frames after the delimiter: signature, header, parent, metadata, content
const SIGNED_FRAME_COUNT: usize = 5;

/// Codec for the Jupyter multipart wire format
///
/// ```text
/// identifiers..., <IDS|MSG>, signature, header, parent_header, metadata, content, buffers...
/// ```
pub struct JupyterCodec {
    signer: Arc<dyn Signer>,
    verify: bool,
}

impl JupyterCodec {
    /// Create a codec
    ///
    /// # Arguments
    /// * `signer` - Shared signer keyed from the connection descriptor
    /// * `verify` - Whether inbound signatures are checked
    pub fn new(signer: Arc<dyn Signer>, verify: bool) -> Self {
        Self { signer, verify }
    }

    pub fn signer(&self) -> &Arc<dyn Signer> {
        &self.signer
    }
}

fn utf8_frame<'a>(frames: &'a [Bytes], index: usize, name: &str) -> Result<&'a str, KernelError> {
    std::str::from_utf8(&frames[index])
        .map_err(|e| KernelError::MalformedMessage(format!("{} frame is not UTF-8: {}", name, e)))
}

fn decode_parent(frame: &[u8]) -> Result<Option<Header>, KernelError> {
    let value: Value = serde_json::from_slice(frame)
        .map_err(|e| KernelError::MalformedMessage(format!("invalid parent header: {}", e)))?;

    match value {
        Value::Object(map) if map.is_empty() => Ok(None),
        Value::Null => Ok(None),
        other => serde_json::from_value(other)
            .map(Some)
            .map_err(|e| KernelError::MalformedMessage(format!("invalid parent header: {}", e))),
    }
}

impl WireCodec for JupyterCodec {
    type Message = JupyterMessage;

    fn encode_message(&self, message: &JupyterMessage) -> Result<Vec<Bytes>, KernelError> {
        let header = serde_json::to_vec(&message.header)?;
        let parent = match &message.parent_header {
            Some(parent) => serde_json::to_vec(parent)?,
            None => EMPTY_OBJECT.to_vec(),
        };
        let metadata = serde_json::to_vec(&message.metadata)?;
        let content = serde_json::to_vec(&message.content)?;

        let signature = self
            .signer
            .sign(&[&header[..], &parent[..], &metadata[..], &content[..]])?;

        let mut frames =
            Vec::with_capacity(message.identifiers.len() + 1 + SIGNED_FRAME_COUNT + message.buffers.len());
        frames.extend(message.identifiers.iter().cloned());
        frames.push(Bytes::from_static(DELIMITER));
        frames.push(Bytes::from(signature));
        frames.push(Bytes::from(header));
        frames.push(Bytes::from(parent));
        frames.push(Bytes::from(metadata));
        frames.push(Bytes::from(content));
        frames.extend(message.buffers.iter().cloned());

        Ok(frames)
    }

    fn decode_message(
        &self,
        channel: Channel,
        frames: Vec<Bytes>,
    ) -> Result<Option<JupyterMessage>, KernelError> {
        let delimiter = frames
            .iter()
            .position(|frame| frame.as_ref() == DELIMITER)
            .ok_or_else(|| KernelError::MalformedMessage("delimiter frame not found".to_string()))?;

        let available = frames.len() - delimiter - 1;
        if available < SIGNED_FRAME_COUNT {
            return Err(KernelError::MalformedMessage(format!(
                "expected {} frames after delimiter, got {}",
                SIGNED_FRAME_COUNT, available
            )));
        }

        let signature = utf8_frame(&frames, delimiter + 1, "signature")?;
        let header_frame = &frames[delimiter + 2];
        let parent_frame = &frames[delimiter + 3];
        let metadata_frame = &frames[delimiter + 4];
        let content_frame = &frames[delimiter + 5];

        let header: Header = serde_json::from_slice(header_frame)
            .map_err(|e| KernelError::MalformedMessage(format!("invalid header: {}", e)))?;

        if self.verify
            && self.signer.is_enabled()
            && !self.signer.verify(
                signature,
                &[
                    header_frame.as_ref(),
                    parent_frame.as_ref(),
                    metadata_frame.as_ref(),
                    content_frame.as_ref(),
                ],
            )?
        {
            return Err(KernelError::SignatureMismatch {
                msg_type: header.msg_type,
            });
        }

        let parent_header = decode_parent(parent_frame)?;
        let metadata: Map<String, Value> = serde_json::from_slice(metadata_frame)
            .map_err(|e| KernelError::MalformedMessage(format!("invalid metadata: {}", e)))?;
        let content: Value = serde_json::from_slice(content_frame)
            .map_err(|e| KernelError::MalformedMessage(format!("invalid content: {}", e)))?;

        let identifiers = frames[..delimiter].to_vec();
        let buffers = frames[delimiter + 1 + SIGNED_FRAME_COUNT..].to_vec();

        Ok(Some(JupyterMessage {
            identifiers,
            header,
            parent_header,
            metadata,
            content,
            buffers,
            channel,
        }))
    }
}
