use crate::core::errors::KernelError;
use crate::core::wire::Channel;
use crate::jupyter::types::{Content, MessageContent};
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

/// Wire protocol version stamped on every outbound header
pub const PROTOCOL_VERSION: &str = "5.3";

/// Frame separating routing identifiers from the signed message body
pub const DELIMITER: &[u8] = b"<IDS|MSG>";

/// Message header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub msg_id: String,
    #[serde(default)]
    pub session: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub date: String,
    pub msg_type: String,
    #[serde(default)]
    pub version: String,
}

impl Header {
    /// Fresh header with a random message id and the current UTC time
    pub fn new(msg_type: impl Into<String>, session: &str, username: &str) -> Self {
        Self {
            msg_id: uuid::Uuid::new_v4().to_string(),
            session: session.to_string(),
            username: username.to_string(),
            date: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            msg_type: msg_type.into(),
            version: PROTOCOL_VERSION.to_string(),
        }
    }
}

/// A complete Jupyter protocol message
#[derive(Debug, Clone)]
pub struct JupyterMessage {
    /// Routing frames preceding the delimiter, echoed back untouched
    pub identifiers: Vec<Bytes>,
    pub header: Header,
    /// `None` is encoded as `{}`
    pub parent_header: Option<Header>,
    pub metadata: Map<String, Value>,
    pub content: Value,
    pub buffers: Vec<Bytes>,
    pub channel: Channel,
}

impl JupyterMessage {
    pub fn new(channel: Channel, header: Header, content: Value) -> Self {
        Self {
            identifiers: Vec::new(),
            header,
            parent_header: None,
            metadata: Map::new(),
            content,
            buffers: Vec::new(),
            channel,
        }
    }

    /// Build a message from typed content, taking `msg_type` from the content type
    pub fn from_content<T: MessageContent>(
        channel: Channel,
        content: &T,
        session: &str,
        username: &str,
    ) -> Result<Self, KernelError> {
        let header = Header::new(T::MSG_TYPE, session, username);
        Ok(Self::new(channel, header, serde_json::to_value(content)?))
    }

    /// Attach the header of the message this one responds to
    pub fn with_parent(mut self, parent: Header) -> Self {
        self.parent_header = Some(parent);
        self
    }

    pub fn with_identifiers(mut self, identifiers: Vec<Bytes>) -> Self {
        self.identifiers = identifiers;
        self
    }

    pub fn msg_id(&self) -> &str {
        &self.header.msg_id
    }

    pub fn msg_type(&self) -> &str {
        &self.header.msg_type
    }

    /// Correlation id: the `msg_id` of the request this message answers
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_header.as_ref().map(|p| p.msg_id.as_str())
    }

    pub fn is_child_of(&self, msg_id: &str) -> bool {
        self.parent_id() == Some(msg_id)
    }

    /// Deserialize the content as a specific type, ignoring `msg_type`
    pub fn content_as<T: DeserializeOwned>(&self) -> Result<T, KernelError> {
        serde_json::from_value(self.content.clone()).map_err(|e| {
            KernelError::MalformedMessage(format!(
                "invalid {} content: {}",
                self.header.msg_type, e
            ))
        })
    }

    /// Interpret the content according to `msg_type`
    pub fn typed_content(&self) -> Result<Content, KernelError> {
        Content::decode(&self.header.msg_type, self.content.clone())
    }
}
