pub mod builder;
pub mod codec;
pub mod connector;
pub mod conversions;
pub mod correlation;
pub mod message;
pub mod session;
pub mod types;

// Re-export main types for easier importing
pub use builder::{
    build_connector, build_connector_with_transports, wait_for_kernel, JupyterKernelBuilder,
};
pub use codec::JupyterCodec;
pub use connector::{Execution, Introspection, JupyterConnector, Language, CANCELLED_MESSAGE};
pub use correlation::{ReplyOutcome, ReplyRouter, ReplyStream};
pub use message::{Header, JupyterMessage, DELIMITER, PROTOCOL_VERSION};
pub use session::{ChannelTransports, KernelSession};
pub use types::{Content, KernelInfoReply, MessageContent, Request};
