use thiserror::Error;

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    TransportError(#[from] zeromq::ZmqError),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Signature mismatch on {msg_type} message")]
    SignatureMismatch { msg_type: String },

    #[error("Signing error: {0}")]
    SigningError(String),

    #[error("Kernel launch failed: {0}")]
    KernelLaunch(String),

    #[error("Kernel did not become ready: {0}")]
    KernelStart(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Command not implemented by this kernel: {0}")]
    NotImplemented(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::core::config::ConfigError),

    #[error("Other error: {0}")]
    Other(String),
}
