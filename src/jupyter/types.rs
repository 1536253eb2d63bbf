use crate::core::errors::KernelError;
use crate::core::wire::Channel;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

pub const STATUS_OK: &str = "ok";
pub const STATUS_ERROR: &str = "error";
pub const STATUS_ABORTED: &str = "aborted";

pub const EXECUTION_STATE_IDLE: &str = "idle";
pub const EXECUTION_STATE_BUSY: &str = "busy";

pub const STREAM_STDOUT: &str = "stdout";
pub const STREAM_STDERR: &str = "stderr";

/// Typed content of one `msg_type`
pub trait MessageContent: Serialize + DeserializeOwned + Send + Sync {
    const MSG_TYPE: &'static str;

    fn into_content(self) -> Content;
}

/// Content the client sends and the channel it travels on
pub trait Request: MessageContent {
    const CHANNEL: Channel;

    /// `msg_type` of the matching reply
    const REPLY_TYPE: &'static str;
}

fn ok_status() -> String {
    STATUS_OK.to_string()
}

fn request_kind() -> String {
    "request".to_string()
}

/// Best human-readable description of a non-ok reply
fn failure_message(status: &str, ename: Option<&str>, evalue: Option<&str>) -> String {
    match (evalue, ename) {
        (Some(evalue), _) if !evalue.is_empty() => evalue.to_string(),
        (_, Some(ename)) if !ename.is_empty() => ename.to_string(),
        _ => format!("kernel replied with status '{}'", status),
    }
}

// Requests

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
    pub silent: bool,
    pub store_history: bool,
    #[serde(default)]
    pub user_expressions: Map<String, Value>,
    pub allow_stdin: bool,
    pub stop_on_error: bool,
}

impl ExecuteRequest {
    pub fn new(code: impl Into<String>, allow_stdin: bool) -> Self {
        Self {
            code: code.into(),
            silent: false,
            store_history: true,
            user_expressions: Map::new(),
            allow_stdin,
            stop_on_error: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub code: String,
    pub cursor_pos: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectRequest {
    pub code: String,
    pub cursor_pos: usize,
    pub detail_level: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelInfoRequest {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptRequest {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownRequest {
    pub restart: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputReply {
    pub value: String,
}

/// Debug adapter request tunnelled over the control channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugRequest {
    pub seq: u64,
    #[serde(rename = "type", default = "request_kind")]
    pub kind: String,
    pub command: String,
    #[serde(default)]
    pub arguments: Value,
}

impl DebugRequest {
    pub fn new(seq: u64, command: impl Into<String>) -> Self {
        Self {
            seq,
            kind: request_kind(),
            command: command.into(),
            arguments: Value::Object(Map::new()),
        }
    }

    #[must_use]
    pub fn with_arguments(mut self, arguments: Value) -> Self {
        self.arguments = arguments;
        self
    }
}

// Replies

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteReply {
    #[serde(default = "ok_status")]
    pub status: String,
    #[serde(default)]
    pub execution_count: Option<u64>,
    #[serde(default)]
    pub ename: Option<String>,
    #[serde(default)]
    pub evalue: Option<String>,
    #[serde(default)]
    pub traceback: Vec<String>,
}

impl ExecuteReply {
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    pub fn failure_message(&self) -> String {
        failure_message(&self.status, self.ename.as_deref(), self.evalue.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteReply {
    #[serde(default = "ok_status")]
    pub status: String,
    #[serde(default)]
    pub matches: Vec<String>,
    #[serde(default)]
    pub cursor_start: usize,
    #[serde(default)]
    pub cursor_end: usize,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub ename: Option<String>,
    #[serde(default)]
    pub evalue: Option<String>,
}

impl CompleteReply {
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    pub fn failure_message(&self) -> String {
        failure_message(&self.status, self.ename.as_deref(), self.evalue.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectReply {
    #[serde(default = "ok_status")]
    pub status: String,
    #[serde(default)]
    pub found: bool,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub ename: Option<String>,
    #[serde(default)]
    pub evalue: Option<String>,
}

impl InspectReply {
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    pub fn failure_message(&self) -> String {
        failure_message(&self.status, self.ename.as_deref(), self.evalue.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub file_extension: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelInfoReply {
    #[serde(default = "ok_status")]
    pub status: String,
    #[serde(default)]
    pub protocol_version: String,
    #[serde(default)]
    pub implementation: String,
    #[serde(default)]
    pub implementation_version: String,
    #[serde(default)]
    pub language_info: LanguageInfo,
    #[serde(default)]
    pub banner: String,
    /// Whether the kernel answers `debug_request` on control
    #[serde(default)]
    pub debugger: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptReply {
    #[serde(default = "ok_status")]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReply {
    #[serde(default = "ok_status")]
    pub status: String,
    #[serde(default)]
    pub restart: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugReply {
    #[serde(default)]
    pub seq: u64,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub request_seq: u64,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub body: Value,
}

// IOPub and stdin traffic

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub execution_state: String,
}

impl Status {
    pub fn is_idle(&self) -> bool {
        self.execution_state == EXECUTION_STATE_IDLE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    pub name: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayData {
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub transient: Map<String, Value>,
}

impl DisplayData {
    pub fn display_id(&self) -> Option<String> {
        self.transient
            .get("display_id")
            .and_then(|id| id.as_str())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateDisplayData {
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub transient: Map<String, Value>,
}

impl UpdateDisplayData {
    pub fn display_id(&self) -> Option<String> {
        self.transient
            .get("display_id")
            .and_then(|id| id.as_str())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    #[serde(default)]
    pub execution_count: Option<u64>,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteInput {
    pub code: String,
    #[serde(default)]
    pub execution_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContent {
    #[serde(default)]
    pub ename: String,
    #[serde(default)]
    pub evalue: String,
    #[serde(default)]
    pub traceback: Vec<String>,
}

impl ErrorContent {
    pub fn failure_message(&self) -> String {
        failure_message(STATUS_ERROR, Some(&self.ename), Some(&self.evalue))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearOutput {
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub password: bool,
}

/// Message content as a tagged union over `msg_type`
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    ExecuteRequest(ExecuteRequest),
    ExecuteReply(ExecuteReply),
    CompleteRequest(CompleteRequest),
    CompleteReply(CompleteReply),
    InspectRequest(InspectRequest),
    InspectReply(InspectReply),
    KernelInfoRequest(KernelInfoRequest),
    KernelInfoReply(KernelInfoReply),
    InterruptRequest(InterruptRequest),
    InterruptReply(InterruptReply),
    ShutdownRequest(ShutdownRequest),
    ShutdownReply(ShutdownReply),
    DebugRequest(DebugRequest),
    DebugReply(DebugReply),
    InputRequest(InputRequest),
    InputReply(InputReply),
    Status(Status),
    Stream(Stream),
    DisplayData(DisplayData),
    UpdateDisplayData(UpdateDisplayData),
    ExecuteResult(ExecuteResult),
    ExecuteInput(ExecuteInput),
    Error(ErrorContent),
    ClearOutput(ClearOutput),
    /// Any `msg_type` without a registered decoder
    Unrecognized { msg_type: String, content: Value },
}

macro_rules! message_content {
    ($($ty:ident => $msg_type:literal as $variant:ident),+ $(,)?) => {
        $(
            impl MessageContent for $ty {
                const MSG_TYPE: &'static str = $msg_type;

                fn into_content(self) -> Content {
                    Content::$variant(self)
                }
            }
        )+
    };
}

message_content! {
    ExecuteRequest => "execute_request" as ExecuteRequest,
    ExecuteReply => "execute_reply" as ExecuteReply,
    CompleteRequest => "complete_request" as CompleteRequest,
    CompleteReply => "complete_reply" as CompleteReply,
    InspectRequest => "inspect_request" as InspectRequest,
    InspectReply => "inspect_reply" as InspectReply,
    KernelInfoRequest => "kernel_info_request" as KernelInfoRequest,
    KernelInfoReply => "kernel_info_reply" as KernelInfoReply,
    InterruptRequest => "interrupt_request" as InterruptRequest,
    InterruptReply => "interrupt_reply" as InterruptReply,
    ShutdownRequest => "shutdown_request" as ShutdownRequest,
    ShutdownReply => "shutdown_reply" as ShutdownReply,
    DebugRequest => "debug_request" as DebugRequest,
    DebugReply => "debug_reply" as DebugReply,
    InputRequest => "input_request" as InputRequest,
    InputReply => "input_reply" as InputReply,
    Status => "status" as Status,
    Stream => "stream" as Stream,
    DisplayData => "display_data" as DisplayData,
    UpdateDisplayData => "update_display_data" as UpdateDisplayData,
    ExecuteResult => "execute_result" as ExecuteResult,
    ExecuteInput => "execute_input" as ExecuteInput,
    ErrorContent => "error" as Error,
    ClearOutput => "clear_output" as ClearOutput,
}

impl Request for ExecuteRequest {
    const CHANNEL: Channel = Channel::Shell;
    const REPLY_TYPE: &'static str = ExecuteReply::MSG_TYPE;
}

impl Request for CompleteRequest {
    const CHANNEL: Channel = Channel::Shell;
    const REPLY_TYPE: &'static str = CompleteReply::MSG_TYPE;
}

impl Request for InspectRequest {
    const CHANNEL: Channel = Channel::Shell;
    const REPLY_TYPE: &'static str = InspectReply::MSG_TYPE;
}

impl Request for KernelInfoRequest {
    const CHANNEL: Channel = Channel::Shell;
    const REPLY_TYPE: &'static str = KernelInfoReply::MSG_TYPE;
}

impl Request for InterruptRequest {
    const CHANNEL: Channel = Channel::Control;
    const REPLY_TYPE: &'static str = InterruptReply::MSG_TYPE;
}

impl Request for ShutdownRequest {
    const CHANNEL: Channel = Channel::Control;
    const REPLY_TYPE: &'static str = ShutdownReply::MSG_TYPE;
}

impl Request for DebugRequest {
    const CHANNEL: Channel = Channel::Control;
    const REPLY_TYPE: &'static str = DebugReply::MSG_TYPE;
}

type Decoder = fn(Value) -> Result<Content, serde_json::Error>;

fn decode_as<T: MessageContent>(value: Value) -> Result<Content, serde_json::Error> {
    serde_json::from_value::<T>(value).map(T::into_content)
}

static CONTENT_REGISTRY: &[(&str, Decoder)] = &[
    (ExecuteRequest::MSG_TYPE, decode_as::<ExecuteRequest>),
    (ExecuteReply::MSG_TYPE, decode_as::<ExecuteReply>),
    (CompleteRequest::MSG_TYPE, decode_as::<CompleteRequest>),
    (CompleteReply::MSG_TYPE, decode_as::<CompleteReply>),
    (InspectRequest::MSG_TYPE, decode_as::<InspectRequest>),
    (InspectReply::MSG_TYPE, decode_as::<InspectReply>),
    (KernelInfoRequest::MSG_TYPE, decode_as::<KernelInfoRequest>),
    (KernelInfoReply::MSG_TYPE, decode_as::<KernelInfoReply>),
    (InterruptRequest::MSG_TYPE, decode_as::<InterruptRequest>),
    (InterruptReply::MSG_TYPE, decode_as::<InterruptReply>),
    (ShutdownRequest::MSG_TYPE, decode_as::<ShutdownRequest>),
    (ShutdownReply::MSG_TYPE, decode_as::<ShutdownReply>),
    (DebugRequest::MSG_TYPE, decode_as::<DebugRequest>),
    (DebugReply::MSG_TYPE, decode_as::<DebugReply>),
    (InputRequest::MSG_TYPE, decode_as::<InputRequest>),
    (InputReply::MSG_TYPE, decode_as::<InputReply>),
    (Status::MSG_TYPE, decode_as::<Status>),
    (Stream::MSG_TYPE, decode_as::<Stream>),
    (DisplayData::MSG_TYPE, decode_as::<DisplayData>),
    (UpdateDisplayData::MSG_TYPE, decode_as::<UpdateDisplayData>),
    (ExecuteResult::MSG_TYPE, decode_as::<ExecuteResult>),
    (ExecuteInput::MSG_TYPE, decode_as::<ExecuteInput>),
    (ErrorContent::MSG_TYPE, decode_as::<ErrorContent>),
    (ClearOutput::MSG_TYPE, decode_as::<ClearOutput>),
];

impl Content {
    /// Decode `value` with the decoder registered for `msg_type`
    ///
    /// Unknown message types are kept as `Content::Unrecognized`; a known type
    /// whose content does not match its shape is a `MalformedMessage`.
    pub fn decode(msg_type: &str, value: Value) -> Result<Self, KernelError> {
        match CONTENT_REGISTRY.iter().find(|(name, _)| *name == msg_type) {
            Some((_, decode)) => decode(value).map_err(|e| {
                KernelError::MalformedMessage(format!("invalid {} content: {}", msg_type, e))
            }),
            None => Ok(Self::Unrecognized {
                msg_type: msg_type.to_string(),
                content: value,
            }),
        }
    }

    pub fn is_registered(msg_type: &str) -> bool {
        CONTENT_REGISTRY.iter().any(|(name, _)| *name == msg_type)
    }
}
