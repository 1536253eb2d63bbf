use serde::{Deserialize, Serialize};
use std::fmt;

pub const PLAIN_TEXT_MIME_TYPE: &str = "text/plain";

/// A zero-based line/character position inside a code buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct LinePosition {
    pub line: usize,
    pub character: usize,
}

impl LinePosition {
    pub const fn new(line: usize, character: usize) -> Self {
        Self { line, character }
    }
}

impl fmt::Display for LinePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.line, self.character)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LinePositionSpan {
    pub start: LinePosition,
    pub end: LinePosition,
}

impl LinePositionSpan {
    pub const fn new(start: LinePosition, end: LinePosition) -> Self {
        Self { start, end }
    }

    /// Zero-width span at a single position
    pub const fn at(position: LinePosition) -> Self {
        Self {
            start: position,
            end: position,
        }
    }
}

/// A value rendered for one MIME type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedValue {
    pub mime_type: String,
    pub value: String,
}

impl FormattedValue {
    pub fn new(mime_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            value: value.into(),
        }
    }

    pub fn plain_text(value: impl Into<String>) -> Self {
        Self::new(PLAIN_TEXT_MIME_TYPE, value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionItem {
    pub display_text: String,
    pub kind: String,
    pub insert_text: String,
    pub filter_text: String,
    pub sort_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterInformation {
    pub label: String,
    pub documentation: FormattedValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureInformation {
    pub label: String,
    pub documentation: FormattedValue,
    pub parameters: Vec<ParameterInformation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelValueInfo {
    pub name: String,
    pub type_name: Option<String>,
    pub preview: Option<String>,
}

fn plain_text_mime_type() -> String {
    PLAIN_TEXT_MIME_TYPE.to_string()
}

/// Generic commands accepted from the surrounding interactive system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "commandType")]
pub enum KernelCommand {
    SubmitCode {
        code: String,
    },
    RequestCompletions {
        code: String,
        position: LinePosition,
    },
    RequestHoverText {
        code: String,
        position: LinePosition,
    },
    RequestSignatureHelp {
        code: String,
        position: LinePosition,
    },
    RequestKernelInfo,
    RequestValueInfos,
    RequestValue {
        name: String,
        #[serde(default = "plain_text_mime_type")]
        mime_type: String,
    },
    RequestDiagnostics {
        code: String,
    },
    SendValue {
        name: String,
        value: FormattedValue,
    },
}

impl KernelCommand {
    /// Stable command name used in logs and `NotImplemented` errors
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SubmitCode { .. } => "SubmitCode",
            Self::RequestCompletions { .. } => "RequestCompletions",
            Self::RequestHoverText { .. } => "RequestHoverText",
            Self::RequestSignatureHelp { .. } => "RequestSignatureHelp",
            Self::RequestKernelInfo => "RequestKernelInfo",
            Self::RequestValueInfos => "RequestValueInfos",
            Self::RequestValue { .. } => "RequestValue",
            Self::RequestDiagnostics { .. } => "RequestDiagnostics",
            Self::SendValue { .. } => "SendValue",
        }
    }
}

impl fmt::Display for KernelCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Generic events produced while a command runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType")]
pub enum KernelEvent {
    CommandSucceeded,
    CommandFailed {
        message: String,
    },
    DisplayedValueProduced {
        formatted_values: Vec<FormattedValue>,
        display_id: Option<String>,
    },
    DisplayedValueUpdated {
        formatted_values: Vec<FormattedValue>,
        display_id: Option<String>,
    },
    ReturnValueProduced {
        formatted_values: Vec<FormattedValue>,
    },
    StandardOutputValueProduced {
        text: String,
    },
    StandardErrorValueProduced {
        text: String,
    },
    CompletionsProduced {
        items: Vec<CompletionItem>,
        replacement_span: LinePositionSpan,
    },
    HoverTextProduced {
        content: Vec<FormattedValue>,
        span: LinePositionSpan,
    },
    SignatureHelpProduced {
        signatures: Vec<SignatureInformation>,
        active_signature_index: usize,
        active_parameter_index: usize,
    },
    KernelInfoProduced {
        implementation: String,
        language_name: String,
        language_version: String,
        protocol_version: String,
        banner: String,
    },
    ValueInfosProduced {
        value_infos: Vec<KernelValueInfo>,
    },
    ValueProduced {
        name: String,
        formatted_value: FormattedValue,
    },
}

impl KernelEvent {
    /// True for `CommandSucceeded` and `CommandFailed`
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::CommandSucceeded | Self::CommandFailed { .. })
    }
}
