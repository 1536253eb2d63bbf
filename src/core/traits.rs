use crate::core::{
    context::InvocationContext,
    errors::KernelError,
    types::{KernelCommand, LinePosition},
};
use async_trait::async_trait;

#[async_trait]
pub trait CodeExecutor {
    /// Run code in the kernel, publishing output events until the kernel goes idle
    async fn submit_code(&self, code: &str, context: &InvocationContext)
        -> Result<(), KernelError>;
}

#[async_trait]
pub trait LanguageServices {
    async fn request_completions(
        &self,
        code: &str,
        position: LinePosition,
        context: &InvocationContext,
    ) -> Result<(), KernelError>;

    async fn request_hover_text(
        &self,
        code: &str,
        position: LinePosition,
        context: &InvocationContext,
    ) -> Result<(), KernelError>;

    async fn request_signature_help(
        &self,
        code: &str,
        position: LinePosition,
        context: &InvocationContext,
    ) -> Result<(), KernelError>;
}

#[async_trait]
pub trait KernelIntrospection {
    async fn request_kernel_info(&self, context: &InvocationContext) -> Result<(), KernelError>;

    async fn request_value_infos(&self, context: &InvocationContext) -> Result<(), KernelError>;

    /// Fetch one variable's value rendered as `mime_type`
    async fn request_value(
        &self,
        name: &str,
        mime_type: &str,
        context: &InvocationContext,
    ) -> Result<(), KernelError>;
}

// Composite trait used by callers that route generic commands
#[async_trait]
pub trait KernelConnector: CodeExecutor + LanguageServices + KernelIntrospection + Sync {
    /// Route a generic command to its handler
    ///
    /// Commands without a handler fail with `KernelError::NotImplemented`.
    async fn handle(
        &self,
        command: &KernelCommand,
        context: &InvocationContext,
    ) -> Result<(), KernelError> {
        match command {
            KernelCommand::SubmitCode { code } => self.submit_code(code, context).await,
            KernelCommand::RequestCompletions { code, position } => {
                self.request_completions(code, *position, context).await
            }
            KernelCommand::RequestHoverText { code, position } => {
                self.request_hover_text(code, *position, context).await
            }
            KernelCommand::RequestSignatureHelp { code, position } => {
                self.request_signature_help(code, *position, context).await
            }
            KernelCommand::RequestKernelInfo => self.request_kernel_info(context).await,
            KernelCommand::RequestValueInfos => self.request_value_infos(context).await,
            KernelCommand::RequestValue { name, mime_type } => {
                self.request_value(name, mime_type, context).await
            }
            KernelCommand::RequestDiagnostics { .. } | KernelCommand::SendValue { .. } => {
                Err(KernelError::NotImplemented(command.name().to_string()))
            }
        }
    }
}
