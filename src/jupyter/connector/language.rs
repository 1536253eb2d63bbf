use crate::core::context::InvocationContext;
use crate::core::errors::KernelError;
use crate::core::traits::LanguageServices;
use crate::core::types::{KernelEvent, LinePosition, LinePositionSpan, SignatureInformation};
use crate::jupyter::connector::{await_reply, CANCELLED_MESSAGE};
use crate::jupyter::conversions::{
    completion_items, offset_from_position, plain_formatted_values, span_from_offsets,
};
use crate::jupyter::session::KernelSession;
use crate::jupyter::types::{CompleteReply, CompleteRequest, InspectReply, InspectRequest};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::instrument;

/// Completion, hover and signature help over `complete_request`/`inspect_request`
pub struct Language {
    session: Arc<KernelSession>,
}

impl Language {
    pub fn new(session: Arc<KernelSession>) -> Self {
        Self { session }
    }

    /// Inspect at the cursor; `None` once a terminal event has been published
    async fn inspect(
        &self,
        code: &str,
        position: LinePosition,
        context: &InvocationContext,
    ) -> Result<Option<InspectReply>, KernelError> {
        if context.is_cancelled() {
            context.fail(CANCELLED_MESSAGE);
            return Ok(None);
        }

        let request = InspectRequest {
            code: code.to_string(),
            cursor_pos: offset_from_position(code, position),
            detail_level: 0,
        };
        let mut replies = self.session.send_request(&request).await?;
        let Some(reply) = await_reply::<InspectReply>(&mut replies, context).await? else {
            return Ok(None);
        };

        if !reply.is_ok() {
            context.fail(reply.failure_message());
            return Ok(None);
        }
        Ok(Some(reply))
    }
}

#[async_trait]
impl LanguageServices for Language {
    #[instrument(skip(self, code, context))]
    async fn request_completions(
        &self,
        code: &str,
        position: LinePosition,
        context: &InvocationContext,
    ) -> Result<(), KernelError> {
        if context.is_cancelled() {
            context.fail(CANCELLED_MESSAGE);
            return Ok(());
        }

        let request = CompleteRequest {
            code: code.to_string(),
            cursor_pos: offset_from_position(code, position),
        };
        let mut replies = self.session.send_request(&request).await?;
        let Some(reply) = await_reply::<CompleteReply>(&mut replies, context).await? else {
            return Ok(());
        };

        if !reply.is_ok() {
            context.fail(reply.failure_message());
            return Ok(());
        }

        context.publish(KernelEvent::CompletionsProduced {
            items: completion_items(&reply.matches, &reply.metadata),
            replacement_span: span_from_offsets(code, reply.cursor_start, reply.cursor_end),
        });
        context.succeed();
        Ok(())
    }

    #[instrument(skip(self, code, context))]
    async fn request_hover_text(
        &self,
        code: &str,
        position: LinePosition,
        context: &InvocationContext,
    ) -> Result<(), KernelError> {
        let Some(reply) = self.inspect(code, position, context).await? else {
            return Ok(());
        };

        if reply.found {
            context.publish(KernelEvent::HoverTextProduced {
                content: plain_formatted_values(&reply.data),
                span: LinePositionSpan::at(position),
            });
        }
        context.succeed();
        Ok(())
    }

    #[instrument(skip(self, code, context))]
    async fn request_signature_help(
        &self,
        code: &str,
        position: LinePosition,
        context: &InvocationContext,
    ) -> Result<(), KernelError> {
        let Some(reply) = self.inspect(code, position, context).await? else {
            return Ok(());
        };

        if reply.found {
            // kernels only report documentation, no parsed parameters
            let signatures = plain_formatted_values(&reply.data)
                .into_iter()
                .map(|documentation| SignatureInformation {
                    label: String::new(),
                    documentation,
                    parameters: Vec::new(),
                })
                .collect();

            context.publish(KernelEvent::SignatureHelpProduced {
                signatures,
                active_signature_index: 0,
                active_parameter_index: 0,
            });
        }
        context.succeed();
        Ok(())
    }
}
