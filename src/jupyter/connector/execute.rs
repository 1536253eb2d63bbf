use crate::core::context::InvocationContext;
use crate::core::errors::KernelError;
use crate::core::traits::CodeExecutor;
use crate::core::types::KernelEvent;
use crate::jupyter::connector::CANCELLED_MESSAGE;
use crate::jupyter::conversions::formatted_values;
use crate::jupyter::correlation::ReplyOutcome;
use crate::jupyter::message::JupyterMessage;
use crate::jupyter::session::KernelSession;
use crate::jupyter::types::{
    Content, ErrorContent, ExecuteRequest, InputRequest, InterruptReply, InterruptRequest,
    MessageContent, STREAM_STDERR, STREAM_STDOUT,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

enum Step {
    Continue,
    Finished,
    Cancelled,
}

/// Completion signals of one execute request
///
/// `idle` on iopub and `execute_reply` on shell may arrive in either order;
/// the outcome is decided once both are in.
#[derive(Debug, Default)]
struct Progress {
    idle_seen: bool,
    reply_seen: bool,
    failure: Option<String>,
}

impl Progress {
    const fn is_complete(&self) -> bool {
        self.idle_seen && self.reply_seen
    }

    fn finish(&mut self, context: &InvocationContext) -> Step {
        match self.failure.take() {
            Some(failure) => context.fail(failure),
            None => context.succeed(),
        }
        Step::Finished
    }
}

/// Code execution against the kernel's shell channel
pub struct Execution {
    session: Arc<KernelSession>,
    interrupt_timeout: Duration,
    reply_grace: Duration,
}

impl Execution {
    /// # Arguments
    /// * `interrupt_timeout` - Bound on the wait for `interrupt_reply`
    /// * `reply_grace` - How long `execute_reply` may trail the `idle` status
    pub fn new(
        session: Arc<KernelSession>,
        interrupt_timeout: Duration,
        reply_grace: Duration,
    ) -> Self {
        Self {
            session,
            interrupt_timeout,
            reply_grace,
        }
    }

    /// Send one `interrupt_request` on control from a background task
    ///
    /// The task waits for `interrupt_reply` (or an `error`) at most the
    /// configured interrupt timeout and only logs the outcome.
    pub fn interrupt(&self) -> JoinHandle<()> {
        tokio::spawn(send_interrupt(
            self.session.clone(),
            self.interrupt_timeout,
        ))
    }

    fn cancel(&self, context: &InvocationContext, request_id: &str) {
        debug!(request_id = %request_id, "execution cancelled, interrupting kernel");
        self.interrupt();
        context.fail(CANCELLED_MESSAGE);
    }

    async fn on_message(
        &self,
        message: JupyterMessage,
        context: &InvocationContext,
        progress: &mut Progress,
    ) -> Result<Step, KernelError> {
        let content = match message.typed_content() {
            Ok(content) => content,
            Err(e) => {
                warn!(msg_type = %message.msg_type(), "skipping undecodable message: {}", e);
                return Ok(Step::Continue);
            }
        };

        match content {
            Content::Stream(stream) => match stream.name.as_str() {
                STREAM_STDOUT => {
                    context.publish(KernelEvent::StandardOutputValueProduced { text: stream.text })
                }
                STREAM_STDERR => {
                    context.publish(KernelEvent::StandardErrorValueProduced { text: stream.text })
                }
                other => trace!(stream = %other, "ignoring output on unknown stream"),
            },
            Content::DisplayData(display) => {
                context.publish(KernelEvent::DisplayedValueProduced {
                    formatted_values: formatted_values(&display.data),
                    display_id: display.display_id(),
                });
            }
            Content::UpdateDisplayData(update) => {
                context.publish(KernelEvent::DisplayedValueUpdated {
                    formatted_values: formatted_values(&update.data),
                    display_id: update.display_id(),
                });
            }
            Content::ExecuteResult(result) => {
                context.publish(KernelEvent::ReturnValueProduced {
                    formatted_values: formatted_values(&result.data),
                });
            }
            Content::Error(error) => {
                publish_traceback(&error, context);
                context.fail(error.failure_message());
                return Ok(Step::Finished);
            }
            Content::ExecuteReply(reply) => {
                progress.reply_seen = true;
                if !reply.is_ok() {
                    progress.failure.get_or_insert_with(|| reply.failure_message());
                }
                if progress.is_complete() {
                    return Ok(progress.finish(context));
                }
            }
            Content::Status(status) if status.is_idle() => {
                progress.idle_seen = true;
                if progress.is_complete() {
                    return Ok(progress.finish(context));
                }
            }
            Content::InputRequest(prompt) => {
                return self.answer_input(&message, prompt, context).await;
            }
            other => trace!(msg_type = %message.msg_type(), "ignoring {:?}", other),
        }

        Ok(Step::Continue)
    }

    async fn answer_input(
        &self,
        message: &JupyterMessage,
        prompt: InputRequest,
        context: &InvocationContext,
    ) -> Result<Step, KernelError> {
        let value = match context.input_provider() {
            Some(provider) => tokio::select! {
                biased;
                _ = context.cancellation_token().cancelled() => return Ok(Step::Cancelled),
                value = provider.get_input(&prompt.prompt, prompt.password) => value.unwrap_or_default(),
            },
            // an unanswered prompt blocks the kernel forever
            None => String::new(),
        };

        self.session.reply_input(message, value).await?;
        Ok(Step::Continue)
    }
}

fn publish_traceback(error: &ErrorContent, context: &InvocationContext) {
    if error.traceback.is_empty() {
        return;
    }
    context.publish(KernelEvent::StandardErrorValueProduced {
        text: error.traceback.join("\n"),
    });
}

async fn send_interrupt(session: Arc<KernelSession>, timeout: Duration) {
    let mut replies = match session.send_request(&InterruptRequest {}).await {
        Ok(replies) => replies,
        Err(e) => {
            warn!("failed to send interrupt_request: {}", e);
            return;
        }
    };

    let uncancellable = CancellationToken::new();
    let outcome = tokio::time::timeout(
        timeout,
        replies.until_reply(InterruptReply::MSG_TYPE, &uncancellable),
    )
    .await;

    match outcome {
        Ok(Ok(ReplyOutcome::Reply(reply))) => {
            debug!(status = %reply.content["status"], "kernel acknowledged interrupt")
        }
        Ok(Ok(ReplyOutcome::KernelError(error))) => {
            warn!("kernel rejected interrupt: {}", error.failure_message())
        }
        Ok(Ok(ReplyOutcome::Cancelled)) => {}
        Ok(Err(e)) => warn!("interrupt abandoned: {}", e),
        Err(_) => warn!("no interrupt_reply within {:?}", timeout),
    }
}

#[async_trait]
impl CodeExecutor for Execution {
    #[instrument(skip(self, code, context), fields(session = %self.session.session_id()))]
    async fn submit_code(
        &self,
        code: &str,
        context: &InvocationContext,
    ) -> Result<(), KernelError> {
        if context.is_cancelled() {
            context.fail(CANCELLED_MESSAGE);
            return Ok(());
        }

        let request = ExecuteRequest::new(code, context.input_provider().is_some());
        let mut replies = self.session.send_request(&request).await?;
        let mut progress = Progress::default();
        let mut reply_deadline: Option<Instant> = None;

        loop {
            let message = tokio::select! {
                biased;
                _ = context.cancellation_token().cancelled() => {
                    self.cancel(context, replies.request_id());
                    return Ok(());
                }
                next = replies.next() => next?,
                _ = tokio::time::sleep_until(reply_deadline.unwrap_or_else(Instant::now)),
                    if reply_deadline.is_some() =>
                {
                    warn!(
                        request_id = %replies.request_id(),
                        "no execute_reply within {:?} of idle",
                        self.reply_grace
                    );
                    progress.finish(context);
                    return Ok(());
                }
            };

            let step = self.on_message(message, context, &mut progress).await?;
            if progress.idle_seen && !progress.reply_seen && reply_deadline.is_none() {
                reply_deadline = Some(Instant::now() + self.reply_grace);
            }

            match step {
                Step::Continue => {}
                Step::Finished => return Ok(()),
                Step::Cancelled => {
                    self.cancel(context, replies.request_id());
                    return Ok(());
                }
            }
        }
    }
}
