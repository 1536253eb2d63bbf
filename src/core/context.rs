use crate::core::types::KernelEvent;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Supplies user input when a kernel issues an `input_request`
#[async_trait]
pub trait InputProvider: Send + Sync {
    /// Return the text typed by the user, or `None` if input was refused
    async fn get_input(&self, prompt: &str, password: bool) -> Option<String>;
}

/// Per-command state: where events go, how cancellation arrives, and who
/// answers input prompts
#[derive(Clone)]
pub struct InvocationContext {
    events: mpsc::UnboundedSender<KernelEvent>,
    cancellation: CancellationToken,
    input: Option<Arc<dyn InputProvider>>,
}

impl InvocationContext {
    /// Create a context and the receiver that observes its events
    pub fn new(cancellation: CancellationToken) -> (Self, mpsc::UnboundedReceiver<KernelEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                events,
                cancellation,
                input: None,
            },
            rx,
        )
    }

    /// Attach an input provider; enables `allow_stdin` on execute requests
    #[must_use]
    pub fn with_input_provider(mut self, provider: Arc<dyn InputProvider>) -> Self {
        self.input = Some(provider);
        self
    }

    /// Publish an event; a dropped receiver is not an error for the command
    pub fn publish(&self, event: KernelEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("event receiver dropped, discarding event");
        }
    }

    pub fn fail(&self, message: impl Into<String>) {
        self.publish(KernelEvent::CommandFailed {
            message: message.into(),
        });
    }

    pub fn succeed(&self) {
        self.publish(KernelEvent::CommandSucceeded);
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn input_provider(&self) -> Option<&Arc<dyn InputProvider>> {
        self.input.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_receiver() {
        let (context, mut rx) = InvocationContext::new(CancellationToken::new());
        context.publish(KernelEvent::StandardOutputValueProduced {
            text: "hi".to_string(),
        });
        context.succeed();

        assert!(matches!(
            rx.try_recv(),
            Ok(KernelEvent::StandardOutputValueProduced { .. })
        ));
        assert_eq!(rx.try_recv().unwrap(), KernelEvent::CommandSucceeded);
    }

    #[test]
    fn test_publish_after_receiver_dropped_is_silent() {
        let (context, rx) = InvocationContext::new(CancellationToken::new());
        drop(rx);
        context.fail("nobody listening");
    }

    #[test]
    fn test_cancellation_is_shared() {
        let token = CancellationToken::new();
        let (context, _rx) = InvocationContext::new(token.clone());
        assert!(!context.is_cancelled());
        token.cancel();
        assert!(context.is_cancelled());
    }
}
