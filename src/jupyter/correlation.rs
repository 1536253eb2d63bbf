use crate::core::errors::KernelError;
use crate::core::wire::Inbound;
use crate::jupyter::message::JupyterMessage;
use crate::jupyter::types::{ErrorContent, MessageContent};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

type Routes = HashMap<String, mpsc::UnboundedSender<JupyterMessage>>;

/// How a wait for a specific reply ended
#[derive(Debug)]
pub enum ReplyOutcome {
    /// The awaited reply arrived
    Reply(JupyterMessage),
    /// The kernel published an `error` message for the request first
    KernelError(ErrorContent),
    /// The caller's cancellation token fired
    Cancelled,
}

/// Inbound sink that hands each message to the request it answers
///
/// Every in-flight request owns an unbounded queue keyed by its `msg_id`, so
/// a slow consumer never loses its own replies. Every message is also
/// broadcast on the hub for general listeners, which may lag.
#[derive(Clone)]
pub struct ReplyRouter {
    routes: Arc<Mutex<Routes>>,
    hub: broadcast::Sender<JupyterMessage>,
}

impl ReplyRouter {
    pub fn new(hub_capacity: usize) -> Self {
        let (hub, _) = broadcast::channel(hub_capacity);
        Self {
            routes: Arc::new(Mutex::new(HashMap::new())),
            hub,
        }
    }

    /// Listen to every message from every channel
    pub fn subscribe(&self) -> broadcast::Receiver<JupyterMessage> {
        self.hub.subscribe()
    }

    /// Start queueing the children of `request_id`
    ///
    /// Call before the request is sent so no reply can slip past.
    pub fn register(
        &self,
        request_id: impl Into<String>,
        connection: CancellationToken,
    ) -> ReplyStream {
        let request_id = request_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        match self.routes.lock() {
            Ok(mut routes) => {
                routes.insert(request_id.clone(), tx);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(request_id.clone(), tx);
            }
        }

        ReplyStream {
            request_id,
            receiver: rx,
            connection,
            router: Some(self.clone()),
        }
    }

    /// Number of requests currently waiting for replies
    pub fn pending(&self) -> usize {
        self.routes.lock().map_or(0, |routes| routes.len())
    }

    fn unregister(&self, request_id: &str) {
        match self.routes.lock() {
            Ok(mut routes) => {
                routes.remove(request_id);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(request_id);
            }
        }
    }

    fn route(&self, message: &JupyterMessage) {
        let Some(parent) = message.parent_id() else {
            return;
        };
        let Ok(routes) = self.routes.lock() else {
            warn!("reply routes poisoned, dropping correlation for {}", parent);
            return;
        };
        if let Some(queue) = routes.get(parent) {
            if queue.send(message.clone()).is_err() {
                trace!(request_id = %parent, "reply queue already dropped");
            }
        }
    }
}

impl Inbound<JupyterMessage> for ReplyRouter {
    fn deliver(&self, message: JupyterMessage) {
        self.route(&message);
        let _ = self.hub.send(message);
    }
}

/// Messages whose parent is one request, in arrival order
///
/// Messages for other requests never reach the stream. Dropping the stream
/// stops queueing for its request.
pub struct ReplyStream {
    request_id: String,
    receiver: mpsc::UnboundedReceiver<JupyterMessage>,
    connection: CancellationToken,
    router: Option<ReplyRouter>,
}

impl ReplyStream {
    /// `msg_id` of the request this stream follows
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Next message correlated with the request
    ///
    /// Fails with `ChannelClosed` once the connection shuts down.
    pub async fn next(&mut self) -> Result<JupyterMessage, KernelError> {
        tokio::select! {
            biased;
            received = self.receiver.recv() => received.ok_or_else(|| {
                KernelError::ChannelClosed("reply queue closed".to_string())
            }),
            _ = self.connection.cancelled() => {
                Err(KernelError::ChannelClosed("connection shut down".to_string()))
            }
        }
    }

    /// Wait for the reply of type `reply_type`, an `error` message, or cancellation
    ///
    /// Everything else correlated with the request is skipped.
    pub async fn until_reply(
        &mut self,
        reply_type: &str,
        cancellation: &CancellationToken,
    ) -> Result<ReplyOutcome, KernelError> {
        loop {
            let message = tokio::select! {
                biased;
                _ = cancellation.cancelled() => return Ok(ReplyOutcome::Cancelled),
                next = self.next() => next?,
            };

            if message.msg_type() == reply_type {
                return Ok(ReplyOutcome::Reply(message));
            }
            if message.msg_type() == ErrorContent::MSG_TYPE {
                return Ok(ReplyOutcome::KernelError(message.content_as()?));
            }
        }
    }
}

impl Drop for ReplyStream {
    fn drop(&mut self) {
        if let Some(router) = self.router.take() {
            router.unregister(&self.request_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::wire::Channel;
    use crate::jupyter::message::Header;
    use serde_json::json;

    fn child_of(parent: &Header, msg_type: &str, content: serde_json::Value) -> JupyterMessage {
        JupyterMessage::new(Channel::Shell, Header::new(msg_type, "s", "k"), content)
            .with_parent(parent.clone())
    }

    #[tokio::test]
    async fn test_skips_messages_for_other_requests() {
        let router = ReplyRouter::new(16);
        let ours = Header::new("complete_request", "s", "u");
        let theirs = Header::new("complete_request", "s", "u");
        let mut stream = router.register(ours.msg_id.clone(), CancellationToken::new());

        router.deliver(child_of(&theirs, "complete_reply", json!({})));
        router.deliver(child_of(&ours, "complete_reply", json!({"matches": ["a"]})));

        let message = stream.next().await.unwrap();
        assert_eq!(message.content["matches"][0], "a");
    }

    #[tokio::test]
    async fn test_slow_consumer_loses_nothing() {
        let router = ReplyRouter::new(2);
        let request = Header::new("execute_request", "s", "u");
        let mut stream = router.register(request.msg_id.clone(), CancellationToken::new());
        let mut hub = router.subscribe();

        for i in 0..50 {
            router.deliver(child_of(&request, "stream", json!({"name": "stdout", "text": i})));
        }

        for i in 0..50 {
            assert_eq!(stream.next().await.unwrap().content["text"], i);
        }
        // the hub itself is bounded and lags
        assert!(matches!(
            hub.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }

    #[tokio::test]
    async fn test_dropping_stream_unregisters() {
        let router = ReplyRouter::new(16);
        let stream = router.register("id", CancellationToken::new());
        assert_eq!(router.pending(), 1);

        drop(stream);
        assert_eq!(router.pending(), 0);
    }

    #[tokio::test]
    async fn test_until_reply_stops_on_error() {
        let router = ReplyRouter::new(16);
        let request = Header::new("inspect_request", "s", "u");
        let mut stream = router.register(request.msg_id.clone(), CancellationToken::new());

        router.deliver(child_of(&request, "status", json!({"execution_state": "busy"})));
        router.deliver(child_of(
            &request,
            "error",
            json!({"ename": "NameError", "evalue": "x", "traceback": []}),
        ));

        match stream
            .until_reply("inspect_reply", &CancellationToken::new())
            .await
            .unwrap()
        {
            ReplyOutcome::KernelError(error) => assert_eq!(error.ename, "NameError"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_until_reply_observes_cancellation() {
        let router = ReplyRouter::new(16);
        let mut stream = router.register("id", CancellationToken::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(
            stream.until_reply("complete_reply", &cancel).await.unwrap(),
            ReplyOutcome::Cancelled
        ));
    }

    #[tokio::test]
    async fn test_connection_shutdown_ends_wait() {
        let router = ReplyRouter::new(16);
        let connection = CancellationToken::new();
        let mut stream = router.register("id", connection.clone());
        connection.cancel();

        assert!(matches!(
            stream.next().await,
            Err(KernelError::ChannelClosed(_))
        ));
    }
}
