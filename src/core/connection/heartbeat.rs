use bytes::Bytes;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zeromq::{ReqSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

const PING: &[u8] = b"ping";

/// Liveness of the kernel as seen by the heartbeat socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    Alive,
    Unresponsive,
}

impl fmt::Display for HeartbeatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alive => f.write_str("alive"),
            Self::Unresponsive => f.write_str("unresponsive"),
        }
    }
}

/// Pings the kernel's heartbeat port and publishes whether it echoes back
///
/// A kernel is assumed alive until the first missed echo. The monitor stops
/// when its handle is dropped or the connection token is cancelled.
pub struct HeartbeatMonitor {
    state: watch::Receiver<HeartbeatState>,
    stop: CancellationToken,
}

impl HeartbeatMonitor {
    /// Start pinging `endpoint` every `interval`
    ///
    /// Each ping waits at most one interval for its echo.
    pub fn spawn(endpoint: String, interval: Duration, shutdown: &CancellationToken) -> Self {
        let (state_tx, state_rx) = watch::channel(HeartbeatState::Alive);
        let stop = shutdown.child_token();
        tokio::spawn(run_heartbeat(endpoint, interval, state_tx, stop.clone()));

        Self {
            state: state_rx,
            stop,
        }
    }

    pub fn state(&self) -> HeartbeatState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<HeartbeatState> {
        self.state.clone()
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn run_heartbeat(
    endpoint: String,
    interval: Duration,
    state: watch::Sender<HeartbeatState>,
    stop: CancellationToken,
) {
    let mut socket: Option<ReqSocket> = None;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let alive = tokio::select! {
            _ = stop.cancelled() => break,
            alive = ping(&endpoint, &mut socket, interval) => alive,
        };

        let next = if alive {
            HeartbeatState::Alive
        } else {
            HeartbeatState::Unresponsive
        };
        state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            match next {
                HeartbeatState::Alive => info!(endpoint = %endpoint, "kernel heartbeat recovered"),
                HeartbeatState::Unresponsive => {
                    warn!(endpoint = %endpoint, "kernel heartbeat missed")
                }
            }
            *current = next;
            true
        });
    }

    debug!(endpoint = %endpoint, "heartbeat monitor stopped");
}

/// One ping/echo round trip; false on any failure
async fn ping(endpoint: &str, socket: &mut Option<ReqSocket>, timeout: Duration) -> bool {
    if socket.is_none() {
        let mut fresh = ReqSocket::new();
        match tokio::time::timeout(timeout, fresh.connect(endpoint)).await {
            Ok(Ok(())) => *socket = Some(fresh),
            Ok(Err(e)) => {
                debug!(endpoint = %endpoint, "heartbeat connect failed: {}", e);
                return false;
            }
            Err(_) => return false,
        }
    }

    let Some(active) = socket.as_mut() else {
        return false;
    };

    let outcome = tokio::time::timeout(timeout, async {
        active.send(ZmqMessage::from(Bytes::from_static(PING))).await?;
        active.recv().await
    })
    .await;

    match outcome {
        Ok(Ok(_echo)) => true,
        Ok(Err(e)) => {
            debug!(endpoint = %endpoint, "heartbeat socket error: {}", e);
            *socket = None;
            false
        }
        // a REQ socket waiting on a lost reply cannot send again; start over
        Err(_) => {
            *socket = None;
            false
        }
    }
}
