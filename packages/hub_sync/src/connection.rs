//! ConnectionManager: the single shared duplex connection to the hub.
//!
//! One background task owns the socket. It reconnects forever with
//! exponential backoff and reports lifecycle changes and decoded frames, in
//! arrival order, on an unbounded channel consumed by the engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{FutureExt, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ReconnectConfig;
use crate::protocol::{ClientCommand, ServerEvent};

/// Exponential reconnect delay: base, 2×base, 4×base, … capped at max.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectConfig,
    current: Duration,
}

impl Backoff {
    pub fn new(policy: ReconnectConfig) -> Self {
        Self {
            policy,
            current: policy.base_delay,
        }
    }

    /// Delay before the next attempt; doubles the one after it.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.policy.max_delay);
        delay
    }

    /// Called after a successful open.
    pub fn reset(&mut self) {
        self.current = self.policy.base_delay;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened,
    Frame(ServerEvent),
    /// An open connection ended, gracefully or with an error.
    Closed,
}

/// Cheap handle for sending control messages on the shared connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    tx: mpsc::UnboundedSender<ClientCommand>,
    connected: Arc<AtomicBool>,
}

impl ConnectionHandle {
    /// Queue a command for the open socket. Returns false (and drops the
    /// command) while disconnected.
    pub fn send(&self, cmd: ClientCommand) -> bool {
        if !self.is_connected() {
            debug!(?cmd, "dropping command while disconnected");
            return false;
        }
        self.tx.send(cmd).is_ok()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Handle wired to a bare channel instead of a socket.
    #[cfg(test)]
    pub fn test_pair(connected: bool) -> (Self, mpsc::UnboundedReceiver<ClientCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            tx,
            connected: Arc::new(AtomicBool::new(connected)),
        };
        (handle, rx)
    }
}

enum PumpOutcome {
    Reconnect,
    Shutdown,
}

pub struct ConnectionManager {
    url: String,
    policy: ReconnectConfig,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    handle: ConnectionHandle,
    outbound_rx: Option<mpsc::UnboundedReceiver<ClientCommand>>,
    task: Option<JoinHandle<mpsc::UnboundedReceiver<ClientCommand>>>,
    cancel: CancellationToken,
}

impl ConnectionManager {
    /// Create a manager for `url`. Call `connect()` to start the connection task.
    pub fn new(
        url: String,
        policy: ReconnectConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let manager = Self {
            url,
            policy,
            events_tx,
            handle: ConnectionHandle {
                tx: outbound_tx,
                connected: Arc::new(AtomicBool::new(false)),
            },
            outbound_rx: Some(outbound_rx),
            task: None,
            cancel: CancellationToken::new(),
        };
        (manager, events_rx)
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    /// Start the connection task. No-op while one is already running.
    pub fn connect(&mut self) {
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                debug!("connect: connection task already running");
                self.task = Some(task);
                return;
            }
            // A finished task hands back its outbound channel.
            if let Some(Ok(outbound_rx)) = task.now_or_never() {
                self.outbound_rx = Some(outbound_rx);
            }
        }
        let Some(outbound_rx) = self.outbound_rx.take() else {
            warn!("connect: previous connection task did not return its channel");
            return;
        };

        self.cancel = CancellationToken::new();
        let task = run_connection(
            self.url.clone(),
            self.policy,
            self.events_tx.clone(),
            outbound_rx,
            self.handle.connected.clone(),
            self.cancel.clone(),
        );
        self.task = Some(tokio::spawn(task));
    }

    /// Close the socket and stop reconnecting.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(outbound_rx) => self.outbound_rx = Some(outbound_rx),
                Err(e) => warn!(error = %e, "connection task panicked"),
            }
        }
        self.handle.connected.store(false, Ordering::Release);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Connect/reconnect loop. Returns the outbound receiver so a later
/// `connect()` can reuse it.
async fn run_connection(
    url: String,
    policy: ReconnectConfig,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    mut outbound: mpsc::UnboundedReceiver<ClientCommand>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
) -> mpsc::UnboundedReceiver<ClientCommand> {
    let mut backoff = Backoff::new(policy);
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        attempt += 1;
        let connect = tokio::select! {
            _ = cancel.cancelled() => break,
            res = tokio_tungstenite::connect_async(url.as_str()) => res,
        };

        match connect {
            Ok((ws, _)) => {
                info!(%url, attempt, "connected");
                attempt = 0;
                backoff.reset();

                // Commands queued against the previous socket are stale.
                while outbound.try_recv().is_ok() {}
                connected.store(true, Ordering::Release);
                if events.send(ConnectionEvent::Opened).is_err() {
                    connected.store(false, Ordering::Release);
                    break;
                }

                let outcome = pump(ws, &events, &mut outbound, &cancel).await;
                connected.store(false, Ordering::Release);
                let _ = events.send(ConnectionEvent::Closed);
                if matches!(outcome, PumpOutcome::Shutdown) {
                    break;
                }
            }
            Err(e) => {
                warn!(%url, attempt, error = %e, "connect failed");
            }
        }

        let delay = backoff.next_delay();
        debug!(delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    debug!("connection task stopped");
    outbound
}

async fn pump(
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    events: &mpsc::UnboundedSender<ConnectionEvent>,
    outbound: &mut mpsc::UnboundedReceiver<ClientCommand>,
    cancel: &CancellationToken,
) -> PumpOutcome {
    let (mut ws_write, mut ws_read) = ws.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws_write.send(tungstenite::Message::Close(None)).await;
                return PumpOutcome::Shutdown;
            }

            cmd = outbound.recv() => {
                let Some(cmd) = cmd else {
                    return PumpOutcome::Shutdown;
                };
                let json = match cmd.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(error = %e, "failed to encode command");
                        continue;
                    }
                };
                if let Err(e) = ws_write.send(tungstenite::Message::Text(json.into())).await {
                    warn!(error = %e, "send failed");
                    return PumpOutcome::Reconnect;
                }
            }

            msg = ws_read.next() => {
                match msg {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        match ServerEvent::decode(&text) {
                            Ok(event) => {
                                if events.send(ConnectionEvent::Frame(event)).is_err() {
                                    return PumpOutcome::Shutdown;
                                }
                            }
                            Err(e) => debug!(error = %e, "ignoring undecodable frame"),
                        }
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        info!(?frame, "server closed connection");
                        return PumpOutcome::Reconnect;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "connection error");
                        return PumpOutcome::Reconnect;
                    }
                    None => return PumpOutcome::Reconnect,
                }
            }
        }
    }
}
