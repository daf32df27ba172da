//! Reconnecting WebSocket transport with an outbound queue.
//!
//! Split in two layers:
//!
//! - [`LinkMachine`]: pure connection state machine. Decides whether a frame
//!   goes out now or waits, and whether a close schedules a reconnect.
//! - [`Transport`]: tokio task that owns the socket and drives the machine.
//!
//! ```text
//!            connect()                 on_open()
//!   Idle ──────────────► Connecting ──────────────► Open
//!    ▲                      ▲   │                     │
//!    │ disconnect()         │   │ on_close()          │ on_close()
//!    │                      │   ▼                     ▼
//!   Halted ◄── cap hit ── Backoff ◄───────────────────┘
//!                     (attempts < max)
//! ```
//!
//! On every open the handshake frame goes out first, then the queue drains
//! in FIFO order. Frames sent while not open are queued, never dropped,
//! until the queue is full. A dial in flight is one more `select!` source,
//! so `disconnect` and `shutdown` abort it before anything is written.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::config::TransportConfig;
use crate::protocol::{ProtocolError, WireMessage};

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

// ───────────────────────────────────────────────────────────────────
// Outbound queue
// ───────────────────────────────────────────────────────────────────

/// FIFO of encoded frames waiting for an open socket.
pub struct OutboundQueue {
    queue: VecDeque<QueuedFrame>,
    max_size: usize,
}

#[derive(Debug, Clone)]
struct QueuedFrame {
    frame: String,
    queued_at: Instant,
}

impl OutboundQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Append a frame. Returns false when full.
    pub fn enqueue(&mut self, frame: String) -> bool {
        if self.queue.len() >= self.max_size {
            return false;
        }
        self.queue.push_back(QueuedFrame {
            frame,
            queued_at: Instant::now(),
        });
        true
    }

    /// Put frames back at the head, keeping their order. Ignores capacity.
    pub fn restore(&mut self, frames: Vec<String>) {
        let now = Instant::now();
        for frame in frames.into_iter().rev() {
            self.queue.push_front(QueuedFrame {
                frame,
                queued_at: now,
            });
        }
    }

    pub fn drain(&mut self) -> Vec<String> {
        self.queue.drain(..).map(|q| q.frame).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn total_bytes(&self) -> usize {
        self.queue.iter().map(|q| q.frame.len()).sum()
    }

    /// Age of the oldest queued frame.
    pub fn oldest_age(&self) -> Option<Duration> {
        self.queue.front().map(|q| q.queued_at.elapsed())
    }
}

// ───────────────────────────────────────────────────────────────────
// State machine
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Never connected, or closed by the peer with no reconnect pending.
    Idle,
    Connecting,
    Open,
    /// Waiting for the reconnect timer.
    Backoff,
    /// Stopped by the caller or the attempt cap. Only `connect` restarts.
    Halted,
}

/// What to do with a frame handed to [`LinkMachine::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendAction {
    /// Socket is open: write it now.
    Transmit(String),
    /// Held until the next open.
    Queued,
    /// Held, and the link was idle: open a socket now.
    QueuedAndConnect,
}

pub struct LinkMachine {
    phase: Phase,
    attempts: u32,
    max_attempts: u32,
    delay: Duration,
    queue: OutboundQueue,
}

impl LinkMachine {
    pub fn new(max_attempts: u32, delay: Duration, capacity: usize) -> Self {
        Self {
            phase: Phase::Idle,
            attempts: 0,
            max_attempts,
            delay,
            queue: OutboundQueue::new(capacity),
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(
            config.max_reconnect_attempts,
            config.reconnect_delay,
            config.queue_capacity,
        )
    }

    pub fn state(&self) -> ConnectionState {
        match self.phase {
            Phase::Idle | Phase::Halted => ConnectionState::Disconnected,
            Phase::Connecting if self.attempts > 0 => ConnectionState::Reconnecting,
            Phase::Connecting => ConnectionState::Connecting,
            Phase::Backoff => ConnectionState::Reconnecting,
            Phase::Open => ConnectionState::Connected,
        }
    }

    pub fn is_open(&self) -> bool {
        self.phase == Phase::Open
    }

    /// Stopped for good until an explicit `connect`.
    pub fn is_halted(&self) -> bool {
        self.phase == Phase::Halted
    }

    /// Reconnects scheduled since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    /// Explicit connect. Returns true if the caller should open a socket.
    ///
    /// Cancels a pending reconnect timer and resets the attempt counter.
    pub fn connect(&mut self) -> bool {
        match self.phase {
            Phase::Connecting | Phase::Open => false,
            Phase::Idle | Phase::Backoff | Phase::Halted => {
                self.attempts = 0;
                self.phase = Phase::Connecting;
                true
            }
        }
    }

    /// Socket opened. Returns queued frames to write, in order.
    pub fn on_open(&mut self) -> Vec<String> {
        self.phase = Phase::Open;
        self.attempts = 0;
        self.queue.drain()
    }

    /// Socket closed or a connect attempt failed.
    ///
    /// Returns the reconnect delay if a retry is scheduled.
    pub fn on_close(&mut self) -> Option<Duration> {
        match self.phase {
            Phase::Idle | Phase::Halted => None,
            Phase::Connecting | Phase::Open | Phase::Backoff => {
                if self.attempts < self.max_attempts {
                    self.attempts += 1;
                    self.phase = Phase::Backoff;
                    Some(self.delay)
                } else {
                    self.phase = Phase::Halted;
                    None
                }
            }
        }
    }

    /// Reconnect timer fired. Returns true if the caller should open a socket.
    pub fn on_reconnect_due(&mut self) -> bool {
        if self.phase == Phase::Backoff {
            self.phase = Phase::Connecting;
            true
        } else {
            false
        }
    }

    /// Route one encoded frame.
    pub fn send(&mut self, frame: String) -> Result<SendAction, ProtocolError> {
        if self.phase == Phase::Open {
            return Ok(SendAction::Transmit(frame));
        }
        if !self.queue.enqueue(frame) {
            return Err(ProtocolError::QueueFull(self.queue.len()));
        }
        if self.phase == Phase::Idle {
            self.phase = Phase::Connecting;
            return Ok(SendAction::QueuedAndConnect);
        }
        Ok(SendAction::Queued)
    }

    /// Frames that could not be written go back to the head of the queue.
    pub fn restore(&mut self, frames: Vec<String>) {
        self.queue.restore(frames);
    }

    /// Caller-initiated close. No reconnect, queue discarded.
    pub fn disconnect(&mut self) {
        self.phase = Phase::Halted;
        self.attempts = 0;
        self.queue.clear();
    }
}

// ───────────────────────────────────────────────────────────────────
// Async driver
// ───────────────────────────────────────────────────────────────────

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connect attempt in flight, bounded by the connect timeout.
type PendingDial = Pin<Box<dyn Future<Output = Result<WsStream, String>> + Send + Sync>>;

/// Events emitted by the transport task.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    State(ConnectionState),
    /// A parsed inbound frame.
    Message(WireMessage),
    /// Connection-level error. Reported only; closes drive reconnects.
    Error(String),
}

#[derive(Debug)]
enum Command {
    Send(WireMessage),
    Connect,
    Disconnect,
    Shutdown,
}

/// Handle to the transport task.
pub struct Transport {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    task: Option<JoinHandle<()>>,
}

impl Transport {
    /// Spawn the transport task. Nothing connects until `connect` or `send`.
    ///
    /// `handshake` is written first on every open.
    pub fn spawn(
        config: TransportConfig,
        handshake: Option<WireMessage>,
    ) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.channel_capacity);
        let (event_tx, event_rx) = mpsc::channel(config.channel_capacity);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let handshake = handshake.and_then(|msg| match msg.encode() {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!("Dropping unencodable handshake: {}", e);
                None
            }
        });

        let driver = Driver {
            link: LinkMachine::from_config(&config),
            config,
            handshake,
            socket: None,
            dial: None,
            reconnect_at: None,
            events: event_tx,
            state_tx,
        };
        let task = tokio::spawn(driver.run(cmd_rx));

        (
            Self {
                commands: cmd_tx,
                state: state_rx,
                task: Some(task),
            },
            event_rx,
        )
    }

    pub async fn connect(&self) -> Result<(), ProtocolError> {
        self.command(Command::Connect).await
    }

    pub async fn disconnect(&self) -> Result<(), ProtocolError> {
        self.command(Command::Disconnect).await
    }

    /// Send now if open, otherwise queue (and connect if idle).
    pub async fn send(&self, msg: WireMessage) -> Result<(), ProtocolError> {
        self.command(Command::Send(msg)).await
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Close the socket and wait for the task to finish.
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(Command::Shutdown).await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    async fn command(&self, cmd: Command) -> Result<(), ProtocolError> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }
}

struct Driver {
    config: TransportConfig,
    link: LinkMachine,
    handshake: Option<String>,
    socket: Option<WsStream>,
    dial: Option<PendingDial>,
    reconnect_at: Option<tokio::time::Instant>,
    events: mpsc::Sender<TransportEvent>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Send(msg)) => self.handle_send(msg).await,
                    Some(Command::Connect) => {
                        if self.link.connect() {
                            self.reconnect_at = None;
                            self.open().await;
                        }
                    }
                    Some(Command::Disconnect) => {
                        self.reconnect_at = None;
                        self.abort_dial();
                        self.link.disconnect();
                        self.close_socket().await;
                        self.publish_state().await;
                    }
                    Some(Command::Shutdown) | None => {
                        self.abort_dial();
                        self.link.disconnect();
                        self.close_socket().await;
                        self.publish_state().await;
                        break;
                    }
                },
                frame = next_frame(&mut self.socket) => self.handle_frame(frame).await,
                dialed = next_dial(&mut self.dial) => {
                    self.dial = None;
                    self.dialed(dialed).await;
                }
                _ = sleep_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    if self.link.on_reconnect_due() {
                        self.open().await;
                    }
                }
            }
        }
        debug!("Transport task stopped");
    }

    async fn handle_send(&mut self, msg: WireMessage) {
        let frame = match msg.encode() {
            Ok(frame) => frame,
            Err(e) => {
                self.report(format!("encode {}: {}", msg.kind(), e)).await;
                return;
            }
        };
        match self.link.send(frame) {
            Ok(SendAction::Transmit(frame)) => {
                if let Err(e) = self.write(frame.clone()).await {
                    self.link.restore(vec![frame]);
                    self.lost(e).await;
                }
            }
            Ok(SendAction::Queued) => trace!("Queued {} ({} waiting)", msg.kind(), self.link.queued()),
            Ok(SendAction::QueuedAndConnect) => {
                self.publish_state().await;
                self.open().await;
            }
            Err(e) => self.report(e.to_string()).await,
        }
    }

    /// Start dialing the server. The link must already be in the
    /// connecting phase; the result arrives through the `select!` loop.
    async fn open(&mut self) {
        self.publish_state().await;
        let url = self.config.url.clone();
        let timeout = self.config.connect_timeout;
        self.dial = Some(Box::pin(async move {
            match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(&url)).await {
                Ok(Ok((ws, _))) => Ok(ws),
                Ok(Err(e)) => Err(format!("connect {}: {}", url, e)),
                Err(_) => Err(format!("connect {}: timed out", url)),
            }
        }));
    }

    fn abort_dial(&mut self) {
        if self.dial.take().is_some() {
            debug!("Aborted connect to {}", self.config.url);
        }
    }

    async fn dialed(&mut self, result: Result<WsStream, String>) {
        match result {
            Ok(ws) => {
                info!("Connected to {}", self.config.url);
                self.socket = Some(ws);
                let queued = self.link.on_open();
                self.publish_state().await;

                let mut frames = Vec::with_capacity(queued.len() + 1);
                frames.extend(self.handshake.clone());
                if !queued.is_empty() {
                    info!("Replaying {} queued frames", queued.len());
                }
                let handshake_len = frames.len();
                frames.extend(queued);
                self.write_all(frames, handshake_len).await;
            }
            Err(e) => {
                self.report(e).await;
                self.closed().await;
            }
        }
    }

    /// Write frames in order. On failure the unwritten ones (minus the
    /// leading `skip` handshake frames) go back to the queue.
    async fn write_all(&mut self, frames: Vec<String>, skip: usize) {
        let mut iter = frames.into_iter().enumerate();
        while let Some((i, frame)) = iter.next() {
            if let Err(e) = self.write(frame.clone()).await {
                let mut rest: Vec<String> = Vec::new();
                if i >= skip {
                    rest.push(frame);
                }
                rest.extend(iter.filter(|(j, _)| *j >= skip).map(|(_, f)| f));
                self.link.restore(rest);
                self.lost(e).await;
                return;
            }
        }
    }

    async fn write(&mut self, frame: String) -> Result<(), String> {
        let Some(ws) = self.socket.as_mut() else {
            return Err("socket not open".to_string());
        };
        ws.send(Message::Text(frame.into()))
            .await
            .map_err(|e| e.to_string())
    }

    async fn handle_frame(
        &mut self,
        frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ) {
        let parsed = match frame {
            Some(Ok(Message::Text(text))) => WireMessage::decode(&text),
            Some(Ok(Message::Binary(bytes))) => WireMessage::decode_bytes(&bytes),
            Some(Ok(Message::Close(_))) | None => {
                debug!("Socket closed by peer");
                self.socket = None;
                self.closed().await;
                return;
            }
            Some(Ok(_)) => return,
            Some(Err(e)) => {
                // The stream is unusable after a read error.
                self.lost(e.to_string()).await;
                return;
            }
        };
        match parsed {
            Ok(msg) => {
                let _ = self.events.send(TransportEvent::Message(msg)).await;
            }
            Err(e) => warn!("Dropping malformed frame: {}", e),
        }
    }

    async fn lost(&mut self, error: String) {
        self.report(error).await;
        self.socket = None;
        self.closed().await;
    }

    async fn closed(&mut self) {
        match self.link.on_close() {
            Some(delay) => {
                info!(
                    "Reconnecting in {:?} (attempt {}/{})",
                    delay,
                    self.link.attempts(),
                    self.config.max_reconnect_attempts
                );
                self.reconnect_at = Some(tokio::time::Instant::now() + delay);
            }
            None if self.link.is_halted() => {
                warn!("Giving up on {} after {} attempts", self.config.url, self.link.attempts());
            }
            None => {}
        }
        self.publish_state().await;
    }

    async fn close_socket(&mut self) {
        if let Some(mut ws) = self.socket.take() {
            let _ = ws.close(None).await;
        }
    }

    async fn report(&self, error: String) {
        warn!("Transport error: {}", error);
        let _ = self.events.send(TransportEvent::Error(error)).await;
    }

    async fn publish_state(&self) {
        let state = self.link.state();
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            let _ = self.events.send(TransportEvent::State(state)).await;
        }
    }
}

async fn next_frame(
    socket: &mut Option<WsStream>,
) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match socket {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}

async fn next_dial(dial: &mut Option<PendingDial>) -> Result<WsStream, String> {
    match dial {
        Some(dial) => dial.await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(at: Option<tokio::time::Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(3000);

    fn machine() -> LinkMachine {
        LinkMachine::new(5, DELAY, 10_000)
    }

    #[test]
    fn test_queue_capacity() {
        let mut queue = OutboundQueue::new(2);
        assert!(queue.enqueue("a".into()));
        assert!(queue.enqueue("bb".into()));
        assert!(!queue.enqueue("c".into()));
        assert_eq!(queue.total_bytes(), 3);
        assert!(queue.oldest_age().is_some());
        assert_eq!(queue.drain(), vec!["a".to_string(), "bb".to_string()]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_restore_keeps_order() {
        let mut queue = OutboundQueue::new(10);
        queue.enqueue("c".into());
        queue.restore(vec!["a".into(), "b".into()]);
        assert_eq!(queue.drain(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_send_while_idle_connects_and_queues() {
        let mut link = machine();
        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert_eq!(link.send("1".into()), Ok(SendAction::QueuedAndConnect));
        assert_eq!(link.state(), ConnectionState::Connecting);
        assert_eq!(link.send("2".into()), Ok(SendAction::Queued));
        assert_eq!(link.send("3".into()), Ok(SendAction::Queued));
        assert_eq!(link.on_open(), vec!["1", "2", "3"]);
        assert_eq!(link.state(), ConnectionState::Connected);
        assert_eq!(link.send("4".into()), Ok(SendAction::Transmit("4".into())));
        assert_eq!(link.queued(), 0);
    }

    #[test]
    fn test_reconnect_cap() {
        let mut link = machine();
        assert!(link.connect());
        // Every attempt fails.
        for attempt in 1..=5 {
            assert_eq!(link.on_close(), Some(DELAY));
            assert_eq!(link.attempts(), attempt);
            assert_eq!(link.state(), ConnectionState::Reconnecting);
            assert!(link.on_reconnect_due());
        }
        assert_eq!(link.on_close(), None);
        assert!(link.is_halted());
        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert!(!link.on_reconnect_due());
    }

    #[test]
    fn test_open_resets_attempts() {
        let mut link = machine();
        link.connect();
        link.on_close();
        link.on_reconnect_due();
        link.on_close();
        assert_eq!(link.attempts(), 2);
        link.on_reconnect_due();
        link.on_open();
        assert_eq!(link.attempts(), 0);
        assert_eq!(link.on_close(), Some(DELAY));
        assert_eq!(link.attempts(), 1);
    }

    #[test]
    fn test_halted_queues_without_reconnecting() {
        let mut link = LinkMachine::new(0, DELAY, 10);
        link.connect();
        assert_eq!(link.on_close(), None);
        assert!(link.is_halted());
        assert_eq!(link.send("x".into()), Ok(SendAction::Queued));
        assert_eq!(link.queued(), 1);
        assert!(link.connect());
        assert_eq!(link.on_open(), vec!["x"]);
    }

    #[test]
    fn test_disconnect_clears_queue_and_stops() {
        let mut link = machine();
        link.send("a".into()).unwrap();
        link.disconnect();
        assert_eq!(link.queued(), 0);
        assert_eq!(link.on_close(), None);
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_connect_during_backoff_cancels_timer() {
        let mut link = machine();
        link.connect();
        link.on_open();
        assert_eq!(link.on_close(), Some(DELAY));
        assert!(link.connect());
        assert_eq!(link.attempts(), 0);
        // Stale timer is ignored.
        assert!(!link.on_reconnect_due());
        assert!(!link.connect());
    }

    #[test]
    fn test_queue_full_is_an_error() {
        let mut link = LinkMachine::new(5, DELAY, 2);
        link.connect();
        link.send("a".into()).unwrap();
        link.send("b".into()).unwrap();
        assert_eq!(link.send("c".into()), Err(ProtocolError::QueueFull(2)));
    }

    #[tokio::test]
    async fn test_unreachable_server_reports_and_schedules() {
        let config = TransportConfig {
            url: "ws://127.0.0.1:1/ws/board/none".into(),
            reconnect_delay: Duration::from_secs(60),
            ..TransportConfig::default()
        };
        let (transport, mut events) = Transport::spawn(config, None);
        transport.connect().await.unwrap();

        let mut saw_error = false;
        let mut saw_reconnecting = false;
        while !(saw_error && saw_reconnecting) {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("timed out")
                .expect("channel closed");
            match event {
                TransportEvent::Error(_) => saw_error = true,
                TransportEvent::State(ConnectionState::Reconnecting) => saw_reconnecting = true,
                _ => {}
            }
        }
        assert_eq!(transport.state(), ConnectionState::Reconnecting);
        transport.shutdown().await;
    }
}
