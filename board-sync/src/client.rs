//! Async board client.
//!
//! Runs a [`BoardSession`] and a [`Transport`] on one task, so the store,
//! drafts and drag state are only ever touched from one place:
//!
//! ```text
//!   dispatch(Intent) ──► commands ─┐
//!   transport events ──────────────┼──► select! ──► session ──► transport.send
//!   next timer deadline ───────────┘                   │
//!                                                      └──► watch<BoardState>
//! ```

use std::time::Instant;

use log::{debug, trace};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::protocol::{ProtocolError, WireMessage};
use crate::session::{BoardSession, Intent};
use crate::store::BoardState;
use crate::transport::{ConnectionState, Transport, TransportEvent};

/// Notifications for the application.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Board content changed, locally or from the server.
    BoardChanged { version: u64 },
    Connection(ConnectionState),
    Error(String),
}

#[derive(Debug)]
enum Command {
    Intent(Intent),
    Connect,
    Disconnect,
    Shutdown,
}

/// Handle to a running board client.
pub struct BoardClient {
    config: SyncConfig,
    commands: mpsc::Sender<Command>,
    board: watch::Receiver<BoardState>,
    connection: watch::Receiver<ConnectionState>,
    event_rx: Option<mpsc::Receiver<ClientEvent>>,
    task: Option<JoinHandle<()>>,
}

impl BoardClient {
    /// Start the client task. Must be called inside a tokio runtime.
    ///
    /// Nothing connects until [`connect`](Self::connect) or the first send.
    pub fn spawn(config: SyncConfig) -> Result<Self, ProtocolError> {
        let session = BoardSession::new(&config)?;
        let (transport, inbound) = Transport::spawn(config.transport(), Some(session.handshake()));
        let connection = transport.subscribe();
        let (board_tx, board_rx) = watch::channel(session.state().clone());
        let (cmd_tx, cmd_rx) = mpsc::channel(config.channel_capacity);
        let (event_tx, event_rx) = mpsc::channel(config.channel_capacity);

        let task = tokio::spawn(run(session, transport, inbound, cmd_rx, board_tx, event_tx));

        Ok(Self {
            config,
            commands: cmd_tx,
            board: board_rx,
            connection,
            event_rx: Some(event_rx),
            task: Some(task),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    pub async fn connect(&self) -> Result<(), ProtocolError> {
        self.command(Command::Connect).await
    }

    /// Close the socket, cancel reconnects and drop queued frames.
    pub async fn disconnect(&self) -> Result<(), ProtocolError> {
        self.command(Command::Disconnect).await
    }

    pub async fn dispatch(&self, intent: Intent) -> Result<(), ProtocolError> {
        self.command(Command::Intent(intent)).await
    }

    /// Latest board snapshot.
    pub fn board(&self) -> BoardState {
        self.board.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BoardState> {
        self.board.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    /// Flush an in-flight drag, then close everything.
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

async fn run(
    mut session: BoardSession,
    transport: Transport,
    mut inbound: mpsc::Receiver<TransportEvent>,
    mut commands: mpsc::Receiver<Command>,
    board_tx: watch::Sender<BoardState>,
    events: mpsc::Sender<ClientEvent>,
) {
    loop {
        let deadline = session.next_deadline().map(tokio::time::Instant::from_std);
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(Command::Intent(intent)) => {
                    let out = session.dispatch(intent, Instant::now());
                    send_all(&transport, out, &events).await;
                    publish(&session, &board_tx, &events);
                }
                Some(Command::Connect) => {
                    if transport.connect().await.is_err() {
                        break;
                    }
                }
                Some(Command::Disconnect) => {
                    session.cancel_timers();
                    if transport.disconnect().await.is_err() {
                        break;
                    }
                }
                Some(Command::Shutdown) | None => break,
            },
            event = inbound.recv() => match event {
                Some(TransportEvent::Message(msg)) => {
                    let kind = msg.kind();
                    let before = session.state().version();
                    let outcome = session.handle_inbound(msg);
                    trace!("Inbound {} -> {:?}", kind, outcome);
                    if outcome.changed() || session.state().version() != before {
                        publish(&session, &board_tx, &events);
                    }
                }
                Some(TransportEvent::State(state)) => notify(&events, ClientEvent::Connection(state)),
                Some(TransportEvent::Error(e)) => notify(&events, ClientEvent::Error(e)),
                None => break,
            },
            _ = sleep_until(deadline) => {
                let out = session.poll_timers(Instant::now());
                send_all(&transport, out, &events).await;
            }
        }
    }

    let out = session.teardown();
    send_all(&transport, out, &events).await;
    publish(&session, &board_tx, &events);
    transport.shutdown().await;
    debug!("Board client stopped");
}

async fn send_all(transport: &Transport, out: Vec<WireMessage>, events: &mpsc::Sender<ClientEvent>) {
    for msg in out {
        if let Err(e) = transport.send(msg).await {
            notify(events, ClientEvent::Error(e.to_string()));
        }
    }
}

fn publish(session: &BoardSession, board_tx: &watch::Sender<BoardState>, events: &mpsc::Sender<ClientEvent>) {
    let state = session.state();
    board_tx.send_replace(state.clone());
    notify(
        events,
        ClientEvent::BoardChanged {
            version: state.version(),
        },
    );
}

fn notify(events: &mpsc::Sender<ClientEvent>, event: ClientEvent) {
    if events.try_send(event).is_err() {
        trace!("Client event dropped (no listener or channel full)");
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
    use crate::protocol::NoteColor;
    use board_layout::Point;
    use std::time::Duration;

    fn offline_config() -> SyncConfig {
        SyncConfig {
            reconnect_delay: Duration::from_secs(60),
            ..SyncConfig::new("ws://127.0.0.1:1", "offline")
        }
    }

    #[tokio::test]
    async fn test_local_intent_updates_board_while_offline() {
        let mut client = BoardClient::spawn(offline_config()).unwrap();
        let mut events = client.take_event_rx().unwrap();
        assert!(client.take_event_rx().is_none());
        let mut board = client.subscribe();

        client
            .dispatch(Intent::CreateNote {
                color: NoteColor::Mint,
                at: Some(Point::new(10.0, 20.0)),
            })
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), board.wait_for(|b| b.len() == 1))
            .await
            .expect("timed out")
            .unwrap();
        let note = client.board().notes().next().cloned().unwrap();
        assert_eq!((note.x, note.y), (10.0, 20.0));

        let mut changed = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(500), events.recv()).await
        {
            if matches!(event, ClientEvent::BoardChanged { .. }) {
                changed = true;
                break;
            }
        }
        assert!(changed);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_disconnect_is_terminal() {
        let client = BoardClient::spawn(offline_config()).unwrap();
        client.connect().await.unwrap();
        client.disconnect().await.unwrap();
        let mut state = client.subscribe_connection();
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == ConnectionState::Disconnected),
        )
        .await
        .expect("timed out")
        .unwrap();
        client.shutdown().await;
    }
}
