//! # board-sync: real-time sync engine for a shared sticky-note board
//!
//! Clients edit a shared board of notes optimistically and converge through
//! a relay server that versions every mutation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   JSON over WebSocket   ┌──────────────┐
//! │ BoardClient  │ ◄─────────────────────► │ BoardServer  │
//! │ (per user)   │   /ws/board/{id}        │ (relay)      │
//! └──────┬───────┘                         └──────┬───────┘
//!        │                                        │
//!        ▼                                        ▼
//! ┌──────────────┐                         ┌──────────────┐
//! │ BoardSession │                         │ BoardRoom    │
//! │  Reconciler  │  version gate           │  BoardState  │
//! │  Composition │  IME + debounce         │  (canonical) │
//! │  Drag + Snap │  throttled moves        └──────┬───────┘
//! └──────┬───────┘                                │
//!        ▼                                 ┌──────┴───────┐
//! ┌──────────────┐                         │BroadcastGroup│
//! │ Transport    │  reconnect + queue      │ (fan-out)    │
//! └──────────────┘                         └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire events (`note.move`, `sync.state`, ...)
//! - [`store`]: local board state, whole-field writes
//! - [`reconciler`]: version-gated application of remote events
//! - [`composition`]: per-field drafts, IME composition, debounce
//! - [`drag`]: snapped drag preview with throttled position sends
//! - [`transport`]: reconnecting socket with an outbound queue
//! - [`session`]: intents in, wire messages out (no I/O)
//! - [`client`]: async client running a session over a transport
//! - [`broadcast`], [`server`]: reference relay server

pub mod broadcast;
pub mod client;
pub mod composition;
pub mod config;
pub mod drag;
pub mod protocol;
pub mod reconciler;
pub mod server;
pub mod session;
pub mod store;
pub mod transport;

// Re-exports for convenience
pub use board_layout::{Point, Size, SnapConfig, SnapGuides};
pub use broadcast::{BoardRoom, BroadcastGroup, BroadcastStats, RoomManager};
pub use client::{BoardClient, ClientEvent};
pub use composition::{Commit, CompositionBuffer, Draft, FieldId};
pub use config::{DebugFlags, SyncConfig, TransportConfig};
pub use drag::{DragController, DragFrame, DragRefusal};
pub use protocol::{
    BoardEvent, GridMode, Note, NoteColor, NoteId, ProtocolError, WireMessage, SECTION_KEYS,
};
pub use reconciler::{Outcome, Reconciler};
pub use server::{BoardServer, ServerConfig, ServerStats};
pub use session::{BoardSession, Intent};
pub use store::BoardState;
pub use transport::{
    ConnectionState, LinkMachine, OutboundQueue, SendAction, Transport, TransportEvent,
};
