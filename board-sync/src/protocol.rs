//! JSON wire protocol for board events.
//!
//! Every frame is one JSON object tagged by `type`, with an optional
//! server-assigned `version`:
//!
//! ```text
//! { "type": "note.move", "version": 42, "id": "k3x9", "x": 120, "y": 80 }
//! ```
//!
//! | type                 | payload                                          |
//! |----------------------|--------------------------------------------------|
//! | `note.add`           | `note`                                           |
//! | `note.move`          | `id`, `x`, `y`                                   |
//! | `note.update`        | `id`, `text`                                     |
//! | `note.pin`           | `id`, `isPinned`                                 |
//! | `board.gridMode`     | `mode`                                           |
//! | `board.sectionTitle` | `section`, `title`                               |
//! | `board.reset`        | (none)                                           |
//! | `sync.request`       | (none)                                           |
//! | `sync.state`         | `notes`, `gridMode`, `sectionTitles`             |

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Note identifier. Unique within a board, never reassigned.
pub type NoteId = String;

/// Section title keys used by the grid layouts.
pub const SECTION_KEYS: [&str; 8] = [
    "left",
    "right",
    "top",
    "bottom",
    "topLeft",
    "topRight",
    "bottomLeft",
    "bottomRight",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteColor {
    #[default]
    Yellow,
    Pink,
    Mint,
    Purple,
    Orange,
}

/// Background partition of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GridMode {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "2-col")]
    TwoColumns,
    #[serde(rename = "2-row")]
    TwoRows,
    #[serde(rename = "4-grid")]
    FourGrid,
}

impl GridMode {
    /// Section keys that carry a visible title in this mode.
    pub fn sections(&self) -> &'static [&'static str] {
        match self {
            GridMode::None => &[],
            GridMode::TwoColumns => &SECTION_KEYS[0..2],
            GridMode::TwoRows => &SECTION_KEYS[2..4],
            GridMode::FourGrid => &SECTION_KEYS[4..8],
        }
    }
}

/// A movable, editable note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    #[serde(default)]
    pub text: String,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub color: NoteColor,
    #[serde(rename = "isPinned", default)]
    pub pinned: bool,
    /// Paint order; higher is on top. Local-only, never broadcast on its own.
    #[serde(rename = "zIndex", default)]
    pub stack_order: i64,
}

impl Note {
    pub fn new(id: impl Into<NoteId>, x: f64, y: f64, color: NoteColor) -> Self {
        Self {
            id: id.into(),
            text: String::new(),
            x,
            y,
            color,
            pinned: false,
            stack_order: 0,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }
}

/// Board events, tagged by their wire `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BoardEvent {
    #[serde(rename = "note.add")]
    NoteAdd { note: Note },

    #[serde(rename = "note.move")]
    NoteMove { id: NoteId, x: f64, y: f64 },

    #[serde(rename = "note.update")]
    NoteUpdate { id: NoteId, text: String },

    #[serde(rename = "note.pin")]
    NotePin {
        id: NoteId,
        #[serde(rename = "isPinned")]
        pinned: bool,
    },

    #[serde(rename = "board.gridMode")]
    BoardGridMode { mode: GridMode },

    #[serde(rename = "board.sectionTitle")]
    BoardSectionTitle { section: String, title: String },

    /// Board wipe. The full snapshot that follows carries the new state.
    #[serde(rename = "board.reset")]
    BoardReset,

    #[serde(rename = "sync.request")]
    SyncRequest,

    /// Full authoritative snapshot.
    #[serde(rename = "sync.state")]
    SyncState {
        notes: Vec<Note>,
        #[serde(rename = "gridMode", default)]
        grid_mode: GridMode,
        #[serde(rename = "sectionTitles", default)]
        section_titles: BTreeMap<String, String>,
    },
}

impl BoardEvent {
    /// Wire `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            BoardEvent::NoteAdd { .. } => "note.add",
            BoardEvent::NoteMove { .. } => "note.move",
            BoardEvent::NoteUpdate { .. } => "note.update",
            BoardEvent::NotePin { .. } => "note.pin",
            BoardEvent::BoardGridMode { .. } => "board.gridMode",
            BoardEvent::BoardSectionTitle { .. } => "board.sectionTitle",
            BoardEvent::BoardReset => "board.reset",
            BoardEvent::SyncRequest => "sync.request",
            BoardEvent::SyncState { .. } => "sync.state",
        }
    }

    /// Note targeted by this event, if any.
    pub fn note_id(&self) -> Option<&str> {
        match self {
            BoardEvent::NoteAdd { note } => Some(&note.id),
            BoardEvent::NoteMove { id, .. }
            | BoardEvent::NoteUpdate { id, .. }
            | BoardEvent::NotePin { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Whether the event changes board content (as opposed to control traffic).
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            BoardEvent::BoardReset | BoardEvent::SyncRequest | BoardEvent::SyncState { .. }
        )
    }
}

/// One frame on the wire: an event plus its optional server version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(flatten)]
    pub event: BoardEvent,
}

impl WireMessage {
    /// Unversioned message, as sent by clients.
    pub fn new(event: BoardEvent) -> Self {
        Self {
            version: None,
            event,
        }
    }

    /// Versioned message, as broadcast by the server.
    pub fn versioned(version: u64, event: BoardEvent) -> Self {
        Self {
            version: Some(version),
            event,
        }
    }

    pub fn sync_request() -> Self {
        Self::new(BoardEvent::SyncRequest)
    }

    pub fn is_snapshot(&self) -> bool {
        matches!(self.event, BoardEvent::SyncState { .. })
    }

    pub fn kind(&self) -> &'static str {
        self.event.kind()
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Parse a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }

    /// Parse a binary frame carrying UTF-8 JSON.
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

impl From<BoardEvent> for WireMessage {
    fn from(event: BoardEvent) -> Self {
        Self::new(event)
    }
}

/// Protocol and transport errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Outbound queue full ({0} frames)")]
    QueueFull(usize),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] board_layout::LayoutError),
}
