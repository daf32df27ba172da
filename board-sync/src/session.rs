//! Board session: user intents in, wire messages out.
//!
//! Owns the store (through the [`Reconciler`]), the composition buffer and
//! the drag controller. Performs no I/O; the caller moves messages to and
//! from the transport and drives timers through [`BoardSession::poll_timers`].

use std::time::Instant;

use board_layout::{Point, Size, SnapEngine, SnapGuides};
use log::{debug, info};
use uuid::Uuid;

use crate::composition::{CompositionBuffer, Draft, FieldId};
use crate::config::{DebugFlags, SyncConfig};
use crate::drag::{DragController, DragFrame};
use crate::protocol::{BoardEvent, GridMode, Note, NoteColor, NoteId, ProtocolError, WireMessage};
use crate::reconciler::{Outcome, Reconciler};
use crate::store::BoardState;

/// A user action on the board.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// New note. Without a position it lands near the board center.
    CreateNote { color: NoteColor, at: Option<Point> },
    BeginDrag { id: NoteId, pointer: Point },
    DragTo { pointer: Point },
    EndDrag,
    TogglePin { id: NoteId },
    SetGridMode { mode: GridMode },
    /// Field gained focus.
    BeginEdit { field: FieldId },
    /// Plain keystroke input.
    Edit { field: FieldId, value: String },
    CompositionStart { field: FieldId },
    CompositionUpdate { field: FieldId, value: String },
    CompositionEnd { field: FieldId, value: String },
    /// Blur or enter.
    Commit { field: FieldId },
    /// Escape.
    Revert { field: FieldId },
    ResetBoard,
    /// Board area changed size.
    Resize { container: Size },
}

pub struct BoardSession {
    reconciler: Reconciler,
    drafts: CompositionBuffer,
    drag: DragController,
    container: Size,
    debug: DebugFlags,
}

impl BoardSession {
    pub fn new(config: &SyncConfig) -> Result<Self, ProtocolError> {
        let engine = SnapEngine::new(config.snap)?;
        Ok(Self {
            reconciler: Reconciler::new(config.debug),
            drafts: CompositionBuffer::new(config.edit_debounce),
            drag: DragController::new(
                engine,
                config.drag_throttle,
                config.drag_flush_interval,
                config.debug,
            ),
            container: config.container,
            debug: config.debug,
        })
    }

    pub fn state(&self) -> &BoardState {
        self.reconciler.state()
    }

    pub fn draft(&self, field: &FieldId) -> Option<&Draft> {
        self.drafts.draft(field)
    }

    /// Text to show for a field: the draft if one is open, else the store.
    pub fn display_value(&self, field: &FieldId) -> Option<&str> {
        match self.drafts.draft(field) {
            Some(d) => Some(d.pending_value.as_str()),
            None => self.state().field_value(field),
        }
    }

    pub fn guides(&self) -> SnapGuides {
        self.drag.guides()
    }

    pub fn container(&self) -> Size {
        self.container
    }

    /// First message on every (re)connect.
    pub fn handshake(&self) -> WireMessage {
        WireMessage::sync_request()
    }

    pub fn handle_inbound(&mut self, msg: WireMessage) -> Outcome {
        self.reconciler.apply_remote(msg, &mut self.drafts)
    }

    /// Apply an intent locally and return the messages to send.
    pub fn dispatch(&mut self, intent: Intent, now: Instant) -> Vec<WireMessage> {
        let mut out = Vec::new();
        match intent {
            Intent::CreateNote { color, at } => {
                let note = self.new_note(color, at);
                if self.debug.log_create {
                    info!("Created note {} at ({}, {})", note.id, note.x, note.y);
                }
                out.push(self.reconciler.apply_local(BoardEvent::NoteAdd { note }));
            }
            Intent::BeginDrag { id, pointer } => {
                let Some(note) = self.state().note(&id).cloned() else {
                    debug!("Drag on unknown note {}", id);
                    return out;
                };
                if self.drag.begin(&note, pointer, now).is_ok() {
                    self.reconciler.state_mut().raise(&id);
                }
            }
            Intent::DragTo { pointer } => {
                if let Some(frame) = self.drag_frame(pointer, now) {
                    let id = self.drag.dragged_id().map(str::to_string);
                    if let Some(id) = id {
                        let p = frame.position;
                        self.reconciler.state_mut().set_position(&id, p.x, p.y);
                    }
                    if let Some(event) = frame.outbound {
                        out.push(WireMessage::new(event));
                    }
                }
            }
            Intent::EndDrag => {
                if let Some(event) = self.drag.end() {
                    out.push(self.reconciler.apply_local(event));
                }
            }
            Intent::TogglePin { id } => match self.state().note(&id) {
                Some(note) => {
                    let pinned = !note.pinned;
                    out.push(self.reconciler.apply_local(BoardEvent::NotePin { id, pinned }));
                }
                None => debug!("Pin toggle on unknown note {}", id),
            },
            Intent::SetGridMode { mode } => {
                out.push(self.reconciler.apply_local(BoardEvent::BoardGridMode { mode }));
            }
            Intent::BeginEdit { field } => {
                if let Some(current) = self.current_value(&field) {
                    self.drafts.begin_edit(field, current);
                }
            }
            Intent::Edit { field, value } => {
                if let Some(current) = self.current_value(&field) {
                    self.log_section(&field, "edit", &value);
                    self.reconciler.state_mut().set_field(&field, &value);
                    self.drafts.edit(field, current, value, now);
                }
            }
            Intent::CompositionStart { field } => {
                if let Some(current) = self.current_value(&field) {
                    self.log_section(&field, "composition start", &current);
                    self.drafts.composition_start(field, current);
                }
            }
            Intent::CompositionUpdate { field, value } => {
                if let Some(current) = self.current_value(&field) {
                    self.reconciler.state_mut().set_field(&field, &value);
                    self.drafts.composition_update(field, current, value);
                }
            }
            Intent::CompositionEnd { field, value } => {
                if self.state().has_field(&field) {
                    self.log_section(&field, "composition end", &value);
                    let commit = self.drafts.composition_end(field, value);
                    out.push(self.reconciler.apply_local(commit.into_event()));
                }
            }
            Intent::Commit { field } => {
                if let Some(commit) = self.drafts.commit(&field) {
                    if self.state().has_field(&commit.field) {
                        self.log_section(&commit.field, "commit", &commit.value);
                        out.push(self.reconciler.apply_local(commit.into_event()));
                    }
                }
            }
            Intent::Revert { field } => {
                if let Some(base) = self.drafts.revert(&field) {
                    self.log_section(&field, "revert", &base);
                    self.reconciler.state_mut().set_field(&field, &base);
                }
            }
            Intent::ResetBoard => {
                self.drafts.clear();
                out.push(self.reconciler.apply_local(BoardEvent::BoardReset));
            }
            Intent::Resize { container } => {
                self.container = container;
            }
        }
        out
    }

    /// Fire due timers: debounced edits and the periodic drag flush.
    pub fn poll_timers(&mut self, now: Instant) -> Vec<WireMessage> {
        let mut out: Vec<WireMessage> = self
            .drafts
            .poll_expired(now)
            .into_iter()
            .filter(|c| self.reconciler.state().has_field(&c.field))
            .map(|c| WireMessage::new(c.into_event()))
            .collect();
        if let Some(event) = self.drag.tick(now) {
            out.push(WireMessage::new(event));
        }
        out
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.drafts.next_deadline(), self.drag.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Disconnect: stop every timer so nothing is sent later. Open drafts
    /// keep their text; an in-flight drag is abandoned where it is.
    pub fn cancel_timers(&mut self) {
        let edits = self.drafts.cancel_deadlines();
        let dragging = self.drag.cancel();
        if edits > 0 || dragging {
            debug!("Cancelled {} pending edit(s), drag active: {}", edits, dragging);
        }
    }

    /// Shutdown: flush an in-flight drag, drop pending edits unsent.
    pub fn teardown(&mut self) -> Vec<WireMessage> {
        self.drafts.clear();
        self.drag
            .end()
            .map(|event| self.reconciler.apply_local(event))
            .into_iter()
            .collect()
    }

    fn drag_frame(&mut self, pointer: Point, now: Instant) -> Option<DragFrame> {
        let dragged = self.drag.dragged_id()?.to_string();
        let siblings: Vec<Point> = self
            .state()
            .notes()
            .filter(|n| n.id != dragged)
            .map(|n| Point::new(n.x, n.y))
            .collect();
        let container = self.container;
        self.drag.update(pointer, siblings, container, now)
    }

    fn new_note(&self, color: NoteColor, at: Option<Point>) -> Note {
        let footprint = self.drag.engine().config().footprint;
        let target = at.unwrap_or_else(|| {
            Point::new(
                (self.container.width - footprint.width) / 2.0,
                (self.container.height - footprint.height) / 2.0,
            )
        });
        let position = self.drag.engine().clamp(target, self.container);
        Note {
            stack_order: self.state().top_stack_order() + 1,
            ..Note::new(Uuid::new_v4().simple().to_string(), position.x, position.y, color)
        }
    }

    fn current_value(&self, field: &FieldId) -> Option<String> {
        let value = self.display_value(field).map(str::to_string);
        if value.is_none() {
            debug!("Edit on missing field {:?}", field);
        }
        value
    }

    fn log_section(&self, field: &FieldId, what: &str, value: &str) {
        if self.debug.log_section {
            if let FieldId::SectionTitle(key) = field {
                debug!("Section {} {}: {:?}", key, what, value);
            }
        }
    }
}
