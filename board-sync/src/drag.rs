//! Drag gesture handling: snapping, local preview and throttled sends.
//!
//! Every pointer frame is snapped and previewed locally. Position sends are
//! rate-limited through a single-slot queue:
//!
//! ```text
//!   frame ──► queued = latest ──► (now - last_sent >= throttle) ? send : hold
//!   tick  ──► every flush interval, send whatever is held
//!   end   ──► always send the final position, clear guides
//! ```
//!
//! Intermediate positions may be skipped, never reordered, and the final
//! position is never lost.

use std::time::{Duration, Instant};

use board_layout::{Point, Size, SnapEngine, SnapGuides};
use log::{debug, trace};

use crate::config::DebugFlags;
use crate::protocol::{BoardEvent, Note, NoteId};

/// Result of one pointer frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DragFrame {
    /// Snapped and clamped position for local preview.
    pub position: Point,
    pub guides: SnapGuides,
    /// Position to transmit now, if the throttle allows.
    pub outbound: Option<BoardEvent>,
}

#[derive(Debug, Clone)]
struct ActiveDrag {
    id: NoteId,
    /// Pointer offset from the note's top-left corner at grab time.
    grab: Point,
    last_position: Option<Point>,
}

/// Refusal to start a drag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragRefusal {
    Pinned,
}

pub struct DragController {
    engine: SnapEngine,
    throttle: Duration,
    flush_interval: Duration,
    active: Option<ActiveDrag>,
    queued: Option<Point>,
    last_sent: Option<Instant>,
    next_flush: Option<Instant>,
    guides: SnapGuides,
    debug: DebugFlags,
}

impl DragController {
    pub fn new(
        engine: SnapEngine,
        throttle: Duration,
        flush_interval: Duration,
        debug: DebugFlags,
    ) -> Self {
        Self {
            engine,
            throttle,
            flush_interval,
            active: None,
            queued: None,
            last_sent: None,
            next_flush: None,
            guides: SnapGuides::default(),
            debug,
        }
    }

    pub fn engine(&self) -> &SnapEngine {
        &self.engine
    }

    pub fn is_dragging(&self) -> bool {
        self.active.is_some()
    }

    pub fn dragged_id(&self) -> Option<&str> {
        self.active.as_ref().map(|d| d.id.as_str())
    }

    /// Guide lines for the current frame. Empty when idle.
    pub fn guides(&self) -> SnapGuides {
        self.guides
    }

    /// Start dragging `note` grabbed at `pointer`.
    ///
    /// A new gesture replaces whatever the previous one left queued.
    pub fn begin(&mut self, note: &Note, pointer: Point, now: Instant) -> Result<(), DragRefusal> {
        if note.pinned {
            debug!("Refusing to drag pinned note {}", note.id);
            return Err(DragRefusal::Pinned);
        }
        self.active = Some(ActiveDrag {
            id: note.id.clone(),
            grab: Point::new(pointer.x - note.x, pointer.y - note.y),
            last_position: None,
        });
        self.queued = None;
        self.last_sent = None;
        self.next_flush = Some(now + self.flush_interval);
        self.guides = SnapGuides::default();
        if self.debug.log_drag {
            debug!("Drag start {} at ({}, {})", note.id, note.x, note.y);
        }
        Ok(())
    }

    /// Pointer moved. `siblings` are the other notes' positions.
    pub fn update<I>(
        &mut self,
        pointer: Point,
        siblings: I,
        container: Size,
        now: Instant,
    ) -> Option<DragFrame>
    where
        I: IntoIterator<Item = Point>,
    {
        let active = self.active.as_mut()?;
        let tentative = Point::new(pointer.x - active.grab.x, pointer.y - active.grab.y);
        let result = self.engine.resolve(tentative, siblings, container);
        active.last_position = Some(result.position);
        self.guides = result.guides;
        self.queued = Some(result.position);

        let due = self
            .last_sent
            .is_none_or(|sent| now.duration_since(sent) >= self.throttle);
        let outbound = if due { self.flush(now) } else { None };
        if self.debug.log_drag_verbose {
            trace!(
                "Drag frame ({:.1}, {:.1}) sent={}",
                result.position.x,
                result.position.y,
                outbound.is_some()
            );
        }

        Some(DragFrame {
            position: result.position,
            guides: result.guides,
            outbound,
        })
    }

    /// Periodic flush of a held position.
    pub fn tick(&mut self, now: Instant) -> Option<BoardEvent> {
        let at = self.next_flush?;
        if now < at {
            return None;
        }
        self.next_flush = Some(now + self.flush_interval);
        self.flush(now)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        if self.queued.is_some() {
            self.next_flush
        } else {
            None
        }
    }

    /// Release. Sends the final position unconditionally.
    pub fn end(&mut self) -> Option<BoardEvent> {
        let active = self.active.take()?;
        self.queued = None;
        self.last_sent = None;
        self.next_flush = None;
        self.guides = SnapGuides::default();
        let position = active.last_position?;
        if self.debug.log_drag {
            debug!("Drag end {} at ({}, {})", active.id, position.x, position.y);
        }
        Some(BoardEvent::NoteMove {
            id: active.id,
            x: position.x,
            y: position.y,
        })
    }

    /// Abandon the gesture without sending anything.
    pub fn cancel(&mut self) -> bool {
        let was_active = self.active.take().is_some();
        self.queued = None;
        self.last_sent = None;
        self.next_flush = None;
        self.guides = SnapGuides::default();
        was_active
    }

    fn flush(&mut self, now: Instant) -> Option<BoardEvent> {
        let position = self.queued.take()?;
        let active = self.active.as_ref()?;
        self.last_sent = Some(now);
        if self.debug.log_drag {
            debug!("Drag send {} ({:.1}, {:.1})", active.id, position.x, position.y);
        }
        Some(BoardEvent::NoteMove {
            id: active.id.clone(),
            x: position.x,
            y: position.y,
        })
    }
}
