//! Version-gated application of remote events.
//!
//! ```text
//!   inbound ──► version gate ──► composing? ──► store (whole-field write)
//!                  │                 │
//!                  ▼                 ▼
//!               Stale            Suppressed
//! ```
//!
//! * A versioned event at or below the local version is dropped whole.
//!   `sync.state` is exempt: it always replaces local content, and its
//!   version becomes the local baseline.
//! * A remote text for a field the user is composing is suppressed; the
//!   local composition wins until it ends.
//! * Local edits are applied optimistically and returned unversioned.

use log::{debug, trace};

use crate::composition::{CompositionBuffer, FieldId};
use crate::config::DebugFlags;
use crate::protocol::{BoardEvent, WireMessage};
use crate::store::BoardState;

/// What happened to an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Applied to the store (unknown ids are a silent no-op).
    Applied,
    /// Full snapshot replaced local content.
    Snapshot,
    /// Dropped by the version gate.
    Stale { local: u64, incoming: u64 },
    /// Text write skipped because the field is composing.
    Suppressed,
    /// Control traffic with no local effect.
    Ignored,
}

impl Outcome {
    /// Whether the store may have changed.
    pub fn changed(&self) -> bool {
        matches!(self, Outcome::Applied | Outcome::Snapshot)
    }
}

pub struct Reconciler {
    state: BoardState,
    debug: DebugFlags,
}

impl Reconciler {
    pub fn new(debug: DebugFlags) -> Self {
        Self {
            state: BoardState::new(),
            debug,
        }
    }

    pub fn state(&self) -> &BoardState {
        &self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut BoardState {
        &mut self.state
    }

    /// Version gate. Unversioned messages and snapshots always pass.
    pub fn accepts(&self, msg: &WireMessage) -> bool {
        match msg.version {
            Some(v) if !msg.is_snapshot() => v > self.state.version(),
            _ => true,
        }
    }

    /// Apply one inbound message.
    pub fn apply_remote(&mut self, msg: WireMessage, drafts: &mut CompositionBuffer) -> Outcome {
        if !self.accepts(&msg) {
            let local = self.state.version();
            let incoming = msg.version.unwrap_or_default();
            debug!("Dropping stale {} (v{} <= v{})", msg.kind(), incoming, local);
            return Outcome::Stale { local, incoming };
        }

        let version = msg.version;
        let snapshot = msg.is_snapshot();
        let outcome = match msg.event {
            BoardEvent::NoteUpdate { id, text } => {
                self.write_text(FieldId::NoteText(id), &text, drafts)
            }
            BoardEvent::BoardSectionTitle { section, title } => {
                self.write_text(FieldId::SectionTitle(section), &title, drafts)
            }
            BoardEvent::SyncState {
                notes,
                grid_mode,
                section_titles,
            } => {
                self.state.replace(notes, grid_mode, section_titles);
                let state = &self.state;
                let dropped = drafts.retain(|field| state.has_field(field));
                if dropped > 0 {
                    debug!("Snapshot dropped {} stale draft(s)", dropped);
                }
                // Idle drafts take the snapshot text.
                let idle: Vec<(FieldId, String)> = drafts
                    .drafts()
                    .filter(|d| !d.composing && d.deadline().is_none())
                    .filter_map(|d| {
                        let value = self.state.field_value(&d.target)?;
                        Some((d.target.clone(), value.to_string()))
                    })
                    .collect();
                for (field, value) in idle {
                    drafts.follow_remote(&field, &value);
                }
                // Local composition wins over the snapshot until it ends.
                for draft in drafts.drafts().filter(|d| d.composing) {
                    self.state.set_field(&draft.target, &draft.pending_value);
                }
                Outcome::Snapshot
            }
            BoardEvent::BoardReset | BoardEvent::SyncRequest => {
                trace!("Ignoring control event");
                Outcome::Ignored
            }
            event => {
                if !self.state.apply(&event) {
                    trace!("{} had no effect", event.kind());
                }
                Outcome::Applied
            }
        };

        match version {
            // A snapshot is the new baseline, even from a restarted server.
            Some(v) if snapshot => self.state.rebase_version(v),
            Some(v) => self.state.advance_version(v),
            None => {}
        }
        outcome
    }

    fn write_text(&mut self, field: FieldId, value: &str, drafts: &mut CompositionBuffer) -> Outcome {
        if drafts.is_composing(&field) {
            if self.debug.log_section || field.note_id().is_some() {
                debug!("Suppressed remote write to {:?} while composing", field);
            }
            return Outcome::Suppressed;
        }
        drafts.follow_remote(&field, value);
        self.state.set_field(&field, value);
        Outcome::Applied
    }

    /// Apply a local mutation optimistically and wrap it for sending.
    pub fn apply_local(&mut self, event: BoardEvent) -> WireMessage {
        if event.is_mutation() && !self.state.apply(&event) {
            trace!("Local {} had no effect", event.kind());
        }
        WireMessage::new(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{GridMode, Note, NoteColor};
    use std::collections::BTreeMap;
    use std::time::{Duration, Instant};

    fn setup() -> (Reconciler, CompositionBuffer) {
        (
            Reconciler::new(DebugFlags::default()),
            CompositionBuffer::new(Duration::from_millis(300)),
        )
    }

    fn add(version: u64, id: &str) -> WireMessage {
        WireMessage::versioned(
            version,
            BoardEvent::NoteAdd {
                note: Note::new(id, 10.0, 10.0, NoteColor::Yellow),
            },
        )
    }

    fn update(version: u64, id: &str, text: &str) -> WireMessage {
        WireMessage::versioned(
            version,
            BoardEvent::NoteUpdate {
                id: id.into(),
                text: text.into(),
            },
        )
    }

    fn snapshot(version: u64, notes: Vec<Note>) -> WireMessage {
        WireMessage::versioned(
            version,
            BoardEvent::SyncState {
                notes,
                grid_mode: GridMode::FourGrid,
                section_titles: BTreeMap::new(),
            },
        )
    }

    #[test]
    fn test_stale_event_is_a_full_no_op() {
        let (mut rec, mut drafts) = setup();
        assert_eq!(rec.apply_remote(add(10, "a"), &mut drafts), Outcome::Applied);
        assert_eq!(rec.state().version(), 10);

        let outcome = rec.apply_remote(
            WireMessage::versioned(
                9,
                BoardEvent::NoteMove {
                    id: "a".into(),
                    x: 500.0,
                    y: 500.0,
                },
            ),
            &mut drafts,
        );
        assert_eq!(
            outcome,
            Outcome::Stale {
                local: 10,
                incoming: 9
            }
        );
        assert_eq!(rec.state().note("a").unwrap().x, 10.0);
        assert_eq!(rec.state().version(), 10);

        // Equal version is also stale.
        assert!(!rec.accepts(&update(10, "a", "x")));
    }

    #[test]
    fn test_unversioned_always_applies() {
        let (mut rec, mut drafts) = setup();
        rec.apply_remote(add(5, "a"), &mut drafts);
        let outcome = rec.apply_remote(
            WireMessage::new(BoardEvent::NotePin {
                id: "a".into(),
                pinned: true,
            }),
            &mut drafts,
        );
        assert_eq!(outcome, Outcome::Applied);
        assert!(rec.state().note("a").unwrap().pinned);
        assert_eq!(rec.state().version(), 5);
    }

    #[test]
    fn test_snapshot_bypasses_gate_and_replaces() {
        let (mut rec, mut drafts) = setup();
        rec.apply_remote(add(20, "local-only"), &mut drafts);
        let outcome = rec.apply_remote(
            snapshot(3, vec![Note::new("s", 1.0, 2.0, NoteColor::Mint)]),
            &mut drafts,
        );
        assert_eq!(outcome, Outcome::Snapshot);
        assert!(!rec.state().contains("local-only"));
        assert!(rec.state().contains("s"));
        assert_eq!(rec.state().grid_mode(), GridMode::FourGrid);
        // The snapshot version is the new baseline.
        assert_eq!(rec.state().version(), 3);
    }

    #[test]
    fn test_restarted_server_deltas_apply_after_snapshot() {
        let (mut rec, mut drafts) = setup();
        rec.apply_remote(add(20, "old"), &mut drafts);
        rec.apply_remote(snapshot(0, Vec::new()), &mut drafts);
        assert_eq!(rec.state().version(), 0);

        assert_eq!(rec.apply_remote(add(1, "fresh"), &mut drafts), Outcome::Applied);
        assert!(rec.state().contains("fresh"));
        assert_eq!(rec.state().version(), 1);
    }

    #[test]
    fn test_snapshot_refreshes_idle_draft() {
        let (mut rec, mut drafts) = setup();
        rec.apply_remote(
            WireMessage::versioned(
                1,
                BoardEvent::NoteAdd {
                    note: Note::new("a", 0.0, 0.0, NoteColor::Yellow).with_text("old"),
                },
            ),
            &mut drafts,
        );
        drafts.begin_edit(FieldId::note_text("a"), "old");

        rec.apply_remote(
            snapshot(5, vec![Note::new("a", 0.0, 0.0, NoteColor::Yellow).with_text("new")]),
            &mut drafts,
        );
        assert_eq!(rec.state().note("a").unwrap().text, "new");
        assert_eq!(
            drafts.draft(&FieldId::note_text("a")).unwrap().pending_value,
            "new"
        );

        let commit = drafts.commit(&FieldId::note_text("a")).unwrap();
        assert_eq!(commit.value, "new");
    }

    #[test]
    fn test_snapshot_keeps_unsent_edit() {
        let (mut rec, mut drafts) = setup();
        rec.apply_remote(add(1, "a"), &mut drafts);
        let t0 = Instant::now();
        drafts.edit(FieldId::note_text("a"), "", "mine", t0);

        rec.apply_remote(
            snapshot(2, vec![Note::new("a", 0.0, 0.0, NoteColor::Yellow).with_text("server")]),
            &mut drafts,
        );
        assert_eq!(
            drafts.draft(&FieldId::note_text("a")).unwrap().pending_value,
            "mine"
        );
        assert_eq!(drafts.poll_expired(t0 + Duration::from_millis(300)).len(), 1);
    }

    #[test]
    fn test_composing_field_suppresses_remote_text() {
        let (mut rec, mut drafts) = setup();
        rec.apply_remote(add(1, "a"), &mut drafts);
        drafts.composition_start(FieldId::note_text("a"), "");
        drafts.composition_update(FieldId::note_text("a"), "", "한");

        let outcome = rec.apply_remote(update(2, "a", "remote"), &mut drafts);
        assert_eq!(outcome, Outcome::Suppressed);
        assert_eq!(rec.state().note("a").unwrap().text, "");
        assert_eq!(rec.state().version(), 2);

        // Other notes are unaffected.
        rec.apply_remote(add(3, "b"), &mut drafts);
        assert_eq!(
            rec.apply_remote(update(4, "b", "ok"), &mut drafts),
            Outcome::Applied
        );
        assert_eq!(rec.state().note("b").unwrap().text, "ok");
    }

    #[test]
    fn test_composing_section_suppresses_remote_title() {
        let (mut rec, mut drafts) = setup();
        drafts.composition_start(FieldId::section_title("left"), "");
        let outcome = rec.apply_remote(
            WireMessage::versioned(
                1,
                BoardEvent::BoardSectionTitle {
                    section: "left".into(),
                    title: "Remote".into(),
                },
            ),
            &mut drafts,
        );
        assert_eq!(outcome, Outcome::Suppressed);
        assert_eq!(rec.state().section_title("left"), "");
    }

    #[test]
    fn test_idle_draft_follows_remote_text() {
        let (mut rec, mut drafts) = setup();
        rec.apply_remote(add(1, "a"), &mut drafts);
        drafts.begin_edit(FieldId::note_text("a"), "");
        rec.apply_remote(update(2, "a", "theirs"), &mut drafts);
        assert_eq!(rec.state().note("a").unwrap().text, "theirs");
        assert_eq!(
            drafts.draft(&FieldId::note_text("a")).unwrap().pending_value,
            "theirs"
        );
    }

    #[test]
    fn test_snapshot_keeps_composing_value_and_drops_orphans() {
        let (mut rec, mut drafts) = setup();
        rec.apply_remote(add(1, "a"), &mut drafts);
        rec.apply_remote(add(2, "gone"), &mut drafts);
        drafts.composition_update(FieldId::note_text("a"), "", "typing");
        drafts.edit(FieldId::note_text("gone"), "", "x", Instant::now());

        rec.apply_remote(
            snapshot(5, vec![Note::new("a", 0.0, 0.0, NoteColor::Yellow).with_text("server")]),
            &mut drafts,
        );
        assert_eq!(rec.state().note("a").unwrap().text, "typing");
        assert!(drafts.draft(&FieldId::note_text("gone")).is_none());
        assert_eq!(drafts.next_deadline(), None);
        assert!(drafts.is_composing(&FieldId::note_text("a")));
    }

    #[test]
    fn test_unknown_id_is_applied_as_no_op() {
        let (mut rec, mut drafts) = setup();
        let outcome = rec.apply_remote(
            WireMessage::versioned(
                4,
                BoardEvent::NoteMove {
                    id: "ghost".into(),
                    x: 1.0,
                    y: 1.0,
                },
            ),
            &mut drafts,
        );
        assert_eq!(outcome, Outcome::Applied);
        assert!(rec.state().is_empty());
        assert_eq!(rec.state().version(), 4);
    }

    #[test]
    fn test_reset_waits_for_snapshot() {
        let (mut rec, mut drafts) = setup();
        rec.apply_remote(add(1, "a"), &mut drafts);
        let outcome =
            rec.apply_remote(WireMessage::versioned(2, BoardEvent::BoardReset), &mut drafts);
        assert_eq!(outcome, Outcome::Ignored);
        assert!(rec.state().contains("a"));
        rec.apply_remote(snapshot(2, Vec::new()), &mut drafts);
        assert!(rec.state().is_empty());
    }

    #[test]
    fn test_apply_local_is_optimistic_and_unversioned() {
        let (mut rec, _) = setup();
        let msg = rec.apply_local(BoardEvent::NoteAdd {
            note: Note::new("mine", 5.0, 5.0, NoteColor::Purple),
        });
        assert_eq!(msg.version, None);
        assert!(rec.state().contains("mine"));
        assert_eq!(rec.state().version(), 0);

        let reset = rec.apply_local(BoardEvent::BoardReset);
        assert_eq!(reset.event, BoardEvent::BoardReset);
        assert!(rec.state().contains("mine"));
    }
}
