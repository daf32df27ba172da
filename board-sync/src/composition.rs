//! Composition buffer for editable text fields.
//!
//! Holds one [`Draft`] per focused field. Plain keystrokes restart a
//! debounce deadline; only its expiry transmits. IME composition never
//! transmits intermediate values: the composed text is committed once, when
//! composition ends.
//!
//! ```text
//!   edit ──► pending_value, deadline = now + debounce ──► poll_expired ──► Commit
//!   composition_start ──► composing (deadline cleared)
//!   composition_update ──► pending_value (local only)
//!   composition_end ──► Commit, draft removed
//!   commit (blur / enter) ──► Commit, draft removed
//!   revert (escape) ──► base_value, draft removed, nothing sent
//! ```
//!
//! Time is passed in explicitly so the buffer can be driven by any clock.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::protocol::{BoardEvent, NoteId};

/// An editable text field on the board.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldId {
    NoteText(NoteId),
    SectionTitle(String),
}

impl FieldId {
    pub fn note_text(id: impl Into<NoteId>) -> Self {
        FieldId::NoteText(id.into())
    }

    pub fn section_title(key: impl Into<String>) -> Self {
        FieldId::SectionTitle(key.into())
    }

    pub fn note_id(&self) -> Option<&str> {
        match self {
            FieldId::NoteText(id) => Some(id),
            FieldId::SectionTitle(_) => None,
        }
    }
}

/// In-progress local edit of one field.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub target: FieldId,
    pub composing: bool,
    /// Latest local value, shown in place of the stored one.
    pub pending_value: String,
    /// Value when editing began; restored on revert.
    pub base_value: String,
    deadline: Option<Instant>,
}

impl Draft {
    fn new(target: FieldId, current: String) -> Self {
        Self {
            target,
            composing: false,
            pending_value: current.clone(),
            base_value: current,
            deadline: None,
        }
    }

    /// Pending debounce expiry, if a plain edit is waiting to be sent.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

/// A value ready to be sent for a field.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub field: FieldId,
    pub value: String,
}

impl Commit {
    pub fn into_event(self) -> BoardEvent {
        match self.field {
            FieldId::NoteText(id) => BoardEvent::NoteUpdate {
                id,
                text: self.value,
            },
            FieldId::SectionTitle(section) => BoardEvent::BoardSectionTitle {
                section,
                title: self.value,
            },
        }
    }
}

pub struct CompositionBuffer {
    drafts: HashMap<FieldId, Draft>,
    debounce: Duration,
}

impl CompositionBuffer {
    pub fn new(debounce: Duration) -> Self {
        Self {
            drafts: HashMap::new(),
            debounce,
        }
    }

    pub fn draft(&self, field: &FieldId) -> Option<&Draft> {
        self.drafts.get(field)
    }

    pub fn is_composing(&self, field: &FieldId) -> bool {
        self.drafts.get(field).is_some_and(|d| d.composing)
    }

    pub fn len(&self) -> usize {
        self.drafts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drafts.is_empty()
    }

    pub fn drafts(&self) -> impl Iterator<Item = &Draft> {
        self.drafts.values()
    }

    /// Open a draft on focus. Existing drafts are left alone.
    pub fn begin_edit(&mut self, field: FieldId, current: impl Into<String>) -> &Draft {
        self.drafts
            .entry(field.clone())
            .or_insert_with(|| Draft::new(field, current.into()))
    }

    /// Plain input. Restarts the debounce unless composing.
    pub fn edit(
        &mut self,
        field: FieldId,
        current: impl Into<String>,
        value: impl Into<String>,
        now: Instant,
    ) {
        let debounce = self.debounce;
        let draft = self
            .drafts
            .entry(field.clone())
            .or_insert_with(|| Draft::new(field, current.into()));
        draft.pending_value = value.into();
        if !draft.composing {
            draft.deadline = Some(now + debounce);
        }
    }

    /// IME composition began. Cancels any pending debounce.
    pub fn composition_start(&mut self, field: FieldId, current: impl Into<String>) {
        let draft = self
            .drafts
            .entry(field.clone())
            .or_insert_with(|| Draft::new(field, current.into()));
        draft.composing = true;
        draft.deadline = None;
    }

    /// Intermediate composed text. Never transmitted.
    pub fn composition_update(
        &mut self,
        field: FieldId,
        current: impl Into<String>,
        value: impl Into<String>,
    ) {
        let draft = self
            .drafts
            .entry(field.clone())
            .or_insert_with(|| Draft::new(field, current.into()));
        draft.composing = true;
        draft.deadline = None;
        draft.pending_value = value.into();
    }

    /// Composition finished with `value`. Always yields a commit.
    pub fn composition_end(&mut self, field: FieldId, value: impl Into<String>) -> Commit {
        self.drafts.remove(&field);
        Commit {
            field,
            value: value.into(),
        }
    }

    /// Blur or explicit confirm. Sends the pending value immediately.
    pub fn commit(&mut self, field: &FieldId) -> Option<Commit> {
        self.drafts.remove(field).map(|d| Commit {
            field: d.target,
            value: d.pending_value,
        })
    }

    /// Escape. Drops the draft without sending and returns the base value.
    pub fn revert(&mut self, field: &FieldId) -> Option<String> {
        self.drafts.remove(field).map(|d| d.base_value)
    }

    /// Commits for every debounce that has expired by `now`.
    ///
    /// The drafts stay open (the field keeps focus); only their deadline is
    /// consumed.
    pub fn poll_expired(&mut self, now: Instant) -> Vec<Commit> {
        let mut due: Vec<(Instant, Commit)> = self
            .drafts
            .values_mut()
            .filter_map(|d| match d.deadline {
                Some(at) if at <= now && !d.composing => {
                    d.deadline = None;
                    Some((
                        at,
                        Commit {
                            field: d.target.clone(),
                            value: d.pending_value.clone(),
                        },
                    ))
                }
                _ => None,
            })
            .collect();
        due.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.field.cmp(&b.1.field)));
        due.into_iter().map(|(_, c)| c).collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.drafts.values().filter_map(|d| d.deadline).min()
    }

    /// A remote value arrived for a field that is open but not composing.
    ///
    /// An idle draft follows the remote value. A draft with an unsent edit
    /// keeps it; that edit lands when its debounce fires.
    pub fn follow_remote(&mut self, field: &FieldId, value: &str) -> bool {
        match self.drafts.get_mut(field) {
            Some(d) if !d.composing && d.deadline.is_none() => {
                d.pending_value = value.to_string();
                true
            }
            _ => false,
        }
    }

    /// Drop drafts whose field no longer exists.
    pub fn retain(&mut self, mut keep: impl FnMut(&FieldId) -> bool) -> usize {
        let before = self.drafts.len();
        self.drafts.retain(|field, _| keep(field));
        before - self.drafts.len()
    }

    /// Forget every pending debounce. Drafts stay open with their values.
    pub fn cancel_deadlines(&mut self) -> usize {
        let mut cancelled = 0;
        for draft in self.drafts.values_mut() {
            if draft.deadline.take().is_some() {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Cancel every draft and pending debounce without sending.
    pub fn clear(&mut self) {
        self.drafts.clear();
    }
}
