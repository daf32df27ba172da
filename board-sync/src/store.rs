//! Local board state.
//!
//! Single source of truth for rendering. All writes are whole-field
//! replacements; there is no partial text merging.

use std::collections::{BTreeMap, HashMap};

use crate::composition::FieldId;
use crate::protocol::{BoardEvent, GridMode, Note, NoteId, WireMessage, SECTION_KEYS};

#[derive(Debug, Clone, PartialEq)]
pub struct BoardState {
    version: u64,
    notes: HashMap<NoteId, Note>,
    grid_mode: GridMode,
    section_titles: BTreeMap<String, String>,
}

impl Default for BoardState {
    fn default() -> Self {
        Self::new()
    }
}

impl BoardState {
    /// Empty board with every section title blank.
    pub fn new() -> Self {
        Self {
            version: 0,
            notes: HashMap::new(),
            grid_mode: GridMode::None,
            section_titles: SECTION_KEYS
                .iter()
                .map(|k| (k.to_string(), String::new()))
                .collect(),
        }
    }

    /// Highest server version applied so far.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn note(&self, id: &str) -> Option<&Note> {
        self.notes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.notes.contains_key(id)
    }

    pub fn notes(&self) -> impl Iterator<Item = &Note> {
        self.notes.values()
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Notes bottom to top. Ties break on id so the order is stable.
    pub fn notes_in_stack_order(&self) -> Vec<&Note> {
        let mut notes: Vec<&Note> = self.notes.values().collect();
        notes.sort_by(|a, b| {
            a.stack_order
                .cmp(&b.stack_order)
                .then_with(|| a.id.cmp(&b.id))
        });
        notes
    }

    /// Highest stack order on the board, 0 when empty.
    pub fn top_stack_order(&self) -> i64 {
        self.notes.values().map(|n| n.stack_order).max().unwrap_or(0)
    }

    pub fn grid_mode(&self) -> GridMode {
        self.grid_mode
    }

    pub fn section_title(&self, key: &str) -> &str {
        self.section_titles.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn section_titles(&self) -> &BTreeMap<String, String> {
        &self.section_titles
    }

    /// Current stored value of an editable field.
    pub fn field_value(&self, field: &FieldId) -> Option<&str> {
        match field {
            FieldId::NoteText(id) => self.notes.get(id).map(|n| n.text.as_str()),
            FieldId::SectionTitle(key) => self.section_titles.get(key).map(String::as_str),
        }
    }

    pub fn has_field(&self, field: &FieldId) -> bool {
        self.field_value(field).is_some()
    }

    // ── Mutation ──────────────────────────────────────────────

    pub(crate) fn advance_version(&mut self, version: u64) {
        self.version = self.version.max(version);
    }

    /// Take a snapshot's version as the new baseline, even if lower.
    pub(crate) fn rebase_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Insert a note unless its id is already present.
    pub(crate) fn insert_note(&mut self, note: Note) -> bool {
        if self.notes.contains_key(&note.id) {
            return false;
        }
        self.notes.insert(note.id.clone(), note);
        true
    }

    pub(crate) fn set_position(&mut self, id: &str, x: f64, y: f64) -> bool {
        self.notes
            .get_mut(id)
            .map(|n| {
                n.x = x;
                n.y = y;
            })
            .is_some()
    }

    pub(crate) fn set_text(&mut self, id: &str, text: &str) -> bool {
        self.notes
            .get_mut(id)
            .map(|n| n.text = text.to_string())
            .is_some()
    }

    pub(crate) fn set_pinned(&mut self, id: &str, pinned: bool) -> bool {
        self.notes.get_mut(id).map(|n| n.pinned = pinned).is_some()
    }

    /// Put a note above every other one.
    pub(crate) fn raise(&mut self, id: &str) -> Option<i64> {
        let current = self.notes.get(id)?.stack_order;
        let top = self.top_stack_order();
        if current == top && self.notes_at_order(top) == 1 {
            return Some(current);
        }
        let order = top + 1;
        if let Some(note) = self.notes.get_mut(id) {
            note.stack_order = order;
        }
        Some(order)
    }

    fn notes_at_order(&self, order: i64) -> usize {
        self.notes.values().filter(|n| n.stack_order == order).count()
    }

    pub(crate) fn set_grid_mode(&mut self, mode: GridMode) {
        self.grid_mode = mode;
    }

    pub(crate) fn set_section_title(&mut self, section: &str, title: &str) {
        self.section_titles
            .insert(section.to_string(), title.to_string());
    }

    pub(crate) fn set_field(&mut self, field: &FieldId, value: &str) -> bool {
        match field {
            FieldId::NoteText(id) => self.set_text(id, value),
            FieldId::SectionTitle(key) => {
                self.set_section_title(key, value);
                true
            }
        }
    }

    /// Replace all content with a snapshot. The version is left to the caller.
    pub(crate) fn replace(
        &mut self,
        notes: Vec<Note>,
        grid_mode: GridMode,
        section_titles: BTreeMap<String, String>,
    ) {
        self.notes = notes.into_iter().map(|n| (n.id.clone(), n)).collect();
        self.grid_mode = grid_mode;
        self.section_titles = SECTION_KEYS
            .iter()
            .map(|k| (k.to_string(), String::new()))
            .collect();
        self.section_titles.extend(section_titles);
    }

    /// Wipe to an empty board, keeping the version.
    pub(crate) fn clear(&mut self) {
        let version = self.version;
        *self = Self::new();
        self.version = version;
    }

    /// Apply a content mutation. Control events and unknown ids are rejected.
    pub(crate) fn apply(&mut self, event: &BoardEvent) -> bool {
        match event {
            BoardEvent::NoteAdd { note } => self.insert_note(note.clone()),
            BoardEvent::NoteMove { id, x, y } => self.set_position(id, *x, *y),
            BoardEvent::NoteUpdate { id, text } => self.set_text(id, text),
            BoardEvent::NotePin { id, pinned } => self.set_pinned(id, *pinned),
            BoardEvent::BoardGridMode { mode } => {
                self.set_grid_mode(*mode);
                true
            }
            BoardEvent::BoardSectionTitle { section, title } => {
                self.set_section_title(section, title);
                true
            }
            BoardEvent::BoardReset | BoardEvent::SyncRequest | BoardEvent::SyncState { .. } => {
                false
            }
        }
    }

    /// Full snapshot as a versioned `sync.state` message.
    pub fn snapshot(&self) -> WireMessage {
        WireMessage::versioned(
            self.version,
            BoardEvent::SyncState {
                notes: self
                    .notes_in_stack_order()
                    .into_iter()
                    .cloned()
                    .collect(),
                grid_mode: self.grid_mode,
                section_titles: self.section_titles.clone(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NoteColor;

    fn board_with(ids: &[&str]) -> BoardState {
        let mut state = BoardState::new();
        for (i, id) in ids.iter().enumerate() {
            let note = Note {
                stack_order: i as i64,
                ..Note::new(*id, 0.0, 0.0, NoteColor::Yellow)
            };
            assert!(state.insert_note(note));
        }
        state
    }

    #[test]
    fn test_new_board_has_blank_sections() {
        let state = BoardState::new();
        assert_eq!(state.version(), 0);
        assert_eq!(state.section_titles().len(), SECTION_KEYS.len());
        assert_eq!(state.section_title("topLeft"), "");
        assert_eq!(state.grid_mode(), GridMode::None);
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut state = BoardState::new();
        assert!(state.insert_note(Note::new("a", 1.0, 1.0, NoteColor::Pink).with_text("first")));
        assert!(!state.insert_note(Note::new("a", 9.0, 9.0, NoteColor::Mint).with_text("second")));
        assert_eq!(state.len(), 1);
        assert_eq!(state.note("a").unwrap().text, "first");
    }

    #[test]
    fn test_unknown_ids_are_rejected() {
        let mut state = BoardState::new();
        assert!(!state.set_position("ghost", 1.0, 2.0));
        assert!(!state.set_text("ghost", "boo"));
        assert!(!state.set_pinned("ghost", true));
        assert!(state.raise("ghost").is_none());
        assert!(state.is_empty());
    }

    #[test]
    fn test_raise_goes_above_max() {
        let mut state = board_with(&["a", "b", "c"]);
        assert_eq!(state.raise("a"), Some(3));
        let order: Vec<&str> = state
            .notes_in_stack_order()
            .iter()
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(order, vec!["b", "c", "a"]);
        // Already alone on top.
        assert_eq!(state.raise("a"), Some(3));
    }

    #[test]
    fn test_raise_breaks_tie_at_top() {
        let mut state = BoardState::new();
        state.insert_note(Note::new("a", 0.0, 0.0, NoteColor::Yellow));
        state.insert_note(Note::new("b", 0.0, 0.0, NoteColor::Yellow));
        assert_eq!(state.raise("a"), Some(1));
        assert_eq!(state.top_stack_order(), 1);
    }

    #[test]
    fn test_stack_order_ties_break_on_id() {
        let mut state = BoardState::new();
        for id in ["z", "m", "a"] {
            state.insert_note(Note::new(id, 0.0, 0.0, NoteColor::Yellow));
        }
        let order: Vec<&str> = state
            .notes_in_stack_order()
            .iter()
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(order, vec!["a", "m", "z"]);
    }

    #[test]
    fn test_replace_fills_missing_sections() {
        let mut state = board_with(&["old"]);
        state.advance_version(5);
        let mut titles = BTreeMap::new();
        titles.insert("left".to_string(), "Todo".to_string());
        state.replace(
            vec![Note::new("new", 3.0, 4.0, NoteColor::Orange)],
            GridMode::TwoColumns,
            titles,
        );
        assert!(!state.contains("old"));
        assert!(state.contains("new"));
        assert_eq!(state.section_title("left"), "Todo");
        assert_eq!(state.section_title("right"), "");
        assert_eq!(state.version(), 5);
    }

    #[test]
    fn test_version_never_decreases() {
        let mut state = BoardState::new();
        state.advance_version(10);
        state.advance_version(4);
        assert_eq!(state.version(), 10);
    }

    #[test]
    fn test_field_access() {
        let mut state = board_with(&["a"]);
        let text = FieldId::note_text("a");
        let title = FieldId::section_title("bottom");
        assert!(state.set_field(&text, "hello"));
        assert!(state.set_field(&title, "Later"));
        assert_eq!(state.field_value(&text), Some("hello"));
        assert_eq!(state.field_value(&title), Some("Later"));
        assert!(!state.has_field(&FieldId::note_text("b")));
    }

    #[test]
    fn test_clear_keeps_version() {
        let mut state = board_with(&["a", "b"]);
        state.advance_version(8);
        state.set_grid_mode(GridMode::FourGrid);
        state.clear();
        assert!(state.is_empty());
        assert_eq!(state.grid_mode(), GridMode::None);
        assert_eq!(state.version(), 8);
    }

    #[test]
    fn test_snapshot_carries_everything() {
        let mut state = board_with(&["a", "b"]);
        state.advance_version(3);
        state.set_section_title("top", "Now");
        let msg = state.snapshot();
        assert_eq!(msg.version, Some(3));
        match msg.event {
            BoardEvent::SyncState {
                notes,
                section_titles,
                ..
            } => {
                assert_eq!(notes.len(), 2);
                assert_eq!(notes[0].id, "a");
                assert_eq!(section_titles["top"], "Now");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_apply_rejects_control_events() {
        let mut state = BoardState::new();
        assert!(!state.apply(&BoardEvent::SyncRequest));
        assert!(!state.apply(&BoardEvent::BoardReset));
        assert!(state.apply(&BoardEvent::BoardGridMode {
            mode: GridMode::TwoRows
        }));
        assert_eq!(state.grid_mode(), GridMode::TwoRows);
    }
}
