//! # board-layout: spatial helpers for the shared board
//!
//! Geometry used while a note is being dragged: the snap engine that aligns
//! a tentative position with nearby notes and clamps it into the board.
//!
//! The crate knows nothing about the wire protocol; `board-sync` feeds it
//! sibling positions and forwards the result.

pub mod snap;

pub use snap::{
    Aabb, AlignKind, Axis, LayoutError, Point, Size, SnapCandidate, SnapConfig, SnapEngine,
    SnapGuides, SnapResult,
};
