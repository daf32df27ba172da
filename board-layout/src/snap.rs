//! Snap alignment for notes being dragged across the board.
//!
//! Every note shares one fixed footprint, so a sibling is fully described by
//! its top-left corner.  For each axis the dragged box is compared against
//! every sibling on five relations:
//!
//! ```text
//!   Leading         dragged.lead   ↔ sibling.lead
//!   Trailing        dragged.trail  ↔ sibling.trail
//!   AttachLeading   dragged.lead   ↔ sibling.trail   (flush on the right / below)
//!   AttachTrailing  dragged.trail  ↔ sibling.lead    (flush on the left / above)
//!   Center          dragged.center ↔ sibling.center
//! ```
//!
//! Any relation closer than the threshold becomes a [`SnapCandidate`].  The
//! nearest candidate over all siblings wins, per axis, independently.  Equal
//! distances keep the first one found (sibling order, then the order above).
//!
//! # Design decisions
//!
//! * **No heap allocation on the resolve path.**  The best candidate per axis
//!   is tracked while scanning; [`SnapEngine::candidates`] exists for
//!   inspection and tests only.
//! * **Clamping is unconditional.**  A snapped position that would leave the
//!   container is pulled back in rather than rejected.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayoutError {
    #[error("Invalid note footprint: {width}x{height}")]
    InvalidFootprint { width: f64, height: f64 },
    #[error("Invalid snap threshold: {0}")]
    InvalidThreshold(f64),
}

// ───────────────────────────────────────────────────────────────────
// Geometry
// ───────────────────────────────────────────────────────────────────

/// Top-left position of a note in board coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Width/height pair, used for note footprints and container bounds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned bounding box stored as min/max corners.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Aabb {
    /// Create from origin + size.
    #[inline(always)]
    pub fn from_rect(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x + width,
            max_y: y + height,
        }
    }

    #[inline(always)]
    pub fn at(origin: Point, size: Size) -> Self {
        Self::from_rect(origin.x, origin.y, size.width, size.height)
    }

    #[inline(always)]
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    #[inline(always)]
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Leading edge, trailing edge and center on one axis.
    #[inline(always)]
    fn references(&self, axis: Axis) -> AxisRefs {
        match axis {
            Axis::X => AxisRefs {
                lead: self.min_x,
                trail: self.max_x,
                center: (self.min_x + self.max_x) * 0.5,
            },
            Axis::Y => AxisRefs {
                lead: self.min_y,
                trail: self.max_y,
                center: (self.min_y + self.max_y) * 0.5,
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
}

/// Which pair of reference values produced a candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AlignKind {
    Leading,
    Trailing,
    AttachLeading,
    AttachTrailing,
    Center,
}

#[derive(Clone, Copy)]
struct AxisRefs {
    lead: f64,
    trail: f64,
    center: f64,
}

impl AxisRefs {
    /// (kind, dragged value, sibling value) in tie-break order.
    #[inline(always)]
    fn pairs(&self, sibling: &AxisRefs) -> [(AlignKind, f64, f64); 5] {
        [
            (AlignKind::Leading, self.lead, sibling.lead),
            (AlignKind::Trailing, self.trail, sibling.trail),
            (AlignKind::AttachLeading, self.lead, sibling.trail),
            (AlignKind::AttachTrailing, self.trail, sibling.lead),
            (AlignKind::Center, self.center, sibling.center),
        ]
    }
}

// ───────────────────────────────────────────────────────────────────
// Candidates & results
// ───────────────────────────────────────────────────────────────────

/// One alignment within threshold, computed for a single drag frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SnapCandidate {
    pub axis: Axis,
    pub kind: AlignKind,
    /// Shift to apply to the dragged top-left on `axis`.
    pub delta: f64,
    /// Dragged top-left on `axis` after applying `delta`.
    pub corrected_value: f64,
    /// Coordinate of the guide line to draw while dragging.
    pub guide_line: f64,
    pub distance: f64,
}

/// Guide lines for the active snap, one per axis at most.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct SnapGuides {
    /// Vertical line at this x coordinate.
    pub x: Option<f64>,
    /// Horizontal line at this y coordinate.
    pub y: Option<f64>,
}

impl SnapGuides {
    pub fn is_empty(&self) -> bool {
        self.x.is_none() && self.y.is_none()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SnapResult {
    pub position: Point,
    pub guides: SnapGuides,
}

// ───────────────────────────────────────────────────────────────────
// Engine
// ───────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SnapConfig {
    /// Footprint shared by every note.
    pub footprint: Size,
    /// Alignments strictly closer than this many pixels snap.
    pub threshold: f64,
}

impl Default for SnapConfig {
    fn default() -> Self {
        Self {
            footprint: Size::new(160.0, 110.0),
            threshold: 8.0,
        }
    }
}

/// Stateless snap resolver.
#[derive(Clone, Debug)]
pub struct SnapEngine {
    config: SnapConfig,
}

impl Default for SnapEngine {
    fn default() -> Self {
        Self {
            config: SnapConfig::default(),
        }
    }
}

impl SnapEngine {
    pub fn new(config: SnapConfig) -> Result<Self, LayoutError> {
        let Size { width, height } = config.footprint;
        if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0) {
            return Err(LayoutError::InvalidFootprint { width, height });
        }
        if !config.threshold.is_finite() || config.threshold < 0.0 {
            return Err(LayoutError::InvalidThreshold(config.threshold));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &SnapConfig {
        &self.config
    }

    /// Snap `tentative` against `siblings` and clamp into `container`.
    ///
    /// `siblings` must not contain the dragged note itself.
    pub fn resolve<I>(&self, tentative: Point, siblings: I, container: Size) -> SnapResult
    where
        I: IntoIterator<Item = Point>,
    {
        let dragged = Aabb::at(tentative, self.config.footprint);
        let drag_x = dragged.references(Axis::X);
        let drag_y = dragged.references(Axis::Y);

        let mut best_x: Option<SnapCandidate> = None;
        let mut best_y: Option<SnapCandidate> = None;

        for sibling in siblings {
            let other = Aabb::at(sibling, self.config.footprint);
            self.scan_axis(Axis::X, tentative.x, &drag_x, &other.references(Axis::X), &mut |c| {
                keep_nearest(&mut best_x, c)
            });
            self.scan_axis(Axis::Y, tentative.y, &drag_y, &other.references(Axis::Y), &mut |c| {
                keep_nearest(&mut best_y, c)
            });
        }

        let snapped = Point::new(
            best_x.map_or(tentative.x, |c| c.corrected_value),
            best_y.map_or(tentative.y, |c| c.corrected_value),
        );

        SnapResult {
            position: self.clamp(snapped, container),
            guides: SnapGuides {
                x: best_x.map(|c| c.guide_line),
                y: best_y.map(|c| c.guide_line),
            },
        }
    }

    /// Every candidate within threshold, in discovery order.
    pub fn candidates<I>(&self, tentative: Point, siblings: I) -> Vec<SnapCandidate>
    where
        I: IntoIterator<Item = Point>,
    {
        let dragged = Aabb::at(tentative, self.config.footprint);
        let drag_x = dragged.references(Axis::X);
        let drag_y = dragged.references(Axis::Y);

        let mut out = Vec::new();
        for sibling in siblings {
            let other = Aabb::at(sibling, self.config.footprint);
            self.scan_axis(Axis::X, tentative.x, &drag_x, &other.references(Axis::X), &mut |c| {
                out.push(c)
            });
            self.scan_axis(Axis::Y, tentative.y, &drag_y, &other.references(Axis::Y), &mut |c| {
                out.push(c)
            });
        }
        out
    }

    /// Keep the footprint fully inside `container`, origin at (0, 0).
    pub fn clamp(&self, p: Point, container: Size) -> Point {
        let max_x = (container.width - self.config.footprint.width).max(0.0);
        let max_y = (container.height - self.config.footprint.height).max(0.0);
        // f64::max maps NaN to the other operand, so a NaN input lands on 0.
        Point::new(p.x.max(0.0).min(max_x), p.y.max(0.0).min(max_y))
    }

    #[inline]
    fn scan_axis(
        &self,
        axis: Axis,
        origin: f64,
        dragged: &AxisRefs,
        sibling: &AxisRefs,
        emit: &mut dyn FnMut(SnapCandidate),
    ) {
        for (kind, from, to) in dragged.pairs(sibling) {
            let distance = (from - to).abs();
            if distance < self.config.threshold {
                let delta = to - from;
                emit(SnapCandidate {
                    axis,
                    kind,
                    delta,
                    corrected_value: origin + delta,
                    guide_line: to,
                    distance,
                });
            }
        }
    }
}

#[inline(always)]
fn keep_nearest(best: &mut Option<SnapCandidate>, candidate: SnapCandidate) {
    match best {
        Some(current) if current.distance <= candidate.distance => {}
        _ => *best = Some(candidate),
    }
}
