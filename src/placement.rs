//! Placement model: item kinds, grid placements, and their bounds.
//!
//! Everything here is pure. The grid-layout collaborator owns packing and
//! collision; this module only enforces per-kind size bounds and computes
//! a starting slot for freshly added items.
//!
//! BOUNDS
//! ======
//! | Kind | min w | min h | max h |
//! |------|-------|-------|-------|
//! | `kpi` | 2 | 2 | 4 |
//! | `chart`, `table` | 3 | 3 | 8 |
//! | text blocks | 3 | 1 | 3 |

#[cfg(test)]
#[path = "placement_test.rs"]
mod tests;

use serde::{Deserialize, Serialize};

use crate::error::CanvasError;
use crate::store::LocalId;

/// Column count of the widest grid breakpoint.
pub const DEFAULT_GRID_COLUMNS: u32 = 12;

/// The closed set of things that can sit on a canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Chart,
    Table,
    Kpi,
    Header,
    Subheader,
    Text,
    Description,
}

impl ItemKind {
    /// Text blocks are persisted through the block endpoints and span the
    /// full grid width by convention.
    #[must_use]
    pub fn is_text_block(self) -> bool {
        matches!(self, Self::Header | Self::Subheader | Self::Text | Self::Description)
    }

    #[must_use]
    pub fn bounds(self) -> Bounds {
        match self {
            Self::Kpi => Bounds { min_w: 2, min_h: 2, max_h: 4 },
            Self::Chart | Self::Table => Bounds { min_w: 3, min_h: 3, max_h: 8 },
            Self::Header | Self::Subheader | Self::Text | Self::Description => {
                Bounds { min_w: 3, min_h: 1, max_h: 3 }
            }
        }
    }

    /// Size given to an item of this kind when it is first added.
    #[must_use]
    pub fn default_size(self, columns: u32) -> (u32, u32) {
        match self {
            Self::Kpi => (3, 2),
            Self::Chart | Self::Table => (6, 4),
            Self::Header | Self::Subheader | Self::Text | Self::Description => (columns, 1),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chart => "chart",
            Self::Table => "table",
            Self::Kpi => "kpi",
            Self::Header => "header",
            Self::Subheader => "subheader",
            Self::Text => "text",
            Self::Description => "description",
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Size limits for one kind, in grid units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min_w: u32,
    pub min_h: u32,
    pub max_h: u32,
}

/// Position and size of an item in grid units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Placement {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Placement {
    #[must_use]
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// First row below this placement.
    #[must_use]
    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.h)
    }

    /// Clamp size into the kind's bounds and shift `x` so the item fits
    /// within `columns`. Never fails; use [`Placement::normalize`] to also
    /// reject placements that cannot fit at all.
    #[must_use]
    pub fn clamped(self, kind: ItemKind, columns: u32) -> Self {
        let bounds = kind.bounds();
        let w = self.w.max(bounds.min_w).min(columns);
        let h = self.h.clamp(bounds.min_h, bounds.max_h);
        let x = self.x.min(columns.saturating_sub(w));
        Self { x, y: self.y, w, h }
    }

    /// Check a placement against the kind's bounds without modifying it.
    ///
    /// # Errors
    ///
    /// Returns `Validation` naming the first violated bound.
    pub fn validate(&self, kind: ItemKind, columns: u32) -> Result<(), CanvasError> {
        let bounds = kind.bounds();
        if self.w < bounds.min_w {
            return Err(CanvasError::Validation(format!(
                "{kind} width {} is below minimum {}",
                self.w, bounds.min_w
            )));
        }
        if self.h < bounds.min_h || self.h > bounds.max_h {
            return Err(CanvasError::Validation(format!(
                "{kind} height {} outside {}..={}",
                self.h, bounds.min_h, bounds.max_h
            )));
        }
        if self.x.saturating_add(self.w) > columns {
            return Err(CanvasError::Validation(format!(
                "{kind} at x={} w={} overflows {columns} columns",
                self.x, self.w
            )));
        }
        Ok(())
    }

    /// Clamp, then validate what clamping could not repair (a grid narrower
    /// than the kind's minimum width).
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the clamped placement still violates bounds.
    pub fn normalize(self, kind: ItemKind, columns: u32) -> Result<Self, CanvasError> {
        let clamped = self.clamped(kind, columns);
        clamped.validate(kind, columns)?;
        Ok(clamped)
    }
}

/// Starting slot for a new item: left edge, directly below the lowest
/// occupied row.
#[must_use]
pub fn default_placement<'a, I>(kind: ItemKind, existing: I, columns: u32) -> Placement
where
    I: IntoIterator<Item = &'a Placement>,
{
    let y = existing.into_iter().map(Placement::bottom).max().unwrap_or(0);
    let (w, h) = kind.default_size(columns);
    Placement { x: 0, y, w, h }.clamped(kind, columns)
}

/// One entry of the declarative layout handed to the grid collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutEntry {
    #[serde(rename = "i")]
    pub id: LocalId,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub min_w: u32,
    pub min_h: u32,
    pub max_h: u32,
    /// Locked entries cannot be dragged or resized.
    #[serde(rename = "static")]
    pub is_static: bool,
}

impl LayoutEntry {
    #[must_use]
    pub fn new(id: LocalId, kind: ItemKind, placement: Placement, is_static: bool) -> Self {
        let bounds = kind.bounds();
        Self {
            id,
            x: placement.x,
            y: placement.y,
            w: placement.w,
            h: placement.h,
            min_w: bounds.min_w,
            min_h: bounds.min_h,
            max_h: bounds.max_h,
            is_static,
        }
    }
}
