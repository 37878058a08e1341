//! Opaque identifiers threaded through the kernel.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a cell, stable for the notebook's lifetime.
///
/// Mirrors the teacher's `graph::CellId` newtype (a `Copy` handle into the
/// graph's internal maps) but is minted from an opaque counter rather than a
/// dense node index, since cells can be deleted and spec.md requires ids to
/// remain stable (and not be reused) across the notebook's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct CellId(u64);

impl CellId {
    /// Construct a `CellId` from a raw value. Used by callers that persist
    /// or transmit ids (e.g. a notebook file format) and need to round-trip
    /// them; the kernel itself mints ids via [`CellIdFactory`].
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell-{}", self.0)
    }
}

/// Mints fresh, never-reused [`CellId`]s for one notebook session.
#[derive(Debug, Default)]
pub struct CellIdFactory {
    next: AtomicU64,
}

impl CellIdFactory {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Allocate the next id. Ids are never reused, even after the cell they
    /// named is deleted, so stale references (e.g. in an in-flight message)
    /// can never silently resolve to an unrelated cell.
    pub fn next(&self) -> CellId {
        CellId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identifier for a UI element (widget) whose value lives in the session's
/// `ui_values` map (spec.md §3, `SessionView.ui_values`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ObjectId(pub String);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A bound name at module scope: variable, import, function, or class.
pub type Name = String;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_never_reused() {
        let factory = CellIdFactory::new();
        let a = factory.next();
        let b = factory.next();
        assert_ne!(a, b);
        assert_eq!(a.as_raw() + 1, b.as_raw());
    }

    #[test]
    fn display_is_stable() {
        let id = CellId::from_raw(7);
        assert_eq!(id.to_string(), "cell-7");
    }
}
