use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::{
    Result,
    message::wire::{Decode, Encode},
};

/// Root-to-node address inside a hierarchical collection.
///
/// Each step is a `(row, column)` pair. The empty path is the root. Only
/// column-0 cells have children, so a non-final step with a non-zero column
/// never resolves.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PathIndex(Vec<(i32, i32)>);

impl PathIndex {
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new(steps: impl IntoIterator<Item = (i32, i32)>) -> Self {
        Self(steps.into_iter().collect())
    }

    /// Shorthand for a top-level cell.
    pub fn cell(row: i32, column: i32) -> Self {
        Self(vec![(row, column)])
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn steps(&self) -> &[(i32, i32)] {
        &self.0
    }

    /// The cell `(row, column)` under this node.
    pub fn child(&self, row: i32, column: i32) -> Self {
        let mut steps = Vec::with_capacity(self.0.len() + 1);
        steps.extend_from_slice(&self.0);
        steps.push((row, column));
        Self(steps)
    }

    /// The containing node. `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        let (_, init) = self.0.split_last()?;
        Some(Self(init.to_vec()))
    }

    pub fn last(&self) -> Option<(i32, i32)> {
        self.0.last().copied()
    }

    /// Row of the last step, `-1` for the root.
    pub fn row(&self) -> i32 {
        self.last().map_or(-1, |(row, _)| row)
    }

    /// Column of the last step, `-1` for the root.
    pub fn column(&self) -> i32 {
        self.last().map_or(-1, |(_, column)| column)
    }

    /// Whether the path is well formed: no negative coordinates and no
    /// children hanging off a non-zero column.
    pub fn is_well_formed(&self) -> bool {
        let Some((last, init)) = self.0.split_last() else {
            return true;
        };
        last.0 >= 0 && last.1 >= 0 && init.iter().all(|&(row, column)| row >= 0 && column == 0)
    }

    /// Whether `self` lies strictly below `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &PathIndex) -> bool {
        self.0.len() > ancestor.0.len() && self.0.starts_with(&ancestor.0)
    }

    /// The step directly below `ancestor`, if `self` lies below it.
    pub(crate) fn step_below(&self, ancestor: &PathIndex) -> Option<(i32, i32)> {
        if self.is_descendant_of(ancestor) {
            Some(self.0[ancestor.0.len()])
        } else {
            None
        }
    }

    /// Replace the step directly below `ancestor`.
    pub(crate) fn with_step_below(&self, ancestor: &PathIndex, step: (i32, i32)) -> Self {
        let mut steps = self.0.clone();
        steps[ancestor.0.len()] = step;
        Self(steps)
    }

    /// Re-root the part below `ancestor` under `new_ancestor`, replacing the
    /// first step with `step`.
    pub(crate) fn moved_below(&self, ancestor: &PathIndex, new_ancestor: &PathIndex, step: (i32, i32)) -> Self {
        let mut steps = new_ancestor.0.clone();
        steps.push(step);
        steps.extend_from_slice(&self.0[ancestor.0.len() + 1..]);
        Self(steps)
    }
}

impl fmt::Display for PathIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("/")?;
        for (i, (row, column)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{row}:{column}")?;
        }
        Ok(())
    }
}

impl From<Vec<(i32, i32)>> for PathIndex {
    fn from(steps: Vec<(i32, i32)>) -> Self {
        Self(steps)
    }
}

impl Encode for PathIndex {
    fn encode(&self, buf: &mut BytesMut) {
        self.0.encode(buf);
    }
}

impl Decode for PathIndex {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self(Vec::decode(buf)?))
    }
}

/// Inclusive rectangle of cells under one parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CellRange {
    pub first_row: i32,
    pub last_row: i32,
    pub first_column: i32,
    pub last_column: i32,
}

impl CellRange {
    pub fn new(first_row: i32, last_row: i32, first_column: i32, last_column: i32) -> Self {
        Self {
            first_row,
            last_row,
            first_column,
            last_column,
        }
    }

    pub fn cell(row: i32, column: i32) -> Self {
        Self::new(row, row, column, column)
    }

    pub fn is_empty(&self) -> bool {
        self.first_row > self.last_row || self.first_column > self.last_column
    }

    pub fn contains(&self, row: i32, column: i32) -> bool {
        (self.first_row..=self.last_row).contains(&row)
            && (self.first_column..=self.last_column).contains(&column)
    }

    /// Clamp to a `rows` × `columns` node. May become empty.
    pub fn clamped(&self, rows: i32, columns: i32) -> Self {
        Self::new(
            self.first_row.max(0),
            self.last_row.min(rows - 1),
            self.first_column.max(0),
            self.last_column.min(columns - 1),
        )
    }

    pub fn cells(&self) -> impl Iterator<Item = (i32, i32)> + use<> {
        let Self {
            first_row,
            last_row,
            first_column,
            last_column,
        } = *self;
        (first_row..=last_row).flat_map(move |row| (first_column..=last_column).map(move |column| (row, column)))
    }
}

impl Encode for CellRange {
    fn encode(&self, buf: &mut BytesMut) {
        self.first_row.encode(buf);
        self.last_row.encode(buf);
        self.first_column.encode(buf);
        self.last_column.encode(buf);
    }
}

impl Decode for CellRange {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self::new(
            i32::decode(buf)?,
            i32::decode(buf)?,
            i32::decode(buf)?,
            i32::decode(buf)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::wire::to_payload;

    #[test]
    fn test_path_wire_layout() {
        let payload = to_payload(&PathIndex::new([(1, 0), (2, 3)]));
        assert_eq!(
            &payload[..],
            &[0, 0, 0, 2, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0, 3]
        );
    }

    #[test]
    fn test_parent_and_child() {
        let path = PathIndex::root().child(1, 0).child(2, 3);
        assert_eq!(path.parent(), Some(PathIndex::cell(1, 0)));
        assert_eq!(path.row(), 2);
        assert_eq!(path.column(), 3);
        assert_eq!(PathIndex::root().parent(), None);
    }

    #[test]
    fn test_children_only_hang_off_column_zero() {
        assert!(PathIndex::new([(1, 0), (2, 3)]).is_well_formed());
        assert!(!PathIndex::new([(1, 1), (2, 3)]).is_well_formed());
        assert!(!PathIndex::cell(-1, 0).is_well_formed());
    }

    #[test]
    fn test_descendants() {
        let parent = PathIndex::cell(1, 0);
        let grandchild = PathIndex::new([(1, 0), (4, 0), (0, 2)]);
        assert!(grandchild.is_descendant_of(&parent));
        assert!(!parent.is_descendant_of(&parent));
        assert_eq!(grandchild.step_below(&parent), Some((4, 0)));
        assert_eq!(
            grandchild.with_step_below(&parent, (5, 0)),
            PathIndex::new([(1, 0), (5, 0), (0, 2)])
        );
        assert_eq!(
            grandchild.moved_below(&parent, &PathIndex::root(), (7, 0)),
            PathIndex::new([(7, 0), (0, 2)])
        );
    }

    #[test]
    fn test_range_clamp() {
        let range = CellRange::new(0, 10, 0, 3).clamped(4, 2);
        assert_eq!(range, CellRange::new(0, 3, 0, 1));
        assert!(CellRange::new(5, 10, 0, 0).clamped(4, 1).is_empty());
        assert_eq!(CellRange::new(0, 1, 0, 1).cells().count(), 4);
    }
}
