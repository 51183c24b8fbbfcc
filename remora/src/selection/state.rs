use std::collections::{BTreeMap, BTreeSet};

use bitflags::bitflags;

use crate::{
    message::wire::wire_struct,
    model::{CollectionChange, PathIndex},
};

bitflags! {
    /// How [`SelectionMirror::select`](super::SelectionMirror::select) combines
    /// the given ranges with the current selection.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SelectionFlags: u32 {
        const CLEAR = 0x01;
        const SELECT = 0x02;
        const DESELECT = 0x04;
        const TOGGLE = 0x08;
        /// Make the top-left cell of the first range current.
        const CURRENT = 0x10;
        /// Extend every range to whole rows.
        const ROWS = 0x20;
        /// Extend every range to whole columns.
        const COLUMNS = 0x40;
        const CLEAR_AND_SELECT = Self::CLEAR.bits() | Self::SELECT.bits();
    }
}

/// A rectangle of cells under one parent, corners inclusive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SelectionRange {
    pub top_left: PathIndex,
    pub bottom_right: PathIndex,
}

impl SelectionRange {
    pub fn new(top_left: PathIndex, bottom_right: PathIndex) -> Self {
        Self {
            top_left,
            bottom_right,
        }
    }

    /// Range covering the single cell at `path`.
    pub fn cell(path: PathIndex) -> Self {
        Self {
            top_left: path.clone(),
            bottom_right: path,
        }
    }

    pub fn parent(&self) -> Option<PathIndex> {
        self.top_left.parent()
    }

    /// Both corners name cells under the same parent, in order.
    pub fn is_valid(&self) -> bool {
        match (
            self.top_left.parent(),
            self.bottom_right.parent(),
            self.top_left.last(),
            self.bottom_right.last(),
        ) {
            (Some(a), Some(b), Some((top, left)), Some((bottom, right))) => {
                a == b && top >= 0 && left >= 0 && top <= bottom && left <= right
            }
            _ => false,
        }
    }

    pub fn contains(&self, path: &PathIndex) -> bool {
        if !self.is_valid() || path.parent() != self.parent() {
            return false;
        }
        let Some((row, column)) = path.last() else {
            return false;
        };
        (self.top_left.row()..=self.bottom_right.row()).contains(&row)
            && (self.top_left.column()..=self.bottom_right.column()).contains(&column)
    }

    fn cells(&self) -> impl Iterator<Item = PathIndex> + '_ {
        let parent = self.parent().unwrap_or_default();
        let valid = self.is_valid();
        let rows = self.top_left.row()..=self.bottom_right.row();
        let columns = self.top_left.column()..=self.bottom_right.column();
        rows.filter(move |_| valid)
            .flat_map(move |row| columns.clone().map(move |column| (row, column)))
            .map(move |(row, column)| parent.child(row, column))
    }
}

wire_struct!(SelectionRange { top_left, bottom_right });

/// Payload of a selection state message: the whole canonical state.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct SelectionState {
    pub current: Option<PathIndex>,
    pub ranges: Vec<SelectionRange>,
}

wire_struct!(SelectionState { current, ranges });

impl SelectionState {
    /// Follow a structural change by moving the corners of every range.
    /// Ranges losing a corner are dropped.
    pub fn remap(&mut self, change: &CollectionChange) {
        if !change.is_structural() {
            return;
        }
        self.ranges = std::mem::take(&mut self.ranges)
            .into_iter()
            .filter_map(|range| {
                let remapped = SelectionRange::new(
                    change.remap(&range.top_left)?,
                    change.remap(&range.bottom_right)?,
                );
                remapped.is_valid().then_some(remapped)
            })
            .collect();
        self.current = self.current.take().and_then(|c| change.remap(&c));
    }
}

/// Selected cells plus the current index.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Selection {
    cells: BTreeSet<PathIndex>,
    current: Option<PathIndex>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty() && self.current.is_none()
    }

    pub fn current(&self) -> Option<&PathIndex> {
        self.current.as_ref()
    }

    pub fn set_current(&mut self, current: Option<PathIndex>) -> bool {
        let changed = self.current != current;
        self.current = current;
        changed
    }

    pub fn is_selected(&self, path: &PathIndex) -> bool {
        self.cells.contains(path)
    }

    /// Combine `ranges` with the selection. `extent` reports the counts of a
    /// parent; ranges are cut to it and ranges under a parent of unknown size
    /// select nothing. Only cells accepted by `keep` are selected.
    /// Returns whether anything changed.
    pub fn select(
        &mut self,
        ranges: &[SelectionRange],
        flags: SelectionFlags,
        extent: impl Fn(&PathIndex) -> Option<(i32, i32)>,
        mut keep: impl FnMut(&PathIndex) -> bool,
    ) -> bool {
        let before = self.clone();
        if flags.contains(SelectionFlags::CLEAR) {
            self.cells.clear();
        }
        for range in ranges {
            if flags.contains(SelectionFlags::DESELECT) && !flags.contains(SelectionFlags::SELECT) {
                let range = expand(range, flags, &extent);
                self.cells.retain(|cell| !range.contains(cell));
                continue;
            }
            if !flags.intersects(SelectionFlags::SELECT | SelectionFlags::TOGGLE) {
                continue;
            }
            let Some(range) = fit(&expand(range, flags, &extent), &extent) else {
                continue;
            };
            for cell in range.cells().filter(|cell| keep(cell)) {
                if flags.contains(SelectionFlags::SELECT) {
                    self.cells.insert(cell);
                } else if flags.contains(SelectionFlags::TOGGLE) && !self.cells.remove(&cell) {
                    self.cells.insert(cell);
                }
            }
        }
        if flags.contains(SelectionFlags::CURRENT) {
            if let Some(first) = ranges.first().filter(|first| keep(&first.top_left)) {
                self.current = Some(first.top_left.clone());
            }
        }
        *self != before
    }

    /// Replace everything with `state`. Ranges are cut to `extent` first; a
    /// range under a parent of unknown size is passed to `unsized_parent`
    /// and skipped. Only cells accepted by `keep` are kept.
    pub fn replace(
        &mut self,
        state: &SelectionState,
        extent: impl Fn(&PathIndex) -> Option<(i32, i32)>,
        mut unsized_parent: impl FnMut(&SelectionRange),
        mut keep: impl FnMut(&PathIndex) -> bool,
    ) -> bool {
        let mut cells = BTreeSet::new();
        for range in &state.ranges {
            if !range.is_valid() {
                continue;
            }
            match fit(range, &extent) {
                Some(range) => cells.extend(range.cells().filter(|cell| keep(cell))),
                None if range.parent().is_some_and(|p| extent(&p).is_none()) => unsized_parent(range),
                None => {}
            }
        }
        let current = state.current.clone().filter(|c| keep(c));
        let next = Selection { cells, current };
        let changed = *self != next;
        *self = next;
        changed
    }

    /// Follow a structural change of the bound collection. Cells that no
    /// longer exist are dropped.
    pub fn remap(&mut self, change: &CollectionChange) -> bool {
        if !change.is_structural() {
            return false;
        }
        let before = self.clone();
        self.cells = std::mem::take(&mut self.cells)
            .iter()
            .filter_map(|cell| change.remap(cell))
            .collect();
        self.current = self.current.take().and_then(|c| change.remap(&c));
        *self != before
    }

    /// Minimal list of rectangles covering the selected cells, in path order.
    ///
    /// Adjacent columns of a row merge into one span; equal spans on
    /// consecutive rows merge into one rectangle.
    pub fn ranges(&self) -> Vec<SelectionRange> {
        let mut by_parent: BTreeMap<PathIndex, BTreeSet<(i32, i32)>> = BTreeMap::new();
        for cell in &self.cells {
            if let (Some(parent), Some(step)) = (cell.parent(), cell.last()) {
                by_parent.entry(parent).or_default().insert(step);
            }
        }

        let mut ranges = Vec::new();
        for (parent, steps) in by_parent {
            // (first column, last column) -> rows
            let mut spans: BTreeMap<(i32, i32), Vec<i32>> = BTreeMap::new();
            let mut open: Option<(i32, i32, i32)> = None;
            for (row, column) in steps {
                match open {
                    Some((r, first, last)) if r == row && column == last + 1 => {
                        open = Some((r, first, column));
                    }
                    _ => {
                        if let Some((r, first, last)) = open {
                            spans.entry((first, last)).or_default().push(r);
                        }
                        open = Some((row, column, column));
                    }
                }
            }
            if let Some((r, first, last)) = open {
                spans.entry((first, last)).or_default().push(r);
            }

            let mut rects = Vec::new();
            for ((first, last), rows) in spans {
                let mut top = rows[0];
                let mut bottom = rows[0];
                for &row in &rows[1..] {
                    if row == bottom + 1 {
                        bottom = row;
                    } else {
                        rects.push((top, first, bottom, last));
                        top = row;
                        bottom = row;
                    }
                }
                rects.push((top, first, bottom, last));
            }
            rects.sort_unstable();
            ranges.extend(rects.into_iter().map(|(top, left, bottom, right)| {
                SelectionRange::new(parent.child(top, left), parent.child(bottom, right))
            }));
        }
        ranges
    }

    pub fn state(&self) -> SelectionState {
        SelectionState {
            current: self.current.clone(),
            ranges: self.ranges(),
        }
    }
}

/// Cut `range` to the counts of its parent. `None` if nothing is left or the
/// counts are unknown.
fn fit(
    range: &SelectionRange,
    extent: &impl Fn(&PathIndex) -> Option<(i32, i32)>,
) -> Option<SelectionRange> {
    if !range.is_valid() {
        return None;
    }
    let parent = range.parent()?;
    let (rows, columns) = extent(&parent)?;
    let bottom = range.bottom_right.row().min(rows - 1);
    let right = range.bottom_right.column().min(columns - 1);
    let (top, left) = (range.top_left.row(), range.top_left.column());
    (top <= bottom && left <= right)
        .then(|| SelectionRange::new(parent.child(top, left), parent.child(bottom, right)))
}

fn expand(
    range: &SelectionRange,
    flags: SelectionFlags,
    extent: &impl Fn(&PathIndex) -> Option<(i32, i32)>,
) -> SelectionRange {
    if !flags.intersects(SelectionFlags::ROWS | SelectionFlags::COLUMNS) || !range.is_valid() {
        return range.clone();
    }
    let Some(parent) = range.parent() else {
        return range.clone();
    };
    let Some((rows, columns)) = extent(&parent) else {
        return range.clone();
    };
    let (mut top, mut left) = (range.top_left.row(), range.top_left.column());
    let (mut bottom, mut right) = (range.bottom_right.row(), range.bottom_right.column());
    if flags.contains(SelectionFlags::ROWS) {
        left = 0;
        right = right.max(columns - 1);
    }
    if flags.contains(SelectionFlags::COLUMNS) {
        top = 0;
        bottom = bottom.max(rows - 1);
    }
    SelectionRange::new(parent.child(top, left), parent.child(bottom, right))
}
