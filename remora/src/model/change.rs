use std::collections::VecDeque;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::Label;

use super::{CellRange, Orientation, PathIndex};

/// A change to a collection, as published by a source and replayed by mirrors.
///
/// Coordinates refer to the collection as it was right before the change.
/// Moves follow the usual convention: `row` (or `column`) is the insertion
/// point in `destination` before the moved block is taken out.
#[derive(Debug, Clone, PartialEq, Eq, Label)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CollectionChange {
    RowsInserted {
        parent: PathIndex,
        first: i32,
        last: i32,
    },
    RowsRemoved {
        parent: PathIndex,
        first: i32,
        last: i32,
    },
    RowsMoved {
        parent: PathIndex,
        first: i32,
        last: i32,
        destination: PathIndex,
        row: i32,
    },
    ColumnsInserted {
        parent: PathIndex,
        first: i32,
        last: i32,
    },
    ColumnsRemoved {
        parent: PathIndex,
        first: i32,
        last: i32,
    },
    ColumnsMoved {
        parent: PathIndex,
        first: i32,
        last: i32,
        destination: PathIndex,
        column: i32,
    },
    DataChanged {
        parent: PathIndex,
        range: CellRange,
    },
    HeaderChanged {
        orientation: Orientation,
        first: i32,
        last: i32,
    },
    /// Rows under `parents` were reordered; previously cached positions are void.
    LayoutChanged {
        parents: Vec<PathIndex>,
    },
    Reset,
}

/// Notification delivered to subscribers of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Label)]
pub enum CollectionEvent {
    /// Counts of `parent` became known.
    Populated {
        parent: PathIndex,
        rows: i32,
        columns: i32,
    },
    /// Cached data under `parents` is outdated and is fetched again on the
    /// next read. Paths stay valid.
    Invalidated {
        parents: Vec<PathIndex>,
    },
    Changed(CollectionChange),
}

/// Structural changes a collection went through after a given generation.
///
/// The generation counts structural changes since the collection was
/// created. Selections use it to replay changes they have not followed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangesSince {
    /// Generation reached after the last change.
    pub generation: u64,
    /// The changes in order. `None` if they are no longer remembered.
    pub changes: Option<Vec<CollectionChange>>,
}

/// Structural changes remembered for [`Subscribers::since`].
const HISTORY: usize = 256;

/// Fan-out of [`CollectionEvent`]s. Closed receivers are pruned on emit.
///
/// Also counts structural changes and keeps the most recent ones.
#[derive(Debug, Default)]
pub(crate) struct Subscribers {
    senders: Vec<UnboundedSender<CollectionEvent>>,
    generation: u64,
    history: VecDeque<CollectionChange>,
}

impl Subscribers {
    pub fn subscribe(&mut self) -> UnboundedReceiver<CollectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.push(tx);
        rx
    }

    pub fn emit(&mut self, event: CollectionEvent) {
        if let CollectionEvent::Changed(change) = &event {
            if change.is_structural() {
                self.generation += 1;
                if self.history.len() == HISTORY {
                    self.history.pop_front();
                }
                self.history.push_back(change.clone());
            }
        }
        self.senders.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn since(&self, generation: u64) -> ChangesSince {
        let behind = self.generation.saturating_sub(generation);
        let changes = usize::try_from(behind)
            .ok()
            .filter(|&behind| behind <= self.history.len())
            .map(|behind| self.history.range(self.history.len() - behind..).cloned().collect());
        ChangesSince {
            generation: self.generation,
            changes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Axis {
    Rows,
    Columns,
}

impl Axis {
    #[inline]
    pub fn get(self, step: (i32, i32)) -> i32 {
        match self {
            Axis::Rows => step.0,
            Axis::Columns => step.1,
        }
    }

    #[inline]
    pub fn set(self, step: (i32, i32), value: i32) -> (i32, i32) {
        match self {
            Axis::Rows => (value, step.1),
            Axis::Columns => (step.0, value),
        }
    }
}

/// Destination index of a moved block once the block has been taken out.
pub(crate) fn move_target(same_parent: bool, first: i32, last: i32, target: i32) -> i32 {
    if same_parent && target > last {
        target - (last - first + 1)
    } else {
        target
    }
}

impl CollectionChange {
    /// Where `path` ends up after this change. `None` if it no longer exists
    /// or can no longer be trusted to name the same item.
    pub fn remap(&self, path: &PathIndex) -> Option<PathIndex> {
        use CollectionChange::*;
        let remapped = match self {
            RowsInserted { parent, first, last } => {
                inserted(path, parent, *first, last - first + 1, Axis::Rows)
            }
            ColumnsInserted { parent, first, last } => {
                inserted(path, parent, *first, last - first + 1, Axis::Columns)
            }
            RowsRemoved { parent, first, last } => removed(path, parent, *first, *last, Axis::Rows)?,
            ColumnsRemoved { parent, first, last } => {
                removed(path, parent, *first, *last, Axis::Columns)?
            }
            RowsMoved {
                parent,
                first,
                last,
                destination,
                row,
            } => moved(path, parent, *first, *last, destination, *row, Axis::Rows)?,
            ColumnsMoved {
                parent,
                first,
                last,
                destination,
                column,
            } => moved(path, parent, *first, *last, destination, *column, Axis::Columns)?,
            DataChanged { .. } | HeaderChanged { .. } => path.clone(),
            LayoutChanged { parents } => {
                if parents.iter().any(|p| path.is_descendant_of(p)) {
                    return None;
                }
                path.clone()
            }
            Reset => return None,
        };
        remapped.is_well_formed().then_some(remapped)
    }

    /// Whether the change alters the shape of the collection.
    pub fn is_structural(&self) -> bool {
        !matches!(
            self,
            CollectionChange::DataChanged { .. } | CollectionChange::HeaderChanged { .. }
        )
    }
}

fn inserted(path: &PathIndex, parent: &PathIndex, first: i32, count: i32, axis: Axis) -> PathIndex {
    match path.step_below(parent) {
        Some(step) if axis.get(step) >= first => {
            path.with_step_below(parent, axis.set(step, axis.get(step) + count))
        }
        _ => path.clone(),
    }
}

fn removed(path: &PathIndex, parent: &PathIndex, first: i32, last: i32, axis: Axis) -> Option<PathIndex> {
    let Some(step) = path.step_below(parent) else {
        return Some(path.clone());
    };
    let at = axis.get(step);
    if at < first {
        Some(path.clone())
    } else if at <= last {
        None
    } else {
        Some(path.with_step_below(parent, axis.set(step, at - (last - first + 1))))
    }
}

fn moved(
    path: &PathIndex,
    parent: &PathIndex,
    first: i32,
    last: i32,
    destination: &PathIndex,
    target: i32,
    axis: Axis,
) -> Option<PathIndex> {
    let count = last - first + 1;
    // the destination itself may sit behind the block in the source parent
    let destination = removed(destination, parent, first, last, axis)?;
    let target = move_target(*parent == destination, first, last, target);

    if let Some(step) = path.step_below(parent) {
        let at = axis.get(step);
        if (first..=last).contains(&at) {
            let step = axis.set(step, target + (at - first));
            return Some(path.moved_below(parent, &destination, step));
        }
    }
    let path = removed(path, parent, first, last, axis)?;
    Some(inserted(&path, &destination, target, count, axis))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(parent: PathIndex, first: i32, last: i32) -> (PathIndex, i32, i32) {
        (parent, first, last)
    }

    #[test]
    fn test_insert_shifts_following_rows_and_their_children() {
        let (parent, first, last) = rows(PathIndex::root(), 1, 1);
        let change = CollectionChange::RowsInserted { parent, first, last };
        assert_eq!(change.remap(&PathIndex::cell(0, 0)), Some(PathIndex::cell(0, 0)));
        assert_eq!(change.remap(&PathIndex::cell(1, 0)), Some(PathIndex::cell(2, 0)));
        assert_eq!(
            change.remap(&PathIndex::new([(3, 0), (0, 1)])),
            Some(PathIndex::new([(4, 0), (0, 1)]))
        );
    }

    #[test]
    fn test_remove_drops_covered_rows() {
        let change = CollectionChange::RowsRemoved {
            parent: PathIndex::root(),
            first: 1,
            last: 2,
        };
        assert_eq!(change.remap(&PathIndex::cell(1, 0)), None);
        assert_eq!(change.remap(&PathIndex::new([(2, 0), (5, 0)])), None);
        assert_eq!(change.remap(&PathIndex::cell(4, 1)), Some(PathIndex::cell(2, 1)));
    }

    #[test]
    fn test_move_down_within_parent() {
        // [A B C D E] move B..C before E -> [A D B C E]
        let change = CollectionChange::RowsMoved {
            parent: PathIndex::root(),
            first: 1,
            last: 2,
            destination: PathIndex::root(),
            row: 4,
        };
        let at = |row| change.remap(&PathIndex::cell(row, 0)).map(|p| p.row());
        assert_eq!(at(0), Some(0));
        assert_eq!(at(1), Some(2));
        assert_eq!(at(2), Some(3));
        assert_eq!(at(3), Some(1));
        assert_eq!(at(4), Some(4));
    }

    #[test]
    fn test_move_to_other_parent() {
        let change = CollectionChange::RowsMoved {
            parent: PathIndex::root(),
            first: 0,
            last: 0,
            destination: PathIndex::cell(2, 0),
            row: 0,
        };
        // the destination moves up by one because row 0 left the root
        assert_eq!(
            change.remap(&PathIndex::cell(0, 3)),
            Some(PathIndex::new([(1, 0), (0, 3)]))
        );
        assert_eq!(
            change.remap(&PathIndex::new([(2, 0), (0, 0)])),
            Some(PathIndex::new([(1, 0), (1, 0)]))
        );
    }

    #[test]
    fn test_column_move_never_leaves_children_on_nonzero_column() {
        let change = CollectionChange::ColumnsMoved {
            parent: PathIndex::root(),
            first: 0,
            last: 0,
            destination: PathIndex::root(),
            column: 3,
        };
        assert_eq!(change.remap(&PathIndex::cell(1, 0)), Some(PathIndex::cell(1, 2)));
        assert_eq!(change.remap(&PathIndex::new([(1, 0), (0, 0)])), None);
    }

    #[test]
    fn test_layout_change_and_reset_void_paths() {
        let layout = CollectionChange::LayoutChanged {
            parents: vec![PathIndex::root()],
        };
        assert_eq!(layout.remap(&PathIndex::cell(0, 0)), None);
        assert_eq!(CollectionChange::Reset.remap(&PathIndex::cell(0, 0)), None);
        let data = CollectionChange::DataChanged {
            parent: PathIndex::root(),
            range: CellRange::cell(0, 0),
        };
        assert_eq!(data.remap(&PathIndex::cell(0, 0)), Some(PathIndex::cell(0, 0)));
    }

    #[test]
    fn test_history_replays_structural_changes_only() {
        let mut subscribers = Subscribers::default();
        let mut events = subscribers.subscribe();
        let inserted = CollectionChange::RowsInserted {
            parent: PathIndex::root(),
            first: 0,
            last: 0,
        };
        subscribers.emit(CollectionEvent::Changed(inserted.clone()));
        subscribers.emit(CollectionEvent::Changed(CollectionChange::DataChanged {
            parent: PathIndex::root(),
            range: CellRange::cell(0, 0),
        }));
        subscribers.emit(CollectionEvent::Invalidated {
            parents: vec![PathIndex::root()],
        });
        subscribers.emit(CollectionEvent::Changed(CollectionChange::Reset));

        let all = subscribers.since(0);
        assert_eq!(all.generation, 2);
        assert_eq!(all.changes, Some(vec![inserted, CollectionChange::Reset]));
        assert_eq!(subscribers.since(2).changes, Some(Vec::new()));
        assert_eq!(subscribers.since(u64::MAX).generation, 2);
        for _ in 0..4 {
            assert!(events.try_recv().is_ok());
        }
    }

    #[test]
    fn test_history_forgets_old_changes() {
        let mut subscribers = Subscribers::default();
        for _ in 0..HISTORY + 1 {
            subscribers.emit(CollectionEvent::Changed(CollectionChange::Reset));
        }
        assert_eq!(subscribers.since(0).changes, None);
        assert_eq!(subscribers.since(1).changes.map(|c| c.len()), Some(HISTORY));
    }
}
