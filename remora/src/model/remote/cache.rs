use std::collections::HashMap;

use super::arena::{Arena, NodeKey};
use crate::{
    Label,
    model::{
        CellRange, CollectionChange, ItemFlags, PathIndex, Role, Value,
        change::{Axis, move_target},
    },
};

/// Load state of a cached node's counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Label)]
pub enum NodeState {
    /// Nothing known yet.
    Unfetched,
    /// A count request is in flight.
    Requested,
    Fetched,
    /// Counts were adjusted by a structural change and will be revalidated on
    /// the next access.
    Stale,
}

/// Load state of a cached cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Label)]
pub enum CellState {
    Empty,
    Loading,
    Loaded,
    /// Known to be out of date. Old values stay visible until replaced.
    Outdated,
}

#[derive(Debug, Clone)]
pub(crate) struct CellSlot {
    pub state: CellState,
    pub values: HashMap<Role, Value>,
    pub flags: ItemFlags,
}

impl CellSlot {
    fn empty() -> Self {
        Self {
            state: CellState::Empty,
            values: HashMap::new(),
            flags: ItemFlags::empty(),
        }
    }

    pub fn value(&self, role: Role) -> Value {
        self.values.get(&role).cloned().unwrap_or_default()
    }

    pub fn outdate(&mut self) {
        if self.state == CellState::Loaded {
            self.state = CellState::Outdated;
        }
    }

    /// Forget an in-flight request whose answer may no longer land here.
    pub fn relax(&mut self) {
        if self.state == CellState::Loading {
            self.state = if self.values.is_empty() {
                CellState::Empty
            } else {
                CellState::Outdated
            };
        }
    }
}

#[derive(Debug)]
pub(crate) struct RowSlot {
    pub cells: Vec<CellSlot>,
    pub child: Option<NodeKey>,
}

impl RowSlot {
    fn new(columns: i32) -> Self {
        Self {
            cells: (0..columns).map(|_| CellSlot::empty()).collect(),
            child: None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Node {
    pub parent: Option<NodeKey>,
    /// Row within the parent. Children always hang off column 0.
    pub row: i32,
    pub state: NodeState,
    pub counted: bool,
    pub columns: i32,
    pub rows: Vec<RowSlot>,
}

impl Node {
    fn new(parent: Option<NodeKey>, row: i32) -> Self {
        Self {
            parent,
            row,
            state: NodeState::Unfetched,
            counted: false,
            columns: 0,
            rows: Vec::new(),
        }
    }

    pub fn counts(&self) -> Option<(i32, i32)> {
        self.counted.then_some((self.rows.len() as i32, self.columns))
    }

    pub fn cell(&self, row: i32, column: i32) -> Option<&CellSlot> {
        self.rows.get(usize::try_from(row).ok()?)?.cells.get(usize::try_from(column).ok()?)
    }

    pub fn cell_mut(&mut self, row: i32, column: i32) -> Option<&mut CellSlot> {
        self.rows
            .get_mut(usize::try_from(row).ok()?)?
            .cells
            .get_mut(usize::try_from(column).ok()?)
    }

    fn mark_stale(&mut self) {
        if self.state == NodeState::Fetched {
            self.state = NodeState::Stale;
        }
    }
}

/// Result of walking a path through the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lookup {
    Found(NodeKey),
    /// An ancestor's counts are unknown, so the path cannot be checked yet.
    Blocked(NodeKey),
    /// The path does not exist according to what is cached.
    Missing,
}

/// The node tree of a mirrored collection.
pub(crate) struct Cache {
    nodes: Arena<Node>,
    root: NodeKey,
}

impl Cache {
    pub fn new() -> Self {
        let mut nodes = Arena::new();
        let root = nodes.insert(Node::new(None, -1));
        Self { nodes, root }
    }

    /// Evict everything. Every issued [`NodeKey`] becomes stale.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = self.nodes.insert(Node::new(None, -1));
    }

    pub fn node(&self, key: NodeKey) -> Option<&Node> {
        self.nodes.get(key)
    }

    pub fn node_mut(&mut self, key: NodeKey) -> Option<&mut Node> {
        self.nodes.get_mut(key)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Walk `path`, creating child entries for rows that are known to exist.
    pub fn lookup(&mut self, path: &PathIndex) -> Lookup {
        let mut key = self.root;
        for &(row, column) in path.steps() {
            if column != 0 || row < 0 {
                return Lookup::Missing;
            }
            let Some(node) = self.nodes.get(key) else {
                return Lookup::Missing;
            };
            if !node.counted {
                return Lookup::Blocked(key);
            }
            let Some(existing) = node.rows.get(row as usize).map(|slot| slot.child) else {
                return Lookup::Missing;
            };
            key = match existing {
                Some(child) => child,
                None => {
                    let child = self.nodes.insert(Node::new(Some(key), row));
                    if let Some(node) = self.nodes.get_mut(key) {
                        node.rows[row as usize].child = Some(child);
                    }
                    child
                }
            };
        }
        Lookup::Found(key)
    }

    /// Like [`lookup`](Self::lookup) but never creates entries.
    pub fn find(&self, path: &PathIndex) -> Option<NodeKey> {
        let mut key = self.root;
        for &(row, column) in path.steps() {
            if column != 0 || row < 0 {
                return None;
            }
            key = self.nodes.get(key)?.rows.get(row as usize)?.child?;
        }
        Some(key)
    }

    pub fn path_of(&self, key: NodeKey) -> Option<PathIndex> {
        let mut steps = Vec::new();
        let mut current = key;
        loop {
            let node = self.nodes.get(current)?;
            match node.parent {
                Some(parent) => {
                    steps.push((node.row, 0));
                    current = parent;
                }
                None => break,
            }
        }
        if current != self.root {
            return None;
        }
        steps.reverse();
        Some(PathIndex::new(steps))
    }

    pub fn cell(&self, path: &PathIndex) -> Option<&CellSlot> {
        let (row, column) = path.last()?;
        self.nodes.get(self.find(&path.parent()?)?)?.cell(row, column)
    }

    pub fn cell_mut(&mut self, path: &PathIndex) -> Option<&mut CellSlot> {
        let (row, column) = path.last()?;
        let key = self.find(&path.parent()?)?;
        self.nodes.get_mut(key)?.cell_mut(row, column)
    }

    /// Record fetched counts. Returns whether they differ from what was cached.
    pub fn set_counts(&mut self, key: NodeKey, rows: i32, columns: i32) -> bool {
        let (rows, columns) = (rows.max(0), columns.max(0));
        let Some(node) = self.nodes.get_mut(key) else {
            return false;
        };
        node.state = NodeState::Fetched;
        if node.counts() == Some((rows, columns)) {
            return false;
        }
        let old = std::mem::take(&mut node.rows);
        node.rows = (0..rows).map(|_| RowSlot::new(columns)).collect();
        node.columns = columns;
        node.counted = true;
        self.free_rows(old);
        true
    }

    /// Drop what is known about one node and its subtree.
    pub fn forget(&mut self, key: NodeKey) {
        let Some(node) = self.nodes.get_mut(key) else {
            return;
        };
        let old = std::mem::take(&mut node.rows);
        node.counted = false;
        node.columns = 0;
        node.state = NodeState::Unfetched;
        self.free_rows(old);
    }

    fn free_rows(&mut self, rows: Vec<RowSlot>) {
        let mut stack: Vec<_> = rows.into_iter().filter_map(|r| r.child).collect();
        while let Some(key) = stack.pop() {
            if let Some(node) = self.nodes.remove(key) {
                stack.extend(node.rows.into_iter().filter_map(|r| r.child));
            }
        }
    }

    fn reindex(&mut self, key: NodeKey) {
        let children: Vec<_> = match self.nodes.get(key) {
            Some(node) => node
                .rows
                .iter()
                .enumerate()
                .filter_map(|(row, slot)| slot.child.map(|child| (row as i32, child)))
                .collect(),
            None => return,
        };
        for (row, child) in children {
            if let Some(node) = self.nodes.get_mut(child) {
                node.row = row;
                node.parent = Some(key);
            }
        }
    }

    /// Forget in-flight requests below `key`: the paths they were sent for
    /// no longer name the same items.
    fn relax(&mut self, key: NodeKey) {
        let mut stack = vec![(key, true)];
        while let Some((key, is_top)) = stack.pop() {
            let Some(node) = self.nodes.get_mut(key) else {
                continue;
            };
            if !is_top && node.state == NodeState::Requested {
                node.state = if node.counted {
                    NodeState::Stale
                } else {
                    NodeState::Unfetched
                };
            }
            for slot in &mut node.rows {
                slot.cells.iter_mut().for_each(CellSlot::relax);
                if let Some(child) = slot.child {
                    stack.push((child, false));
                }
            }
        }
    }

    fn touched(&mut self, key: NodeKey) {
        if let Some(node) = self.nodes.get_mut(key) {
            node.mark_stale();
        }
        self.relax(key);
    }

    fn counted(&self, path: &PathIndex) -> Option<NodeKey> {
        let key = self.find(path)?;
        self.nodes.get(key)?.counted.then_some(key)
    }

    /// Replay a server side change on the cache.
    pub fn apply(&mut self, change: &CollectionChange) {
        use CollectionChange::*;
        match change {
            RowsInserted { parent, first, last } => {
                self.insert(parent, *first, last - first + 1, Axis::Rows)
            }
            ColumnsInserted { parent, first, last } => {
                self.insert(parent, *first, last - first + 1, Axis::Columns)
            }
            RowsRemoved { parent, first, last } => self.remove(parent, *first, *last, Axis::Rows),
            ColumnsRemoved { parent, first, last } => {
                self.remove(parent, *first, *last, Axis::Columns)
            }
            RowsMoved {
                parent,
                first,
                last,
                destination,
                row,
            } => self.move_rows(parent, *first, *last, destination, *row),
            ColumnsMoved {
                parent,
                first,
                last,
                destination,
                column,
            } => self.move_columns(parent, *first, *last, destination, *column),
            DataChanged { parent, range } => self.outdate(parent, range),
            LayoutChanged { parents } => {
                for parent in parents {
                    self.relayout(parent);
                }
            }
            HeaderChanged { .. } => {}
            Reset => self.clear(),
        }
    }

    fn insert(&mut self, parent: &PathIndex, first: i32, count: i32, axis: Axis) {
        let Some(key) = self.counted(parent) else {
            return;
        };
        let Some(node) = self.nodes.get_mut(key) else {
            return;
        };
        let len = match axis {
            Axis::Rows => node.rows.len() as i32,
            Axis::Columns => node.columns,
        };
        if first < 0 || first > len || count <= 0 {
            tracing::debug!(%parent, first, count, "Insert outside cached range, refetching node");
            self.forget(key);
            return;
        }
        let at = first as usize;
        match axis {
            Axis::Rows => {
                let columns = node.columns;
                node.rows
                    .splice(at..at, (0..count).map(|_| RowSlot::new(columns)));
                self.reindex(key);
            }
            Axis::Columns => {
                node.columns += count;
                for slot in &mut node.rows {
                    slot.cells
                        .splice(at..at, (0..count).map(|_| CellSlot::empty()));
                }
            }
        }
        self.touched(key);
    }

    fn remove(&mut self, parent: &PathIndex, first: i32, last: i32, axis: Axis) {
        let Some(key) = self.counted(parent) else {
            return;
        };
        let Some(node) = self.nodes.get_mut(key) else {
            return;
        };
        let len = match axis {
            Axis::Rows => node.rows.len() as i32,
            Axis::Columns => node.columns,
        };
        if first < 0 || last < first || last >= len {
            tracing::debug!(%parent, first, last, "Removal outside cached range, refetching node");
            self.forget(key);
            return;
        }
        let range = first as usize..=last as usize;
        match axis {
            Axis::Rows => {
                let removed: Vec<_> = node.rows.drain(range).collect();
                self.free_rows(removed);
                self.reindex(key);
            }
            Axis::Columns => {
                node.columns -= last - first + 1;
                for slot in &mut node.rows {
                    slot.cells.drain(range.clone());
                }
            }
        }
        self.touched(key);
    }

    fn move_rows(&mut self, parent: &PathIndex, first: i32, last: i32, destination: &PathIndex, target: i32) {
        let count = last - first + 1;
        let source = self.counted(parent);
        let sink = self.counted(destination);
        let target = move_target(parent == destination, first, last, target);

        let block = source.and_then(|key| {
            let node = self.nodes.get_mut(key)?;
            if first < 0 || last < first || last as usize >= node.rows.len() {
                self.forget(key);
                return None;
            }
            let block: Vec<_> = node.rows.drain(first as usize..=last as usize).collect();
            self.reindex(key);
            Some(block)
        });

        let placed = sink.and_then(|key| {
            let node = self.nodes.get(key)?;
            if !node.counted || target < 0 || target as usize > node.rows.len() {
                return None;
            }
            Some((key, node.columns))
        });

        match (placed, block) {
            (Some((key, columns)), block) => {
                let at = target as usize;
                let rows = block.unwrap_or_else(|| (0..count).map(|_| RowSlot::new(columns)).collect());
                if let Some(node) = self.nodes.get_mut(key) {
                    node.rows.splice(at..at, rows);
                }
                self.reindex(key);
            }
            (None, Some(block)) => {
                if let Some(key) = sink {
                    self.forget(key);
                }
                self.free_rows(block);
            }
            (None, None) => {}
        }
        for key in [source, sink].into_iter().flatten() {
            self.touched(key);
        }
    }

    fn move_columns(&mut self, parent: &PathIndex, first: i32, last: i32, destination: &PathIndex, target: i32) {
        let count = last - first + 1;
        if parent != destination {
            self.remove(parent, first, last, Axis::Columns);
            let target = move_target(false, first, last, target);
            self.insert(destination, target, count, Axis::Columns);
            return;
        }
        let Some(key) = self.counted(parent) else {
            return;
        };
        let Some(node) = self.nodes.get_mut(key) else {
            return;
        };
        let target = move_target(true, first, last, target);
        if first < 0 || last < first || last >= node.columns || target < 0 || target + count > node.columns {
            self.forget(key);
            return;
        }
        for slot in &mut node.rows {
            let block: Vec<_> = slot.cells.drain(first as usize..=last as usize).collect();
            let at = target as usize;
            slot.cells.splice(at..at, block);
        }
        self.touched(key);
    }

    fn outdate(&mut self, parent: &PathIndex, range: &CellRange) {
        let Some(key) = self.counted(parent) else {
            return;
        };
        let Some(node) = self.nodes.get_mut(key) else {
            return;
        };
        let (rows, columns) = (node.rows.len() as i32, node.columns);
        let range = range.clamped(rows, columns);
        if range.is_empty() {
            return;
        }
        for (row, column) in range.cells() {
            if let Some(cell) = node.cell_mut(row, column) {
                cell.outdate();
            }
        }
    }

    fn relayout(&mut self, parent: &PathIndex) {
        let Some(key) = self.counted(parent) else {
            return;
        };
        let Some(node) = self.nodes.get_mut(key) else {
            return;
        };
        let mut children = Vec::new();
        for slot in &mut node.rows {
            slot.cells.iter_mut().for_each(CellSlot::outdate);
            children.extend(slot.child.take());
        }
        let mut stack = children;
        while let Some(child) = stack.pop() {
            if let Some(node) = self.nodes.remove(child) {
                stack.extend(node.rows.into_iter().filter_map(|r| r.child));
            }
        }
        self.touched(key);
    }
}
