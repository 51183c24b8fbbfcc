use std::collections::{BTreeMap, HashMap};

use super::{
    CellRange, Collection, CollectionChange, CollectionSource, ItemFlags, Orientation, PathIndex,
    Role, Value,
};

#[derive(Debug, Clone, Default)]
struct MemoryCell {
    values: BTreeMap<Role, Value>,
    flags: ItemFlags,
}

impl MemoryCell {
    fn new(display: Value) -> Self {
        let mut values = BTreeMap::new();
        if !display.is_null() {
            values.insert(Role::Display, display);
        }
        Self {
            values,
            flags: ItemFlags::SELECTABLE | ItemFlags::ENABLED | ItemFlags::EDITABLE,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryRow {
    cells: Vec<MemoryCell>,
    children: MemoryNode,
}

#[derive(Debug, Clone, Default)]
struct MemoryNode {
    columns: i32,
    rows: Vec<MemoryRow>,
}

impl MemoryNode {
    fn row(&self, values: Vec<Value>) -> MemoryRow {
        let mut cells: Vec<_> = values.into_iter().map(MemoryCell::new).collect();
        cells.resize_with(self.columns.max(0) as usize, MemoryCell::default);
        MemoryRow {
            cells,
            children: MemoryNode {
                columns: self.columns,
                rows: Vec::new(),
            },
        }
    }
}

fn is_node_path(path: &PathIndex) -> bool {
    path.steps().iter().all(|&(row, column)| row >= 0 && column == 0)
}

/// In-memory tree implementing [`CollectionSource`].
///
/// Every mutator returns the [`CollectionChange`] it caused so it can be fed
/// straight into [`CollectionServer::mutate`](super::CollectionServer::mutate).
/// Mutations addressing paths that do not exist return `None` and change
/// nothing.
///
/// ```rust
/// use remora::model::{Collection, MemoryCollection, PathIndex, Role};
///
/// let mut list = MemoryCollection::list(["A", "B", "C", "D"]);
/// list.insert_row(&PathIndex::root(), 1, vec!["X".into()]);
///
/// assert_eq!(list.row_count(&PathIndex::root()), Some(5));
/// assert_eq!(list.data(&PathIndex::cell(2, 0), Role::Display), "B");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryCollection {
    root: MemoryNode,
    headers: HashMap<(Orientation, i32), BTreeMap<Role, Value>>,
}

impl MemoryCollection {
    /// An empty collection with `columns` columns at every level.
    pub fn new(columns: i32) -> Self {
        Self {
            root: MemoryNode {
                columns,
                rows: Vec::new(),
            },
            headers: HashMap::new(),
        }
    }

    /// A single column list.
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let mut collection = Self::new(1);
        for item in items {
            let row = collection.root.row(vec![item.into()]);
            collection.root.rows.push(row);
        }
        collection
    }

    fn node(&self, path: &PathIndex) -> Option<&MemoryNode> {
        if !is_node_path(path) {
            return None;
        }
        let mut node = &self.root;
        for &(row, _) in path.steps() {
            node = &node.rows.get(row as usize)?.children;
        }
        Some(node)
    }

    fn node_mut(&mut self, path: &PathIndex) -> Option<&mut MemoryNode> {
        if !is_node_path(path) {
            return None;
        }
        let mut node = &mut self.root;
        for &(row, _) in path.steps() {
            node = &mut node.rows.get_mut(row as usize)?.children;
        }
        Some(node)
    }

    fn cell(&self, path: &PathIndex) -> Option<&MemoryCell> {
        let (row, column) = path.last()?;
        self.node(&path.parent()?)?
            .rows
            .get(row as usize)?
            .cells
            .get(column as usize)
    }

    fn cell_mut(&mut self, path: &PathIndex) -> Option<&mut MemoryCell> {
        let (row, column) = path.last()?;
        self.node_mut(&path.parent()?)?
            .rows
            .get_mut(row as usize)?
            .cells
            .get_mut(column as usize)
    }

    /// Insert one row before `row`. Missing trailing values stay empty.
    pub fn insert_row(&mut self, parent: &PathIndex, row: i32, values: Vec<Value>) -> Option<CollectionChange> {
        self.insert_rows(parent, row, vec![values])
    }

    pub fn insert_rows(
        &mut self,
        parent: &PathIndex,
        row: i32,
        rows: Vec<Vec<Value>>,
    ) -> Option<CollectionChange> {
        let node = self.node_mut(parent)?;
        if rows.is_empty() || row < 0 || row as usize > node.rows.len() {
            return None;
        }
        let count = rows.len() as i32;
        let new_rows: Vec<_> = rows.into_iter().map(|values| node.row(values)).collect();
        node.rows.splice(row as usize..row as usize, new_rows);
        Some(CollectionChange::RowsInserted {
            parent: parent.clone(),
            first: row,
            last: row + count - 1,
        })
    }

    /// Append a row and return the change.
    pub fn push_row(&mut self, parent: &PathIndex, values: Vec<Value>) -> Option<CollectionChange> {
        let row = self.row_count(parent)?;
        self.insert_row(parent, row, values)
    }

    pub fn remove_rows(&mut self, parent: &PathIndex, first: i32, count: i32) -> Option<CollectionChange> {
        let node = self.node_mut(parent)?;
        let last = first + count - 1;
        if count <= 0 || first < 0 || last as usize >= node.rows.len() {
            return None;
        }
        node.rows.drain(first as usize..=last as usize);
        Some(CollectionChange::RowsRemoved {
            parent: parent.clone(),
            first,
            last,
        })
    }

    /// Move `count` rows starting at `first` before row `row` of `destination`.
    pub fn move_rows(
        &mut self,
        parent: &PathIndex,
        first: i32,
        count: i32,
        destination: &PathIndex,
        row: i32,
    ) -> Option<CollectionChange> {
        let last = first + count - 1;
        let source_len = self.node(parent)?.rows.len();
        let destination_len = self.node(destination)?.rows.len();
        if count <= 0 || first < 0 || last as usize >= source_len || row < 0 || row as usize > destination_len {
            return None;
        }
        let change = CollectionChange::RowsMoved {
            parent: parent.clone(),
            first,
            last,
            destination: destination.clone(),
            row,
        };
        if parent == destination && (first..=last + 1).contains(&row) {
            // no-op move
            return None;
        }
        // a block cannot move into itself
        if destination
            .step_below(parent)
            .is_some_and(|(r, _)| (first..=last).contains(&r))
        {
            return None;
        }
        let destination_after = CollectionChange::RowsRemoved {
            parent: parent.clone(),
            first,
            last,
        }
        .remap(destination)?;
        let target = super::change::move_target(parent == destination, first, last, row);
        let block: Vec<_> = self
            .node_mut(parent)?
            .rows
            .drain(first as usize..=last as usize)
            .collect();
        let node = self.node_mut(&destination_after)?;
        node.rows.splice(target as usize..target as usize, block);
        Some(change)
    }

    pub fn insert_columns(&mut self, parent: &PathIndex, column: i32, count: i32) -> Option<CollectionChange> {
        let node = self.node_mut(parent)?;
        if count <= 0 || column < 0 || column > node.columns {
            return None;
        }
        node.columns += count;
        for row in &mut node.rows {
            let at = (column as usize).min(row.cells.len());
            row.cells
                .splice(at..at, (0..count).map(|_| MemoryCell::new(Value::Null)));
        }
        Some(CollectionChange::ColumnsInserted {
            parent: parent.clone(),
            first: column,
            last: column + count - 1,
        })
    }

    pub fn remove_columns(&mut self, parent: &PathIndex, first: i32, count: i32) -> Option<CollectionChange> {
        let node = self.node_mut(parent)?;
        let last = first + count - 1;
        if count <= 0 || first < 0 || last >= node.columns {
            return None;
        }
        node.columns -= count;
        for row in &mut node.rows {
            row.cells.drain(first as usize..=last as usize);
        }
        Some(CollectionChange::ColumnsRemoved {
            parent: parent.clone(),
            first,
            last,
        })
    }

    /// Set one value and report the touched cell.
    pub fn set(&mut self, path: &PathIndex, role: Role, value: impl Into<Value>) -> Option<CollectionChange> {
        let cell = self.cell_mut(path)?;
        let value = value.into();
        if value.is_null() {
            cell.values.remove(&role);
        } else {
            cell.values.insert(role, value);
        }
        Some(CollectionChange::DataChanged {
            parent: path.parent()?,
            range: CellRange::cell(path.row(), path.column()),
        })
    }

    pub fn set_flags(&mut self, path: &PathIndex, flags: ItemFlags) -> Option<CollectionChange> {
        self.cell_mut(path)?.flags = flags;
        Some(CollectionChange::DataChanged {
            parent: path.parent()?,
            range: CellRange::cell(path.row(), path.column()),
        })
    }

    pub fn set_header(
        &mut self,
        orientation: Orientation,
        section: i32,
        role: Role,
        value: impl Into<Value>,
    ) -> CollectionChange {
        self.headers
            .entry((orientation, section))
            .or_default()
            .insert(role, value.into());
        CollectionChange::HeaderChanged {
            orientation,
            first: section,
            last: section,
        }
    }

    /// Sort the rows under `parent` by their display text.
    pub fn sort(&mut self, parent: &PathIndex, column: i32) -> Option<CollectionChange> {
        let node = self.node_mut(parent)?;
        node.rows.sort_by(|a, b| {
            let key = |row: &MemoryRow| {
                row.cells
                    .get(column as usize)
                    .and_then(|c| c.values.get(&Role::Display))
                    .map(ToString::to_string)
                    .unwrap_or_default()
            };
            key(a).cmp(&key(b))
        });
        Some(CollectionChange::LayoutChanged {
            parents: vec![parent.clone()],
        })
    }

    /// Drop everything and report a reset.
    pub fn clear(&mut self) -> CollectionChange {
        self.root.rows.clear();
        CollectionChange::Reset
    }
}

impl Collection for MemoryCollection {
    fn row_count(&self, parent: &PathIndex) -> Option<i32> {
        if let Some((_, column)) = parent.last() {
            if column != 0 {
                return self.cell(parent).map(|_| 0);
            }
        }
        self.node(parent).map(|node| node.rows.len() as i32)
    }

    fn column_count(&self, parent: &PathIndex) -> Option<i32> {
        if let Some((_, column)) = parent.last() {
            if column != 0 {
                return self.cell(parent).map(|_| 0);
            }
        }
        self.node(parent).map(|node| node.columns)
    }

    fn data(&self, path: &PathIndex, role: Role) -> Value {
        self.cell(path)
            .and_then(|cell| cell.values.get(&role))
            .cloned()
            .unwrap_or_default()
    }

    fn flags(&self, path: &PathIndex) -> ItemFlags {
        self.cell(path).map(|cell| cell.flags).unwrap_or_default()
    }

    fn header_data(&self, orientation: Orientation, section: i32, role: Role) -> Value {
        self.headers
            .get(&(orientation, section))
            .and_then(|values| values.get(&role))
            .cloned()
            .unwrap_or_default()
    }
}

impl CollectionSource for MemoryCollection {
    fn set_data(&mut self, path: &PathIndex, role: Role, value: Value) -> bool {
        let editable = self
            .cell(path)
            .is_some_and(|cell| cell.flags.contains(ItemFlags::EDITABLE));
        editable && self.set(path, role, value).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn display(collection: &MemoryCollection, path: PathIndex) -> String {
        collection.data(&path, Role::Display).to_string()
    }

    #[test]
    fn test_list_insert_and_remove() {
        let mut list = MemoryCollection::list(["A", "B", "C", "D"]);
        let change = list.insert_row(&PathIndex::root(), 1, vec!["X".into()]);
        assert_eq!(
            change,
            Some(CollectionChange::RowsInserted {
                parent: PathIndex::root(),
                first: 1,
                last: 1
            })
        );
        assert_eq!(list.row_count(&PathIndex::root()), Some(5));
        assert_eq!(display(&list, PathIndex::cell(1, 0)), "X");

        assert!(list.remove_rows(&PathIndex::root(), 0, 2).is_some());
        assert_eq!(display(&list, PathIndex::cell(0, 0)), "B");
        assert!(list.remove_rows(&PathIndex::root(), 2, 5).is_none());
    }

    #[test]
    fn test_children_and_missing_paths() {
        let mut tree = MemoryCollection::new(2);
        tree.push_row(&PathIndex::root(), vec!["parent".into(), "p2".into()]);
        tree.push_row(&PathIndex::cell(0, 0), vec!["child".into()]);

        assert_eq!(tree.row_count(&PathIndex::cell(0, 0)), Some(1));
        assert_eq!(tree.row_count(&PathIndex::cell(0, 1)), Some(0));
        assert_eq!(tree.row_count(&PathIndex::cell(3, 0)), None);
        assert_eq!(display(&tree, PathIndex::new([(0, 0), (0, 0)])), "child");
        assert_eq!(tree.data(&PathIndex::new([(0, 1), (0, 0)]), Role::Display), Value::Null);
    }

    #[test]
    fn test_move_rows_matches_change_remap() {
        let mut list = MemoryCollection::list(["A", "B", "C", "D", "E"]);
        let change = list
            .move_rows(&PathIndex::root(), 1, 2, &PathIndex::root(), 4)
            .unwrap();
        let order: Vec<_> = (0..5).map(|r| display(&list, PathIndex::cell(r, 0))).collect();
        assert_eq!(order, ["A", "D", "B", "C", "E"]);
        assert_eq!(change.remap(&PathIndex::cell(1, 0)), Some(PathIndex::cell(2, 0)));
    }

    #[test]
    fn test_move_rows_into_sibling() {
        let mut tree = MemoryCollection::list(["A", "B", "C"]);
        tree.move_rows(&PathIndex::root(), 0, 1, &PathIndex::cell(2, 0), 0)
            .unwrap();
        assert_eq!(tree.row_count(&PathIndex::root()), Some(2));
        assert_eq!(display(&tree, PathIndex::new([(1, 0), (0, 0)])), "A");
    }

    #[test]
    fn test_set_data_respects_editable_flag() {
        let mut list = MemoryCollection::list(["A"]);
        let path = PathIndex::cell(0, 0);
        assert!(list.set_data(&path, Role::Display, "Z".into()));
        list.set_flags(&path, ItemFlags::SELECTABLE);
        assert!(!list.set_data(&path, Role::Display, "Q".into()));
        assert_eq!(display(&list, path), "Z");
    }

    #[test]
    fn test_columns_and_headers() {
        let mut table = MemoryCollection::new(1);
        table.push_row(&PathIndex::root(), vec!["a".into()]);
        table.insert_columns(&PathIndex::root(), 0, 1);
        assert_eq!(table.column_count(&PathIndex::root()), Some(2));
        assert_eq!(display(&table, PathIndex::cell(0, 1)), "a");

        table.set_header(Orientation::Horizontal, 1, Role::Display, "Name");
        assert_eq!(table.header_data(Orientation::Horizontal, 1, Role::Display), "Name");
    }

    #[test]
    fn test_sort_reports_layout_change() {
        let mut list = MemoryCollection::list(["c", "a", "b"]);
        let change = list.sort(&PathIndex::root(), 0).unwrap();
        assert!(matches!(change, CollectionChange::LayoutChanged { .. }));
        assert_eq!(display(&list, PathIndex::cell(0, 0)), "a");
    }
}
