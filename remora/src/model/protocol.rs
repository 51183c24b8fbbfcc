//! Payloads of the collection mirroring messages.

use bytes::Bytes;

use super::{CellRange, CollectionChange, ItemFlags, Orientation, PathIndex, Role, Value};
use crate::{Message, MessageType, Result, message::wire::wire_struct};

/// Row and column count reported for a path that does not exist.
pub(crate) const NOT_FOUND: i32 = -1;

macro_rules! payload {
    ($name:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        #[derive(Debug, Clone, PartialEq)]
        pub(crate) struct $name {
            $(pub $field: $ty),*
        }

        wire_struct!($name { $($field),* });
    };
}

payload!(CountRequest {
    revision: u64,
    paths: Vec<PathIndex>,
});

payload!(NodeCount {
    path: PathIndex,
    rows: i32,
    columns: i32,
});

payload!(CountReply {
    revision: u64,
    counts: Vec<NodeCount>,
});

payload!(ContentRequest {
    revision: u64,
    parent: PathIndex,
    range: CellRange,
    roles: Vec<Role>,
});

payload!(CellData {
    row: i32,
    column: i32,
    flags: ItemFlags,
    values: Vec<(Role, Value)>,
});

payload!(ContentReply {
    revision: u64,
    parent: PathIndex,
    found: bool,
    cells: Vec<CellData>,
});

payload!(HeaderRequest {
    orientation: Orientation,
    section: i32,
    roles: Vec<Role>,
});

payload!(HeaderReply {
    orientation: Orientation,
    section: i32,
    values: Vec<(Role, Value)>,
});

payload!(SetDataRequest {
    path: PathIndex,
    role: Role,
    value: Value,
});

payload!(SetDataReply {
    revision: u64,
    path: PathIndex,
    role: Role,
    accepted: bool,
    value: Value,
});

payload!(RangeNotice {
    revision: u64,
    parent: PathIndex,
    first: i32,
    last: i32,
});

payload!(MoveNotice {
    revision: u64,
    parent: PathIndex,
    first: i32,
    last: i32,
    destination: PathIndex,
    target: i32,
});

payload!(DataNotice {
    parent: PathIndex,
    range: CellRange,
});

payload!(HeaderNotice {
    orientation: Orientation,
    first: i32,
    last: i32,
});

payload!(LayoutNotice {
    revision: u64,
    parents: Vec<PathIndex>,
});

/// A server pushed notification, decoded.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Notification {
    /// `None` for notifications that do not alter the structure.
    pub revision: Option<u64>,
    pub change: CollectionChange,
}

impl Notification {
    /// Encode `change` stamped with `revision`.
    pub fn encode(change: &CollectionChange, revision: u64) -> (MessageType, Bytes) {
        use crate::message::wire::to_payload;
        use CollectionChange::*;

        let range = |parent: &PathIndex, first: i32, last: i32| {
            to_payload(&RangeNotice {
                revision,
                parent: parent.clone(),
                first,
                last,
            })
        };
        let moved = |parent: &PathIndex, first: i32, last: i32, destination: &PathIndex, target: i32| {
            to_payload(&MoveNotice {
                revision,
                parent: parent.clone(),
                first,
                last,
                destination: destination.clone(),
                target,
            })
        };

        match change {
            RowsInserted { parent, first, last } => {
                (MessageType::ModelRowsAdded, range(parent, *first, *last))
            }
            RowsRemoved { parent, first, last } => {
                (MessageType::ModelRowsRemoved, range(parent, *first, *last))
            }
            RowsMoved {
                parent,
                first,
                last,
                destination,
                row,
            } => (
                MessageType::ModelRowsMoved,
                moved(parent, *first, *last, destination, *row),
            ),
            ColumnsInserted { parent, first, last } => {
                (MessageType::ModelColumnsAdded, range(parent, *first, *last))
            }
            ColumnsRemoved { parent, first, last } => {
                (MessageType::ModelColumnsRemoved, range(parent, *first, *last))
            }
            ColumnsMoved {
                parent,
                first,
                last,
                destination,
                column,
            } => (
                MessageType::ModelColumnsMoved,
                moved(parent, *first, *last, destination, *column),
            ),
            DataChanged { parent, range } => (
                MessageType::ModelDataChanged,
                to_payload(&DataNotice {
                    parent: parent.clone(),
                    range: *range,
                }),
            ),
            HeaderChanged {
                orientation,
                first,
                last,
            } => (
                MessageType::ModelHeaderChanged,
                to_payload(&HeaderNotice {
                    orientation: *orientation,
                    first: *first,
                    last: *last,
                }),
            ),
            LayoutChanged { parents } => (
                MessageType::ModelLayoutChanged,
                to_payload(&LayoutNotice {
                    revision,
                    parents: parents.clone(),
                }),
            ),
            Reset => (MessageType::ModelReset, to_payload(&revision)),
        }
    }

    /// Decode a notification. `None` if the message is not one.
    pub fn decode(message: &Message) -> Result<Option<Self>> {
        use CollectionChange::*;
        use MessageType as T;

        let structural = |revision: u64, change| Notification {
            revision: Some(revision),
            change,
        };
        let notification = match message.message_type {
            T::ModelRowsAdded | T::ModelRowsRemoved | T::ModelColumnsAdded | T::ModelColumnsRemoved => {
                let RangeNotice {
                    revision,
                    parent,
                    first,
                    last,
                } = message.decode()?;
                let change = match message.message_type {
                    T::ModelRowsAdded => RowsInserted { parent, first, last },
                    T::ModelRowsRemoved => RowsRemoved { parent, first, last },
                    T::ModelColumnsAdded => ColumnsInserted { parent, first, last },
                    _ => ColumnsRemoved { parent, first, last },
                };
                structural(revision, change)
            }
            T::ModelRowsMoved | T::ModelColumnsMoved => {
                let MoveNotice {
                    revision,
                    parent,
                    first,
                    last,
                    destination,
                    target,
                } = message.decode()?;
                let change = if message.message_type == T::ModelRowsMoved {
                    RowsMoved {
                        parent,
                        first,
                        last,
                        destination,
                        row: target,
                    }
                } else {
                    ColumnsMoved {
                        parent,
                        first,
                        last,
                        destination,
                        column: target,
                    }
                };
                structural(revision, change)
            }
            T::ModelDataChanged => {
                let DataNotice { parent, range } = message.decode()?;
                Notification {
                    revision: None,
                    change: DataChanged { parent, range },
                }
            }
            T::ModelHeaderChanged => {
                let HeaderNotice {
                    orientation,
                    first,
                    last,
                } = message.decode()?;
                Notification {
                    revision: None,
                    change: HeaderChanged {
                        orientation,
                        first,
                        last,
                    },
                }
            }
            T::ModelLayoutChanged => {
                let LayoutNotice { revision, parents } = message.decode()?;
                structural(revision, LayoutChanged { parents })
            }
            T::ModelReset => structural(message.decode()?, Reset),
            _ => return Ok(None),
        };
        Ok(Some(notification))
    }
}
