//! Client side of the collection mirroring protocol.

mod arena;
mod cache;

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;

pub use arena::NodeKey;
use cache::{Cache, Lookup};
pub use cache::{CellState, NodeState};

use super::{
    CellRange, ChangesSince, CollectionChange, CollectionEvent, ItemFlags, Orientation, PathIndex,
    Role, Value,
    change::Subscribers,
    protocol::{
        ContentReply, ContentRequest, CountReply, CountRequest, HeaderReply, HeaderRequest,
        NOT_FOUND, Notification, SetDataReply, SetDataRequest,
    },
};
use crate::{
    Endpoint, Error, Label, Message, MessageHandler, MessageType, Result, message::wire::to_payload,
};

/// How a reply's revision relates to what the client has applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplySync {
    InSync,
    /// Computed before notifications the client already applied.
    Stale,
    /// The client missed notifications.
    Ahead,
}

#[derive(Debug, Default, Clone, PartialEq)]
struct HeaderSlot {
    state: Option<CellState>,
    values: HashMap<Role, Value>,
}

#[derive(Default)]
struct PendingFetches {
    counts: BTreeSet<NodeKey>,
    cells: HashMap<NodeKey, BTreeSet<(i32, i32)>>,
    headers: BTreeSet<(Orientation, i32)>,
}

impl PendingFetches {
    fn is_empty(&self) -> bool {
        self.counts.is_empty() && self.cells.is_empty() && self.headers.is_empty()
    }
}

struct ClientState {
    cache: Cache,
    /// Revision of the last structural notification applied.
    applied: Option<u64>,
    headers: HashMap<(Orientation, i32), HeaderSlot>,
    roles: Vec<Role>,
    pending: PendingFetches,
    flush_scheduled: bool,
    subscribers: Subscribers,
}

impl ClientState {
    fn new(roles: Vec<Role>) -> Self {
        Self {
            cache: Cache::new(),
            applied: None,
            headers: HashMap::new(),
            roles,
            pending: PendingFetches::default(),
            flush_scheduled: false,
            subscribers: Subscribers::default(),
        }
    }

    fn emit(&mut self, event: CollectionEvent) {
        tracing::trace!(event = %event.label(), "Collection event");
        self.subscribers.emit(event);
    }

    /// Drop the whole cache. Pending fetches die with it.
    fn reset(&mut self) {
        self.cache.clear();
        self.headers.clear();
        self.pending = PendingFetches::default();
        self.emit(CollectionEvent::Changed(CollectionChange::Reset));
    }

    fn reply_sync(&mut self, revision: u64) -> ReplySync {
        match self.applied {
            None => {
                self.applied = Some(revision);
                ReplySync::InSync
            }
            Some(applied) if applied == revision => ReplySync::InSync,
            Some(applied) if revision < applied => ReplySync::Stale,
            Some(_) => ReplySync::Ahead,
        }
    }

    /// Counts of `parent`, queueing a fetch when they are unknown or stale.
    fn counts(&mut self, parent: &PathIndex) -> Option<(i32, i32)> {
        let key = match self.cache.lookup(parent) {
            Lookup::Found(key) => key,
            Lookup::Blocked(ancestor) => {
                self.request_counts(ancestor);
                return None;
            }
            Lookup::Missing => return None,
        };
        self.request_counts(key);
        self.cache.node(key)?.counts()
    }

    fn request_counts(&mut self, key: NodeKey) {
        if let Some(node) = self.cache.node_mut(key) {
            if matches!(node.state, NodeState::Unfetched | NodeState::Stale) {
                node.state = NodeState::Requested;
                self.pending.counts.insert(key);
            }
        }
    }

    /// Cached value and flags of a cell, queueing a fetch when needed.
    fn cell(&mut self, path: &PathIndex, role: Role) -> Option<(Value, ItemFlags)> {
        let (row, column) = path.last()?;
        let parent = path.parent()?;
        let (rows, columns) = self.counts(&parent)?;
        if row >= rows || column >= columns || row < 0 || column < 0 {
            return None;
        }
        let key = self.cache.find(&parent)?;
        let unknown_role = !self.roles.contains(&role);
        if unknown_role {
            self.roles.push(role);
        }
        let cell = self.cache.node_mut(key)?.cell_mut(row, column)?;
        let fetch = match cell.state {
            CellState::Empty | CellState::Outdated => true,
            CellState::Loaded => unknown_role,
            CellState::Loading => false,
        };
        let result = (cell.value(role), cell.flags);
        if fetch {
            cell.state = CellState::Loading;
            self.pending.cells.entry(key).or_default().insert((row, column));
        }
        Some(result)
    }

    fn apply_notification(&mut self, notification: Notification) {
        let Notification { revision, change } = notification;
        if let Some(revision) = revision {
            match self.applied {
                Some(applied) if revision <= applied => {
                    tracing::trace!(revision, applied, "Skipping notification already applied");
                    return;
                }
                Some(applied) if revision > applied + 1 => {
                    tracing::debug!(revision, applied, "Revision gap, resetting cache");
                    self.applied = Some(revision);
                    self.reset();
                    return;
                }
                _ => self.applied = Some(revision),
            }
        }
        match &change {
            CollectionChange::Reset => {
                self.reset();
                return;
            }
            CollectionChange::HeaderChanged {
                orientation,
                first,
                last,
            } => {
                for ((o, section), slot) in self.headers.iter_mut() {
                    if o == orientation
                        && (*first..=*last).contains(section)
                        && slot.state == Some(CellState::Loaded)
                    {
                        slot.state = Some(CellState::Outdated);
                    }
                }
            }
            _ => self.cache.apply(&change),
        }
        self.emit(CollectionEvent::Changed(change));
    }

    fn apply_counts(&mut self, reply: CountReply) {
        match self.reply_sync(reply.revision) {
            ReplySync::InSync => {}
            ReplySync::Ahead => {
                self.applied = Some(reply.revision);
                self.reset();
                return;
            }
            ReplySync::Stale => {
                let mut parents = Vec::new();
                for count in reply.counts {
                    if let Some(node) = self.cache.find(&count.path).and_then(|k| self.cache.node_mut(k)) {
                        if node.state == NodeState::Requested {
                            node.state = if node.counted {
                                NodeState::Stale
                            } else {
                                NodeState::Unfetched
                            };
                            parents.push(count.path);
                        }
                    }
                }
                if !parents.is_empty() {
                    self.emit(CollectionEvent::Invalidated { parents });
                }
                return;
            }
        }
        for count in reply.counts {
            let Some(key) = self.cache.find(&count.path) else {
                continue;
            };
            if self.cache.node(key).map(|n| n.state) != Some(NodeState::Requested) {
                continue;
            }
            let (rows, columns) = if count.rows == NOT_FOUND {
                (0, 0)
            } else {
                (count.rows, count.columns)
            };
            if self.cache.set_counts(key, rows, columns) {
                self.emit(CollectionEvent::Populated {
                    parent: count.path,
                    rows,
                    columns,
                });
            }
        }
    }

    fn apply_content(&mut self, reply: ContentReply) {
        let sync = self.reply_sync(reply.revision);
        if sync == ReplySync::Ahead {
            self.applied = Some(reply.revision);
            self.reset();
            return;
        }
        let Some(key) = self.cache.find(&reply.parent) else {
            return;
        };
        if !reply.found {
            if self.cache.set_counts(key, 0, 0) {
                self.emit(CollectionEvent::Changed(CollectionChange::LayoutChanged {
                    parents: vec![reply.parent],
                }));
            }
            return;
        }
        let Some(node) = self.cache.node_mut(key) else {
            return;
        };
        let mut covered: Option<CellRange> = None;
        for cell in reply.cells {
            let Some(slot) = node.cell_mut(cell.row, cell.column) else {
                continue;
            };
            match sync {
                ReplySync::InSync => {
                    slot.values = cell.values.into_iter().collect();
                    slot.flags = cell.flags;
                    slot.state = CellState::Loaded;
                }
                // answer for an older shape: let the cell be fetched again
                _ => slot.relax(),
            }
            covered = Some(match covered {
                None => CellRange::cell(cell.row, cell.column),
                Some(r) => CellRange::new(
                    r.first_row.min(cell.row),
                    r.last_row.max(cell.row),
                    r.first_column.min(cell.column),
                    r.last_column.max(cell.column),
                ),
            });
        }
        if let Some(range) = covered {
            self.emit(CollectionEvent::Changed(CollectionChange::DataChanged {
                parent: reply.parent,
                range,
            }));
        }
    }

    fn apply_header(&mut self, reply: HeaderReply) {
        let slot = self
            .headers
            .entry((reply.orientation, reply.section))
            .or_default();
        slot.values = reply.values.into_iter().collect();
        slot.state = Some(CellState::Loaded);
        self.emit(CollectionEvent::Changed(CollectionChange::HeaderChanged {
            orientation: reply.orientation,
            first: reply.section,
            last: reply.section,
        }));
    }

    fn apply_set_data(&mut self, reply: SetDataReply) {
        if !matches!(self.reply_sync(reply.revision), ReplySync::InSync) {
            return;
        }
        let (Some(parent), Some((row, column))) = (reply.path.parent(), reply.path.last()) else {
            return;
        };
        if reply.accepted {
            if let Some(cell) = self.cache.cell_mut(&reply.path) {
                if reply.value.is_null() {
                    cell.values.remove(&reply.role);
                } else {
                    cell.values.insert(reply.role, reply.value);
                }
            }
        } else {
            tracing::debug!(path = %reply.path, role = %reply.role.label(), "Write rejected by source");
        }
        self.emit(CollectionEvent::Changed(CollectionChange::DataChanged {
            parent,
            range: CellRange::cell(row, column),
        }));
    }
}

struct RemoteShared {
    name: Arc<str>,
    endpoint: Endpoint,
    max_batch_rows: usize,
    state: Mutex<ClientState>,
}

impl RemoteShared {
    /// Make sure queued fetches go out once the current scheduling tick is over.
    fn schedule_flush(self: &Arc<Self>, state: &mut ClientState) {
        if state.flush_scheduled || state.pending.is_empty() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                state.flush_scheduled = true;
                let shared = self.clone();
                handle.spawn(async move {
                    tokio::task::yield_now().await;
                    shared.flush();
                });
            }
            Err(_) => self.flush_locked(state),
        }
    }

    fn flush(&self) {
        let mut state = self.state.lock();
        self.flush_locked(&mut state);
    }

    /// Turn queued fetches into requests: one count request for all nodes and
    /// one content request per parent, split into bands of at most
    /// `max_batch_rows` rows.
    fn flush_locked(&self, state: &mut ClientState) {
        state.flush_scheduled = false;
        let pending = std::mem::take(&mut state.pending);
        let revision = state.applied.unwrap_or(0);

        let paths: Vec<_> = pending
            .counts
            .iter()
            .filter_map(|key| state.cache.path_of(*key))
            .collect();
        if !paths.is_empty() {
            tracing::trace!(collection = %self.name, nodes = paths.len(), "Requesting counts");
            self.send(
                MessageType::ModelCountRequest,
                &CountRequest { revision, paths },
            );
        }

        for (key, cells) in pending.cells {
            let Some(parent) = state.cache.path_of(key) else {
                continue;
            };
            let (Some(first_row), Some(last_row)) = (
                cells.iter().map(|c| c.0).min(),
                cells.iter().map(|c| c.0).max(),
            ) else {
                continue;
            };
            let first_column = cells.iter().map(|c| c.1).min().unwrap_or(0);
            let last_column = cells.iter().map(|c| c.1).max().unwrap_or(0);
            let band = self.max_batch_rows.max(1) as i32;
            let mut top = first_row;
            while top <= last_row {
                let bottom = (top + band - 1).min(last_row);
                self.send(
                    MessageType::ModelContentRequest,
                    &ContentRequest {
                        revision,
                        parent: parent.clone(),
                        range: CellRange::new(top, bottom, first_column, last_column),
                        roles: state.roles.clone(),
                    },
                );
                top = bottom + 1;
            }
        }

        for (orientation, section) in pending.headers {
            self.send(
                MessageType::ModelHeaderRequest,
                &HeaderRequest {
                    orientation,
                    section,
                    roles: state.roles.clone(),
                },
            );
        }
    }

    fn send<T: crate::message::Encode>(&self, message_type: MessageType, fields: &T) {
        if let Err(e) = self
            .endpoint
            .send_to(self.name.clone(), message_type, to_payload(fields))
        {
            tracing::debug!(collection = %self.name, error = %e, "Request not sent");
        }
    }
}

/// Client side mirror of a collection served by a [`CollectionServer`](super::CollectionServer).
///
/// Presents the same shape as the source but never blocks: accessors answer
/// from the cache and return provisional values (`0`, [`Value::Null`]) for
/// anything unknown while a fetch is queued. Requests issued within one
/// scheduling tick are batched. When the data arrives a [`CollectionEvent`]
/// is sent to every subscriber.
///
/// Structural notifications are applied in emission order under the same lock
/// the accessors take, so a read never observes a half-applied change.
///
/// Cheap to clone; clones share the cache.
#[derive(Clone)]
pub struct RemoteCollection {
    shared: Arc<RemoteShared>,
}

impl RemoteCollection {
    /// Register the mirror for the peer's collection `name` and start
    /// watching it.
    pub async fn attach(endpoint: &Endpoint, name: impl Into<Arc<str>>) -> Result<Self> {
        let name = name.into();
        let config = endpoint.config();
        let shared = Arc::new(RemoteShared {
            name: name.clone(),
            endpoint: endpoint.clone(),
            max_batch_rows: config.max_batch_rows,
            state: Mutex::new(ClientState::new(config.default_roles.clone())),
        });
        endpoint
            .register_object(
                name.clone(),
                RemoteHandler {
                    shared: shared.clone(),
                },
            )?
            .address()
            .await?;
        endpoint.set_monitored(name, true)?;
        Ok(Self { shared })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Stop watching and unregister the mirror.
    pub fn detach(&self) -> Result<()> {
        self.shared.endpoint.set_monitored(self.shared.name.clone(), false)?;
        self.shared.endpoint.unregister_object(&self.shared.name)
    }

    pub fn subscribe(&self) -> UnboundedReceiver<CollectionEvent> {
        self.shared.state.lock().subscribers.subscribe()
    }

    /// Structural changes the mirror applied after `generation`.
    pub fn changes_since(&self, generation: u64) -> ChangesSince {
        self.shared.state.lock().subscribers.since(generation)
    }

    /// Revision of the last structural change applied, if any.
    pub fn revision(&self) -> Option<u64> {
        self.shared.state.lock().applied
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ClientState) -> R) -> R {
        let mut state = self.shared.state.lock();
        let result = f(&mut state);
        self.shared.schedule_flush(&mut state);
        result
    }

    /// Number of rows under `parent`. `0` while unknown.
    pub fn row_count(&self, parent: &PathIndex) -> i32 {
        self.with_state(|s| s.counts(parent).map_or(0, |(rows, _)| rows))
    }

    /// Number of columns under `parent`. `0` while unknown.
    pub fn column_count(&self, parent: &PathIndex) -> i32 {
        self.with_state(|s| s.counts(parent).map_or(0, |(_, columns)| columns))
    }

    /// Path of the cell `(row, column)` under `parent`, if it is known to exist.
    pub fn index(&self, row: i32, column: i32, parent: &PathIndex) -> Option<PathIndex> {
        self.with_state(|s| {
            let (rows, columns) = s.counts(parent)?;
            ((0..rows).contains(&row) && (0..columns).contains(&column))
                .then(|| parent.child(row, column))
        })
    }

    pub fn parent(&self, path: &PathIndex) -> Option<PathIndex> {
        path.parent()
    }

    /// Whether the item may have children. Optimistic while unknown.
    pub fn has_children(&self, path: &PathIndex) -> bool {
        if path.is_root() {
            return true;
        }
        if path.column() != 0 {
            return false;
        }
        let state = self.shared.state.lock();
        if state
            .cache
            .cell(path)
            .is_some_and(|c| c.flags.contains(ItemFlags::NEVER_HAS_CHILDREN))
        {
            return false;
        }
        match state.cache.find(path).and_then(|k| state.cache.node(k)?.counts()) {
            Some((rows, _)) => rows > 0,
            None => true,
        }
    }

    /// Value of `role` at `path`. [`Value::Null`] while unknown.
    pub fn data(&self, path: &PathIndex, role: Role) -> Value {
        self.with_state(|s| s.cell(path, role).map(|(value, _)| value))
            .unwrap_or_default()
    }

    pub fn flags(&self, path: &PathIndex) -> ItemFlags {
        self.with_state(|s| s.cell(path, Role::Display).map(|(_, flags)| flags))
            .unwrap_or_default()
    }

    pub fn header_data(&self, orientation: Orientation, section: i32, role: Role) -> Value {
        self.with_state(|s| {
            let slot = s.headers.entry((orientation, section)).or_default();
            let value = slot.values.get(&role).cloned().unwrap_or_default();
            if matches!(slot.state, None | Some(CellState::Outdated)) {
                slot.state = Some(CellState::Loading);
                s.pending.headers.insert((orientation, section));
            }
            value
        })
    }

    /// Ask the source to store `value`. The mirror changes only once the
    /// source confirms the write.
    pub fn set_data(&self, path: &PathIndex, role: Role, value: impl Into<Value>) -> Result<()> {
        let request = SetDataRequest {
            path: path.clone(),
            role,
            value: value.into(),
        };
        self.shared.endpoint.send_to(
            self.shared.name.clone(),
            MessageType::ModelSetDataRequest,
            to_payload(&request),
        )
    }

    pub fn node_state(&self, path: &PathIndex) -> Option<NodeState> {
        let state = self.shared.state.lock();
        state.cache.node(state.cache.find(path)?).map(|n| n.state)
    }

    pub fn cell_state(&self, path: &PathIndex) -> Option<CellState> {
        self.shared.state.lock().cache.cell(path).map(|c| c.state)
    }

    /// Counts of `parent` as cached, without fetching anything.
    pub fn cached_counts(&self, parent: &PathIndex) -> Option<(i32, i32)> {
        let state = self.shared.state.lock();
        state.cache.node(state.cache.find(parent)?)?.counts()
    }

    /// Stable handle to the node at `path`, valid until the node is evicted.
    pub fn node_key(&self, path: &PathIndex) -> Option<NodeKey> {
        let mut state = self.shared.state.lock();
        match state.cache.lookup(path) {
            Lookup::Found(key) => Some(key),
            _ => None,
        }
    }

    /// Current path of the node behind `key`. `None` once evicted.
    pub fn path_of(&self, key: NodeKey) -> Option<PathIndex> {
        self.shared.state.lock().cache.path_of(key)
    }

    /// Send queued requests now instead of at the end of the tick.
    pub fn flush(&self) {
        self.shared.flush();
    }
}

impl std::fmt::Debug for RemoteCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCollection")
            .field("name", &self.shared.name)
            .field("revision", &self.revision())
            .finish()
    }
}

struct RemoteHandler {
    shared: Arc<RemoteShared>,
}

impl MessageHandler for RemoteHandler {
    fn handle_message(&mut self, message: &Message) -> Result<()> {
        let mut state = self.shared.state.lock();
        match message.message_type {
            MessageType::ModelCountReply => state.apply_counts(message.decode()?),
            MessageType::ModelContentReply => state.apply_content(message.decode()?),
            MessageType::ModelHeaderReply => state.apply_header(message.decode()?),
            MessageType::ModelSetDataReply => state.apply_set_data(message.decode()?),
            other => match Notification::decode(message)? {
                Some(notification) => state.apply_notification(notification),
                None => {
                    return Err(Error::decode(format!(
                        "{} is not meant for a collection mirror",
                        other.label()
                    )));
                }
            },
        }
        self.shared.schedule_flush(&mut state);
        Ok(())
    }

    fn peer_changed(&mut self, present: bool) {
        if !present {
            tracing::debug!(collection = %self.shared.name, "Source went away, evicting cache");
            let mut state = self.shared.state.lock();
            state.applied = None;
            state.reset();
        }
    }

    fn unregistered(&mut self) {
        let mut state = self.shared.state.lock();
        state.applied = None;
        state.cache.clear();
        state.headers.clear();
        state.pending = PendingFetches::default();
    }
}
