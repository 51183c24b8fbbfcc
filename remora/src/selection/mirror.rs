use std::{
    cell::Cell,
    sync::{Arc, Weak},
};

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::state::{Selection, SelectionFlags, SelectionRange, SelectionState};
use crate::{
    CollectionServer, Endpoint, Error, Label, Message, MessageHandler, MessageType,
    RemoteCollection, Result,
    message::wire::to_payload,
    model::{ChangesSince, CollectionEvent, CollectionSource, PathIndex},
};

/// Whether a path can be used by the selection right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Label)]
pub enum PathState {
    Present,
    /// Not known yet. Resolving it has been started.
    Pending,
    Invalid,
}

/// The collection a [`SelectionMirror`] refers to.
pub trait SelectionBinding: Send + Sync + 'static {
    /// Check `path`, starting to load whatever is needed to decide.
    fn resolve(&self, path: &PathIndex) -> PathState;

    /// Row and column count of `parent`, if known.
    fn extent(&self, parent: &PathIndex) -> Option<(i32, i32)>;

    /// Structural changes after `generation`. Asking for a generation not
    /// reached yet returns no changes and the current generation.
    fn changes_since(&self, generation: u64) -> ChangesSince;

    /// Wakes the mirror whenever the collection changed.
    fn subscribe(&self) -> UnboundedReceiver<CollectionEvent>;
}

impl SelectionBinding for RemoteCollection {
    fn resolve(&self, path: &PathIndex) -> PathState {
        if path.is_root() || !path.is_well_formed() {
            return PathState::Invalid;
        }
        let mut parent = PathIndex::root();
        for &(row, column) in path.steps() {
            match self.cached_counts(&parent) {
                Some((rows, columns)) if row < rows && column < columns => {}
                Some(_) => return PathState::Invalid,
                None => {
                    // queues the count fetch
                    self.row_count(&parent);
                    return PathState::Pending;
                }
            }
            parent = parent.child(row, column);
        }
        PathState::Present
    }

    fn extent(&self, parent: &PathIndex) -> Option<(i32, i32)> {
        self.cached_counts(parent)
    }

    fn changes_since(&self, generation: u64) -> ChangesSince {
        RemoteCollection::changes_since(self, generation)
    }

    fn subscribe(&self) -> UnboundedReceiver<CollectionEvent> {
        RemoteCollection::subscribe(self)
    }
}

impl<S: CollectionSource> SelectionBinding for CollectionServer<S> {
    fn resolve(&self, path: &PathIndex) -> PathState {
        if path.is_root() || !path.is_well_formed() {
            return PathState::Invalid;
        }
        self.read(|source| {
            let mut parent = PathIndex::root();
            for &(row, column) in path.steps() {
                let rows = source.row_count(&parent).unwrap_or(0);
                let columns = source.column_count(&parent).unwrap_or(0);
                if row >= rows || column >= columns {
                    return PathState::Invalid;
                }
                parent = parent.child(row, column);
            }
            PathState::Present
        })
    }

    fn extent(&self, parent: &PathIndex) -> Option<(i32, i32)> {
        self.read(|source| Some((source.row_count(parent)?, source.column_count(parent)?)))
    }

    fn changes_since(&self, generation: u64) -> ChangesSince {
        CollectionServer::changes_since(self, generation)
    }

    fn subscribe(&self) -> UnboundedReceiver<CollectionEvent> {
        CollectionServer::subscribe(self)
    }
}

/// Reported to [`SelectionMirror::subscribe`] receivers.
#[derive(Debug, Clone, PartialEq, Eq, Label)]
pub enum SelectionEvent {
    /// The selected cells changed; carries the new canonical ranges.
    SelectionChanged(Vec<SelectionRange>),
    CurrentChanged(Option<PathIndex>),
}

struct MirrorState {
    selection: Selection,
    /// Structural generation of the bound collection the selection refers to.
    generation: u64,
    /// Latest peer state that still references paths being loaded.
    pending: Option<SelectionState>,
    subscribers: Vec<UnboundedSender<SelectionEvent>>,
}

impl MirrorState {
    fn new(generation: u64) -> Self {
        Self {
            selection: Selection::default(),
            generation,
            pending: None,
            subscribers: Vec::new(),
        }
    }

    fn emit(&mut self, event: SelectionEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Report what differs from `before`.
    fn changed(&mut self, before: &Selection) {
        let ranges = self.selection.ranges();
        if ranges != before.ranges() {
            self.emit(SelectionEvent::SelectionChanged(ranges));
        }
        if self.selection.current() != before.current() {
            self.emit(SelectionEvent::CurrentChanged(self.selection.current().cloned()));
        }
    }
}

struct MirrorShared {
    name: Arc<str>,
    endpoint: Endpoint,
    binding: Arc<dyn SelectionBinding>,
    state: Mutex<MirrorState>,
}

impl MirrorShared {
    /// Lock the state, first replaying the structural changes the selection
    /// has not followed yet.
    fn lock(&self) -> MutexGuard<'_, MirrorState> {
        let mut state = self.state.lock();
        let ChangesSince {
            generation,
            changes,
        } = self.binding.changes_since(state.generation);
        if generation == state.generation {
            return state;
        }
        let before = state.selection.clone();
        match changes {
            Some(changes) => {
                for change in &changes {
                    state.selection.remap(change);
                    if let Some(pending) = state.pending.as_mut() {
                        pending.remap(change);
                    }
                }
            }
            None => {
                tracing::debug!(selection = %self.name, "Structural changes lost, dropping selection");
                state.selection = Selection::default();
                state.pending = None;
            }
        }
        state.generation = generation;
        state.changed(&before);
        state
    }

    fn transmit(&self, state: &SelectionState) {
        if let Err(e) = self.endpoint.send_to(
            self.name.clone(),
            MessageType::SelectionState,
            to_payload(state),
        ) {
            tracing::debug!(selection = %self.name, error = %e, "Selection not sent");
        }
    }

    /// Adopt a peer state. Paths still loading keep the state pending; it is
    /// applied again once the bound collection reports progress.
    fn adopt(&self, state: &mut MirrorState, remote: SelectionState) {
        let pending = Cell::new(false);
        let binding = &self.binding;
        let before = state.selection.clone();
        state.selection.replace(
            &remote,
            |parent| binding.extent(parent),
            |range| {
                if binding.resolve(&range.top_left) == PathState::Pending {
                    pending.set(true);
                }
            },
            |path| match binding.resolve(path) {
                PathState::Present => true,
                PathState::Pending => {
                    pending.set(true);
                    false
                }
                PathState::Invalid => false,
            },
        );
        let pending = pending.get();
        tracing::trace!(selection = %self.name, pending, "Adopted peer selection");
        state.pending = pending.then_some(remote);
        state.changed(&before);
    }

    /// The bound collection changed: catch up and retry a pending peer state.
    fn refresh(&self) {
        let mut state = self.lock();
        if let Some(remote) = state.pending.take() {
            self.adopt(&mut state, remote);
        }
    }
}

/// One side of a selection shared between the two peers.
///
/// Local operations apply immediately and send the resulting canonical state,
/// never the operation, so a lost message is repaired by the next one. States
/// received from the peer replace the local one.
///
/// The selection follows structural changes of the bound collection and never
/// references cells that no longer exist. Changes are replayed before every
/// operation, so paths passed in always refer to the collection as it is now.
#[derive(Clone)]
pub struct SelectionMirror {
    shared: Arc<MirrorShared>,
}

impl SelectionMirror {
    /// Register the mirror under `name` and ask the peer for its selection.
    pub async fn attach<B: SelectionBinding>(
        endpoint: &Endpoint,
        name: impl Into<Arc<str>>,
        binding: B,
    ) -> Result<Self> {
        let name = name.into();
        let binding: Arc<dyn SelectionBinding> = Arc::new(binding);
        let events = binding.subscribe();
        let generation = binding.changes_since(u64::MAX).generation;
        let shared = Arc::new(MirrorShared {
            name: name.clone(),
            endpoint: endpoint.clone(),
            binding,
            state: Mutex::new(MirrorState::new(generation)),
        });
        endpoint
            .register_object(
                name.clone(),
                SelectionHandler {
                    shared: shared.clone(),
                },
            )?
            .address()
            .await?;
        tokio::spawn(follow_collection(Arc::downgrade(&shared), events));
        endpoint.send_to(name, MessageType::SelectionStateRequest, bytes::Bytes::new())?;
        Ok(Self { shared })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Combine `ranges` with the selection according to `flags`. Ranges are
    /// cut to the collection; cells that do not exist are never selected.
    pub fn select(&self, ranges: &[SelectionRange], flags: SelectionFlags) {
        self.update(|selection, binding| {
            selection.select(
                ranges,
                flags,
                |parent| binding.extent(parent),
                |path| binding.resolve(path) == PathState::Present,
            )
        });
    }

    /// Make `path` current and combine it with the selection according to
    /// `flags`. Ignored if `path` does not exist.
    pub fn set_current(&self, path: PathIndex, flags: SelectionFlags) {
        self.update(|selection, binding| {
            if binding.resolve(&path) != PathState::Present {
                tracing::debug!(%path, "Not making a missing cell current");
                return false;
            }
            let moved = selection.set_current(Some(path.clone()));
            let selected = selection.select(
                &[SelectionRange::cell(path)],
                flags,
                |parent| binding.extent(parent),
                |path| binding.resolve(path) == PathState::Present,
            );
            moved || selected
        });
    }

    pub fn clear(&self) {
        self.update(|selection, _| {
            let cleared = selection.select(&[], SelectionFlags::CLEAR, |_| None, |_| false);
            selection.set_current(None) || cleared
        });
    }

    fn update(&self, f: impl FnOnce(&mut Selection, &dyn SelectionBinding) -> bool) {
        let mut state = self.shared.lock();
        // local intent wins over a peer state still waiting for data
        state.pending = None;
        let before = state.selection.clone();
        if f(&mut state.selection, self.shared.binding.as_ref()) {
            self.shared.transmit(&state.selection.state());
            state.changed(&before);
        }
    }

    /// Canonical ranges of the selection.
    pub fn selection(&self) -> Vec<SelectionRange> {
        self.shared.lock().selection.ranges()
    }

    pub fn current(&self) -> Option<PathIndex> {
        self.shared.lock().selection.current().cloned()
    }

    pub fn is_selected(&self, path: &PathIndex) -> bool {
        self.shared.lock().selection.is_selected(path)
    }

    /// Whether a peer state is waiting for paths to load.
    pub fn has_pending(&self) -> bool {
        self.shared.lock().pending.is_some()
    }

    pub fn subscribe(&self) -> UnboundedReceiver<SelectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.state.lock().subscribers.push(tx);
        rx
    }

    pub fn detach(&self) -> Result<()> {
        self.shared.endpoint.unregister_object(&self.shared.name)
    }
}

impl std::fmt::Debug for SelectionMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectionMirror")
            .field("name", &self.shared.name)
            .finish_non_exhaustive()
    }
}

/// Keep the selection in line with the bound collection until the mirror is dropped.
async fn follow_collection(shared: Weak<MirrorShared>, mut events: UnboundedReceiver<CollectionEvent>) {
    while events.recv().await.is_some() {
        // one catch-up covers everything queued so far
        while events.try_recv().is_ok() {}
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.refresh();
    }
}

struct SelectionHandler {
    shared: Arc<MirrorShared>,
}

impl MessageHandler for SelectionHandler {
    fn handle_message(&mut self, message: &Message) -> Result<()> {
        match message.message_type {
            MessageType::SelectionStateRequest => {
                let state = self.shared.lock();
                // an empty answer would wipe a selection the peer made before attaching
                if !state.selection.is_empty() {
                    self.shared.transmit(&state.selection.state());
                }
                Ok(())
            }
            MessageType::SelectionState => {
                let remote: SelectionState = message.decode()?;
                let mut state = self.shared.lock();
                self.shared.adopt(&mut state, remote);
                Ok(())
            }
            other => Err(Error::decode(format!(
                "{} is not meant for a selection",
                other.label()
            ))),
        }
    }

    fn peer_changed(&mut self, present: bool) {
        if !present {
            self.shared.state.lock().pending = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::error::TryRecvError;

    use super::*;
    use crate::{
        Config, ObjectAddress,
        endpoint::Command,
        model::{CollectionChange, Subscribers},
    };

    /// A flat list of `rows` rows. Zero rows means "not loaded yet".
    struct Fixed {
        rows: Mutex<i32>,
        events: Mutex<Subscribers>,
    }

    impl Fixed {
        fn new(rows: i32) -> Arc<Self> {
            Arc::new(Self {
                rows: Mutex::new(rows),
                events: Mutex::new(Subscribers::default()),
            })
        }

        fn insert_first_row(&self) {
            *self.rows.lock() += 1;
            self.events
                .lock()
                .emit(CollectionEvent::Changed(CollectionChange::RowsInserted {
                    parent: PathIndex::root(),
                    first: 0,
                    last: 0,
                }));
        }

        fn load(&self, rows: i32) {
            *self.rows.lock() = rows;
            self.events.lock().emit(CollectionEvent::Populated {
                parent: PathIndex::root(),
                rows,
                columns: 1,
            });
        }
    }

    impl SelectionBinding for Fixed {
        fn resolve(&self, path: &PathIndex) -> PathState {
            let rows = *self.rows.lock();
            match path.last() {
                Some((row, 0)) if path.depth() == 1 && row < rows => PathState::Present,
                Some((_, 0)) if path.depth() == 1 && rows == 0 => PathState::Pending,
                _ => PathState::Invalid,
            }
        }

        fn extent(&self, parent: &PathIndex) -> Option<(i32, i32)> {
            let rows = *self.rows.lock();
            (parent.is_root() && rows > 0).then_some((rows, 1))
        }

        fn changes_since(&self, generation: u64) -> ChangesSince {
            self.events.lock().since(generation)
        }

        fn subscribe(&self) -> UnboundedReceiver<CollectionEvent> {
            self.events.lock().subscribe()
        }
    }

    fn mirror(
        rows: i32,
    ) -> (
        SelectionMirror,
        SelectionHandler,
        Arc<Fixed>,
        UnboundedReceiver<Command>,
    ) {
        let (endpoint, commands) = Endpoint::detached(Config::default());
        let fixed = Fixed::new(rows);
        let shared = Arc::new(MirrorShared {
            name: "list.selection".into(),
            endpoint,
            binding: fixed.clone(),
            state: Mutex::new(MirrorState::new(0)),
        });
        let handler = SelectionHandler {
            shared: shared.clone(),
        };
        (SelectionMirror { shared }, handler, fixed, commands)
    }

    fn sent_states(commands: &mut UnboundedReceiver<Command>) -> Vec<SelectionState> {
        let mut states = Vec::new();
        loop {
            match commands.try_recv() {
                Ok(Command::SendTo {
                    message_type: MessageType::SelectionState,
                    payload,
                    ..
                }) => {
                    let message = Message::new(ObjectAddress::new(1), MessageType::SelectionState, payload);
                    states.push(message.decode().unwrap());
                }
                Ok(_) => {}
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return states,
            }
        }
    }

    fn row(row: i32) -> SelectionRange {
        SelectionRange::cell(PathIndex::cell(row, 0))
    }

    fn peer_state(handler: &mut SelectionHandler, current: Option<i32>, rows: &[i32]) {
        let remote = SelectionState {
            current: current.map(|r| PathIndex::cell(r, 0)),
            ranges: rows.iter().map(|&r| row(r)).collect(),
        };
        let message = Message::with_fields(ObjectAddress::new(1), MessageType::SelectionState, &remote);
        handler.handle_message(&message).unwrap();
    }

    #[test]
    fn test_local_select_sends_canonical_state() {
        let (mirror, _handler, _fixed, mut commands) = mirror(5);
        let mut events = mirror.subscribe();
        mirror.select(&[row(1), row(2)], SelectionFlags::SELECT);

        let states = sent_states(&mut commands);
        assert_eq!(states.len(), 1);
        assert_eq!(
            states[0].ranges,
            vec![SelectionRange::new(PathIndex::cell(1, 0), PathIndex::cell(2, 0))]
        );
        assert!(matches!(events.try_recv(), Ok(SelectionEvent::SelectionChanged(_))));

        // nothing changes, nothing is sent
        mirror.select(&[row(1)], SelectionFlags::SELECT);
        assert!(sent_states(&mut commands).is_empty());
    }

    #[test]
    fn test_local_select_outside_the_collection_is_ignored() {
        let (mirror, _handler, _fixed, mut commands) = mirror(5);
        mirror.select(
            &[SelectionRange::cell(PathIndex::cell(100, 7))],
            SelectionFlags::SELECT,
        );
        mirror.set_current(PathIndex::cell(9, 0), SelectionFlags::SELECT);
        assert!(mirror.selection().is_empty());
        assert_eq!(mirror.current(), None);
        assert!(sent_states(&mut commands).is_empty());

        mirror.select(
            &[SelectionRange::new(PathIndex::cell(3, 0), PathIndex::cell(3_000_000, 0))],
            SelectionFlags::SELECT,
        );
        assert_eq!(
            mirror.selection(),
            vec![SelectionRange::new(PathIndex::cell(3, 0), PathIndex::cell(4, 0))]
        );
        assert_eq!(sent_states(&mut commands).len(), 1);
    }

    #[test]
    fn test_selection_follows_changes_without_waiting_for_events() {
        let (mirror, _handler, fixed, _commands) = mirror(8);
        mirror.select(&[row(1)], SelectionFlags::SELECT);
        fixed.insert_first_row();
        assert_eq!(mirror.selection(), vec![row(2)]);
    }

    #[test]
    fn test_select_after_insert_is_not_shifted_again() {
        let (mirror, _handler, fixed, mut commands) = mirror(8);
        fixed.insert_first_row();
        mirror.select(&[row(5)], SelectionFlags::CLEAR_AND_SELECT);
        // the queued insert wakes the mirror later
        mirror.shared.refresh();
        assert_eq!(mirror.selection(), vec![row(5)]);
        assert_eq!(sent_states(&mut commands).last().map(|s| s.ranges.clone()), Some(vec![row(5)]));
    }

    #[test]
    fn test_peer_state_after_insert_is_taken_as_is() {
        let (mirror, mut handler, fixed, _commands) = mirror(8);
        mirror.select(&[row(1)], SelectionFlags::SELECT);
        fixed.insert_first_row();
        peer_state(&mut handler, Some(5), &[5]);
        mirror.shared.refresh();
        assert_eq!(mirror.selection(), vec![row(5)]);
        assert_eq!(mirror.current(), Some(PathIndex::cell(5, 0)));
    }

    #[test]
    fn test_peer_state_replaces_local_and_drops_invalid() {
        let (mirror, mut handler, _fixed, mut commands) = mirror(3);
        mirror.select(&[row(0)], SelectionFlags::SELECT);
        sent_states(&mut commands);

        peer_state(&mut handler, Some(1), &[1, 7]);
        assert_eq!(mirror.selection(), vec![row(1)]);
        assert_eq!(mirror.current(), Some(PathIndex::cell(1, 0)));
        assert!(!mirror.has_pending());
        // adopting never echoes
        assert!(sent_states(&mut commands).is_empty());
    }

    #[test]
    fn test_unresolved_peer_state_is_kept_pending() {
        let (mirror, mut handler, _fixed, _commands) = mirror(0);
        peer_state(&mut handler, None, &[2]);
        assert!(mirror.selection().is_empty());
        assert!(mirror.has_pending());

        mirror.clear();
        assert!(!mirror.has_pending());
    }

    #[test]
    fn test_pending_peer_state_follows_changes_until_loaded() {
        let (mirror, mut handler, fixed, _commands) = mirror(0);
        peer_state(&mut handler, Some(2), &[2]);
        assert!(mirror.has_pending());

        fixed.load(4);
        fixed.insert_first_row();
        mirror.shared.refresh();
        assert!(!mirror.has_pending());
        assert_eq!(mirror.selection(), vec![row(3)]);
        assert_eq!(mirror.current(), Some(PathIndex::cell(3, 0)));
    }

    #[test]
    fn test_lost_changes_drop_the_selection() {
        let (mirror, _handler, fixed, _commands) = mirror(8);
        mirror.select(&[row(1)], SelectionFlags::SELECT);
        for _ in 0..300 {
            fixed.insert_first_row();
        }
        assert!(mirror.selection().is_empty());
    }

    #[test]
    fn test_request_answered_only_with_a_selection() {
        let (mirror, mut handler, _fixed, mut commands) = mirror(3);
        let request = Message::new(ObjectAddress::new(1), MessageType::SelectionStateRequest, bytes::Bytes::new());
        handler.handle_message(&request).unwrap();
        assert!(sent_states(&mut commands).is_empty());

        mirror.set_current(PathIndex::cell(2, 0), SelectionFlags::CLEAR_AND_SELECT);
        sent_states(&mut commands);
        handler.handle_message(&request).unwrap();
        let states = sent_states(&mut commands);
        assert_eq!(states[0].current, Some(PathIndex::cell(2, 0)));
        assert_eq!(states[0].ranges, vec![row(2)]);
    }

    #[tokio::test]
    async fn test_follow_task_retries_pending_state() {
        let (mirror, mut handler, fixed, _commands) = mirror(0);
        tokio::spawn(follow_collection(Arc::downgrade(&mirror.shared), fixed.subscribe()));
        peer_state(&mut handler, None, &[1]);
        fixed.load(3);
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(mirror.selection(), vec![row(1)]);
    }
}
