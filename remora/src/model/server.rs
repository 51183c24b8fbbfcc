use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;

use super::{
    CellRange, ChangesSince, CollectionChange, CollectionEvent, CollectionSource, PathIndex,
    change::Subscribers,
    protocol::{
        CellData, ContentReply, ContentRequest, CountReply, CountRequest, HeaderReply,
        HeaderRequest, NOT_FOUND, NodeCount, Notification, SetDataReply, SetDataRequest,
    },
};
use crate::{Endpoint, Error, Label, Message, MessageHandler, MessageType, Result};

struct ServerState<S> {
    source: S,
    /// Bumped once per structural change while a mirror is attached.
    revision: u64,
    monitored: bool,
    subscribers: Subscribers,
}

impl<S: CollectionSource> ServerState<S> {
    fn counts(&self, request: CountRequest) -> CountReply {
        let counts = request
            .paths
            .into_iter()
            .map(|path| {
                let rows = self.source.row_count(&path);
                let columns = self.source.column_count(&path);
                match (rows, columns) {
                    (Some(rows), Some(columns)) => NodeCount { path, rows, columns },
                    _ => NodeCount {
                        path,
                        rows: NOT_FOUND,
                        columns: NOT_FOUND,
                    },
                }
            })
            .collect();
        CountReply {
            revision: self.revision,
            counts,
        }
    }

    fn content(&self, request: ContentRequest) -> ContentReply {
        let (rows, columns) = match (
            self.source.row_count(&request.parent),
            self.source.column_count(&request.parent),
        ) {
            (Some(rows), Some(columns)) => (rows, columns),
            _ => {
                return ContentReply {
                    revision: self.revision,
                    parent: request.parent,
                    found: false,
                    cells: Vec::new(),
                };
            }
        };
        let range = request.range.clamped(rows, columns);
        let cells = if range.is_empty() {
            Vec::new()
        } else {
            range
                .cells()
                .map(|(row, column)| {
                    let path = request.parent.child(row, column);
                    let values = request
                        .roles
                        .iter()
                        .filter_map(|role| {
                            let value = self.source.data(&path, *role);
                            (!value.is_null()).then_some((*role, value))
                        })
                        .collect();
                    CellData {
                        row,
                        column,
                        flags: self.source.flags(&path),
                        values,
                    }
                })
                .collect()
        };
        ContentReply {
            revision: self.revision,
            parent: request.parent,
            found: true,
            cells,
        }
    }

    fn header(&self, request: HeaderRequest) -> HeaderReply {
        let values = request
            .roles
            .iter()
            .filter_map(|role| {
                let value = self
                    .source
                    .header_data(request.orientation, request.section, *role);
                (!value.is_null()).then_some((*role, value))
            })
            .collect();
        HeaderReply {
            orientation: request.orientation,
            section: request.section,
            values,
        }
    }
}

struct ServerShared<S> {
    name: Arc<str>,
    endpoint: Endpoint,
    state: Mutex<ServerState<S>>,
}

impl<S: CollectionSource> ServerShared<S> {
    /// Publish `change` locally and, when a mirror watches, to the peer.
    /// The caller holds the state lock, so notifications leave in the order
    /// the changes were made.
    fn publish(&self, state: &mut ServerState<S>, change: CollectionChange) {
        if state.monitored {
            if change.is_structural() {
                state.revision += 1;
            }
            let (message_type, payload) = Notification::encode(&change, state.revision);
            if let Err(e) = self.endpoint.send_to(self.name.clone(), message_type, payload) {
                tracing::debug!(collection = %self.name, error = %e, "Notification not sent");
            }
        }
        tracing::trace!(collection = %self.name, change = %change.label(), revision = state.revision, "Collection changed");
        state.subscribers.emit(CollectionEvent::Changed(change));
    }

    fn reply<T: crate::message::Encode>(&self, message_type: MessageType, fields: &T) -> Result<()> {
        self.endpoint.send_to(
            self.name.clone(),
            message_type,
            crate::message::wire::to_payload(fields),
        )
    }
}

/// Serves a [`CollectionSource`] to a peer's [`RemoteCollection`](super::RemoteCollection).
///
/// All changes to the source go through [`mutate`](Self::mutate), which
/// reports them to the mirror. Until a mirror is attached nothing is sent and
/// requests are the only work done.
///
/// # Examples
///
/// ```rust,ignore
/// let server = CollectionServer::serve(&endpoint, "files", MemoryCollection::list(["a", "b"])).await?;
/// server.mutate(|files| files.push_row(&PathIndex::root(), vec!["c".into()]));
/// ```
pub struct CollectionServer<S> {
    shared: Arc<ServerShared<S>>,
}

impl<S> Clone for CollectionServer<S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<S: CollectionSource> CollectionServer<S> {
    /// Register `source` under `name` on `endpoint`.
    pub async fn serve(endpoint: &Endpoint, name: impl Into<Arc<str>>, source: S) -> Result<Self> {
        let name = name.into();
        let shared = Arc::new(ServerShared {
            name: name.clone(),
            endpoint: endpoint.clone(),
            state: Mutex::new(ServerState {
                source,
                revision: 0,
                monitored: false,
                subscribers: Subscribers::default(),
            }),
        });
        endpoint
            .register_object(
                name,
                ServerHandler {
                    shared: shared.clone(),
                },
            )?
            .address()
            .await?;
        Ok(Self { shared })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Read the source under the lock that also orders its changes.
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.shared.state.lock().source)
    }

    /// Change the source and publish what `f` reports as changed.
    ///
    /// `f` returns the changes it made, in order. Returning `None` (or an
    /// empty list) publishes nothing.
    pub fn mutate<R, F>(&self, f: F)
    where
        F: FnOnce(&mut S) -> R,
        R: IntoIterator<Item = CollectionChange>,
    {
        let mut state = self.shared.state.lock();
        let changes = f(&mut state.source);
        for change in changes {
            self.shared.publish(&mut state, change);
        }
    }

    /// Whether a mirror currently watches the collection.
    pub fn is_monitored(&self) -> bool {
        self.shared.state.lock().monitored
    }

    pub fn revision(&self) -> u64 {
        self.shared.state.lock().revision
    }

    /// Local change feed, including changes made on behalf of the peer.
    pub fn subscribe(&self) -> UnboundedReceiver<CollectionEvent> {
        self.shared.state.lock().subscribers.subscribe()
    }

    /// Structural changes published after `generation`.
    pub fn changes_since(&self, generation: u64) -> ChangesSince {
        self.shared.state.lock().subscribers.since(generation)
    }

    pub fn unregister(&self) -> Result<()> {
        self.shared.endpoint.unregister_object(&self.shared.name)
    }
}

impl<S> std::fmt::Debug for CollectionServer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionServer")
            .field("name", &self.shared.name)
            .finish_non_exhaustive()
    }
}

struct ServerHandler<S> {
    shared: Arc<ServerShared<S>>,
}

impl<S: CollectionSource> MessageHandler for ServerHandler<S> {
    fn handle_message(&mut self, message: &Message) -> Result<()> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        match message.message_type {
            MessageType::ModelCountRequest => {
                let reply = state.counts(message.decode()?);
                shared.reply(MessageType::ModelCountReply, &reply)
            }
            MessageType::ModelContentRequest => {
                let reply = state.content(message.decode()?);
                shared.reply(MessageType::ModelContentReply, &reply)
            }
            MessageType::ModelHeaderRequest => {
                let reply = state.header(message.decode()?);
                shared.reply(MessageType::ModelHeaderReply, &reply)
            }
            MessageType::ModelSetDataRequest => {
                let SetDataRequest { path, role, value } = message.decode()?;
                let accepted = state.source.set_data(&path, role, value);
                let reply = SetDataReply {
                    revision: state.revision,
                    path: path.clone(),
                    role,
                    accepted,
                    value: state.source.data(&path, role),
                };
                shared.reply(MessageType::ModelSetDataReply, &reply)?;
                if accepted {
                    if let (Some(parent), Some((row, column))) = (path.parent(), path.last()) {
                        shared.publish(
                            &mut state,
                            CollectionChange::DataChanged {
                                parent,
                                range: CellRange::cell(row, column),
                            },
                        );
                    }
                }
                Ok(())
            }
            other => Err(Error::decode(format!(
                "{} is not meant for a collection source",
                other.label()
            ))),
        }
    }

    fn monitored_changed(&mut self, monitored: bool) {
        let mut state = self.shared.state.lock();
        state.monitored = monitored;
        if monitored {
            // whatever the mirror cached before is void
            state.revision += 1;
            let (message_type, payload) = Notification::encode(&CollectionChange::Reset, state.revision);
            if let Err(e) = self.shared.endpoint.send_to(self.shared.name.clone(), message_type, payload) {
                tracing::debug!(collection = %self.shared.name, error = %e, "Reset not sent");
            }
        }
        tracing::debug!(collection = %self.shared.name, monitored, revision = state.revision, "Monitoring changed");
    }

    fn unregistered(&mut self) {
        self.shared.state.lock().monitored = false;
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::error::TryRecvError;

    use super::*;
    use crate::{
        Config, ObjectAddress,
        endpoint::Command,
        model::{Collection, ItemFlags, MemoryCollection, Role, Value},
    };

    fn server(
        source: MemoryCollection,
    ) -> (
        CollectionServer<MemoryCollection>,
        ServerHandler<MemoryCollection>,
        UnboundedReceiver<Command>,
    ) {
        let (endpoint, commands) = Endpoint::detached(Config::default());
        let shared = Arc::new(ServerShared {
            name: "list".into(),
            endpoint,
            state: Mutex::new(ServerState {
                source,
                revision: 0,
                monitored: false,
                subscribers: Subscribers::default(),
            }),
        });
        let handler = ServerHandler {
            shared: shared.clone(),
        };
        (CollectionServer { shared }, handler, commands)
    }

    fn sent(commands: &mut UnboundedReceiver<Command>) -> Vec<Message> {
        let mut sent = Vec::new();
        loop {
            match commands.try_recv() {
                Ok(Command::SendTo {
                    message_type,
                    payload,
                    ..
                }) => sent.push(Message::new(ObjectAddress::new(1), message_type, payload)),
                Ok(_) => {}
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return sent,
            }
        }
    }

    fn request<T: crate::message::Encode>(
        handler: &mut ServerHandler<MemoryCollection>,
        message_type: MessageType,
        fields: &T,
    ) -> Result<()> {
        handler.handle_message(&Message::with_fields(ObjectAddress::new(1), message_type, fields))
    }

    #[test]
    fn test_idle_until_monitored() {
        let (server, mut handler, mut commands) = server(MemoryCollection::list(["A"]));
        server.mutate(|list| list.push_row(&PathIndex::root(), vec!["B".into()]));
        assert!(sent(&mut commands).is_empty());
        assert_eq!(server.revision(), 0);

        handler.monitored_changed(true);
        let sent = sent(&mut commands);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message_type, MessageType::ModelReset);
        assert_eq!(sent[0].decode::<u64>().unwrap(), 1);
        assert!(server.is_monitored());
    }

    #[test]
    fn test_structural_changes_bump_revision() {
        let (server, mut handler, mut commands) = server(MemoryCollection::list(["A", "B"]));
        handler.monitored_changed(true);
        sent(&mut commands);

        server.mutate(|list| list.insert_row(&PathIndex::root(), 0, vec!["X".into()]));
        server.mutate(|list| list.set(&PathIndex::cell(0, 0), Role::Display, "Y"));
        assert_eq!(server.revision(), 2);

        let notifications: Vec<_> = sent(&mut commands)
            .iter()
            .map(|m| Notification::decode(m).unwrap().unwrap())
            .collect();
        assert_eq!(notifications[0].revision, Some(2));
        assert_eq!(notifications[1].revision, None);
    }

    #[test]
    fn test_counts_and_missing_paths() -> Result<()> {
        let (_server, mut handler, mut commands) = server(MemoryCollection::list(["A", "B"]));
        request(
            &mut handler,
            MessageType::ModelCountRequest,
            &CountRequest {
                revision: 0,
                paths: vec![PathIndex::root(), PathIndex::cell(7, 0)],
            },
        )?;
        let reply: CountReply = sent(&mut commands)[0].decode()?;
        assert_eq!((reply.counts[0].rows, reply.counts[0].columns), (2, 1));
        assert_eq!((reply.counts[1].rows, reply.counts[1].columns), (NOT_FOUND, NOT_FOUND));
        Ok(())
    }

    #[test]
    fn test_content_is_clamped_and_sparse() -> Result<()> {
        let (_server, mut handler, mut commands) = server(MemoryCollection::list(["A", "B"]));
        request(
            &mut handler,
            MessageType::ModelContentRequest,
            &ContentRequest {
                revision: 0,
                parent: PathIndex::root(),
                range: CellRange::new(1, 10, 0, 3),
                roles: vec![Role::Display, Role::ToolTip],
            },
        )?;
        let reply: ContentReply = sent(&mut commands)[0].decode()?;
        assert!(reply.found);
        assert_eq!(reply.cells.len(), 1);
        assert_eq!(reply.cells[0].row, 1);
        assert_eq!(reply.cells[0].values, vec![(Role::Display, Value::from("B"))]);
        assert!(reply.cells[0].flags.contains(ItemFlags::SELECTABLE));

        request(
            &mut handler,
            MessageType::ModelContentRequest,
            &ContentRequest {
                revision: 0,
                parent: PathIndex::new([(5, 0)]),
                range: CellRange::cell(0, 0),
                roles: vec![Role::Display],
            },
        )?;
        let reply: ContentReply = sent(&mut commands)[0].decode()?;
        assert!(!reply.found);
        Ok(())
    }

    #[test]
    fn test_accepted_write_is_published() -> Result<()> {
        let (server, mut handler, mut commands) = server(MemoryCollection::list(["A"]));
        let mut events = server.subscribe();
        handler.monitored_changed(true);
        sent(&mut commands);

        request(
            &mut handler,
            MessageType::ModelSetDataRequest,
            &SetDataRequest {
                path: PathIndex::cell(0, 0),
                role: Role::Display,
                value: Value::from("Z"),
            },
        )?;
        let sent = sent(&mut commands);
        let reply: SetDataReply = sent[0].decode()?;
        assert!(reply.accepted);
        assert_eq!(reply.value, "Z");
        assert_eq!(sent[1].message_type, MessageType::ModelDataChanged);
        assert!(matches!(
            events.try_recv(),
            Ok(CollectionEvent::Changed(CollectionChange::DataChanged { .. }))
        ));
        assert_eq!(server.read(|list| list.data(&PathIndex::cell(0, 0), Role::Display)), "Z");
        Ok(())
    }

    #[test]
    fn test_unexpected_message_is_rejected() {
        let (_server, mut handler, _commands) = server(MemoryCollection::list(["A"]));
        let message = Message::new(ObjectAddress::new(1), MessageType::ModelCountReply, bytes::Bytes::new());
        assert!(handler.handle_message(&message).is_err());
    }
}
