use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::{
    CollectionServer, Config, Endpoint, EntryKind, Error, ObjectBroker, RemoteCollection, Result,
    SelectionMirror,
    model::CollectionSource,
    selection::SelectionBinding,
    view::{FrameGrabber, InputEvent, ViewClient, ViewEvent, ViewFrameServer},
};

/// Everything one side of a connection shares: the endpoint, the broker and
/// the config.
///
/// Components are created through the context so they end up in the broker
/// under the name they were registered with on the endpoint.
///
/// # Examples
///
/// ```rust,ignore
/// let context = Context::new(Endpoint::connect_tcp(addr, Config::default()).await?);
/// let tree = context.remote_collection("objects").await?;
/// let selection = context.selection_mirror("objects.selection", tree.clone()).await?;
/// ```
#[derive(Debug, Clone)]
pub struct Context {
    endpoint: Endpoint,
    broker: Arc<ObjectBroker>,
}

impl Context {
    pub fn new(endpoint: Endpoint) -> Self {
        Self::with_broker(endpoint, Arc::new(ObjectBroker::new()))
    }

    /// Share an existing broker, e.g. one with factories installed.
    pub fn with_broker(endpoint: Endpoint, broker: Arc<ObjectBroker>) -> Self {
        Self { endpoint, broker }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn broker(&self) -> &ObjectBroker {
        &self.broker
    }

    pub fn config(&self) -> &Config {
        self.endpoint.config()
    }

    /// Serve `source` to the peer under `name`.
    pub async fn serve_collection<S: CollectionSource>(
        &self,
        name: impl Into<Arc<str>>,
        source: S,
    ) -> Result<CollectionServer<S>> {
        let name = name.into();
        if self.broker.contains(EntryKind::Collection, &name) {
            return Err(Error::DuplicateRegistration(name));
        }
        let server = CollectionServer::serve(&self.endpoint, name.clone(), source).await?;
        self.broker
            .register(EntryKind::Collection, name, Arc::new(server.clone()))?;
        Ok(server)
    }

    /// Mirror of the peer's collection `name`. Repeated calls share one mirror.
    pub async fn remote_collection(&self, name: impl Into<Arc<str>>) -> Result<RemoteCollection> {
        let name = name.into();
        if let Some(mirror) = self.broker.collection::<RemoteCollection>(&name) {
            return Ok(RemoteCollection::clone(&mirror));
        }
        let mirror = RemoteCollection::attach(&self.endpoint, name.clone()).await?;
        self.broker
            .register(EntryKind::Collection, name, Arc::new(mirror.clone()))?;
        Ok(mirror)
    }

    /// Selection shared with the peer under `name`, bound to `binding`.
    pub async fn selection_mirror<B: SelectionBinding>(
        &self,
        name: impl Into<Arc<str>>,
        binding: B,
    ) -> Result<SelectionMirror> {
        let name = name.into();
        if self.broker.contains(EntryKind::Selection, &name) {
            return Err(Error::DuplicateRegistration(name));
        }
        let mirror = SelectionMirror::attach(&self.endpoint, name.clone(), binding).await?;
        self.broker
            .register(EntryKind::Selection, name, Arc::new(mirror.clone()))?;
        Ok(mirror)
    }

    pub async fn serve_view<G: FrameGrabber>(
        &self,
        name: impl Into<Arc<str>>,
        grabber: G,
    ) -> Result<(ViewFrameServer, UnboundedReceiver<InputEvent>)> {
        let name = name.into();
        let (server, input) = ViewFrameServer::serve(&self.endpoint, name.clone(), grabber).await?;
        self.broker
            .register(EntryKind::Object, name, Arc::new(server.clone()))?;
        Ok((server, input))
    }

    /// Withdraw the collection `name`, served or mirrored, from the endpoint
    /// and the broker. The name can be served again afterwards.
    pub fn unregister_collection(&self, name: &str) -> Result<()> {
        let entry = self.broker.remove(EntryKind::Collection, name);
        match entry.and_then(|entry| entry.downcast::<RemoteCollection>().ok()) {
            Some(mirror) => mirror.detach(),
            None => self.endpoint.unregister_object(name),
        }
    }

    pub fn unregister_selection(&self, name: &str) -> Result<()> {
        self.broker.remove(EntryKind::Selection, name);
        self.endpoint.unregister_object(name)
    }

    pub fn unregister_view(&self, name: &str) -> Result<()> {
        let entry = self.broker.remove(EntryKind::Object, name);
        match entry.and_then(|entry| entry.downcast::<ViewFrameServer>().ok()) {
            Some(server) => server.unregister(),
            None => self.endpoint.unregister_object(name),
        }
    }

    pub async fn view_client(
        &self,
        name: impl Into<Arc<str>>,
    ) -> Result<(ViewClient, UnboundedReceiver<ViewEvent>)> {
        ViewClient::attach(&self.endpoint, name).await
    }
}
