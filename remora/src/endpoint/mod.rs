//! Transport endpoint: one duplex stream, framed messages, address routing.
//!
//! An [`Endpoint`] is a cheap, cloneable handle. Connecting spawns three tasks:
//!
//! - a reader that deframes inbound messages,
//! - a dispatcher that owns the name/address tables and runs the handlers,
//! - a single writer, so frames never interleave.
//!
//! # Example
//!
//! ```rust,ignore
//! let endpoint = Endpoint::connect_tcp(("127.0.0.1", DEFAULT_PORT), Config::default()).await?;
//! endpoint
//!     .register_object("log", |message: &Message| -> Result<()> {
//!         println!("{:?}", message.message_type);
//!         Ok(())
//!     })?
//!     .address()
//!     .await?;
//! endpoint.disconnected().await;
//! ```

mod command;
mod dispatcher;
mod handler;
#[cfg(feature = "monitoring")]
mod monitor;
mod objects;
#[cfg(feature = "recorder")]
mod recorder;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use bytes::Bytes;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream, ToSocketAddrs},
    sync::{
        mpsc::{self, Sender, UnboundedReceiver, UnboundedSender},
        oneshot, watch,
    },
};
use tokio_util::{codec::Framed, sync::CancellationToken};

pub(crate) use command::Command;
use dispatcher::Dispatcher;
pub use handler::MessageHandler;
#[cfg(feature = "monitoring")]
pub use monitor::{EndpointMonitor, MessageStatistics, TrafficCounters};
#[cfg(feature = "recorder")]
pub use recorder::Recorder;

use crate::{
    Config, Error, Label, Message, MessageCodec, MessageType, ObjectAddress, PROTOCOL_VERSION,
    Result,
};

/// Connection state reported by [`Endpoint::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Label)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// State shared between the endpoint handles and its tasks.
pub(crate) struct Shared {
    connected: AtomicBool,
    state: watch::Sender<ConnectionState>,
    pub(crate) cancel_token: CancellationToken,
}

impl Shared {
    fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Connected);
        Self {
            connected: AtomicBool::new(true),
            state,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Mark the endpoint disconnected. Only the first call has an effect.
    pub(crate) fn disconnect(&self) -> bool {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return false;
        }
        tracing::info!("Endpoint disconnected");
        self.state.send_replace(ConnectionState::Disconnected);
        self.cancel_token.cancel();
        true
    }
}

/// Address of a freshly registered object, available once the dispatcher
/// processed the registration.
#[derive(Debug)]
pub struct PendingAddress(oneshot::Receiver<Result<ObjectAddress>>);

impl PendingAddress {
    pub async fn address(self) -> Result<ObjectAddress> {
        self.0.await?
    }
}

/// Handle to one side of a connection.
///
/// All methods are non-blocking unless `async`. Once the connection is gone
/// every call fails with [`Error::Disconnected`].
///
/// See also: [`MessageHandler`], [`Context`](crate::Context).
#[derive(Clone)]
pub struct Endpoint {
    commands: UnboundedSender<Command>,
    shared: Arc<Shared>,
    config: Arc<Config>,
}

impl Endpoint {
    /// Run the version handshake over `stream` and start serving it.
    ///
    /// Fails with [`Error::ProtocolVersionMismatch`] if the peer speaks a
    /// different protocol version; the stream is dropped in that case.
    pub async fn connect<S>(stream: S, config: Config) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let config = Arc::new(config);
        let mut framed = Framed::new(stream, MessageCodec::new(config.max_payload_size));
        handshake(&mut framed).await?;

        let (sink, stream) = framed.split();
        let (inbound_tx, inbound_rx) = mpsc::channel(config.channel_size);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new());

        let dispatcher = Dispatcher::new(
            command_rx,
            inbound_rx,
            outbound_tx,
            shared.clone(),
            config.max_pending_messages,
        );
        tokio::spawn(read_loop(stream, inbound_tx, shared.clone()));
        tokio::spawn(write_loop(sink, outbound_rx, shared.clone()));
        tokio::spawn(dispatcher.run());
        tracing::info!(version = PROTOCOL_VERSION, "Endpoint connected");

        Ok(Self {
            commands: command_tx,
            shared,
            config,
        })
    }

    /// Connect to a listening peer over TCP.
    pub async fn connect_tcp(addr: impl ToSocketAddrs, config: Config) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Self::connect(stream, config).await
    }

    /// Bind the control channel port from `config` on the loopback interface.
    pub async fn listen(config: &Config) -> Result<TcpListener> {
        Ok(TcpListener::bind(("127.0.0.1", config.port)).await?)
    }

    /// Accept one peer on `listener`.
    pub async fn accept_tcp(listener: &TcpListener, config: Config) -> Result<Self> {
        let (stream, peer) = listener.accept().await?;
        tracing::info!(%peer, "Accepted connection");
        stream.set_nodelay(true)?;
        Self::connect(stream, config).await
    }

    /// Register `handler` under `name` and announce it to the peer.
    ///
    /// The address is assigned by the dispatcher; await
    /// [`PendingAddress::address`] to learn it or to observe a
    /// [`Error::DuplicateRegistration`].
    pub fn register_object<H>(&self, name: impl Into<Arc<str>>, handler: H) -> Result<PendingAddress>
    where
        H: MessageHandler,
    {
        let (reply, rx) = oneshot::channel();
        self.post(Command::Register {
            name: name.into(),
            handler: Box::new(handler),
            reply,
        })?;
        Ok(PendingAddress(rx))
    }

    /// Remove `name` and free its address. In-flight messages for it are
    /// dropped on arrival.
    pub fn unregister_object(&self, name: &str) -> Result<()> {
        self.post(Command::Unregister(name.into()))
    }

    /// Send a message to a peer-local address.
    ///
    /// Fails with [`Error::PayloadTooLarge`] if the message exceeds
    /// [`Config::max_payload_size`]; nothing is sent in that case.
    pub fn send(&self, message: Message) -> Result<()> {
        self.fits(message.wire_size())?;
        self.post(Command::Send(message))
    }

    /// Send to the peer's object `name`, wherever the peer registered it.
    pub fn send_to(
        &self,
        name: impl Into<Arc<str>>,
        message_type: MessageType,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        let payload = payload.into();
        self.fits(payload.len() + 2)?;
        self.post(Command::SendTo {
            name: name.into(),
            message_type,
            payload,
        })
    }

    /// Tell the peer whether this side is watching its object `name`.
    pub fn set_monitored(&self, name: impl Into<Arc<str>>, monitored: bool) -> Result<()> {
        self.post(Command::SetMonitored {
            name: name.into(),
            monitored,
        })
    }

    /// The peer's address for `name`, if it has been announced.
    pub async fn remote_address(&self, name: impl Into<Arc<str>>) -> Result<Option<ObjectAddress>> {
        let (reply, rx) = oneshot::channel();
        self.post(Command::RemoteAddress {
            name: name.into(),
            reply,
        })?;
        Ok(rx.await?)
    }

    /// Wait until the peer announces `name`. Fails on disconnect.
    pub async fn wait_for_object(&self, name: impl Into<Arc<str>>) -> Result<ObjectAddress> {
        let (reply, rx) = oneshot::channel();
        self.post(Command::WaitForObject {
            name: name.into(),
            reply,
        })?;
        rx.await?
    }

    #[cfg(feature = "monitoring")]
    pub fn add_monitor<M: EndpointMonitor + 'static>(&self, monitor: M) -> Result<()> {
        self.post(Command::AddMonitor(Box::new(monitor)))
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Watch the connection state. The value changes exactly once, to
    /// [`ConnectionState::Disconnected`].
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Resolves once the endpoint is disconnected.
    pub async fn disconnected(&self) {
        self.shared.cancel_token.cancelled().await
    }

    /// Close the connection after flushing what was already queued.
    pub fn close(&self) {
        if self.commands.send(Command::Close).is_err() {
            self.shared.disconnect();
        }
    }

    pub fn config(&self) -> &Config {
        self.config.as_ref()
    }

    /// The writer would reject the frame and drop the connection.
    fn fits(&self, wire_size: usize) -> Result<()> {
        if wire_size > self.config.max_payload_size {
            return Err(Error::PayloadTooLarge(wire_size));
        }
        Ok(())
    }

    fn post(&self, command: Command) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Disconnected);
        }
        self.commands.send(command)?;
        Ok(())
    }

    /// An endpoint without a stream; commands are handed to the caller.
    #[cfg(test)]
    pub(crate) fn detached(config: Config) -> (Self, UnboundedReceiver<Command>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let endpoint = Self {
            commands,
            shared: Arc::new(Shared::new()),
            config: Arc::new(config),
        };
        (endpoint, rx)
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("connected", &self.is_connected())
            .finish()
    }
}

async fn handshake<S>(framed: &mut Framed<S, MessageCodec>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    framed
        .send(Message::control(MessageType::ProtocolVersion, &PROTOCOL_VERSION))
        .await?;
    let reply = framed.next().await.ok_or(Error::Disconnected)??;
    if reply.message_type != MessageType::ProtocolVersion {
        return Err(Error::decode(format!(
            "expected protocol version, got {}",
            reply.message_type.label()
        )));
    }
    let remote: u32 = reply.decode()?;
    if remote != PROTOCOL_VERSION {
        tracing::warn!(local = PROTOCOL_VERSION, remote, "Protocol version mismatch");
        return Err(Error::ProtocolVersionMismatch {
            local: PROTOCOL_VERSION,
            remote,
        });
    }
    Ok(())
}

async fn read_loop<S>(
    mut stream: SplitStream<Framed<S, MessageCodec>>,
    inbound: Sender<Message>,
    shared: Arc<Shared>,
) where
    S: AsyncRead + AsyncWrite,
{
    let cancel_token = shared.cancel_token.clone();
    loop {
        let next = tokio::select! {
            _ = cancel_token.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(message)) => {
                if inbound.send(message).await.is_err() {
                    break;
                }
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Failed to read from stream");
                break;
            }
            None => {
                tracing::debug!("Peer closed the stream");
                break;
            }
        }
    }
}

async fn write_loop<S>(
    mut sink: SplitSink<Framed<S, MessageCodec>, Message>,
    mut outbound: UnboundedReceiver<Message>,
    shared: Arc<Shared>,
) where
    S: AsyncRead + AsyncWrite,
{
    while let Some(message) = outbound.recv().await {
        if let Err(e) = sink.send(message).await {
            tracing::warn!(error = %e, "Failed to write to stream");
            shared.disconnect();
            return;
        }
    }
    let _ = sink.close().await;
}
