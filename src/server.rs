use std::{net::SocketAddrV4, sync::Arc};

use tracing::{debug, info, instrument, warn};

use crate::{
    config::ServerConfig,
    dialer::Dialer,
    event::{Event, EventBus, EventKind},
    peer::{Peer, PeerLink},
    protocol::{
        decode_command_request, decode_greeting, encode_auth_ack, encode_reply,
        reply_bound_addr, DecodeError, Reply,
    },
    sessions::Sessions,
    transport::{ConnectionId, Transport},
    BoxError,
};

/// The SOCKS5 protocol engine.
///
/// The transport feeds it every inbound buffer through [`Server::dispatch`].
/// What a buffer means depends only on the peer's state:
///
/// | authenticated | connected | inbound bytes are |
/// |---|---|---|
/// | no | no | a greeting |
/// | yes | no | a command request |
/// | yes | yes | relayed to the destination |
///
/// Calls for one connection id must not overlap; different ids may be
/// dispatched concurrently.
pub struct Server<T, D: Dialer> {
    config: ServerConfig,
    bound: SocketAddrV4,
    transport: Arc<T>,
    dialer: D,
    sessions: Sessions<T, D::Stream>,
    events: Arc<EventBus>,
}

impl<T, D> Server<T, D>
where
    T: Transport,
    D: Dialer,
{
    pub fn new(config: ServerConfig, transport: Arc<T>, dialer: D) -> Self {
        let events = Arc::new(EventBus::new());
        let sessions = Sessions::new(
            Arc::clone(&transport),
            Arc::clone(&events),
            config.relay_buffer_size,
        );
        Self {
            bound: reply_bound_addr(config.listen_addr),
            config,
            transport,
            dialer,
            sessions,
            events,
        }
    }

    /// Subscribes `handler` to every event of `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> &Self
    where
        F: Fn(&Event) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.events.on(kind, handler);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn dialer(&self) -> &D {
        &self.dialer
    }

    pub fn sessions(&self) -> &Sessions<T, D::Stream> {
        &self.sessions
    }

    /// Address reported in every command reply.
    pub fn bound_addr(&self) -> SocketAddrV4 {
        self.bound
    }

    pub fn start(&self) -> crate::Result<()> {
        info!(listen = %self.config.listen_addr, "SOCKS5 server started");
        self.events.fire(Event::Start)
    }

    /// Closes every session, then announces the shutdown.
    pub async fn shutdown(&self) -> crate::Result<()> {
        self.sessions.forget_all().await;
        info!("SOCKS5 server shut down");
        self.events.fire(Event::Shutdown)
    }

    pub fn handle_connect(&self, id: ConnectionId) -> crate::Result<()> {
        debug!(id, "connection accepted");
        self.events.fire(Event::Connect { id })
    }

    /// Handles one inbound buffer from connection `id`.
    ///
    /// Errors are never fatal to the process. The engine does not close the
    /// connection on error; that is left to the transport's policy.
    #[instrument(skip(self, data), fields(bytes = data.len()))]
    pub async fn dispatch(&self, id: ConnectionId, data: &[u8]) -> crate::Result<()> {
        let peer = self.sessions.get(id);
        let mut peer = peer.lock().await;

        if peer.is_connected() {
            self.events.fire(Event::ReceivedProxyData {
                id,
                bytes: data.len(),
            })?;
            return peer.relay(data).await;
        }

        if peer.has_destination() {
            // Destination already gone, the transport is closing this connection
            debug!("dropping bytes for a closed tunnel");
            return Ok(());
        }

        if !peer.has_authenticated() {
            return self.authenticate(&mut peer, data).await;
        }

        self.handle_command_request(&mut peer, data).await
    }

    /// Forgets the peer, closing its destination, and announces the close.
    #[instrument(skip(self))]
    pub async fn handle_close(&self, id: ConnectionId) -> crate::Result<()> {
        if self.sessions.forget(id).await {
            debug!("session closed");
        }
        self.events.fire(Event::Close { id })
    }

    async fn authenticate(&self, peer: &mut Peer<T, D::Stream>, data: &[u8]) -> crate::Result<()> {
        let greeting = decode_greeting(data)?;
        debug!(methods = ?greeting.methods, "greeting received");

        // Every client is accepted with "no authentication required"
        peer.mark_authenticated();
        self.events.fire(Event::Authenticated { id: peer.id() })?;

        peer.link().send(encode_auth_ack().to_vec()).await
    }

    async fn handle_command_request(
        &self,
        peer: &mut Peer<T, D::Stream>,
        data: &[u8],
    ) -> crate::Result<()> {
        let request = match decode_command_request(data) {
            Ok(request) => request,
            Err(err @ DecodeError::UnsupportedCommand(_)) => {
                debug!(error = %err, "rejecting command");
                return self.reply(peer.link(), Reply::CommandNotSupported).await;
            }
            Err(err) => {
                if let Some(status) = err.reply() {
                    self.reply(peer.link(), status).await?;
                }
                return Err(err.into());
            }
        };

        if !request.command.is_supported() {
            debug!(command = %request.command, "command not implemented");
            return self.reply(peer.link(), Reply::AddressTypeNotSupported).await;
        }

        let result = peer
            .connect_destination(&self.dialer, &request.target, self.config.connect_timeout)
            .await;

        let status = Reply::from_io_result(&result);
        match &result {
            Ok(()) => info!(destination = %request.target, "tunnel established"),
            Err(err) => {
                warn!(destination = %request.target, error = %err, %status, "connect failed")
            }
        }

        self.reply(peer.link(), status).await?;
        if result.is_ok() {
            peer.start_forwarding();
        }
        Ok(())
    }

    // Peer is Send but not Sync, so only its link may be borrowed across an await
    async fn reply(&self, link: &PeerLink<T>, status: Reply) -> crate::Result<()> {
        link.send(encode_reply(status, self.bound).to_vec()).await
    }
}
