use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    task::JoinHandle,
};
use tracing::{debug, instrument, trace, warn};

use crate::{
    dialer::Dialer,
    event::{Event, EventBus},
    protocol::TargetAddr,
    transport::{ConnectionId, Transport},
    Socks5Error,
};

/// A peer's capability to write to its own connection.
///
/// Every write is reported as [`Event::SentData`].
pub struct PeerLink<T> {
    id: ConnectionId,
    transport: Arc<T>,
    events: Arc<EventBus>,
}

impl<T> Clone for PeerLink<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            transport: Arc::clone(&self.transport),
            events: Arc::clone(&self.events),
        }
    }
}

impl<T: Transport> PeerLink<T> {
    pub fn new(id: ConnectionId, transport: Arc<T>, events: Arc<EventBus>) -> Self {
        Self {
            id,
            transport,
            events,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub async fn send(&self, data: Vec<u8>) -> crate::Result<()> {
        let bytes = data.len();
        self.transport.send(self.id, data).await?;
        self.events.fire(Event::SentData { id: self.id, bytes })
    }

    pub async fn close(&self) {
        self.transport.close(self.id).await
    }
}

struct Tunnel<S> {
    writer: WriteHalf<S>,
    open: Arc<AtomicBool>,
    // Held until forwarding starts so nothing reaches the peer before the reply
    pending_reader: Option<ReadHalf<S>>,
    forwarder: Option<JoinHandle<()>>,
}

/// One client connection and, once CONNECT succeeded, its destination.
pub struct Peer<T, S> {
    link: PeerLink<T>,
    authenticated: bool,
    tunnel: Option<Tunnel<S>>,
    relay_buffer_size: usize,
}

impl<T, S> Peer<T, S>
where
    T: Transport,
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(link: PeerLink<T>, relay_buffer_size: usize) -> Self {
        Self {
            link,
            authenticated: false,
            tunnel: None,
            relay_buffer_size,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.link.id
    }

    pub fn link(&self) -> &PeerLink<T> {
        &self.link
    }

    pub fn has_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn mark_authenticated(&mut self) {
        self.authenticated = true;
    }

    /// True while a destination is established and has not closed.
    pub fn is_connected(&self) -> bool {
        self.tunnel
            .as_ref()
            .is_some_and(|tunnel| tunnel.open.load(Ordering::Acquire))
    }

    /// True once a CONNECT succeeded, even if the destination has since closed.
    pub fn has_destination(&self) -> bool {
        self.tunnel.is_some()
    }

    /// Dials `target`, giving up after `timeout`.
    ///
    /// On failure the peer is left without a destination and the error's
    /// kind tells the caller which reply status to send.
    pub async fn connect_destination<D>(
        &mut self,
        dialer: &D,
        target: &TargetAddr,
        timeout: Duration,
    ) -> io::Result<()>
    where
        D: Dialer<Stream = S>,
    {
        let stream = match tokio::time::timeout(timeout, dialer.dial(target)).await {
            Ok(stream) => stream?,
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connecting to {} timed out", target),
                ))
            }
        };

        self.close().await;

        let (reader, writer) = tokio::io::split(stream);
        self.tunnel = Some(Tunnel {
            writer,
            open: Arc::new(AtomicBool::new(true)),
            pending_reader: Some(reader),
            forwarder: None,
        });
        Ok(())
    }

    /// Starts copying destination bytes to the peer. Idempotent.
    pub fn start_forwarding(&mut self) {
        let Some(tunnel) = self.tunnel.as_mut() else {
            return;
        };
        let Some(reader) = tunnel.pending_reader.take() else {
            return;
        };

        tunnel.forwarder = Some(tokio::spawn(forward_destination(
            reader,
            self.link.clone(),
            Arc::clone(&tunnel.open),
            self.relay_buffer_size,
        )));
    }

    /// Writes peer bytes to the destination.
    pub async fn relay(&mut self, data: &[u8]) -> crate::Result<()> {
        if !self.is_connected() {
            return Err(Socks5Error::NotConnected(self.id()));
        }
        self.start_forwarding();

        let Some(tunnel) = self.tunnel.as_mut() else {
            return Err(Socks5Error::NotConnected(self.link.id));
        };
        if let Err(err) = tunnel.writer.write_all(data).await {
            tunnel.open.store(false, Ordering::Release);
            return Err(err.into());
        }
        trace!(id = self.link.id, bytes = data.len(), "relayed to destination");
        Ok(())
    }

    /// Tears down the destination, stopping its forwarding task.
    pub async fn close(&mut self) {
        let Some(mut tunnel) = self.tunnel.take() else {
            return;
        };
        tunnel.open.store(false, Ordering::Release);
        if let Some(forwarder) = tunnel.forwarder.take() {
            forwarder.abort();
        }
        if let Err(err) = tunnel.writer.shutdown().await {
            debug!(id = self.link.id, error = %err, "destination shutdown failed");
        }
    }
}

#[instrument(skip_all, fields(id = link.id()))]
async fn forward_destination<T, S>(
    mut reader: ReadHalf<S>,
    link: PeerLink<T>,
    open: Arc<AtomicBool>,
    buffer_size: usize,
) where
    T: Transport,
    S: AsyncRead + Send,
{
    let mut buf = vec![0; buffer_size];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("destination closed");
                break;
            }
            Ok(n) => n,
            Err(err) => {
                debug!(error = %err, "destination read failed");
                break;
            }
        };

        match link.send(buf[..n].to_vec()).await {
            Ok(()) => {}
            Err(Socks5Error::Handler(err)) => warn!(error = %err, "sent_data handler failed"),
            Err(err) => {
                debug!(error = %err, "peer unreachable, stopping");
                break;
            }
        }
    }

    open.store(false, Ordering::Release);
    link.close().await;
}

#[cfg(test)]
mod tests {
    use std::{net::Ipv4Addr, sync::Mutex};

    use tokio::io::{duplex, DuplexStream};

    use super::*;
    use crate::protocol::Addr;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(ConnectionId, Vec<u8>)>>,
        closed: Mutex<Vec<ConnectionId>>,
    }

    impl Transport for RecordingTransport {
        async fn send(&self, id: ConnectionId, data: Vec<u8>) -> io::Result<()> {
            self.sent.lock().unwrap().push((id, data));
            Ok(())
        }

        async fn close(&self, id: ConnectionId) {
            self.closed.lock().unwrap().push(id);
        }
    }

    /// Hands out pre-made duplex ends, or refuses when empty.
    #[derive(Default)]
    struct PipeDialer {
        ends: Mutex<Vec<DuplexStream>>,
    }

    impl Dialer for PipeDialer {
        type Stream = DuplexStream;

        async fn dial(&self, _: &TargetAddr) -> io::Result<DuplexStream> {
            self.ends
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| io::ErrorKind::ConnectionRefused.into())
        }
    }

    struct PendingDialer;

    impl Dialer for PendingDialer {
        type Stream = DuplexStream;

        async fn dial(&self, _: &TargetAddr) -> io::Result<DuplexStream> {
            std::future::pending().await
        }
    }

    fn peer(transport: &Arc<RecordingTransport>) -> Peer<RecordingTransport, DuplexStream> {
        let link = PeerLink::new(1, Arc::clone(transport), Arc::new(EventBus::new()));
        Peer::new(link, 1024)
    }

    fn target() -> TargetAddr {
        TargetAddr::new(Addr::Ipv4(Ipv4Addr::new(10, 0, 0, 1)), 80)
    }

    #[test]
    fn mark_authenticated_is_idempotent() {
        let transport = Arc::new(RecordingTransport::default());
        let mut peer = peer(&transport);
        assert!(!peer.has_authenticated());

        peer.mark_authenticated();
        peer.mark_authenticated();
        assert!(peer.has_authenticated());
        assert!(!peer.is_connected());
    }

    #[tokio::test]
    async fn relay_requires_destination() {
        let transport = Arc::new(RecordingTransport::default());
        let mut peer = peer(&transport);

        let err = peer.relay(b"hello").await.unwrap_err();
        assert!(matches!(err, Socks5Error::NotConnected(1)));
    }

    #[tokio::test]
    async fn refused_dial_leaves_peer_unconnected() {
        let transport = Arc::new(RecordingTransport::default());
        let mut peer = peer(&transport);

        let err = peer
            .connect_destination(&PipeDialer::default(), &target(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
        assert!(!peer.is_connected());
        assert!(!peer.has_destination());
    }

    #[tokio::test]
    async fn slow_dial_times_out() {
        let transport = Arc::new(RecordingTransport::default());
        let mut peer = peer(&transport);

        let err = peer
            .connect_destination(&PendingDialer, &target(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(!peer.is_connected());
    }

    #[tokio::test]
    async fn relays_both_directions() {
        let transport = Arc::new(RecordingTransport::default());
        let mut peer = peer(&transport);
        let (proxy_end, mut remote) = duplex(1024);
        let dialer = PipeDialer {
            ends: Mutex::new(vec![proxy_end]),
        };

        peer.connect_destination(&dialer, &target(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(peer.is_connected());

        peer.relay(b"ping").await.unwrap();
        let mut buf = [0; 4];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        remote.write_all(b"pong").await.unwrap();
        drop(remote);

        // forwarder exits once the destination closes
        for _ in 0..100 {
            if !peer.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!peer.is_connected());
        assert!(peer.has_destination());

        let sent = transport.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![(1, b"pong".to_vec())]);
        assert_eq!(*transport.closed.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn nothing_is_forwarded_before_forwarding_starts() {
        let transport = Arc::new(RecordingTransport::default());
        let mut peer = peer(&transport);
        let (proxy_end, mut remote) = duplex(1024);
        let dialer = PipeDialer {
            ends: Mutex::new(vec![proxy_end]),
        };

        peer.connect_destination(&dialer, &target(), Duration::from_secs(1))
            .await
            .unwrap();
        remote.write_all(b"banner").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(transport.sent.lock().unwrap().is_empty());

        peer.start_forwarding();
        peer.start_forwarding();
        for _ in 0..100 {
            if !transport.sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(
            *transport.sent.lock().unwrap(),
            vec![(1, b"banner".to_vec())]
        );
    }

    #[tokio::test]
    async fn close_releases_destination() {
        let transport = Arc::new(RecordingTransport::default());
        let mut peer = peer(&transport);
        let (proxy_end, mut remote) = duplex(1024);
        let dialer = PipeDialer {
            ends: Mutex::new(vec![proxy_end]),
        };

        peer.connect_destination(&dialer, &target(), Duration::from_secs(1))
            .await
            .unwrap();
        peer.start_forwarding();
        peer.close().await;

        assert!(!peer.is_connected());
        assert!(!peer.has_destination());

        // both halves are gone, so the remote end reads EOF
        let mut buf = Vec::new();
        let n = tokio::time::timeout(Duration::from_secs(1), remote.read_to_end(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }
}
