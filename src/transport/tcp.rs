use std::{
    collections::HashMap,
    future::Future,
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{tcp::OwnedWriteHalf, TcpListener, TcpStream},
    select,
    sync::{mpsc, oneshot},
};
use tracing::{debug, info_span, warn, Instrument};

use crate::{dialer::Dialer, Server};

use super::{ConnectionId, Transport};

/// TCP transport: one reader loop and one writer task per connection.
///
/// The reader loop is the only caller of [`Server::dispatch`] for its
/// connection, which keeps dispatches for one id sequential. Writes go
/// through a bounded queue per connection so a slow client applies
/// backpressure to whoever is sending to it.
pub struct TcpTransport {
    links: Mutex<HashMap<ConnectionId, mpsc::Sender<Vec<u8>>>>,
    next_id: AtomicU64,
    outbound_capacity: usize,
}

impl TcpTransport {
    pub fn new(outbound_capacity: usize) -> Self {
        Self {
            links: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            outbound_capacity: outbound_capacity.max(1),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.links().len()
    }

    fn links(&self) -> std::sync::MutexGuard<'_, HashMap<ConnectionId, mpsc::Sender<Vec<u8>>>> {
        self.links
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(&self) -> (ConnectionId, mpsc::Receiver<Vec<u8>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.outbound_capacity);
        self.links().insert(id, tx);
        (id, rx)
    }

    /// Accepts connections on `listener` until `shutdown` resolves.
    ///
    /// Fires START before the first accept and SHUTDOWN after the last,
    /// closing every live session in between.
    pub async fn serve<D, F>(
        server: Arc<Server<TcpTransport, D>>,
        listener: TcpListener,
        shutdown: F,
    ) -> crate::Result<()>
    where
        D: Dialer,
        F: Future<Output = ()>,
    {
        server.start()?;
        tokio::pin!(shutdown);

        loop {
            let (stream, addr) = select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(error = %err, "TCP accept error");
                        continue;
                    }
                },
            };

            let server = Arc::clone(&server);
            let span = info_span!("connection", %addr);
            tokio::spawn(handle_connection(server, stream, addr).instrument(span));
        }

        server.shutdown().await?;
        debug!(
            open = server.transport().connection_count(),
            "closing remaining connections"
        );
        let ids: Vec<_> = server.transport().links().keys().copied().collect();
        for id in ids {
            server.transport().close(id).await;
        }
        Ok(())
    }
}

impl Transport for TcpTransport {
    async fn send(&self, id: ConnectionId, data: Vec<u8>) -> io::Result<()> {
        let link = self.links().get(&id).cloned();
        let Some(link) = link else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("connection {} is not open", id),
            ));
        };

        link.send(data)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "connection writer stopped"))
    }

    async fn close(&self, id: ConnectionId) {
        // Dropping the sender lets the writer drain what is queued, then shut down
        self.links().remove(&id);
    }
}

async fn handle_connection<D: Dialer>(
    server: Arc<Server<TcpTransport, D>>,
    stream: TcpStream,
    addr: SocketAddr,
) {
    let transport = Arc::clone(server.transport());
    let (id, outbound) = transport.register();
    let (mut reader, writer) = stream.into_split();
    let (written_tx, mut written_rx) = oneshot::channel();
    tokio::spawn(write_outbound(writer, outbound, written_tx).instrument(tracing::Span::current()));

    debug!(id, %addr, "accepted");
    if let Err(err) = server.handle_connect(id) {
        warn!(id, error = %err, "connect handler failed, closing");
        transport.close(id).await;
    }

    let mut buf = vec![0; server.config().relay_buffer_size];
    loop {
        select! {
            _ = &mut written_rx => break,
            read = reader.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    if let Err(err) = server.dispatch(id, &buf[..n]).await {
                        warn!(id, error = %err, "request failed, closing");
                        break;
                    }
                }
                Err(err) => {
                    debug!(id, error = %err, "read failed");
                    break;
                }
            },
        }
    }

    transport.close(id).await;
    if let Err(err) = server.handle_close(id).await {
        warn!(id, error = %err, "close handler failed");
    }
}

async fn write_outbound(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    written: oneshot::Sender<()>,
) {
    while let Some(data) = outbound.recv().await {
        if let Err(err) = writer.write_all(&data).await {
            debug!(error = %err, "write failed");
            break;
        }
    }
    if let Err(err) = writer.shutdown().await {
        debug!(error = %err, "shutdown failed");
    }
    let _ = written.send(());
}
