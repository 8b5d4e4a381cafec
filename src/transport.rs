use std::{future::Future, io};

pub mod tcp;

/// Opaque handle the transport assigns to each live connection.
pub type ConnectionId = u64;

/// Outbound half of the transport the engine talks to peers through.
///
/// The inbound half is the engine itself: the transport calls
/// [`Server::handle_connect`](crate::Server::handle_connect),
/// [`Server::dispatch`](crate::Server::dispatch) and
/// [`Server::handle_close`](crate::Server::handle_close).
pub trait Transport: Send + Sync + 'static {
    /// Queues `data` for delivery to connection `id`, in call order.
    ///
    /// Fails with [`io::ErrorKind::NotConnected`] when `id` is not live.
    fn send(&self, id: ConnectionId, data: Vec<u8>) -> impl Future<Output = io::Result<()>> + Send;

    /// Closes connection `id` once everything already queued is written.
    ///
    /// The transport still reports the close back through
    /// [`Server::handle_close`](crate::Server::handle_close).
    fn close(&self, id: ConnectionId) -> impl Future<Output = ()> + Send;
}
