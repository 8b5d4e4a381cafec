use std::{future::Future, io, net::SocketAddrV4};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

use crate::protocol::{Addr, TargetAddr};

/// Opens outbound connections for CONNECT commands.
///
/// The engine bounds every dial with its configured connect timeout, so
/// implementations do not need their own.
pub trait Dialer: Send + Sync + 'static {
    /// The type of stream a successful dial yields.
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Connects to `target`.
    ///
    /// - `target`: the host and port taken from the command request.
    /// - Returns: the open stream, or the I/O error that picks the reply status.
    fn dial(&self, target: &TargetAddr) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Dials destinations directly over TCP, resolving domains with the
/// system resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    type Stream = TcpStream;

    async fn dial(&self, target: &TargetAddr) -> io::Result<TcpStream> {
        match target.addr {
            Addr::Ipv4(ip) => TcpStream::connect(SocketAddrV4::new(ip, target.port)).await,
            Addr::Domain(_) => TcpStream::connect(target.to_host_port()).await,
        }
    }
}
