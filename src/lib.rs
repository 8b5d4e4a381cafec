//! # socks5-engine
//!
//! An event-driven SOCKS5 (RFC 1928) proxy engine.
//!
//! The engine owns the protocol: it decodes what peers send, tracks where
//! each connection is in the handshake, dials destinations and relays
//! bytes. The transport that accepts sockets and moves bytes is a
//! collaborator behind the [`Transport`] trait, and outbound connections go
//! through a [`Dialer`]. A tokio implementation of both ships with the
//! crate ([`TcpTransport`], [`TcpDialer`]).
//!
//! ## Protocol Flow
//!
//! 1. **Greeting**: the client lists the authentication methods it supports.
//!    The engine always answers "no authentication required".
//! 2. **Request**: the client sends a command and a destination address.
//!    CONNECT is dialed and answered with a reply carrying the proxy's own
//!    listening address. BIND and UDP ASSOCIATE are answered with
//!    "address type not supported" and the client may try again.
//! 3. **Relay**: every later byte from the client goes to the destination
//!    verbatim, and everything the destination sends comes back the same way.
//! 4. **Termination**: when the transport reports a close, the peer's
//!    session and destination are torn down together.
//!
//! Domain and IPv4 destinations are supported. IPv6 destinations are
//! parsed but rejected.
//!
//! ## Events
//!
//! Hosts observe the engine through a typed event bus ([`EventKind`] /
//! [`Event`]): start, shutdown, connect, authenticated, received proxy
//! data, sent data and close. Handlers run in registration order.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use socks5_engine::{EventKind, ServerConfig, Server, TcpDialer, TcpTransport};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> socks5_engine::Result<()> {
//!     let config = ServerConfig::default();
//!     let listener = TcpListener::bind(config.listen_addr).await?;
//!
//!     let transport = Arc::new(TcpTransport::new(config.outbound_capacity));
//!     let server = Arc::new(Server::new(config, transport, TcpDialer));
//!     server.on(EventKind::Authenticated, |event| {
//!         println!("{:?}", event);
//!         Ok(())
//!     });
//!
//!     TcpTransport::serve(server, listener, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```

use std::io;

use thiserror::Error;

pub mod config;
pub mod dialer;
pub mod event;
pub mod peer;
pub mod protocol;
pub mod server;
pub mod sessions;
pub mod transport;

pub use config::ServerConfig;
pub use dialer::{Dialer, TcpDialer};
pub use event::{Event, EventBus, EventKind};
pub use protocol::{DecodeError, Reply};
pub use server::Server;
pub use transport::{tcp::TcpTransport, ConnectionId, Transport};

/// Error type event handlers return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Socks5Error>;

#[derive(Error, Debug)]
pub enum Socks5Error {
    #[error("Malformed request: {0}")]
    Decode(#[from] DecodeError),
    #[error("Connection {0} has no open destination")]
    NotConnected(ConnectionId),
    #[error("Event handler failed: {0}")]
    Handler(BoxError),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Error in network operation: {0}")]
    IoError(#[from] io::Error),
}
