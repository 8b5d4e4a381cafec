use socks5_engine::{Event, EventKind, Server, ServerConfig, TcpDialer, TcpTransport};
use std::{error::Error, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::from_env();
    config.validate()?;

    let listener = TcpListener::bind(config.listen_addr).await?;
    let config = config.with_listen_addr(listener.local_addr()?);

    let transport = Arc::new(TcpTransport::new(config.outbound_capacity));
    let server = Arc::new(Server::new(config, transport, TcpDialer));

    server
        .on(EventKind::Start, |_| {
            info!("Server started");
            Ok(())
        })
        .on(EventKind::Authenticated, |event| {
            if let Event::Authenticated { id } = event {
                info!("Client #{} has authenticated", id);
            }
            Ok(())
        })
        .on(EventKind::Close, |event| {
            if let Event::Close { id } = event {
                info!("Connection closed with client #{}", id);
            }
            Ok(())
        });

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {:?}", err);
            std::future::pending::<()>().await;
        }
    };

    TcpTransport::serve(server, listener, shutdown).await?;
    Ok(())
}
