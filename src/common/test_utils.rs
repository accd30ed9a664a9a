use crate::common::EchoServerTrait;
use crate::http::{HttpConfig, HttpEchoServer, Router};
use crate::reflect::ReflectHandler;
use crate::Result;
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Spawns a reflecting server on an ephemeral loopback port for integration tests
///
/// The listener is bound before this returns, so the returned address is
/// immediately connectable. The sender stops the server.
pub async fn spawn_test_server(
    config: HttpConfig,
) -> Result<(JoinHandle<Result<()>>, SocketAddr, broadcast::Sender<()>)> {
    let config = HttpConfig {
        bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        ..config
    };

    let router = Router::new().route("/", ReflectHandler);
    let server = HttpEchoServer::new(config, router);
    let listener = server.bind().await?;
    let addr = listener.local_addr()?;
    let shutdown = server.shutdown_signal();

    let server_handle = tokio::spawn(async move { server.serve(listener).await });

    Ok((server_handle, addr, shutdown))
}
