use super::codec::{BodyTruncated, CONTINUE, CodecError, HttpCodec};
use super::{HttpConfig, Router};
use crate::common::EchoServerTrait;
use crate::{ReflectError, Result};
use bytes::{Bytes, BytesMut};
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use http::{Method, Request, Response, StatusCode, Version};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::{signal, sync::broadcast, time::timeout};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, error, info, warn, Instrument};

/// HTTP server that dispatches every request through a [`Router`]
///
/// Each accepted connection is served by its own task. Requests on one
/// connection are answered in order, and connections are kept alive
/// following HTTP/1.x rules.
///
/// # Examples
///
/// ```no_run
/// use reflectsrv::common::EchoServerTrait;
/// use reflectsrv::http::{HttpConfig, HttpEchoServer, Router};
/// use reflectsrv::ReflectHandler;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let router = Router::new().route("/", ReflectHandler);
///     let server = HttpEchoServer::new(HttpConfig::with_port(8080), router);
///     let shutdown_signal = server.shutdown_signal();
///
///     let server_handle = tokio::spawn(async move { server.run().await });
///
///     // Do other work...
///
///     let _ = shutdown_signal.send(());
///     server_handle.await??;
///     Ok(())
/// }
/// ```
pub struct HttpEchoServer {
    config: HttpConfig,
    router: Arc<Router>,
    shutdown_signal: Arc<broadcast::Sender<()>>,
}

impl HttpEchoServer {
    /// Creates a new server with the given configuration and routes
    pub fn new(config: HttpConfig, router: Router) -> Self {
        let (shutdown_signal, _) = broadcast::channel(1);
        Self {
            config,
            router: Arc::new(router),
            shutdown_signal: Arc::new(shutdown_signal),
        }
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Binds the listening socket
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.bind_addr;
        TcpListener::bind(addr)
            .await
            .map_err(|source| ReflectError::Bind { addr, source })
    }

    /// Accepts and serves connections on `listener` until shut down
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "HTTP echo server listening");

        let connection_count = Arc::new(AtomicUsize::new(0));
        let mut shutdown_rx = self.shutdown_signal.subscribe();

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            let current_count = connection_count.load(Ordering::SeqCst);
                            if let Some(limit) = self.config.max_connections {
                                if current_count >= limit {
                                    warn!(
                                        %addr,
                                        current = current_count,
                                        limit,
                                        "Connection rejected: limit reached"
                                    );
                                    continue;
                                }
                            }

                            let new_count = connection_count.fetch_add(1, Ordering::SeqCst) + 1;
                            info!(%addr, current = new_count, "Accepted connection");

                            let config = self.config.clone();
                            let router = self.router.clone();
                            let connection_count = connection_count.clone();
                            let span =
                                tracing::info_span!("connection", %addr, current = new_count);

                            tokio::spawn(async move {
                                let result = handle_connection(stream, addr, config, router)
                                    .instrument(span)
                                    .await;
                                if let Err(e) = result {
                                    error!(%addr, error = %e, "Error handling connection");
                                }
                                let final_count =
                                    connection_count.fetch_sub(1, Ordering::SeqCst) - 1;
                                info!(%addr, current = final_count, "Connection closed");
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = signal::ctrl_c() => {
                    info!("Received shutdown signal, stopping server");
                    break;
                }
                _ = shutdown_rx.recv() => {
                    info!("Received internal shutdown signal, stopping server");
                    break;
                }
            }
        }

        info!("HTTP echo server stopped");
        Ok(())
    }
}

impl EchoServerTrait for HttpEchoServer {
    async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Returns a shutdown signal sender that can be used to gracefully shutdown the server
    fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown_signal.as_ref().clone()
    }
}

/// Runs `fut` under `limit`, returning `None` if it expired
async fn bounded<F: Future>(limit: Option<Duration>, fut: F) -> Option<F::Output> {
    match limit {
        Some(limit) => timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}

/// Serves requests on one connection until either side closes it
async fn handle_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    config: HttpConfig,
    router: Arc<Router>,
) -> Result<()> {
    let mut codec = HttpCodec::new(config.max_header_bytes);
    let mut read_buf = BytesMut::with_capacity(8 * 1024);
    let mut write_buf = BytesMut::new();

    loop {
        let request = loop {
            match codec.decode(&mut read_buf) {
                Ok(Some(request)) => break Some(request),
                Ok(None) => {}
                Err(e) => return reject(&mut stream, addr, e, &mut codec, &config).await,
            }

            if codec.take_continue() {
                write_bounded(&mut stream, CONTINUE, config.write_timeout).await?;
            }

            let n = match bounded(config.read_timeout, stream.read_buf(&mut read_buf)).await {
                Some(Ok(n)) => n,
                Some(Err(e)) if codec.in_body() => {
                    warn!(%addr, error = %e, "Read failed mid-body");
                    0
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    warn!(%addr, "Read timeout");
                    return Ok(());
                }
            };

            if n == 0 {
                match codec.decode_eof(&mut read_buf) {
                    Ok(request) => break request,
                    Err(e) => return reject(&mut stream, addr, e, &mut codec, &config).await,
                }
            }
        };

        let Some(request) = request else {
            info!(%addr, "Client closed connection");
            return Ok(());
        };

        let truncated = request.extensions().get::<BodyTruncated>().is_some();
        if truncated {
            warn!(
                %addr,
                received = request.body().len(),
                "Request body truncated, answering with what arrived"
            );
        }
        let keep_alive = !truncated && wants_keep_alive(&request);
        let version = request.version();
        let is_head = request.method() == Method::HEAD;

        let mut response = router.dispatch(request).await;

        if !keep_alive {
            response
                .headers_mut()
                .insert(CONNECTION, HeaderValue::from_static("close"));
        } else if version == Version::HTTP_10 {
            response
                .headers_mut()
                .insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        }
        if is_head {
            let len = response.body().len();
            response.headers_mut().insert(CONTENT_LENGTH, HeaderValue::from(len));
            *response.body_mut() = Bytes::new();
        }

        let status = response.status();
        write_buf.clear();
        codec.encode(response, &mut write_buf)?;
        write_bounded(&mut stream, &write_buf, config.write_timeout).await?;
        debug!(%addr, status = status.as_u16(), size = write_buf.len(), "Sent response");

        if !keep_alive {
            stream.shutdown().await.ok();
            return Ok(());
        }
    }
}

async fn write_bounded(stream: &mut TcpStream, data: &[u8], limit: Option<Duration>) -> Result<()> {
    let write = async {
        stream.write_all(data).await?;
        stream.flush().await
    };
    match bounded(limit, write).await {
        Some(result) => Ok(result?),
        None => Err(ReflectError::Timeout("Write timeout".to_string())),
    }
}

/// Answers a request that could not be framed and closes the connection
async fn reject(
    stream: &mut TcpStream,
    addr: SocketAddr,
    err: CodecError,
    codec: &mut HttpCodec,
    config: &HttpConfig,
) -> Result<()> {
    let err = match err {
        CodecError::Io(e) => return Err(e.into()),
        other => other,
    };
    warn!(%addr, error = %err, "Rejecting malformed request");

    let status = match err {
        CodecError::HeadTooLarge(_) => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
        _ => StatusCode::BAD_REQUEST,
    };
    let reason = status.canonical_reason().unwrap_or_default();
    let mut response = Response::new(Bytes::from(format!("{} {reason}", status.as_u16())));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(CONNECTION, HeaderValue::from_static("close"));

    let mut buf = BytesMut::new();
    codec.encode(response, &mut buf)?;
    write_bounded(stream, &buf, config.write_timeout).await?;
    stream.shutdown().await.ok();
    Ok(())
}

/// HTTP/1.1 stays open unless asked to close, HTTP/1.0 only when asked to stay
fn wants_keep_alive(request: &Request<Bytes>) -> bool {
    let has_token = |token: &str| {
        request
            .headers()
            .get_all(CONNECTION)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    };

    match request.version() {
        Version::HTTP_10 => has_token("keep-alive"),
        _ => !has_token("close"),
    }
}
