use super::codec::RequestTarget;
use super::header::canonical_name;
use crate::common::EchoClient;
use crate::{ReflectError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::{HeaderName, HeaderValue, Method, Request, Response, StatusCode, Version};
use httparse::Status;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout};

/// Configuration for HTTP echo clients
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Read timeout for operations
    pub read_timeout: Duration,
    /// Write timeout for operations
    pub write_timeout: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Buffer size for reading data
    pub buffer_size: usize,
    /// Maximum response size to prevent memory exhaustion
    pub max_response_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            buffer_size: 8192,
            max_response_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// HTTP/1.1 client for talking to an echo server
///
/// One client holds one keep-alive connection and sends requests on it
/// in sequence.
///
/// # Examples
///
/// ```no_run
/// use reflectsrv::{EchoClient, HttpEchoClient};
/// use bytes::Bytes;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut client = HttpEchoClient::connect("127.0.0.1:8080".parse()?).await?;
///
///     let request = http::Request::post("/submit?tag=a")
///         .body(Bytes::from_static(b"{\"a\":1}"))?;
///     let echo = client.reflect(request).await?;
///     println!("Server saw {} {}", echo.method, echo.url);
///     Ok(())
/// }
/// ```
pub struct HttpEchoClient {
    stream: TcpStream,
    addr: SocketAddr,
    config: ClientConfig,
    buffer: BytesMut,
    last_activity: Instant,
}

impl HttpEchoClient {
    /// Connect to a server with custom configuration
    pub async fn connect_with_config(addr: SocketAddr, config: ClientConfig) -> Result<Self> {
        let stream = timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ReflectError::Timeout("Connection timeout".to_string()))??;

        Ok(Self {
            stream,
            addr,
            buffer: BytesMut::with_capacity(config.buffer_size),
            config,
            last_activity: Instant::now(),
        })
    }

    /// Connect with default configuration
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Self::connect_with_config(addr, ClientConfig::default()).await
    }

    /// Check if the client has been idle for too long
    pub fn is_idle(&self, max_idle: Duration) -> bool {
        self.last_activity.elapsed() > max_idle
    }

    /// Get client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Writes `data` verbatim and reads a single response
    ///
    /// `head` tells the reader not to expect a body, as for a `HEAD` request.
    pub async fn send_raw(&mut self, data: &[u8], head: bool) -> Result<Response<Bytes>> {
        self.last_activity = Instant::now();
        self.write_all(data).await?;
        let response = self.read_response(head).await?;
        self.last_activity = Instant::now();
        Ok(response)
    }

    /// Reads whatever the server sends until it closes the connection
    pub async fn read_to_close(&mut self) -> Result<Bytes> {
        let mut rest = self.buffer.split();
        loop {
            let n = timeout(self.config.read_timeout, self.stream.read_buf(&mut rest))
                .await
                .map_err(|_| ReflectError::Timeout("Read timeout".to_string()))??;
            if n == 0 {
                return Ok(rest.freeze());
            }
        }
    }

    fn encode_request(&self, request: &Request<Bytes>) -> BytesMut {
        let target = match request.extensions().get::<RequestTarget>() {
            Some(target) => target.0.clone(),
            None => request
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string()),
        };
        let version = if request.version() == Version::HTTP_10 {
            "HTTP/1.0"
        } else {
            "HTTP/1.1"
        };

        let mut buf = BytesMut::with_capacity(256 + request.body().len());
        buf.put_slice(format!("{} {} {}\r\n", request.method(), target, version).as_bytes());

        if !request.headers().contains_key(HOST) {
            buf.put_slice(format!("Host: {}\r\n", self.addr).as_bytes());
        }
        for (name, value) in request.headers() {
            buf.put_slice(canonical_name(name.as_str()).as_bytes());
            buf.put_slice(b": ");
            buf.put_slice(value.as_bytes());
            buf.put_slice(b"\r\n");
        }
        let framed = request.headers().contains_key(CONTENT_LENGTH)
            || request.headers().contains_key(TRANSFER_ENCODING);
        if !framed && !request.body().is_empty() {
            buf.put_slice(format!("Content-Length: {}\r\n", request.body().len()).as_bytes());
        }
        buf.put_slice(b"\r\n");
        buf.put_slice(request.body());
        buf
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        timeout(self.config.write_timeout, async {
            self.stream.write_all(data).await?;
            self.stream.flush().await
        })
        .await
        .map_err(|_| ReflectError::Timeout("Write timeout".to_string()))??;
        Ok(())
    }

    /// Reads more bytes into the buffer; returns false at EOF
    async fn fill(&mut self) -> Result<bool> {
        let n = timeout(self.config.read_timeout, self.stream.read_buf(&mut self.buffer))
            .await
            .map_err(|_| ReflectError::Timeout("Read timeout".to_string()))??;
        if self.buffer.len() > self.config.max_response_size {
            return Err(ReflectError::Config(format!(
                "Response too large: {} bytes, max allowed: {}",
                self.buffer.len(),
                self.config.max_response_size
            )));
        }
        Ok(n > 0)
    }

    async fn read_response(&mut self, head: bool) -> Result<Response<Bytes>> {
        loop {
            let parsed = {
                let mut headers = [httparse::EMPTY_HEADER; 64];
                let mut res = httparse::Response::new(&mut headers);
                match res.parse(&self.buffer) {
                    Ok(Status::Complete(len)) => {
                        let mut builder = Response::builder()
                            .status(res.code.unwrap_or(0))
                            .version(if res.version == Some(0) {
                                Version::HTTP_10
                            } else {
                                Version::HTTP_11
                            });
                        for header in res.headers.iter() {
                            builder = builder.header(
                                HeaderName::from_bytes(header.name.as_bytes())
                                    .map_err(|e| ReflectError::Protocol(e.to_string()))?,
                                HeaderValue::from_bytes(header.value)
                                    .map_err(|e| ReflectError::Protocol(e.to_string()))?,
                            );
                        }
                        Some((builder, len))
                    }
                    Ok(Status::Partial) => None,
                    Err(e) => {
                        return Err(ReflectError::Protocol(format!(
                            "Failed to parse response: {e}"
                        )));
                    }
                }
            };

            let Some((builder, head_len)) = parsed else {
                if !self.fill().await? {
                    return Err(ReflectError::Protocol(
                        "Connection closed before response head".to_string(),
                    ));
                }
                continue;
            };
            self.buffer.advance(head_len);

            let response = builder.body(())?;
            // Interim responses carry no body
            if response.status().is_informational() {
                continue;
            }

            let body_len = if head || response.status() == StatusCode::NO_CONTENT {
                Some(0)
            } else {
                content_length(&response)?
            };

            let body = match body_len {
                Some(len) => {
                    while self.buffer.len() < len {
                        if !self.fill().await? {
                            return Err(ReflectError::Protocol(format!(
                                "Connection closed after {} of {} body bytes",
                                self.buffer.len(),
                                len
                            )));
                        }
                    }
                    self.buffer.split_to(len).freeze()
                }
                None => {
                    while self.fill().await? {}
                    self.buffer.split().freeze()
                }
            };

            let (parts, ()) = response.into_parts();
            return Ok(Response::from_parts(parts, body));
        }
    }
}

fn content_length<T>(response: &Response<T>) -> Result<Option<usize>> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .map(|v| {
            v.to_str()
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .ok_or_else(|| {
                    ReflectError::Protocol("Invalid Content-Length in response".to_string())
                })
        })
        .transpose()
}

impl EchoClient for HttpEchoClient {
    async fn send(&mut self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        let encoded = self.encode_request(&request);
        self.send_raw(&encoded, request.method() == Method::HEAD).await
    }
}

/// Builder for client configuration
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    pub fn max_response_size(mut self, size: usize) -> Self {
        self.config.max_response_size = size;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
