use super::codec::DEFAULT_MAX_HEAD_BYTES;
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the HTTP echo server
///
/// # Examples
///
/// ```rust
/// use reflectsrv::http::HttpConfig;
/// use std::time::Duration;
///
/// let config = HttpConfig {
///     bind_addr: "127.0.0.1:8080".parse().unwrap(),
///     max_connections: Some(100),
///     read_timeout: Some(Duration::from_secs(30)),
///     write_timeout: Some(Duration::from_secs(30)),
///     max_header_bytes: 64 * 1024,
/// };
/// ```
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Network address to bind to
    pub bind_addr: SocketAddr,
    /// Maximum number of concurrent connections, unbounded when `None`
    pub max_connections: Option<usize>,
    /// Upper bound on each wait for request bytes, including idle keep-alive waits
    pub read_timeout: Option<Duration>,
    /// Upper bound on writing a single response
    pub write_timeout: Option<Duration>,
    /// Upper bound on the request line plus header fields, in bytes
    pub max_header_bytes: usize,
}

impl HttpConfig {
    /// Default configuration listening on every interface at `port`
    pub fn with_port(port: u16) -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            ..Self::default()
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: None,
            read_timeout: None,
            write_timeout: None,
            max_header_bytes: DEFAULT_MAX_HEAD_BYTES,
        }
    }
}
