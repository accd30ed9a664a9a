use crate::reflect::EchoResponse;
use crate::reflect::json::from_slice_unbounded;
use crate::Result;
use bytes::Bytes;
use http::{Request, Response};

/// Common trait for echo servers
///
/// This trait defines the interface a running echo server exposes to
/// its owner: start it, and stop it again.
#[allow(async_fn_in_trait)]
pub trait EchoServerTrait {
    /// Starts the echo server and serves connections until shut down
    async fn run(&self) -> Result<()>;

    /// Returns a shutdown signal sender that can be used to gracefully shutdown the server
    fn shutdown_signal(&self) -> tokio::sync::broadcast::Sender<()>;
}

/// Common trait for echo clients
#[allow(async_fn_in_trait)]
pub trait EchoClient {
    /// Sends a request and returns the raw response
    async fn send(&mut self, request: Request<Bytes>) -> Result<Response<Bytes>>;

    /// Sends a request and decodes the reflected document from the response body
    async fn reflect(&mut self, request: Request<Bytes>) -> Result<EchoResponse> {
        let response = self.send(request).await?;
        Ok(from_slice_unbounded(response.body())?)
    }
}
