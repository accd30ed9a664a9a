use super::codec::RequestTarget;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Request, Response, StatusCode};
use std::future::Future;
use std::sync::Arc;

/// An asynchronous request handler
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, request: Request<Bytes>) -> Response<Bytes>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Request<Bytes>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response<Bytes>> + Send + 'static,
{
    async fn call(&self, request: Request<Bytes>) -> Response<Bytes> {
        (self)(request).await
    }
}

/// Path-pattern router
///
/// A pattern ending in `/` matches the whole subtree below it, any other
/// pattern matches only that exact path. When several patterns match, the
/// longest one wins, so `/` acts as the catch-all.
///
/// # Examples
///
/// ```rust
/// use reflectsrv::http::Router;
/// use reflectsrv::ReflectHandler;
///
/// let router = Router::new().route("/", ReflectHandler);
/// assert!(router.has_route("/"));
/// ```
#[derive(Clone, Default)]
pub struct Router {
    routes: Vec<(String, Arc<dyn Handler>)>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `pattern`, replacing any handler already there
    pub fn route<H: Handler>(mut self, pattern: &str, handler: H) -> Self {
        let handler: Arc<dyn Handler> = Arc::new(handler);
        match self.routes.iter_mut().find(|(p, _)| p == pattern) {
            Some(entry) => entry.1 = handler,
            None => self.routes.push((pattern.to_string(), handler)),
        }
        self
    }

    pub fn has_route(&self, pattern: &str) -> bool {
        self.routes.iter().any(|(p, _)| p == pattern)
    }

    fn lookup(&self, path: &str) -> Option<&Arc<dyn Handler>> {
        self.routes
            .iter()
            .filter(|(pattern, _)| pattern_matches(pattern, path))
            .max_by_key(|(pattern, _)| pattern.len())
            .map(|(_, handler)| handler)
    }

    /// Routes a request to its handler, answering 404 when nothing matches
    pub async fn dispatch(&self, request: Request<Bytes>) -> Response<Bytes> {
        let handler = {
            let path = request
                .extensions()
                .get::<RequestTarget>()
                .map(|target| target.split().0)
                .unwrap_or_else(|| request.uri().path());
            // `*` and authority-form targets fall through to the root pattern
            let path = if path.starts_with('/') { path } else { "/" };
            self.lookup(path).cloned()
        };

        match handler {
            Some(handler) => handler.call(request).await,
            None => not_found(),
        }
    }
}

fn pattern_matches(pattern: &str, path: &str) -> bool {
    if pattern.ends_with('/') {
        path.starts_with(pattern)
    } else {
        path == pattern
    }
}

fn not_found() -> Response<Bytes> {
    let mut response = Response::new(Bytes::from_static(b"404 page not found\n"));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response.headers_mut().insert(
        CONTENT_TYPE,
        http::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
