//! Request reflection
//!
//! Turns a received request into an [`EchoResponse`] and serves it back
//! as `application/json`.

pub mod json;
pub mod response;

pub use response::EchoResponse;

use crate::http::codec::{RequestTarget, split_target};
use crate::http::header::canonical_name;
use crate::http::router::Handler;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, Request, Response, StatusCode};
use std::collections::BTreeMap;
use tracing::error;

/// Describes `request` as an [`EchoResponse`]
///
/// The body is decoded lossily, so invalid UTF-8 never fails the echo.
/// `json` is filled only when the decoded body is valid JSON nested at
/// most [`json::MAX_JSON_DEPTH`] deep.
pub fn reflect(request: &Request<Bytes>) -> EchoResponse {
    let url = match request.extensions().get::<RequestTarget>() {
        Some(target) => target.0.clone(),
        None => request.uri().to_string(),
    };
    let (path, query) = split_target(&url);
    let path = path.to_string();
    let args = query.map(collect_args).filter(|args| !args.is_empty());

    let body = (!request.body().is_empty())
        .then(|| String::from_utf8_lossy(request.body()).into_owned());
    let json = body.as_deref().and_then(json::parse_body);

    EchoResponse {
        method: request.method().as_str().to_string(),
        url,
        path,
        headers: collect_headers(request.headers()),
        args,
        body,
        json,
    }
}

/// Folds headers into one entry per canonical name, joining repeats with `", "`
fn collect_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut collected: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        collected
            .entry(canonical_name(name.as_str()))
            .and_modify(|joined| {
                joined.push_str(", ");
                joined.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    collected
}

fn collect_args(query: &str) -> BTreeMap<String, Vec<String>> {
    let mut args: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
        args.entry(name.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    args
}

/// Handler that answers every request with its own reflection
#[derive(Debug, Clone, Copy, Default)]
pub struct ReflectHandler;

#[async_trait]
impl Handler for ReflectHandler {
    async fn call(&self, request: Request<Bytes>) -> Response<Bytes> {
        let mut encoded = match serde_json::to_vec(&reflect(&request)) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(error = %e, "Failed to encode echo response");
                b"{}".to_vec()
            }
        };
        encoded.push(b'\n');

        let mut response = Response::new(Bytes::from(encoded));
        *response.status_mut() = StatusCode::OK;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}
