use super::header::canonical_name;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, EXPECT, TRANSFER_ENCODING};
use http::request::Parts;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, Uri, Version};
use httparse::Status;
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Interim response owed to clients that sent `Expect: 100-continue`
pub const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Default cap on the request line plus header fields
pub const DEFAULT_MAX_HEAD_BYTES: usize = 1 << 20;

const INITIAL_HEADER_SLOTS: usize = 64;

/// The request target exactly as it appeared on the request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget(pub String);

impl RequestTarget {
    /// Splits the target into its path and raw query string
    ///
    /// Origin-form targets split at the first `?`. Absolute-form targets
    /// drop the scheme and authority first. `*` and authority-form targets
    /// are returned whole as the path.
    pub fn split(&self) -> (&str, Option<&str>) {
        split_target(&self.0)
    }
}

/// Splits a raw request target into its path and raw query string
pub fn split_target(target: &str) -> (&str, Option<&str>) {
    let origin = if target.starts_with('/') {
        target
    } else if let Some(idx) = target.find("://") {
        let rest = &target[idx + 3..];
        match rest.find(['/', '?']) {
            Some(i) => &rest[i..],
            None => "",
        }
    } else {
        target
    };

    match origin.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (origin, None),
    }
}

/// Marks a request whose body ended early because the peer stopped sending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyTruncated;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("HTTP parsing error: {0}")]
    Parse(String),
    #[error("Invalid Content-Length header")]
    InvalidContentLength,
    #[error("Invalid chunked body: {0}")]
    InvalidChunk(String),
    #[error("Request head exceeds {0} bytes")]
    HeadTooLarge(usize),
}

/// HTTP/1.x request decoder and response encoder
///
/// Decodes complete requests, body included, from a byte stream. Bodies
/// are framed by `Transfer-Encoding: chunked` or `Content-Length`; a
/// request with neither has an empty body.
pub struct HttpCodec {
    max_head_bytes: usize,
    state: DecodeState,
    continue_pending: bool,
}

enum DecodeState {
    Head,
    Body(PendingBody),
}

struct PendingBody {
    parts: Parts,
    framing: Framing,
    body: BytesMut,
}

#[derive(Debug, PartialEq, Eq)]
enum Framing {
    /// Bytes still to read
    Length(usize),
    Chunked(ChunkState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(usize),
    DataEnd,
    Trailer,
}

impl HttpCodec {
    /// Creates a codec that rejects request heads longer than `max_head_bytes`
    pub fn new(max_head_bytes: usize) -> Self {
        Self {
            max_head_bytes,
            state: DecodeState::Head,
            continue_pending: false,
        }
    }

    /// Returns true once per request that asked for `100 Continue` and whose
    /// body has not arrived yet
    pub fn take_continue(&mut self) -> bool {
        std::mem::take(&mut self.continue_pending)
    }

    /// Whether a request head has been parsed and its body is still incomplete
    pub fn in_body(&self) -> bool {
        matches!(self.state, DecodeState::Body(_))
    }

    fn decode_head(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<(Parts, Framing)>, CodecError> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut slots = INITIAL_HEADER_SLOTS;
        let (parts, head_len) = loop {
            let mut headers = vec![httparse::EMPTY_HEADER; slots];
            let mut req = httparse::Request::new(&mut headers);

            match req.parse(&src[..]) {
                Ok(Status::Complete(len)) if len > self.max_head_bytes => {
                    return Err(CodecError::HeadTooLarge(self.max_head_bytes));
                }
                Ok(Status::Complete(len)) => break (request_parts(&req)?, len),
                Ok(Status::Partial) if src.len() > self.max_head_bytes => {
                    return Err(CodecError::HeadTooLarge(self.max_head_bytes));
                }
                Ok(Status::Partial) => return Ok(None),
                // Slot count is bounded by the number of header lines buffered
                Err(httparse::Error::TooManyHeaders) => slots *= 2,
                Err(e) => {
                    return Err(CodecError::Parse(format!(
                        "Failed to parse request head: {e}"
                    )));
                }
            }
        };
        src.advance(head_len);

        let framing = body_framing(&parts.headers)?;
        self.continue_pending = parts.version == Version::HTTP_11
            && framing != Framing::Length(0)
            && expects_continue(&parts.headers);

        Ok(Some((parts, framing)))
    }
}

fn request_parts(req: &httparse::Request<'_, '_>) -> Result<Parts, CodecError> {
    let method = req
        .method
        .ok_or_else(|| CodecError::Parse("missing method".to_string()))?;
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| CodecError::Parse(format!("invalid method {method:?}")))?;
    let target = req
        .path
        .ok_or_else(|| CodecError::Parse("missing request target".to_string()))?;
    let version = match req.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    let (mut parts, ()) = Request::builder()
        .method(method)
        .uri(target.parse::<Uri>().unwrap_or_default())
        .version(version)
        .body(())
        .map_err(|e| CodecError::Parse(e.to_string()))?
        .into_parts();

    for header in req.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(|_| {
            CodecError::Parse(format!("invalid header name {:?}", header.name))
        })?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|_| CodecError::Parse(format!("invalid value for header {name}")))?;
        parts.headers.append(name, value);
    }
    parts.extensions.insert(RequestTarget(target.to_owned()));

    Ok(parts)
}

impl Default for HttpCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HEAD_BYTES)
    }
}

impl PendingBody {
    /// Moves body bytes out of `src`; returns true when the body is complete
    fn fill(&mut self, src: &mut BytesMut) -> Result<bool, CodecError> {
        loop {
            match &mut self.framing {
                Framing::Length(remaining) => {
                    let take = (*remaining).min(src.len());
                    self.body.extend_from_slice(&src.split_to(take));
                    *remaining -= take;
                    return Ok(*remaining == 0);
                }
                Framing::Chunked(state) => match *state {
                    ChunkState::Size => match httparse::parse_chunk_size(&src[..]) {
                        Ok(Status::Complete((consumed, size))) => {
                            src.advance(consumed);
                            let size = usize::try_from(size).map_err(|_| {
                                CodecError::InvalidChunk("chunk size overflows".to_string())
                            })?;
                            *state = if size == 0 {
                                ChunkState::Trailer
                            } else {
                                ChunkState::Data(size)
                            };
                        }
                        Ok(Status::Partial) => return Ok(false),
                        Err(_) => {
                            return Err(CodecError::InvalidChunk(
                                "invalid chunk size line".to_string(),
                            ));
                        }
                    },
                    ChunkState::Data(remaining) => {
                        let take = remaining.min(src.len());
                        if take == 0 {
                            return Ok(false);
                        }
                        self.body.extend_from_slice(&src.split_to(take));
                        *state = if take == remaining {
                            ChunkState::DataEnd
                        } else {
                            ChunkState::Data(remaining - take)
                        };
                    }
                    ChunkState::DataEnd => {
                        if src.len() < 2 {
                            return Ok(false);
                        }
                        if &src[..2] != b"\r\n" {
                            return Err(CodecError::InvalidChunk(
                                "missing CRLF after chunk data".to_string(),
                            ));
                        }
                        src.advance(2);
                        *state = ChunkState::Size;
                    }
                    // Trailer fields are read and discarded
                    ChunkState::Trailer => {
                        let Some(line_len) = src.windows(2).position(|w| w == b"\r\n") else {
                            return Ok(false);
                        };
                        src.advance(line_len + 2);
                        if line_len == 0 {
                            return Ok(true);
                        }
                    }
                },
            }
        }
    }

    fn into_request(self, truncated: bool) -> Request<Bytes> {
        let mut request = Request::from_parts(self.parts, self.body.freeze());
        if truncated {
            request.extensions_mut().insert(BodyTruncated);
        }
        request
    }
}

fn expects_continue(headers: &HeaderMap) -> bool {
    headers
        .get(EXPECT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("100-continue"))
}

fn body_framing(headers: &HeaderMap) -> Result<Framing, CodecError> {
    if headers.contains_key(TRANSFER_ENCODING) {
        let chunked = headers
            .get_all(TRANSFER_ENCODING)
            .iter()
            .last()
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit(',').next())
            .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
        return if chunked {
            Ok(Framing::Chunked(ChunkState::Size))
        } else {
            Err(CodecError::Parse("unsupported transfer encoding".to_string()))
        };
    }

    let mut length: Option<u64> = None;
    for value in headers.get_all(CONTENT_LENGTH) {
        let value = value.to_str().map_err(|_| CodecError::InvalidContentLength)?;
        for item in value.split(',') {
            let item = item.trim();
            if item.is_empty() || !item.bytes().all(|b| b.is_ascii_digit()) {
                return Err(CodecError::InvalidContentLength);
            }
            let parsed: u64 = item.parse().map_err(|_| CodecError::InvalidContentLength)?;
            if length.is_some_and(|l| l != parsed) {
                return Err(CodecError::InvalidContentLength);
            }
            length = Some(parsed);
        }
    }

    let length =
        usize::try_from(length.unwrap_or(0)).map_err(|_| CodecError::InvalidContentLength)?;
    Ok(Framing::Length(length))
}

impl Decoder for HttpCodec {
    type Item = Request<Bytes>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let DecodeState::Head = self.state {
            let Some((parts, framing)) = self.decode_head(src)? else {
                return Ok(None);
            };
            self.state = DecodeState::Body(PendingBody {
                parts,
                framing,
                body: BytesMut::new(),
            });
        }

        let DecodeState::Body(pending) = &mut self.state else {
            return Ok(None);
        };
        if !pending.fill(src)? {
            return Ok(None);
        }

        self.continue_pending = false;
        match std::mem::replace(&mut self.state, DecodeState::Head) {
            DecodeState::Body(pending) => Ok(Some(pending.into_request(false))),
            DecodeState::Head => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(request) = self.decode(src)? {
            return Ok(Some(request));
        }

        self.continue_pending = false;
        match std::mem::replace(&mut self.state, DecodeState::Head) {
            DecodeState::Body(pending) => Ok(Some(pending.into_request(true))),
            DecodeState::Head => {
                // A head cut off by EOF is dropped
                src.clear();
                Ok(None)
            }
        }
    }
}

impl Encoder<Response<Bytes>> for HttpCodec {
    type Error = CodecError;

    fn encode(&mut self, response: Response<Bytes>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (parts, body) = response.into_parts();
        let status = parts.status;

        dst.reserve(128 + body.len());
        dst.put_slice(b"HTTP/1.1 ");
        dst.put_slice(status.as_str().as_bytes());
        dst.put_u8(b' ');
        dst.put_slice(status.canonical_reason().unwrap_or("").as_bytes());
        dst.put_slice(b"\r\n");

        for (name, value) in &parts.headers {
            dst.put_slice(canonical_name(name.as_str()).as_bytes());
            dst.put_slice(b": ");
            dst.put_slice(value.as_bytes());
            dst.put_slice(b"\r\n");
        }
        if !parts.headers.contains_key(CONTENT_LENGTH) {
            dst.put_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
        }
        dst.put_slice(b"\r\n");
        dst.put_slice(&body);

        Ok(())
    }
}
