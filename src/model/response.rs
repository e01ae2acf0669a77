use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use parking_lot::Mutex;

use super::request::BodyStream;

/// Response status code: the HTTP codes plus client-side failure codes below 100.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResponseCode(u16);

impl ResponseCode {
    pub const UNKNOWN: Self = Self(0);
    pub const CONNECT_FAILURE: Self = Self(10);
    pub const RECEIVE_FAILURE: Self = Self(11);
    pub const SEND_FAILURE: Self = Self(12);
    pub const STREAM_REUSE_FAILURE: Self = Self(13);
    pub const STREAM_INPUT_FAILURE: Self = Self(14);
    pub const CONTENT_REUSE_FAILURE: Self = Self(15);
    pub const CONTENT_INPUT_FAILURE: Self = Self(16);
    pub const UNKNOWN_FAILURE: Self = Self(20);
    pub const CANCELED: Self = Self(21);

    pub const OK: Self = Self(200);
    pub const BAD_REQUEST: Self = Self(400);
    pub const NOT_FOUND: Self = Self(404);
    pub const REQUEST_TIMEOUT: Self = Self(408);
    pub const TOO_MANY_REQUESTS: Self = Self(429);
    pub const INTERNAL_SERVER_ERROR: Self = Self(500);
    pub const NOT_IMPLEMENTED: Self = Self(501);
    pub const BAD_GATEWAY: Self = Self(502);
    pub const SERVICE_UNAVAILABLE: Self = Self(503);
    pub const GATEWAY_TIMEOUT: Self = Self(504);

    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    pub const fn is_successful(self) -> bool {
        self.0 >= 200 && self.0 < 300
    }

    pub const fn is_client_error(self) -> bool {
        self.0 >= 400 && self.0 < 500
    }

    pub const fn is_server_error(self) -> bool {
        self.0 >= 500 && self.0 < 600
    }

    /// Codes produced by the transport when the exchange itself failed.
    pub const fn is_network_error(self) -> bool {
        matches!(self.0, 10..=12 | 408)
    }

    pub const fn is_stream_error(self) -> bool {
        matches!(self.0, 13..=16)
    }

    pub const fn is_unknown(self) -> bool {
        self.0 == Self::UNKNOWN.0 || self.0 == Self::UNKNOWN_FAILURE.0
    }
}

impl From<StatusCode> for ResponseCode {
    fn from(status: StatusCode) -> Self {
        Self(status.as_u16())
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::UNKNOWN => write!(f, "0 Unknown"),
            Self::CONNECT_FAILURE => write!(f, "10 ConnectFailure"),
            Self::RECEIVE_FAILURE => write!(f, "11 ReceiveFailure"),
            Self::SEND_FAILURE => write!(f, "12 SendFailure"),
            Self::STREAM_REUSE_FAILURE => write!(f, "13 StreamReuseFailure"),
            Self::STREAM_INPUT_FAILURE => write!(f, "14 StreamInputFailure"),
            Self::CONTENT_REUSE_FAILURE => write!(f, "15 ContentReuseFailure"),
            Self::CONTENT_INPUT_FAILURE => write!(f, "16 ContentInputFailure"),
            Self::UNKNOWN_FAILURE => write!(f, "20 UnknownFailure"),
            Self::CANCELED => write!(f, "21 Canceled"),
            code => match StatusCode::from_u16(code.0) {
                Ok(status) => write!(f, "{status}"),
                Err(_) => write!(f, "{}", code.0),
            },
        }
    }
}

/// A response body stream owned by whoever disposes the final result.
pub struct ResponseStream {
    stream: Mutex<Option<BodyStream>>,
    disposed: AtomicBool,
}

impl ResponseStream {
    pub fn new(stream: BodyStream) -> Self {
        Self {
            stream: Mutex::new(Some(stream)),
            disposed: AtomicBool::new(false),
        }
    }

    /// Hands the stream to the reader. Returns `None` once taken or disposed.
    pub fn take(&self) -> Option<BodyStream> {
        if self.is_disposed() {
            return None;
        }
        self.stream.lock().take()
    }

    /// Releases the stream. Returns `true` only for the call that actually released it.
    pub fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        drop(self.stream.lock().take());
        true
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseStream")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Trailing headers: either known up front or computed once the body was read.
#[derive(Clone)]
pub enum Trailers {
    Value(HeaderMap),
    Lazy(Arc<dyn Fn() -> HeaderMap + Send + Sync>),
}

impl Trailers {
    pub fn resolve(&self) -> HeaderMap {
        match self {
            Trailers::Value(headers) => headers.clone(),
            Trailers::Lazy(callback) => callback(),
        }
    }
}

impl fmt::Debug for Trailers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trailers::Value(headers) => f.debug_tuple("Value").field(headers).finish(),
            Trailers::Lazy(_) => f.write_str("Lazy(..)"),
        }
    }
}

/// An immutable response. Buffered content and a body stream are mutually exclusive.
#[derive(Clone, Debug)]
pub struct Response {
    code: ResponseCode,
    content: Option<Bytes>,
    headers: HeaderMap,
    stream: Option<Arc<ResponseStream>>,
    trailers: Option<Trailers>,
}

impl Response {
    pub fn new(code: ResponseCode) -> Self {
        Self {
            code,
            content: None,
            headers: HeaderMap::new(),
            stream: None,
            trailers: None,
        }
    }

    pub fn code(&self) -> ResponseCode {
        self.code
    }

    pub fn content(&self) -> Option<&Bytes> {
        self.content.as_ref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn stream(&self) -> Option<&Arc<ResponseStream>> {
        self.stream.as_ref()
    }

    pub fn trailers(&self) -> Option<&Trailers> {
        self.trailers.as_ref()
    }

    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    pub fn with_code(mut self, code: ResponseCode) -> Self {
        self.code = code;
        self
    }

    pub fn with_content(mut self, content: impl Into<Bytes>) -> Self {
        self.stream = None;
        self.content = Some(content.into());
        self
    }

    pub fn with_stream(self, stream: BodyStream) -> Self {
        self.with_shared_stream(Arc::new(ResponseStream::new(stream)))
    }

    pub fn with_shared_stream(mut self, stream: Arc<ResponseStream>) -> Self {
        self.content = None;
        self.stream = Some(stream);
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_trailers(mut self, trailers: HeaderMap) -> Self {
        self.trailers = Some(Trailers::Value(trailers));
        self
    }

    pub fn with_lazy_trailers(
        mut self,
        trailers: impl Fn() -> HeaderMap + Send + Sync + 'static,
    ) -> Self {
        self.trailers = Some(Trailers::Lazy(Arc::new(trailers)));
        self
    }

    /// Disposes the body stream, if any. Returns `true` when this call released it.
    pub fn dispose(&self) -> bool {
        self.stream
            .as_ref()
            .map(|stream| stream.dispose())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use futures::{StreamExt, stream};

    use super::*;

    #[test]
    fn content_and_stream_are_exclusive() {
        let response = Response::new(ResponseCode::OK)
            .with_content("body")
            .with_stream(stream::empty().boxed());
        assert!(response.content().is_none());
        assert!(response.has_stream());

        let response = response.with_content("again");
        assert!(!response.has_stream());
        assert_eq!(response.content().unwrap().as_ref(), b"again");
    }

    #[test]
    fn trailers_are_either_value_or_lazy() {
        let mut expected = HeaderMap::new();
        expected.insert("grpc-status", HeaderValue::from_static("0"));

        let lazy = expected.clone();
        let response = Response::new(ResponseCode::OK)
            .with_trailers(HeaderMap::new())
            .with_lazy_trailers(move || lazy.clone());

        assert!(matches!(response.trailers(), Some(Trailers::Lazy(_))));
        assert_eq!(response.trailers().unwrap().resolve(), expected);
    }

    #[test]
    fn stream_is_disposed_once() {
        let response = Response::new(ResponseCode::OK).with_stream(stream::empty().boxed());
        let clone = response.clone();

        assert!(response.dispose());
        assert!(!clone.dispose());
        assert!(response.stream().unwrap().take().is_none());
    }

    #[test]
    fn display_names_client_side_codes() {
        assert_eq!(ResponseCode::UNKNOWN_FAILURE.to_string(), "20 UnknownFailure");
        assert_eq!(ResponseCode::SERVICE_UNAVAILABLE.to_string(), "503 Service Unavailable");
        assert!(ResponseCode::CONNECT_FAILURE.is_network_error());
        assert!(ResponseCode::UNKNOWN.is_unknown());
    }
}
