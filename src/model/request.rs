use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use bytes::Bytes;
use futures::stream::BoxStream;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri, header};
use parking_lot::Mutex;

use crate::error::ClusterError;

/// A boxed stream of body chunks, used for both request and response bodies.
pub type BodyStream = BoxStream<'static, std::io::Result<Bytes>>;

const NOT_CONSUMED: u8 = 0;
const CONSUMED: u8 = 1;

/// `NotConsumed -> Consumed`, taken at most once.
#[derive(Debug, Default)]
struct UsageState(AtomicU8);

impl UsageState {
    fn try_consume(&self) -> bool {
        self.0
            .compare_exchange(NOT_CONSUMED, CONSUMED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_consumed(&self) -> bool {
        self.0.load(Ordering::Acquire) == CONSUMED
    }
}

/// A request body stream that can be read exactly once.
pub struct StreamContent {
    state: UsageState,
    stream: Mutex<Option<BodyStream>>,
    length: Option<u64>,
}

impl StreamContent {
    pub fn new(stream: BodyStream, length: Option<u64>) -> Self {
        Self {
            state: UsageState::default(),
            stream: Mutex::new(Some(stream)),
            length,
        }
    }

    pub fn length(&self) -> Option<u64> {
        self.length
    }

    pub fn is_consumed(&self) -> bool {
        self.state.is_consumed()
    }

    /// Takes the stream. Every call after the first fails with [`ClusterError::StreamReused`].
    pub fn take(&self) -> Result<BodyStream, ClusterError> {
        if !self.state.try_consume() {
            return Err(ClusterError::StreamReused);
        }
        self.stream.lock().take().ok_or(ClusterError::StreamReused)
    }
}

impl fmt::Debug for StreamContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamContent")
            .field("length", &self.length)
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

/// Produces request body content on demand.
pub trait ContentProducer: Send + Sync + 'static {
    /// Reusable producers may be asked to produce any number of times.
    fn is_reusable(&self) -> bool {
        false
    }

    fn length(&self) -> Option<u64> {
        None
    }

    fn produce(&self) -> BodyStream;
}

/// A [`ContentProducer`] guarded by a single-use state unless it is reusable.
pub struct ProducerContent {
    producer: Arc<dyn ContentProducer>,
    state: UsageState,
}

impl ProducerContent {
    pub fn new(producer: Arc<dyn ContentProducer>) -> Self {
        Self {
            producer,
            state: UsageState::default(),
        }
    }

    pub fn length(&self) -> Option<u64> {
        self.producer.length()
    }

    pub fn is_reusable(&self) -> bool {
        self.producer.is_reusable()
    }

    pub fn is_consumed(&self) -> bool {
        !self.is_reusable() && self.state.is_consumed()
    }

    pub fn produce(&self) -> Result<BodyStream, ClusterError> {
        if !self.is_reusable() && !self.state.try_consume() {
            return Err(ClusterError::ContentReused);
        }
        Ok(self.producer.produce())
    }
}

impl fmt::Debug for ProducerContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerContent")
            .field("reusable", &self.is_reusable())
            .field("length", &self.length())
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

/// Request body. A request carries exactly one variant.
#[derive(Clone, Debug, Default)]
pub enum Content {
    #[default]
    Empty,
    Buffer(Bytes),
    Stream(Arc<StreamContent>),
    Composite(Arc<[Bytes]>),
    Producer(Arc<ProducerContent>),
}

impl Content {
    pub fn length(&self) -> Option<u64> {
        match self {
            Content::Empty => None,
            Content::Buffer(bytes) => Some(bytes.len() as u64),
            Content::Stream(stream) => stream.length(),
            Content::Composite(parts) => Some(parts.iter().map(|part| part.len() as u64).sum()),
            Content::Producer(producer) => producer.length(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Content::Empty)
    }

    /// Whether a single-use body has already been read.
    pub fn is_consumed(&self) -> bool {
        match self {
            Content::Stream(stream) => stream.is_consumed(),
            Content::Producer(producer) => producer.is_consumed(),
            _ => false,
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Content::Empty => "empty",
            Content::Buffer(_) => "buffer",
            Content::Stream(_) => "stream",
            Content::Composite(_) => "composite",
            Content::Producer(_) => "producer",
        }
    }
}

/// An immutable HTTP request. Mutators consume and return the request.
#[derive(Clone, Debug)]
pub struct Request {
    method: Method,
    url: Uri,
    headers: HeaderMap,
    content: Content,
}

impl Request {
    pub fn new(method: Method, url: Uri) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            content: Content::Empty,
        }
    }

    pub fn get(url: Uri) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: Uri) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: Uri) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn patch(url: Uri) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn delete(url: Uri) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn head(url: Uri) -> Self {
        Self::new(Method::HEAD, url)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Uri {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_url(mut self, url: Uri) -> Self {
        self.url = url;
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

    pub fn with_content(self, content: impl Into<Bytes>) -> Self {
        self.with_body(Content::Buffer(content.into()))
    }

    pub fn with_composite_content(self, parts: impl IntoIterator<Item = Bytes>) -> Self {
        self.with_body(Content::Composite(parts.into_iter().collect()))
    }

    pub fn with_stream(self, stream: BodyStream, length: Option<u64>) -> Self {
        self.with_body(Content::Stream(Arc::new(StreamContent::new(stream, length))))
    }

    pub fn with_producer(self, producer: Arc<dyn ContentProducer>) -> Self {
        self.with_body(Content::Producer(Arc::new(ProducerContent::new(producer))))
    }

    pub fn without_content(self) -> Self {
        self.with_body(Content::Empty)
    }

    fn with_body(mut self, content: Content) -> Self {
        self.headers.remove(header::CONTENT_LENGTH);
        if let Some(length) = content.length() {
            self.headers
                .insert(header::CONTENT_LENGTH, HeaderValue::from(length));
        }
        self.content = content;
        self
    }

    pub fn has_body(&self) -> bool {
        !self.content.is_empty()
    }

    pub fn has_consumed_body(&self) -> bool {
        self.content.is_consumed()
    }

    pub fn is_absolute(&self) -> bool {
        self.url.scheme().is_some() && self.url.authority().is_some()
    }

    /// Resolves this request's (relative) URL against a replica's base address.
    pub fn url_for_replica(&self, replica: &Uri) -> Result<Uri, http::Error> {
        let base = replica.path().trim_end_matches('/');
        let path = self.url.path().trim_start_matches('/');
        let mut path_and_query = format!("{base}/{path}");
        if let Some(query) = self.url.query() {
            path_and_query.push('?');
            path_and_query.push_str(query);
        }

        let mut builder = Uri::builder();
        if let Some(scheme) = replica.scheme_str() {
            builder = builder.scheme(scheme);
        }
        if let Some(authority) = replica.authority() {
            builder = builder.authority(authority.as_str());
        }
        builder.path_and_query(path_and_query).build()
    }
}
