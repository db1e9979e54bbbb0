use crate::notes::Notes;
use http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header};

/// Request extension (or response extension) that opts a response out of
/// compression.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompress;

/// Request extension marking an internal sub-request. Sub-request bodies are
/// embedded in another response and are never compressed on their own.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubRequest;

/// The request-side facts negotiation needs, captured before the request is
/// handed to the inner service.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    /// `Accept-Encoding` values, comma-joined. `None` if the header is absent.
    pub accept_encoding: Option<String>,
    /// The response carries headers only (a `HEAD` request).
    pub header_only: bool,
    /// The request is a sub-request.
    pub subrequest: bool,
    /// Compression was disabled for this request.
    pub no_compress: bool,
    /// Request line, for diagnostics.
    pub request_line: String,
    /// Annotations for this request.
    pub notes: Notes,
}

impl RequestInfo {
    /// Captures negotiation inputs from `req`.
    ///
    /// An existing [`Notes`] extension is reused so the caller can read the
    /// annotations afterwards.
    pub fn from_request<B>(req: &Request<B>) -> Self {
        Self {
            accept_encoding: joined(req.headers(), header::ACCEPT_ENCODING),
            header_only: req.method() == Method::HEAD,
            subrequest: req.extensions().get::<SubRequest>().is_some(),
            no_compress: req.extensions().get::<NoCompress>().is_some(),
            request_line: format!("{} {} {:?}", req.method(), req.uri(), req.version()),
            notes: req.extensions().get::<Notes>().cloned().unwrap_or_default(),
        }
    }
}

/// One request/response pair as seen by the filter.
#[derive(Debug, Clone)]
pub struct Exchange {
    /// Request-side inputs.
    pub request: RequestInfo,
    /// Response status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Headers that are sent even on error responses.
    pub err_headers: HeaderMap,
    /// Content coding set by the handler outside the header maps.
    pub content_encoding: Option<String>,
    /// Body bytes already handed to the next stage.
    pub bytes_sent: u64,
}

impl Exchange {
    /// Creates an exchange for a response with the given status and headers.
    pub fn new(request: RequestInfo, status: StatusCode, headers: HeaderMap) -> Self {
        Self {
            request,
            status,
            headers,
            err_headers: HeaderMap::new(),
            content_encoding: None,
            bytes_sent: 0,
        }
    }

    /// Moves the response headers out, leaving an empty map.
    pub fn take_headers(&mut self) -> HeaderMap {
        std::mem::take(&mut self.headers)
    }

    /// Returns the annotation map for this request.
    pub fn notes(&self) -> &Notes {
        &self.request.notes
    }
}

/// Joins every value of `name` with `,`, skipping values that are not visible ASCII.
pub(crate) fn joined(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    let values: Vec<&str> = headers
        .get_all(name)
        .iter()
        .filter_map(|v: &HeaderValue| v.to_str().ok())
        .collect();

    if values.is_empty() {
        None
    } else {
        Some(values.join(","))
    }
}
