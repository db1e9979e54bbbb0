use crate::codec::CONTENT_ENCODING;
use crate::config::{EtagMode, ZstdConfig};
use crate::exchange::{Exchange, joined};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};

/// Suffix spliced into strong and weak ETags of compressed responses.
pub const ETAG_SUFFIX: &str = "-zstd";

static CONTENT_MD5: HeaderName = HeaderName::from_static("content-md5");

/// Codings that leave the body bytes as they are.
const IDENTITY_CODINGS: [&str; 4] = ["identity", "7bit", "8bit", "binary"];

/// Why a response is left uncompressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    /// The request is a sub-request.
    SubRequest,
    /// `204 No Content`.
    NoContent,
    /// Compression was disabled through [`NoCompress`](crate::NoCompress).
    Excluded,
    /// The response is a byte range.
    PartialContent,
    /// The body already carries a content coding.
    AlreadyEncoded,
    /// The request has no `Accept-Encoding`.
    NoAcceptEncoding,
    /// `Accept-Encoding` does not list zstd, or gives it a zero quality.
    NotAcceptable,
}

impl Skip {
    /// Returns whether `Vary: Accept-Encoding` applies to this outcome.
    ///
    /// Once a response has been found eligible apart from the client's
    /// preferences, its representation depends on `Accept-Encoding`.
    pub fn varies(self) -> bool {
        matches!(self, Skip::NoAcceptEncoding | Skip::NotAcceptable)
    }
}

/// Outcome of negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Leave the response alone.
    Skip(Skip),
    /// Compress the response.
    Compress {
        /// Replace `Content-Encoding` instead of appending to it.
        replace_encoding: bool,
        /// Only headers are sent (`304 Not Modified`); no body is compressed.
        headers_only: bool,
    },
}

impl Verdict {
    /// Returns whether a compression stream is needed.
    pub fn streams(&self) -> bool {
        matches!(
            self,
            Verdict::Compress {
                headers_only: false,
                ..
            }
        )
    }
}

/// Decides whether the response should be compressed, without touching it.
///
/// The decision depends only on the state of `exchange`, so evaluating the
/// same state twice gives the same answer.
pub fn evaluate(exchange: &Exchange) -> Verdict {
    let request = &exchange.request;

    if request.subrequest {
        return Verdict::Skip(Skip::SubRequest);
    }
    if exchange.status == StatusCode::NO_CONTENT {
        return Verdict::Skip(Skip::NoContent);
    }
    if request.no_compress {
        return Verdict::Skip(Skip::Excluded);
    }
    if exchange.headers.contains_key(header::CONTENT_RANGE) {
        return Verdict::Skip(Skip::PartialContent);
    }

    let encoding = effective_encoding(exchange);
    if encoding.as_deref().is_some_and(is_encoded) {
        return Verdict::Skip(Skip::AlreadyEncoded);
    }

    let Some(accept) = request.accept_encoding.as_deref() else {
        return Verdict::Skip(Skip::NoAcceptEncoding);
    };

    let Some(quality) = find_codec(accept) else {
        return Verdict::Skip(Skip::NotAcceptable);
    };
    tracing::trace!(token = CONTENT_ENCODING, q = quality.unwrap_or(""), "accept-encoding");

    if quality.is_some_and(is_zero_quality) {
        return Verdict::Skip(Skip::NotAcceptable);
    }

    Verdict::Compress {
        replace_encoding: encoding
            .as_deref()
            .is_none_or(|e| e.eq_ignore_ascii_case("identity")),
        headers_only: exchange.status == StatusCode::NOT_MODIFIED,
    }
}

/// Applies the header changes that go with `verdict`.
pub fn apply(verdict: &Verdict, config: &ZstdConfig, exchange: &mut Exchange) {
    match *verdict {
        Verdict::Skip(skip) => {
            if skip.varies() {
                merge_vary(&mut exchange.headers);
            }
        }
        Verdict::Compress {
            replace_encoding, ..
        } => {
            merge_vary(&mut exchange.headers);
            set_content_encoding(exchange, replace_encoding);

            // Length and digest describe the identity body
            exchange.headers.remove(header::CONTENT_LENGTH);
            exchange.headers.remove(&CONTENT_MD5);

            alter_etag(&mut exchange.headers, config.etag_policy());
        }
    }
}

/// Returns `etag` with [`ETAG_SUFFIX`] inserted before the closing quote, or
/// `None` if the value is too short or not quoted.
pub fn suffixed_etag(etag: &str) -> Option<String> {
    if etag.len() > 2 && etag.ends_with('"') {
        Some(format!("{}{}\"", &etag[..etag.len() - 1], ETAG_SUFFIX))
    } else {
        None
    }
}

/// Adds `Accept-Encoding` to the `Vary` header unless it is already covered.
pub(crate) fn merge_vary(headers: &mut HeaderMap) {
    for vary in headers.get_all(header::VARY) {
        if let Ok(vary_str) = vary.to_str() {
            let covered = vary_str.split(',').any(|v| {
                let v = v.trim();
                v == "*" || v.eq_ignore_ascii_case("accept-encoding")
            });
            if covered {
                return;
            }
        }
    }

    headers.append(
        header::VARY,
        HeaderValue::from_static("Accept-Encoding"),
    );
}

/// Joins the header, error-header and explicit content codings.
fn effective_encoding(exchange: &Exchange) -> Option<String> {
    let parts = [
        joined(&exchange.headers, header::CONTENT_ENCODING),
        joined(&exchange.err_headers, header::CONTENT_ENCODING),
        exchange.content_encoding.clone(),
    ];
    let parts: Vec<String> = parts.into_iter().flatten().collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(","))
    }
}

/// Checks whether `encoding` lists a coding that transforms the body.
fn is_encoded(encoding: &str) -> bool {
    encoding
        .split(',')
        .map(|token| token.split(';').next().unwrap_or("").trim())
        .filter(|token| !token.is_empty())
        .any(|token| !IDENTITY_CODINGS.contains(&token))
}

/// Finds the first zstd entry of an `Accept-Encoding` value.
///
/// Returns `None` if zstd is not listed, otherwise its first parameter, if any.
fn find_codec(accept: &str) -> Option<Option<&str>> {
    accept.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let coding = parts.next().unwrap_or("").trim();
        coding
            .eq_ignore_ascii_case(CONTENT_ENCODING)
            .then(|| parts.next().map(str::trim))
    })
}

/// Zero quality is matched on the text of the parameter: any prefix of
/// `q=0.000` of at least three characters.
fn is_zero_quality(param: &str) -> bool {
    param.len() >= 3 && "q=0.000".starts_with(param)
}

fn set_content_encoding(exchange: &mut Exchange, replace: bool) {
    let existing = joined(&exchange.headers, header::CONTENT_ENCODING);
    let value = match existing {
        Some(existing) if !replace => format!("{existing}, {CONTENT_ENCODING}"),
        _ => CONTENT_ENCODING.to_string(),
    };

    let header_value = HeaderValue::from_str(&value)
        .unwrap_or_else(|_| HeaderValue::from_static(CONTENT_ENCODING));
    exchange
        .headers
        .insert(header::CONTENT_ENCODING, header_value);

    if exchange.content_encoding.is_some() {
        exchange.content_encoding = Some(value);
    }
}

fn alter_etag(headers: &mut HeaderMap, mode: EtagMode) {
    match mode {
        EtagMode::NoChange => {}
        EtagMode::Remove => {
            headers.remove(header::ETAG);
        }
        EtagMode::AddSuffix => {
            let tagged = headers
                .get(header::ETAG)
                .and_then(|v| v.to_str().ok())
                .and_then(suffixed_etag)
                .and_then(|v| HeaderValue::from_str(&v).ok());
            if let Some(tagged) = tagged {
                headers.insert(header::ETAG, tagged);
            }
        }
    }
}
