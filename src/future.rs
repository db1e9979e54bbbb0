use crate::body::ZstdBody;
use crate::config::ZstdConfig;
use crate::exchange::{Exchange, NoCompress, RequestInfo};
use crate::filter::ZstdFilter;
use http::Response;
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

pin_project! {
    /// Future for zstd service responses.
    pub struct ResponseFuture<F> {
        #[pin]
        inner: F,
        request: Option<RequestInfo>,
        config: Arc<ZstdConfig>,
    }
}

impl<F> ResponseFuture<F> {
    pub(crate) fn new(inner: F, request: RequestInfo, config: Arc<ZstdConfig>) -> Self {
        Self {
            inner,
            request: Some(request),
            config,
        }
    }
}

impl<F, B, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<B>, E>>,
{
    type Output = Result<Response<ZstdBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        match this.inner.poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Ready(Ok(response)) => {
                let request = this.request.take().unwrap_or_default();
                let response = wrap_response(response, request, this.config.clone());
                Poll::Ready(Ok(response))
            }
        }
    }
}

/// Negotiates compression for `response` and wraps its body accordingly.
fn wrap_response<B>(
    response: Response<B>,
    mut request: RequestInfo,
    config: Arc<ZstdConfig>,
) -> Response<ZstdBody<B>> {
    let (mut parts, body) = response.into_parts();

    // Handlers can opt out on the response as well as on the request
    request.no_compress |= parts.extensions.get::<NoCompress>().is_some();
    parts.extensions.insert(request.notes.clone());

    let headers = std::mem::take(&mut parts.headers);
    let mut exchange = Exchange::new(request, parts.status, headers);
    let mut filter = ZstdFilter::new(config);
    let compress = filter.negotiate(&mut exchange);
    parts.headers = exchange.take_headers();

    let body = if compress {
        ZstdBody::compressed(body, filter, exchange)
    } else {
        ZstdBody::passthrough(body)
    };

    Response::from_parts(parts, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::CompressState;
    use crate::config::EtagMode;
    use crate::notes::Notes;
    use http::{StatusCode, header};

    fn config() -> Arc<ZstdConfig> {
        Arc::new(ZstdConfig::new().workers(0))
    }

    fn accepting(value: &str) -> RequestInfo {
        RequestInfo {
            accept_encoding: Some(value.to_string()),
            ..Default::default()
        }
    }

    fn make_response(body: &'static str) -> Response<&'static str> {
        Response::new(body)
    }

    fn make_response_with_headers<I>(body: &'static str, headers: I) -> Response<&'static str>
    where
        I: IntoIterator<Item = (&'static str, &'static str)>,
    {
        let mut response = Response::new(body);
        for (name, value) in headers {
            response
                .headers_mut()
                .append(name, header::HeaderValue::from_static(value));
        }
        response
    }

    fn is_compressed<B>(response: &Response<ZstdBody<B>>) -> bool {
        matches!(response.body(), ZstdBody::Compressed { .. })
    }

    #[test]
    fn test_compress_when_accept_encoding_present() {
        let response = make_response("hello world");
        let wrapped = wrap_response(response, accepting("gzip, zstd"), config());

        match wrapped.body() {
            ZstdBody::Compressed { state, .. } => {
                assert_eq!(state.state(), CompressState::Reading);
            }
            _ => panic!("Expected compressed body"),
        }

        assert_eq!(
            wrapped.headers().get(header::CONTENT_ENCODING).unwrap(),
            "zstd"
        );
        assert_eq!(
            wrapped.headers().get(header::VARY).unwrap(),
            "Accept-Encoding"
        );
    }

    #[test]
    fn test_no_compress_when_no_accept_encoding() {
        let response = make_response("hello world");
        let wrapped = wrap_response(response, RequestInfo::default(), config());

        assert!(!is_compressed(&wrapped));
        assert!(wrapped.headers().get(header::CONTENT_ENCODING).is_none());
        // The response could have been compressed, so it still varies
        assert_eq!(
            wrapped.headers().get(header::VARY).unwrap(),
            "Accept-Encoding"
        );
    }

    #[test]
    fn test_vary_when_zstd_not_accepted() {
        let response = make_response("hello world");
        let wrapped = wrap_response(response, accepting("gzip, br"), config());

        assert!(!is_compressed(&wrapped));
        assert_eq!(
            wrapped.headers().get(header::VARY).unwrap(),
            "Accept-Encoding"
        );
    }

    #[test]
    fn test_no_compress_when_quality_zero() {
        let response = make_response("hello world");
        let wrapped = wrap_response(response, accepting("zstd;q=0"), config());

        assert!(!is_compressed(&wrapped));
        assert!(wrapped.headers().get(header::CONTENT_ENCODING).is_none());
    }

    #[test]
    fn test_no_compress_when_content_encoding_present() {
        let response = make_response_with_headers("hello world", [("content-encoding", "gzip")]);
        let wrapped = wrap_response(response, accepting("zstd"), config());

        assert!(!is_compressed(&wrapped));
        assert_eq!(
            wrapped.headers().get(header::CONTENT_ENCODING).unwrap(),
            "gzip"
        );
    }

    #[test]
    fn test_identity_content_encoding_replaced() {
        let response =
            make_response_with_headers("hello world", [("content-encoding", "identity")]);
        let wrapped = wrap_response(response, accepting("zstd"), config());

        assert!(is_compressed(&wrapped));
        assert_eq!(
            wrapped.headers().get(header::CONTENT_ENCODING).unwrap(),
            "zstd"
        );
    }

    #[test]
    fn test_no_compress_range_response() {
        let response =
            make_response_with_headers("partial content", [("content-range", "bytes 0-99/200")]);
        let wrapped = wrap_response(response, accepting("zstd"), config());

        assert!(!is_compressed(&wrapped));
    }

    #[test]
    fn test_no_compress_no_content() {
        let mut response = make_response("");
        *response.status_mut() = StatusCode::NO_CONTENT;
        let wrapped = wrap_response(response, accepting("zstd"), config());

        assert!(!is_compressed(&wrapped));
        assert!(wrapped.headers().get(header::VARY).is_none());
    }

    #[test]
    fn test_no_compress_response_extension() {
        let mut response = make_response("hello world");
        response.extensions_mut().insert(NoCompress);
        let wrapped = wrap_response(response, accepting("zstd"), config());

        assert!(!is_compressed(&wrapped));
        assert!(wrapped.headers().get(header::CONTENT_ENCODING).is_none());
    }

    #[test]
    fn test_not_modified_headers_only() {
        let mut response = make_response_with_headers("", [("etag", "\"v1\"")]);
        *response.status_mut() = StatusCode::NOT_MODIFIED;
        let wrapped = wrap_response(response, accepting("zstd"), config());

        assert!(!is_compressed(&wrapped));
        assert_eq!(
            wrapped.headers().get(header::CONTENT_ENCODING).unwrap(),
            "zstd"
        );
        assert_eq!(wrapped.headers().get(header::ETAG).unwrap(), "\"v1-zstd\"");
    }

    #[test]
    fn test_length_and_digest_removed() {
        let response = make_response_with_headers(
            "hello world",
            [("content-length", "11"), ("content-md5", "XrY7u+Ae7tCTyyK7j1rNww==")],
        );
        let wrapped = wrap_response(response, accepting("zstd"), config());

        assert!(wrapped.headers().get(header::CONTENT_LENGTH).is_none());
        assert!(wrapped.headers().get("content-md5").is_none());
    }

    #[test]
    fn test_length_kept_when_not_compressing() {
        let response = make_response_with_headers("hello world", [("content-length", "11")]);
        let wrapped = wrap_response(response, RequestInfo::default(), config());

        assert_eq!(
            wrapped.headers().get(header::CONTENT_LENGTH).unwrap(),
            "11"
        );
    }

    #[test]
    fn test_etag_suffix_and_remove() {
        let response = make_response_with_headers("hello world", [("etag", "\"abc\"")]);
        let wrapped = wrap_response(response, accepting("zstd"), config());
        assert_eq!(wrapped.headers().get(header::ETAG).unwrap(), "\"abc-zstd\"");

        let removing = Arc::new(ZstdConfig::new().workers(0).etag_mode(EtagMode::Remove));
        let response = make_response_with_headers("hello world", [("etag", "\"abc\"")]);
        let wrapped = wrap_response(response, accepting("zstd"), removing);
        assert!(wrapped.headers().get(header::ETAG).is_none());
    }

    #[test]
    fn test_vary_header_appended() {
        let response = make_response_with_headers("hello world", [("vary", "origin")]);
        let wrapped = wrap_response(response, accepting("zstd"), config());

        let vary_values: Vec<_> = wrapped
            .headers()
            .get_all(header::VARY)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(vary_values, vec!["origin", "Accept-Encoding"]);
    }

    #[test]
    fn test_vary_header_star_not_modified() {
        let response = make_response_with_headers("hello world", [("vary", "*")]);
        let wrapped = wrap_response(response, accepting("zstd"), config());

        assert_eq!(wrapped.headers().get(header::VARY).unwrap(), "*");
    }

    #[test]
    fn test_notes_in_response_extensions() {
        let notes = Notes::new();
        let request = RequestInfo {
            notes: notes.clone(),
            ..accepting("zstd")
        };
        let wrapped = wrap_response(make_response("hello"), request, config());

        let attached = wrapped.extensions().get::<Notes>().unwrap();
        attached.set("k", "v");
        assert_eq!(notes.get("k").as_deref(), Some("v"));
    }
}
