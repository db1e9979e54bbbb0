use crate::body::ZstdBody;
use crate::config::ZstdConfig;
use crate::exchange::RequestInfo;
use crate::future::ResponseFuture;
use http::Request;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;

/// A Tower service that zstd-compresses HTTP response bodies.
#[derive(Debug, Clone)]
pub struct ZstdService<S> {
    inner: S,
    config: Arc<ZstdConfig>,
}

impl<S> ZstdService<S> {
    /// Creates a new service wrapping `inner` with the given settings.
    pub fn new(inner: S, config: Arc<ZstdConfig>) -> Self {
        Self { inner, config }
    }

    /// Returns the settings this service compresses with.
    pub fn config(&self) -> &ZstdConfig {
        &self.config
    }

    /// Returns a reference to the inner service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns a mutable reference to the inner service.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consumes this service, returning the inner service.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ZstdService<S>
where
    S: Service<Request<ReqBody>, Response = http::Response<ResBody>>,
{
    type Response = http::Response<ZstdBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let request = RequestInfo::from_request(&req);

        // The handler and the caller share one annotation map
        req.extensions_mut().insert(request.notes.clone());

        let inner = self.inner.call(req);

        ResponseFuture::new(inner, request, self.config.clone())
    }
}
