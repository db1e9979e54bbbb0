use crate::codec;
use crate::config::ZstdConfig;
use crate::service::ZstdService;
use std::sync::Arc;
use tower::Layer;

/// A Tower layer that zstd-compresses HTTP response bodies.
///
/// This layer wraps services and compresses response bodies when the
/// client's `Accept-Encoding` header allows zstd.
#[derive(Debug, Clone)]
pub struct ZstdLayer {
    config: Arc<ZstdConfig>,
}

impl ZstdLayer {
    /// Creates a new layer with default settings.
    ///
    /// The default level is 15, with one worker thread per CPU.
    pub fn new() -> Self {
        Self::with_config(ZstdConfig::new())
    }

    /// Creates a new layer with the given settings.
    pub fn with_config(config: ZstdConfig) -> Self {
        tracing::info!(
            level = config.compression_level(),
            workers = config.worker_count(),
            zstd = codec::library_version(),
            "zstd compression enabled"
        );
        Self {
            config: Arc::new(config),
        }
    }

    /// Returns the settings services built by this layer will use.
    pub fn config(&self) -> &ZstdConfig {
        &self.config
    }
}

impl Default for ZstdLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for ZstdLayer {
    type Service = ZstdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ZstdService::new(inner, self.config.clone())
    }
}
