use std::io;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while configuring or running the zstd filter.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The zstd compression context could not be allocated.
    #[error("failed to create zstd compression context: {0}")]
    EngineInit(#[source] io::Error),

    /// zstd reported a fault while compressing.
    #[error("error while processing segment: {0}")]
    Compression(String),

    /// A tuning parameter was rejected by zstd. The session keeps running
    /// with the library default for that parameter.
    #[error("{parameter}({value}): {reason}")]
    Parameter {
        /// Name of the zstd parameter.
        parameter: &'static str,
        /// Value that was rejected.
        value: i64,
        /// zstd's diagnostic.
        reason: String,
    },

    /// Invalid configuration value.
    #[error("{0}")]
    Config(String),

    /// The next stage of the pipeline refused the forwarded segments.
    #[error("downstream stage failed: {0}")]
    Downstream(String),

    /// The filter was invoked after it had already finished or failed.
    #[error("zstd filter invoked after end of stream")]
    Finalized,
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::EngineInit(e) => e,
            other => io::Error::other(other),
        }
    }
}
