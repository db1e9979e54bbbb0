//! zstd response compression middleware for Tower.
//!
//! This crate provides a Tower layer that streams HTTP response bodies through
//! zstd when the client's `Accept-Encoding` header allows it. Each body chunk
//! is compressed and flushed as it arrives, so streamed responses keep
//! reaching the client incrementally.
//!
//! # Example
//!
//! ```ignore
//! use http_response_zstd::{ZstdConfig, ZstdLayer};
//! use tower::ServiceBuilder;
//!
//! let config = ZstdConfig::new().level(19)?;
//! let service = ServiceBuilder::new()
//!     .layer(ZstdLayer::with_config(config))
//!     .service(my_service);
//! ```
//!
//! # Compression Rules
//!
//! The middleware will **not** compress responses when:
//! - The request carries the [`SubRequest`] extension
//! - The status is `204 No Content`
//! - The request or response carries the [`NoCompress`] extension
//! - `Content-Range` header is present (range responses)
//! - `Content-Encoding` already lists a coding other than `identity`,
//!   `7bit`, `8bit` or `binary`
//! - `Accept-Encoding` is absent, does not list `zstd`, or gives it `q=0`
//!
//! A `304 Not Modified` response gets the headers of a compressed response
//! but its (empty) body is left alone.
//!
//! # Response Modifications
//!
//! When compression is applied:
//! - `Content-Encoding` is set to `zstd`, or `zstd` is appended to an
//!   existing transfer-neutral coding
//! - `Content-Length` and `Content-MD5` headers are removed
//! - `ETag` gets a `-zstd` suffix, is left alone, or is removed, per [`EtagMode`]
//! - `Vary` header includes `Accept-Encoding`
//!
//! `Vary: Accept-Encoding` is also added when the response could have been
//! compressed but the client did not accept zstd.
//!
//! # Notes
//!
//! When the body ends, the input size, output size and ratio are written to
//! the request's [`Notes`] under the names configured with
//! [`ZstdConfig::note`].

#![deny(missing_docs)]

mod body;
/// Thin wrapper over a zstd streaming compression context.
pub mod codec;
mod config;
mod error;
mod exchange;
mod filter;
mod future;
mod layer;
/// Deciding whether a response gets zstd, and rewriting its headers when it does.
pub mod negotiate;
/// Per-request annotations recording compression totals.
pub mod notes;
mod segment;
mod service;

pub use body::ZstdBody;
pub use codec::{Mode, Session};
pub use config::{EtagMode, NoteKind, ZstdConfig};
pub use error::{Error, Result};
pub use exchange::{Exchange, NoCompress, RequestInfo, SubRequest};
pub use filter::{Filter, Phase, ZstdFilter};
pub use future::ResponseFuture;
pub use layer::ZstdLayer;
pub use negotiate::{Skip, Verdict};
pub use notes::{NoteNames, Notes};
pub use segment::{Downstream, Segment, Segments};
pub use service::ZstdService;
