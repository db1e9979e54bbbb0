use crate::error::{Error, Result};
use bytes::{Bytes, BytesMut};
use std::io;
use std::ops::RangeInclusive;
use zstd::zstd_safe::zstd_sys::ZSTD_EndDirective;
use zstd::zstd_safe::{self, CCtx, CParameter, ErrorCode, InBuffer, OutBuffer};

/// Token used both to match `Accept-Encoding` and as the `Content-Encoding` value.
pub const CONTENT_ENCODING: &str = "zstd";

/// Compression level used when none is configured.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 15;

const OUTPUT_BUFFER_SIZE: usize = 8 * 1024; // 8KB minimum scratch

/// Returns the range of compression levels supported by the linked zstd.
pub fn level_range() -> RangeInclusive<i32> {
    zstd::compression_level_range()
}

/// Returns the version string of the linked zstd library.
pub fn library_version() -> &'static str {
    zstd_safe::version_string()
}

/// How far the engine should push buffered data on a [`Session::compress`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Consume input, emit whatever the engine chooses to emit.
    Continue,
    /// Consume input and emit everything needed to decode it so far.
    Flush,
    /// Consume input and close the frame.
    End,
}

/// A single-use zstd compression stream.
///
/// A session owns one compression context. The context is released by
/// [`Session::destroy`] or when the session is dropped, whichever comes first.
pub struct Session {
    ctx: Option<CCtx<'static>>,
    scratch: Vec<u8>,
}

impl Session {
    /// Allocates a compression context and applies the level and worker count.
    ///
    /// Only the allocation itself is fatal. A rejected parameter is logged and
    /// the context keeps zstd's default for it.
    pub fn create(level: i32, workers: u32) -> Result<Self> {
        Self::with_context(CCtx::try_create(), level, workers)
    }

    /// Builds a session around a freshly allocated context, or fails with
    /// [`Error::EngineInit`] if there is none.
    pub(crate) fn with_context(
        ctx: Option<CCtx<'static>>,
        level: i32,
        workers: u32,
    ) -> Result<Self> {
        let Some(mut ctx) = ctx else {
            return Err(Error::EngineInit(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "zstd returned no compression context",
            )));
        };

        if let Err(code) = ctx.set_parameter(CParameter::CompressionLevel(level)) {
            let err = Error::Parameter {
                parameter: "ZSTD_c_compressionLevel",
                value: level.into(),
                reason: zstd_safe::get_error_name(code).to_string(),
            };
            tracing::error!(error = %err, "failed to set zstd compression level");
        }

        set_workers(&mut ctx, workers);

        Ok(Self {
            ctx: Some(ctx),
            scratch: Vec::new(),
        })
    }

    /// Compresses `input` and returns all output the engine produced for `mode`.
    ///
    /// Every byte of `input` is consumed before this returns. For
    /// [`Mode::Flush`] and [`Mode::End`] the engine is drained until it reports
    /// nothing left to emit.
    pub fn compress(&mut self, mode: Mode, input: &[u8]) -> Result<Bytes> {
        let Some(ctx) = self.ctx.as_mut() else {
            return Err(Error::Compression("session already released".to_string()));
        };

        let size = zstd_safe::compress_bound(input.len()).max(OUTPUT_BUFFER_SIZE);
        if self.scratch.len() < size {
            self.scratch.resize(size, 0);
        }

        let mut input_buf = InBuffer::around(input);
        let mut compressed = BytesMut::new();

        // Keep encoding until all input is consumed
        while input_buf.pos() < input.len() {
            let written = {
                let mut output = OutBuffer::around(&mut self.scratch[..]);
                ctx.compress_stream2(
                    &mut output,
                    &mut input_buf,
                    ZSTD_EndDirective::ZSTD_e_continue,
                )
                .map_err(engine_error)?;
                output.pos()
            };
            compressed.extend_from_slice(&self.scratch[..written]);
        }

        if mode != Mode::Continue {
            loop {
                let (remaining, written) = {
                    let mut output = OutBuffer::around(&mut self.scratch[..]);
                    let remaining = drain(ctx, mode, &mut output).map_err(engine_error)?;
                    (remaining, output.pos())
                };
                compressed.extend_from_slice(&self.scratch[..written]);
                if remaining == 0 {
                    break;
                }
            }
        }

        Ok(compressed.freeze())
    }

    /// Releases the compression context. Calling this more than once is a no-op.
    pub fn destroy(&mut self) {
        if self.ctx.take().is_some() {
            self.scratch = Vec::new();
        }
    }

    /// Returns whether the context has been released.
    pub fn is_released(&self) -> bool {
        self.ctx.is_none()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("released", &self.is_released())
            .finish()
    }
}

fn drain(
    ctx: &mut CCtx<'static>,
    mode: Mode,
    output: &mut OutBuffer<'_, [u8]>,
) -> std::result::Result<usize, ErrorCode> {
    match mode {
        Mode::Continue => Ok(0),
        Mode::Flush => ctx.flush_stream(output),
        Mode::End => ctx.end_stream(output),
    }
}

fn engine_error(code: ErrorCode) -> Error {
    Error::Compression(zstd_safe::get_error_name(code).to_string())
}

#[cfg(feature = "zstdmt")]
fn set_workers(ctx: &mut CCtx<'static>, workers: u32) {
    if let Err(code) = ctx.set_parameter(CParameter::NbWorkers(workers)) {
        let err = Error::Parameter {
            parameter: "ZSTD_c_nbWorkers",
            value: workers.into(),
            reason: zstd_safe::get_error_name(code).to_string(),
        };
        tracing::warn!(error = %err, "failed to set zstd worker count");
    }
}

#[cfg(not(feature = "zstdmt"))]
fn set_workers(_ctx: &mut CCtx<'static>, workers: u32) {
    if workers > 0 {
        tracing::warn!(workers, "built without zstdmt, compressing single-threaded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noisy(len: usize) -> Vec<u8> {
        let mut state = 0x2545_f491_u32;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect()
    }

    #[test]
    fn test_level_range_contains_default() {
        assert!(level_range().contains(&DEFAULT_COMPRESSION_LEVEL));
    }

    #[test]
    fn test_end_produces_complete_frame() {
        let mut session = Session::create(3, 0).unwrap();
        let input = b"hello hello hello hello hello world".repeat(20);

        let mut out = session.compress(Mode::Continue, &input).unwrap().to_vec();
        out.extend_from_slice(&session.compress(Mode::End, &[]).unwrap());

        assert_eq!(zstd::stream::decode_all(out.as_slice()).unwrap(), input);
    }

    #[test]
    fn test_flush_emits_output() {
        let mut session = Session::create(3, 0).unwrap();
        let flushed = session.compress(Mode::Flush, b"some data").unwrap();
        assert!(!flushed.is_empty());
    }

    #[test]
    fn test_large_incompressible_input() {
        let mut session = Session::create(1, 0).unwrap();
        let input = noisy(1 << 20);

        let mut out = session.compress(Mode::Flush, &input).unwrap().to_vec();
        out.extend_from_slice(&session.compress(Mode::End, &[]).unwrap());

        assert_eq!(zstd::stream::decode_all(out.as_slice()).unwrap(), input);
    }

    #[test]
    fn test_multithreaded_round_trip() {
        let mut session = Session::create(3, 2).unwrap();
        let input = b"abcdefgh".repeat(64 * 1024);

        let mut out = Vec::new();
        for chunk in input.chunks(10_000) {
            out.extend_from_slice(&session.compress(Mode::Flush, chunk).unwrap());
        }
        out.extend_from_slice(&session.compress(Mode::End, &[]).unwrap());

        assert_eq!(zstd::stream::decode_all(out.as_slice()).unwrap(), input);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let mut session = Session::create(3, 0).unwrap();
        session.destroy();
        session.destroy();
        assert!(session.is_released());
        assert!(matches!(
            session.compress(Mode::End, &[]),
            Err(Error::Compression(_))
        ));
    }

    #[test]
    fn test_missing_context_is_engine_init() {
        let err = Session::with_context(None, 3, 0).unwrap_err();
        assert!(matches!(err, Error::EngineInit(_)));

        let io_err = io::Error::from(err);
        assert_eq!(io_err.kind(), io::ErrorKind::OutOfMemory);
    }

    #[test]
    fn test_out_of_range_level_is_not_fatal() {
        let mut session = Session::create(10_000, 0).unwrap();
        let out = session.compress(Mode::End, b"still works").unwrap();
        assert_eq!(
            zstd::stream::decode_all(out.as_ref()).unwrap(),
            b"still works"
        );
    }
}
