use crate::codec::{Mode, Session};
use crate::config::ZstdConfig;
use crate::error::{Error, Result};
use crate::exchange::Exchange;
use crate::negotiate;
use crate::notes;
use crate::segment::{Downstream, Segment, Segments};
use std::sync::Arc;

/// A body filter driven by the host pipeline.
pub trait Filter {
    /// Processes the next batch of segments of one response and forwards the
    /// result to `next`.
    fn process(
        &mut self,
        exchange: &mut Exchange,
        segments: Segments,
        next: &mut dyn Downstream,
    ) -> Result<()>;
}

/// Observable lifecycle of a [`ZstdFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Negotiation has not run yet.
    Uninitialized,
    /// Segments are forwarded unchanged.
    Bypassed,
    /// Segments are being compressed.
    Streaming,
    /// End of stream was processed.
    Finalized,
    /// Processing stopped on an error.
    Failed,
}

enum State {
    Uninitialized,
    Bypassed,
    Streaming(StreamContext),
    Finalized,
    Failed,
}

/// Per-response compression state.
struct StreamContext {
    session: Session,
    pending: Segments,
    total_in: u64,
    total_out: u64,
}

impl StreamContext {
    fn new(session: Session) -> Self {
        Self {
            session,
            pending: Segments::new(),
            total_in: 0,
            total_out: 0,
        }
    }

    /// Compresses `input` and queues the output.
    fn pump(&mut self, mode: Mode, input: &[u8], exchange: &Exchange) -> Result<()> {
        let compressed = self.session.compress(mode, input).inspect_err(|err| {
            tracing::error!(
                request = %exchange.request.request_line,
                error = %err,
                "zstd compression failed"
            );
        })?;

        if !compressed.is_empty() {
            self.total_out += compressed.len() as u64;
            self.pending.push_back(Segment::Data(compressed));
        }
        self.total_in += input.len() as u64;
        Ok(())
    }

    /// Hands everything queued to `next`.
    fn forward(&mut self, next: &mut dyn Downstream) -> Result<()> {
        next.pass(std::mem::take(&mut self.pending))
    }
}

/// Streaming zstd compression for a single response.
///
/// The first non-empty batch triggers negotiation. After that the filter
/// either forwards segments unchanged or compresses each data segment and
/// forwards its output before looking at the next one.
pub struct ZstdFilter {
    config: Arc<ZstdConfig>,
    state: State,
    open: fn(i32, u32) -> Result<Session>,
}

impl ZstdFilter {
    /// Creates a filter for one response.
    pub fn new(config: Arc<ZstdConfig>) -> Self {
        Self {
            config,
            state: State::Uninitialized,
            open: Session::create,
        }
    }

    /// Creates a filter that opens its compression stream with `open`.
    #[cfg(test)]
    pub(crate) fn with_opener(
        config: Arc<ZstdConfig>,
        open: fn(i32, u32) -> Result<Session>,
    ) -> Self {
        Self {
            open,
            ..Self::new(config)
        }
    }

    /// Runs negotiation if it has not run yet and returns whether the
    /// response will be compressed.
    ///
    /// Hosts that send headers before the first body segment call this when
    /// the headers are final; otherwise [`Filter::process`] calls it.
    pub fn negotiate(&mut self, exchange: &mut Exchange) -> bool {
        if !matches!(self.state, State::Uninitialized) {
            return self.is_streaming();
        }

        let verdict = negotiate::evaluate(exchange);
        tracing::trace!(
            request = %exchange.request.request_line,
            ?verdict,
            "zstd negotiation"
        );

        if !verdict.streams() {
            negotiate::apply(&verdict, &self.config, exchange);
            self.state = State::Bypassed;
            return false;
        }

        match (self.open)(self.config.compression_level(), self.config.worker_count()) {
            Ok(session) => {
                negotiate::apply(&verdict, &self.config, exchange);
                self.state = State::Streaming(StreamContext::new(session));
                true
            }
            Err(err) => {
                tracing::error!(
                    request = %exchange.request.request_line,
                    error = %err,
                    "sending response uncompressed"
                );
                // Eligible for zstd in principle, so the variant still depends on Accept-Encoding
                negotiate::merge_vary(&mut exchange.headers);
                self.state = State::Bypassed;
                false
            }
        }
    }

    /// Returns whether a compression stream is open.
    pub fn is_streaming(&self) -> bool {
        matches!(self.state, State::Streaming(_))
    }

    /// Returns the current lifecycle phase.
    pub fn phase(&self) -> Phase {
        match self.state {
            State::Uninitialized => Phase::Uninitialized,
            State::Bypassed => Phase::Bypassed,
            State::Streaming(_) => Phase::Streaming,
            State::Finalized => Phase::Finalized,
            State::Failed => Phase::Failed,
        }
    }

    /// Stops processing and releases the compression stream, if any.
    pub fn abort(&mut self) {
        if let State::Streaming(_) = self.state {
            self.state = State::Failed;
        }
    }

    /// Closes the zstd frame, forwards the tail and the end marker, and
    /// records the totals.
    fn finish(
        &mut self,
        mut ctx: StreamContext,
        exchange: &Exchange,
        next: &mut dyn Downstream,
    ) -> Result<()> {
        ctx.pump(Mode::End, &[], exchange)?;
        ctx.pending.push_back(Segment::Eos);

        notes::record(
            self.config.note_names(),
            exchange.notes(),
            ctx.total_in,
            ctx.total_out,
        );

        let result = ctx.forward(next);
        ctx.session.destroy();
        self.state = State::Finalized;

        tracing::debug!(
            request = %exchange.request.request_line,
            level = self.config.compression_level(),
            workers = self.config.worker_count(),
            input = ctx.total_in,
            output = ctx.total_out,
            ratio = %notes::ratio(ctx.total_in, ctx.total_out),
            "zstd stream finished"
        );

        result
    }
}

impl Filter for ZstdFilter {
    fn process(
        &mut self,
        exchange: &mut Exchange,
        mut segments: Segments,
        next: &mut dyn Downstream,
    ) -> Result<()> {
        if segments.is_empty() {
            return Ok(());
        }

        if matches!(self.state, State::Uninitialized) {
            self.negotiate(exchange);
        }

        // Any early return below leaves the filter failed and drops the session
        let mut ctx = match std::mem::replace(&mut self.state, State::Failed) {
            State::Streaming(ctx) => ctx,
            State::Bypassed => {
                self.state = State::Bypassed;
                return next.pass(segments);
            }
            other => {
                self.state = other;
                return Err(Error::Finalized);
            }
        };

        while let Some(segment) = segments.pop_front() {
            // A HEAD response that already produced body bytes could not be
            // given a length upstream; compressing the rest gains nothing.
            if exchange.request.header_only && exchange.bytes_sent > 0 {
                tracing::debug!(
                    request = %exchange.request.request_line,
                    "header-only response already sent bytes, passing through"
                );
                let mut rest = std::mem::take(&mut ctx.pending);
                rest.push_back(segment);
                rest.append(&mut segments);
                self.state = State::Bypassed;
                return next.pass(rest);
            }

            match segment {
                Segment::Eos => return self.finish(ctx, exchange, next),
                Segment::Flush => {
                    ctx.pump(Mode::Flush, &[], exchange)?;
                    ctx.pending.push_back(Segment::Flush);
                    ctx.forward(next)?;
                }
                Segment::Trailers(trailers) => {
                    ctx.pending.push_back(Segment::Trailers(trailers));
                }
                Segment::Data(data) => {
                    ctx.pump(Mode::Flush, &data, exchange)?;
                    ctx.forward(next)?;
                }
            }
        }

        self.state = State::Streaming(ctx);
        Ok(())
    }
}

impl std::fmt::Debug for ZstdFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZstdFilter")
            .field("phase", &self.phase())
            .finish()
    }
}
