use crate::exchange::Exchange;
use crate::filter::{Filter, ZstdFilter};
use crate::segment::{Downstream, Segment, Segments};
use bytes::{Buf, Bytes, BytesMut};
use http::HeaderMap;
use http_body::{Body, Frame};
use pin_project_lite::pin_project;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

pin_project! {
    /// A response body that may be zstd-compressed.
    ///
    /// This type wraps an inner body and either runs its frames through a
    /// [`ZstdFilter`] or passes them through unchanged.
    #[project = ZstdBodyProj]
    #[allow(missing_docs)]
    pub enum ZstdBody<B> {
        /// Compressed body driven by the filter.
        Compressed {
            #[pin]
            inner: B,
            state: CompressedBody,
        },
        /// Passthrough body without compression.
        Passthrough {
            #[pin]
            inner: B,
        },
    }
}

/// Filter state and output queue for a compressed body.
pub(crate) struct CompressedBody {
    filter: ZstdFilter,
    exchange: Exchange,
    frames: VecDeque<Frame<Bytes>>,
    trailers: Option<HeaderMap>,
    state: CompressState,
}

/// Progress of the wrapped body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompressState {
    /// Reading frames from the inner body.
    Reading,
    /// Inner body finished; emitting held trailers.
    Trailers,
    /// Nothing more to emit.
    Done,
}

/// Turns forwarded segments into body frames.
///
/// Trailers are held back until the body ends, since HTTP sends them after
/// all data.
struct FrameSink<'a> {
    frames: &'a mut VecDeque<Frame<Bytes>>,
    trailers: &'a mut Option<HeaderMap>,
    sent: u64,
}

impl Downstream for FrameSink<'_> {
    fn pass(&mut self, segments: Segments) -> crate::Result<()> {
        for segment in segments {
            match segment {
                Segment::Data(data) if !data.is_empty() => {
                    self.sent += data.len() as u64;
                    self.frames.push_back(Frame::data(data));
                }
                Segment::Trailers(trailers) => *self.trailers = Some(trailers),
                Segment::Data(_) | Segment::Flush | Segment::Eos => {}
            }
        }
        Ok(())
    }
}

impl CompressedBody {
    fn new(filter: ZstdFilter, exchange: Exchange) -> Self {
        Self {
            filter,
            exchange,
            frames: VecDeque::new(),
            trailers: None,
            state: CompressState::Reading,
        }
    }

    /// Returns the current state.
    pub(crate) fn state(&self) -> CompressState {
        self.state
    }

    /// Runs one segment through the filter, queueing what comes out.
    fn feed(&mut self, segment: Segment) -> io::Result<()> {
        let mut sink = FrameSink {
            frames: &mut self.frames,
            trailers: &mut self.trailers,
            sent: 0,
        };
        let result = self
            .filter
            .process(&mut self.exchange, Segments::from([segment]), &mut sink);
        self.exchange.bytes_sent += sink.sent;

        result.map_err(|err| {
            self.fail();
            io::Error::from(err)
        })
    }

    /// Drops queued output and releases the compression stream.
    fn fail(&mut self) {
        self.filter.abort();
        self.frames.clear();
        self.trailers = None;
        self.state = CompressState::Done;
    }

    /// Polls the inner body and compresses data.
    fn poll_compressed<B>(
        &mut self,
        cx: &mut Context<'_>,
        mut inner: Pin<&mut B>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>>
    where
        B: Body,
        B::Data: Buf,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        loop {
            if let Some(frame) = self.frames.pop_front() {
                return Poll::Ready(Some(Ok(frame)));
            }

            match self.state {
                CompressState::Done => return Poll::Ready(None),

                CompressState::Trailers => {
                    self.state = CompressState::Done;
                    if let Some(trailers) = self.trailers.take() {
                        return Poll::Ready(Some(Ok(Frame::trailers(trailers))));
                    }
                }

                CompressState::Reading => match inner.as_mut().poll_frame(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(None) => {
                        self.state = CompressState::Trailers;
                        if let Err(e) = self.feed(Segment::Eos) {
                            return Poll::Ready(Some(Err(e)));
                        }
                    }
                    Poll::Ready(Some(Err(e))) => {
                        self.fail();
                        return Poll::Ready(Some(Err(io::Error::other(e.into()))));
                    }
                    Poll::Ready(Some(Ok(frame))) => {
                        let segment = match frame.into_data() {
                            Ok(mut data) => Segment::Data(data.copy_to_bytes(data.remaining())),
                            Err(frame) => match frame.into_trailers() {
                                Ok(trailers) => Segment::Trailers(trailers),
                                Err(_) => continue,
                            },
                        };
                        if let Err(e) = self.feed(segment) {
                            return Poll::Ready(Some(Err(e)));
                        }
                    }
                },
            }
        }
    }
}

impl<B> ZstdBody<B> {
    /// Creates a body compressed by `filter`, which must already have
    /// negotiated compression for `exchange`.
    pub fn compressed(inner: B, filter: ZstdFilter, exchange: Exchange) -> Self {
        Self::Compressed {
            inner,
            state: CompressedBody::new(filter, exchange),
        }
    }

    /// Creates a passthrough body without compression.
    pub fn passthrough(inner: B) -> Self {
        Self::Passthrough { inner }
    }
}

impl<B> Body for ZstdBody<B>
where
    B: Body,
    B::Data: Buf,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            ZstdBodyProj::Passthrough { inner } => match inner.poll_frame(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Ready(Some(Ok(frame))) => {
                    let frame = frame.map_data(|data| {
                        let mut bytes = BytesMut::with_capacity(data.remaining());
                        let mut chunk = data;
                        while chunk.has_remaining() {
                            let slice = chunk.chunk();
                            bytes.extend_from_slice(slice);
                            chunk.advance(slice.len());
                        }
                        bytes.freeze()
                    });
                    Poll::Ready(Some(Ok(frame)))
                }
                Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(io::Error::other(e.into())))),
            },
            ZstdBodyProj::Compressed { inner, state } => state.poll_compressed(cx, inner),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            ZstdBody::Passthrough { inner } => inner.is_end_stream(),
            ZstdBody::Compressed { state, .. } => {
                state.state() == CompressState::Done && state.frames.is_empty()
            }
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self {
            ZstdBody::Passthrough { inner } => inner.size_hint(),
            // Compressed size is unknown
            ZstdBody::Compressed { .. } => http_body::SizeHint::default(),
        }
    }
}
