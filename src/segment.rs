use crate::error::Result;
use bytes::Bytes;
use http::HeaderMap;
use std::collections::VecDeque;

/// One unit of a response body as it moves through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Body bytes.
    Data(Bytes),
    /// Everything before this point should reach the client now.
    Flush,
    /// Trailing headers. Carried through in order, never compressed.
    Trailers(HeaderMap),
    /// End of the body.
    Eos,
}

impl Segment {
    /// Creates a data segment.
    pub fn data(bytes: impl Into<Bytes>) -> Self {
        Segment::Data(bytes.into())
    }

    /// Returns whether this segment is a marker rather than body bytes.
    pub fn is_metadata(&self) -> bool {
        !matches!(self, Segment::Data(_))
    }
}

/// An ordered batch of segments.
pub type Segments = VecDeque<Segment>;

/// The next stage of the pipeline.
pub trait Downstream {
    /// Hands `segments` to the next stage, in order.
    fn pass(&mut self, segments: Segments) -> Result<()>;
}

impl Downstream for Vec<Segment> {
    fn pass(&mut self, segments: Segments) -> Result<()> {
        self.extend(segments);
        Ok(())
    }
}
