use crate::codec::{self, Level};
use bytes::{Buf, Bytes};
use http::HeaderMap;
use http_body::{Body, Frame, SizeHint};
use http_body_util::Full;
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

pin_project! {
    /// A response body produced by the gzip middleware.
    ///
    /// Either streams the inner body as a sequence of gzip members, carries a
    /// body that was already transformed in full, or passes the inner body
    /// through unchanged.
    #[project = GzipBodyProj]
    #[allow(missing_docs)]
    pub enum GzipBody<B> {
        /// Each data frame of `inner` becomes one gzip member.
        Gzip {
            #[pin]
            inner: B,
            state: MemberState,
        },
        /// A fully buffered body.
        Full {
            #[pin]
            inner: Full<Bytes>,
        },
        /// Uncompressed body.
        Passthrough {
            #[pin]
            inner: B,
        },
    }
}

/// Progress of a member-per-frame body.
pub(crate) struct MemberState {
    level: Level,
    members: u64,
    phase: Phase,
    pending_trailers: Option<HeaderMap>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Reading,
    Trailers,
    Done,
}

impl MemberState {
    fn new(level: Level) -> Self {
        Self {
            level,
            members: 0,
            phase: Phase::Reading,
            pending_trailers: None,
        }
    }

    fn member(&mut self, data: &[u8]) -> Poll<Option<Result<Frame<Bytes>, io::Error>>> {
        match codec::compress(data, self.level) {
            Ok(member) => {
                self.members += 1;
                Poll::Ready(Some(Ok(Frame::data(member))))
            }
            Err(e) => {
                self.phase = Phase::Done;
                Poll::Ready(Some(Err(io::Error::other(e))))
            }
        }
    }

    fn poll_members<B>(
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
            match self.phase {
                Phase::Done => return Poll::Ready(None),

                Phase::Trailers => {
                    self.phase = Phase::Done;
                    return match self.pending_trailers.take() {
                        Some(trailers) => Poll::Ready(Some(Ok(Frame::trailers(trailers)))),
                        None => Poll::Ready(None),
                    };
                }

                Phase::Reading => match inner.as_mut().poll_frame(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(None) => {
                        self.phase = Phase::Done;
                        // A body with no data still has to be a valid gzip stream.
                        if self.members == 0 {
                            return self.member(&[]);
                        }
                        return Poll::Ready(None);
                    }
                    Poll::Ready(Some(Err(e))) => {
                        return Poll::Ready(Some(Err(io::Error::other(e.into()))));
                    }
                    Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                        Ok(mut data) => {
                            if !data.has_remaining() {
                                continue;
                            }
                            let data = data.copy_to_bytes(data.remaining());
                            return self.member(&data);
                        }
                        Err(frame) => {
                            if let Ok(trailers) = frame.into_trailers() {
                                self.pending_trailers = Some(trailers);
                                self.phase = Phase::Trailers;
                                if self.members == 0 {
                                    return self.member(&[]);
                                }
                            }
                        }
                    },
                },
            }
        }
    }
}

impl<B> GzipBody<B> {
    /// Compresses `inner` frame by frame.
    pub fn gzip(inner: B, level: Level) -> Self {
        Self::Gzip {
            inner,
            state: MemberState::new(level),
        }
    }

    /// Wraps an already complete body.
    pub fn full(data: Bytes) -> Self {
        Self::Full {
            inner: Full::new(data),
        }
    }

    /// Passes `inner` through without compression.
    pub fn passthrough(inner: B) -> Self {
        Self::Passthrough { inner }
    }

    /// Number of gzip members emitted so far.
    pub fn members(&self) -> u64 {
        match self {
            GzipBody::Gzip { state, .. } => state.members,
            _ => 0,
        }
    }
}

impl<B> Body for GzipBody<B>
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
            GzipBodyProj::Gzip { inner, state } => state.poll_members(cx, inner),
            GzipBodyProj::Full { inner } => inner.poll_frame(cx).map_err(|never| match never {}),
            GzipBodyProj::Passthrough { inner } => match inner.poll_frame(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Ready(Some(Ok(frame))) => Poll::Ready(Some(Ok(
                    frame.map_data(|mut data| data.copy_to_bytes(data.remaining()))
                ))),
                Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(io::Error::other(e.into())))),
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            GzipBody::Gzip { state, .. } => state.phase == Phase::Done,
            GzipBody::Full { inner } => inner.is_end_stream(),
            GzipBody::Passthrough { inner } => inner.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            // Compressed size is unknown
            GzipBody::Gzip { .. } => SizeHint::default(),
            GzipBody::Full { inner } => inner.size_hint(),
            GzipBody::Passthrough { inner } => inner.size_hint(),
        }
    }
}
