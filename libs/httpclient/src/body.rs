//! Request and response body types.
//!
//! Observing a body must never change what the other side of the stream sees:
//! - [`TeeBody`] copies request bytes into a [`CaptureBuffer`] while the
//!   transport reads them, so the payload is sent unaltered.
//! - [`capture_response_body`] drains a response for logging and hands back a
//!   [`ReplayBody`] that yields the exact same frames, followed by whatever
//!   was left unread (or the read error the transport produced).
//! - [`DeadlineBody`] binds a streamed response body to the call deadline.

use crate::error::HttpError;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, TryStreamExt};
use http_body::{Body, Frame, SizeHint};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use parking_lot::Mutex;
use pin_project_lite::pin_project;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncRead;
use tokio::time::{Instant, Sleep};
use tokio_util::io::ReaderStream;

/// Boxed error used by body streams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Type alias for the boxed response body.
///
/// This type can hold either the raw transport body, a decompressed body,
/// a replay of captured frames, or a deadline-bound body.
pub type ResponseBody = http_body_util::combinators::BoxBody<Bytes, BoxError>;

/// Outgoing request body: empty, in-memory bytes, or a stream.
///
/// Streams are forwarded to the transport as they are read; nothing is
/// buffered up front. In-memory bodies can be re-sent on a 307/308 redirect,
/// streams cannot.
pub struct RequestBody {
    inner: UnsyncBoxBody<Bytes, BoxError>,
    replay: Option<Bytes>,
}

impl RequestBody {
    /// Body with no content
    #[must_use]
    pub fn empty() -> Self {
        Self {
            inner: Empty::<Bytes>::new().map_err(Into::into).boxed_unsync(),
            replay: Some(Bytes::new()),
        }
    }

    /// Body backed by an in-memory buffer
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            inner: Full::new(bytes.clone()).map_err(Into::into).boxed_unsync(),
            replay: Some(bytes),
        }
    }

    /// Body backed by a stream of byte chunks
    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self::wrap(StreamBody::new(
            stream.map_ok(Frame::data).map_err(Into::<BoxError>::into),
        ))
    }

    /// Body backed by an async reader, read in chunks as the transport pulls
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self::from_stream(ReaderStream::new(reader))
    }

    /// Wrap any `http_body::Body`
    pub fn wrap<B>(body: B) -> Self
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self {
            inner: body.map_err(Into::into).boxed_unsync(),
            replay: None,
        }
    }

    /// Fresh copy of an in-memory body; `None` for streams
    #[must_use]
    pub fn try_clone(&self) -> Option<Self> {
        self.replay.clone().map(Self::from_bytes)
    }

    /// Route this body through a [`TeeBody`] that copies up to `limit` bytes.
    ///
    /// The returned body stays replayable if this one was.
    #[must_use]
    pub fn tee(self, limit: usize) -> (Self, CaptureBuffer) {
        let replay = self.replay.clone();
        let (tee, capture) = TeeBody::new(self, limit);
        let mut body = Self::wrap(tee);
        body.replay = replay;
        (body, capture)
    }
}

impl Default for RequestBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBody")
            .field("size_hint", &self.inner.size_hint())
            .field("replayable", &self.replay.is_some())
            .finish_non_exhaustive()
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        Self::from_bytes(text)
    }
}

impl From<&'static str> for RequestBody {
    fn from(text: &'static str) -> Self {
        Self::from_bytes(Bytes::from_static(text.as_bytes()))
    }
}

impl Body for RequestBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Bytes observed by a [`TeeBody`], up to a limit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedBytes {
    /// Captured prefix of the stream
    pub bytes: Bytes,
    /// Total bytes that flowed through, including any past the limit
    pub total: usize,
    /// True when `total` exceeded the capture limit
    pub truncated: bool,
}

#[derive(Debug)]
struct CaptureState {
    buf: BytesMut,
    total: usize,
    limit: usize,
}

/// Side buffer shared between a [`TeeBody`] and whoever wants the copy.
#[derive(Debug, Clone)]
pub struct CaptureBuffer {
    state: Arc<Mutex<CaptureState>>,
}

impl CaptureBuffer {
    /// Buffer that keeps at most `limit` bytes
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(CaptureState {
                buf: BytesMut::new(),
                total: 0,
                limit,
            })),
        }
    }

    fn record(&self, chunk: &[u8]) {
        let mut state = self.state.lock();
        state.total += chunk.len();
        let room = state.limit.saturating_sub(state.buf.len());
        let take = room.min(chunk.len());
        if take > 0 {
            state.buf.extend_from_slice(&chunk[..take]);
        }
    }

    /// Copy of everything captured so far
    #[must_use]
    pub fn snapshot(&self) -> CapturedBytes {
        let state = self.state.lock();
        CapturedBytes {
            bytes: Bytes::copy_from_slice(&state.buf),
            total: state.total,
            truncated: state.total > state.limit,
        }
    }
}

pin_project! {
    /// Body that forwards every frame unchanged and copies data frames into a
    /// [`CaptureBuffer`] as they pass.
    pub struct TeeBody<B> {
        #[pin]
        inner: B,
        capture: CaptureBuffer,
    }
}

impl<B> TeeBody<B> {
    /// Wrap `inner`, returning the tee and the buffer it writes into
    pub fn new(inner: B, limit: usize) -> (Self, CaptureBuffer) {
        let capture = CaptureBuffer::new(limit);
        (
            Self {
                inner,
                capture: capture.clone(),
            },
            capture,
        )
    }
}

impl<B> Body for TeeBody<B>
where
    B: Body<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        let polled = this.inner.poll_frame(cx);
        if let Poll::Ready(Some(Ok(frame))) = &polled
            && let Some(data) = frame.data_ref()
        {
            this.capture.record(data);
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Body that yields previously read frames, then an optional pending read
/// error, then the unread remainder of the original body.
pub struct ReplayBody {
    frames: VecDeque<Frame<Bytes>>,
    error: Option<BoxError>,
    rest: Option<ResponseBody>,
}

impl ReplayBody {
    /// Replay of a fully read body
    #[must_use]
    pub fn complete(frames: VecDeque<Frame<Bytes>>) -> Self {
        Self {
            frames,
            error: None,
            rest: None,
        }
    }

    fn remaining_buffered(&self) -> u64 {
        self.frames
            .iter()
            .filter_map(Frame::data_ref)
            .map(|d| d.len() as u64)
            .sum()
    }
}

impl Body for ReplayBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if let Some(frame) = this.frames.pop_front() {
            return Poll::Ready(Some(Ok(frame)));
        }
        if let Some(err) = this.error.take() {
            return Poll::Ready(Some(Err(err)));
        }
        match this.rest.as_mut() {
            Some(rest) => Pin::new(rest).poll_frame(cx),
            None => Poll::Ready(None),
        }
    }

    fn is_end_stream(&self) -> bool {
        self.frames.is_empty()
            && self.error.is_none()
            && self.rest.as_ref().is_none_or(Body::is_end_stream)
    }

    fn size_hint(&self) -> SizeHint {
        let buffered = self.remaining_buffered();
        match &self.rest {
            None => SizeHint::with_exact(buffered),
            Some(rest) => {
                let inner = rest.size_hint();
                let mut hint = SizeHint::new();
                hint.set_lower(inner.lower() + buffered);
                if let Some(upper) = inner.upper() {
                    hint.set_upper(upper + buffered);
                }
                hint
            }
        }
    }
}

/// Result of draining a response body for logging.
pub struct CapturedResponse {
    /// Data bytes read, at most the capture limit
    pub bytes: Bytes,
    /// True when the body was larger than the capture limit
    pub truncated: bool,
    /// Read failure message, if the transport failed mid-body
    pub read_error: Option<String>,
    /// Fresh body for the caller, byte-identical to the original stream
    pub body: ReplayBody,
}

/// Read `body` for logging and return a replacement body for the caller.
///
/// Reading stops at `limit` bytes: the frames read so far are replayed and
/// the rest is streamed from the original body untouched. A read error is
/// recorded for the log and re-delivered to the caller at the same position
/// in the stream.
pub async fn capture_response_body(mut body: ResponseBody, limit: usize) -> CapturedResponse {
    let mut frames = VecDeque::new();
    let mut captured = BytesMut::new();

    loop {
        match body.frame().await {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    if captured.len() + data.len() > limit {
                        let room = limit - captured.len();
                        captured.extend_from_slice(&data[..room]);
                        frames.push_back(frame);
                        return CapturedResponse {
                            bytes: captured.freeze(),
                            truncated: true,
                            read_error: None,
                            body: ReplayBody {
                                frames,
                                error: None,
                                rest: Some(body),
                            },
                        };
                    }
                    captured.extend_from_slice(data);
                }
                frames.push_back(frame);
            }
            Some(Err(err)) => {
                return CapturedResponse {
                    bytes: captured.freeze(),
                    truncated: false,
                    read_error: Some(err.to_string()),
                    body: ReplayBody {
                        frames,
                        error: Some(err),
                        rest: None,
                    },
                };
            }
            None => {
                return CapturedResponse {
                    bytes: captured.freeze(),
                    truncated: false,
                    read_error: None,
                    body: ReplayBody::complete(frames),
                };
            }
        }
    }
}

pin_project! {
    /// Body that fails with a fixed error once the call deadline passes.
    pub struct DeadlineBody<B> {
        #[pin]
        inner: B,
        #[pin]
        sleep: Sleep,
        error: Option<HttpError>,
    }
}

impl<B> DeadlineBody<B> {
    /// Bind `inner` to `deadline`; `error` is yielded once, on expiry
    pub fn new(inner: B, deadline: Instant, error: HttpError) -> Self {
        Self {
            inner,
            sleep: tokio::time::sleep_until(deadline),
            error: Some(error),
        }
    }
}

impl<B> Body for DeadlineBody<B>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        if this.error.is_none() {
            return Poll::Ready(None);
        }
        match this.inner.poll_frame(cx) {
            Poll::Ready(frame) => Poll::Ready(frame.map(|r| r.map_err(Into::into))),
            Poll::Pending => match this.sleep.poll(cx) {
                Poll::Ready(()) => Poll::Ready(this.error.take().map(|e| Err(Box::new(e) as BoxError))),
                Poll::Pending => Poll::Pending,
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        self.error.is_none() || self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
