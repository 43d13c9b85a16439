//! Body wrappers that observe bytes as they stream through the proxy.

use crate::capture::BodyAccumulator;
use crate::events::BodyCapture;
use bytes::Bytes;
use hyper::body::{Body, Frame, SizeHint};
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Byte count and optional capture for one message body.
#[derive(Debug, Default)]
pub struct BodyTap {
    bytes: u64,
    accumulator: Option<BodyAccumulator>,
}

pub type SharedTap = Arc<Mutex<BodyTap>>;

impl BodyTap {
    /// A `capture_limit` of 0 counts bytes without sampling them.
    pub fn new(capture_limit: usize) -> Self {
        Self {
            bytes: 0,
            accumulator: (capture_limit > 0).then(|| BodyAccumulator::new(capture_limit)),
        }
    }

    pub fn shared(capture_limit: usize) -> SharedTap {
        Arc::new(Mutex::new(Self::new(capture_limit)))
    }

    pub fn observe(&mut self, chunk: &[u8]) {
        self.bytes += chunk.len() as u64;
        if let Some(acc) = self.accumulator.as_mut() {
            acc.ingest(chunk);
        }
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn capture(&self, content_type: Option<&str>, include_text: bool) -> Option<BodyCapture> {
        self.accumulator
            .as_ref()
            .map(|acc| acc.finalize(content_type, include_text))
    }
}

type Completion = Box<dyn FnOnce() + Send>;

/// Passes frames through unchanged while feeding data into a [`BodyTap`].
///
/// The completion callback runs once the inner body has been fully read. A
/// body that errors, or is dropped before its end, never runs it.
pub struct ObservedBody<B: Body> {
    inner: B,
    tap: SharedTap,
    on_complete: Option<Completion>,
}

impl<B: Body> ObservedBody<B> {
    pub fn new(inner: B, tap: SharedTap) -> Self {
        Self {
            inner,
            tap,
            on_complete: None,
        }
    }

    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_complete = Some(Box::new(f));
        self
    }

    fn complete(&mut self) {
        if let Some(f) = self.on_complete.take() {
            f();
        }
    }
}

impl<B> Body for ObservedBody<B>
where
    B: Body<Data = Bytes> + Unpin,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.tap.lock().observe(data);
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.on_complete = None;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.complete();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B: Body> Drop for ObservedBody<B> {
    fn drop(&mut self) {
        // hyper may stop polling once the inner body reports its end.
        if self.inner.is_end_stream() {
            self.complete();
        }
    }
}
