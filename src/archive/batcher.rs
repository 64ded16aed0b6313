//! Fixed-size batching stream adapter.

use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{BoxStream, Stream, StreamExt};

/// Groups a fallible stream of items into `Vec`s of a fixed size.
///
/// A partial final batch is flushed when the inner stream ends. An inner error
/// discards any partially accumulated batch, is passed through, and ends the
/// stream.
pub struct Batcher<T, E> {
    inner: BoxStream<'static, Result<T, E>>,
    size: usize,
    buf: Vec<T>,
    done: bool,
}

impl<T, E> Batcher<T, E> {
    pub fn new<S>(inner: S, size: usize) -> Self
    where
        S: Stream<Item = Result<T, E>> + Send + 'static,
    {
        assert!(size > 0, "batch size must be positive");
        Self {
            inner: inner.boxed(),
            size,
            buf: Vec::with_capacity(size),
            done: false,
        }
    }
}

// The inner stream is boxed and the buffer is plain data, so moving a Batcher
// is always sound even when T itself is not Unpin.
impl<T, E> Unpin for Batcher<T, E> {}

impl<T, E> Stream for Batcher<T, E> {
    type Item = Result<Vec<T>, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            match this.inner.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(item))) => {
                    this.buf.push(item);
                    if this.buf.len() == this.size {
                        let batch = mem::replace(&mut this.buf, Vec::with_capacity(this.size));
                        return Poll::Ready(Some(Ok(batch)));
                    }
                }
                Poll::Ready(Some(Err(err))) => {
                    this.done = true;
                    this.buf.clear();
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    if this.buf.is_empty() {
                        return Poll::Ready(None);
                    }
                    return Poll::Ready(Some(Ok(mem::take(&mut this.buf))));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
