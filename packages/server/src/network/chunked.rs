//! Reader adapter capping the size of each individual socket read.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

/// Wraps an `AsyncRead` so that a single `poll_read` never yields more than
/// `chunk` bytes.
#[derive(Debug)]
pub struct ChunkedReader<R> {
    inner: R,
    scratch: Box<[u8]>,
}

impl<R> ChunkedReader<R> {
    /// A chunk size of zero is raised to one.
    pub fn new(inner: R, chunk: usize) -> Self {
        Self {
            inner,
            scratch: vec![0; chunk.max(1)].into_boxed_slice(),
        }
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.scratch.len()
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ChunkedReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let limit = this.scratch.len().min(buf.remaining());
        let mut chunk = ReadBuf::new(&mut this.scratch[..limit]);
        ready!(Pin::new(&mut this.inner).poll_read(cx, &mut chunk))?;
        buf.put_slice(chunk.filled());
        Poll::Ready(Ok(()))
    }
}
