//! Streaming gzip decoding
//!
//! Objects arrive as a stream of chunks whose total length may not be known
//! up front. [`StreamingGzipDecoder`] pushes each chunk through an
//! incremental decoder the moment it arrives and serves the decompressed
//! bytes through [`AsyncRead`]. Concatenated gzip members decode as one
//! continuous stream.

use bytes::Bytes;
use flate2::write::GzDecoder;
use futures::Stream;
use std::io::{self, Write};
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// Gzip decoder over a chunked byte stream
pub struct StreamingGzipDecoder<S> {
    inner: S,
    decoder: GzDecoder<Vec<u8>>,
    /// Read offset into the decoder's output buffer
    position: usize,
    finished: bool,
}

impl<S> StreamingGzipDecoder<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            decoder: GzDecoder::new(Vec::new()),
            position: 0,
            finished: false,
        }
    }

    /// Decompressed bytes that can be read without waiting for more input
    ///
    /// Counts only output produced from chunks that have already arrived.
    pub fn available(&self) -> usize {
        self.decoder.get_ref().len() - self.position
    }

    /// Give back the compressed stream, discarding buffered output
    pub fn into_inner(self) -> S {
        self.inner
    }

    fn feed(&mut self, chunk: &[u8]) -> io::Result<()> {
        let mut remaining = chunk;
        while !remaining.is_empty() {
            let written = self.decoder.write(remaining)?;
            if written == 0 {
                // Member trailer reached, the rest belongs to the next member
                self.next_member()?;
                continue;
            }
            remaining = &remaining[written..];
        }
        // Move everything decoded so far into the output buffer
        self.decoder.flush()
    }

    /// Verify the finished member and start decoding a new one into the
    /// same output buffer
    fn next_member(&mut self) -> io::Result<()> {
        let finished = std::mem::replace(&mut self.decoder, GzDecoder::new(Vec::new()));
        let output = finished.finish()?;
        tracing::trace!(buffered = output.len() - self.position, "Starting next gzip member");
        self.decoder = GzDecoder::new(output);
        Ok(())
    }
}

impl<S> AsyncRead for StreamingGzipDecoder<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        loop {
            let output = this.decoder.get_mut();
            if this.position < output.len() {
                let n = buf.remaining().min(output.len() - this.position);
                buf.put_slice(&output[this.position..this.position + n]);
                this.position += n;
                if this.position == output.len() {
                    output.clear();
                    this.position = 0;
                }
                return Poll::Ready(Ok(()));
            }

            if this.finished {
                return Poll::Ready(Ok(()));
            }

            match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                Some(Ok(chunk)) => this.feed(&chunk)?,
                Some(Err(e)) => return Poll::Ready(Err(e)),
                None => {
                    this.decoder.try_finish()?;
                    this.finished = true;
                }
            }
        }
    }
}
