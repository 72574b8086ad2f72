use std::{
    io,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll, Waker},
};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use opendal::Reader;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

/// A stream of bytes that abstracts over the underlying storage implementation.
/// This type ensures that `OpenDAL` and tokio file types are not exposed in the
/// public API.
pub struct BytesStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>,
}

impl BytesStream {
    /// Stream the bytes of `range` out of an `OpenDAL` `Reader`.
    pub(crate) async fn from_reader(
        reader: Reader,
        range: std::ops::Range<u64>,
    ) -> Result<Self, opendal::Error> {
        let stream = reader.into_bytes_stream(range).await?;

        // Convert opendal::Error to std::io::Error for uniform error handling
        let mapped_stream =
            stream.map(|result| result.map_err(|e| io::Error::new(io::ErrorKind::Other, e)));

        Ok(Self {
            inner: Box::pin(mapped_stream),
        })
    }

    /// Stream everything an `AsyncRead` produces, chunk by chunk.
    pub fn from_async_read<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self {
            inner: Box::pin(ReaderStream::new(reader)),
        }
    }

    /// Wrap an arbitrary stream of byte chunks.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, io::Error>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// A stream yielding `data` as a single chunk.
    #[must_use]
    pub fn once(data: Bytes) -> Self {
        Self::from_stream(futures_util::stream::once(async move { Ok(data) }))
    }

    /// Collect the entire stream into a single `Bytes` buffer.
    /// This method should be used carefully as it loads the entire content into memory.
    ///
    /// # Errors
    ///
    /// Returns an error if reading from the stream fails.
    pub async fn collect(mut self) -> Result<Bytes, io::Error> {
        let mut buffer = Vec::new();

        while let Some(chunk) = self.next().await {
            let chunk = chunk?;
            buffer.extend_from_slice(&chunk);
        }

        Ok(Bytes::from(buffer))
    }
}

impl Stream for BytesStream {
    type Item = Result<Bytes, io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for BytesStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BytesStream").finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Slot {
    stream: Option<BytesStream>,
    destroyed: bool,
    waker: Option<Waker>,
}

/// A shared handle on the stream of an uploaded item.
///
/// The backend drains it through [`ItemStream::reader`] while the item keeps
/// its own handle, so the lifecycle guard can release the stream after the
/// backend is done with it. [`ItemStream::destroy`] drops the underlying stream
/// exactly once no matter how many handles call it.
#[derive(Clone)]
pub struct ItemStream {
    slot: Arc<Mutex<Slot>>,
}

impl ItemStream {
    #[must_use]
    pub fn new(stream: BytesStream) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot {
                stream: Some(stream),
                ..Slot::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A consumer reading from this stream.
    #[must_use]
    pub fn reader(&self) -> ItemStreamReader {
        ItemStreamReader {
            handle: self.clone(),
            failed: false,
        }
    }

    /// Detach any reader and drop the underlying stream, releasing the file
    /// descriptor or socket behind it.
    ///
    /// Returns `true` only for the call that actually released the stream.
    pub fn destroy(&self) -> bool {
        let (released, waker) = {
            let mut slot = self.lock();
            if slot.destroyed {
                return false;
            }
            slot.destroyed = true;
            (slot.stream.take(), slot.waker.take())
        };
        drop(released);
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.lock().destroyed
    }
}

impl std::fmt::Debug for ItemStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemStream")
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// Reads chunks out of an [`ItemStream`].
///
/// Reading a destroyed stream yields a single `BrokenPipe` error so a transfer
/// never mistakes a released source for a complete one.
pub struct ItemStreamReader {
    handle: ItemStream,
    failed: bool,
}

impl Stream for ItemStreamReader {
    type Item = Result<Bytes, io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.failed {
            return Poll::Ready(None);
        }
        let poll = {
            let mut slot = self.handle.lock();
            if slot.destroyed {
                None
            } else if let Some(stream) = slot.stream.as_mut() {
                let poll = stream.poll_next_unpin(cx);
                if poll.is_pending() {
                    slot.waker = Some(cx.waker().clone());
                }
                Some(poll)
            } else {
                Some(Poll::Ready(None))
            }
        };
        poll.unwrap_or_else(|| {
            self.failed = true;
            Poll::Ready(Some(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stream was destroyed",
            ))))
        })
    }
}

/// What gets persisted for an item.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Already in memory, written in one go.
    Buffer(Bytes),
    /// Drained chunk by chunk.
    Stream(ItemStream),
}

impl Payload {
    /// Every payload as a stream of chunks.
    #[must_use]
    pub fn into_stream(self) -> BytesStream {
        match self {
            Self::Buffer(data) => BytesStream::once(data),
            Self::Stream(stream) => BytesStream::from_stream(stream.reader()),
        }
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Self::Buffer(data)
    }
}

impl From<BytesStream> for Payload {
    fn from(stream: BytesStream) -> Self {
        Self::Stream(ItemStream::new(stream))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::TryStreamExt;

    use super::*;

    /// Counts how many times the wrapped stream got dropped.
    pub struct DropCounter(pub Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn counted_stream(chunks: Vec<&'static str>, drops: Arc<AtomicUsize>) -> BytesStream {
        let guard = DropCounter(drops);
        let stream = futures_util::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, io::Error>(Bytes::from_static(c.as_bytes()))),
        )
        .map(move |chunk| {
            let _guard = &guard;
            chunk
        });
        BytesStream::from_stream(stream)
    }

    #[tokio::test]
    async fn reader_drains_chunks() {
        let drops = Arc::new(AtomicUsize::new(0));
        let stream = ItemStream::new(counted_stream(vec!["some ", "data"], drops));
        let data: Vec<Bytes> = stream.reader().try_collect().await.unwrap();
        assert_eq!(data.concat(), b"some data");
        assert!(!stream.is_destroyed());
    }

    #[test]
    fn destroy_releases_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let stream = ItemStream::new(counted_stream(vec!["a"], drops.clone()));
        let other = stream.clone();

        assert!(stream.destroy());
        assert!(!other.destroy());
        assert!(other.is_destroyed());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn destroyed_stream_fails_reader() {
        let drops = Arc::new(AtomicUsize::new(0));
        let stream = ItemStream::new(counted_stream(vec!["a"], drops));
        stream.destroy();

        let mut reader = stream.reader();
        let err = reader.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn buffer_payload_streams_once() {
        let payload = Payload::from(Bytes::from_static(b"buffer"));
        let data = payload.into_stream().collect().await.unwrap();
        assert_eq!(data, Bytes::from_static(b"buffer"));
    }
}
