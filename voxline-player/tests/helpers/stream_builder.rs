//! Scripted provider streams
//!
//! Each builder returns a `StreamFactory` the engine can queue directly.
//! `StreamProbe` lets a test observe what the engine did to a stream after
//! handing it over: whether it was opened, cancelled and dropped.

use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use voxline_player::provider::{chunked_stream, stream_factory};
use voxline_player::{ByteStream, Error, StreamFactory, TransportError};

/// Split `bytes` into reads of `chunk_size` bytes (the last may be shorter).
pub fn split_chunks(bytes: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
    bytes.chunks(chunk_size.max(1)).map(<[u8]>::to_vec).collect()
}

/// Split `bytes` at the given (sorted) byte offsets.
pub fn split_at_offsets(bytes: &[u8], offsets: &[usize]) -> Vec<Vec<u8>> {
    let mut chunks = Vec::new();
    let mut start = 0;
    for &offset in offsets {
        let offset = offset.min(bytes.len());
        chunks.push(bytes[start..offset].to_vec());
        start = offset;
    }
    chunks.push(bytes[start..].to_vec());
    chunks
}

/// Segment whose reads are all available immediately.
pub fn immediate_segment(bytes: Vec<u8>, chunk_size: usize) -> StreamFactory {
    stream_factory(move |cancel| async move { Ok(chunked_stream(split_chunks(&bytes, chunk_size), cancel)) })
}

/// Segment that waits `interval` before each read, like a slow network.
pub fn paced_segment(bytes: Vec<u8>, chunk_size: usize, interval: Duration) -> StreamFactory {
    stream_factory(move |cancel| async move {
        let stream: ByteStream = stream::iter(split_chunks(&bytes, chunk_size))
            .then(move |chunk| async move {
                tokio::time::sleep(interval).await;
                Ok::<_, TransportError>(chunk)
            })
            .take_until(cancel.cancelled_owned())
            .boxed();
        Ok(stream)
    })
}

/// Segment that delivers `bytes` in one read, then fails with `message`.
pub fn failing_segment(bytes: Vec<u8>, message: &str) -> StreamFactory {
    let error = TransportError::new(message);
    stream_factory(move |_cancel| async move {
        let stream: ByteStream = stream::iter(vec![Ok(bytes), Err(error)]).boxed();
        Ok(stream)
    })
}

/// Segment whose stream cannot be opened at all.
pub fn unopenable_segment(message: &str) -> StreamFactory {
    let error = TransportError::new(message);
    stream_factory(move |_cancel| async move { Err(Error::Transport(error)) })
}

/// Observes a stream after the engine takes it over
#[derive(Clone, Default)]
pub struct StreamProbe {
    token: Arc<Mutex<Option<CancellationToken>>>,
    reads: Arc<AtomicUsize>,
    dropped: Arc<AtomicBool>,
}

impl StreamProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the engine opened the stream
    pub fn opened(&self) -> bool {
        self.token.lock().unwrap().is_some()
    }

    /// Whether the token handed to the stream has fired
    pub fn cancelled(&self) -> bool {
        self.token
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Chunks pulled by the engine
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Whether the engine dropped the stream
    pub fn dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Segment that delivers `first` and then never produces another read.
///
/// The stream ignores its token, so only the engine's own cancellation can
/// get it unstuck.
pub fn hanging_segment(first: Vec<u8>, probe: &StreamProbe) -> StreamFactory {
    let probe = probe.clone();
    stream_factory(move |cancel| async move {
        *probe.token.lock().unwrap() = Some(cancel);
        let reads = Arc::clone(&probe.reads);
        let guard = DropFlag(Arc::clone(&probe.dropped));

        let stream: ByteStream = stream::iter(vec![Ok(first)])
            .chain(stream::pending())
            .map(move |chunk| {
                let _alive = &guard;
                reads.fetch_add(1, Ordering::SeqCst);
                chunk
            })
            .boxed();
        Ok(stream)
    })
}
