//! Provider stream contract
//!
//! A provider turns one segment of text into a pull-based stream of raw PCM
//! bytes: mono, 16-bit little-endian, at the engine's sample rate. Request
//! formatting, authentication and transcoding are the provider's business;
//! the engine only pulls chunks and cancels.
//!
//! Cancellation is two-tier. Every stream factory receives a
//! `CancellationToken` scoped to its session, which the adapter should watch
//! to tear its transport down. The engine also stops polling and drops the
//! stream as soon as the token fires.

pub mod file;

use crate::error::{Result, TransportError};
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;

pub use file::FileProvider;

/// Pull-based PCM byte chunks of one segment
pub type ByteStream = BoxStream<'static, std::result::Result<Vec<u8>, TransportError>>;

/// Deferred stream construction for one queued segment.
///
/// Called once, when the segment reaches the head of the queue.
pub type StreamFactory =
    Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<ByteStream>> + Send>;

/// A text-to-speech backend.
pub trait SpeechProvider: Send + Sync {
    /// Open a PCM stream for `text`.
    ///
    /// The returned future may itself perform the request; it must finish
    /// promptly once `cancel` fires.
    fn open_stream(&self, text: String, cancel: CancellationToken) -> BoxFuture<'static, Result<ByteStream>>;
}

/// Wrap a closure as a `StreamFactory`.
pub fn stream_factory<F, Fut>(open: F) -> StreamFactory
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<ByteStream>> + Send + 'static,
{
    Box::new(move |cancel| Box::pin(open(cancel)))
}

/// Stream factory that opens `text` on `provider` when dequeued.
pub fn provider_factory(
    provider: std::sync::Arc<dyn SpeechProvider>,
    text: String,
) -> StreamFactory {
    Box::new(move |cancel| provider.open_stream(text, cancel))
}

/// Byte stream over in-memory chunks, ended early by `cancel`.
pub fn chunked_stream(chunks: Vec<Vec<u8>>, cancel: CancellationToken) -> ByteStream {
    stream::iter(chunks.into_iter().map(Ok))
        .take_until(cancel.cancelled_owned())
        .boxed()
}
