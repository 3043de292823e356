//! Incremental PCM decoder
//!
//! Decodes the raw 16-bit little-endian mono PCM that providers stream. The
//! transport may split a sample across two reads, so a trailing odd byte is
//! carried into the next call. Output is identical no matter where the
//! transport chunked the bytes.

use crate::error::{Error, Result};
use crate::provider::ByteStream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Bytes per mono 16-bit sample frame
pub const FRAME_BYTES: usize = 2;

/// Per-segment decoder state.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    /// Leftover byte of an incomplete frame (always shorter than one frame)
    carry: Option<u8>,
    frames_decoded: u64,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the complete frames in `carry + bytes`, keeping the remainder.
    pub fn decode(&mut self, bytes: &[u8]) -> Vec<f32> {
        let mut samples = Vec::with_capacity((bytes.len() + 1) / FRAME_BYTES);
        let mut rest = bytes;

        if let Some(low) = self.carry.take() {
            match rest.split_first() {
                Some((&high, tail)) => {
                    samples.push(to_float(low, high));
                    rest = tail;
                }
                None => {
                    self.carry = Some(low);
                    return samples;
                }
            }
        }

        let mut frames = rest.chunks_exact(FRAME_BYTES);
        samples.extend(frames.by_ref().map(|pair| to_float(pair[0], pair[1])));
        self.carry = frames.remainder().first().copied();

        self.frames_decoded += samples.len() as u64;
        samples
    }

    /// Number of bytes held back for the next read
    pub fn carry_len(&self) -> usize {
        usize::from(self.carry.is_some())
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// End of stream. A dangling partial frame means truncated input.
    pub fn finish(self) -> Result<u64> {
        match self.carry {
            Some(_) => Err(Error::Decode(format!(
                "stream ended with a partial frame after {} frames",
                self.frames_decoded
            ))),
            None => Ok(self.frames_decoded),
        }
    }
}

fn to_float(low: u8, high: u8) -> f32 {
    i16::from_le_bytes([low, high]) as f32 / 32768.0
}

/// Pull `stream` to the end, handing each decoded batch to `on_frames`.
///
/// Returns `Error::Cancelled` as soon as `cancel` fires or `is_current`
/// reports the owning session gone; the stream is dropped on return either
/// way. Transport errors and `on_frames` errors abort the pump.
pub async fn pump<C, F>(
    mut stream: ByteStream,
    cancel: &CancellationToken,
    is_current: C,
    mut on_frames: F,
) -> Result<u64>
where
    C: Fn() -> bool,
    F: FnMut(Vec<f32>) -> Result<()>,
{
    let mut decoder = StreamDecoder::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            next = stream.next() => next,
        };

        if !is_current() {
            debug!("Session superseded during stream read");
            return Err(Error::Cancelled);
        }

        let chunk = match next {
            Some(chunk) => chunk?,
            None => break,
        };

        let samples = decoder.decode(&chunk);
        if !samples.is_empty() {
            on_frames(samples)?;
        }
    }

    decoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::provider::chunked_stream;
    use futures::stream;

    fn pcm(values: &[i16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_decode_normalizes() {
        let mut decoder = StreamDecoder::new();
        let samples = decoder.decode(&pcm(&[0, i16::MIN, 16384]));
        assert_eq!(samples, vec![0.0, -1.0, 0.5]);
        assert_eq!(decoder.carry_len(), 0);
    }

    #[test]
    fn test_odd_byte_is_carried() {
        let bytes = pcm(&[1000, -1000]);
        let mut decoder = StreamDecoder::new();

        let first = decoder.decode(&bytes[..3]);
        assert_eq!(first.len(), 1);
        assert_eq!(decoder.carry_len(), 1);

        let second = decoder.decode(&bytes[3..]);
        assert_eq!(second, vec![-1000.0 / 32768.0]);
        assert_eq!(decoder.finish().unwrap(), 2);
    }

    #[test]
    fn test_single_byte_reads() {
        let bytes = pcm(&[7, -7, 300]);
        let mut decoder = StreamDecoder::new();
        let samples: Vec<f32> = bytes.iter().flat_map(|b| decoder.decode(&[*b])).collect();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[2], 300.0 / 32768.0);
    }

    #[test]
    fn test_empty_read_keeps_carry() {
        let mut decoder = StreamDecoder::new();
        decoder.decode(&[0x10]);
        assert!(decoder.decode(&[]).is_empty());
        assert_eq!(decoder.carry_len(), 1);
    }

    #[test]
    fn test_truncated_stream_is_decode_error() {
        let mut decoder = StreamDecoder::new();
        decoder.decode(&[0, 0, 5]);
        assert!(matches!(decoder.finish(), Err(Error::Decode(_))));
    }

    #[tokio::test]
    async fn test_pump_collects_frames() {
        let bytes = pcm(&[1, 2, 3, 4]);
        let chunks = vec![bytes[..3].to_vec(), bytes[3..].to_vec()];
        let cancel = CancellationToken::new();

        let mut collected = Vec::new();
        let frames = pump(chunked_stream(chunks, cancel.clone()), &cancel, || true, |s| {
            collected.extend(s);
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(frames, 4);
        assert_eq!(collected.len(), 4);
    }

    #[tokio::test]
    async fn test_pump_stale_session_is_cancelled() {
        let cancel = CancellationToken::new();
        let stream = chunked_stream(vec![pcm(&[1, 2])], cancel.clone());

        let result = pump(stream, &cancel, || false, |_| Ok(())).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_pump_transport_error() {
        let cancel = CancellationToken::new();
        let stream: ByteStream = stream::iter(vec![
            Ok(pcm(&[1])),
            Err(TransportError::new("connection reset")),
        ])
        .boxed();

        let result = pump(stream, &cancel, || true, |_| Ok(())).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
