//! File-backed speech provider
//!
//! Serves pre-rendered audio through the same contract a network TTS backend
//! uses, which makes it the provider behind `voxline play`. WAV files are
//! decoded with hound, downmixed, resampled to the engine rate and encoded as
//! 16-bit little-endian PCM. Files ending in `.pcm` are assumed to already be
//! in engine format and pass through untouched.

use crate::audio::Resampler;
use crate::error::{Error, Result, TransportError};
use crate::provider::{ByteStream, SpeechProvider, StreamFactory};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default stream chunk size; odd so every sample boundary gets exercised
pub const DEFAULT_CHUNK_BYTES: usize = 4095;

/// Provider that streams audio files as engine PCM.
#[derive(Debug, Clone)]
pub struct FileProvider {
    sample_rate: u32,
    chunk_bytes: usize,
    pacing: Option<Duration>,
}

impl FileProvider {
    /// Provider producing PCM at `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            pacing: None,
        }
    }

    /// Bytes per stream chunk (minimum 1)
    pub fn with_chunk_bytes(mut self, chunk_bytes: usize) -> Self {
        self.chunk_bytes = chunk_bytes.max(1);
        self
    }

    /// Delay before each chunk, simulating network arrival.
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = Some(pacing);
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Load `path` and encode it as mono 16-bit little-endian PCM.
    pub fn load_pcm(&self, path: &Path) -> Result<Vec<u8>> {
        let is_raw = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("pcm"))
            .unwrap_or(false);

        if is_raw {
            let bytes = std::fs::read(path)
                .map_err(|e| TransportError::new(format!("{}: {}", path.display(), e)))?;
            debug!("Loaded {} raw PCM bytes from {}", bytes.len(), path.display());
            return Ok(bytes);
        }

        let (samples, rate) = read_wav_mono(path)?;
        let samples = Resampler::resample(&samples, rate, self.sample_rate)?;
        debug!(
            "Loaded {} frames from {} ({}Hz -> {}Hz)",
            samples.len(),
            path.display(),
            rate,
            self.sample_rate
        );
        Ok(encode_pcm16(&samples))
    }

    /// Stream factory that opens `path` when its segment is dequeued.
    pub fn factory(&self, path: PathBuf) -> StreamFactory {
        let provider = self.clone();
        Box::new(move |cancel| Box::pin(async move { provider.open_path(path, cancel).await }))
    }

    async fn open_path(self, path: PathBuf, cancel: CancellationToken) -> Result<ByteStream> {
        let loader = self.clone();
        let bytes = tokio::task::spawn_blocking(move || loader.load_pcm(&path))
            .await
            .map_err(|e| Error::InvalidState(format!("File loader task failed: {}", e)))??;

        let chunks: Vec<Vec<u8>> = bytes.chunks(self.chunk_bytes).map(<[u8]>::to_vec).collect();
        let until = cancel.cancelled_owned();

        let stream: ByteStream = match self.pacing {
            Some(delay) => stream::iter(chunks)
                .then(move |chunk| async move {
                    tokio::time::sleep(delay).await;
                    Ok::<_, TransportError>(chunk)
                })
                .take_until(until)
                .boxed(),
            None => stream::iter(chunks.into_iter().map(Ok))
                .take_until(until)
                .boxed(),
        };
        Ok(stream)
    }
}

impl SpeechProvider for FileProvider {
    /// `text` names the file to play.
    fn open_stream(&self, text: String, cancel: CancellationToken) -> BoxFuture<'static, Result<ByteStream>> {
        let provider = self.clone();
        Box::pin(async move {
            provider
                .open_path(PathBuf::from(text.trim()), cancel)
                .await
        })
    }
}

/// Decode a WAV file to mono f32 at its native rate.
fn read_wav_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path).map_err(|e| match e {
        hound::Error::IoError(io) => {
            Error::Transport(TransportError::new(format!("{}: {}", path.display(), io)))
        }
        other => Error::Decode(format!("{}: {}", path.display(), other)),
    })?;

    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Decode(format!("{}: {}", path.display(), e)))?,
        hound::SampleFormat::Int => {
            let scale = (1u64 << (spec.bits_per_sample.saturating_sub(1) as u32)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Decode(format!("{}: {}", path.display(), e)))?
        }
    };

    Ok((Resampler::downmix(&interleaved, spec.channels), spec.sample_rate))
}

/// Encode f32 samples as 16-bit little-endian PCM.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|s| ((s.clamp(-1.0, 1.0) * 32767.0).round() as i16).to_le_bytes())
        .collect()
}
