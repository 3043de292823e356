//! Audio output using cpal
//!
//! `CpalOutput` turns a cpal device stream into an `AudioOutput`: the device
//! callback mixes every scheduled buffer whose start frame has been reached,
//! and the output clock is the number of frames the device has consumed.
//!
//! The cpal `Stream` is not `Send` on every host, so it lives on a dedicated
//! thread for the lifetime of the output. Everything the engine touches is
//! shared state behind `Arc`.

use crate::audio::types::{AudioOutput, EndedSender, OutputFactory, PcmBuffer, SourceId};
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long to wait for the output thread to bring the stream up
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// A scheduled buffer inside the device mixer
struct Voice {
    id: SourceId,
    /// Device frame at which the first sample plays
    start_frame: u64,
    samples: Vec<f32>,
    /// Source samples advanced per device frame
    step: f64,
}

impl Voice {
    /// Sample at device frame `frame`, or None once the voice is exhausted.
    fn sample_at(&self, frame: u64) -> Option<f32> {
        if frame < self.start_frame {
            return Some(0.0);
        }
        let position = (frame - self.start_frame) as f64 * self.step;
        let index = position as usize;
        let current = *self.samples.get(index)?;
        let next = self.samples.get(index + 1).copied().unwrap_or(current);
        let frac = (position - index as f64) as f32;
        Some(current + (next - current) * frac)
    }
}

/// State shared between the engine side and the device callback
struct Mixer {
    voices: Mutex<Vec<Voice>>,
    frames_played: AtomicU64,
    closed: AtomicBool,
    ended_tx: EndedSender,
}

impl Mixer {
    fn voices(&self) -> MutexGuard<'_, Vec<Voice>> {
        self.voices.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fill one device buffer. Mono voices are duplicated to every channel.
    fn render<T>(&self, data: &mut [T], channels: usize)
    where
        T: SizedSample + FromSample<f32>,
    {
        let channels = channels.max(1);
        let base = self.frames_played.load(Ordering::Acquire);
        let mut voices = self.voices();
        let mut finished = Vec::new();

        for (offset, frame) in data.chunks_mut(channels).enumerate() {
            let position = base + offset as u64;
            let mut mixed = 0.0f32;

            for voice in voices.iter() {
                match voice.sample_at(position) {
                    Some(sample) => mixed += sample,
                    None => {
                        if !finished.contains(&voice.id) {
                            finished.push(voice.id);
                        }
                    }
                }
            }

            let value = T::from_sample(mixed.clamp(-1.0, 1.0));
            for slot in frame.iter_mut() {
                *slot = value;
            }
        }

        if !finished.is_empty() {
            voices.retain(|v| !finished.contains(&v.id));
            for id in finished {
                let _ = self.ended_tx.send(id);
            }
        }

        let frames = (data.len() / channels) as u64;
        self.frames_played.fetch_add(frames, Ordering::Release);
    }
}

/// Real audio output backed by a cpal device stream.
pub struct CpalOutput {
    mixer: Arc<Mixer>,
    device_rate: u32,
    device_name: String,
    next_id: AtomicU64,
    shutdown_tx: Mutex<Option<std_mpsc::Sender<()>>>,
}

impl CpalOutput {
    /// List available audio output devices.
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();

        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::Device(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open a device and start its stream on the output thread.
    ///
    /// Falls back to the default device when `device_name` is not found.
    pub fn open(
        device_name: Option<String>,
        buffer_frames: Option<u32>,
        ended_tx: EndedSender,
    ) -> Result<Self> {
        let mixer = Arc::new(Mixer {
            voices: Mutex::new(Vec::new()),
            frames_played: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            ended_tx,
        });

        let (ready_tx, ready_rx) = std_mpsc::channel::<std::result::Result<(u32, String), String>>();
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();
        let thread_mixer = Arc::clone(&mixer);

        std::thread::Builder::new()
            .name("voxline-output".to_string())
            .spawn(move || {
                let stream = match start_stream(device_name, buffer_frames, thread_mixer) {
                    Ok((stream, rate, name)) => {
                        let _ = ready_tx.send(Ok((rate, name)));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };

                // Both an explicit close and a dropped sender end the stream.
                let _ = shutdown_rx.recv();
                if let Err(e) = stream.pause() {
                    debug!("Failed to pause stream during shutdown: {}", e);
                }
                drop(stream);
                debug!("Output thread exiting");
            })
            .map_err(|e| Error::Device(format!("Failed to spawn output thread: {}", e)))?;

        let (device_rate, device_name) = ready_rx
            .recv_timeout(OPEN_TIMEOUT)
            .map_err(|_| Error::Device("Output thread did not start".to_string()))?
            .map_err(Error::Device)?;

        info!("Audio output open on '{}' at {}Hz", device_name, device_rate);

        Ok(Self {
            mixer,
            device_rate,
            device_name,
            next_id: AtomicU64::new(1),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }
}

impl AudioOutput for CpalOutput {
    fn current_time(&self) -> f64 {
        self.mixer.frames_played.load(Ordering::Acquire) as f64 / self.device_rate as f64
    }

    fn schedule(&self, buffer: PcmBuffer, start_time: f64) -> Result<SourceId> {
        if self.is_closed() {
            return Err(Error::Device("Audio output is closed".to_string()));
        }
        if buffer.sample_rate() == 0 {
            return Err(Error::Decode("Buffer has no sample rate".to_string()));
        }

        let id = SourceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let start_frame = (start_time.max(0.0) * self.device_rate as f64).round() as u64;
        let step = buffer.sample_rate() as f64 / self.device_rate as f64;

        self.mixer.voices().push(Voice {
            id,
            start_frame,
            samples: buffer.into_samples(),
            step,
        });

        Ok(id)
    }

    fn stop_source(&self, id: SourceId) {
        self.mixer.voices().retain(|v| v.id != id);
    }

    fn close(&self) {
        if self.mixer.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.mixer.voices().clear();
        let sender = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(tx) = sender {
            let _ = tx.send(());
        }
        info!("Audio output closed");
    }

    fn is_closed(&self) -> bool {
        self.mixer.closed.load(Ordering::SeqCst)
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens `CpalOutput`s for the configured device.
#[derive(Debug, Clone, Default)]
pub struct CpalOutputFactory {
    device: Option<String>,
    buffer_frames: Option<u32>,
}

impl CpalOutputFactory {
    pub fn new(device: Option<String>, buffer_frames: Option<u32>) -> Self {
        Self {
            device,
            buffer_frames,
        }
    }
}

impl OutputFactory for CpalOutputFactory {
    fn open(&self, ended: EndedSender) -> Result<Arc<dyn AudioOutput>> {
        let output = CpalOutput::open(self.device.clone(), self.buffer_frames, ended)?;
        Ok(Arc::new(output))
    }
}

/// Runs on the output thread: select the device and start the stream.
fn start_stream(
    device_name: Option<String>,
    buffer_frames: Option<u32>,
    mixer: Arc<Mixer>,
) -> Result<(cpal::Stream, u32, String)> {
    let host = cpal::default_host();
    let device = select_device(&host, device_name.as_deref())?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let supported = device
        .default_output_config()
        .map_err(|e| Error::Device(format!("Failed to get default config: {}", e)))?;
    let sample_format = supported.sample_format();
    let mut config = supported.config();

    if let Some(size) = buffer_frames {
        config.buffer_size = cpal::BufferSize::Fixed(size);
        debug!("Using requested buffer size: {} frames", size);
    }

    debug!(
        "Audio config: sample_rate={}, channels={}, format={:?}, buffer_size={:?}",
        config.sample_rate.0, config.channels, sample_format, config.buffer_size
    );

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, mixer)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, mixer)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, mixer)?,
        other => {
            return Err(Error::Device(format!("Unsupported sample format: {:?}", other)));
        }
    };

    stream
        .play()
        .map_err(|e| Error::Device(format!("Failed to start stream: {}", e)))?;

    Ok((stream, config.sample_rate.0, name))
}

fn select_device(host: &cpal::Host, device_name: Option<&str>) -> Result<Device> {
    if let Some(name) = device_name {
        let mut devices = host
            .output_devices()
            .map_err(|e| Error::Device(format!("Failed to enumerate devices: {}", e)))?;

        if let Some(device) = devices.find(|d| d.name().ok().as_deref() == Some(name)) {
            info!("Found requested audio device: {}", name);
            return Ok(device);
        }
        warn!("Requested device '{}' not found, falling back to default device", name);
    }

    host.default_output_device()
        .ok_or_else(|| Error::Device("No default output device found".to_string()))
}

fn build_stream<T>(device: &Device, config: &StreamConfig, mixer: Arc<Mixer>) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let error_mixer = Arc::clone(&mixer);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                mixer.render(data, channels);
            },
            move |err| {
                // Later schedules fail with a device error and end the session.
                error!("Audio stream error: {}", err);
                error_mixer.closed.store(true, Ordering::SeqCst);
            },
            None,
        )
        .map_err(|e| Error::Device(format!("Failed to build stream: {}", e)))
}
