//! Live audio capture
//!
//! Opens a cpal input stream on a dedicated thread and forwards each
//! callback's samples, converted to i16, to the capture ingestion logic.
//! A 1 ms callback period is requested when the device allows it.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::device::get_input_device;
use crate::audio::ingest::CaptureIngest;
use crate::error::AudioError;

/// Capture from one input device into the per-stream ring buffers
pub struct AudioCapture {
    /// Device identifier, `None` for the default input
    device_id: Option<String>,

    /// Whether capture is running
    running: Arc<AtomicBool>,

    /// Stream thread handle
    thread_handle: Option<JoinHandle<()>>,

    /// Channel for stream errors
    error_rx: Option<Receiver<AudioError>>,

    /// Total samples captured
    samples_captured: Arc<AtomicU64>,

    /// Stream configuration
    config: StreamConfig,

    /// Longest callback period to expect, in capture frames
    period_frames: u32,
}

/// Period used when the host does not report its buffer sizes
const FALLBACK_PERIOD_MS: u32 = 100;

/// Pick the callback buffer size: 1 ms if the device allows it, else the
/// host default with the largest period it might use
fn choose_buffer_size(sample_rate: u32, range: Option<(u32, u32)>) -> (cpal::BufferSize, u32) {
    let target = (sample_rate / 1000).max(1);
    match range {
        Some((min, max)) if (min..=max).contains(&target) => {
            (cpal::BufferSize::Fixed(target), target)
        }
        Some((_, max)) => (cpal::BufferSize::Default, max),
        None => (
            cpal::BufferSize::Default,
            sample_rate / 1000 * FALLBACK_PERIOD_MS,
        ),
    }
}

impl AudioCapture {
    /// Create a capture for the given device at a fixed rate and layout
    pub fn new(
        device_id: Option<&str>,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self, AudioError> {
        let device = get_input_device(device_id)?;
        if !device.supports(sample_rate, channels) {
            return Err(AudioError::UnsupportedFormat(format!(
                "{} cannot capture {} Hz with {} channels",
                device.name, sample_rate, channels
            )));
        }

        let (buffer_size, period_frames) =
            choose_buffer_size(sample_rate, device.input_buffer_range(sample_rate, channels));
        tracing::debug!(?buffer_size, period_frames, "Capture buffer size for {}", device.name);

        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size,
        };

        Ok(Self {
            device_id: device_id.map(str::to_string),
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            error_rx: None,
            samples_captured: Arc::new(AtomicU64::new(0)),
            config,
            period_frames,
        })
    }

    /// Longest callback delivery to expect, in capture frames
    pub fn period_frames(&self) -> u32 {
        self.period_frames
    }

    /// Start capturing audio into `ingest`
    pub fn start(&mut self, ingest: Arc<CaptureIngest>) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = get_input_device(self.device_id.as_deref())?;
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        self.error_rx = Some(error_rx);

        let running = self.running.clone();
        let running_for_loop = self.running.clone();
        let ratio = ingest.ratio();
        let samples_captured = self.samples_captured.clone();
        let config = self.config.clone();

        self.samples_captured.store(0, Ordering::SeqCst);
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let mut scratch: Vec<i16> = Vec::new();

                let stream = cpal_device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }

                        samples_captured.fetch_add(data.len() as u64, Ordering::Relaxed);

                        scratch.clear();
                        scratch.extend(
                            data.iter()
                                .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16),
                        );
                        ingest.on_samples(&scratch);
                    },
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            tracing::error!("Failed to start capture stream: {}", e);
                            return;
                        }

                        // Keep thread alive while running
                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(std::time::Duration::from_millis(10));
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to build capture stream: {}", e);
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);
        tracing::info!(
            "Capture started: {} Hz, {} channels, downsample ratio {}",
            self.config.sample_rate.0,
            self.config.channels,
            ratio
        );
        Ok(())
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    /// Check if capture is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get total samples captured
    pub fn samples_captured(&self) -> u64 {
        self.samples_captured.load(Ordering::Relaxed)
    }

    /// Check for errors
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_millisecond_period_when_allowed() {
        let (size, period) = choose_buffer_size(48_000, Some((32, 4096)));
        assert_eq!(size, cpal::BufferSize::Fixed(48));
        assert_eq!(period, 48);
    }

    #[test]
    fn test_default_period_falls_back_to_range_max() {
        let (size, period) = choose_buffer_size(48_000, Some((256, 2048)));
        assert_eq!(size, cpal::BufferSize::Default);
        assert_eq!(period, 2048);

        let (_, period) = choose_buffer_size(48_000, None);
        assert_eq!(period, 4800);
    }
}
