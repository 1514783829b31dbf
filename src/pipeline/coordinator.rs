//! Pipeline coordinator
//!
//! A single worker that, every cycle, waits until every stream holds a
//! transmit credit, then pulls one PCM block per stream, encodes it and
//! hands the frame to the transport with the stream's next sequence
//! number. All streams advance together or not at all.

use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::{PcmSource, SharedRingBuffer, ToneWaveform};
use crate::codec::{CodecConfig, FrameEncoder};
use crate::constants::DIAGNOSTIC_INTERVAL;
use crate::error::{CodecError, PipelineError};
use crate::pipeline::credit::CreditTracker;
use crate::pipeline::stream::{StreamCounters, StreamSlot, StreamStats};
use crate::transport::TransportSink;

/// Where the streams' PCM comes from
pub enum SourceMode {
    /// Synthetic sine tone at the given frequency
    Tone { frequency_hz: u32 },
    /// One capture ring buffer per stream, in stream order
    Capture(Vec<SharedRingBuffer>),
}

/// What happened in one completed cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub accepted: usize,
    /// Streams whose frame the transport refused
    pub rejected: Vec<usize>,
}

/// Pipeline-wide diagnostics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub cycles: u64,
    pub saturated_releases: u64,
    pub streams: Vec<StreamStats>,
}

/// The encode-and-pace loop, in the RUNNING state once constructed
pub struct Coordinator<E, T> {
    codec: CodecConfig,
    streams: Vec<StreamSlot<E>>,
    credits: Arc<CreditTracker>,
    sink: T,
    /// Scratch PCM block, reused every stream and cycle
    pcm: Vec<i16>,
    /// Frames of the current cycle, in stream order
    frames: Vec<Bytes>,
}

impl<E, T> Coordinator<E, T>
where
    E: FrameEncoder,
    T: TransportSink,
{
    /// INIT: validate the codec configuration, set up the PCM sources
    /// and one encoder per stream. Any failure aborts pipeline startup.
    pub fn init<F>(
        codec: CodecConfig,
        mode: SourceMode,
        credits: Arc<CreditTracker>,
        sink: T,
        mut make_encoder: F,
    ) -> Result<Self, PipelineError>
    where
        F: FnMut(usize, &CodecConfig) -> Result<E, CodecError>,
    {
        if let Err(e) = codec.validate() {
            tracing::error!("Cannot start codec: {}", e);
            return Err(PipelineError::InvalidCodecConfig(e));
        }

        let stream_count = credits.stream_count();
        let block_len = codec.samples_per_frame();

        let sources: Vec<PcmSource> = match mode {
            SourceMode::Tone { frequency_hz } => {
                let waveform = ToneWaveform::new(frequency_hz, codec.sample_rate_hz, block_len);
                tracing::info!(
                    "Generated {} Hz tone, {} samples at {} Hz",
                    frequency_hz,
                    waveform.len(),
                    codec.sample_rate_hz
                );
                (0..stream_count)
                    .map(|_| PcmSource::Tone(waveform.cursor()))
                    .collect()
            }
            SourceMode::Capture(buffers) => {
                if buffers.len() != stream_count {
                    return Err(PipelineError::StreamCountMismatch {
                        expected: stream_count,
                        actual: buffers.len(),
                    });
                }
                buffers.into_iter().map(PcmSource::Capture).collect()
            }
        };

        let mut streams = Vec::with_capacity(stream_count);
        for (id, source) in sources.into_iter().enumerate() {
            tracing::info!("Initializing encoder for stream {}", id);
            let encoder = make_encoder(id, &codec).map_err(|source| {
                tracing::error!("Failed to set up encoder for stream {}: {}", id, source);
                PipelineError::EncoderInit { stream: id, source }
            })?;
            streams.push(StreamSlot::new(id, encoder, source));
        }

        Ok(Self {
            codec,
            streams,
            credits,
            sink,
            pcm: vec![0; block_len],
            frames: Vec::with_capacity(stream_count),
        })
    }

    pub fn codec(&self) -> &CodecConfig {
        &self.codec
    }

    pub fn streams(&self) -> &[StreamSlot<E>] {
        &self.streams
    }

    #[cfg(test)]
    pub(crate) fn streams_mut(&mut self) -> &mut [StreamSlot<E>] {
        &mut self.streams
    }

    /// Run one cycle, waiting for every stream's credit first
    pub fn run_cycle(&mut self) -> Result<CycleReport, PipelineError> {
        self.credits.acquire_all()?;
        self.process_cycle()
    }

    /// Run one cycle only if every stream already holds a credit
    pub fn try_run_cycle(&mut self) -> Result<Option<CycleReport>, PipelineError> {
        if self.credits.is_closed() {
            return Err(PipelineError::Stopped);
        }
        if !self.credits.try_acquire_all() {
            return Ok(None);
        }
        self.process_cycle().map(Some)
    }

    fn process_cycle(&mut self) -> Result<CycleReport, PipelineError> {
        // Encode every stream before handing anything off, so a fatal
        // encoder fault leaves all sequence numbers untouched
        self.frames.clear();
        for slot in &mut self.streams {
            let stream = slot.id();
            slot.source_mut().next_block(stream, &mut self.pcm);
            let frame = slot
                .encoder_mut()
                .encode(&self.pcm)
                .map_err(|source| PipelineError::FatalEncode { stream, source })?;
            self.frames.push(frame);
        }

        let mut report = CycleReport::default();
        for (slot, frame) in self.streams.iter_mut().zip(self.frames.drain(..)) {
            let stream = slot.id();
            let seq = slot.take_seq();

            match self.sink.send(stream, frame, seq) {
                Ok(()) => {
                    report.accepted += 1;
                    let sent = slot.record_sent();
                    if sent % DIAGNOSTIC_INTERVAL == 0 {
                        tracing::info!("Stream {}: Sent {} total frames", stream, sent);
                    }
                }
                Err(e) => {
                    slot.record_rejected();
                    report.rejected.push(stream);
                    tracing::warn!("Unable to send frame {} on stream {}: {}", seq, stream, e);
                }
            }
        }

        Ok(report)
    }

    /// RUNNING: cycle until the credit tracker is closed. Only a fatal
    /// encoder fault ends the loop with an error.
    pub fn run(mut self) -> Result<(), PipelineError> {
        tracing::info!(
            "Pipeline running: {} streams, {} Hz, {} us frames, {} octets",
            self.streams.len(),
            self.codec.sample_rate_hz,
            self.codec.frame_duration_us,
            self.codec.octets_per_frame
        );

        loop {
            match self.run_cycle() {
                Ok(_) => {}
                Err(PipelineError::Stopped) => {
                    tracing::info!("Pipeline stopped");
                    return Ok(());
                }
                Err(e) => {
                    tracing::error!("Pipeline halted: {}", e);
                    return Err(e);
                }
            }
        }
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            cycles: self.credits.cycles(),
            saturated_releases: self.credits.saturated_releases(),
            streams: self
                .streams
                .iter()
                .map(|slot| StreamStats {
                    stream: slot.id(),
                    next_seq: slot.seq_num(),
                    sent: slot.sent_count(),
                    rejected: slot.counters().rejected(),
                    cycles: slot.counters().cycles(),
                    credits: self.credits.available(slot.id()),
                    underruns: slot.source().underrun_count(),
                    overflow_bytes: slot.source().overflow_bytes(),
                })
                .collect(),
        }
    }
}

impl<E, T> Coordinator<E, T>
where
    E: FrameEncoder + 'static,
    T: TransportSink + 'static,
{
    /// Move the coordinator onto its dedicated worker thread
    pub fn spawn(self) -> Result<PipelineHandle, PipelineError> {
        let credits = self.credits.clone();
        let views = self
            .streams
            .iter()
            .map(|slot| StreamView {
                stream: slot.id(),
                counters: slot.counters(),
                buffer: match slot.source() {
                    PcmSource::Capture(buffer) => Some(buffer.clone()),
                    PcmSource::Tone(_) => None,
                },
            })
            .collect();

        let handle = thread::Builder::new()
            .name("encoder".to_string())
            .spawn(move || self.run())
            .map_err(|e| PipelineError::Spawn(e.to_string()))?;

        Ok(PipelineHandle {
            credits,
            views,
            handle: Some(handle),
        })
    }
}

struct StreamView {
    stream: usize,
    counters: Arc<StreamCounters>,
    buffer: Option<SharedRingBuffer>,
}

/// Handle to a coordinator running on its own thread
pub struct PipelineHandle {
    credits: Arc<CreditTracker>,
    views: Vec<StreamView>,
    handle: Option<JoinHandle<Result<(), PipelineError>>>,
}

impl PipelineHandle {
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            cycles: self.credits.cycles(),
            saturated_releases: self.credits.saturated_releases(),
            streams: self
                .views
                .iter()
                .map(|view| StreamStats {
                    stream: view.stream,
                    next_seq: view.counters.next_seq(),
                    sent: view.counters.sent(),
                    rejected: view.counters.rejected(),
                    cycles: view.counters.cycles(),
                    credits: self.credits.available(view.stream),
                    underruns: view.buffer.as_ref().map_or(0, |b| b.underrun_count()),
                    overflow_bytes: view.buffer.as_ref().map_or(0, |b| b.overflow_bytes()),
                })
                .collect(),
        }
    }

    /// Stop the worker and wait for it
    pub fn stop(&mut self) -> Result<(), PipelineError> {
        self.credits.close();
        self.join()
    }

    /// Wait for the worker to end on its own, i.e. after a fatal encoder
    /// fault or once someone else closed the credit tracker
    pub fn join(&mut self) -> Result<(), PipelineError> {
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(payload) => {
                    let reason = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown cause".to_string());
                    tracing::error!("Encoder thread panicked: {}", reason);
                    Err(PipelineError::WorkerPanicked(reason))
                }
            },
            None => Ok(()),
        }
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
