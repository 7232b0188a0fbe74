//! rodio-backed real-time output.
//!
//! rodio's `OutputStream` must stay on the thread that created it, so
//! every stream gets a dedicated thread that opens the device, starts
//! an endless [`SynthSource`], and parks until the stream is closed.

use super::{AudioOutput, OutputStream, SharedSynth};
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use rodio::Source;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Audio source that generates samples from the synthesizer.
/// Implements rodio's Source trait for playback.
pub(crate) struct SynthSource {
    synth: SharedSynth,
    sample_rate: u32,
    gain: f32,
    left_buf: Vec<f32>,
    right_buf: Vec<f32>,
    /// Current position in the buffer.
    buf_pos: usize,
    /// Current channel (0 = left, 1 = right).
    channel: usize,
}

impl SynthSource {
    pub(crate) fn new(synth: SharedSynth, config: &SessionConfig) -> Self {
        Self {
            synth,
            sample_rate: config.sample_rate,
            gain: config.gain,
            left_buf: vec![0.0; config.period_size],
            right_buf: vec![0.0; config.period_size],
            buf_pos: config.period_size, // Start at end to trigger first render
            channel: 0,
        }
    }
}

impl Iterator for SynthSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.buf_pos >= self.left_buf.len() {
            if let Ok(mut synth) = self.synth.lock() {
                synth.render(&mut self.left_buf, &mut self.right_buf);
            } else {
                self.left_buf.fill(0.0);
                self.right_buf.fill(0.0);
            }
            self.buf_pos = 0;
        }

        // Interleave stereo samples: L, R, L, R, ...
        let sample = if self.channel == 0 {
            self.left_buf[self.buf_pos]
        } else {
            self.right_buf[self.buf_pos]
        };

        self.channel = 1 - self.channel;
        if self.channel == 0 {
            self.buf_pos += 1;
        }

        Some(sample * self.gain)
    }
}

impl Source for SynthSource {
    fn current_frame_len(&self) -> Option<usize> {
        None // Continuous stream
    }

    fn channels(&self) -> u16 {
        2
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// Opens streams on the default output device.
#[derive(Debug, Default, Clone, Copy)]
pub struct RodioOutput;

impl AudioOutput for RodioOutput {
    fn open(
        &self,
        name: &str,
        config: &SessionConfig,
        synth: SharedSynth,
    ) -> Result<Box<dyn OutputStream>> {
        let (ready_tx, ready_rx) = mpsc::sync_channel::<std::result::Result<(), String>>(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let source = SynthSource::new(synth, config);

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let (stream, handle) = match rodio::OutputStream::try_default() {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                if let Err(e) = handle.play_raw(source) {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Returns on an explicit stop or when the owner is dropped.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(SessionError::Spawn)?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                debug!(
                    stream = name,
                    sample_rate = config.sample_rate,
                    latency_ms = config.latency_ms(),
                    priority = config.realtime_priority,
                    "output stream running"
                );
                Ok(Box::new(RodioStream {
                    stop_tx: Some(stop_tx),
                    thread: Some(thread),
                }))
            }
            Ok(Err(reason)) => {
                let _ = thread.join();
                Err(SessionError::Output(reason))
            }
            Err(_) => {
                let _ = thread.join();
                Err(SessionError::Output(
                    "output thread exited before the stream started".to_string(),
                ))
            }
        }
    }
}

/// Handle to a stream living on its own thread.
struct RodioStream {
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl OutputStream for RodioStream {
    fn close(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("output thread panicked");
            }
        }
    }
}

impl Drop for RodioStream {
    fn drop(&mut self) {
        self.close();
    }
}
