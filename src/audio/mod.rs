//! Synthesis engine and audio output.
//!
//! The session layer talks to the outside world through three seams:
//! - [`Synth`]: a synthesizer instance (note on/off, controllers, render)
//! - [`SoundBankLoader`]: creates a synthesizer with a SoundFont loaded
//! - [`AudioOutput`]: binds a synthesizer to a real-time output stream
//!
//! The default implementations use rustysynth for synthesis and rodio
//! for output.

pub mod engine;
pub mod output;

#[cfg(test)]
pub(crate) mod testing;

use crate::config::SessionConfig;
use crate::error::Result;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

pub use engine::RustySynthLoader;
pub use output::RodioOutput;

/// A synthesizer shared between the caller, the sequencer worker, and
/// the render callback.
pub type SharedSynth = Arc<Mutex<Box<dyn Synth>>>;

/// Operations the session layer needs from a synthesizer.
///
/// Channels are 0-15 and data values 0-127; callers validate before
/// reaching the engine.
pub trait Synth: Send {
    /// Starts a note.
    fn note_on(&mut self, channel: u8, key: u8, velocity: u8);

    /// Releases a note.
    fn note_off(&mut self, channel: u8, key: u8);

    /// Applies a control change.
    fn control_change(&mut self, channel: u8, controller: u8, value: u8);

    /// Selects a bank and program on a channel.
    fn program_select(&mut self, channel: u8, bank: u16, program: u8);

    /// Forwards a raw channel message (status nibble, two data bytes).
    fn channel_message(&mut self, channel: u8, command: u8, data1: u8, data2: u8);

    /// Renders the next block of stereo samples.
    fn render(&mut self, left: &mut [f32], right: &mut [f32]);

    /// Cuts every voice on a channel without release.
    fn all_sounds_off(&mut self, channel: u8) {
        self.control_change(channel, crate::midi::CC_ALL_SOUND_OFF, 0);
    }
}

/// Identifier of a sound bank loaded into a synthesizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoundBankId(u32);

/// Global counter for sound bank ids; 0 is never issued.
static SOUND_BANK_COUNTER: AtomicU32 = AtomicU32::new(1);

impl SoundBankId {
    /// Issues a new unique id.
    pub fn next() -> Self {
        Self(SOUND_BANK_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id value.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SoundBankId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A preset found in a sound bank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetInfo {
    pub bank: u16,
    pub program: u8,
    pub name: String,
}

/// Metadata of the sound bank a session was loaded with.
#[derive(Debug, Clone)]
pub struct SoundBank {
    pub id: SoundBankId,
    pub path: PathBuf,
    pub presets: Vec<PresetInfo>,
}

/// A freshly created synthesizer together with its sound bank.
pub struct LoadedSynth {
    pub synth: Box<dyn Synth>,
    pub sound_bank: SoundBank,
}

/// Creates synthesizers with a sound bank loaded.
pub trait SoundBankLoader: Send + Sync {
    /// Loads the sound bank at `path` into a new synthesizer configured
    /// from `config`.
    fn load(&self, path: &Path, config: &SessionConfig) -> Result<LoadedSynth>;
}

/// Produces real-time output streams.
pub trait AudioOutput: Send + Sync {
    /// Starts rendering `synth` to the audio device.
    ///
    /// Returns once the stream is running or has failed to start.
    fn open(
        &self,
        name: &str,
        config: &SessionConfig,
        synth: SharedSynth,
    ) -> Result<Box<dyn OutputStream>>;
}

/// A running output stream.
///
/// Dropping a stream closes it.
pub trait OutputStream: Send {
    /// Stops the stream, blocking until the render callback has quiesced.
    /// Calling it again is a no-op.
    fn close(&mut self);
}
