//! SoundFont sessions and their lifecycle.
//!
//! A [`Session`] bundles everything one loaded SoundFont needs: its
//! configuration, its synthesizer, an optional real-time output stream,
//! and an optional MIDI file player. Sessions live in a [`Registry`] and
//! are driven through the [`SessionManager`].

mod driver;
mod manager;
mod playback;
mod registry;

pub use driver::OutputDriver;
pub use manager::SessionManager;
pub use playback::{PlaybackController, PlaybackEvent, PlaybackEvents, PlaybackState};
pub use registry::Registry;

use crate::audio::{LoadedSynth, OutputStream, SharedSynth, SoundBank, Synth};
use crate::config::SessionConfig;
use crate::midi::{Sequencer, CHANNEL_COUNT};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Caller-visible identifier of one session.
///
/// Issued by [`Registry::allocate`]; never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionHandle(u64);

impl SessionHandle {
    /// Wraps a raw value received from a caller.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw handle value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One loaded SoundFont and the resources attached to it.
///
/// Fields drop in declaration order, which is also the teardown order:
/// the player and the output stream both call into the synthesizer from
/// their own threads and must be gone before it is released.
pub struct Session {
    handle: SessionHandle,
    /// Present while a MIDI file is playing or paused.
    pub(crate) sequencer: Option<Arc<Sequencer>>,
    /// Present while sound may be produced.
    pub(crate) output: Option<Box<dyn OutputStream>>,
    pub(crate) synth: SharedSynth,
    sound_bank: SoundBank,
    config: SessionConfig,
}

impl Session {
    /// Wraps a freshly loaded synthesizer and selects `bank`/`program`
    /// on every channel. No output stream is opened.
    pub(crate) fn new(
        handle: SessionHandle,
        config: SessionConfig,
        loaded: LoadedSynth,
        bank: u16,
        program: u8,
    ) -> Self {
        let LoadedSynth { synth, sound_bank } = loaded;
        let session = Self {
            handle,
            sequencer: None,
            output: None,
            synth: Arc::new(Mutex::new(synth)),
            sound_bank,
            config,
        };
        session.with_synth(|synth| {
            for channel in 0..CHANNEL_COUNT {
                synth.program_select(channel, bank, program);
            }
        });
        session
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn sound_bank(&self) -> &SoundBank {
        &self.sound_bank
    }

    /// Whether a real-time output stream is currently open.
    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    /// Whether a MIDI file player is attached.
    pub fn has_sequencer(&self) -> bool {
        self.sequencer.is_some()
    }

    /// Runs `f` with the synthesizer locked.
    ///
    /// A lock poisoned by a panicking render or player thread is
    /// recovered; the synthesizer itself stays usable.
    pub(crate) fn with_synth<R>(&self, f: impl FnOnce(&mut dyn Synth) -> R) -> R {
        let mut synth = self.synth.lock().unwrap_or_else(|poisoned| {
            warn!(handle = %self.handle, "recovering poisoned synthesizer lock");
            poisoned.into_inner()
        });
        f(&mut **synth)
    }

    /// Releases every resource in dependency order: player, output
    /// stream, synthesizer, configuration.
    pub(crate) fn teardown(self) {
        let Session {
            handle,
            sequencer,
            output,
            synth,
            sound_bank,
            config,
        } = self;

        if let Some(sequencer) = sequencer {
            sequencer.stop();
            drop(sequencer);
            debug!(handle = %handle, "player released");
        }
        if let Some(mut output) = output {
            output.close();
            drop(output);
            debug!(handle = %handle, "output stream released");
        }
        drop(synth);
        drop(sound_bank);
        drop(config);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.handle)
            .field("sound_bank", &self.sound_bank.id)
            .field("has_output", &self.has_output())
            .field("has_sequencer", &self.has_sequencer())
            .finish()
    }
}
