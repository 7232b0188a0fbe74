//! Error types for session management.

use crate::midi::midi_import::MidiImportError;
use crate::session::SessionHandle;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = SessionError> = std::result::Result<T, E>;

/// Everything that can go wrong while managing SoundFont sessions.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The handle was never issued, or its session was already unloaded.
    #[error("no session with handle {0}")]
    NotFound(SessionHandle),

    /// MIDI channel outside 0-15.
    #[error("invalid MIDI channel {0} (expected 0-15)")]
    InvalidChannel(u8),

    /// A 7-bit MIDI data value (key, velocity, controller, ...) above 127.
    #[error("invalid {what} {value} (expected 0-127)")]
    InvalidData { what: &'static str, value: u8 },

    /// Synthesis parameters the engine cannot honour.
    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),

    /// The sound bank could not be read or parsed.
    #[error("failed to load SoundFont {}: {reason}", path.display())]
    SoundBank { path: PathBuf, reason: String },

    /// The synthesizer rejected its settings.
    #[error("failed to create synthesizer: {0}")]
    Synthesizer(String),

    /// The MIDI file could not be read or parsed.
    #[error("failed to load MIDI file {}", path.display())]
    MidiFile {
        path: PathBuf,
        #[source]
        source: MidiImportError,
    },

    /// The audio output device could not be opened.
    #[error("failed to open audio output: {0}")]
    Output(String),

    /// A worker thread could not be started.
    #[error("failed to spawn worker thread")]
    Spawn(#[source] std::io::Error),
}
