//! MIDI constants, value checks, and file playback.
//!
//! - `midi_import`: Standard MIDI File parsing into timed channel events
//! - `sequencer`: threaded real-time playback of a parsed file

pub mod midi_import;
pub mod sequencer;

use crate::error::{Result, SessionError};

pub use midi_import::{ChannelEvent, MidiImportError, MidiSequence, TimedEvent};
pub use sequencer::{LoopMode, PlayerStatus, Sequencer};

/// Number of MIDI channels on a synthesizer.
pub const CHANNEL_COUNT: u8 = 16;

/// General MIDI percussion channel (channel 10, zero-based 9).
pub const PERCUSSION_CHANNEL: u8 = 9;

/// Bank that holds the drum kits in a General MIDI SoundFont.
pub const PERCUSSION_BANK: u16 = 128;

/// Bank select (MSB).
pub const CC_BANK_SELECT: u8 = 0;

/// Damper (sustain) pedal.
pub const CC_SUSTAIN: u8 = 64;

/// All Sound Off: cuts voices immediately.
pub const CC_ALL_SOUND_OFF: u8 = 120;

/// Channel message status nibbles.
pub const NOTE_OFF: u8 = 0x80;
pub const NOTE_ON: u8 = 0x90;
pub const KEY_PRESSURE: u8 = 0xA0;
pub const CONTROL_CHANGE: u8 = 0xB0;
pub const PROGRAM_CHANGE: u8 = 0xC0;
pub const CHANNEL_PRESSURE: u8 = 0xD0;
pub const PITCH_BEND: u8 = 0xE0;

/// Checks that a channel is within 0-15.
pub fn check_channel(channel: u8) -> Result<u8> {
    if channel < CHANNEL_COUNT {
        Ok(channel)
    } else {
        Err(SessionError::InvalidChannel(channel))
    }
}

/// Checks that a data value fits in 7 bits.
pub fn check_data(what: &'static str, value: u8) -> Result<u8> {
    if value <= 127 {
        Ok(value)
    } else {
        Err(SessionError::InvalidData { what, value })
    }
}
