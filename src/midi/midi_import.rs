//! Standard MIDI File (SMF) import for playback.
//!
//! Flattens a .mid file into channel events stamped with their offset
//! from the start of the song. Supports SMF Format 0 (single track) and
//! Format 1 (multi-track) files with metrical or SMPTE timing.
//!
//! # Limitations
//!
//! - Format 2 (sequential) files are rejected
//! - SysEx and meta events other than tempo are dropped

use super::{
    CHANNEL_PRESSURE, CONTROL_CHANGE, KEY_PRESSURE, NOTE_OFF, NOTE_ON, PITCH_BEND, PROGRAM_CHANGE,
};
use midly::{Format, MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Microseconds per quarter note until the file sets a tempo (120 BPM).
const DEFAULT_TEMPO_USEC: u64 = 500_000;

/// Errors that can occur during MIDI import.
#[derive(Debug, Error)]
pub enum MidiImportError {
    /// File could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// MIDI parsing failed
    #[error("MIDI parse error: {0}")]
    Parse(String),
    /// Unsupported MIDI format or timing
    #[error("unsupported format: {0}")]
    Unsupported(String),
}

/// A channel voice message from the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    NoteOn { key: u8, velocity: u8 },
    NoteOff { key: u8 },
    KeyPressure { key: u8, value: u8 },
    Controller { controller: u8, value: u8 },
    ProgramChange { program: u8 },
    ChannelPressure { value: u8 },
    /// 14-bit bend value, 8192 = centre.
    PitchBend { value: u16 },
}

impl ChannelEvent {
    /// Splits the event into status nibble and data bytes.
    pub fn to_message(self) -> (u8, u8, u8) {
        match self {
            ChannelEvent::NoteOn { key, velocity } => (NOTE_ON, key, velocity),
            ChannelEvent::NoteOff { key } => (NOTE_OFF, key, 0),
            ChannelEvent::KeyPressure { key, value } => (KEY_PRESSURE, key, value),
            ChannelEvent::Controller { controller, value } => (CONTROL_CHANGE, controller, value),
            ChannelEvent::ProgramChange { program } => (PROGRAM_CHANGE, program, 0),
            ChannelEvent::ChannelPressure { value } => (CHANNEL_PRESSURE, value, 0),
            ChannelEvent::PitchBend { value } => {
                (PITCH_BEND, (value & 0x7F) as u8, ((value >> 7) & 0x7F) as u8)
            }
        }
    }

    fn from_midly(message: MidiMessage) -> Self {
        match message {
            // Note on with velocity 0 = note off
            MidiMessage::NoteOn { key, vel } if vel.as_int() == 0 => ChannelEvent::NoteOff {
                key: key.as_int(),
            },
            MidiMessage::NoteOn { key, vel } => ChannelEvent::NoteOn {
                key: key.as_int(),
                velocity: vel.as_int(),
            },
            MidiMessage::NoteOff { key, .. } => ChannelEvent::NoteOff { key: key.as_int() },
            MidiMessage::Aftertouch { key, vel } => ChannelEvent::KeyPressure {
                key: key.as_int(),
                value: vel.as_int(),
            },
            MidiMessage::Controller { controller, value } => ChannelEvent::Controller {
                controller: controller.as_int(),
                value: value.as_int(),
            },
            MidiMessage::ProgramChange { program } => ChannelEvent::ProgramChange {
                program: program.as_int(),
            },
            MidiMessage::ChannelAftertouch { vel } => ChannelEvent::ChannelPressure {
                value: vel.as_int(),
            },
            MidiMessage::PitchBend { bend } => ChannelEvent::PitchBend {
                value: bend.0.as_int(),
            },
        }
    }
}

/// A channel event with its time offset from the start of the song.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedEvent {
    pub at: Duration,
    pub channel: u8,
    pub event: ChannelEvent,
}

/// A parsed MIDI file, ready to be scheduled.
#[derive(Debug, Clone, Default)]
pub struct MidiSequence {
    events: Vec<TimedEvent>,
    duration: Duration,
}

/// An event taken from one track, before timing is resolved.
enum RawEvent {
    Tempo(u32),
    Channel(u8, ChannelEvent),
    EndOfTrack,
}

impl MidiSequence {
    /// Reads and parses a MIDI file.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, MidiImportError> {
        let data = fs::read(path.as_ref())?;
        Self::parse(&data)
    }

    /// Parses MIDI file contents.
    pub fn parse(data: &[u8]) -> Result<Self, MidiImportError> {
        let smf = Smf::parse(data).map_err(|e| MidiImportError::Parse(e.to_string()))?;

        if smf.header.format == Format::Sequential {
            return Err(MidiImportError::Unsupported(
                "Format 2 (sequential) MIDI files not supported".to_string(),
            ));
        }

        // Merge tracks by absolute tick. The sort is stable, so events on
        // the same tick keep their file order, track by track.
        let mut raw: Vec<(u64, RawEvent)> = Vec::new();
        for track in &smf.tracks {
            let mut tick: u64 = 0;
            for event in track {
                tick += event.delta.as_int() as u64;
                let raw_event = match event.kind {
                    TrackEventKind::Midi { channel, message } => {
                        RawEvent::Channel(channel.as_int(), ChannelEvent::from_midly(message))
                    }
                    TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => {
                        RawEvent::Tempo(tempo.as_int())
                    }
                    TrackEventKind::Meta(MetaMessage::EndOfTrack) => RawEvent::EndOfTrack,
                    _ => continue,
                };
                raw.push((tick, raw_event));
            }
        }
        raw.sort_by_key(|(tick, _)| *tick);

        let clock = TickClock::new(smf.header.timing)?;
        Ok(clock.schedule(raw))
    }

    /// Events sorted by time.
    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }

    /// Time of the last event, including end-of-track markers.
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

/// Converts ticks to wall-clock offsets, following tempo changes.
enum TickClock {
    /// Ticks per quarter note; tempo changes apply.
    Metrical { ticks_per_beat: u64 },
    /// Fixed ticks per second from SMPTE frames and subframes.
    Timecode { ticks_per_second: f64 },
}

impl TickClock {
    fn new(timing: Timing) -> Result<Self, MidiImportError> {
        match timing {
            Timing::Metrical(tpb) if tpb.as_int() > 0 => Ok(TickClock::Metrical {
                ticks_per_beat: tpb.as_int() as u64,
            }),
            Timing::Metrical(_) => Err(MidiImportError::Parse(
                "zero ticks per beat".to_string(),
            )),
            Timing::Timecode(fps, subframes) if subframes > 0 => Ok(TickClock::Timecode {
                ticks_per_second: fps.as_f32() as f64 * subframes as f64,
            }),
            Timing::Timecode(_, _) => Err(MidiImportError::Parse(
                "zero subframes per frame".to_string(),
            )),
        }
    }

    fn schedule(&self, raw: Vec<(u64, RawEvent)>) -> MidiSequence {
        let mut events = Vec::with_capacity(raw.len());
        let mut duration = Duration::ZERO;

        // Offset of the last tempo change, so rounding never accumulates.
        let mut tempo = DEFAULT_TEMPO_USEC;
        let mut base_tick: u64 = 0;
        let mut base_usec: u64 = 0;

        for (tick, event) in raw {
            let at = match self {
                TickClock::Metrical { ticks_per_beat } => {
                    let usec = base_usec + (tick - base_tick) * tempo / ticks_per_beat;
                    Duration::from_micros(usec)
                }
                TickClock::Timecode { ticks_per_second } => {
                    Duration::from_secs_f64(tick as f64 / ticks_per_second)
                }
            };
            duration = duration.max(at);

            match event {
                RawEvent::Tempo(usec_per_beat) => {
                    base_usec = at.as_micros() as u64;
                    base_tick = tick;
                    if usec_per_beat > 0 {
                        tempo = usec_per_beat as u64;
                    }
                }
                RawEvent::Channel(channel, event) => events.push(TimedEvent { at, channel, event }),
                RawEvent::EndOfTrack => {}
            }
        }

        MidiSequence { events, duration }
    }
}
