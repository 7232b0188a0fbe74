//! rustysynth-backed synthesis engine.
//!
//! Loads SoundFont files and drives a rustysynth `Synthesizer` through
//! the [`Synth`] trait.

use super::{LoadedSynth, PresetInfo, SoundBank, SoundBankId, SoundBankLoader, Synth};
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::midi::{
    CC_BANK_SELECT, CONTROL_CHANGE, NOTE_OFF, NOTE_ON, PERCUSSION_BANK, PERCUSSION_CHANNEL,
    PROGRAM_CHANGE,
};
use rustysynth::{SoundFont, Synthesizer, SynthesizerSettings};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// A rustysynth synthesizer with one SoundFont loaded.
pub struct RustySynth {
    synth: Synthesizer,
}

impl RustySynth {
    /// Creates a synthesizer for `soundfont` using the session's settings.
    pub fn new(soundfont: &Arc<SoundFont>, config: &SessionConfig) -> Result<Self> {
        let mut settings = SynthesizerSettings::new(config.sample_rate as i32);
        settings.maximum_polyphony = config.polyphony;
        settings.block_size = config.period_size;

        let synth = Synthesizer::new(soundfont, &settings)
            .map_err(|e| SessionError::Synthesizer(format!("{:?}", e)))?;
        Ok(Self { synth })
    }
}

/// Bank select value to send for `bank` on `channel`.
///
/// rustysynth offsets the percussion channel's bank by 128 on its own,
/// so drum banks are sent relative to that offset there.
fn bank_select_value(channel: u8, bank: u16) -> i32 {
    if channel == PERCUSSION_CHANNEL {
        bank.saturating_sub(PERCUSSION_BANK) as i32
    } else {
        bank as i32
    }
}

impl Synth for RustySynth {
    fn note_on(&mut self, channel: u8, key: u8, velocity: u8) {
        self.synth
            .note_on(channel as i32, key as i32, velocity as i32);
    }

    fn note_off(&mut self, channel: u8, key: u8) {
        self.synth.note_off(channel as i32, key as i32);
    }

    fn control_change(&mut self, channel: u8, controller: u8, value: u8) {
        self.synth.process_midi_message(
            channel as i32,
            CONTROL_CHANGE as i32,
            controller as i32,
            value as i32,
        );
    }

    fn program_select(&mut self, channel: u8, bank: u16, program: u8) {
        self.synth.process_midi_message(
            channel as i32,
            CONTROL_CHANGE as i32,
            CC_BANK_SELECT as i32,
            bank_select_value(channel, bank),
        );
        self.synth
            .process_midi_message(channel as i32, PROGRAM_CHANGE as i32, program as i32, 0);
    }

    fn channel_message(&mut self, channel: u8, command: u8, data1: u8, data2: u8) {
        match command {
            NOTE_ON => self.note_on(channel, data1, data2),
            NOTE_OFF => self.note_off(channel, data1),
            _ => self.synth.process_midi_message(
                channel as i32,
                command as i32,
                data1 as i32,
                data2 as i32,
            ),
        }
    }

    fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.synth.render(left, right);
    }
}

/// Loads SoundFont files from disk into rustysynth synthesizers.
#[derive(Debug, Default, Clone, Copy)]
pub struct RustySynthLoader;

impl RustySynthLoader {
    /// Lists the presets of a SoundFont, sorted by bank and program.
    fn extract_presets(soundfont: &SoundFont) -> Vec<PresetInfo> {
        let mut presets: Vec<PresetInfo> = soundfont
            .get_presets()
            .iter()
            .filter(|p| (0..128).contains(&p.get_patch_number()) && p.get_bank_number() >= 0)
            .map(|p| PresetInfo {
                bank: p.get_bank_number() as u16,
                program: p.get_patch_number() as u8,
                name: p.get_name().to_string(),
            })
            .collect();
        presets.sort_by_key(|p| (p.bank, p.program));
        presets
    }
}

impl SoundBankLoader for RustySynthLoader {
    fn load(&self, path: &Path, config: &SessionConfig) -> Result<LoadedSynth> {
        let file = File::open(path).map_err(|e| SessionError::SoundBank {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut reader = BufReader::new(file);
        let soundfont =
            Arc::new(
                SoundFont::new(&mut reader).map_err(|e| SessionError::SoundBank {
                    path: path.to_path_buf(),
                    reason: format!("{:?}", e),
                })?,
            );

        let presets = Self::extract_presets(&soundfont);
        let synth = RustySynth::new(&soundfont, config)?;
        let id = SoundBankId::next();
        debug!(
            sound_bank = %id,
            presets = presets.len(),
            path = %path.display(),
            "SoundFont loaded"
        );

        Ok(LoadedSynth {
            synth: Box::new(synth),
            sound_bank: SoundBank {
                id,
                path: path.to_path_buf(),
                presets,
            },
        })
    }
}
