//! Test doubles for the engine seams.

use super::{
    AudioOutput, LoadedSynth, OutputStream, SharedSynth, SoundBank, SoundBankId, SoundBankLoader,
    Synth, PresetInfo,
};
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One call received by a [`RecordingSynth`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthCall {
    NoteOn(u8, u8, u8),
    NoteOff(u8, u8),
    ControlChange(u8, u8, u8),
    ProgramSelect(u8, u16, u8),
    Message(u8, u8, u8, u8),
    Render,
}

/// Shared view of everything a [`RecordingSynth`] was asked to do.
#[derive(Debug, Clone, Default)]
pub struct SynthLog {
    calls: Arc<Mutex<Vec<SynthCall>>>,
    level: Arc<Mutex<f32>>,
}

impl SynthLog {
    pub fn calls(&self) -> Vec<SynthCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn renders(&self) -> usize {
        self.count(|c| *c == SynthCall::Render)
    }

    pub fn count(&self, pred: impl Fn(&SynthCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    /// Value written to every rendered sample.
    pub fn set_render_level(&self, level: f32) {
        *self.level.lock().unwrap() = level;
    }

    fn push(&self, call: SynthCall) {
        self.calls.lock().unwrap().push(call);
    }
}

/// Synthesizer that records calls instead of making sound.
pub struct RecordingSynth {
    log: SynthLog,
}

impl RecordingSynth {
    pub fn new() -> (Self, SynthLog) {
        let log = SynthLog::default();
        (Self { log: log.clone() }, log)
    }

    pub fn shared() -> (SharedSynth, SynthLog) {
        let (synth, log) = Self::new();
        (Arc::new(Mutex::new(Box::new(synth))), log)
    }
}

impl Synth for RecordingSynth {
    fn note_on(&mut self, channel: u8, key: u8, velocity: u8) {
        self.log.push(SynthCall::NoteOn(channel, key, velocity));
    }

    fn note_off(&mut self, channel: u8, key: u8) {
        self.log.push(SynthCall::NoteOff(channel, key));
    }

    fn control_change(&mut self, channel: u8, controller: u8, value: u8) {
        self.log
            .push(SynthCall::ControlChange(channel, controller, value));
    }

    fn program_select(&mut self, channel: u8, bank: u16, program: u8) {
        self.log
            .push(SynthCall::ProgramSelect(channel, bank, program));
    }

    fn channel_message(&mut self, channel: u8, command: u8, data1: u8, data2: u8) {
        self.log
            .push(SynthCall::Message(channel, command, data1, data2));
    }

    fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        let level = *self.log.level.lock().unwrap();
        left.fill(level);
        right.fill(level);
        self.log.push(SynthCall::Render);
    }
}

/// Loader that hands out [`RecordingSynth`]s without touching the disk.
///
/// Paths whose file name contains "broken" fail to load.
#[derive(Default)]
pub struct FakeLoader {
    loaded: Mutex<Vec<(PathBuf, SynthLog)>>,
}

impl FakeLoader {
    /// Log of the most recently created synthesizer.
    pub fn last_log(&self) -> SynthLog {
        self.loaded
            .lock()
            .unwrap()
            .last()
            .map(|(_, log)| log.clone())
            .expect("nothing loaded")
    }
}

impl SoundBankLoader for FakeLoader {
    fn load(&self, path: &Path, config: &SessionConfig) -> Result<LoadedSynth> {
        config.validate()?;
        let broken = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.contains("broken"));
        if broken {
            return Err(SessionError::SoundBank {
                path: path.to_path_buf(),
                reason: "not a SoundFont".to_string(),
            });
        }

        let (synth, log) = RecordingSynth::new();
        self.loaded
            .lock()
            .unwrap()
            .push((path.to_path_buf(), log));
        Ok(LoadedSynth {
            synth: Box::new(synth),
            sound_bank: SoundBank {
                id: SoundBankId::next(),
                path: path.to_path_buf(),
                presets: vec![
                    PresetInfo {
                        bank: 0,
                        program: 0,
                        name: "Piano".to_string(),
                    },
                    PresetInfo {
                        bank: 128,
                        program: 0,
                        name: "Standard Kit".to_string(),
                    },
                ],
            },
        })
    }
}

/// Counters shared between a [`FakeOutput`] and the test.
#[derive(Debug, Default)]
pub struct OutputCounters {
    opened: AtomicUsize,
    active: AtomicUsize,
    fail: AtomicBool,
    /// Strong count of the bound synthesizer seen by each close.
    synth_refs_at_close: Mutex<Vec<usize>>,
}

impl OutputCounters {
    /// Streams opened so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Streams currently open.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Makes subsequent opens fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// References to the synthesizer that were alive when each stream
    /// closed, the stream's own included.
    pub fn synth_refs_at_close(&self) -> Vec<usize> {
        self.synth_refs_at_close.lock().unwrap().clone()
    }
}

/// Output backend that only counts streams.
#[derive(Default)]
pub struct FakeOutput {
    counters: Arc<OutputCounters>,
}

impl FakeOutput {
    pub fn new() -> (Self, Arc<OutputCounters>) {
        let output = Self::default();
        let counters = Arc::clone(&output.counters);
        (output, counters)
    }
}

impl AudioOutput for FakeOutput {
    fn open(
        &self,
        _name: &str,
        _config: &SessionConfig,
        synth: SharedSynth,
    ) -> Result<Box<dyn OutputStream>> {
        if self.counters.fail.load(Ordering::SeqCst) {
            return Err(SessionError::Output("no device".to_string()));
        }
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        self.counters.active.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            counters: Arc::clone(&self.counters),
            synth: Some(synth),
        }))
    }
}

/// Holds the synthesizer until closed, like a real render binding.
struct FakeStream {
    counters: Arc<OutputCounters>,
    synth: Option<SharedSynth>,
}

impl OutputStream for FakeStream {
    fn close(&mut self) {
        if let Some(synth) = self.synth.take() {
            // A last render pass; panics if the synthesizer lock is gone.
            let mut left = [0.0; 4];
            let mut right = [0.0; 4];
            synth.lock().unwrap().render(&mut left, &mut right);
            self.counters
                .synth_refs_at_close
                .lock()
                .unwrap()
                .push(Arc::strong_count(&synth));
            self.counters.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.close();
    }
}
