//! The public session API.
//!
//! [`SessionManager`] owns the registry and composes the output driver
//! and playback controller into the operations callers use: load a
//! SoundFont, play notes, play MIDI files, and tear everything down.
//!
//! Calls on different handles may come from different threads. Calls on
//! the same handle are expected to be serialized by the caller.

use super::playback::load_sequence;
use super::{
    OutputDriver, PlaybackController, PlaybackEvent, PlaybackEvents, PlaybackState, Registry,
    Session, SessionHandle,
};
use crate::audio::{AudioOutput, PresetInfo, RodioOutput, RustySynthLoader, SoundBankId, SoundBankLoader};
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::midi::{check_channel, check_data, LoopMode, CC_SUSTAIN, CHANNEL_COUNT};
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

/// Manages any number of independent SoundFont sessions.
pub struct SessionManager {
    registry: Mutex<Registry>,
    loader: Arc<dyn SoundBankLoader>,
    driver: OutputDriver,
    playback: PlaybackController,
    events: PlaybackEvents,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    /// Creates a manager using rustysynth and the default audio device.
    pub fn new() -> Self {
        Self::with_backends(Arc::new(RustySynthLoader), Arc::new(RodioOutput))
    }

    /// Creates a manager with custom engine and output backends.
    pub fn with_backends(loader: Arc<dyn SoundBankLoader>, output: Arc<dyn AudioOutput>) -> Self {
        let driver = OutputDriver::new(output);
        let events = PlaybackEvents::default();
        Self {
            registry: Mutex::new(Registry::new()),
            loader,
            playback: PlaybackController::new(driver.clone(), events.clone()),
            driver,
            events,
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` on the session behind `handle` with the registry locked.
    fn with_session<R>(
        &self,
        handle: SessionHandle,
        f: impl FnOnce(&mut Session) -> Result<R>,
    ) -> Result<R> {
        let mut registry = self.registry();
        let session = registry
            .get_mut(handle)
            .ok_or(SessionError::NotFound(handle))?;
        f(session)
    }

    /// Loads a SoundFont into a new session with the default
    /// configuration, selecting `bank`/`program` on every channel.
    ///
    /// No output stream is opened until the session first makes sound.
    ///
    /// # Errors
    ///
    /// Returns error if the SoundFont cannot be read or parsed; no
    /// session is created in that case.
    pub fn load<P: AsRef<Path>>(&self, path: P, bank: u16, program: u8) -> Result<SessionHandle> {
        self.load_with_config(path, bank, program, SessionConfig::default())
    }

    /// Like [`SessionManager::load`], with explicit synthesis parameters.
    pub fn load_with_config<P: AsRef<Path>>(
        &self,
        path: P,
        bank: u16,
        program: u8,
        config: SessionConfig,
    ) -> Result<SessionHandle> {
        let path = path.as_ref();
        check_data("program", program)?;
        config.validate()?;

        let handle = self.registry().allocate();
        let loaded = self.loader.load(path, &config)?;
        let session = Session::new(handle, config, loaded, bank, program);
        let sound_bank = session.sound_bank().id;
        self.registry().insert(session);

        info!(
            handle = %handle,
            sound_bank = %sound_bank,
            path = %path.display(),
            "session loaded"
        );
        Ok(handle)
    }

    /// Selects `bank`/`program` on one channel.
    pub fn select_instrument(
        &self,
        handle: SessionHandle,
        channel: u8,
        bank: u16,
        program: u8,
    ) -> Result<()> {
        check_channel(channel)?;
        check_data("program", program)?;
        self.with_session(handle, |session| {
            session.with_synth(|synth| synth.program_select(channel, bank, program));
            Ok(())
        })
    }

    /// Starts a note, opening the output stream first if needed.
    pub fn play_note(&self, handle: SessionHandle, channel: u8, key: u8, velocity: u8) -> Result<()> {
        check_channel(channel)?;
        check_data("key", key)?;
        check_data("velocity", velocity)?;
        self.with_session(handle, |session| {
            self.driver.ensure(session)?;
            session.with_synth(|synth| synth.note_on(channel, key, velocity));
            Ok(())
        })
    }

    /// Releases a note. The output stream stays open.
    pub fn stop_note(&self, handle: SessionHandle, channel: u8, key: u8) -> Result<()> {
        check_channel(channel)?;
        check_data("key", key)?;
        self.with_session(handle, |session| {
            session.with_synth(|synth| synth.note_off(channel, key));
            Ok(())
        })
    }

    /// Lifts the sustain pedal and cuts every voice on all channels.
    /// The output stream stays open.
    pub fn stop_all_notes(&self, handle: SessionHandle) -> Result<()> {
        self.with_session(handle, |session| {
            session.with_synth(|synth| {
                for channel in 0..CHANNEL_COUNT {
                    synth.control_change(channel, CC_SUSTAIN, 0);
                    synth.all_sounds_off(channel);
                }
            });
            Ok(())
        })
    }

    /// Sends a control change.
    pub fn control_change(
        &self,
        handle: SessionHandle,
        channel: u8,
        controller: u8,
        value: u8,
    ) -> Result<()> {
        check_channel(channel)?;
        check_data("controller", controller)?;
        check_data("controller value", value)?;
        self.with_session(handle, |session| {
            session.with_synth(|synth| synth.control_change(channel, controller, value));
            Ok(())
        })
    }

    /// Plays a MIDI file, replacing any file already playing on the
    /// session. `looping` repeats the file until stopped.
    pub fn play_midi_file<P: AsRef<Path>>(
        &self,
        handle: SessionHandle,
        path: P,
        looping: bool,
    ) -> Result<()> {
        self.play_midi_file_with_loop(handle, path, LoopMode::from(looping))
    }

    /// Like [`SessionManager::play_midi_file`] with an explicit loop mode.
    ///
    /// The file is parsed before the current player is touched, so a bad
    /// file leaves existing playback running.
    pub fn play_midi_file_with_loop<P: AsRef<Path>>(
        &self,
        handle: SessionHandle,
        path: P,
        loop_mode: LoopMode,
    ) -> Result<()> {
        self.with_session(handle, |_| Ok(()))?;
        let sequence = load_sequence(path.as_ref())?;
        self.with_session(handle, |session| {
            self.playback.load_and_play(session, sequence, loop_mode)
        })
    }

    /// Pauses file playback, keeping its position and the output stream.
    pub fn pause_midi_file(&self, handle: SessionHandle) -> Result<()> {
        self.with_session(handle, |session| {
            self.playback.pause(session);
            Ok(())
        })
    }

    /// Resumes paused file playback.
    pub fn resume_midi_file(&self, handle: SessionHandle) -> Result<()> {
        self.with_session(handle, |session| self.playback.resume(session))
    }

    /// Stops file playback, silences the session, and closes its output
    /// stream.
    pub fn stop_midi_file(&self, handle: SessionHandle) -> Result<()> {
        self.with_session(handle, |session| {
            self.playback.stop(session);
            Ok(())
        })
    }

    /// Whether a MIDI file is currently playing. Unknown handles report
    /// `false`.
    pub fn is_midi_player_playing(&self, handle: SessionHandle) -> bool {
        self.registry()
            .get(handle)
            .is_some_and(|session| self.playback.is_playing(session))
    }

    /// Blocks until the session's MIDI file stops playing, either at its
    /// end or because another call paused or stopped it.
    ///
    /// Returns immediately if no file is playing. The registry is not
    /// held while waiting.
    pub fn join_midi_file(&self, handle: SessionHandle) -> Result<()> {
        let sequencer = self.with_session(handle, |session| Ok(self.playback.sequencer(session)))?;
        if let Some(sequencer) = sequencer {
            sequencer.join();
        }
        Ok(())
    }

    /// Playback state of the session's MIDI player.
    pub fn playback_state(&self, handle: SessionHandle) -> Result<PlaybackState> {
        self.with_session(handle, |session| Ok(self.playback.state(session)))
    }

    /// Tears down one session. Unknown handles are ignored.
    pub fn unload_soundfont(&self, handle: SessionHandle) -> Result<()> {
        let mut registry = self.registry();
        if let Some(session) = registry.remove(handle) {
            session.teardown();
            info!(handle = %handle, "session unloaded");
        }
        Ok(())
    }

    /// Tears down every session. Safe to call repeatedly.
    pub fn dispose(&self) {
        let mut registry = self.registry();
        if registry.is_empty() {
            return;
        }
        let count = registry.len();
        for session in registry.drain() {
            session.teardown();
        }
        info!(sessions = count, "all sessions disposed");
    }

    /// Receives a [`PlaybackEvent`] for every file that finishes.
    pub fn subscribe(&self) -> Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    /// Reopens every open output stream, e.g. after the audio device was
    /// interrupted. Returns how many streams were restarted.
    pub fn restart_output_streams(&self) -> usize {
        let mut registry = self.registry();
        let mut restarted = 0;
        for session in registry.iter_mut() {
            match self.driver.restart(session) {
                Ok(true) => restarted += 1,
                Ok(false) => {}
                Err(e) => warn!(handle = %session.handle(), error = %e, "failed to restart output"),
            }
        }
        restarted
    }

    /// Presets of the session's SoundFont, by bank and program.
    pub fn presets(&self, handle: SessionHandle) -> Result<Vec<PresetInfo>> {
        self.with_session(handle, |session| Ok(session.sound_bank().presets.clone()))
    }

    /// Id the engine assigned to the session's SoundFont.
    pub fn sound_bank_id(&self, handle: SessionHandle) -> Result<SoundBankId> {
        self.with_session(handle, |session| Ok(session.sound_bank().id))
    }

    /// Handles of all live sessions, ascending.
    pub fn handles(&self) -> Vec<SessionHandle> {
        self.registry().handles()
    }

    /// Whether the session currently holds an output stream.
    pub fn output_active(&self, handle: SessionHandle) -> bool {
        self.registry()
            .get(handle)
            .is_some_and(|session| session.has_output())
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.dispose();
    }
}
