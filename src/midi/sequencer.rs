//! Real-time MIDI file playback against a shared synthesizer.
//!
//! Each playing [`Sequencer`] owns one worker thread. The worker sleeps
//! on a condition variable until the next event is due, so pausing or
//! stopping wakes it immediately and an idle player costs no CPU.
//!
//! Pausing and stopping both quiesce the worker: they return only after
//! the thread has exited and released the notes it started.

use super::{MidiSequence, TimedEvent, NOTE_OFF, NOTE_ON};
use crate::audio::SharedSynth;
use crate::error::{Result, SessionError};
use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Playback status as reported by the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    /// Loaded, never started.
    Ready,
    /// Worker running.
    Playing,
    /// Stopped with position retained.
    Paused,
    /// Reached the end of the file, or stopped for good.
    Done,
}

/// How often the file repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    /// Play the file once.
    Once,
    /// Play the file, then repeat it this many more times.
    Repeat(u32),
    /// Repeat until stopped.
    Forever,
}

impl LoopMode {
    /// Maps a loop count: negative = forever, 0 = once, n = n repeats.
    pub fn from_count(count: i32) -> Self {
        match count {
            c if c < 0 => LoopMode::Forever,
            0 => LoopMode::Once,
            c => LoopMode::Repeat(c as u32),
        }
    }

    fn repeats(self) -> Option<u32> {
        match self {
            LoopMode::Once => Some(0),
            LoopMode::Repeat(n) => Some(n),
            LoopMode::Forever => None,
        }
    }
}

impl From<bool> for LoopMode {
    fn from(looping: bool) -> Self {
        if looping {
            LoopMode::Forever
        } else {
            LoopMode::Once
        }
    }
}

struct PlayerState {
    status: PlayerStatus,
    /// Index of the next event to send.
    cursor: usize,
    /// Song position when the worker last stopped.
    position: Duration,
    loop_mode: LoopMode,
    /// Repeats left in the current run; `None` = forever.
    repeats_left: Option<u32>,
}

struct Shared {
    state: Mutex<PlayerState>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PlayerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Called on the worker thread when a file plays to its natural end.
pub type FinishHook = Arc<dyn Fn() + Send + Sync>;

/// Plays one parsed MIDI file into a synthesizer.
pub struct Sequencer {
    name: String,
    sequence: Arc<MidiSequence>,
    synth: SharedSynth,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    on_finish: Option<FinishHook>,
}

impl Sequencer {
    /// Creates a player for `sequence` bound to `synth`. Nothing plays
    /// until [`Sequencer::play`].
    pub fn new(name: impl Into<String>, sequence: MidiSequence, synth: SharedSynth) -> Self {
        Self {
            name: name.into(),
            sequence: Arc::new(sequence),
            synth,
            shared: Arc::new(Shared {
                state: Mutex::new(PlayerState {
                    status: PlayerStatus::Ready,
                    cursor: 0,
                    position: Duration::ZERO,
                    loop_mode: LoopMode::Once,
                    repeats_left: Some(0),
                }),
                changed: Condvar::new(),
            }),
            worker: Mutex::new(None),
            on_finish: None,
        }
    }

    /// Registers a hook run when playback ends naturally.
    pub fn with_finish_hook(mut self, hook: FinishHook) -> Self {
        self.on_finish = Some(hook);
        self
    }

    /// Sets the loop mode; takes effect for the current run as well.
    pub fn set_loop(&self, mode: LoopMode) {
        let mut state = self.shared.lock();
        state.loop_mode = mode;
        state.repeats_left = mode.repeats();
    }

    pub fn status(&self) -> PlayerStatus {
        self.shared.lock().status
    }

    pub fn is_playing(&self) -> bool {
        self.status() == PlayerStatus::Playing
    }

    /// Song position of the player.
    ///
    /// While playing this is the position at which the worker last
    /// stopped, not a live clock.
    pub fn position(&self) -> Duration {
        self.shared.lock().position
    }

    /// Starts or resumes playback.
    ///
    /// From `Paused` playback continues at the retained position; from
    /// `Done` it starts over. Already playing is a no-op.
    pub fn play(&self) -> Result<()> {
        if self.is_playing() {
            return Ok(());
        }
        // Reap a worker that finished on its own.
        self.quiesce();

        {
            let mut state = self.shared.lock();
            match state.status {
                PlayerStatus::Playing => return Ok(()),
                PlayerStatus::Ready | PlayerStatus::Done => {
                    state.cursor = 0;
                    state.position = Duration::ZERO;
                    state.repeats_left = state.loop_mode.repeats();
                }
                PlayerStatus::Paused => {}
            }
            state.status = PlayerStatus::Playing;
        }

        let worker = Worker {
            shared: Arc::clone(&self.shared),
            sequence: Arc::clone(&self.sequence),
            synth: Arc::clone(&self.synth),
            on_finish: self.on_finish.clone(),
            sounding: HashSet::new(),
        };
        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || worker.run());

        match spawned {
            Ok(handle) => {
                *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                debug!(player = %self.name, "sequencer playing");
                Ok(())
            }
            Err(e) => {
                self.shared.lock().status = PlayerStatus::Paused;
                Err(SessionError::Spawn(e))
            }
        }
    }

    /// Stops the worker, keeping the position for [`Sequencer::play`].
    pub fn pause(&self) {
        if self.transition(PlayerStatus::Paused) {
            debug!(player = %self.name, position = ?self.position(), "sequencer paused");
        }
    }

    /// Stops the worker for good.
    pub fn stop(&self) {
        self.transition(PlayerStatus::Done);
        self.shared.lock().status = PlayerStatus::Done;
    }

    /// Blocks until the player is no longer playing.
    ///
    /// Returns immediately when nothing is playing.
    pub fn join(&self) {
        let state = self.shared.lock();
        let _state = self
            .shared
            .changed
            .wait_while(state, |s| s.status == PlayerStatus::Playing)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Moves a playing player to `target` and waits for the worker to
    /// exit. Returns whether the player was playing.
    fn transition(&self, target: PlayerStatus) -> bool {
        let was_playing = {
            let mut state = self.shared.lock();
            let playing = state.status == PlayerStatus::Playing;
            if playing {
                state.status = target;
                self.shared.changed.notify_all();
            }
            playing
        };
        self.quiesce();
        was_playing
    }

    /// Joins the worker thread, if any.
    fn quiesce(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(player = %self.name, "sequencer worker panicked");
            }
        }
    }
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State owned by the playback thread.
struct Worker {
    shared: Arc<Shared>,
    sequence: Arc<MidiSequence>,
    synth: SharedSynth,
    on_finish: Option<FinishHook>,
    /// Notes started by this worker and not yet released.
    sounding: HashSet<(u8, u8)>,
}

enum Step {
    Send(TimedEvent),
    Wait(Duration),
    Restart,
    Finished,
    Halted,
}

impl Worker {
    fn run(mut self) {
        let start_position = self.shared.lock().position;
        let mut origin = Instant::now()
            .checked_sub(start_position)
            .unwrap_or_else(Instant::now);

        let finished = loop {
            let mut state = self.shared.lock();
            let step = self.next_step(&mut state, origin.elapsed());

            match step {
                Step::Send(event) => {
                    drop(state);
                    self.send(event);
                }
                Step::Wait(timeout) => {
                    // Woken early by pause/stop; the next step re-checks.
                    let _ = self
                        .shared
                        .changed
                        .wait_timeout(state, timeout)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Step::Restart => {
                    drop(state);
                    self.release_notes();
                    origin = Instant::now();
                }
                Step::Finished => {
                    state.position = self.sequence.duration();
                    state.status = PlayerStatus::Done;
                    self.shared.changed.notify_all();
                    break true;
                }
                Step::Halted => {
                    state.position = origin.elapsed().min(self.sequence.duration());
                    break false;
                }
            }
        };

        self.release_notes();
        if finished {
            if let Some(hook) = &self.on_finish {
                hook();
            }
        }
    }

    fn next_step(&self, state: &mut PlayerState, elapsed: Duration) -> Step {
        if state.status != PlayerStatus::Playing {
            return Step::Halted;
        }

        if let Some(event) = self.sequence.events().get(state.cursor) {
            if event.at > elapsed {
                return Step::Wait(event.at - elapsed);
            }
            state.cursor += 1;
            return Step::Send(*event);
        }

        // Let trailing silence up to the end-of-track marker play out.
        if self.sequence.duration() > elapsed {
            return Step::Wait(self.sequence.duration() - elapsed);
        }

        // A zero-length file cannot be looped without spinning.
        if self.sequence.duration().is_zero() {
            return Step::Finished;
        }

        match state.repeats_left {
            Some(0) => Step::Finished,
            Some(n) => {
                state.repeats_left = Some(n - 1);
                state.cursor = 0;
                state.position = Duration::ZERO;
                Step::Restart
            }
            None => {
                state.cursor = 0;
                state.position = Duration::ZERO;
                Step::Restart
            }
        }
    }

    fn send(&mut self, event: TimedEvent) {
        let (command, data1, data2) = event.event.to_message();
        match command {
            NOTE_ON => {
                self.sounding.insert((event.channel, data1));
            }
            NOTE_OFF => {
                self.sounding.remove(&(event.channel, data1));
            }
            _ => {}
        }
        self.synth
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .channel_message(event.channel, command, data1, data2);
    }

    fn release_notes(&mut self) {
        if self.sounding.is_empty() {
            return;
        }
        let mut synth = self.synth.lock().unwrap_or_else(PoisonError::into_inner);
        for (channel, key) in self.sounding.drain() {
            synth.note_off(channel, key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{RecordingSynth, SynthCall};
    use crate::midi::midi_import::tests::{end_of_track, note, smf_bytes};
    use midly::Format;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Two notes over 100 ms.
    fn short_song() -> MidiSequence {
        // 48 ticks at 480 tpb / 120 BPM = 50 ms.
        let bytes = smf_bytes(
            Format::SingleTrack,
            vec![vec![
                note(0, 0, 60, 100),
                note(48, 0, 60, 0),
                note(0, 0, 64, 100),
                note(48, 0, 64, 0),
                end_of_track(0),
            ]],
        );
        MidiSequence::parse(&bytes).unwrap()
    }

    /// One note held for ten seconds.
    fn long_song() -> MidiSequence {
        let bytes = smf_bytes(
            Format::SingleTrack,
            vec![vec![note(0, 2, 48, 80), note(9600, 2, 48, 0), end_of_track(0)]],
        );
        MidiSequence::parse(&bytes).unwrap()
    }

    fn note_ons(calls: &[SynthCall]) -> usize {
        calls
            .iter()
            .filter(|c| matches!(c, SynthCall::Message(_, NOTE_ON, _, _)))
            .count()
    }

    #[test]
    fn test_loop_mode_from_count() {
        assert_eq!(LoopMode::from_count(-1), LoopMode::Forever);
        assert_eq!(LoopMode::from_count(0), LoopMode::Once);
        assert_eq!(LoopMode::from_count(3), LoopMode::Repeat(3));
        assert_eq!(LoopMode::from(true), LoopMode::Forever);
    }

    #[test]
    fn test_plays_to_end_and_join_returns() {
        let (synth, log) = RecordingSynth::shared();
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&finished);
        let player = Sequencer::new("test-player", short_song(), synth).with_finish_hook(
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(player.status(), PlayerStatus::Ready);
        player.play().unwrap();
        let started = Instant::now();
        player.join();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(player.status(), PlayerStatus::Done);
        assert!(!player.is_playing());
        assert_eq!(
            log.calls(),
            vec![
                SynthCall::Message(0, NOTE_ON, 60, 100),
                SynthCall::Message(0, NOTE_OFF, 60, 0),
                SynthCall::Message(0, NOTE_ON, 64, 100),
                SynthCall::Message(0, NOTE_OFF, 64, 0),
            ]
        );
        // Hook runs after the status change; stop() reaps the worker.
        player.stop();
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_join_without_playing_returns_immediately() {
        let (synth, _log) = RecordingSynth::shared();
        let player = Sequencer::new("idle-player", short_song(), synth);
        player.join();
        assert_eq!(player.status(), PlayerStatus::Ready);
    }

    #[test]
    fn test_repeat_plays_file_again() {
        let (synth, log) = RecordingSynth::shared();
        let player = Sequencer::new("repeat-player", short_song(), synth);
        player.set_loop(LoopMode::Repeat(1));
        player.play().unwrap();
        player.join();

        assert_eq!(note_ons(&log.calls()), 4);
        assert_eq!(player.status(), PlayerStatus::Done);
    }

    #[test]
    fn test_zero_length_file_does_not_loop() {
        let bytes = smf_bytes(
            Format::SingleTrack,
            vec![vec![note(0, 0, 60, 100), note(0, 0, 60, 0), end_of_track(0)]],
        );
        let (synth, log) = RecordingSynth::shared();
        let player = Sequencer::new(
            "zero-player",
            MidiSequence::parse(&bytes).unwrap(),
            synth,
        );
        player.set_loop(LoopMode::Forever);
        player.play().unwrap();
        thread::sleep(Duration::from_millis(100));

        assert_eq!(note_ons(&log.calls()), 1);
        assert_eq!(player.status(), PlayerStatus::Done);
        player.stop();
    }

    #[test]
    fn test_forever_wraps_around() {
        let (synth, log) = RecordingSynth::shared();
        let player = Sequencer::new("forever-player", short_song(), synth);
        player.set_loop(LoopMode::Forever);
        player.play().unwrap();
        thread::sleep(Duration::from_millis(350));

        assert!(player.is_playing());
        player.stop();
        // 100 ms per pass: at least two passes, and nowhere near a spin.
        let count = note_ons(&log.calls());
        assert!(count >= 4, "only {} note-ons", count);
        assert!(count <= 10, "{} note-ons", count);
    }

    #[test]
    fn test_pause_retains_position_and_releases_notes() {
        let (synth, log) = RecordingSynth::shared();
        let player = Sequencer::new("pause-player", long_song(), synth);
        player.play().unwrap();
        thread::sleep(Duration::from_millis(100));

        player.pause();
        assert_eq!(player.status(), PlayerStatus::Paused);
        let paused_at = player.position();
        assert!(paused_at >= Duration::from_millis(50));
        assert!(paused_at < Duration::from_secs(10));
        assert!(log.calls().contains(&SynthCall::NoteOff(2, 48)));

        // Nothing is sent while paused.
        let calls = log.calls().len();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(log.calls().len(), calls);

        player.play().unwrap();
        assert_eq!(player.status(), PlayerStatus::Playing);
        // The note-on at the start is not replayed.
        thread::sleep(Duration::from_millis(20));
        assert_eq!(note_ons(&log.calls()), 1);
        player.stop();
        assert!(player.position() >= paused_at);
    }

    #[test]
    fn test_stop_wakes_join() {
        let (synth, _log) = RecordingSynth::shared();
        let player = Arc::new(Sequencer::new("join-player", long_song(), synth));
        player.set_loop(LoopMode::Forever);
        player.play().unwrap();

        let waiter = {
            let player = Arc::clone(&player);
            thread::spawn(move || player.join())
        };
        thread::sleep(Duration::from_millis(50));
        player.stop();

        waiter.join().unwrap();
        assert_eq!(player.status(), PlayerStatus::Done);
    }

    #[test]
    fn test_drop_stops_worker() {
        let (synth, log) = RecordingSynth::shared();
        let player = Sequencer::new("drop-player", long_song(), Arc::clone(&synth));
        player.play().unwrap();
        thread::sleep(Duration::from_millis(30));
        drop(player);

        // Only this test's handle is left once the worker has exited.
        assert_eq!(Arc::strong_count(&synth), 1);
        assert!(log.calls().contains(&SynthCall::NoteOff(2, 48)));
    }

    #[test]
    fn test_play_after_done_restarts() {
        let (synth, log) = RecordingSynth::shared();
        let player = Sequencer::new("restart-player", short_song(), synth);
        player.play().unwrap();
        player.join();
        player.play().unwrap();
        player.join();

        assert_eq!(note_ons(&log.calls()), 4);
    }
}
