//! Per-session MIDI file playback.
//!
//! A session has no player until a file is played. Playing, pausing
//! and resuming move the player between `Playing` and `Paused`; stop
//! removes it and returns the session to its idle state: no player, no
//! output stream, no sounding voices.

use super::{OutputDriver, Session, SessionHandle};
use crate::error::{Result, SessionError};
use crate::midi::{
    LoopMode, MidiSequence, PlayerStatus, Sequencer, CHANNEL_COUNT, PERCUSSION_BANK,
    PERCUSSION_CHANNEL,
};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Playback state of a session as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// No file loaded.
    Idle,
    Playing,
    /// File loaded, position retained.
    Paused,
    /// The file played to its end; it stays loaded until stopped or
    /// replaced, and resuming starts it over.
    Finished,
}

/// Notifications published by players.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// A non-looping file reached its natural end.
    Finished { handle: SessionHandle },
}

/// Fan-out of [`PlaybackEvent`]s to any number of receivers.
#[derive(Clone, Default)]
pub struct PlaybackEvents {
    subscribers: Arc<Mutex<Vec<Sender<PlaybackEvent>>>>,
}

impl PlaybackEvents {
    pub fn subscribe(&self) -> Receiver<PlaybackEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Sends `event` to every live receiver, forgetting dropped ones.
    pub fn publish(&self, event: PlaybackEvent) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(event).is_ok());
    }
}

/// Reads a MIDI file for playback.
pub fn load_sequence(path: &Path) -> Result<MidiSequence> {
    MidiSequence::from_file(path).map_err(|source| SessionError::MidiFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Drives the optional player of each session.
#[derive(Clone)]
pub struct PlaybackController {
    driver: OutputDriver,
    events: PlaybackEvents,
}

impl PlaybackController {
    pub fn new(driver: OutputDriver, events: PlaybackEvents) -> Self {
        Self { driver, events }
    }

    /// Replaces any current player with one for `sequence` and starts it.
    ///
    /// The old player is stopped and its thread joined before the new one
    /// exists. Channel 9 is switched to the drum bank so percussion keys
    /// are not played as melodic notes.
    pub fn load_and_play(
        &self,
        session: &mut Session,
        sequence: MidiSequence,
        loop_mode: LoopMode,
    ) -> Result<()> {
        self.release(session);

        let handle = session.handle();
        let events = self.events.clone();
        let sequencer = Sequencer::new(
            format!("sfsession-seq-{}", handle),
            sequence,
            Arc::clone(&session.synth),
        )
        .with_finish_hook(Arc::new(move || {
            events.publish(PlaybackEvent::Finished { handle })
        }));
        sequencer.set_loop(loop_mode);

        session.with_synth(|synth| synth.program_select(PERCUSSION_CHANNEL, PERCUSSION_BANK, 0));

        let opened = self.driver.ensure(session)?;
        if let Err(e) = sequencer.play() {
            if opened {
                self.driver.destroy(session);
            }
            return Err(e);
        }
        session.sequencer = Some(Arc::new(sequencer));
        debug!(handle = %handle, ?loop_mode, "file playback started");
        Ok(())
    }

    /// Pauses the player, keeping it and the output stream.
    pub fn pause(&self, session: &Session) {
        if let Some(sequencer) = &session.sequencer {
            sequencer.pause();
        }
    }

    /// Resumes a paused player, reopening the output stream if needed.
    pub fn resume(&self, session: &mut Session) -> Result<()> {
        let Some(sequencer) = session.sequencer.clone() else {
            return Ok(());
        };
        self.driver.ensure(session)?;
        sequencer.play()
    }

    /// Stops and removes the player, silences every channel, and closes
    /// the output stream.
    pub fn stop(&self, session: &mut Session) {
        self.release(session);
        session.with_synth(|synth| {
            for channel in 0..CHANNEL_COUNT {
                synth.all_sounds_off(channel);
            }
        });
        self.driver.destroy(session);
    }

    pub fn is_playing(&self, session: &Session) -> bool {
        session
            .sequencer
            .as_ref()
            .is_some_and(|sequencer| sequencer.is_playing())
    }

    pub fn state(&self, session: &Session) -> PlaybackState {
        match session.sequencer.as_ref().map(|s| s.status()) {
            None => PlaybackState::Idle,
            Some(PlayerStatus::Playing) => PlaybackState::Playing,
            // Ready only shows up for a player that failed to start.
            Some(PlayerStatus::Ready) | Some(PlayerStatus::Paused) => PlaybackState::Paused,
            Some(PlayerStatus::Done) => PlaybackState::Finished,
        }
    }

    /// The session's player, for waiting on it without holding the
    /// registry.
    pub fn sequencer(&self, session: &Session) -> Option<Arc<Sequencer>> {
        session.sequencer.clone()
    }

    /// Stops, joins and drops the current player. Returns whether there
    /// was one.
    fn release(&self, session: &mut Session) -> bool {
        match session.sequencer.take() {
            Some(sequencer) => {
                sequencer.stop();
                debug!(handle = %session.handle(), "player released");
                true
            }
            None => false,
        }
    }
}
