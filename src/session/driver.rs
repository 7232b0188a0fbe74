//! On-demand output streams.
//!
//! A real-time stream keeps an audio thread busy (and the battery
//! draining) even while it renders silence, so a session only holds one
//! while sound may be produced. [`OutputDriver::ensure`] opens it before
//! the first sound-producing call; [`OutputDriver::destroy`] closes it
//! once the caller has asked for silence.

use super::Session;
use crate::audio::AudioOutput;
use crate::error::Result;
use std::sync::Arc;
use tracing::{debug, warn};

/// Opens and closes the output streams of sessions.
#[derive(Clone)]
pub struct OutputDriver {
    backend: Arc<dyn AudioOutput>,
}

impl OutputDriver {
    pub fn new(backend: Arc<dyn AudioOutput>) -> Self {
        Self { backend }
    }

    /// Opens the session's output stream if it has none.
    ///
    /// Returns whether a stream was opened. On failure the session is
    /// left without a stream, so a later call can retry.
    pub fn ensure(&self, session: &mut Session) -> Result<bool> {
        if session.output.is_some() {
            return Ok(false);
        }

        let name = format!("sfsession-out-{}", session.handle());
        match self
            .backend
            .open(&name, session.config(), Arc::clone(&session.synth))
        {
            Ok(stream) => {
                session.output = Some(stream);
                debug!(handle = %session.handle(), "output stream created");
                Ok(true)
            }
            Err(e) => {
                warn!(handle = %session.handle(), error = %e, "output stream unavailable");
                Err(e)
            }
        }
    }

    /// Closes the session's output stream if it has one, blocking until
    /// the render callback has stopped.
    ///
    /// Returns whether a stream was closed.
    pub fn destroy(&self, session: &mut Session) -> bool {
        match session.output.take() {
            Some(mut stream) => {
                stream.close();
                debug!(handle = %session.handle(), "output stream destroyed");
                true
            }
            None => false,
        }
    }

    /// Replaces an open stream with a fresh one, e.g. after the audio
    /// device was interrupted. Idle sessions stay idle.
    pub fn restart(&self, session: &mut Session) -> Result<bool> {
        if !self.destroy(session) {
            return Ok(false);
        }
        self.ensure(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{FakeLoader, FakeOutput};
    use crate::audio::SoundBankLoader;
    use crate::config::SessionConfig;
    use crate::session::SessionHandle;
    use std::path::Path;

    fn session() -> Session {
        let loaded = FakeLoader::default()
            .load(Path::new("piano.sf2"), &SessionConfig::default())
            .unwrap();
        Session::new(
            SessionHandle::from_raw(1),
            SessionConfig::default(),
            loaded,
            0,
            0,
        )
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let (output, counters) = FakeOutput::new();
        let driver = OutputDriver::new(Arc::new(output));
        let mut session = session();

        assert!(driver.ensure(&mut session).unwrap());
        assert!(!driver.ensure(&mut session).unwrap());
        assert!(session.has_output());
        assert_eq!(counters.opened(), 1);
        assert_eq!(counters.active(), 1);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let (output, counters) = FakeOutput::new();
        let driver = OutputDriver::new(Arc::new(output));
        let mut session = session();

        assert!(!driver.destroy(&mut session));
        driver.ensure(&mut session).unwrap();
        assert!(driver.destroy(&mut session));
        assert!(!driver.destroy(&mut session));
        assert!(!session.has_output());
        assert_eq!(counters.active(), 0);
    }

    #[test]
    fn test_failed_ensure_can_retry() {
        let (output, counters) = FakeOutput::new();
        let driver = OutputDriver::new(Arc::new(output));
        let mut session = session();

        counters.set_failing(true);
        assert!(driver.ensure(&mut session).is_err());
        assert!(!session.has_output());

        counters.set_failing(false);
        assert!(driver.ensure(&mut session).unwrap());
        assert!(session.has_output());
    }

    #[test]
    fn test_restart_only_touches_open_streams() {
        let (output, counters) = FakeOutput::new();
        let driver = OutputDriver::new(Arc::new(output));
        let mut session = session();

        assert!(!driver.restart(&mut session).unwrap());
        assert_eq!(counters.opened(), 0);

        driver.ensure(&mut session).unwrap();
        assert!(driver.restart(&mut session).unwrap());
        assert_eq!(counters.opened(), 2);
        assert_eq!(counters.active(), 1);
    }
}
