//! sfsession - multi-session SoundFont playback.
//!
//! Each session owns a synthesizer loaded with one SoundFont, an output
//! stream that only exists while sound may be produced, and an optional
//! MIDI file player. Sessions are addressed by opaque handles through the
//! [`SessionManager`].

pub mod audio;
pub mod config;
pub mod error;
pub mod midi;
pub mod session;

// Re-export commonly used types
pub use config::SessionConfig;
pub use error::{Result, SessionError};
pub use midi::LoopMode;
pub use session::{PlaybackEvent, PlaybackState, SessionHandle, SessionManager};
