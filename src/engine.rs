//! The playback engine: command-driven scheduler thread plus the public
//! facade handle.
//!
//! The facade validates track ids and forwards commands over a channel; the
//! scheduler thread owns all playback state, arms segments on the mix bus
//! ahead of time and fires deferred work (loop re-arms, fade completions)
//! against the engine clock.

mod handle;
mod scheduler;
mod timers;
mod types;

pub use handle::Engine;
pub use types::{EngineEvent, PlaybackState};

#[cfg(test)]
mod tests;
