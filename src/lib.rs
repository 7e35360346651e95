//! Gapless-looping soundboard playback engine.
//!
//! The engine mixes any number of decoded tracks onto one output stream.
//! Each track loops seamlessly by double-buffering: while one pass of its
//! buffer plays, the next is armed on the mix bus at exactly
//! `origin + k * len` frames, so loop boundaries come from integer frame
//! arithmetic rather than timer wake-ups. Starts and stops ramp the
//! per-track gain when fades are enabled, and a stop during a fade-in
//! ramps down from the gain actually reached.
//!
//! Hosts construct an [`Engine`], feed it [`LoadedTrack`]s (decoding is the
//! host's job) and listen on the returned event channel for playback and
//! metadata changes to drive their UI and persistence.
//!
//! ```no_run
//! use loopboard::{Engine, Settings};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load()?;
//! let (engine, events) = Engine::new(settings.engine)?;
//! # let track = todo!();
//! let id = engine.add_track(track)?;
//! engine.play(id)?;
//! # Ok(())
//! # }
//! ```

mod bus;
pub mod config;
mod engine;
mod envelope;
mod error;
mod track;

pub use config::Settings;
pub use engine::{Engine, EngineEvent, PlaybackState};
pub use error::EngineError;
pub use track::{AudioBuffer, LoadedTrack, TrackId, TrackMeta};
