//! Error taxonomy for the playback engine.
//!
//! Caller-misuse errors (`UnknownTrack`, `EmptyBuffer`) are returned to the
//! caller and mutate no state. Teardown races inside the engine are handled
//! locally and never surface here.

use thiserror::Error;

use crate::track::TrackId;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// An operation referenced a track id the engine does not know.
    #[error("unknown track id {0}")]
    UnknownTrack(TrackId),

    /// A decoded buffer contained no audio frames (or no channels).
    #[error("audio buffer holds no frames")]
    EmptyBuffer,

    /// An internal invariant was violated: a third live segment was
    /// requested for one track. The track is forced to Idle; this error
    /// only shows up in diagnostics, never in a return value.
    #[error("scheduling conflict on track {0}: third concurrent segment requested")]
    SchedulingConflict(TrackId),

    /// The audio output device could not be opened.
    #[error("audio output unavailable: {0}")]
    Output(String),

    /// The engine thread has shut down and no longer accepts commands.
    #[error("engine is shut down")]
    Disconnected,
}
