//! Engine-facing small types: commands, events and the track state machine.

use crate::track::{LoadedTrack, TrackId, TrackMeta};

/// Lifecycle of one track on the bus.
///
/// A track's gain stage exists on the bus exactly while it is `Playing` or
/// `Stopping`; Idle tracks hold no bus resources at all.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PlaybackState {
    /// Loaded, silent, no segments scheduled.
    Idle,
    /// Audible (or fading in), with up to two segments armed.
    Playing,
    /// Fading out; teardown is scheduled and play-state changes are ignored
    /// except a fresh `Play`, which restarts the track.
    Stopping,
}

#[derive(Debug)]
pub(crate) enum EngineCmd {
    /// Register a decoded track under a pre-allocated id.
    AddTrack { id: TrackId, track: LoadedTrack },
    /// Tear the track down (if audible) and drop it.
    RemoveTrack(TrackId),
    /// Start playback, fading in when the track has fades enabled.
    Play(TrackId),
    /// Stop playback, fading out first when the track has fades enabled.
    Stop(TrackId),
    /// Stop every audible track at once.
    StopAll,
    SetVolume(TrackId, f32),
    SetFadeEnabled(TrackId, bool),
    SetFadeMs(TrackId, u64),
    SetLoopEnabled(TrackId, bool),
    SetMasterVolume(f32),
    /// Quit the engine thread, fading the master bus out over `fade_out_ms`
    /// milliseconds first.
    Quit { fade_out_ms: u64 },
}

/// Notifications pushed to the host over the event channel.
///
/// The host wires these to its UI and persistence layers; the engine never
/// waits on the receiver.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A track changed playback state (including natural loop completion).
    PlaybackChanged { id: TrackId, state: PlaybackState },
    /// A track's metadata changed; the snapshot is what should be persisted.
    MetadataChanged { id: TrackId, meta: TrackMeta },
}
