//! Boundary types shared with the host: track ids, decoded buffers and
//! per-track metadata.
//!
//! Decoding lives outside this crate; the host hands the engine a
//! [`LoadedTrack`] with an already-decoded [`AudioBuffer`]. Buffers are
//! immutable once created and shared read-only by every segment scheduled
//! from them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::TrackDefaults;
use crate::error::EngineError;

/// Opaque track identifier, allocated by the engine at add time and stable
/// for the track's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub(crate) u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Immutable decoded PCM audio, interleaved.
///
/// The engine does not resample: buffers are expected at the engine sample
/// rate. A mismatched rate is accepted with a warning and plays back at the
/// engine rate.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    samples: Arc<[f32]>,
    channels: u16,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Wrap interleaved samples. A trailing partial frame is dropped.
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Result<Self, EngineError> {
        if channels == 0 || sample_rate == 0 {
            return Err(EngineError::EmptyBuffer);
        }
        let mut samples = samples;
        let rem = samples.len() % channels as usize;
        if rem != 0 {
            log::warn!("audio buffer has a partial trailing frame; dropping {rem} sample(s)");
            samples.truncate(samples.len() - rem);
        }
        if samples.is_empty() {
            return Err(EngineError::EmptyBuffer);
        }
        Ok(Self {
            samples: samples.into(),
            channels,
            sample_rate,
        })
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of frames (one sample per channel) in the buffer.
    pub fn frames(&self) -> u64 {
        (self.samples.len() / self.channels as usize) as u64
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// Stereo view of frame `idx`: mono is duplicated to both sides, wider
    /// layouts contribute their first two channels.
    pub(crate) fn frame(&self, idx: u64) -> (f32, f32) {
        let i = idx as usize * self.channels as usize;
        let left = self.samples.get(i).copied().unwrap_or(0.0);
        let right = if self.channels == 1 {
            left
        } else {
            self.samples.get(i + 1).copied().unwrap_or(0.0)
        };
        (left, right)
    }
}

/// Per-track settings the host persists across sessions.
///
/// Every mutation through the engine emits a `MetadataChanged` event with a
/// fresh snapshot of this struct; the persistence collaborator stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackMeta {
    pub name: String,
    /// Opaque display tag chosen by the loader (the engine never inspects it).
    pub icon: String,
    /// Target gain in `[0.0, 1.0]`.
    pub volume: f32,
    pub fade_enabled: bool,
    /// Fade-in/out ramp length in milliseconds.
    pub fade_ms: u64,
    pub loop_enabled: bool,
}

impl TrackMeta {
    /// Metadata for a freshly loaded file, seeded from configured defaults.
    pub fn from_defaults(name: impl Into<String>, icon: impl Into<String>, d: &TrackDefaults) -> Self {
        Self {
            name: name.into(),
            icon: icon.into(),
            volume: d.volume,
            fade_enabled: d.fade_enabled,
            fade_ms: d.fade_ms,
            loop_enabled: d.loop_enabled,
        }
    }
}

/// What the external decoder/loader hands the engine for one playable unit.
#[derive(Debug, Clone)]
pub struct LoadedTrack {
    pub buffer: Arc<AudioBuffer>,
    pub meta: TrackMeta,
}
