use serde::Deserialize;

/// Top-level settings loaded from `config.toml`.
///
/// File format: TOML
/// Default path (Linux/XDG): `$XDG_CONFIG_HOME/loopboard/config.toml` or `~/.config/loopboard/config.toml`
///
/// Precedence (highest wins):
/// 1) Environment variables (prefix `LOOPBOARD__`, `__` as nested separator)
/// 2) Config file (if present)
/// 3) Struct defaults
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub engine: EngineSettings,
    pub track_defaults: TrackDefaults,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            engine: EngineSettings::default(),
            track_defaults: TrackDefaults::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Engine sample rate in Hz. Buffers at other rates play unresampled.
    pub sample_rate: u32,
    /// Output channel count (1 or 2).
    pub channels: u16,
    /// How far ahead of a loop boundary the next segment is armed
    /// (milliseconds). Clamped to half the buffer length per track.
    pub schedule_lead_ms: u64,
    /// Extra time after a fade-out ramp before segments are dropped
    /// (milliseconds).
    pub fade_grace_ms: u64,
    /// Initial master bus volume, `0.0..=1.0`.
    pub master_volume: f32,
    /// Master fade-out duration on shutdown (milliseconds).
    /// Set to 0 to stop immediately.
    pub quit_fade_out_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            schedule_lead_ms: 100,
            fade_grace_ms: 100,
            master_volume: 0.7,
            quit_fade_out_ms: 500,
        }
    }
}

/// Settings applied to every newly added track.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackDefaults {
    /// Per-track volume, `0.0..=1.0`.
    pub volume: f32,
    /// Whether starts and stops ramp the volume.
    pub fade_enabled: bool,
    /// Fade ramp duration (milliseconds).
    pub fade_ms: u64,
    /// Whether playback loops gaplessly until stopped.
    pub loop_enabled: bool,
}

impl Default for TrackDefaults {
    fn default() -> Self {
        Self {
            volume: 0.7,
            fade_enabled: true,
            fade_ms: 2000,
            loop_enabled: true,
        }
    }
}
