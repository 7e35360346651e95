//! Public facade over the engine thread.
//!
//! The handle validates track ids against its own registry before
//! forwarding, so callers get `UnknownTrack` synchronously instead of a
//! silently dropped command. Everything else is fire-and-forget over the
//! command channel.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::thread::JoinHandle;

use crate::config::EngineSettings;
use crate::error::EngineError;
use crate::track::{LoadedTrack, TrackId};

use super::scheduler::spawn_engine_thread;
use super::types::{EngineCmd, EngineEvent};

pub struct Engine {
    tx: Sender<EngineCmd>,
    registry: Mutex<HashSet<TrackId>>,
    next_id: AtomicU64,
    quit_fade_out_ms: u64,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Start the engine on the default audio output device.
    ///
    /// The returned receiver carries [`EngineEvent`]s for the host's UI and
    /// persistence layers; dropping it is fine, events are never awaited.
    pub fn new(settings: EngineSettings) -> Result<(Self, Receiver<EngineEvent>), EngineError> {
        Self::start(settings, true)
    }

    /// Start the engine without opening an audio device. The clock only
    /// advances when something drains the bus, so this is mostly useful for
    /// tests and dry runs.
    pub fn headless(settings: EngineSettings) -> Result<(Self, Receiver<EngineEvent>), EngineError> {
        Self::start(settings, false)
    }

    fn start(
        settings: EngineSettings,
        with_output: bool,
    ) -> Result<(Self, Receiver<EngineEvent>), EngineError> {
        let (tx, rx) = mpsc::channel::<EngineCmd>();
        let (event_tx, event_rx) = mpsc::channel::<EngineEvent>();
        let quit_fade_out_ms = settings.quit_fade_out_ms;
        let join = spawn_engine_thread(rx, event_tx, settings, with_output)?;
        Ok((
            Self {
                tx,
                registry: Mutex::new(HashSet::new()),
                next_id: AtomicU64::new(1),
                quit_fade_out_ms,
                join: Mutex::new(Some(join)),
            },
            event_rx,
        ))
    }

    /// Register a decoded track and hand back its id.
    pub fn add_track(&self, track: LoadedTrack) -> Result<TrackId, EngineError> {
        let id = TrackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.send(EngineCmd::AddTrack { id, track })?;
        if let Ok(mut reg) = self.registry.lock() {
            reg.insert(id);
        }
        Ok(id)
    }

    /// Stop the track (draining its fade-out if one is configured) and drop
    /// it. The id is forgotten immediately; further calls with it fail.
    pub fn remove_track(&self, id: TrackId) -> Result<(), EngineError> {
        self.check(id)?;
        self.send(EngineCmd::RemoveTrack(id))?;
        if let Ok(mut reg) = self.registry.lock() {
            reg.remove(&id);
        }
        Ok(())
    }

    pub fn play(&self, id: TrackId) -> Result<(), EngineError> {
        self.check(id)?;
        self.send(EngineCmd::Play(id))
    }

    pub fn stop(&self, id: TrackId) -> Result<(), EngineError> {
        self.check(id)?;
        self.send(EngineCmd::Stop(id))
    }

    /// Stop every audible track, each with its own fade settings.
    pub fn stop_all(&self) -> Result<(), EngineError> {
        self.send(EngineCmd::StopAll)
    }

    pub fn set_volume(&self, id: TrackId, volume: f32) -> Result<(), EngineError> {
        self.check(id)?;
        self.send(EngineCmd::SetVolume(id, volume))
    }

    pub fn set_fade_enabled(&self, id: TrackId, enabled: bool) -> Result<(), EngineError> {
        self.check(id)?;
        self.send(EngineCmd::SetFadeEnabled(id, enabled))
    }

    pub fn set_fade_ms(&self, id: TrackId, fade_ms: u64) -> Result<(), EngineError> {
        self.check(id)?;
        self.send(EngineCmd::SetFadeMs(id, fade_ms))
    }

    pub fn set_loop_enabled(&self, id: TrackId, enabled: bool) -> Result<(), EngineError> {
        self.check(id)?;
        self.send(EngineCmd::SetLoopEnabled(id, enabled))
    }

    /// Master volume applies instantly, without a ramp.
    pub fn set_master_volume(&self, volume: f32) -> Result<(), EngineError> {
        self.send(EngineCmd::SetMasterVolume(volume))
    }

    /// Fade the master bus out and join the engine thread. Further calls on
    /// this handle return [`EngineError::Disconnected`].
    pub fn shutdown(&self) {
        let _ = self.send(EngineCmd::Quit {
            fade_out_ms: self.quit_fade_out_ms,
        });
        if let Ok(mut j) = self.join.lock() {
            if let Some(h) = j.take() {
                let _ = h.join();
            }
        }
    }

    fn check(&self, id: TrackId) -> Result<(), EngineError> {
        match self.registry.lock() {
            Ok(reg) if reg.contains(&id) => Ok(()),
            Ok(_) => Err(EngineError::UnknownTrack(id)),
            Err(_) => Err(EngineError::Disconnected),
        }
    }

    fn send(&self, cmd: EngineCmd) -> Result<(), EngineError> {
        self.tx.send(cmd).map_err(|_| EngineError::Disconnected)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Dropping the sender alone would stop the thread, but joining here
        // keeps teardown deterministic for short-lived hosts.
        self.shutdown();
    }
}
