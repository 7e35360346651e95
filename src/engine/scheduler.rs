//! Playback scheduling against the engine clock.
//!
//! The scheduler owns every track record and all deferred work. Looping is
//! double-buffered: while segment `k` plays, segment `k + 1` is armed on the
//! bus a little ahead of the boundary, at exactly `origin + (k + 1) * len`
//! frames. The boundary position comes from that integer arithmetic alone;
//! timer wake-ups only decide *when* the arm happens, never *where* the
//! audio lands.

use std::collections::HashMap;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::bus::{connect_output, BusHandle, EngineClock, Lane, MixBus, Segment, SlotBusy};
use crate::config::EngineSettings;
use crate::envelope::GainStage;
use crate::error::EngineError;
use crate::track::{AudioBuffer, LoadedTrack, TrackId, TrackMeta};

use super::timers::{TimerId, TimerKind, TimerQueue};
use super::types::{EngineCmd, EngineEvent, PlaybackState};

/// Upper bound on one wake-up interval. Keeps the thread responsive to
/// commands even when no timer is close.
const IDLE_TICK: Duration = Duration::from_millis(200);

struct TrackRecord {
    buffer: Arc<AudioBuffer>,
    meta: TrackMeta,
    state: PlaybackState,
    /// Start frame of the next segment to arm, maintained as
    /// `origin + k * len` by exact addition.
    next_start: u64,
    pending_rearm: Option<TimerId>,
    pending_fade_out: Option<TimerId>,
    pending_end: Option<TimerId>,
    /// Set by removal while the track is audible; the record is dropped
    /// when teardown completes.
    remove_on_idle: bool,
}

pub(super) struct Scheduler {
    bus: BusHandle,
    clock: EngineClock,
    tracks: HashMap<TrackId, TrackRecord>,
    timers: TimerQueue,
    events: Sender<EngineEvent>,
    lead_frames: u64,
    grace_frames: u64,
}

impl Scheduler {
    pub(super) fn new(bus: BusHandle, events: Sender<EngineEvent>, settings: &EngineSettings) -> Self {
        let clock = lock_bus(&bus).clock();
        let lead_frames = clock.ms_to_frames(settings.schedule_lead_ms);
        let grace_frames = clock.ms_to_frames(settings.fade_grace_ms);
        Self {
            bus,
            clock,
            tracks: HashMap::new(),
            timers: TimerQueue::new(),
            events,
            lead_frames,
            grace_frames,
        }
    }

    pub(super) fn handle_cmd(&mut self, cmd: EngineCmd) {
        match cmd {
            EngineCmd::AddTrack { id, track } => self.add_track(id, track),
            EngineCmd::RemoveTrack(id) => self.remove_track(id),
            EngineCmd::Play(id) => self.start_track(id),
            EngineCmd::Stop(id) => self.stop_track(id),
            EngineCmd::StopAll => {
                let ids: Vec<TrackId> = self.tracks.keys().copied().collect();
                for id in ids {
                    self.stop_track(id);
                }
            }
            EngineCmd::SetVolume(id, v) => self.set_volume(id, v),
            EngineCmd::SetFadeEnabled(id, on) => {
                self.update_meta(id, |m| m.fade_enabled = on);
            }
            EngineCmd::SetFadeMs(id, ms) => {
                self.update_meta(id, |m| m.fade_ms = ms);
            }
            EngineCmd::SetLoopEnabled(id, on) => self.set_loop_enabled(id, on),
            EngineCmd::SetMasterVolume(v) => {
                lock_bus(&self.bus).set_master(v);
            }
            // The thread loop intercepts Quit; reaching it here means a
            // headless caller dropped its handle, nothing to do.
            EngineCmd::Quit { .. } => {}
        }
    }

    /// Fire every timer whose due frame the clock has passed. Timer ids are
    /// checked against the owning track's pending slot, so a cancelled or
    /// superseded timer falls through silently.
    pub(super) fn fire_due_timers(&mut self) {
        let now = self.clock.now_frames();
        while let Some((tid, kind)) = self.timers.pop_due(now) {
            match kind {
                TimerKind::ReArm(id) => self.fire_rearm(tid, id),
                TimerKind::FadeOutDone(id) => self.fire_fade_out_done(tid, id),
                TimerKind::NaturalEnd(id) => self.fire_natural_end(tid, id),
            }
        }
    }

    /// How long the thread may sleep before the earliest timer is due.
    pub(super) fn until_next_wakeup(&self) -> Option<Duration> {
        self.timers.next_due().map(|f| self.clock.duration_until(f))
    }

    fn add_track(&mut self, id: TrackId, track: LoadedTrack) {
        let engine_rate = self.clock.sample_rate();
        if track.buffer.sample_rate() != engine_rate {
            log::warn!(
                "track {id} is {} Hz, engine runs at {engine_rate} Hz; playing unresampled",
                track.buffer.sample_rate()
            );
        }
        let mut meta = track.meta.clone();
        meta.volume = meta.volume.clamp(0.0, 1.0);
        self.tracks.insert(
            id,
            TrackRecord {
                buffer: track.buffer,
                meta: meta.clone(),
                state: PlaybackState::Idle,
                next_start: 0,
                pending_rearm: None,
                pending_fade_out: None,
                pending_end: None,
                remove_on_idle: false,
            },
        );
        log::info!("added track {id} ({})", meta.name);
        let _ = self.events.send(EngineEvent::MetadataChanged { id, meta });
    }

    /// Removal forces a stop first. An audible track keeps its record until
    /// the stop's teardown completes (so a fade-out still drains); an Idle
    /// one is dropped right away.
    fn remove_track(&mut self, id: TrackId) {
        let Some(rec) = self.tracks.get_mut(&id) else {
            return;
        };
        if rec.state == PlaybackState::Idle {
            self.tracks.remove(&id);
            log::info!("removed track {id}");
            return;
        }
        rec.remove_on_idle = true;
        if rec.state == PlaybackState::Playing {
            self.stop_track(id);
        }
    }

    fn start_track(&mut self, id: TrackId) {
        let Some(rec) = self.tracks.get(&id) else {
            log::warn!("play for unknown track {id}");
            return;
        };
        match rec.state {
            // Play on a playing track is a no-op; the origin stays put.
            PlaybackState::Playing => return,
            // Play during a fade-out restarts: hard-silence, then begin anew.
            PlaybackState::Stopping => self.teardown(id),
            PlaybackState::Idle => {}
        }

        let now = self.clock.now_frames();
        // The teardown above drops the record outright when a removal was
        // queued behind the fade; the play raced the removal and loses.
        let Some(rec) = self.tracks.get_mut(&id) else {
            return;
        };
        let len = rec.buffer.frames();

        let mut gain = GainStage::new(0.0);
        let fade_frames = self.clock.ms_to_frames(rec.meta.fade_ms);
        if rec.meta.fade_enabled && fade_frames > 0 {
            gain.fade_in(now, rec.meta.volume, fade_frames);
        } else {
            gain.set(rec.meta.volume);
        }

        let mut lane = Lane::new(gain);
        // A fresh lane has two empty slots; this arm cannot fail.
        let _ = lane.arm(Segment::new(rec.buffer.clone(), now), now);
        lock_bus(&self.bus).insert_lane(id, lane);

        rec.state = PlaybackState::Playing;
        rec.next_start = now + len;

        if rec.meta.loop_enabled {
            let due = rec.next_start - self.lead_frames.min(len / 2);
            rec.pending_rearm = Some(self.timers.schedule(due, TimerKind::ReArm(id)));
        } else {
            rec.pending_end = Some(self.timers.schedule(rec.next_start, TimerKind::NaturalEnd(id)));
        }

        log::debug!("track {id} playing from frame {now} (len {len})");
        let _ = self.events.send(EngineEvent::PlaybackChanged {
            id,
            state: PlaybackState::Playing,
        });
    }

    fn stop_track(&mut self, id: TrackId) {
        let now = self.clock.now_frames();
        let Some(rec) = self.tracks.get_mut(&id) else {
            return;
        };
        // Stop is idempotent: Idle and already-Stopping tracks are left be.
        if rec.state != PlaybackState::Playing {
            return;
        }

        rec.pending_rearm = None;
        rec.pending_end = None;

        let fade_frames = self.clock.ms_to_frames(rec.meta.fade_ms);
        if rec.meta.fade_enabled && fade_frames > 0 {
            if let Some(lane) = lock_bus(&self.bus).lane_mut(id) {
                lane.gain.fade_out(now, fade_frames);
            }
            // Grace after the ramp so the last audible samples drain before
            // the segments are dropped.
            let due = now + fade_frames + self.grace_frames;
            rec.pending_fade_out = Some(self.timers.schedule(due, TimerKind::FadeOutDone(id)));
            rec.state = PlaybackState::Stopping;
            let _ = self.events.send(EngineEvent::PlaybackChanged {
                id,
                state: PlaybackState::Stopping,
            });
        } else {
            self.teardown(id);
        }
    }

    fn set_volume(&mut self, id: TrackId, v: f32) {
        let now = self.clock.now_frames();
        let v = v.clamp(0.0, 1.0);
        let Some(rec) = self.tracks.get_mut(&id) else {
            return;
        };
        rec.meta.volume = v;
        // During a fade-in the ramp keeps its start and progress and only
        // the endpoint moves. A Stopping track's fade-out is left alone.
        if rec.state == PlaybackState::Playing {
            if let Some(lane) = lock_bus(&self.bus).lane_mut(id) {
                lane.gain.retarget(now, v);
            }
        }
        let meta = rec.meta.clone();
        let _ = self.events.send(EngineEvent::MetadataChanged { id, meta });
    }

    fn set_loop_enabled(&mut self, id: TrackId, on: bool) {
        let Some(rec) = self.tracks.get_mut(&id) else {
            return;
        };
        rec.meta.loop_enabled = on;
        if rec.state == PlaybackState::Playing {
            let len = rec.buffer.frames();
            if on && rec.pending_rearm.is_none() {
                // Resume looping from the already-computed next boundary.
                rec.pending_end = None;
                let due = rec.next_start.saturating_sub(self.lead_frames.min(len / 2));
                rec.pending_rearm = Some(self.timers.schedule(due, TimerKind::ReArm(id)));
            } else if !on && rec.pending_rearm.is_some() {
                // Let the already-armed segments play out, then end.
                rec.pending_rearm = None;
                rec.pending_end =
                    Some(self.timers.schedule(rec.next_start, TimerKind::NaturalEnd(id)));
            }
        }
        let meta = rec.meta.clone();
        let _ = self.events.send(EngineEvent::MetadataChanged { id, meta });
    }

    fn update_meta(&mut self, id: TrackId, f: impl FnOnce(&mut TrackMeta)) {
        let Some(rec) = self.tracks.get_mut(&id) else {
            return;
        };
        f(&mut rec.meta);
        let meta = rec.meta.clone();
        let _ = self.events.send(EngineEvent::MetadataChanged { id, meta });
    }

    fn fire_rearm(&mut self, tid: TimerId, id: TrackId) {
        let (buffer, start, len) = {
            let Some(rec) = self.tracks.get_mut(&id) else {
                return;
            };
            if rec.pending_rearm != Some(tid) {
                return;
            }
            rec.pending_rearm = None;
            if rec.state != PlaybackState::Playing {
                return;
            }
            (rec.buffer.clone(), rec.next_start, rec.buffer.frames())
        };

        let now = self.clock.now_frames();
        let armed = lock_bus(&self.bus)
            .lane_mut(id)
            .map(|lane| lane.arm(Segment::new(buffer, start), now));

        match armed {
            Some(Ok(())) => {
                let rec = self.tracks.get_mut(&id).expect("record checked above");
                rec.next_start = start + len;
                let due = rec.next_start - self.lead_frames.min(len / 2);
                rec.pending_rearm = Some(self.timers.schedule(due, TimerKind::ReArm(id)));
            }
            Some(Err(SlotBusy)) => {
                log::error!("{}", EngineError::SchedulingConflict(id));
                self.teardown(id);
            }
            None => {
                log::error!("track {id} is playing but has no lane on the bus");
                self.teardown(id);
            }
        }
    }

    fn fire_fade_out_done(&mut self, tid: TimerId, id: TrackId) {
        let Some(rec) = self.tracks.get_mut(&id) else {
            return;
        };
        if rec.pending_fade_out != Some(tid) {
            return;
        }
        rec.pending_fade_out = None;
        self.teardown(id);
    }

    fn fire_natural_end(&mut self, tid: TimerId, id: TrackId) {
        let Some(rec) = self.tracks.get_mut(&id) else {
            return;
        };
        // Valid only while still Playing: a stop in the meantime has its own
        // teardown path, and a restart holds a fresh timer id.
        if rec.pending_end != Some(tid) || rec.state != PlaybackState::Playing {
            return;
        }
        rec.pending_end = None;
        self.teardown(id);
    }

    /// Drop the track's bus resources and forget all deferred work. Safe in
    /// any state and safe to repeat; only a real transition emits an event.
    fn teardown(&mut self, id: TrackId) {
        lock_bus(&self.bus).remove_lane(id);
        let mut drop_record = false;
        if let Some(rec) = self.tracks.get_mut(&id) {
            rec.pending_rearm = None;
            rec.pending_fade_out = None;
            rec.pending_end = None;
            if rec.state != PlaybackState::Idle {
                rec.state = PlaybackState::Idle;
                let _ = self.events.send(EngineEvent::PlaybackChanged {
                    id,
                    state: PlaybackState::Idle,
                });
            }
            drop_record = rec.remove_on_idle;
        }
        if drop_record {
            self.tracks.remove(&id);
            log::info!("removed track {id}");
        }
    }

    /// Stepped master fade for shutdown, then hard-silence every track.
    fn quit(&mut self, fade_out_ms: u64) {
        let master = lock_bus(&self.bus).master();
        if fade_out_ms > 0 && master > 0.0 {
            let steps: u64 = 20;
            let step_ms = (fade_out_ms / steps).max(1);
            for step in 1..=steps {
                let t = step as f32 / steps as f32;
                lock_bus(&self.bus).set_master(master * (1.0 - t));
                thread::sleep(Duration::from_millis(step_ms));
            }
        }
        let ids: Vec<TrackId> = self.tracks.keys().copied().collect();
        for id in ids {
            self.teardown(id);
        }
    }

    #[cfg(test)]
    pub(super) fn track_state(&self, id: TrackId) -> Option<PlaybackState> {
        self.tracks.get(&id).map(|r| r.state)
    }

    #[cfg(test)]
    pub(super) fn has_pending_rearm(&self, id: TrackId) -> bool {
        self.tracks
            .get(&id)
            .is_some_and(|r| r.pending_rearm.is_some())
    }
}

fn lock_bus(bus: &BusHandle) -> MutexGuard<'_, MixBus> {
    match bus.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Spawn the engine thread. The audio device (when requested) is opened on
/// the thread itself; readiness or the open failure is reported back before
/// this function returns.
pub(super) fn spawn_engine_thread(
    rx: Receiver<EngineCmd>,
    events: Sender<EngineEvent>,
    settings: EngineSettings,
    with_output: bool,
) -> Result<JoinHandle<()>, EngineError> {
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), EngineError>>();

    let handle = thread::spawn(move || {
        let bus: BusHandle = Arc::new(Mutex::new(MixBus::new(
            settings.sample_rate,
            settings.channels,
            settings.master_volume,
        )));

        // The stream and sink must outlive the loop or playback stops.
        let _output = if with_output {
            match connect_output(bus.clone(), settings.sample_rate, settings.channels) {
                Ok(pair) => {
                    let _ = ready_tx.send(Ok(()));
                    Some(pair)
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            }
        } else {
            let _ = ready_tx.send(Ok(()));
            None
        };

        let mut sched = Scheduler::new(bus, events, &settings);
        loop {
            let timeout = sched
                .until_next_wakeup()
                .unwrap_or(IDLE_TICK)
                .min(IDLE_TICK);
            match rx.recv_timeout(timeout) {
                Ok(EngineCmd::Quit { fade_out_ms }) => {
                    sched.quit(fade_out_ms);
                    break;
                }
                Ok(cmd) => sched.handle_cmd(cmd),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            sched.fire_due_timers();
        }
        log::debug!("engine thread exiting");
    });

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => Err(EngineError::Output(
            "engine thread exited before reporting readiness".into(),
        )),
    }
}
