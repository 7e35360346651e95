use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::scheduler::Scheduler;
use super::types::{EngineCmd, EngineEvent, PlaybackState};
use crate::bus::{BusHandle, MixBus};
use crate::config::{EngineSettings, Settings, TrackDefaults};
use crate::engine::Engine;
use crate::track::{AudioBuffer, LoadedTrack, TrackId, TrackMeta};

// A low sample rate keeps the frame arithmetic in these tests readable:
// at 1000 Hz one millisecond is exactly one frame.
const SR: u32 = 1000;

fn test_settings() -> EngineSettings {
    EngineSettings {
        sample_rate: SR,
        channels: 2,
        schedule_lead_ms: 100,
        fade_grace_ms: 100,
        master_volume: 1.0,
        quit_fade_out_ms: 0,
    }
}

fn make_scheduler() -> (Scheduler, BusHandle, Receiver<EngineEvent>) {
    let settings = test_settings();
    let bus: BusHandle = Arc::new(Mutex::new(MixBus::new(
        settings.sample_rate,
        settings.channels,
        settings.master_volume,
    )));
    let (tx, rx) = mpsc::channel();
    let sched = Scheduler::new(bus.clone(), tx, &settings);
    (sched, bus, rx)
}

fn ramp_track(frames: u64, volume: f32, fade_ms: u64, loop_enabled: bool) -> LoadedTrack {
    let mut samples = Vec::with_capacity(frames as usize * 2);
    for i in 0..frames {
        samples.push((i as f32 + 1.0) / 1000.0);
        samples.push(-(i as f32 + 1.0) / 1000.0);
    }
    LoadedTrack {
        buffer: Arc::new(AudioBuffer::new(samples, 2, SR).unwrap()),
        meta: TrackMeta {
            name: "test".into(),
            icon: "note".into(),
            volume,
            fade_enabled: fade_ms > 0,
            fade_ms,
            loop_enabled,
        },
    }
}

fn add(sched: &mut Scheduler, id: u64, track: LoadedTrack) -> TrackId {
    let id = TrackId(id);
    sched.handle_cmd(EngineCmd::AddTrack { id, track });
    id
}

/// Render `frames` frames off the bus in small chunks, firing due timers
/// between chunks the way the engine thread would.
fn render(sched: &mut Scheduler, bus: &BusHandle, frames: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(frames * 2);
    let mut chunk = [0.0f32; 64 * 2];
    let mut remaining = frames;
    while remaining > 0 {
        let n = remaining.min(64);
        let slice = &mut chunk[..n * 2];
        bus.lock().unwrap().render(slice);
        out.extend_from_slice(slice);
        remaining -= n;
        sched.fire_due_timers();
    }
    out
}

fn playback_events(rx: &Receiver<EngineEvent>) -> Vec<PlaybackState> {
    rx.try_iter()
        .filter_map(|e| match e {
            EngineEvent::PlaybackChanged { state, .. } => Some(state),
            _ => None,
        })
        .collect()
}

#[test]
fn looping_track_renders_gaplessly_across_boundaries() {
    let (mut sched, bus, _rx) = make_scheduler();
    let track = ramp_track(300, 1.0, 0, true);
    let buffer = track.buffer.clone();
    let id = add(&mut sched, 1, track);

    sched.handle_cmd(EngineCmd::Play(id));
    let out = render(&mut sched, &bus, 900);

    // Three full passes, each starting at exactly origin + k * 300.
    for k in 0..3u64 {
        for i in 0..300u64 {
            let (l, r) = buffer.frame(i);
            let at = ((k * 300 + i) * 2) as usize;
            assert_eq!(out[at], l, "pass {k} frame {i} left");
            assert_eq!(out[at + 1], r, "pass {k} frame {i} right");
        }
    }
    assert_eq!(sched.track_state(id), Some(PlaybackState::Playing));
}

#[test]
fn at_most_two_segments_are_ever_live() {
    let (mut sched, bus, _rx) = make_scheduler();
    let id = add(&mut sched, 1, ramp_track(250, 1.0, 0, true));

    sched.handle_cmd(EngineCmd::Play(id));
    let mut chunk = [0.0f32; 50 * 2];
    for _ in 0..20 {
        bus.lock().unwrap().render(&mut chunk);
        sched.fire_due_timers();
        let bus = bus.lock().unwrap();
        let now = bus.clock().now_frames();
        let lane = bus.lane(id).expect("lane while playing");
        assert!(lane.live_count(now) <= 2, "cap exceeded at frame {now}");
    }
}

#[test]
fn stop_with_fade_passes_through_stopping_then_idle() {
    let (mut sched, bus, rx) = make_scheduler();
    let id = add(&mut sched, 1, ramp_track(5000, 0.8, 400, true));

    sched.handle_cmd(EngineCmd::Play(id));
    render(&mut sched, &bus, 100);
    sched.handle_cmd(EngineCmd::Stop(id));
    assert_eq!(sched.track_state(id), Some(PlaybackState::Stopping));

    // Fade 400 frames plus 100 grace; teardown is due at frame 600.
    render(&mut sched, &bus, 450);
    assert_eq!(sched.track_state(id), Some(PlaybackState::Stopping));
    render(&mut sched, &bus, 100);
    assert_eq!(sched.track_state(id), Some(PlaybackState::Idle));
    assert!(bus.lock().unwrap().lane(id).is_none());

    assert_eq!(
        playback_events(&rx),
        vec![
            PlaybackState::Playing,
            PlaybackState::Stopping,
            PlaybackState::Idle
        ]
    );
}

#[test]
fn stop_is_idempotent() {
    let (mut sched, bus, rx) = make_scheduler();
    let id = add(&mut sched, 1, ramp_track(500, 1.0, 0, false));

    sched.handle_cmd(EngineCmd::Play(id));
    sched.handle_cmd(EngineCmd::Stop(id));
    sched.handle_cmd(EngineCmd::Stop(id));
    sched.handle_cmd(EngineCmd::Stop(id));

    assert_eq!(sched.track_state(id), Some(PlaybackState::Idle));
    assert!(bus.lock().unwrap().lane(id).is_none());
    // Exactly one Playing and one Idle transition, no repeats.
    assert_eq!(
        playback_events(&rx),
        vec![PlaybackState::Playing, PlaybackState::Idle]
    );
}

#[test]
fn stop_cancels_a_pending_rearm() {
    let (mut sched, bus, _rx) = make_scheduler();
    let id = add(&mut sched, 1, ramp_track(300, 1.0, 0, true));

    sched.handle_cmd(EngineCmd::Play(id));
    render(&mut sched, &bus, 100);
    sched.handle_cmd(EngineCmd::Stop(id));
    assert_eq!(sched.track_state(id), Some(PlaybackState::Idle));

    // Run well past where the cancelled re-arm was due; the track must not
    // come back from the dead.
    let out = render(&mut sched, &bus, 600);
    assert!(out.iter().all(|&s| s == 0.0));
    assert_eq!(sched.track_state(id), Some(PlaybackState::Idle));
    assert!(bus.lock().unwrap().lane(id).is_none());
}

#[test]
fn stopping_mid_fade_in_ramps_down_from_the_current_gain() {
    let (mut sched, bus, _rx) = make_scheduler();
    // 2000 ms fade at 1000 Hz is a 2000-frame ramp towards 0.7.
    let id = add(&mut sched, 1, ramp_track(10_000, 0.7, 2000, false));

    sched.handle_cmd(EngineCmd::Play(id));
    render(&mut sched, &bus, 1000);
    sched.handle_cmd(EngineCmd::Stop(id));

    let bus_guard = bus.lock().unwrap();
    let gain = &bus_guard.lane(id).expect("stopping lane").gain;
    assert!((gain.value_at(1000) - 0.35).abs() < 1e-6);
    assert!((gain.value_at(2000) - 0.175).abs() < 1e-6);
    assert_eq!(gain.value_at(3000), 0.0);
}

#[test]
fn non_looping_track_ends_naturally() {
    let (mut sched, bus, rx) = make_scheduler();
    let id = add(&mut sched, 1, ramp_track(400, 1.0, 0, false));

    sched.handle_cmd(EngineCmd::Play(id));
    render(&mut sched, &bus, 400);
    sched.fire_due_timers();

    assert_eq!(sched.track_state(id), Some(PlaybackState::Idle));
    assert!(bus.lock().unwrap().lane(id).is_none());
    assert_eq!(
        playback_events(&rx),
        vec![PlaybackState::Playing, PlaybackState::Idle]
    );
}

#[test]
fn restart_outlives_a_stale_end_timer() {
    let (mut sched, bus, _rx) = make_scheduler();
    let id = add(&mut sched, 1, ramp_track(400, 1.0, 0, false));

    sched.handle_cmd(EngineCmd::Play(id));
    render(&mut sched, &bus, 200);
    sched.handle_cmd(EngineCmd::Stop(id));
    sched.handle_cmd(EngineCmd::Play(id));

    // The first play's end timer comes due at frame 400; it belongs to a
    // torn-down playback and must not kill the restart.
    render(&mut sched, &bus, 300);
    assert_eq!(sched.track_state(id), Some(PlaybackState::Playing));

    // The restart's own end (200 + 400) still fires.
    render(&mut sched, &bus, 100);
    assert_eq!(sched.track_state(id), Some(PlaybackState::Idle));
}

#[test]
fn volume_change_retargets_an_active_fade_in() {
    let (mut sched, bus, rx) = make_scheduler();
    let id = add(&mut sched, 1, ramp_track(10_000, 0.8, 1000, false));

    sched.handle_cmd(EngineCmd::Play(id));
    render(&mut sched, &bus, 500);
    sched.handle_cmd(EngineCmd::SetVolume(id, 0.2));

    {
        let bus_guard = bus.lock().unwrap();
        let gain = &bus_guard.lane(id).expect("lane").gain;
        // Ramp start and progress are kept; only the endpoint moved.
        assert!((gain.value_at(1000) - 0.2).abs() < 1e-6);
    }

    let metas: Vec<TrackMeta> = rx
        .try_iter()
        .filter_map(|e| match e {
            EngineEvent::MetadataChanged { meta, .. } => Some(meta),
            _ => None,
        })
        .collect();
    assert_eq!(metas.last().unwrap().volume, 0.2);
}

#[test]
fn disabling_loop_lets_armed_audio_play_out_then_end() {
    let (mut sched, bus, _rx) = make_scheduler();
    let id = add(&mut sched, 1, ramp_track(300, 1.0, 0, true));

    sched.handle_cmd(EngineCmd::Play(id));
    render(&mut sched, &bus, 250); // second segment armed at 300
    assert!(sched.has_pending_rearm(id));

    sched.handle_cmd(EngineCmd::SetLoopEnabled(id, false));
    assert!(!sched.has_pending_rearm(id));

    // The armed segment (300..600) still plays in full.
    render(&mut sched, &bus, 300);
    assert_eq!(sched.track_state(id), Some(PlaybackState::Playing));
    render(&mut sched, &bus, 100);
    assert_eq!(sched.track_state(id), Some(PlaybackState::Idle));
}

#[test]
fn remove_while_playing_fades_out_then_drops_the_record() {
    let (mut sched, bus, rx) = make_scheduler();
    let id = add(&mut sched, 1, ramp_track(5000, 1.0, 200, true));

    sched.handle_cmd(EngineCmd::Play(id));
    render(&mut sched, &bus, 100);
    sched.handle_cmd(EngineCmd::RemoveTrack(id));

    // The fade still drains; the record goes only once teardown completes.
    assert_eq!(sched.track_state(id), Some(PlaybackState::Stopping));
    render(&mut sched, &bus, 400);
    assert_eq!(sched.track_state(id), None);
    assert!(bus.lock().unwrap().lane(id).is_none());
    assert_eq!(
        playback_events(&rx),
        vec![
            PlaybackState::Playing,
            PlaybackState::Stopping,
            PlaybackState::Idle
        ]
    );
}

#[test]
fn play_racing_a_removal_mid_fade_does_not_revive_the_track() {
    let (mut sched, bus, rx) = make_scheduler();
    let id = add(&mut sched, 1, ramp_track(5000, 1.0, 200, true));

    // A play can cross the channel after the removal while the fade-out is
    // still draining; it must lose quietly, not restart or crash.
    sched.handle_cmd(EngineCmd::Play(id));
    render(&mut sched, &bus, 50);
    sched.handle_cmd(EngineCmd::RemoveTrack(id));
    assert_eq!(sched.track_state(id), Some(PlaybackState::Stopping));
    sched.handle_cmd(EngineCmd::Play(id));

    assert_eq!(sched.track_state(id), None);
    assert!(bus.lock().unwrap().lane(id).is_none());
    assert_eq!(
        playback_events(&rx),
        vec![
            PlaybackState::Playing,
            PlaybackState::Stopping,
            PlaybackState::Idle
        ]
    );
}

#[test]
fn play_during_a_fade_out_restarts_the_track() {
    let (mut sched, bus, rx) = make_scheduler();
    let id = add(&mut sched, 1, ramp_track(5000, 0.8, 400, true));

    sched.handle_cmd(EngineCmd::Play(id));
    render(&mut sched, &bus, 100);
    sched.handle_cmd(EngineCmd::Stop(id));
    assert_eq!(sched.track_state(id), Some(PlaybackState::Stopping));

    render(&mut sched, &bus, 100);
    sched.handle_cmd(EngineCmd::Play(id));

    assert_eq!(sched.track_state(id), Some(PlaybackState::Playing));
    assert!(bus.lock().unwrap().lane(id).is_some());
    assert_eq!(
        playback_events(&rx),
        vec![
            PlaybackState::Playing,
            PlaybackState::Stopping,
            PlaybackState::Idle,
            PlaybackState::Playing
        ]
    );

    // The superseded fade-out completion must not kill the restart.
    render(&mut sched, &bus, 500);
    assert_eq!(sched.track_state(id), Some(PlaybackState::Playing));
}

#[test]
fn out_of_range_volume_is_clamped_at_add_time() {
    let (mut sched, bus, rx) = make_scheduler();
    let mut track = ramp_track(100, 1.0, 0, false);
    track.meta.volume = 5.0;
    let id = add(&mut sched, 1, track);

    let added = rx.recv().unwrap();
    assert!(
        matches!(added, EngineEvent::MetadataChanged { meta, .. } if meta.volume == 1.0)
    );

    sched.handle_cmd(EngineCmd::Play(id));
    let gain = bus.lock().unwrap().lane(id).unwrap().gain.value_at(0);
    assert_eq!(gain, 1.0);
}

#[test]
fn remove_without_fade_is_immediate() {
    let (mut sched, bus, _rx) = make_scheduler();
    let id = add(&mut sched, 1, ramp_track(500, 1.0, 0, true));

    sched.handle_cmd(EngineCmd::Play(id));
    render(&mut sched, &bus, 100);
    sched.handle_cmd(EngineCmd::RemoveTrack(id));

    assert_eq!(sched.track_state(id), None);
    assert!(bus.lock().unwrap().lane(id).is_none());

    // Commands for the removed id fall through without effect.
    sched.handle_cmd(EngineCmd::Play(id));
    assert!(bus.lock().unwrap().lane(id).is_none());
}

#[test]
fn stop_all_stops_every_playing_track() {
    let (mut sched, bus, _rx) = make_scheduler();
    let a = add(&mut sched, 1, ramp_track(500, 1.0, 0, true));
    let b = add(&mut sched, 2, ramp_track(400, 1.0, 0, true));
    let c = add(&mut sched, 3, ramp_track(300, 1.0, 0, true));

    sched.handle_cmd(EngineCmd::Play(a));
    sched.handle_cmd(EngineCmd::Play(b));
    render(&mut sched, &bus, 50);
    sched.handle_cmd(EngineCmd::StopAll);

    assert_eq!(sched.track_state(a), Some(PlaybackState::Idle));
    assert_eq!(sched.track_state(b), Some(PlaybackState::Idle));
    assert_eq!(sched.track_state(c), Some(PlaybackState::Idle));
    assert_eq!(bus.lock().unwrap().lane_count(), 0);
}

#[test]
fn master_volume_applies_without_a_ramp() {
    let (mut sched, bus, _rx) = make_scheduler();
    let id = add(&mut sched, 1, ramp_track(100, 1.0, 0, false));

    sched.handle_cmd(EngineCmd::SetMasterVolume(0.5));
    sched.handle_cmd(EngineCmd::Play(id));
    let out = render(&mut sched, &bus, 1);
    // First frame of the ramp buffer is 0.001; scaled by the master only.
    assert!((out[0] - 0.0005).abs() < 1e-7);
    assert_eq!(bus.lock().unwrap().master(), 0.5);
}

#[test]
fn short_buffers_clamp_the_scheduling_lead() {
    let (mut sched, bus, _rx) = make_scheduler();
    // 40 frames is well under the 100-frame lead; the clamp arms at most
    // one segment ahead so the cap still holds.
    let id = add(&mut sched, 1, ramp_track(40, 1.0, 0, true));
    let buffer = ramp_track(40, 1.0, 0, true).buffer;

    sched.handle_cmd(EngineCmd::Play(id));
    // Render in chunks shorter than the clamped lead (20 frames) so every
    // re-arm is serviced before its boundary.
    let mut out = Vec::with_capacity(400 * 2);
    let mut chunk = [0.0f32; 16 * 2];
    for _ in 0..25 {
        bus.lock().unwrap().render(&mut chunk);
        out.extend_from_slice(&chunk);
        sched.fire_due_timers();
    }
    for k in 0..10u64 {
        for i in 0..40u64 {
            let (l, _) = buffer.frame(i);
            assert_eq!(out[((k * 40 + i) * 2) as usize], l, "pass {k} frame {i}");
        }
    }
}

#[test]
fn headless_engine_validates_ids_and_emits_events() {
    let mut settings = Settings::default();
    settings.engine.quit_fade_out_ms = 0;
    let (engine, events) = Engine::headless(settings.engine).expect("headless engine");

    let bogus = TrackId(999);
    assert_eq!(
        engine.play(bogus).unwrap_err(),
        crate::EngineError::UnknownTrack(bogus)
    );

    let mut meta = TrackMeta::from_defaults("Rain", "rain", &TrackDefaults::default());
    meta.fade_enabled = false;
    let track = LoadedTrack {
        buffer: Arc::new(AudioBuffer::new(vec![0.1, 0.1], 2, 44100).unwrap()),
        meta,
    };
    let id = engine.add_track(track).unwrap();

    let added = events.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(matches!(added, EngineEvent::MetadataChanged { id: got, .. } if got == id));

    engine.play(id).unwrap();
    let playing = events.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(
        playing,
        EngineEvent::PlaybackChanged {
            id,
            state: PlaybackState::Playing
        }
    );

    // No fade configured, so stop tears down synchronously on the engine
    // thread even though the headless clock never moves.
    engine.stop(id).unwrap();
    let idle = events.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(
        idle,
        EngineEvent::PlaybackChanged {
            id,
            state: PlaybackState::Idle
        }
    );

    engine.remove_track(id).unwrap();
    assert_eq!(
        engine.play(id).unwrap_err(),
        crate::EngineError::UnknownTrack(id)
    );

    engine.shutdown();
    assert_eq!(engine.stop_all().unwrap_err(), crate::EngineError::Disconnected);
}
