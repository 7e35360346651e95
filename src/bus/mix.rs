use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::envelope::GainStage;
use crate::track::{AudioBuffer, TrackId};

/// Shared handle to the mix bus; locked by the scheduler for state changes
/// and by the output source while rendering a chunk.
pub(crate) type BusHandle = Arc<Mutex<MixBus>>;

/// Monotonic engine clock: the number of frames the bus has rendered.
///
/// All scheduling decisions are expressed against this clock, never against
/// wall-clock timer fire times, so timer jitter cannot shift playback.
#[derive(Debug, Clone)]
pub(crate) struct EngineClock {
    frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl EngineClock {
    pub(crate) fn now_frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    pub(crate) fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub(crate) fn ms_to_frames(&self, ms: u64) -> u64 {
        ms * self.sample_rate as u64 / 1000
    }

    /// Wall-clock time until the clock reaches `frame` (zero when already
    /// reached). Only ever used to size a wake-up timeout; the decision of
    /// whether something is due is always re-checked against the clock.
    pub(crate) fn duration_until(&self, frame: u64) -> Duration {
        let remaining = frame.saturating_sub(self.now_frames());
        Duration::from_secs_f64(remaining as f64 / self.sample_rate as f64)
    }
}

/// One scheduled playback of a track's buffer at an absolute start frame.
#[derive(Debug, Clone)]
pub(crate) struct Segment {
    buffer: Arc<AudioBuffer>,
    start_frame: u64,
}

impl Segment {
    pub(crate) fn new(buffer: Arc<AudioBuffer>, start_frame: u64) -> Self {
        Self {
            buffer,
            start_frame,
        }
    }

    pub(crate) fn start_frame(&self) -> u64 {
        self.start_frame
    }

    pub(crate) fn end_frame(&self) -> u64 {
        self.start_frame + self.buffer.frames()
    }
}

/// Arming was refused because the slot still holds a live segment.
#[derive(Debug)]
pub(crate) struct SlotBusy;

/// One track's route into the bus: its gain stage and up to two scheduled
/// segments (the audible one and the pre-armed next one).
///
/// The two-slot array is what makes the segment cap structural: a third
/// concurrent segment has nowhere to live.
#[derive(Debug)]
pub(crate) struct Lane {
    pub(crate) gain: GainStage,
    slots: [Option<Segment>; 2],
    next_slot: usize,
}

impl Lane {
    pub(crate) fn new(gain: GainStage) -> Self {
        Self {
            gain,
            slots: [None, None],
            next_slot: 0,
        }
    }

    /// Place `segment` in the next slot, alternating between the two. The
    /// slot being reused must not hold a segment that is still live at
    /// `now`; if it does, the caller asked for a third concurrent segment.
    pub(crate) fn arm(&mut self, segment: Segment, now: u64) -> Result<(), SlotBusy> {
        if let Some(old) = &self.slots[self.next_slot] {
            if old.end_frame() > now {
                return Err(SlotBusy);
            }
        }
        self.slots[self.next_slot] = Some(segment);
        self.next_slot = (self.next_slot + 1) % 2;
        Ok(())
    }

    pub(crate) fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.slots.iter().flatten()
    }

    /// Segments that have started but not finished at `frame`.
    #[cfg(test)]
    pub(crate) fn live_count(&self, frame: u64) -> usize {
        self.segments()
            .filter(|s| s.start_frame() <= frame && frame < s.end_frame())
            .count()
    }
}

pub(crate) struct MixBus {
    lanes: HashMap<TrackId, Lane>,
    master: f32,
    frames: Arc<AtomicU64>,
    sample_rate: u32,
    channels: u16,
}

impl MixBus {
    pub(crate) fn new(sample_rate: u32, channels: u16, master: f32) -> Self {
        Self {
            lanes: HashMap::new(),
            master,
            frames: Arc::new(AtomicU64::new(0)),
            sample_rate,
            channels,
        }
    }

    pub(crate) fn clock(&self) -> EngineClock {
        EngineClock {
            frames: self.frames.clone(),
            sample_rate: self.sample_rate,
        }
    }

    /// Master volume is applied with no ramp, per the bus contract.
    pub(crate) fn set_master(&mut self, v: f32) {
        self.master = v.clamp(0.0, 1.0);
    }

    pub(crate) fn master(&self) -> f32 {
        self.master
    }

    pub(crate) fn insert_lane(&mut self, id: TrackId, lane: Lane) {
        self.lanes.insert(id, lane);
    }

    /// Idempotent: removing an absent lane is a no-op.
    pub(crate) fn remove_lane(&mut self, id: TrackId) {
        self.lanes.remove(&id);
    }

    pub(crate) fn lane_mut(&mut self, id: TrackId) -> Option<&mut Lane> {
        self.lanes.get_mut(&id)
    }

    #[cfg(test)]
    pub(crate) fn lane(&self, id: TrackId) -> Option<&Lane> {
        self.lanes.get(&id)
    }

    #[cfg(test)]
    pub(crate) fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Mix every lane into `out` (interleaved at the bus channel count) and
    /// advance the engine clock by the rendered frame count.
    ///
    /// A segment contributes from exactly its start frame onward, so a
    /// pre-armed segment beginning mid-chunk splices in sample-accurately.
    pub(crate) fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let ch = self.channels as usize;
        let frame_count = (out.len() / ch) as u64;
        let base = self.frames.load(Ordering::Acquire);

        for lane in self.lanes.values() {
            for n in 0..frame_count {
                let t = base + n;
                let gain = lane.gain.value_at(t) * self.master;
                if gain == 0.0 {
                    continue;
                }
                let mut left = 0.0f32;
                let mut right = 0.0f32;
                let mut audible = false;
                for seg in lane.segments() {
                    if t < seg.start_frame() || t >= seg.end_frame() {
                        continue;
                    }
                    let (l, r) = seg.buffer.frame(t - seg.start_frame());
                    left += l;
                    right += r;
                    audible = true;
                }
                if !audible {
                    continue;
                }
                let i = n as usize * ch;
                if ch == 1 {
                    out[i] += 0.5 * (left + right) * gain;
                } else {
                    out[i] += left * gain;
                    out[i + 1] += right * gain;
                }
            }
        }

        self.frames.store(base + frame_count, Ordering::Release);
    }
}
