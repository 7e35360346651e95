//! Linear gain ramps for a track's gain stage.
//!
//! A [`GainStage`] holds the gain applied to one track's segments on the mix
//! bus. Ramps are expressed against the engine clock (frame numbers) and
//! evaluated at render time, so fades are sample-accurate no matter how the
//! scheduling thread is timed. Starting a new ramp always replaces any
//! pending one, which keeps rapid stop/start/stop sequences well-defined.

#[derive(Debug, Clone, Copy)]
struct Ramp {
    start_frame: u64,
    start_gain: f32,
    end_frame: u64,
    target: f32,
}

#[derive(Debug, Clone)]
pub(crate) struct GainStage {
    /// Gain when no ramp is active (and the value a finished ramp lands on).
    value: f32,
    ramp: Option<Ramp>,
}

impl GainStage {
    pub(crate) fn new(value: f32) -> Self {
        Self { value, ramp: None }
    }

    /// Set the gain immediately, cancelling any pending ramp.
    pub(crate) fn set(&mut self, v: f32) {
        self.value = v;
        self.ramp = None;
    }

    /// Ramp from silence to `target` over `duration` frames, starting at
    /// `now`. A zero duration sets the gain immediately (fade disabled).
    pub(crate) fn fade_in(&mut self, now: u64, target: f32, duration: u64) {
        if duration == 0 {
            self.set(target);
            return;
        }
        self.value = target;
        self.ramp = Some(Ramp {
            start_frame: now,
            start_gain: 0.0,
            end_frame: now + duration,
            target,
        });
    }

    /// Ramp from the *instantaneous* gain at `now` down to silence over
    /// `duration` frames, replacing any ramp in flight. Reading the live
    /// value first is what makes an interrupted fade-in behave: a stop one
    /// second into a two-second fade ramps down from roughly half volume,
    /// not from the nominal target. Returns the frame the ramp completes.
    pub(crate) fn fade_out(&mut self, now: u64, duration: u64) -> u64 {
        let current = self.value_at(now);
        if duration == 0 {
            self.set(0.0);
            return now;
        }
        self.value = 0.0;
        self.ramp = Some(Ramp {
            start_frame: now,
            start_gain: current,
            end_frame: now + duration,
            target: 0.0,
        });
        now + duration
    }

    /// Move only the endpoint of an in-flight ramp to `v`; the start time
    /// and elapsed progress are untouched. With no ramp running this is an
    /// instantaneous set.
    pub(crate) fn retarget(&mut self, now: u64, v: f32) {
        match &mut self.ramp {
            Some(r) if now < r.end_frame => {
                r.target = v;
                self.value = v;
            }
            _ => self.set(v),
        }
    }

    /// Instantaneous gain at `frame`.
    pub(crate) fn value_at(&self, frame: u64) -> f32 {
        match self.ramp {
            None => self.value,
            Some(r) => {
                if frame <= r.start_frame {
                    r.start_gain
                } else if frame >= r.end_frame {
                    r.target
                } else {
                    let span = (r.end_frame - r.start_frame) as f32;
                    let t = (frame - r.start_frame) as f32 / span;
                    r.start_gain + (r.target - r.start_gain) * t
                }
            }
        }
    }
}
