//! The shared mix bus: per-track lanes, scheduled segments and the master
//! gain stage, plus the engine clock the scheduler reads.
//!
//! The scheduler mutates the bus under its mutex; the output side renders
//! from it in chunks and advances the clock as frames leave the engine.

mod mix;
mod source;

pub(crate) use mix::{BusHandle, EngineClock, Lane, MixBus, Segment, SlotBusy};
pub(crate) use source::connect_output;
