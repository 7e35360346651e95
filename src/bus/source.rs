use std::time::Duration;

use rodio::{OutputStream, OutputStreamBuilder, Sink, Source};

use crate::error::EngineError;

use super::mix::BusHandle;

/// Frames rendered per bus lock. Small enough that scheduler mutations show
/// up within a few milliseconds, large enough to keep lock traffic low.
const CHUNK_FRAMES: usize = 512;

/// Adapter that feeds the mix bus into rodio.
///
/// Each refill takes the bus lock once, renders a chunk and releases it, so
/// the output callback and the scheduler never contend for long.
struct BusSource {
    bus: BusHandle,
    sample_rate: u32,
    channels: u16,
    chunk: Vec<f32>,
    pos: usize,
}

impl BusSource {
    fn new(bus: BusHandle, sample_rate: u32, channels: u16) -> Self {
        let chunk = vec![0.0; CHUNK_FRAMES * channels as usize];
        Self {
            bus,
            sample_rate,
            channels,
            chunk,
            pos: 0,
        }
    }

    fn refill(&mut self) {
        match self.bus.lock() {
            Ok(mut bus) => bus.render(&mut self.chunk),
            Err(poisoned) => poisoned.into_inner().render(&mut self.chunk),
        }
        self.pos = 0;
    }
}

impl Iterator for BusSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.pos >= self.chunk.len() {
            self.refill();
        }
        let s = self.chunk[self.pos];
        self.pos += 1;
        Some(s)
    }
}

impl Source for BusSource {
    fn current_span_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> rodio::ChannelCount {
        self.channels
    }

    fn sample_rate(&self) -> rodio::SampleRate {
        self.sample_rate
    }

    // The bus never ends; tracks come and go inside it.
    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// Open the default output device and start draining the bus through it.
///
/// The returned stream and sink must stay alive for as long as playback
/// should continue; the engine thread owns both.
pub(crate) fn connect_output(
    bus: BusHandle,
    sample_rate: u32,
    channels: u16,
) -> Result<(OutputStream, Sink), EngineError> {
    let mut stream = OutputStreamBuilder::open_default_stream()
        .map_err(|e| EngineError::Output(e.to_string()))?;
    // rodio logs to stderr when OutputStream is dropped. That's useful in
    // debugging, but noisy for a host application.
    stream.log_on_drop(false);

    let sink = Sink::connect_new(stream.mixer());
    sink.append(BusSource::new(bus, sample_rate, channels));
    sink.play();
    Ok((stream, sink))
}
