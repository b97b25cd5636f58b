//! Offline rendering
//!
//! Runs the engine faster than real time with a scripted note and an
//! optional fixed host tempo, collecting every outbound message with its
//! time in milliseconds.

use std::sync::Arc;

use anyhow::{bail, Result};

use super::{
    ControlSurface, Engine, EngineSettings, FixedTransport, MidiBuffer, MidiEvent, MidiMessage,
    OUTPUT_CAPACITY,
};
use crate::tempo::{is_usable_bpm, MAX_BPM, MIN_BPM};

/// Note number used for scripted notes
const RENDER_NOTE: u8 = 60;
const RENDER_SEED: u64 = 1;

/// What to render
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub seconds: f64,
    pub block_size: usize,
    /// Note-on time in seconds
    pub note_on: Option<f64>,
    /// Note-off time in seconds
    pub note_off: Option<f64>,
    pub velocity: u8,
    /// Channel 1-16 for the scripted note
    pub channel: u8,
    /// Fixed host tempo, reported as playing
    pub bpm: Option<f64>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            seconds: 1.0,
            block_size: 256,
            note_on: None,
            note_off: None,
            velocity: 100,
            channel: 1,
            bpm: None,
        }
    }
}

/// A rendered message
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderedEvent {
    pub time_ms: f64,
    pub message: MidiMessage,
}

/// Block-by-block offline driver
pub struct Renderer {
    engine: Engine,
    block_size: usize,
    out: MidiBuffer,
    events: Vec<RenderedEvent>,
    samples_rendered: u64,
}

impl Renderer {
    pub fn new(engine: Engine, block_size: usize) -> Self {
        Self {
            engine,
            block_size: block_size.max(1),
            out: MidiBuffer::with_capacity(OUTPUT_CAPACITY),
            events: Vec::new(),
            samples_rendered: 0,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn samples_rendered(&self) -> u64 {
        self.samples_rendered
    }

    /// Duration rendered so far in seconds
    pub fn duration_secs(&self) -> f64 {
        self.samples_rendered as f64 / self.engine.settings().sample_rate
    }

    /// Render one block of `num_samples` with the given inbound events
    pub fn render_block(&mut self, num_samples: usize, input: &[MidiEvent]) {
        let sample_rate = self.engine.settings().sample_rate;
        self.engine.process_block(num_samples, input, &mut self.out);

        for event in self.out.events() {
            let sample = self.samples_rendered + event.offset as u64;
            self.events.push(RenderedEvent {
                time_ms: sample as f64 * 1000.0 / sample_rate,
                message: event.message,
            });
        }
        self.samples_rendered += num_samples as u64;

        let control = self.engine.control();
        if control.take_disable_request() {
            control.set_enabled(false);
        }
    }

    pub fn events(&self) -> &[RenderedEvent] {
        &self.events
    }

    /// Finish and return everything rendered
    pub fn finish(self) -> Vec<RenderedEvent> {
        self.events
    }
}

fn sample_at(seconds: f64, sample_rate: f64) -> u64 {
    (seconds * sample_rate).round().max(0.0) as u64
}

/// Render `options.seconds` of output for `settings`
pub fn render(
    settings: EngineSettings,
    control: Arc<ControlSurface>,
    options: &RenderOptions,
) -> Result<Vec<RenderedEvent>> {
    if !(options.seconds > 0.0) {
        bail!("Render length must be positive, got {}", options.seconds);
    }
    if options.velocity == 0 || options.velocity > 127 {
        bail!("Velocity must be 1-127, got {}", options.velocity);
    }
    if options.channel == 0 || options.channel > 16 {
        bail!("Note channel must be 1-16, got {}", options.channel);
    }
    if let (Some(on), Some(off)) = (options.note_on, options.note_off) {
        if off < on {
            bail!("Note-off ({}s) comes before note-on ({}s)", off, on);
        }
    }

    let sample_rate = settings.sample_rate;
    let mut engine = Engine::seeded(settings, control, RENDER_SEED);
    if let Some(bpm) = options.bpm {
        if !is_usable_bpm(bpm) {
            bail!("BPM must be between {} and {}, got {}", MIN_BPM, MAX_BPM, bpm);
        }
        engine.set_host_transport(Box::new(FixedTransport::new(bpm, true)));
    }

    let channel = options.channel - 1;
    let mut script = Vec::new();
    if let Some(on) = options.note_on {
        let message = MidiMessage::NoteOn(channel, RENDER_NOTE, options.velocity);
        script.push((sample_at(on, sample_rate), message));
    }
    if let Some(off) = options.note_off {
        let message = MidiMessage::NoteOff(channel, RENDER_NOTE, 0);
        script.push((sample_at(off, sample_rate), message));
    }

    let total = sample_at(options.seconds, sample_rate);
    let mut renderer = Renderer::new(engine, options.block_size);
    let mut input = Vec::with_capacity(script.len());

    while renderer.samples_rendered() < total {
        let start = renderer.samples_rendered();
        let n = (total - start).min(renderer.block_size() as u64) as usize;
        let end = start + n as u64;

        input.clear();
        for &(at, message) in &script {
            if at >= start && at < end {
                input.push(MidiEvent::new((at - start) as usize, message));
            }
        }

        renderer.render_block(n, &input);
    }

    log::debug!(
        "Rendered {:.2}s, {} events",
        renderer.duration_secs(),
        renderer.events().len()
    );
    Ok(renderer.finish())
}
