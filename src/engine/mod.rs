//! Modulation engine for modgen
//!
//! [`Engine::process_block`] is the whole real-time path: it reads the
//! control surface, consumes inbound MIDI, resolves the run state, advances
//! the envelope and the LFO routes in sub-steps, and writes throttled
//! parameter messages at sample offsets into a pre-allocated buffer.

mod control;
mod coordinator;
mod midi;
mod player;
mod render;
mod throttle;
mod transport;

pub use control::ControlSurface;
pub use coordinator::{
    neutral_value, Coordinator, Gate, RunDecision, RunReason, RunReasons, GATE_RAMP_STEPS,
};
pub use midi::{
    list_input_ports, list_output_ports, DecodeError, MidiBuffer, MidiEvent, MidiMessage,
};
pub use player::{Player, PlayerConfig};
pub use render::{render, RenderOptions, RenderedEvent, Renderer};
pub use throttle::{encode_parameter, Throttle, ThrottleKey, ThrottleSettings, ThrottleSource};
pub use transport::{FixedTransport, HostTransport, TransportInfo};

use std::sync::Arc;

use crate::mapping::{parameter, ParamId};
use crate::modulation::{
    step_samples, EnvelopeGenerator, EnvelopeSettings, LfoEngine, LfoShape, RouteSettings,
    MAX_ROUTES,
};
use crate::tempo::{effective_rate, ClockEstimator, SyncDivision, SyncMode};

/// Free-running rate bounds in Hz
pub const MIN_RATE_HZ: f64 = 0.01;
pub const MAX_RATE_HZ: f64 = 40.0;

/// Output events reserved per block
pub const OUTPUT_CAPACITY: usize = 4096;

/// Note and transport trigger options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerSettings {
    /// Note-on restarts and runs the LFO
    pub note_restart: bool,
    /// 1-16, 0 = any channel
    pub note_source_channel: u8,
    /// Note-off stops the LFO (requires `note_restart`)
    pub note_off_stop: bool,
    /// Transport start runs the LFO
    pub transport_auto_start: bool,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            note_restart: false,
            note_source_channel: 0,
            note_off_stop: false,
            transport_auto_start: true,
        }
    }
}

/// Where the envelope output goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvelopeDestination {
    #[default]
    None,
    /// Directly to a parameter on a channel (1-16)
    Parameter { channel: u8, parameter: ParamId },
    /// Gate an LFO route
    Route(usize),
}

/// Everything the engine reads besides the control surface
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    pub sample_rate: f64,
    pub shape: LfoShape,
    pub sync: SyncMode,
    pub division: SyncDivision,
    pub routes: [RouteSettings; MAX_ROUTES],
    pub trigger: TriggerSettings,
    pub envelope: EnvelopeSettings,
    /// 1-16, 0 = any channel
    pub envelope_source_channel: u8,
    pub envelope_destination: EnvelopeDestination,
    pub throttle: ThrottleSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            shape: LfoShape::default(),
            sync: SyncMode::default(),
            division: SyncDivision::default(),
            routes: [RouteSettings::default(); MAX_ROUTES],
            trigger: TriggerSettings::default(),
            envelope: EnvelopeSettings::default(),
            envelope_source_channel: 0,
            envelope_destination: EnvelopeDestination::default(),
            throttle: ThrottleSettings::default(),
        }
    }
}

fn channel_matches(filter: u8, channel: u8) -> bool {
    filter == 0 || filter == channel
}

/// Routes that may emit: enabled, resolvable, and not claiming a
/// (channel, parameter) pair already used by an earlier route
fn live_routes(routes: &[RouteSettings; MAX_ROUTES]) -> [bool; MAX_ROUTES] {
    let mut live = [false; MAX_ROUTES];
    for i in 0..MAX_ROUTES {
        let route = &routes[i];
        let resolvable = route.parameter.and_then(parameter).is_some();
        if !route.is_enabled() || !resolvable {
            continue;
        }
        let duplicate = routes[..i]
            .iter()
            .zip(&live)
            .any(|(prev, &ok)| {
                ok && prev.channel == route.channel && prev.parameter == route.parameter
            });
        live[i] = !duplicate;
    }
    live
}

/// The modulation engine
pub struct Engine {
    settings: EngineSettings,
    control: Arc<ControlSurface>,
    lfo: LfoEngine,
    envelope: EnvelopeGenerator,
    coordinator: Coordinator,
    throttle: Throttle,
    clock: ClockEstimator,
    transport: Option<Box<dyn HostTransport>>,
    live: [bool; MAX_ROUTES],
    was_enabled: bool,
    host_playing: bool,
    time_ms: f64,
    ms_per_sample: f64,
}

impl Engine {
    /// Create an engine; the Random shape is seeded from OS entropy
    pub fn new(settings: EngineSettings, control: Arc<ControlSurface>) -> Self {
        Self::with_lfo(settings, control, LfoEngine::new())
    }

    /// Create an engine with reproducible Random output
    pub fn seeded(settings: EngineSettings, control: Arc<ControlSurface>, seed: u64) -> Self {
        Self::with_lfo(settings, control, LfoEngine::seeded(seed))
    }

    fn with_lfo(settings: EngineSettings, control: Arc<ControlSurface>, lfo: LfoEngine) -> Self {
        let mut engine = Self {
            settings,
            control,
            lfo,
            envelope: EnvelopeGenerator::new(settings.sample_rate),
            coordinator: Coordinator::new(),
            throttle: Throttle::new(settings.throttle),
            clock: ClockEstimator::new(),
            transport: None,
            live: [false; MAX_ROUTES],
            was_enabled: false,
            host_playing: false,
            time_ms: 0.0,
            ms_per_sample: 0.0,
        };
        engine.apply_settings(settings);
        engine
    }

    /// Install a host transport, taking precedence over MIDI clock
    pub fn set_host_transport(&mut self, transport: Box<dyn HostTransport>) {
        self.transport = Some(transport);
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn control(&self) -> &Arc<ControlSurface> {
        &self.control
    }

    pub fn lfo(&self) -> &LfoEngine {
        &self.lfo
    }

    pub fn envelope(&self) -> &EnvelopeGenerator {
        &self.envelope
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Deterministic clock in milliseconds since creation
    pub fn time_ms(&self) -> f64 {
        self.time_ms
    }

    /// Replace the settings
    ///
    /// Route changes go through the LFO's snapshot diff so phases are only
    /// disturbed where a route actually changed.
    pub fn apply_settings(&mut self, settings: EngineSettings) {
        let old_gate = self.gated_route();

        let sample_rate = settings.sample_rate.max(1.0);
        self.ms_per_sample = 1000.0 / sample_rate;

        self.lfo.apply_settings(settings.shape, &settings.routes);
        self.live = live_routes(&settings.routes);

        self.envelope.set_sample_rate(sample_rate);
        self.envelope.set_settings(settings.envelope);
        self.throttle.set_settings(settings.throttle);

        if !settings.trigger.note_restart {
            self.coordinator.remove(RunReason::Note);
        }

        self.settings = settings;
        if old_gate != self.gated_route() {
            self.coordinator.close_gate();
        }
    }

    /// Route gated by the envelope, if that routing is usable
    fn gated_route(&self) -> Option<usize> {
        match self.settings.envelope_destination {
            EnvelopeDestination::Route(r)
                if r < MAX_ROUTES && self.live[r] && self.settings.envelope.enabled =>
            {
                Some(r)
            }
            _ => None,
        }
    }

    fn route_neutral(&self, index: usize) -> f64 {
        self.lfo
            .route(index)
            .map(|r| neutral_value(r.settings().bipolar, r.settings().invert))
            .unwrap_or(0.0)
    }

    fn restart(&mut self) {
        self.coordinator.unmute();
        self.lfo.restart();
    }

    fn stop(&mut self) {
        self.coordinator.mute();
        self.coordinator.remove(RunReason::Note);
        self.coordinator.remove(RunReason::Transport);
    }

    fn transport_start(&mut self) {
        self.restart();
        if self.settings.trigger.transport_auto_start {
            self.coordinator.add(RunReason::Transport);
        }
    }

    fn transport_stop(&mut self) {
        self.coordinator.mute();
        self.coordinator.remove(RunReason::Transport);
    }

    fn note_on(&mut self, channel: u8, velocity: u8) {
        let trigger = self.settings.trigger;
        if trigger.note_restart && channel_matches(trigger.note_source_channel, channel) {
            self.coordinator.add(RunReason::Note);
            self.restart();
        }

        let envelope_source = self.settings.envelope_source_channel;
        if self.settings.envelope.enabled && channel_matches(envelope_source, channel) {
            self.envelope.note_on(velocity as f64 / 127.0);
            if let Some(r) = self.gated_route() {
                let neutral = self.route_neutral(r);
                self.coordinator.open_gate(neutral);
                self.lfo.restart_route(r);
            }
        }
    }

    fn note_off(&mut self, channel: u8) {
        let trigger = self.settings.trigger;
        if trigger.note_restart
            && trigger.note_off_stop
            && channel_matches(trigger.note_source_channel, channel)
        {
            self.coordinator.mute();
            self.coordinator.remove(RunReason::Note);
            self.lfo.halt();
        }

        let envelope_source = self.settings.envelope_source_channel;
        if self.settings.envelope.enabled && channel_matches(envelope_source, channel) {
            self.envelope.note_off();
        }
    }

    /// Map, throttle and encode one route sample
    #[allow(clippy::too_many_arguments)]
    fn emit_route(
        &mut self,
        index: usize,
        sample: f64,
        depth: f64,
        offset: usize,
        now_ms: f64,
        last: bool,
        output: &mut MidiBuffer,
    ) {
        let Some(route) = self.lfo.route(index) else {
            return;
        };
        let settings = *route.settings();
        let Some(id) = settings.parameter else {
            return;
        };
        let Some(descriptor) = parameter(id) else {
            return;
        };

        let value = descriptor.map_sample(sample, depth, settings.bipolar);
        self.control.publish_route_value(index, value);

        let key = ThrottleKey::route(index, id);
        let allowed = if last {
            self.throttle.allows_final(key, value, now_ms)
        } else {
            self.throttle.allows(key, value, now_ms)
        };
        if allowed && encode_parameter(descriptor, settings.channel, value, offset, output) {
            self.throttle.record(key, value, now_ms);
        }
    }

    /// Process one block of `num_samples`
    ///
    /// `input` holds inbound events with offsets inside the block. `output`
    /// is cleared and refilled with pass-through and generated events,
    /// ordered by offset. Never blocks and never allocates.
    pub fn process_block(
        &mut self,
        num_samples: usize,
        input: &[MidiEvent],
        output: &mut MidiBuffer,
    ) {
        output.clear();
        if num_samples == 0 {
            return;
        }
        let block_start = self.time_ms;
        let synced = self.settings.sync == SyncMode::Synced;

        // Control requests
        let enabled = self.control.is_enabled();
        if enabled && !self.was_enabled {
            self.coordinator.unmute();
        }
        if !enabled && self.was_enabled {
            self.coordinator.kill();
        }
        if enabled {
            self.coordinator.add(RunReason::User);
        }
        self.was_enabled = enabled;

        if self.control.take_restart() {
            self.restart();
        }
        if self.control.take_stop() {
            self.stop();
        }

        let requested_rate = self.control.rate_hz();
        let free_rate = if requested_rate.is_finite() {
            requested_rate.clamp(MIN_RATE_HZ, MAX_RATE_HZ)
        } else {
            MIN_RATE_HZ
        };
        let depth = self.control.depth();
        let depth = if depth.is_finite() { depth.clamp(0.0, 1.0) } else { 0.0 };

        // Inbound MIDI, in order
        for event in input {
            let offset = event.offset.min(num_samples - 1);
            match event.message {
                MidiMessage::NoteOn(ch, _, velocity) => self.note_on(ch + 1, velocity),
                MidiMessage::NoteOff(ch, _, _) => self.note_off(ch + 1),
                message => {
                    if synced {
                        match message {
                            MidiMessage::Clock => {
                                let at_ms = block_start + offset as f64 * self.ms_per_sample;
                                self.clock.pulse(at_ms);
                            }
                            MidiMessage::Start => {
                                self.clock.reset();
                                self.transport_start();
                            }
                            MidiMessage::Stop => self.transport_stop(),
                            _ => {}
                        }
                    }
                    output.push(MidiEvent::new(offset, message));
                }
            }
        }

        // Host transport
        let info = self.transport.as_ref().and_then(|t| t.query());
        let mut host_bpm = None;
        if let Some(info) = info {
            host_bpm = info.valid_bpm();
            if synced {
                if info.playing && !self.host_playing {
                    self.transport_start();
                } else if !info.playing && self.host_playing {
                    self.transport_stop();
                }
            }
            self.host_playing = info.playing;
        }
        let bpm = host_bpm.or_else(|| self.clock.bpm());
        self.control.publish_bpm(bpm);
        let rate = effective_rate(free_rate, self.settings.sync, self.settings.division, bpm);

        // Envelope
        let level = self.envelope.process_block(num_samples);
        self.control.publish_envelope_level(level.unwrap_or(0.0));
        match self.settings.envelope_destination {
            EnvelopeDestination::Parameter { channel, parameter: id } => {
                if let (Some(level), Some(descriptor)) = (level, parameter(id)) {
                    if (1..=16).contains(&channel) {
                        let value = descriptor.map_level(level);
                        let key = ThrottleKey::envelope(id);
                        if self.throttle.allows(key, value, block_start)
                            && encode_parameter(descriptor, channel, value, 0, output)
                        {
                            self.throttle.record(key, value, block_start);
                        }
                    }
                }
            }
            EnvelopeDestination::Route(_) => {
                if level.is_none() {
                    self.coordinator.begin_ramp();
                }
            }
            EnvelopeDestination::None => {}
        }

        // Run state
        let decision = self.coordinator.resolve();
        if decision.restart {
            self.lfo.restart();
        }

        // LFO sub-steps
        let sample_rate = self.settings.sample_rate.max(1.0);
        let inc_per_sample = rate / sample_rate;
        let step = step_samples(sample_rate, rate, num_samples);
        let gated = self.gated_route();

        let mut offset = 0;
        while offset < num_samples {
            let len = step.min(num_samples - offset);
            let inc = inc_per_sample * len as f64;
            let now_ms = block_start + offset as f64 * self.ms_per_sample;

            for r in 0..MAX_ROUTES {
                if !self.live[r] {
                    continue;
                }

                if gated == Some(r) {
                    if !decision.gate_running {
                        continue;
                    }
                    let neutral = self.route_neutral(r);
                    match self.coordinator.gate() {
                        Gate::Open { .. } => {
                            if let (Some(level), Some(full)) = (level, self.lfo.advance(r, inc)) {
                                let sample = self.coordinator.gated_sample(full, neutral, level);
                                self.emit_route(r, sample, depth, offset, now_ms, false, output);
                            }
                        }
                        Gate::Ramping { .. } => {
                            if let Some(sample) = self.coordinator.ramp_step(neutral) {
                                let last = self.coordinator.gate() == Gate::Closed;
                                self.emit_route(r, sample, depth, offset, now_ms, last, output);
                            }
                        }
                        Gate::Closed => {}
                    }
                } else if decision.lfo_running {
                    if let Some(sample) = self.lfo.advance(r, inc) {
                        self.emit_route(r, sample, depth, offset, now_ms, false, output);
                    }
                }
            }

            offset += len;
        }

        // Auto-stop once every enabled route is a finished one-shot
        if decision.lfo_running && self.lfo.all_one_shots_finished() {
            self.coordinator.mute();
            self.coordinator.remove(RunReason::Note);
            self.control.request_disable();
        }
        self.control
            .publish_running(decision.lfo_running && !self.coordinator.is_muted());

        output.sort_by_offset();
        self.time_ms = block_start + num_samples as f64 * self.ms_per_sample;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::find_parameter;
    use crate::mapping::CurveShape;

    const BLOCK: usize = 256;

    fn knob_a() -> ParamId {
        find_parameter("Knob A").unwrap()
    }

    fn one_route(route: RouteSettings) -> EngineSettings {
        let mut settings = EngineSettings::default();
        settings.routes[0] = route;
        settings
    }

    fn engine(settings: EngineSettings, enabled: bool, rate_hz: f64) -> Engine {
        let control = Arc::new(ControlSurface::new(enabled, rate_hz, 1.0));
        Engine::seeded(settings, control, 5)
    }

    fn unthrottled() -> ThrottleSettings {
        ThrottleSettings {
            change_threshold: 0,
            min_interval_ms: 0.0,
        }
    }

    /// (offset, channel, controller, value) of every CC in the buffer
    fn ccs(buf: &MidiBuffer) -> Vec<(usize, u8, u8, u8)> {
        buf.events()
            .iter()
            .filter_map(|e| match e.message {
                MidiMessage::ControlChange(ch, cc, v) => Some((e.offset, ch, cc, v)),
                _ => None,
            })
            .collect()
    }

    fn run(engine: &mut Engine, blocks: usize) -> Vec<(usize, u8, u8, u8)> {
        let mut out = MidiBuffer::with_capacity(OUTPUT_CAPACITY);
        let mut all = Vec::new();
        for _ in 0..blocks {
            engine.process_block(BLOCK, &[], &mut out);
            all.extend(ccs(&out));
        }
        all
    }

    #[test]
    fn test_engine_creation() {
        let e = engine(EngineSettings::default(), false, 1.0);
        assert_eq!(e.time_ms(), 0.0);
        assert!(!e.control().is_running());
    }

    #[test]
    fn test_disabled_engine_is_silent() {
        let mut e = engine(one_route(RouteSettings::new(1, knob_a())), false, 1.0);
        assert!(run(&mut e, 10).is_empty());
    }

    #[test]
    fn test_enabled_route_emits_cc() {
        let mut e = engine(one_route(RouteSettings::new(1, knob_a())), true, 1.0);
        let out = run(&mut e, 1);
        assert!(!out.is_empty());
        // Unipolar sine starts at its minimum
        assert_eq!(out[0], (0, 0, 17, 0));
        assert!(e.control().is_running());
        assert_eq!(e.control().route_value(0), Some(0));
    }

    #[test]
    fn test_events_at_step_offsets() {
        let mut settings = one_route(RouteSettings::new(1, knob_a()));
        settings.throttle = unthrottled();
        let mut e = engine(settings, true, 10.0);

        let step = step_samples(48000.0, 10.0, BLOCK);
        let out = run(&mut e, 1);
        let offsets: Vec<usize> = out.iter().map(|c| c.0).collect();
        let expected: Vec<usize> = (0..BLOCK).step_by(step).collect();
        assert_eq!(offsets, expected);
    }

    #[test]
    fn test_deterministic_time() {
        let mut e = engine(EngineSettings::default(), false, 1.0);
        let mut out = MidiBuffer::with_capacity(16);
        for _ in 0..10 {
            e.process_block(480, &[], &mut out);
        }
        assert!((e.time_ms() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_pass_through_and_note_consumption() {
        let mut e = engine(EngineSettings::default(), false, 1.0);
        let mut out = MidiBuffer::with_capacity(16);
        let input = [
            MidiEvent::new(3, MidiMessage::NoteOn(0, 60, 100)),
            MidiEvent::new(5, MidiMessage::ControlChange(2, 7, 99)),
            MidiEvent::new(9, MidiMessage::Clock),
            MidiEvent::new(12, MidiMessage::NoteOff(0, 60, 0)),
        ];
        e.process_block(BLOCK, &input, &mut out);
        assert_eq!(
            out.events(),
            &[
                MidiEvent::new(5, MidiMessage::ControlChange(2, 7, 99)),
                MidiEvent::new(9, MidiMessage::Clock),
            ]
        );
    }

    #[test]
    fn test_note_restart_runs_lfo() {
        let mut settings = one_route(RouteSettings::new(1, knob_a()));
        settings.trigger.note_restart = true;
        settings.trigger.note_off_stop = true;
        let mut e = engine(settings, false, 1.0);
        let mut out = MidiBuffer::with_capacity(OUTPUT_CAPACITY);

        e.process_block(BLOCK, &[MidiEvent::new(0, MidiMessage::NoteOn(4, 60, 100))], &mut out);
        assert!(!ccs(&out).is_empty());
        assert!(e.coordinator().contains(RunReason::Note));
        assert!(e.control().is_running());

        e.process_block(BLOCK, &[MidiEvent::new(0, MidiMessage::NoteOff(4, 60, 0))], &mut out);
        assert!(ccs(&out).is_empty());
        assert!(!e.control().is_running());
        assert!(run(&mut e, 4).is_empty());
    }

    #[test]
    fn test_note_source_channel_filter() {
        let mut settings = one_route(RouteSettings::new(1, knob_a()));
        settings.trigger.note_restart = true;
        settings.trigger.note_source_channel = 10;
        let mut e = engine(settings, false, 1.0);
        let mut out = MidiBuffer::with_capacity(OUTPUT_CAPACITY);

        e.process_block(BLOCK, &[MidiEvent::new(0, MidiMessage::NoteOn(0, 60, 100))], &mut out);
        assert!(ccs(&out).is_empty());

        // Channel 10 is 9 on the wire
        e.process_block(BLOCK, &[MidiEvent::new(0, MidiMessage::NoteOn(9, 60, 100))], &mut out);
        assert!(!ccs(&out).is_empty());
    }

    #[test]
    fn test_user_disable_is_master_kill() {
        let mut settings = one_route(RouteSettings::new(1, knob_a()));
        settings.trigger.note_restart = true;
        let mut e = engine(settings, true, 1.0);
        let mut out = MidiBuffer::with_capacity(OUTPUT_CAPACITY);
        e.process_block(BLOCK, &[MidiEvent::new(0, MidiMessage::NoteOn(0, 60, 100))], &mut out);
        assert!(e.coordinator().contains(RunReason::Note));

        e.control().set_enabled(false);
        assert!(run(&mut e, 3).is_empty());
        assert!(e.coordinator().reasons().is_empty());
        assert!(!e.control().is_running());
    }

    #[test]
    fn test_restart_request_realigns() {
        let mut e = engine(one_route(RouteSettings::new(1, knob_a())), true, 5.0);
        run(&mut e, 7);
        e.control().request_restart();
        let mut out = MidiBuffer::with_capacity(OUTPUT_CAPACITY);
        e.process_block(BLOCK, &[], &mut out);
        // Back near the unipolar minimum
        assert!(e.control().route_value(0).unwrap() < 40);
    }

    #[test]
    fn test_stop_request_mutes() {
        let mut e = engine(one_route(RouteSettings::new(1, knob_a())), true, 1.0);
        run(&mut e, 1);
        e.control().request_stop();
        assert!(run(&mut e, 3).is_empty());
        assert!(e.coordinator().is_muted());
    }

    #[test]
    fn test_one_shot_auto_stop() {
        let route = RouteSettings::new(1, knob_a()).with_bipolar(true).with_one_shot(true);
        let mut e = engine(one_route(route), true, 40.0);

        // One 40 Hz cycle is 1200 samples
        assert!(!run(&mut e, 10).is_empty());
        assert!(e.control().take_disable_request());
        assert!(!e.control().is_running());
        assert!(run(&mut e, 3).is_empty());

        // Control side honours the request, then re-enables
        e.control().set_enabled(false);
        run(&mut e, 1);
        e.control().set_enabled(true);
        assert!(!run(&mut e, 1).is_empty());
    }

    #[test]
    fn test_unipolar_linear_one_shots_auto_stop() {
        for shape in [LfoShape::Triangle, LfoShape::Saw] {
            let mut settings = one_route(RouteSettings::new(1, knob_a()).with_one_shot(true));
            settings.shape = shape;
            let mut e = engine(settings, true, 1.0);

            // 1 Hz is 187.5 blocks of 256 samples
            let out = run(&mut e, 200);
            assert!(!out.is_empty());
            assert!(out.iter().any(|c| c.3 >= 126), "{:?} never peaked", shape);
            assert!(e.lfo().route(0).unwrap().is_finished(), "{:?} kept cycling", shape);
            assert!(e.control().take_disable_request());
            assert!(run(&mut e, 10).is_empty());
        }
    }

    #[test]
    fn test_duplicate_route_skipped() {
        let mut settings = EngineSettings::default();
        settings.routes[0] = RouteSettings::new(1, knob_a());
        settings.routes[1] = RouteSettings::new(1, knob_a()).with_bipolar(true);
        settings.routes[2] = RouteSettings::new(2, knob_a());
        settings.throttle = unthrottled();
        let mut e = engine(settings, true, 1.0);

        let out = run(&mut e, 1);
        assert!(out.iter().all(|c| c.1 == 0 || c.1 == 1));
        let ch0 = out.iter().filter(|c| c.1 == 0).count();
        let ch1 = out.iter().filter(|c| c.1 == 1).count();
        assert_eq!(ch0, ch1);
        assert_eq!(e.control().route_value(1), None);
    }

    #[test]
    fn test_midi_clock_sets_bpm() {
        let mut settings = one_route(RouteSettings::new(1, knob_a()));
        settings.sync = SyncMode::Synced;
        let mut e = engine(settings, true, 1.0);
        let mut out = MidiBuffer::with_capacity(OUTPUT_CAPACITY);

        // 120 BPM = 24 pulses per 500 ms = one pulse every 1000 samples
        let mut next_pulse = 0usize;
        for block in 0..200 {
            let start = block * BLOCK;
            let mut input = Vec::new();
            while next_pulse < start + BLOCK {
                input.push(MidiEvent::new(next_pulse - start, MidiMessage::Clock));
                next_pulse += 1000;
            }
            e.process_block(BLOCK, &input, &mut out);
        }
        let bpm = e.control().bpm().unwrap();
        assert!((bpm - 120.0).abs() < 0.5, "bpm {}", bpm);
    }

    #[test]
    fn test_clock_ignored_when_free() {
        let mut e = engine(one_route(RouteSettings::new(1, knob_a())), true, 1.0);
        let mut out = MidiBuffer::with_capacity(OUTPUT_CAPACITY);
        for _ in 0..20 {
            e.process_block(BLOCK, &[MidiEvent::new(0, MidiMessage::Clock)], &mut out);
        }
        assert_eq!(e.control().bpm(), None);
    }

    #[test]
    fn test_host_transport_tempo() {
        let mut settings = one_route(RouteSettings::new(1, knob_a()));
        settings.sync = SyncMode::Synced;
        let mut e = engine(settings, false, 1.0);
        e.set_host_transport(Box::new(FixedTransport::new(100.0, true)));

        // Playing edge with auto-start runs the LFO
        assert!(!run(&mut e, 1).is_empty());
        assert_eq!(e.control().bpm(), Some(100.0));
        assert!(e.coordinator().contains(RunReason::Transport));
    }

    #[test]
    fn test_unusable_host_tempo_keeps_free_rate() {
        let mut settings = one_route(RouteSettings::new(1, knob_a()));
        settings.sync = SyncMode::Synced;
        settings.throttle = unthrottled();
        let mut e = engine(settings, true, 1.0);
        e.set_host_transport(Box::new(FixedTransport::new(f64::INFINITY, true)));

        run(&mut e, 50);
        assert_eq!(e.control().bpm(), None);

        // Still modulating at the free rate
        let later = run(&mut e, 20);
        assert!(!later.is_empty());
        let first = later[0].3;
        assert!(later.iter().any(|&(_, _, _, v)| v != first));
    }

    #[test]
    fn test_midi_transport_start_stop() {
        let mut settings = one_route(RouteSettings::new(1, knob_a()));
        settings.sync = SyncMode::Synced;
        let mut e = engine(settings, false, 1.0);
        let mut out = MidiBuffer::with_capacity(OUTPUT_CAPACITY);

        e.process_block(BLOCK, &[MidiEvent::new(0, MidiMessage::Start)], &mut out);
        assert!(!ccs(&out).is_empty());
        assert_eq!(out.events()[0].message, MidiMessage::Start);

        e.process_block(BLOCK, &[MidiEvent::new(0, MidiMessage::Stop)], &mut out);
        assert!(ccs(&out).is_empty());
        assert!(!e.coordinator().contains(RunReason::Transport));
    }

    #[test]
    fn test_transport_without_auto_start() {
        let mut settings = one_route(RouteSettings::new(1, knob_a()));
        settings.sync = SyncMode::Synced;
        settings.trigger.transport_auto_start = false;
        let mut e = engine(settings, false, 1.0);
        let mut out = MidiBuffer::with_capacity(OUTPUT_CAPACITY);

        e.process_block(BLOCK, &[MidiEvent::new(0, MidiMessage::Start)], &mut out);
        assert!(ccs(&out).is_empty());
    }

    fn envelope_settings() -> EnvelopeSettings {
        EnvelopeSettings {
            enabled: true,
            attack: 0.0,
            hold: 0.0,
            decay: 0.0,
            sustain: 1.0,
            release: 0.0,
            decay_curve: CurveShape::Linear,
            release_curve: CurveShape::Linear,
            ..EnvelopeSettings::default()
        }
    }

    #[test]
    fn test_envelope_to_parameter() {
        let knob_b = find_parameter("Knob B").unwrap();
        let mut settings = EngineSettings::default();
        settings.envelope = envelope_settings();
        settings.envelope_destination = EnvelopeDestination::Parameter {
            channel: 2,
            parameter: knob_b,
        };
        let mut e = engine(settings, false, 1.0);
        let mut out = MidiBuffer::with_capacity(OUTPUT_CAPACITY);

        e.process_block(BLOCK, &[MidiEvent::new(0, MidiMessage::NoteOn(0, 60, 127))], &mut out);
        assert_eq!(ccs(&out), vec![(0, 1, 18, 127)]);
    }

    #[test]
    fn test_envelope_velocity() {
        let knob_b = find_parameter("Knob B").unwrap();
        let mut settings = EngineSettings::default();
        settings.envelope = EnvelopeSettings {
            velocity_amount: 1.0,
            ..envelope_settings()
        };
        settings.envelope_destination = EnvelopeDestination::Parameter {
            channel: 1,
            parameter: knob_b,
        };
        let mut e = engine(settings, false, 1.0);
        let mut out = MidiBuffer::with_capacity(OUTPUT_CAPACITY);

        e.process_block(BLOCK, &[MidiEvent::new(0, MidiMessage::NoteOn(0, 60, 0x40))], &mut out);
        let peak = e.envelope().peak();
        assert!((peak - 64.0 / 127.0).abs() < 1e-9);
    }

    #[test]
    fn test_envelope_gate_ramps_then_silent() {
        let mut settings = one_route(RouteSettings::new(1, knob_a()).with_bipolar(true));
        settings.envelope = envelope_settings();
        settings.envelope_destination = EnvelopeDestination::Route(0);
        settings.throttle = unthrottled();
        let mut e = engine(settings, false, 1.0);
        let mut out = MidiBuffer::with_capacity(OUTPUT_CAPACITY);

        // Gated route runs while the envelope does, without the user enable
        e.process_block(BLOCK, &[MidiEvent::new(0, MidiMessage::NoteOn(0, 60, 127))], &mut out);
        assert!(!ccs(&out).is_empty());
        assert!(e.coordinator().contains(RunReason::Envelope));
        run(&mut e, 4);

        e.process_block(BLOCK, &[MidiEvent::new(0, MidiMessage::NoteOff(0, 60, 0))], &mut out);

        let mut ramp = Vec::new();
        let mut blocks = Vec::new();
        for _ in 0..12 {
            e.process_block(BLOCK, &[], &mut out);
            let block = ccs(&out);
            ramp.extend(block.iter().map(|c| c.3));
            blocks.push(block.len());
        }

        // Bipolar neutral maps to the center
        assert_eq!(ramp.last(), Some(&63));
        assert!(ramp.len() <= GATE_RAMP_STEPS as usize);
        assert!(blocks[blocks.len() - 4..].iter().all(|&n| n == 0));
        assert!(!e.coordinator().contains(RunReason::Envelope));
        assert_eq!(e.coordinator().gate(), Gate::Closed);
    }

    #[test]
    fn test_envelope_retrigger_reopens_gate() {
        let mut settings = one_route(RouteSettings::new(1, knob_a()));
        settings.envelope = envelope_settings();
        settings.envelope_destination = EnvelopeDestination::Route(0);
        let mut e = engine(settings, false, 1.0);
        let mut out = MidiBuffer::with_capacity(OUTPUT_CAPACITY);

        e.process_block(BLOCK, &[MidiEvent::new(0, MidiMessage::NoteOn(0, 60, 127))], &mut out);
        e.process_block(BLOCK, &[MidiEvent::new(0, MidiMessage::NoteOff(0, 60, 0))], &mut out);
        e.process_block(BLOCK, &[], &mut out);
        assert!(matches!(e.coordinator().gate(), Gate::Ramping { .. }));

        e.process_block(BLOCK, &[MidiEvent::new(0, MidiMessage::NoteOn(0, 60, 127))], &mut out);
        assert!(matches!(e.coordinator().gate(), Gate::Open { .. }));
    }

    #[test]
    fn test_apply_settings_keeps_phase_of_unchanged_routes() {
        let mut settings = EngineSettings::default();
        settings.routes[0] = RouteSettings::new(1, knob_a());
        let mut e = engine(settings, true, 2.0);
        run(&mut e, 5);
        let phase = e.lfo().route(0).unwrap().phase();

        settings.routes[1] = RouteSettings::new(2, knob_a());
        e.apply_settings(settings);
        assert_eq!(e.lfo().route(0).unwrap().phase(), phase);
    }
}
