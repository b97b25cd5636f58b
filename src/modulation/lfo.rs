//! Multi-route Low Frequency Oscillator
//!
//! One shared shape and rate drive [`MAX_ROUTES`] independent routes. Each
//! route owns its phase accumulator, polarity, inversion and one-shot state,
//! and is advanced by the engine once per sub-step.

use super::waveform::{advance_phase, sample, LfoShape, RandomHold};
use crate::mapping::ParamId;

/// Number of modulation routes
pub const MAX_ROUTES: usize = 3;

/// Samples per sub-step are bounded to this range
pub const MIN_STEP_SAMPLES: usize = 8;
pub const MAX_STEP_SAMPLES: usize = 128;

/// Target number of sub-steps per LFO cycle
const STEPS_PER_CYCLE: f64 = 128.0;

/// Slack on the accumulated phase when completing a one-shot cycle
const CYCLE_EPSILON: f64 = 1e-9;

/// User-facing settings of one route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouteSettings {
    /// MIDI channel 1-16, 0 = disabled
    pub channel: u8,
    /// Destination parameter
    pub parameter: Option<ParamId>,
    pub bipolar: bool,
    pub invert: bool,
    pub one_shot: bool,
}

impl RouteSettings {
    /// Create an enabled route
    pub fn new(channel: u8, parameter: ParamId) -> Self {
        Self {
            channel,
            parameter: Some(parameter),
            ..Self::default()
        }
    }

    pub fn with_bipolar(mut self, bipolar: bool) -> Self {
        self.bipolar = bipolar;
        self
    }

    pub fn with_invert(mut self, invert: bool) -> Self {
        self.invert = invert;
        self
    }

    pub fn with_one_shot(mut self, one_shot: bool) -> Self {
        self.one_shot = one_shot;
        self
    }

    /// Route has a channel and a resolved parameter
    pub fn is_enabled(&self) -> bool {
        (1..=16).contains(&self.channel) && self.parameter.is_some()
    }
}

/// Runtime state of one route
#[derive(Debug, Clone)]
pub struct Route {
    settings: RouteSettings,
    phase: f64,
    /// Phase advanced since the last restart
    total_phase: f64,
    finished_one_shot: bool,
    /// Polarity or inversion changed; realign at the next wrap
    realign_pending: bool,
    hold: RandomHold,
}

impl Route {
    fn new(hold: RandomHold) -> Self {
        Self {
            settings: RouteSettings::default(),
            phase: 0.0,
            total_phase: 0.0,
            finished_one_shot: false,
            realign_pending: false,
            hold,
        }
    }

    pub fn settings(&self) -> &RouteSettings {
        &self.settings
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    pub fn total_phase(&self) -> f64 {
        self.total_phase
    }

    pub fn is_finished(&self) -> bool {
        self.settings.one_shot && self.finished_one_shot
    }

    fn restart(&mut self, shape: LfoShape) {
        self.phase = shape.start_phase(self.settings.bipolar);
        self.total_phase = 0.0;
        self.finished_one_shot = false;
        self.realign_pending = false;
    }

    /// Start one-shot progress over from the current phase
    fn clear_one_shot(&mut self) {
        self.finished_one_shot = false;
        self.total_phase = 0.0;
    }
}

/// The LFO: shape plus routes
#[derive(Debug, Clone)]
pub struct LfoEngine {
    shape: LfoShape,
    routes: [Route; MAX_ROUTES],
    /// Settings seen at the last sync, for change detection
    snapshot: [RouteSettings; MAX_ROUTES],
}

impl LfoEngine {
    /// Create an LFO whose Random shape is seeded from OS entropy
    pub fn new() -> Self {
        Self::with_holds(std::array::from_fn(|_| RandomHold::new()))
    }

    /// Create an LFO with reproducible Random output
    pub fn seeded(seed: u64) -> Self {
        Self::with_holds(std::array::from_fn(|i| RandomHold::seeded(seed.wrapping_add(i as u64))))
    }

    fn with_holds(holds: [RandomHold; MAX_ROUTES]) -> Self {
        Self {
            shape: LfoShape::default(),
            routes: holds.map(Route::new),
            snapshot: [RouteSettings::default(); MAX_ROUTES],
        }
    }

    pub fn shape(&self) -> LfoShape {
        self.shape
    }

    pub fn route(&self, index: usize) -> Option<&Route> {
        self.routes.get(index)
    }

    pub fn routes(&self) -> &[Route; MAX_ROUTES] {
        &self.routes
    }

    /// Sync shape and route settings
    ///
    /// Any change to a route clears its one-shot state. A route that becomes
    /// enabled is aligned to its start phase at once; a polarity or
    /// inversion change is deferred to the route's next cycle boundary.
    pub fn apply_settings(&mut self, shape: LfoShape, settings: &[RouteSettings; MAX_ROUTES]) {
        let shape_changed = shape != self.shape;
        self.shape = shape;

        for (i, requested) in settings.iter().enumerate() {
            let mut now = *requested;
            if !shape.supports_polarity() {
                now.bipolar = false;
                now.invert = false;
            }

            let prev = self.snapshot[i];
            let route = &mut self.routes[i];
            route.settings = now;

            if !now.one_shot {
                route.finished_one_shot = false;
            }

            if now != prev || shape_changed {
                route.clear_one_shot();

                let became_enabled = prev.channel == 0 && now.channel != 0;
                let mode_changed = now.bipolar != prev.bipolar || now.invert != prev.invert;

                if became_enabled {
                    route.restart(shape);
                } else if mode_changed || shape_changed {
                    route.realign_pending = true;
                }
            }

            self.snapshot[i] = now;
        }
    }

    /// Restart every route at its start phase
    pub fn restart(&mut self) {
        for route in &mut self.routes {
            route.restart(self.shape);
        }
    }

    /// Restart a single route
    pub fn restart_route(&mut self, index: usize) {
        if let Some(route) = self.routes.get_mut(index) {
            route.restart(self.shape);
        }
    }

    /// Mark every route finished so nothing further is emitted
    pub fn halt(&mut self) {
        for route in &mut self.routes {
            route.total_phase = 0.0;
            route.finished_one_shot = true;
        }
    }

    /// Advance one route by `inc` cycles and return its sample
    ///
    /// Returns `None` for disabled routes and finished one-shots, which are
    /// left untouched.
    pub fn advance(&mut self, index: usize, inc: f64) -> Option<f64> {
        let shape = self.shape;
        let route = self.routes.get_mut(index)?;
        let settings = route.settings;

        if !settings.is_enabled() || route.is_finished() {
            return None;
        }

        route.total_phase += inc;
        let wrapped = advance_phase(&mut route.phase, inc);

        if wrapped && route.realign_pending {
            let residual = route.phase;
            route.phase = shape.start_phase(settings.bipolar);
            advance_phase(&mut route.phase, residual);
            route.realign_pending = false;
        }

        let value = sample(shape, route.phase, settings.bipolar, settings.invert, &mut route.hold);

        // Every route restarts at its start phase, so one cycle of
        // accumulated phase covers the peak and the return to the start
        if settings.one_shot && route.total_phase >= 1.0 - CYCLE_EPSILON {
            route.finished_one_shot = true;
        }

        Some(value)
    }

    /// True when at least one route is enabled and every enabled route is a
    /// finished one-shot
    pub fn all_one_shots_finished(&self) -> bool {
        let mut any_enabled = false;
        for route in &self.routes {
            if !route.settings.is_enabled() {
                continue;
            }
            any_enabled = true;
            if !route.is_finished() {
                return false;
            }
        }
        any_enabled
    }
}

impl Default for LfoEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Samples per sub-step for the given rate and block size
///
/// Aims for roughly [`STEPS_PER_CYCLE`] steps per cycle, bounded to
/// [`MIN_STEP_SAMPLES`]..=[`MAX_STEP_SAMPLES`] and to the block length.
pub fn step_samples(sample_rate: f64, rate_hz: f64, block_size: usize) -> usize {
    let ideal = (sample_rate.max(1.0) / rate_hz.max(0.001) / STEPS_PER_CYCLE).round();
    let step = (ideal as usize).clamp(MIN_STEP_SAMPLES, MAX_STEP_SAMPLES);
    step.clamp(1, block_size.max(1))
}
