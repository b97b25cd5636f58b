//! Envelope generator
//!
//! Attack-Hold-Decay-Sustain-Release envelope with a velocity sensitive
//! peak and shaped decay/release segments. Time is advanced by sample count
//! only, so a run is reproducible offline.

use serde::{Deserialize, Serialize};

use crate::mapping::CurveShape;

/// Stage durations at or below this many milliseconds are instantaneous
const EPSILON_MS: f64 = 0.001;

/// Levels closer than this count as reached
const LEVEL_EPSILON: f64 = 0.0001;

/// Steepness of the snap attack curve
const SNAP_AMOUNT: f64 = 6.0;

/// Attack timing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackMode {
    #[default]
    Fast,
    /// Three times the nominal attack
    Long,
    /// 30% of the nominal attack with a fast initial rise
    Snap,
}

impl AttackMode {
    fn time_scale(self) -> f64 {
        match self {
            AttackMode::Fast => 1.0,
            AttackMode::Long => 3.0,
            AttackMode::Snap => 0.3,
        }
    }
}

/// Envelope parameters (times in seconds)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeSettings {
    pub enabled: bool,
    pub attack: f64,
    pub hold: f64,
    pub decay: f64,
    pub sustain: f64,
    pub release: f64,
    /// 0 = fixed peak, 1 = peak follows velocity
    pub velocity_amount: f64,
    pub attack_mode: AttackMode,
    /// Triple the release time
    pub release_long: bool,
    pub decay_curve: CurveShape,
    pub release_curve: CurveShape,
}

impl Default for EnvelopeSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            attack: 0.01,
            hold: 0.0,
            decay: 0.2,
            sustain: 0.7,
            release: 0.2,
            velocity_amount: 0.0,
            attack_mode: AttackMode::Fast,
            release_long: false,
            decay_curve: CurveShape::Exponential,
            release_curve: CurveShape::Exponential,
        }
    }
}

impl EnvelopeSettings {
    fn attack_ms(&self) -> f64 {
        self.attack * 1000.0 * self.attack_mode.time_scale()
    }

    fn release_ms(&self) -> f64 {
        let scale = if self.release_long { 3.0 } else { 1.0 };
        self.release * 1000.0 * scale
    }
}

/// Envelope stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvelopeStage {
    #[default]
    Idle,
    Attack,
    Hold,
    Decay,
    Sustain,
    Release,
}

/// Runtime state, never destroyed; returns to Idle
#[derive(Debug, Clone, Copy, Default)]
struct EnvelopeState {
    stage: EnvelopeStage,
    value: f64,
    stage_start_ms: f64,
    stage_start_value: f64,
    note_held: bool,
    velocity: f64,
    attack_peak: f64,
    attack_peak_computed: bool,
    now_ms: f64,
}

/// Peak reached by the attack for a given velocity
pub fn attack_peak(velocity: f64, velocity_amount: f64) -> f64 {
    let amount = velocity_amount.clamp(0.0, 1.0);
    (1.0 + (velocity - 1.0) * amount).clamp(0.0, 1.0)
}

/// Envelope generator
#[derive(Debug, Clone)]
pub struct EnvelopeGenerator {
    settings: EnvelopeSettings,
    state: EnvelopeState,
    ms_per_sample: f64,
}

impl EnvelopeGenerator {
    pub fn new(sample_rate: f64) -> Self {
        let mut eg = Self {
            settings: EnvelopeSettings::default(),
            state: EnvelopeState::default(),
            ms_per_sample: 0.0,
        };
        eg.set_sample_rate(sample_rate);
        eg
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.ms_per_sample = 1000.0 / sample_rate.max(1.0);
    }

    pub fn set_settings(&mut self, settings: EnvelopeSettings) {
        self.settings = settings;
    }

    pub fn settings(&self) -> &EnvelopeSettings {
        &self.settings
    }

    pub fn stage(&self) -> EnvelopeStage {
        self.state.stage
    }

    /// Current level in [0, 1]
    pub fn value(&self) -> f64 {
        self.state.value.clamp(0.0, 1.0)
    }

    /// Peak of the current trigger
    pub fn peak(&self) -> f64 {
        self.state.attack_peak
    }

    pub fn is_active(&self) -> bool {
        self.state.stage != EnvelopeStage::Idle
    }

    /// Start the attack from the current level
    ///
    /// `velocity` is normalized to [0, 1]. Ignored while disabled.
    pub fn note_on(&mut self, velocity: f64) {
        if !self.settings.enabled {
            return;
        }
        let s = &mut self.state;
        s.velocity = velocity.clamp(0.0, 1.0);
        s.attack_peak_computed = false;
        s.note_held = true;
        s.stage = EnvelopeStage::Attack;
        s.stage_start_ms = s.now_ms;
        s.stage_start_value = s.value;
    }

    /// Enter release from the current level
    pub fn note_off(&mut self) {
        if !self.settings.enabled {
            return;
        }
        let s = &mut self.state;
        s.note_held = false;
        s.stage = EnvelopeStage::Release;
        s.stage_start_ms = s.now_ms;
        s.stage_start_value = s.value;
    }

    /// Advance by one block of `num_samples`
    ///
    /// Returns the level while the envelope is producing output, `None` when
    /// idle or disabled.
    pub fn process_block(&mut self, num_samples: usize) -> Option<f64> {
        if !self.settings.enabled {
            return None;
        }
        self.state.now_ms += num_samples as f64 * self.ms_per_sample;

        if self.advance() {
            Some(self.value())
        } else {
            None
        }
    }

    fn enter(&mut self, stage: EnvelopeStage, value: f64) {
        let s = &mut self.state;
        s.value = value;
        s.stage = stage;
        s.stage_start_ms = s.now_ms;
        s.stage_start_value = value;
    }

    fn advance(&mut self) -> bool {
        let cfg = self.settings;
        let attack_ms = cfg.attack_ms();
        let hold_ms = cfg.hold * 1000.0;
        let decay_ms = cfg.decay * 1000.0;
        let release_ms = cfg.release_ms();
        let sustain = cfg.sustain.clamp(0.0, 1.0);

        let elapsed = self.state.now_ms - self.state.stage_start_ms;

        match self.state.stage {
            EnvelopeStage::Idle => {
                self.state.value = 0.0;
                false
            }

            EnvelopeStage::Attack => {
                if !self.state.attack_peak_computed {
                    self.state.attack_peak = attack_peak(self.state.velocity, cfg.velocity_amount);
                    self.state.attack_peak_computed = true;
                }
                let peak = self.state.attack_peak;

                if attack_ms <= EPSILON_MS {
                    self.state.value = peak;
                } else {
                    let mut t = (elapsed / attack_ms).clamp(0.0, 1.0);
                    if cfg.attack_mode == AttackMode::Snap {
                        t = 1.0 - (-SNAP_AMOUNT * t).exp();
                    }
                    let start = self.state.stage_start_value;
                    self.state.value = start + (peak - start) * t;
                }

                if elapsed >= attack_ms || self.state.value >= peak - LEVEL_EPSILON {
                    let next = if hold_ms > EPSILON_MS {
                        EnvelopeStage::Hold
                    } else {
                        EnvelopeStage::Decay
                    };
                    self.enter(next, peak);
                }
                true
            }

            EnvelopeStage::Hold => {
                let peak = self.state.attack_peak;
                self.state.value = peak;
                if elapsed >= hold_ms {
                    self.enter(EnvelopeStage::Decay, peak);
                }
                true
            }

            EnvelopeStage::Decay => {
                let level = sustain * self.state.attack_peak;

                if decay_ms <= EPSILON_MS {
                    self.enter(EnvelopeStage::Sustain, level);
                } else {
                    let t = elapsed / decay_ms;
                    let shaped = cfg.decay_curve.apply(t, cfg.decay_curve.decay_k());
                    let start = self.state.stage_start_value;
                    self.state.value = start + (level - start) * shaped;

                    if elapsed >= decay_ms {
                        self.enter(EnvelopeStage::Sustain, level);
                    }
                }
                true
            }

            EnvelopeStage::Sustain => {
                self.state.value = sustain * self.state.attack_peak;
                if !self.state.note_held {
                    let value = self.state.value;
                    self.enter(EnvelopeStage::Release, value);
                }
                true
            }

            EnvelopeStage::Release => {
                if release_ms <= EPSILON_MS {
                    self.state.value = 0.0;
                    self.state.stage = EnvelopeStage::Idle;
                } else {
                    let t = elapsed / release_ms;
                    let shaped = cfg.release_curve.apply(t, cfg.release_curve.release_k());
                    self.state.value = self.state.stage_start_value * (1.0 - shaped);

                    if elapsed >= release_ms || self.state.value <= LEVEL_EPSILON {
                        self.state.value = 0.0;
                        self.state.stage = EnvelopeStage::Idle;
                    }
                }
                true
            }
        }
    }
}
