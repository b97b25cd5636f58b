//! LFO waveform shapes
//!
//! Pure functions from a phase in [0, 1) to a bipolar sample in [-1, 1],
//! plus the phase alignment rules that make every unipolar shape start at
//! its minimum.

use std::f64::consts::TAU;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// LFO waveform shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LfoShape {
    #[default]
    Sine,
    Triangle,
    Square,
    Saw,
    /// Stepped random, one value per cycle
    Random,
}

impl LfoShape {
    pub const ALL: [LfoShape; 5] = [
        LfoShape::Sine,
        LfoShape::Triangle,
        LfoShape::Square,
        LfoShape::Saw,
        LfoShape::Random,
    ];

    /// Evaluate the base (unaligned) waveform
    ///
    /// Random has no closed form and evaluates to 0 here; use [`sample`].
    pub fn evaluate(self, phase: f64) -> f64 {
        let t = wrap(phase);
        match self {
            LfoShape::Sine => (TAU * t).sin(),
            // +1 at 0, -1 at 0.5
            LfoShape::Triangle => 4.0 * (t - 0.5).abs() - 1.0,
            LfoShape::Square => {
                if t < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            LfoShape::Saw => 2.0 * t - 1.0,
            LfoShape::Random => 0.0,
        }
    }

    /// Phase a restarted route begins at
    ///
    /// Unipolar shapes start at their minimum; bipolar shapes start at 0.
    pub fn start_phase(self, bipolar: bool) -> f64 {
        if bipolar {
            return 0.0;
        }
        match self {
            LfoShape::Sine => 0.75,
            LfoShape::Triangle => 0.25,
            LfoShape::Square => 0.5,
            LfoShape::Saw | LfoShape::Random => 0.0,
        }
    }

    /// Random cannot be centered or inverted
    pub fn supports_polarity(self) -> bool {
        self != LfoShape::Random
    }
}

/// Held value for the Random shape, one per route
#[derive(Debug, Clone)]
pub struct RandomHold {
    rng: SmallRng,
    last_phase: f64,
    value: f64,
}

impl RandomHold {
    /// Create a generator seeded from OS entropy
    pub fn new() -> Self {
        Self::from_rng(SmallRng::from_entropy())
    }

    /// Create a reproducible generator
    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(SmallRng::seed_from_u64(seed))
    }

    fn from_rng(rng: SmallRng) -> Self {
        Self {
            rng,
            last_phase: 0.0,
            value: 0.0,
        }
    }

    /// Current held value
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Re-roll once each time the phase moves backwards (a wrap)
    pub fn next(&mut self, phase: f64) -> f64 {
        if phase < self.last_phase {
            self.value = self.rng.gen_range(-1.0..=1.0);
        }
        self.last_phase = phase;
        self.value
    }
}

impl Default for RandomHold {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute a route's sample for the given phase
///
/// `invert` shifts the phase by half a cycle, except for Saw where the ramp
/// direction is reversed instead. Triangle and Saw get a fixed offset so
/// that the start phase lands on the expected value in each polarity.
pub fn sample(
    shape: LfoShape,
    phase: f64,
    bipolar: bool,
    invert: bool,
    hold: &mut RandomHold,
) -> f64 {
    let mut phase = wrap(phase);

    if invert {
        phase = match shape {
            LfoShape::Saw => wrap(-phase),
            _ => wrap(phase + 0.5),
        };
    }

    phase = match (shape, bipolar) {
        (LfoShape::Triangle, false) => wrap(phase + 0.25),
        (LfoShape::Triangle, true) => wrap(phase - 0.25),
        (LfoShape::Saw, true) => wrap(phase + 0.5),
        _ => phase,
    };

    let value = match shape {
        LfoShape::Random => hold.next(phase),
        _ => shape.evaluate(phase),
    };
    value.clamp(-1.0, 1.0)
}

/// Advance a phase accumulator, returning true when it wrapped
pub fn advance_phase(phase: &mut f64, inc: f64) -> bool {
    *phase += inc;
    if *phase >= 1.0 {
        *phase -= phase.floor();
        return true;
    }
    false
}

fn wrap(phase: f64) -> f64 {
    let w = phase - phase.floor();
    // -tiny - floor(-tiny) rounds to exactly 1.0
    if w >= 1.0 {
        0.0
    } else {
        w
    }
}
