//! Modulation sources
//!
//! Waveforms, the multi-route LFO and the envelope generator.

mod envelope;
mod lfo;
mod waveform;

pub use envelope::{attack_peak, AttackMode, EnvelopeGenerator, EnvelopeSettings, EnvelopeStage};
pub use lfo::{step_samples, LfoEngine, Route, RouteSettings, MAX_ROUTES};
pub use waveform::{advance_phase, sample, LfoShape, RandomHold};
