//! Tempo synchronization
//!
//! BPM from MIDI clock or host transport, and note divisions to LFO rate.

mod clock;
mod division;

pub use clock::{is_usable_bpm, ClockEstimator, MAX_BPM, MIN_BPM, PULSES_PER_QUARTER};
pub use division::{effective_rate, SyncDivision, SyncMode};
