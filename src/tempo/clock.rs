//! Tempo estimation from MIDI clock pulses
//!
//! Keeps the timestamps of the most recent pulses in a fixed ring and
//! derives a smoothed BPM from their average spacing.

/// MIDI clock resolution
pub const PULSES_PER_QUARTER: f64 = 24.0;

/// Pulses kept for averaging
const WINDOW: usize = 48;

/// Tempos outside this open range are discarded
pub const MIN_BPM: f64 = 10.0;
pub const MAX_BPM: f64 = 400.0;

/// True for a finite tempo strictly between [`MIN_BPM`] and [`MAX_BPM`]
pub fn is_usable_bpm(bpm: f64) -> bool {
    bpm.is_finite() && bpm > MIN_BPM && bpm < MAX_BPM
}

/// Weight of the previous estimate when smoothing
const SMOOTHING: f64 = 0.9;

/// Rolling-average BPM estimator
#[derive(Debug, Clone)]
pub struct ClockEstimator {
    times: [f64; WINDOW],
    /// Index of the oldest stored timestamp
    head: usize,
    len: usize,
    bpm: f64,
}

impl ClockEstimator {
    pub fn new() -> Self {
        Self {
            times: [0.0; WINDOW],
            head: 0,
            len: 0,
            bpm: 0.0,
        }
    }

    /// Forget all pulses and the current estimate
    pub fn reset(&mut self) {
        self.head = 0;
        self.len = 0;
        self.bpm = 0.0;
    }

    /// Current estimate, `None` until one has been accepted
    pub fn bpm(&self) -> Option<f64> {
        if self.bpm > 0.0 {
            Some(self.bpm)
        } else {
            None
        }
    }

    /// Register a clock pulse at `now_ms`
    pub fn pulse(&mut self, now_ms: f64) {
        if self.len < WINDOW {
            self.times[(self.head + self.len) % WINDOW] = now_ms;
            self.len += 1;
        } else {
            self.times[self.head] = now_ms;
            self.head = (self.head + 1) % WINDOW;
        }

        if self.len < 2 {
            return;
        }

        let first = self.times[self.head];
        let last = self.times[(self.head + self.len - 1) % WINDOW];
        let elapsed = last - first;
        if elapsed <= 0.0 {
            return;
        }

        let intervals = (self.len - 1) as f64;
        let computed = 60_000.0 * intervals / (elapsed * PULSES_PER_QUARTER);
        if !is_usable_bpm(computed) {
            return;
        }

        self.bpm = if self.bpm <= 0.0 {
            computed
        } else {
            SMOOTHING * self.bpm + (1.0 - SMOOTHING) * computed
        };
    }
}

impl Default for ClockEstimator {
    fn default() -> Self {
        Self::new()
    }
}
