//! Run-state coordination
//!
//! Several independent sources can ask the LFO to run. Each is a
//! [`RunReason`]; the union of active reasons plus a mute flag gives one
//! run decision per block. The envelope reason is special: it drives only
//! the route the envelope is gating, through a [`Gate`].

/// Number of LFO steps the gated route takes to return to neutral
pub const GATE_RAMP_STEPS: u32 = 8;

/// A reason for the LFO to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunReason {
    /// Explicit enable from the control side
    User,
    /// Note-on retrigger
    Note,
    /// Transport start with auto-start
    Transport,
    /// Envelope gating one route
    Envelope,
}

impl RunReason {
    fn bit(self) -> u8 {
        match self {
            RunReason::User => 1 << 0,
            RunReason::Note => 1 << 1,
            RunReason::Transport => 1 << 2,
            RunReason::Envelope => 1 << 3,
        }
    }
}

/// Set of active reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunReasons(u8);

impl RunReasons {
    pub fn insert(&mut self, reason: RunReason) {
        self.0 |= reason.bit();
    }

    pub fn remove(&mut self, reason: RunReason) {
        self.0 &= !reason.bit();
    }

    pub fn contains(&self, reason: RunReason) -> bool {
        self.0 & reason.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Copy of the set without `reason`
    pub fn without(mut self, reason: RunReason) -> Self {
        self.remove(reason);
        self
    }
}

/// State of the envelope gate on its route
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gate {
    Closed,
    /// Envelope producing values; `last` is the last emitted sample
    Open { last: f64 },
    /// Returning from `from` to neutral
    Ramping { from: f64, step: u32 },
}

/// Outcome of [`Coordinator::resolve`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunDecision {
    /// Ungated routes advance
    pub lfo_running: bool,
    /// The gated route advances or ramps
    pub gate_running: bool,
    /// `lfo_running` rose this block
    pub restart: bool,
}

/// Level a gated route rests at
///
/// Bipolar routes rest at the center; unipolar routes at their minimum,
/// or their maximum when inverted.
pub fn neutral_value(bipolar: bool, invert: bool) -> f64 {
    match (bipolar, invert) {
        (true, _) => 0.0,
        (false, false) => -1.0,
        (false, true) => 1.0,
    }
}

/// Combines run reasons, mute and the envelope gate
#[derive(Debug, Clone)]
pub struct Coordinator {
    reasons: RunReasons,
    muted: bool,
    was_running: bool,
    gate: Gate,
}

impl Coordinator {
    pub fn new() -> Self {
        Self {
            reasons: RunReasons::default(),
            muted: false,
            was_running: false,
            gate: Gate::Closed,
        }
    }

    pub fn reasons(&self) -> RunReasons {
        self.reasons
    }

    pub fn add(&mut self, reason: RunReason) {
        self.reasons.insert(reason);
    }

    pub fn remove(&mut self, reason: RunReason) {
        self.reasons.remove(reason);
    }

    pub fn contains(&self, reason: RunReason) -> bool {
        self.reasons.contains(reason)
    }

    pub fn mute(&mut self) {
        self.muted = true;
    }

    pub fn unmute(&mut self) {
        self.muted = false;
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Master kill: drop every reason, the mute and the gate
    pub fn kill(&mut self) {
        self.reasons.clear();
        self.muted = false;
        self.gate = Gate::Closed;
    }

    /// Compute this block's run decision
    pub fn resolve(&mut self) -> RunDecision {
        let lfo_running = !self.reasons.without(RunReason::Envelope).is_empty() && !self.muted;
        let restart = lfo_running && !self.was_running;
        self.was_running = lfo_running;

        RunDecision {
            lfo_running,
            gate_running: self.reasons.contains(RunReason::Envelope),
            restart,
        }
    }

    pub fn gate(&self) -> Gate {
        self.gate
    }

    /// Open (or reopen) the gate for a new envelope trigger
    pub fn open_gate(&mut self, neutral: f64) {
        let last = match self.gate {
            Gate::Open { last } => last,
            Gate::Ramping { from, step } => ramp_value(from, neutral, step),
            Gate::Closed => neutral,
        };
        self.gate = Gate::Open { last };
        self.reasons.insert(RunReason::Envelope);
    }

    /// Close immediately without a ramp
    pub fn close_gate(&mut self) {
        self.gate = Gate::Closed;
        self.reasons.remove(RunReason::Envelope);
    }

    /// Envelope finished: start returning to neutral
    pub fn begin_ramp(&mut self) {
        if let Gate::Open { last } = self.gate {
            self.gate = Gate::Ramping { from: last, step: 0 };
        }
    }

    /// Blend a full route sample by the envelope level
    pub fn gated_sample(&mut self, full: f64, neutral: f64, level: f64) -> f64 {
        let value = neutral + (full - neutral) * level.clamp(0.0, 1.0);
        if let Gate::Open { last } = &mut self.gate {
            *last = value;
        }
        value
    }

    /// Next ramp value, `None` unless ramping
    ///
    /// The last step lands exactly on `neutral`, closes the gate and
    /// releases the envelope reason.
    pub fn ramp_step(&mut self, neutral: f64) -> Option<f64> {
        let Gate::Ramping { from, step } = self.gate else {
            return None;
        };
        let step = step + 1;
        if step >= GATE_RAMP_STEPS {
            self.close_gate();
            return Some(neutral);
        }
        self.gate = Gate::Ramping { from, step };
        Some(ramp_value(from, neutral, step))
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

fn ramp_value(from: f64, to: f64, step: u32) -> f64 {
    let t = step as f64 / GATE_RAMP_STEPS as f64;
    from + (to - from) * t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_set() {
        let mut r = RunReasons::default();
        assert!(r.is_empty());
        r.insert(RunReason::Note);
        r.insert(RunReason::Envelope);
        assert!(r.contains(RunReason::Note));
        assert!(!r.contains(RunReason::User));
        assert!(!r.without(RunReason::Note).contains(RunReason::Note));
        assert!(r.contains(RunReason::Note));
        r.clear();
        assert!(r.is_empty());
    }

    #[test]
    fn test_any_reason_runs() {
        for reason in [RunReason::User, RunReason::Note, RunReason::Transport] {
            let mut c = Coordinator::new();
            c.add(reason);
            let d = c.resolve();
            assert!(d.lfo_running);
            assert!(d.restart);
            assert!(!d.gate_running);
        }
    }

    #[test]
    fn test_envelope_alone_does_not_run_lfo() {
        let mut c = Coordinator::new();
        c.open_gate(0.0);
        let d = c.resolve();
        assert!(!d.lfo_running);
        assert!(d.gate_running);
    }

    #[test]
    fn test_mute_overrides_reasons() {
        let mut c = Coordinator::new();
        c.add(RunReason::User);
        c.mute();
        assert!(!c.resolve().lfo_running);
        c.unmute();
        let d = c.resolve();
        assert!(d.lfo_running);
        assert!(d.restart);
    }

    #[test]
    fn test_restart_only_on_rising_edge() {
        let mut c = Coordinator::new();
        c.add(RunReason::User);
        assert!(c.resolve().restart);
        c.add(RunReason::Note);
        assert!(!c.resolve().restart);
    }

    #[test]
    fn test_kill_clears_everything() {
        let mut c = Coordinator::new();
        c.add(RunReason::User);
        c.add(RunReason::Transport);
        c.open_gate(0.0);
        c.mute();
        c.kill();
        assert!(c.reasons().is_empty());
        assert!(!c.is_muted());
        assert_eq!(c.gate(), Gate::Closed);
    }

    #[test]
    fn test_neutral_values() {
        assert_eq!(neutral_value(true, false), 0.0);
        assert_eq!(neutral_value(true, true), 0.0);
        assert_eq!(neutral_value(false, false), -1.0);
        assert_eq!(neutral_value(false, true), 1.0);
    }

    #[test]
    fn test_gated_sample_blends() {
        let mut c = Coordinator::new();
        c.open_gate(-1.0);
        assert_eq!(c.gated_sample(1.0, -1.0, 0.0), -1.0);
        assert_eq!(c.gated_sample(1.0, -1.0, 0.5), 0.0);
        assert_eq!(c.gated_sample(1.0, -1.0, 1.0), 1.0);
        assert_eq!(c.gate(), Gate::Open { last: 1.0 });
    }

    #[test]
    fn test_ramp_reaches_neutral_in_fixed_steps() {
        let mut c = Coordinator::new();
        c.open_gate(0.0);
        c.gated_sample(0.8, 0.0, 1.0);
        c.begin_ramp();

        let mut values = Vec::new();
        while let Some(v) = c.ramp_step(0.0) {
            values.push(v);
        }
        assert_eq!(values.len(), GATE_RAMP_STEPS as usize);
        assert_eq!(*values.last().unwrap(), 0.0);
        for pair in values.windows(2) {
            assert!(pair[1] < pair[0]);
        }
        assert_eq!(c.gate(), Gate::Closed);
        assert!(!c.contains(RunReason::Envelope));
    }

    #[test]
    fn test_envelope_held_during_ramp() {
        let mut c = Coordinator::new();
        c.open_gate(0.0);
        c.begin_ramp();
        c.ramp_step(0.0);
        assert!(c.resolve().gate_running);
    }

    #[test]
    fn test_retrigger_during_ramp_reopens() {
        let mut c = Coordinator::new();
        c.open_gate(-1.0);
        c.gated_sample(1.0, -1.0, 1.0);
        c.begin_ramp();
        c.ramp_step(-1.0);
        c.ramp_step(-1.0);

        c.open_gate(-1.0);
        match c.gate() {
            Gate::Open { last } => assert!((last - 0.5).abs() < 1e-12),
            other => panic!("expected open gate, got {:?}", other),
        }
        assert!(c.ramp_step(-1.0).is_none());
    }
}
