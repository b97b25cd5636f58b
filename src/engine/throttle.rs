//! Outbound parameter encoder and rate limiter
//!
//! Every (source, parameter) pair has its own record of the last value and
//! time sent. A value is only emitted when it moved far enough and enough
//! time has passed since the previous send for the same pair.

use super::midi::{
    MidiBuffer, MidiEvent, MidiMessage, CC_DATA_LSB, CC_DATA_MSB, CC_NRPN_LSB, CC_NRPN_MSB,
};
use crate::mapping::{Encoding, ParamId, ParameterDescriptor, PARAMETER_COUNT};
use crate::modulation::MAX_ROUTES;

/// Who produced a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleSource {
    Route(usize),
    Envelope,
}

/// Identifies one throttle record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleKey {
    pub source: ThrottleSource,
    pub parameter: ParamId,
}

impl ThrottleKey {
    pub fn route(index: usize, parameter: ParamId) -> Self {
        Self {
            source: ThrottleSource::Route(index),
            parameter,
        }
    }

    pub fn envelope(parameter: ParamId) -> Self {
        Self {
            source: ThrottleSource::Envelope,
            parameter,
        }
    }

    fn slot(&self) -> Option<usize> {
        let source = match self.source {
            ThrottleSource::Route(i) if i < MAX_ROUTES => i,
            ThrottleSource::Route(_) => return None,
            ThrottleSource::Envelope => MAX_ROUTES,
        };
        if self.parameter >= PARAMETER_COUNT {
            return None;
        }
        Some(source * PARAMETER_COUNT + self.parameter)
    }
}

/// Throttle gates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottleSettings {
    /// Minimum absolute change between sends
    pub change_threshold: i32,
    /// Minimum time between sends in milliseconds
    pub min_interval_ms: f64,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            change_threshold: 1,
            min_interval_ms: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ThrottleEntry {
    last_value: i32,
    last_sent_ms: f64,
}

const SLOTS: usize = (MAX_ROUTES + 1) * PARAMETER_COUNT;

/// Per-key value/interval gate
#[derive(Debug, Clone)]
pub struct Throttle {
    settings: ThrottleSettings,
    entries: [Option<ThrottleEntry>; SLOTS],
}

impl Throttle {
    pub fn new(settings: ThrottleSettings) -> Self {
        Self {
            settings,
            entries: [None; SLOTS],
        }
    }

    pub fn settings(&self) -> &ThrottleSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: ThrottleSettings) {
        self.settings = settings;
    }

    /// True if both gates pass for `value` at `now_ms`
    ///
    /// The first value for a key always passes. Nothing is recorded until
    /// [`record`](Self::record) is called for a completed send.
    pub fn allows(&self, key: ThrottleKey, value: i32, now_ms: f64) -> bool {
        self.check(key, value, now_ms, false)
    }

    /// Like [`allows`](Self::allows) but ignores the interval gate
    pub fn allows_final(&self, key: ThrottleKey, value: i32, now_ms: f64) -> bool {
        self.check(key, value, now_ms, true)
    }

    /// Remember a value as sent
    pub fn record(&mut self, key: ThrottleKey, value: i32, now_ms: f64) {
        if let Some(slot) = key.slot() {
            self.entries[slot] = Some(ThrottleEntry {
                last_value: value,
                last_sent_ms: now_ms,
            });
        }
    }

    fn check(&self, key: ThrottleKey, value: i32, now_ms: f64, skip_interval: bool) -> bool {
        let Some(slot) = key.slot() else {
            return false;
        };

        match &self.entries[slot] {
            None => true,
            Some(entry) => {
                let changed = if skip_interval {
                    value != entry.last_value
                } else {
                    (value - entry.last_value).abs() >= self.settings.change_threshold
                };
                let waited =
                    skip_interval || now_ms - entry.last_sent_ms >= self.settings.min_interval_ms;
                changed && waited
            }
        }
    }
}

/// Number of messages [`encode_parameter`] writes for a descriptor
pub fn message_count(descriptor: &ParameterDescriptor) -> usize {
    match descriptor.encoding {
        Encoding::ControlChange(_) => 1,
        Encoding::Nrpn { .. } => 4,
    }
}

/// Encode a parameter value as CC messages at `offset`
///
/// `channel` is 1-16. Values are clamped to the descriptor's range before
/// encoding. The whole group is written or, when the buffer lacks room for
/// all of it, nothing is; returns false in that case.
pub fn encode_parameter(
    descriptor: &ParameterDescriptor,
    channel: u8,
    value: i32,
    offset: usize,
    out: &mut MidiBuffer,
) -> bool {
    if out.remaining() < message_count(descriptor) {
        out.count_dropped(message_count(descriptor));
        return false;
    }

    let ch = channel.saturating_sub(1) & 0x0F;
    let value = value.clamp(descriptor.min, descriptor.max);

    match descriptor.encoding {
        Encoding::ControlChange(cc) => {
            let v = value.clamp(0, 127) as u8;
            out.push(MidiEvent::new(offset, MidiMessage::ControlChange(ch, cc, v)))
        }
        Encoding::Nrpn { msb, lsb } => {
            let v = value.clamp(0, 0x3FFF) as u16;
            let messages = [
                MidiMessage::ControlChange(ch, CC_NRPN_MSB, msb & 0x7F),
                MidiMessage::ControlChange(ch, CC_NRPN_LSB, lsb & 0x7F),
                MidiMessage::ControlChange(ch, CC_DATA_MSB, ((v >> 7) & 0x7F) as u8),
                MidiMessage::ControlChange(ch, CC_DATA_LSB, (v & 0x7F) as u8),
            ];
            messages
                .into_iter()
                .all(|message| out.push(MidiEvent::new(offset, message)))
        }
    }
}
