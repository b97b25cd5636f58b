//! MIDI messages for modgen.
//!
//! Decodes inbound bytes, encodes outbound messages, and carries
//! sample-offset events between the player and the engine.

use anyhow::Result;
use midir::{MidiInput, MidiOutput};
use thiserror::Error;

/// NRPN controller numbers
pub const CC_NRPN_MSB: u8 = 99;
pub const CC_NRPN_LSB: u8 = 98;
pub const CC_DATA_MSB: u8 = 6;
pub const CC_DATA_LSB: u8 = 38;

/// Errors decoding raw MIDI bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty MIDI message")]
    Empty,
    #[error("truncated MIDI message: status {status:#04x} needs {expected} bytes, got {got}")]
    Truncated { status: u8, expected: usize, got: usize },
    #[error("unsupported MIDI status byte {0:#04x}")]
    UnsupportedStatus(u8),
}

/// MIDI message types.
///
/// Channels are 0-15 on the wire representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    /// Note on: channel (0-15), note (0-127), velocity (1-127)
    NoteOn(u8, u8, u8),
    /// Note off: channel (0-15), note (0-127), velocity (0-127)
    NoteOff(u8, u8, u8),
    /// Control change: channel (0-15), controller (0-127), value (0-127)
    ControlChange(u8, u8, u8),
    Clock,
    Start,
    Continue,
    Stop,
    /// Any other short message, passed through untouched
    Other { data: [u8; 3], len: u8 },
}

impl MidiMessage {
    /// Decode one complete short message.
    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, DecodeError> {
        let status = *bytes.first().ok_or(DecodeError::Empty)?;
        if status < 0x80 {
            // Running status is not supported
            return Err(DecodeError::UnsupportedStatus(status));
        }

        let expected = match status {
            0xC0..=0xDF => 2,
            0x80..=0xEF => 3,
            0xF1 | 0xF3 => 2,
            0xF2 => 3,
            0xF6 | 0xF8..=0xFF => 1,
            _ => return Err(DecodeError::UnsupportedStatus(status)),
        };
        if bytes.len() < expected {
            return Err(DecodeError::Truncated {
                status,
                expected,
                got: bytes.len(),
            });
        }

        let channel = status & 0x0F;
        let message = match status {
            0x90..=0x9F if bytes[2] == 0 => MidiMessage::NoteOff(channel, bytes[1] & 0x7F, 0),
            0x90..=0x9F => MidiMessage::NoteOn(channel, bytes[1] & 0x7F, bytes[2] & 0x7F),
            0x80..=0x8F => MidiMessage::NoteOff(channel, bytes[1] & 0x7F, bytes[2] & 0x7F),
            0xB0..=0xBF => MidiMessage::ControlChange(channel, bytes[1] & 0x7F, bytes[2] & 0x7F),
            0xF8 => MidiMessage::Clock,
            0xFA => MidiMessage::Start,
            0xFB => MidiMessage::Continue,
            0xFC => MidiMessage::Stop,
            _ => {
                let mut data = [0u8; 3];
                data[..expected].copy_from_slice(&bytes[..expected]);
                MidiMessage::Other {
                    data,
                    len: expected as u8,
                }
            }
        };
        Ok(message)
    }

    /// Convert to raw MIDI bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            MidiMessage::NoteOn(ch, note, vel) => vec![0x90 | (ch & 0x0F), note & 0x7F, vel & 0x7F],
            MidiMessage::NoteOff(ch, note, vel) => {
                vec![0x80 | (ch & 0x0F), note & 0x7F, vel & 0x7F]
            }
            MidiMessage::ControlChange(ch, ctrl, val) => {
                vec![0xB0 | (ch & 0x0F), ctrl & 0x7F, val & 0x7F]
            }
            MidiMessage::Clock => vec![0xF8],
            MidiMessage::Start => vec![0xFA],
            MidiMessage::Continue => vec![0xFB],
            MidiMessage::Stop => vec![0xFC],
            MidiMessage::Other { data, len } => data[..(len as usize).min(3)].to_vec(),
        }
    }
}

/// A message scheduled at a sample offset within a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    pub offset: usize,
    pub message: MidiMessage,
}

impl MidiEvent {
    pub fn new(offset: usize, message: MidiMessage) -> Self {
        Self { offset, message }
    }
}

/// Fixed-capacity event buffer.
///
/// Storage is reserved up front; events pushed past capacity are dropped
/// and counted instead of growing the buffer.
#[derive(Debug, Clone)]
pub struct MidiBuffer {
    events: Vec<MidiEvent>,
    capacity: usize,
    dropped: usize,
}

impl MidiBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Append an event, returning false if it was dropped
    pub fn push(&mut self, event: MidiEvent) -> bool {
        if self.events.len() >= self.capacity {
            self.dropped += 1;
            return false;
        }
        self.events.push(event);
        true
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Stable in-place sort by sample offset
    ///
    /// Insertion sort: blocks are small and mostly ordered already, and
    /// messages at equal offsets (NRPN sequences) keep their order.
    pub fn sort_by_offset(&mut self) {
        for i in 1..self.events.len() {
            let mut j = i;
            while j > 0 && self.events[j - 1].offset > self.events[j].offset {
                self.events.swap(j - 1, j);
                j -= 1;
            }
        }
    }

    pub fn events(&self) -> &[MidiEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots left
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.events.len())
    }

    /// Count events that were refused without being pushed
    pub(crate) fn count_dropped(&mut self, count: usize) {
        self.dropped += count;
    }

    /// Events dropped since creation
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

/// List available MIDI output ports.
pub fn list_output_ports() -> Result<Vec<String>> {
    let midi_out = MidiOutput::new("modgen list outputs")?;
    let names = midi_out
        .ports()
        .iter()
        .filter_map(|p| midi_out.port_name(p).ok())
        .collect();
    Ok(names)
}

/// List available MIDI input ports.
pub fn list_input_ports() -> Result<Vec<String>> {
    let midi_in = MidiInput::new("modgen list inputs")?;
    let names = midi_in
        .ports()
        .iter()
        .filter_map(|p| midi_in.port_name(p).ok())
        .collect();
    Ok(names)
}
