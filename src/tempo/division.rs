//! Tempo sync modes and note divisions

use serde::{Deserialize, Serialize};

use super::clock::is_usable_bpm;

/// Where the LFO rate comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Rate in Hz as configured
    #[default]
    Free,
    /// Rate derived from host or MIDI clock tempo
    Synced,
}

/// One LFO cycle per note value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDivision {
    Whole,
    Half,
    #[default]
    Quarter,
    Eighth,
    Sixteenth,
    ThirtySecond,
    DottedEighth,
    DottedSixteenth,
}

impl SyncDivision {
    pub const ALL: [SyncDivision; 8] = [
        SyncDivision::Whole,
        SyncDivision::Half,
        SyncDivision::Quarter,
        SyncDivision::Eighth,
        SyncDivision::Sixteenth,
        SyncDivision::ThirtySecond,
        SyncDivision::DottedEighth,
        SyncDivision::DottedSixteenth,
    ];

    /// Cycles per quarter-note beat
    pub fn multiplier(self) -> f64 {
        match self {
            SyncDivision::Whole => 0.25,
            SyncDivision::Half => 0.5,
            SyncDivision::Quarter => 1.0,
            SyncDivision::Eighth => 2.0,
            SyncDivision::Sixteenth => 4.0,
            SyncDivision::ThirtySecond => 8.0,
            SyncDivision::DottedEighth => 2.0 / 1.5,
            SyncDivision::DottedSixteenth => 4.0 / 1.5,
        }
    }

    /// LFO rate in Hz for a tempo
    pub fn bpm_to_hz(self, bpm: f64) -> f64 {
        (bpm / 60.0) * self.multiplier()
    }

    pub fn label(self) -> &'static str {
        match self {
            SyncDivision::Whole => "1/1",
            SyncDivision::Half => "1/2",
            SyncDivision::Quarter => "1/4",
            SyncDivision::Eighth => "1/8",
            SyncDivision::Sixteenth => "1/16",
            SyncDivision::ThirtySecond => "1/32",
            SyncDivision::DottedEighth => "1/8 dotted",
            SyncDivision::DottedSixteenth => "1/16 dotted",
        }
    }
}

/// Effective LFO rate
///
/// Synced mode with a usable tempo overrides the free rate; otherwise the
/// free rate is kept.
pub fn effective_rate(
    free_hz: f64,
    mode: SyncMode,
    division: SyncDivision,
    bpm: Option<f64>,
) -> f64 {
    match (mode, bpm) {
        (SyncMode::Synced, Some(bpm)) if is_usable_bpm(bpm) => division.bpm_to_hz(bpm),
        _ => free_hz,
    }
}
