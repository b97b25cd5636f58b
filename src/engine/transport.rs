//! Host transport query

use crate::tempo::is_usable_bpm;

/// Tempo and play state reported by a host
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TransportInfo {
    /// Tempo if the host knows it
    pub bpm: Option<f64>,
    pub playing: bool,
}

impl TransportInfo {
    /// Tempo if it is finite and inside the accepted range
    pub fn valid_bpm(&self) -> Option<f64> {
        self.bpm.filter(|&bpm| is_usable_bpm(bpm))
    }
}

/// Optional collaborator providing host tempo and play state
///
/// When present and reporting a valid tempo it takes precedence over
/// inbound MIDI clock.
pub trait HostTransport: Send {
    fn query(&self) -> Option<TransportInfo>;
}

/// Transport with a constant state, used for offline rendering
#[derive(Debug, Clone, Copy)]
pub struct FixedTransport {
    info: TransportInfo,
}

impl FixedTransport {
    pub fn new(bpm: f64, playing: bool) -> Self {
        Self {
            info: TransportInfo {
                bpm: Some(bpm),
                playing,
            },
        }
    }
}

impl HostTransport for FixedTransport {
    fn query(&self) -> Option<TransportInfo> {
        Some(self.info)
    }
}
