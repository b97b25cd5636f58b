//! modgen - Real-time LFO and envelope modulation over MIDI
//!
//! Generates parameter changes for a multi-channel synthesizer: a
//! three-route LFO, an envelope that can drive a parameter or gate a
//! route, tempo sync from MIDI clock or a host, and throttled CC/NRPN
//! output at sample offsets.

pub mod config;
pub mod engine;
pub mod mapping;
pub mod modulation;
pub mod tempo;

pub use config::ModgenConfig;
pub use engine::Engine;
