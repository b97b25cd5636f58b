//! Destination parameter table and value mapping
//!
//! Every modulation destination is described by a static
//! [`ParameterDescriptor`]: how it is addressed over MIDI, the integer range
//! the synth expects, and whether the range is centered.

/// Index into [`PARAMETERS`]
pub type ParamId = usize;

/// How a parameter is addressed over MIDI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Single 7-bit control change
    ControlChange(u8),
    /// 14-bit NRPN: parameter number (MSB, LSB) followed by a 14-bit value
    Nrpn { msb: u8, lsb: u8 },
}

/// Static description of a destination parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterDescriptor {
    pub name: &'static str,
    pub encoding: Encoding,
    pub min: i32,
    pub max: i32,
    /// Centered parameter (e.g. pan, envelope depth)
    pub bipolar: bool,
    /// Selectable as a direct envelope destination
    pub envelope_destination: bool,
}

impl ParameterDescriptor {
    const fn cc(name: &'static str, cc: u8, max: i32, bipolar: bool, envelope: bool) -> Self {
        Self {
            name,
            encoding: Encoding::ControlChange(cc),
            min: 0,
            max,
            bipolar,
            envelope_destination: envelope,
        }
    }

    const fn nrpn(
        name: &'static str,
        msb: u8,
        lsb: u8,
        max: i32,
        bipolar: bool,
        envelope: bool,
    ) -> Self {
        Self {
            name,
            encoding: Encoding::Nrpn { msb, lsb },
            min: 0,
            max,
            bipolar,
            envelope_destination: envelope,
        }
    }

    /// Map an LFO sample in [-1, 1] into this parameter's range
    ///
    /// Bipolar routes swing around the integer center; unipolar routes rise
    /// from the minimum. The result is always within `[min, max]`.
    pub fn map_sample(&self, sample: f64, depth: f64, bipolar: bool) -> i32 {
        let value = if bipolar {
            let center = (self.min + self.max) / 2;
            let half = (self.max - self.min) / 2;
            center + (sample * depth * half as f64).round() as i32
        } else {
            let uni = ((sample + 1.0) * 0.5).clamp(0.0, 1.0);
            self.min + (uni * depth * (self.max - self.min) as f64).round() as i32
        };
        value.clamp(self.min, self.max)
    }

    /// Map an envelope level in [0, 1] into this parameter's range
    pub fn map_level(&self, level: f64) -> i32 {
        let sample = level.clamp(0.0, 1.0) * 2.0 - 1.0;
        self.map_sample(sample, 1.0, self.bipolar)
    }
}

/// Destinations of the target synth, in selector order
pub const PARAMETERS: &[ParameterDescriptor] = &[
    // Track
    ParameterDescriptor::cc("Pattern Mute", 110, 1, false, false),
    ParameterDescriptor::cc("Track Mute", 94, 1, false, false),
    ParameterDescriptor::cc("Track Level", 95, 127, false, true),
    // Synth voice
    ParameterDescriptor::cc("Knob A", 17, 127, false, true),
    ParameterDescriptor::cc("Knob B", 18, 127, false, true),
    ParameterDescriptor::cc("Knob C", 19, 127, false, true),
    ParameterDescriptor::cc("Knob D", 20, 127, false, true),
    ParameterDescriptor::cc("Knob E", 21, 127, false, true),
    ParameterDescriptor::cc("Knob F", 22, 127, false, true),
    ParameterDescriptor::cc("Knob G", 23, 127, false, true),
    ParameterDescriptor::cc("Knob H", 24, 127, false, true),
    // Filter
    ParameterDescriptor::nrpn("Filter: Frequency", 1, 20, 16256, false, true),
    ParameterDescriptor::nrpn("Filter: Resonance", 1, 21, 16256, false, true),
    ParameterDescriptor::cc("Filter: Type", 76, 7, false, false),
    ParameterDescriptor::cc("Filter: Attack Time", 70, 127, false, false),
    ParameterDescriptor::cc("Filter: Decay Time", 71, 127, false, false),
    ParameterDescriptor::cc("Filter: Sustain Level", 72, 127, false, false),
    ParameterDescriptor::cc("Filter: Release Time", 73, 127, false, false),
    ParameterDescriptor::nrpn("Filter: Envelope Depth", 1, 23, 16256, true, true),
    ParameterDescriptor::cc("Filter: Envelope Delay", 78, 127, false, false),
    ParameterDescriptor::cc("Filter: Envelope Reset", 111, 1, false, false),
    ParameterDescriptor::cc("Filter: Base", 26, 127, false, false),
    ParameterDescriptor::cc("Filter: Width", 27, 127, false, false),
    // Amp
    ParameterDescriptor::cc("Amp: Attack Time", 79, 127, false, false),
    ParameterDescriptor::cc("Amp: Hold Time", 80, 127, false, false),
    ParameterDescriptor::cc("Amp: Decay Time", 81, 127, false, false),
    ParameterDescriptor::cc("Amp: Sustain Level", 82, 127, false, false),
    ParameterDescriptor::cc("Amp: Release Time", 83, 127, false, false),
    ParameterDescriptor::nrpn("Amp: Delay Send", 1, 28, 16256, false, true),
    ParameterDescriptor::nrpn("Amp: Reverb Send", 1, 29, 16256, false, true),
    ParameterDescriptor::cc("Amp: Pan", 10, 127, true, true),
    ParameterDescriptor::nrpn("Amp: Volume", 1, 31, 16256, false, true),
    // LFO 1
    ParameterDescriptor::nrpn("LFO 1: Speed", 1, 32, 16383, true, true),
    ParameterDescriptor::cc("LFO 1: Multiplier", 103, 23, false, false),
    ParameterDescriptor::cc("LFO 1: Fade In/Out", 104, 127, true, false),
    ParameterDescriptor::cc("LFO 1: Destination", 105, 127, false, false),
    ParameterDescriptor::cc("LFO 1: Waveform", 106, 127, false, false),
    ParameterDescriptor::cc("LFO 1: Start Phase", 107, 127, false, false),
    ParameterDescriptor::cc("LFO 1: Trig Mode", 108, 127, false, false),
    ParameterDescriptor::nrpn("LFO 1: Depth", 1, 39, 16383, true, true),
    // LFO 2
    ParameterDescriptor::nrpn("LFO 2: Speed", 1, 40, 16383, true, true),
    ParameterDescriptor::cc("LFO 2: Multiplier", 113, 23, false, false),
    ParameterDescriptor::cc("LFO 2: Fade In/Out", 114, 127, false, false),
    ParameterDescriptor::cc("LFO 2: Destination", 115, 127, false, false),
    ParameterDescriptor::cc("LFO 2: Waveform", 116, 127, false, false),
    ParameterDescriptor::cc("LFO 2: Start Phase", 117, 127, false, false),
    ParameterDescriptor::cc("LFO 2: Trig Mode", 118, 127, false, false),
    ParameterDescriptor::nrpn("LFO 2: Depth", 1, 47, 16383, true, true),
];

/// Number of entries in [`PARAMETERS`]
pub const PARAMETER_COUNT: usize = PARAMETERS.len();

/// Look up a descriptor, `None` for an unresolved index
pub fn parameter(id: ParamId) -> Option<&'static ParameterDescriptor> {
    PARAMETERS.get(id)
}

/// Resolve a parameter by its display name (case-insensitive)
pub fn find_parameter(name: &str) -> Option<ParamId> {
    PARAMETERS
        .iter()
        .position(|p| p.name.eq_ignore_ascii_case(name.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn knob() -> &'static ParameterDescriptor {
        parameter(find_parameter("Knob A").unwrap()).unwrap()
    }

    #[test]
    fn test_table_size() {
        assert_eq!(PARAMETER_COUNT, 48);
    }

    #[test]
    fn test_names_are_unique() {
        for (i, a) in PARAMETERS.iter().enumerate() {
            for b in &PARAMETERS[i + 1..] {
                assert_ne!(a.name, b.name);
            }
        }
    }

    #[test]
    fn test_find_parameter() {
        assert_eq!(find_parameter("knob a"), Some(3));
        assert_eq!(find_parameter("  Amp: Pan "), Some(30));
        assert_eq!(find_parameter("Nope"), None);
    }

    #[test]
    fn test_bipolar_zero_maps_to_center() {
        let p = knob();
        assert_eq!(p.map_sample(0.0, 1.0, true), (p.min + p.max) / 2);
        assert_eq!(p.map_sample(0.0, 1.0, true), 63);
    }

    #[test]
    fn test_bipolar_extremes() {
        let p = knob();
        assert_eq!(p.map_sample(1.0, 1.0, true), 126);
        assert_eq!(p.map_sample(-1.0, 1.0, true), 0);
    }

    #[test]
    fn test_unipolar_mapping() {
        let p = knob();
        assert_eq!(p.map_sample(-1.0, 1.0, false), 0);
        assert_eq!(p.map_sample(1.0, 1.0, false), 127);
        assert_eq!(p.map_sample(1.0, 0.5, false), 64);
    }

    #[test]
    fn test_mapping_is_clamped() {
        let p = knob();
        assert_eq!(p.map_sample(3.0, 1.0, false), 127);
        assert_eq!(p.map_sample(-3.0, 2.0, true), 0);
    }

    #[test]
    fn test_level_mapping() {
        let p = knob();
        assert_eq!(p.map_level(0.0), 0);
        assert_eq!(p.map_level(1.0), 127);

        let pan = parameter(find_parameter("Amp: Pan").unwrap()).unwrap();
        assert_eq!(pan.map_level(0.5), 63);
    }

    #[test]
    fn test_nrpn_range() {
        let f = parameter(find_parameter("Filter: Frequency").unwrap()).unwrap();
        assert_eq!(f.encoding, Encoding::Nrpn { msb: 1, lsb: 20 });
        assert_eq!(f.map_sample(1.0, 1.0, false), 16256);
    }
}
