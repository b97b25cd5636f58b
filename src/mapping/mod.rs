//! Mapping from normalized modulation values to synth parameters
//!
//! Holds the destination table, the integer range mapping, and the progress
//! curves used by envelope segments.

mod curve;
mod parameter;

pub use curve::CurveShape;
pub use parameter::{
    find_parameter, parameter, Encoding, ParamId, ParameterDescriptor, PARAMETERS,
    PARAMETER_COUNT,
};
