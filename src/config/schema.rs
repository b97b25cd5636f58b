//! Configuration schema definitions

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::{
    ControlSurface, EngineSettings, EnvelopeDestination, ThrottleSettings, TriggerSettings,
    MAX_RATE_HZ, MIN_RATE_HZ,
};
use crate::mapping::{find_parameter, parameter, CurveShape, ParamId};
use crate::modulation::{AttackMode, EnvelopeSettings, LfoShape, RouteSettings, MAX_ROUTES};
use crate::tempo::{SyncDivision, SyncMode};

/// Configuration validation failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Sample rate must be between 8000 and 192000, got {0}")]
    SampleRate(u32),
    #[error("Block size must be between 16 and 8192, got {0}")]
    BlockSize(usize),
    #[error(
        "LFO rate must be between {min} and {max} Hz, got {0}",
        min = MIN_RATE_HZ,
        max = MAX_RATE_HZ
    )]
    Rate(f64),
    #[error("{name} must be between 0.0 and 1.0, got {value}")]
    OutOfUnitRange { name: &'static str, value: f64 },
    #[error("{name} must not be negative, got {value}")]
    Negative { name: &'static str, value: f64 },
    #[error("At most {max} routes are supported, got {got}")]
    TooManyRoutes { max: usize, got: usize },
    #[error("{context}: MIDI channel must be 0-16, got {channel}")]
    Channel { context: String, channel: u8 },
    #[error("{context}: unknown parameter '{name}'")]
    UnknownParameter { context: String, name: String },
    #[error("Envelope: '{0}' cannot be an envelope destination")]
    NotEnvelopeDestination(String),
    #[error("Envelope: route {0} does not exist (1-{max})", max = MAX_ROUTES)]
    UnknownRoute(usize),
}

/// Main configuration for modgen
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModgenConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    /// MIDI ports
    #[serde(default)]
    pub midi: MidiConfig,

    #[serde(default)]
    pub lfo: LfoConfig,

    /// Note and transport triggering
    #[serde(default)]
    pub trigger: TriggerConfig,

    /// LFO routes, at most three
    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    #[serde(default)]
    pub envelope: EnvelopeConfig,

    /// Outbound rate limiting
    #[serde(default)]
    pub throttle: ThrottleConfig,
}

fn check_unit(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::OutOfUnitRange { name, value });
    }
    Ok(())
}

fn check_non_negative(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_nan() || value < 0.0 {
        return Err(ConfigError::Negative { name, value });
    }
    Ok(())
}

fn check_channel(context: &str, channel: u8) -> Result<(), ConfigError> {
    if channel > 16 {
        return Err(ConfigError::Channel {
            context: context.to_string(),
            channel,
        });
    }
    Ok(())
}

fn resolve_parameter(context: &str, name: &str) -> Result<ParamId, ConfigError> {
    find_parameter(name).ok_or_else(|| ConfigError::UnknownParameter {
        context: context.to_string(),
        name: name.to_string(),
    })
}

impl ModgenConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.sample_rate < 8000 || self.engine.sample_rate > 192000 {
            return Err(ConfigError::SampleRate(self.engine.sample_rate));
        }
        if self.engine.block_size < 16 || self.engine.block_size > 8192 {
            return Err(ConfigError::BlockSize(self.engine.block_size));
        }

        if !(MIN_RATE_HZ..=MAX_RATE_HZ).contains(&self.lfo.rate_hz) {
            return Err(ConfigError::Rate(self.lfo.rate_hz));
        }
        check_unit("LFO depth", self.lfo.depth)?;

        check_channel("trigger", self.trigger.note_source_channel)?;

        if self.routes.len() > MAX_ROUTES {
            return Err(ConfigError::TooManyRoutes {
                max: MAX_ROUTES,
                got: self.routes.len(),
            });
        }
        for (i, route) in self.routes.iter().enumerate() {
            let context = format!("Route {}", i + 1);
            check_channel(&context, route.channel)?;
            resolve_parameter(&context, &route.parameter)?;
        }

        let env = &self.envelope;
        check_channel("envelope", env.note_source_channel)?;
        check_non_negative("Envelope attack", env.attack)?;
        check_non_negative("Envelope hold", env.hold)?;
        check_non_negative("Envelope decay", env.decay)?;
        check_non_negative("Envelope release", env.release)?;
        check_unit("Envelope sustain", env.sustain)?;
        check_unit("Envelope velocity amount", env.velocity_amount)?;

        match &env.destination {
            Some(EnvelopeTarget::Parameter { parameter: name, channel }) => {
                check_channel("envelope destination", *channel)?;
                let id = resolve_parameter("envelope destination", name)?;
                let eligible = parameter(id).map(|p| p.envelope_destination).unwrap_or(false);
                if !eligible {
                    return Err(ConfigError::NotEnvelopeDestination(name.clone()));
                }
            }
            Some(EnvelopeTarget::Route { route }) => {
                if *route == 0 || *route > MAX_ROUTES {
                    return Err(ConfigError::UnknownRoute(*route));
                }
            }
            None => {}
        }

        check_non_negative("Throttle interval", self.throttle.min_interval_ms)?;
        if self.throttle.change_threshold < 0 {
            return Err(ConfigError::Negative {
                name: "Throttle change threshold",
                value: self.throttle.change_threshold as f64,
            });
        }

        Ok(())
    }

    /// Build the engine's settings, validating first
    pub fn engine_settings(&self) -> Result<EngineSettings, ConfigError> {
        self.validate()?;

        let mut routes = [RouteSettings::default(); MAX_ROUTES];
        for (slot, route) in routes.iter_mut().zip(&self.routes) {
            *slot = RouteSettings {
                channel: route.channel,
                parameter: find_parameter(&route.parameter),
                bipolar: route.bipolar,
                invert: route.invert,
                one_shot: route.one_shot,
            };
        }

        let env = &self.envelope;
        let envelope_destination = match &env.destination {
            Some(EnvelopeTarget::Parameter {
                parameter: name,
                channel,
            }) => match find_parameter(name) {
                Some(id) => EnvelopeDestination::Parameter {
                    channel: *channel,
                    parameter: id,
                },
                None => EnvelopeDestination::None,
            },
            Some(EnvelopeTarget::Route { route }) => EnvelopeDestination::Route(route - 1),
            None => EnvelopeDestination::None,
        };

        Ok(EngineSettings {
            sample_rate: self.engine.sample_rate as f64,
            shape: self.lfo.shape,
            sync: self.lfo.sync,
            division: self.lfo.division,
            routes,
            trigger: TriggerSettings {
                note_restart: self.trigger.note_restart,
                note_source_channel: self.trigger.note_source_channel,
                note_off_stop: self.trigger.note_off_stop,
                transport_auto_start: self.trigger.transport_auto_start,
            },
            envelope: EnvelopeSettings {
                enabled: env.enabled,
                attack: env.attack,
                hold: env.hold,
                decay: env.decay,
                sustain: env.sustain,
                release: env.release,
                velocity_amount: env.velocity_amount,
                attack_mode: env.attack_mode,
                release_long: env.release_long,
                decay_curve: env.decay_curve,
                release_curve: env.release_curve,
            },
            envelope_source_channel: env.note_source_channel,
            envelope_destination,
            throttle: ThrottleSettings {
                change_threshold: self.throttle.change_threshold,
                min_interval_ms: self.throttle.min_interval_ms,
            },
        })
    }

    /// Initial control surface state from the LFO section
    pub fn control_surface(&self) -> ControlSurface {
        ControlSurface::new(self.lfo.enabled, self.lfo.rate_hz, self.lfo.depth)
    }
}

/// Engine timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Sample rate in Hz (default: 48000)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Samples per processing block (default: 256)
    #[serde(default = "default_block_size")]
    pub block_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            block_size: default_block_size(),
        }
    }
}

fn default_sample_rate() -> u32 { 48000 }
fn default_block_size() -> usize { 256 }

/// MIDI port selection (substrings of port names)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MidiConfig {
    /// Input port (None = no input)
    pub input: Option<String>,

    /// Output port (None = first available)
    pub output: Option<String>,
}

/// LFO settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LfoConfig {
    /// Run from startup
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub shape: LfoShape,

    /// Free-running rate in Hz (default: 1.0)
    #[serde(default = "default_rate")]
    pub rate_hz: f64,

    /// Depth 0.0-1.0 (default: 1.0)
    #[serde(default = "default_depth")]
    pub depth: f64,

    #[serde(default)]
    pub sync: SyncMode,

    /// Note value per cycle when synced
    #[serde(default)]
    pub division: SyncDivision,
}

impl Default for LfoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            shape: LfoShape::default(),
            rate_hz: default_rate(),
            depth: default_depth(),
            sync: SyncMode::default(),
            division: SyncDivision::default(),
        }
    }
}

fn default_rate() -> f64 { 1.0 }
fn default_depth() -> f64 { 1.0 }

/// Trigger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Restart and run the LFO on note-on
    #[serde(default)]
    pub note_restart: bool,

    /// Channel 1-16 for note triggers, 0 = any
    #[serde(default)]
    pub note_source_channel: u8,

    /// Stop the LFO on note-off
    #[serde(default)]
    pub note_off_stop: bool,

    /// Run the LFO on transport start (default: true)
    #[serde(default = "default_true")]
    pub transport_auto_start: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            note_restart: false,
            note_source_channel: 0,
            note_off_stop: false,
            transport_auto_start: true,
        }
    }
}

fn default_true() -> bool { true }

/// One LFO route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// MIDI channel 1-16, 0 = disabled
    pub channel: u8,

    /// Parameter name from the parameter table
    pub parameter: String,

    #[serde(default)]
    pub bipolar: bool,

    #[serde(default)]
    pub invert: bool,

    #[serde(default)]
    pub one_shot: bool,
}

/// Where the envelope is sent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvelopeTarget {
    /// Straight to a parameter
    Parameter { parameter: String, channel: u8 },
    /// Gate an LFO route (1-3)
    Route { route: usize },
}

/// Envelope settings (times in seconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Channel 1-16 for note triggers, 0 = any
    #[serde(default)]
    pub note_source_channel: u8,

    #[serde(default = "default_attack")]
    pub attack: f64,

    #[serde(default)]
    pub hold: f64,

    #[serde(default = "default_decay")]
    pub decay: f64,

    #[serde(default = "default_sustain")]
    pub sustain: f64,

    #[serde(default = "default_release")]
    pub release: f64,

    /// How much velocity scales the peak, 0.0-1.0
    #[serde(default)]
    pub velocity_amount: f64,

    #[serde(default)]
    pub attack_mode: AttackMode,

    /// Triple the release time
    #[serde(default)]
    pub release_long: bool,

    #[serde(default)]
    pub decay_curve: CurveShape,

    #[serde(default)]
    pub release_curve: CurveShape,

    pub destination: Option<EnvelopeTarget>,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            note_source_channel: 0,
            attack: default_attack(),
            hold: 0.0,
            decay: default_decay(),
            sustain: default_sustain(),
            release: default_release(),
            velocity_amount: 0.0,
            attack_mode: AttackMode::default(),
            release_long: false,
            decay_curve: CurveShape::default(),
            release_curve: CurveShape::default(),
            destination: None,
        }
    }
}

fn default_attack() -> f64 { 0.01 }
fn default_decay() -> f64 { 0.2 }
fn default_sustain() -> f64 { 0.7 }
fn default_release() -> f64 { 0.2 }

/// Throttle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Minimum value change between sends (default: 1)
    #[serde(default = "default_threshold")]
    pub change_threshold: i32,

    /// Minimum milliseconds between sends (default: 10)
    #[serde(default = "default_interval")]
    pub min_interval_ms: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            change_threshold: default_threshold(),
            min_interval_ms: default_interval(),
        }
    }
}

fn default_threshold() -> i32 { 1 }
fn default_interval() -> f64 { 10.0 }

#[cfg(test)]
mod tests {
    use super::*;

    fn route(channel: u8, parameter: &str) -> RouteConfig {
        RouteConfig {
            channel,
            parameter: parameter.to_string(),
            bipolar: false,
            invert: false,
            one_shot: false,
        }
    }

    #[test]
    fn test_default_engine_config() {
        let yaml = "sample_rate: 44100";
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.block_size, 256); // default
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ModgenConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.trigger.transport_auto_start);
        assert_eq!(config.throttle.change_threshold, 1);
        assert_eq!(config.throttle.min_interval_ms, 10.0);
    }

    #[test]
    fn test_route_config() {
        let yaml = r#"
channel: 2
parameter: "Filter: Frequency"
bipolar: true
"#;
        let config: RouteConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.channel, 2);
        assert!(config.bipolar);
        assert!(!config.one_shot);
    }

    #[test]
    fn test_envelope_targets() {
        let target: EnvelopeTarget =
            serde_yaml::from_str("{ parameter: Knob A, channel: 3 }").unwrap();
        assert_eq!(
            target,
            EnvelopeTarget::Parameter {
                parameter: "Knob A".to_string(),
                channel: 3
            }
        );
        let target: EnvelopeTarget = serde_yaml::from_str("{ route: 2 }").unwrap();
        assert_eq!(target, EnvelopeTarget::Route { route: 2 });
    }

    #[test]
    fn test_unknown_parameter() {
        let config = ModgenConfig {
            routes: vec![route(1, "Knob Z")],
            ..ModgenConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnknownParameter {
                context: "Route 1".to_string(),
                name: "Knob Z".to_string()
            })
        );
    }

    #[test]
    fn test_too_many_routes() {
        let config = ModgenConfig {
            routes: vec![route(1, "Knob A"); 4],
            ..ModgenConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::TooManyRoutes { max: 3, got: 4 }));
    }

    #[test]
    fn test_channel_range() {
        let config = ModgenConfig {
            routes: vec![route(17, "Knob A")],
            ..ModgenConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Channel { channel: 17, .. })));
    }

    #[test]
    fn test_rate_range() {
        let mut config = ModgenConfig::default();
        config.lfo.rate_hz = 50.0;
        assert_eq!(config.validate(), Err(ConfigError::Rate(50.0)));
        config.lfo.rate_hz = 0.005;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_envelope_destination_eligibility() {
        let mut config = ModgenConfig::default();
        config.envelope.destination = Some(EnvelopeTarget::Parameter {
            parameter: "Filter: Type".to_string(),
            channel: 1,
        });
        assert_eq!(
            config.validate(),
            Err(ConfigError::NotEnvelopeDestination("Filter: Type".to_string()))
        );

        config.envelope.destination = Some(EnvelopeTarget::Route { route: 4 });
        assert_eq!(config.validate(), Err(ConfigError::UnknownRoute(4)));
    }

    #[test]
    fn test_engine_settings() {
        let mut config = ModgenConfig {
            routes: vec![route(1, "Knob A"), route(0, "Amp: Pan")],
            ..ModgenConfig::default()
        };
        config.routes[1].bipolar = true;
        config.envelope.enabled = true;
        config.envelope.destination = Some(EnvelopeTarget::Route { route: 1 });

        let settings = config.engine_settings().unwrap();
        assert_eq!(settings.sample_rate, 48000.0);
        assert_eq!(settings.routes[0].parameter, Some(3));
        assert_eq!(settings.routes[1].parameter, Some(30));
        assert!(settings.routes[1].bipolar);
        assert!(!settings.routes[2].is_enabled());
        assert_eq!(settings.envelope_destination, EnvelopeDestination::Route(0));
        assert!(settings.envelope.enabled);
    }

    #[test]
    fn test_control_surface_from_config() {
        let mut config = ModgenConfig::default();
        config.lfo.enabled = true;
        config.lfo.rate_hz = 3.0;
        let control = config.control_surface();
        assert!(control.is_enabled());
        assert_eq!(control.rate_hz(), 3.0);
    }
}
