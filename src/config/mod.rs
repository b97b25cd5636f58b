//! Configuration loading and validation

mod schema;

pub use schema::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a YAML file
pub fn load_config(path: &Path) -> Result<ModgenConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: ModgenConfig = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Example configuration written by `modgen init`
pub const EXAMPLE_CONFIG: &str = include_str!("../../modgen.example.yaml");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EnvelopeDestination;
    use crate::modulation::LfoShape;
    use crate::tempo::SyncMode;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(yaml: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_minimal_config() {
        let yaml = r#"
lfo:
  enabled: true
  shape: triangle
  rate_hz: 2.5

routes:
  - channel: 1
    parameter: Knob A
"#;
        let file = write_temp(yaml);
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.engine.sample_rate, 48000);
        assert_eq!(config.lfo.shape, LfoShape::Triangle);
        assert_eq!(config.lfo.rate_hz, 2.5);
        assert_eq!(config.routes.len(), 1);
    }

    #[test]
    fn test_load_empty_document() {
        let file = write_temp("{}");
        let config = load_config(file.path()).unwrap();
        assert!(!config.lfo.enabled);
        assert!(config.routes.is_empty());
    }

    #[test]
    fn test_load_rejects_invalid() {
        let yaml = r#"
routes:
  - channel: 1
    parameter: Not A Parameter
"#;
        let file = write_temp(yaml);
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("unknown parameter"));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(load_config(Path::new("/nonexistent/modgen.yaml")).is_err());
    }

    #[test]
    fn test_example_config_is_valid() {
        let config: ModgenConfig = serde_yaml::from_str(EXAMPLE_CONFIG).unwrap();
        let settings = config.engine_settings().unwrap();
        assert_eq!(config.lfo.sync, SyncMode::Free);
        assert!(settings.routes[0].is_enabled());
        assert!(matches!(
            settings.envelope_destination,
            EnvelopeDestination::Parameter { .. }
        ));
    }
}
