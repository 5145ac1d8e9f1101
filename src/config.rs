//! Link configuration
//!
//! A small TOML document naming the transport to use and the parameter
//! defaults to apply when its descriptor leaves something out:
//!
//! ```toml
//! descriptor = "tcp:scope.lab.local:5025"
//! timeout_secs = 2.0
//!
//! [defaults]
//! baudrate = 115200
//! connect_timeout = 3.0
//! ```
//!
//! `defaults` may mix parameters of several interfaces; entries that do not
//! apply to the chosen interface are ignored.

use crate::descriptor::Defaults;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Transport selection and parameter defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Descriptor used when none is given on the command line
    pub descriptor: Option<String>,
    /// Timeout for read operations, in seconds
    pub timeout_secs: Option<f64>,
    /// Parameter defaults, keyed by parameter name
    pub defaults: Defaults,
}

impl LinkConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Read timeout, if one is configured and usable
    pub fn timeout(&self) -> Option<Duration> {
        let secs = self.timeout_secs?;
        match Duration::try_from_secs_f64(secs) {
            Ok(d) => Some(d),
            Err(e) => {
                warn!(timeout_secs = secs, "Ignoring configured timeout: {}", e);
                None
            }
        }
    }

    /// Defaults to hand to the factory, `None` when the table is empty
    pub fn defaults(&self) -> Option<&Defaults> {
        (!self.defaults.is_empty()).then_some(&self.defaults)
    }

    /// Pick the command-line descriptor over the configured one
    pub fn descriptor<'a>(&'a self, explicit: Option<&'a str>) -> Option<&'a str> {
        explicit.or(self.descriptor.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ParamValue;

    #[test]
    fn test_config_empty_file() {
        let config = LinkConfig::from_toml_str("").unwrap();
        assert_eq!(config, LinkConfig::default());
        assert!(config.defaults().is_none());
        assert!(config.timeout().is_none());
    }

    #[test]
    fn test_config_typed_defaults() {
        let config = LinkConfig::from_toml_str(
            r#"
descriptor = "serial:/dev/ttyUSB0"
timeout_secs = 0.5

[defaults]
baudrate = 115200
parity = "E"
rtscts = true
connect_timeout = 2.5
"#,
        )
        .unwrap();

        assert_eq!(config.descriptor(None), Some("serial:/dev/ttyUSB0"));
        assert_eq!(config.descriptor(Some("tcp:h:1")), Some("tcp:h:1"));
        assert_eq!(config.timeout(), Some(Duration::from_millis(500)));

        let defaults = config.defaults().unwrap();
        assert_eq!(defaults["baudrate"], ParamValue::Int(115200));
        assert_eq!(defaults["parity"], ParamValue::Str("E".into()));
        assert_eq!(defaults["rtscts"], ParamValue::Bool(true));
        assert_eq!(defaults["connect_timeout"], ParamValue::Float(2.5));
    }

    #[test]
    fn test_config_negative_timeout_ignored() {
        let config = LinkConfig::from_toml_str("timeout_secs = -1.0").unwrap();
        assert!(config.timeout().is_none());
    }

    #[test]
    fn test_config_serialize_deserialize_roundtrip() {
        let mut config = LinkConfig {
            descriptor: Some("vxi11:10.1.2.3".into()),
            timeout_secs: Some(4.0),
            ..Default::default()
        };
        config.defaults.insert("name".into(), ParamValue::Str("gpib0,5".into()));
        config.defaults.insert("port".into(), ParamValue::Int(5025));

        let toml_str = config.to_toml_string().unwrap();
        let restored = LinkConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(restored, config);
    }

    #[test]
    fn test_config_rejects_wrong_shape() {
        assert!(LinkConfig::from_toml_str("defaults = 3").is_err());
    }
}
