use std::fmt;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("failed to read config {path}: {source}"))]
    Read { path: String, source: io::Error },
    #[snafu(display("failed to parse config {path}: {source}"))]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[snafu(display("failed to resolve the system hostname: {source}"))]
    Hostname { source: io::Error },
}

/// Settings shared by every component.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Common {
    /// Stamped into events as the `host` field. Defaults to the system
    /// hostname.
    #[serde(default)]
    pub hostname: String,
}

/// One undecoded component section. Factories decode it into their own
/// typed config, so unknown component types surface as registry errors and
/// unknown keys as per-plugin decode errors.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct ConfigRaw(pub serde_yaml::Mapping);

impl ConfigRaw {
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(serde_yaml::Value::String(value)) => Some(value),
            _ => None,
        }
    }

    /// The component's `type` key, required on every section.
    pub fn type_name(&self) -> crate::Result<&str> {
        self.get_str("type")
            .ok_or_else(|| "component section is missing 'type'".into())
    }

    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_yaml::Error> {
        serde_yaml::from_value(serde_yaml::Value::Mapping(self.0.clone()))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub common: Common,
    #[serde(default, rename = "input")]
    pub inputs: Vec<ConfigRaw>,
    #[serde(default, rename = "filter")]
    pub filters: Vec<ConfigRaw>,
    #[serde(default, rename = "output")]
    pub outputs: Vec<ConfigRaw>,
}

pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).context(ReadSnafu {
        path: display.clone(),
    })?;
    let mut config: Config = serde_yaml::from_str(&raw).context(ParseSnafu {
        path: display.clone(),
    })?;
    if config.common.hostname.is_empty() {
        config.common.hostname = hostname::get()
            .context(HostnameSnafu)?
            .to_string_lossy()
            .into_owned();
    }
    Ok(config)
}

/// A byte count accepting bare numbers or `k`/`K`/`m`/`M` suffixed strings
/// ("64k", "1M").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSize(pub usize);

impl ByteSize {
    pub fn parse(value: &str) -> Result<ByteSize, String> {
        let value = value.trim();
        let (digits, multiplier) = match value.char_indices().last() {
            Some((at, 'k')) | Some((at, 'K')) => (&value[..at], 1024),
            Some((at, 'm')) | Some((at, 'M')) => (&value[..at], 1024 * 1024),
            Some((_, c)) if c.is_ascii_digit() => (value, 1),
            _ => return Err(format!("invalid size '{value}'")),
        };
        digits
            .trim()
            .parse::<usize>()
            .map(|n| ByteSize(n * multiplier))
            .map_err(|_| format!("invalid size '{value}'"))
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ByteSizeVisitor;

        impl Visitor<'_> for ByteSizeVisitor {
            type Value = ByteSize;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a byte count, optionally suffixed with k or M")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<ByteSize, E> {
                Ok(ByteSize(value as usize))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<ByteSize, E> {
                ByteSize::parse(value).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_any(ByteSizeVisitor)
    }
}

/// Deserialize a duration from a humantime string ("1s", "500ms") or a bare
/// number of seconds.
pub fn duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    struct DurationVisitor;

    impl Visitor<'_> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a duration string like '1s' or a number of seconds")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Duration, E> {
            Ok(Duration::from_secs(value))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Duration, E> {
            humantime::parse_duration(value).map_err(de::Error::custom)
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}

#[cfg(test)]
mod tests {
    use super::{ByteSize, Config};

    #[test]
    fn parses_a_full_document() {
        let raw = r#"
common:
  hostname: localhost
input:
  - type: file
    path: "/var/log/*.log"
    interval: 5s
filter:
  - type: add_field
    fields:
      dc: east
output:
  - type: stdout
"#;
        let config: Config = serde_yaml::from_str(raw).unwrap();
        assert_eq!(config.common.hostname, "localhost");
        assert_eq!(config.inputs.len(), 1);
        assert_eq!(config.inputs[0].type_name().unwrap(), "file");
        assert_eq!(config.inputs[0].get_str("path"), Some("/var/log/*.log"));
        assert_eq!(config.filters.len(), 1);
        assert_eq!(config.outputs.len(), 1);
    }

    #[test]
    fn missing_type_is_an_error() {
        let config: Config = serde_yaml::from_str("input:\n  - path: x\n").unwrap();
        assert!(config.inputs[0].type_name().is_err());
    }

    #[test]
    fn byte_sizes() {
        assert_eq!(ByteSize::parse("4096"), Ok(ByteSize(4096)));
        assert_eq!(ByteSize::parse("64k"), Ok(ByteSize(64 * 1024)));
        assert_eq!(ByteSize::parse("12K"), Ok(ByteSize(12 * 1024)));
        assert_eq!(ByteSize::parse("1M"), Ok(ByteSize(1024 * 1024)));
        assert!(ByteSize::parse("ten").is_err());
        assert!(ByteSize::parse("10g").is_err());
        assert!(ByteSize::parse("").is_err());
    }

    #[test]
    fn durations() {
        #[derive(serde::Deserialize)]
        struct Wrapper {
            #[serde(deserialize_with = "super::duration")]
            interval: std::time::Duration,
        }
        let w: Wrapper = serde_yaml::from_str("interval: 500ms").unwrap();
        assert_eq!(w.interval, std::time::Duration::from_millis(500));
        let w: Wrapper = serde_yaml::from_str("interval: 2").unwrap();
        assert_eq!(w.interval, std::time::Duration::from_secs(2));
        assert!(serde_yaml::from_str::<Wrapper>("interval: soon").is_err());
    }
}
