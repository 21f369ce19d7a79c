use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub facebox: FaceboxConfig,
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    #[serde(default)]
    pub source: Vec<SourceConfig>,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

fn default_scan_interval_secs() -> u64 {
    10
}

impl Config {
    pub fn get_scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Settings shared by every Facebox entity of the platform.
#[derive(Debug, Deserialize, Clone)]
pub struct FaceboxConfig {
    /// `host:port` of the Facebox service.
    pub endpoint: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

pub fn default_confidence() -> f64 {
    80.0
}

fn default_timeout_secs() -> u64 {
    10
}

impl FaceboxConfig {
    pub fn get_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// One camera feeding one image processing entity.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub entity_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub still_image_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            other => Err(format!(
                "{} is not a supported minimum log level. Use `debug`, `info` or `warn`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("no current directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("FACEBOX")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    config.try_deserialize::<Config>()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
log_level: info
server:
  host: 127.0.0.1
  port: 8000
facebox:
  endpoint: 192.168.0.1:8080
source:
  - entity_id: camera.demo_camera
    still_image_url: http://192.168.0.2/snapshot.jpg
  - entity_id: camera.front_door
    name: Front door
    still_image_url: http://192.168.0.3/snapshot.jpg
"#;

    fn parse(yaml: &str) -> Result<Config, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()?
            .try_deserialize::<Config>()
    }

    #[test]
    fn test_defaults_are_applied() {
        let config = parse(BASE).unwrap();

        assert_eq!(config.facebox.confidence, 80.0);
        assert_eq!(config.facebox.get_timeout(), Duration::from_secs(10));
        assert_eq!(config.get_scan_interval(), Duration::from_secs(10));
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.server.get_address(), "127.0.0.1:8000");
    }

    #[test]
    fn test_sources_keep_optional_name() {
        let config = parse(BASE).unwrap();

        assert_eq!(config.source.len(), 2);
        assert_eq!(config.source[0].name, None);
        assert_eq!(config.source[1].name.as_deref(), Some("Front door"));
    }

    #[test]
    fn test_rejects_unknown_log_level() {
        let yaml = BASE.replace("log_level: info", "log_level: trace");
        assert!(parse(&yaml).is_err());
    }

    #[test]
    fn test_environment_parsing() {
        assert!(matches!(
            Environment::try_from("Production".to_string()),
            Ok(Environment::Production)
        ));
        assert!(Environment::try_from("staging".to_string()).is_err());
    }
}
