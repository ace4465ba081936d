use std::str::FromStr;
use std::time;

use envconfig::Envconfig;
use thiserror::Error;

use crate::connect::ConnectPolicy;
use crate::engine::Endpoint;
use crate::labels::{InstanceId, LabelConfig, LabelError};

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3305")]
    pub port: u16,

    // Identifies this janitor among its peers on the same engine. Scopes the startup cleanup.
    pub instance_id: NonEmptyString,

    // Unset means the platform default: DOCKER_HOST, or the local socket.
    pub engine_uri: Option<String>,

    #[envconfig(default = "120")]
    pub engine_timeout_secs: u64,

    #[envconfig(default = "90")]
    pub startup_delay_secs: u64,

    #[envconfig(default = "10")]
    pub connect_max_retries: u32,

    #[envconfig(default = "1000")]
    pub liveness_interval_ms: EnvMsDuration,

    #[envconfig(default = "30")]
    pub liveness_deadline_secs: u64,

    #[envconfig(default = "120")]
    pub shutdown_timeout_secs: u64,

    // Request shutdown on our own after this many seconds. Unset means run until signalled.
    pub max_lifetime_secs: Option<u64>,

    #[envconfig(default = "false")]
    pub include_stopped: bool,

    #[envconfig(nested = true)]
    pub labels: LabelKeysConfig,
}

#[derive(Envconfig, Clone)]
pub struct LabelKeysConfig {
    #[envconfig(default = "de.kenbi.dockertools")]
    pub tooling_label: String,

    #[envconfig(default = "de.kenbi.dockertools.instance")]
    pub instance_label: String,

    #[envconfig(default = "de.kenbi.dockertools.valkyrie")]
    pub self_label: String,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error(transparent)]
    Labels(#[from] LabelError),
    #[error("liveness interval must be greater than zero")]
    ZeroLivenessInterval,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_timeout(&self) -> time::Duration {
        time::Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn max_lifetime(&self) -> Option<time::Duration> {
        self.max_lifetime_secs.map(time::Duration::from_secs)
    }

    pub fn liveness_deadline(&self) -> time::Duration {
        time::Duration::from_secs(self.liveness_deadline_secs)
    }

    pub fn get_janitor_settings(&self) -> Result<JanitorSettings, ConfigError> {
        if self.liveness_interval_ms.0.is_zero() {
            return Err(ConfigError::ZeroLivenessInterval);
        }

        Ok(JanitorSettings {
            instance_id: InstanceId::new(self.instance_id.as_str())?,
            endpoint: Endpoint::from_override(self.engine_uri.as_deref()),
            labels: LabelConfig::new(
                &self.labels.tooling_label,
                &self.labels.instance_label,
                &self.labels.self_label,
            )?,
            connect: ConnectPolicy {
                settle_delay: time::Duration::from_secs(self.startup_delay_secs),
                max_retries: self.connect_max_retries,
            },
            liveness_interval: self.liveness_interval_ms.0,
            include_stopped: self.include_stopped,
        })
    }
}

/// Everything the janitor's run needs, fixed for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct JanitorSettings {
    pub instance_id: InstanceId,
    pub endpoint: Endpoint,
    pub labels: LabelConfig,
    pub connect: ConnectPolicy,
    pub liveness_interval: time::Duration,
    pub include_stopped: bool,
}

impl JanitorSettings {
    pub fn new(instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            endpoint: Endpoint::PlatformDefault,
            labels: LabelConfig::default(),
            connect: ConnectPolicy::default(),
            liveness_interval: time::Duration::from_secs(1),
            include_stopped: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::init_from_hashmap(&env(&[("INSTANCE_ID", "abc123")]))
            .expect("config with only an instance id");
        let settings = config.get_janitor_settings().unwrap();

        assert_eq!(config.bind(), "0.0.0.0:3305");
        assert_eq!(settings.instance_id.as_str(), "abc123");
        assert_eq!(settings.endpoint, Endpoint::PlatformDefault);
        assert_eq!(settings.connect.settle_delay, time::Duration::from_secs(90));
        assert_eq!(settings.connect.max_attempts(), 11);
        assert_eq!(settings.liveness_interval, time::Duration::from_secs(1));
        assert_eq!(settings.labels, LabelConfig::default());
        assert_eq!(config.shutdown_timeout(), time::Duration::from_secs(120));
        assert_eq!(config.max_lifetime(), None);
        assert!(!settings.include_stopped);
    }

    #[test]
    fn test_instance_id_is_required() {
        assert!(Config::init_from_hashmap(&env(&[])).is_err());
        assert!(Config::init_from_hashmap(&env(&[("INSTANCE_ID", "")])).is_err());
    }

    #[test]
    fn test_overrides() {
        let config = Config::init_from_hashmap(&env(&[
            ("INSTANCE_ID", "abc123"),
            ("ENGINE_URI", "unix:///run/user/1000/docker.sock"),
            ("STARTUP_DELAY_SECS", "0"),
            ("CONNECT_MAX_RETRIES", "3"),
            ("LIVENESS_INTERVAL_MS", "250"),
            ("MAX_LIFETIME_SECS", "120"),
            ("INCLUDE_STOPPED", "true"),
        ]))
        .unwrap();
        let settings = config.get_janitor_settings().unwrap();

        assert_eq!(
            settings.endpoint,
            Endpoint::Uri("unix:///run/user/1000/docker.sock".to_owned())
        );
        assert!(settings.connect.settle_delay.is_zero());
        assert_eq!(settings.connect.max_attempts(), 4);
        assert_eq!(settings.liveness_interval, time::Duration::from_millis(250));
        assert_eq!(config.max_lifetime(), Some(time::Duration::from_secs(120)));
        assert!(settings.include_stopped);
    }

    #[test]
    fn test_rejects_overlapping_labels() {
        let config = Config::init_from_hashmap(&env(&[
            ("INSTANCE_ID", "abc123"),
            ("SELF_LABEL", "de.kenbi.dockertools"),
        ]))
        .unwrap();

        assert_eq!(
            config.get_janitor_settings().unwrap_err(),
            ConfigError::Labels(LabelError::OverlappingSelfLabel(
                "de.kenbi.dockertools".to_owned()
            ))
        );
    }

    #[test]
    fn test_rejects_zero_liveness_interval() {
        let config = Config::init_from_hashmap(&env(&[
            ("INSTANCE_ID", "abc123"),
            ("LIVENESS_INTERVAL_MS", "0"),
        ]))
        .unwrap();

        assert_eq!(
            config.get_janitor_settings().unwrap_err(),
            ConfigError::ZeroLivenessInterval
        );
    }
}
