use std::str::FromStr;
use std::time;

use envconfig::Envconfig;
use proxy_drain::retry::RetryPolicy;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3310")]
    pub port: u16,

    #[envconfig(from = "AGENT_CHECK_HOST", default = "0.0.0.0")]
    pub agent_check_host: String,

    #[envconfig(from = "AGENT_CHECK_PORT", default = "7331")]
    pub agent_check_port: u16,

    #[envconfig(from = "AGENT_CHECK_TIMEOUT", default = "5000")]
    pub agent_check_timeout: EnvMsDuration,

    #[envconfig(from = "PROXY_GROUP", default = "Proxy")]
    pub proxy_group: NonEmptyString,

    #[envconfig(from = "DEFAULT_MAX_PLAYERS", default = "0")]
    pub default_max_players: u32,

    #[envconfig(from = "ORCHESTRATOR_URL", default = "http://localhost:2812")]
    pub orchestrator_url: String,

    #[envconfig(from = "REQUEST_TIMEOUT", default = "5000")]
    pub request_timeout: EnvMsDuration,

    #[envconfig(nested = true)]
    pub retry_policy: RetryPolicyConfig,

    #[envconfig(from = "EXPORT_PROMETHEUS", default = "true")]
    pub export_prometheus: bool,
}

impl Config {
    /// Produce a host:port address for binding the event and admin API.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Produce a host:port address for binding the agent-check listener.
    pub fn agent_check_bind(&self) -> String {
        format!("{}:{}", self.agent_check_host, self.agent_check_port)
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

#[derive(Envconfig, Clone)]
pub struct RetryPolicyConfig {
    #[envconfig(from = "STOP_RETRY_BACKOFF_COEFFICIENT", default = "2")]
    pub backoff_coefficient: u32,

    #[envconfig(from = "STOP_RETRY_INITIAL_INTERVAL", default = "1000")]
    pub initial_interval: EnvMsDuration,

    #[envconfig(from = "STOP_RETRY_MAXIMUM_INTERVAL", default = "30000")]
    pub maximum_interval: EnvMsDuration,

    #[envconfig(from = "STOP_RETRY_MAX_ATTEMPTS", default = "3")]
    pub max_attempts: u32,
}

impl RetryPolicyConfig {
    pub fn provide(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.backoff_coefficient,
            self.initial_interval.0,
            Some(self.maximum_interval.0),
            self.max_attempts,
        )
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

    #[test]
    fn test_defaults() {
        let config = Config::init_from_hashmap(&HashMap::new()).unwrap();

        assert_eq!(config.bind(), "0.0.0.0:3310");
        assert_eq!(config.agent_check_bind(), "0.0.0.0:7331");
        assert_eq!(config.proxy_group.as_str(), "Proxy");
        assert_eq!(config.default_max_players, 0);
        assert_eq!(
            config.retry_policy.provide(),
            RetryPolicy::new(
                2,
                time::Duration::from_secs(1),
                Some(time::Duration::from_secs(30)),
                3
            )
        );
    }

    #[test]
    fn test_overrides() {
        let env = HashMap::from([
            ("AGENT_CHECK_PORT".to_owned(), "17331".to_owned()),
            ("PROXY_GROUP".to_owned(), "Bungee".to_owned()),
            ("AGENT_CHECK_TIMEOUT".to_owned(), "250".to_owned()),
        ]);
        let config = Config::init_from_hashmap(&env).unwrap();

        assert_eq!(config.agent_check_bind(), "0.0.0.0:17331");
        assert_eq!(config.proxy_group.as_str(), "Bungee");
        assert_eq!(
            config.agent_check_timeout.0,
            time::Duration::from_millis(250)
        );
    }

    #[test]
    fn test_rejects_empty_proxy_group() {
        let env = HashMap::from([("PROXY_GROUP".to_owned(), "".to_owned())]);

        assert!(Config::init_from_hashmap(&env).is_err());
    }

    #[test]
    fn test_parse_ms_duration() {
        assert_eq!(
            "1500".parse::<EnvMsDuration>().unwrap().0,
            time::Duration::from_millis(1500)
        );
        assert_eq!(
            "soon".parse::<EnvMsDuration>().unwrap_err(),
            ParseEnvMsDurationError
        );
    }
}
