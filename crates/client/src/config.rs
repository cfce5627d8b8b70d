use std::time::Duration;

/// Client configuration loaded from environment variables.
///
/// All fields have defaults suitable for a local backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Base URL all endpoints are resolved against (no trailing slash).
    pub api_url: String,
    /// Timeout for plain request/response calls in seconds (default: `60`).
    /// Progress streams are long-lived and not subject to it.
    pub request_timeout_secs: u64,
    /// TCP connect timeout in seconds (default: `10`).
    pub connect_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout_secs: 60,
            connect_timeout_secs: 10,
        }
    }
}

const DEFAULT_API_URL: &str = "http://localhost:8000/api";

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got '{value}'")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

impl ClientConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default                     |
    /// |---------------------------------|-----------------------------|
    /// | `MEDIAGEN_API_URL`              | `http://localhost:8000/api` |
    /// | `MEDIAGEN_REQUEST_TIMEOUT_SECS` | `60`                        |
    /// | `MEDIAGEN_CONNECT_TIMEOUT_SECS` | `10`                        |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let api_url = lookup("MEDIAGEN_API_URL")
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or(defaults.api_url);

        let request_timeout_secs = parse_secs(
            &lookup,
            "MEDIAGEN_REQUEST_TIMEOUT_SECS",
            defaults.request_timeout_secs,
        )?;
        let connect_timeout_secs = parse_secs(
            &lookup,
            "MEDIAGEN_CONNECT_TIMEOUT_SECS",
            defaults.connect_timeout_secs,
        )?;

        Ok(Self {
            api_url,
            request_timeout_secs,
            connect_timeout_secs,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn parse_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            expected: "a whole number of seconds",
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn overrides_are_read_and_trailing_slash_trimmed() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("MEDIAGEN_API_URL", "https://gen.example.com/api/"),
            ("MEDIAGEN_REQUEST_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.api_url, "https://gen.example.com/api");
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.connect_timeout_secs, 10);
    }

    #[test]
    fn invalid_number_is_rejected() {
        let result = ClientConfig::from_lookup(lookup(&[("MEDIAGEN_CONNECT_TIMEOUT_SECS", "soon")]));
        assert_matches!(
            result,
            Err(ConfigError::Invalid {
                var: "MEDIAGEN_CONNECT_TIMEOUT_SECS",
                ..
            })
        );
    }
}
