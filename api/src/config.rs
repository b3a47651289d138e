use std::str::FromStr;
use std::time::Duration;

use serde_json::Value;
use url::Url;

use crate::registry::FormDiscipline;
use crate::relay::RelayConfig;

const DEFAULT_PORT: u16 = 5008;
const DEFAULT_UPSTREAM_URL: &str = "http://localhost:5000/post";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} has an invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    /// `None` allows any origin
    pub cors_origins: Option<Vec<String>>,
    pub form_discipline: FormDiscipline,
    pub form_max_age: Duration,
    pub form_sweep_interval: Duration,
    /// Stream chat replies as SSE instead of one JSON body
    pub streaming: bool,
    pub relay: RelayConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup (the environment in
    /// production, a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = parse_or(&get, "PORT", DEFAULT_PORT)?;

        let cors_origins = get("AGENTDESK_CORS_ORIGINS").and_then(|raw| {
            let origins: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if origins.is_empty() || origins.iter().any(|o| o == "*") {
                None
            } else {
                Some(origins)
            }
        });

        let max_pending = parse_or(&get, "AGENTDESK_FORM_MAX_PENDING", 100usize)?;
        let form_discipline = match get("AGENTDESK_FORM_DISCIPLINE")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "" | "session" => FormDiscipline::Session,
            "pool" => FormDiscipline::Pool { max_pending },
            other => {
                return Err(ConfigError::Invalid {
                    key: "AGENTDESK_FORM_DISCIPLINE",
                    value: other.to_string(),
                    reason: "expected 'session' or 'pool'".to_string(),
                });
            }
        };

        let form_max_age = Duration::from_secs(parse_or(&get, "AGENTDESK_FORM_MAX_AGE_SECS", 600)?);
        let form_sweep_interval =
            Duration::from_secs(parse_or(&get, "AGENTDESK_FORM_SWEEP_SECS", 30u64)?.max(1));
        let streaming = parse_bool(&get, "AGENTDESK_STREAMING", true)?;

        let raw_url = get("AGENTDESK_UPSTREAM_URL").unwrap_or_else(|| DEFAULT_UPSTREAM_URL.into());
        let upstream_url = Url::parse(&raw_url).map_err(|e| ConfigError::Invalid {
            key: "AGENTDESK_UPSTREAM_URL",
            value: raw_url.clone(),
            reason: e.to_string(),
        })?;

        let relay = RelayConfig {
            upstream_url,
            token: get("AGENTDESK_UPSTREAM_TOKEN").unwrap_or_default(),
            app_id: parse_or(&get, "AGENTDESK_UPSTREAM_APP_ID", 229i64)?,
            timeout: Duration::from_secs(parse_or(&get, "AGENTDESK_UPSTREAM_TIMEOUT_SECS", 30)?),
            input_params: parse_json(&get, "AGENTDESK_UPSTREAM_INPUT_PARAMS")?,
            files: parse_json(&get, "AGENTDESK_UPSTREAM_FILES")?,
            max_concurrency: parse_or(&get, "AGENTDESK_UPSTREAM_MAX_CONCURRENCY", 5usize)?.max(1),
            insecure_tls: parse_bool(&get, "AGENTDESK_UPSTREAM_INSECURE_TLS", false)?,
        };

        Ok(Self {
            port,
            cors_origins,
            form_discipline,
            form_max_age,
            form_sweep_interval,
            streaming,
            relay,
        })
    }
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn parse_bool(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match get(key).map(|v| v.trim().to_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(ConfigError::Invalid {
            key,
            value: v,
            reason: "expected a boolean".to_string(),
        }),
    }
}

/// Fixed JSON fragments forwarded to the upstream; defaults to `[]`.
fn parse_json(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Value, ConfigError> {
    match get(key) {
        None => Ok(Value::Array(Vec::new())),
        Some(raw) => serde_json::from_str(&raw).map_err(|e| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]).expect("defaults are valid");
        assert_eq!(config.port, 5008);
        assert_eq!(config.form_discipline, FormDiscipline::Session);
        assert_eq!(config.form_max_age, Duration::from_secs(600));
        assert_eq!(config.form_sweep_interval, Duration::from_secs(30));
        assert!(config.streaming);
        assert!(config.cors_origins.is_none());
        assert_eq!(config.relay.timeout, Duration::from_secs(30));
        assert_eq!(config.relay.max_concurrency, 5);
        assert_eq!(config.relay.app_id, 229);
        assert_eq!(config.relay.files, Value::Array(vec![]));
    }

    #[test]
    fn pool_discipline_uses_max_pending() {
        let config = config_from(&[
            ("AGENTDESK_FORM_DISCIPLINE", "Pool"),
            ("AGENTDESK_FORM_MAX_PENDING", "25"),
        ])
        .expect("valid config");
        assert_eq!(
            config.form_discipline,
            FormDiscipline::Pool { max_pending: 25 }
        );
    }

    #[test]
    fn cors_list_is_split_and_wildcard_means_any() {
        let config = config_from(&[(
            "AGENTDESK_CORS_ORIGINS",
            "http://a.test, http://b.test,",
        )])
        .expect("valid config");
        assert_eq!(
            config.cors_origins,
            Some(vec!["http://a.test".to_string(), "http://b.test".to_string()])
        );
        let config = config_from(&[("AGENTDESK_CORS_ORIGINS", "*")]).expect("valid config");
        assert!(config.cors_origins.is_none());
    }

    #[test]
    fn invalid_values_name_the_key() {
        let err = config_from(&[("PORT", "eighty")]).expect_err("port must be numeric");
        assert!(err.to_string().contains("PORT"));

        let err = config_from(&[("AGENTDESK_FORM_DISCIPLINE", "lifo")])
            .expect_err("unknown discipline");
        assert!(err.to_string().contains("AGENTDESK_FORM_DISCIPLINE"));

        let err = config_from(&[("AGENTDESK_UPSTREAM_URL", "not a url")])
            .expect_err("url must parse");
        assert!(err.to_string().contains("AGENTDESK_UPSTREAM_URL"));

        let err = config_from(&[("AGENTDESK_STREAMING", "maybe")]).expect_err("bool");
        assert!(err.to_string().contains("AGENTDESK_STREAMING"));
    }

    #[test]
    fn upstream_fragments_parse_as_json() {
        let config = config_from(&[
            ("AGENTDESK_UPSTREAM_FILES", r#"[{"fileType":"image","fileId":"f-1"}]"#),
            ("AGENTDESK_STREAMING", "off"),
        ])
        .expect("valid config");
        assert_eq!(config.relay.files[0]["fileId"], "f-1");
        assert!(!config.streaming);
    }
}
