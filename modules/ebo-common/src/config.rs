use std::env;
use std::time::Duration;

use tracing::info;

use crate::error::CommonError;
use crate::ids::Address;

const DEFAULT_INTERVAL_MS: u64 = 20_000;
const DEFAULT_MAX_EVENT_ATTEMPTS: u32 = 5;

/// Agent configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    // Processor
    pub processor_interval: Duration,
    pub max_event_attempts: u32,

    // Accounting modules that must be approved before the loop starts
    pub accounting_required_modules: Vec<Address>,

    // Notifications
    pub discord_webhook_url: Option<String>,
}

impl AgentConfig {
    /// Load configuration from `.env` (if present) and the process environment.
    pub fn from_env() -> Result<Self, CommonError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CommonError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let processor_interval = match lookup("EBO_PROCESSOR_INTERVAL_MS") {
            Some(raw) => Duration::from_millis(parse_number(
                "EBO_PROCESSOR_INTERVAL_MS",
                &raw,
            )?),
            None => Duration::from_millis(DEFAULT_INTERVAL_MS),
        };

        let max_event_attempts = match lookup("EBO_MAX_EVENT_ATTEMPTS") {
            Some(raw) => parse_number::<u32>("EBO_MAX_EVENT_ATTEMPTS", &raw)?,
            None => DEFAULT_MAX_EVENT_ATTEMPTS,
        };
        if max_event_attempts == 0 {
            return Err(CommonError::Config(
                "EBO_MAX_EVENT_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        let modules_raw = lookup("EBO_ACCOUNTING_REQUIRED_MODULES").ok_or_else(|| {
            CommonError::Config(
                "EBO_ACCOUNTING_REQUIRED_MODULES environment variable is required".to_string(),
            )
        })?;
        let accounting_required_modules = modules_raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Address::new)
            .collect::<Result<Vec<_>, _>>()?;

        let discord_webhook_url = lookup("EBO_DISCORD_WEBHOOK_URL").filter(|s| !s.is_empty());

        Ok(Self {
            processor_interval,
            max_event_attempts,
            accounting_required_modules,
            discord_webhook_url,
        })
    }

    /// Log the loaded configuration with secrets masked.
    pub fn log_redacted(&self) {
        info!(
            processor_interval_ms = self.processor_interval.as_millis() as u64,
            max_event_attempts = self.max_event_attempts,
            required_modules = self.accounting_required_modules.len(),
            discord_webhook = if self.discord_webhook_url.is_some() { "<redacted>" } else { "<unset>" },
            "Loaded agent config"
        );
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, CommonError> {
    raw.trim()
        .parse()
        .map_err(|_| CommonError::Config(format!("{key} must be a number, got '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_optional_vars_missing() {
        let config =
            AgentConfig::from_lookup(lookup(&[("EBO_ACCOUNTING_REQUIRED_MODULES", "0xAA,0xbb")]))
                .unwrap();

        assert_eq!(config.processor_interval, Duration::from_millis(20_000));
        assert_eq!(config.max_event_attempts, 5);
        assert_eq!(config.accounting_required_modules.len(), 2);
        assert_eq!(config.accounting_required_modules[0].as_str(), "0xaa");
        assert!(config.discord_webhook_url.is_none());
    }

    #[test]
    fn required_modules_are_mandatory() {
        let err = AgentConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, CommonError::Config(_)));
    }

    #[test]
    fn rejects_bad_numbers_and_zero_attempts() {
        let bad_interval = AgentConfig::from_lookup(lookup(&[
            ("EBO_ACCOUNTING_REQUIRED_MODULES", "0x01"),
            ("EBO_PROCESSOR_INTERVAL_MS", "soon"),
        ]));
        assert!(bad_interval.is_err());

        let zero_attempts = AgentConfig::from_lookup(lookup(&[
            ("EBO_ACCOUNTING_REQUIRED_MODULES", "0x01"),
            ("EBO_MAX_EVENT_ATTEMPTS", "0"),
        ]));
        assert!(zero_attempts.is_err());
    }

    #[test]
    fn empty_webhook_is_treated_as_unset() {
        let config = AgentConfig::from_lookup(lookup(&[
            ("EBO_ACCOUNTING_REQUIRED_MODULES", "0x01"),
            ("EBO_DISCORD_WEBHOOK_URL", ""),
        ]))
        .unwrap();
        assert!(config.discord_webhook_url.is_none());
    }
}
