use std::env;
use std::time::Duration;

/// Settings for a single interpreter instance.
#[derive(Debug, Clone)]
pub struct InterpreterConfig {
    /// Upper bound on any one adapter or store call.
    pub adapter_timeout: Duration,
    /// API key for recipe generation when a node names no credential.
    pub default_ai_key: Option<String>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            adapter_timeout: Duration::from_secs(10),
            default_ai_key: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub organizations: Vec<String>,
    pub tick_interval: Duration,
    pub dedup_window: chrono::Duration,
    pub max_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            organizations: vec!["default".to_string()],
            tick_interval: Duration::from_secs(300),
            dedup_window: chrono::Duration::days(30),
            max_concurrency: 8,
        }
    }
}

/// Process-wide engine configuration.
///
/// Environment variables (all optional except the vault key for live use):
/// - `PANTRY_VAULT_KEY`: 64 hex characters
/// - `PANTRY_ADAPTER_TIMEOUT_MS`
/// - `PANTRY_TICK_INTERVAL_SECS`
/// - `PANTRY_DEDUP_WINDOW_DAYS`
/// - `PANTRY_MAX_CONCURRENCY`
/// - `PANTRY_ORGS`: comma-separated organization ids
/// - `PANTRY_AI_API_KEY`, `PANTRY_AI_BASE_URL`, `PANTRY_AI_MODEL`
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub vault_key: Option<String>,
    pub interpreter: InterpreterConfig,
    pub scheduler: SchedulerConfig,
    pub ai_base_url: String,
    pub ai_model: String,
    pub event_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vault_key: None,
            interpreter: InterpreterConfig::default(),
            scheduler: SchedulerConfig::default(),
            ai_base_url: "https://api.openai.com/v1".to_string(),
            ai_model: "gpt-4o-mini".to_string(),
            event_buffer_size: 1000,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unparsable values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        config.vault_key = lookup("PANTRY_VAULT_KEY").filter(|v| !v.trim().is_empty());

        if let Some(ms) = number("PANTRY_ADAPTER_TIMEOUT_MS").filter(|ms| *ms > 0) {
            config.interpreter.adapter_timeout = Duration::from_millis(ms);
        }
        config.interpreter.default_ai_key =
            lookup("PANTRY_AI_API_KEY").filter(|v| !v.trim().is_empty());

        if let Some(secs) = number("PANTRY_TICK_INTERVAL_SECS").filter(|s| *s > 0) {
            config.scheduler.tick_interval = Duration::from_secs(secs);
        }
        if let Some(days) = number("PANTRY_DEDUP_WINDOW_DAYS") {
            config.scheduler.dedup_window = chrono::Duration::days(days as i64);
        }
        if let Some(n) = number("PANTRY_MAX_CONCURRENCY").filter(|n| *n > 0) {
            config.scheduler.max_concurrency = n as usize;
        }
        if let Some(orgs) = lookup("PANTRY_ORGS") {
            let orgs: Vec<String> = orgs
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
            if !orgs.is_empty() {
                config.scheduler.organizations = orgs;
            }
        }

        if let Some(url) = lookup("PANTRY_AI_BASE_URL") {
            config.ai_base_url = url;
        }
        if let Some(model) = lookup("PANTRY_AI_MODEL") {
            config.ai_model = model;
        }

        config
    }
}
