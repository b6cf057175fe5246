use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::practitioner::UserId;
use crate::escalation::EscalationConfig;
use crate::rules::{RuleEntry, RuleTable};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub escalation: EscalationSettings,
    pub logging: LoggingConfig,
    pub rules: Vec<RuleEntry>,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct EscalationSettings {
    pub reminder_hours: i64,
    pub manager_hours: i64,
    pub hr_hours: i64,
    pub hr_contacts: Vec<String>,
    pub sweep_interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub sweep_interval_secs: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://granta.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            escalation: EscalationSettings {
                reminder_hours: 24,
                manager_hours: 48,
                hr_hours: 72,
                hr_contacts: Vec::new(),
                sweep_interval_secs: 3600,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            rules: Vec::new(),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl EscalationSettings {
    pub fn to_engine_config(&self) -> EscalationConfig {
        EscalationConfig {
            reminder_hours: self.reminder_hours,
            manager_hours: self.manager_hours,
            hr_hours: self.hr_hours,
            hr_contacts: self.hr_contacts.iter().cloned().map(UserId).collect(),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("granta.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn rule_table(&self) -> RuleTable {
        RuleTable::from_entries(self.rules.clone())
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(escalation) = patch.escalation {
            if let Some(reminder_hours) = escalation.reminder_hours {
                self.escalation.reminder_hours = reminder_hours;
            }
            if let Some(manager_hours) = escalation.manager_hours {
                self.escalation.manager_hours = manager_hours;
            }
            if let Some(hr_hours) = escalation.hr_hours {
                self.escalation.hr_hours = hr_hours;
            }
            if let Some(hr_contacts) = escalation.hr_contacts {
                self.escalation.hr_contacts = hr_contacts;
            }
            if let Some(sweep_interval_secs) = escalation.sweep_interval_secs {
                self.escalation.sweep_interval_secs = sweep_interval_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        if let Some(rules) = patch.rules {
            self.rules = rules;
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("GRANTA_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("GRANTA_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("GRANTA_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("GRANTA_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("GRANTA_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("GRANTA_ESCALATION_REMINDER_HOURS") {
            self.escalation.reminder_hours =
                parse_i64("GRANTA_ESCALATION_REMINDER_HOURS", &value)?;
        }
        if let Some(value) = read_env("GRANTA_ESCALATION_MANAGER_HOURS") {
            self.escalation.manager_hours = parse_i64("GRANTA_ESCALATION_MANAGER_HOURS", &value)?;
        }
        if let Some(value) = read_env("GRANTA_ESCALATION_HR_HOURS") {
            self.escalation.hr_hours = parse_i64("GRANTA_ESCALATION_HR_HOURS", &value)?;
        }
        if let Some(value) = read_env("GRANTA_ESCALATION_SWEEP_INTERVAL_SECS") {
            self.escalation.sweep_interval_secs =
                parse_u64("GRANTA_ESCALATION_SWEEP_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("GRANTA_ESCALATION_HR_CONTACTS") {
            self.escalation.hr_contacts = value
                .split(',')
                .map(|contact| contact.trim().to_string())
                .filter(|contact| !contact.is_empty())
                .collect();
        }

        let log_level = read_env("GRANTA_LOGGING_LEVEL").or_else(|| read_env("GRANTA_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("GRANTA_LOGGING_FORMAT").or_else(|| read_env("GRANTA_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(sweep_interval_secs) = overrides.sweep_interval_secs {
            self.escalation.sweep_interval_secs = sweep_interval_secs;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_escalation(&self.escalation)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("granta.toml"), PathBuf::from("config/granta.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_escalation(escalation: &EscalationSettings) -> Result<(), ConfigError> {
    if escalation.reminder_hours <= 0 {
        return Err(ConfigError::Validation(
            "escalation.reminder_hours must be greater than zero".to_string(),
        ));
    }
    if escalation.manager_hours <= escalation.reminder_hours {
        return Err(ConfigError::Validation(
            "escalation.manager_hours must be greater than escalation.reminder_hours".to_string(),
        ));
    }
    if escalation.hr_hours <= escalation.manager_hours {
        return Err(ConfigError::Validation(
            "escalation.hr_hours must be greater than escalation.manager_hours".to_string(),
        ));
    }
    if escalation.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "escalation.sweep_interval_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.parse::<i64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    escalation: Option<EscalationPatch>,
    logging: Option<LoggingPatch>,
    rules: Option<Vec<RuleEntry>>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct EscalationPatch {
    reminder_hours: Option<i64>,
    manager_hours: Option<i64>,
    hr_hours: Option<i64>,
    hr_contacts: Option<Vec<String>>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
