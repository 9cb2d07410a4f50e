use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SecurityConfig {
    pub signing_secret: SecretString,
    pub timestamp_window_secs: u64,
    pub nonce_ttl_secs: u64,
    pub audit_retention_days: u32,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Accept free-text engine verdicts by keyword matching. Kept for
    /// older engine deployments; new verdicts are structured.
    pub lenient_verdicts: bool,
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
    pub signing_secret: Option<String>,
    pub engine_base_url: Option<String>,
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
                url: "sqlite://rulegate.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            security: SecurityConfig {
                signing_secret: String::new().into(),
                timestamp_window_secs: 300,
                nonce_ttl_secs: 600,
                audit_retention_days: 90,
            },
            engine: EngineConfig {
                base_url: "http://localhost:4466".to_string(),
                timeout_secs: 10,
                lenient_verdicts: false,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
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

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("rulegate.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
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

        if let Some(security) = patch.security {
            if let Some(signing_secret) = security.signing_secret {
                self.security.signing_secret = secret_value(signing_secret);
            }
            if let Some(timestamp_window_secs) = security.timestamp_window_secs {
                self.security.timestamp_window_secs = timestamp_window_secs;
            }
            if let Some(nonce_ttl_secs) = security.nonce_ttl_secs {
                self.security.nonce_ttl_secs = nonce_ttl_secs;
            }
            if let Some(audit_retention_days) = security.audit_retention_days {
                self.security.audit_retention_days = audit_retention_days;
            }
        }

        if let Some(engine) = patch.engine {
            if let Some(base_url) = engine.base_url {
                self.engine.base_url = base_url;
            }
            if let Some(timeout_secs) = engine.timeout_secs {
                self.engine.timeout_secs = timeout_secs;
            }
            if let Some(lenient_verdicts) = engine.lenient_verdicts {
                self.engine.lenient_verdicts = lenient_verdicts;
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
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("RULEGATE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("RULEGATE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("RULEGATE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("RULEGATE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("RULEGATE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("RULEGATE_SIGNING_SECRET") {
            self.security.signing_secret = secret_value(value);
        }
        if let Some(value) = read_env("RULEGATE_TIMESTAMP_WINDOW_SECS") {
            self.security.timestamp_window_secs =
                parse_u64("RULEGATE_TIMESTAMP_WINDOW_SECS", &value)?;
        }
        if let Some(value) = read_env("RULEGATE_NONCE_TTL_SECS") {
            self.security.nonce_ttl_secs = parse_u64("RULEGATE_NONCE_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("RULEGATE_AUDIT_RETENTION_DAYS") {
            self.security.audit_retention_days =
                parse_u32("RULEGATE_AUDIT_RETENTION_DAYS", &value)?;
        }

        if let Some(value) = read_env("RULEGATE_ENGINE_BASE_URL") {
            self.engine.base_url = value;
        }
        if let Some(value) = read_env("RULEGATE_ENGINE_TIMEOUT_SECS") {
            self.engine.timeout_secs = parse_u64("RULEGATE_ENGINE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("RULEGATE_ENGINE_LENIENT_VERDICTS") {
            self.engine.lenient_verdicts = parse_bool("RULEGATE_ENGINE_LENIENT_VERDICTS", &value)?;
        }

        let log_level =
            read_env("RULEGATE_LOGGING_LEVEL").or_else(|| read_env("RULEGATE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("RULEGATE_LOGGING_FORMAT").or_else(|| read_env("RULEGATE_LOG_FORMAT"));
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
        if let Some(signing_secret) = overrides.signing_secret {
            self.security.signing_secret = secret_value(signing_secret);
        }
        if let Some(engine_base_url) = overrides.engine_base_url {
            self.engine.base_url = engine_base_url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_security(&self.security)?;
        validate_engine(&self.engine)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("rulegate.toml"), PathBuf::from("config/rulegate.toml")]
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

fn validate_security(security: &SecurityConfig) -> Result<(), ConfigError> {
    let secret = security.signing_secret.expose_secret();
    if secret.trim().is_empty() {
        return Err(ConfigError::Validation(
            "security.signing_secret is required; set it in rulegate.toml or RULEGATE_SIGNING_SECRET"
                .to_string(),
        ));
    }
    if secret.len() < 32 {
        return Err(ConfigError::Validation(
            "security.signing_secret must be at least 32 bytes".to_string(),
        ));
    }

    if security.timestamp_window_secs == 0 || security.timestamp_window_secs > 3600 {
        return Err(ConfigError::Validation(
            "security.timestamp_window_secs must be in range 1..=3600".to_string(),
        ));
    }

    if security.nonce_ttl_secs < security.timestamp_window_secs {
        return Err(ConfigError::Validation(
            "security.nonce_ttl_secs must be at least security.timestamp_window_secs, otherwise \
             a replayed request could outlive its nonce record"
                .to_string(),
        ));
    }

    if security.audit_retention_days == 0 {
        return Err(ConfigError::Validation(
            "security.audit_retention_days must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_engine(engine: &EngineConfig) -> Result<(), ConfigError> {
    if !engine.base_url.starts_with("http://") && !engine.base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "engine.base_url must start with http:// or https://".to_string(),
        ));
    }

    if engine.timeout_secs == 0 || engine.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "engine.timeout_secs must be in range 1..=300".to_string(),
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

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    security: Option<SecurityPatch>,
    engine: Option<EnginePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SecurityPatch {
    signing_secret: Option<String>,
    timestamp_window_secs: Option<u64>,
    nonce_ttl_secs: Option<u64>,
    audit_retention_days: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct EnginePatch {
    base_url: Option<String>,
    timeout_secs: Option<u64>,
    lenient_verdicts: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    const TEST_SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_SIGNING_SECRET", TEST_SECRET);

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("rulegate.toml");
            fs::write(
                &path,
                r#"
[security]
signing_secret = "${TEST_SIGNING_SECRET}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.security.signing_secret.expose_secret() == TEST_SECRET,
                "signing secret should be loaded from environment",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_SIGNING_SECRET"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RULEGATE_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("RULEGATE_SIGNING_SECRET", TEST_SECRET);

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("rulegate.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-env.db",
                "env database url should win over the file",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            Ok(())
        })();

        clear_vars(&["RULEGATE_DATABASE_URL", "RULEGATE_SIGNING_SECRET"]);
        result
    }

    #[test]
    fn short_signing_secret_fails_validation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RULEGATE_SIGNING_SECRET", "too-short");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("signing_secret")
            );
            ensure(has_message, "validation failure should mention signing_secret")
        })();

        clear_vars(&["RULEGATE_SIGNING_SECRET"]);
        result
    }

    #[test]
    fn nonce_ttl_must_cover_timestamp_window() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RULEGATE_SIGNING_SECRET", TEST_SECRET);
        env::set_var("RULEGATE_TIMESTAMP_WINDOW_SECS", "900");
        env::set_var("RULEGATE_NONCE_TTL_SECS", "600");

        let result = (|| -> Result<(), String> {
            ensure(
                AppConfig::load(LoadOptions::default()).is_err(),
                "nonce ttl below the timestamp window should be rejected",
            )
        })();

        clear_vars(&[
            "RULEGATE_SIGNING_SECRET",
            "RULEGATE_TIMESTAMP_WINDOW_SECS",
            "RULEGATE_NONCE_TTL_SECS",
        ]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("RULEGATE_SIGNING_SECRET", TEST_SECRET);

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains(TEST_SECRET), "debug output should not contain the secret")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["RULEGATE_SIGNING_SECRET"]);
        result
    }
}
