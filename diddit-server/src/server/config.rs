use serde::Deserialize;
use std::{env, fs, path::Path};

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DB_PATH: &str = "data/diddit.db";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub db_path: String,
    pub listen_port: u16,
    pub dev_cors_origin: Option<String>,
    pub bcrypt_cost: u32,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Days before a token must be renewed by logging in again.
    pub token_ttl_days: i64,
    /// Days of inactivity after which a session is considered expired.
    pub session_idle_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub window_secs: u64,
    /// Requests per window per client on `/api/auth/register` and `/api/auth/login`.
    pub auth_requests: u32,
    /// Requests per window per client on every other API route.
    pub api_requests: u32,
    /// Key clients on the first `x-forwarded-for` hop. Only enable behind a
    /// reverse proxy that overwrites the header.
    pub trust_forwarded_for: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            db_path: DEFAULT_DB_PATH.to_string(),
            listen_port: DEFAULT_PORT,
            dev_cors_origin: None,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_days: 30,
            session_idle_days: 14,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 60,
            auth_requests: 5,
            api_requests: 300,
            trust_forwarded_for: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl AppConfig {
    /// Loads `path`, else `CONFIG_PATH`, else `./config.yaml` when present, then
    /// applies environment overrides and validates the result. A named file must exist.
    pub fn load_with(path: Option<&Path>) -> Result<Self, ConfigError> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| env::var_os("CONFIG_PATH").map(Into::into));
        let mut cfg = match explicit {
            Some(p) => Self::load_from_path(p)?,
            None if Path::new("config.yaml").exists() => Self::load_from_path("config.yaml")?,
            None => Self::default(),
        };
        cfg.apply_env(|name| env::var(name).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(&path)?;
        let cfg: AppConfig = serde_yaml::from_str(&text)?;
        Ok(cfg)
    }

    /// Overrides file values with `JWT_SECRET`, `DB_PATH` (or `DATABASE_URL`),
    /// `PORT`, `CORS_ORIGIN` and `BCRYPT_COST`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup("JWT_SECRET") {
            self.jwt_secret = secret;
        }
        if let Some(db) = lookup("DB_PATH").or_else(|| lookup("DATABASE_URL")) {
            self.db_path = db;
        }
        if let Some(port) = lookup("PORT") {
            self.listen_port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "PORT",
                value: port.clone(),
            })?;
        }
        if let Some(origin) = lookup("CORS_ORIGIN") {
            self.dev_cors_origin = Some(origin).filter(|o| !o.is_empty());
        }
        if let Some(cost) = lookup("BCRYPT_COST") {
            self.bcrypt_cost = cost.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "BCRYPT_COST",
                value: cost.clone(),
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "jwt_secret must be set (config file or JWT_SECRET)".into(),
            ));
        }
        if !(4..=31).contains(&self.bcrypt_cost) {
            return Err(ConfigError::Invalid(format!(
                "bcrypt_cost must be between 4 and 31, got {}",
                self.bcrypt_cost
            )));
        }
        if self.auth.token_ttl_days <= 0 || self.auth.session_idle_days <= 0 {
            return Err(ConfigError::Invalid(
                "auth.token_ttl_days and auth.session_idle_days must be positive".into(),
            ));
        }
        if let Some(origin) = &self.dev_cors_origin
            && axum::http::HeaderValue::from_str(origin).is_err()
        {
            return Err(ConfigError::Invalid(format!(
                "dev_cors_origin is not a valid header value: {origin:?}"
            )));
        }
        if self.rate_limit.enabled
            && (self.rate_limit.window_secs == 0
                || self.rate_limit.auth_requests == 0
                || self.rate_limit.api_requests == 0)
        {
            return Err(ConfigError::Invalid(
                "rate_limit values must be positive when enabled".into(),
            ));
        }
        Ok(())
    }
}
