//! Runtime configuration.
//!
//! Loaded from an optional TOML file, then overridden by `AUTHKIT_*`
//! environment variables (environment wins, same priority the gateway
//! uses for secrets).

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::auth::token::{Lifetimes, TokenSettings};
use crate::db::PoolConfig;
use crate::gateway::guard::PerimeterScope;

/// Access lifetimes above this trigger a startup warning.
const ACCESS_LIFETIME_WARN_SECS: u64 = 30 * 60;

/// Deployment environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "test" => Self::Test,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Prefix every API route is mounted under.
    pub api_prefix: String,
    /// Single origin allowed by CORS (credentials are allowed for it).
    pub cors_origin: String,
    /// Which API paths the refresh-cookie perimeter gate applies to.
    pub perimeter: PerimeterScope,
    /// Take the client IP from `X-Forwarded-For` / `X-Real-IP`. Only enable
    /// behind a proxy that overwrites those headers.
    pub trust_forwarded_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
            api_prefix: "/api".into(),
            cors_origin: "http://localhost:3001".into(),
            perimeter: PerimeterScope::AuthPrefix,
            trust_forwarded_headers: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokensConfig {
    /// HS256 key for access tokens.
    pub access_secret: String,
    /// HS256 key for refresh tokens. Must differ from `access_secret`.
    pub refresh_secret: String,
    /// Lifetime expression such as `15m`.
    pub access_expires_in: String,
    /// Lifetime expression such as `7d`.
    pub refresh_expires_in: String,
    pub issuer: String,
    pub audience: String,
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            access_secret: String::new(),
            refresh_secret: String::new(),
            access_expires_in: "15m".into(),
            refresh_expires_in: "7d".into(),
            issuer: "authkit".into(),
            audience: "authkit-api".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// PBKDF2 iteration count.
    pub hash_rounds: u32,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            hash_rounds: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file. Empty means the platform data dir.
    pub path: Option<PathBuf>,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    /// Background ledger sweep period. 0 disables the sweep task.
    pub sweep_interval_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: 5,
            connect_timeout_secs: 2,
            sweep_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    /// Requests allowed per window per client. 0 disables limiting.
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 15 * 60 * 1000,
            max_requests: 100,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Mount the mocked identity-provider routes. Ignored in production.
    pub oauth_enabled: bool,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            oauth_enabled: true,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub environment: Environment,
    pub server: ServerConfig,
    pub tokens: TokensConfig,
    pub credentials: CredentialsConfig,
    pub database: DatabaseConfig,
    pub rate_limit: RateLimitConfig,
    pub cookie: CookieConfig,
    pub demo: DemoConfig,
}

impl Config {
    /// Default config file location (`<config dir>/authkit/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "authkit", "authkit")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path` (or the default location when it exists), then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let resolved = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_path().filter(|p| p.exists()),
        };

        let mut config = match resolved {
            Some(ref p) => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config: {}", p.display()))?;
                Self::from_toml(&raw)
                    .with_context(|| format!("Failed to parse config: {}", p.display()))?
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `AUTHKIT_*` overrides using `lookup` as the variable source.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("AUTHKIT_ENV") {
            self.environment = Environment::from_str_lossy(&v);
        }
        if let Some(v) = get("AUTHKIT_JWT_SECRET") {
            self.tokens.access_secret = v;
        }
        if let Some(v) = get("AUTHKIT_JWT_REFRESH_SECRET") {
            self.tokens.refresh_secret = v;
        }
        if let Some(v) = get("AUTHKIT_JWT_EXPIRES_IN") {
            self.tokens.access_expires_in = v;
        }
        if let Some(v) = get("AUTHKIT_JWT_REFRESH_EXPIRES_IN") {
            self.tokens.refresh_expires_in = v;
        }
        if let Some(v) = get("AUTHKIT_HASH_ROUNDS").and_then(|v| v.parse().ok()) {
            self.credentials.hash_rounds = v;
        }
        if let Some(v) = get("AUTHKIT_CORS_ORIGIN") {
            self.server.cors_origin = v;
        }
        if let Some(v) = get("AUTHKIT_RATE_LIMIT_WINDOW_MS").and_then(|v| v.parse().ok()) {
            self.rate_limit.window_ms = v;
        }
        if let Some(v) = get("AUTHKIT_RATE_LIMIT_MAX_REQUESTS").and_then(|v| v.parse().ok()) {
            self.rate_limit.max_requests = v;
        }
        if let Some(v) = get("AUTHKIT_TRUST_PROXY") {
            self.server.trust_forwarded_headers = matches!(v.as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(v) = get("AUTHKIT_HOST") {
            self.server.host = v;
        }
        if let Some(v) = get("AUTHKIT_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = v;
        }
        if let Some(v) = get("AUTHKIT_DATABASE_PATH") {
            self.database.path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("AUTHKIT_COOKIE_DOMAIN") {
            self.cookie.domain = Some(v);
        }
        if let Some(v) = get("AUTHKIT_DEMO_OAUTH") {
            self.demo.oauth_enabled = matches!(v.as_str(), "1" | "true" | "yes" | "on");
        }
    }

    /// Hard failures only: missing or shared signing keys, zero pool size.
    pub fn validate(&self) -> Result<()> {
        if self.tokens.access_secret.is_empty() {
            bail!("Access token signing key is not set (AUTHKIT_JWT_SECRET)");
        }
        if self.tokens.refresh_secret.is_empty() {
            bail!("Refresh token signing key is not set (AUTHKIT_JWT_REFRESH_SECRET)");
        }
        if self.tokens.access_secret == self.tokens.refresh_secret {
            bail!("Access and refresh signing keys must differ");
        }
        if self.database.max_connections == 0 {
            bail!("database.max_connections must be at least 1");
        }
        if self.credentials.hash_rounds == 0 {
            bail!("credentials.hash_rounds must be at least 1");
        }
        if !self.server.api_prefix.starts_with('/') || self.server.api_prefix.ends_with('/') {
            bail!(
                "server.api_prefix must start with '/' and not end with '/': {}",
                self.server.api_prefix
            );
        }
        Ok(())
    }

    /// Soft problems worth surfacing at startup.
    pub fn warnings(&self) -> Vec<String> {
        let lifetimes = self.lifetimes();
        let mut warnings = lifetimes.warnings.clone();

        if lifetimes.access_secs > ACCESS_LIFETIME_WARN_SECS {
            warnings.push(format!(
                "Access token lifetime is {}s; keep it at or below {}s",
                lifetimes.access_secs, ACCESS_LIFETIME_WARN_SECS
            ));
        }
        if self.environment.is_production() && self.demo.oauth_enabled {
            warnings.push("Demo identity provider is configured but disabled in production".into());
        }
        if self.rate_limit.max_requests == 0 {
            warnings.push("Rate limiting is disabled (rate_limit.max_requests = 0)".into());
        }
        warnings
    }

    pub fn lifetimes(&self) -> Lifetimes {
        Lifetimes::resolve(&self.tokens.access_expires_in, &self.tokens.refresh_expires_in)
    }

    pub fn token_settings(&self) -> TokenSettings {
        TokenSettings {
            access_secret: self.tokens.access_secret.clone(),
            refresh_secret: self.tokens.refresh_secret.clone(),
            lifetimes: self.lifetimes(),
            issuer: self.tokens.issuer.clone(),
            audience: self.tokens.audience.clone(),
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_size: self.database.max_connections,
            connection_timeout: std::time::Duration::from_secs(
                self.database.connect_timeout_secs.max(1),
            ),
        }
    }

    /// Database file, defaulting to the platform data dir.
    pub fn database_path(&self) -> PathBuf {
        if let Some(ref p) = self.database.path {
            return p.clone();
        }
        directories::ProjectDirs::from("dev", "authkit", "authkit")
            .map(|dirs| dirs.data_dir().join("authkit.db"))
            .unwrap_or_else(|| PathBuf::from("authkit.db"))
    }

    /// Demo identity provider is never available in production.
    pub fn demo_oauth_enabled(&self) -> bool {
        self.demo.oauth_enabled && !self.environment.is_production()
    }
}
