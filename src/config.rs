// SPDX-License-Identifier: Apache-2.0
use actix_web::cookie::SameSite;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Environment variable names
pub const TURNSTILE_SECRET_ENV: &str = "TURNSTILE_SECRET";
pub const TURNSTILE_SITEKEY_ENV: &str = "TURNSTILE_SITEKEY";
pub const TURNSTILE_VERIFY_URL_ENV: &str = "TURNSTILE_VERIFY_URL";
pub const TURNSTILE_TIMEOUT_ENV: &str = "TURNSTILE_TIMEOUT_SECS";
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";
pub const COOKIE_DOMAIN_ENV: &str = "COOKIE_DOMAIN";
pub const COOKIE_SECURE_ENV: &str = "COOKIE_SECURE";
pub const COOKIE_SAMESITE_ENV: &str = "COOKIE_SAMESITE";
pub const VERIFIED_TTL_ENV: &str = "VERIFIED_TTL_SECS";
pub const FAILURE_TTL_ENV: &str = "FAILURE_TTL_SECS";
pub const BRAND_ENV: &str = "GATE_BRAND";
pub const CONTACT_URL_ENV: &str = "CONTACT_URL";
pub const BIND_ADDR_ENV: &str = "GATE_BIND_ADDR";
pub const WORKERS_ENV: &str = "GATE_WORKERS";
pub const STATIC_DIR_ENV: &str = "GATE_STATIC_DIR";
pub const UPSTREAM_ENV: &str = "GATE_UPSTREAM";

/// Default values
pub const DEFAULT_VERIFY_URL: &str = "https://challenges.cloudflare.com/turnstile/v0/siteverify";
pub const DEFAULT_VERIFY_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_LOG_LEVEL: &str = "warn";
pub const DEFAULT_VERIFIED_TTL_SECS: u64 = 8 * 3600; // 8 hours
pub const DEFAULT_FAILURE_TTL_SECS: u64 = 600; // 10 minutes
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";
pub const DEFAULT_WORKERS: usize = 2;
pub const DEFAULT_STATIC_DIR: &str = "static";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
    #[error("unknown brand {0:?} (expected one of: default, library, helpdesk)")]
    UnknownBrand(String),
}

/// Page branding, selected by `GATE_BRAND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Brand {
    pub key: &'static str,
    pub title: &'static str,
    pub contact_url: &'static str,
}

pub const BRANDS: &[Brand] = &[
    Brand {
        key: "default",
        title: "Checking your browser",
        contact_url: "/contact",
    },
    Brand {
        key: "library",
        title: "Library access check",
        contact_url: "/library/ask-us",
    },
    Brand {
        key: "helpdesk",
        title: "Security check",
        contact_url: "/help",
    },
];

impl Brand {
    pub fn lookup(key: &str) -> Option<Brand> {
        let key = key.trim().to_ascii_lowercase();
        BRANDS.iter().copied().find(|brand| brand.key == key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Bunyan JSON lines
    Json,
    /// Human readable console output
    Pretty,
}

/// Settings for the upstream siteverify call
#[derive(Clone)]
pub struct TurnstileSettings {
    pub secret: String,
    pub site_key: String,
    pub verify_url: String,
    pub timeout: Duration,
}

impl fmt::Debug for TurnstileSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurnstileSettings")
            .field("secret", &"<redacted>")
            .field("site_key", &self.site_key)
            .field("verify_url", &self.verify_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Attributes applied to the cookies the gate issues
#[derive(Debug, Clone)]
pub struct CookieSettings {
    /// Domain for the verification cookie; `None` keeps it host-only
    pub domain: Option<String>,
    pub secure: bool,
    pub same_site: SameSite,
    pub verified_ttl: Duration,
    pub failure_ttl: Duration,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            domain: None,
            secure: true,
            same_site: SameSite::Lax,
            verified_ttl: Duration::from_secs(DEFAULT_VERIFIED_TTL_SECS),
            failure_ttl: Duration::from_secs(DEFAULT_FAILURE_TTL_SECS),
        }
    }
}

/// Immutable application configuration, built once at startup
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub turnstile: TurnstileSettings,
    pub cookies: CookieSettings,
    pub brand: Brand,
    pub contact_url: String,
    pub log_level: String,
    pub log_format: LogFormat,
    pub bind_addr: String,
    pub workers: usize,
    pub static_dir: String,
    /// Where requests that pass the gate are forwarded, if anywhere
    pub upstream: Option<String>,
}

impl GateConfig {
    /// Configuration with defaults for everything except the two Turnstile keys
    pub fn new(secret: impl Into<String>, site_key: impl Into<String>) -> Self {
        let brand = BRANDS[0];
        Self {
            turnstile: TurnstileSettings {
                secret: secret.into(),
                site_key: site_key.into(),
                verify_url: DEFAULT_VERIFY_URL.to_string(),
                timeout: Duration::from_secs(DEFAULT_VERIFY_TIMEOUT_SECS),
            },
            cookies: CookieSettings::default(),
            brand,
            contact_url: brand.contact_url.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_format: LogFormat::Json,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            workers: DEFAULT_WORKERS,
            static_dir: DEFAULT_STATIC_DIR.to_string(),
            upstream: None,
        }
    }

    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let secret = get(TURNSTILE_SECRET_ENV).ok_or(ConfigError::Missing(TURNSTILE_SECRET_ENV))?;
        let site_key = get(TURNSTILE_SITEKEY_ENV).ok_or(ConfigError::Missing(TURNSTILE_SITEKEY_ENV))?;
        let mut config = Self::new(secret, site_key);

        if let Some(url) = get(TURNSTILE_VERIFY_URL_ENV) {
            config.turnstile.verify_url = url;
        }
        if let Some(secs) = get(TURNSTILE_TIMEOUT_ENV) {
            config.turnstile.timeout = Duration::from_secs(parse_positive(TURNSTILE_TIMEOUT_ENV, &secs)?);
        }

        if let Some(level) = get(LOG_LEVEL_ENV) {
            config.log_level = parse_log_level(&level)?;
        }
        if let Some(format) = get(LOG_FORMAT_ENV) {
            config.log_format = match format.to_ascii_lowercase().as_str() {
                "json" | "bunyan" => LogFormat::Json,
                "pretty" | "console" | "text" => LogFormat::Pretty,
                _ => return Err(invalid(LOG_FORMAT_ENV, format)),
            };
        }

        config.cookies.domain = get(COOKIE_DOMAIN_ENV);
        if let Some(secure) = get(COOKIE_SECURE_ENV) {
            config.cookies.secure = parse_flag(COOKIE_SECURE_ENV, &secure)?;
        }
        if let Some(same_site) = get(COOKIE_SAMESITE_ENV) {
            config.cookies.same_site = match same_site.to_ascii_lowercase().as_str() {
                "lax" => SameSite::Lax,
                "strict" => SameSite::Strict,
                "none" => SameSite::None,
                _ => return Err(invalid(COOKIE_SAMESITE_ENV, same_site)),
            };
        }
        if let Some(secs) = get(VERIFIED_TTL_ENV) {
            config.cookies.verified_ttl = Duration::from_secs(parse_positive(VERIFIED_TTL_ENV, &secs)?);
        }
        if let Some(secs) = get(FAILURE_TTL_ENV) {
            config.cookies.failure_ttl = Duration::from_secs(parse_positive(FAILURE_TTL_ENV, &secs)?);
        }

        if let Some(key) = get(BRAND_ENV) {
            config.brand = Brand::lookup(&key).ok_or(ConfigError::UnknownBrand(key))?;
        }
        config.contact_url = get(CONTACT_URL_ENV).unwrap_or_else(|| config.brand.contact_url.to_string());

        if let Some(addr) = get(BIND_ADDR_ENV) {
            config.bind_addr = addr;
        }
        if let Some(workers) = get(WORKERS_ENV) {
            config.workers = parse_positive(WORKERS_ENV, &workers)? as usize;
        }
        if let Some(dir) = get(STATIC_DIR_ENV) {
            config.static_dir = dir;
        }
        config.upstream = get(UPSTREAM_ENV).map(|u| u.trim_end_matches('/').to_string());

        Ok(config)
    }
}

fn invalid(key: &'static str, value: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.into(),
    }
}

fn parse_positive(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(invalid(key, value)),
    }
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

/// Accepts tracing level names plus the `WARNING`/`CRITICAL` spellings
/// operators tend to carry over from other stacks.
fn parse_log_level(value: &str) -> Result<String, ConfigError> {
    let level = match value.to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warn",
        "error" | "critical" | "fatal" => "error",
        "off" => "off",
        _ => return Err(invalid(LOG_LEVEL_ENV, value)),
    };
    Ok(level.to_string())
}
