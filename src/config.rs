use std::{str::FromStr, time::Duration};

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_inactivity: time::Duration,
    /// Upper bound on identity resolution and pool acquisition.
    pub request_timeout: Duration,
    pub video: VideoConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        Ok(Config {
            database_url: var("DATABASE_URL").context("DATABASE_URL must be set")?,
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_owned()),
            session_inactivity: time::Duration::minutes(parse_or("SESSION_INACTIVITY_MINUTES", 60)?),
            request_timeout: Duration::from_secs(parse_or("REQUEST_TIMEOUT_SECS", 10)?),
            video: VideoConfig::from_env()?,
        })
    }
}

/// LiveKit credentials, read from the environment once at startup and fixed
/// for the life of the process. Rotating them means a restart. Any of them
/// may be absent; the grant endpoint checks on every call and fails closed.
#[derive(Debug, Clone)]
pub struct VideoConfig {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub url: Option<String>,
    pub token_ttl: time::Duration,
}

pub struct VideoCredentials<'a> {
    pub api_key: &'a str,
    pub api_secret: &'a str,
    pub url: &'a str,
}

impl VideoConfig {
    pub fn from_env() -> anyhow::Result<VideoConfig> {
        Ok(VideoConfig {
            api_key: var("LIVEKIT_API_KEY"),
            api_secret: var("LIVEKIT_API_SECRET"),
            url: var("LIVEKIT_URL"),
            token_ttl: time::Duration::seconds(parse_or("LIVEKIT_TOKEN_TTL_SECS", 6 * 60 * 60)?),
        })
    }

    /// Names of the environment variables that were absent or blank.
    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("LIVEKIT_API_KEY", &self.api_key),
            ("LIVEKIT_API_SECRET", &self.api_secret),
            ("LIVEKIT_URL", &self.url),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_none())
        .map(|(name, _)| name)
        .collect()
    }

    pub fn credentials(&self) -> Option<VideoCredentials<'_>> {
        Some(VideoCredentials {
            api_key: self.api_key.as_deref()?,
            api_secret: self.api_secret.as_deref()?,
            url: self.url.as_deref()?,
        })
    }
}

fn var(key: &str) -> Option<String> {
    dotenv::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw.parse().with_context(|| format!("{key} is not valid: {raw:?}")),
        None => Ok(default),
    }
}
