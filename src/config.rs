use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::audio_capture::CaptureConfig;
use crate::intent::fold_case;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue { var: String, reason: String },
    #[error("Invalid server URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Device configuration
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub server_url: Url,
    pub sample_rate: u32,
    pub chunk_size: usize,
    pub record_time: Duration,
    pub wake_time: Duration,
    pub prompt_time: Duration,
    /// Stored case-folded and trimmed.
    pub wake_phrase: String,
    pub lang: String,
    pub door_open_angle: u16,
    pub door_closed_angle: u16,
    pub door_dwell: Duration,
    pub http_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            server_url: Url::parse("http://172.20.10.3:5000").expect("static URL is valid"),
            sample_rate: 16000,
            chunk_size: 4096,
            record_time: Duration::from_secs(10),
            wake_time: Duration::from_secs(3),
            prompt_time: Duration::from_secs(3),
            wake_phrase: "uyan".to_string(),
            lang: "tr".to_string(),
            door_open_angle: 90,
            door_closed_angle: 0,
            door_dwell: Duration::from_millis(2000),
            http_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl DeviceConfig {
    /// Load configuration from environment variables, falling back to the
    /// reference defaults for anything unset.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let server_url = match lookup("VOICE_SERVER_URL") {
            Some(raw) => parse_server_url(&raw)?,
            None => defaults.server_url,
        };

        let config = Self {
            server_url,
            sample_rate: parse_or("VOICE_SAMPLE_RATE", &lookup, defaults.sample_rate)?,
            chunk_size: parse_or("VOICE_CHUNK_SIZE", &lookup, defaults.chunk_size)?,
            record_time: secs_or("VOICE_RECORD_SECS", &lookup, defaults.record_time)?,
            wake_time: secs_or("VOICE_WAKE_SECS", &lookup, defaults.wake_time)?,
            prompt_time: secs_or("VOICE_PROMPT_SECS", &lookup, defaults.prompt_time)?,
            wake_phrase: lookup("VOICE_WAKE_PHRASE")
                .map(|p| fold_case(p.trim()))
                .unwrap_or(defaults.wake_phrase),
            lang: lookup("VOICE_LANG").unwrap_or(defaults.lang),
            door_open_angle: parse_or("DOOR_OPEN_ANGLE", &lookup, defaults.door_open_angle)?,
            door_closed_angle: parse_or(
                "DOOR_CLOSED_ANGLE",
                &lookup,
                defaults.door_closed_angle,
            )?,
            door_dwell: millis_or("DOOR_DWELL_MS", &lookup, defaults.door_dwell)?,
            http_timeout: secs_or("HTTP_TIMEOUT_SECS", &lookup, defaults.http_timeout)?,
            poll_interval: millis_or("KEYPAD_POLL_MS", &lookup, defaults.poll_interval)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.wake_phrase.is_empty() {
            return Err(invalid("VOICE_WAKE_PHRASE", "wake phrase cannot be empty"));
        }
        if self.sample_rate == 0 {
            return Err(invalid("VOICE_SAMPLE_RATE", "sample rate must be positive"));
        }
        // Frames carry whole 16-bit samples
        if self.chunk_size == 0 || self.chunk_size % 2 != 0 {
            return Err(invalid(
                "VOICE_CHUNK_SIZE",
                "chunk size must be a positive even number of bytes",
            ));
        }
        for (var, window) in [
            ("VOICE_RECORD_SECS", self.record_time),
            ("VOICE_WAKE_SECS", self.wake_time),
            ("VOICE_PROMPT_SECS", self.prompt_time),
        ] {
            if window.is_zero() {
                return Err(invalid(var, "capture window must be at least one second"));
            }
        }
        if self.door_open_angle > 180 || self.door_closed_angle > 180 {
            return Err(invalid("DOOR_OPEN_ANGLE", "servo angles must be within 0..=180"));
        }
        Ok(())
    }

    pub fn capture(&self) -> CaptureConfig {
        CaptureConfig {
            sample_rate: self.sample_rate,
            chunk_size: self.chunk_size,
        }
    }

    /// Absolute URL of a server endpoint such as `upload` or `verify_user`.
    pub fn endpoint(&self, path: &str) -> Result<Url, ConfigError> {
        self.server_url
            .join(path)
            .map_err(|source| ConfigError::InvalidUrl {
                url: format!("{}{}", self.server_url, path),
                source,
            })
    }

    pub fn with_server_url(mut self, raw: &str) -> Result<Self, ConfigError> {
        self.server_url = parse_server_url(raw)?;
        Ok(self)
    }

    pub fn with_wake_phrase(mut self, phrase: &str) -> Result<Self, ConfigError> {
        self.wake_phrase = fold_case(phrase.trim());
        self.validate()?;
        Ok(self)
    }
}

/// Load configuration with helpful error messages for development
pub fn load_config() -> Result<DeviceConfig, ConfigError> {
    match DeviceConfig::load() {
        Ok(config) => {
            log::info!(
                "Successfully loaded device configuration (server: {})",
                config.server_url
            );
            Ok(config)
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            log::error!("Check the VOICE_*, DOOR_* and HTTP_* variables in your environment or .env file");
            Err(e)
        }
    }
}

fn parse_server_url(raw: &str) -> Result<Url, ConfigError> {
    // A base without a trailing slash would drop its last path segment on join()
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    let url = Url::parse(&normalized).map_err(|source| ConfigError::InvalidUrl {
        url: raw.to_string(),
        source,
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(
            "VOICE_SERVER_URL",
            &format!("unsupported scheme '{}'", other),
        )),
    }
}

fn parse_or<T, F>(var: &str, lookup: &F, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| invalid(var, &e.to_string())),
        None => Ok(default),
    }
}

fn secs_or<F>(var: &str, lookup: &F, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(var, lookup, default.as_secs()).map(Duration::from_secs)
}

fn millis_or<F>(var: &str, lookup: &F, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(var, lookup, default.as_millis() as u64).map(Duration::from_millis)
}

fn invalid(var: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        var: var.to_string(),
        reason: reason.to_string(),
    }
}
