use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

use crate::workflows::interview::domain::{ChannelRef, CommunityId};
use crate::workflows::interview::settings::{NoticeWindow, PipelineSettings, ProjectionChannels};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let ansi = env::var("APP_LOG_ANSI")
            .map(|raw| matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level, ansi },
            pipeline: PipelineConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    /// Colour the log output; off by default so files and collectors get plain text.
    pub ansi: bool,
}

/// Where the pipeline keeps its documents and how its timers behave.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub primary_community: CommunityId,
    pub utc_offset_hours: i32,
    pub poll_interval_secs: u64,
    pub debounce_ms: u64,
    pub monthly_goal: u32,
    pub dashboard_channel: Option<ChannelRef>,
    pub stats_channel: Option<ChannelRef>,
    pub summary_channel: Option<ChannelRef>,
    pub notice_channel: Option<ChannelRef>,
    pub audit_channel: Option<ChannelRef>,
}

impl PipelineConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let data_dir = env::var("PIPELINE_DATA_DIR").unwrap_or_else(|_| "./data".to_string());
        let utc_offset_hours = parse_var("PIPELINE_UTC_OFFSET_HOURS", 9_i32)?;
        if !(-23..=23).contains(&utc_offset_hours) {
            return Err(ConfigError::InvalidOffset(utc_offset_hours));
        }

        Ok(Self {
            data_dir: PathBuf::from(data_dir),
            primary_community: CommunityId(parse_var("PIPELINE_PRIMARY_COMMUNITY", 0_u64)?),
            utc_offset_hours,
            poll_interval_secs: parse_var("PIPELINE_POLL_SECS", 30_u64)?.max(1),
            debounce_ms: parse_var("PIPELINE_DEBOUNCE_MS", 2_000_u64)?,
            monthly_goal: parse_var("PIPELINE_MONTHLY_GOAL", 10_u32)?,
            dashboard_channel: optional_channel("PIPELINE_DASHBOARD_CHANNEL")?,
            stats_channel: optional_channel("PIPELINE_STATS_CHANNEL")?,
            summary_channel: optional_channel("PIPELINE_SUMMARY_CHANNEL")?,
            notice_channel: optional_channel("PIPELINE_NOTICE_CHANNEL")?,
            audit_channel: optional_channel("PIPELINE_AUDIT_CHANNEL")?,
        })
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("pipeline.json")
    }

    pub fn bans_path(&self) -> PathBuf {
        self.data_dir.join("bans.json")
    }

    pub fn actions_path(&self) -> PathBuf {
        self.data_dir.join("delayed_actions.json")
    }

    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .unwrap_or_else(|| Utc.fix())
    }

    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            primary_community: self.primary_community,
            utc_offset: self.utc_offset(),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            debounce: Duration::from_millis(self.debounce_ms),
            monthly_goal: self.monthly_goal,
            channels: ProjectionChannels {
                dashboard: self.dashboard_channel,
                interviewer_stats: self.stats_channel,
                monthly_summary: self.summary_channel,
            },
            notice_channel: self.notice_channel,
            audit_channel: self.audit_channel,
            notice_window: NoticeWindow::default(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { name, value: raw }),
        _ => Ok(default),
    }
}

fn optional_channel(name: &'static str) -> Result<Option<ChannelRef>, ConfigError> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<u64>()
            .map(|id| Some(ChannelRef(id)))
            .map_err(|_| ConfigError::InvalidNumber { name, value: raw }),
        _ => Ok(None),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { name: &'static str, value: String },
    InvalidOffset(i32),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { name, value } => {
                write!(f, "{name} must be an integer, got '{value}'")
            }
            ConfigError::InvalidOffset(hours) => {
                write!(f, "PIPELINE_UTC_OFFSET_HOURS must be within -23..=23, got {hours}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::InvalidOffset(_) => None,
        }
    }
}
