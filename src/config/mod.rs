//! Configuration module - environment variable parsing and room settings

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS (empty = any origin)
    pub client_origins: Vec<String>,
    /// Settings applied to every room hosted by this process
    pub room: RoomConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:2567".to_string())
        };

        let client_origins = env::var("CLIENT_ORIGIN")
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let room = RoomConfig::default().with_env_overrides()?;
        room.validate()?;

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            client_origins,
            room,
        })
    }
}

/// Map dimensions in world units
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapSize {
    pub width: f32,
    pub height: f32,
}

/// Per-player movement settings
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerSettings {
    /// Distance moved per drained input command
    pub velocity: f32,
}

/// Static room configuration.
///
/// Serialized form is the snapshot clients receive for `fetchConfig`;
/// server-only knobs are never serialized.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomConfig {
    /// Simulation ticks per second
    pub fixed_simulation_tick_rate: u32,
    /// State broadcasts per second
    pub patch_rate: u32,
    pub map_size: MapSize,
    pub player: PlayerSettings,
    /// RTT (ms) above which the client gets an advisory warning
    pub max_allowed_ping: u64,
    /// Silence (ms) after which a client is evicted
    pub ping_response_max_time: u64,
    /// Valid skin identifiers; the first one is the fallback
    pub skins: Vec<String>,

    /// Heartbeat period in milliseconds
    #[serde(skip_serializing, default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Cap on queued, not yet simulated inputs per player
    #[serde(skip_serializing, default = "default_max_pending_inputs")]
    pub max_pending_inputs: usize,
}

fn default_heartbeat_interval_ms() -> u64 {
    1000
}

fn default_max_pending_inputs() -> usize {
    64
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            fixed_simulation_tick_rate: 60,
            patch_rate: 20,
            map_size: MapSize {
                width: 640.0,
                height: 480.0,
            },
            player: PlayerSettings { velocity: 2.0 },
            max_allowed_ping: 200,
            ping_response_max_time: 5000,
            skins: vec![
                "slightly-smiling-face_1f642".to_string(),
                "smiling-face-with-sunglasses_1f60e".to_string(),
                "smiling-face-with-horns_1f608".to_string(),
            ],
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            max_pending_inputs: default_max_pending_inputs(),
        }
    }
}

impl RoomConfig {
    /// Apply optional environment overrides on top of `self`
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(v) = env_parse("TICK_RATE")? {
            self.fixed_simulation_tick_rate = v;
        }
        if let Some(v) = env_parse("PATCH_RATE")? {
            self.patch_rate = v;
        }
        if let Some(v) = env_parse("MAP_WIDTH")? {
            self.map_size.width = v;
        }
        if let Some(v) = env_parse("MAP_HEIGHT")? {
            self.map_size.height = v;
        }
        if let Some(v) = env_parse("PLAYER_VELOCITY")? {
            self.player.velocity = v;
        }
        if let Some(v) = env_parse("MAX_ALLOWED_PING")? {
            self.max_allowed_ping = v;
        }
        if let Some(v) = env_parse("PING_RESPONSE_MAX_TIME")? {
            self.ping_response_max_time = v;
        }
        if let Ok(skins) = env::var("SKINS") {
            self.skins = skins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        Ok(self)
    }

    /// Reject settings the room cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fixed_simulation_tick_rate == 0 {
            return Err(ConfigError::Invalid("tick rate must be positive"));
        }
        if self.patch_rate == 0 {
            return Err(ConfigError::Invalid("patch rate must be positive"));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid("heartbeat interval must be positive"));
        }
        if !(self.map_size.width > 0.0 && self.map_size.height > 0.0)
            || !self.map_size.width.is_finite()
            || !self.map_size.height.is_finite()
        {
            return Err(ConfigError::Invalid("map size must be positive and finite"));
        }
        if !self.player.velocity.is_finite() || self.player.velocity < 0.0 {
            return Err(ConfigError::Invalid("player velocity must be finite and non-negative"));
        }
        if self.skins.is_empty() {
            return Err(ConfigError::Invalid("at least one skin is required"));
        }
        Ok(())
    }

    /// Fixed simulation step in seconds, exactly one scheduler tick
    pub fn fixed_time_step(&self) -> f64 {
        self.tick_interval().as_secs_f64()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fixed_simulation_tick_rate as f64)
    }

    pub fn patch_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.patch_rate as f64)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

fn env_parse<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Malformed(key)),
        Err(_) => Ok(None),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Malformed value for environment variable: {0}")]
    Malformed(&'static str),

    #[error("Invalid room configuration: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
