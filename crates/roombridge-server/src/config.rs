use std::path::Path;
use std::time::Duration;

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use roombridge_media::{LatencyProfile, ReassemblerConfig};

use crate::error::{BridgeError, Result};
use crate::manager::RoomTarget;
use crate::relay::RelaySettings;
use crate::room::RoomSide;
use crate::token;

const DEFAULT_CONFIG_FILE: &str = "roombridge";
const ENV_PREFIX: &str = "ROOMBRIDGE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomSettings {
    pub name: String,
    /// Join token; minted from the API credentials when absent
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Conferencing server URL, e.g. `wss://rooms.example.com`
    pub host: String,
    pub room_a: RoomSettings,
    pub room_b: RoomSettings,
    pub latency_profile: LatencyProfile,
    pub unpublish_on_close: bool,
    pub destination_wait_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub log_format: LogFormat,
    pub stun_servers: Vec<String>,
    /// Identity used for minted tokens
    pub identity: String,
    pub token_ttl_secs: i64,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_secret: Option<String>,
}

impl Settings {
    /// Load from `.env`, the config file and `ROOMBRIDGE__*` variables
    ///
    /// Without an explicit path, a missing `roombridge.toml` is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!("Failed to read .env file: {}", e);
            }
        }

        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = Self::builder()?
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("stun_servers")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Parse settings from TOML text on top of the defaults
    pub fn from_toml(text: &str) -> Result<Self> {
        let settings = Self::builder()?
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    fn builder() -> std::result::Result<ConfigBuilder<DefaultState>, ConfigError> {
        config::Config::builder()
            .set_default("host", "ws://localhost:7880")?
            .set_default("room_a.name", "A")?
            .set_default("room_b.name", "C")?
            .set_default("latency_profile", "conservative")?
            .set_default("unpublish_on_close", false)?
            .set_default("destination_wait_secs", 10)?
            .set_default("shutdown_timeout_secs", 5)?
            .set_default("log_format", "text")?
            .set_default("stun_servers", vec!["stun:stun.l.google.com:19302"])?
            .set_default("identity", "roombridge")?
            .set_default("token_ttl_secs", 3600)
    }

    /// Relay tuning derived from the latency profile
    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            reassembler: ReassemblerConfig::from_profile(self.latency_profile),
            unpublish_on_close: self.unpublish_on_close,
        }
    }

    /// How long a track waits for the opposite room
    pub fn destination_wait(&self) -> Duration {
        Duration::from_secs(self.destination_wait_secs)
    }

    /// Bound on joining session tasks at shutdown
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// API key and secret, when both are configured
    pub fn api_credentials(&self) -> Option<(&str, &str)> {
        match (&self.api_key, &self.api_secret) {
            (Some(key), Some(secret)) => Some((key.as_str(), secret.as_str())),
            _ => None,
        }
    }

    /// Resolve both rooms to join targets, minting missing tokens
    pub fn room_targets(&self) -> Result<[RoomTarget; 2]> {
        Ok([
            self.room_target(RoomSide::A, &self.room_a)?,
            self.room_target(RoomSide::B, &self.room_b)?,
        ])
    }

    /// Join target for the echo tool: `room`, or room A when not given
    ///
    /// A configured room keeps its token; any other room gets a minted one.
    pub fn echo_target(&self, room: Option<&str>) -> Result<RoomTarget> {
        let settings = match room {
            None => self.room_a.clone(),
            Some(name) => [&self.room_a, &self.room_b]
                .into_iter()
                .find(|configured| configured.name == name)
                .cloned()
                .unwrap_or_else(|| RoomSettings {
                    name: name.to_string(),
                    token: None,
                }),
        };
        self.room_target(RoomSide::A, &settings)
    }

    fn room_target(&self, side: RoomSide, room: &RoomSettings) -> Result<RoomTarget> {
        let token = match (&room.token, self.api_credentials()) {
            (Some(token), _) => token.clone(),
            (None, Some((key, secret))) => token::mint_join_token(
                key,
                secret,
                &room.name,
                &self.identity,
                chrono::Duration::seconds(self.token_ttl_secs),
            )?,
            (None, None) => {
                return Err(BridgeError::Config(ConfigError::Message(format!(
                    "room {} has no token and no api_key/api_secret to mint one",
                    room.name
                ))));
            }
        };

        Ok(RoomTarget {
            side,
            name: room.name.clone(),
            host: self.host.clone(),
            token,
        })
    }
}
