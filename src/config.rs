//! Application-level configuration loading: hub sizing, reconciliation timings and the game
//! sequence.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "FESTIVAL_BACK_CONFIG_PATH";

/// What the hub does with a session whose outbound queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Tear the session down; the client is expected to reconnect.
    #[default]
    Evict,
    /// Skip this payload for the session and keep it registered.
    Drop,
}

/// Sizing and deadlines of the connection hub and its sessions.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    pub broadcast_buffer: usize,
    pub max_frame_bytes: usize,
    pub read_deadline_secs: u64,
    pub write_deadline_secs: u64,
    pub keepalive_interval_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            overflow: OverflowPolicy::Evict,
            broadcast_buffer: 512,
            max_frame_bytes: 4096,
            read_deadline_secs: 90,
            write_deadline_secs: 10,
            keepalive_interval_secs: 30,
        }
    }
}

impl HubConfig {
    pub fn read_deadline(&self) -> Duration {
        Duration::from_secs(self.read_deadline_secs)
    }

    pub fn write_deadline(&self) -> Duration {
        Duration::from_secs(self.write_deadline_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    fn sanitize(&mut self) {
        let defaults = Self::default();
        if self.queue_capacity == 0 {
            warn!("hub.queue_capacity must be positive; using default");
            self.queue_capacity = defaults.queue_capacity;
        }
        if self.broadcast_buffer == 0 {
            warn!("hub.broadcast_buffer must be positive; using default");
            self.broadcast_buffer = defaults.broadcast_buffer;
        }
        if self.max_frame_bytes == 0 {
            warn!("hub.max_frame_bytes must be positive; using default");
            self.max_frame_bytes = defaults.max_frame_bytes;
        }
        if self.read_deadline_secs == 0 || self.write_deadline_secs == 0 {
            warn!("hub deadlines must be positive; using defaults");
            self.read_deadline_secs = defaults.read_deadline_secs;
            self.write_deadline_secs = defaults.write_deadline_secs;
        }
        if self.keepalive_interval_secs == 0 || self.keepalive_interval_secs >= self.read_deadline_secs
        {
            warn!(
                keepalive = self.keepalive_interval_secs,
                read_deadline = self.read_deadline_secs,
                "keepalive must be shorter than the read deadline; using a third of it"
            );
            self.keepalive_interval_secs = (self.read_deadline_secs / 3).max(1);
        }
    }
}

/// Timings of the reconciliation loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub tick_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub boot_stale_after_secs: u64,
    /// Upper bound applied to every store round-trip issued by background work and services.
    pub operation_timeout_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            heartbeat_timeout_secs: 60,
            boot_stale_after_secs: 120,
            operation_timeout_secs: 5,
        }
    }
}

impl ReconcileConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn boot_stale_after(&self) -> Duration {
        Duration::from_secs(self.boot_stale_after_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    fn sanitize(&mut self) {
        let defaults = Self::default();
        if self.tick_interval_secs == 0 {
            warn!("reconcile.tick_interval_secs must be positive; using default");
            self.tick_interval_secs = defaults.tick_interval_secs;
        }
        if self.heartbeat_timeout_secs <= self.tick_interval_secs {
            warn!(
                heartbeat_timeout = self.heartbeat_timeout_secs,
                tick_interval = self.tick_interval_secs,
                "heartbeat timeout must exceed the tick interval; doubling the tick interval"
            );
            self.heartbeat_timeout_secs = self.tick_interval_secs * 2;
        }
        if self.operation_timeout_secs == 0 {
            warn!("reconcile.operation_timeout_secs must be positive; using default");
            self.operation_timeout_secs = defaults.operation_timeout_secs;
        }
    }
}

/// Mini-game sequence and room defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub sequence: Vec<String>,
    pub round_duration_secs: u32,
    pub team_labels: Vec<String>,
    pub default_max_players: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            sequence: ["FishScoopingScene", "CAROUSEL", "SHOOT", "COTTON", "WORSHIP"]
                .into_iter()
                .map(String::from)
                .collect(),
            round_duration_secs: 60,
            team_labels: vec!["red".to_string(), "blue".to_string()],
            default_max_players: 8,
        }
    }
}

impl GameConfig {
    /// Number of rounds a room plays before the sequence is exhausted.
    pub fn total_rounds(&self) -> u32 {
        self.sequence.len() as u32
    }

    /// Game key for a 1-based round index.
    pub fn game_key(&self, round_index: u32) -> Option<&str> {
        let position = usize::try_from(round_index).ok()?.checked_sub(1)?;
        self.sequence.get(position).map(String::as_str)
    }

    fn sanitize(&mut self) {
        let defaults = Self::default();
        self.sequence.retain(|key| !key.trim().is_empty());
        if self.sequence.is_empty() {
            warn!("game.sequence is empty; using default sequence");
            self.sequence = defaults.sequence;
        }
        self.team_labels.retain(|label| !label.trim().is_empty());
        if self.team_labels.is_empty() {
            warn!("game.team_labels is empty; using default labels");
            self.team_labels = defaults.team_labels;
        }
        if self.default_max_players == 0 {
            self.default_max_players = defaults.default_max_players;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    pub hub: HubConfig,
    pub reconcile: ReconcileConfig,
    pub game: GameConfig,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        rounds = config.game.total_rounds(),
                        queue_capacity = config.hub.queue_capacity,
                        "loaded config"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON document and replace unusable values with defaults.
    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        let mut config: Self = serde_json::from_str(contents)?;
        config.sanitize();
        Ok(config)
    }

    /// Timeout applied to store operations.
    pub fn operation_timeout(&self) -> Duration {
        self.reconcile.operation_timeout()
    }

    fn sanitize(&mut self) {
        self.hub.sanitize();
        self.reconcile.sanitize();
        self.game.sanitize();
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config =
            AppConfig::from_json(r#"{ "hub": { "queue_capacity": 8, "overflow": "drop" } }"#)
                .unwrap();
        assert_eq!(config.hub.queue_capacity, 8);
        assert_eq!(config.hub.overflow, OverflowPolicy::Drop);
        assert_eq!(config.hub.broadcast_buffer, 512);
        assert_eq!(config.reconcile.tick_interval_secs, 30);
        assert_eq!(config.game.total_rounds(), 5);
    }

    #[test]
    fn unusable_values_fall_back() {
        let config = AppConfig::from_json(
            r#"{
                "hub": { "queue_capacity": 0 },
                "reconcile": { "tick_interval_secs": 30, "heartbeat_timeout_secs": 10 },
                "game": { "sequence": [], "team_labels": [" "] }
            }"#,
        )
        .unwrap();
        assert_eq!(config.hub.queue_capacity, 256);
        assert_eq!(config.reconcile.heartbeat_timeout_secs, 60);
        assert_eq!(config.game.sequence[0], "FishScoopingScene");
        assert_eq!(config.game.team_labels, vec!["red", "blue"]);
    }

    #[test]
    fn game_keys_are_one_based() {
        let game = GameConfig::default();
        assert_eq!(game.game_key(0), None);
        assert_eq!(game.game_key(1), Some("FishScoopingScene"));
        assert_eq!(game.game_key(2), Some("CAROUSEL"));
        assert_eq!(game.game_key(6), None);
    }
}
