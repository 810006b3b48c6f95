//! Server configuration, loaded from TOML.
//!
//! A missing file is created with defaults on first start; the loaded file is
//! validated before the server uses it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fsd_shared::{is_valid_callsign, Facility, Rating, DEFAULT_PORT, DEFAULT_SERVER_NAME};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// The login secret is a password checked against the stored hash
    Password,
    /// The login secret is an HS512 token issued by the web surface
    Jwt,
}

/// Per-facility visibility caps in nautical miles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeLimits {
    pub obs: f64,
    pub del: f64,
    pub gnd: f64,
    pub rmp: f64,
    pub twr: f64,
    pub app: f64,
    pub ctr: f64,
    pub fss: f64,
    pub sup: f64,
    pub adm: f64,
}

impl Default for RangeLimits {
    fn default() -> Self {
        Self {
            obs: 300.0,
            del: 20.0,
            gnd: 20.0,
            rmp: 20.0,
            twr: 50.0,
            app: 150.0,
            ctr: 300.0,
            fss: 1500.0,
            sup: 1500.0,
            adm: 1500.0,
        }
    }
}

impl RangeLimits {
    /// Cap for a controller facility; pilots have none
    pub fn limit_for(&self, facility: Facility) -> Option<f64> {
        let limit = match facility {
            Facility::OBS => self.obs,
            Facility::DEL => self.del,
            Facility::GND => self.gnd,
            Facility::RMP => self.rmp,
            Facility::TWR => self.twr,
            Facility::APP => self.app,
            Facility::CTR => self.ctr,
            Facility::FSS => self.fss,
            Facility::SUP => self.sup,
            Facility::ADM => self.adm,
            _ => return None,
        };
        Some(limit)
    }
}

/// Account seeded into the in-memory user store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedUser {
    pub cid: i32,
    pub real_name: String,
    pub rating: Rating,
    pub password_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub server_name: String,
    pub server_version: String,
    pub motd: Vec<String>,
    pub max_clients: usize,
    pub simulator_server: bool,
    pub refuse_out_range: bool,
    pub enable_visual_pilot: bool,
    pub auth_mode: AuthMode,
    pub jwt_secret: String,
    pub web_client_prefix: String,
    pub web_client_suffix: String,
    pub max_line_length: usize,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub close_grace_secs: u64,
    pub reconnect_window_secs: u64,
    pub write_queue_size: usize,
    pub broadcast_pool_size: usize,
    pub message_bus_capacity: usize,
    pub whazzup_ttl_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whazzup_path: Option<PathBuf>,
    pub shutdown_timeout_secs: u64,
    pub pilot_visual_range: f64,
    pub bcrypt_cost: u32,
    // tables last so the TOML output stays valid
    pub range_limits: RangeLimits,
    pub weather: BTreeMap<String, String>,
    pub users: Vec<SeedUser>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: DEFAULT_PORT,
            server_name: DEFAULT_SERVER_NAME.to_owned(),
            server_version: env!("CARGO_PKG_VERSION").to_owned(),
            motd: vec!["Welcome to the FSD server".to_owned()],
            max_clients: 1000,
            simulator_server: false,
            refuse_out_range: false,
            enable_visual_pilot: false,
            auth_mode: AuthMode::Password,
            jwt_secret: String::new(),
            web_client_prefix: String::new(),
            web_client_suffix: String::new(),
            max_line_length: 4096,
            read_timeout_secs: 60,
            write_timeout_secs: 5,
            close_grace_secs: 3,
            reconnect_window_secs: 30,
            write_queue_size: 256,
            broadcast_pool_size: 128,
            message_bus_capacity: 128,
            whazzup_ttl_secs: 5,
            whazzup_path: None,
            shutdown_timeout_secs: 5,
            pilot_visual_range: 40.0,
            bcrypt_cost: 10,
            range_limits: RangeLimits::default(),
            weather: BTreeMap::new(),
            users: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_callsign(&self.server_name) {
            return Err(ConfigError::ValidationError(format!(
                "server name {:?} is not a valid callsign",
                self.server_name
            )));
        }

        if self.max_line_length < 64 {
            return Err(ConfigError::ValidationError(
                "max_line_length must be at least 64".to_string(),
            ));
        }

        if self.write_queue_size == 0
            || self.broadcast_pool_size == 0
            || self.message_bus_capacity == 0
        {
            return Err(ConfigError::ValidationError(
                "queue and pool sizes must be positive".to_string(),
            ));
        }

        if self.whazzup_ttl_secs == 0 || self.read_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "whazzup_ttl_secs and read_timeout_secs must be positive".to_string(),
            ));
        }

        if self.auth_mode == AuthMode::Jwt && self.jwt_secret.is_empty() {
            return Err(ConfigError::ValidationError(
                "jwt_secret is required when auth_mode is jwt".to_string(),
            ));
        }

        if !(4..=31).contains(&self.bcrypt_cost) {
            return Err(ConfigError::ValidationError(
                "bcrypt_cost must be between 4 and 31".to_string(),
            ));
        }

        if self.pilot_visual_range < 0.0 {
            return Err(ConfigError::ValidationError(
                "pilot_visual_range cannot be negative".to_string(),
            ));
        }

        Ok(())
    }

    pub fn to_config_file(&self, filename: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        let config_str = toml::to_string(self)?;
        std::fs::write(filename, config_str)?;
        Ok(())
    }

    pub fn from_config_file(filename: &Path) -> Result<Self, ConfigError> {
        if !filename.exists() {
            Self::default().to_config_file(filename)?;
        }
        let config_str = std::fs::read_to_string(filename)?;
        let config: Self = toml::from_str(&config_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn web_clients_enabled(&self) -> bool {
        !(self.web_client_prefix.is_empty() && self.web_client_suffix.is_empty())
    }

    /// True when `callsign` names a websocket tunnel client
    pub fn is_web_client(&self, callsign: &str) -> bool {
        self.web_clients_enabled()
            && callsign.starts_with(&self.web_client_prefix)
            && callsign.ends_with(&self.web_client_suffix)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_secs(self.close_grace_secs)
    }

    pub fn reconnect_window(&self) -> Duration {
        Duration::from_secs(self.reconnect_window_secs)
    }

    pub fn whazzup_ttl(&self) -> Duration {
        Duration::from_secs(self.whazzup_ttl_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
