use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Network error: {0}")]
    NetworkError(#[from] io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Message bus error: {0}")]
    BusError(#[from] BusError),

    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Client manager error: {0}")]
    ManagerError(#[from] ManagerError),

    #[error("Shutdown of {0} timed out")]
    ShutdownTimeout(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDeError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Registry conditions reported by the client manager
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManagerError {
    #[error("callsign {0} is already registered")]
    CallsignInUse(String),
    #[error("callsign {0} not found")]
    CallsignNotFound(String),
    #[error("no client for cid {0}")]
    CidNotFound(i32),
    #[error("client {0} is disconnected")]
    ClientDisconnected(String),
    #[error("outbound queue of {0} is full")]
    QueueFull(String),
    #[error("server is full")]
    ServerFull,
    #[error("server is shutting down")]
    ShuttingDown,
    #[error("shutdown timed out")]
    ShutdownTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("message bus is closed")]
    Closed,
    #[error("unexpected message type, wanted {0}")]
    DataType(&'static str),
    #[error("callsign {0} not found")]
    CallsignNotFound(String),
    #[error("subscriber failed: {0}")]
    Subscriber(String),
    #[error("message bus shutdown timed out")]
    ShutdownTimeout,
}

/// Failures of the collaborator stores (users, flight plans, audit, weather)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("user {0} not found")]
    UserNotFound(i32),
    #[error("no flight plan for cid {0}")]
    FlightPlanNotFound(i32),
    #[error("flight plan is locked")]
    FlightPlanLocked,
    #[error("no METAR for {0}")]
    MetarNotFound(String),
    #[error("password hash error: {0}")]
    Hash(String),
    #[error("invalid token: {0}")]
    InvalidToken(String),
}

impl From<ManagerError> for BusError {
    fn from(err: ManagerError) -> Self {
        match err {
            ManagerError::CallsignNotFound(callsign) => BusError::CallsignNotFound(callsign),
            other => BusError::Subscriber(other.to_string()),
        }
    }
}

impl From<StoreError> for BusError {
    fn from(err: StoreError) -> Self {
        BusError::Subscriber(err.to_string())
    }
}

impl From<bcrypt::BcryptError> for StoreError {
    fn from(err: bcrypt::BcryptError) -> Self {
        StoreError::Hash(err.to_string())
    }
}
