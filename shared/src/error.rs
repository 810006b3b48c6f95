//! Wire-level error taxonomy carried by `$ER` packets.

use crate::codec::build_packet;
use std::fmt;

/// Error kinds with their FSD wire indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    CallsignInUse = 1,
    CallsignInvalid = 2,
    AlreadyRegistered = 3,
    Syntax = 4,
    InvalidSrcCallsign = 5,
    InvalidCidPassword = 6,
    NoCallsignFound = 7,
    NoFlightPlan = 8,
    NoWeatherProfile = 9,
    InvalidProtocolVision = 10,
    RequestLevelTooHigh = 11,
    ServerFull = 12,
    CidSuspended = 13,
    InvalidCtrl = 14,
    RatingTooLow = 15,
    InvalidClient = 16,
    AuthTimeout = 17,
    Custom = 18,
}

impl ErrorKind {
    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(index: u8) -> Option<ErrorKind> {
        use ErrorKind::*;
        let kind = match index {
            1 => CallsignInUse,
            2 => CallsignInvalid,
            3 => AlreadyRegistered,
            4 => Syntax,
            5 => InvalidSrcCallsign,
            6 => InvalidCidPassword,
            7 => NoCallsignFound,
            8 => NoFlightPlan,
            9 => NoWeatherProfile,
            10 => InvalidProtocolVision,
            11 => RequestLevelTooHigh,
            12 => ServerFull,
            13 => CidSuspended,
            14 => InvalidCtrl,
            15 => RatingTooLow,
            16 => InvalidClient,
            17 => AuthTimeout,
            18 => Custom,
            _ => return None,
        };
        Some(kind)
    }

    /// Text shown to the user when no custom message is given
    pub fn default_message(self) -> &'static str {
        use ErrorKind::*;
        match self {
            CallsignInUse => "Callsign in use",
            CallsignInvalid => "Invalid callsign",
            AlreadyRegistered => "Already registered",
            Syntax => "Syntax error",
            InvalidSrcCallsign => "Invalid source callsign",
            InvalidCidPassword => "Invalid CID/password",
            NoCallsignFound => "No such callsign",
            NoFlightPlan => "No flightplan",
            NoWeatherProfile => "No such weather profile",
            InvalidProtocolVision => "Invalid protocol revision",
            RequestLevelTooHigh => "Requested level too high",
            ServerFull => "Too many clients connected",
            CidSuspended => "CID/PID was suspended",
            InvalidCtrl => "Not valid control",
            RatingTooLow => "Rating too low for this position",
            InvalidClient => "Unauthorized client software",
            AuthTimeout => "Authentication timeout",
            Custom => "Error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A protocol-level failure reported to the offending client.
///
/// `fatal` results close the session once the `$ER` packet has been flushed.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolError {
    pub kind: ErrorKind,
    pub fatal: bool,
    pub param: String,
    pub message: Option<String>,
}

impl ProtocolError {
    pub fn new(kind: ErrorKind, fatal: bool, param: impl Into<String>) -> Self {
        Self {
            kind,
            fatal,
            param: param.into(),
            message: None,
        }
    }

    pub fn fatal(kind: ErrorKind, param: impl Into<String>) -> Self {
        Self::new(kind, true, param)
    }

    pub fn non_fatal(kind: ErrorKind, param: impl Into<String>) -> Self {
        Self::new(kind, false, param)
    }

    pub fn custom(fatal: bool, param: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Custom, fatal, param).with_message(message)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn message(&self) -> &str {
        self.message
            .as_deref()
            .unwrap_or_else(|| self.kind.default_message())
    }

    /// Renders `$ER<server>:<to>:<index>:<param>:<message>`
    pub fn to_line(&self, server_name: &str, to: &str) -> String {
        let index = self.kind.index().to_string();
        build_packet(
            "$ER",
            &[server_name, to, &index, &self.param, self.message()],
        )
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.kind, self.param, self.message())
    }
}

impl std::error::Error for ProtocolError {}
