//! Command table and typed command values.
//!
//! Every command is described by a [`CommandSpec`] in [`COMMAND_TABLE`]: its
//! tag, the minimum field count, an optional maximum (the last field keeps
//! embedded colons) and whether a parse failure terminates the session.
//! Parsers are pure: a line goes in, a [`Command`] or a [`ParseFailure`]
//! comes out.

use crate::codec::{build_packet_owned, split_fields, trim_terminator};
use crate::error::{ErrorKind, ProtocolError};
use crate::frequency::Frequency;
use crate::geo::Position;
use crate::rating::{Facility, Rating};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    AddAtc,
    AddPilot,
    RemoveAtc,
    RemovePilot,
    AtcPosition,
    PilotPosition,
    AtcSubVisPoint,
    TextMessage,
    WeatherQuery,
    WeatherResponse,
    ClientQuery,
    ClientResponse,
    ClientIdentification,
    FlightPlan,
    AtcEditPlan,
    HandoffRequest,
    HandoffAccept,
    ProController,
    PlaneInfo,
    KillClient,
    Error,
    Ping,
    Pong,
}

/// Static description of one command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub kind: CommandKind,
    pub tag: &'static str,
    pub min_fields: usize,
    pub max_fields: Option<usize>,
    pub fatal: bool,
}

const fn spec(
    kind: CommandKind,
    tag: &'static str,
    min_fields: usize,
    max_fields: Option<usize>,
    fatal: bool,
) -> CommandSpec {
    CommandSpec {
        kind,
        tag,
        min_fields,
        max_fields,
        fatal,
    }
}

/// Three-character tags come first so that prefix matching never picks a
/// one-character tag for a longer command.
pub const COMMAND_TABLE: &[CommandSpec] = &[
    spec(CommandKind::AddAtc, "#AA", 7, None, true),
    spec(CommandKind::AddPilot, "#AP", 8, None, true),
    spec(CommandKind::RemoveAtc, "#DA", 1, None, false),
    spec(CommandKind::RemovePilot, "#DP", 1, None, false),
    spec(CommandKind::TextMessage, "#TM", 3, Some(3), false),
    spec(CommandKind::ProController, "#PC", 3, None, false),
    spec(CommandKind::PlaneInfo, "#SB", 3, None, false),
    spec(CommandKind::WeatherQuery, "$AX", 4, None, false),
    spec(CommandKind::WeatherResponse, "$AR", 4, Some(4), false),
    spec(CommandKind::ClientQuery, "$CQ", 3, None, false),
    spec(CommandKind::ClientResponse, "$CR", 3, None, false),
    spec(CommandKind::ClientIdentification, "$ID", 8, None, false),
    spec(CommandKind::FlightPlan, "$FP", 17, Some(17), false),
    spec(CommandKind::AtcEditPlan, "$AM", 18, Some(18), false),
    spec(CommandKind::HandoffRequest, "$HO", 3, None, false),
    spec(CommandKind::HandoffAccept, "$HA", 3, None, false),
    spec(CommandKind::KillClient, "$!!", 2, Some(3), false),
    spec(CommandKind::Error, "$ER", 4, Some(5), false),
    spec(CommandKind::Ping, "$PI", 2, None, false),
    spec(CommandKind::Pong, "$PO", 2, None, false),
    spec(CommandKind::AtcPosition, "%", 7, None, false),
    spec(CommandKind::PilotPosition, "@", 10, None, false),
    spec(CommandKind::AtcSubVisPoint, "'", 3, None, false),
];

impl CommandKind {
    pub fn spec(self) -> &'static CommandSpec {
        COMMAND_TABLE
            .iter()
            .find(|s| s.kind == self)
            .unwrap_or(&COMMAND_TABLE[0])
    }

    pub fn tag(self) -> &'static str {
        self.spec().tag
    }
}

/// Finds the table entry whose tag prefixes `line`.
pub fn lookup(line: &str) -> Option<&'static CommandSpec> {
    COMMAND_TABLE.iter().find(|s| line.starts_with(s.tag))
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("unknown command")]
    UnknownCommand,
    #[error("{tag} expects at least {expected} fields, got {got}")]
    TooFewFields {
        tag: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

impl ParseError {
    fn field(field: &'static str, value: &str) -> Self {
        ParseError::InvalidField {
            field,
            value: value.to_string(),
        }
    }
}

/// A parse error together with the table entry that produced it
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{error}")]
pub struct ParseFailure {
    pub spec: Option<&'static CommandSpec>,
    pub error: ParseError,
}

impl ParseFailure {
    pub fn is_fatal(&self) -> bool {
        self.spec.map(|s| s.fatal).unwrap_or(false)
    }

    pub fn into_protocol_error(self) -> ProtocolError {
        let fatal = self.is_fatal();
        let param = match &self.error {
            ParseError::UnknownCommand => String::new(),
            ParseError::TooFewFields { tag, .. } => tag.to_string(),
            ParseError::InvalidField { field, .. } => field.to_string(),
        };
        ProtocolError::new(ErrorKind::Syntax, fatal, param)
    }
}

fn parse_num<T: FromStr>(field: &'static str, value: &str) -> Result<T, ParseError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ParseError::field(field, value))
}

/// Empty numeric fields are common in flight plans and mean zero
fn parse_num_or_zero<T: FromStr + Default>(field: &'static str, value: &str) -> Result<T, ParseError> {
    if value.trim().is_empty() {
        Ok(T::default())
    } else {
        parse_num(field, value)
    }
}

fn parse_rating(value: &str) -> Result<Rating, ParseError> {
    let raw: i32 = parse_num("rating", value)?;
    Rating::try_from(raw).map_err(|_| ParseError::field("rating", value))
}

fn parse_position(lat: &str, lon: &str) -> Result<Position, ParseError> {
    Ok(Position::new(
        parse_num("latitude", lat)?,
        parse_num("longitude", lon)?,
    ))
}

fn parse_frequency(value: &str) -> Result<Frequency, ParseError> {
    Frequency::from_wire(value).ok_or_else(|| ParseError::field("frequency", value))
}

fn opt_field<'a>(fields: &[&'a str], index: usize) -> Option<&'a str> {
    fields.get(index).copied().filter(|f| !f.is_empty())
}

fn rest(fields: &[&str], from: usize) -> Vec<String> {
    fields
        .iter()
        .skip(from)
        .map(|f| f.to_string())
        .collect()
}

/// Anything that can render itself back onto the wire
pub trait FsdPacket {
    fn kind(&self) -> CommandKind;

    fn to_fields(&self) -> Vec<String>;

    fn to_line(&self) -> String {
        build_packet_owned(self.kind().tag(), &self.to_fields())
    }
}

/// `#AA` controller login
#[derive(Debug, Clone, PartialEq)]
pub struct AddAtc {
    pub callsign: String,
    pub server: String,
    pub real_name: String,
    pub cid: i32,
    pub password: String,
    pub rating: Rating,
    pub protocol: u32,
    pub sim_type: Option<u32>,
    pub position: Option<Position>,
    pub visual_range: Option<u32>,
}

impl AddAtc {
    fn parse(fields: &[&str]) -> Result<Self, ParseError> {
        let sim_type = opt_field(fields, 7)
            .map(|v| parse_num("sim type", v))
            .transpose()?;
        let position = match (opt_field(fields, 8), opt_field(fields, 9)) {
            (Some(lat), Some(lon)) => Some(parse_position(lat, lon)?),
            _ => None,
        };
        let visual_range = opt_field(fields, 10)
            .map(|v| parse_num("visual range", v))
            .transpose()?;

        Ok(Self {
            callsign: fields[0].to_string(),
            server: fields[1].to_string(),
            real_name: fields[2].to_string(),
            cid: parse_num("cid", fields[3])?,
            password: fields[4].to_string(),
            rating: parse_rating(fields[5])?,
            protocol: parse_num("protocol", fields[6])?,
            sim_type,
            position,
            visual_range,
        })
    }

    /// Copy with the secret cleared, safe to relay to other clients
    pub fn redacted(&self) -> Self {
        Self {
            password: String::new(),
            ..self.clone()
        }
    }
}

impl FsdPacket for AddAtc {
    fn kind(&self) -> CommandKind {
        CommandKind::AddAtc
    }

    fn to_fields(&self) -> Vec<String> {
        let mut fields = vec![
            self.callsign.clone(),
            self.server.clone(),
            self.real_name.clone(),
            self.cid.to_string(),
            self.password.clone(),
            self.rating.as_i32().to_string(),
            self.protocol.to_string(),
        ];
        if let Some(sim_type) = self.sim_type {
            fields.push(sim_type.to_string());
            if let Some(position) = self.position {
                fields.push(position.latitude.to_string());
                fields.push(position.longitude.to_string());
                if let Some(range) = self.visual_range {
                    fields.push(range.to_string());
                }
            }
        }
        fields
    }
}

/// `#AP` pilot login
#[derive(Debug, Clone, PartialEq)]
pub struct AddPilot {
    pub callsign: String,
    pub server: String,
    pub cid: i32,
    pub password: String,
    pub rating: Rating,
    pub protocol: u32,
    pub sim_type: u32,
    pub real_name: String,
}

impl AddPilot {
    fn parse(fields: &[&str]) -> Result<Self, ParseError> {
        Ok(Self {
            callsign: fields[0].to_string(),
            server: fields[1].to_string(),
            cid: parse_num("cid", fields[2])?,
            password: fields[3].to_string(),
            rating: parse_rating(fields[4])?,
            protocol: parse_num("protocol", fields[5])?,
            sim_type: parse_num("sim type", fields[6])?,
            real_name: fields[7].to_string(),
        })
    }

    pub fn redacted(&self) -> Self {
        Self {
            password: String::new(),
            ..self.clone()
        }
    }
}

impl FsdPacket for AddPilot {
    fn kind(&self) -> CommandKind {
        CommandKind::AddPilot
    }

    fn to_fields(&self) -> Vec<String> {
        vec![
            self.callsign.clone(),
            self.server.clone(),
            self.cid.to_string(),
            self.password.clone(),
            self.rating.as_i32().to_string(),
            self.protocol.to_string(),
            self.sim_type.to_string(),
            self.real_name.clone(),
        ]
    }
}

/// `#DA` / `#DP` logoff
#[derive(Debug, Clone, PartialEq)]
pub struct RemoveClient {
    pub is_atc: bool,
    pub callsign: String,
    pub cid: Option<String>,
}

impl RemoveClient {
    pub fn new(is_atc: bool, callsign: impl Into<String>) -> Self {
        Self {
            is_atc,
            callsign: callsign.into(),
            cid: None,
        }
    }

    fn parse(is_atc: bool, fields: &[&str]) -> Self {
        Self {
            is_atc,
            callsign: fields[0].to_string(),
            cid: opt_field(fields, 1).map(str::to_string),
        }
    }
}

impl FsdPacket for RemoveClient {
    fn kind(&self) -> CommandKind {
        if self.is_atc {
            CommandKind::RemoveAtc
        } else {
            CommandKind::RemovePilot
        }
    }

    fn to_fields(&self) -> Vec<String> {
        let mut fields = vec![self.callsign.clone()];
        if let Some(cid) = &self.cid {
            fields.push(cid.clone());
        }
        fields
    }
}

/// `%` controller position
#[derive(Debug, Clone, PartialEq)]
pub struct AtcPosition {
    pub callsign: String,
    pub frequency: Frequency,
    pub facility: Facility,
    pub visual_range: u32,
    pub rating: Rating,
    pub position: Position,
    pub altitude: Option<i32>,
}

impl AtcPosition {
    fn parse(fields: &[&str]) -> Result<Self, ParseError> {
        let facility_index: u32 = parse_num("facility", fields[2])?;
        let facility = Facility::from_index(facility_index)
            .ok_or_else(|| ParseError::field("facility", fields[2]))?;
        Ok(Self {
            callsign: fields[0].to_string(),
            frequency: parse_frequency(fields[1])?,
            facility,
            visual_range: parse_num("visual range", fields[3])?,
            rating: parse_rating(fields[4])?,
            position: parse_position(fields[5], fields[6])?,
            altitude: opt_field(fields, 7)
                .map(|v| parse_num("altitude", v))
                .transpose()?,
        })
    }
}

impl FsdPacket for AtcPosition {
    fn kind(&self) -> CommandKind {
        CommandKind::AtcPosition
    }

    fn to_fields(&self) -> Vec<String> {
        let mut fields = vec![
            self.callsign.clone(),
            self.frequency.to_wire(),
            self.facility.index().unwrap_or(0).to_string(),
            self.visual_range.to_string(),
            self.rating.as_i32().to_string(),
            self.position.latitude.to_string(),
            self.position.longitude.to_string(),
        ];
        if let Some(altitude) = self.altitude {
            fields.push(altitude.to_string());
        }
        fields
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransponderMode {
    Standby,
    Normal,
    Ident,
}

impl TransponderMode {
    fn parse(value: &str) -> Result<Self, ParseError> {
        match value {
            "S" => Ok(TransponderMode::Standby),
            "N" => Ok(TransponderMode::Normal),
            "Y" => Ok(TransponderMode::Ident),
            other => Err(ParseError::field("transponder mode", other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransponderMode::Standby => "S",
            TransponderMode::Normal => "N",
            TransponderMode::Ident => "Y",
        }
    }
}

/// Attitude unpacked from the pitch/bank/heading word
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attitude {
    pub pitch: f64,
    pub bank: f64,
    pub heading: f64,
    pub on_ground: bool,
}

const PBH_UNIT: f64 = 360.0 / 1024.0;

fn signed_10bit(value: u32) -> i32 {
    let v = (value & 0x3FF) as i32;
    if v >= 512 {
        v - 1024
    } else {
        v
    }
}

/// Pitch and bank are signed 10-bit fields at bits 22 and 12, heading is
/// unsigned at bit 2, bit 1 flags on-ground.
pub fn decode_pbh(pbh: u32) -> Attitude {
    Attitude {
        pitch: signed_10bit(pbh >> 22) as f64 * PBH_UNIT,
        bank: signed_10bit(pbh >> 12) as f64 * PBH_UNIT,
        heading: ((pbh >> 2) & 0x3FF) as f64 * PBH_UNIT,
        on_ground: pbh & 0b10 != 0,
    }
}

/// `@` pilot position
#[derive(Debug, Clone, PartialEq)]
pub struct PilotPosition {
    pub mode: TransponderMode,
    pub callsign: String,
    pub transponder: u16,
    pub rating: Rating,
    pub position: Position,
    pub altitude: i32,
    pub groundspeed: i32,
    pub pbh: u32,
    pub altitude_difference: i32,
}

impl PilotPosition {
    fn parse(fields: &[&str]) -> Result<Self, ParseError> {
        Ok(Self {
            mode: TransponderMode::parse(fields[0])?,
            callsign: fields[1].to_string(),
            transponder: parse_num("transponder", fields[2])?,
            rating: parse_rating(fields[3])?,
            position: parse_position(fields[4], fields[5])?,
            altitude: parse_num("altitude", fields[6])?,
            groundspeed: parse_num("groundspeed", fields[7])?,
            pbh: parse_num("pbh", fields[8])?,
            altitude_difference: parse_num("altitude difference", fields[9])?,
        })
    }

    pub fn attitude(&self) -> Attitude {
        decode_pbh(self.pbh)
    }
}

impl FsdPacket for PilotPosition {
    fn kind(&self) -> CommandKind {
        CommandKind::PilotPosition
    }

    fn to_fields(&self) -> Vec<String> {
        vec![
            self.mode.as_str().to_string(),
            self.callsign.clone(),
            format!("{:04}", self.transponder),
            self.rating.as_i32().to_string(),
            self.position.latitude.to_string(),
            self.position.longitude.to_string(),
            self.altitude.to_string(),
            self.groundspeed.to_string(),
            self.pbh.to_string(),
            self.altitude_difference.to_string(),
        ]
    }
}

/// `'` extended visibility centre
#[derive(Debug, Clone, PartialEq)]
pub struct SubVisPoint {
    pub callsign: String,
    pub position: Position,
}

impl FsdPacket for SubVisPoint {
    fn kind(&self) -> CommandKind {
        CommandKind::AtcSubVisPoint
    }

    fn to_fields(&self) -> Vec<String> {
        vec![
            self.callsign.clone(),
            self.position.latitude.to_string(),
            self.position.longitude.to_string(),
        ]
    }
}

/// `#TM` text message; the message keeps embedded colons
#[derive(Debug, Clone, PartialEq)]
pub struct TextMessage {
    pub from: String,
    pub to: String,
    pub message: String,
}

impl TextMessage {
    pub fn new(from: impl Into<String>, to: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            message: message.into(),
        }
    }
}

impl FsdPacket for TextMessage {
    fn kind(&self) -> CommandKind {
        CommandKind::TextMessage
    }

    fn to_fields(&self) -> Vec<String> {
        vec![self.from.clone(), self.to.clone(), self.message.clone()]
    }
}

/// `$AX` weather request
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherQuery {
    pub from: String,
    pub to: String,
    pub kind: String,
    pub station: String,
}

impl FsdPacket for WeatherQuery {
    fn kind(&self) -> CommandKind {
        CommandKind::WeatherQuery
    }

    fn to_fields(&self) -> Vec<String> {
        vec![
            self.from.clone(),
            self.to.clone(),
            self.kind.clone(),
            self.station.clone(),
        ]
    }
}

/// `$AR` weather report
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherResponse {
    pub from: String,
    pub to: String,
    pub kind: String,
    pub report: String,
}

impl FsdPacket for WeatherResponse {
    fn kind(&self) -> CommandKind {
        CommandKind::WeatherResponse
    }

    fn to_fields(&self) -> Vec<String> {
        vec![
            self.from.clone(),
            self.to.clone(),
            self.kind.clone(),
            self.report.clone(),
        ]
    }
}

/// `$CQ` client query
#[derive(Debug, Clone, PartialEq)]
pub struct ClientQuery {
    pub from: String,
    pub to: String,
    pub query: String,
    pub payload: Vec<String>,
}

impl ClientQuery {
    pub fn new(from: impl Into<String>, to: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            query: query.into(),
            payload: Vec::new(),
        }
    }
}

impl FsdPacket for ClientQuery {
    fn kind(&self) -> CommandKind {
        CommandKind::ClientQuery
    }

    fn to_fields(&self) -> Vec<String> {
        let mut fields = vec![self.from.clone(), self.to.clone(), self.query.clone()];
        fields.extend(self.payload.iter().cloned());
        fields
    }
}

/// `$CR` client response
#[derive(Debug, Clone, PartialEq)]
pub struct ClientResponse {
    pub from: String,
    pub to: String,
    pub query: String,
    pub payload: Vec<String>,
}

impl ClientResponse {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        query: impl Into<String>,
        payload: Vec<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            query: query.into(),
            payload,
        }
    }
}

impl FsdPacket for ClientResponse {
    fn kind(&self) -> CommandKind {
        CommandKind::ClientResponse
    }

    fn to_fields(&self) -> Vec<String> {
        let mut fields = vec![self.from.clone(), self.to.clone(), self.query.clone()];
        fields.extend(self.payload.iter().cloned());
        fields
    }
}

/// `$ID` client software identification
#[derive(Debug, Clone, PartialEq)]
pub struct ClientIdentification {
    pub callsign: String,
    pub server: String,
    pub client_id: String,
    pub client_name: String,
    pub major_version: u32,
    pub minor_version: u32,
    pub cid: String,
    pub sys_uid: String,
    pub challenge: Option<String>,
}

impl ClientIdentification {
    fn parse(fields: &[&str]) -> Result<Self, ParseError> {
        Ok(Self {
            callsign: fields[0].to_string(),
            server: fields[1].to_string(),
            client_id: fields[2].to_string(),
            client_name: fields[3].to_string(),
            major_version: parse_num("major version", fields[4])?,
            minor_version: parse_num("minor version", fields[5])?,
            cid: fields[6].to_string(),
            sys_uid: fields[7].to_string(),
            challenge: opt_field(fields, 8).map(str::to_string),
        })
    }

    /// `name/major.minor`, recorded as the user agent in audit entries
    pub fn user_agent(&self) -> String {
        format!(
            "{}/{}.{}",
            self.client_name, self.major_version, self.minor_version
        )
    }
}

impl FsdPacket for ClientIdentification {
    fn kind(&self) -> CommandKind {
        CommandKind::ClientIdentification
    }

    fn to_fields(&self) -> Vec<String> {
        let mut fields = vec![
            self.callsign.clone(),
            self.server.clone(),
            self.client_id.clone(),
            self.client_name.clone(),
            self.major_version.to_string(),
            self.minor_version.to_string(),
            self.cid.clone(),
            self.sys_uid.clone(),
        ];
        if let Some(challenge) = &self.challenge {
            fields.push(challenge.clone());
        }
        fields
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlightRules {
    #[serde(rename = "V")]
    Vfr,
    #[serde(rename = "I")]
    Ifr,
    #[serde(rename = "S")]
    Svfr,
    #[serde(rename = "Y")]
    IfrThenVfr,
    #[serde(rename = "Z")]
    VfrThenIfr,
}

impl FlightRules {
    fn parse(value: &str) -> Result<Self, ParseError> {
        match value.trim().to_ascii_uppercase().as_str() {
            "V" => Ok(FlightRules::Vfr),
            "I" => Ok(FlightRules::Ifr),
            "S" => Ok(FlightRules::Svfr),
            "Y" => Ok(FlightRules::IfrThenVfr),
            "Z" => Ok(FlightRules::VfrThenIfr),
            _ => Err(ParseError::field("flight rules", value)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FlightRules::Vfr => "V",
            FlightRules::Ifr => "I",
            FlightRules::Svfr => "S",
            FlightRules::IfrThenVfr => "Y",
            FlightRules::VfrThenIfr => "Z",
        }
    }
}

/// The fifteen flight plan fields shared by `$FP` and `$AM`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightPlanFields {
    pub flight_rules: FlightRules,
    pub aircraft: String,
    pub true_airspeed: i32,
    pub departure: String,
    pub departure_time: i32,
    pub actual_departure_time: i32,
    pub cruise_altitude: String,
    pub arrival: String,
    pub route_hours: i32,
    pub route_minutes: i32,
    pub fuel_hours: i32,
    pub fuel_minutes: i32,
    pub alternate: String,
    pub remarks: String,
    pub route: String,
}

impl FlightPlanFields {
    fn parse(fields: &[&str]) -> Result<Self, ParseError> {
        Ok(Self {
            flight_rules: FlightRules::parse(fields[0])?,
            aircraft: fields[1].to_string(),
            true_airspeed: parse_num_or_zero("true airspeed", fields[2])?,
            departure: fields[3].trim().to_ascii_uppercase(),
            departure_time: parse_num_or_zero("departure time", fields[4])?,
            actual_departure_time: parse_num_or_zero("actual departure time", fields[5])?,
            cruise_altitude: fields[6].trim().to_string(),
            arrival: fields[7].trim().to_ascii_uppercase(),
            route_hours: parse_num_or_zero("route hours", fields[8])?,
            route_minutes: parse_num_or_zero("route minutes", fields[9])?,
            fuel_hours: parse_num_or_zero("fuel hours", fields[10])?,
            fuel_minutes: parse_num_or_zero("fuel minutes", fields[11])?,
            alternate: fields[12].trim().to_ascii_uppercase(),
            remarks: fields[13].to_string(),
            route: fields[14].to_string(),
        })
    }

    pub fn to_fields(&self) -> Vec<String> {
        vec![
            self.flight_rules.as_str().to_string(),
            self.aircraft.clone(),
            self.true_airspeed.to_string(),
            self.departure.clone(),
            self.departure_time.to_string(),
            self.actual_departure_time.to_string(),
            self.cruise_altitude.clone(),
            self.arrival.clone(),
            self.route_hours.to_string(),
            self.route_minutes.to_string(),
            self.fuel_hours.to_string(),
            self.fuel_minutes.to_string(),
            self.alternate.clone(),
            self.remarks.clone(),
            self.route.clone(),
        ]
    }
}

/// `$FP` pilot flight plan filing
#[derive(Debug, Clone, PartialEq)]
pub struct FlightPlanPacket {
    pub callsign: String,
    pub to: String,
    pub plan: FlightPlanFields,
}

impl FsdPacket for FlightPlanPacket {
    fn kind(&self) -> CommandKind {
        CommandKind::FlightPlan
    }

    fn to_fields(&self) -> Vec<String> {
        let mut fields = vec![self.callsign.clone(), self.to.clone()];
        fields.extend(self.plan.to_fields());
        fields
    }
}

/// `$AM` controller amendment of another client's plan
#[derive(Debug, Clone, PartialEq)]
pub struct AtcEditPlan {
    pub from: String,
    pub to: String,
    pub target: String,
    pub plan: FlightPlanFields,
}

impl FsdPacket for AtcEditPlan {
    fn kind(&self) -> CommandKind {
        CommandKind::AtcEditPlan
    }

    fn to_fields(&self) -> Vec<String> {
        let mut fields = vec![self.from.clone(), self.to.clone(), self.target.clone()];
        fields.extend(self.plan.to_fields());
        fields
    }
}

/// Point-to-point commands the server relays without interpreting the
/// payload: handoffs, pro-controller, plane info, ping and pong.
#[derive(Debug, Clone, PartialEq)]
pub struct Relayed {
    pub kind: CommandKind,
    pub from: String,
    pub to: String,
    pub payload: Vec<String>,
}

impl FsdPacket for Relayed {
    fn kind(&self) -> CommandKind {
        self.kind
    }

    fn to_fields(&self) -> Vec<String> {
        let mut fields = vec![self.from.clone(), self.to.clone()];
        fields.extend(self.payload.iter().cloned());
        fields
    }
}

/// `$!!` kill request
#[derive(Debug, Clone, PartialEq)]
pub struct KillClient {
    pub from: String,
    pub target: String,
    pub reason: Option<String>,
}

impl FsdPacket for KillClient {
    fn kind(&self) -> CommandKind {
        CommandKind::KillClient
    }

    fn to_fields(&self) -> Vec<String> {
        let mut fields = vec![self.from.clone(), self.target.clone()];
        if let Some(reason) = &self.reason {
            fields.push(reason.clone());
        }
        fields
    }
}

/// `$ER` sent by a client
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorPacket {
    pub from: String,
    pub to: String,
    pub kind: Option<ErrorKind>,
    pub param: String,
    pub message: String,
}

impl FsdPacket for ErrorPacket {
    fn kind(&self) -> CommandKind {
        CommandKind::Error
    }

    fn to_fields(&self) -> Vec<String> {
        vec![
            self.from.clone(),
            self.to.clone(),
            self.kind.map(|k| k.index()).unwrap_or(0).to_string(),
            self.param.clone(),
            self.message.clone(),
        ]
    }
}

/// One parsed command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    AddAtc(AddAtc),
    AddPilot(AddPilot),
    Remove(RemoveClient),
    AtcPosition(AtcPosition),
    PilotPosition(PilotPosition),
    AtcSubVisPoint(SubVisPoint),
    TextMessage(TextMessage),
    WeatherQuery(WeatherQuery),
    WeatherResponse(WeatherResponse),
    ClientQuery(ClientQuery),
    ClientResponse(ClientResponse),
    ClientIdentification(ClientIdentification),
    FlightPlan(FlightPlanPacket),
    AtcEditPlan(AtcEditPlan),
    Relayed(Relayed),
    KillClient(KillClient),
    Error(ErrorPacket),
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        self.packet().kind()
    }

    /// Callsign the sender claims to be
    pub fn source(&self) -> &str {
        match self {
            Command::AddAtc(c) => &c.callsign,
            Command::AddPilot(c) => &c.callsign,
            Command::Remove(c) => &c.callsign,
            Command::AtcPosition(c) => &c.callsign,
            Command::PilotPosition(c) => &c.callsign,
            Command::AtcSubVisPoint(c) => &c.callsign,
            Command::TextMessage(c) => &c.from,
            Command::WeatherQuery(c) => &c.from,
            Command::WeatherResponse(c) => &c.from,
            Command::ClientQuery(c) => &c.from,
            Command::ClientResponse(c) => &c.from,
            Command::ClientIdentification(c) => &c.callsign,
            Command::FlightPlan(c) => &c.callsign,
            Command::AtcEditPlan(c) => &c.from,
            Command::Relayed(c) => &c.from,
            Command::KillClient(c) => &c.from,
            Command::Error(c) => &c.from,
        }
    }

    pub fn packet(&self) -> &dyn FsdPacket {
        match self {
            Command::AddAtc(c) => c,
            Command::AddPilot(c) => c,
            Command::Remove(c) => c,
            Command::AtcPosition(c) => c,
            Command::PilotPosition(c) => c,
            Command::AtcSubVisPoint(c) => c,
            Command::TextMessage(c) => c,
            Command::WeatherQuery(c) => c,
            Command::WeatherResponse(c) => c,
            Command::ClientQuery(c) => c,
            Command::ClientResponse(c) => c,
            Command::ClientIdentification(c) => c,
            Command::FlightPlan(c) => c,
            Command::AtcEditPlan(c) => c,
            Command::Relayed(c) => c,
            Command::KillClient(c) => c,
            Command::Error(c) => c,
        }
    }

    pub fn to_line(&self) -> String {
        self.packet().to_line()
    }
}

fn parse_fields(kind: CommandKind, fields: &[&str]) -> Result<Command, ParseError> {
    let command = match kind {
        CommandKind::AddAtc => Command::AddAtc(AddAtc::parse(fields)?),
        CommandKind::AddPilot => Command::AddPilot(AddPilot::parse(fields)?),
        CommandKind::RemoveAtc => Command::Remove(RemoveClient::parse(true, fields)),
        CommandKind::RemovePilot => Command::Remove(RemoveClient::parse(false, fields)),
        CommandKind::AtcPosition => Command::AtcPosition(AtcPosition::parse(fields)?),
        CommandKind::PilotPosition => Command::PilotPosition(PilotPosition::parse(fields)?),
        CommandKind::AtcSubVisPoint => Command::AtcSubVisPoint(SubVisPoint {
            callsign: fields[0].to_string(),
            position: parse_position(fields[1], fields[2])?,
        }),
        CommandKind::TextMessage => Command::TextMessage(TextMessage::new(
            fields[0], fields[1], fields[2],
        )),
        CommandKind::WeatherQuery => Command::WeatherQuery(WeatherQuery {
            from: fields[0].to_string(),
            to: fields[1].to_string(),
            kind: fields[2].to_string(),
            station: fields[3].trim().to_ascii_uppercase(),
        }),
        CommandKind::WeatherResponse => Command::WeatherResponse(WeatherResponse {
            from: fields[0].to_string(),
            to: fields[1].to_string(),
            kind: fields[2].to_string(),
            report: fields[3].to_string(),
        }),
        CommandKind::ClientQuery => Command::ClientQuery(ClientQuery {
            from: fields[0].to_string(),
            to: fields[1].to_string(),
            query: fields[2].to_string(),
            payload: rest(fields, 3),
        }),
        CommandKind::ClientResponse => Command::ClientResponse(ClientResponse {
            from: fields[0].to_string(),
            to: fields[1].to_string(),
            query: fields[2].to_string(),
            payload: rest(fields, 3),
        }),
        CommandKind::ClientIdentification => {
            Command::ClientIdentification(ClientIdentification::parse(fields)?)
        }
        CommandKind::FlightPlan => Command::FlightPlan(FlightPlanPacket {
            callsign: fields[0].to_string(),
            to: fields[1].to_string(),
            plan: FlightPlanFields::parse(&fields[2..])?,
        }),
        CommandKind::AtcEditPlan => Command::AtcEditPlan(AtcEditPlan {
            from: fields[0].to_string(),
            to: fields[1].to_string(),
            target: fields[2].to_string(),
            plan: FlightPlanFields::parse(&fields[3..])?,
        }),
        CommandKind::HandoffRequest
        | CommandKind::HandoffAccept
        | CommandKind::ProController
        | CommandKind::PlaneInfo
        | CommandKind::Ping
        | CommandKind::Pong => Command::Relayed(Relayed {
            kind,
            from: fields[0].to_string(),
            to: fields[1].to_string(),
            payload: rest(fields, 2),
        }),
        CommandKind::KillClient => Command::KillClient(KillClient {
            from: fields[0].to_string(),
            target: fields[1].to_string(),
            reason: opt_field(fields, 2).map(str::to_string),
        }),
        CommandKind::Error => Command::Error(ErrorPacket {
            from: fields[0].to_string(),
            to: fields[1].to_string(),
            kind: fields[2].trim().parse::<u8>().ok().and_then(ErrorKind::from_index),
            param: fields[3].to_string(),
            message: fields.get(4).map(|m| m.to_string()).unwrap_or_default(),
        }),
    };
    Ok(command)
}

/// Parses one line (with or without its terminator) into a typed command.
pub fn parse_line(line: &str) -> Result<Command, ParseFailure> {
    let line = trim_terminator(line);
    let spec = lookup(line).ok_or(ParseFailure {
        spec: None,
        error: ParseError::UnknownCommand,
    })?;

    let fields = split_fields(&line[spec.tag.len()..], spec.max_fields);
    if fields.len() < spec.min_fields {
        return Err(ParseFailure {
            spec: Some(spec),
            error: ParseError::TooFewFields {
                tag: spec.tag,
                expected: spec.min_fields,
                got: fields.len(),
            },
        });
    }

    parse_fields(spec.kind, &fields).map_err(|error| ParseFailure {
        spec: Some(spec),
        error,
    })
}
