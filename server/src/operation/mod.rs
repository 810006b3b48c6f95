//! Collaborator interfaces the protocol engine consumes.
//!
//! Persistence, weather and audit storage live outside the engine; it only
//! talks to them through these traits. [`memory`] provides in-process
//! implementations used by the binary and the tests.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fsd_shared::command::FlightPlanFields;
use fsd_shared::{build_packet_owned, CommandKind, Rating};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub cid: i32,
    pub real_name: String,
    pub rating: Rating,
    #[serde(skip_serializing)]
    pub password_hash: String,
}

#[async_trait]
pub trait UserOperation: Send + Sync {
    async fn get_user_by_cid(&self, cid: i32) -> Result<User, StoreError>;

    async fn verify_user_password(&self, user: &User, password: &str) -> Result<bool, StoreError>;

    async fn update_user_rating(&self, cid: i32, rating: Rating) -> Result<(), StoreError>;
}

/// Stored flight plan, one per user id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightPlan {
    pub cid: i32,
    pub callsign: String,
    #[serde(flatten)]
    pub fields: FlightPlanFields,
    pub locked: bool,
    pub from_web: bool,
}

impl FlightPlan {
    pub fn new(cid: i32, callsign: &str, fields: &FlightPlanFields) -> Self {
        let mut fields = fields.clone();
        fields.cruise_altitude = normalize_cruise_altitude(&fields.cruise_altitude);
        Self {
            cid,
            callsign: callsign.to_string(),
            fields,
            locked: false,
            from_web: false,
        }
    }

    pub fn same_city_pair(&self, fields: &FlightPlanFields) -> bool {
        self.fields.departure.eq_ignore_ascii_case(&fields.departure)
            && self.fields.arrival.eq_ignore_ascii_case(&fields.arrival)
    }

    /// Serialises the plan as `$FP<callsign>:<to>:...`
    pub fn to_line(&self, to: &str) -> String {
        let mut fields = vec![self.callsign.clone(), to.to_string()];
        fields.extend(self.fields.to_fields());
        build_packet_owned(CommandKind::FlightPlan.tag(), &fields)
    }
}

/// `35000`, `F350` and `FL350` all become `FL350`; values below 1000 are
/// already flight levels. Anything else is kept upper-cased.
pub fn normalize_cruise_altitude(raw: &str) -> String {
    let upper = raw.trim().to_ascii_uppercase();
    let digits = upper
        .strip_prefix("FL")
        .or_else(|| upper.strip_prefix('F'))
        .unwrap_or(&upper);

    match digits.parse::<u32>() {
        Ok(0) => upper,
        Ok(level) if level < 1000 => format!("FL{:03}", level),
        Ok(feet) if digits.len() == upper.len() => format!("FL{:03}", feet / 100),
        _ => upper,
    }
}

#[async_trait]
pub trait FlightPlanOperation: Send + Sync {
    async fn get_flight_plan_by_cid(&self, cid: i32) -> Result<FlightPlan, StoreError>;

    /// Pilot filing. A locked plan with the same departure and arrival is
    /// refused; a different city pair replaces the plan and clears the lock.
    async fn upsert_flight_plan(
        &self,
        cid: i32,
        callsign: &str,
        fields: &FlightPlanFields,
    ) -> Result<FlightPlan, StoreError>;

    async fn update_cruise_altitude(
        &self,
        cid: i32,
        cruise_altitude: &str,
    ) -> Result<FlightPlan, StoreError>;

    /// Replaces the fields of an existing plan. `atc_edit` bypasses the lock.
    async fn update_flight_plan(
        &self,
        cid: i32,
        fields: &FlightPlanFields,
        atc_edit: bool,
    ) -> Result<FlightPlan, StoreError>;

    async fn set_locked(&self, cid: i32, locked: bool) -> Result<(), StoreError>;

    async fn delete_flight_plan(&self, cid: i32) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEvent {
    ClientKickedFromFsd,
    FlightPlanAmendedByAtc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeDetail {
    pub old_value: String,
    pub new_value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
    pub created_at: DateTime<Utc>,
    pub event_type: AuditEvent,
    pub subject: i32,
    pub object: String,
    pub ip: String,
    pub user_agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_details: Option<ChangeDetail>,
}

#[async_trait]
pub trait AuditLogOperation: Send + Sync {
    fn new_audit_log(
        &self,
        event_type: AuditEvent,
        subject: i32,
        object: &str,
        ip: &str,
        user_agent: &str,
        change_details: Option<ChangeDetail>,
    ) -> AuditLog {
        AuditLog {
            created_at: Utc::now(),
            event_type,
            subject,
            object: object.to_string(),
            ip: ip.to_string(),
            user_agent: user_agent.to_string(),
            change_details,
        }
    }

    async fn save_audit_log(&self, log: AuditLog) -> Result<(), StoreError>;
}

#[async_trait]
pub trait MetarSource: Send + Sync {
    /// Raw report for an ICAO station
    async fn query_metar(&self, icao: &str) -> Result<String, StoreError>;
}
