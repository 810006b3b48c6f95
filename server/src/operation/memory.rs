//! In-process collaborator implementations.

use std::collections::HashMap;

use async_trait::async_trait;
use fsd_shared::command::FlightPlanFields;
use fsd_shared::Rating;
use log::{debug, info};
use tokio::sync::RwLock;

use super::{
    normalize_cruise_altitude, AuditLog, AuditLogOperation, FlightPlan, FlightPlanOperation,
    MetarSource, User, UserOperation,
};
use crate::config::SeedUser;
use crate::error::StoreError;

#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<i32, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: &[SeedUser]) -> Self {
        let users = seed
            .iter()
            .map(|u| {
                (
                    u.cid,
                    User {
                        cid: u.cid,
                        real_name: u.real_name.clone(),
                        rating: u.rating,
                        password_hash: u.password_hash.clone(),
                    },
                )
            })
            .collect();
        Self {
            users: RwLock::new(users),
        }
    }

    pub async fn insert(&self, user: User) {
        self.users.write().await.insert(user.cid, user);
    }
}

#[async_trait]
impl UserOperation for MemoryUserStore {
    async fn get_user_by_cid(&self, cid: i32) -> Result<User, StoreError> {
        self.users
            .read()
            .await
            .get(&cid)
            .cloned()
            .ok_or(StoreError::UserNotFound(cid))
    }

    async fn verify_user_password(&self, user: &User, password: &str) -> Result<bool, StoreError> {
        let password = password.to_string();
        let hash = user.password_hash.clone();
        // bcrypt blocks for tens of milliseconds
        tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| StoreError::Hash(e.to_string()))?
            .map_err(StoreError::from)
    }

    async fn update_user_rating(&self, cid: i32, rating: Rating) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        let user = users.get_mut(&cid).ok_or(StoreError::UserNotFound(cid))?;
        user.rating = rating;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryFlightPlanStore {
    plans: RwLock<HashMap<i32, FlightPlan>>,
}

impl MemoryFlightPlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.plans.read().await.len()
    }
}

#[async_trait]
impl FlightPlanOperation for MemoryFlightPlanStore {
    async fn get_flight_plan_by_cid(&self, cid: i32) -> Result<FlightPlan, StoreError> {
        self.plans
            .read()
            .await
            .get(&cid)
            .cloned()
            .ok_or(StoreError::FlightPlanNotFound(cid))
    }

    async fn upsert_flight_plan(
        &self,
        cid: i32,
        callsign: &str,
        fields: &FlightPlanFields,
    ) -> Result<FlightPlan, StoreError> {
        let mut plans = self.plans.write().await;
        if let Some(existing) = plans.get(&cid) {
            if existing.locked && existing.same_city_pair(fields) {
                return Err(StoreError::FlightPlanLocked);
            }
        }

        let plan = FlightPlan::new(cid, callsign, fields);
        debug!("Stored flight plan of {} ({})", callsign, cid);
        plans.insert(cid, plan.clone());
        Ok(plan)
    }

    async fn update_cruise_altitude(
        &self,
        cid: i32,
        cruise_altitude: &str,
    ) -> Result<FlightPlan, StoreError> {
        let mut plans = self.plans.write().await;
        let plan = plans
            .get_mut(&cid)
            .ok_or(StoreError::FlightPlanNotFound(cid))?;
        plan.fields.cruise_altitude = normalize_cruise_altitude(cruise_altitude);
        Ok(plan.clone())
    }

    async fn update_flight_plan(
        &self,
        cid: i32,
        fields: &FlightPlanFields,
        atc_edit: bool,
    ) -> Result<FlightPlan, StoreError> {
        let mut plans = self.plans.write().await;
        let plan = plans
            .get_mut(&cid)
            .ok_or(StoreError::FlightPlanNotFound(cid))?;
        if plan.locked && !atc_edit {
            return Err(StoreError::FlightPlanLocked);
        }

        plan.fields = fields.clone();
        plan.fields.cruise_altitude = normalize_cruise_altitude(&fields.cruise_altitude);
        Ok(plan.clone())
    }

    async fn set_locked(&self, cid: i32, locked: bool) -> Result<(), StoreError> {
        let mut plans = self.plans.write().await;
        let plan = plans
            .get_mut(&cid)
            .ok_or(StoreError::FlightPlanNotFound(cid))?;
        plan.locked = locked;
        Ok(())
    }

    async fn delete_flight_plan(&self, cid: i32) -> Result<(), StoreError> {
        self.plans
            .write()
            .await
            .remove(&cid)
            .map(|_| ())
            .ok_or(StoreError::FlightPlanNotFound(cid))
    }
}

/// Keeps audit records in memory and mirrors them to the log
#[derive(Default)]
pub struct MemoryAuditLog {
    entries: RwLock<Vec<AuditLog>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditLog> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl AuditLogOperation for MemoryAuditLog {
    async fn save_audit_log(&self, log: AuditLog) -> Result<(), StoreError> {
        info!(
            "audit: {:?} subject={} object={} ip={}",
            log.event_type, log.subject, log.object, log.ip
        );
        self.entries.write().await.push(log);
        Ok(())
    }
}

/// Serves reports from a fixed ICAO → METAR table
#[derive(Default)]
pub struct StaticMetarSource {
    reports: HashMap<String, String>,
}

impl StaticMetarSource {
    pub fn new<I, K, V>(reports: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            reports: reports
                .into_iter()
                .map(|(k, v)| (k.into().to_ascii_uppercase(), v.into()))
                .collect(),
        }
    }
}

#[async_trait]
impl MetarSource for StaticMetarSource {
    async fn query_metar(&self, icao: &str) -> Result<String, StoreError> {
        self.reports
            .get(&icao.to_ascii_uppercase())
            .cloned()
            .ok_or_else(|| StoreError::MetarNotFound(icao.to_string()))
    }
}
