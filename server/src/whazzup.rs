//! "Who's online" snapshot for external consumers.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::client::Client;
use crate::client_manager::ClientManager;
use crate::operation::FlightPlan;

pub const WHAZZUP_VERSION: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct General {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    pub connected_clients: usize,
    pub unique_users: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PilotEntry {
    pub cid: i32,
    pub callsign: String,
    pub real_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub transponder: String,
    pub heading: u32,
    pub altitude: i32,
    pub groundspeed: i32,
    pub flight_plan: Option<FlightPlan>,
    pub logon_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerEntry {
    pub cid: i32,
    pub callsign: String,
    pub real_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub rating: i32,
    pub facility: u32,
    pub frequency: String,
    pub visual_range: f64,
    pub on_break: bool,
    pub atis_info: Vec<String>,
    pub logon_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Whazzup {
    pub general: General,
    pub pilots: Vec<PilotEntry>,
    pub controllers: Vec<ControllerEntry>,
}

impl Whazzup {
    pub fn build(clients: &[Arc<Client>]) -> Self {
        let mut pilots = Vec::new();
        let mut controllers = Vec::new();
        let mut users = HashSet::new();

        for client in clients {
            users.insert(client.cid());
            let state = client.snapshot();
            let position = state.vis_points.primary();
            let logon_time = client.history().start_time;

            if client.is_atc() {
                controllers.push(ControllerEntry {
                    cid: client.cid(),
                    callsign: client.callsign().to_string(),
                    real_name: state.real_name,
                    latitude: position.latitude,
                    longitude: position.longitude,
                    rating: state.rating.as_i32(),
                    facility: state.facility.index().unwrap_or(0),
                    frequency: state.frequency.to_string(),
                    visual_range: state.visual_range,
                    on_break: state.on_break,
                    atis_info: state.atis,
                    logon_time,
                    last_updated: state.last_update,
                });
            } else {
                pilots.push(PilotEntry {
                    cid: client.cid(),
                    callsign: client.callsign().to_string(),
                    real_name: state.real_name,
                    latitude: position.latitude,
                    longitude: position.longitude,
                    transponder: format!("{:04}", state.transponder),
                    heading: state.heading.round() as u32 % 360,
                    altitude: state.altitude,
                    groundspeed: state.groundspeed,
                    flight_plan: state.flight_plan,
                    logon_time,
                    last_updated: state.last_update,
                });
            }
        }

        pilots.sort_by(|a, b| a.callsign.cmp(&b.callsign));
        controllers.sort_by(|a, b| a.callsign.cmp(&b.callsign));

        Whazzup {
            general: General {
                version: WHAZZUP_VERSION,
                generated_at: Utc::now(),
                connected_clients: clients.len(),
                unique_users: users.len(),
            },
            pilots,
            controllers,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Writes the snapshot to `path` once per TTL until cancelled
pub async fn run_file_writer(
    manager: Arc<ClientManager>,
    path: PathBuf,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(manager.whazzup_ttl());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let snapshot = manager.whazzup().await;
        match snapshot.to_json() {
            Ok(json) => {
                if let Err(e) = tokio::fs::write(&path, json).await {
                    warn!("Failed to write whazzup to {}: {}", path.display(), e);
                } else {
                    debug!("Wrote whazzup to {}", path.display());
                }
            }
            Err(e) => warn!("Failed to serialise whazzup: {}", e),
        }
    }
}
