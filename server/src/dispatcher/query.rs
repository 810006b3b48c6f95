//! `$CQ` / `$CR` queries, the controller coordination channel and `$AX`.

use std::sync::Arc;

use fsd_shared::command::{ClientQuery, ClientResponse, WeatherQuery, WeatherResponse};
use fsd_shared::frequency::EUROSCOPE_COORDINATION;
use fsd_shared::{ErrorKind, Facility, FsdPacket, ProtocolError};
use log::{debug, info, warn};

use super::{find_client, message, publish_audit, require_controlling};
use crate::client::{Capabilities, Client};
use crate::context::ServerContext;
use crate::error::StoreError;
use crate::filter::BroadcastFilter;
use crate::operation::{normalize_cruise_altitude, AuditEvent, ChangeDetail, FlightPlan};
use crate::session::Session;

const ATC_CAPABILITIES: &[&str] = &[
    "ATCINFO=1",
    "SECPOS=1",
    "MODELDESC=1",
    "ONGOINGCOORD=1",
    "NEWINFO=1",
];
const PILOT_CAPABILITIES: &[&str] = &["ATCINFO=1", "MODELDESC=1", "ICAOEQ=1", "FASTPOS=1"];

fn reply(ctx: &ServerContext, client: &Client, query: &str, payload: Vec<String>) {
    let line = ClientResponse::new(ctx.server_name(), client.callsign(), query, payload).to_line();
    if let Err(e) = client.send_line(&line) {
        debug!("Reply to {} not queued: {}", client.callsign(), e);
    }
}

fn first_field<'a>(query: &'a ClientQuery) -> Result<&'a str, ProtocolError> {
    query
        .payload
        .first()
        .map(String::as_str)
        .ok_or_else(|| ProtocolError::non_fatal(ErrorKind::Syntax, query.query.as_str()))
}

/// Plan held by an online client, falling back to the store
pub(super) async fn current_plan(ctx: &ServerContext, target: &Client) -> Option<FlightPlan> {
    if let Some(plan) = target.flight_plan() {
        return Some(plan);
    }
    match ctx.flight_plans.get_flight_plan_by_cid(target.cid()).await {
        Ok(plan) => Some(plan),
        Err(StoreError::FlightPlanNotFound(_)) => None,
        Err(e) => {
            warn!("Flight plan lookup for {} failed: {}", target.callsign(), e);
            None
        }
    }
}

pub(super) async fn client_query(
    ctx: &ServerContext,
    session: &Session,
    client: &Arc<Client>,
    query: &ClientQuery,
    line: &str,
) -> Result<(), ProtocolError> {
    if query.to == ctx.server_name() {
        return server_query(ctx, session, client, query).await;
    }
    if query.to == EUROSCOPE_COORDINATION {
        return coordination(ctx, session, client, query, line).await;
    }
    message::forward(ctx, client, &query.to, line).await
}

async fn server_query(
    ctx: &ServerContext,
    session: &Session,
    client: &Client,
    query: &ClientQuery,
) -> Result<(), ProtocolError> {
    match query.query.as_str() {
        "FP" => {
            let target = find_client(ctx, first_field(query)?).await?;
            let plan = current_plan(ctx, &target)
                .await
                .ok_or_else(|| ProtocolError::non_fatal(ErrorKind::NoFlightPlan, target.callsign()))?;
            if let Err(e) = client.send_line(&plan.to_line(client.callsign())) {
                debug!("Plan for {} not queued: {}", client.callsign(), e);
            }
        }
        "ATC" => {
            let target = first_field(query)?;
            let controlling = Facility::CONTROLLING.intersects(Facility::from_callsign(target, true));
            let answer = if controlling { "Y" } else { "N" };
            reply(ctx, client, "ATC", vec![answer.to_string(), target.to_string()]);
        }
        "CAPS" => {
            let caps = if client.is_atc() {
                ATC_CAPABILITIES
            } else {
                PILOT_CAPABILITIES
            };
            reply(ctx, client, "CAPS", caps.iter().map(|c| c.to_string()).collect());
        }
        "IP" => {
            let ip = session.remote_addr().ip().to_string();
            reply(ctx, client, "IP", vec![ip]);
        }
        other => debug!("{} asked the server for unhandled {}", client.callsign(), other),
    }
    Ok(())
}

/// Queries on the EuroScope coordination frequency
async fn coordination(
    ctx: &ServerContext,
    session: &Session,
    client: &Arc<Client>,
    query: &ClientQuery,
    line: &str,
) -> Result<(), ProtocolError> {
    match query.query.as_str() {
        "IT" => require_controlling(client)?,
        "AM" => {
            require_controlling(client)?;
            amend_cruise_altitude(ctx, session, client, query).await?;
        }
        "INF" => {
            client.clear_atis();
            let solicit = ClientQuery::new(ctx.server_name(), client.callsign(), "ATIS").to_line();
            if let Err(e) = client.send_line(&solicit) {
                debug!("ATIS request to {} not queued: {}", client.callsign(), e);
            }
            return Ok(());
        }
        "BC" => client.set_on_break(true),
        "NOB" => client.set_on_break(false),
        _ => {}
    }
    ctx.manager
        .broadcast(line, Some(client), &BroadcastFilter::atc_in_range())
        .await;
    Ok(())
}

/// `AM:<target>:<cruise altitude>` sets the target's cruise altitude and locks
/// the plan unless the server runs in simulator mode.
async fn amend_cruise_altitude(
    ctx: &ServerContext,
    session: &Session,
    client: &Client,
    query: &ClientQuery,
) -> Result<(), ProtocolError> {
    let (target, altitude) = match query.payload.as_slice() {
        [target, altitude, ..] => (target.as_str(), altitude.as_str()),
        _ => return Err(ProtocolError::non_fatal(ErrorKind::Syntax, "AM")),
    };
    let target = find_client(ctx, target).await?;
    let no_plan = || ProtocolError::non_fatal(ErrorKind::NoFlightPlan, target.callsign());
    let before = current_plan(ctx, &target).await.ok_or_else(no_plan)?;

    let plan = if ctx.config.simulator_server {
        let mut plan = before.clone();
        plan.fields.cruise_altitude = normalize_cruise_altitude(altitude);
        plan
    } else {
        let mut plan = ctx
            .flight_plans
            .update_cruise_altitude(target.cid(), altitude)
            .await
            .map_err(|e| match e {
                StoreError::FlightPlanNotFound(_) => no_plan(),
                other => ProtocolError::custom(false, target.callsign(), other.to_string()),
            })?;
        if let Err(e) = ctx.flight_plans.set_locked(target.cid(), true).await {
            warn!("Locking the plan of {} failed: {}", target.callsign(), e);
        } else {
            plan.locked = true;
        }
        plan
    };

    info!(
        "{} set cruise altitude of {} to {}",
        client.callsign(),
        target.callsign(),
        plan.fields.cruise_altitude
    );
    let change = ChangeDetail {
        old_value: before.fields.cruise_altitude,
        new_value: plan.fields.cruise_altitude.clone(),
    };
    target.set_flight_plan(Some(plan));
    publish_audit(
        ctx,
        session,
        AuditEvent::FlightPlanAmendedByAtc,
        client.cid(),
        target.callsign(),
        Some(change),
    )
    .await;
    Ok(())
}

pub(super) async fn client_response(
    ctx: &ServerContext,
    client: &Arc<Client>,
    response: &ClientResponse,
    line: &str,
) -> Result<(), ProtocolError> {
    if response.to != ctx.server_name() {
        return message::forward(ctx, client, &response.to, line).await;
    }

    match response.query.as_str() {
        "CAPS" => {
            let capabilities = Capabilities::from_response(&response.payload);
            client.set_capabilities(capabilities);
            debug!("{} capabilities: {:?}", client.callsign(), capabilities.names());
            if capabilities.contains(Capabilities::VIS) && ctx.config.enable_visual_pilot {
                reply(ctx, client, "CAPS", vec!["VISUPDATE=1".to_string()]);
            }
        }
        "ATIS" if client.is_atc() => record_atis(client, &response.payload),
        other => debug!("{} answered unhandled {}", client.callsign(), other),
    }
    Ok(())
}

/// `T` adds a line, `Z` the logoff time, `V` the voice URL, `E` closes the block
fn record_atis(client: &Client, payload: &[String]) {
    let Some((kind, rest)) = payload.split_first() else {
        return;
    };
    let text = rest.join(":");
    match kind.as_str() {
        "T" => client.push_atis_line(text),
        "Z" => client.set_logoff_time(text),
        "V" => client.set_atis_voice_url(text),
        "E" => debug!("{} ATIS complete", client.callsign()),
        other => debug!("{} sent unknown ATIS line type {}", client.callsign(), other),
    }
}

pub(super) async fn weather(
    ctx: &ServerContext,
    client: &Arc<Client>,
    request: &WeatherQuery,
    line: &str,
) -> Result<(), ProtocolError> {
    if request.to != ctx.server_name() {
        return message::forward(ctx, client, &request.to, line).await;
    }

    let no_profile = || ProtocolError::non_fatal(ErrorKind::NoWeatherProfile, request.station.as_str());
    if request.station.chars().count() != 4 {
        return Err(no_profile());
    }
    let report = ctx.metar.query_metar(&request.station).await.map_err(|e| {
        debug!("METAR for {} unavailable: {}", request.station, e);
        no_profile()
    })?;

    let response = WeatherResponse {
        from: ctx.server_name().to_string(),
        to: client.callsign().to_string(),
        kind: request.kind.clone(),
        report,
    };
    if let Err(e) = client.send_line(&response.to_line()) {
        debug!("METAR for {} not queued: {}", client.callsign(), e);
    }
    Ok(())
}
