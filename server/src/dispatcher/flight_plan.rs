//! `$FP` filings and `$AM` controller amendments.

use std::sync::Arc;

use fsd_shared::command::{AtcEditPlan, FlightPlanPacket};
use fsd_shared::{ErrorKind, ProtocolError, ALL_ATC};
use log::{info, warn};

use super::query::current_plan;
use super::{find_client, publish_audit, require_controlling};
use crate::client::Client;
use crate::context::ServerContext;
use crate::error::StoreError;
use crate::filter::BroadcastFilter;
use crate::message_bus::BusMessage;
use crate::operation::{AuditEvent, ChangeDetail, FlightPlan};
use crate::session::Session;

pub(super) async fn file_plan(
    ctx: &ServerContext,
    client: &Arc<Client>,
    filing: &FlightPlanPacket,
) -> Result<(), ProtocolError> {
    if client.is_atc() {
        return Err(ProtocolError::non_fatal(ErrorKind::InvalidCtrl, client.callsign()));
    }

    let plan = if ctx.config.simulator_server {
        FlightPlan::new(client.cid(), client.callsign(), &filing.plan)
    } else {
        ctx.flight_plans
            .upsert_flight_plan(client.cid(), client.callsign(), &filing.plan)
            .await
            .map_err(|e| match e {
                StoreError::FlightPlanLocked => {
                    ProtocolError::custom(false, client.callsign(), "flight plan is locked")
                }
                other => {
                    warn!("Storing the plan of {} failed: {}", client.callsign(), other);
                    ProtocolError::custom(false, client.callsign(), other.to_string())
                }
            })?
    };

    info!(
        "{} filed {} to {} at {}",
        client.callsign(),
        plan.fields.departure,
        plan.fields.arrival,
        plan.fields.cruise_altitude
    );
    let locked = plan.locked;
    let line = plan.to_line(ALL_ATC);
    client.set_flight_plan(Some(plan));
    if !locked {
        ctx.manager
            .broadcast(&line, Some(client), &BroadcastFilter::atc_in_range())
            .await;
    }
    Ok(())
}

pub(super) async fn amend_plan(
    ctx: &ServerContext,
    session: &Session,
    client: &Arc<Client>,
    amendment: &AtcEditPlan,
    line: &str,
) -> Result<(), ProtocolError> {
    require_controlling(client)?;
    let target = find_client(ctx, &amendment.target).await?;
    let no_plan = || ProtocolError::non_fatal(ErrorKind::NoFlightPlan, target.callsign());
    let before = current_plan(ctx, &target).await.ok_or_else(no_plan)?;

    let plan = if ctx.config.simulator_server {
        let mut plan = FlightPlan::new(before.cid, &before.callsign, &amendment.plan);
        plan.from_web = before.from_web;
        plan
    } else {
        let mut plan = ctx
            .flight_plans
            .update_flight_plan(target.cid(), &amendment.plan, true)
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

    info!("{} amended the flight plan of {}", client.callsign(), target.callsign());
    target.set_flight_plan(Some(plan.clone()));
    publish_audit(
        ctx,
        session,
        AuditEvent::FlightPlanAmendedByAtc,
        client.cid(),
        target.callsign(),
        Some(ChangeDetail {
            old_value: before.fields.cruise_altitude,
            new_value: plan.fields.cruise_altitude.clone(),
        }),
    )
    .await;
    if let Err(e) = ctx.bus.publish(BusMessage::FlightPlanFlush { plan }).await {
        warn!("Flight plan flush for {} not published: {}", target.callsign(), e);
    }

    ctx.manager
        .broadcast(line, Some(client), &BroadcastFilter::atc_in_range())
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::tests::TestSession;
    use super::*;
    use crate::config::ServerConfig;
    use crate::context::tests::test_context_with_stores;
    use crate::operation::FlightPlanOperation;
    use fsd_shared::Rating;

    const FILING: &str =
        "$FPCES2352:SERVER:I:B738:450:ZSSS:1200:0:35000:ZBAA:2:30:3:45:ZSPD:/V/:PIKAS G330 PIMOL";
    const AMENDMENT: &str =
        "$AMZSHA_CTR:SERVER:CES2352:I:B738:450:ZSSS:1200:0:FL291:ZBAA:2:30:3:45:ZSPD:/V/:PIKAS W157 PIMOL";

    async fn setup(
        config: ServerConfig,
    ) -> (
        Arc<ServerContext>,
        crate::context::tests::TestStores,
        TestSession,
        TestSession,
    ) {
        let (ctx, stores) = test_context_with_stores(
            config,
            &[(1000, Rating::Controller1), (2352, Rating::Normal)],
        )
        .await;
        let ctr = TestSession::atc(&ctx, 1, "ZSHA_CTR", 1000, Rating::Controller1).await;
        let pilot = TestSession::pilot(&ctx, 2, "CES2352", 2352).await;
        (ctx, stores, ctr, pilot)
    }

    #[tokio::test]
    async fn test_filing_reaches_controller() {
        let (ctx, stores, mut ctr, mut pilot) = setup(ServerConfig::default()).await;
        ctr.drain();

        pilot.send(&ctx, FILING).await.unwrap();

        assert_eq!(
            ctr.drain(),
            vec!["$FPCES2352:*A:I:B738:450:ZSSS:1200:0:FL350:ZBAA:2:30:3:45:ZSPD:/V/:PIKAS G330 PIMOL\r\n"
                .to_string()]
        );
        let stored = stores.flight_plans.get_flight_plan_by_cid(2352).await.unwrap();
        assert_eq!(stored.fields.cruise_altitude, "FL350");
        assert_eq!(pilot.client().flight_plan(), Some(stored));
    }

    #[tokio::test]
    async fn test_controller_cannot_file() {
        let (ctx, _stores, mut ctr, _pilot) = setup(ServerConfig::default()).await;
        let err = ctr
            .send(&ctx, "$FPZSHA_CTR:SERVER:I:B738:450:ZSSS:1200:0:35000:ZBAA:2:30:3:45:ZSPD::DCT")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidCtrl);
    }

    #[tokio::test]
    async fn test_amendment_locks_plan() {
        let (ctx, stores, mut ctr, mut pilot) = setup(ServerConfig::default()).await;
        pilot.send(&ctx, FILING).await.unwrap();

        ctr.send(&ctx, AMENDMENT).await.unwrap();

        let stored = stores.flight_plans.get_flight_plan_by_cid(2352).await.unwrap();
        assert!(stored.locked);
        assert_eq!(stored.fields.cruise_altitude, "FL291");
        assert_eq!(stored.fields.route, "PIKAS W157 PIMOL");
        assert!(pilot.client().flight_plan().unwrap().locked);

        let err = pilot.send(&ctx, FILING).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Custom);
        assert_eq!(err.message(), "flight plan is locked");
        assert!(!err.fatal);

        let refile = FILING.replace("ZBAA", "ZGGG");
        pilot.send(&ctx, &refile).await.unwrap();
        let stored = stores.flight_plans.get_flight_plan_by_cid(2352).await.unwrap();
        assert!(!stored.locked);
        assert_eq!(stored.fields.arrival, "ZGGG");

        ctx.bus.shutdown().await.unwrap();
        let entries = stores.audit_log.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].object, "CES2352");
        assert_eq!(entries[0].change_details.as_ref().unwrap().old_value, "FL350");
    }

    #[tokio::test]
    async fn test_amendment_without_plan() {
        let (ctx, _stores, mut ctr, _pilot) = setup(ServerConfig::default()).await;
        let err = ctr.send(&ctx, AMENDMENT).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoFlightPlan);

        let unknown = AMENDMENT.replace(":CES2352:", ":CCA1234:");
        let err = ctr.send(&ctx, &unknown).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoCallsignFound);
    }

    #[tokio::test]
    async fn test_simulator_mode_keeps_plans_off_the_store() {
        let config = ServerConfig {
            simulator_server: true,
            ..ServerConfig::default()
        };
        let (ctx, stores, mut ctr, mut pilot) = setup(config).await;
        pilot.send(&ctx, FILING).await.unwrap();
        ctr.send(&ctx, AMENDMENT).await.unwrap();

        assert_eq!(stores.flight_plans.len().await, 0);
        let held = pilot.client().flight_plan().unwrap();
        assert_eq!(held.fields.cruise_altitude, "FL291");
        assert!(!held.locked);

        pilot.send(&ctx, FILING).await.unwrap();
    }
}
