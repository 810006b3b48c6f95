//! `%`, `@` and `'` position updates.

use std::sync::Arc;

use fsd_shared::command::{AtcPosition, PilotPosition, SubVisPoint};
use fsd_shared::{ErrorKind, Facility, ProtocolError};
use log::{debug, warn};

use crate::client::Client;
use crate::context::ServerContext;
use crate::filter::BroadcastFilter;

pub(super) async fn atc_position(
    ctx: &ServerContext,
    client: &Arc<Client>,
    position: &AtcPosition,
    line: &str,
) -> Result<(), ProtocolError> {
    if !client.is_atc() {
        return Err(ProtocolError::non_fatal(ErrorKind::InvalidCtrl, client.callsign()));
    }

    let rating = client.rating();
    if !rating.permits(position.facility) {
        return Err(ProtocolError::fatal(
            ErrorKind::RequestLevelTooHigh,
            client.callsign(),
        ));
    }
    if !rating.permits(Facility::from_callsign(client.callsign(), true)) {
        return Err(ProtocolError::fatal(ErrorKind::CallsignInvalid, client.callsign()));
    }

    let range = f64::from(position.visual_range);
    if let Some(limit) = ctx.config.range_limits.limit_for(position.facility) {
        if range > limit {
            if ctx.config.refuse_out_range {
                return Err(ProtocolError::custom(
                    false,
                    client.callsign(),
                    "visibility range exceeds facility limit",
                ));
            }
            warn!(
                "{} reports {} nm visibility, {} allows {} nm",
                client.callsign(),
                range,
                position.facility.name(),
                limit
            );
        }
    }

    client.update_atc_position(position);
    ctx.manager
        .broadcast(line, Some(client), &BroadcastFilter::InRange)
        .await;
    Ok(())
}

pub(super) async fn pilot_position(
    ctx: &ServerContext,
    client: &Arc<Client>,
    position: &PilotPosition,
    line: &str,
) -> Result<(), ProtocolError> {
    if client.is_atc() {
        return Err(ProtocolError::non_fatal(ErrorKind::InvalidCtrl, client.callsign()));
    }

    client.update_pilot_position(position);
    ctx.manager
        .broadcast(line, Some(client), &BroadcastFilter::InRange)
        .await;
    Ok(())
}

/// Extended visibility centres are kept on the client and never relayed
pub(super) fn sub_vis_point(client: &Client, point: &SubVisPoint) -> Result<(), ProtocolError> {
    if !client.is_atc() {
        return Err(ProtocolError::non_fatal(ErrorKind::InvalidCtrl, client.callsign()));
    }
    let slot = client.add_extended_vis_point(point.position);
    debug!("{} set visibility point {}", client.callsign(), slot);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::tests::TestSession;
    use super::*;
    use crate::config::ServerConfig;
    use crate::context::tests::test_context;
    use assert_approx_eq::assert_approx_eq;
    use fsd_shared::{Position, Rating};

    const PILOT_LINE: &str = "@N:CES2352:7000:1:31.20:121.35:87:0:4290770974:278";

    #[tokio::test]
    async fn test_pilot_position_reaches_controller_in_range() {
        let ctx = test_context(
            ServerConfig::default(),
            &[(1000, Rating::Controller1), (2352, Rating::Normal)],
        )
        .await;
        let mut ctr = TestSession::atc(&ctx, 1, "ZSHA_CTR", 1000, Rating::Controller1).await;
        let mut pilot = TestSession::pilot(&ctx, 2, "CES2352", 2352).await;
        ctr.drain();

        pilot.send(&ctx, PILOT_LINE).await.unwrap();

        assert_eq!(ctr.drain(), vec![format!("{}\r\n", PILOT_LINE)]);
        assert!(pilot.drain().is_empty());

        let state = pilot.client().snapshot();
        assert_eq!(state.transponder, 7000);
        assert_eq!(state.altitude, 87);
        assert_eq!(state.groundspeed, 0);
    }

    #[tokio::test]
    async fn test_pilot_out_of_range_is_not_told() {
        let ctx = test_context(
            ServerConfig::default(),
            &[(1000, Rating::Controller1), (2352, Rating::Normal)],
        )
        .await;
        let mut ctr = TestSession::atc(&ctx, 1, "ZSHA_CTR", 1000, Rating::Controller1).await;
        let mut pilot = TestSession::pilot(&ctx, 2, "CES2352", 2352).await;
        ctr.drain();

        // Beijing is roughly 570 nm from Shanghai
        pilot
            .send(&ctx, "@N:CES2352:7000:1:40.08:116.58:3000:180:0:0")
            .await
            .unwrap();
        assert!(ctr.drain().is_empty());
    }

    #[tokio::test]
    async fn test_atc_position_facility_checks() {
        let ctx = test_context(ServerConfig::default(), &[(1000, Rating::Student1)]).await;
        let mut del = TestSession::atc(&ctx, 1, "ZSHA_DEL", 1000, Rating::Student1).await;

        let err = del
            .send(&ctx, "%ZSHA_DEL:21800:7:20:2:31.19:121.33:0")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RequestLevelTooHigh);
        assert!(err.fatal);

        del.send(&ctx, "%ZSHA_DEL:21800:2:20:2:31.19:121.33:0")
            .await
            .unwrap();
        let state = del.client().snapshot();
        assert_eq!(state.frequency.to_wire(), "21800");
        assert_eq!(state.facility, Facility::DEL);
    }

    #[tokio::test]
    async fn test_visibility_range_cap() {
        let ctx = test_context(ServerConfig::default(), &[(1000, Rating::Controller1)]).await;
        let mut twr = TestSession::atc(&ctx, 1, "ZSSS_TWR", 1000, Rating::Controller1).await;
        twr.send(&ctx, "%ZSSS_TWR:18450:5:300:5:31.19:121.33:0")
            .await
            .unwrap();
        assert_eq!(twr.client().visibility().visual_range, 300.0);

        let config = ServerConfig {
            refuse_out_range: true,
            ..ServerConfig::default()
        };
        let ctx = test_context(config, &[(1000, Rating::Controller1)]).await;
        let mut twr = TestSession::new(1);
        twr.send(&ctx, "#AAZSSS_TWR:SERVER:A:1000:pw:5:9").await.unwrap();

        let err = twr
            .send(&ctx, "%ZSSS_TWR:18450:5:300:5:31.19:121.33:0")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Custom);
        assert!(!err.fatal);
        assert_eq!(err.message(), "visibility range exceeds facility limit");

        twr.send(&ctx, "%ZSSS_TWR:18450:5:50:5:31.19:121.33:0")
            .await
            .unwrap();
        assert_eq!(twr.client().visibility().visual_range, 50.0);
    }

    #[tokio::test]
    async fn test_wrong_role_positions() {
        let ctx = test_context(
            ServerConfig::default(),
            &[(1000, Rating::Controller1), (2352, Rating::Normal)],
        )
        .await;
        let mut ctr = TestSession::atc(&ctx, 1, "ZSHA_CTR", 1000, Rating::Controller1).await;
        let mut pilot = TestSession::pilot(&ctx, 2, "CES2352", 2352).await;

        let err = ctr
            .send(&ctx, "@N:ZSHA_CTR:7000:1:31.20:121.35:87:0:0:0")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidCtrl);

        let err = pilot
            .send(&ctx, "%CES2352:29950:7:300:1:31.19:121.33:0")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidCtrl);
        assert!(!err.fatal);
    }

    #[tokio::test]
    async fn test_sub_vis_points_rotate() {
        let ctx = test_context(ServerConfig::default(), &[(1000, Rating::Controller1)]).await;
        let mut ctr = TestSession::atc(&ctx, 1, "ZSHA_CTR", 1000, Rating::Controller1).await;

        for lat in ["30.0", "31.0", "32.0", "33.0"] {
            ctr.send(&ctx, &format!("'ZSHA_CTR:{}:120.0", lat)).await.unwrap();
        }

        let points = ctr.client().visibility().points;
        let lats: Vec<f64> = points.valid_points().map(|p: &Position| p.latitude).collect();
        assert_eq!(lats.len(), 4);
        assert_approx_eq!(lats[0], 31.19);
        assert_approx_eq!(lats[1], 33.0);
        assert_approx_eq!(lats[2], 31.0);
        assert_approx_eq!(lats[3], 32.0);
        assert!(ctr.drain().is_empty());
    }
}
