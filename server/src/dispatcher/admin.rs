//! `$!!` supervisor kill.

use std::sync::Arc;

use fsd_shared::command::KillClient;
use fsd_shared::{ErrorKind, ProtocolError, Rating};
use log::{info, warn};

use super::publish_audit;
use crate::client::Client;
use crate::context::ServerContext;
use crate::error::ManagerError;
use crate::message_bus::BusMessage;
use crate::operation::AuditEvent;
use crate::session::Session;

const DEFAULT_REASON: &str = "no reason given";

pub(super) async fn kill_client(
    ctx: &ServerContext,
    session: &Session,
    client: &Arc<Client>,
    kill: &KillClient,
) -> Result<(), ProtocolError> {
    if !client.is_atc() || client.rating() < Rating::Supervisor {
        return Err(ProtocolError::non_fatal(ErrorKind::RatingTooLow, client.callsign()));
    }

    let reason = kill.reason.as_deref().unwrap_or(DEFAULT_REASON);
    let target = ctx
        .manager
        .kick_client_from_server(&kill.target, reason)
        .await
        .map_err(|e| match e {
            ManagerError::CallsignNotFound(callsign) => {
                ProtocolError::non_fatal(ErrorKind::NoCallsignFound, callsign)
            }
            other => ProtocolError::custom(false, kill.target.as_str(), other.to_string()),
        })?;

    info!("{} kicked {}: {}", client.callsign(), target.callsign(), reason);
    publish_audit(
        ctx,
        session,
        AuditEvent::ClientKickedFromFsd,
        client.cid(),
        target.callsign(),
        None,
    )
    .await;

    let email = BusMessage::KickedFromServerEmail {
        cid: target.cid(),
        callsign: target.callsign().to_string(),
        reason: reason.to_string(),
        operator: client.callsign().to_string(),
    };
    if let Err(e) = ctx.bus.publish(email).await {
        warn!("Kick notification for {} not published: {}", target.callsign(), e);
    }
    Ok(())
}
