//! Text messages and the point-to-point packets the server only relays.

use std::sync::Arc;

use fsd_shared::codec::ensure_terminated;
use fsd_shared::command::{Relayed, TextMessage};
use fsd_shared::{CommandKind, ErrorKind, FsdPacket, Frequency, ProtocolError, Rating, ALL_ATC};
use log::{debug, warn};

use crate::client::Client;
use crate::context::ServerContext;
use crate::error::ManagerError;
use crate::filter::{BroadcastFilter, BroadcastTarget};
use crate::message_bus::BusMessage;

/// Listeners of a frequency: everyone in range on an aviation frequency,
/// only controllers in range on a coordination frequency.
fn frequency_filter(to: &str) -> Result<BroadcastFilter, ProtocolError> {
    let frequency = Frequency::from_wire(to)
        .ok_or_else(|| ProtocolError::non_fatal(ErrorKind::Syntax, to))?;
    if frequency.is_aviation_band() {
        Ok(BroadcastFilter::InRange)
    } else {
        Ok(BroadcastFilter::atc_in_range())
    }
}

pub(super) async fn text_message(
    ctx: &ServerContext,
    client: &Arc<Client>,
    message: &TextMessage,
    line: &str,
) -> Result<(), ProtocolError> {
    if let Some(target) = BroadcastTarget::from_wire(&message.to) {
        match target {
            BroadcastTarget::AllClients | BroadcastTarget::AllPilots
                if client.rating() < Rating::Supervisor =>
            {
                return Err(ProtocolError::non_fatal(
                    ErrorKind::RatingTooLow,
                    client.callsign(),
                ));
            }
            BroadcastTarget::AllAtc if !client.is_atc() => {
                return Err(ProtocolError::non_fatal(
                    ErrorKind::InvalidCtrl,
                    client.callsign(),
                ));
            }
            _ => {}
        }
        ctx.manager
            .broadcast(line, Some(client), &target.filter())
            .await;
        return Ok(());
    }

    if message.to.starts_with('@') {
        let filter = frequency_filter(&message.to)?;
        ctx.manager.broadcast(line, Some(client), &filter).await;
        return Ok(());
    }

    if ctx.config.is_web_client(&message.to) {
        let published = ctx
            .bus
            .publish(BusMessage::FsdMessageReceived {
                from: message.from.clone(),
                to: message.to.clone(),
                message: message.message.clone(),
            })
            .await;
        if let Err(e) = published {
            warn!("Message for {} not published: {}", message.to, e);
        }
        return Ok(());
    }

    send_to(ctx, &message.to, line).await
}

/// `$HO`, `$HA`, `#PC`, `#SB`, `$PI` and `$PO`
pub(super) async fn relay(
    ctx: &ServerContext,
    client: &Arc<Client>,
    relayed: &Relayed,
    line: &str,
) -> Result<(), ProtocolError> {
    match relayed.kind {
        CommandKind::HandoffRequest | CommandKind::HandoffAccept | CommandKind::ProController
            if !client.is_atc() =>
        {
            Err(ProtocolError::non_fatal(ErrorKind::InvalidCtrl, client.callsign()))
        }
        CommandKind::Ping if relayed.to == ctx.server_name() => {
            let pong = Relayed {
                kind: CommandKind::Pong,
                from: ctx.server_name().to_string(),
                to: client.callsign().to_string(),
                payload: relayed.payload.clone(),
            };
            if let Err(e) = client.send_line(&pong.to_line()) {
                debug!("Pong to {} not queued: {}", client.callsign(), e);
            }
            Ok(())
        }
        CommandKind::Pong if relayed.to == ctx.server_name() => Ok(()),
        _ => forward(ctx, client, &relayed.to, line).await,
    }
}

/// Delivers `line` to a broadcast target, a frequency or a single callsign
pub(super) async fn forward(
    ctx: &ServerContext,
    client: &Arc<Client>,
    to: &str,
    line: &str,
) -> Result<(), ProtocolError> {
    if let Some(target) = BroadcastTarget::from_wire(to) {
        let filter = if to == ALL_ATC {
            BroadcastFilter::atc_in_range()
        } else {
            target.filter()
        };
        ctx.manager.broadcast(line, Some(client), &filter).await;
        return Ok(());
    }
    if to.starts_with('@') {
        let filter = frequency_filter(to)?;
        ctx.manager.broadcast(line, Some(client), &filter).await;
        return Ok(());
    }
    send_to(ctx, to, line).await
}

async fn send_to(ctx: &ServerContext, to: &str, line: &str) -> Result<(), ProtocolError> {
    match ctx.manager.send_message_to(to, &ensure_terminated(line)).await {
        Ok(()) => Ok(()),
        Err(ManagerError::CallsignNotFound(callsign)) => {
            Err(ProtocolError::non_fatal(ErrorKind::NoCallsignFound, callsign))
        }
        Err(e) => {
            debug!("Delivery to {} failed: {}", to, e);
            Ok(())
        }
    }
}
