//! Command handlers.
//!
//! [`dispatch`] parses one line, applies the login gate and the source
//! callsign check, then hands the typed command to its handler. A handler
//! returns `Err(ProtocolError)` for anything the sender must be told about;
//! the session turns it into a `$ER` packet and closes on fatal errors.

mod admin;
mod flight_plan;
mod login;
mod message;
mod position;
mod query;

use std::sync::Arc;

use fsd_shared::command::TextMessage;
use fsd_shared::{parse_line, Command, ErrorKind, Facility, FsdPacket, ProtocolError, Rating};
use log::{debug, warn};

use crate::client::Client;
use crate::context::ServerContext;
use crate::message_bus::BusMessage;
use crate::operation::{AuditEvent, ChangeDetail};
use crate::session::Session;

pub async fn dispatch(
    ctx: &ServerContext,
    session: &mut Session,
    line: &str,
) -> Result<(), ProtocolError> {
    let command = parse_line(line).map_err(|failure| {
        debug!("[{}] parse failure: {}", session.callsign(), failure);
        failure.into_protocol_error()
    })?;

    let client = match session.client() {
        Some(client) => client,
        None => return login::handle_unregistered(ctx, session, command).await,
    };

    if command.source() != client.callsign() {
        return Err(ProtocolError::non_fatal(
            ErrorKind::InvalidSrcCallsign,
            command.source(),
        ));
    }

    match command {
        Command::AddAtc(_) | Command::AddPilot(_) => Err(ProtocolError::non_fatal(
            ErrorKind::AlreadyRegistered,
            client.callsign(),
        )),
        Command::ClientIdentification(identification) => {
            session.set_user_agent(identification.user_agent());
            Ok(())
        }
        Command::Remove(_) => login::logoff(ctx, session, &client).await,
        Command::AtcPosition(position) => {
            position::atc_position(ctx, &client, &position, line).await
        }
        Command::PilotPosition(position) => {
            position::pilot_position(ctx, &client, &position, line).await
        }
        Command::AtcSubVisPoint(point) => position::sub_vis_point(&client, &point),
        Command::TextMessage(message) => message::text_message(ctx, &client, &message, line).await,
        Command::WeatherQuery(request) => query::weather(ctx, &client, &request, line).await,
        Command::WeatherResponse(response) => {
            message::forward(ctx, &client, &response.to, line).await
        }
        Command::ClientQuery(request) => {
            query::client_query(ctx, session, &client, &request, line).await
        }
        Command::ClientResponse(response) => {
            query::client_response(ctx, &client, &response, line).await
        }
        Command::FlightPlan(filing) => flight_plan::file_plan(ctx, &client, &filing).await,
        Command::AtcEditPlan(amendment) => {
            flight_plan::amend_plan(ctx, session, &client, &amendment, line).await
        }
        Command::Relayed(relayed) => message::relay(ctx, &client, &relayed, line).await,
        Command::KillClient(kill) => admin::kill_client(ctx, session, &client, &kill).await,
        Command::Error(report) => {
            debug!(
                "[{}] client reported error {}: {}",
                client.callsign(),
                report.param,
                report.message
            );
            Ok(())
        }
    }
}

/// `#TM<server>:<to>:<text>`
fn server_message(ctx: &ServerContext, to: &str, text: &str) -> String {
    TextMessage::new(ctx.server_name(), to, text).to_line()
}

/// ATC on a facility that controls traffic, rated Observer or above
fn require_controlling(client: &Client) -> Result<(), ProtocolError> {
    let facility = client.facility();
    if !client.is_atc()
        || client.rating() < Rating::Observer
        || !Facility::CONTROLLING.intersects(facility)
    {
        return Err(ProtocolError::non_fatal(
            ErrorKind::InvalidCtrl,
            client.callsign(),
        ));
    }
    Ok(())
}

async fn publish_audit(
    ctx: &ServerContext,
    session: &Session,
    event: AuditEvent,
    subject: i32,
    object: &str,
    change: Option<ChangeDetail>,
) {
    let entry = ctx.audit_log.new_audit_log(
        event,
        subject,
        object,
        &session.remote_addr().ip().to_string(),
        session.user_agent(),
        change,
    );
    if let Err(e) = ctx.bus.publish(BusMessage::AuditLog(entry)).await {
        warn!("Audit record for {:?} on {} not published: {}", event, object, e);
    }
}

async fn find_client(ctx: &ServerContext, callsign: &str) -> Result<Arc<Client>, ProtocolError> {
    ctx.manager
        .get_client(callsign)
        .await
        .ok_or_else(|| ProtocolError::non_fatal(ErrorKind::NoCallsignFound, callsign))
}
