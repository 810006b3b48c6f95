//! Bus subscribers that apply messages to the live server state.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::client_manager::ClientManager;
use crate::error::BusError;
use crate::message_bus::{BusMessage, LoggingEmailNotifier, MessageBus, MessageKind, MessageSubscriber};
use crate::operation::{AuditLogOperation, FlightPlan, FlightPlanOperation};

/// Delivers, broadcasts and kicks on behalf of out-of-band publishers
pub struct ManagerSubscriber {
    manager: Arc<ClientManager>,
}

impl ManagerSubscriber {
    pub fn new(manager: Arc<ClientManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl MessageSubscriber for ManagerSubscriber {
    async fn handle(&self, message: &BusMessage) -> Result<(), BusError> {
        match message {
            BusMessage::SendMessageToClient { callsign, line } => {
                Ok(self.manager.send_message_to(callsign, line).await?)
            }
            BusMessage::BroadcastMessage { target, line } => {
                let delivered = self.manager.broadcast(line, None, &target.filter()).await;
                debug!("Bus broadcast to {} reached {} clients", target.to_wire(), delivered);
                Ok(())
            }
            BusMessage::KickClientFromServer { callsign, reason } => {
                self.manager.kick_client_from_server(callsign, reason).await?;
                Ok(())
            }
            _ => Err(BusError::DataType("client manager message")),
        }
    }
}

/// Keeps the plan cached on online pilots in step with the store
pub struct FlightPlanSubscriber {
    flight_plans: Arc<dyn FlightPlanOperation>,
    manager: Arc<ClientManager>,
}

impl FlightPlanSubscriber {
    pub fn new(flight_plans: Arc<dyn FlightPlanOperation>, manager: Arc<ClientManager>) -> Self {
        Self {
            flight_plans,
            manager,
        }
    }

    async fn refresh_pilots(&self, cid: i32, plan: Option<FlightPlan>) {
        let Ok(clients) = self.manager.get_clients_by_cid(cid).await else {
            return;
        };
        for client in clients.iter().filter(|c| !c.is_atc()) {
            client.set_flight_plan(plan.clone());
        }
    }
}

#[async_trait]
impl MessageSubscriber for FlightPlanSubscriber {
    async fn handle(&self, message: &BusMessage) -> Result<(), BusError> {
        match message {
            BusMessage::FlightPlanLockChange { cid, locked } => {
                self.flight_plans.set_locked(*cid, *locked).await?;
                let plan = self.flight_plans.get_flight_plan_by_cid(*cid).await?;
                self.refresh_pilots(*cid, Some(plan)).await;
                Ok(())
            }
            BusMessage::FlightPlanFlush { plan } => {
                self.refresh_pilots(plan.cid, Some(plan.clone())).await;
                Ok(())
            }
            _ => Err(BusError::DataType("flight plan message")),
        }
    }
}

pub struct AuditLogSubscriber {
    audit_log: Arc<dyn AuditLogOperation>,
}

impl AuditLogSubscriber {
    pub fn new(audit_log: Arc<dyn AuditLogOperation>) -> Self {
        Self { audit_log }
    }
}

#[async_trait]
impl MessageSubscriber for AuditLogSubscriber {
    async fn handle(&self, message: &BusMessage) -> Result<(), BusError> {
        match message {
            BusMessage::AuditLog(entry) => Ok(self.audit_log.save_audit_log(entry.clone()).await?),
            _ => Err(BusError::DataType("AuditLog")),
        }
    }
}

/// Wires the built-in subscribers onto `bus`.
///
/// `FsdMessageReceived` is left for an external websocket tunnel.
pub fn subscribe_all(
    bus: &MessageBus,
    manager: &Arc<ClientManager>,
    flight_plans: &Arc<dyn FlightPlanOperation>,
    audit_log: &Arc<dyn AuditLogOperation>,
) {
    let clients = Arc::new(ManagerSubscriber::new(Arc::clone(manager)));
    bus.subscribe(MessageKind::SendMessageToClient, clients.clone());
    bus.subscribe(MessageKind::BroadcastMessage, clients.clone());
    bus.subscribe(MessageKind::KickClientFromServer, clients);

    let plans = Arc::new(FlightPlanSubscriber::new(
        Arc::clone(flight_plans),
        Arc::clone(manager),
    ));
    bus.subscribe(MessageKind::FlightPlanLockChange, plans.clone());
    bus.subscribe(MessageKind::FlightPlanFlush, plans);

    bus.subscribe(
        MessageKind::AuditLog,
        Arc::new(AuditLogSubscriber::new(Arc::clone(audit_log))),
    );
    bus.subscribe(MessageKind::KickedFromServerEmail, Arc::new(LoggingEmailNotifier));
}
