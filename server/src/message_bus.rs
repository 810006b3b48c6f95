//! Typed asynchronous message bus.
//!
//! The bus decouples the protocol engine from its side effects. Messages go
//! through one bounded channel; a single reader task hands every message to
//! each subscriber of its kind on a separate task. [`MessageBus::publish_sync`]
//! skips the channel and reports the first subscriber error to the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use crate::error::{BusError, ServerError};
use crate::filter::BroadcastTarget;
use crate::operation::{AuditLog, FlightPlan};
use crate::shutdown::Release;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    FsdMessageReceived,
    SendMessageToClient,
    BroadcastMessage,
    KickClientFromServer,
    AuditLog,
    KickedFromServerEmail,
    FlightPlanFlush,
    FlightPlanLockChange,
}

#[derive(Debug, Clone)]
pub enum BusMessage {
    /// A text message addressed to a websocket tunnel client
    FsdMessageReceived {
        from: String,
        to: String,
        message: String,
    },
    SendMessageToClient {
        callsign: String,
        line: String,
    },
    BroadcastMessage {
        target: BroadcastTarget,
        line: String,
    },
    KickClientFromServer {
        callsign: String,
        reason: String,
    },
    AuditLog(AuditLog),
    KickedFromServerEmail {
        cid: i32,
        callsign: String,
        reason: String,
        operator: String,
    },
    FlightPlanFlush {
        plan: FlightPlan,
    },
    FlightPlanLockChange {
        cid: i32,
        locked: bool,
    },
}

impl BusMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            BusMessage::FsdMessageReceived { .. } => MessageKind::FsdMessageReceived,
            BusMessage::SendMessageToClient { .. } => MessageKind::SendMessageToClient,
            BusMessage::BroadcastMessage { .. } => MessageKind::BroadcastMessage,
            BusMessage::KickClientFromServer { .. } => MessageKind::KickClientFromServer,
            BusMessage::AuditLog(_) => MessageKind::AuditLog,
            BusMessage::KickedFromServerEmail { .. } => MessageKind::KickedFromServerEmail,
            BusMessage::FlightPlanFlush { .. } => MessageKind::FlightPlanFlush,
            BusMessage::FlightPlanLockChange { .. } => MessageKind::FlightPlanLockChange,
        }
    }
}

#[async_trait]
pub trait MessageSubscriber: Send + Sync {
    async fn handle(&self, message: &BusMessage) -> Result<(), BusError>;
}

type SubscriberMap = HashMap<MessageKind, Vec<Arc<dyn MessageSubscriber>>>;

pub struct MessageBus {
    sender: Mutex<Option<mpsc::Sender<BusMessage>>>,
    subscribers: Arc<RwLock<SubscriberMap>>,
    tracker: TaskTracker,
    reader: Mutex<Option<JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

impl MessageBus {
    /// Creates the bus and spawns its reader task; must run inside a runtime.
    pub fn new(capacity: usize, shutdown_timeout: Duration) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(capacity);
        let subscribers: Arc<RwLock<SubscriberMap>> = Arc::default();
        let tracker = TaskTracker::new();

        let reader = tokio::spawn(Self::run_reader(
            receiver,
            Arc::clone(&subscribers),
            tracker.clone(),
        ));

        Arc::new(Self {
            sender: Mutex::new(Some(sender)),
            subscribers,
            tracker,
            reader: Mutex::new(Some(reader)),
            shutdown_timeout,
        })
    }

    async fn run_reader(
        mut receiver: mpsc::Receiver<BusMessage>,
        subscribers: Arc<RwLock<SubscriberMap>>,
        tracker: TaskTracker,
    ) {
        while let Some(message) = receiver.recv().await {
            let kind = message.kind();
            let targets = subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&kind)
                .cloned()
                .unwrap_or_default();

            if targets.is_empty() {
                debug!("No subscriber for {:?}", kind);
                continue;
            }

            let message = Arc::new(message);
            for subscriber in targets {
                let message = Arc::clone(&message);
                tracker.spawn(async move {
                    if let Err(e) = subscriber.handle(&message).await {
                        warn!("Subscriber for {:?} failed: {}", message.kind(), e);
                    }
                });
            }
        }
        debug!("Message bus reader stopped");
    }

    pub fn subscribe(&self, kind: MessageKind, subscriber: Arc<dyn MessageSubscriber>) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(subscriber);
    }

    fn sender(&self) -> Option<mpsc::Sender<BusMessage>> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Queues a message; waits while the channel is full.
    pub async fn publish(&self, message: BusMessage) -> Result<(), BusError> {
        let sender = self.sender().ok_or(BusError::Closed)?;
        sender.send(message).await.map_err(|_| BusError::Closed)
    }

    /// Runs every subscriber of the message's kind on the caller's task and
    /// returns the first error.
    pub async fn publish_sync(&self, message: BusMessage) -> Result<(), BusError> {
        if self.sender().is_none() {
            return Err(BusError::Closed);
        }

        let targets = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&message.kind())
            .cloned()
            .unwrap_or_default();

        let mut first_error = None;
        for subscriber in targets {
            if let Err(e) = subscriber.handle(&message).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Closes the channel, then waits for the reader and in-flight deliveries.
    pub async fn shutdown(&self) -> Result<(), BusError> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_none() {
            return Ok(());
        }
        drop(sender);

        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let tracker = self.tracker.clone();
        let drain = async move {
            if let Some(reader) = reader {
                let _ = reader.await;
            }
            tracker.close();
            tracker.wait().await;
        };

        match tokio::time::timeout(self.shutdown_timeout, drain).await {
            Ok(()) => {
                info!("Message bus stopped");
                Ok(())
            }
            Err(_) => {
                warn!("Message bus did not drain within {:?}", self.shutdown_timeout);
                Err(BusError::ShutdownTimeout)
            }
        }
    }
}

#[async_trait]
impl Release for MessageBus {
    fn name(&self) -> &str {
        "message bus"
    }

    async fn release(&self) -> Result<(), ServerError> {
        self.shutdown().await.map_err(ServerError::from)
    }
}

/// Stand-in for the email service: records kick notifications in the log
pub struct LoggingEmailNotifier;

#[async_trait]
impl MessageSubscriber for LoggingEmailNotifier {
    async fn handle(&self, message: &BusMessage) -> Result<(), BusError> {
        match message {
            BusMessage::KickedFromServerEmail {
                cid,
                callsign,
                reason,
                operator,
            } => {
                info!(
                    "email: notify cid {} that {} was kicked by {} ({})",
                    cid, callsign, operator, reason
                );
                Ok(())
            }
            _ => Err(BusError::DataType("KickedFromServerEmail")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Default)]
    struct Recorder {
        seen: AsyncMutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl MessageSubscriber for Recorder {
        async fn handle(&self, message: &BusMessage) -> Result<(), BusError> {
            if let BusMessage::SendMessageToClient { callsign, .. } = message {
                self.seen.lock().await.push(callsign.clone());
            }
            if self.fail {
                Err(BusError::CallsignNotFound("CES2352".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn send_to(callsign: &str) -> BusMessage {
        BusMessage::SendMessageToClient {
            callsign: callsign.to_string(),
            line: "#TMSERVER:X:hi\r\n".to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = MessageBus::new(8, Duration::from_secs(5));
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        bus.subscribe(MessageKind::SendMessageToClient, a.clone());
        bus.subscribe(MessageKind::SendMessageToClient, b.clone());

        bus.publish(send_to("CES2352")).await.unwrap();
        bus.shutdown().await.unwrap();

        assert_eq!(*a.seen.lock().await, vec!["CES2352".to_string()]);
        assert_eq!(*b.seen.lock().await, vec!["CES2352".to_string()]);
    }

    #[tokio::test]
    async fn test_publish_sync_returns_first_error() {
        let bus = MessageBus::new(8, Duration::from_secs(5));
        let ok = Arc::new(Recorder::default());
        let failing = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        bus.subscribe(MessageKind::SendMessageToClient, ok.clone());
        bus.subscribe(MessageKind::SendMessageToClient, failing.clone());

        let result = bus.publish_sync(send_to("CES2352")).await;
        assert_eq!(result, Err(BusError::CallsignNotFound("CES2352".to_string())));
        assert_eq!(ok.seen.lock().await.len(), 1);
        assert_eq!(failing.seen.lock().await.len(), 1);

        // no subscriber for the kind is not an error
        let result = bus
            .publish_sync(BusMessage::FlightPlanLockChange {
                cid: 1,
                locked: true,
            })
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_publish_after_shutdown_fails() {
        let bus = MessageBus::new(8, Duration::from_secs(5));
        bus.shutdown().await.unwrap();
        assert_eq!(bus.publish(send_to("CES2352")).await, Err(BusError::Closed));
        assert_eq!(bus.publish_sync(send_to("CES2352")).await, Err(BusError::Closed));
        // second shutdown is a no-op
        assert!(bus.shutdown().await.is_ok());
    }

    #[tokio::test]
    async fn test_email_notifier_rejects_other_kinds() {
        let notifier = LoggingEmailNotifier;
        assert!(notifier
            .handle(&BusMessage::KickedFromServerEmail {
                cid: 1,
                callsign: "CES2352".to_string(),
                reason: "test".to_string(),
                operator: "ZSHA_SUP".to_string(),
            })
            .await
            .is_ok());
        assert_eq!(
            notifier.handle(&send_to("CES2352")).await,
            Err(BusError::DataType("KickedFromServerEmail"))
        );
    }
}
