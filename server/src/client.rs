//! Live record of a registered participant.
//!
//! A [`Client`] is owned by the client manager. Its mutable state sits behind
//! a short-held lock; the connection-level flags are atomics so the broadcast
//! path can skip dead recipients without touching the lock.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use fsd_shared::command::{AtcPosition, PilotPosition};
use fsd_shared::geo::MAX_VIS_POINTS;
use fsd_shared::{Facility, Frequency, Position, Rating, VisPoints};
use log::{debug, warn};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::error::ManagerError;
use crate::operation::{FlightPlan, User};

/// Capability flags a client reports in its `$CR…:CAPS` response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u16);

impl Capabilities {
    pub const ATCINFO: Capabilities = Capabilities(1 << 0);
    pub const SECPOS: Capabilities = Capabilities(1 << 1);
    pub const MODELDESC: Capabilities = Capabilities(1 << 2);
    pub const ONGOINGCOORD: Capabilities = Capabilities(1 << 3);
    pub const NEWINFO: Capabilities = Capabilities(1 << 4);
    pub const TEAMSPEAK: Capabilities = Capabilities(1 << 5);
    pub const ICAOEQ: Capabilities = Capabilities(1 << 6);
    pub const FASTPOS: Capabilities = Capabilities(1 << 7);
    pub const VIS: Capabilities = Capabilities(1 << 8);
    pub const STEALTH: Capabilities = Capabilities(1 << 9);

    const NAMES: [(&'static str, Capabilities); 10] = [
        ("ATCINFO", Self::ATCINFO),
        ("SECPOS", Self::SECPOS),
        ("MODELDESC", Self::MODELDESC),
        ("ONGOINGCOORD", Self::ONGOINGCOORD),
        ("NEWINFO", Self::NEWINFO),
        ("TEAMSPEAK", Self::TEAMSPEAK),
        ("ICAOEQ", Self::ICAOEQ),
        ("FASTPOS", Self::FASTPOS),
        ("VIS", Self::VIS),
        ("STEALTH", Self::STEALTH),
    ];

    pub fn from_name(name: &str) -> Option<Capabilities> {
        Self::NAMES
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, c)| *c)
    }

    /// Parses `KEY=1` items; keys with any other value or unknown keys are ignored.
    pub fn from_response<S: AsRef<str>>(items: &[S]) -> Capabilities {
        items
            .iter()
            .filter_map(|item| item.as_ref().split_once('='))
            .filter(|(_, value)| value.trim() == "1")
            .filter_map(|(key, _)| Self::from_name(key.trim()))
            .fold(Capabilities::default(), |acc, c| acc.with(c))
    }

    pub fn contains(self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn with(self, other: Capabilities) -> Capabilities {
        Capabilities(self.0 | other.0)
    }

    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(_, c)| self.contains(*c))
            .map(|(n, _)| *n)
            .collect()
    }
}

/// The writer side of the session currently bound to a client
#[derive(Debug, Clone)]
pub struct SessionLink {
    pub id: u64,
    pub sender: mpsc::Sender<Arc<str>>,
    /// Cancelling asks the session to drain its queue and close
    pub cancel: CancellationToken,
    /// Cancelled by the session once its socket is closed
    pub closed: CancellationToken,
    pub remote_addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct History {
    pub start_time: DateTime<Utc>,
    pub callsign: String,
}

/// Everything a successful login knows about the new client
#[derive(Debug, Clone)]
pub struct ClientLogin {
    pub callsign: String,
    pub user: User,
    pub real_name: String,
    pub is_atc: bool,
    pub rating: Rating,
    pub facility: Facility,
    pub protocol: u32,
    pub sim_type: u32,
    pub position: Option<Position>,
    pub visual_range: f64,
}

#[derive(Debug, Clone)]
pub struct ClientState {
    pub user: User,
    pub real_name: String,
    pub rating: Rating,
    pub facility: Facility,
    pub frequency: Frequency,
    pub visual_range: f64,
    pub vis_points: VisPoints,
    next_extended_slot: usize,
    pub transponder: u16,
    pub altitude: i32,
    pub groundspeed: i32,
    pub heading: f64,
    pub on_ground: bool,
    pub flight_plan: Option<FlightPlan>,
    pub atis: Vec<String>,
    pub atis_voice_url: Option<String>,
    pub logoff_time: Option<String>,
    pub capabilities: Capabilities,
    pub protocol: u32,
    pub sim_type: u32,
    pub on_break: bool,
    pub last_update: DateTime<Utc>,
}

/// What the in-range filter needs to know about one side of a broadcast
#[derive(Debug, Clone, Copy)]
pub struct Visibility {
    pub is_atc: bool,
    pub visual_range: f64,
    pub points: VisPoints,
}

pub struct Client {
    callsign: String,
    cid: i32,
    is_atc: bool,
    history: History,
    state: RwLock<ClientState>,
    disconnected: AtomicBool,
    session_id: AtomicU64,
    link: Mutex<Option<SessionLink>>,
}

impl Client {
    pub fn new(login: ClientLogin, link: SessionLink) -> Self {
        let now = Utc::now();
        let mut vis_points = VisPoints::default();
        if let Some(position) = login.position {
            vis_points.set_primary(position);
        }

        Self {
            cid: login.user.cid,
            is_atc: login.is_atc,
            history: History {
                start_time: now,
                callsign: login.callsign.clone(),
            },
            session_id: AtomicU64::new(link.id),
            link: Mutex::new(Some(link)),
            disconnected: AtomicBool::new(false),
            state: RwLock::new(ClientState {
                user: login.user,
                real_name: login.real_name,
                rating: login.rating,
                facility: login.facility,
                frequency: Frequency::default(),
                visual_range: login.visual_range,
                vis_points,
                next_extended_slot: 1,
                transponder: 0,
                altitude: 0,
                groundspeed: 0,
                heading: 0.0,
                on_ground: false,
                flight_plan: None,
                atis: Vec::new(),
                atis_voice_url: None,
                logoff_time: None,
                capabilities: Capabilities::default(),
                protocol: login.protocol,
                sim_type: login.sim_type,
                on_break: false,
                last_update: now,
            }),
            callsign: login.callsign,
        }
    }

    pub fn callsign(&self) -> &str {
        &self.callsign
    }

    pub fn cid(&self) -> i32 {
        self.cid
    }

    pub fn is_atc(&self) -> bool {
        self.is_atc
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Runs `f` against the current state under the read lock
    pub fn with_state<T>(&self, f: impl FnOnce(&ClientState) -> T) -> T {
        let guard = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn update_state<T>(&self, f: impl FnOnce(&mut ClientState) -> T) -> T {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn snapshot(&self) -> ClientState {
        self.with_state(Clone::clone)
    }

    pub fn rating(&self) -> Rating {
        self.with_state(|s| s.rating)
    }

    pub fn facility(&self) -> Facility {
        self.with_state(|s| s.facility)
    }

    pub fn real_name(&self) -> String {
        self.with_state(|s| s.real_name.clone())
    }

    pub fn visibility(&self) -> Visibility {
        self.with_state(|s| Visibility {
            is_atc: self.is_atc,
            visual_range: s.visual_range,
            points: s.vis_points,
        })
    }

    pub fn update_atc_position(&self, position: &AtcPosition) {
        self.update_state(|s| {
            s.frequency = position.frequency;
            s.facility = position.facility;
            s.visual_range = position.visual_range as f64;
            s.vis_points.set_primary(position.position);
            s.last_update = Utc::now();
        });
    }

    pub fn update_pilot_position(&self, position: &PilotPosition) {
        let attitude = position.attitude();
        self.update_state(|s| {
            s.transponder = position.transponder;
            s.vis_points.set_primary(position.position);
            s.altitude = position.altitude;
            s.groundspeed = position.groundspeed;
            s.heading = attitude.heading;
            s.on_ground = attitude.on_ground;
            s.last_update = Utc::now();
        });
    }

    /// Stores an extended visibility centre, cycling through slots 1..=3.
    /// Returns the slot that was written.
    pub fn add_extended_vis_point(&self, position: Position) -> usize {
        self.update_state(|s| {
            let slot = s.next_extended_slot;
            s.vis_points.set_extended(slot, position);
            s.next_extended_slot = if slot + 1 >= MAX_VIS_POINTS { 1 } else { slot + 1 };
            slot
        })
    }

    pub fn flight_plan(&self) -> Option<FlightPlan> {
        self.with_state(|s| s.flight_plan.clone())
    }

    pub fn set_flight_plan(&self, plan: Option<FlightPlan>) {
        self.update_state(|s| s.flight_plan = plan);
    }

    pub fn set_capabilities(&self, capabilities: Capabilities) {
        self.update_state(|s| s.capabilities = capabilities);
    }

    pub fn set_on_break(&self, on_break: bool) {
        self.update_state(|s| s.on_break = on_break);
    }

    pub fn clear_atis(&self) {
        self.update_state(|s| {
            s.atis.clear();
            s.logoff_time = None;
        });
    }

    pub fn push_atis_line(&self, line: String) {
        self.update_state(|s| s.atis.push(line));
    }

    pub fn set_logoff_time(&self, time: String) {
        self.update_state(|s| s.logoff_time = Some(time));
    }

    pub fn set_atis_voice_url(&self, url: String) {
        self.update_state(|s| s.atis_voice_url = Some(url));
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    /// Marks the client disconnected; returns true if it was live before.
    pub fn mark_disconnected(&self) -> bool {
        !self.disconnected.swap(true, Ordering::AcqRel)
    }

    pub fn session_id(&self) -> u64 {
        self.session_id.load(Ordering::Acquire)
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.lock_link().as_ref().map(|l| l.remote_addr)
    }

    fn lock_link(&self) -> std::sync::MutexGuard<'_, Option<SessionLink>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Binds a new session to a client whose previous session was lost.
    ///
    /// Succeeds only on the `disconnected -> live` transition, so two
    /// concurrent reconnects cannot both win. The old session is asked to close.
    pub fn rebind(&self, link: SessionLink, user: User) -> bool {
        let old = {
            let mut current = self.lock_link();
            if current.is_none() {
                // retired by an expired reconnect window
                return false;
            }
            if self
                .disconnected
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return false;
            }
            self.session_id.store(link.id, Ordering::Release);
            current.replace(link)
        };

        if let Some(old) = old {
            old.cancel.cancel();
        }
        self.update_state(|s| {
            s.real_name = user.real_name.clone();
            s.user = user;
            s.last_update = Utc::now();
        });
        true
    }

    /// Detaches the lost session `session_id` for good, so that no later
    /// reconnect can rebind it. Fails when the client was rebound meanwhile.
    pub fn retire(&self, session_id: u64) -> bool {
        let mut current = self.lock_link();
        if !self.is_disconnected() || self.session_id() != session_id {
            return false;
        }
        current.take().is_some()
    }

    /// Marks the client disconnected and asks its session to drain and close.
    /// Returns the token that fires once the socket is closed.
    pub fn close(&self) -> Option<CancellationToken> {
        self.disconnected.store(true, Ordering::Release);
        let link = self.lock_link();
        let closed = link.as_ref().map(|l| {
            l.cancel.cancel();
            l.closed.clone()
        });
        closed
    }

    pub fn send_line(&self, line: &str) -> Result<(), ManagerError> {
        debug!("[{}] <- {}", self.callsign, line.trim_end());
        self.send_line_without_log(Arc::from(line))
    }

    /// Queues a line without logging it; used by the broadcast path.
    ///
    /// A full queue drops the client: it is marked disconnected and its
    /// session is told to close.
    pub fn send_line_without_log(&self, line: Arc<str>) -> Result<(), ManagerError> {
        if self.is_disconnected() {
            return Err(ManagerError::ClientDisconnected(self.callsign.clone()));
        }

        let link = self.lock_link();
        let link = match link.as_ref() {
            Some(link) => link,
            None => return Err(ManagerError::ClientDisconnected(self.callsign.clone())),
        };

        match link.sender.try_send(line) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!("Outbound queue of {} is full, dropping client", self.callsign);
                self.disconnected.store(true, Ordering::Release);
                link.cancel.cancel();
                Err(ManagerError::QueueFull(self.callsign.clone()))
            }
            Err(TrySendError::Closed(_)) => {
                self.disconnected.store(true, Ordering::Release);
                Err(ManagerError::ClientDisconnected(self.callsign.clone()))
            }
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("callsign", &self.callsign)
            .field("cid", &self.cid)
            .field("is_atc", &self.is_atc)
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}
