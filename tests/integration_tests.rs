//! End-to-end tests for the FSD server
//!
//! Every test starts a real server on an ephemeral port and drives it with
//! plain TCP clients speaking the line protocol.

use std::sync::Arc;
use std::time::Duration;

use fsd_server::config::{SeedUser, ServerConfig};
use fsd_server::context::Collaborators;
use fsd_server::network::FsdServer;
use fsd_server::operation::memory::{
    MemoryAuditLog, MemoryFlightPlanStore, MemoryUserStore, StaticMetarSource,
};
use fsd_server::operation::AuditEvent;
use fsd_shared::Rating;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

const PASSWORD: &str = "pw";
const RECV_TIMEOUT: Duration = Duration::from_secs(3);
const QUIET_PERIOD: Duration = Duration::from_millis(300);

const PILOT_POSITION: &str = "@N:CES2352:7000:1:31.20:121.35:87:0:4290770974:278";

struct TestServer {
    server: FsdServer,
    audit_log: Arc<MemoryAuditLog>,
}

impl TestServer {
    async fn start(users: &[(i32, Rating)]) -> Self {
        let hash = bcrypt::hash(PASSWORD, 4).unwrap();
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            shutdown_timeout_secs: 2,
            users: users
                .iter()
                .map(|&(cid, rating)| SeedUser {
                    cid,
                    real_name: format!("User {}", cid),
                    rating,
                    password_hash: hash.clone(),
                })
                .collect(),
            ..ServerConfig::default()
        };

        let audit_log = Arc::new(MemoryAuditLog::new());
        let collaborators = Collaborators {
            users: Arc::new(MemoryUserStore::from_seed(&config.users)),
            flight_plans: Arc::new(MemoryFlightPlanStore::new()),
            audit_log: audit_log.clone(),
            metar: Arc::new(StaticMetarSource::new(config.weather.clone())),
        };
        let server = FsdServer::start(config, collaborators).await.unwrap();
        Self { server, audit_log }
    }

    async fn connect(&self) -> FsdClient {
        FsdClient::connect(&self.server).await
    }

    async fn registered(&self) -> usize {
        self.server.context().manager.len().await
    }
}

struct FsdClient {
    callsign: String,
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl FsdClient {
    async fn connect(server: &FsdServer) -> Self {
        let stream = TcpStream::connect(server.local_addr()).await.unwrap();
        let (reader, writer) = stream.into_split();
        let mut client = Self {
            callsign: String::new(),
            lines: BufReader::new(reader).lines(),
            writer,
        };
        let hello = client.recv().await.unwrap();
        assert!(hello.starts_with("$DISERVER:CLIENT:"), "{}", hello);
        client
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\r\n", line).as_bytes())
            .await
            .unwrap();
    }

    /// Next line, or None once the server closed the connection
    async fn recv(&mut self) -> Option<String> {
        timeout(RECV_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .unwrap_or(None)
    }

    /// Skips lines until one starts with `prefix`
    async fn recv_until(&mut self, prefix: &str) -> String {
        loop {
            match self.recv().await {
                Some(line) if line.starts_with(prefix) => return line,
                Some(_) => continue,
                None => panic!("connection closed before {:?}", prefix),
            }
        }
    }

    /// True when nothing arrives within the quiet period
    async fn is_quiet(&mut self) -> bool {
        timeout(QUIET_PERIOD, self.lines.next_line()).await.is_err()
    }

    /// Round-trips a ping so every earlier command of this client is done
    async fn sync(&mut self) {
        let ping = format!("$PI{}:SERVER:sync", self.callsign);
        self.send(&ping).await;
        let pong = format!("$POSERVER:{}:sync", self.callsign);
        self.recv_until(&pong).await;
    }

    async fn login_atc(&mut self, callsign: &str, cid: i32, rating: Rating) -> Option<String> {
        self.callsign = callsign.to_string();
        let rating = rating.as_i32();
        self.send(&format!(
            "#AA{}:SERVER:User {}:{}:{}:{}:9",
            callsign, cid, cid, PASSWORD, rating
        ))
        .await;
        self.recv().await
    }

    async fn login_pilot(&mut self, callsign: &str, cid: i32) -> Option<String> {
        self.callsign = callsign.to_string();
        self.send(&format!(
            "#AP{}:SERVER:{}:{}:1:9:16:User {}",
            callsign, cid, PASSWORD, cid
        ))
        .await;
        self.recv().await
    }

    /// Logs in a controller and reports a 300 nm position near Shanghai
    async fn controller(server: &TestServer, callsign: &str, cid: i32, rating: Rating) -> Self {
        let mut client = server.connect().await;
        let welcome = client.login_atc(callsign, cid, rating).await.unwrap();
        assert!(welcome.starts_with("#TMSERVER:"), "{}", welcome);
        let facility = if callsign.ends_with("_SUP") { 9 } else { 7 };
        client
            .send(&format!(
                "%{}:29950:{}:300:{}:31.19:121.33:0",
                callsign, facility, rating.as_i32()
            ))
            .await;
        client.sync().await;
        client
    }

    async fn pilot(server: &TestServer, callsign: &str, cid: i32) -> Self {
        let mut client = server.connect().await;
        let welcome = client.login_pilot(callsign, cid).await.unwrap();
        assert!(welcome.starts_with("#TMSERVER:"), "{}", welcome);
        client
            .send(&PILOT_POSITION.replace("CES2352", callsign))
            .await;
        client.sync().await;
        client
    }
}

/// Polls `check` until it holds or a few seconds pass
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        sleep(Duration::from_millis(30)).await;
    }
    false
}

/// SESSION AND REGISTRY TESTS
mod login_tests {
    use super::*;

    /// A pilot's position reaches a controller within visibility range verbatim
    #[tokio::test]
    async fn login_position_broadcast() {
        let server = TestServer::start(&[(2352, Rating::Controller1), (1234, Rating::Normal)]).await;
        let mut atc = FsdClient::controller(&server, "ZSHA_CTR", 2352, Rating::Controller1).await;
        let mut pilot = server.connect().await;
        pilot.login_pilot("CES2352", 1234).await.unwrap();

        pilot.send(PILOT_POSITION).await;

        assert_eq!(atc.recv_until("@").await, PILOT_POSITION);
        pilot.sync().await;
        assert!(pilot.is_quiet().await);
        server.server.shutdown().await.unwrap();
    }

    /// Two simultaneous logins with one callsign: exactly one wins
    #[tokio::test]
    async fn callsign_collision() {
        let server = TestServer::start(&[(2352, Rating::Controller1), (2353, Rating::Controller1)]).await;
        let mut first = server.connect().await;
        let mut second = server.connect().await;

        let (a, b) = tokio::join!(
            first.login_atc("ZSHA_CTR", 2352, Rating::Controller1),
            second.login_atc("ZSHA_CTR", 2353, Rating::Controller1),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        let rejected = [&a, &b]
            .iter()
            .filter(|line| line.starts_with("$ERSERVER:ZSHA_CTR:1:"))
            .count();
        let accepted = [&a, &b]
            .iter()
            .filter(|line| line.starts_with("#TMSERVER:ZSHA_CTR:"))
            .count();
        assert_eq!((accepted, rejected), (1, 1), "{} / {}", a, b);
        assert_eq!(server.registered().await, 1);
        server.server.shutdown().await.unwrap();
    }

    /// A controller whose socket drops can log in again and keeps its slot
    #[tokio::test]
    async fn graceful_reconnect() {
        let server = TestServer::start(&[(2352, Rating::Controller1)]).await;
        let manager = Arc::clone(&server.server.context().manager);
        let atc = FsdClient::controller(&server, "ZSHA_CTR", 2352, Rating::Controller1).await;
        let original = manager.get_client("ZSHA_CTR").await.unwrap();
        drop(atc);

        let lost = &original;
        assert!(eventually(|| async move { lost.is_disconnected() }).await);

        let mut again = server.connect().await;
        let welcome = again.login_atc("ZSHA_CTR", 2352, Rating::Controller1).await.unwrap();
        assert!(welcome.starts_with("#TMSERVER:ZSHA_CTR:"), "{}", welcome);
        again.sync().await;

        let current = manager.get_client("ZSHA_CTR").await.unwrap();
        assert!(Arc::ptr_eq(&original, &current));
        assert!(!current.is_disconnected());
        assert_eq!(manager.whazzup().await.controllers.len(), 1);
        server.server.shutdown().await.unwrap();
    }

    /// Shutdown closes every session and empties the registry
    #[tokio::test]
    async fn shutdown_disconnects_everyone() {
        let server = TestServer::start(&[(2352, Rating::Controller1), (1234, Rating::Normal)]).await;
        let mut atc = FsdClient::controller(&server, "ZSHA_CTR", 2352, Rating::Controller1).await;
        let mut pilot = FsdClient::pilot(&server, "CES2352", 1234).await;
        let mut idle = server.connect().await;

        server.server.shutdown().await.unwrap();

        assert_eq!(server.registered().await, 0);
        for client in [&mut atc, &mut pilot, &mut idle] {
            while client.recv().await.is_some() {}
        }
    }
}

/// SUPERVISOR AND MESSAGING TESTS
mod supervisor_tests {
    use super::*;

    /// A supervisor kick disconnects the pilot and lands in the audit log
    #[tokio::test]
    async fn kick_by_supervisor() {
        let server = TestServer::start(&[(1000, Rating::Supervisor), (1234, Rating::Normal)]).await;
        let mut sup = FsdClient::controller(&server, "ZSHA_SUP", 1000, Rating::Supervisor).await;
        let mut pilot = FsdClient::pilot(&server, "CES2352", 1234).await;

        sup.send("$!!ZSHA_SUP:CES2352:test").await;

        assert_eq!(
            pilot.recv_until("$ER").await,
            "$ERSERVER:CES2352:18:CES2352:you were kicked from the server, reason is test"
        );
        assert!(pilot.recv().await.is_none());
        assert_eq!(sup.recv_until("#DP").await, "#DPCES2352");
        assert_eq!(server.registered().await, 1);

        let audit_log = Arc::clone(&server.audit_log);
        assert!(eventually(|| {
            let audit_log = Arc::clone(&audit_log);
            async move { !audit_log.entries().await.is_empty() }
        })
        .await);
        let entries = server.audit_log.entries().await;
        assert_eq!(entries[0].event_type, AuditEvent::ClientKickedFromFsd);
        assert_eq!(entries[0].subject, 1000);
        assert_eq!(entries[0].object, "CES2352");
        server.server.shutdown().await.unwrap();
    }

    /// `*S` text reaches supervisors and nobody else
    #[tokio::test]
    async fn broadcast_to_supervisors() {
        let server = TestServer::start(&[
            (1000, Rating::Supervisor),
            (1001, Rating::Supervisor),
            (1002, Rating::Controller1),
            (1234, Rating::Normal),
        ])
        .await;
        let mut sup1 = FsdClient::controller(&server, "ZSHA_SUP", 1000, Rating::Supervisor).await;
        let mut sup2 = FsdClient::controller(&server, "ZSPD_SUP", 1001, Rating::Supervisor).await;
        let mut ctr = FsdClient::controller(&server, "ZSHA_CTR", 1002, Rating::Controller1).await;
        let mut pilot = FsdClient::pilot(&server, "CES2352", 1234).await;
        for client in [&mut sup1, &mut sup2, &mut ctr] {
            client.sync().await;
        }

        sup1.send("#TMZSHA_SUP:*S:msg").await;

        assert_eq!(sup2.recv_until("#TM").await, "#TMZSHA_SUP:*S:msg");
        assert!(ctr.is_quiet().await);
        assert!(pilot.is_quiet().await);
        assert!(sup1.is_quiet().await);
        server.server.shutdown().await.unwrap();
    }
}

/// FLIGHT PLAN TESTS
mod flight_plan_tests {
    use super::*;

    const FILING: &str =
        "$FPCES2352:SERVER:I:B738:450:ZSSS:1200:0:35000:ZBAA:2:30:3:45:ZSPD:/V/:PIKAS G330 PIMOL";
    const AMENDMENT: &str =
        "$AMZSHA_CTR:SERVER:CES2352:I:B738:450:ZSSS:1200:0:FL291:ZBAA:2:30:3:45:ZSPD:/V/:PIKAS G330 PIMOL";

    /// File, amend and lock: the pilot cannot refile the same city pair
    #[tokio::test]
    async fn flight_plan_lifecycle() {
        let server = TestServer::start(&[(2352, Rating::Controller1), (1234, Rating::Normal)]).await;
        let mut atc = FsdClient::controller(&server, "ZSHA_CTR", 2352, Rating::Controller1).await;
        let mut pilot = FsdClient::pilot(&server, "CES2352", 1234).await;

        pilot.send(FILING).await;
        assert_eq!(
            atc.recv_until("$FP").await,
            "$FPCES2352:*A:I:B738:450:ZSSS:1200:0:FL350:ZBAA:2:30:3:45:ZSPD:/V/:PIKAS G330 PIMOL"
        );

        atc.send(AMENDMENT).await;
        atc.sync().await;
        let held = server
            .server
            .context()
            .manager
            .get_client("CES2352")
            .await
            .unwrap()
            .flight_plan()
            .unwrap();
        assert!(held.locked);
        assert_eq!(held.fields.cruise_altitude, "FL291");

        pilot.send(FILING).await;
        let error = pilot.recv_until("$ER").await;
        assert!(error.starts_with("$ERSERVER:CES2352:18:"), "{}", error);
        assert!(error.ends_with("flight plan is locked"), "{}", error);

        // still connected after a non-fatal error
        pilot.sync().await;
        server.server.shutdown().await.unwrap();
    }
}
