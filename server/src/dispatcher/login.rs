//! `#AA` / `#AP` registration, reconnects and logoff.

use std::sync::Arc;

use fsd_shared::command::{AddAtc, AddPilot, ClientQuery};
use fsd_shared::{
    is_valid_callsign, Command, ErrorKind, Facility, FsdPacket, Position, ProtocolError, Rating,
    SUPPORTED_PROTOCOLS,
};
use log::{debug, info, warn};

use super::server_message;
use crate::client::{Client, ClientLogin};
use crate::context::ServerContext;
use crate::error::{ManagerError, StoreError};
use crate::filter::BroadcastFilter;
use crate::operation::User;
use crate::session::Session;

/// Fields shared by both login packets
struct LoginRequest {
    callsign: String,
    cid: i32,
    password: String,
    rating: Rating,
    protocol: u32,
    sim_type: u32,
    real_name: String,
    is_atc: bool,
    position: Option<Position>,
    visual_range: Option<f64>,
    /// The login packet with its password cleared, relayed to nearby clients
    announcement: String,
}

impl From<AddAtc> for LoginRequest {
    fn from(packet: AddAtc) -> Self {
        let announcement = packet.redacted().to_line();
        Self {
            announcement,
            callsign: packet.callsign,
            cid: packet.cid,
            password: packet.password,
            rating: packet.rating,
            protocol: packet.protocol,
            sim_type: packet.sim_type.unwrap_or(0),
            real_name: packet.real_name,
            is_atc: true,
            position: packet.position,
            visual_range: packet.visual_range.map(f64::from),
        }
    }
}

impl From<AddPilot> for LoginRequest {
    fn from(packet: AddPilot) -> Self {
        let announcement = packet.redacted().to_line();
        Self {
            announcement,
            callsign: packet.callsign,
            cid: packet.cid,
            password: packet.password,
            rating: packet.rating,
            protocol: packet.protocol,
            sim_type: packet.sim_type,
            real_name: packet.real_name,
            is_atc: false,
            position: None,
            visual_range: None,
        }
    }
}

/// Handles a command on a session that has not logged in yet. Only the two
/// login packets and `$ID` are accepted.
pub(super) async fn handle_unregistered(
    ctx: &ServerContext,
    session: &mut Session,
    command: Command,
) -> Result<(), ProtocolError> {
    match command {
        Command::AddAtc(packet) => login(ctx, session, packet.into()).await,
        Command::AddPilot(packet) => login(ctx, session, packet.into()).await,
        Command::ClientIdentification(identification) => {
            session.set_user_agent(identification.user_agent());
            Ok(())
        }
        other => Err(ProtocolError::non_fatal(ErrorKind::Syntax, other.kind().tag())),
    }
}

async fn login(
    ctx: &ServerContext,
    session: &mut Session,
    request: LoginRequest,
) -> Result<(), ProtocolError> {
    session.set_callsign(&request.callsign);
    let callsign = request.callsign.as_str();

    if !is_valid_callsign(callsign) {
        return Err(ProtocolError::fatal(ErrorKind::CallsignInvalid, callsign));
    }

    let existing = ctx.manager.get_client(callsign).await;
    if existing.as_ref().is_some_and(|c| !c.is_disconnected()) {
        return Err(ProtocolError::fatal(ErrorKind::CallsignInUse, callsign));
    }

    if !SUPPORTED_PROTOCOLS.contains(&request.protocol) {
        return Err(ProtocolError::fatal(
            ErrorKind::InvalidProtocolVision,
            request.protocol.to_string(),
        ));
    }

    let user = authenticate(ctx, &request).await?;

    if request.rating > user.rating {
        return Err(ProtocolError::fatal(
            ErrorKind::RequestLevelTooHigh,
            request.rating.as_i32().to_string(),
        ));
    }

    let facility = Facility::from_callsign(callsign, request.is_atc);
    if !request.rating.permits(facility) {
        return Err(ProtocolError::fatal(ErrorKind::CallsignInvalid, callsign));
    }

    let reconnecting = existing.filter(|c| {
        c.is_disconnected() && c.cid() == request.cid && c.is_atc() == request.is_atc
    });
    let client = match reconnecting {
        Some(client) if client.rebind(session.link().clone(), user.clone()) => {
            client.update_state(|s| {
                s.rating = request.rating;
                s.facility = facility;
                s.protocol = request.protocol;
                s.sim_type = request.sim_type;
            });
            if !ctx.manager.is_registered(&client).await {
                register(ctx, Arc::clone(&client)).await?;
            }
            info!("{} (cid {}) reconnected on session {}", callsign, request.cid, session.id());
            client
        }
        _ => {
            let visual_range = match request.visual_range {
                Some(range) => range,
                None if request.is_atc => 0.0,
                None => ctx.config.pilot_visual_range,
            };
            let client = Arc::new(Client::new(
                ClientLogin {
                    callsign: callsign.to_string(),
                    real_name: request.real_name.clone(),
                    user,
                    is_atc: request.is_atc,
                    rating: request.rating,
                    facility,
                    protocol: request.protocol,
                    sim_type: request.sim_type,
                    position: request.position,
                    visual_range,
                },
                session.link().clone(),
            ));
            register(ctx, Arc::clone(&client)).await?;
            info!(
                "{} logged in as {} (cid {}, rating {:?})",
                callsign,
                if request.is_atc { "controller" } else { "pilot" },
                request.cid,
                request.rating
            );
            client
        }
    };

    session.attach(&client);
    ctx.manager
        .broadcast(&request.announcement, Some(&client), &BroadcastFilter::InRange)
        .await;
    welcome(ctx, session, &client);
    Ok(())
}

/// Resolves the user record and checks the credential in the password field
async fn authenticate(ctx: &ServerContext, request: &LoginRequest) -> Result<User, ProtocolError> {
    let user = match ctx.users.get_user_by_cid(request.cid).await {
        Ok(user) => user,
        Err(StoreError::UserNotFound(_)) => {
            return Err(ProtocolError::fatal(
                ErrorKind::InvalidCidPassword,
                request.cid.to_string(),
            ))
        }
        Err(e) => {
            warn!("User lookup for cid {} failed: {}", request.cid, e);
            return Err(ProtocolError::fatal(
                ErrorKind::InvalidCidPassword,
                request.cid.to_string(),
            ));
        }
    };

    if user.rating <= Rating::Ban {
        return Err(ProtocolError::fatal(
            ErrorKind::CidSuspended,
            request.cid.to_string(),
        ));
    }

    let accepted = match &ctx.jwt {
        Some(verifier) => match verifier.verify(&request.password, request.cid) {
            Ok(_) => true,
            Err(e) => {
                debug!("Token for cid {} refused: {}", request.cid, e);
                false
            }
        },
        None => match ctx.users.verify_user_password(&user, &request.password).await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Password check for cid {} failed: {}", request.cid, e);
                false
            }
        },
    };
    if !accepted {
        return Err(ProtocolError::fatal(
            ErrorKind::InvalidCidPassword,
            request.cid.to_string(),
        ));
    }
    Ok(user)
}

async fn register(ctx: &ServerContext, client: Arc<Client>) -> Result<(), ProtocolError> {
    ctx.manager.add_client(client.clone()).await.map_err(|e| match e {
        ManagerError::CallsignInUse(callsign) => {
            ProtocolError::fatal(ErrorKind::CallsignInUse, callsign)
        }
        ManagerError::ServerFull => ProtocolError::fatal(ErrorKind::ServerFull, client.callsign()),
        other => ProtocolError::custom(true, client.callsign(), other.to_string()),
    })
}

/// Message of the day followed by the capability and ATIS solicitations
fn welcome(ctx: &ServerContext, session: &Session, client: &Client) {
    let callsign = client.callsign();
    for line in &ctx.config.motd {
        session.send_line(&server_message(ctx, callsign, line));
    }
    session.send_line(&ClientQuery::new(ctx.server_name(), callsign, "CAPS").to_line());
    if client.is_atc() {
        session.send_line(&ClientQuery::new(ctx.server_name(), callsign, "ATIS").to_line());
    }
}

/// `#DA` / `#DP`: the client leaves at once, no reconnect window applies.
pub(super) async fn logoff(
    ctx: &ServerContext,
    session: &mut Session,
    client: &Arc<Client>,
) -> Result<(), ProtocolError> {
    client.mark_disconnected();
    if ctx.manager.remove_client(client).await {
        info!("{} logged off", client.callsign());
    }
    session.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::tests::TestSession;
    use super::*;
    use crate::config::{AuthMode, ServerConfig};
    use crate::context::tests::test_context;

    #[tokio::test]
    async fn test_atc_login_sends_welcome() {
        let ctx = test_context(ServerConfig::default(), &[(2352, Rating::Controller1)]).await;
        let mut session = TestSession::new(1);

        session
            .send(&ctx, "#AAZSHA_CTR:SERVER:Zhang San:2352:pw:5:9")
            .await
            .unwrap();

        let lines = session.drain();
        assert_eq!(lines[0], "#TMSERVER:ZSHA_CTR:Welcome to the FSD server\r\n");
        assert_eq!(lines[1], "$CQSERVER:ZSHA_CTR:CAPS\r\n");
        assert_eq!(lines[2], "$CQSERVER:ZSHA_CTR:ATIS\r\n");

        let client = ctx.manager.get_client("ZSHA_CTR").await.unwrap();
        assert!(client.is_atc());
        assert_eq!(client.facility(), Facility::CTR);
        assert_eq!(client.real_name(), "Zhang San");
        assert_eq!(session.session.callsign(), "ZSHA_CTR");
    }

    #[tokio::test]
    async fn test_pilot_login_uses_default_range() {
        let ctx = test_context(ServerConfig::default(), &[(2352, Rating::Normal)]).await;
        let mut session = TestSession::new(1);
        session
            .send(&ctx, "#APCES2352:SERVER:2352:pw:1:9:16:Li Si")
            .await
            .unwrap();

        let client = session.client();
        assert!(!client.is_atc());
        assert_eq!(client.facility(), Facility::PILOT);
        assert_eq!(client.visibility().visual_range, 40.0);
        assert_eq!(session.drain().len(), 2);
    }

    #[tokio::test]
    async fn test_login_rejections() {
        let ctx = test_context(
            ServerConfig::default(),
            &[(1000, Rating::Student1), (1001, Rating::Ban), (1002, Rating::Controller1)],
        )
        .await;

        let cases = [
            ("#AAZS:SERVER:A:1000:pw:2:9", ErrorKind::CallsignInvalid),
            ("#AAZSHA_DEL:SERVER:A:1000:pw:2:8", ErrorKind::InvalidProtocolVision),
            ("#AAZSHA_DEL:SERVER:A:4242:pw:2:9", ErrorKind::InvalidCidPassword),
            ("#AAZSHA_DEL:SERVER:A:1001:pw:2:9", ErrorKind::CidSuspended),
            ("#AAZSHA_DEL:SERVER:A:1000:wrong:2:9", ErrorKind::InvalidCidPassword),
            ("#AAZSHA_DEL:SERVER:A:1000:pw:5:9", ErrorKind::RequestLevelTooHigh),
            ("#AAZSHA_CTR:SERVER:A:1000:pw:2:9", ErrorKind::CallsignInvalid),
            ("#AAZSHA_CTR:SERVER:A:1002:pw:2:9", ErrorKind::CallsignInvalid),
        ];

        for (id, (line, expected)) in cases.iter().enumerate() {
            let mut session = TestSession::new(id as u64 + 1);
            let err = session.send(&ctx, line).await.unwrap_err();
            assert_eq!(err.kind, *expected, "{}", line);
            assert!(err.fatal, "{}", line);
            assert!(session.session.client().is_none());
        }
        assert!(ctx.manager.is_empty().await);
    }

    #[tokio::test]
    async fn test_live_callsign_is_refused() {
        let ctx = test_context(
            ServerConfig::default(),
            &[(1000, Rating::Controller1), (1001, Rating::Controller1)],
        )
        .await;
        let _first = TestSession::atc(&ctx, 1, "ZSHA_CTR", 1000, Rating::Controller1).await;

        let mut second = TestSession::new(2);
        let err = second
            .send(&ctx, "#AAZSHA_CTR:SERVER:B:1001:pw:5:9")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::CallsignInUse);
        assert!(err.fatal);
    }

    #[tokio::test]
    async fn test_only_login_packets_before_registration() {
        let ctx = test_context(ServerConfig::default(), &[]).await;
        let mut session = TestSession::new(1);

        let err = session
            .send(&ctx, "@N:CES2352:7000:1:31.20:121.35:87:0:0:0")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.param, "@");
        assert!(!err.fatal);
    }

    #[tokio::test]
    async fn test_reconnect_rebinds_disconnected_client() {
        let ctx = test_context(ServerConfig::default(), &[(2352, Rating::Controller1)]).await;
        let first = TestSession::atc(&ctx, 1, "ZSHA_CTR", 2352, Rating::Controller1).await;
        let original = first.client();
        original.mark_disconnected();

        let mut second = TestSession::new(2);
        second
            .send(&ctx, "#AAZSHA_CTR:SERVER:A:2352:pw:5:9")
            .await
            .unwrap();

        let rebound = second.client();
        assert!(Arc::ptr_eq(&original, &rebound));
        assert!(!rebound.is_disconnected());
        assert_eq!(rebound.session_id(), 2);
        assert!(first.session.link().cancel.is_cancelled());
        assert_eq!(ctx.manager.len().await, 1);
    }

    #[tokio::test]
    async fn test_reconnect_with_other_cid_is_refused() {
        let ctx = test_context(
            ServerConfig::default(),
            &[(2352, Rating::Controller1), (1000, Rating::Controller1)],
        )
        .await;
        let first = TestSession::atc(&ctx, 1, "ZSHA_CTR", 2352, Rating::Controller1).await;
        first.client().mark_disconnected();

        let mut second = TestSession::new(2);
        let err = second
            .send(&ctx, "#AAZSHA_CTR:SERVER:B:1000:pw:5:9")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::CallsignInUse);
    }

    #[tokio::test]
    async fn test_jwt_login() {
        let config = ServerConfig {
            auth_mode: AuthMode::Jwt,
            jwt_secret: "secret".to_string(),
            ..ServerConfig::default()
        };
        let ctx = test_context(config, &[(2352, Rating::Normal)]).await;
        let token = ctx
            .jwt
            .as_ref()
            .unwrap()
            .issue(2352, chrono::Duration::minutes(5))
            .unwrap();

        let mut refused = TestSession::new(1);
        let err = refused
            .send(&ctx, "#APCES2352:SERVER:2352:pw:1:9:16:Li Si")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidCidPassword);

        let mut accepted = TestSession::new(2);
        accepted
            .send(&ctx, &format!("#APCES2352:SERVER:2352:{}:1:9:16:Li Si", token))
            .await
            .unwrap();
        assert!(ctx.manager.get_client("CES2352").await.is_some());
    }

    #[tokio::test]
    async fn test_login_is_announced_without_password() {
        let ctx = test_context(
            ServerConfig::default(),
            &[(1000, Rating::Controller1), (2352, Rating::Controller1)],
        )
        .await;
        let mut ctr = TestSession::atc(&ctx, 1, "ZSHA_CTR", 1000, Rating::Controller1).await;

        let mut app = TestSession::new(2);
        app.send(&ctx, "#AAZSSS_APP:SERVER:B:2352:pw:5:9:0:31.20:121.34:150")
            .await
            .unwrap();

        assert_eq!(
            ctr.drain(),
            vec!["#AAZSSS_APP:SERVER:B:2352::5:9:0:31.2:121.34:150\r\n".to_string()]
        );
    }

    #[tokio::test]
    async fn test_logoff_removes_and_announces() {
        let ctx = test_context(
            ServerConfig::default(),
            &[(1000, Rating::Controller1), (2352, Rating::Normal)],
        )
        .await;
        let mut ctr = TestSession::atc(&ctx, 1, "ZSHA_CTR", 1000, Rating::Controller1).await;
        let mut pilot = TestSession::pilot(&ctx, 2, "CES2352", 2352).await;
        ctr.drain();

        pilot.send(&ctx, "#DPCES2352:2352").await.unwrap();

        assert!(pilot.session.is_closing());
        assert!(ctx.manager.get_client("CES2352").await.is_none());
        assert_eq!(ctr.drain(), vec!["#DPCES2352\r\n".to_string()]);
    }
}
