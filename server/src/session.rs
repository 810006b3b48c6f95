//! One FSD connection: a read loop that feeds the dispatcher and a write loop
//! that drains the outbound queue onto the socket.
//!
//! A session starts unauthenticated; a successful login attaches it to a
//! [`Client`] owned by the client manager. The session only keeps a weak
//! handle, so a client removed from the registry is never kept alive by a
//! lingering connection.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use fsd_shared::{build_packet, ErrorKind, ProtocolError, CLIENT_BROADCAST};
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::client::{Client, SessionLink};
use crate::config::ServerConfig;
use crate::context::ServerContext;
use crate::dispatcher;
use crate::framer::{FramerError, LineFramer};

pub struct Session {
    id: u64,
    link: SessionLink,
    callsign: Option<String>,
    client: Option<Weak<Client>>,
    user_agent: String,
    closing: bool,
}

impl Session {
    pub fn new(link: SessionLink) -> Self {
        Self {
            id: link.id,
            link,
            callsign: None,
            client: None,
            user_agent: String::new(),
            closing: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.link.remote_addr
    }

    pub fn link(&self) -> &SessionLink {
        &self.link
    }

    /// Callsign claimed by the login in progress or completed
    pub fn callsign(&self) -> &str {
        self.callsign.as_deref().unwrap_or("unknown")
    }

    pub fn set_callsign(&mut self, callsign: &str) {
        self.callsign = Some(callsign.to_string());
    }

    pub fn client(&self) -> Option<Arc<Client>> {
        self.client.as_ref().and_then(Weak::upgrade)
    }

    pub fn attach(&mut self, client: &Arc<Client>) {
        self.client = Some(Arc::downgrade(client));
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn set_user_agent(&mut self, user_agent: String) {
        self.user_agent = user_agent;
    }

    /// Ends the session after the current command; queued output is flushed.
    pub fn close(&mut self) {
        self.closing = true;
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Queues a line on this connection, whether or not it is logged in.
    pub fn send_line(&self, line: &str) -> bool {
        debug!("[{}] <- {}", self.callsign(), line.trim_end());
        match self.link.sender.try_send(Arc::from(line)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Outbound queue of session {} is full", self.id);
                self.link.cancel.cancel();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn send_error(&self, server_name: &str, error: &ProtocolError) -> bool {
        self.send_line(&error.to_line(server_name, self.callsign()))
    }
}

/// `$DI<server>:CLIENT:<version>:<token>` sent as soon as a socket is accepted
pub fn identification_line(config: &ServerConfig) -> String {
    let token = format!("{:08x}", rand::random::<u32>());
    build_packet(
        "$DI",
        &[&config.server_name, CLIENT_BROADCAST, &config.server_version, &token],
    )
}

/// Serves one connection until the peer leaves, the session is closed or
/// `shutdown` fires. Returns once the socket has been closed.
pub async fn run<S>(
    ctx: Arc<ServerContext>,
    stream: S,
    remote_addr: SocketAddr,
    shutdown: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let id = ctx.next_session_id();
    let (reader, writer) = tokio::io::split(stream);
    let (sender, queue) = mpsc::channel(ctx.config.write_queue_size);
    let link = SessionLink {
        id,
        sender,
        cancel: shutdown.child_token(),
        closed: CancellationToken::new(),
        remote_addr,
    };

    let writer_task = tokio::spawn(write_loop(
        writer,
        queue,
        link.cancel.clone(),
        link.closed.clone(),
        WriteLimits {
            write_timeout: ctx.config.write_timeout(),
            close_grace: ctx.config.close_grace(),
        },
    ));

    info!("Session {} opened from {}", id, remote_addr);
    let mut session = Session::new(link);
    session.send_line(&identification_line(&ctx.config));

    read_loop(&ctx, &mut session, reader).await;

    if let Some(client) = session.client() {
        if client.session_id() == id {
            if session.is_closing() {
                client.close();
                ctx.manager.remove_client(&client).await;
            } else {
                ctx.manager.on_connection_lost(client, id).await;
            }
        }
    }

    session.link.cancel.cancel();
    let callsign = session.callsign().to_string();
    drop(session);
    if let Err(e) = writer_task.await {
        warn!("Writer of session {} failed: {}", id, e);
    }
    info!("Session {} ({}) closed", id, callsign);
}

async fn read_loop<R>(ctx: &ServerContext, session: &mut Session, reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut framer = LineFramer::new(reader, ctx.config.max_line_length);
    let cancel = session.link().cancel.clone();
    let read_timeout = ctx.config.read_timeout();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Session {} cancelled", session.id());
                break;
            }
            next = tokio::time::timeout(read_timeout, framer.next_line()) => next,
        };

        let line = match next {
            Err(_) => {
                info!("Session {} idle for {:?}, closing", session.id(), read_timeout);
                break;
            }
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => {
                debug!("Session {} closed by peer", session.id());
                break;
            }
            Ok(Err(FramerError::LineTooLong(max))) => {
                warn!("Session {} sent a line over {} bytes", session.id(), max);
                let error = ProtocolError::fatal(ErrorKind::Syntax, "")
                    .with_message(format!("line exceeds {} bytes", max));
                session.send_error(ctx.server_name(), &error);
                session.close();
                break;
            }
            Ok(Err(FramerError::Io(e))) => {
                debug!("Session {} read failed: {}", session.id(), e);
                break;
            }
        };

        debug!("[{}] -> {}", session.callsign(), line);
        if let Err(error) = dispatcher::dispatch(ctx, session, &line).await {
            warn!("[{}] rejected: {}", session.callsign(), error);
            session.send_error(ctx.server_name(), &error);
            if error.fatal {
                session.close();
            }
        }
        if session.is_closing() {
            break;
        }
    }
}

struct WriteLimits {
    write_timeout: Duration,
    close_grace: Duration,
}

async fn write_line<W>(writer: &mut W, line: &str, timeout: Duration) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match tokio::time::timeout(timeout, writer.write_all(line.as_bytes())).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out")),
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut queue: mpsc::Receiver<Arc<str>>,
    cancel: CancellationToken,
    closed: CancellationToken,
    limits: WriteLimits,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // flush what was queued before the close, within the grace
                let drain = async {
                    while let Ok(line) = queue.try_recv() {
                        write_line(&mut writer, &line, limits.write_timeout).await?;
                    }
                    Ok::<(), io::Error>(())
                };
                match tokio::time::timeout(limits.close_grace, drain).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!("Drain failed: {}", e),
                    Err(_) => debug!("Drain did not finish within {:?}", limits.close_grace),
                }
                break;
            }
            line = queue.recv() => match line {
                Some(line) => {
                    if let Err(e) = write_line(&mut writer, &line, limits.write_timeout).await {
                        debug!("Write failed: {}", e);
                        cancel.cancel();
                        break;
                    }
                }
                None => break,
            },
        }
    }

    let _ = tokio::time::timeout(limits.write_timeout, writer.shutdown()).await;
    closed.cancel();
}
