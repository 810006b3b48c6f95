//! TCP listener and the [`FsdServer`] facade that wires the engine together.
//!
//! Shutdown runs through a [`ShutdownRegistry`]: the accept loop stops first,
//! then registered clients are disconnected, then sessions that never logged
//! in are cancelled, and the message bus drains last.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ServerConfig;
use crate::context::{Collaborators, ServerContext};
use crate::error::ServerError;
use crate::session;
use crate::shutdown::{Release, ShutdownRegistry};
use crate::whazzup;

/// A set of background tasks stopped by one token
struct TaskGroup {
    name: &'static str,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl TaskGroup {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }
}

#[async_trait]
impl Release for TaskGroup {
    fn name(&self) -> &str {
        self.name
    }

    async fn release(&self) -> Result<(), ServerError> {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        Ok(())
    }
}

pub struct FsdServer {
    ctx: Arc<ServerContext>,
    local_addr: SocketAddr,
    registry: ShutdownRegistry,
}

impl FsdServer {
    /// Validates `config`, binds the listener and starts accepting.
    pub async fn start(
        config: ServerConfig,
        collaborators: Collaborators,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let config = Arc::new(config);

        let listener = TcpListener::bind(config.listen_addr()).await?;
        let local_addr = listener.local_addr()?;
        info!("{} listening on {}", config.server_name, local_addr);

        let ctx = ServerContext::build(Arc::clone(&config), collaborators);
        let registry = ShutdownRegistry::new(config.shutdown_timeout());
        let sessions = TaskGroup::new("sessions");
        let listening = TaskGroup::new("listener");

        // released in reverse order
        registry.register(ctx.bus.clone()).await;
        registry.register(sessions.clone()).await;
        registry.register(ctx.manager.clone()).await;
        registry.register(listening.clone()).await;

        if let Some(path) = config.whazzup_path.clone() {
            info!("Writing whazzup to {} every {:?}", path.display(), config.whazzup_ttl());
            listening.tracker.spawn(whazzup::run_file_writer(
                Arc::clone(&ctx.manager),
                path,
                listening.cancel.clone(),
            ));
        }

        listening.tracker.spawn(accept_loop(
            listener,
            Arc::clone(&ctx),
            listening.cancel.clone(),
            Arc::clone(&sessions),
        ));

        Ok(Self {
            ctx,
            local_addr,
            registry,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Stops accepting, disconnects every client and drains the bus.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        info!("Shutting down {}", self.ctx.server_name());
        self.registry.run().await
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    cancel: CancellationToken,
    sessions: Arc<TaskGroup>,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                if ctx.manager.is_shutting_down() {
                    debug!("Refusing {} during shutdown", addr);
                    continue;
                }
                serve(stream, addr, &ctx, &sessions);
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
    info!("Listener stopped");
}

fn serve(stream: TcpStream, addr: SocketAddr, ctx: &Arc<ServerContext>, sessions: &TaskGroup) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not disable Nagle for {}: {}", addr, e);
    }
    sessions.tracker.spawn(session::run(
        Arc::clone(ctx),
        stream,
        addr,
        sessions.cancel.clone(),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn local_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            shutdown_timeout_secs: 2,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_accepts_and_identifies() {
        let config = local_config();
        let collaborators = Collaborators::in_memory(&config);
        let server = FsdServer::start(config, collaborators).await.unwrap();

        let stream = TcpStream::connect(server.local_addr()).await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        let first = lines.next_line().await.unwrap().unwrap();
        assert!(first.starts_with("$DISERVER:CLIENT:"), "{}", first);

        server.shutdown().await.unwrap();
        assert!(lines.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_config_is_refused() {
        let config = ServerConfig {
            max_line_length: 0,
            ..local_config()
        };
        let collaborators = Collaborators::in_memory(&config);
        let result = FsdServer::start(config, collaborators).await;
        assert!(matches!(result, Err(ServerError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_whazzup_file_written() {
        let path = std::env::temp_dir().join(format!("fsd-whazzup-{}.json", std::process::id()));
        let config = ServerConfig {
            whazzup_path: Some(path.clone()),
            ..local_config()
        };
        let collaborators = Collaborators::in_memory(&config);
        let server = FsdServer::start(config, collaborators).await.unwrap();

        // the first tick fires immediately
        let mut written: Option<serde_json::Value> = None;
        for _ in 0..100 {
            let parsed = tokio::fs::read_to_string(&path)
                .await
                .ok()
                .and_then(|text| serde_json::from_str(&text).ok());
            if parsed.is_some() {
                written = parsed;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        server.shutdown().await.unwrap();
        let _ = std::fs::remove_file(&path);

        let json = written.expect("whazzup file was not written");
        assert_eq!(json["general"]["connected_clients"], 0);
        assert_eq!(json["general"]["version"], whazzup::WHAZZUP_VERSION);
    }
}
