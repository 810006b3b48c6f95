//! # FSD Server Library
//!
//! The networked engine of a flight-simulation server speaking the FSD text
//! protocol. Controllers and pilots connect over TCP, log in, and from then
//! on every position update, text message and flight plan they send is
//! checked and forwarded to the clients that should see it.
//!
//! ## Core Responsibilities
//!
//! ### Sessions
//! Each accepted socket becomes a [`session`] with a read loop feeding the
//! [`dispatcher`] and a write loop draining a bounded outbound queue. A slow
//! reader is dropped instead of stalling the server.
//!
//! ### Client Registry
//! The [`client_manager`] owns every logged-in [`client::Client`], keyed by
//! callsign and indexed by user id. It performs range-filtered broadcast,
//! kicks, the reconnect window after a lost socket, and the coordinated
//! shutdown.
//!
//! ### Side Effects
//! Audit records, kick notifications and flight-plan flushes travel over the
//! [`message_bus`] to subscribers, so a slow store never blocks a session.
//! Users, flight plans, the audit log and METAR reports sit behind the traits
//! in [`operation`].
//!
//! ## Module Organization
//!
//! - `config`, `error`: TOML configuration and the error enums
//! - `framer`, `session`, `network`: bytes to lines, lines to commands, sockets to sessions
//! - `dispatcher`: one handler per FSD command
//! - `client`, `filter`, `client_manager`: online state and broadcast
//! - `message_bus`, `subscribers`, `shutdown`: decoupled side effects and teardown
//! - `cache`, `whazzup`: the "who's online" snapshot
//! - `auth`, `operation`, `context`: credentials, collaborators and their wiring
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use fsd_server::config::ServerConfig;
//! use fsd_server::context::Collaborators;
//! use fsd_server::network::FsdServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let collaborators = Collaborators::in_memory(&config);
//!     let server = FsdServer::start(config, collaborators).await?;
//!     println!("listening on {}", server.local_addr());
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cache;
pub mod client;
pub mod client_manager;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod framer;
pub mod message_bus;
pub mod network;
pub mod operation;
pub mod session;
pub mod shutdown;
pub mod subscribers;
pub mod whazzup;
