//! Wire-level vocabulary of the FSD protocol shared by the server, the test
//! client and the integration tests.

pub mod callsign;
pub mod codec;
pub mod command;
pub mod error;
pub mod frequency;
pub mod geo;
pub mod rating;

pub use callsign::is_valid_callsign;
pub use codec::{build_packet, build_packet_owned, split_fields, trim_terminator};
pub use command::{parse_line, Command, CommandKind, FsdPacket, ParseFailure};
pub use error::{ErrorKind, ProtocolError};
pub use frequency::Frequency;
pub use geo::{Position, VisPoints};
pub use rating::{Facility, Rating};

/// Protocol revisions accepted at login
pub const SUPPORTED_PROTOCOLS: [u32; 2] = [9, 101];

/// Name the server uses as the source of its own packets unless configured
pub const DEFAULT_SERVER_NAME: &str = "SERVER";

/// Destination of broadcast packets and of the `$DI` challenge
pub const CLIENT_BROADCAST: &str = "CLIENT";

/// Destination meaning all controllers
pub const ALL_ATC: &str = "*A";
/// Destination meaning all supervisors
pub const ALL_SUPERVISORS: &str = "*S";
/// Destinations meaning everyone
pub const ALL_CLIENTS: &str = "*";
pub const ALL_PILOTS: &str = "*P";

pub const DEFAULT_PORT: u16 = 6809;
