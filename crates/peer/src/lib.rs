pub mod backoff;
pub mod connection;
pub mod connector;
pub mod handler;
pub mod identity;

pub use backoff::Backoff;
pub use connection::{ConnectionState, PeerConnection, PeerRegistration, PeerSettings};
pub use connector::{Connector, PeerChannel, ProcessConnector};
pub use handler::{CommandHandler, DevHandler};
pub use identity::{Identity, Installation};
