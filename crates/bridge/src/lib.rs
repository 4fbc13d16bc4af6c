pub mod channel;
pub mod codec;
pub mod pending;
pub mod port;
pub mod registration;
pub mod runtime;
pub mod server;

pub use channel::{spawn_writer, PeerSender};
pub use codec::{decode_all, encode, Frame, NativeMessageCodec};
pub use pending::{PendingReply, PendingTable, Settlement};
pub use port::negotiate_port;
pub use registration::{RegisterRequest, Registrar, Registration};
pub use runtime::{dispatch_frame, Bridge, RunningBridge};
pub use server::{router, BridgeState};
