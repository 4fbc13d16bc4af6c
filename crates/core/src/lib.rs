pub mod config;
pub mod error;
pub mod message;
pub mod paths;
pub mod profile;
pub mod registry;

pub use config::{BridgeSettings, Config, FeatureFlags};
pub use error::{Error, Result};
pub use message::{Message, KEEPALIVE_COMMAND, REGISTER_COMMAND, TIMEOUT_ERROR};
pub use paths::Paths;
pub use profile::Profile;
pub use registry::{BridgeInfo, RegistryMap, RegistryStore};
