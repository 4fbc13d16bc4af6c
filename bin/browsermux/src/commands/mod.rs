pub mod completions_cmd;
pub mod dev_peer;
pub mod ping;
pub mod profiles;
pub mod send;
pub mod status;
pub mod tab;
