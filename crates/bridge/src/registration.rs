//! REGISTER handshake: binds a peer installation to a Profile and publishes
//! this bridge's port in the shared registry.

use browsermux_core::{
    BridgeInfo, Config, Error, Message, Paths, Profile, RegistryStore, Result,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Fields the peer sends in `data` of a REGISTER message.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterRequest {
    pub installation_id: String,
    pub peer_id: Option<String>,
    pub profile_name: Option<String>,
}

impl RegisterRequest {
    pub fn from_message(message: &Message) -> Result<Self> {
        let installation_id = message
            .data_str("installationId")
            .ok_or_else(|| Error::Registration("Missing installationId".to_string()))?
            .to_string();
        let peer_id = message
            .data_str("peerId")
            .or_else(|| message.data_str("extensionId"))
            .map(str::to_string);
        let profile_name = message.data_str("profileName").map(str::to_string);
        Ok(Self {
            installation_id,
            peer_id,
            profile_name,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub profile_id: String,
    pub port: u16,
    pub created: bool,
}

pub struct Registrar {
    paths: Paths,
    registry: RegistryStore,
    port: u16,
    pid: u32,
    started_at: DateTime<Utc>,
    profile_id: Mutex<Option<String>>,
}

impl Registrar {
    pub fn new(paths: Paths, port: u16, pid: u32) -> Self {
        let registry = RegistryStore::from_paths(&paths);
        Self {
            paths,
            registry,
            port,
            pid,
            started_at: Utc::now(),
            profile_id: Mutex::new(None),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Profile bound by the most recent successful registration.
    pub fn profile_id(&self) -> Option<String> {
        self.profile_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Handle a REGISTER message and build the reply frame.
    pub fn handle(&self, message: &Message) -> Message {
        let outcome = RegisterRequest::from_message(message).and_then(|req| self.register(&req));
        match outcome {
            Ok(reg) => Message::success(
                message.id.clone(),
                json!({ "profileId": reg.profile_id, "port": reg.port }),
            ),
            Err(e) => {
                warn!(error = %e, "Registration failed");
                let reason = match e {
                    Error::Registration(reason) => reason,
                    other => other.to_string(),
                };
                Message::failure(message.id.clone(), reason)
            }
        }
    }

    /// Resolve-or-create the profile, persist Config, then overwrite this
    /// profile's registry entry. Safe to repeat after every reconnect.
    pub fn register(&self, req: &RegisterRequest) -> Result<Registration> {
        let config_path = self.paths.config_file();
        let mut config = Config::load_or_default(&self.paths)?;

        let (profile, created) = match config.profile_mut(&req.installation_id) {
            Some(existing) => {
                if let Some(name) = req.profile_name.as_deref() {
                    if existing.profile_name != name {
                        info!(
                            profile_id = %existing.id,
                            old = %existing.profile_name,
                            new = %name,
                            "Profile renamed by peer"
                        );
                        existing.profile_name = name.to_string();
                    }
                }
                (existing.clone(), false)
            }
            None => {
                let peer_id = req
                    .peer_id
                    .as_deref()
                    .ok_or_else(|| Error::Registration("Missing peerId".to_string()))?;
                let name = req
                    .profile_name
                    .clone()
                    .unwrap_or_else(|| default_profile_name(&req.installation_id));
                let profile = Profile::new(&req.installation_id, &name, peer_id);
                config.add_profile(profile.clone());
                info!(
                    profile_id = %profile.id,
                    name = %profile.profile_name,
                    active = config.active_profile_id.as_deref() == Some(profile.id.as_str()),
                    "Created profile"
                );
                (profile, true)
            }
        };

        config.save(&config_path)?;

        let now = Utc::now();
        self.registry.upsert(
            &profile.id,
            BridgeInfo {
                port: self.port,
                pid: self.pid,
                peer_id: profile.peer_id.clone(),
                profile_name: profile.profile_name.clone(),
                started_at: self.started_at,
                last_seen: now,
            },
        )?;

        *self.profile_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(profile.id.clone());
        info!(profile_id = %profile.id, port = self.port, created, "Peer registered");

        Ok(Registration {
            profile_id: profile.id,
            port: self.port,
            created,
        })
    }

    /// Keepalive from the peer: refresh `lastSeen` on our registry entry.
    pub fn keepalive(&self) {
        let Some(profile_id) = self.profile_id() else {
            debug!("Keepalive before registration, ignoring");
            return;
        };
        match self.registry.touch(&profile_id, self.pid) {
            Ok(true) => debug!(profile_id = %profile_id, "Keepalive recorded"),
            Ok(false) => warn!(profile_id = %profile_id, "Registry entry missing or taken over"),
            Err(e) => warn!(error = %e, "Failed to refresh registry entry"),
        }
    }

    /// Remove this bridge's registry entry, if it still owns it.
    pub fn unregister(&self) -> Result<bool> {
        let Some(profile_id) = self.profile_id() else {
            return Ok(false);
        };
        let removed = self.registry.remove_owned(&profile_id, self.pid)?;
        if removed {
            info!(profile_id = %profile_id, "Registry entry removed");
        }
        Ok(removed)
    }
}

fn default_profile_name(installation_id: &str) -> String {
    let short: String = installation_id.chars().take(8).collect();
    format!("Profile {}", short)
}

#[cfg(test)]
mod tests {
    use super::*;
    use browsermux_core::REGISTER_COMMAND;
    use serde_json::{Map, Value};
    use tempfile::TempDir;

    fn register_msg(id: &str, fields: &[(&str, &str)]) -> Message {
        let mut data = Map::new();
        for (k, v) in fields {
            data.insert(k.to_string(), Value::String(v.to_string()));
        }
        Message::request(id, REGISTER_COMMAND, data)
    }

    fn registrar(port: u16) -> (Registrar, Paths, TempDir) {
        let dir = TempDir::new().unwrap();
        let paths = Paths::with_base(dir.path().to_path_buf());
        (Registrar::new(paths.clone(), port, std::process::id()), paths, dir)
    }

    #[test]
    fn test_first_registration_creates_active_profile() {
        let (reg, paths, _dir) = registrar(38401);
        let reply = reg.handle(&register_msg(
            "r1",
            &[("installationId", "inst-1"), ("peerId", "ext"), ("profileName", "Personal")],
        ));
        assert_eq!(reply.id, "r1");
        assert!(reply.is_success());
        let result = reply.result.unwrap();
        assert_eq!(result["profileId"], "inst-1");
        assert_eq!(result["port"], 38401);

        let cfg = Config::load_or_default(&paths).unwrap();
        assert_eq!(cfg.profiles.len(), 1);
        assert_eq!(cfg.active_profile_id.as_deref(), Some("inst-1"));

        let entry = RegistryStore::from_paths(&paths).get("inst-1").unwrap();
        assert_eq!(entry.port, 38401);
        assert_eq!(entry.pid, std::process::id());
        assert_eq!(entry.profile_name, "Personal");
    }

    #[test]
    fn test_repeat_registration_is_idempotent_and_renames() {
        let (reg, paths, _dir) = registrar(38402);
        reg.handle(&register_msg(
            "r1",
            &[("installationId", "inst-1"), ("peerId", "ext"), ("profileName", "Personal")],
        ));
        let reply = reg.handle(&register_msg(
            "r2",
            &[("installationId", "inst-1"), ("peerId", "ext"), ("profileName", "Home")],
        ));
        assert!(reply.is_success());

        let cfg = Config::load_or_default(&paths).unwrap();
        assert_eq!(cfg.profiles.len(), 1);
        assert_eq!(cfg.profiles[0].profile_name, "Home");
        let registry = RegistryStore::from_paths(&paths).list();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry["inst-1"].profile_name, "Home");
    }

    #[test]
    fn test_second_installation_not_auto_activated() {
        let (reg, paths, _dir) = registrar(38403);
        reg.handle(&register_msg("a", &[("installationId", "inst-1"), ("peerId", "ext")]));
        reg.handle(&register_msg("b", &[("installationId", "inst-2"), ("peerId", "ext")]));
        let cfg = Config::load_or_default(&paths).unwrap();
        assert_eq!(cfg.profiles.len(), 2);
        assert_eq!(cfg.active_profile_id.as_deref(), Some("inst-1"));
        assert_eq!(cfg.profile("inst-2").unwrap().profile_name, "Profile inst-2");
    }

    #[test]
    fn test_missing_installation_id_fails_without_mutation() {
        let (reg, paths, _dir) = registrar(38404);
        let reply = reg.handle(&register_msg("x", &[("peerId", "ext")]));
        assert!(!reply.is_success());
        assert_eq!(reply.error.as_deref(), Some("Missing installationId"));
        assert!(!paths.config_file().exists());
        assert!(!paths.registry_file().exists());
        assert!(reg.profile_id().is_none());
    }

    #[test]
    fn test_new_profile_requires_peer_id() {
        let (reg, paths, _dir) = registrar(38405);
        let reply = reg.handle(&register_msg("x", &[("installationId", "inst-9")]));
        assert_eq!(reply.error.as_deref(), Some("Missing peerId"));
        assert!(Config::load_or_default(&paths).unwrap().profiles.is_empty());
    }

    #[test]
    fn test_extension_id_alias_accepted() {
        let (reg, _paths, _dir) = registrar(38406);
        let reply = reg.handle(&register_msg(
            "x",
            &[("installationId", "inst-3"), ("extensionId", "abcdef")],
        ));
        assert!(reply.is_success());
    }

    #[test]
    fn test_unregister_removes_only_own_entry() {
        let (reg, paths, _dir) = registrar(38407);
        assert!(!reg.unregister().unwrap());
        reg.handle(&register_msg("a", &[("installationId", "inst-1"), ("peerId", "ext")]));
        assert!(reg.unregister().unwrap());
        assert!(RegistryStore::from_paths(&paths).get("inst-1").is_none());
    }
}
