//! Stable installation identity of a peer, created once and reused across
//! restarts so that every REGISTER resolves to the same Profile.

use browsermux_core::paths::write_atomic;
use browsermux_core::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Installation {
    pub installation_id: String,
    pub created_at: DateTime<Utc>,
}

impl Installation {
    pub fn generate() -> Self {
        Self {
            installation_id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
        }
    }

    /// Read the persisted installation, creating it on first use. A file
    /// that exists but cannot be parsed is an error rather than silently
    /// replaced, since a new id would orphan the existing Profile.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            return serde_json::from_str(&content).map_err(|e| {
                Error::Config(format!(
                    "Corrupt installation file {}: {}",
                    path.display(),
                    e
                ))
            });
        }

        let installation = Self::generate();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        write_atomic(path, serde_json::to_string_pretty(&installation)?.as_bytes())?;
        info!(installation_id = %installation.installation_id, "Created peer installation");
        Ok(installation)
    }
}

/// What the peer announces about itself in REGISTER.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub installation_id: String,
    pub peer_id: String,
    pub profile_name: Option<String>,
}

impl Identity {
    pub fn new(installation: &Installation, peer_id: impl Into<String>) -> Self {
        Self {
            installation_id: installation.installation_id.clone(),
            peer_id: peer_id.into(),
            profile_name: None,
        }
    }

    pub fn with_profile_name(mut self, name: impl Into<String>) -> Self {
        self.profile_name = Some(name.into());
        self
    }

    pub fn register_data(&self) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert(
            "installationId".to_string(),
            Value::String(self.installation_id.clone()),
        );
        data.insert("peerId".to_string(), Value::String(self.peer_id.clone()));
        if let Some(name) = &self.profile_name {
            data.insert("profileName".to_string(), Value::String(name.clone()));
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_created_once_then_reused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("peer").join("installation.json");
        let first = Installation::load_or_create(&path).unwrap();
        let second = Installation::load_or_create(&path).unwrap();
        assert_eq!(first, second);
        assert!(uuid::Uuid::parse_str(&first.installation_id).is_ok());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("installation.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(
            Installation::load_or_create(&path),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_register_data_fields() {
        let installation = Installation::generate();
        let identity = Identity::new(&installation, "ext-1");
        let data = identity.register_data();
        assert_eq!(data["installationId"], installation.installation_id.as_str());
        assert_eq!(data["peerId"], "ext-1");
        assert!(!data.contains_key("profileName"));

        let named = identity.with_profile_name("Work").register_data();
        assert_eq!(named["profileName"], "Work");
    }
}
