//! Shared on-disk table of running bridge processes.
//!
//! Every bridge instance reads, merges and rewrites the whole document. There
//! is no lock: writes are rare (registration, keepalive, shutdown) and the
//! last writer wins. Entries are hints only; callers must probe liveness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, warn};

use crate::error::Result;
use crate::paths::{write_atomic, Paths};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeInfo {
    pub port: u16,
    pub pid: u32,
    pub peer_id: String,
    pub profile_name: String,
    pub started_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl BridgeInfo {
    pub fn is_process_running(&self) -> bool {
        is_process_running(self.pid)
    }
}

pub type RegistryMap = BTreeMap<String, BridgeInfo>;

#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn from_paths(paths: &Paths) -> Self {
        Self::new(paths.registry_file())
    }

    #[cfg(test)]
    fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Missing, empty or unreadable documents all read as an empty map.
    pub fn list(&self) -> RegistryMap {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return RegistryMap::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read bridge registry");
                return RegistryMap::new();
            }
        };
        if content.trim().is_empty() {
            return RegistryMap::new();
        }
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "Bridge registry is corrupt, treating as empty");
            RegistryMap::new()
        })
    }

    fn save(&self, map: &RegistryMap) -> Result<()> {
        let content = serde_json::to_string_pretty(map)?;
        write_atomic(&self.path, content.as_bytes())?;
        Ok(())
    }

    pub fn get(&self, profile_id: &str) -> Option<BridgeInfo> {
        self.list().remove(profile_id)
    }

    /// Overwrite the single entry for `profile_id`, keeping everyone else's.
    pub fn upsert(&self, profile_id: &str, info: BridgeInfo) -> Result<()> {
        let mut map = self.list();
        map.insert(profile_id.to_string(), info);
        self.save(&map)?;
        debug!(profile_id, "Registry entry written");
        Ok(())
    }

    /// Refresh `lastSeen` if the entry still belongs to `pid`.
    pub fn touch(&self, profile_id: &str, pid: u32) -> Result<bool> {
        let mut map = self.list();
        match map.get_mut(profile_id) {
            Some(info) if info.pid == pid => {
                info.last_seen = Utc::now();
                self.save(&map)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn remove(&self, profile_id: &str) -> Result<bool> {
        let mut map = self.list();
        if map.remove(profile_id).is_none() {
            return Ok(false);
        }
        self.save(&map)?;
        Ok(true)
    }

    /// Remove the entry only if it is still owned by `pid`. A newer bridge
    /// for the same profile may have overwritten it in the meantime.
    pub fn remove_owned(&self, profile_id: &str, pid: u32) -> Result<bool> {
        let mut map = self.list();
        match map.get(profile_id) {
            Some(info) if info.pid == pid => {
                map.remove(profile_id);
                self.save(&map)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Drop every entry whose process is gone. Returns the removed ids.
    pub fn prune_stale(&self) -> Result<Vec<String>> {
        let mut map = self.list();
        let stale: Vec<String> = map
            .iter()
            .filter(|(_, info)| !info.is_process_running())
            .map(|(id, _)| id.clone())
            .collect();
        if stale.is_empty() {
            return Ok(stale);
        }
        for id in &stale {
            map.remove(id);
        }
        self.save(&map)?;
        Ok(stale)
    }
}

pub fn is_process_running(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn info(port: u16, pid: u32) -> BridgeInfo {
        BridgeInfo {
            port,
            pid,
            peer_id: "ext-id".to_string(),
            profile_name: "Personal".to_string(),
            started_at: Utc::now(),
            last_seen: Utc::now(),
        }
    }

    fn store() -> (RegistryStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RegistryStore::new(dir.path().join("bridges.json"));
        (store, dir)
    }

    #[test]
    fn test_missing_and_empty_file_read_as_empty() {
        let (store, _dir) = store();
        assert!(store.list().is_empty());
        std::fs::write(store.path(), "").unwrap();
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_upsert_keeps_other_entries() {
        let (store, _dir) = store();
        store.upsert("a", info(38400, 1)).unwrap();
        store.upsert("b", info(38401, 2)).unwrap();
        store.upsert("a", info(38402, 3)).unwrap();
        let map = store.list();
        assert_eq!(map.len(), 2);
        assert_eq!(map["a"].port, 38402);
        assert_eq!(map["b"].port, 38401);
    }

    #[test]
    fn test_remove_owned_respects_pid() {
        let (store, _dir) = store();
        store.upsert("a", info(38400, 10)).unwrap();
        assert!(!store.remove_owned("a", 11).unwrap());
        assert!(store.get("a").is_some());
        assert!(store.remove_owned("a", 10).unwrap());
        assert!(store.get("a").is_none());
    }

    #[test]
    fn test_touch_updates_last_seen() {
        let (store, _dir) = store();
        let mut entry = info(38400, 10);
        entry.last_seen = Utc::now() - chrono::Duration::minutes(5);
        let before = entry.last_seen;
        store.upsert("a", entry).unwrap();
        assert!(store.touch("a", 10).unwrap());
        assert!(store.get("a").unwrap().last_seen > before);
        assert!(!store.touch("a", 99).unwrap());
    }

    #[test]
    fn test_prune_stale_removes_dead_pids() {
        let (store, _dir) = store();
        store.upsert("live", info(38400, std::process::id())).unwrap();
        store.upsert("dead", info(38401, u32::MAX - 1)).unwrap();
        let removed = store.prune_stale().unwrap();
        assert_eq!(removed, vec!["dead".to_string()]);
        assert!(store.get("live").is_some());
    }

    #[test]
    fn test_corrupt_file_reads_as_empty() {
        let (store, _dir) = store();
        std::fs::write(store.path(), "{not json").unwrap();
        assert!(store.list().is_empty());
        store.upsert("a", info(38400, 1)).unwrap();
        assert_eq!(store.list().len(), 1);
    }
}
