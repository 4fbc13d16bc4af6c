use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::paths::{write_atomic, Paths};
use crate::profile::Profile;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlags {
    #[serde(default)]
    pub native_host_installed: bool,
    #[serde(default)]
    pub completions_installed: bool,
}

/// Settings for the bridge process and the CLI client that talks to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BridgeSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port_range_start")]
    pub port_range_start: u16,
    #[serde(default = "default_port_range_end")]
    pub port_range_end: u16,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    /// Deadline for capture-style commands that legitimately run for minutes.
    #[serde(default = "default_long_command_timeout_secs")]
    pub long_command_timeout_secs: u64,
    #[serde(default = "default_long_running_commands")]
    pub long_running_commands: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port_range_start() -> u16 {
    38400
}

fn default_port_range_end() -> u16 {
    38410
}

fn default_command_timeout_secs() -> u64 {
    10
}

fn default_long_command_timeout_secs() -> u64 {
    600
}

fn default_long_running_commands() -> Vec<String> {
    vec!["record".to_string(), "capture".to_string()]
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port_range_start: default_port_range_start(),
            port_range_end: default_port_range_end(),
            command_timeout_secs: default_command_timeout_secs(),
            long_command_timeout_secs: default_long_command_timeout_secs(),
            long_running_commands: default_long_running_commands(),
        }
    }
}

impl BridgeSettings {
    pub fn is_long_running(&self, command: &str) -> bool {
        self.long_running_commands
            .iter()
            .any(|c| c.eq_ignore_ascii_case(command))
    }

    pub fn command_timeout(&self, command: &str) -> std::time::Duration {
        let secs = if self.is_long_running(command) {
            self.long_command_timeout_secs
        } else {
            self.command_timeout_secs
        };
        std::time::Duration::from_secs(secs)
    }

    /// The longest deadline the server may apply to any command.
    pub fn max_command_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(
            self.command_timeout_secs.max(self.long_command_timeout_secs),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub active_profile_id: Option<String>,
    #[serde(default)]
    pub profiles: Vec<Profile>,
    #[serde(default)]
    pub active_tab_id: Option<i64>,
    #[serde(default)]
    pub features: FeatureFlags,
    #[serde(default)]
    pub bridge: BridgeSettings,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        write_atomic(path, content.as_bytes())?;
        Ok(())
    }

    pub fn profile(&self, id: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    pub fn profile_mut(&mut self, id: &str) -> Option<&mut Profile> {
        self.profiles.iter_mut().find(|p| p.id == id)
    }

    /// Resolve a user-supplied selector: exact id, unique id prefix, or
    /// case-insensitive profile name.
    pub fn find_profile(&self, selector: &str) -> Option<&Profile> {
        let selector = selector.trim();
        if selector.is_empty() {
            return None;
        }
        if let Some(p) = self.profile(selector) {
            return Some(p);
        }
        let by_name: Vec<&Profile> = self
            .profiles
            .iter()
            .filter(|p| p.profile_name.eq_ignore_ascii_case(selector))
            .collect();
        if by_name.len() == 1 {
            return Some(by_name[0]);
        }
        let by_prefix: Vec<&Profile> = self
            .profiles
            .iter()
            .filter(|p| p.id.starts_with(selector))
            .collect();
        if by_prefix.len() == 1 {
            return Some(by_prefix[0]);
        }
        None
    }

    pub fn active_profile(&self) -> Option<&Profile> {
        self.active_profile_id
            .as_deref()
            .and_then(|id| self.profile(id))
    }

    /// Append a profile. The first profile ever added becomes active.
    pub fn add_profile(&mut self, profile: Profile) {
        let first = self.profiles.is_empty();
        if first && self.active_profile_id.is_none() {
            self.active_profile_id = Some(profile.id.clone());
        }
        self.profiles.push(profile);
    }

    /// Remove a profile by id. Clears the active id if it pointed at it.
    pub fn remove_profile(&mut self, id: &str) -> Option<Profile> {
        let idx = self.profiles.iter().position(|p| p.id == id)?;
        let removed = self.profiles.remove(idx);
        if self.active_profile_id.as_deref() == Some(id) {
            self.active_profile_id = None;
        }
        Some(removed)
    }
}
