use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable identity of one peer installation.
///
/// `id` equals the installation UUID the peer generated on first run, so
/// re-registration after a reconnect always resolves to the same profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub profile_name: String,
    pub peer_id: String,
    pub installed_at: DateTime<Utc>,
}

impl Profile {
    pub fn new(id: &str, profile_name: &str, peer_id: &str) -> Self {
        Self {
            id: id.to_string(),
            profile_name: profile_name.to_string(),
            peer_id: peer_id.to_string(),
            installed_at: Utc::now(),
        }
    }

    /// Short form of the id for tables and log lines.
    pub fn short_id(&self) -> &str {
        let end = self.id.char_indices().nth(8).map(|(i, _)| i).unwrap_or(self.id.len());
        &self.id[..end]
    }
}
