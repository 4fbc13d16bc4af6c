//! HTTP client the CLI uses to reach the bridge serving a profile.
//!
//! Resolution reads the active profile from Config, looks up its entry in
//! the bridge registry and confirms it with a liveness probe. Only this
//! lookup is retried; a command is sent exactly once.

use browsermux_core::{
    BridgeInfo, BridgeSettings, Config, Error, Message, Paths, Profile, RegistryStore, Result,
};
use reqwest::{Client, StatusCode};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Added on top of the bridge's longest deadline so the bridge always
/// answers before the client gives up.
pub const REQUEST_SLACK: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ResolvePolicy {
    pub attempts: u32,
    pub retry_delay: Duration,
    pub ping_timeout: Duration,
}

impl Default for ResolvePolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay: Duration::from_millis(500),
            ping_timeout: Duration::from_secs(2),
        }
    }
}

/// Where a profile's bridge is listening.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeEndpoint {
    pub profile_id: String,
    pub profile_name: String,
    pub host: String,
    pub port: u16,
    pub pid: u32,
}

impl BridgeEndpoint {
    fn from_info(profile: &Profile, host: &str, info: &BridgeInfo) -> Self {
        Self {
            profile_id: profile.id.clone(),
            profile_name: profile.profile_name.clone(),
            host: host.to_string(),
            port: info.port,
            pid: info.pid,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

pub struct BridgeClient {
    http: Client,
    endpoint: BridgeEndpoint,
    request_timeout: Duration,
    active_tab_id: Option<i64>,
}

impl BridgeClient {
    /// Resolve the bridge for `profile` (or the active profile) and make
    /// sure it answers `/ping`.
    pub async fn connect(paths: &Paths, profile: Option<&str>) -> Result<Self> {
        Self::connect_with(paths, profile, &ResolvePolicy::default()).await
    }

    pub async fn connect_with(
        paths: &Paths,
        profile: Option<&str>,
        policy: &ResolvePolicy,
    ) -> Result<Self> {
        let config = Config::load_or_default(paths)?;
        let selected = select_profile(&config, profile)?.clone();
        let registry = RegistryStore::from_paths(paths);
        let http = build_http_client(policy.ping_timeout)?;

        let attempts = policy.attempts.max(1);
        let mut last_reason = String::new();
        for attempt in 1..=attempts {
            match resolve_endpoint(&http, &registry, &selected, &config.bridge.host, policy).await {
                Ok(endpoint) => {
                    debug!(
                        profile = %endpoint.profile_id,
                        port = endpoint.port,
                        attempt,
                        "Resolved bridge"
                    );
                    let mut client = Self::for_endpoint(endpoint, &config.bridge)?;
                    client.active_tab_id = config.active_tab_id;
                    return Ok(client);
                }
                Err(reason) => {
                    debug!(attempt, reason = %reason, "Bridge not reachable yet");
                    last_reason = reason;
                }
            }
            if attempt < attempts {
                tokio::time::sleep(policy.retry_delay).await;
            }
        }

        Err(Error::NotConnected(format!(
            "profile '{}' ({}): {}",
            selected.profile_name,
            selected.short_id(),
            last_reason
        )))
    }

    pub fn for_endpoint(endpoint: BridgeEndpoint, settings: &BridgeSettings) -> Result<Self> {
        let request_timeout = settings.max_command_timeout() + REQUEST_SLACK;
        Ok(Self {
            http: build_http_client(request_timeout)?,
            endpoint,
            request_timeout,
            active_tab_id: None,
        })
    }

    pub fn with_active_tab(mut self, tab_id: Option<i64>) -> Self {
        self.active_tab_id = tab_id;
        self
    }

    pub fn endpoint(&self) -> &BridgeEndpoint {
        &self.endpoint
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub async fn ping(&self) -> bool {
        probe(&self.http, &self.endpoint.base_url(), Duration::from_secs(2)).await
    }

    /// Issue one `POST /command`. Returns the bridge's reply message for
    /// every status the bridge answers with JSON (200, 400, 503, 504).
    pub async fn send(&self, command: &str, data: Option<Map<String, Value>>) -> Result<Message> {
        let mut data = data.unwrap_or_default();
        if let Some(tab) = self.active_tab_id {
            data.entry("tabId").or_insert_with(|| Value::from(tab));
        }
        let request = Message::request(String::new(), command, data);
        let url = format!("{}/command", self.endpoint.base_url());

        info!(command, port = self.endpoint.port, "Sending command to bridge");
        let resp = self
            .http
            .post(&url)
            .timeout(self.request_timeout)
            .json(&request)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = resp.status();
        match status {
            StatusCode::OK
            | StatusCode::BAD_REQUEST
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT => {
                let reply: Message = resp
                    .json()
                    .await
                    .map_err(|e| Error::Http(format!("Invalid reply body: {}", e)))?;
                if status != StatusCode::OK {
                    warn!(status = status.as_u16(), error = ?reply.error, "Bridge rejected command");
                }
                Ok(reply)
            }
            other => Err(Error::Http(format!("Unexpected status {} from bridge", other))),
        }
    }
}

/// Pick the requested profile, or the active one.
pub fn select_profile<'a>(config: &'a Config, selector: Option<&str>) -> Result<&'a Profile> {
    match selector {
        Some(s) => config
            .find_profile(s)
            .ok_or_else(|| Error::NotFound(format!("profile '{}'", s))),
        None => config.active_profile().ok_or(Error::NoActiveProfile),
    }
}

/// `GET /ping` within `timeout`; any failure counts as down.
pub async fn probe(http: &Client, base_url: &str, timeout: Duration) -> bool {
    let resp = match http
        .get(format!("{}/ping", base_url))
        .timeout(timeout)
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            debug!(url = %base_url, error = %e, "Ping failed");
            return false;
        }
    };
    if !resp.status().is_success() {
        return false;
    }
    match resp.json::<Value>().await {
        Ok(body) => body.get("status").and_then(Value::as_str) == Some("ok"),
        Err(_) => false,
    }
}

async fn resolve_endpoint(
    http: &Client,
    registry: &RegistryStore,
    profile: &Profile,
    host: &str,
    policy: &ResolvePolicy,
) -> std::result::Result<BridgeEndpoint, String> {
    let info = registry
        .get(&profile.id)
        .ok_or_else(|| "no running bridge registered".to_string())?;
    if !info.is_process_running() {
        return Err(format!("bridge process {} is not running", info.pid));
    }
    let endpoint = BridgeEndpoint::from_info(profile, host, &info);
    if !probe(http, &endpoint.base_url(), policy.ping_timeout).await {
        return Err(format!("bridge on port {} did not answer ping", info.port));
    }
    Ok(endpoint)
}

fn build_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Http(format!("Failed to build HTTP client: {}", e)))
}

fn map_send_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("no reply from bridge: {}", e))
    } else if e.is_connect() {
        Error::NotConnected(format!("bridge refused connection: {}", e))
    } else {
        Error::Http(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, routing::post, Json, Router};
    use chrono::Utc;
    use serde_json::json;
    use tempfile::TempDir;

    fn fast_policy() -> ResolvePolicy {
        ResolvePolicy {
            attempts: 2,
            retry_delay: Duration::from_millis(10),
            ping_timeout: Duration::from_millis(500),
        }
    }

    fn setup(active_tab: Option<i64>) -> (TempDir, Paths) {
        let dir = TempDir::new().unwrap();
        let paths = Paths::with_base(dir.path().to_path_buf());
        let mut cfg = Config::default();
        cfg.add_profile(Profile::new("inst-1", "Work", "ext"));
        cfg.active_tab_id = active_tab;
        cfg.save(&paths.config_file()).unwrap();
        (dir, paths)
    }

    fn register(paths: &Paths, port: u16, pid: u32) {
        RegistryStore::from_paths(paths)
            .upsert(
                "inst-1",
                BridgeInfo {
                    port,
                    pid,
                    peer_id: "ext".into(),
                    profile_name: "Work".into(),
                    started_at: Utc::now(),
                    last_seen: Utc::now(),
                },
            )
            .unwrap();
    }

    /// A stand-in bridge: `/ping` answers ok, `/command` echoes the request
    /// back as the result unless the command is `slow`, which gets a 504.
    async fn fake_bridge() -> u16 {
        let app = Router::new()
            .route("/ping", get(|| async { Json(json!({"status": "ok"})) }))
            .route(
                "/command",
                post(|Json(req): Json<Value>| async move {
                    if req["command"] == "slow" {
                        return (
                            axum::http::StatusCode::GATEWAY_TIMEOUT,
                            Json(json!({"id": "x", "success": false, "error": "Timeout"})),
                        );
                    }
                    (
                        axum::http::StatusCode::OK,
                        Json(json!({"id": "x", "success": true, "result": req})),
                    )
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    async fn closed_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_no_active_profile() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::with_base(dir.path().to_path_buf());
        let err = BridgeClient::connect_with(&paths, None, &fast_policy())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::NoActiveProfile));
    }

    #[tokio::test]
    async fn test_unknown_profile_selector() {
        let (_dir, paths) = setup(None);
        let err = BridgeClient::connect_with(&paths, Some("Home"), &fast_policy())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_registry_entry_is_not_connected() {
        let (_dir, paths) = setup(None);
        let err = BridgeClient::connect_with(&paths, None, &fast_policy())
            .await
            .err()
            .unwrap();
        match err {
            Error::NotConnected(msg) => assert!(msg.contains("no running bridge")),
            other => panic!("unexpected: {}", other),
        }
    }

    #[tokio::test]
    async fn test_dead_pid_is_not_connected() {
        let (_dir, paths) = setup(None);
        let port = fake_bridge().await;
        register(&paths, port, 0x7fff_fff0);
        let err = BridgeClient::connect_with(&paths, None, &fast_policy())
            .await
            .err()
            .unwrap();
        match err {
            Error::NotConnected(msg) => assert!(msg.contains("is not running")),
            other => panic!("unexpected: {}", other),
        }
    }

    #[tokio::test]
    async fn test_unanswered_ping_is_not_connected() {
        let (_dir, paths) = setup(None);
        register(&paths, closed_port().await, std::process::id());
        let err = BridgeClient::connect_with(&paths, None, &fast_policy())
            .await
            .err()
            .unwrap();
        match err {
            Error::NotConnected(msg) => assert!(msg.contains("did not answer ping")),
            other => panic!("unexpected: {}", other),
        }
    }

    #[tokio::test]
    async fn test_send_injects_active_tab() {
        let (_dir, paths) = setup(Some(42));
        let port = fake_bridge().await;
        register(&paths, port, std::process::id());

        let client = BridgeClient::connect_with(&paths, Some("work"), &fast_policy())
            .await
            .unwrap();
        assert_eq!(client.endpoint().port, port);
        assert!(client.ping().await);

        let reply = client.send("click", None).await.unwrap();
        assert!(reply.is_success());
        let echoed = reply.result.unwrap();
        assert_eq!(echoed["command"], "click");
        assert_eq!(echoed["data"]["tabId"], 42);

        let mut data = Map::new();
        data.insert("tabId".into(), json!(7));
        let reply = client.send("click", Some(data)).await.unwrap();
        assert_eq!(reply.result.unwrap()["data"]["tabId"], 7);
    }

    #[tokio::test]
    async fn test_timeout_reply_is_returned_as_message() {
        let (_dir, paths) = setup(None);
        let port = fake_bridge().await;
        register(&paths, port, std::process::id());
        let client = BridgeClient::connect_with(&paths, None, &fast_policy())
            .await
            .unwrap();
        let reply = client.send("slow", None).await.unwrap();
        assert_eq!(reply.success, Some(false));
        assert_eq!(reply.error.as_deref(), Some("Timeout"));
    }

    #[test]
    fn test_request_timeout_covers_longest_deadline() {
        let settings = BridgeSettings::default();
        let endpoint = BridgeEndpoint {
            profile_id: "p".into(),
            profile_name: "P".into(),
            host: "127.0.0.1".into(),
            port: 1,
            pid: 1,
        };
        let client = BridgeClient::for_endpoint(endpoint, &settings).unwrap();
        assert!(client.request_timeout() >= Duration::from_secs(600));
        assert!(client.request_timeout() >= settings.max_command_timeout());
    }
}
