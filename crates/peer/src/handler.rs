use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;

/// Executes commands forwarded by the bridge. `Ok` becomes a success reply
/// carrying `result`, `Err` a failure reply carrying `error`.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: &str, data: Map<String, Value>) -> Result<Value, String>;
}

/// Minimal handler used by `browsermux dev-peer`.
///
/// - `ping` answers `{"status":"ok"}`
/// - `echo` returns its `data`
/// - `sleep` waits `ms` milliseconds, useful for exercising bridge deadlines
pub struct DevHandler;

const MAX_SLEEP_MS: u64 = 15 * 60 * 1000;

#[async_trait]
impl CommandHandler for DevHandler {
    async fn handle(&self, command: &str, data: Map<String, Value>) -> Result<Value, String> {
        match command.to_ascii_lowercase().as_str() {
            "ping" => Ok(json!({ "status": "ok" })),
            "echo" => Ok(Value::Object(data)),
            "sleep" => {
                let ms = data
                    .get("ms")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| "sleep requires a numeric 'ms'".to_string())?;
                tokio::time::sleep(Duration::from_millis(ms.min(MAX_SLEEP_MS))).await;
                Ok(json!({ "slept": ms.min(MAX_SLEEP_MS) }))
            }
            other => Err(format!("Unknown command: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ping_and_echo() {
        assert_eq!(
            DevHandler.handle("PING", Map::new()).await.unwrap(),
            json!({"status": "ok"})
        );
        let mut data = Map::new();
        data.insert("k".into(), json!([1, 2]));
        assert_eq!(
            DevHandler.handle("echo", data).await.unwrap(),
            json!({"k": [1, 2]})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_waits() {
        let mut data = Map::new();
        data.insert("ms".into(), json!(1500));
        let start = tokio::time::Instant::now();
        let out = DevHandler.handle("sleep", data).await.unwrap();
        assert_eq!(out["slept"], 1500);
        assert!(start.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_unknown_command_fails() {
        let err = DevHandler.handle("click", Map::new()).await.unwrap_err();
        assert_eq!(err, "Unknown command: click");
        assert!(DevHandler.handle("sleep", Map::new()).await.is_err());
    }
}
