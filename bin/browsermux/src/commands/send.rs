use browsermux_client::BridgeClient;
use browsermux_core::Paths;
use serde_json::{Map, Value};

/// Parse `--data`. Only a JSON object is meaningful as command data.
pub(crate) fn parse_data(raw: Option<&str>) -> anyhow::Result<Option<Map<String, Value>>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(Some(map)),
        other => anyhow::bail!("--data must be a JSON object, got: {}", other),
    }
}

pub async fn run(command: &str, data: Option<&str>, profile: Option<&str>) -> anyhow::Result<()> {
    let data = parse_data(data)?;
    let paths = Paths::new();
    let client = BridgeClient::connect(&paths, profile).await?;

    let reply = client.send(command, data).await?;
    println!("{}", serde_json::to_string_pretty(&reply)?);

    if !reply.is_success() {
        anyhow::bail!(
            "{} failed: {}",
            command,
            reply.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}
