use browsermux_client::BridgeClient;
use browsermux_core::Paths;

pub async fn run(profile: Option<&str>) -> anyhow::Result<()> {
    let paths = Paths::new();
    let client = BridgeClient::connect(&paths, profile).await?;
    let endpoint = client.endpoint();
    println!(
        "✓ {} ({}) bridge on port {} (pid {})",
        endpoint.profile_name,
        endpoint.profile_id,
        endpoint.port,
        endpoint.pid
    );
    Ok(())
}
