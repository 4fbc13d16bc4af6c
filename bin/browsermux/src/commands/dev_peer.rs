use anyhow::Context;
use browsermux_core::Paths;
use browsermux_peer::{
    DevHandler, Identity, Installation, PeerConnection, PeerSettings, ProcessConnector,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

const HOST_BINARY: &str = "browsermux-host";

fn default_host_path() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe().context("Cannot locate current executable")?;
    let dir = exe
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Executable has no parent directory"))?;
    Ok(dir.join(format!("{}{}", HOST_BINARY, std::env::consts::EXE_SUFFIX)))
}

pub async fn run(host: Option<PathBuf>, peer_id: &str, name: Option<String>) -> anyhow::Result<()> {
    let paths = Paths::new();
    paths.ensure_dirs()?;

    let host = match host {
        Some(h) => h,
        None => default_host_path()?,
    };
    if !host.exists() {
        anyhow::bail!("Host binary not found at {}. Pass --host.", host.display());
    }

    let installation = Installation::load_or_create(&paths.installation_file())?;
    let mut identity = Identity::new(&installation, peer_id);
    if let Some(name) = name {
        identity = identity.with_profile_name(name);
    }

    let connector = ProcessConnector::new(host).with_origin(peer_id);
    let conn = Arc::new(PeerConnection::new(
        Arc::new(connector),
        Arc::new(DevHandler),
        identity,
        PeerSettings::default(),
    ));

    let mut registration = conn.subscribe_registration();
    tokio::spawn(async move {
        while registration.changed().await.is_ok() {
            let current = registration.borrow_and_update().clone();
            if let Some(r) = current {
                println!("Registered as profile {} on port {}", r.profile_id, r.port);
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    println!(
        "Dev peer {} running (installation {}). Press Ctrl-C to stop.",
        peer_id, installation.installation_id
    );
    conn.run(shutdown_rx).await?;
    Ok(())
}
