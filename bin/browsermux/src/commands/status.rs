use browsermux_client::probe;
use browsermux_core::{Config, Paths, RegistryStore};
use std::time::Duration;

pub async fn run(prune: bool) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let registry = RegistryStore::from_paths(&paths);

    println!("browsermux status");
    println!("=================");
    println!();
    println!("Data dir:  {}", paths.base.display());
    println!(
        "Active:    {}",
        config
            .active_profile()
            .map(|p| format!("{} ({})", p.profile_name, p.short_id()))
            .unwrap_or_else(|| "none".to_string())
    );
    if let Some(tab) = config.active_tab_id {
        println!("Tab:       {}", tab);
    }
    println!(
        "Host:      {}",
        if config.features.native_host_installed {
            "✓ installed"
        } else {
            "✗ not installed"
        }
    );
    println!();

    if prune {
        let removed = registry.prune_stale()?;
        for id in &removed {
            println!("Pruned stale entry {}", id);
        }
    }

    let entries = registry.list();
    if entries.is_empty() {
        println!("No running bridges.");
        return Ok(());
    }

    let http = reqwest::Client::new();
    println!("Bridges:");
    for (id, info) in &entries {
        let alive = info.is_process_running()
            && probe(
                &http,
                &format!("http://{}:{}", config.bridge.host, info.port),
                Duration::from_secs(2),
            )
            .await;
        let marker = if config.active_profile_id.as_deref() == Some(id.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{} {:<24} port {:<5} pid {:<7} {}  last seen {}",
            marker,
            info.profile_name,
            info.port,
            info.pid,
            if alive { "✓ live" } else { "✗ stale" },
            info.last_seen.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}
