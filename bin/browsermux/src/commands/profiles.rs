use browsermux_core::{Config, Paths, Profile, RegistryStore};

fn resolve<'a>(config: &'a Config, selector: &str) -> anyhow::Result<&'a Profile> {
    config
        .find_profile(selector)
        .ok_or_else(|| anyhow::anyhow!("No profile matches '{}'. Run `browsermux profiles list`.", selector))
}

fn save(paths: &Paths, config: &Config) -> anyhow::Result<()> {
    paths.ensure_dirs()?;
    config.save(&paths.config_file())?;
    Ok(())
}

pub async fn list() -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let registry = RegistryStore::from_paths(&paths).list();

    if config.profiles.is_empty() {
        println!("No profiles yet. Install the extension and open the browser to register one.");
        return Ok(());
    }

    for p in &config.profiles {
        let active = if config.active_profile_id.as_deref() == Some(p.id.as_str()) {
            "*"
        } else {
            " "
        };
        let bridge = match registry.get(&p.id) {
            Some(info) if info.is_process_running() => format!("port {}", info.port),
            Some(_) => "stale".to_string(),
            None => "offline".to_string(),
        };
        println!(
            "{} {}  {:<24} {:<12} installed {}",
            active,
            p.id,
            p.profile_name,
            bridge,
            p.installed_at.format("%Y-%m-%d")
        );
    }
    Ok(())
}

pub(crate) fn apply_use(config: &mut Config, selector: &str) -> anyhow::Result<Profile> {
    let profile = resolve(config, selector)?.clone();
    config.active_profile_id = Some(profile.id.clone());
    Ok(profile)
}

pub async fn use_profile(selector: &str) -> anyhow::Result<()> {
    let paths = Paths::new();
    let mut config = Config::load_or_default(&paths)?;
    let profile = apply_use(&mut config, selector)?;
    save(&paths, &config)?;
    println!("Active profile: {} ({})", profile.profile_name, profile.id);
    Ok(())
}

pub(crate) fn apply_remove(config: &mut Config, selector: &str) -> anyhow::Result<Profile> {
    let id = resolve(config, selector)?.id.clone();
    config
        .remove_profile(&id)
        .ok_or_else(|| anyhow::anyhow!("Profile {} vanished while removing", id))
}

pub async fn remove(selector: &str) -> anyhow::Result<()> {
    let paths = Paths::new();
    let mut config = Config::load_or_default(&paths)?;
    let removed = apply_remove(&mut config, selector)?;
    save(&paths, &config)?;
    RegistryStore::from_paths(&paths).remove(&removed.id)?;
    println!("Removed profile {} ({})", removed.profile_name, removed.id);
    if config.active_profile_id.is_none() && !config.profiles.is_empty() {
        println!("No active profile; pick one with `browsermux profiles use <id>`.");
    }
    Ok(())
}

pub(crate) fn apply_rename(config: &mut Config, selector: &str, name: &str) -> anyhow::Result<String> {
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("Profile name cannot be empty");
    }
    let id = resolve(config, selector)?.id.clone();
    if let Some(p) = config.profile_mut(&id) {
        p.profile_name = name.to_string();
    }
    Ok(id)
}

pub async fn rename(selector: &str, name: &str) -> anyhow::Result<()> {
    let paths = Paths::new();
    let mut config = Config::load_or_default(&paths)?;
    let id = apply_rename(&mut config, selector, name)?;
    save(&paths, &config)?;
    println!("Renamed {} to {}", id, name.trim());
    Ok(())
}
