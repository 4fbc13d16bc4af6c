use browsermux_core::{Config, Paths};

pub async fn run(id: Option<i64>, clear: bool) -> anyhow::Result<()> {
    let paths = Paths::new();
    let mut config = Config::load_or_default(&paths)?;

    if clear {
        config.active_tab_id = None;
        paths.ensure_dirs()?;
        config.save(&paths.config_file())?;
        println!("Active tab cleared");
        return Ok(());
    }

    match id {
        Some(id) => {
            config.active_tab_id = Some(id);
            paths.ensure_dirs()?;
            config.save(&paths.config_file())?;
            println!("Active tab set to {}", id);
        }
        None => match config.active_tab_id {
            Some(id) => println!("{}", id),
            None => println!("No active tab"),
        },
    }
    Ok(())
}
