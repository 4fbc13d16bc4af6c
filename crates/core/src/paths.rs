use std::path::{Path, PathBuf};

/// Overrides the data directory (one per browser profile set, or per test).
pub const HOME_ENV: &str = "BROWSERMUX_HOME";

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        if let Some(base) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Self { base: PathBuf::from(base) };
        }
        let base = dirs::home_dir()
            .map(|h| h.join(".browsermux"))
            .unwrap_or_else(|| PathBuf::from(".browsermux"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    /// Shared table of running bridges, keyed by profile id.
    pub fn registry_file(&self) -> PathBuf {
        self.base.join("bridges.json")
    }

    pub fn peer_dir(&self) -> PathBuf {
        self.base.join("peer")
    }

    pub fn installation_file(&self) -> PathBuf {
        self.peer_dir().join("installation.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base.join("logs")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)?;
        std::fs::create_dir_all(self.peer_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

/// Write `contents` to a sibling temp file, then rename it over `path`.
/// Readers never observe a half-written document.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let tmp_path = path.with_file_name(format!(
        ".{}.{}.tmp",
        file_name,
        uuid::Uuid::new_v4().simple()
    ));
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        e
    })
}
