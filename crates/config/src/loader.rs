use std::{
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use {
    anyhow::Context,
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::TetherConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["tether.toml", "tether.yaml", "tether.yml", "tether.json"];

/// Override for the config directory, set via `set_config_dir()`.
static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Lock guarding config read-modify-write cycles.
static CONFIG_SAVE_LOCK: Mutex<()> = Mutex::new(());

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Restrict discovery to `path`. Project-local and user-global locations are
/// skipped while an override is set.
pub fn set_config_dir(path: PathBuf) {
    *lock(&CONFIG_DIR_OVERRIDE) = Some(path);
}

/// Clear the config directory override, restoring default discovery.
pub fn clear_config_dir() {
    *lock(&CONFIG_DIR_OVERRIDE) = None;
}

fn config_dir_override() -> Option<PathBuf> {
    lock(&CONFIG_DIR_OVERRIDE).clone()
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<TetherConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path).with_context(|| format!("failed to parse {}", path.display()))
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./tether.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/tether/tether.{toml,yaml,yml,json}` (user-global)
///
/// Writes and returns `TetherConfig::default()` if no file exists. A file
/// that fails to parse yields defaults and is left untouched.
pub fn discover_and_load() -> TetherConfig {
    try_discover_and_load().unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        TetherConfig::default()
    })
}

/// Like [`discover_and_load`], but a file that exists and fails to parse is
/// an error instead of silently becoming defaults.
pub fn try_discover_and_load() -> anyhow::Result<TetherConfig> {
    let Some(path) = find_config_file() else {
        debug!("no config file found, writing default config");
        let config = TetherConfig::default();
        if let Err(e) = write_default_config(&config) {
            warn!(error = %e, "failed to write default config file");
        }
        return Ok(config);
    };

    debug!(path = %path.display(), "loading config");
    load_config(&path)
}

fn find_config_file() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return find_in(&dir);
    }
    find_in(Path::new(".")).or_else(|| user_config_dir().and_then(|dir| find_in(&dir)))
}

fn find_in(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

fn user_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().join(".config").join("tether"))
}

/// Returns the config directory: override, or `~/.config/tether/`.
pub fn config_dir() -> Option<PathBuf> {
    config_dir_override().or_else(user_config_dir)
}

/// Returns the path of an existing config file, or the default TOML path.
pub fn find_or_default_config_path() -> PathBuf {
    if let Some(path) = find_config_file() {
        return path;
    }
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tether.toml")
}

/// Atomically load the current config, apply `f`, and save.
///
/// Returns the path written to. An existing file that fails to parse is
/// never overwritten.
pub fn update_config(f: impl FnOnce(&mut TetherConfig)) -> anyhow::Result<PathBuf> {
    let _guard = lock(&CONFIG_SAVE_LOCK);
    let mut config = try_discover_and_load()?;
    f(&mut config);
    save_config_inner(&config)
}

/// Serialize `config` and write it back to where it was found (or the
/// default TOML path). Prefer [`update_config`] for read-modify-write.
pub fn save_config(config: &TetherConfig) -> anyhow::Result<PathBuf> {
    let _guard = lock(&CONFIG_SAVE_LOCK);
    save_config_inner(config)
}

fn save_config_inner(config: &TetherConfig) -> anyhow::Result<PathBuf> {
    let path = find_or_default_config_path();
    write_config(&path, config)?;
    debug!(path = %path.display(), "saved config");
    Ok(path)
}

fn write_default_config(config: &TetherConfig) -> anyhow::Result<()> {
    let path = find_or_default_config_path();
    if path.exists() {
        return Ok(());
    }
    write_config(&path, config)?;
    debug!(path = %path.display(), "wrote default config file");
    Ok(())
}

fn write_config(path: &Path, config: &TetherConfig) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let raw = serialize_config(config, path)?;
    std::fs::write(path, raw)?;

    // The file carries the signing key.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

fn extension(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("toml")
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<TetherConfig> {
    match extension(path) {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        ext => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

fn serialize_config(config: &TetherConfig, path: &Path) -> anyhow::Result<String> {
    match extension(path) {
        "toml" => toml::to_string_pretty(config)
            .map_err(|e| anyhow::anyhow!("serialize config: {e}")),
        "yaml" | "yml" => Ok(serde_yaml::to_string(config)?),
        "json" => Ok(serde_json::to_string_pretty(config)?),
        ext => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
