use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "matter-ctl";
pub const ENV_PREFIX: &str = "MATTER_CTL_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Node id of the commissioned hub (bridge). Zero when not known yet.
    pub hub_node_id: u64,
    pub enable_ble: bool,
    pub enable_mdns: bool,
    pub discovery_timeout_secs: u64,
    pub command_timeout_secs: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            hub_node_id: 0,
            enable_ble: false,
            enable_mdns: true,
            discovery_timeout_secs: 30,
            command_timeout_secs: 5,
        }
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl ManagerConfig {
    /// Apply `MATTER_CTL_*` overrides. `lookup` gets the full variable name.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name)).map(|v| (name.to_owned(), v));
        if let Some((name, v)) = get("ENABLE_BLE") {
            match parse_bool(&v) {
                Some(b) => self.enable_ble = b,
                None => log::warn!("ignoring {}{}={}", ENV_PREFIX, name, v),
            }
        }
        if let Some((name, v)) = get("ENABLE_MDNS") {
            match parse_bool(&v) {
                Some(b) => self.enable_mdns = b,
                None => log::warn!("ignoring {}{}={}", ENV_PREFIX, name, v),
            }
        }
        if let Some((name, v)) = get("HUB_NODE_ID") {
            match v.trim().parse() {
                Ok(n) => self.hub_node_id = n,
                Err(_) => log::warn!("ignoring {}{}={}", ENV_PREFIX, name, v),
            }
        }
        if let Some((name, v)) = get("DISCOVERY_TIMEOUT") {
            match v.trim().parse() {
                Ok(n) => self.discovery_timeout_secs = n,
                Err(_) => log::warn!("ignoring {}{}={}", ENV_PREFIX, name, v),
            }
        }
    }
}

/// `$XDG_STATE_HOME/<app>`, `$HOME/.local/state/<app>`, or `./<app>`.
pub fn default_state_dir(app: &str, lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(base) = lookup("XDG_STATE_HOME").filter(|v| !v.is_empty()) {
        return Path::new(&base).join(app);
    }
    if let Some(home) = lookup("HOME").filter(|v| !v.is_empty()) {
        return Path::new(&home).join(".local").join("state").join(app);
    }
    Path::new(".").join(app)
}

pub(crate) fn config_path(base: &Path) -> PathBuf {
    base.join("config.json")
}

/// Missing config file yields defaults.
pub(crate) fn load_config(base: &Path) -> Result<ManagerConfig> {
    let path = config_path(base);
    let data = match std::fs::read_to_string(&path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ManagerConfig::default()),
        Err(e) => return Err(e).context(format!("reading config from {}", path.display())),
    };
    serde_json::from_str(&data).context(format!("parsing {}", path.display()))
}

pub(crate) fn save_config(base: &Path, config: &ManagerConfig) -> Result<()> {
    let path = config_path(base);
    let data = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, data).context(format!("writing config to {}", path.display()))
}
