//! Device manager: one state directory per hub, wired to a controller.
//!
//! Loads `config.json`, applies `MATTER_CTL_*` overrides and hands out services that share
//! one JSON file store under the same directory.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use matc_hub::devman::DeviceManager;
//! # use matc_hub::controller::NoopController;
//! # use matc_hub::commission::UnavailableHandshake;
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let dm = DeviceManager::open("./matter-data", Arc::new(NoopController), Arc::new(UnavailableHandshake))?;
//! dm.registry_service().scan(dm.config().hub_node_id).await?;
//! dm.onoff().toggle("lamp-uid").await?;
//! # Ok(())
//! # }
//! ```

mod config;

pub use config::{default_state_dir, ManagerConfig, APP_NAME, ENV_PREFIX};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::commission::{CommissionService, Commissioner, Handshake};
use crate::controller::{Controller, TimeoutController};
use crate::discover::{Discoverer, Discovery, MdnsDiscoverer};
use crate::metrics::MetricReader;
use crate::poll::PollService;
use crate::services::{AttributeService, LockService, OnOffService, RegistryService};
use crate::store::{DocumentStore, JsonFileStore};

pub struct DeviceManager {
    state_dir: PathBuf,
    config: ManagerConfig,
    store: Arc<dyn DocumentStore>,
    controller: Arc<dyn Controller>,
    commissioner: Arc<Commissioner>,
}

impl DeviceManager {
    /// Open state directory, creating it and a default config when missing.
    pub fn open(
        state_dir: impl AsRef<Path>,
        controller: Arc<dyn Controller>,
        handshake: Arc<dyn Handshake>,
    ) -> Result<Self> {
        Self::open_with(state_dir, controller, handshake, Vec::new())
    }

    /// Like [DeviceManager::open], with additional discovery transports (BLE scanners).
    pub fn open_with(
        state_dir: impl AsRef<Path>,
        controller: Arc<dyn Controller>,
        handshake: Arc<dyn Handshake>,
        discoverers: Vec<Arc<dyn Discoverer>>,
    ) -> Result<Self> {
        Self::open_inner(state_dir, controller, handshake, discoverers, |k| std::env::var(k).ok())
    }

    fn open_inner(
        state_dir: impl AsRef<Path>,
        controller: Arc<dyn Controller>,
        handshake: Arc<dyn Handshake>,
        discoverers: Vec<Arc<dyn Discoverer>>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let state_dir = state_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&state_dir)
            .context(format!("creating state directory {}", state_dir.display()))?;
        let fresh = !config::config_path(&state_dir).exists();
        let mut config = config::load_config(&state_dir)?;
        if fresh {
            config::save_config(&state_dir, &config)?;
        }
        config.apply_env(env);
        log::debug!("state dir {} config {:?}", state_dir.display(), config);

        let mut discovery = Discovery::new(config.enable_ble, config.enable_mdns)
            .with_default_timeout(Duration::from_secs(config.discovery_timeout_secs))
            .with_discoverer(Arc::new(MdnsDiscoverer::new()));
        for d in discoverers {
            discovery = discovery.with_discoverer(d);
        }

        let controller: Arc<dyn Controller> = Arc::new(TimeoutController::new(
            controller,
            Duration::from_secs(config.command_timeout_secs),
        ));
        let store: Arc<dyn DocumentStore> = Arc::new(JsonFileStore::new(&state_dir));
        Ok(Self {
            state_dir,
            config,
            store,
            controller,
            commissioner: Arc::new(Commissioner::new(discovery, handshake)),
        })
    }

    /// Open default per-user state directory.
    pub fn open_default(controller: Arc<dyn Controller>, handshake: Arc<dyn Handshake>) -> Result<Self> {
        let dir = default_state_dir(APP_NAME, |k| std::env::var(k).ok());
        Self::open(dir, controller, handshake)
    }

    pub fn commission_service(&self) -> CommissionService {
        CommissionService::new(self.commissioner.clone(), self.store.clone())
    }

    pub fn registry_service(&self) -> RegistryService {
        RegistryService::new(self.controller.clone(), self.store.clone())
    }

    pub fn onoff(&self) -> OnOffService {
        OnOffService::new(self.controller.clone(), self.store.clone())
    }

    pub fn lock(&self) -> LockService {
        LockService::new(self.controller.clone(), self.store.clone())
    }

    pub fn attributes(&self) -> AttributeService {
        AttributeService::new(self.controller.clone(), self.store.clone())
    }

    pub fn poll_service(&self, readers: Vec<Box<dyn MetricReader>>) -> PollService {
        PollService::new(self.controller.clone(), self.store.clone(), readers)
    }

    /// Remember hub node id, usually right after commissioning the hub.
    /// Only `hub_node_id` is written; environment overrides stay out of `config.json`.
    pub fn set_hub_node_id(&mut self, node_id: u64) -> Result<()> {
        let mut stored = config::load_config(&self.state_dir)?;
        stored.hub_node_id = node_id;
        config::save_config(&self.state_dir, &stored)?;
        self.config.hub_node_id = node_id;
        Ok(())
    }

    /// Configured hub node id, or an error telling how to set it.
    pub fn hub_node_id(&self) -> Result<u64> {
        match self.config.hub_node_id {
            0 => anyhow::bail!(
                "hub node id is not set (commission the hub or set {}HUB_NODE_ID)",
                ENV_PREFIX
            ),
            n => Ok(n),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn controller(&self) -> &Arc<dyn Controller> {
        &self.controller
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::commission::UnavailableHandshake;
    use crate::controller::NoopController;
    use crate::error::Error;

    fn open_env(dir: &Path, pairs: &[(&str, &str)]) -> DeviceManager {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        DeviceManager::open_inner(
            dir,
            Arc::new(NoopController),
            Arc::new(UnavailableHandshake),
            Vec::new(),
            move |k| env.get(k).cloned(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn open_creates_state() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("state");
        let mut dm = open_env(&dir, &[]);
        assert!(dir.join("config.json").exists());
        assert!(dm.hub_node_id().is_err());
        dm.set_hub_node_id(77).unwrap();

        let dm = open_env(&dir, &[]);
        assert_eq!(dm.hub_node_id().unwrap(), 77);

        dm.commission_service().import_payload(77, "34970112332").unwrap();
        assert!(dir.join("commission.json").exists());
        assert!(dm.registry_service().list().unwrap().is_empty());
        let err = dm.registry_service().scan(77).await.unwrap_err();
        assert!(matches!(err, Error::ControllerUnavailable));
    }

    #[test]
    fn env_overrides_are_not_saved() {
        let tmp = tempfile::tempdir().unwrap();
        let mut dm = open_env(
            tmp.path(),
            &[("MATTER_CTL_DISCOVERY_TIMEOUT", "3"), ("MATTER_CTL_ENABLE_BLE", "true")],
        );
        assert_eq!(dm.config().discovery_timeout_secs, 3);
        assert!(dm.config().enable_ble);
        dm.set_hub_node_id(5).unwrap();
        assert_eq!(dm.config().discovery_timeout_secs, 3);

        let dm = open_env(tmp.path(), &[]);
        assert_eq!(dm.hub_node_id().unwrap(), 5);
        assert_eq!(dm.config().discovery_timeout_secs, 30);
        assert!(!dm.config().enable_ble);
    }
}
