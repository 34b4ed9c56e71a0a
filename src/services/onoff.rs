use std::sync::Arc;

use crate::clusters::defs;
use crate::controller::Controller;
use crate::error::Result;
use crate::store::DocumentStore;
use crate::value;

pub struct OnOffService {
    ctrl: Arc<dyn Controller>,
    store: Arc<dyn DocumentStore>,
}

impl OnOffService {
    pub fn new(ctrl: Arc<dyn Controller>, store: Arc<dyn DocumentStore>) -> Self {
        Self { ctrl, store }
    }

    pub async fn on(&self, unique_id: &str) -> Result<()> {
        self.invoke(unique_id, defs::CLUSTER_ON_OFF_CMD_ID_ON).await
    }

    pub async fn off(&self, unique_id: &str) -> Result<()> {
        self.invoke(unique_id, defs::CLUSTER_ON_OFF_CMD_ID_OFF).await
    }

    pub async fn toggle(&self, unique_id: &str) -> Result<()> {
        self.invoke(unique_id, defs::CLUSTER_ON_OFF_CMD_ID_TOGGLE).await
    }

    /// Current on/off attribute.
    pub async fn state(&self, unique_id: &str) -> Result<bool> {
        let target = super::lookup_device(self.store.as_ref(), unique_id)?;
        let raw = self
            .ctrl
            .read_attribute(
                target.node_id,
                target.endpoint,
                defs::CLUSTER_ID_ON_OFF,
                defs::CLUSTER_ON_OFF_ATTR_ID_ON_OFF,
            )
            .await?;
        value::flag(&raw, "onoff")
    }

    async fn invoke(&self, unique_id: &str, command: u32) -> Result<()> {
        let target = super::lookup_device(self.store.as_ref(), unique_id)?;
        self.ctrl
            .invoke_command(target.node_id, target.endpoint, defs::CLUSTER_ID_ON_OFF, command, &[])
            .await?;
        Ok(())
    }
}
