use std::sync::Arc;

use crate::clusters::defs;
use crate::controller::Controller;
use crate::error::Result;
use crate::store::DocumentStore;
use crate::tlv;
use crate::value::AttributeValue;

pub struct LockService {
    ctrl: Arc<dyn Controller>,
    store: Arc<dyn DocumentStore>,
}

/// Lock/unlock request fields. PIN code is optional and omitted when empty.
fn door_lock_payload(pin: Option<&str>) -> Result<Vec<u8>> {
    match pin {
        Some(pin) if !pin.is_empty() => tlv::encode_fields(&[(
            defs::CLUSTER_DOOR_LOCK_FIELD_PIN_CODE,
            AttributeValue::Bytes(pin.as_bytes().to_vec()),
        )]),
        _ => tlv::encode_fields(&[]),
    }
}

impl LockService {
    pub fn new(ctrl: Arc<dyn Controller>, store: Arc<dyn DocumentStore>) -> Self {
        Self { ctrl, store }
    }

    pub async fn lock(&self, unique_id: &str) -> Result<()> {
        self.invoke(unique_id, None, defs::CLUSTER_DOOR_LOCK_CMD_ID_LOCK_DOOR)
            .await
    }

    pub async fn unlock(&self, unique_id: &str, pin: Option<&str>) -> Result<()> {
        self.invoke(unique_id, pin, defs::CLUSTER_DOOR_LOCK_CMD_ID_UNLOCK_DOOR)
            .await
    }

    async fn invoke(&self, unique_id: &str, pin: Option<&str>, command: u32) -> Result<()> {
        let target = super::lookup_device(self.store.as_ref(), unique_id)?;
        let payload = door_lock_payload(pin)?;
        self.ctrl
            .invoke_command(
                target.node_id,
                target.endpoint,
                defs::CLUSTER_ID_DOOR_LOCK,
                command,
                &payload,
            )
            .await?;
        Ok(())
    }
}
