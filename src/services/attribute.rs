use std::sync::Arc;

use crate::controller::Controller;
use crate::error::Result;
use crate::store::DocumentStore;
use crate::value::AttributeValue;

/// Raw attribute and command access for clusters without a dedicated service.
pub struct AttributeService {
    ctrl: Arc<dyn Controller>,
    store: Arc<dyn DocumentStore>,
}

impl AttributeService {
    pub fn new(ctrl: Arc<dyn Controller>, store: Arc<dyn DocumentStore>) -> Self {
        Self { ctrl, store }
    }

    pub async fn read(&self, unique_id: &str, cluster: u32, attr: u32) -> Result<AttributeValue> {
        let target = super::lookup_device(self.store.as_ref(), unique_id)?;
        self.ctrl
            .read_attribute(target.node_id, target.endpoint, cluster, attr)
            .await
    }

    pub async fn write(
        &self,
        unique_id: &str,
        cluster: u32,
        attr: u32,
        value: AttributeValue,
    ) -> Result<()> {
        let target = super::lookup_device(self.store.as_ref(), unique_id)?;
        self.ctrl
            .write_attribute(target.node_id, target.endpoint, cluster, attr, value)
            .await
    }

    /// `payload` is TLV encoded command fields.
    pub async fn invoke(
        &self,
        unique_id: &str,
        cluster: u32,
        command: u32,
        payload: &[u8],
    ) -> Result<AttributeValue> {
        let target = super::lookup_device(self.store.as_ref(), unique_id)?;
        self.ctrl
            .invoke_command(target.node_id, target.endpoint, cluster, command, payload)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::scan::tests::TableController;
    use crate::services::tests::{sample_registry, store_with};

    #[tokio::test]
    async fn read_write_invoke() {
        let ctrl = Arc::new(TableController::default());
        ctrl.set(3, 0x0008, 0x0000, Ok(AttributeValue::U8(128)));
        let svc = AttributeService::new(ctrl.clone(), Arc::new(store_with(&sample_registry(42))));

        assert_eq!(svc.read("lamp", 0x0008, 0).await.unwrap(), AttributeValue::U8(128));
        svc.write("lamp", 0x0008, 0x0011, AttributeValue::U8(10)).await.unwrap();
        assert_eq!(
            ctrl.written.lock().unwrap()[0],
            (42, 3, 0x0008, 0x0011, AttributeValue::U8(10))
        );
        svc.invoke("lamp", 0x0008, 0x04, &[0x24, 0x00, 0x80]).await.unwrap();
        assert_eq!(ctrl.invoked.lock().unwrap()[0].4, vec![0x24, 0x00, 0x80]);
    }

    #[tokio::test]
    async fn missing_device_never_reaches_controller() {
        let ctrl = Arc::new(TableController::default());
        let svc = AttributeService::new(ctrl.clone(), Arc::new(store_with(&sample_registry(42))));
        assert!(matches!(
            svc.write("gone", 6, 0, AttributeValue::Bool(true)).await,
            Err(Error::DeviceMissing(_))
        ));
        assert!(ctrl.written.lock().unwrap().is_empty());
    }
}
