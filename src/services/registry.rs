use std::sync::Arc;

use chrono::Utc;

use crate::controller::Controller;
use crate::error::{Error, NotFound, Result};
use crate::registry::{DeviceRecord, Registry};
use crate::scan;
use crate::store::{self, DocumentStore};

/// Owner of the registry document: scan reconciliation, rename and removal.
pub struct RegistryService {
    ctrl: Arc<dyn Controller>,
    store: Arc<dyn DocumentStore>,
}

impl RegistryService {
    pub fn new(ctrl: Arc<dyn Controller>, store: Arc<dyn DocumentStore>) -> Self {
        Self { ctrl, store }
    }

    pub fn load(&self) -> Result<Registry> {
        store::load_document(self.store.as_ref(), store::KEY_REGISTRY)
    }

    fn save(&self, registry: &Registry) -> Result<()> {
        store::save_document(self.store.as_ref(), store::KEY_REGISTRY, registry)
    }

    /// Scan hub and reconcile registry with the result.
    pub async fn scan(&self, hub_node_id: u64) -> Result<Registry> {
        if hub_node_id == 0 {
            return Err(Error::InvalidArgument("hub node id is required".to_owned()));
        }
        let devices = scan::scan_bridged_devices(self.ctrl.as_ref(), hub_node_id).await?;
        let mut registry = self.load()?;
        let summary = registry.apply_scan(Utc::now(), hub_node_id, &devices);
        log::info!(
            "registry updated: {} seen, {} new, {} missing",
            summary.seen,
            summary.added,
            summary.missing
        );
        self.save(&registry)?;
        Ok(registry)
    }

    /// Records sorted by unique id.
    pub fn list(&self) -> Result<Vec<DeviceRecord>> {
        Ok(self.load()?.devices.into_values().collect())
    }

    pub fn rename(&self, unique_id: &str, label: &str) -> Result<DeviceRecord> {
        let mut registry = self.load()?;
        if !registry.set_label(unique_id, label) {
            return Err(Error::DeviceNotFound(NotFound::UniqueId(unique_id.to_owned())));
        }
        self.save(&registry)?;
        registry
            .find(unique_id)
            .cloned()
            .ok_or_else(|| Error::DeviceNotFound(NotFound::UniqueId(unique_id.to_owned())))
    }

    pub fn remove(&self, unique_id: &str) -> Result<DeviceRecord> {
        let mut registry = self.load()?;
        let removed = registry
            .remove(unique_id)
            .ok_or_else(|| Error::DeviceNotFound(NotFound::UniqueId(unique_id.to_owned())))?;
        self.save(&registry)?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clusters::defs;
    use crate::scan::tests::TableController;
    use crate::store::MemoryStore;
    use crate::value::AttributeValue;

    fn hub(endpoints: &[u16]) -> Arc<TableController> {
        let ctrl = Arc::new(TableController::default());
        ctrl.set(
            0,
            defs::CLUSTER_ID_DESCRIPTOR,
            defs::CLUSTER_DESCRIPTOR_ATTR_ID_PARTS_LIST,
            Ok(AttributeValue::List(endpoints.iter().map(|e| AttributeValue::U16(*e)).collect())),
        );
        ctrl
    }

    #[tokio::test]
    async fn scan_rename_rescan() {
        let ctrl = hub(&[2, 3]);
        ctrl.bridged(2, "b-lamp", "Lamp");
        ctrl.bridged(3, "a-plug", "Plug");
        let store = Arc::new(MemoryStore::new());
        let svc = RegistryService::new(ctrl.clone(), store.clone());

        let reg = svc.scan(42).await.unwrap();
        assert_eq!(reg.sorted_ids(), vec!["a-plug", "b-lamp"]);
        assert_eq!(reg.hub_node_id, 42);

        svc.rename("b-lamp", "Desk lamp").unwrap();
        // lamp disappears, plug moves to endpoint 5
        let ctrl2 = hub(&[5]);
        ctrl2.bridged(5, "a-plug", "Plug");
        let svc2 = RegistryService::new(ctrl2, store.clone());
        svc2.scan(42).await.unwrap();

        let list = svc2.list().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].unique_id, "a-plug");
        assert_eq!(list[0].endpoint, 5);
        assert!(!list[0].missing);
        assert!(list[1].missing);
        assert_eq!(list[1].user_label, "Desk lamp");
    }

    #[tokio::test]
    async fn failed_scan_keeps_registry() {
        let ctrl = hub(&[2]);
        ctrl.bridged(2, "b-lamp", "Lamp");
        let store = Arc::new(MemoryStore::new());
        let svc = RegistryService::new(ctrl.clone(), store.clone());
        svc.scan(42).await.unwrap();

        ctrl.set(2, 0x39, 0x12, Err(Error::Timeout));
        assert!(svc.scan(42).await.is_err());
        assert!(!svc.load().unwrap().find("b-lamp").unwrap().missing);
        assert!(matches!(svc.scan(0).await, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn rename_and_remove_unknown() {
        let svc = RegistryService::new(Arc::new(TableController::default()), Arc::new(MemoryStore::new()));
        assert!(matches!(svc.rename("x", "y"), Err(Error::DeviceNotFound(_))));
        assert!(matches!(svc.remove("x"), Err(Error::DeviceNotFound(_))));
    }
}
