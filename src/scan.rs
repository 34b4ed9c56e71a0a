//! Enumerate bridged devices behind a hub.

use crate::clusters::defs;
use crate::controller::Controller;
use crate::error::{Error, Result};
use crate::value::{self, AttributeValue};

/// One bridged endpoint as reported by the hub. Not persisted directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgedDevice {
    pub node_id: u64,
    pub endpoint: u16,
    pub unique_id: String,
    pub node_label: String,
    pub reachable: Option<bool>,
}

/// Read `value` unless device reports it as unavailable.
async fn read_optional(
    ctrl: &dyn Controller,
    node_id: u64,
    endpoint: u16,
    cluster: u32,
    attr: u32,
) -> Result<Option<AttributeValue>> {
    match ctrl.read_attribute(node_id, endpoint, cluster, attr).await {
        Ok(AttributeValue::Null) | Err(Error::AttributeUnavailable) => Ok(None),
        Ok(v) => Ok(Some(v)),
        Err(e) => Err(e),
    }
}

/// Normalize descriptor parts list to endpoint numbers.
pub fn parts_list(value: &AttributeValue) -> Result<Vec<u16>> {
    let items = match value {
        AttributeValue::List(items) => items,
        other => return Err(other.unsupported("parts list")),
    };
    items
        .iter()
        .map(|item| {
            let n = item
                .as_integer()
                .ok_or_else(|| item.unsupported("parts list entry"))?;
            u16::try_from(n).map_err(|_| Error::out_of_range("parts list entry", n))
        })
        .collect()
}

pub async fn scan_bridged_devices(ctrl: &dyn Controller, hub_node_id: u64) -> Result<Vec<BridgedDevice>> {
    let raw = ctrl
        .read_attribute(
            hub_node_id,
            0,
            defs::CLUSTER_ID_DESCRIPTOR,
            defs::CLUSTER_DESCRIPTOR_ATTR_ID_PARTS_LIST,
        )
        .await?;
    let parts = parts_list(&raw)?;
    log::debug!("hub {} reports {} endpoints", hub_node_id, parts.len());

    let mut out = Vec::with_capacity(parts.len());
    for endpoint in parts {
        match read_bridged_device(ctrl, hub_node_id, endpoint).await? {
            Some(dev) => out.push(dev),
            None => log::debug!("endpoint {} has no unique id, skipping", endpoint),
        }
    }
    log::info!("scan of hub {} found {} bridged devices", hub_node_id, out.len());
    Ok(out)
}

async fn read_bridged_device(
    ctrl: &dyn Controller,
    node_id: u64,
    endpoint: u16,
) -> Result<Option<BridgedDevice>> {
    let cluster = defs::CLUSTER_ID_BRIDGED_DEVICE_BASIC_INFORMATION;
    let unique_id = match read_optional(
        ctrl,
        node_id,
        endpoint,
        cluster,
        defs::CLUSTER_BRIDGED_DEVICE_BASIC_INFORMATION_ATTR_ID_UNIQUE_ID,
    )
    .await?
    {
        Some(v) => value::text(&v, "unique id")?,
        None => return Ok(None),
    };

    let node_label = match read_optional(
        ctrl,
        node_id,
        endpoint,
        cluster,
        defs::CLUSTER_BRIDGED_DEVICE_BASIC_INFORMATION_ATTR_ID_NODE_LABEL,
    )
    .await?
    {
        Some(v) => value::text(&v, "node label")?,
        None => String::new(),
    };

    let reachable = match read_optional(
        ctrl,
        node_id,
        endpoint,
        cluster,
        defs::CLUSTER_BRIDGED_DEVICE_BASIC_INFORMATION_ATTR_ID_REACHABLE,
    )
    .await?
    {
        Some(v) => Some(value::flag(&v, "reachable")?),
        None => None,
    };

    Ok(Some(BridgedDevice {
        node_id,
        endpoint,
        unique_id,
        node_label,
        reachable,
    }))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    /// Controller answering reads from a table. Unknown attributes are unavailable.
    #[derive(Default)]
    pub(crate) struct TableController {
        pub attrs: Mutex<HashMap<(u16, u32, u32), Result<AttributeValue>>>,
        pub invoked: Mutex<Vec<(u64, u16, u32, u32, Vec<u8>)>>,
        pub written: Mutex<Vec<(u64, u16, u32, u32, AttributeValue)>>,
    }

    impl TableController {
        pub fn set(&self, endpoint: u16, cluster: u32, attr: u32, v: Result<AttributeValue>) {
            self.attrs.lock().unwrap().insert((endpoint, cluster, attr), v);
        }

        pub fn bridged(&self, endpoint: u16, id: &str, label: &str) {
            let c = defs::CLUSTER_ID_BRIDGED_DEVICE_BASIC_INFORMATION;
            self.set(endpoint, c, 0x12, Ok(AttributeValue::String(id.to_owned())));
            self.set(endpoint, c, 0x05, Ok(AttributeValue::String(label.to_owned())));
        }
    }

    fn copy(r: &Result<AttributeValue>) -> Result<AttributeValue> {
        match r {
            Ok(v) => Ok(v.clone()),
            Err(Error::AttributeUnavailable) => Err(Error::AttributeUnavailable),
            Err(e) => Err(Error::Transport(anyhow::anyhow!("{}", e))),
        }
    }

    #[async_trait]
    impl Controller for TableController {
        async fn ping(&self, _: u64) -> Result<()> {
            Ok(())
        }
        async fn read_attribute(&self, _: u64, endpoint: u16, cluster: u32, attr: u32) -> Result<AttributeValue> {
            match self.attrs.lock().unwrap().get(&(endpoint, cluster, attr)) {
                Some(r) => copy(r),
                None => Err(Error::AttributeUnavailable),
            }
        }
        async fn write_attribute(&self, node: u64, endpoint: u16, cluster: u32, attr: u32, value: AttributeValue) -> Result<()> {
            self.written.lock().unwrap().push((node, endpoint, cluster, attr, value));
            Ok(())
        }
        async fn invoke_command(&self, node: u64, endpoint: u16, cluster: u32, command: u32, payload: &[u8]) -> Result<AttributeValue> {
            self.invoked
                .lock()
                .unwrap()
                .push((node, endpoint, cluster, command, payload.to_vec()));
            Ok(AttributeValue::Null)
        }
    }

    fn parts(ctrl: &TableController, v: AttributeValue) {
        ctrl.set(0, defs::CLUSTER_ID_DESCRIPTOR, defs::CLUSTER_DESCRIPTOR_ATTR_ID_PARTS_LIST, Ok(v));
    }

    #[test]
    fn parts_list_shapes() {
        let l = AttributeValue::List(vec![
            AttributeValue::U8(1),
            AttributeValue::U16(2),
            AttributeValue::U32(3),
            AttributeValue::I64(4),
            AttributeValue::I8(5),
            AttributeValue::I16(6),
        ]);
        assert_eq!(parts_list(&l).unwrap(), vec![1, 2, 3, 4, 5, 6]);
        let l = AttributeValue::List(vec![AttributeValue::U32(0x10000)]);
        assert!(matches!(parts_list(&l), Err(Error::OutOfRange(_))));
        let l = AttributeValue::List(vec![AttributeValue::I32(-1)]);
        assert!(matches!(parts_list(&l), Err(Error::OutOfRange(_))));
        let l = AttributeValue::List(vec![AttributeValue::String("1".into())]);
        assert!(matches!(parts_list(&l), Err(Error::UnsupportedType { .. })));
        assert!(matches!(
            parts_list(&AttributeValue::U16(1)),
            Err(Error::UnsupportedType { kind: "u16", .. })
        ));
    }

    #[tokio::test]
    async fn scan_skips_non_bridged_endpoints() {
        let ctrl = TableController::default();
        parts(&ctrl, AttributeValue::List(vec![AttributeValue::U16(1), AttributeValue::U16(2), AttributeValue::U16(3)]));
        ctrl.bridged(1, "uid-1", "Lamp");
        ctrl.set(1, 0x39, 0x11, Ok(AttributeValue::Bool(true)));
        // endpoint 2 is the aggregator itself: no unique id
        ctrl.set(2, 0x39, 0x12, Ok(AttributeValue::Null));
        // label and reachable unavailable on endpoint 3
        ctrl.set(3, 0x39, 0x12, Ok(AttributeValue::Bytes(b"uid-3".to_vec())));

        let devices = scan_bridged_devices(&ctrl, 42).await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(
            devices[0],
            BridgedDevice {
                node_id: 42,
                endpoint: 1,
                unique_id: "uid-1".to_owned(),
                node_label: "Lamp".to_owned(),
                reachable: Some(true),
            }
        );
        assert_eq!(devices[1].unique_id, "uid-3");
        assert_eq!(devices[1].node_label, "");
        assert_eq!(devices[1].reachable, None);
    }

    #[tokio::test]
    async fn scan_aborts_on_read_failure() {
        let ctrl = TableController::default();
        parts(&ctrl, AttributeValue::List(vec![AttributeValue::U16(1)]));
        ctrl.set(1, 0x39, 0x12, Err(Error::Timeout));
        assert!(scan_bridged_devices(&ctrl, 42).await.is_err());
    }

    #[tokio::test]
    async fn scan_without_parts_list_fails() {
        let ctrl = TableController::default();
        assert!(matches!(
            scan_bridged_devices(&ctrl, 42).await,
            Err(Error::AttributeUnavailable)
        ));
    }
}
