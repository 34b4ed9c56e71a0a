use async_trait::async_trait;

use super::{read_required, MetricReader, Metrics};
use crate::clusters::defs;
use crate::controller::Controller;
use crate::error::Result;
use crate::scan::BridgedDevice;
use crate::value;

/// Live reachability flag from bridged device basic information.
pub struct ReachabilityReader;

#[async_trait]
impl MetricReader for ReachabilityReader {
    fn name(&self) -> &str {
        "reachability"
    }

    async fn read(&self, ctrl: &dyn Controller, node_id: u64, device: &BridgedDevice) -> Result<Metrics> {
        let raw = read_required(
            ctrl,
            node_id,
            device.endpoint,
            defs::CLUSTER_ID_BRIDGED_DEVICE_BASIC_INFORMATION,
            defs::CLUSTER_BRIDGED_DEVICE_BASIC_INFORMATION_ATTR_ID_REACHABLE,
        )
        .await?;
        let reachable = value::flag(&raw, "reachability")?;
        Ok(Metrics::from([("reachable".to_owned(), serde_json::Value::from(reachable))]))
    }
}
