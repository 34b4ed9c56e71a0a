//! Pluggable per-device metric readers used by the poll engine.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::controller::Controller;
use crate::error::{Error, Result};
use crate::scan::BridgedDevice;
use crate::value::AttributeValue;

mod power_source;
mod reachability;

pub use power_source::{parse_percent_remaining, PowerSourceReader};
pub use reachability::ReachabilityReader;

pub type Metrics = BTreeMap<String, serde_json::Value>;

#[async_trait]
pub trait MetricReader: Send + Sync {
    /// Key under which this reader's failures are reported.
    fn name(&self) -> &str;

    async fn read(&self, ctrl: &dyn Controller, node_id: u64, device: &BridgedDevice) -> Result<Metrics>;
}

/// All built-in readers.
pub fn default_readers() -> Vec<Box<dyn MetricReader>> {
    vec![Box::new(PowerSourceReader), Box::new(ReachabilityReader)]
}

/// Read attribute which must carry a value.
pub(crate) async fn read_required(
    ctrl: &dyn Controller,
    node_id: u64,
    endpoint: u16,
    cluster: u32,
    attr: u32,
) -> Result<AttributeValue> {
    match ctrl.read_attribute(node_id, endpoint, cluster, attr).await? {
        AttributeValue::Null => Err(Error::AttributeUnavailable),
        v => Ok(v),
    }
}
