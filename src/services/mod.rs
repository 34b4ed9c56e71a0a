//! Device control addressed by stable unique id.
//!
//! Every service resolves the unique id through the registry on each call and then talks
//! to the controller. Services never write the registry, except [RegistryService] which
//! owns it.

use crate::error::{Error, NotFound, Result};
use crate::registry::Registry;
use crate::store::{self, DocumentStore};

mod attribute;
mod lock;
mod onoff;
mod registry;

pub use attribute::AttributeService;
pub use lock::LockService;
pub use onoff::OnOffService;
pub use registry::RegistryService;

/// Live coordinates of a registered device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub unique_id: String,
    pub node_id: u64,
    pub endpoint: u16,
}

/// Resolve unique id against a registry snapshot.
pub fn resolve(registry: &Registry, unique_id: &str) -> Result<Target> {
    if unique_id.is_empty() {
        return Err(Error::InvalidArgument("unique id is required".to_owned()));
    }
    let record = registry
        .find(unique_id)
        .ok_or_else(|| Error::DeviceNotFound(NotFound::UniqueId(unique_id.to_owned())))?;
    if record.missing {
        return Err(Error::DeviceMissing(unique_id.to_owned()));
    }
    if record.endpoint == 0 {
        return Err(Error::EndpointUnset(unique_id.to_owned()));
    }
    let node_id = if record.node_id != 0 {
        record.node_id
    } else {
        registry.hub_node_id
    };
    if node_id == 0 {
        return Err(Error::NodeUnset(unique_id.to_owned()));
    }
    Ok(Target {
        unique_id: unique_id.to_owned(),
        node_id,
        endpoint: record.endpoint,
    })
}

/// Load registry and resolve unique id.
pub fn lookup_device(store: &dyn DocumentStore, unique_id: &str) -> Result<Target> {
    let registry: Registry = store::load_document(store, store::KEY_REGISTRY)?;
    let target = resolve(&registry, unique_id)?;
    log::debug!(
        "{} resolved to node {} endpoint {}",
        unique_id,
        target.node_id,
        target.endpoint
    );
    Ok(target)
}
