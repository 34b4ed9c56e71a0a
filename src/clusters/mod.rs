//! Cluster, attribute and command identifiers used by the hub.

pub mod defs;
