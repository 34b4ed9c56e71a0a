//! Matter hub controller library
//!
//! Core of a controller that commissions a Matter bridge (hub), keeps a registry of the
//! devices it bridges and dispatches attribute reads, writes and commands to them.
//! Library uses asynchronous Rust and depends on Tokio.
//! Following are main parts of api:
//! - [onboarding] - decoding of QR (`MT:...`) and manual pairing codes into an [OnboardingIdentity](onboarding::OnboardingIdentity).
//! - [discover] - fan-out discovery of commissionable devices over registered transports
//!                (mDNS built in, BLE pluggable) and identity matching.
//! - [commission] - commissioning flow and persisted commissioning state (payload, credential bundle, result).
//! - [scan] and [registry] - walking the hub descriptor for bridged endpoints and reconciling
//!                           them into a persistent device registry keyed by unique id.
//! - [services] - on/off, door lock, raw attribute access and registry management by unique id.
//! - [poll] and [metrics] - one-shot or periodic metric collection over all registered devices.
//! - [Controller](controller::Controller) - seam to the Matter stack that does the actual
//!                              secure session work (read attribute, write attribute, invoke command).
//! - [devman] - ties everything to one state directory with a config file.
//!
//! Example how to decode onboarding payload:
//! ```
//! # use matc_hub::onboarding;
//! let (payload, is_qr) = onboarding::parse_onboarding_payload("MT:Y.K9042C00KA0648G00").unwrap();
//! assert!(is_qr);
//! assert_eq!(payload.identity.discriminator, 3840);
//! assert_eq!(payload.identity.passcode, 20202021);
//! ```
//!
//! Example how to refresh registry and switch bridged lamp on:
//! ```no_run
//! # use std::sync::Arc;
//! # use anyhow::Result;
//! # use matc_hub::{controller, commission, devman};
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! let ctrl: Arc<dyn controller::Controller> = Arc::new(controller::NoopController);
//! let dm = devman::DeviceManager::open("./matter-data", ctrl, Arc::new(commission::UnavailableHandshake))?;
//! let hub = dm.hub_node_id()?;
//! let registry = dm.registry_service().scan(hub).await?;
//! for id in registry.sorted_ids() {
//!     println!("{}", id);
//! }
//! dm.onoff().on("lamp-uid").await?;
//! # Ok(())
//! # }
//! ```

pub mod clusters;
pub mod commission;
pub mod controller;
pub mod devman;
pub mod discover;
pub mod error;
pub mod mdns;
pub mod metrics;
pub mod onboarding;
pub mod poll;
pub mod registry;
pub mod scan;
pub mod services;
pub mod store;
pub mod tlv;
pub mod value;
