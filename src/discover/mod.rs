//! Discovery of commissionable devices over several transports.
//!
//! Each enabled transport runs as its own task under one shared deadline. The orchestrator
//! waits for every task to report; a transport that hits the deadline simply contributes
//! nothing, while any other failure aborts the whole discovery.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::onboarding::OnboardingIdentity;

pub mod mdns;

pub use self::mdns::MdnsDiscoverer;

pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);
/// Operational port used when an on-network address carries none.
pub const DEFAULT_PORT: u16 = 5540;
/// Extra time granted to a transport past the deadline to hand over its results.
const DEADLINE_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Ble,
    Mdns,
    OnNetwork,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::Ble => "ble",
            TransportKind::Mdns => "mdns",
            TransportKind::OnNetwork => "on-network",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommissioningMode {
    No,
    Yes,
    WithPasscode,
}

/// One commissionable device seen by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub transport: TransportKind,
    pub vendor_id: u16,
    pub product_id: u16,
    pub discriminator: u16,
    pub address: Option<SocketAddr>,
    pub name: Option<String>,
    pub commissioning_mode: Option<CommissioningMode>,
}

impl Candidate {
    /// Synthetic candidate for a device reachable at a known address.
    pub fn on_network(identity: &OnboardingIdentity, address: SocketAddr) -> Self {
        Self {
            transport: TransportKind::OnNetwork,
            vendor_id: identity.vendor_id,
            product_id: identity.product_id,
            discriminator: identity.discriminator,
            address: Some(address),
            name: None,
            commissioning_mode: None,
        }
    }

    /// Exact match on vendor, product and discriminator.
    pub fn matches(&self, identity: &OnboardingIdentity) -> bool {
        self.vendor_id == identity.vendor_id
            && self.product_id == identity.product_id
            && self.discriminator == identity.discriminator
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} vendor=0x{:04X} product=0x{:04X} discriminator={}",
            self.transport, self.vendor_id, self.product_id, self.discriminator
        )?;
        if let Some(name) = &self.name {
            write!(f, " name={}", name)?;
        }
        if let Some(addr) = &self.address {
            write!(f, " addr={}", addr)?;
        }
        Ok(())
    }
}

/// First candidate matching the identity, in discovery order.
pub fn find_match<'a>(candidates: &'a [Candidate], identity: &OnboardingIdentity) -> Option<&'a Candidate> {
    candidates.iter().find(|c| c.matches(identity))
}

/// A discovery transport (BLE scanner, mDNS browser, ...).
#[async_trait]
pub trait Discoverer: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Collect candidates until `deadline`. Returning `Error::Timeout` is the same as
    /// returning no candidates.
    async fn search(&self, identity: &OnboardingIdentity, deadline: Instant) -> Result<Vec<Candidate>>;
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveryQuery {
    pub identity: OnboardingIdentity,
    /// Skip discovery and use this address directly.
    pub on_network: Option<SocketAddr>,
    /// Defaults to the orchestrator timeout.
    pub timeout: Option<Duration>,
}

pub struct Discovery {
    discoverers: Vec<Arc<dyn Discoverer>>,
    enable_ble: bool,
    enable_mdns: bool,
    default_timeout: Duration,
}

impl Discovery {
    pub fn new(enable_ble: bool, enable_mdns: bool) -> Self {
        Self {
            discoverers: Vec::new(),
            enable_ble,
            enable_mdns,
            default_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }

    pub fn with_discoverer(mut self, discoverer: Arc<dyn Discoverer>) -> Self {
        self.discoverers.push(discoverer);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    fn enabled(&self, kind: TransportKind) -> bool {
        match kind {
            TransportKind::Ble => self.enable_ble,
            TransportKind::Mdns => self.enable_mdns,
            TransportKind::OnNetwork => false,
        }
    }

    pub async fn discover(&self, query: &DiscoveryQuery) -> Result<Vec<Candidate>> {
        if let Some(address) = query.on_network {
            log::debug!("using on-network address {}, skipping discovery", address);
            return Ok(vec![Candidate::on_network(&query.identity, address)]);
        }

        let active: Vec<Arc<dyn Discoverer>> = self
            .discoverers
            .iter()
            .filter(|d| self.enabled(d.kind()))
            .cloned()
            .collect();
        if active.is_empty() {
            return Err(Error::DiscoveryDisabled);
        }

        let deadline = Instant::now() + query.timeout.unwrap_or(self.default_timeout);
        let (sender, mut receiver) = tokio::sync::mpsc::channel(active.len());
        let mut tasks = Vec::with_capacity(active.len());
        for discoverer in &active {
            let discoverer = discoverer.clone();
            let sender = sender.clone();
            let identity = query.identity;
            log::debug!("starting {} discovery", discoverer.kind());
            tasks.push(tokio::spawn(async move {
                let kind = discoverer.kind();
                let res = match tokio::time::timeout_at(
                    deadline + DEADLINE_GRACE,
                    discoverer.search(&identity, deadline),
                )
                .await
                {
                    Ok(res) => res,
                    Err(elapsed) => Err(elapsed.into()),
                };
                _ = sender.send((kind, res)).await;
            }));
        }
        drop(sender);

        let mut out = Vec::new();
        for _ in 0..active.len() {
            let (kind, res) = match receiver.recv().await {
                Some(r) => r,
                None => break,
            };
            match res {
                Ok(found) => {
                    log::debug!("{} discovery finished with {} candidates", kind, found.len());
                    out.extend(found);
                }
                Err(e) if e.is_timeout() => {
                    log::debug!("{} discovery timed out", kind);
                }
                Err(e) => {
                    log::warn!("{} discovery failed: {}", kind, e);
                    for task in &tasks {
                        task.abort();
                    }
                    return Err(e);
                }
            }
        }
        for c in &out {
            log::info!("found candidate {}", c);
        }
        Ok(out)
    }
}

/// Parse `ip` or `ip:port` (IPv6 with port as `[ip]:port`). Missing port is [DEFAULT_PORT].
pub fn parse_on_network_address(s: &str) -> Result<SocketAddr> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidArgument("address is empty".to_owned()));
    }
    if let Ok(addr) = s.parse::<SocketAddr>() {
        if addr.port() == 0 {
            return Err(Error::InvalidArgument(format!("invalid port in {}", s)));
        }
        return Ok(addr);
    }
    let ip_str = s.trim_start_matches('[').trim_end_matches(']');
    match ip_str.parse::<IpAddr>() {
        Ok(ip) => Ok(SocketAddr::new(ip, DEFAULT_PORT)),
        Err(_) => Err(Error::InvalidArgument(format!("invalid address {}", s))),
    }
}
