use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::discover::{self, Candidate, Discovery, DiscoveryQuery};
use crate::error::{Error, NotFound, Result};
use crate::onboarding::OnboardingPayload;

/// Commissioning handshake with one candidate (PASE, certificates, network config).
#[async_trait]
pub trait Handshake: Send + Sync {
    async fn commission(&self, candidate: &Candidate, payload: &OnboardingPayload) -> Result<()>;
}

/// Default handshake when no operational stack is linked in.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableHandshake;

#[async_trait]
impl Handshake for UnavailableHandshake {
    async fn commission(&self, _: &Candidate, _: &OnboardingPayload) -> Result<()> {
        Err(Error::ControllerUnavailable)
    }
}

/// Device which completed commissioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commissionee {
    pub candidate: Candidate,
    pub commissioned_at: DateTime<Utc>,
}

impl Commissionee {
    pub fn vendor_id(&self) -> u16 {
        self.candidate.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.candidate.product_id
    }
}

impl fmt::Display for Commissionee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.candidate, f)
    }
}

pub struct Commissioner {
    discovery: Discovery,
    handshake: Arc<dyn Handshake>,
}

impl Commissioner {
    pub fn new(discovery: Discovery, handshake: Arc<dyn Handshake>) -> Self {
        Self {
            discovery,
            handshake,
        }
    }

    pub async fn discover(&self, query: &DiscoveryQuery) -> Result<Vec<Candidate>> {
        self.discovery.discover(query).await
    }

    /// Discover, match and run handshake with the first matching candidate.
    /// `timeout` of `None` uses the discovery default.
    pub async fn commission(
        &self,
        payload: &OnboardingPayload,
        on_network: Option<SocketAddr>,
        timeout: Option<Duration>,
    ) -> Result<Commissionee> {
        let query = DiscoveryQuery {
            identity: payload.identity,
            on_network,
            timeout,
        };
        let candidates = self.discover(&query).await?;
        let candidate = discover::find_match(&candidates, &payload.identity)
            .ok_or(Error::DeviceNotFound(NotFound::Candidate(payload.identity)))?;
        log::info!("commissioning {}", candidate);
        self.handshake
            .commission(candidate, payload)
            .await
            .map_err(|e| Error::CommissioningFailed {
                device: candidate.to_string(),
                source: Box::new(e),
            })?;
        Ok(Commissionee {
            candidate: candidate.clone(),
            commissioned_at: Utc::now(),
        })
    }
}
