//! Onboarding payload import and commissioning.
//!
//! `commission` imports the payload first, so a failed handshake still leaves the payload
//! on disk. Errors say which durable changes already happened, see [CommissionError].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::error::Error;
use crate::onboarding;
use crate::store::DocumentStore;

mod commissioner;
pub mod state;

pub use commissioner::{Commissionee, Commissioner, Handshake, UnavailableHandshake};
pub use state::{CommissioningState, CredentialBundle, PayloadRecord, ResultRecord};

#[derive(thiserror::Error, Debug)]
pub enum CommissionError {
    /// Nothing was changed.
    #[error(transparent)]
    NotStarted(Error),

    /// Payload is imported, device is not commissioned.
    #[error("payload imported but commissioning failed: {error}")]
    Incomplete {
        state: Box<CommissioningState>,
        #[source]
        error: Error,
    },

    /// Device is commissioned but the result is not persisted.
    #[error("commissioned {commissionee} but failed to save state: {error}")]
    StateNotSaved {
        state: Box<CommissioningState>,
        commissionee: Box<Commissionee>,
        #[source]
        error: Error,
    },
}

impl CommissionError {
    pub fn error(&self) -> &Error {
        match self {
            CommissionError::NotStarted(e) => e,
            CommissionError::Incomplete { error, .. } => error,
            CommissionError::StateNotSaved { error, .. } => error,
        }
    }

    /// True when the device itself was commissioned.
    pub fn device_commissioned(&self) -> bool {
        matches!(self, CommissionError::StateNotSaved { .. })
    }
}

pub struct CommissionService {
    commissioner: Arc<Commissioner>,
    store: Arc<dyn DocumentStore>,
    discovery_timeout: Option<Duration>,
}

impl CommissionService {
    pub fn new(commissioner: Arc<Commissioner>, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            commissioner,
            store,
            discovery_timeout: None,
        }
    }

    /// Discovery deadline for this service only; the configured default is left untouched.
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = Some(timeout);
        self
    }

    pub fn state(&self) -> Result<CommissioningState, Error> {
        state::load_state(self.store.as_ref())
    }

    pub fn import_payload(&self, node_id: u64, raw: &str) -> Result<CommissioningState, Error> {
        state::import_payload(self.store.as_ref(), node_id, raw)
    }

    pub fn import_bundle(&self, bundle: CredentialBundle) -> Result<CommissioningState, Error> {
        state::import_bundle(self.store.as_ref(), bundle)
    }

    pub async fn commission(
        &self,
        node_id: u64,
        raw: &str,
    ) -> Result<(CommissioningState, Commissionee), CommissionError> {
        self.run(node_id, raw, None).await
    }

    /// Commission device at known address without discovery.
    pub async fn commission_on_network(
        &self,
        node_id: u64,
        raw: &str,
        address: SocketAddr,
    ) -> Result<(CommissioningState, Commissionee), CommissionError> {
        self.run(node_id, raw, Some(address)).await
    }

    async fn run(
        &self,
        node_id: u64,
        raw: &str,
        on_network: Option<SocketAddr>,
    ) -> Result<(CommissioningState, Commissionee), CommissionError> {
        let (payload, _) = onboarding::parse_onboarding_payload(raw).map_err(CommissionError::NotStarted)?;
        let state = state::import_parsed_payload(self.store.as_ref(), node_id, &payload)
            .map_err(CommissionError::NotStarted)?;

        let commissionee = match self.commissioner.commission(&payload, on_network, self.discovery_timeout).await {
            Ok(c) => c,
            Err(error) => {
                return Err(CommissionError::Incomplete {
                    state: Box::new(state),
                    error,
                })
            }
        };

        let result = ResultRecord {
            node_id,
            vendor_id: commissionee.vendor_id(),
            product_id: commissionee.product_id(),
            device: commissionee.to_string(),
            commissioned_at: Utc::now(),
            payload_fingerprint: state.fingerprint().to_owned(),
        };
        match state::update_result(self.store.as_ref(), result) {
            Ok(updated) => {
                log::info!("commissioned node {}: {}", node_id, commissionee);
                Ok((updated, commissionee))
            }
            Err(error) => Err(CommissionError::StateNotSaved {
                state: Box::new(state),
                commissionee: Box::new(commissionee),
                error,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::discover::tests::{candidate, FakeDiscoverer};
    use crate::discover::{Candidate, Discovery, TransportKind};
    use crate::error::NotFound;
    use crate::onboarding::OnboardingPayload;
    use crate::store::MemoryStore;

    // vendor 0x1234 product 0x5678 discriminator 250
    const QR: &str = "MT:CS.16ZU112R-.548G00";

    #[derive(Default)]
    struct RecordingHandshake {
        seen: Mutex<Vec<Candidate>>,
        fail: bool,
    }

    #[async_trait]
    impl Handshake for RecordingHandshake {
        async fn commission(&self, candidate: &Candidate, _: &OnboardingPayload) -> crate::error::Result<()> {
            self.seen.lock().unwrap().push(candidate.clone());
            if self.fail {
                return Err(Error::Transport(anyhow::anyhow!("pase failed")));
            }
            Ok(())
        }
    }

    fn mdns_two_candidates() -> Discovery {
        Discovery::new(false, true).with_discoverer(Arc::new(FakeDiscoverer {
            kind: TransportKind::Mdns,
            delay: Duration::from_millis(5),
            result: || {
                Ok(vec![
                    candidate(TransportKind::Mdns, 0x1234, 0x5678, 251),
                    candidate(TransportKind::Mdns, 0x1234, 0x5678, 250),
                ])
            },
        }))
    }

    fn service(discovery: Discovery, hs: Arc<RecordingHandshake>, store: Arc<MemoryStore>) -> CommissionService {
        CommissionService::new(Arc::new(Commissioner::new(discovery, hs)), store)
    }

    #[tokio::test]
    async fn commission_matching_candidate() {
        let hs = Arc::new(RecordingHandshake::default());
        let store = Arc::new(MemoryStore::new());
        let svc = service(mdns_two_candidates(), hs.clone(), store.clone());

        let (state, commissionee) = svc.commission(10, QR).await.unwrap();
        let seen = hs.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].discriminator, 250);
        assert_eq!(commissionee.candidate.discriminator, 250);

        let result = state.result.as_ref().unwrap();
        assert_eq!(result.vendor_id, 0x1234);
        assert_eq!(result.product_id, 0x5678);
        assert_eq!(result.node_id, 10);
        assert_eq!(result.payload_fingerprint, state.fingerprint());
        assert_eq!(svc.state().unwrap(), state);
    }

    #[tokio::test]
    async fn no_match_keeps_import() {
        let hs = Arc::new(RecordingHandshake::default());
        let store = Arc::new(MemoryStore::new());
        let svc = service(mdns_two_candidates(), hs.clone(), store.clone());
        // discriminator 3840, vendor 0xFFF1
        let err = svc.commission(10, "MT:Y.K9042C00KA0648G00").await.unwrap_err();
        match &err {
            CommissionError::Incomplete { state, error } => {
                assert!(state.payload.is_some());
                assert!(matches!(error, Error::DeviceNotFound(NotFound::Candidate(_))));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(hs.seen.lock().unwrap().is_empty());
        assert!(svc.state().unwrap().payload.is_some());
        assert!(svc.state().unwrap().result.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn service_discovery_timeout() {
        let slow = Discovery::new(false, true)
            .with_default_timeout(Duration::from_secs(30))
            .with_discoverer(Arc::new(FakeDiscoverer {
                kind: TransportKind::Mdns,
                delay: Duration::from_secs(60),
                result: || Ok(vec![candidate(TransportKind::Mdns, 0x1234, 0x5678, 250)]),
            }));
        let svc = service(slow, Arc::new(RecordingHandshake::default()), Arc::new(MemoryStore::new()))
            .with_discovery_timeout(Duration::from_secs(2));
        let start = tokio::time::Instant::now();
        let err = svc.commission(10, QR).await.unwrap_err();
        assert!(matches!(err.error(), Error::DeviceNotFound(NotFound::Candidate(_))));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn handshake_failure() {
        let hs = Arc::new(RecordingHandshake {
            fail: true,
            ..Default::default()
        });
        let svc = service(mdns_two_candidates(), hs, Arc::new(MemoryStore::new()));
        let err = svc.commission(10, QR).await.unwrap_err();
        assert!(matches!(err.error(), Error::CommissioningFailed { .. }));
        assert!(err.to_string().contains("discriminator=250"));
        assert!(!err.device_commissioned());
    }

    #[tokio::test]
    async fn result_not_saved() {
        let hs = Arc::new(RecordingHandshake::default());
        // payload import succeeds, result save fails
        let store = Arc::new(FailAfterFirstSave::default());
        let svc = CommissionService::new(Arc::new(Commissioner::new(mdns_two_candidates(), hs.clone())), store);
        let err = svc.commission(10, QR).await.unwrap_err();
        assert!(err.device_commissioned());
        assert_eq!(hs.seen.lock().unwrap().len(), 1);
        match err {
            CommissionError::StateNotSaved { commissionee, state, .. } => {
                assert_eq!(commissionee.vendor_id(), 0x1234);
                assert!(state.payload.is_some());
                assert!(state.result.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn invalid_payload_not_started() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(mdns_two_candidates(), Arc::new(RecordingHandshake::default()), store.clone());
        let err = svc.commission(10, "MT:bogus").await.unwrap_err();
        assert!(matches!(err, CommissionError::NotStarted(Error::InvalidPayload(_))));
        assert!(store.get(crate::store::KEY_COMMISSION).is_none());
    }

    #[tokio::test]
    async fn on_network_skips_discovery() {
        let hs = Arc::new(RecordingHandshake::default());
        let svc = service(Discovery::new(false, false), hs.clone(), Arc::new(MemoryStore::new()));
        let addr = "10.0.0.5:5540".parse().unwrap();
        let (_, c) = svc.commission_on_network(3, QR, addr).await.unwrap();
        assert_eq!(c.candidate.transport, TransportKind::OnNetwork);
        assert_eq!(c.candidate.address, Some(addr));

        let err = svc.commission(3, QR).await.unwrap_err();
        assert!(matches!(err.error(), Error::DiscoveryDisabled));
    }

    /// Store which accepts one save and fails all later ones.
    #[derive(Default)]
    struct FailAfterFirstSave {
        inner: MemoryStore,
        saves: Mutex<usize>,
    }

    impl DocumentStore for FailAfterFirstSave {
        fn load(&self, key: &str) -> crate::error::Result<Option<serde_json::Value>> {
            self.inner.load(key)
        }
        fn save(&self, key: &str, document: &serde_json::Value) -> crate::error::Result<()> {
            let mut n = self.saves.lock().unwrap();
            *n += 1;
            if *n > 1 {
                return Err(Error::Store(anyhow::anyhow!("disk full")));
            }
            self.inner.save(key, document)
        }
    }
}
