use std::fmt;

use crate::onboarding::OnboardingIdentity;

/// What a [Error::DeviceNotFound] was looking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFound {
    /// No discovered candidate matched this onboarding identity.
    Candidate(OnboardingIdentity),
    /// Registry has no record with this unique id.
    UniqueId(String),
}

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFound::Candidate(identity) => {
                write!(f, "no matching commissionable device found (payload={})", identity)
            }
            NotFound::UniqueId(id) => write!(f, "device not found for unique_id {}", id),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid onboarding payload: {0}")]
    InvalidPayload(String),

    #[error("discovery is disabled (enable BLE or mDNS, or give an on-network address)")]
    DiscoveryDisabled,

    #[error("{0}")]
    DeviceNotFound(NotFound),

    #[error("failed to commission device ({device}): {source}")]
    CommissioningFailed {
        device: String,
        #[source]
        source: Box<Error>,
    },

    #[error("device {0} is marked missing")]
    DeviceMissing(String),

    #[error("device endpoint is not set for {0}")]
    EndpointUnset(String),

    #[error("hub node id is not set for {0}")]
    NodeUnset(String),

    #[error("{0} out of range")]
    OutOfRange(String),

    #[error("unsupported {what} type {kind}")]
    UnsupportedType {
        what: &'static str,
        kind: &'static str,
    },

    #[error("operational controller is unavailable")]
    ControllerUnavailable,

    #[error("attribute unavailable")]
    AttributeUnavailable,

    #[error("deadline exceeded")]
    Timeout,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("store: {0:#}")]
    Store(anyhow::Error),

    #[error("transport: {0:#}")]
    Transport(anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn out_of_range(what: &str, value: impl fmt::Display) -> Self {
        Error::OutOfRange(format!("{}: {}", what, value))
    }

    /// True for errors which mean "nothing arrived before the deadline".
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

pub type Result<T> = std::result::Result<T, Error>;
