//! Per-hub commissioning state document.
//!
//! One JSON document holds the last imported onboarding payload, an optional credential
//! bundle and the result of the last successful commission. Each part is replaced
//! wholesale; there is no history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::onboarding::{self, CommissioningFlow, OnboardingPayload, PayloadKind};
use crate::store::{self, DocumentStore};

fn is_zero(v: &u64) -> bool {
    *v == 0
}

fn is_zero32(v: &u32) -> bool {
    *v == 0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadRecord {
    pub node_id: u64,
    pub vendor_id: u16,
    pub product_id: u16,
    pub commissioning_flow: CommissioningFlow,
    pub discriminator: u16,
    #[serde(default, skip_serializing_if = "is_zero32")]
    pub passcode: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,
    pub imported_at: DateTime<Utc>,
    pub payload_fingerprint: String,
}

impl PayloadRecord {
    pub fn new(node_id: u64, payload: &OnboardingPayload, imported_at: DateTime<Utc>) -> Self {
        let id = &payload.identity;
        let (qr_code, pairing_code) = match payload.kind {
            PayloadKind::Qr => (Some(payload.raw.clone()), None),
            PayloadKind::Pairing => (None, Some(payload.raw.clone())),
        };
        let payload_fingerprint = fingerprint(node_id, payload);
        Self {
            node_id,
            vendor_id: id.vendor_id,
            product_id: id.product_id,
            commissioning_flow: id.flow,
            discriminator: id.discriminator,
            passcode: id.passcode,
            qr_code,
            pairing_code,
            imported_at,
            payload_fingerprint,
        }
    }

    /// Original payload string, whichever form it was.
    pub fn raw(&self) -> Option<&str> {
        self.qr_code.as_deref().or(self.pairing_code.as_deref())
    }
}

/// Provenance key of a payload import. Passcode does not take part.
pub fn fingerprint(node_id: u64, payload: &OnboardingPayload) -> String {
    let id = &payload.identity;
    format!(
        "node={};vendor={};product={};disc={};{}",
        node_id,
        id.vendor_id,
        id.product_id,
        id.discriminator,
        payload.kind.tag()
    )
}

/// Operational credentials imported from elsewhere. Stored as given.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialBundle {
    pub node_id: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub fabric_id: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub root_cert: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub intermediate_cert: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub operational_cert: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub operational_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ipk: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default)]
    pub imported_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub node_id: u64,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device: String,
    pub commissioned_at: DateTime<Utc>,
    #[serde(default)]
    pub payload_fingerprint: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommissioningState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<PayloadRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<CredentialBundle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultRecord>,
}

impl CommissioningState {
    pub fn fingerprint(&self) -> &str {
        self.payload
            .as_ref()
            .map(|p| p.payload_fingerprint.as_str())
            .unwrap_or_default()
    }

    /// Replace payload record. Bundle and last result are kept.
    pub fn import_payload_record(mut self, record: PayloadRecord) -> Self {
        self.payload = Some(record);
        self
    }

    pub fn apply_bundle(mut self, mut bundle: CredentialBundle, now: DateTime<Utc>) -> Self {
        if bundle.imported_at.is_none() {
            bundle.imported_at = Some(now);
        }
        self.bundle = Some(bundle);
        self
    }

    pub fn apply_result(mut self, result: ResultRecord) -> Self {
        self.result = Some(result);
        self
    }
}

pub fn load_state(store: &dyn DocumentStore) -> Result<CommissioningState> {
    store::load_document(store, store::KEY_COMMISSION)
}

pub fn save_state(store: &dyn DocumentStore, state: &CommissioningState) -> Result<()> {
    store::save_document(store, store::KEY_COMMISSION, state)
}

/// Parse payload and replace the stored payload record.
pub fn import_payload(store: &dyn DocumentStore, node_id: u64, raw: &str) -> Result<CommissioningState> {
    let (payload, _) = onboarding::parse_onboarding_payload(raw)?;
    import_parsed_payload(store, node_id, &payload)
}

pub(crate) fn import_parsed_payload(
    store: &dyn DocumentStore,
    node_id: u64,
    payload: &OnboardingPayload,
) -> Result<CommissioningState> {
    let record = PayloadRecord::new(node_id, payload, Utc::now());
    log::info!("imported payload for node {} ({})", node_id, record.payload_fingerprint);
    let state = load_state(store)?.import_payload_record(record);
    save_state(store, &state)?;
    Ok(state)
}

pub fn import_bundle(store: &dyn DocumentStore, bundle: CredentialBundle) -> Result<CommissioningState> {
    let state = load_state(store)?.apply_bundle(bundle, Utc::now());
    save_state(store, &state)?;
    Ok(state)
}

pub fn update_result(store: &dyn DocumentStore, result: ResultRecord) -> Result<CommissioningState> {
    let state = load_state(store)?.apply_result(result);
    save_state(store, &state)?;
    Ok(state)
}
