//! Metrics poll engine.
//!
//! One poll loads the registry, walks devices in unique id order and runs every reader
//! against each addressable device. Reader failures are recorded per device and never
//! stop the poll.

use std::collections::BTreeMap;
use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::controller::Controller;
use crate::error::{Error, Result};
use crate::metrics::{MetricReader, Metrics};
use crate::registry::Registry;
use crate::scan::BridgedDevice;
use crate::store::{self, DocumentStore};

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollResult {
    pub timestamp: DateTime<Utc>,
    pub devices: Vec<DeviceMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceMetrics {
    pub unique_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub label: String,
    pub node_id: u64,
    pub endpoint: u16,
    #[serde(skip_serializing_if = "is_false")]
    pub missing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// One pretty printed document per poll.
    #[default]
    Json,
    /// One compact line per poll.
    JsonLines,
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(OutputFormat::Json),
            "jsonl" => Ok(OutputFormat::JsonLines),
            other => Err(Error::InvalidArgument(format!("unsupported output format: {}", other))),
        }
    }
}

pub fn write_poll_result<W: Write + ?Sized>(w: &mut W, format: OutputFormat, result: &PollResult) -> Result<()> {
    match format {
        OutputFormat::Json => serde_json::to_writer_pretty(&mut *w, result)?,
        OutputFormat::JsonLines => serde_json::to_writer(&mut *w, result)?,
    }
    w.write_all(b"\n")?;
    w.flush()?;
    Ok(())
}

pub struct PollService {
    ctrl: Arc<dyn Controller>,
    store: Arc<dyn DocumentStore>,
    readers: Vec<Box<dyn MetricReader>>,
}

fn device_error(msg: &str) -> Option<BTreeMap<String, String>> {
    Some(BTreeMap::from([("device".to_owned(), msg.to_owned())]))
}

impl PollService {
    pub fn new(
        ctrl: Arc<dyn Controller>,
        store: Arc<dyn DocumentStore>,
        readers: Vec<Box<dyn MetricReader>>,
    ) -> Self {
        Self { ctrl, store, readers }
    }

    pub async fn poll_once(&self) -> Result<PollResult> {
        let registry: Registry = store::load_document(self.store.as_ref(), store::KEY_REGISTRY)?;
        let mut result = PollResult {
            timestamp: Utc::now(),
            devices: Vec::with_capacity(registry.devices.len()),
        };
        // BTreeMap iterates in unique id order
        for record in registry.devices.values() {
            let node_id = if record.node_id != 0 {
                record.node_id
            } else {
                registry.hub_node_id
            };
            let mut entry = DeviceMetrics {
                unique_id: record.unique_id.clone(),
                label: record.user_label.clone(),
                node_id,
                endpoint: record.endpoint,
                missing: record.missing,
                metrics: None,
                errors: None,
            };
            if record.missing {
                entry.errors = device_error("device is marked missing");
            } else if node_id == 0 {
                entry.errors = device_error("hub node id is not set");
            } else if record.endpoint == 0 {
                entry.errors = device_error("device endpoint is not set");
            } else {
                let dev = BridgedDevice {
                    node_id,
                    endpoint: record.endpoint,
                    unique_id: record.unique_id.clone(),
                    node_label: record.node_label.clone(),
                    reachable: record.reachable,
                };
                self.read_device(&dev, &mut entry).await;
            }
            result.devices.push(entry);
        }
        Ok(result)
    }

    async fn read_device(&self, dev: &BridgedDevice, entry: &mut DeviceMetrics) {
        let mut metrics = Metrics::new();
        let mut errors = BTreeMap::new();
        for reader in &self.readers {
            match reader.read(self.ctrl.as_ref(), dev.node_id, dev).await {
                Ok(values) => metrics.extend(values),
                Err(e) => {
                    log::debug!("reader {} failed for {}: {}", reader.name(), dev.unique_id, e);
                    errors.insert(reader.name().to_owned(), e.to_string());
                }
            }
        }
        if !metrics.is_empty() {
            entry.metrics = Some(metrics);
        }
        if !errors.is_empty() {
            entry.errors = Some(errors);
        }
    }

    /// Poll now and then every `interval` until `cancel` fires or a poll fails.
    pub async fn watch<W: Write + Send>(
        &self,
        interval: Duration,
        w: &mut W,
        format: OutputFormat,
        cancel: CancellationToken,
    ) -> Result<()> {
        if interval.is_zero() {
            return Err(Error::InvalidArgument("watch interval must be positive".to_owned()));
        }
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            let result = self.poll_once().await?;
            write_poll_result(w, format, &result)?;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::debug!("watch cancelled");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::default_readers;
    use crate::scan::tests::TableController;
    use crate::services::tests::{sample_registry, store_with};
    use crate::store::MemoryStore;
    use crate::value::AttributeValue;

    #[tokio::test]
    async fn missing_device_without_readers() {
        let mut reg = sample_registry(42);
        reg.devices.retain(|id, _| id == "gone");
        let svc = PollService::new(Arc::new(TableController::default()), Arc::new(store_with(&reg)), vec![]);
        let res = svc.poll_once().await.unwrap();
        assert_eq!(res.devices.len(), 1);
        let dev = &res.devices[0];
        assert_eq!(dev.errors, device_error("device is marked missing"));
        assert!(dev.metrics.is_none());
        let v = serde_json::to_value(dev).unwrap();
        assert_eq!(v["errors"], serde_json::json!({"device": "device is marked missing"}));
        assert!(v.get("metrics").is_none());
        assert_eq!(v["missing"], true);
    }

    #[tokio::test]
    async fn partial_results() {
        let ctrl = Arc::new(TableController::default());
        // lamp: battery ok, reachable unreadable
        ctrl.set(3, 0x2f, 0x0c, Ok(AttributeValue::U8(150)));
        // lock: both readers succeed
        ctrl.set(4, 0x2f, 0x0c, Ok(AttributeValue::U8(200)));
        ctrl.set(4, 0x39, 0x11, Ok(AttributeValue::Bool(true)));
        let svc = PollService::new(ctrl, Arc::new(store_with(&sample_registry(42))), default_readers());
        let res = svc.poll_once().await.unwrap();
        let ids: Vec<&str> = res.devices.iter().map(|d| d.unique_id.as_str()).collect();
        assert_eq!(ids, vec!["gone", "lamp", "lock", "noep"]);

        let lamp = &res.devices[1];
        assert_eq!(lamp.node_id, 42);
        assert_eq!(lamp.metrics.as_ref().unwrap()["battery_percent"], 75.0);
        assert!(lamp.errors.as_ref().unwrap().contains_key("reachability"));

        let lock = &res.devices[2];
        assert_eq!(lock.metrics.as_ref().unwrap()["reachable"], true);
        assert!(lock.errors.is_none());

        assert_eq!(res.devices[3].errors, device_error("device endpoint is not set"));
    }

    #[tokio::test]
    async fn hub_node_unset() {
        let svc = PollService::new(Arc::new(TableController::default()), Arc::new(store_with(&sample_registry(0))), vec![]);
        let res = svc.poll_once().await.unwrap();
        assert_eq!(res.devices[1].errors, device_error("hub node id is not set"));
    }

    #[tokio::test]
    async fn empty_registry() {
        let svc = PollService::new(Arc::new(TableController::default()), Arc::new(MemoryStore::new()), default_readers());
        let res = svc.poll_once().await.unwrap();
        assert!(res.devices.is_empty());
        let v = serde_json::to_value(&res).unwrap();
        assert_eq!(v["devices"], serde_json::json!([]));
    }

    #[tokio::test(start_paused = true)]
    async fn watch_until_cancelled() {
        let svc = PollService::new(Arc::new(TableController::default()), Arc::new(store_with(&sample_registry(42))), vec![]);
        let cancel = CancellationToken::new();
        let c2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            c2.cancel();
        });
        let mut out = Vec::new();
        svc.watch(Duration::from_secs(1), &mut out, OutputFormat::JsonLines, cancel)
            .await
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        for line in lines {
            let v: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(v["devices"].as_array().unwrap().len(), 4);
        }
    }

    #[tokio::test]
    async fn watch_rejects_bad_input() {
        let svc = PollService::new(Arc::new(TableController::default()), Arc::new(MemoryStore::new()), vec![]);
        let mut out = Vec::new();
        assert!(matches!(
            svc.watch(Duration::ZERO, &mut out, OutputFormat::Json, CancellationToken::new()).await,
            Err(Error::InvalidArgument(_))
        ));
        let store = MemoryStore::new();
        store.fail_loads("gone");
        let svc = PollService::new(Arc::new(TableController::default()), Arc::new(store), vec![]);
        assert!(svc
            .watch(Duration::from_secs(1), &mut out, OutputFormat::Json, CancellationToken::new())
            .await
            .is_err());
        assert!("xml".parse::<OutputFormat>().is_err());
        assert_eq!("jsonl".parse::<OutputFormat>().unwrap(), OutputFormat::JsonLines);
    }
}
