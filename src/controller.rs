//! Operational controller seam.
//!
//! The hub core never talks to devices directly. Everything goes through a [Controller]
//! that owns secure sessions to commissioned nodes. [NoopController] is the default
//! when no live controller is linked in; every call fails with
//! [ControllerUnavailable](crate::error::Error::ControllerUnavailable).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::value::AttributeValue;

#[async_trait]
pub trait Controller: Send + Sync {
    /// Check that node answers.
    async fn ping(&self, node_id: u64) -> Result<()>;

    /// Read attribute. A device reporting no value returns `Ok(AttributeValue::Null)`
    /// or `Err(Error::AttributeUnavailable)`; callers treat both the same.
    async fn read_attribute(
        &self,
        node_id: u64,
        endpoint: u16,
        cluster: u32,
        attr: u32,
    ) -> Result<AttributeValue>;

    async fn write_attribute(
        &self,
        node_id: u64,
        endpoint: u16,
        cluster: u32,
        attr: u32,
        value: AttributeValue,
    ) -> Result<()>;

    /// Invoke cluster command. `payload` is TLV encoded command fields (may be empty).
    async fn invoke_command(
        &self,
        node_id: u64,
        endpoint: u16,
        cluster: u32,
        command: u32,
        payload: &[u8],
    ) -> Result<AttributeValue>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopController;

#[async_trait]
impl Controller for NoopController {
    async fn ping(&self, _node_id: u64) -> Result<()> {
        Err(Error::ControllerUnavailable)
    }

    async fn read_attribute(&self, _: u64, _: u16, _: u32, _: u32) -> Result<AttributeValue> {
        Err(Error::ControllerUnavailable)
    }

    async fn write_attribute(&self, _: u64, _: u16, _: u32, _: u32, _: AttributeValue) -> Result<()> {
        Err(Error::ControllerUnavailable)
    }

    async fn invoke_command(&self, _: u64, _: u16, _: u32, _: u32, _: &[u8]) -> Result<AttributeValue> {
        Err(Error::ControllerUnavailable)
    }
}

/// Wraps another controller and bounds every call by a fixed timeout.
pub struct TimeoutController {
    inner: Arc<dyn Controller>,
    timeout: Duration,
}

impl TimeoutController {
    pub fn new(inner: Arc<dyn Controller>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl Controller for TimeoutController {
    async fn ping(&self, node_id: u64) -> Result<()> {
        tokio::time::timeout(self.timeout, self.inner.ping(node_id)).await?
    }

    async fn read_attribute(
        &self,
        node_id: u64,
        endpoint: u16,
        cluster: u32,
        attr: u32,
    ) -> Result<AttributeValue> {
        tokio::time::timeout(
            self.timeout,
            self.inner.read_attribute(node_id, endpoint, cluster, attr),
        )
        .await?
    }

    async fn write_attribute(
        &self,
        node_id: u64,
        endpoint: u16,
        cluster: u32,
        attr: u32,
        value: AttributeValue,
    ) -> Result<()> {
        tokio::time::timeout(
            self.timeout,
            self.inner.write_attribute(node_id, endpoint, cluster, attr, value),
        )
        .await?
    }

    async fn invoke_command(
        &self,
        node_id: u64,
        endpoint: u16,
        cluster: u32,
        command: u32,
        payload: &[u8],
    ) -> Result<AttributeValue> {
        tokio::time::timeout(
            self.timeout,
            self.inner.invoke_command(node_id, endpoint, cluster, command, payload),
        )
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Slow;

    #[async_trait]
    impl Controller for Slow {
        async fn ping(&self, _: u64) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
        async fn read_attribute(&self, _: u64, _: u16, _: u32, _: u32) -> Result<AttributeValue> {
            Ok(AttributeValue::U8(1))
        }
        async fn write_attribute(&self, _: u64, _: u16, _: u32, _: u32, _: AttributeValue) -> Result<()> {
            Ok(())
        }
        async fn invoke_command(&self, _: u64, _: u16, _: u32, _: u32, _: &[u8]) -> Result<AttributeValue> {
            Ok(AttributeValue::Null)
        }
    }

    #[tokio::test]
    async fn noop_is_unavailable() {
        let c = NoopController;
        assert!(matches!(c.ping(1).await, Err(Error::ControllerUnavailable)));
        assert!(matches!(
            c.read_attribute(1, 1, 6, 0).await,
            Err(Error::ControllerUnavailable)
        ));
        assert!(matches!(
            c.invoke_command(1, 1, 6, 1, &[]).await,
            Err(Error::ControllerUnavailable)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_wrapper() {
        let c = TimeoutController::new(Arc::new(Slow), Duration::from_millis(100));
        assert!(matches!(c.ping(1).await, Err(Error::Timeout)));
        assert_eq!(c.read_attribute(1, 1, 6, 0).await.unwrap(), AttributeValue::U8(1));
    }
}
