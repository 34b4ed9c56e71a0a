use async_trait::async_trait;

use super::{read_required, MetricReader, Metrics};
use crate::clusters::defs;
use crate::controller::Controller;
use crate::error::{Error, Result};
use crate::scan::BridgedDevice;
use crate::value::AttributeValue;

const WHAT: &str = "battery percent remaining";

/// Battery level from the power source cluster, as `battery_percent`.
pub struct PowerSourceReader;

/// Decode BatPercentRemaining. Integers are half-percent units; floats are taken as percent.
pub fn parse_percent_remaining(value: &AttributeValue) -> Result<f64> {
    let half_units = match value {
        AttributeValue::F32(v) if *v < 0.0 => return Err(Error::out_of_range(WHAT, v)),
        AttributeValue::F32(v) => return Ok(*v as f64),
        AttributeValue::F64(v) if *v < 0.0 => return Err(Error::out_of_range(WHAT, v)),
        AttributeValue::F64(v) => return Ok(*v),
        other => match other.as_integer() {
            Some(v) if v < 0 => return Err(Error::out_of_range(WHAT, v)),
            Some(v) => v as f64,
            None => return Err(other.unsupported(WHAT)),
        },
    };
    Ok(half_units / 2.0)
}

#[async_trait]
impl MetricReader for PowerSourceReader {
    fn name(&self) -> &str {
        "power_source"
    }

    async fn read(&self, ctrl: &dyn Controller, node_id: u64, device: &BridgedDevice) -> Result<Metrics> {
        let raw = read_required(
            ctrl,
            node_id,
            device.endpoint,
            defs::CLUSTER_ID_POWER_SOURCE,
            defs::CLUSTER_POWER_SOURCE_ATTR_ID_BAT_PERCENT_REMAINING,
        )
        .await?;
        let percent = parse_percent_remaining(&raw)?;
        Ok(Metrics::from([("battery_percent".to_owned(), serde_json::Value::from(percent))]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_unit_scaling() {
        assert_eq!(parse_percent_remaining(&AttributeValue::U8(100)).unwrap(), 50.0);
        assert_eq!(parse_percent_remaining(&AttributeValue::U16(200)).unwrap(), 100.0);
        assert_eq!(parse_percent_remaining(&AttributeValue::I64(1)).unwrap(), 0.5);
        assert_eq!(parse_percent_remaining(&AttributeValue::F64(42.5)).unwrap(), 42.5);
        assert_eq!(parse_percent_remaining(&AttributeValue::I8(50)).unwrap(), 25.0);
        assert_eq!(parse_percent_remaining(&AttributeValue::U32(7)).unwrap(), 3.5);
    }

    #[test]
    fn rejects_negative_and_unknown() {
        assert!(matches!(
            parse_percent_remaining(&AttributeValue::I32(-1)),
            Err(Error::OutOfRange(_))
        ));
        assert!(matches!(
            parse_percent_remaining(&AttributeValue::I16(-3)),
            Err(Error::OutOfRange(_))
        ));
        assert!(matches!(
            parse_percent_remaining(&AttributeValue::F32(-0.5)),
            Err(Error::OutOfRange(_))
        ));
        assert!(matches!(
            parse_percent_remaining(&AttributeValue::String("50".into())),
            Err(Error::UnsupportedType { kind: "string", .. })
        ));
    }
}
