use crate::errors::{Error, Result};
use crate::property::{ChangeCallback, Value};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tracing::info;

/// 9999-12-31T23:59:59Z. Later epochs leave no headroom for the offset.
const MAX_EPOCH_SECS: i64 = 253_402_300_799;

/// Wall clock corrected by the epoch the cloud pushes into `epoch_time`.
///
/// Until the first sync the system clock is used as-is.
#[derive(Debug, Clone, Default)]
pub struct StationClock {
    offset_ms: Arc<AtomicI64>,
    synced: Arc<AtomicBool>,
}

impl StationClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sync(&self, epoch_secs: i64) -> Result<DateTime<Utc>> {
        if !(0..=MAX_EPOCH_SECS).contains(&epoch_secs) {
            return Err(Error::InvalidEpoch(epoch_secs));
        }
        let cloud_time =
            DateTime::from_timestamp(epoch_secs, 0).ok_or(Error::InvalidEpoch(epoch_secs))?;

        let offset = (cloud_time - Utc::now()).num_milliseconds();
        self.offset_ms.store(offset, Ordering::SeqCst);
        self.synced.store(true, Ordering::SeqCst);
        Ok(cloud_time)
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    pub fn now(&self) -> DateTime<Utc> {
        let offset = Duration::milliseconds(self.offset_ms.load(Ordering::SeqCst));
        Utc::now()
            .checked_add_signed(offset)
            .unwrap_or_else(Utc::now)
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    /// Clock-update handler for the `epoch_time` property
    pub fn epoch_callback(&self) -> ChangeCallback {
        let clock = self.clone();
        Arc::new(move |value: &Value| -> Result<()> {
            let epoch = value
                .as_i64()
                .ok_or_else(|| Error::Validation(format!("epoch_time must be an integer, got {:?}", value)))?;
            let synced = clock.sync(epoch)?;
            info!("Station clock synced to {}", synced.to_rfc3339());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_moves_clock() {
        let clock = StationClock::new();
        assert!(!clock.is_synced());

        clock.sync(1_700_000_000).unwrap();
        assert!(clock.is_synced());

        let drift = (clock.now().timestamp() - 1_700_000_000).abs();
        assert!(drift <= 2, "clock drifted {}s", drift);
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2023, 11, 14).unwrap());
    }

    #[test]
    fn test_negative_epoch_rejected() {
        let clock = StationClock::new();
        assert!(matches!(clock.sync(-1), Err(Error::InvalidEpoch(-1))));
        assert!(!clock.is_synced());
    }

    #[test]
    fn test_far_future_epoch_rejected() {
        let clock = StationClock::new();
        let max = DateTime::<Utc>::MAX_UTC.timestamp();
        assert!(matches!(clock.sync(max), Err(Error::InvalidEpoch(_))));
        assert!(!clock.is_synced());
        // Still usable afterwards
        let _ = clock.today();

        clock.sync(MAX_EPOCH_SECS).unwrap();
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(9999, 12, 31).unwrap());
    }

    #[test]
    fn test_far_future_epoch_write_fails_soft() {
        use crate::properties::{init_properties, EPOCH_TIME};
        use crate::registry::PropertyRegistry;
        use tokio::time::Instant;

        let clock = StationClock::new();
        let mut registry = PropertyRegistry::new();
        init_properties(&mut registry, clock.epoch_callback()).unwrap();

        let max = DateTime::<Utc>::MAX_UTC.timestamp();
        let outcome = registry
            .apply_inbound(EPOCH_TIME, Value::Int(max), Instant::now())
            .unwrap();

        assert!(outcome.callback_failed);
        assert_eq!(registry.get(EPOCH_TIME).unwrap().value(), &Value::Int(max));
        assert!(!clock.is_synced());
        let drift = (clock.now() - Utc::now()).num_seconds().abs();
        assert!(drift <= 2, "clock moved by {}s", drift);
    }

    #[test]
    fn test_callback_rejects_non_integer() {
        let clock = StationClock::new();
        let callback = clock.epoch_callback();
        assert!(callback(&Value::Text("noon".into())).is_err());
        assert!(callback(&Value::Int(1_700_000_000)).is_ok());
        assert!(clock.is_synced());
    }
}
