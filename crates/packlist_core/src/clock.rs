//! Hybrid logical write clock.
//!
//! # Responsibility
//! - Stamp local field writes with `uhlc` timestamps.
//! - Observe stamps pulled from peers so later local writes order after them.
//!
//! # Invariants
//! - Stamps from one clock strictly increase.
//! - The clock id is the device id; stamps carry the same device.
//! - Remote stamps further ahead than `MAX_CLOCK_DRIFT` are not adopted.

use crate::model::entity::{DeviceId, FieldStamp};
use log::warn;
use std::time::Duration;
use uhlc::{HLCBuilder, Timestamp, HLC, ID, NTP64};

/// Largest lead a peer's stamp may have over the local wall clock.
pub const MAX_CLOCK_DRIFT: Duration = Duration::from_secs(60);

/// Per-device hybrid logical clock.
pub struct WriteClock {
    hlc: HLC,
    device: DeviceId,
}

impl WriteClock {
    pub fn new(device: DeviceId) -> Self {
        let builder = HLCBuilder::new().with_max_delta(MAX_CLOCK_DRIFT);
        let builder = match hlc_id(device) {
            Some(id) => builder.with_id(id),
            None => {
                warn!(
                    "event=clock_init module=clock status=fallback reason=nil_device_id device={}",
                    device
                );
                builder
            }
        };
        Self {
            hlc: builder.build(),
            device,
        }
    }

    /// Next stamp for a local write.
    pub fn stamp(&self) -> FieldStamp {
        let timestamp = self.hlc.new_timestamp();
        FieldStamp::new(timestamp.get_time().as_u64(), self.device)
    }

    /// Advances the clock past a stamp seen from another replica.
    pub fn observe(&self, stamp: &FieldStamp) {
        let Some(id) = hlc_id(stamp.device) else {
            return;
        };
        let received = Timestamp::new(NTP64(stamp.time), id);
        if let Err(err) = self.hlc.update_with_timestamp(&received) {
            warn!(
                "event=clock_observe module=clock status=rejected device={} error={}",
                stamp.device, err
            );
        }
    }
}

fn hlc_id(device: DeviceId) -> Option<ID> {
    ID::try_from(*device.as_bytes()).ok()
}

/// Current wall-clock time in Unix epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    i64::try_from(uhlc::system_time_clock().to_duration().as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::{now_epoch_ms, WriteClock};
    use crate::model::entity::FieldStamp;
    use uuid::Uuid;

    const ONE_SECOND: u64 = 1 << 32;

    fn now_ntp64() -> u64 {
        uhlc::system_time_clock().as_u64()
    }

    #[test]
    fn stamps_increase_and_carry_the_device() {
        let device = Uuid::from_u128(7);
        let clock = WriteClock::new(device);
        let first = clock.stamp();
        let second = clock.stamp();
        assert!(second > first);
        assert_eq!(second.device, device);
        assert!((second.epoch_ms() - now_epoch_ms()).abs() < 5_000);
    }

    #[test]
    fn observed_peer_stamp_orders_before_next_local_write() {
        let clock = WriteClock::new(Uuid::from_u128(1));
        let ahead = FieldStamp::new(now_ntp64() + 2 * ONE_SECOND, Uuid::from_u128(2));
        clock.observe(&ahead);
        assert!(clock.stamp().time > ahead.time);
    }

    #[test]
    fn stamps_beyond_the_drift_limit_are_ignored() {
        let clock = WriteClock::new(Uuid::from_u128(1));
        let runaway = FieldStamp::new(now_ntp64() + 3_600 * ONE_SECOND, Uuid::from_u128(2));
        clock.observe(&runaway);
        assert!(clock.stamp().time < runaway.time);
    }

    #[test]
    fn nil_device_still_gets_a_working_clock() {
        let clock = WriteClock::new(Uuid::nil());
        assert!(clock.stamp() < clock.stamp());
    }
}
