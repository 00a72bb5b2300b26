//! Wall-clock abstraction so time-dependent behavior is testable.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// A point in time, stored as nanoseconds since the unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Time(i64);

impl Time {
    pub fn from_timestamp_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub fn from_datetime(datetime: DateTime<Utc>) -> Self {
        Self(
            datetime
                .timestamp_nanos_opt()
                .expect("timestamp fits in 64 bits of nanoseconds"),
        )
    }

    pub fn timestamp_nanos(&self) -> i64 {
        self.0
    }

    pub fn checked_add(&self, duration: Duration) -> Option<Self> {
        let nanos = i64::try_from(duration.as_nanos()).ok()?;
        self.0.checked_add(nanos).map(Self)
    }

    /// Duration since `earlier`, or `None` if `earlier` is in the future.
    pub fn checked_duration_since(&self, earlier: Self) -> Option<Duration> {
        let nanos = self.0.checked_sub(earlier.0)?;
        u64::try_from(nanos).ok().map(Duration::from_nanos)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", DateTime::<Utc>::from_timestamp_nanos(self.0))
    }
}

pub trait TimeProvider: fmt::Debug + Send + Sync + 'static {
    /// The current instant.
    fn now(&self) -> Time;
}

/// [`TimeProvider`] backed by the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProvider;

impl SystemProvider {
    pub fn new() -> Self {
        Self
    }
}

impl TimeProvider for SystemProvider {
    fn now(&self) -> Time {
        Time::from_datetime(Utc::now())
    }
}

/// [`TimeProvider`] for tests, advanced manually.
#[derive(Debug)]
pub struct MockProvider {
    now: parking_lot::RwLock<Time>,
}

impl MockProvider {
    pub fn new(start: Time) -> Self {
        Self {
            now: parking_lot::RwLock::new(start),
        }
    }

    pub fn set(&self, time: Time) {
        *self.now.write() = time;
    }

    /// Advances the clock and returns the new instant.
    pub fn inc(&self, duration: Duration) -> Time {
        let mut now = self.now.write();
        *now = now
            .checked_add(duration)
            .expect("mock clock advanced past the end of time");
        *now
    }
}

impl TimeProvider for MockProvider {
    fn now(&self) -> Time {
        *self.now.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_provider_advances() {
        let provider = MockProvider::new(Time::from_timestamp_nanos(0));
        assert_eq!(provider.now(), Time::from_timestamp_nanos(0));
        provider.inc(Duration::from_secs(1));
        assert_eq!(provider.now(), Time::from_timestamp_nanos(1_000_000_000));
    }

    #[test]
    fn duration_since_is_none_for_future_instants() {
        let earlier = Time::from_timestamp_nanos(10);
        let later = Time::from_timestamp_nanos(30);
        assert_eq!(
            later.checked_duration_since(earlier),
            Some(Duration::from_nanos(20))
        );
        assert_eq!(earlier.checked_duration_since(later), None);
    }
}
