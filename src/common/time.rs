pub mod fake;

use crossbeam_channel::Receiver;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Source of wall-clock time and periodic wakeups for the probe loops.
///
/// Scheduling code only ever talks to this trait, so tests can swap in
/// [`fake::FakeClock`] and drive virtual time by hand.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;

    fn new_ticker(&self, interval: Duration) -> Box<dyn Ticker>;
}

/// A repeating wakeup.
///
/// The channel holds at most one pending tick; ticks emitted while the
/// previous one is still unconsumed are dropped. Consumers treat a tick as
/// "time to run", not as a count of elapsed intervals.
pub trait Ticker: Send {
    fn chan(&self) -> &Receiver<Instant>;

    /// Permanently silences the ticker.
    fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn new_ticker(&self, interval: Duration) -> Box<dyn Ticker> {
        Box::new(SystemTicker {
            rx: crossbeam_channel::tick(interval),
        })
    }
}

struct SystemTicker {
    rx: Receiver<Instant>,
}

impl Ticker for SystemTicker {
    fn chan(&self) -> &Receiver<Instant> {
        &self.rx
    }

    fn stop(&mut self) {
        self.rx = crossbeam_channel::never();
    }
}

/// Whole seconds since the Unix epoch, negative for earlier times.
pub fn unix_seconds(ts: SystemTime) -> i64 {
    match ts.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs() as i64,
        Err(err) => -(err.duration().as_secs() as i64),
    }
}

/// Milliseconds since the Unix epoch, negative for earlier times.
pub fn unix_millis(ts: SystemTime) -> i64 {
    match ts.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_millis() as i64,
        Err(err) => -(err.duration().as_millis() as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_seconds_truncates_sub_second_part() {
        let ts = UNIX_EPOCH + Duration::from_millis(12_020);
        assert_eq!(unix_seconds(ts), 12);
        assert_eq!(unix_millis(ts), 12_020);
    }

    #[test]
    fn unix_seconds_before_epoch_is_negative() {
        let ts = UNIX_EPOCH - Duration::from_secs(5);
        assert_eq!(unix_seconds(ts), -5);
    }

    #[test]
    fn system_ticker_stop_silences_channel() {
        let mut ticker = SystemClock.new_ticker(Duration::from_millis(1));
        ticker
            .chan()
            .recv_timeout(Duration::from_secs(2))
            .expect("tick");
        ticker.stop();
        assert!(
            ticker
                .chan()
                .recv_timeout(Duration::from_millis(20))
                .is_err()
        );
    }
}
