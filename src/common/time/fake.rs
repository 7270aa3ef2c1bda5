//! Virtual clock for deterministic scheduling tests.
//!
//! Time only moves when [`FakeClock::advance`] or [`FakeClock::set`] is
//! called. Tickers created through the clock fire when virtual time moves
//! strictly past their next deadline. Unlike a real periodic timer there is
//! no catch-up: one tick is delivered no matter how many intervals were
//! skipped, and the deadline jumps forward to the first one not in the past.

use super::{Clock, Ticker};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TickerInfo {
    pub interval: Duration,
    pub stopped: bool,
}

#[derive(Clone)]
pub struct FakeClock {
    inner: Arc<Mutex<FakeTime>>,
}

struct FakeTime {
    now: SystemTime,
    tickers: Vec<Arc<FakeTickerShared>>,
}

struct FakeTickerShared {
    tx: Sender<Instant>,
    interval: Duration,
    state: Mutex<FakeTickerState>,
}

struct FakeTickerState {
    next: SystemTime,
    stopped: bool,
}

impl FakeTickerShared {
    fn fire(&self, now: SystemTime) {
        let mut state = self.state.lock();
        if state.stopped {
            return;
        }
        let _ = self.tx.try_send(Instant::now());
        while now > state.next {
            state.next += self.interval;
        }
    }
}

impl FakeClock {
    /// A clock parked at the Unix epoch.
    pub fn new() -> Self {
        Self::starting_at(UNIX_EPOCH)
    }

    pub fn starting_at(now: SystemTime) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeTime {
                now,
                tickers: Vec::new(),
            })),
        }
    }

    /// Moves virtual time forward and fires every ticker whose deadline
    /// has been passed.
    pub fn advance(&self, by: Duration) {
        let mut time = self.inner.lock();
        time.now += by;
        let now = time.now;
        for ticker in &time.tickers {
            let due = now > ticker.state.lock().next;
            if due {
                ticker.fire(now);
            }
        }
    }

    /// Jumps to an absolute time without firing any ticker.
    pub fn set(&self, now: SystemTime) {
        self.inner.lock().now = now;
    }

    pub fn active_tickers(&self) -> usize {
        self.tickers().iter().filter(|info| !info.stopped).count()
    }

    pub fn has_active_ticker(&self, interval: Duration) -> bool {
        self.tickers()
            .iter()
            .any(|info| !info.stopped && info.interval == interval)
    }

    /// Every ticker ever created through this clock, in creation order.
    pub fn tickers(&self) -> Vec<TickerInfo> {
        let time = self.inner.lock();
        time.tickers
            .iter()
            .map(|ticker| TickerInfo {
                interval: ticker.interval,
                stopped: ticker.state.lock().stopped,
            })
            .collect()
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> SystemTime {
        self.inner.lock().now
    }

    fn new_ticker(&self, interval: Duration) -> Box<dyn Ticker> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let mut time = self.inner.lock();
        let shared = Arc::new(FakeTickerShared {
            tx,
            interval,
            state: Mutex::new(FakeTickerState {
                next: time.now + interval,
                stopped: false,
            }),
        });
        time.tickers.push(Arc::clone(&shared));
        Box::new(FakeTicker { rx, shared })
    }
}

struct FakeTicker {
    rx: Receiver<Instant>,
    shared: Arc<FakeTickerShared>,
}

impl Ticker for FakeTicker {
    fn chan(&self) -> &Receiver<Instant> {
        &self.rx
    }

    fn stop(&mut self) {
        self.shared.state.lock().stopped = true;
    }
}

impl Drop for FakeTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(8);

    #[test]
    fn ticker_fires_only_after_deadline_passes() {
        let clock = FakeClock::new();
        let ticker = clock.new_ticker(INTERVAL);

        clock.advance(INTERVAL);
        assert!(ticker.chan().try_recv().is_err(), "deadline is exclusive");

        clock.advance(Duration::from_millis(1));
        assert!(ticker.chan().try_recv().is_ok());
        assert!(ticker.chan().try_recv().is_err());
    }

    #[test]
    fn missed_intervals_collapse_into_one_tick() {
        let clock = FakeClock::new();
        let ticker = clock.new_ticker(INTERVAL);

        clock.advance(INTERVAL * 3 + Duration::from_secs(1));
        assert!(ticker.chan().try_recv().is_ok());
        assert!(ticker.chan().try_recv().is_err());

        // next deadline is 32s, we are at 25s
        clock.advance(Duration::from_secs(6));
        assert!(ticker.chan().try_recv().is_err());
        clock.advance(Duration::from_secs(2));
        assert!(ticker.chan().try_recv().is_ok());
    }

    #[test]
    fn stopped_and_dropped_tickers_are_inactive() {
        let clock = FakeClock::new();
        let mut first = clock.new_ticker(INTERVAL);
        let second = clock.new_ticker(INTERVAL / 2);
        assert_eq!(clock.active_tickers(), 2);
        assert!(clock.has_active_ticker(INTERVAL / 2));

        first.stop();
        assert_eq!(clock.active_tickers(), 1);
        clock.advance(INTERVAL * 2);
        assert!(first.chan().try_recv().is_err());

        drop(second);
        assert_eq!(clock.active_tickers(), 0);
        assert_eq!(clock.tickers().len(), 2);
    }

    #[test]
    fn set_moves_time_without_firing() {
        let clock = FakeClock::new();
        let ticker = clock.new_ticker(INTERVAL);
        let later = UNIX_EPOCH + INTERVAL * 4;

        clock.set(later);
        assert_eq!(clock.now(), later);
        assert!(ticker.chan().try_recv().is_err());
    }
}
