use crate::common::time::{Clock, unix_millis};
use crate::metrics_aggregate::{ProbeInfo, ProbeStatus, RecentHistory, millis_f64};
use crate::probe::{Context, Labels, ProbeError, ProbeErrorKind, ProbeResult, ProbeTarget};
use crate::prober::ProberShared;
use crossbeam_channel::{Receiver, Sender, TryRecvError, select};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, warn};

const TIMEOUT_FRACTION: f64 = 0.8;

#[derive(Clone, Debug, PartialEq)]
pub struct ProbeSnapshot {
    pub start: SystemTime,
    pub end: SystemTime,
    pub latency: Duration,
    pub succeeded: bool,
    pub error: Option<ProbeError>,
}

#[derive(Default)]
struct ProbeState {
    last: Option<ProbeSnapshot>,
    history: RecentHistory,
}

pub struct Probe {
    name: String,
    interval: Duration,
    initial_delay: Duration,
    class: String,
    labels: Labels,
    state: Mutex<ProbeState>,
    stop_tx: Mutex<Option<Sender<()>>>,
    done_rx: Receiver<()>,
    loop_thread: Mutex<Option<JoinHandle<()>>>,
    loop_thread_id: OnceLock<ThreadId>,
    prober: Weak<ProberShared>,
}

pub(crate) struct LoopSignals {
    stop_rx: Receiver<()>,
    done_tx: Sender<()>,
}

pub(crate) struct Worker {
    pub(crate) signals: LoopSignals,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) target: Arc<dyn ProbeTarget>,
    pub(crate) once: bool,
    pub(crate) spread: bool,
    pub(crate) inflight: InflightGuard,
}

impl Worker {
    fn stopped(&self) -> bool {
        matches!(
            self.signals.stop_rx.try_recv(),
            Err(TryRecvError::Disconnected)
        )
    }
}

impl Probe {
    pub(crate) fn new(
        name: String,
        interval: Duration,
        class: String,
        labels: Labels,
        prober: Weak<ProberShared>,
    ) -> (Arc<Self>, LoopSignals) {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(0);
        let (done_tx, done_rx) = crossbeam_channel::bounded(0);
        let probe = Arc::new(Self {
            initial_delay: initial_delay(&name, interval),
            name,
            interval,
            class,
            labels,
            state: Mutex::new(ProbeState::default()),
            stop_tx: Mutex::new(Some(stop_tx)),
            done_rx,
            loop_thread: Mutex::new(None),
            loop_thread_id: OnceLock::new(),
            prober,
        });
        (probe, LoopSignals { stop_rx, done_tx })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn last_result(&self) -> Option<ProbeSnapshot> {
        self.state.lock().last.clone()
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self.done_rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    pub fn info(&self) -> ProbeInfo {
        let state = self.state.lock();
        let last = state.last.as_ref();
        let status = match last {
            None => ProbeStatus::Unknown,
            Some(snapshot) if snapshot.succeeded => ProbeStatus::Succeeded,
            Some(_) => ProbeStatus::Failed,
        };
        ProbeInfo {
            name: self.name.clone(),
            class: self.class.clone(),
            labels: self.labels.clone(),
            interval_secs: self.interval.as_secs_f64(),
            status,
            start_unix_ms: last.map(|s| unix_millis(s.start)),
            end_unix_ms: last.map(|s| unix_millis(s.end)),
            latency_ms: last.map(|s| millis_f64(s.latency)),
            error: last.and_then(|s| s.error.as_ref()).map(ToString::to_string),
            recent_results: state.history.results(),
            recent_latencies_ms: state
                .history
                .latencies()
                .into_iter()
                .map(millis_f64)
                .collect(),
            recent_success_ratio: state.history.success_ratio(),
            recent_median_latency_ms: state.history.median_latency().map(millis_f64),
        }
    }

    /// Stops the probe and removes it from its registry.
    ///
    /// Blocks until the run loop has exited, except when called from the
    /// probe's own target, where the loop exits as soon as the target
    /// returns. Closing an already closed probe does nothing.
    pub fn close(&self) {
        self.stop();
        if let Some(prober) = self.prober.upgrade() {
            prober.unregister(self);
        }
    }

    pub(crate) fn stop(&self) {
        drop(self.stop_tx.lock().take());
        if self.loop_thread_id.get() == Some(&thread::current().id()) {
            return;
        }
        let _ = self.done_rx.recv();
        let handle = self.loop_thread.lock().take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            error!(probe = %self.name, "probe loop thread panicked");
        }
    }

    pub(crate) fn start(self: &Arc<Self>, worker: Worker) -> std::io::Result<()> {
        if self.stop_tx.lock().is_none() {
            // replaced before it ever ran
            return Ok(());
        }
        let probe = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("probe:{}", self.name))
            .spawn(move || probe.run_loop(worker))?;
        *self.loop_thread.lock() = Some(handle);
        Ok(())
    }

    fn run_loop(self: Arc<Self>, worker: Worker) {
        let _ = self.loop_thread_id.set(thread::current().id());
        debug!(probe = %self.name, interval = ?self.interval, "probe loop started");

        if worker.spread && !self.initial_delay.is_zero() && !self.wait_initial_delay(&worker) {
            debug!(probe = %self.name, "probe stopped during initial delay");
            return;
        }
        if worker.stopped() {
            debug!(probe = %self.name, "probe stopped before first run");
            return;
        }

        if worker.once {
            self.run_iteration(&worker);
            debug!(probe = %self.name, "probe finished single run");
            return;
        }

        let mut tick = worker.clock.new_ticker(self.interval);
        self.run_iteration(&worker);
        while !worker.stopped() {
            select! {
                recv(tick.chan()) -> _ => {
                    if worker.stopped() {
                        break;
                    }
                    self.run_iteration(&worker);
                }
                recv(worker.signals.stop_rx) -> _ => break,
            }
        }
        tick.stop();
        debug!(probe = %self.name, "probe loop stopped");
    }

    fn wait_initial_delay(&self, worker: &Worker) -> bool {
        let mut delay = worker.clock.new_ticker(self.initial_delay);
        let elapsed = select! {
            recv(delay.chan()) -> _ => true,
            recv(worker.signals.stop_rx) -> _ => false,
        };
        delay.stop();
        elapsed
    }

    fn run_iteration(&self, worker: &Worker) {
        let timeout = self.interval.mul_f64(TIMEOUT_FRACTION);
        let ctx = Context::new(worker.signals.stop_rx.clone(), timeout);

        let start = worker.clock.now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker.target.execute(&ctx)))
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                warn!(probe = %self.name, "probe target panicked: {message}");
                Err(ProbeError::new(
                    ProbeErrorKind::Panicked,
                    format!("probe panicked: {message}"),
                ))
            });
        let end = worker.clock.now();

        if let Err(err) = &outcome {
            debug!(probe = %self.name, kind = %err.kind, "probe failed: {err}");
        }
        self.record(start, end, outcome);
    }

    pub(crate) fn record(&self, start: SystemTime, end: SystemTime, outcome: ProbeResult) {
        let latency = end.duration_since(start).unwrap_or_default();
        let succeeded = outcome.is_ok();
        let mut state = self.state.lock();
        state.history.push(succeeded, latency);
        state.last = Some(ProbeSnapshot {
            start,
            end,
            latency,
            succeeded,
            error: outcome.err(),
        });
    }
}

impl std::fmt::Debug for Probe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Probe")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("class", &self.class)
            .field("labels", &self.labels)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

pub fn initial_delay(name: &str, interval: Duration) -> Duration {
    let hash = xxhash_rust::xxh64::xxh64(name.as_bytes(), 0);
    let fraction = (hash >> 11) as f64 / (1u64 << 53) as f64;
    let delay = interval.mul_f64(fraction);
    if delay >= interval {
        interval.saturating_sub(Duration::from_nanos(1))
    } else {
        delay
    }
}

#[derive(Default)]
pub(crate) struct Inflight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Inflight {
    pub(crate) fn enter(self: &Arc<Self>) -> InflightGuard {
        *self.count.lock() += 1;
        InflightGuard(Arc::clone(self))
    }

    pub(crate) fn wait(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.idle.wait(&mut count);
        }
    }
}

pub(crate) struct InflightGuard(Arc<Inflight>);

impl Drop for InflightGuard {
    fn drop(&mut self) {
        let mut count = self.0.count.lock();
        *count -= 1;
        if *count == 0 {
            self.0.idle.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::time::fake::FakeClock;
    use crate::probe::FuncProbe;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::UNIX_EPOCH;

    fn detached(name: &str, interval: Duration) -> Arc<Probe> {
        let (probe, _signals) = Probe::new(
            name.to_string(),
            interval,
            String::new(),
            Labels::new(),
            Weak::new(),
        );
        probe
    }

    fn stopped_before_start(once: bool) -> (FakeClock, Arc<AtomicUsize>, Arc<Probe>) {
        let clock = FakeClock::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let (probe, signals) = Probe::new(
            "late".to_string(),
            Duration::from_secs(8),
            String::new(),
            Labels::new(),
            Weak::new(),
        );
        let target = {
            let runs = Arc::clone(&runs);
            FuncProbe::new(move |_: &Context| {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        let worker = Worker {
            signals,
            clock: Arc::new(clock.clone()),
            target: Arc::new(target),
            once,
            spread: false,
            inflight: Arc::new(Inflight::default()).enter(),
        };

        // replaced after `start` but before the loop thread got going
        drop(probe.stop_tx.lock().take());
        Arc::clone(&probe).run_loop(worker);
        (clock, runs, probe)
    }

    #[test]
    fn loop_stopped_before_first_run_never_executes_target() {
        for once in [false, true] {
            let (clock, runs, probe) = stopped_before_start(once);
            assert_eq!(runs.load(Ordering::SeqCst), 0, "once={once}");
            assert!(clock.tickers().is_empty(), "once={once}");
            assert!(probe.last_result().is_none());
            assert!(probe.is_stopped());
        }
    }

    #[test]
    fn initial_delay_is_deterministic_and_below_interval() {
        let interval = Duration::from_secs(8);
        for name in ["a", "probe-b", "test-spread-probe", "dns/eu-west"] {
            let delay = initial_delay(name, interval);
            assert!(delay < interval, "{name}: {delay:?}");
            assert_eq!(delay, initial_delay(name, interval));
        }
        assert_ne!(
            initial_delay("probe-a", interval),
            initial_delay("probe-b", interval)
        );
    }

    #[test]
    fn initial_delay_handles_tiny_intervals() {
        let interval = Duration::from_nanos(1);
        assert_eq!(initial_delay("anything", interval), Duration::ZERO);
    }

    #[test]
    fn record_keeps_latest_snapshot() {
        let probe = detached("p", Duration::from_secs(8));
        assert!(probe.last_result().is_none());
        assert_eq!(probe.info().status, ProbeStatus::Unknown);

        let start = UNIX_EPOCH + Duration::from_secs(100);
        probe.record(start, start + Duration::from_millis(20), Ok(()));
        probe.record(
            start + Duration::from_secs(8),
            start + Duration::from_secs(9),
            Err(ProbeError::failed("down")),
        );

        let last = probe.last_result().expect("snapshot");
        assert!(!last.succeeded);
        assert_eq!(last.latency, Duration::from_secs(1));
        assert_eq!(last.error.map(|e| e.message), Some("down".to_string()));

        let info = probe.info();
        assert_eq!(info.status, ProbeStatus::Failed);
        assert_eq!(info.recent_results, vec![true, false]);
        assert_eq!(info.error.as_deref(), Some("down"));
        assert_eq!(info.start_unix_ms, Some(108_000));
    }

    #[test]
    fn record_clamps_backwards_clock_to_zero_latency() {
        let probe = detached("p", Duration::from_secs(8));
        let start = UNIX_EPOCH + Duration::from_secs(10);
        probe.record(start, start - Duration::from_secs(1), Ok(()));
        assert_eq!(
            probe.last_result().map(|s| s.latency),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn inflight_wait_returns_after_all_guards_drop() {
        let inflight = Arc::new(Inflight::default());
        let first = inflight.enter();
        let second = inflight.enter();
        let waiter = {
            let inflight = Arc::clone(&inflight);
            thread::spawn(move || inflight.wait())
        };
        drop(first);
        drop(second);
        waiter.join().expect("waiter");
        inflight.wait();
    }

    #[test]
    fn panic_message_extracts_strings() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
