use crate::common::time::{Clock, SystemClock};
use crate::metrics::{MetricSample, MetricsRecorder, is_valid_label_name, is_valid_metric_name};
use crate::metrics_aggregate::ProbeInfo;
use crate::probe::{Labels, ProbeClass};
use crate::runtime::{Inflight, Probe, Worker};
use parking_lot::Mutex;
use prometheus::proto::MetricFamily;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_NAMESPACE: &str = "prober";

const RESERVED_LABELS: [&str; 2] = ["name", "class"];

#[derive(Debug, Error)]
pub enum ProberError {
    #[error("probe name must not be empty")]
    EmptyName,
    #[error("probe {name:?}: interval must be greater than zero")]
    InvalidInterval { name: String },
    #[error("probe {name:?}: invalid label name {label:?}")]
    InvalidLabel { name: String, label: String },
    #[error("probe {name:?}: label {label:?} is reserved")]
    ReservedLabel { name: String, label: String },
    #[error("invalid metric namespace {0:?}")]
    InvalidNamespace(String),
    #[error("failed to spawn probe thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("failed to build metrics: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error("metrics output is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[derive(Clone)]
pub struct Prober {
    shared: Arc<ProberShared>,
}

pub(crate) struct ProberShared {
    clock: Arc<dyn Clock>,
    recorder: MetricsRecorder,
    spread: bool,
    once: bool,
    probes: Mutex<BTreeMap<String, Arc<Probe>>>,
    inflight: Arc<Inflight>,
}

impl ProberShared {
    pub(crate) fn unregister(&self, probe: &Probe) {
        let mut probes = self.probes.lock();
        let current = probes
            .get(probe.name())
            .is_some_and(|existing| std::ptr::eq(Arc::as_ptr(existing), probe));
        if current {
            probes.remove(probe.name());
        }
    }
}

pub struct ProberBuilder {
    clock: Arc<dyn Clock>,
    namespace: String,
    spread: bool,
    once: bool,
}

impl ProberBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn spread(mut self, spread: bool) -> Self {
        self.spread = spread;
        self
    }

    pub fn once(mut self, once: bool) -> Self {
        self.once = once;
        self
    }

    pub fn build(self) -> Result<Prober, ProberError> {
        if !is_valid_metric_name(&self.namespace) {
            return Err(ProberError::InvalidNamespace(self.namespace));
        }
        Ok(self.into_prober())
    }

    fn into_prober(self) -> Prober {
        Prober {
            shared: Arc::new(ProberShared {
                clock: self.clock,
                recorder: MetricsRecorder::new(self.namespace),
                spread: self.spread,
                once: self.once,
                probes: Mutex::new(BTreeMap::new()),
                inflight: Arc::new(Inflight::default()),
            }),
        }
    }
}

impl Default for Prober {
    fn default() -> Self {
        Self::new()
    }
}

impl Prober {
    pub fn new() -> Self {
        Self::builder().into_prober()
    }

    pub fn builder() -> ProberBuilder {
        ProberBuilder {
            clock: Arc::new(SystemClock),
            namespace: DEFAULT_NAMESPACE.to_string(),
            spread: false,
            once: false,
        }
    }

    pub fn namespace(&self) -> &str {
        self.shared.recorder.namespace()
    }

    pub fn is_spread(&self) -> bool {
        self.shared.spread
    }

    pub fn is_once(&self) -> bool {
        self.shared.once
    }

    /// Registers and starts a probe.
    ///
    /// A probe already registered under `name` is stopped first; its loop
    /// has fully exited before the replacement's first iteration begins.
    /// `labels` are merged over the class labels.
    pub fn run(
        &self,
        name: impl Into<String>,
        interval: Duration,
        labels: Labels,
        class: impl Into<ProbeClass>,
    ) -> Result<Arc<Probe>, ProberError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ProberError::EmptyName);
        }
        if interval.is_zero() {
            return Err(ProberError::InvalidInterval { name });
        }

        let (target, class, mut merged) = class.into().into_parts();
        merged.extend(labels);
        validate_labels(&name, &merged)?;

        let (probe, signals) = Probe::new(
            name.clone(),
            interval,
            class,
            merged,
            Arc::downgrade(&self.shared),
        );
        let previous = self
            .shared
            .probes
            .lock()
            .insert(name.clone(), Arc::clone(&probe));
        if let Some(previous) = previous {
            debug!(probe = %name, "replacing probe");
            previous.stop();
        }

        let worker = Worker {
            signals,
            clock: Arc::clone(&self.shared.clock),
            target,
            once: self.shared.once,
            spread: self.shared.spread,
            inflight: self.shared.inflight.enter(),
        };
        if let Err(err) = probe.start(worker) {
            self.shared.unregister(&probe);
            return Err(err.into());
        }
        debug!(probe = %name, interval = ?interval, "probe registered");
        Ok(probe)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Probe>> {
        self.shared.probes.lock().get(name).cloned()
    }

    pub fn probes(&self) -> Vec<Arc<Probe>> {
        self.shared.probes.lock().values().cloned().collect()
    }

    pub fn active_probes(&self) -> usize {
        self.shared.probes.lock().len()
    }

    pub fn close(&self) {
        let probes = std::mem::take(&mut *self.shared.probes.lock());
        for probe in probes.values() {
            probe.stop();
        }
        debug!(count = probes.len(), "closed all probes");
    }

    /// Blocks until every launched probe loop has finished.
    ///
    /// In once mode this returns after each probe's single iteration,
    /// including probes registered by other probes while they ran.
    /// Periodic probes only finish when closed. There is no timeout.
    pub fn wait(&self) {
        self.shared.inflight.wait();
    }

    pub fn probe_info(&self) -> BTreeMap<String, ProbeInfo> {
        self.probes()
            .into_iter()
            .map(|probe| (probe.name().to_string(), probe.info()))
            .collect()
    }

    pub fn samples(&self) -> Vec<MetricSample> {
        self.shared.recorder.samples(&self.probes())
    }

    pub fn gather(&self) -> Result<Vec<MetricFamily>, ProberError> {
        Ok(self.shared.recorder.gather(&self.probes())?)
    }

    pub fn export(&self) -> Result<String, ProberError> {
        self.shared.recorder.export(&self.probes())
    }
}

fn validate_labels(name: &str, labels: &Labels) -> Result<(), ProberError> {
    for label in labels.keys() {
        if RESERVED_LABELS.contains(&label.as_str()) {
            return Err(ProberError::ReservedLabel {
                name: name.to_string(),
                label: label.clone(),
            });
        }
        if !is_valid_label_name(label) {
            return Err(ProberError::InvalidLabel {
                name: name.to_string(),
                label: label.clone(),
            });
        }
    }
    Ok(())
}
