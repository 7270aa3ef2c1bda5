//! Translates probe state into Prometheus gauges.
//!
//! Nothing is pushed from the run loops: every read takes a fresh snapshot
//! of each probe under its own lock and builds the samples from it.

use crate::common::time::unix_seconds;
use crate::prober::ProberError;
use crate::runtime::Probe;
use prometheus::core::Collector;
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, Gauge, Opts, TextEncoder};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Family {
    IntervalSecs,
    StartSecs,
    EndSecs,
    LatencyMillis,
    Result,
}

impl Family {
    pub const ALL: [Family; 5] = [
        Family::IntervalSecs,
        Family::StartSecs,
        Family::EndSecs,
        Family::LatencyMillis,
        Family::Result,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            Family::IntervalSecs => "interval_secs",
            Family::StartSecs => "start_secs",
            Family::EndSecs => "end_secs",
            Family::LatencyMillis => "latency_millis",
            Family::Result => "result",
        }
    }

    pub fn help(self) -> &'static str {
        match self {
            Family::IntervalSecs => "Probe interval in seconds",
            Family::StartSecs => "Latest probe start time (seconds since epoch)",
            Family::EndSecs => "Latest probe end time (seconds since epoch)",
            Family::LatencyMillis => "Latest probe latency (ms)",
            Family::Result => "Latest probe result (1 = success, 0 = failure)",
        }
    }
}

/// One gauge value with its full label set (`name`, `class` and the
/// probe's own labels).
#[derive(Clone, Debug, PartialEq)]
pub struct MetricSample {
    pub family: Family,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

impl MetricSample {
    pub fn probe_name(&self) -> &str {
        self.labels.get("name").map(String::as_str).unwrap_or_default()
    }
}

#[derive(Clone, Debug)]
pub struct MetricsRecorder {
    namespace: String,
}

impl MetricsRecorder {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn metric_name(&self, family: Family) -> String {
        format!("{}_{}", self.namespace, family.suffix())
    }

    pub fn samples(&self, probes: &[Arc<Probe>]) -> Vec<MetricSample> {
        probes.iter().flat_map(|probe| probe_samples(probe)).collect()
    }

    /// Builds one metric family per gauge name across all probes.
    pub fn gather(&self, probes: &[Arc<Probe>]) -> prometheus::Result<Vec<MetricFamily>> {
        let mut families: BTreeMap<String, MetricFamily> = BTreeMap::new();
        for sample in self.samples(probes) {
            let name = self.metric_name(sample.family);
            let const_labels: HashMap<String, String> = sample.labels.into_iter().collect();
            let gauge = Gauge::with_opts(
                Opts::new(name.clone(), sample.family.help()).const_labels(const_labels),
            )?;
            gauge.set(sample.value);

            for mut family in gauge.collect() {
                match families.entry(name.clone()) {
                    Entry::Occupied(mut existing) => {
                        for metric in family.take_metric() {
                            existing.get_mut().mut_metric().push(metric);
                        }
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(family);
                    }
                }
            }
        }

        let order: HashMap<String, usize> = Family::ALL
            .iter()
            .enumerate()
            .map(|(idx, family)| (self.metric_name(*family), idx))
            .collect();
        let mut gathered: Vec<(String, MetricFamily)> = families.into_iter().collect();
        gathered.sort_by_key(|(name, _)| order.get(name).copied().unwrap_or(usize::MAX));
        Ok(gathered.into_iter().map(|(_, family)| family).collect())
    }

    /// Renders the current samples in the Prometheus text format.
    pub fn export(&self, probes: &[Arc<Probe>]) -> Result<String, ProberError> {
        let families = self.gather(probes)?;
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

fn probe_samples(probe: &Probe) -> Vec<MetricSample> {
    let mut labels = probe.labels().clone();
    labels.insert("name".to_string(), probe.name().to_string());
    labels.insert("class".to_string(), probe.class().to_string());

    let sample = |family: Family, value: f64| MetricSample {
        family,
        labels: labels.clone(),
        value,
    };

    let mut samples = vec![sample(Family::IntervalSecs, probe.interval().as_secs_f64())];
    if let Some(last) = probe.last_result() {
        samples.push(sample(Family::StartSecs, unix_seconds(last.start) as f64));
        samples.push(sample(Family::EndSecs, unix_seconds(last.end) as f64));
        if last.succeeded {
            samples.push(sample(Family::LatencyMillis, last.latency.as_millis() as f64));
        }
        samples.push(sample(
            Family::Result,
            if last.succeeded { 1.0 } else { 0.0 },
        ));
    }
    samples
}

/// `[a-zA-Z_:][a-zA-Z0-9_:]*`
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// `[a-zA-Z_][a-zA-Z0-9_]*`, excluding the `__` prefix reserved by Prometheus.
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    !name.starts_with("__") && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
