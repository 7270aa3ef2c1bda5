use crate::probe::Labels;
use hdrhistogram::Histogram;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

/// How many recent iterations each probe remembers for status reporting.
pub const RECENT_HISTORY_LEN: usize = 10;

/// Bounded record of a probe's latest outcomes.
#[derive(Clone, Debug, Default)]
pub struct RecentHistory {
    results: VecDeque<bool>,
    latencies: VecDeque<Duration>,
}

impl RecentHistory {
    pub fn push(&mut self, succeeded: bool, latency: Duration) {
        push_bounded(&mut self.results, succeeded);
        // failed attempts often end on a timeout, which says nothing about the target
        if succeeded {
            push_bounded(&mut self.latencies, latency);
        }
    }

    pub fn results(&self) -> Vec<bool> {
        self.results.iter().copied().collect()
    }

    pub fn latencies(&self) -> Vec<Duration> {
        self.latencies.iter().copied().collect()
    }

    pub fn success_ratio(&self) -> Option<f64> {
        if self.results.is_empty() {
            return None;
        }
        let ok = self.results.iter().filter(|ok| **ok).count();
        Some(ok as f64 / self.results.len() as f64)
    }

    pub fn median_latency(&self) -> Option<Duration> {
        if self.latencies.is_empty() {
            return None;
        }
        let mut histogram = Histogram::<u64>::new(3).ok()?;
        for latency in &self.latencies {
            let micros = latency.as_micros().min(u64::MAX as u128) as u64;
            let _ = histogram.record(micros);
        }
        Some(Duration::from_micros(histogram.value_at_quantile(0.50)))
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, value: T) {
    queue.push_back(value);
    while queue.len() > RECENT_HISTORY_LEN {
        queue.pop_front();
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Unknown,
    Succeeded,
    Failed,
}

/// Point-in-time status report for one probe, suitable for JSON output.
#[derive(Clone, Debug, Serialize)]
pub struct ProbeInfo {
    pub name: String,
    pub class: String,
    pub labels: Labels,
    pub interval_secs: f64,
    pub status: ProbeStatus,
    pub start_unix_ms: Option<i64>,
    pub end_unix_ms: Option<i64>,
    pub latency_ms: Option<f64>,
    pub error: Option<String>,
    pub recent_results: Vec<bool>,
    pub recent_latencies_ms: Vec<f64>,
    pub recent_success_ratio: Option<f64>,
    pub recent_median_latency_ms: Option<f64>,
}

pub(crate) fn millis_f64(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_bounded() {
        let mut history = RecentHistory::default();
        for i in 0..(RECENT_HISTORY_LEN + 5) {
            history.push(i % 2 == 0, Duration::from_millis(i as u64));
        }
        assert_eq!(history.results().len(), RECENT_HISTORY_LEN);
        assert!(history.latencies().len() <= RECENT_HISTORY_LEN);
        // oldest entries were dropped
        assert_eq!(history.results()[0], 5 % 2 == 0);
    }

    #[test]
    fn failures_do_not_contribute_latency() {
        let mut history = RecentHistory::default();
        history.push(false, Duration::from_secs(30));
        history.push(true, Duration::from_millis(12));
        assert_eq!(history.latencies(), vec![Duration::from_millis(12)]);
        assert_eq!(history.results(), vec![false, true]);
        assert_eq!(history.success_ratio(), Some(0.5));
    }

    #[test]
    fn empty_history_has_no_summary() {
        let history = RecentHistory::default();
        assert_eq!(history.success_ratio(), None);
        assert_eq!(history.median_latency(), None);
    }

    #[test]
    fn median_latency_uses_middle_sample() {
        let mut history = RecentHistory::default();
        for ms in [10, 20, 30] {
            history.push(true, Duration::from_millis(ms));
        }
        let median = history.median_latency().expect("median");
        let diff = (median.as_secs_f64() - 0.020).abs();
        assert!(diff < 0.0002, "median was {median:?}");
    }

    #[test]
    fn probe_status_serializes_snake_case() {
        let json = serde_json::to_string(&ProbeStatus::Succeeded).expect("json");
        assert_eq!(json, "\"succeeded\"");
    }
}
