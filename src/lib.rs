pub mod common;
pub mod config;
pub mod data_model;
pub mod logging;
pub mod metrics;
pub mod metrics_aggregate;
pub mod probe;
pub mod probe_engine;
pub mod prober;
pub mod runtime;
pub mod settings;
pub mod storage;

pub use common::time::fake::FakeClock;
pub use common::time::{Clock, SystemClock, Ticker};
pub use probe::{Context, FuncProbe, Labels, ProbeClass, ProbeError, ProbeResult, ProbeTarget};
pub use prober::{Prober, ProberBuilder, ProberError};
pub use runtime::{Probe, ProbeSnapshot};
