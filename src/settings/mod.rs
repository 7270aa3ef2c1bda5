use crate::data_model::settings::AppSettings;
use crate::metrics::is_valid_metric_name;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(name = "prober")]
#[command(about = "Runs periodic health probes and exports their results as Prometheus gauges", long_about = None)]
pub struct CliArgs {
    /// Probe definitions file (JSON); defaults to <config dir>/prober/probes.json
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Run every probe once, print the results and exit
    #[arg(long)]
    once: bool,

    /// Spread each probe's first run across its interval
    #[arg(long)]
    spread: bool,

    /// Metric name prefix (overrides the file's namespace)
    #[arg(long)]
    namespace: Option<String>,

    /// Keep this file updated with the metrics in text exposition format
    #[arg(long, value_name = "PATH")]
    metrics_file: Option<PathBuf>,

    /// Seconds between metrics exports in continuous mode
    #[arg(long, default_value_t = 15)]
    export_interval_secs: u64,

    /// Log filter, e.g. "info" or "prober=debug"
    #[arg(long, default_value = "info")]
    log_level: String,

    /// In once mode, print probe status as JSON instead of metrics
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("export interval must be greater than zero (got {value})")]
    InvalidExportInterval { value: u64 },
    #[error("invalid metric namespace {value:?}")]
    InvalidNamespace { value: String },
}

pub fn load_from_cli() -> Result<AppSettings, SettingsError> {
    let args = CliArgs::parse();
    from_args(args)
}

pub fn from_args(args: CliArgs) -> Result<AppSettings, SettingsError> {
    if args.export_interval_secs == 0 {
        return Err(SettingsError::InvalidExportInterval {
            value: args.export_interval_secs,
        });
    }

    if let Some(namespace) = &args.namespace
        && !is_valid_metric_name(namespace)
    {
        return Err(SettingsError::InvalidNamespace {
            value: namespace.clone(),
        });
    }

    Ok(AppSettings {
        config_path: args.config,
        once: args.once,
        spread: args.spread,
        namespace: args.namespace,
        metrics_file: args.metrics_file,
        export_interval: Duration::from_secs(args.export_interval_secs),
        log_level: args.log_level,
        json: args.json,
    })
}
