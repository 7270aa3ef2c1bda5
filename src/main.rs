use prober::data_model::settings::AppSettings;
use prober::logging::init_logging;
use prober::metrics_aggregate::ProbeStatus;
use prober::prober::DEFAULT_NAMESPACE;
use prober::settings::load_from_cli;
use prober::{Prober, storage};
use std::io::{self, ErrorKind};
use std::path::Path;
use std::process::ExitCode;
use std::thread;
use tracing::{error, info, warn};

fn invalid_input(err: impl ToString) -> io::Error {
    io::Error::new(ErrorKind::InvalidInput, err.to_string())
}

fn main() -> io::Result<ExitCode> {
    let settings = load_from_cli().map_err(invalid_input)?;
    init_logging(&settings.log_level);

    let config_path = settings
        .config_path
        .clone()
        .or_else(storage::default_config_path)
        .ok_or_else(|| invalid_input(prober::config::ConfigError::NoConfigPath))?;
    let file = storage::load(&config_path).map_err(|err| {
        error!("{err}");
        invalid_input(err)
    })?;

    let namespace = settings
        .namespace
        .clone()
        .or(file.namespace.clone())
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
    let prober = Prober::builder()
        .namespace(namespace)
        .spread(settings.spread || file.spread.unwrap_or(false))
        .once(settings.once)
        .build()
        .map_err(invalid_input)?;

    for definition in &file.probes {
        let interval = definition.interval().map_err(invalid_input)?;
        let class = definition.probe_class().map_err(invalid_input)?;
        prober
            .run(definition.name.clone(), interval, definition.labels.clone(), class)
            .map_err(invalid_input)?;
    }
    info!(
        config = %config_path.display(),
        probes = prober.active_probes(),
        once = settings.once,
        "probes started"
    );

    if settings.once {
        return run_once(&prober, &settings);
    }
    run_continuous(&prober, &settings)
}

fn run_once(prober: &Prober, settings: &AppSettings) -> io::Result<ExitCode> {
    prober.wait();

    let infos = prober.probe_info();
    let output = if settings.json {
        serde_json::to_string_pretty(&infos).map_err(io::Error::other)?
    } else {
        prober.export().map_err(io::Error::other)?
    };
    println!("{output}");

    let failed: Vec<&str> = infos
        .values()
        .filter(|info| info.status != ProbeStatus::Succeeded)
        .map(|info| info.name.as_str())
        .collect();
    if failed.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(failed = ?failed, "some probes did not succeed");
        Ok(ExitCode::FAILURE)
    }
}

fn run_continuous(prober: &Prober, settings: &AppSettings) -> io::Result<ExitCode> {
    loop {
        thread::sleep(settings.export_interval);
        report(prober, settings.metrics_file.as_deref());
    }
}

/// One export round; failures are logged and retried on the next round.
fn report(prober: &Prober, metrics_file: Option<&Path>) -> bool {
    match metrics_file {
        Some(path) => {
            let exported = match prober.export() {
                Ok(exported) => exported,
                Err(err) => {
                    warn!("failed to export metrics: {err}");
                    return false;
                }
            };
            if let Err(err) = storage::write_atomic(path, &exported) {
                warn!(path = %path.display(), "failed to write metrics: {err}");
                return false;
            }
            true
        }
        None => {
            let infos = prober.probe_info();
            let healthy = infos
                .values()
                .filter(|info| info.status == ProbeStatus::Succeeded)
                .count();
            info!(healthy, total = infos.len(), "probe summary");
            for info in infos.values().filter(|i| i.status == ProbeStatus::Failed) {
                warn!(
                    probe = %info.name,
                    error = info.error.as_deref().unwrap_or_default(),
                    "probe failing"
                );
            }
            true
        }
    }
}
