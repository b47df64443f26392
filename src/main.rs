use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use wattmon::config::{Args, MonitorConfig};
use wattmon::harness::Harness;
use wattmon::metrics::{NvmlBackend, SampleSink};
use wattmon::runner::Workload;
use wattmon::WattmonError;

/// Logs go to stderr; stdout carries nothing but samples.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        LevelFilter::ERROR
    } else {
        match verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            _ => LevelFilter::DEBUG,
        }
    };

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let config = MonitorConfig::from(&args);
    debug!("{:?}", config);

    let backend = match NvmlBackend::init() {
        Ok(backend) => backend,
        Err(e) => {
            let err = WattmonError::NoDevice(e.to_string());
            error!("{}", err);
            return ExitCode::from(err.exit_code());
        }
    };

    let workload = if args.shell {
        Workload::shell(args.command.clone())
    } else {
        Workload::direct(args.command.clone())
    };

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        }
    });

    let mut harness = Harness::new(config).with_shutdown(shutdown);
    let report = match harness
        .run(&backend, SampleSink::stdout(args.format), &workload)
        .await
    {
        Ok(report) => report,
        Err(err) => {
            error!("{}", err);
            return ExitCode::from(err.exit_code());
        }
    };

    match report.child.exit_code {
        Some(code) if args.propagate_exit_code => ExitCode::from(code as u8),
        None if args.propagate_exit_code => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    }
}
