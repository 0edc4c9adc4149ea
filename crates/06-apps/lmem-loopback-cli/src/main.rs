//! Command-line client for the LMem loopback verification test.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use lmem_loopback::{connect, run_loopback, LoopbackConfig, LoopbackError, RunReport, StepTimings};
use lmem_sim::{SimDevice, SimServer};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Text rendering for the console report.
mod render {
    use std::time::Duration;

    use lmem_loopback::Verification;

    const LABEL_WIDTH: usize = 48;

    /// One timing line: padded label, then seconds.
    pub fn timing_line(label: &str, elapsed: Duration) -> String {
        format!(
            "{:<width$}{:.6}s",
            format!("{label}:"),
            elapsed.as_secs_f64(),
            width = LABEL_WIDTH
        )
    }

    /// Every mismatch on its own line, followed by the summary.
    pub fn verification(result: &Verification) -> String {
        let mut out = String::new();
        for mismatch in &result.mismatches {
            out.push_str(&mismatch.to_string());
            out.push('\n');
        }
        if result.missing > 0 {
            out.push_str(&format!(
                "Output data missing for {} of {} elements\n",
                result.missing,
                result.checked + result.missing
            ));
        }
        out.push_str(&result.summary());
        out.push('\n');
        out
    }

    pub fn connect_failure(reason: &str) -> String {
        format!("Could not connect to the server: {reason}.")
    }

    pub fn run_failure(reason: &str) -> String {
        format!("An error occurred: {reason}")
    }
}

/// Run the LMem loopback test against a remote DFE.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Verify LMem loopback on a remote DFE", long_about = None)]
struct Cli {
    /// TOML file with defaults for any of the options below.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Service host (default localhost).
    #[arg(long)]
    host: Option<String>,

    /// Service port (default 9090).
    #[arg(long)]
    port: Option<u16>,

    /// Elements per input array (default 384).
    #[arg(long)]
    size: Option<usize>,

    /// Configuration name to initialise (default LMemLoopback).
    #[arg(long, value_name = "NAME")]
    configuration: Option<String>,

    /// Engine selector; `*` picks any engine.
    #[arg(long, value_name = "SELECTOR")]
    engine: Option<String>,

    /// Connect timeout in milliseconds (default 5000).
    #[arg(long, value_name = "MS")]
    connect_timeout_ms: Option<u64>,

    /// Per-call I/O timeout in milliseconds, 0 to wait forever (default 30000).
    #[arg(long, value_name = "MS")]
    io_timeout_ms: Option<u64>,

    /// Run against an in-process simulated device.
    #[arg(long)]
    simulate: bool,
}

impl Cli {
    /// Applies command-line flags on top of `base`.
    fn overlay(&self, mut base: LoopbackConfig) -> LoopbackConfig {
        if let Some(host) = &self.host {
            base.host = host.clone();
        }
        if let Some(port) = self.port {
            base.port = port;
        }
        if let Some(size) = self.size {
            base.size = size;
        }
        if let Some(configuration) = &self.configuration {
            base.configuration = configuration.clone();
        }
        if let Some(engine) = &self.engine {
            base.engine = engine.clone();
        }
        if let Some(ms) = self.connect_timeout_ms {
            base.connect_timeout_ms = ms;
        }
        if let Some(ms) = self.io_timeout_ms {
            base.io_timeout_ms = ms;
        }
        base
    }

    fn resolve(&self) -> Result<LoopbackConfig> {
        let base = match &self.config {
            Some(path) => LoopbackConfig::load(path)?,
            None => LoopbackConfig::default(),
        };
        let config = self.overlay(base);
        config.validate()?;
        Ok(config)
    }
}

/// How a finished invocation reports itself.
#[derive(Debug, PartialEq, Eq)]
enum Conclusion {
    /// Verification passed; report for stdout.
    Passed(String),
    /// Verification found mismatches; report for stdout.
    Failed(String),
    /// The run could not complete; diagnostic for stderr.
    Error(String),
}

impl Conclusion {
    fn exit_code(&self) -> u8 {
        match self {
            Conclusion::Passed(_) => 0,
            Conclusion::Failed(_) => 1,
            Conclusion::Error(_) => 2,
        }
    }
}

fn conclude(result: Result<RunReport>) -> Conclusion {
    match result {
        Ok(report) => {
            let text = render::verification(&report.verification);
            if report.passed() {
                Conclusion::Passed(text)
            } else {
                Conclusion::Failed(text)
            }
        }
        Err(err) => {
            error!(error = %err, "loopback run failed");
            let reason = err.to_string();
            let connect_failed = err
                .downcast_ref::<LoopbackError>()
                .is_some_and(LoopbackError::is_connect_failure);
            if connect_failed {
                Conclusion::Error(render::connect_failure(&reason))
            } else {
                Conclusion::Error(render::run_failure(&reason))
            }
        }
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let conclusion = conclude(execute(&cli));
    match &conclusion {
        Conclusion::Passed(report) | Conclusion::Failed(report) => print!("{report}"),
        Conclusion::Error(diagnostic) => eprintln!("{diagnostic}"),
    }
    ExitCode::from(conclusion.exit_code())
}

fn execute(cli: &Cli) -> Result<RunReport> {
    let mut config = cli.resolve()?;

    // Kept alive until the run completes.
    let _server = if cli.simulate {
        let server = SimServer::spawn(SimDevice::default())
            .context("failed to start simulated device")?;
        let addr = server.local_addr();
        config.host = addr.ip().to_string();
        config.port = addr.port();
        info!(%addr, "running against simulated device");
        Some(server)
    } else {
        None
    };

    let mut timings = StepTimings::with_observer(|step| {
        println!("{}", render::timing_line(step.label, step.elapsed));
    });
    let report = run_loopback(
        &config,
        |config| connect(&config.host, config.port, &config.channel_options()),
        &mut timings,
    )?;
    Ok(report)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    // Ignore error if already set (e.g., during tests).
    let _ = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
