//! carbonscope - CPU energy and carbon audit of a running process.
//!
//! Samples the host's package energy counters (or an empirical power
//! model) at a fixed tick rate, attributes a share of the energy to the
//! target pid, and prints one JSON report. Optionally streams per-tick
//! sliding-window attribution as JSONL.

mod stream;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

use carbonscope_core::attribution::DEFAULT_EMISSION_FACTOR_G_PER_KWH;
use carbonscope_core::audit::{AuditOptions, AuditPaths, Auditor, TickSink};
use carbonscope_core::clock::MonotonicClock;
use carbonscope_core::report::EndReason;
use carbonscope_core::sampler::{EmpiricalPower, RealFs};
use carbonscope_core::scheduler::{CancelToken, TickPolicy};

use stream::JsonlSink;

/// Exit code after a signal-initiated abort (128 + SIGINT).
const EXIT_ABORTED: u8 = 130;

/// Audit the CPU energy and carbon footprint of a process.
#[derive(Parser)]
#[command(name = "carbonscope", about = "CPU energy and carbon audit", version)]
struct Args {
    /// Target process id.
    pid: i32,

    /// Audit duration in seconds.
    #[arg(short, long, default_value = "30")]
    duration: f64,

    /// Sampling period in milliseconds.
    #[arg(short, long, default_value = "1000")]
    tick_ms: f64,

    /// Grid carbon intensity in gCO2e per kWh.
    #[arg(short, long, default_value_t = DEFAULT_EMISSION_FACTOR_G_PER_KWH)]
    emission_factor: f64,

    /// Powercap root (for testing/mocking).
    #[arg(long, default_value = "/sys/class/powercap")]
    powercap_root: PathBuf,

    /// Path to /proc filesystem (for testing/mocking).
    #[arg(long, default_value = "/proc")]
    proc_root: PathBuf,

    /// Fallback model: idle package power in watts.
    #[arg(long)]
    p_idle_w: Option<f64>,

    /// Fallback model: full-load package power in watts.
    #[arg(long)]
    p_max_w: Option<f64>,

    /// Fallback model: thermal design power in watts (used with the
    /// default idle/max fractions when explicit watts are not given).
    #[arg(long)]
    tdp_w: Option<f64>,

    /// Preserve the tick grid after overruns instead of coalescing.
    #[arg(long)]
    burst: bool,

    /// Include the diagnostic meta block in the report.
    #[arg(long)]
    meta: bool,

    /// Log per-reader sampling durations at debug level.
    #[arg(long)]
    debug_timing: bool,

    /// Stream per-tick JSONL records to a file ("-" for stdout).
    #[arg(long, value_name = "PATH")]
    stream: Option<String>,

    /// Sliding-window size for streamed attribution, in samples.
    #[arg(long, default_value = "10")]
    window: usize,

    /// Increase logging verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber with the appropriate log level.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("carbonscope={}", level).parse().unwrap())
        .add_directive(format!("carbonscope_core={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn empirical_power(args: &Args) -> EmpiricalPower {
    EmpiricalPower {
        p_idle_w: args.p_idle_w,
        p_max_w: args.p_max_w,
        tdp_w: args.tdp_w,
        ..EmpiricalPower::default()
    }
}

fn open_sink(args: &Args) -> std::io::Result<Option<Box<dyn TickSink>>> {
    let Some(target) = &args.stream else {
        return Ok(None);
    };
    let sink: Box<dyn TickSink> = if target == "-" {
        Box::new(JsonlSink::new(
            std::io::stdout().lock(),
            args.window,
            args.emission_factor,
        ))
    } else {
        let file = std::fs::File::create(target)?;
        Box::new(JsonlSink::new(file, args.window, args.emission_factor))
    };
    Ok(Some(sink))
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            info!("received shutdown signal");
            cancel.cancel();
        }) {
            warn!("failed to set Ctrl-C handler: {}", e);
        }
    }

    let auditor = Auditor::new(
        RealFs::new(),
        Arc::new(MonotonicClock::new()),
        AuditPaths {
            powercap_root: args.powercap_root.clone(),
            proc_root: args.proc_root.clone(),
        },
        empirical_power(&args),
    );

    let mut sink = match open_sink(&args) {
        Ok(sink) => sink,
        Err(e) => {
            eprintln!("carbonscope: cannot open stream target: {}", e);
            return ExitCode::from(1);
        }
    };

    let opts = AuditOptions {
        pid: args.pid,
        duration_seconds: args.duration,
        tick_ms: args.tick_ms,
        emission_factor_g_per_kwh: args.emission_factor,
        policy: if args.burst {
            TickPolicy::Burst
        } else {
            TickPolicy::Coalesce
        },
        include_meta: args.meta,
        debug_timing: args.debug_timing,
        cancel,
    };

    let sink_ref: Option<&mut dyn TickSink> = match &mut sink {
        Some(s) => Some(&mut **s),
        None => None,
    };

    let report = match auditor.run(&opts, sink_ref) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("carbonscope: {}", e);
            return ExitCode::from(1);
        }
    };

    match serde_json::to_string(&report) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("carbonscope: cannot serialise report: {}", e);
            return ExitCode::from(1);
        }
    }

    if report.end_reason == EndReason::Aborted {
        ExitCode::from(EXIT_ABORTED)
    } else {
        ExitCode::SUCCESS
    }
}
