use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Tracebench - run and summarize distributed tracing overhead experiments
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a single experiment: servers, tracing backend, agents and client
    Run(RunArgs),

    /// Run every configuration of an experiment matrix and summarize the results
    ///
    /// Experiments whose output directory already exists are not re-run unless
    /// --fromscratch is given. Results are appended to <OUT>/summary2.csv.
    Sweep(SweepArgs),
}

/// Options shared by both drivers that locate the system under test
#[derive(Args, Debug, Clone)]
pub struct ToolArgs {
    /// Benchmark topology to run
    #[clap(long, value_enum, default_value = crate::defaults::BENCHMARK, help_heading = "System Under Test")]
    pub benchmark: Benchmark,

    /// Path to the hindsight checkout (agents, collector and coordinator)
    #[clap(long, default_value = crate::defaults::HINDSIGHT_DIR, help_heading = "System Under Test")]
    pub hindsight: PathBuf,

    /// Path to the OpenTelemetry collector binary
    #[clap(long, default_value = crate::defaults::OT_COLLECTOR, help_heading = "System Under Test")]
    pub ot_collector: PathBuf,

    /// Directory containing the server, client and process binaries
    #[clap(long, default_value = crate::defaults::BUILD_DIR, help_heading = "System Under Test")]
    pub build_dir: PathBuf,

    /// Directory containing the address, topology and collector configuration files
    #[clap(long, default_value = crate::defaults::CONFIG_DIR, help_heading = "System Under Test")]
    pub config_dir: PathBuf,

    /// Value to use for the server --concurrency parameter
    #[clap(long, default_value_t = crate::defaults::SERVER_CONCURRENCY, help_heading = "System Under Test")]
    pub server_concurrency: u32,

    /// Run servers in --nocompute mode
    #[clap(long, default_value_t = false, help_heading = "System Under Test")]
    pub nocompute: bool,
}

/// Arguments of the single-experiment driver
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Output directory for process logs
    #[clap(value_name = "DIR")]
    pub out: PathBuf,

    #[clap(flatten)]
    pub tools: ToolArgs,

    /// Directory for temporary output (collector traces); traces are not written without it
    #[clap(long, value_name = "DIR")]
    pub tmp: Option<PathBuf>,

    /// Network bandwidth limit for tracing agents
    #[clap(long, default_value_t = crate::defaults::AGENT_RATE)]
    pub server_rate: u32,

    /// Tracer to use for the server --tracing parameter
    #[clap(long, value_enum, default_value = "none")]
    pub tracing: Tracer,

    /// Number of concurrent clients (client --concurrency)
    #[clap(short = 'c', long, default_value_t = 1)]
    pub clients: u32,

    /// Per-client concurrency (closed loop) or request rate (open loop)
    #[clap(short = 'r', long, default_value_t = 1)]
    pub requests: u64,

    /// Run clients in open-loop mode
    #[clap(long, default_value_t = false)]
    pub openloop: bool,

    /// Trigger percentage (trigger-based tracers) or head-sampling probability (ot-*)
    #[clap(short = 's', long)]
    pub sampling: Option<String>,

    /// Do not prompt before running or creating directories
    #[clap(long, default_value_t = false)]
    pub silent: bool,

    /// Experiment duration (e.g. "30", "30s", "5m")
    #[clap(short = 'd', long, value_parser = parse_duration, default_value = "30s")]
    pub duration: Duration,

    /// Delay between starting the tracing backend and starting agents and client
    #[clap(long, value_parser = parse_duration, default_value = "5s")]
    pub settle: Duration,

    /// Verbose output
    #[clap(short = 'v', long, default_value_t = false)]
    pub verbose: bool,
}

/// Arguments of the batch driver
#[derive(Args, Debug, Clone)]
pub struct SweepArgs {
    /// Output directory for process logs and results
    #[clap(value_name = "DIR")]
    pub out: PathBuf,

    #[clap(flatten)]
    pub tools: ToolArgs,

    /// Tracers to use as a comma-separated list
    #[clap(long, default_value = crate::defaults::SWEEP_TRACERS, help_heading = "Matrix")]
    pub tracing: String,

    /// Comma-separated per-client request rates for open-loop experiments
    #[clap(long, default_value = crate::defaults::SWEEP_OPENLOOP, help_heading = "Matrix")]
    pub openloop: String,

    /// Comma-separated per-client concurrencies for closed-loop experiments
    #[clap(long, default_value = crate::defaults::SWEEP_CLOSEDLOOP, help_heading = "Matrix")]
    pub closedloop: String,

    /// Number of clients to run
    #[clap(long, default_value_t = crate::defaults::SWEEP_CLIENTS, help_heading = "Matrix")]
    pub clients: u32,

    /// Comma-separated trigger percentages / head-sampling probabilities
    #[clap(short = 's', long, default_value = crate::defaults::SWEEP_SAMPLING, help_heading = "Matrix")]
    pub sampling: String,

    /// Duration of each experiment in seconds
    #[clap(short = 'd', long, default_value_t = crate::defaults::SWEEP_DURATION_SECS, help_heading = "Matrix")]
    pub duration: u64,

    /// Number of repetitions of each experiment
    #[clap(long, default_value_t = crate::defaults::REPEAT, help_heading = "Matrix")]
    pub repeat: u32,

    /// Re-run all experiments even if results already exist
    #[clap(long, default_value_t = false)]
    pub fromscratch: bool,

    /// Do not run any experiment; only process existing results
    #[clap(long, default_value_t = false)]
    pub results: bool,

    /// Do not ask for confirmation before running
    #[clap(long, default_value_t = false)]
    pub silent: bool,

    /// Print more information about experiments
    #[clap(short = 'v', long, default_value_t = false)]
    pub verbose: bool,
}

/// Tracers understood by the external server binary
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tracer {
    /// No tracing
    #[clap(name = "none")]
    None,

    /// Trigger-based tracing with agents, collector and coordinator
    #[clap(name = "hindsight")]
    Hindsight,

    /// OpenTelemetry with a no-op exporter
    #[clap(name = "ot-noop")]
    OtNoop,

    /// OpenTelemetry exporting to stdout
    #[clap(name = "ot-stdout")]
    OtStdout,

    /// OpenTelemetry with a local in-process exporter
    #[clap(name = "ot-local")]
    OtLocal,

    /// OpenTelemetry exporting to a collector
    #[clap(name = "ot-jaeger")]
    OtJaeger,

    /// OpenTelemetry API on top of trigger-based tracing
    #[clap(name = "ot-hindsight")]
    OtHindsight,
}

impl Tracer {
    /// The name passed to the server binary and used in experiment names
    pub fn name(&self) -> &'static str {
        match self {
            Tracer::None => "none",
            Tracer::Hindsight => "hindsight",
            Tracer::OtNoop => "ot-noop",
            Tracer::OtStdout => "ot-stdout",
            Tracer::OtLocal => "ot-local",
            Tracer::OtJaeger => "ot-jaeger",
            Tracer::OtHindsight => "ot-hindsight",
        }
    }

    /// Trigger-based tracers run agents, a collector and a coordinator
    pub fn is_trigger_based(&self) -> bool {
        matches!(self, Tracer::Hindsight | Tracer::OtHindsight)
    }

    /// OpenTelemetry tracers accept a head-sampling probability on the client
    pub fn is_opentelemetry(&self) -> bool {
        self.name().starts_with("ot-")
    }

    /// Tracers exporting to the third-party OpenTelemetry collector
    pub fn uses_otel_collector(&self) -> bool {
        matches!(self, Tracer::OtJaeger)
    }

    /// Parse a tracer name the way the command line does
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        <Tracer as ValueEnum>::from_str(name.trim(), false)
            .map_err(|_| ConfigError::UnknownTracer(name.to_string()))
    }
}

impl std::fmt::Display for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Benchmark topologies shipped with the system under test
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Benchmark {
    /// A single server
    #[clap(name = "one")]
    One,

    /// Two services
    #[clap(name = "two")]
    Two,

    /// Four services
    #[clap(name = "four")]
    Four,

    /// Ten services
    #[clap(name = "ten")]
    Ten,
}

impl Benchmark {
    pub fn name(&self) -> &'static str {
        match self {
            Benchmark::One => "one",
            Benchmark::Two => "two",
            Benchmark::Four => "four",
            Benchmark::Ten => "ten",
        }
    }

    /// Prefix of the `<topology>_addresses.json` / `<topology>_topology.json` files
    pub fn topology_name(&self) -> &'static str {
        match self {
            Benchmark::One => "single_server",
            Benchmark::Two => "two",
            Benchmark::Four => "four",
            Benchmark::Ten => "ten",
        }
    }

    /// Services the client sends its requests to
    pub fn gateways(&self) -> Vec<String> {
        vec!["service1".to_string()]
    }
}

impl std::fmt::Display for Benchmark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Configuration problems detected before any process is launched
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown tracer '{0}' (expected one of: none, hindsight, ot-noop, ot-stdout, ot-local, ot-jaeger, ot-hindsight)")]
    UnknownTracer(String),

    #[error("cannot run {0} tracing without setting a --tmp directory")]
    MissingTmpDir(Tracer),

    #[error("invalid sample rate '{0}': expected a non-negative number")]
    InvalidSampleRate(String),

    #[error("invalid value '{value}' in --{option}")]
    InvalidListItem { option: &'static str, value: String },

    #[error("--{0} must be greater than 0")]
    Zero(&'static str),

    #[error("load point {point} times {clients} clients overflows")]
    Overflow { point: u64, clients: u32 },
}

/// Parse duration from string (e.g., "10s", "5m", "1h")
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;

    if !num.is_finite() {
        return Err(format!("Duration must be a finite number: {}", s));
    }
    if num < 0.0 {
        return Err(format!("Duration cannot be negative: {}", s));
    }

    let secs = match unit {
        "ms" => num / 1000.0,
        "s" => num,
        "m" => num * 60.0,
        "h" => num * 3600.0,
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };
    let duration = Duration::try_from_secs_f64(secs)
        .map_err(|e| format!("Duration out of range: {}: {}", s, e))?;

    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);

        assert!(parse_duration("").is_err());
        assert!(parse_duration("invalid").is_err());
        assert!(parse_duration("-5s").is_err());
        assert!(parse_duration("nan").is_err());
        assert!(parse_duration("inf").is_err());
        assert!(parse_duration("1e30").is_err());
        assert!(parse_duration("1e30ms").is_err());
    }

    #[test]
    fn test_tracer_classification() {
        assert!(Tracer::Hindsight.is_trigger_based());
        assert!(Tracer::OtHindsight.is_trigger_based());
        assert!(!Tracer::OtJaeger.is_trigger_based());

        assert!(Tracer::OtHindsight.is_opentelemetry());
        assert!(Tracer::OtNoop.is_opentelemetry());
        assert!(!Tracer::None.is_opentelemetry());
        assert!(!Tracer::Hindsight.is_opentelemetry());

        assert!(Tracer::OtJaeger.uses_otel_collector());
        assert!(!Tracer::OtLocal.uses_otel_collector());
    }

    #[test]
    fn test_tracer_parse_and_display() {
        assert_eq!(Tracer::parse("ot-jaeger").unwrap(), Tracer::OtJaeger);
        assert_eq!(Tracer::parse(" none ").unwrap(), Tracer::None);
        assert_eq!(Tracer::OtStdout.to_string(), "ot-stdout");
        assert!(matches!(
            Tracer::parse("zipkin"),
            Err(ConfigError::UnknownTracer(name)) if name == "zipkin"
        ));
    }

    #[test]
    fn test_benchmark_topology_names() {
        assert_eq!(Benchmark::One.topology_name(), "single_server");
        assert_eq!(Benchmark::Ten.topology_name(), "ten");
        assert_eq!(Benchmark::Two.gateways(), vec!["service1".to_string()]);
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_args_defaults() {
        let cli = Cli::try_parse_from(["tracebench", "run", "/tmp/out"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run subcommand");
        };
        assert_eq!(args.tracing, Tracer::None);
        assert_eq!(args.tools.benchmark, Benchmark::Two);
        assert_eq!(
            args.duration,
            Duration::from_secs(crate::defaults::RUN_DURATION_SECS)
        );
        assert_eq!(args.settle, crate::defaults::SETTLE_DELAY);
        assert_eq!(args.clients, 1);
        assert!(args.sampling.is_none());
        assert!(args.tmp.is_none());
    }

    #[test]
    fn test_unknown_tracer_and_benchmark_rejected() {
        assert!(Cli::try_parse_from(["tracebench", "run", "out", "--tracing", "zipkin"]).is_err());
        assert!(Cli::try_parse_from(["tracebench", "run", "out", "--benchmark", "five"]).is_err());
    }

    #[test]
    fn test_sweep_args_flags() {
        let cli = Cli::try_parse_from([
            "tracebench",
            "sweep",
            "results",
            "--tracing",
            "none,hindsight",
            "--openloop",
            "100,200",
            "--fromscratch",
            "--silent",
        ])
        .unwrap();
        let Commands::Sweep(args) = cli.command else {
            panic!("expected sweep subcommand");
        };
        assert_eq!(args.tracing, "none,hindsight");
        assert_eq!(args.openloop, "100,200");
        assert_eq!(args.closedloop, "8");
        assert_eq!(args.repeat, 3);
        assert!(args.fromscratch);
        assert!(!args.results);
        assert!(args.silent);
    }
}
