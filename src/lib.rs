//! # Tracebench Library
//!
//! Experiment driver for measuring the application-level overhead of distributed
//! tracing. The library starts a benchmark topology of external server processes,
//! an optional tracing backend and a load-generating client, runs them for a fixed
//! duration, tears them down, and turns the client logs into a CSV summary.
//!
//! ## Supported Tracers
//!
//! - **none**: servers run without tracing
//! - **hindsight / ot-hindsight**: trigger-based tracing with per-service agents,
//!   a collector and a coordinator
//! - **ot-noop / ot-stdout / ot-local**: OpenTelemetry head sampling without an
//!   external backend
//! - **ot-jaeger**: OpenTelemetry head sampling exported to a third-party collector
//!
//! ## Architecture Overview
//!
//! The library is organized into several key modules:
//!
//! - `topology`: Benchmark catalogue and service-address file loading
//! - `matrix`: Cross-product of experiment configurations with overload cutoffs
//! - `orchestrator`: Lifecycle of one experiment's process topology
//! - `extract`: Metric extraction from client logs
//! - `results`: Resume controller, CSV summary and per-run manifests
//! - `cli`: Command-line interface parsing and configuration management
//! - `utils`: List parsing, prompts, directory preparation and formatting helpers
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use tracebench::matrix::{CutoffTable, MatrixParams, Workload};
//! use tracebench::cli::Tracer;
//!
//! let params = MatrixParams {
//!     closedloop: vec![8],
//!     openloop: vec![100, 200],
//!     clients: 15,
//!     tracers: vec![Tracer::None, Tracer::Hindsight],
//!     samplerates: vec!["0".into(), "0.01".into()],
//!     repeat: 3,
//!     out_root: "results".into(),
//!     cutoffs: CutoffTable::default(),
//! };
//! let matrix = tracebench::matrix::generate(&params, |_| Vec::new()).unwrap();
//! for experiment in matrix.experiments.iter().filter(|e| e.workload == Workload::OpenLoop) {
//!     println!("{} (exists: {})", experiment.name, experiment.exists);
//! }
//! ```

/// Command-line interface and configuration
///
/// Provides argument parsing using clap for both the batch driver (`sweep`)
/// and the single-experiment driver (`run`), including:
/// - Tracer and benchmark selection with validation at parse time
/// - Duration parsing with human-readable formats (e.g., "30s", "5m")
/// - Comma-separated workload and sample-rate lists
pub mod cli;

/// Result extraction from client logs
///
/// Converts the free-text output of the external client into a fixed-schema
/// `ClientReport`. The text scanning lives behind the `ReportSource` trait so
/// other report formats can be plugged in.
pub mod extract;

pub mod logging;

/// Experiment matrix generation
///
/// Enumerates every (workload, tracer, sample rate, repeat) combination,
/// applies overload cutoffs, and names experiments deterministically so that
/// interrupted sweeps can be resumed.
pub mod matrix;

/// Process orchestration for a single experiment
///
/// Starts servers, tracing backend, agents and client in a fixed order, each in
/// its own process group with a dedicated log file, and guarantees best-effort
/// teardown of every group it started.
pub mod orchestrator;

/// Result aggregation and resumable sweeps
///
/// Decides which experiments to run or reuse, appends one CSV row per
/// successfully extracted experiment, and writes per-run manifests.
pub mod results;

/// Topology loading
///
/// Maps a benchmark name to its configuration files and loads the service
/// endpoints of the system under test.
pub mod topology;

pub mod utils;

pub use cli::{Benchmark, Cli, Commands, Tracer};
pub use extract::{ClientLogReport, ClientReport, ExtractError, ReportSource};
pub use matrix::{CutoffTable, ExperimentDescriptor, Matrix, MatrixParams, Workload};
pub use orchestrator::{ExperimentConfig, Orchestrator, ProcessHandle};
pub use results::{ResultRow, SummaryWriter, SweepController, SweepSummary};
pub use topology::{ServiceEndpoint, Topology};

/// The current version of tracebench
///
/// Recorded in every run manifest for reproducibility.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
///
/// Ports and identifiers here must agree with what the external binaries
/// expect; the remaining values are the defaults used for published runs.
pub mod defaults {
    use std::time::Duration;

    /// Port the trigger coordinator listens on (agents connect as `-lc`)
    pub const COORDINATOR_PORT: u16 = 5252;

    /// Port the trace collector listens on (agents connect as `-r`)
    pub const COLLECTOR_PORT: u16 = 5253;

    /// OpenTelemetry collector port shared by all servers
    pub const OTEL_PORT: u16 = 6833;

    /// Trigger queue id installed on the trigger-origin server
    pub const TRIGGER_QUEUE_ID: u32 = 7;

    /// Delay between starting the tracing backend and starting the agents
    pub const SETTLE_DELAY: Duration = Duration::from_secs(5);

    /// Pause after each experiment so ports and shared memory are released
    pub const POST_EXPERIMENT_PAUSE: Duration = Duration::from_secs(2);

    /// Per-experiment overhead used when estimating sweep duration (seconds)
    pub const EXPERIMENT_OVERHEAD_SECS: u64 = 10;

    /// Default `--concurrency` passed to each server
    pub const SERVER_CONCURRENCY: u32 = 8;

    /// Default agent bandwidth limit
    pub const AGENT_RATE: u32 = 10;

    /// Default single-experiment duration in seconds
    pub const RUN_DURATION_SECS: u64 = 30;

    /// Default per-experiment duration of a sweep in seconds
    pub const SWEEP_DURATION_SECS: u64 = 60;

    /// Default number of repetitions per sweep configuration
    pub const REPEAT: u32 = 3;

    /// Default client count of a sweep
    pub const SWEEP_CLIENTS: u32 = 15;

    pub const BENCHMARK: &str = "two";
    pub const HINDSIGHT_DIR: &str = "~/hindsight";
    pub const OT_COLLECTOR: &str = "~/otel46/otelcontribcol_linux_amd64";
    pub const BUILD_DIR: &str = "../build";
    pub const CONFIG_DIR: &str = "../config";

    pub const SWEEP_TRACERS: &str = "none,hindsight,ot-jaeger";
    pub const SWEEP_CLOSEDLOOP: &str = "8";
    pub const SWEEP_SAMPLING: &str = "0,0.01,0.1,1";

    /// Per-client open-loop request rates of the default sweep
    pub const SWEEP_OPENLOOP: &str = "133,266,400,533,666,800,933,1066,1200,1333,1466,1600,\
        1733,1866,2000,2133,2266,2400,2533,2666,2800,2933,3066,3200,3333,3466,3600,3733,\
        3866,4000,4133,4266,4400,4533,4666,4800,4933,5066,5200,5333";

    /// Name of the summary table inside the sweep output directory
    pub const SUMMARY_FILE: &str = "summary2.csv";

    /// Name of the batch log inside the sweep output directory
    pub const SWEEP_LOG_FILE: &str = "sweep.log";
}
