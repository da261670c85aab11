//! # Results and Sweep Control
//!
//! Drives a sweep over an experiment matrix and turns its outcome into
//! `<out>/summary2.csv`.
//!
//! ## Resume Semantics
//!
//! Every experiment ends up either re-used (its output directory already
//! existed when the matrix was generated) or run. Re-used experiments are
//! extracted first, then the remaining ones are run one at a time and
//! extracted as they finish. A row is appended and flushed for every
//! successful extraction, so an interrupted sweep leaves a valid prefix of the
//! summary behind.
//!
//! Each single-experiment run also records a `manifest.json` next to its logs
//! describing the configuration, the processes that were started and the host.

use crate::cli::{Benchmark, SweepArgs, Tracer};
use crate::extract::{ClientLogReport, ClientReport, ReportSource};
use crate::matrix::{
    self, CommandTemplate, CutoffTable, ExperimentDescriptor, Matrix, MatrixParams, Workload,
};
use crate::orchestrator::{absolute, ExperimentConfig, LaunchRecord, StopReason, ToolPaths};
use crate::utils::{confirm, format_duration, parse_list, prepare_dirs, validate_sample_rate};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Columns of the summary table, in order
pub const SUMMARY_HEADERS: [&str; 12] = [
    "name",
    "workload",
    "repeat",
    "tracer",
    "requests",
    "samplerate",
    "total_requests",
    "throughput",
    "throughput2",
    "latency",
    "max_latency",
    "min_latency",
];

/// Per-run manifest file name inside an experiment's output directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// One line of the summary table
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub name: String,
    pub workload: Workload,
    pub repeat: u32,
    pub tracer: Tracer,
    pub requests: u64,
    pub samplerate: String,
    pub report: ClientReport,
}

impl ResultRow {
    pub fn new(experiment: &ExperimentDescriptor, report: ClientReport) -> Self {
        Self {
            name: experiment.name.clone(),
            workload: experiment.workload,
            repeat: experiment.repeat,
            tracer: experiment.tracer,
            requests: experiment.requests,
            samplerate: experiment.samplerate.clone(),
            report,
        }
    }

    /// Cells in [`SUMMARY_HEADERS`] order; metrics the client never reported are empty
    pub fn to_record(&self) -> Vec<String> {
        fn cell<T: ToString>(value: Option<T>) -> String {
            value.map(|v| v.to_string()).unwrap_or_default()
        }
        let r = &self.report;
        vec![
            self.name.clone(),
            self.workload.to_string(),
            self.repeat.to_string(),
            self.tracer.to_string(),
            self.requests.to_string(),
            self.samplerate.clone(),
            cell(r.total_requests),
            cell(r.throughput),
            cell(r.throughput2),
            cell(r.latency),
            cell(r.max_latency),
            cell(r.min_latency),
        ]
    }
}

/// Appends rows to the summary table, flushing after each one
pub struct SummaryWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: usize,
}

impl SummaryWriter {
    /// Create (or truncate) the summary table and write its header
    pub fn create(path: &Path) -> Result<Self> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create summary file {}", path.display()))?;
        writer.write_record(SUMMARY_HEADERS)?;
        writer.flush()?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            rows: 0,
        })
    }

    pub fn append(&mut self, row: &ResultRow) -> Result<()> {
        self.writer
            .write_record(row.to_record())
            .with_context(|| format!("Failed to write to {}", self.path.display()))?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows written so far, excluding the header
    pub fn rows(&self) -> usize {
        self.rows
    }
}

/// How existing experiment output is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    /// Re-use experiments whose output directory exists, run the rest
    Resume,
    /// Run every experiment
    FromScratch,
    /// Run nothing; extract whatever is there
    ResultsOnly,
}

/// Experiments split by what the sweep does with them
#[derive(Debug)]
pub struct SweepPlan<'a> {
    pub existing: Vec<&'a ExperimentDescriptor>,
    pub to_run: Vec<&'a ExperimentDescriptor>,
}

impl<'a> SweepPlan<'a> {
    pub fn new(experiments: &'a [ExperimentDescriptor], mode: ResumeMode) -> Self {
        let (existing, to_run) = match mode {
            ResumeMode::ResultsOnly => (experiments.iter().collect(), Vec::new()),
            ResumeMode::FromScratch => (Vec::new(), experiments.iter().collect()),
            ResumeMode::Resume => experiments.iter().partition(|e| e.exists),
        };
        Self { existing, to_run }
    }
}

/// Counts reported at the end of a sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub ran: usize,
    pub processed: usize,
    pub skipped: usize,
}

/// Runs one experiment to completion
#[async_trait::async_trait]
pub trait ExperimentRunner: Send + Sync {
    /// Run `experiment` and return the exit status of its driver
    ///
    /// An `Err` means the experiment could not be started at all.
    async fn run(&self, experiment: &ExperimentDescriptor) -> Result<ExitStatus>;
}

/// Executes the materialized command line of an experiment as a child process
#[derive(Debug, Clone)]
pub struct CommandRunner {
    pause: Duration,
}

impl CommandRunner {
    pub fn new(pause: Duration) -> Self {
        Self { pause }
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(crate::defaults::POST_EXPERIMENT_PAUSE)
    }
}

#[async_trait::async_trait]
impl ExperimentRunner for CommandRunner {
    async fn run(&self, experiment: &ExperimentDescriptor) -> Result<ExitStatus> {
        let (program, args) = experiment
            .command
            .split_first()
            .with_context(|| format!("Experiment {} has no command", experiment.name))?;
        let status = tokio::process::Command::new(program)
            .args(args)
            .status()
            .await
            .with_context(|| format!("Failed to launch experiment {}", experiment.name))?;
        tokio::time::sleep(self.pause).await;
        Ok(status)
    }
}

/// Runs the experiments of a plan and records their results
pub struct SweepController<R, S> {
    runner: R,
    source: S,
    verbose: bool,
}

impl<R: ExperimentRunner, S: ReportSource> SweepController<R, S> {
    pub fn new(runner: R, source: S) -> Self {
        Self {
            runner,
            source,
            verbose: false,
        }
    }

    /// Report extraction failures as warnings instead of debug messages
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Extract one experiment; returns whether a row was written
    fn extract(&self, experiment: &ExperimentDescriptor, writer: &mut SummaryWriter) -> Result<bool> {
        match self.source.read_report(&experiment.outdir) {
            Ok(report) => {
                writer.append(&ResultRow::new(experiment, report))?;
                Ok(true)
            }
            Err(e) => {
                if self.verbose {
                    warn!("Skipping results of {}: {}", experiment.name, e);
                } else {
                    debug!("Skipping results of {}: {}", experiment.name, e);
                }
                Ok(false)
            }
        }
    }

    fn tally(summary: &mut SweepSummary, written: bool) {
        if written {
            summary.processed += 1;
        } else {
            summary.skipped += 1;
        }
    }

    pub async fn execute(
        &self,
        plan: &SweepPlan<'_>,
        writer: &mut SummaryWriter,
        cancel: &CancellationToken,
    ) -> Result<SweepSummary> {
        let mut summary = SweepSummary::default();

        for experiment in &plan.existing {
            let written = self.extract(experiment, writer)?;
            Self::tally(&mut summary, written);
        }

        let total = plan.to_run.len();
        for (i, experiment) in plan.to_run.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!("Sweep cancelled; {} experiments not started", total - i);
                break;
            }
            info!("Experiment {}/{}", i + 1, total);
            info!("{}", experiment.command.join(" "));

            let status = self.runner.run(experiment).await?;
            summary.ran += 1;
            if cancel.is_cancelled() {
                warn!(
                    "Experiment {} was interrupted; results not recorded",
                    experiment.name
                );
                break;
            }
            if !status.success() {
                warn!("Experiment {} exited with {}", experiment.name, status);
            }

            let written = self.extract(experiment, writer)?;
            Self::tally(&mut summary, written);
        }

        info!("Ran {} experiments", summary.ran);
        info!(
            "Processed {} experiment results (skipped {} missing or invalid)",
            summary.processed, summary.skipped
        );
        Ok(summary)
    }
}

/// Everything needed to run a sweep
#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub out: PathBuf,
    pub params: MatrixParams,
    pub template: CommandTemplate,
    pub mode: ResumeMode,
    pub silent: bool,
    pub verbose: bool,
}

impl SweepConfig {
    pub fn from_args(args: &SweepArgs) -> Result<Self> {
        let out = absolute(&args.out)?;

        let tracers = parse_list::<String>(&args.tracing, "tracing")?
            .iter()
            .map(|name| Tracer::parse(name))
            .collect::<Result<Vec<_>, _>>()?;
        let samplerates = parse_list::<String>(&args.sampling, "sampling")?;
        for rate in &samplerates {
            validate_sample_rate(rate)?;
        }
        if args.clients == 0 {
            return Err(crate::cli::ConfigError::Zero("clients").into());
        }

        let params = MatrixParams {
            closedloop: parse_list(&args.closedloop, "closedloop")?,
            openloop: parse_list(&args.openloop, "openloop")?,
            clients: args.clients,
            tracers,
            samplerates,
            repeat: args.repeat,
            out_root: out.clone(),
            cutoffs: CutoffTable::default(),
        };

        let tools = ToolPaths::from_args(&args.tools)?;
        let template = CommandTemplate {
            exe: std::env::current_exe().context("Failed to locate the tracebench executable")?,
            benchmark: args.tools.benchmark,
            server_concurrency: args.tools.server_concurrency,
            nocompute: args.tools.nocompute,
            hindsight: tools.hindsight_dir,
            ot_collector: tools.ot_collector,
            build_dir: tools.build_dir,
            config_dir: tools.config_dir,
            clients: args.clients,
            duration_secs: args.duration,
        };

        let mode = if args.results {
            ResumeMode::ResultsOnly
        } else if args.fromscratch {
            ResumeMode::FromScratch
        } else {
            ResumeMode::Resume
        };

        Ok(Self {
            out,
            params,
            template,
            mode,
            silent: args.silent,
            verbose: args.verbose,
        })
    }
}

/// A sweep whose matrix is generated and whose summary file is open
pub struct Sweep {
    config: SweepConfig,
    matrix: Matrix,
    writer: SummaryWriter,
}

impl Sweep {
    pub fn matrix(&self) -> &Matrix {
        &self.matrix
    }

    pub async fn execute(self, cancel: &CancellationToken) -> Result<SweepSummary> {
        let controller = SweepController::new(CommandRunner::default(), ClientLogReport)
            .verbose(self.config.verbose);
        self.execute_with(&controller, cancel).await
    }

    /// Execute with a custom runner and report source
    pub async fn execute_with<R: ExperimentRunner, S: ReportSource>(
        mut self,
        controller: &SweepController<R, S>,
        cancel: &CancellationToken,
    ) -> Result<SweepSummary> {
        let plan = SweepPlan::new(&self.matrix.experiments, self.config.mode);
        controller.execute(&plan, &mut self.writer, cancel).await
    }
}

/// Generate the matrix, report what will happen, confirm, and open the summary
pub fn prepare_sweep(config: SweepConfig) -> Result<Sweep> {
    let matrix = matrix::generate(&config.params, |e| config.template.materialize(e))?;
    info!(
        "Generated {} experiments for benchmark {}",
        matrix.experiments.len(),
        config.template.benchmark
    );

    {
        let plan = SweepPlan::new(&matrix.experiments, config.mode);
        if config.mode != ResumeMode::ResultsOnly {
            for skip in &matrix.cutoff_skips {
                info!("{}", skip);
            }
        }
        if !plan.existing.is_empty() {
            info!(
                "Processing {} experiments that already exist",
                plan.existing.len()
            );
        }

        if !plan.to_run.is_empty() {
            let per_experiment =
                crate::defaults::EXPERIMENT_OVERHEAD_SECS + config.template.duration_secs;
            let estimate = Duration::from_secs(plan.to_run.len() as u64 * per_experiment);
            info!(
                "Running {} experiments (estimated duration {})",
                plan.to_run.len(),
                format_duration(estimate)
            );
            for experiment in &plan.to_run {
                debug!("  {}", experiment.name);
            }
            if !config.silent {
                confirm("Press <return> to continue or CTRL-C to abort")?;
            }
            prepare_dirs(
                &[
                    matrix::experiments_dir(&config.out).as_path(),
                    matrix::scratch_dir(&config.out).as_path(),
                ],
                true,
            )?;
        }
    }

    std::fs::create_dir_all(&config.out)
        .with_context(|| format!("Failed to create {}", config.out.display()))?;
    let writer = SummaryWriter::create(&config.out.join(crate::defaults::SUMMARY_FILE))?;

    Ok(Sweep {
        config,
        matrix,
        writer,
    })
}

/// Host the experiment ran on
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: usize,
    pub rust_version: String,
    pub tracebench_version: String,
}

impl SystemInfo {
    pub fn collect() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_cores: num_cpus::get(),
            rust_version: env!("CARGO_PKG_RUST_VERSION").to_string(),
            tracebench_version: crate::VERSION.to_string(),
        }
    }
}

/// Record of one single-experiment run
#[derive(Debug, Clone, Serialize)]
pub struct RunManifest {
    pub benchmark: Benchmark,
    pub tracer: Tracer,
    pub sampling: Option<String>,
    pub clients: u32,
    pub requests: u64,
    pub openloop: bool,
    pub server_concurrency: u32,
    pub nocompute: bool,
    pub duration_secs: f64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stop_reason: StopReason,
    pub processes: Vec<LaunchRecord>,
    pub system_info: SystemInfo,
}

impl RunManifest {
    pub fn new(
        config: &ExperimentConfig,
        started_at: DateTime<Utc>,
        stop_reason: StopReason,
        processes: &[LaunchRecord],
    ) -> Self {
        Self {
            benchmark: config.benchmark,
            tracer: config.tracer,
            sampling: config.sampling.clone(),
            clients: config.clients,
            requests: config.requests,
            openloop: config.openloop,
            server_concurrency: config.server_concurrency,
            nocompute: config.nocompute,
            duration_secs: config.duration.as_secs_f64(),
            started_at,
            finished_at: Utc::now(),
            stop_reason,
            processes: processes.to_vec(),
            system_info: SystemInfo::collect(),
        }
    }

    /// Write the manifest into `dir` and return its path
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::CLIENT_LOG;
    use std::os::unix::process::ExitStatusExt;
    use std::sync::Mutex;

    const GOOD_LOG: &str = "Total requests: 1000\n\
                            overall throughput: 523.4 req/s\n\
                            Average / Max / Min latency of a request is: 12.3/45.6/1.1 ms\n";

    /// Pretends to run an experiment by writing a client log into its directory
    struct FakeRunner {
        log: String,
        exit_code: i32,
        ran: Mutex<Vec<String>>,
    }

    impl FakeRunner {
        fn new(log: &str) -> Self {
            Self {
                log: log.to_string(),
                exit_code: 0,
                ran: Mutex::new(Vec::new()),
            }
        }

        fn ran(&self) -> Vec<String> {
            self.ran.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl ExperimentRunner for FakeRunner {
        async fn run(&self, experiment: &ExperimentDescriptor) -> Result<ExitStatus> {
            std::fs::create_dir_all(&experiment.outdir)?;
            std::fs::write(experiment.outdir.join(CLIENT_LOG), &self.log)?;
            self.ran.lock().unwrap().push(experiment.name.clone());
            Ok(ExitStatus::from_raw(self.exit_code << 8))
        }
    }

    struct FailingRunner;

    #[async_trait::async_trait]
    impl ExperimentRunner for FailingRunner {
        async fn run(&self, experiment: &ExperimentDescriptor) -> Result<ExitStatus> {
            Err(anyhow::anyhow!("cannot exec {}", experiment.name))
        }
    }

    fn params(root: &Path) -> MatrixParams {
        MatrixParams {
            closedloop: vec![8],
            openloop: vec![],
            clients: 2,
            tracers: vec![Tracer::None],
            samplerates: vec!["0".into()],
            repeat: 3,
            out_root: root.to_path_buf(),
            cutoffs: CutoffTable::default(),
        }
    }

    fn csv_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(String::from)
            .collect()
    }

    fn write_log(outdir: &Path, text: &str) {
        std::fs::create_dir_all(outdir).unwrap();
        std::fs::write(outdir.join(CLIENT_LOG), text).unwrap();
    }

    #[tokio::test]
    async fn test_resume_runs_only_missing_experiments() {
        let root = tempfile::tempdir().unwrap();
        write_log(&root.path().join("out/closedloop-16-notracing-2"), GOOD_LOG);

        let m = matrix::generate(&params(root.path()), |_| vec!["true".into()]).unwrap();
        let plan = SweepPlan::new(&m.experiments, ResumeMode::Resume);
        assert_eq!(plan.existing.len(), 1);
        assert_eq!(plan.to_run.len(), 2);

        let summary_path = root.path().join("summary2.csv");
        let mut writer = SummaryWriter::create(&summary_path).unwrap();
        let controller = SweepController::new(FakeRunner::new(GOOD_LOG), ClientLogReport);
        let summary = controller
            .execute(&plan, &mut writer, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            summary,
            SweepSummary {
                ran: 2,
                processed: 3,
                skipped: 0
            }
        );
        assert_eq!(
            controller.runner.ran(),
            vec!["closedloop-16-notracing", "closedloop-16-notracing-3"]
        );

        let lines = csv_lines(&summary_path);
        assert_eq!(lines[0], SUMMARY_HEADERS.join(","));
        // existing results come first
        assert!(lines[1].starts_with("closedloop-16-notracing-2,"));
        assert_eq!(lines.len(), 4);

        // a second pass over the same directory finds everything
        let m = matrix::generate(&params(root.path()), |_| vec!["true".into()]).unwrap();
        assert!(m.experiments.iter().all(|e| e.exists));
        let plan = SweepPlan::new(&m.experiments, ResumeMode::Resume);
        assert!(plan.to_run.is_empty());
    }

    #[test]
    fn test_plan_modes() {
        let root = tempfile::tempdir().unwrap();
        write_log(&root.path().join("out/closedloop-16-notracing"), GOOD_LOG);
        let m = matrix::generate(&params(root.path()), |_| Vec::new()).unwrap();

        let scratch = SweepPlan::new(&m.experiments, ResumeMode::FromScratch);
        assert!(scratch.existing.is_empty());
        assert_eq!(scratch.to_run.len(), 3);

        let results = SweepPlan::new(&m.experiments, ResumeMode::ResultsOnly);
        assert_eq!(results.existing.len(), 3);
        assert!(results.to_run.is_empty());
    }

    #[tokio::test]
    async fn test_results_only_skips_missing_and_malformed() {
        let root = tempfile::tempdir().unwrap();
        write_log(&root.path().join("out/closedloop-16-notracing"), GOOD_LOG);
        write_log(
            &root.path().join("out/closedloop-16-notracing-2"),
            "Total requests: many\n",
        );

        let m = matrix::generate(&params(root.path()), |_| Vec::new()).unwrap();
        let plan = SweepPlan::new(&m.experiments, ResumeMode::ResultsOnly);
        let summary_path = root.path().join("summary2.csv");
        let mut writer = SummaryWriter::create(&summary_path).unwrap();
        let controller = SweepController::new(FakeRunner::new(GOOD_LOG), ClientLogReport);
        let summary = controller
            .execute(&plan, &mut writer, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.ran, 0);
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.skipped, 2);
        assert!(controller.runner.ran().is_empty());
        assert_eq!(writer.rows(), 1);
        assert_eq!(
            csv_lines(&summary_path)[1],
            "closedloop-16-notracing,closedloop,1,none,16,0,1000,523.4,,12.3,45.6,1.1"
        );
    }

    #[tokio::test]
    async fn test_progress_only_log_leaves_empty_cells() {
        let root = tempfile::tempdir().unwrap();
        let log: String = (0..12).map(|_| "40 requests/s (40 total)\n").collect();
        let mut p = params(root.path());
        p.repeat = 1;
        let m = matrix::generate(&p, |_| vec!["true".into()]).unwrap();
        let plan = SweepPlan::new(&m.experiments, ResumeMode::FromScratch);

        let summary_path = root.path().join("summary2.csv");
        let mut writer = SummaryWriter::create(&summary_path).unwrap();
        let controller = SweepController::new(FakeRunner::new(&log), ClientLogReport);
        controller
            .execute(&plan, &mut writer, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            csv_lines(&summary_path)[1],
            "closedloop-16-notracing,closedloop,1,none,16,0,,,40,,,"
        );
    }

    #[tokio::test]
    async fn test_failed_experiment_is_still_extracted() {
        let root = tempfile::tempdir().unwrap();
        let mut p = params(root.path());
        p.repeat = 1;
        let m = matrix::generate(&p, |_| vec!["true".into()]).unwrap();
        let plan = SweepPlan::new(&m.experiments, ResumeMode::Resume);

        let mut writer = SummaryWriter::create(&root.path().join("summary2.csv")).unwrap();
        let mut runner = FakeRunner::new(GOOD_LOG);
        runner.exit_code = 1;
        let controller = SweepController::new(runner, ClientLogReport).verbose(true);
        let summary = controller
            .execute(&plan, &mut writer, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.ran, 1);
        assert_eq!(summary.processed, 1);
    }

    #[tokio::test]
    async fn test_launch_failure_aborts_sweep() {
        let root = tempfile::tempdir().unwrap();
        let m = matrix::generate(&params(root.path()), |_| vec!["true".into()]).unwrap();
        let plan = SweepPlan::new(&m.experiments, ResumeMode::Resume);
        let mut writer = SummaryWriter::create(&root.path().join("summary2.csv")).unwrap();

        let controller = SweepController::new(FailingRunner, ClientLogReport);
        let err = controller
            .execute(&plan, &mut writer, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot exec closedloop-16-notracing"));
    }

    #[tokio::test]
    async fn test_cancelled_sweep_starts_nothing() {
        let root = tempfile::tempdir().unwrap();
        write_log(&root.path().join("out/closedloop-16-notracing"), GOOD_LOG);
        let m = matrix::generate(&params(root.path()), |_| vec!["true".into()]).unwrap();
        let plan = SweepPlan::new(&m.experiments, ResumeMode::Resume);
        let mut writer = SummaryWriter::create(&root.path().join("summary2.csv")).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let controller = SweepController::new(FakeRunner::new(GOOD_LOG), ClientLogReport);
        let summary = controller.execute(&plan, &mut writer, &cancel).await.unwrap();

        assert_eq!(summary.ran, 0);
        assert_eq!(summary.processed, 1);
        assert!(controller.runner.ran().is_empty());
    }

    /// Stands in for an experiment that CTRL-C cut short
    struct InterruptedRunner {
        cancel: CancellationToken,
    }

    #[async_trait::async_trait]
    impl ExperimentRunner for InterruptedRunner {
        async fn run(&self, experiment: &ExperimentDescriptor) -> Result<ExitStatus> {
            write_log(&experiment.outdir, "Total requests: 3\n");
            self.cancel.cancel();
            Ok(ExitStatus::from_raw(0))
        }
    }

    #[tokio::test]
    async fn test_interrupted_experiment_is_not_recorded() {
        let root = tempfile::tempdir().unwrap();
        let m = matrix::generate(&params(root.path()), |_| vec!["true".into()]).unwrap();
        let plan = SweepPlan::new(&m.experiments, ResumeMode::Resume);
        let summary_path = root.path().join("summary2.csv");
        let mut writer = SummaryWriter::create(&summary_path).unwrap();

        let cancel = CancellationToken::new();
        let runner = InterruptedRunner {
            cancel: cancel.clone(),
        };
        let controller = SweepController::new(runner, ClientLogReport);
        let summary = controller.execute(&plan, &mut writer, &cancel).await.unwrap();

        assert_eq!(
            summary,
            SweepSummary {
                ran: 1,
                processed: 0,
                skipped: 0
            }
        );
        assert_eq!(writer.rows(), 0);
        assert_eq!(csv_lines(&summary_path), vec![SUMMARY_HEADERS.join(",")]);
    }

    #[tokio::test]
    async fn test_command_runner_reports_exit_status() {
        let root = tempfile::tempdir().unwrap();
        let mut p = params(root.path());
        p.repeat = 1;
        let runner = CommandRunner::new(Duration::ZERO);

        let m = matrix::generate(&p, |_| vec!["sh".into(), "-c".into(), "exit 3".into()])
            .unwrap();
        let status = runner.run(&m.experiments[0]).await.unwrap();
        assert_eq!(status.code(), Some(3));

        let m = matrix::generate(&p, |_| vec!["/nonexistent/tracebench".into()]).unwrap();
        assert!(runner.run(&m.experiments[0]).await.is_err());

        let m = matrix::generate(&p, |_| Vec::new()).unwrap();
        assert!(runner.run(&m.experiments[0]).await.is_err());
    }

    #[test]
    fn test_sweep_config_from_args() {
        use crate::cli::{Cli, Commands};
        use clap::Parser;

        let parse = |extra: &[&str]| {
            let mut argv = vec!["tracebench", "sweep", "/res"];
            argv.extend_from_slice(extra);
            let Commands::Sweep(args) = Cli::try_parse_from(argv).unwrap().command else {
                panic!("expected sweep subcommand");
            };
            SweepConfig::from_args(&args)
        };

        let config = parse(&["--openloop", "100,200", "--results"]).unwrap();
        assert_eq!(config.mode, ResumeMode::ResultsOnly);
        assert_eq!(config.params.openloop, vec![100, 200]);
        assert_eq!(config.params.closedloop, vec![8]);
        assert_eq!(
            config.params.tracers,
            vec![Tracer::None, Tracer::Hindsight, Tracer::OtJaeger]
        );
        assert_eq!(config.params.out_root, PathBuf::from("/res"));

        assert_eq!(parse(&["--fromscratch"]).unwrap().mode, ResumeMode::FromScratch);
        assert!(parse(&["--tracing", "none,zipkin"]).is_err());
        assert!(parse(&["--openloop", "100,fast"]).is_err());
        assert!(parse(&["--sampling", "0,-1"]).is_err());
    }

    #[test]
    fn test_manifest_written() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExperimentConfig {
            benchmark: Benchmark::Two,
            out: dir.path().to_path_buf(),
            tmp: None,
            tools: ToolPaths {
                build_dir: "/b".into(),
                hindsight_dir: "/h".into(),
                ot_collector: "/o".into(),
                config_dir: "/c".into(),
            },
            server_concurrency: 8,
            server_rate: 10,
            nocompute: false,
            tracer: Tracer::Hindsight,
            clients: 2,
            requests: 50,
            openloop: true,
            sampling: Some("0.01".into()),
            duration: Duration::from_secs(30),
            settle: Duration::from_secs(5),
            silent: true,
        };
        let processes = vec![LaunchRecord {
            label: "service1".into(),
            pid: 42,
            command: "/b/server service1".into(),
            log: dir.path().join("service1.out"),
        }];
        let manifest = RunManifest::new(&config, Utc::now(), StopReason::Elapsed, &processes);
        let path = manifest.write(dir.path()).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["tracer"], "hindsight");
        assert_eq!(json["benchmark"], "two");
        assert_eq!(json["stop_reason"], "elapsed");
        assert_eq!(json["sampling"], "0.01");
        assert_eq!(json["processes"][0]["pid"], 42);
        assert!(json["system_info"]["cpu_cores"].as_u64().unwrap() > 0);
    }
}
