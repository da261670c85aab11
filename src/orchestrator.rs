//! # Process Orchestrator
//!
//! Brings up one experiment's process topology, keeps it running for the
//! configured duration, then tears it down.
//!
//! ## Start Order
//!
//! 1. **Servers**: one per service of the topology. For trigger-based tracers the
//!    first server (in address-file order) receives the trigger, so every trace
//!    has a single trigger origin.
//! 2. **Backend**: collector and coordinator for trigger-based tracers, or the
//!    OpenTelemetry collector for `ot-jaeger`.
//! 3. **Settle delay**, then **agents**: one per service instance, trigger-based
//!    tracers only.
//! 4. **Client**: its log is what the result extractor reads.
//!
//! Every process leads its own process group and writes stdout and stderr to a
//! dedicated log file in the output directory. Stopping signals whole groups so
//! that grandchildren (e.g. binaries built by `go run`) go away too.
//!
//! ## Cancellation
//!
//! The settle delay and the run window are both raced against a
//! [`CancellationToken`]. Cancelling ends the run early but always goes through
//! the normal teardown.

use crate::cli::{Benchmark, ConfigError, RunArgs, Tracer, ToolArgs};
use crate::results::RunManifest;
use crate::topology::{ServiceEndpoint, Topology};
use crate::utils::{
    confirm, expand_tilde, format_duration, prepare_dirs, render_command, validate_sample_rate,
};
use anyhow::{Context, Result};
use chrono::Utc;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use std::fs::File;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared-memory queues the servers create per service
const SHM_QUEUES: [&str; 5] = [
    "complete_queue",
    "triggers_queue",
    "pool",
    "breadcrumbs_queue",
    "available_queue",
];

/// Where the servers' shared-memory queues live
pub const SHM_ROOT: &str = "/dev/shm";

/// How long a process group may take to exit after SIGINT before it is killed
pub const KILL_GRACE: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Locations of the external binaries and configuration files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    /// Holds `server`, `client` and `process`; also their working directory
    pub build_dir: PathBuf,
    /// Checkout whose `agent/` directory hosts agent, collector and coordinator
    pub hindsight_dir: PathBuf,
    pub ot_collector: PathBuf,
    pub config_dir: PathBuf,
}

impl ToolPaths {
    /// Resolve `~` and make every path absolute, since children run in other
    /// working directories
    pub fn from_args(args: &ToolArgs) -> Result<Self> {
        Ok(Self {
            build_dir: absolute(&args.build_dir)?,
            hindsight_dir: absolute(&args.hindsight)?,
            ot_collector: absolute(&args.ot_collector)?,
            config_dir: absolute(&args.config_dir)?,
        })
    }

    pub fn agent_dir(&self) -> PathBuf {
        self.hindsight_dir.join("agent")
    }
}

pub(crate) fn absolute(path: &Path) -> Result<PathBuf> {
    let path = expand_tilde(path);
    if path.is_absolute() {
        return Ok(path);
    }
    Ok(std::env::current_dir()
        .context("Failed to determine working directory")?
        .join(path))
}

/// Everything needed to run one experiment
#[derive(Debug, Clone)]
pub struct ExperimentConfig {
    pub benchmark: Benchmark,
    pub out: PathBuf,
    pub tmp: Option<PathBuf>,
    pub tools: ToolPaths,
    pub server_concurrency: u32,
    /// Agent bandwidth limit
    pub server_rate: u32,
    pub nocompute: bool,
    pub tracer: Tracer,
    pub clients: u32,
    /// Per-client concurrency (closed loop) or rate (open loop)
    pub requests: u64,
    pub openloop: bool,
    /// Trigger percentage or head-sampling probability, passed through verbatim
    pub sampling: Option<String>,
    pub duration: Duration,
    pub settle: Duration,
    pub silent: bool,
}

impl ExperimentConfig {
    pub fn from_args(args: &RunArgs) -> Result<Self> {
        let sampling = args
            .sampling
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);
        let config = Self {
            benchmark: args.tools.benchmark,
            out: absolute(&args.out)?,
            tmp: args.tmp.as_deref().map(absolute).transpose()?,
            tools: ToolPaths::from_args(&args.tools)?,
            server_concurrency: args.tools.server_concurrency,
            server_rate: args.server_rate,
            nocompute: args.tools.nocompute,
            tracer: args.tracing,
            clients: args.clients,
            requests: args.requests,
            openloop: args.openloop,
            sampling,
            duration: args.duration,
            settle: args.settle,
            silent: args.silent,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that must pass before anything is launched
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tracer.uses_otel_collector() && self.tmp.is_none() {
            return Err(ConfigError::MissingTmpDir(self.tracer));
        }
        if let Some(sampling) = &self.sampling {
            validate_sample_rate(sampling)?;
        }
        if self.clients == 0 {
            return Err(ConfigError::Zero("clients"));
        }
        Ok(())
    }

    fn tracing_description(&self) -> String {
        let tracer = self.tracer;
        match (&self.sampling, tracer.is_trigger_based(), tracer.is_opentelemetry()) {
            (None, true, _) => format!("tracing={}, no triggers", tracer),
            (Some(s), true, _) => format!("tracing={}, trigger={}", tracer, s),
            (None, false, true) => format!("tracing={}, no sampling", tracer),
            (Some(s), false, true) => format!("tracing={}, head-sampling={}", tracer, s),
            _ => format!("tracing={}", tracer),
        }
    }
}

/// Human-readable summary printed before an experiment starts
struct ExperimentSummary<'a> {
    config: &'a ExperimentConfig,
    topology: &'a Topology,
}

impl<'a> std::fmt::Display for ExperimentSummary<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let c = self.config;
        let services = self.topology.services().len();
        writeln!(f, "Benchmark {}:", c.benchmark)?;
        writeln!(f, "  Writing output to {}", c.out.display())?;
        match &c.tmp {
            Some(tmp) => writeln!(f, "  Writing temporary output to {}", tmp.display())?,
            None => writeln!(f, "  Not writing temporary output")?,
        }
        let compute = if c.nocompute { " nocompute" } else { "" };
        writeln!(
            f,
            "  Servers: {}{}, concurrency={}, {}",
            services,
            compute,
            c.server_concurrency,
            c.tracing_description()
        )?;
        let total = c.requests.saturating_mul(u64::from(c.clients));
        if c.openloop {
            writeln!(
                f,
                "  Clients: {} openloop, {} r/s ({} r/s total)",
                c.clients, c.requests, total
            )?;
        } else {
            writeln!(
                f,
                "  Clients: {} closedloop, concurrency {} ({} total)",
                c.clients, c.requests, total
            )?;
        }
        if c.tracer.is_trigger_based() {
            writeln!(f, "  Hindsight Agents: {}; 1 collector; 1 coordinator", services)?;
        } else if c.tracer.uses_otel_collector() {
            writeln!(f, "  OpenTelemetry Collectors: 1")?;
        }
        write!(f, "Benchmark duration: {}", format_duration(c.duration))
    }
}

/// A launched process group and the log file it writes to
#[derive(Debug)]
pub struct ProcessHandle {
    label: String,
    command_line: String,
    child: Child,
    log: Option<File>,
    log_path: PathBuf,
}

impl ProcessHandle {
    /// Spawn `cmd` as the leader of a new process group with stdout and stderr
    /// redirected to `log_path`
    pub fn spawn(label: impl Into<String>, mut cmd: Command, log_path: &Path) -> Result<Self> {
        let label = label.into();
        let log = File::create(log_path)
            .with_context(|| format!("Failed to create log file {}", log_path.display()))?;
        cmd.stdin(Stdio::null())
            .stdout(log.try_clone()?)
            .stderr(log.try_clone()?)
            .process_group(0);

        let command_line = render_command(&cmd);
        info!("{}", command_line);
        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to launch {}: {}", label, command_line))?;

        Ok(Self {
            label,
            command_line,
            child,
            log: Some(log),
            log_path: log_path.to_path_buf(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn is_log_open(&self) -> bool {
        self.log.is_some()
    }

    fn group(&self) -> Pid {
        // process_group(0) makes the child its own group leader
        Pid::from_raw(self.child.id() as i32)
    }

    /// Send SIGINT to the whole process group
    pub fn interrupt(&self) -> nix::Result<()> {
        killpg(self.group(), Signal::SIGINT)
    }

    /// SIGKILL whatever is left of the group; an empty group is not an error
    pub fn kill_group(&self) -> nix::Result<()> {
        match killpg(self.group(), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Wait for the leader to exit, killing the group once `grace` has passed
    ///
    /// The group is killed again after the leader is reaped, so members that
    /// ignore SIGINT (background jobs of a shell, binaries built by `go run`)
    /// do not outlive it.
    pub async fn wait_or_kill(&mut self, grace: Duration) -> std::io::Result<ExitStatus> {
        let deadline = tokio::time::Instant::now() + grace;
        let exited = loop {
            if let Some(status) = self.child.try_wait()? {
                break Some(status);
            }
            if tokio::time::Instant::now() >= deadline {
                break None;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        };

        let status = match exited {
            Some(status) => status,
            None => {
                warn!(
                    "{} (pid {}) did not exit after SIGINT; killing its process group",
                    self.label,
                    self.pid()
                );
                self.kill_now()?
            }
        };
        self.kill_group().map_err(std::io::Error::from)?;
        Ok(status)
    }

    /// Kill the group and reap the leader without waiting for a clean exit
    fn kill_now(&mut self) -> std::io::Result<ExitStatus> {
        if let Err(e) = self.kill_group() {
            warn!("Failed to kill process group of {}: {}", self.label, e);
        }
        self.child.wait()
    }

    pub fn close_log(&mut self) {
        self.log.take();
    }
}

/// A process that was started for the experiment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchRecord {
    pub label: String,
    pub pid: u32,
    pub command: String,
    pub log: PathBuf,
}

/// Why the run window ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    Elapsed,
    Cancelled,
}

/// Outcome of tearing down an experiment
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub stopped: usize,
    pub failures: Vec<String>,
}

/// Owns every process of one experiment
pub struct Orchestrator {
    config: ExperimentConfig,
    topology: Topology,
    handles: Vec<ProcessHandle>,
    launched: Vec<LaunchRecord>,
    kill_grace: Duration,
}

impl Orchestrator {
    pub fn new(config: ExperimentConfig, topology: Topology) -> Self {
        Self {
            config,
            topology,
            handles: Vec::new(),
            launched: Vec::new(),
            kill_grace: KILL_GRACE,
        }
    }

    /// Override how long teardown waits after SIGINT before SIGKILL
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Processes currently running for this experiment
    pub fn handles(&self) -> &[ProcessHandle] {
        &self.handles
    }

    /// Every process started so far, including ones already stopped
    pub fn launched(&self) -> &[LaunchRecord] {
        &self.launched
    }

    fn launch(&mut self, label: &str, cmd: Command, log_file: &str) -> Result<()> {
        let handle = ProcessHandle::spawn(label, cmd, &self.config.out.join(log_file))?;
        self.launched.push(LaunchRecord {
            label: handle.label().to_string(),
            pid: handle.pid(),
            command: handle.command_line().to_string(),
            log: handle.log_path().to_path_buf(),
        });
        self.handles.push(handle);
        Ok(())
    }

    fn path_arg(flag: &str, path: &Path) -> String {
        format!("{}={}", flag, path.display())
    }

    pub fn server_command(&self, service: &ServiceEndpoint, install_trigger: bool) -> Command {
        let c = &self.config;
        let mut cmd = Command::new(c.tools.build_dir.join("server"));
        cmd.current_dir(&c.tools.build_dir)
            .arg(Self::path_arg("--addresses", &self.topology.addresses_file()))
            .arg(Self::path_arg("--topology", &self.topology.topology_file()))
            .arg(format!("--concurrency={}", c.server_concurrency));
        if install_trigger {
            if let Some(sampling) = &c.sampling {
                cmd.arg(format!(
                    "--trigger={}:{}",
                    crate::defaults::TRIGGER_QUEUE_ID,
                    sampling
                ));
            }
        }
        if c.tracer.uses_otel_collector() {
            cmd.arg("--otel_host=localhost")
                .arg(format!("--otel_port={}", crate::defaults::OTEL_PORT));
        }
        if c.nocompute {
            cmd.arg("--nocompute");
        }
        cmd.arg(format!("--tracing={}", c.tracer)).arg(&service.name);
        cmd
    }

    pub fn start_servers(&mut self) -> Result<()> {
        let wants_trigger = self.config.tracer.is_trigger_based() && self.config.sampling.is_some();
        let services = self.topology.services().to_vec();
        for (i, service) in services.iter().enumerate() {
            let cmd = self.server_command(service, wants_trigger && i == 0);
            self.launch(&service.name, cmd, &format!("{}.out", service.name))?;
        }
        Ok(())
    }

    fn go_command(&self, main: &str) -> Command {
        let mut cmd = Command::new("go");
        cmd.current_dir(self.config.tools.agent_dir())
            .arg("run")
            .arg(main);
        cmd
    }

    pub fn start_backend(&mut self) -> Result<()> {
        let tracer = self.config.tracer;
        if tracer.is_trigger_based() {
            let mut collector = self.go_command("cmd/collector/main.go");
            collector
                .arg("-port")
                .arg(crate::defaults::COLLECTOR_PORT.to_string());
            if let Some(tmp) = &self.config.tmp {
                collector.arg("-out").arg(tmp.join("collector.out"));
            }
            self.launch("collector", collector, "hindsight_collector.out")?;

            let mut coordinator = self.go_command("cmd/coordinator/main.go");
            coordinator
                .arg("-port")
                .arg(crate::defaults::COORDINATOR_PORT.to_string());
            if let Some(tmp) = &self.config.tmp {
                coordinator.arg("-out").arg(tmp.join("coordinator.out"));
            }
            self.launch("coordinator", coordinator, "hindsight_coordinator.out")?;
        }

        if tracer.uses_otel_collector() {
            let mut cmd = Command::new(&self.config.tools.ot_collector);
            cmd.arg("--config").arg(self.topology.otel_config_file());
            if let Some(tmp) = &self.config.tmp {
                cmd.current_dir(tmp);
            }
            self.launch("opentelemetry collector", cmd, "opentelemetry_collector.out")?;
        }
        Ok(())
    }

    pub fn start_agents(&mut self) -> Result<()> {
        if !self.config.tracer.is_trigger_based() {
            return Ok(());
        }
        let coordinator = format!("localhost:{}", crate::defaults::COORDINATOR_PORT);
        let collector = format!("localhost:{}", crate::defaults::COLLECTOR_PORT);
        let services = self.topology.services().to_vec();
        for service in &services {
            let several = service.instances.len() > 1;
            for (i, instance) in service.instances.iter().enumerate() {
                let mut cmd = self.go_command("cmd/agent2/main.go");
                cmd.arg("-serv")
                    .arg(&service.name)
                    .arg("-host")
                    .arg(&instance.hostname)
                    .arg("-port")
                    .arg(&instance.agent_port)
                    .arg("-lc")
                    .arg(&coordinator)
                    .arg("-r")
                    .arg(&collector)
                    .arg("-rate")
                    .arg(self.config.server_rate.to_string());
                let log = if several {
                    format!("agent_{}_{}.out", service.name, i)
                } else {
                    format!("agent_{}.out", service.name)
                };
                self.launch(&format!("agent {}", service.name), cmd, &log)?;
            }
        }
        Ok(())
    }

    pub fn client_command(&self) -> Command {
        let c = &self.config;
        let mut cmd = Command::new(c.tools.build_dir.join("client"));
        cmd.current_dir(&c.tools.build_dir)
            .arg(Self::path_arg("--addresses", &self.topology.addresses_file()))
            .arg(Self::path_arg("--topology", &self.topology.topology_file()))
            .arg(format!("--concurrency={}", c.clients))
            .arg(format!("--requests={}", c.requests));
        if let Some(sampling) = &c.sampling {
            if c.tracer.is_opentelemetry() {
                cmd.arg(format!("--sampling={}", sampling));
            }
        }
        if c.openloop {
            cmd.arg("--openloop");
        }
        cmd.args(self.topology.gateways());
        cmd
    }

    pub fn start_client(&mut self) -> Result<()> {
        let cmd = self.client_command();
        self.launch("client", cmd, "client.out")
    }

    /// Launch everything in order
    ///
    /// Returns `false` if `cancel` fired during the settle delay, in which
    /// case agents and client were not started.
    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<bool> {
        self.start_servers()?;
        self.start_backend()?;

        tokio::select! {
            _ = tokio::time::sleep(self.config.settle) => {}
            _ = cancel.cancelled() => return Ok(false),
        }

        self.start_agents()?;
        self.start_client()?;
        Ok(true)
    }

    /// Block until the duration elapses or `cancel` fires
    pub async fn wait(&self, cancel: &CancellationToken) -> StopReason {
        tokio::select! {
            _ = tokio::time::sleep(self.config.duration) => StopReason::Elapsed,
            _ = cancel.cancelled() => StopReason::Cancelled,
        }
    }

    /// Record CPU and memory usage of every running process tree in `cpu.out`
    pub fn sample_usage(&self) -> Result<()> {
        if self.handles.is_empty() {
            return Ok(());
        }
        let pids = self
            .handles
            .iter()
            .map(|h| h.pid().to_string())
            .collect::<Vec<_>>()
            .join(",");
        let path = self.config.out.join("cpu.out");
        let log = File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        let mut cmd = Command::new("ps");
        cmd.args(["--ppid", pids.as_str(), "-p", pids.as_str(), "-o", "%cpu,%mem,cmd"]);
        info!("{}", render_command(&cmd));
        let status = cmd
            .stdin(Stdio::null())
            .stdout(log.try_clone()?)
            .stderr(log)
            .status()
            .context("Failed to run ps")?;
        if !status.success() {
            warn!("ps exited with {}", status);
        }
        Ok(())
    }

    /// Interrupt every process group, wait for each, and close every log
    ///
    /// Failures are logged and collected; they never stop the remaining
    /// processes from being torn down.
    pub async fn stop(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();

        for handle in &self.handles {
            if let Err(e) = handle.interrupt() {
                warn!("Failed to interrupt {} (pid {}): {}", handle.label(), handle.pid(), e);
                report
                    .failures
                    .push(format!("interrupt {}: {}", handle.label(), e));
            }
        }

        for handle in &mut self.handles {
            match handle.wait_or_kill(self.kill_grace).await {
                Ok(status) => debug!("{} exited with {}", handle.label(), status),
                Err(e) => {
                    warn!("Failed to wait for {} (pid {}): {}", handle.label(), handle.pid(), e);
                    report.failures.push(format!("wait {}: {}", handle.label(), e));
                }
            }
        }

        for handle in &mut self.handles {
            handle.close_log();
        }

        report.stopped = self.handles.len();
        self.handles.clear();
        report
    }

    /// Post-process the collector's trace output, if any was captured
    pub fn process_traces(&self) -> Result<()> {
        let Some(tmp) = &self.config.tmp else {
            return Ok(());
        };
        let build_dir = &self.config.tools.build_dir;
        let path = self.config.out.join("process.out");
        let log = File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        let mut cmd = Command::new(build_dir.join("process"));
        cmd.current_dir(build_dir).arg(tmp.join("collector.out"));
        let command_line = render_command(&cmd);
        info!("{}", command_line);
        let status = cmd
            .stdin(Stdio::null())
            .stdout(log.try_clone()?)
            .stderr(log)
            .status()
            .with_context(|| format!("Failed to launch {}", command_line))?;
        if !status.success() {
            warn!("Trace post-processing exited with {}", status);
        }
        Ok(())
    }

    /// Run the experiment from first launch to teardown
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<StopReason> {
        let started_at = Utc::now();
        info!("Running for {}", format_duration(self.config.duration));

        let reason = match self.start(cancel).await {
            Ok(true) => self.wait(cancel).await,
            Ok(false) => StopReason::Cancelled,
            Err(e) => {
                self.stop().await;
                return Err(e);
            }
        };
        if reason == StopReason::Cancelled {
            info!("Killing experiment processes...");
        }

        info!("Stopping benchmark...");
        if let Err(e) = self.sample_usage() {
            warn!("Failed to sample process usage: {:#}", e);
        }
        let report = self.stop().await;
        debug!(
            "Stopped {} processes ({} teardown failures)",
            report.stopped,
            report.failures.len()
        );
        self.process_traces()?;

        let manifest = RunManifest::new(&self.config, started_at, reason, &self.launched);
        if let Err(e) = manifest.write(&self.config.out) {
            warn!("Failed to write run manifest: {:#}", e);
        }
        Ok(reason)
    }
}

impl Drop for Orchestrator {
    /// Last-resort teardown when `run` did not get to stop the experiment
    fn drop(&mut self) {
        for handle in &mut self.handles {
            if let Err(e) = handle.kill_now() {
                warn!("Failed to reap {} (pid {}): {}", handle.label(), handle.pid(), e);
            }
            handle.close_log();
        }
        self.handles.clear();
    }
}

/// Remove the servers' shared-memory queues left over from a previous run
pub fn reset_shared_memory(root: &Path, services: &[ServiceEndpoint]) {
    for service in services {
        for queue in SHM_QUEUES {
            let path = root.join(format!("{}__{}", service.name, queue));
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }
    info!("Reset shm");
}

/// Everything the single-experiment driver does before the first launch:
/// load the topology, print the summary, confirm, clear shared memory and
/// create the output directories
pub fn prepare(config: ExperimentConfig) -> Result<Orchestrator> {
    let topology = Topology::load(config.benchmark, &config.tools.config_dir)?;
    info!("{}", ExperimentSummary { config: &config, topology: &topology });

    if !config.silent {
        confirm(&format!(
            "Proceed with benchmark {}? Press <return> to continue or CTRL-C to abort",
            config.benchmark
        ))?;
    }

    reset_shared_memory(Path::new(SHM_ROOT), topology.services());

    let mut dirs = vec![config.out.as_path()];
    if let Some(tmp) = &config.tmp {
        dirs.push(tmp.as_path());
    }
    prepare_dirs(&dirs, config.silent)?;

    Ok(Orchestrator::new(config, topology))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDRESSES: &str = r#"{"addresses": [
        {"name": "service1", "hostname": "localhost", "port": "9000", "agent_port": "5050"},
        {"name": "service2", "hostname": "localhost", "port": "9001", "agent_port": "5051"}
    ]}"#;

    fn config(tracer: Tracer, sampling: Option<&str>) -> ExperimentConfig {
        ExperimentConfig {
            benchmark: Benchmark::Two,
            out: PathBuf::from("/res/out/exp"),
            tmp: Some(PathBuf::from("/res/tmp")),
            tools: ToolPaths {
                build_dir: PathBuf::from("/opt/build"),
                hindsight_dir: PathBuf::from("/opt/hindsight"),
                ot_collector: PathBuf::from("/opt/otelcol"),
                config_dir: PathBuf::from("/opt/config"),
            },
            server_concurrency: 8,
            server_rate: 10,
            nocompute: false,
            tracer,
            clients: 4,
            requests: 100,
            openloop: true,
            sampling: sampling.map(String::from),
            duration: Duration::from_secs(1),
            settle: Duration::ZERO,
            silent: true,
        }
    }

    fn orchestrator(config: ExperimentConfig) -> Orchestrator {
        let topology =
            Topology::from_json_str(config.benchmark, &config.tools.config_dir, ADDRESSES).unwrap();
        Orchestrator::new(config, topology)
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_trigger_only_on_first_server() {
        let o = orchestrator(config(Tracer::Hindsight, Some("0.1")));
        let services = o.topology.services().to_vec();

        let first = args(&o.server_command(&services[0], true));
        assert_eq!(
            first,
            vec![
                "--addresses=/opt/config/two_addresses.json",
                "--topology=/opt/config/two_topology.json",
                "--concurrency=8",
                "--trigger=7:0.1",
                "--tracing=hindsight",
                "service1",
            ]
        );
        let second = args(&o.server_command(&services[1], false));
        assert!(!second.iter().any(|a| a.starts_with("--trigger")));
    }

    #[test]
    fn test_otel_collector_server_flags() {
        let mut c = config(Tracer::OtJaeger, Some("1"));
        c.nocompute = true;
        let o = orchestrator(c);
        let service = o.topology.services()[0].clone();
        let a = args(&o.server_command(&service, false));
        assert!(a.contains(&"--otel_host=localhost".to_string()));
        assert!(a.contains(&"--otel_port=6833".to_string()));
        assert!(a.contains(&"--nocompute".to_string()));
        assert_eq!(a.last().unwrap(), "service1");
    }

    #[test]
    fn test_client_command_sampling_only_for_opentelemetry() {
        let o = orchestrator(config(Tracer::OtLocal, Some("0.5")));
        let a = args(&o.client_command());
        assert_eq!(
            a,
            vec![
                "--addresses=/opt/config/two_addresses.json",
                "--topology=/opt/config/two_topology.json",
                "--concurrency=4",
                "--requests=100",
                "--sampling=0.5",
                "--openloop",
                "service1",
            ]
        );
        assert_eq!(o.client_command().get_program(), "/opt/build/client");

        let mut c = config(Tracer::Hindsight, Some("0.5"));
        c.openloop = false;
        let a = args(&orchestrator(c).client_command());
        assert!(!a.iter().any(|x| x.starts_with("--sampling")));
        assert!(!a.contains(&"--openloop".to_string()));
    }

    #[test]
    fn test_validate() {
        assert!(config(Tracer::Hindsight, Some("0.01")).validate().is_ok());

        let mut c = config(Tracer::OtJaeger, None);
        c.tmp = None;
        assert!(matches!(c.validate(), Err(ConfigError::MissingTmpDir(Tracer::OtJaeger))));

        let c = config(Tracer::Hindsight, Some("sometimes"));
        assert!(matches!(c.validate(), Err(ConfigError::InvalidSampleRate(_))));

        let mut c = config(Tracer::None, None);
        c.clients = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_summary_banner() {
        let o = orchestrator(config(Tracer::Hindsight, Some("0.01")));
        let text = ExperimentSummary {
            config: &o.config,
            topology: &o.topology,
        }
        .to_string();
        assert!(text.starts_with("Benchmark two:"));
        assert!(text.contains("Servers: 2, concurrency=8, tracing=hindsight, trigger=0.01"));
        assert!(text.contains("Clients: 4 openloop, 100 r/s (400 r/s total)"));
        assert!(text.contains("Hindsight Agents: 2; 1 collector; 1 coordinator"));
        assert!(text.ends_with("Benchmark duration: 1s"));
    }

    #[test]
    fn test_reset_shared_memory_removes_queues() {
        let dir = tempfile::tempdir().unwrap();
        let o = orchestrator(config(Tracer::None, None));
        std::fs::write(dir.path().join("service1__pool"), b"x").unwrap();
        std::fs::write(dir.path().join("service2__triggers_queue"), b"x").unwrap();
        std::fs::write(dir.path().join("unrelated"), b"x").unwrap();

        reset_shared_memory(dir.path(), o.topology.services());

        assert!(!dir.path().join("service1__pool").exists());
        assert!(!dir.path().join("service2__triggers_queue").exists());
        assert!(dir.path().join("unrelated").exists());
    }

    #[tokio::test]
    async fn test_wait_observes_cancellation() {
        let o = orchestrator(config(Tracer::None, None));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(o.wait(&cancel).await, StopReason::Cancelled);
    }

    #[tokio::test]
    async fn test_stop_reports_failed_interrupt_and_stops_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let mut o = orchestrator(config(Tracer::None, None));

        let mut exit = Command::new("sh");
        exit.args(["-c", "exit 0"]);
        let mut gone = ProcessHandle::spawn("gone", exit, &dir.path().join("gone.out")).unwrap();
        // reaped before stop, so its group no longer exists
        gone.child.wait().unwrap();

        let mut sleep = Command::new("sleep");
        sleep.arg("30");
        let running = ProcessHandle::spawn("running", sleep, &dir.path().join("running.out")).unwrap();
        let running_pid = Pid::from_raw(running.pid() as i32);

        o.handles.push(gone);
        o.handles.push(running);
        let report = o.stop().await;

        assert_eq!(report.stopped, 2);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].starts_with("interrupt gone:"));
        assert!(o.handles().is_empty());
        assert!(nix::sys::signal::kill(running_pid, None).is_err());
    }
}
