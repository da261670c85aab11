//! # Experiment Matrix Generator
//!
//! Enumerates every experiment of a sweep as an [`ExperimentDescriptor`]:
//! closed-loop configurations first, then open-loop ones; within each, workload
//! points, tracers and sample rates in input order, then repeats `1..=N`.
//!
//! ## Naming
//!
//! `<workload>-<aggregate load>-notracing` for the `none` tracer and
//! `<workload>-<aggregate load>-<tracer>-<sample rate>` otherwise. Repeat 1 is
//! unsuffixed and repeats 2..N get `-<repeat>`. Names depend only on the input
//! parameters, which is what makes interrupted sweeps resumable: the output
//! directory `<out>/out/<name>` of a finished experiment is found again on the
//! next invocation.
//!
//! ## Cutoffs
//!
//! Some (tracer, sample rate) combinations are known to saturate the system
//! above a certain aggregate request rate. Open-loop configurations above the
//! cutoff are left out entirely (all repeats) and counted in
//! [`Matrix::cutoff_skips`]. Closed-loop points are concurrencies, not rates,
//! and are never cut off.

use crate::cli::{ConfigError, Tracer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Shape of the client load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Workload {
    /// A fixed number of outstanding requests per client
    ClosedLoop,
    /// A fixed request rate per client
    OpenLoop,
}

impl Workload {
    pub fn name(&self) -> &'static str {
        match self {
            Workload::ClosedLoop => "closedloop",
            Workload::OpenLoop => "openloop",
        }
    }
}

impl std::fmt::Display for Workload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One experiment of a sweep
///
/// `exists` records whether the output directory existed when the matrix was
/// generated; it is not re-checked later.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentDescriptor {
    pub name: String,
    pub workload: Workload,
    pub tracer: Tracer,
    /// Per-client concurrency or rate, as passed to the client binary
    pub requests_per_client: u64,
    /// Aggregate load across all clients
    pub requests: u64,
    pub samplerate: String,
    pub repeat: u32,
    pub outdir: PathBuf,
    pub tmpdir: PathBuf,
    pub command: Vec<String>,
    pub exists: bool,
}

/// Maximum aggregate request rate per (tracer, sample rate)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CutoffTable {
    limits: HashMap<(Tracer, String), u64>,
}

impl CutoffTable {
    pub fn empty() -> Self {
        Self {
            limits: HashMap::new(),
        }
    }

    pub fn insert(&mut self, tracer: Tracer, samplerate: &str, max_rate: u64) {
        self.limits.insert((tracer, samplerate.to_string()), max_rate);
    }

    pub fn get(&self, tracer: Tracer, samplerate: &str) -> Option<u64> {
        self.limits.get(&(tracer, samplerate.to_string())).copied()
    }
}

impl Default for CutoffTable {
    /// The collector drops spans when every request is sampled above ~45k r/s
    fn default() -> Self {
        let mut table = Self::empty();
        table.insert(Tracer::OtJaeger, "1", 45057);
        table
    }
}

/// Inputs of a sweep's experiment matrix
#[derive(Debug, Clone)]
pub struct MatrixParams {
    pub closedloop: Vec<u64>,
    pub openloop: Vec<u64>,
    pub clients: u32,
    pub tracers: Vec<Tracer>,
    pub samplerates: Vec<String>,
    pub repeat: u32,
    pub out_root: PathBuf,
    pub cutoffs: CutoffTable,
}

/// Configurations left out because of a cutoff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CutoffSkip {
    pub tracer: Tracer,
    pub samplerate: String,
    pub cutoff: u64,
    /// Number of workload points skipped (each covering all repeats)
    pub count: usize,
}

impl std::fmt::Display for CutoffSkip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Skipping {} experiments for {}-{} (cutoff at {} r/s)",
            self.count, self.tracer, self.samplerate, self.cutoff
        )
    }
}

/// Result of matrix generation
#[derive(Debug, Clone)]
pub struct Matrix {
    pub experiments: Vec<ExperimentDescriptor>,
    pub cutoff_skips: Vec<CutoffSkip>,
}

/// Output directory of every experiment lives under `<out>/out`
pub fn experiments_dir(out_root: &Path) -> PathBuf {
    out_root.join("out")
}

/// Scratch directory shared by all experiments of a sweep
pub fn scratch_dir(out_root: &Path) -> PathBuf {
    out_root.join("tmp")
}

/// Name of one experiment
pub fn experiment_name(
    workload: Workload,
    aggregate: u64,
    tracer: Tracer,
    samplerate: &str,
    repeat: u32,
) -> String {
    let base = if tracer == Tracer::None {
        format!("{}-{}-notracing", workload, aggregate)
    } else {
        format!("{}-{}-{}-{}", workload, aggregate, tracer, samplerate)
    };
    if repeat <= 1 {
        base
    } else {
        format!("{}-{}", base, repeat)
    }
}

/// Enumerate the experiments of a sweep
///
/// `make_command` receives each descriptor (with an empty `command`) and
/// returns the command line that runs it. Fails if a point's aggregate load
/// does not fit in a `u64`.
pub fn generate<F>(params: &MatrixParams, make_command: F) -> Result<Matrix, ConfigError>
where
    F: Fn(&ExperimentDescriptor) -> Vec<String>,
{
    let base_outdir = experiments_dir(&params.out_root);
    let tmpdir = scratch_dir(&params.out_root);
    let clients = u64::from(params.clients);

    let mut experiments = Vec::new();
    let mut cutoff_skips: Vec<CutoffSkip> = Vec::new();

    let points = params
        .closedloop
        .iter()
        .map(|&p| (Workload::ClosedLoop, p))
        .chain(params.openloop.iter().map(|&p| (Workload::OpenLoop, p)));

    for (workload, point) in points {
        let aggregate = point
            .checked_mul(clients)
            .ok_or(ConfigError::Overflow {
                point,
                clients: params.clients,
            })?;
        for &tracer in &params.tracers {
            let samplerates: Vec<&str> = if tracer == Tracer::None {
                vec!["0"]
            } else {
                params.samplerates.iter().map(String::as_str).collect()
            };

            for samplerate in samplerates {
                if workload == Workload::OpenLoop && tracer != Tracer::None {
                    if let Some(cutoff) = params.cutoffs.get(tracer, samplerate) {
                        if aggregate > cutoff {
                            match cutoff_skips
                                .iter_mut()
                                .find(|s| s.tracer == tracer && s.samplerate == samplerate)
                            {
                                Some(skip) => skip.count += 1,
                                None => cutoff_skips.push(CutoffSkip {
                                    tracer,
                                    samplerate: samplerate.to_string(),
                                    cutoff,
                                    count: 1,
                                }),
                            }
                            continue;
                        }
                    }
                }

                for repeat in 1..=params.repeat {
                    let name = experiment_name(workload, aggregate, tracer, samplerate, repeat);
                    let outdir = base_outdir.join(&name);
                    let exists = outdir.is_dir();
                    let mut descriptor = ExperimentDescriptor {
                        name,
                        workload,
                        tracer,
                        requests_per_client: point,
                        requests: aggregate,
                        samplerate: samplerate.to_string(),
                        repeat,
                        outdir,
                        tmpdir: tmpdir.clone(),
                        command: Vec::new(),
                        exists,
                    };
                    descriptor.command = make_command(&descriptor);
                    experiments.push(descriptor);
                }
            }
        }
    }

    Ok(Matrix {
        experiments,
        cutoff_skips,
    })
}

/// Options of the batch driver that are forwarded to every `run` invocation
#[derive(Debug, Clone)]
pub struct CommandTemplate {
    pub exe: PathBuf,
    pub benchmark: crate::cli::Benchmark,
    pub server_concurrency: u32,
    pub nocompute: bool,
    pub hindsight: PathBuf,
    pub ot_collector: PathBuf,
    pub build_dir: PathBuf,
    pub config_dir: PathBuf,
    pub clients: u32,
    pub duration_secs: u64,
}

impl CommandTemplate {
    /// The `run` command line for one experiment
    pub fn materialize(&self, e: &ExperimentDescriptor) -> Vec<String> {
        let path = |p: &Path| p.to_string_lossy().into_owned();
        let mut cmd = vec![path(&self.exe), "run".to_string()];
        cmd.extend(["--benchmark".to_string(), self.benchmark.to_string()]);
        cmd.extend([
            "--server-concurrency".to_string(),
            self.server_concurrency.to_string(),
        ]);
        if self.nocompute {
            cmd.push("--nocompute".to_string());
        }
        cmd.extend(["--tracing".to_string(), e.tracer.to_string()]);
        if e.tracer.is_trigger_based() {
            cmd.extend(["--hindsight".to_string(), path(&self.hindsight)]);
        } else if e.tracer.is_opentelemetry() {
            cmd.extend(["--ot-collector".to_string(), path(&self.ot_collector)]);
        }
        cmd.extend(["--build-dir".to_string(), path(&self.build_dir)]);
        cmd.extend(["--config-dir".to_string(), path(&self.config_dir)]);
        if e.workload == Workload::OpenLoop {
            cmd.push("--openloop".to_string());
        }
        cmd.extend(["-r".to_string(), e.requests_per_client.to_string()]);
        cmd.extend(["-c".to_string(), self.clients.to_string()]);
        cmd.extend(["-s".to_string(), e.samplerate.clone()]);
        cmd.push("--silent".to_string());
        cmd.extend(["-d".to_string(), self.duration_secs.to_string()]);
        cmd.extend(["--tmp".to_string(), path(&e.tmpdir)]);
        cmd.push(path(&e.outdir));
        cmd
    }
}
