//! Evaluation workflow for one benchmark.

use std::path::{Path, PathBuf};

use super::classify::{assess, speedup, Baseline};
use super::score::{MeanClampedError, Scorer};
use super::source::{ConfigSource, FileConfigSource};
use crate::executors::{benchmark_dir, BuildArgs, Phase, RunArgs};
use crate::memo::MemoClient;
use crate::types::config::Settings;
use crate::types::evaluation::{BuildOutcome, EvaluationResult, RunOutcome, Status};
use crate::types::job::{Configuration, Job};
use crate::{AcceptError, AcceptResult};

/// Precise measurements everything else is compared against.
#[derive(Debug, Clone)]
pub struct BaselineRun {
    pub result: EvaluationResult,
    /// Output of the first successful replicate.
    pub output: Vec<f64>,
    pub time: Option<f64>,
}

/// Drives build, run and classification of one benchmark through a
/// [`MemoClient`].
///
/// The evaluator itself never waits on anything but `get`: it submits every
/// job of a phase first and then collects, so the backend sees all the work
/// that can run in parallel.
pub struct Evaluator<'a> {
    appdir: PathBuf,
    settings: &'a Settings,
    client: &'a MemoClient,
    scorer: Box<dyn Scorer>,
    source: Box<dyn ConfigSource>,
    baseline: Option<BaselineRun>,
    test_baseline: Option<BaselineRun>,
    results: Vec<EvaluationResult>,
}

impl<'a> Evaluator<'a> {
    /// Evaluator for the benchmark in `appdir` with the default scorer and
    /// configuration file.
    pub fn new(appdir: &Path, settings: &'a Settings, client: &'a MemoClient) -> AcceptResult<Self> {
        Ok(Self {
            appdir: benchmark_dir(appdir)?,
            settings,
            client,
            scorer: Box::new(MeanClampedError),
            source: Box::new(FileConfigSource::new(&settings.config.eval.configs_file)),
            baseline: None,
            test_baseline: None,
            results: Vec::new(),
        })
    }

    #[must_use]
    pub fn with_scorer(mut self, scorer: Box<dyn Scorer>) -> Self {
        self.scorer = scorer;
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: Box<dyn ConfigSource>) -> Self {
        self.source = source;
        self
    }

    pub fn appdir(&self) -> &Path {
        &self.appdir
    }

    /// Benchmark name (directory name).
    pub fn name(&self) -> String {
        self.appdir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.appdir.display().to_string())
    }

    /// Baseline from the search pass, once [`setup`](Self::setup) ran.
    pub fn baseline(&self) -> Option<&BaselineRun> {
        self.baseline.as_ref()
    }

    /// Baseline from the verification pass, once
    /// [`test_results`](Self::test_results) ran.
    pub fn test_baseline(&self) -> Option<&BaselineRun> {
        self.test_baseline.as_ref()
    }

    /// Results of the last [`run`](Self::run).
    pub fn results(&self) -> &[EvaluationResult] {
        &self.results
    }

    /// Builds and runs the precise baseline. Idempotent.
    pub async fn setup(&mut self) -> AcceptResult<&BaselineRun> {
        if self.baseline.is_none() {
            let baseline = self.measure_baseline(self.settings.reps, Phase::Search).await?;
            self.baseline = Some(baseline);
        }
        self.baseline
            .as_ref()
            .ok_or_else(|| AcceptError::user("baseline unavailable"))
    }

    /// Per-replicate baseline timings.
    pub async fn precise_times(&mut self) -> AcceptResult<Vec<Option<f64>>> {
        Ok(self.setup().await?.result.durations.clone())
    }

    /// Evaluates every approximate configuration at the search replication
    /// factor.
    pub async fn run(&mut self) -> AcceptResult<Vec<EvaluationResult>> {
        self.setup().await?;
        let configs = self.source.configurations(&self.appdir)?;
        tracing::info!(benchmark = %self.name(), configs = configs.len(), "evaluating configurations");

        let results = self.evaluate(configs, self.settings.reps, Phase::Search).await?;
        self.results = results.clone();
        Ok(results)
    }

    /// Re-runs the configurations classified good at the verification
    /// replication factor, against a freshly measured baseline.
    pub async fn test_results(
        &mut self,
        results: &[EvaluationResult],
    ) -> AcceptResult<Vec<EvaluationResult>> {
        let reps = self.settings.test_reps;
        let baseline = self.measure_baseline(reps, Phase::Test).await?;
        self.test_baseline = Some(baseline);

        let good: Vec<Configuration> = results
            .iter()
            .filter(|r| r.status == Status::Good)
            .map(|r| r.config.clone())
            .collect();
        tracing::info!(benchmark = %self.name(), configs = good.len(), reps, "verifying good configurations");

        self.evaluate(good, reps, Phase::Test).await
    }

    async fn measure_baseline(&self, reps: usize, phase: Phase) -> AcceptResult<BaselineRun> {
        let config = Configuration::precise();
        let build_job = self.build_job(&config)?;
        self.client.submit(&build_job)?;
        let build: BuildOutcome = self.client.get(&build_job).await?;
        let artifact = match (&build.artifact_dir, build.success) {
            (Some(dir), true) => dir.clone(),
            _ => {
                return Err(AcceptError::user(format!(
                    "precise build of {} failed: {}",
                    self.name(),
                    build.failure_summary()
                )))
            }
        };

        let jobs = self.run_jobs(&artifact, &config, reps, phase)?;
        self.submit_all(&jobs)?;
        let replicates = self.collect_runs(&jobs).await?;

        let output = replicates
            .iter()
            .find_map(|r| r.output.clone())
            .ok_or_else(|| {
                AcceptError::user(format!(
                    "precise version of {} produced no output",
                    self.name()
                ))
            })?;

        let (outputs, durations): (Vec<_>, Vec<_>) =
            replicates.into_iter().map(|r| (r.output, r.duration)).unzip();
        let mut result = EvaluationResult {
            config,
            outputs,
            durations,
            status: Status::Precise,
            deviation: Some(0.0),
            speedup: None,
            error: None,
        };
        let time = result.mean_duration();
        result.speedup = speedup(time, time);

        tracing::debug!(benchmark = %self.name(), ?time, ?phase, "baseline measured");
        Ok(BaselineRun {
            result,
            output,
            time,
        })
    }

    async fn evaluate(
        &self,
        configs: Vec<Configuration>,
        reps: usize,
        phase: Phase,
    ) -> AcceptResult<Vec<EvaluationResult>> {
        let baseline = match phase {
            Phase::Search => self.baseline.as_ref(),
            Phase::Test => self.test_baseline.as_ref(),
        }
        .ok_or_else(|| AcceptError::user("baseline has not been measured"))?;

        // Builds first, all at once.
        let build_jobs = configs
            .iter()
            .map(|c| self.build_job(c))
            .collect::<AcceptResult<Vec<_>>>()?;
        self.submit_all(&build_jobs)?;
        let mut builds: Vec<BuildOutcome> = Vec::with_capacity(build_jobs.len());
        for job in &build_jobs {
            builds.push(self.client.get(job).await?);
        }

        // Then every replicate of every configuration that built.
        let mut run_jobs: Vec<Option<Vec<Job>>> = Vec::with_capacity(configs.len());
        for (config, build) in configs.iter().zip(&builds) {
            let jobs = match (&build.artifact_dir, build.success) {
                (Some(dir), true) => {
                    let jobs = self.run_jobs(dir, config, reps, phase)?;
                    self.submit_all(&jobs)?;
                    Some(jobs)
                }
                _ => {
                    tracing::info!(config = %config, "build failed; skipping runs");
                    None
                }
            };
            run_jobs.push(jobs);
        }

        let reference = Baseline {
            output: &baseline.output,
            time: baseline.time,
        };
        let tolerance = self.settings.config.eval.tolerance;

        let mut results = Vec::with_capacity(configs.len());
        for ((config, build), jobs) in configs.into_iter().zip(builds).zip(run_jobs) {
            let result = match jobs {
                None => EvaluationResult::build_error(config, build.failure_summary()),
                Some(jobs) => {
                    let replicates = self.collect_runs(&jobs).await?;
                    assess(config, replicates, reference, self.scorer.as_ref(), tolerance)
                }
            };
            tracing::debug!(
                config = %result.config,
                status = %result.status,
                deviation = ?result.deviation,
                "configuration classified"
            );
            results.push(result);
        }
        Ok(results)
    }

    fn build_job(&self, config: &Configuration) -> AcceptResult<Job> {
        BuildArgs::new(&self.appdir, config.clone(), self.settings)?.job()
    }

    fn run_jobs(
        &self,
        artifact: &Path,
        config: &Configuration,
        reps: usize,
        phase: Phase,
    ) -> AcceptResult<Vec<Job>> {
        (0..reps)
            .map(|rep| RunArgs::new(artifact, config.clone(), rep, phase, self.settings).job())
            .collect()
    }

    fn submit_all(&self, jobs: &[Job]) -> AcceptResult<()> {
        for job in jobs {
            self.client.submit(job)?;
        }
        Ok(())
    }

    /// Collects already submitted replicates in order.
    async fn collect_runs(&self, jobs: &[Job]) -> AcceptResult<Vec<RunOutcome>> {
        let mut outcomes = Vec::with_capacity(jobs.len());
        for job in jobs {
            outcomes.push(self.client.get::<RunOutcome>(job).await?);
        }
        Ok(outcomes)
    }
}
