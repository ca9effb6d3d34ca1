//! Drives every registered strategy through a pass an' gathers the results
//!
//! A pass, per strategy, in registration order:
//!
//! 1. `prepare` (untimed)
//! 2. one untimed validation call against [`reference_value`], if enabled
//! 3. [`Sampler::run`] fer `count` timed calls
//! 4. a [`MetricsSnapshot`] taken straight efter
//!
//! A strategy that fails at any step is left oot o' the results an' listed
//! in [`BenchReport::failures`] instead. Only a snapshot failure stops the
//! whole run.

use std::fmt::Write as _;
use std::time::Duration;

use serde::Serialize;

use crate::error::{
    BenchError, BenchResult, Phase, RangeError, StrategyError, StrategyFailure,
};
use crate::logging::{field, LogLevel, LoggerCore, SpanGuard};
use crate::metrics::{format_snapshot, MetricsReporter, MetricsSnapshot};
use crate::recurrence::reference_value;
use crate::sampler::Sampler;
use crate::strategy::{
    default_strategies, ExecutorSharing, InvocationStrategy, PassContext, PassOptions,
    PreparedInvocation, StrategyKind,
};

const TARGET: &str = "haversbench::runner";

/// Whit wan strategy produced in a pass
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkResult {
    pub strategy: String,
    pub kind: StrategyKind,
    pub mean: Duration,
    pub mean_ms: f64,
    pub samples: usize,
    /// The validated value, when validation ran
    pub result: Option<i64>,
    pub snapshot: MetricsSnapshot,
}

/// Flat export row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRecord {
    pub strategy: String,
    pub mean_latency_ms: f64,
    pub free_kb: u64,
    pub allocated_kb: u64,
    pub max_kb: u64,
    pub total_available_kb: u64,
}

impl From<&BenchmarkResult> for ResultRecord {
    fn from(result: &BenchmarkResult) -> Self {
        ResultRecord {
            strategy: result.strategy.clone(),
            mean_latency_ms: result.mean_ms,
            free_kb: result.snapshot.free_kb,
            allocated_kb: result.snapshot.allocated_kb,
            max_kb: result.snapshot.max_kb,
            total_available_kb: result.snapshot.total_available_kb(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub strategy: String,
    pub phase: Phase,
    pub error: String,
}

impl From<&StrategyFailure> for FailureRecord {
    fn from(failure: &StrategyFailure) -> Self {
        FailureRecord {
            strategy: failure.strategy.clone(),
            phase: failure.phase,
            error: failure.error.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ReportDocument {
    results: Vec<ResultRecord>,
    failures: Vec<FailureRecord>,
}

/// Everythin' a pass produced
#[derive(Debug, Clone)]
pub struct BenchReport {
    pub input: i64,
    pub count: usize,
    pub executor_sharing: ExecutorSharing,
    pub results: Vec<BenchmarkResult>,
    pub failures: Vec<StrategyFailure>,
}

impl BenchReport {
    fn new(input: i64, count: usize, executor_sharing: ExecutorSharing) -> Self {
        BenchReport {
            input,
            count,
            executor_sharing,
            results: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn get(&self, strategy: &str) -> Option<&BenchmarkResult> {
        self.results.iter().find(|r| r.strategy == strategy)
    }

    pub fn failure(&self, strategy: &str) -> Option<&StrategyFailure> {
        self.failures.iter().find(|f| f.strategy == strategy)
    }

    /// True when strategies ran an' none o' them made it
    pub fn all_failed(&self) -> bool {
        self.results.is_empty() && !self.failures.is_empty()
    }

    pub fn to_records(&self) -> Vec<ResultRecord> {
        self.results.iter().map(ResultRecord::from).collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        let doc = ReportDocument {
            results: self.to_records(),
            failures: self.failures.iter().map(FailureRecord::from).collect(),
        };
        serde_json::to_string_pretty(&doc)
    }

    /// Plain-text summary, strategies in registration order
    pub fn render(&self) -> String {
        let mut out = String::new();
        let sharing = match self.executor_sharing {
            ExecutorSharing::Fresh => "fresh per strategy",
            ExecutorSharing::Shared => "shared across strategies",
        };
        let _ = writeln!(
            out,
            "input {} x {} runs (executor {})",
            self.input, self.count, sharing
        );
        for result in &self.results {
            let _ = writeln!(out);
            let _ = writeln!(out, "== {} ({}) ==", result.strategy, result.kind);
            let _ = writeln!(out, "Mean latency: {:.6} ms", result.mean_ms);
            out.push_str(&format_snapshot(&result.snapshot));
        }
        if !self.failures.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Failures:");
            for failure in &self.failures {
                let _ = writeln!(out, "  {}", failure);
            }
        }
        out
    }
}

/// Outcome o' preparin' an' validatin' wan strategy without samplin'
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub strategy: String,
    pub result: Result<i64, StrategyFailure>,
}

pub struct BenchmarkRunner {
    strategies: Vec<Box<dyn InvocationStrategy>>,
    options: PassOptions,
    sampler: Sampler,
    reporter: MetricsReporter,
    validate: bool,
    logger: LoggerCore,
}

impl BenchmarkRunner {
    /// A runner wi' nae strategies registered yet
    pub fn new() -> Self {
        BenchmarkRunner {
            strategies: Vec::new(),
            options: PassOptions::default(),
            sampler: Sampler::new(),
            reporter: MetricsReporter::process(),
            validate: true,
            logger: LoggerCore::new(),
        }
    }

    /// Native, precompiled an' adhoc, in that order
    pub fn with_default_strategies() -> Self {
        let mut runner = Self::new();
        runner.strategies = default_strategies();
        runner
    }

    pub fn with_options(mut self, options: PassOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_reporter(mut self, reporter: MetricsReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub fn with_logger(mut self, logger: LoggerCore) -> Self {
        self.logger = logger;
        self
    }

    pub fn register(&mut self, strategy: Box<dyn InvocationStrategy>) -> BenchResult<()> {
        if self.strategies.iter().any(|s| s.name() == strategy.name()) {
            return Err(BenchError::DuplicateStrategy {
                name: strategy.name().to_string(),
            });
        }
        self.strategies.push(strategy);
        Ok(())
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn options(&self) -> &PassOptions {
        &self.options
    }

    pub fn logger(&self) -> &LoggerCore {
        &self.logger
    }

    /// Run a full pass ower every registered strategy
    pub fn run_all(&mut self, input: i64, count: usize) -> BenchResult<BenchReport> {
        if count == 0 {
            return Err(BenchError::InvalidCount { count });
        }

        self.logger.emit(
            LogLevel::Blether,
            TARGET,
            "startin' benchmark pass",
            vec![
                field("strategies", self.strategies.len()),
                field("input", input),
                field("count", count),
            ],
        );

        let mut report = BenchReport::new(input, count, self.options.executor_sharing);
        let mut ctx = PassContext::new(self.options.clone());

        for strategy in &self.strategies {
            let _span = SpanGuard::enter(strategy.name(), LogLevel::Blether, TARGET);

            let prepared = prepare_and_validate(
                strategy.as_ref(),
                &mut ctx,
                input,
                self.validate,
                &mut self.logger,
            );
            let (mut handle, result) = match prepared {
                Ok(prepared) => prepared,
                Err(failure) => {
                    log_failure(&mut self.logger, &failure);
                    report.failures.push(failure);
                    continue;
                }
            };

            let sample = match self.sampler.run(handle.as_mut(), input, count) {
                Ok(sample) => sample,
                Err(error) => {
                    let failure = StrategyFailure {
                        strategy: strategy.name().to_string(),
                        phase: Phase::Invoke,
                        error,
                    };
                    log_failure(&mut self.logger, &failure);
                    report.failures.push(failure);
                    continue;
                }
            };

            let snapshot = self.reporter.snapshot()?;
            let mean_ms = sample.mean_ms().unwrap_or(0.0);

            self.logger.emit(
                LogLevel::Blether,
                TARGET,
                "strategy done",
                vec![
                    field("mean_ms", mean_ms),
                    field("samples", sample.len()),
                ],
            );

            report.results.push(BenchmarkResult {
                strategy: strategy.name().to_string(),
                kind: strategy.kind(),
                mean: sample.mean().unwrap_or_default(),
                mean_ms,
                samples: sample.len(),
                result,
                snapshot,
            });
        }

        Ok(report)
    }

    /// Prepare an' validate every strategy, nae samplin'
    pub fn check(&mut self, input: i64) -> Vec<CheckOutcome> {
        let mut ctx = PassContext::new(self.options.clone());
        let mut outcomes = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            let _span = SpanGuard::enter(strategy.name(), LogLevel::Blether, TARGET);
            let prepared =
                prepare_and_validate(strategy.as_ref(), &mut ctx, input, true, &mut self.logger);
            let result = match prepared {
                Ok((_, Some(value))) => Ok(value),
                Ok((_, None)) => Ok(reference_value(input.max(0) as u64)),
                Err(failure) => {
                    log_failure(&mut self.logger, &failure);
                    Err(failure)
                }
            };
            outcomes.push(CheckOutcome {
                strategy: strategy.name().to_string(),
                result,
            });
        }
        outcomes
    }
}

impl Default for BenchmarkRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BenchmarkRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BenchmarkRunner")
            .field("strategies", &self.strategy_names())
            .field("options", &self.options)
            .field("validate", &self.validate)
            .finish_non_exhaustive()
    }
}

type Prepared = (Box<dyn PreparedInvocation>, Option<i64>);

fn prepare_and_validate(
    strategy: &dyn InvocationStrategy,
    ctx: &mut PassContext,
    input: i64,
    validate: bool,
    logger: &mut LoggerCore,
) -> Result<Prepared, StrategyFailure> {
    let fail = |phase: Phase, error: StrategyError| StrategyFailure {
        strategy: strategy.name().to_string(),
        phase,
        error,
    };

    logger.emit(
        LogLevel::Mutter,
        TARGET,
        "preparin' strategy",
        vec![field("kind", strategy.kind().to_string())],
    );
    let mut handle = strategy
        .prepare(ctx)
        .map_err(|e| fail(Phase::Prepare, e))?;

    if !validate {
        return Ok((handle, None));
    }

    let got = handle
        .invoke(input)
        .map_err(|e| fail(Phase::Validate, e))?;

    // Only inputs inside the cache hae a reference value
    let capacity = ctx.capacity();
    let expected = usize::try_from(input)
        .ok()
        .filter(|&n| n < capacity)
        .map(|n| reference_value(n as u64));

    match expected {
        Some(expected) if expected == got => Ok((handle, Some(got))),
        Some(expected) => Err(fail(Phase::Validate, StrategyError::Mismatch { expected, got })),
        None => Err(fail(
            Phase::Validate,
            StrategyError::Range(RangeError {
                index: input,
                capacity,
            }),
        )),
    }
}

fn log_failure(logger: &mut LoggerCore, failure: &StrategyFailure) {
    logger.emit(
        LogLevel::Holler,
        TARGET,
        "strategy dropped",
        vec![
            field("phase", failure.phase.to_string()),
            field("error", failure.error.to_string()),
        ],
    );
}
