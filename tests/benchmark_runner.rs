use std::cell::Cell;
use std::rc::Rc;

use haversbench::error::{BenchError, Phase, StrategyError};
use haversbench::logging::{LogFormat, LoggerCore};
use haversbench::metrics::{FixedProbe, MemoryCounters, MetricsReporter};
use haversbench::strategy::{
    AdHocCompileBindInvocation, ExecutorSharing, InvocationStrategy, NativeCall, PassContext,
    PassOptions, PrecompiledUnitInvocation, PreparedInvocation, StrategyKind,
};
use haversbench::BenchmarkRunner;
use pretty_assertions::assert_eq;

fn reporter() -> MetricsReporter {
    MetricsReporter::new(Box::new(FixedProbe(MemoryCounters {
        allocated_bytes: 32 * 1024 * 1024,
        max_bytes: 1024 * 1024 * 1024,
        live_heap_bytes: 12 * 1024 * 1024,
    })))
}

fn runner() -> BenchmarkRunner {
    BenchmarkRunner::new()
        .with_reporter(reporter())
        .with_logger(LoggerCore::in_memory(LogFormat::Json, 128))
}

/// Succeeds a fixed number o' times, then fails
struct Flaky {
    budget: usize,
}

struct FlakyHandle {
    left: Rc<Cell<usize>>,
}

impl PreparedInvocation for FlakyHandle {
    fn invoke(&mut self, input: i64) -> Result<i64, StrategyError> {
        let left = self.left.get();
        if left == 0 {
            return Err(StrategyError::Mismatch {
                expected: input,
                got: -1,
            });
        }
        self.left.set(left - 1);
        NativeCall::new()
            .prepare(&mut PassContext::new(PassOptions::new()))?
            .invoke(input)
    }
}

impl InvocationStrategy for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::NativeCall
    }

    fn prepare(
        &self,
        _ctx: &mut PassContext,
    ) -> Result<Box<dyn PreparedInvocation>, StrategyError> {
        Ok(Box::new(FlakyHandle {
            left: Rc::new(Cell::new(self.budget)),
        }))
    }
}

#[test]
fn runner_results_agree_across_strategies() {
    let mut runner = runner();
    runner.register(Box::new(NativeCall::new())).unwrap();
    runner.register(Box::new(PrecompiledUnitInvocation::new())).unwrap();
    runner.register(Box::new(AdHocCompileBindInvocation::new())).unwrap();

    let report = runner.run_all(80, 10).unwrap();
    let values: Vec<Option<i64>> = report.results.iter().map(|r| r.result).collect();
    assert_eq!(values, vec![Some(23_416_728_348_467_685); 3]);

    let kinds: Vec<StrategyKind> = report.results.iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![
            StrategyKind::NativeCall,
            StrategyKind::PrecompiledUnit,
            StrategyKind::AdHocCompileBind
        ]
    );
}

#[test]
fn runner_mid_sample_failure_is_flagged() {
    let mut runner = runner();
    // wan validation call plus four samples, then it falls ower
    runner.register(Box::new(Flaky { budget: 5 })).unwrap();
    runner.register(Box::new(NativeCall::new())).unwrap();

    let report = runner.run_all(20, 10).unwrap();
    assert!(report.get("flaky").is_none());
    assert_eq!(report.failure("flaky").map(|f| f.phase), Some(Phase::Invoke));
    assert_eq!(report.get("native").map(|r| r.samples), Some(10));
    assert!(report.results.len() + report.failures.len() == 2);
}

#[test]
fn runner_flaky_within_budget_succeeds() {
    let mut runner = runner();
    runner.register(Box::new(Flaky { budget: 11 })).unwrap();
    let report = runner.run_all(20, 10).unwrap();
    assert_eq!(report.get("flaky").map(|r| r.samples), Some(10));
}

#[test]
fn runner_count_zero_is_invalid() {
    let mut runner = BenchmarkRunner::with_default_strategies().with_reporter(reporter());
    let err = runner.run_all(80, 0).unwrap_err();
    assert!(matches!(err, BenchError::InvalidCount { count: 0 }));
}

#[test]
fn runner_shared_executor_pass() {
    let mut runner = BenchmarkRunner::with_default_strategies()
        .with_reporter(reporter())
        .with_logger(LoggerCore::in_memory(LogFormat::Text, 16))
        .with_options(PassOptions::new().with_executor_sharing(ExecutorSharing::Shared));

    let report = runner.run_all(45, 3).unwrap();
    assert_eq!(report.executor_sharing, ExecutorSharing::Shared);
    assert_eq!(report.results.len(), 3);
    assert!(report.render().contains("shared across strategies"));
}

#[test]
fn runner_snapshot_identity_holds_in_records() {
    let mut runner = BenchmarkRunner::with_default_strategies()
        .with_reporter(reporter())
        .with_logger(LoggerCore::in_memory(LogFormat::Compact, 16));
    let report = runner.run_all(12, 2).unwrap();
    for record in report.to_records() {
        assert_eq!(
            record.total_available_kb,
            record.free_kb + (record.max_kb - record.allocated_kb)
        );
    }
}

#[test]
fn runner_logs_json_records_per_strategy() {
    let mut runner = BenchmarkRunner::with_default_strategies()
        .with_reporter(reporter())
        .with_logger(LoggerCore::in_memory(LogFormat::Json, 64));
    runner.run_all(10, 1).unwrap();

    let spans: Vec<String> = runner
        .logger()
        .memory_entries()
        .iter()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .filter(|v| v["msg"] == "strategy done")
        .map(|v| v["span"][0].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(spans, vec!["native", "precompiled", "adhoc"]);
}

#[test]
fn runner_huge_capacity_runs_every_strategy() {
    let config = haversbench::BenchConfig {
        capacity: 2_000_000,
        ..Default::default()
    };
    let mut runner = config
        .into_runner()
        .with_reporter(reporter())
        .with_logger(LoggerCore::in_memory(LogFormat::Compact, 16));

    let report = runner.run_all(1_999_999, 1).unwrap();
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    let expected = haversbench::recurrence::reference_value(1_999_999);
    let values: Vec<Option<i64>> = report.results.iter().map(|r| r.result).collect();
    assert_eq!(values, vec![Some(expected); 3]);
}

#[test]
fn runner_logs_to_a_file_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("haversbench.log");
    let config = haversbench::BenchConfig {
        log_file: Some(path.to_string_lossy().to_string()),
        ..Default::default()
    };
    let mut runner = config.into_runner().with_reporter(reporter());
    runner.run_all(10, 1).unwrap();
    drop(runner);

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("startin' benchmark pass"));
    assert_eq!(text.matches("strategy done").count(), 3);
}
