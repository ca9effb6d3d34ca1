//! haversbench - how much does it cost tae call the same sum different ways?
//!
//! A memoized Fibonacci recurrence is invoked through three strategies: a
//! plain native call, a routine precompiled intae a wee Scots scripting
//! runtime an' invoked by name, an' a script unit evaluated against a fresh
//! binding scope per call. The harness times each one, takes a memory
//! snapshot efter each pass, an' reports the mean latency.
//!
//! The scripting runtime (lexer, parser, interpreter) lives in this crate too,
//! but the harness only reaches it through the [`executor::Executor`] trait.

pub mod ast;
pub mod config;
pub mod error;
pub mod executor;
pub mod interpreter;
pub mod lexer;
pub mod logging;
pub mod metrics;
pub mod parser;
pub mod recurrence;
pub mod runner;
pub mod sampler;
pub mod strategy;
pub mod token;
pub mod value;

// Re-export commonly used types
pub use config::BenchConfig;
pub use error::{BenchError, BenchResult, HaversError, HaversResult, StrategyError};
pub use executor::{Bindings, Executor, ScriptExecutor};
pub use interpreter::Interpreter;
pub use parser::parse;
pub use recurrence::RecurrenceEngine;
pub use runner::{BenchReport, BenchmarkResult, BenchmarkRunner};
pub use strategy::{InvocationStrategy, PreparedInvocation};
pub use value::Value;

/// Run a script wi' the recurrence host object available
///
/// # Example
/// ```
/// use haversbench::run;
///
/// let code = r#"
///     ken r = recurrence()
///     r.get(10)
/// "#;
/// let result = run(code);
/// ```
pub fn run(source: &str) -> HaversResult<Value> {
    let program = parse(source)?;
    let mut interpreter = Interpreter::new();
    interpreter.set_echo(false);
    executor::register_host_natives(&mut interpreter, recurrence::DEFAULT_CAPACITY);
    interpreter.interpret(&program)
}

/// Run a script an' capture whit it blethered
pub fn run_with_output(source: &str) -> HaversResult<(Value, Vec<String>)> {
    let program = parse(source)?;
    let mut interpreter = Interpreter::new();
    interpreter.set_echo(false);
    executor::register_host_natives(&mut interpreter, recurrence::DEFAULT_CAPACITY);
    let result = interpreter.interpret(&program)?;
    let output = interpreter.get_output().to_vec();
    Ok((result, output))
}
