//! Interchangeable ways o' invokin' the recurrence
//!
//! Each [`InvocationStrategy`] is prepared once per pass (untimed) intae a
//! [`PreparedInvocation`] handle, an' the handle is invoked once per sample
//! (timed). The three built-in paths are:
//!
//! * [`NativeCall`] - straight intae [`RecurrenceEngine::get`], the baseline
//! * [`PrecompiledUnitInvocation`] - compile a routine once, call it by name
//! * [`AdHocCompileBindInvocation`] - compile a unit once, then evaluate it
//!   against a fresh binding scope fer every call

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::{ExecutorError, StrategyError};
use crate::executor::{Bindings, CompiledUnit, Executor, ScriptExecutor};
use crate::recurrence::{RecurrenceEngine, DEFAULT_CAPACITY};
use crate::value::Value;

/// Routine the precompiled unit registers
pub const PRECOMPILED_ROUTINE: &str = "fib";

pub const PRECOMPILED_SOURCE: &str = "\
dae fib(x) {
    ken engine = recurrence()
    gie engine.get(x)
}
";

pub const ADHOC_INPUT_SLOT: &str = "p";
pub const ADHOC_OUTPUT_SLOT: &str = "a";

pub const ADHOC_SOURCE: &str = "\
dae calc(x) {
    gie recurrence().get(x)
}
ken a = calc(p)
";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    NativeCall,
    PrecompiledUnit,
    AdHocCompileBind,
}

/// Whether a strategy builds a binding scope inside the timed region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingMode {
    None,
    FreshPerCall,
}

impl StrategyKind {
    pub fn binding_mode(&self) -> BindingMode {
        match self {
            StrategyKind::NativeCall | StrategyKind::PrecompiledUnit => BindingMode::None,
            StrategyKind::AdHocCompileBind => BindingMode::FreshPerCall,
        }
    }

    pub fn uses_executor(&self) -> bool {
        !matches!(self, StrategyKind::NativeCall)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::NativeCall => write!(f, "native call"),
            StrategyKind::PrecompiledUnit => write!(f, "precompiled unit"),
            StrategyKind::AdHocCompileBind => write!(f, "ad-hoc compile an' bind"),
        }
    }
}

/// Engine lifecycle fer the native baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineReuse {
    /// A new engine per invoke, like the scripts dae
    #[default]
    Fresh,
    /// One engine kept warm in the handle
    Reuse,
}

/// Whether script strategies in a pass share wan executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutorSharing {
    #[default]
    Fresh,
    Shared,
}

pub type SharedExecutor = Rc<RefCell<Box<dyn Executor>>>;
pub type ExecutorFactory = Rc<dyn Fn(usize) -> Result<Box<dyn Executor>, ExecutorError>>;

fn script_executor(capacity: usize) -> Result<Box<dyn Executor>, ExecutorError> {
    Ok(Box::new(ScriptExecutor::new(capacity)))
}

/// Knobs fixed fer a whole pass
#[derive(Clone)]
pub struct PassOptions {
    pub capacity: usize,
    pub engine_reuse: EngineReuse,
    pub executor_sharing: ExecutorSharing,
    factory: ExecutorFactory,
}

impl PassOptions {
    pub fn new() -> Self {
        PassOptions {
            capacity: DEFAULT_CAPACITY,
            engine_reuse: EngineReuse::default(),
            executor_sharing: ExecutorSharing::default(),
            factory: Rc::new(script_executor),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_engine_reuse(mut self, reuse: EngineReuse) -> Self {
        self.engine_reuse = reuse;
        self
    }

    pub fn with_executor_sharing(mut self, sharing: ExecutorSharing) -> Self {
        self.executor_sharing = sharing;
        self
    }

    /// Swap the executor the script strategies run on
    pub fn with_executor_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(usize) -> Result<Box<dyn Executor>, ExecutorError> + 'static,
    {
        self.factory = Rc::new(factory);
        self
    }
}

impl Default for PassOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PassOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassOptions")
            .field("capacity", &self.capacity)
            .field("engine_reuse", &self.engine_reuse)
            .field("executor_sharing", &self.executor_sharing)
            .finish_non_exhaustive()
    }
}

/// State scoped tae one benchmark pass, dropped when the pass ends
pub struct PassContext {
    options: PassOptions,
    shared: Option<SharedExecutor>,
    executors_created: usize,
}

impl PassContext {
    pub fn new(options: PassOptions) -> Self {
        PassContext {
            options,
            shared: None,
            executors_created: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.options.capacity
    }

    pub fn engine_reuse(&self) -> EngineReuse {
        self.options.engine_reuse
    }

    pub fn executor_sharing(&self) -> ExecutorSharing {
        self.options.executor_sharing
    }

    /// How many executors this pass has built so far
    pub fn executors_created(&self) -> usize {
        self.executors_created
    }

    /// An executor fer one strategy - new, or the pass-wide one when shared
    pub fn executor(&mut self) -> Result<SharedExecutor, ExecutorError> {
        if self.options.executor_sharing == ExecutorSharing::Shared {
            if let Some(shared) = &self.shared {
                return Ok(shared.clone());
            }
        }

        let exec: SharedExecutor = Rc::new(RefCell::new((self.options.factory)(self.capacity())?));
        self.executors_created += 1;
        if self.options.executor_sharing == ExecutorSharing::Shared {
            self.shared = Some(exec.clone());
        }
        Ok(exec)
    }
}

/// A prepared strategy, ready tae be invoked in the timed loop
pub trait PreparedInvocation {
    fn invoke(&mut self, input: i64) -> Result<i64, StrategyError>;
}

pub trait InvocationStrategy {
    fn name(&self) -> &str;
    fn kind(&self) -> StrategyKind;

    /// One-off, untimed setup fer a pass
    fn prepare(&self, ctx: &mut PassContext) -> Result<Box<dyn PreparedInvocation>, StrategyError>;
}

fn expect_integer(value: Value) -> Result<i64, StrategyError> {
    match value {
        Value::Integer(n) => Ok(n),
        other => Err(ExecutorError::UnexpectedType {
            expected: "integer".to_string(),
            found: other.type_name().to_string(),
        }
        .into()),
    }
}

fn lock(exec: &SharedExecutor) -> Result<std::cell::RefMut<'_, Box<dyn Executor>>, ExecutorError> {
    exec.try_borrow_mut()
        .map_err(|_| ExecutorError::Unavailable("executor is awready in use".to_string()))
}

// ==================== Native call ====================

#[derive(Debug, Clone)]
pub struct NativeCall {
    name: String,
}

impl NativeCall {
    pub fn new() -> Self {
        Self::named("native")
    }

    pub fn named(name: &str) -> Self {
        NativeCall {
            name: name.to_string(),
        }
    }
}

impl Default for NativeCall {
    fn default() -> Self {
        Self::new()
    }
}

struct NativeHandle {
    capacity: usize,
    engine: Option<RecurrenceEngine>,
}

impl PreparedInvocation for NativeHandle {
    fn invoke(&mut self, input: i64) -> Result<i64, StrategyError> {
        match &mut self.engine {
            Some(engine) => Ok(engine.get(input)?),
            None => Ok(RecurrenceEngine::with_capacity(self.capacity).get(input)?),
        }
    }
}

impl InvocationStrategy for NativeCall {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::NativeCall
    }

    fn prepare(&self, ctx: &mut PassContext) -> Result<Box<dyn PreparedInvocation>, StrategyError> {
        let engine = match ctx.engine_reuse() {
            EngineReuse::Reuse => Some(RecurrenceEngine::with_capacity(ctx.capacity())),
            EngineReuse::Fresh => None,
        };
        Ok(Box::new(NativeHandle {
            capacity: ctx.capacity(),
            engine,
        }))
    }
}

// ==================== Precompiled unit ====================

#[derive(Debug, Clone)]
pub struct PrecompiledUnitInvocation {
    name: String,
    source: String,
    routine: String,
}

impl PrecompiledUnitInvocation {
    pub fn new() -> Self {
        PrecompiledUnitInvocation {
            name: "precompiled".to_string(),
            source: PRECOMPILED_SOURCE.to_string(),
            routine: PRECOMPILED_ROUTINE.to_string(),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Use a different unit, invokin' `routine` fae it
    pub fn with_source(mut self, source: &str, routine: &str) -> Self {
        self.source = source.to_string();
        self.routine = routine.to_string();
        self
    }
}

impl Default for PrecompiledUnitInvocation {
    fn default() -> Self {
        Self::new()
    }
}

struct PrecompiledHandle {
    exec: SharedExecutor,
    routine: String,
}

impl PreparedInvocation for PrecompiledHandle {
    fn invoke(&mut self, input: i64) -> Result<i64, StrategyError> {
        let value = lock(&self.exec)?.invoke(&self.routine, vec![Value::Integer(input)])?;
        expect_integer(value)
    }
}

impl InvocationStrategy for PrecompiledUnitInvocation {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::PrecompiledUnit
    }

    fn prepare(&self, ctx: &mut PassContext) -> Result<Box<dyn PreparedInvocation>, StrategyError> {
        let exec = ctx.executor()?;
        let unit = lock(&exec)?.compile(&self.source)?;
        if !unit.defines(&self.routine) {
            return Err(ExecutorError::MissingRoutine {
                name: self.routine.clone(),
            }
            .into());
        }
        Ok(Box::new(PrecompiledHandle {
            exec,
            routine: self.routine.clone(),
        }))
    }
}

// ==================== Ad-hoc compile an' bind ====================

#[derive(Debug, Clone)]
pub struct AdHocCompileBindInvocation {
    name: String,
    source: String,
    input_slot: String,
    output_slot: String,
}

impl AdHocCompileBindInvocation {
    pub fn new() -> Self {
        AdHocCompileBindInvocation {
            name: "adhoc".to_string(),
            source: ADHOC_SOURCE.to_string(),
            input_slot: ADHOC_INPUT_SLOT.to_string(),
            output_slot: ADHOC_OUTPUT_SLOT.to_string(),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Use a different unit, readin' `input_slot` an' writin' `output_slot`
    pub fn with_source(mut self, source: &str, input_slot: &str, output_slot: &str) -> Self {
        self.source = source.to_string();
        self.input_slot = input_slot.to_string();
        self.output_slot = output_slot.to_string();
        self
    }
}

impl Default for AdHocCompileBindInvocation {
    fn default() -> Self {
        Self::new()
    }
}

struct AdHocHandle {
    exec: SharedExecutor,
    unit: CompiledUnit,
    input_slot: String,
    output_slot: String,
}

impl PreparedInvocation for AdHocHandle {
    fn invoke(&mut self, input: i64) -> Result<i64, StrategyError> {
        // The scope is built inside the timed region on purpose
        let mut bindings = Bindings::new();
        bindings.put(&self.input_slot, Value::Integer(input));
        lock(&self.exec)?.eval_scoped(&self.unit, &mut bindings)?;

        let value = bindings
            .get(&self.output_slot)
            .cloned()
            .ok_or_else(|| ExecutorError::MissingBinding {
                name: self.output_slot.clone(),
            })?;
        expect_integer(value)
    }
}

impl InvocationStrategy for AdHocCompileBindInvocation {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::AdHocCompileBind
    }

    fn prepare(&self, ctx: &mut PassContext) -> Result<Box<dyn PreparedInvocation>, StrategyError> {
        let exec = ctx.executor()?;
        let unit = lock(&exec)?.compile(&self.source)?;
        Ok(Box::new(AdHocHandle {
            exec,
            unit,
            input_slot: self.input_slot.clone(),
            output_slot: self.output_slot.clone(),
        }))
    }
}

/// The three built-in strategies in their canonical order
pub fn default_strategies() -> Vec<Box<dyn InvocationStrategy>> {
    vec![
        Box::new(NativeCall::new()),
        Box::new(PrecompiledUnitInvocation::new()),
        Box::new(AdHocCompileBindInvocation::new()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RangeError;
    use crate::recurrence::reference_value;

    fn prepared(
        strategy: &dyn InvocationStrategy,
        options: PassOptions,
    ) -> Box<dyn PreparedInvocation> {
        let mut ctx = PassContext::new(options);
        strategy.prepare(&mut ctx).unwrap()
    }

    #[test]
    fn test_all_strategies_agree() {
        for strategy in default_strategies() {
            let mut handle = prepared(strategy.as_ref(), PassOptions::new());
            for n in [0, 1, 10, 80] {
                assert_eq!(
                    handle.invoke(n).unwrap(),
                    reference_value(n as u64),
                    "{} at {}",
                    strategy.name(),
                    n
                );
            }
        }
    }

    #[test]
    fn test_binding_modes() {
        assert_eq!(StrategyKind::NativeCall.binding_mode(), BindingMode::None);
        assert_eq!(StrategyKind::PrecompiledUnit.binding_mode(), BindingMode::None);
        assert_eq!(
            StrategyKind::AdHocCompileBind.binding_mode(),
            BindingMode::FreshPerCall
        );
        assert!(!StrategyKind::NativeCall.uses_executor());
    }

    #[test]
    fn test_native_range_error() {
        let mut handle = prepared(&NativeCall::new(), PassOptions::new().with_capacity(20));
        assert_eq!(
            handle.invoke(20),
            Err(StrategyError::Range(RangeError {
                index: 20,
                capacity: 20
            }))
        );
    }

    #[test]
    fn test_native_reuse_keeps_working() {
        let options = PassOptions::new().with_engine_reuse(EngineReuse::Reuse);
        let mut handle = prepared(&NativeCall::new(), options);
        assert_eq!(handle.invoke(50).unwrap(), reference_value(50));
        assert_eq!(handle.invoke(10).unwrap(), 55);
    }

    #[test]
    fn test_script_range_errors_are_range_errors() {
        let options = PassOptions::new().with_capacity(30);
        for strategy in [
            Box::new(PrecompiledUnitInvocation::new()) as Box<dyn InvocationStrategy>,
            Box::new(AdHocCompileBindInvocation::new()),
        ] {
            let mut handle = prepared(strategy.as_ref(), options.clone());
            assert_eq!(
                handle.invoke(-1),
                Err(StrategyError::Range(RangeError {
                    index: -1,
                    capacity: 30
                })),
                "{}",
                strategy.name()
            );
        }
    }

    #[test]
    fn test_precompiled_missing_routine() {
        let strategy =
            PrecompiledUnitInvocation::new().with_source("dae other(x) { gie x }", "fib");
        let mut ctx = PassContext::new(PassOptions::new());
        let err = strategy.prepare(&mut ctx).err();
        assert!(matches!(
            err,
            Some(StrategyError::Executor(ExecutorError::MissingRoutine { .. }))
        ));
    }

    #[test]
    fn test_unexpected_type() {
        let strategy = PrecompiledUnitInvocation::new()
            .with_source("dae fib(x) { gie \"nae number\" }", "fib");
        let mut handle = prepared(&strategy, PassOptions::new());
        assert!(matches!(
            handle.invoke(3),
            Err(StrategyError::Executor(ExecutorError::UnexpectedType { .. }))
        ));
    }

    #[test]
    fn test_adhoc_missing_output_slot() {
        let strategy = AdHocCompileBindInvocation::new().with_source("ken b = p", "p", "a");
        let mut handle = prepared(&strategy, PassOptions::new());
        assert!(matches!(
            handle.invoke(3),
            Err(StrategyError::Executor(ExecutorError::MissingBinding { ref name })) if name == "a"
        ));
    }

    #[test]
    fn test_executor_sharing() {
        let options = PassOptions::new().with_executor_sharing(ExecutorSharing::Shared);
        let mut ctx = PassContext::new(options);
        let a = ctx.executor().unwrap();
        let b = ctx.executor().unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(ctx.executors_created(), 1);

        let mut ctx = PassContext::new(PassOptions::new());
        let a = ctx.executor().unwrap();
        let b = ctx.executor().unwrap();
        assert!(!Rc::ptr_eq(&a, &b));
        assert_eq!(ctx.executors_created(), 2);
    }

    #[test]
    fn test_shared_executor_runs_both_script_strategies() {
        let options = PassOptions::new().with_executor_sharing(ExecutorSharing::Shared);
        let mut ctx = PassContext::new(options);
        let mut pre = PrecompiledUnitInvocation::new().prepare(&mut ctx).unwrap();
        let mut adhoc = AdHocCompileBindInvocation::new().prepare(&mut ctx).unwrap();
        assert_eq!(pre.invoke(30).unwrap(), adhoc.invoke(30).unwrap());
        assert_eq!(ctx.executors_created(), 1);
    }

    #[test]
    fn test_unavailable_executor() {
        let options = PassOptions::new().with_executor_factory(|_| {
            Err(ExecutorError::Unavailable("nae runtime here".to_string()))
        });
        let mut ctx = PassContext::new(options);
        assert!(NativeCall::new().prepare(&mut ctx).is_ok());
        assert!(matches!(
            AdHocCompileBindInvocation::new().prepare(&mut ctx).err(),
            Some(StrategyError::Executor(ExecutorError::Unavailable(_)))
        ));
    }
}
