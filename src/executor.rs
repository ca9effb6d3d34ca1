//! The script executor boundary
//!
//! The harness only ever talks tae a script runtime through [`Executor`]:
//! compile a unit once, call a routine by name, or evaluate a unit against a
//! fresh binding scope. [`ScriptExecutor`] is the implementation backed by
//! the wee interpreter in this crate.

use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::Stmt;
use crate::error::{ExecutorError, HaversError, HaversResult};
use crate::interpreter::Interpreter;
use crate::parser::parse;
use crate::recurrence::RecurrenceEngine;
use crate::value::{Environment, NativeFunction, NativeObject, Value};

/// Name o' the host constructor scripts use tae reach the workload
pub const RECURRENCE_CONSTRUCTOR: &str = "recurrence";

/// A unit compiled once an' reused across many evaluations
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    routines: Vec<String>,
    body: Rc<Vec<Stmt>>,
}

impl CompiledUnit {
    /// Routines the unit registered wi' its executor
    pub fn routines(&self) -> &[String] {
        &self.routines
    }

    pub fn defines(&self, routine: &str) -> bool {
        self.routines.iter().any(|r| r == routine)
    }

    /// Top-level statements run on each evaluation
    pub fn body(&self) -> &[Stmt] {
        &self.body
    }
}

/// Named values handed intae, an' read back oot o', a scoped evaluation
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    entries: Vec<(String, Value)>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a slot, keepin' first-insertion order
    pub fn put(&mut self, name: &str, value: Value) {
        match self.entries.iter_mut().find(|(k, _)| k == name) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Compile once, invoke by name, evaluate in a scope - that's the lot
pub trait Executor {
    /// Parse a unit an' register its top-level routines
    fn compile(&mut self, source: &str) -> Result<CompiledUnit, ExecutorError>;

    /// Call a registered routine wi' positional arguments
    fn invoke(&mut self, routine: &str, args: Vec<Value>) -> Result<Value, ExecutorError>;

    /// Run a unit's body in a fresh scope seeded fae `bindings`
    ///
    /// Everythin' the body defines is written back intae `bindings`.
    fn eval_scoped(
        &mut self,
        unit: &CompiledUnit,
        bindings: &mut Bindings,
    ) -> Result<Value, ExecutorError>;
}

/// Executor backed by the in-crate interpreter
pub struct ScriptExecutor {
    interp: Interpreter,
    capacity: usize,
}

impl ScriptExecutor {
    /// A fresh runtime whose `recurrence()` builds engines o' the given capacity
    pub fn new(capacity: usize) -> Self {
        let mut interp = Interpreter::new();
        interp.set_echo(false);
        register_host_natives(&mut interp, capacity);
        ScriptExecutor { interp, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whit the scripts blethered
    pub fn output(&self) -> &[String] {
        self.interp.get_output()
    }

    pub fn set_echo(&mut self, echo: bool) {
        self.interp.set_echo(echo);
    }
}

impl Executor for ScriptExecutor {
    fn compile(&mut self, source: &str) -> Result<CompiledUnit, ExecutorError> {
        let program = parse(source).map_err(ExecutorError::Compile)?;

        let (routines, body): (Vec<Stmt>, Vec<Stmt>) = program
            .statements
            .into_iter()
            .partition(|stmt| matches!(stmt, Stmt::Function { .. }));

        let names = routines
            .iter()
            .filter_map(|stmt| match stmt {
                Stmt::Function { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect();

        let declarations = crate::ast::Program::new(routines);
        self.interp
            .interpret(&declarations)
            .map_err(ExecutorError::Compile)?;

        Ok(CompiledUnit {
            routines: names,
            body: Rc::new(body),
        })
    }

    fn invoke(&mut self, routine: &str, args: Vec<Value>) -> Result<Value, ExecutorError> {
        self.interp
            .call_named(routine, args)
            .map_err(|source| ExecutorError::Invoke {
                routine: routine.to_string(),
                source,
            })
    }

    fn eval_scoped(
        &mut self,
        unit: &CompiledUnit,
        bindings: &mut Bindings,
    ) -> Result<Value, ExecutorError> {
        let scope = Rc::new(RefCell::new(Environment::with_enclosing(
            self.interp.globals.clone(),
        )));
        {
            let mut scope = scope.borrow_mut();
            for (name, value) in bindings.iter() {
                scope.define(name.to_string(), value.clone());
            }
        }

        let last = self
            .interp
            .execute_in_scope(unit.body(), scope.clone())
            .map_err(ExecutorError::Eval)?;

        let mut exports: Vec<(String, Value)> = scope.borrow().get_exports().into_iter().collect();
        exports.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, value) in exports {
            bindings.put(&name, value);
        }

        Ok(last)
    }
}

/// Host object wrappin' a recurrence engine fer scripts
#[derive(Debug)]
pub struct RecurrenceObject {
    engine: RefCell<RecurrenceEngine>,
}

impl RecurrenceObject {
    pub fn new(capacity: usize) -> Self {
        RecurrenceObject {
            engine: RefCell::new(RecurrenceEngine::with_capacity(capacity)),
        }
    }

    fn index_arg(args: &[Value]) -> HaversResult<i64> {
        match args {
            [Value::Integer(n)] => Ok(*n),
            [other] => Err(HaversError::TypeError {
                message: format!("get() wants an integer, no' a {}", other.type_name()),
                line: 0,
            }),
            _ => Err(HaversError::WrongArity {
                name: "get".to_string(),
                expected: 1,
                got: args.len(),
                line: 0,
            }),
        }
    }
}

impl NativeObject for RecurrenceObject {
    fn type_name(&self) -> &str {
        "recurrence"
    }

    fn get(&self, prop: &str) -> HaversResult<Value> {
        match prop {
            "capacity" => Ok(Value::Integer(self.engine.borrow().capacity() as i64)),
            "cached" => Ok(Value::Integer(self.engine.borrow().cached_len() as i64)),
            _ => Err(HaversError::UndefinedProperty {
                property: prop.to_string(),
                line: 0,
            }),
        }
    }

    fn call(&self, method: &str, args: Vec<Value>) -> HaversResult<Value> {
        match method {
            "get" => {
                let n = Self::index_arg(&args)?;
                let value = self.engine.borrow_mut().get(n)?;
                Ok(Value::Integer(value))
            }
            _ => Err(HaversError::UndefinedProperty {
                property: method.to_string(),
                line: 0,
            }),
        }
    }
}

/// Make `recurrence()` available tae scripts run by this interpreter
pub fn register_host_natives(interp: &mut Interpreter, capacity: usize) {
    interp.define_global(
        RECURRENCE_CONSTRUCTOR,
        Value::NativeFunction(Rc::new(NativeFunction::new(
            RECURRENCE_CONSTRUCTOR,
            0,
            move |_args| Ok(Value::NativeObject(Rc::new(RecurrenceObject::new(capacity)))),
        ))),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recurrence::DEFAULT_CAPACITY;

    #[test]
    fn test_compile_registers_routines() {
        let mut exec = ScriptExecutor::new(DEFAULT_CAPACITY);
        let unit = exec
            .compile("dae fib(x) {\n ken engine = recurrence()\n gie engine.get(x)\n}")
            .unwrap();
        assert_eq!(unit.routines(), &["fib".to_string()]);
        assert!(unit.body().is_empty());
        assert_eq!(exec.invoke("fib", vec![Value::Integer(10)]).unwrap(), Value::Integer(55));
    }

    #[test]
    fn test_compile_error_is_reported() {
        let mut exec = ScriptExecutor::new(DEFAULT_CAPACITY);
        let err = exec.compile("dae fib(x) {").unwrap_err();
        assert!(matches!(err, ExecutorError::Compile(_)));
    }

    #[test]
    fn test_invoke_unknown_routine() {
        let mut exec = ScriptExecutor::new(DEFAULT_CAPACITY);
        let err = exec.invoke("fib", vec![Value::Integer(1)]).unwrap_err();
        assert!(matches!(
            err,
            ExecutorError::Invoke { ref routine, source: HaversError::UndefinedVariable { .. } }
                if routine == "fib"
        ));
    }

    #[test]
    fn test_eval_scoped_round_trips_bindings() {
        let mut exec = ScriptExecutor::new(DEFAULT_CAPACITY);
        let unit = exec
            .compile("dae calc(x) { gie recurrence().get(x) }\nken a = calc(p)")
            .unwrap();
        assert!(unit.defines("calc"));
        assert_eq!(unit.body().len(), 1);

        let mut bindings = Bindings::new();
        bindings.put("p", Value::Integer(20));
        exec.eval_scoped(&unit, &mut bindings).unwrap();
        assert_eq!(bindings.get("a"), Some(&Value::Integer(6765)));
        assert_eq!(bindings.get("p"), Some(&Value::Integer(20)));

        // A second scope doesnae see the first one's slots
        let mut fresh = Bindings::new();
        fresh.put("p", Value::Integer(1));
        exec.eval_scoped(&unit, &mut fresh).unwrap();
        assert_eq!(fresh.get("a"), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_eval_scoped_missing_input_slot() {
        let mut exec = ScriptExecutor::new(DEFAULT_CAPACITY);
        let unit = exec.compile("ken a = p + 1").unwrap();
        let err = exec.eval_scoped(&unit, &mut Bindings::new()).unwrap_err();
        assert!(matches!(
            err,
            ExecutorError::Eval(HaversError::UndefinedVariable { ref name, .. }) if name == "p"
        ));
    }

    #[test]
    fn test_scoped_values_dinnae_leak_intae_globals() {
        let mut exec = ScriptExecutor::new(DEFAULT_CAPACITY);
        let unit = exec.compile("ken a = p").unwrap();
        let mut bindings = Bindings::new();
        bindings.put("p", Value::Integer(3));
        exec.eval_scoped(&unit, &mut bindings).unwrap();

        let probe = exec.compile("dae peek() { gie a }").unwrap();
        assert!(probe.defines("peek"));
        assert!(exec.invoke("peek", vec![]).is_err());
    }

    #[test]
    fn test_out_of_range_keeps_its_shape() {
        let mut exec = ScriptExecutor::new(DEFAULT_CAPACITY);
        exec.compile("dae fib(x) {\n gie recurrence().get(x)\n}").unwrap();
        let err = exec.invoke("fib", vec![Value::Integer(101)]).unwrap_err();
        assert!(matches!(
            err.script_error(),
            Some(HaversError::OutOfRange { index: 101, capacity: 101, line: 2 })
        ));
    }

    #[test]
    fn test_recurrence_object_members() {
        let mut exec = ScriptExecutor::new(12);
        let unit = exec
            .compile("ken r = recurrence()\nken before = r.cached\nken got = r.get(11)\nblether r.capacity")
            .unwrap();
        let mut bindings = Bindings::new();
        exec.eval_scoped(&unit, &mut bindings).unwrap();
        assert_eq!(bindings.get("before"), Some(&Value::Integer(2)));
        assert_eq!(bindings.get("got"), Some(&Value::Integer(89)));
        assert_eq!(exec.output(), &["12".to_string()]);

        let bad = exec.compile("recurrence().get(\"ten\")").unwrap();
        assert!(matches!(
            exec.eval_scoped(&bad, &mut Bindings::new()),
            Err(ExecutorError::Eval(HaversError::TypeError { line: 1, .. }))
        ));
    }

    #[test]
    fn test_bindings_keep_insertion_order() {
        let mut bindings = Bindings::new();
        bindings.put("p", Value::Integer(1));
        bindings.put("a", Value::Integer(2));
        bindings.put("p", Value::Integer(3));
        let names: Vec<&str> = bindings.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["p", "a"]);
        assert_eq!(bindings.get("p"), Some(&Value::Integer(3)));
        assert_eq!(bindings.len(), 2);
    }
}
