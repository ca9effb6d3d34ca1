use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::*;
use crate::error::{HaversError, HaversResult};
use crate::value::*;

/// How deep `dae` calls can nest afore we gie up
pub const MAX_CALL_DEPTH: usize = 256;

/// Control flow signals
#[derive(Debug)]
enum ControlFlow {
    Return(Value),
}

/// The interpreter - runs benchmark scripts
pub struct Interpreter {
    pub globals: Rc<RefCell<Environment>>,
    environment: Rc<RefCell<Environment>>,
    output: Vec<String>,
    /// Echo `blether` tae stdout as well as capturin' it
    echo: bool,
    call_depth: usize,
}

impl Interpreter {
    pub fn new() -> Self {
        let globals = Rc::new(RefCell::new(Environment::new()));
        Self::define_natives(&globals);

        Interpreter {
            globals: globals.clone(),
            environment: globals,
            output: Vec::new(),
            echo: true,
            call_depth: 0,
        }
    }

    fn define_natives(globals: &Rc<RefCell<Environment>>) {
        // type_o - whit kind o' thing is this?
        globals.borrow_mut().define(
            "type_o".to_string(),
            Value::NativeFunction(Rc::new(NativeFunction::new("type_o", 1, |args| {
                Ok(Value::String(args[0].type_name().to_string()))
            }))),
        );

        // tae_string - turn onything intae a string
        globals.borrow_mut().define(
            "tae_string".to_string(),
            Value::NativeFunction(Rc::new(NativeFunction::new("tae_string", 1, |args| {
                Ok(Value::String(args[0].to_string()))
            }))),
        );
    }

    /// Register a host value in the global scope
    pub fn define_global(&mut self, name: &str, value: Value) {
        self.globals.borrow_mut().define(name.to_string(), value);
    }

    pub fn set_echo(&mut self, echo: bool) {
        self.echo = echo;
    }

    /// Run a program
    pub fn interpret(&mut self, program: &Program) -> HaversResult<Value> {
        let mut result = Value::Nil;
        for stmt in &program.statements {
            result = self.execute_stmt(stmt)?;
        }
        Ok(result)
    }

    /// Call a global function by name wi' positional arguments
    pub fn call_named(&mut self, name: &str, args: Vec<Value>) -> HaversResult<Value> {
        let callee = self
            .globals
            .borrow()
            .get(name)
            .ok_or_else(|| HaversError::UndefinedVariable {
                name: name.to_string(),
                line: 0,
            })?;
        if !matches!(callee, Value::Function(_) | Value::NativeFunction(_)) {
            return Err(HaversError::NotCallable {
                name: name.to_string(),
                line: 0,
            });
        }
        self.call_value(callee, args, 0)
    }

    /// Run statements in a caller-supplied scope an' gie back the last value
    ///
    /// The scope is left holdin' whatever the statements defined, so the
    /// caller can read results oot by name efterwards.
    pub fn execute_in_scope(
        &mut self,
        statements: &[Stmt],
        env: Rc<RefCell<Environment>>,
    ) -> HaversResult<Value> {
        match self.execute_block(statements, env)? {
            Ok(v) => Ok(v),
            Err(ControlFlow::Return(v)) => Ok(v),
        }
    }

    /// Get captured output (for testing)
    pub fn get_output(&self) -> &[String] {
        &self.output
    }

    fn execute_stmt(&mut self, stmt: &Stmt) -> HaversResult<Value> {
        match self.execute_stmt_with_control(stmt)? {
            Ok(value) => Ok(value),
            Err(ControlFlow::Return(_)) => Err(HaversError::ReturnOutsideFunction {
                line: stmt.span().line,
            }),
        }
    }

    fn execute_stmt_with_control(
        &mut self,
        stmt: &Stmt,
    ) -> HaversResult<Result<Value, ControlFlow>> {
        match stmt {
            Stmt::VarDecl {
                name, initializer, ..
            } => {
                let value = match initializer {
                    Some(init) => self.evaluate(init)?,
                    None => Value::Nil,
                };
                self.environment.borrow_mut().define(name.clone(), value);
                Ok(Ok(Value::Nil))
            }

            Stmt::Expression { expr, .. } => Ok(Ok(self.evaluate(expr)?)),

            Stmt::Block { statements, .. } => {
                let env = Rc::new(RefCell::new(Environment::with_enclosing(
                    self.environment.clone(),
                )));
                self.execute_block(statements, env)
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.execute_stmt_with_control(then_branch)
                } else if let Some(else_br) = else_branch {
                    self.execute_stmt_with_control(else_br)
                } else {
                    Ok(Ok(Value::Nil))
                }
            }

            Stmt::While {
                condition, body, ..
            } => {
                while self.evaluate(condition)?.is_truthy() {
                    if let Err(flow) = self.execute_stmt_with_control(body)? {
                        return Ok(Err(flow));
                    }
                }
                Ok(Ok(Value::Nil))
            }

            Stmt::Function {
                name, params, body, ..
            } => {
                let func = HaversFunction::new(
                    name.clone(),
                    params.clone(),
                    body.clone(),
                    Some(self.environment.clone()),
                );
                self.environment
                    .borrow_mut()
                    .define(name.clone(), Value::Function(Rc::new(func)));
                Ok(Ok(Value::Nil))
            }

            Stmt::Return { value, .. } => {
                let ret_val = match value {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };
                Ok(Err(ControlFlow::Return(ret_val)))
            }

            Stmt::Print { value, .. } => {
                let output = format!("{}", self.evaluate(value)?);
                if self.echo {
                    println!("{}", output);
                }
                self.output.push(output);
                Ok(Ok(Value::Nil))
            }
        }
    }

    fn execute_block(
        &mut self,
        statements: &[Stmt],
        env: Rc<RefCell<Environment>>,
    ) -> HaversResult<Result<Value, ControlFlow>> {
        let previous = std::mem::replace(&mut self.environment, env);

        let mut result = Ok(Ok(Value::Nil));
        for stmt in statements {
            match self.execute_stmt_with_control(stmt) {
                Ok(Ok(v)) => result = Ok(Ok(v)),
                other => {
                    result = other;
                    break;
                }
            }
        }

        self.environment = previous;
        result
    }

    fn evaluate(&mut self, expr: &Expr) -> HaversResult<Value> {
        match expr {
            Expr::Literal { value, .. } => Ok(match value {
                Literal::Integer(n) => Value::Integer(*n),
                Literal::Float(f) => Value::Float(*f),
                Literal::String(s) => Value::String(s.clone()),
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Nil => Value::Nil,
            }),

            Expr::Variable { name, span } => self
                .environment
                .borrow()
                .get(name)
                .ok_or_else(|| HaversError::UndefinedVariable {
                    name: name.clone(),
                    line: span.line,
                }),

            Expr::Assign { name, value, span } => {
                let val = self.evaluate(value)?;
                if !self.environment.borrow_mut().assign(name, val.clone()) {
                    return Err(HaversError::UndefinedVariable {
                        name: name.clone(),
                        line: span.line,
                    });
                }
                Ok(val)
            }

            Expr::Binary {
                left,
                operator,
                right,
                span,
            } => {
                let left_val = self.evaluate(left)?;
                let right_val = self.evaluate(right)?;
                self.binary_op(&left_val, operator, &right_val, span.line)
            }

            Expr::Unary {
                operator,
                operand,
                span,
            } => {
                let val = self.evaluate(operand)?;
                match operator {
                    UnaryOp::Negate => match val {
                        Value::Integer(n) => n
                            .checked_neg()
                            .map(Value::Integer)
                            .ok_or(HaversError::IntegerOverflow { line: span.line }),
                        Value::Float(f) => Ok(Value::Float(-f)),
                        _ => Err(HaversError::TypeError {
                            message: format!("Cannae negate a {}", val.type_name()),
                            line: span.line,
                        }),
                    },
                    UnaryOp::Not => Ok(Value::Bool(!val.is_truthy())),
                }
            }

            Expr::Logical {
                left,
                operator,
                right,
                ..
            } => {
                let left_val = self.evaluate(left)?;
                match operator {
                    LogicalOp::And if !left_val.is_truthy() => Ok(left_val),
                    LogicalOp::Or if left_val.is_truthy() => Ok(left_val),
                    _ => self.evaluate(right),
                }
            }

            Expr::Call {
                callee,
                arguments,
                span,
            } => {
                // Method calls on host objects go straight tae the object
                if let Expr::Get { object, property, .. } = callee.as_ref() {
                    let obj = self.evaluate(object)?;
                    if let Value::NativeObject(native) = &obj {
                        let args = self.evaluate_call_args(arguments)?;
                        return native
                            .call(property, args)
                            .map_err(|e| e.with_line_if_zero(span.line));
                    }
                    let callee_val = self.get_property(obj, property, span.line)?;
                    let args = self.evaluate_call_args(arguments)?;
                    return self.call_value(callee_val, args, span.line);
                }

                let callee_val = self.evaluate(callee)?;
                let args = self.evaluate_call_args(arguments)?;
                self.call_value(callee_val, args, span.line)
            }

            Expr::Get {
                object,
                property,
                span,
            } => {
                let obj = self.evaluate(object)?;
                self.get_property(obj, property, span.line)
            }

            Expr::Grouping { expr, .. } => self.evaluate(expr),
        }
    }

    fn get_property(&self, obj: Value, property: &str, line: usize) -> HaversResult<Value> {
        match obj {
            Value::NativeObject(native) => native
                .get(property)
                .map_err(|e| e.with_line_if_zero(line)),
            other => Err(HaversError::NotAnObject {
                name: other.to_string(),
                line,
            }),
        }
    }

    fn evaluate_call_args(&mut self, arguments: &[Expr]) -> HaversResult<Vec<Value>> {
        arguments.iter().map(|arg| self.evaluate(arg)).collect()
    }

    fn binary_op(
        &self,
        left: &Value,
        op: &BinaryOp,
        right: &Value,
        line: usize,
    ) -> HaversResult<Value> {
        let overflow = HaversError::IntegerOverflow { line };
        match op {
            BinaryOp::Add => match (left, right) {
                (Value::Integer(a), Value::Integer(b)) => {
                    a.checked_add(*b).map(Value::Integer).ok_or(overflow)
                }
                (Value::String(a), b) => Ok(Value::String(format!("{}{}", a, b))),
                (a, Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
                _ => self.float_op(left, right, line, "add", |a, b| a + b),
            },

            BinaryOp::Subtract => match (left, right) {
                (Value::Integer(a), Value::Integer(b)) => {
                    a.checked_sub(*b).map(Value::Integer).ok_or(overflow)
                }
                _ => self.float_op(left, right, line, "subtract", |a, b| a - b),
            },

            BinaryOp::Multiply => match (left, right) {
                (Value::Integer(a), Value::Integer(b)) => {
                    a.checked_mul(*b).map(Value::Integer).ok_or(overflow)
                }
                _ => self.float_op(left, right, line, "multiply", |a, b| a * b),
            },

            BinaryOp::Divide | BinaryOp::Modulo => {
                match right {
                    Value::Integer(0) => return Err(HaversError::DivisionByZero { line }),
                    Value::Float(f) if *f == 0.0 => {
                        return Err(HaversError::DivisionByZero { line })
                    }
                    _ => {}
                }
                let divide = matches!(op, BinaryOp::Divide);
                match (left, right) {
                    (Value::Integer(a), Value::Integer(b)) => {
                        let r = if divide {
                            a.checked_div(*b)
                        } else {
                            a.checked_rem(*b)
                        };
                        r.map(Value::Integer).ok_or(overflow)
                    }
                    _ if divide => self.float_op(left, right, line, "divide", |a, b| a / b),
                    _ => self.float_op(left, right, line, "modulo", |a, b| a % b),
                }
            }

            BinaryOp::Equal => Ok(Value::Bool(left == right)),
            BinaryOp::NotEqual => Ok(Value::Bool(left != right)),

            BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
                let ordering = match (left, right) {
                    (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
                    (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                    _ => match (left.as_float(), right.as_float()) {
                        (Some(a), Some(b)) => a.partial_cmp(&b),
                        _ => None,
                    },
                };
                let ordering = ordering.ok_or_else(|| HaversError::TypeError {
                    message: format!(
                        "Cannae compare {} wi' {}",
                        left.type_name(),
                        right.type_name()
                    ),
                    line,
                })?;
                Ok(Value::Bool(match op {
                    BinaryOp::Less => ordering.is_lt(),
                    BinaryOp::LessEqual => ordering.is_le(),
                    BinaryOp::Greater => ordering.is_gt(),
                    _ => ordering.is_ge(),
                }))
            }
        }
    }

    fn float_op(
        &self,
        left: &Value,
        right: &Value,
        line: usize,
        verb: &str,
        f: impl Fn(f64, f64) -> f64,
    ) -> HaversResult<Value> {
        match (left.as_float(), right.as_float()) {
            (Some(a), Some(b)) => Ok(Value::Float(f(a, b))),
            _ => Err(HaversError::TypeError {
                message: format!(
                    "Cannae {} {} an' {}",
                    verb,
                    left.type_name(),
                    right.type_name()
                ),
                line,
            }),
        }
    }

    fn call_value(&mut self, callee: Value, args: Vec<Value>, line: usize) -> HaversResult<Value> {
        match callee {
            Value::Function(func) => self.call_function(&func, args, line),
            Value::NativeFunction(native) => {
                if args.len() != native.arity {
                    return Err(HaversError::WrongArity {
                        name: native.name.clone(),
                        expected: native.arity,
                        got: args.len(),
                        line,
                    });
                }
                (native.func)(args).map_err(|e| e.with_line_if_zero(line))
            }
            Value::NativeObject(_) => Err(HaversError::TypeError {
                message: "Cannae ca' a native object like a function".to_string(),
                line,
            }),
            _ => Err(HaversError::NotCallable {
                name: format!("{}", callee),
                line,
            }),
        }
    }

    fn call_function(
        &mut self,
        func: &HaversFunction,
        args: Vec<Value>,
        line: usize,
    ) -> HaversResult<Value> {
        if args.len() != func.params.len() {
            return Err(HaversError::WrongArity {
                name: func.name.clone(),
                expected: func.params.len(),
                got: args.len(),
                line,
            });
        }
        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(HaversError::StackOverflow { line });
        }

        let env = Rc::new(RefCell::new(Environment::with_enclosing(
            func.closure.clone().unwrap_or_else(|| self.globals.clone()),
        )));
        for (param, value) in func.params.iter().zip(args) {
            env.borrow_mut().define(param.clone(), value);
        }

        self.call_depth += 1;
        let result = self.execute_block(&func.body, env);
        self.call_depth -= 1;

        match result? {
            Ok(_) => Ok(Value::Nil),
            Err(ControlFlow::Return(v)) => Ok(v),
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn run(source: &str) -> (Interpreter, HaversResult<Value>) {
        let program = parse(source).unwrap();
        let mut interp = Interpreter::new();
        interp.set_echo(false);
        let result = interp.interpret(&program);
        (interp, result)
    }

    #[test]
    fn test_arithmetic_and_blether() {
        let (interp, result) = run("ken x = 2 + 3 * 4\nblether x\nblether \"x is \" + x");
        result.unwrap();
        assert_eq!(interp.get_output(), &["14".to_string(), "x is 14".to_string()]);
    }

    #[test]
    fn test_function_call_and_return() {
        let (interp, result) = run("dae add(a, b) {\n gie a + b\n}\nblether add(40, 2)");
        result.unwrap();
        assert_eq!(interp.get_output(), &["42".to_string()]);
    }

    #[test]
    fn test_script_recursion() {
        let source = r#"
dae fib(n) {
    gin n < 2 {
        gie n
    }
    gie fib(n - 1) + fib(n - 2)
}
blether fib(15)
"#;
        let (interp, result) = run(source);
        result.unwrap();
        assert_eq!(interp.get_output(), &["610".to_string()]);
    }

    #[test]
    fn test_while_loop_and_assignment() {
        let (interp, result) =
            run("ken i = 0\nken total = 0\nwhiles i < 5 {\n total = total + i\n i = i + 1\n}\nblether total");
        result.unwrap();
        assert_eq!(interp.get_output(), &["10".to_string()]);
    }

    #[test]
    fn test_logical_short_circuit() {
        // The right side would fail if evaluated
        let (interp, result) = run("blether nae an missing\nblether aye or missing");
        result.unwrap();
        assert_eq!(interp.get_output(), &["nae".to_string(), "aye".to_string()]);
    }

    #[test]
    fn test_call_named() {
        let program = parse("dae double(x) { gie x * 2 }").unwrap();
        let mut interp = Interpreter::new();
        interp.interpret(&program).unwrap();
        assert_eq!(
            interp.call_named("double", vec![Value::Integer(21)]).unwrap(),
            Value::Integer(42)
        );
        assert!(matches!(
            interp.call_named("nope", vec![]),
            Err(HaversError::UndefinedVariable { .. })
        ));
        assert!(matches!(
            interp.call_named("double", vec![]),
            Err(HaversError::WrongArity { expected: 1, got: 0, .. })
        ));
    }

    #[test]
    fn test_call_named_rejects_non_functions() {
        let mut interp = Interpreter::new();
        interp.define_global("p", Value::Integer(1));
        assert!(matches!(
            interp.call_named("p", vec![]),
            Err(HaversError::NotCallable { .. })
        ));
    }

    #[test]
    fn test_execute_in_scope_keeps_definitions() {
        let program = parse("ken a = p + 1\na").unwrap();
        let mut interp = Interpreter::new();
        let scope = Rc::new(RefCell::new(Environment::with_enclosing(interp.globals.clone())));
        scope.borrow_mut().define("p".into(), Value::Integer(41));

        let last = interp.execute_in_scope(&program.statements, scope.clone()).unwrap();
        assert_eq!(last, Value::Integer(42));
        assert_eq!(scope.borrow().get("a"), Some(Value::Integer(42)));
        // Nothing leaked intae globals
        assert!(interp.globals.borrow().get("a").is_none());
    }

    #[test]
    fn test_integer_overflow_is_an_error() {
        let (_, result) = run("ken big = 9223372036854775807\nbig + 1");
        assert!(matches!(result, Err(HaversError::IntegerOverflow { line: 2 })));
    }

    #[test]
    fn test_division_by_zero() {
        let (_, result) = run("ken x = 1 / 0");
        assert!(matches!(result, Err(HaversError::DivisionByZero { line: 1 })));
    }

    #[test]
    fn test_top_level_gie_is_an_error() {
        let (_, result) = run("gie 5");
        assert!(matches!(result, Err(HaversError::ReturnOutsideFunction { .. })));
    }

    #[test]
    fn test_stack_overflow_guard() {
        // Debug frames are muckle, so gie the walk some room
        let handle = std::thread::Builder::new()
            .stack_size(32 * 1024 * 1024)
            .spawn(|| {
                let (_, result) = run("dae forever(n) { gie forever(n + 1) }\nforever(0)");
                matches!(result, Err(HaversError::StackOverflow { .. }))
            })
            .unwrap();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_builtins() {
        let (interp, result) = run("blether type_o(5)\nblether tae_string(aye) + \"!\"");
        result.unwrap();
        assert_eq!(interp.get_output(), &["integer".to_string(), "aye!".to_string()]);
    }
}
