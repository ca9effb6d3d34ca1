use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::ast::Stmt;
use crate::error::HaversResult;

/// Host objects the scripts can poke at wi' `obj.method(...)`
pub trait NativeObject: fmt::Debug {
    fn type_name(&self) -> &str;
    fn get(&self, prop: &str) -> HaversResult<Value>;
    fn call(&self, method: &str, args: Vec<Value>) -> HaversResult<Value>;
    fn to_string(&self) -> String {
        format!("<native {}>", self.type_name())
    }
}

/// Runtime values in the script runtime
#[derive(Debug, Clone)]
pub enum Value {
    Integer(i64),
    Float(f64),
    String(String),
    /// Boolean (aye/nae)
    Bool(bool),
    /// Null value (naething)
    Nil,
    Function(Rc<HaversFunction>),
    NativeFunction(Rc<NativeFunction>),
    /// Host object wi' property/method hooks
    NativeObject(Rc<dyn NativeObject>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bool(_) => "bool",
            Value::Nil => "naething",
            Value::Function(_) => "function",
            Value::NativeFunction(_) => "native function",
            Value::NativeObject(_) => "native object",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Nil => false,
            Value::Integer(0) => false,
            Value::Float(f) if *f == 0.0 => false,
            Value::String(s) if s.is_empty() => false,
            _ => true,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Bool(true) => write!(f, "aye"),
            Value::Bool(false) => write!(f, "nae"),
            Value::Nil => write!(f, "naething"),
            Value::Function(func) => write!(f, "<dae {}>", func.name),
            Value::NativeFunction(func) => write!(f, "<native dae {}>", func.name),
            Value::NativeObject(obj) => write!(f, "{}", obj.to_string()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Integer(a), Value::Float(b)) => (*a as f64) == *b,
            (Value::Float(a), Value::Integer(b)) => *a == (*b as f64),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Nil, Value::Nil) => true,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::NativeFunction(a), Value::NativeFunction(b)) => Rc::ptr_eq(a, b),
            (Value::NativeObject(a), Value::NativeObject(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// A user-defined function (`dae`)
#[derive(Debug)]
pub struct HaversFunction {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub closure: Option<Rc<RefCell<Environment>>>,
}

impl HaversFunction {
    pub fn new(
        name: String,
        params: Vec<String>,
        body: Vec<Stmt>,
        closure: Option<Rc<RefCell<Environment>>>,
    ) -> Self {
        HaversFunction {
            name,
            params,
            body,
            closure,
        }
    }
}

/// A native/built-in function
pub struct NativeFunction {
    pub name: String,
    pub arity: usize,
    pub func: Box<dyn Fn(Vec<Value>) -> HaversResult<Value>>,
}

impl NativeFunction {
    pub fn new<F>(name: &str, arity: usize, func: F) -> Self
    where
        F: Fn(Vec<Value>) -> HaversResult<Value> + 'static,
    {
        NativeFunction {
            name: name.to_string(),
            arity,
            func: Box::new(func),
        }
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({})", self.name)
    }
}

/// A scope o' variables, chained tae its enclosing scope
#[derive(Debug, Clone)]
pub struct Environment {
    values: HashMap<String, Value>,
    enclosing: Option<Rc<RefCell<Environment>>>,
}

impl Environment {
    pub fn new() -> Self {
        Environment {
            values: HashMap::new(),
            enclosing: None,
        }
    }

    pub fn with_enclosing(enclosing: Rc<RefCell<Environment>>) -> Self {
        Environment {
            values: HashMap::new(),
            enclosing: Some(enclosing),
        }
    }

    pub fn define(&mut self, name: String, value: Value) {
        self.values.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.values.get(name) {
            return Some(value.clone());
        }
        if let Some(enclosing) = &self.enclosing {
            return enclosing.borrow().get(name);
        }
        None
    }

    pub fn assign(&mut self, name: &str, value: Value) -> bool {
        if let Some(slot) = self.values.get_mut(name) {
            *slot = value;
            return true;
        }
        if let Some(enclosing) = &self.enclosing {
            return enclosing.borrow_mut().assign(name, value);
        }
        false
    }

    pub fn contains_local(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Everything defined in this scope (no' the enclosing ones)
    pub fn get_exports(&self) -> HashMap<String, Value> {
        self.values.clone()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct TestNative;

    impl NativeObject for TestNative {
        fn type_name(&self) -> &str {
            "test_native"
        }

        fn get(&self, _prop: &str) -> HaversResult<Value> {
            Ok(Value::Nil)
        }

        fn call(&self, _method: &str, _args: Vec<Value>) -> HaversResult<Value> {
            Ok(Value::Integer(1))
        }
    }

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Integer(1).type_name(), "integer");
        assert_eq!(Value::Nil.type_name(), "naething");
        let obj: Rc<dyn NativeObject> = Rc::new(TestNative);
        assert_eq!(Value::NativeObject(obj).type_name(), "native object");
    }

    #[test]
    fn test_truthiness() {
        assert!(Value::Bool(true).is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Integer(0).is_truthy());
        assert!(Value::Integer(-3).is_truthy());
        assert!(!Value::String(String::new()).is_truthy());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Bool(true).to_string(), "aye");
        assert_eq!(Value::Nil.to_string(), "naething");
        let obj: Rc<dyn NativeObject> = Rc::new(TestNative);
        assert_eq!(Value::NativeObject(obj).to_string(), "<native test_native>");
        let f = NativeFunction::new("recurrence", 0, |_| Ok(Value::Nil));
        assert_eq!(Value::NativeFunction(Rc::new(f)).to_string(), "<native dae recurrence>");
    }

    #[test]
    fn test_numeric_equality() {
        assert_eq!(Value::Integer(2), Value::Float(2.0));
        assert_ne!(Value::Integer(2), Value::String("2".into()));
    }

    #[test]
    fn test_environment_chain() {
        let globals = Rc::new(RefCell::new(Environment::new()));
        globals.borrow_mut().define("g".into(), Value::Integer(1));

        let mut local = Environment::with_enclosing(globals.clone());
        local.define("p".into(), Value::Integer(80));

        assert_eq!(local.get("g"), Some(Value::Integer(1)));
        assert!(local.assign("g", Value::Integer(2)));
        assert_eq!(globals.borrow().get("g"), Some(Value::Integer(2)));
        assert!(!local.assign("missing", Value::Nil));

        let exports = local.get_exports();
        assert_eq!(exports.len(), 1);
        assert!(local.contains_local("p"));
        assert!(!local.contains_local("g"));
    }
}
