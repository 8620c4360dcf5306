//! Sandboxed expression language
//!
//! Signatures use a small JavaScript-like language for detections,
//! conclusions, generators, middlewares and variable sources. Expressions
//! can only call the functions their `Host` exposes; there is no access to
//! the filesystem or processes unless a host grants it.

pub mod command;
mod interpreter;
mod lexer;
mod parser;
mod value;

pub use interpreter::{evaluate, Host};
pub use parser::{parse, Program};
pub use value::Value;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ScriptError;

/// Parse and evaluate an expression against a host
pub fn run(source: &str, host: &mut dyn Host) -> Result<Value, ScriptError> {
    let program = parse(source)?;
    evaluate(&program, host)
}

/// A function registered by an embedder
pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value, ScriptError> + Send + Sync>;

/// Extra functions available to every expression
#[derive(Clone, Default)]
pub struct Functions {
    table: HashMap<String, NativeFn>,
}

impl Functions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, function: F)
    where
        F: Fn(&[Value]) -> Result<Value, ScriptError> + Send + Sync + 'static,
    {
        self.table.insert(name.to_string(), Arc::new(function));
    }

    pub fn get(&self, name: &str) -> Option<&NativeFn> {
        self.table.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl std::fmt::Debug for Functions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.table.keys()).finish()
    }
}

/// Host that falls back to registered functions
pub struct Extended<'a> {
    pub host: &'a mut dyn Host,
    pub functions: &'a Functions,
}

impl Host for Extended<'_> {
    fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, ScriptError> {
        match self.host.call(name, args) {
            Err(ScriptError::UnknownFunction(_)) => match self.functions.get(name) {
                Some(function) => function(args),
                None => Err(ScriptError::UnknownFunction(name.to_string())),
            },
            other => other,
        }
    }
}

/// Positional argument access for host functions
pub struct Args<'a> {
    name: &'a str,
    values: &'a [Value],
}

impl<'a> Args<'a> {
    pub fn new(name: &'a str, values: &'a [Value]) -> Self {
        Self { name, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Required string argument
    pub fn str(&self, index: usize) -> Result<String, ScriptError> {
        self.values
            .get(index)
            .map(|v| v.to_string())
            .ok_or_else(|| self.missing(index))
    }

    /// Optional string argument
    pub fn opt_str(&self, index: usize) -> Option<String> {
        self.values.get(index).map(|v| v.to_string())
    }

    /// Required integer argument
    pub fn int(&self, index: usize) -> Result<i64, ScriptError> {
        let value = self.values.get(index).ok_or_else(|| self.missing(index))?;
        let number = value.to_number();
        if number.is_nan() {
            return Err(ScriptError::BadArguments {
                function: self.name.to_string(),
                message: format!("argument {} is not a number: {}", index + 1, value),
            });
        }
        Ok(number as i64)
    }

    /// All arguments as strings
    pub fn strings(&self) -> Vec<String> {
        self.values.iter().map(|v| v.to_string()).collect()
    }

    fn missing(&self, index: usize) -> ScriptError {
        ScriptError::BadArguments {
            function: self.name.to_string(),
            message: format!("missing argument {}", index + 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Host that counts calls and echoes its arguments
    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl Host for Recorder {
        fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, ScriptError> {
            self.calls.push(name.to_string());
            match name {
                "T" => Ok(Value::Bool(true)),
                "F" => Ok(Value::Bool(false)),
                "Echo" => Ok(args.first().cloned().unwrap_or(Value::Undefined)),
                "Status" => Ok(Value::Number(200.0)),
                _ => Err(ScriptError::UnknownFunction(name.to_string())),
            }
        }
    }

    fn eval(source: &str) -> Value {
        run(source, &mut Recorder::default()).unwrap()
    }

    #[test]
    fn test_arithmetic_and_concat() {
        assert_eq!(eval("1 + 2 * 3"), Value::Number(7.0));
        assert_eq!(eval("(1 + 2) * 3"), Value::Number(9.0));
        assert_eq!(eval("'a' + 1 + 2"), Value::Str("a12".into()));
        assert_eq!(eval("-Status() + 1"), Value::Number(-199.0));
        assert_eq!(eval("7 % 4"), Value::Number(3.0));
    }

    #[test]
    fn test_comparisons() {
        assert!(eval("Status() == '200'").is_true());
        assert!(!eval("Status() === '200'").is_true());
        assert!(eval("Status() >= 200 && Status() < 300").is_true());
        assert!(eval("'abc' < 'abd'").is_true());
        assert!(!eval("'x' < 1").truthy());
    }

    #[test]
    fn test_short_circuit() {
        let mut host = Recorder::default();
        let value = run("F() && T()", &mut host).unwrap();
        assert_eq!(value, Value::Bool(false));
        assert_eq!(host.calls, vec!["F"]);

        let mut host = Recorder::default();
        run("T() || F()", &mut host).unwrap();
        assert_eq!(host.calls, vec!["T"]);
    }

    #[test]
    fn test_last_statement_wins() {
        let mut host = Recorder::default();
        let value = run("Echo('first'); Echo('second')", &mut host).unwrap();
        assert_eq!(value, Value::Str("second".into()));
        assert_eq!(host.calls.len(), 2);
    }

    #[test]
    fn test_or_returns_operand() {
        assert_eq!(eval("Echo('') || 'fallback'"), Value::Str("fallback".into()));
    }

    #[test]
    fn test_unknown_function() {
        let err = run("Nope()", &mut Recorder::default()).unwrap_err();
        assert_eq!(err, ScriptError::UnknownFunction("Nope".into()));
    }

    #[test]
    fn test_registered_functions() {
        let mut functions = Functions::new();
        functions.register("Twice", |args| {
            let n = args.first().map(|v| v.to_number()).unwrap_or(0.0);
            Ok(Value::Number(n * 2.0))
        });
        let mut recorder = Recorder::default();
        let mut host = Extended {
            host: &mut recorder,
            functions: &functions,
        };
        assert_eq!(run("Twice(21)", &mut host).unwrap(), Value::Number(42.0));
    }

    #[test]
    fn test_args_helpers() {
        let values = vec![Value::from("a"), Value::from(3.0)];
        let args = Args::new("Fn", &values);
        assert_eq!(args.str(0).unwrap(), "a");
        assert_eq!(args.int(1).unwrap(), 3);
        assert!(args.int(0).is_err());
        assert!(args.str(2).is_err());
        assert_eq!(args.opt_str(2), None);
    }
}
