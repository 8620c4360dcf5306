//! Detection and conclusion evaluation
//!
//! Detections, conclusions and per-request conditions share one host.
//! Value-setting built-ins never touch the shared target directly: they
//! append to a write list that later expressions on the same record can
//! read, and that the dispatcher applies once the record is done.

use regex::Regex;
use std::io::Write;
use std::sync::Arc;

use super::oob::OobPoller;
use super::record::Record;
use crate::error::ScriptError;
use crate::scripting::{self, command, Args, Extended, Functions, Host, Value};

/// Ordered `(key, value)` writes produced while evaluating a record
pub type Writes = Vec<(String, String)>;

/// Evaluates signature expressions against records
#[derive(Clone)]
pub struct Evaluator {
    allow_commands: bool,
    poller: Arc<dyn OobPoller>,
    functions: Functions,
}

impl Evaluator {
    pub fn new(allow_commands: bool, poller: Arc<dyn OobPoller>) -> Self {
        Self {
            allow_commands,
            poller,
            functions: Functions::new(),
        }
    }

    /// Make extra functions available to every expression
    pub fn with_functions(mut self, functions: Functions) -> Self {
        self.functions = functions;
        self
    }

    pub fn allow_commands(&self) -> bool {
        self.allow_commands
    }

    /// Evaluate a detection
    ///
    /// Returns the evidence gathered by built-ins and whether the expression
    /// evaluated to exactly `true`. Errors count as no match.
    pub fn detect(&self, expression: &str, record: &Record, writes: &mut Writes) -> (String, bool) {
        match self.evaluate(expression, record, writes) {
            Ok((value, extra)) => (extra, value.is_true()),
            Err(e) => {
                tracing::debug!(expression, error = %e, "Detection failed");
                (String::new(), false)
            }
        }
    }

    /// Run a conclusion for its writes
    pub fn conclude(&self, expression: &str, record: &Record, writes: &mut Writes) {
        if let Err(e) = self.evaluate(expression, record, writes) {
            tracing::debug!(expression, error = %e, "Conclusion failed");
        }
    }

    /// Evaluate a per-request condition
    pub fn check_condition(&self, expression: &str, record: &Record, writes: &mut Writes) -> bool {
        self.detect(expression, record, writes).1
    }

    fn evaluate(
        &self,
        expression: &str,
        record: &Record,
        writes: &mut Writes,
    ) -> Result<(Value, String), ScriptError> {
        let mut host = DetectionHost {
            record,
            writes,
            extra: String::new(),
            allow_commands: self.allow_commands,
            poller: self.poller.as_ref(),
        };
        let value = if self.functions.is_empty() {
            scripting::run(expression, &mut host)?
        } else {
            let mut extended = Extended {
                host: &mut host,
                functions: &self.functions,
            };
            scripting::run(expression, &mut extended)?
        };
        Ok((value, host.extra))
    }
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("allow_commands", &self.allow_commands)
            .field("functions", &self.functions)
            .finish()
    }
}

struct DetectionHost<'a> {
    record: &'a Record,
    writes: &'a mut Writes,
    extra: String,
    allow_commands: bool,
    poller: &'a dyn OobPoller,
}

impl DetectionHost<'_> {
    /// Latest write wins over the record's variables
    fn value_of(&self, name: &str) -> Option<String> {
        self.writes
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .or_else(|| self.record.vars.get(name).cloned())
    }

    fn write(&mut self, name: String, value: String) {
        tracing::debug!(name = %name, value = %value, "Setting value");
        self.writes.push((name, value));
    }

    fn status(&self) -> f64 {
        self.record.response.as_ref().map(|r| r.status as f64).unwrap_or(0.0)
    }
}

fn compile(pattern: &str) -> Result<Regex, ScriptError> {
    Regex::new(pattern).map_err(|e| ScriptError::InvalidRegex {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

/// Capture `group` of the first match, empty when nothing matches
fn regex_capture(text: &str, pattern: &str, group: usize) -> Result<String, ScriptError> {
    let regex = compile(pattern)?;
    Ok(regex
        .captures(text)
        .and_then(|c| c.get(group))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default())
}

/// Substring between the first `left` and the next `right`
fn between(text: &str, left: &str, right: &str) -> String {
    let Some(start) = text.find(left).map(|i| i + left.len()) else {
        return String::new();
    };
    let rest = &text[start..];
    match rest.find(right) {
        Some(end) if !right.is_empty() => rest[..end].to_string(),
        _ => rest.to_string(),
    }
}

impl Host for DetectionHost<'_> {
    fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, ScriptError> {
        let args = Args::new(name, args);
        match name {
            "StringSearch" => {
                let component = self.record.component(&args.str(0)?);
                Ok(Value::Bool(component.contains(&args.str(1)?)))
            }
            "StringCount" => {
                let component = self.record.component(&args.str(0)?);
                let needle = args.str(1)?;
                let count = if needle.is_empty() { 0 } else { component.matches(&needle).count() };
                Ok(Value::Number(count as f64))
            }
            "RegexSearch" => {
                let component = self.record.component(&args.str(0)?);
                let regex = compile(&args.str(1)?)?;
                match regex.find(&component) {
                    Some(m) => {
                        self.extra = m.as_str().to_string();
                        Ok(Value::Bool(true))
                    }
                    None => Ok(Value::Bool(false)),
                }
            }
            "RegexCount" => {
                let component = self.record.component(&args.str(0)?);
                let regex = compile(&args.str(1)?)?;
                Ok(Value::Number(regex.find_iter(&component).count() as f64))
            }
            "StatusCode" => Ok(Value::Number(self.status())),
            "ResponseTime" => Ok(Value::Number(
                self.record.response.as_ref().map(|r| r.response_time()).unwrap_or(0.0),
            )),
            "ContentLength" => Ok(Value::Number(
                self.record.response.as_ref().map(|r| r.size as f64).unwrap_or(0.0),
            )),
            "OriginStatusCode" => Ok(Value::Number(
                self.record.origin_response().map(|r| r.status as f64).unwrap_or(0.0),
            )),
            "OriginResponseTime" => Ok(Value::Number(
                self.record.origin_response().map(|r| r.response_time()).unwrap_or(0.0),
            )),
            "OriginContentLength" => Ok(Value::Number(
                self.record.origin_response().map(|r| r.size as f64).unwrap_or(0.0),
            )),
            "Collab" => {
                let (found, evidence) = self.poller.lookup(&args.str(0)?);
                if found {
                    self.extra = evidence;
                }
                Ok(Value::Bool(found))
            }
            "RegexGrep" => {
                let component = self.record.component(&args.str(0)?);
                let group = if args.len() > 2 { args.int(2)?.max(0) as usize } else { 0 };
                let value = regex_capture(&component, &args.str(1)?, group)?;
                if !value.is_empty() {
                    self.extra = value.clone();
                }
                Ok(Value::Str(value))
            }
            "StringSelect" => {
                let component = self.record.component(&args.str(0)?);
                let (target, left, right) = if args.len() >= 4 {
                    (Some(args.str(1)?), args.str(2)?, args.str(3)?)
                } else {
                    (None, args.str(1)?, args.str(2)?)
                };
                let value = between(&component, &left, &right);
                if let Some(target) = target {
                    self.write(target, value.clone());
                }
                Ok(Value::Str(value))
            }
            "RegexSelect" => {
                let component = self.record.component(&args.str(0)?);
                let target = args.str(1)?;
                let group = if args.len() > 3 { args.int(3)?.max(0) as usize } else { 0 };
                let value = regex_capture(&component, &args.str(2)?, group)?;
                self.write(target, value.clone());
                Ok(Value::Str(value))
            }
            "SetValue" => {
                let (target, value) = (args.str(0)?, args.str(1)?);
                self.write(target, value);
                Ok(Value::Bool(true))
            }
            "ValueOf" => Ok(match self.value_of(&args.str(0)?) {
                Some(value) if !value.is_empty() => Value::Str(value),
                _ => Value::Bool(false),
            }),
            // The analyzer runs passive rules when this matches
            "DoPassive" => Ok(Value::Bool(true)),
            "Printf" => {
                let component = self.record.component(&args.str(0)?);
                tracing::info!(signature = %self.record.signature.id, "{}", component);
                Ok(Value::Bool(true))
            }
            "ExecCmd" => {
                let output = command::shell(name, &args.str(0)?, self.allow_commands)?;
                Ok(Value::Str(output.trim_end().to_string()))
            }
            "WriteTo" => {
                if !self.allow_commands {
                    return Err(ScriptError::CommandsDisabled(name.to_string()));
                }
                let (path, value) = (args.str(0)?, args.str(1)?);
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .map_err(|e| ScriptError::ExecutionError(format!("{}: {}: {}", name, path, e)))?;
                writeln!(file, "{}", value)
                    .map_err(|e| ScriptError::ExecutionError(format!("{}: {}: {}", name, path, e)))?;
                Ok(Value::Bool(true))
            }
            _ => Err(ScriptError::UnknownFunction(name.to_string())),
        }
    }
}
