//! Variable expansion
//!
//! Each declared variable becomes a list of values. With more than one
//! variable the lists are zipped, shorter lists cycling, so a signature
//! with `a=[1,2,3]` and `b=[x,y]` yields three rows rather than six.

use rand::Rng;
use regex::Regex;
use std::sync::OnceLock;

use super::resolve;
use crate::error::ScriptError;
use crate::fuzzer::encoding::{base64_encode, query_escape};
use crate::scripting::{self, command, Args, Host, Value};
use crate::signature::{Signature, Target, VariableSource};

/// One set of variable assignments
pub type VariableRow = Target;

/// Longest value `RandomString` and `RandomNumber` produce
const MAX_RANDOM_LENGTH: i64 = 4096;

/// Most values one `Range` call produces
const MAX_RANGE_VALUES: i64 = 100_000;

/// Lowercase ASCII letters
pub fn random_string(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length).map(|_| (b'a' + rng.gen_range(0..26)) as char).collect()
}

fn clamp_length(function: &str, requested: i64) -> usize {
    if requested > MAX_RANDOM_LENGTH {
        tracing::debug!(function, requested, max = MAX_RANDOM_LENGTH, "Clamping random value length");
    }
    requested.clamp(0, MAX_RANDOM_LENGTH) as usize
}

fn script_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)^\s*[A-Za-z_][A-Za-z0-9_]*\s*\(.*\)\s*$").expect("valid regex")
    })
}

/// Expand a signature's variables into rows
pub fn expand(signature: &Signature, target: &Target, allow_commands: bool) -> Vec<VariableRow> {
    let sources = signature.variable_sources();
    if sources.len() > 3 {
        tracing::warn!(
            signature = %signature.id,
            count = sources.len(),
            "More than 3 variables are zipped, not multiplied; confirm this is intended"
        );
    }

    let lists: Vec<(String, Vec<String>)> = sources
        .into_iter()
        .filter_map(|(name, source)| {
            let values = evaluate_source(&source, target, allow_commands)?;
            if values.is_empty() {
                tracing::debug!(signature = %signature.id, variable = %name, "Variable produced no values");
            }
            Some((name, values))
        })
        .filter(|(_, values)| !values.is_empty())
        .collect();

    let Some(longest) = lists.iter().map(|(_, values)| values.len()).max() else {
        return Vec::new();
    };

    (0..longest)
        .map(|i| {
            lists
                .iter()
                .map(|(name, values)| (name.clone(), values[i % values.len()].clone()))
                .collect()
        })
        .collect()
}

/// Evaluate one variable source into its values
///
/// Returns `None` for a blank source, which declares nothing.
pub fn evaluate_source(
    source: &VariableSource,
    target: &Target,
    allow_commands: bool,
) -> Option<Vec<String>> {
    let raw = match source {
        VariableSource::List(values) => return Some(values.clone()),
        VariableSource::Text(raw) if raw.trim().is_empty() => return None,
        VariableSource::Text(raw) => raw,
    };

    if script_pattern().is_match(raw) {
        let script = resolve(raw, target);
        let mut host = VariableHost {
            allow_commands,
            values: Vec::new(),
        };
        return Some(match scripting::run(&script, &mut host) {
            Ok(_) => host.values,
            Err(e) => {
                tracing::debug!(script = %script, error = %e, "Variable script failed");
                Vec::new()
            }
        });
    }

    let trimmed = raw.trim();
    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        return Some(
            trimmed[1..trimmed.len() - 1]
                .split(',')
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect(),
        );
    }

    if trimmed.contains('\n') {
        return Some(non_empty_lines(trimmed));
    }

    let path = resolve(trimmed, target);
    Some(match std::fs::read_to_string(&path) {
        Ok(content) => non_empty_lines(&content),
        Err(e) => {
            tracing::debug!(path = %path, error = %e, "Variable file not readable");
            Vec::new()
        }
    })
}

fn non_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
        .collect()
}

fn read_lines(function: &str, path: &str) -> Result<Vec<String>, ScriptError> {
    std::fs::read_to_string(path)
        .map(|content| non_empty_lines(&content))
        .map_err(|e| ScriptError::ExecutionError(format!("{}: {}: {}", function, path, e)))
}

/// Built-ins for scripted variable sources; each call appends values
struct VariableHost {
    allow_commands: bool,
    values: Vec<String>,
}

impl Host for VariableHost {
    fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, ScriptError> {
        let args = Args::new(name, args);
        match name {
            "RandomString" => {
                let value = random_string(clamp_length(name, args.int(0)?));
                self.values.push(value.clone());
                Ok(Value::Str(value))
            }
            "RandomNumber" => {
                let length = clamp_length(name, args.int(0)?).max(1);
                let mut rng = rand::thread_rng();
                let mut value = rng.gen_range(1..=9).to_string();
                for _ in 1..length {
                    value.push(char::from(b'0' + rng.gen_range(0..10)));
                }
                self.values.push(value.clone());
                Ok(Value::Str(value))
            }
            "Range" => {
                let (min, requested) = (args.int(0)?, args.int(1)?);
                let max = requested.min(min.saturating_add(MAX_RANGE_VALUES));
                if max < requested {
                    tracing::debug!(min, requested, max, "Clamping Range");
                }
                self.values.extend((min..max).map(|n| n.to_string()));
                Ok(Value::Undefined)
            }
            "File" => {
                self.values.extend(read_lines(name, &args.str(0)?)?);
                Ok(Value::Undefined)
            }
            "SplitLines" => {
                self.values.extend(non_empty_lines(&args.str(0)?));
                Ok(Value::Undefined)
            }
            "Base64Encode" => {
                let value = base64_encode(&args.str(0)?);
                self.values.push(value.clone());
                Ok(Value::Str(value))
            }
            "URLEncode" => {
                let value = query_escape(&args.str(0)?);
                self.values.push(value.clone());
                Ok(Value::Str(value))
            }
            "Base64EncodeByLines" => {
                let lines = read_lines(name, &args.str(0)?)?;
                self.values.extend(lines.iter().map(|l| base64_encode(l)));
                Ok(Value::Undefined)
            }
            "URLEncodeByLines" => {
                let lines = read_lines(name, &args.str(0)?)?;
                self.values.extend(lines.iter().map(|l| query_escape(l)));
                Ok(Value::Undefined)
            }
            "InputCmd" => {
                let output = command::shell(name, &args.str(0)?, self.allow_commands)?;
                self.values.extend(non_empty_lines(&output));
                Ok(Value::Undefined)
            }
            _ => Err(ScriptError::UnknownFunction(name.to_string())),
        }
    }
}
