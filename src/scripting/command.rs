//! Capability-gated shell execution for built-ins

use std::process::Command;

use crate::error::ScriptError;

/// Run `bash -c <command>` and return its stdout
///
/// `function` names the calling built-in for error messages.
pub fn shell(function: &str, command: &str, allowed: bool) -> Result<String, ScriptError> {
    if !allowed {
        return Err(ScriptError::CommandsDisabled(function.to_string()));
    }

    tracing::debug!(function, command, "Running external command");
    let output = Command::new("bash")
        .arg("-c")
        .arg(command)
        .output()
        .map_err(|e| ScriptError::ExecutionError(format!("{}: {}", function, e)))?;

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_by_default() {
        let err = shell("ExecCmd", "echo hi", false).unwrap_err();
        assert_eq!(err, ScriptError::CommandsDisabled("ExecCmd".into()));
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_output() {
        assert_eq!(shell("ExecCmd", "echo hi", true).unwrap(), "hi\n");
    }
}
