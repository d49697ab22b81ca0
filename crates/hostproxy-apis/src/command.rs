//! Host command execution.
//!
//! OS-backed implementations drive the host through PowerShell scripts whose
//! output is JSON (`ConvertTo-Json`). The [`CommandRunner`] trait is the seam
//! between those implementations and the process spawner so they can be
//! exercised without a host.

use async_trait::async_trait;
use hostproxy_core::{ProxyError, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

/// Runs host scripts.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `script` with extra environment variables and return its stdout.
    ///
    /// Secrets are passed through `env` and referenced from the script as
    /// `$Env:NAME` so they never appear in the command line or the logs.
    async fn run(&self, script: &str, env: &[(&str, &str)]) -> Result<String>;
}

/// Runs scripts through a PowerShell executable.
#[derive(Debug, Clone)]
pub struct PowerShell {
    program: String,
}

impl PowerShell {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Default for PowerShell {
    fn default() -> Self {
        #[cfg(windows)]
        {
            Self::new("powershell.exe")
        }

        #[cfg(not(windows))]
        {
            Self::new("pwsh")
        }
    }
}

#[async_trait]
impl CommandRunner for PowerShell {
    async fn run(&self, script: &str, env: &[(&str, &str)]) -> Result<String> {
        debug!("Running host command: {}", script);

        let output = Command::new(&self.program)
            .args(["-NoProfile", "-NonInteractive", "-Command", script])
            .envs(env.iter().copied())
            .output()
            .await
            .map_err(|e| ProxyError::CommandFailed {
                command: command_name(script),
                message: format!("failed to execute {}: {}", self.program, e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output.status.code().unwrap_or(-1);
            return Err(ProxyError::CommandFailed {
                command: command_name(script),
                message: format!("exit code {}: {}", code, stderr.trim()),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// First cmdlet (`Verb-Noun`) of a script, for error messages.
fn command_name(script: &str) -> String {
    script
        .split_whitespace()
        .map(|word| word.trim_start_matches('('))
        .find(|word| word.starts_with(|c: char| c.is_ascii_uppercase()) && word.contains('-'))
        .unwrap_or(script)
        .to_string()
}

/// Quote a value as a PowerShell single-quoted string.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Parse JSON output into `T`.
pub fn parse_json<T: DeserializeOwned>(command: &str, output: &str) -> Result<T> {
    serde_json::from_str(output.trim()).map_err(|e| ProxyError::CommandFailed {
        command: command.to_string(),
        message: format!("unexpected output: {}", e),
    })
}

/// Parse JSON output that may hold zero, one or many objects.
///
/// `ConvertTo-Json` prints nothing for an empty pipeline and a bare object
/// for a single result.
pub fn parse_json_list<T: DeserializeOwned>(command: &str, output: &str) -> Result<Vec<T>> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    match parse_json::<Value>(command, trimmed)? {
        Value::Array(items) => items
            .into_iter()
            .map(|item| parse_json_value(command, item))
            .collect(),
        Value::Null => Ok(Vec::new()),
        single => Ok(vec![parse_json_value(command, single)?]),
    }
}

fn parse_json_value<T: DeserializeOwned>(command: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| ProxyError::CommandFailed {
        command: command.to_string(),
        message: format!("unexpected output: {}", e),
    })
}

/// PowerShell boolean literal.
pub fn ps_bool(value: bool) -> &'static str {
    if value {
        "$true"
    } else {
        "$false"
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned outputs and records every script it was given.
    #[derive(Default)]
    pub struct ScriptedRunner {
        outputs: Mutex<VecDeque<Result<String>>>,
        pub scripts: Mutex<Vec<String>>,
        pub envs: Mutex<Vec<Vec<(String, String)>>>,
    }

    impl ScriptedRunner {
        pub fn with_outputs<I, S>(outputs: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            let runner = Self::default();
            runner
                .outputs
                .lock()
                .unwrap()
                .extend(outputs.into_iter().map(|s| Ok(s.into())));
            runner
        }

        pub fn push_error(&self, error: ProxyError) {
            self.outputs.lock().unwrap().push_back(Err(error));
        }

        pub fn scripts(&self) -> Vec<String> {
            self.scripts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, script: &str, env: &[(&str, &str)]) -> Result<String> {
            self.scripts.lock().unwrap().push(script.to_string());
            self.envs.lock().unwrap().push(
                env.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            );
            self.outputs
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(String::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Row {
        #[serde(rename = "Number")]
        number: u32,
    }

    #[test]
    fn test_parse_json_list_shapes() {
        assert!(parse_json_list::<Row>("Get-Disk", "").unwrap().is_empty());
        assert_eq!(
            parse_json_list::<Row>("Get-Disk", r#"{"Number": 2}"#).unwrap(),
            vec![Row { number: 2 }]
        );
        assert_eq!(
            parse_json_list::<Row>("Get-Disk", "[{\"Number\": 0}, {\"Number\": 1}]\r\n").unwrap(),
            vec![Row { number: 0 }, Row { number: 1 }]
        );
        let err = parse_json_list::<Row>("Get-Disk", "Access denied").unwrap_err();
        assert!(matches!(err, ProxyError::CommandFailed { .. }));
    }

    #[test]
    fn test_quote_escapes_single_quotes() {
        assert_eq!(quote("C:\\mnt\\a"), "'C:\\mnt\\a'");
        assert_eq!(quote("it's"), "'it''s'");
    }

    #[test]
    fn test_command_name() {
        assert_eq!(command_name("Get-Disk -Number 1 | ConvertTo-Json"), "Get-Disk");
        assert_eq!(command_name("$d = Get-Disk -Number 1"), "Get-Disk");
        assert_eq!(command_name("(Get-Volume -UniqueId 'x').Size"), "Get-Volume");
    }

    #[tokio::test]
    async fn test_missing_program_is_command_failed() {
        let runner = PowerShell::new("hostproxy-no-such-shell");
        let err = runner.run("Get-Disk", &[]).await.unwrap_err();
        assert!(matches!(err, ProxyError::CommandFailed { ref command, .. } if command == "Get-Disk"));
    }
}
