//! Host command execution.
//!
//! The agent runs in a container; commands that must act on the node
//! (podman, systemd-run, ostree, oc) are run through `nsenter` into the
//! namespaces of PID 1.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Command execution errors.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} failed (exit code {code:?}): {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// Runs commands on the host.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run `command` with `args` and return its stdout.
    async fn execute(&self, command: &str, args: &[&str]) -> Result<String, ExecError>;
}

/// Executor backed by real processes.
#[derive(Debug, Clone)]
pub struct HostExecutor {
    use_nsenter: bool,
}

impl HostExecutor {
    pub fn new(use_nsenter: bool) -> Self {
        Self { use_nsenter }
    }
}

#[async_trait]
impl Executor for HostExecutor {
    async fn execute(&self, command: &str, args: &[&str]) -> Result<String, ExecError> {
        let mut cmd = if self.use_nsenter {
            let mut cmd = Command::new("nsenter");
            cmd.args(["--target", "1", "--cgroup", "--mount", "--ipc", "--pid", "--", command]);
            cmd
        } else {
            Command::new(command)
        };
        cmd.args(args).kill_on_drop(true);

        debug!(command, ?args, nsenter = self.use_nsenter, "Executing host command");

        let output = cmd.output().await.map_err(|source| ExecError::Spawn {
            command: command.to_string(),
            source,
        })?;

        if !output.status.success() {
            return Err(ExecError::Failed {
                command: command.to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

type Handler = Arc<dyn Fn(&[String]) -> Result<String, String> + Send + Sync>;

/// Scripted executor for tests.
///
/// Responses are keyed by command name. Unscripted commands succeed with
/// empty output. Every invocation is recorded.
#[derive(Default)]
pub struct MockExecutor {
    handlers: Mutex<HashMap<String, Handler>>,
    calls: Mutex<Vec<String>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to `command` with a fixed stdout.
    pub fn respond(&self, command: &str, stdout: impl Into<String>) {
        let stdout = stdout.into();
        self.on(command, move |_| Ok(stdout.clone()));
    }

    /// Fail every invocation of `command` with `stderr`.
    pub fn fail(&self, command: &str, stderr: impl Into<String>) {
        let stderr = stderr.into();
        self.on(command, move |_| Err(stderr.clone()));
    }

    /// Respond to `command` by calling `handler` with its arguments.
    pub fn on(&self, command: &str, handler: impl Fn(&[String]) -> Result<String, String> + Send + Sync + 'static) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(command.to_string(), Arc::new(handler));
    }

    /// Invocations so far, each as `"command arg arg"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Whether any invocation started with `prefix`.
    pub fn called(&self, prefix: &str) -> bool {
        self.calls().iter().any(|call| call.starts_with(prefix))
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn execute(&self, command: &str, args: &[&str]) -> Result<String, ExecError> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let mut line = command.to_string();
        for arg in &args {
            line.push(' ');
            line.push_str(arg);
        }
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(line);

        let handler = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(command)
            .cloned();

        match handler {
            Some(handler) => handler(&args).map_err(|stderr| ExecError::Failed {
                command: command.to_string(),
                code: Some(1),
                stderr,
            }),
            None => Ok(String::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_host_executor_captures_stdout() {
        let exec = HostExecutor::new(false);
        let out = exec.execute("echo", &["seed"]).await.unwrap();
        assert_eq!(out.trim(), "seed");
    }

    #[tokio::test]
    async fn test_host_executor_reports_exit_code() {
        let exec = HostExecutor::new(false);
        let err = exec.execute("sh", &["-c", "echo nope >&2; exit 3"]).await.unwrap_err();
        match err {
            ExecError::Failed { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_mock_executor_scripts_and_records() {
        let exec = MockExecutor::new();
        exec.respond("ostree", "usage: set-default");
        exec.fail("podman", "no such container");

        assert_eq!(exec.execute("ostree", &["admin", "--help"]).await.unwrap(), "usage: set-default");
        assert!(exec.execute("podman", &["inspect"]).await.is_err());
        assert_eq!(exec.execute("oc", &["get"]).await.unwrap(), "");

        assert_eq!(exec.calls(), vec!["ostree admin --help", "podman inspect", "oc get"]);
        assert!(exec.called("podman inspect"));
    }
}
