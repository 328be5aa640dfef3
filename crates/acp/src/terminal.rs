//! Terminal manager for external-agent `terminal/*` callbacks.
//!
//! Maps the protocol's asynchronous terminal model onto background command
//! execution: each `create` launches the command (in the sandbox when one
//! is attached, else on the host) and captures output into a growing
//! buffer. Each terminal carries its own completion signal, so concurrent
//! terminals per session work.

use rostrum_common::{Result, RostrumError};
use rostrum_sandbox::Sandbox;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, warn};

struct Terminal {
    output: Mutex<String>,
    exit: watch::Receiver<Option<i32>>,
}

/// Tracks terminals created by one agent session.
pub struct TerminalManager {
    sandbox: Option<Arc<Sandbox>>,
    terminals: Mutex<HashMap<String, Arc<Terminal>>>,
    next_id: AtomicU64,
}

impl TerminalManager {
    pub fn new(sandbox: Option<Arc<Sandbox>>) -> Self {
        Self {
            sandbox,
            terminals: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Launch a command and return its terminal id. Output accumulates in
    /// the background; `output` and `wait_for_exit` observe it.
    pub fn create(&self, command: &str, args: &[String], cwd: Option<&str>) -> String {
        let id = format!("term-{}", self.next_id.fetch_add(1, Ordering::SeqCst));

        let mut full_cmd = command.to_string();
        for arg in args {
            full_cmd.push(' ');
            full_cmd.push_str(arg);
        }
        if let Some(cwd) = cwd.filter(|c| !c.is_empty()) {
            full_cmd = format!("cd {cwd} && {full_cmd}");
        }

        debug!(terminal = %id, command = %full_cmd, "Creating terminal");

        let (exit_tx, exit_rx) = watch::channel(None);
        let terminal = Arc::new(Terminal {
            output: Mutex::new(String::new()),
            exit: exit_rx,
        });
        self.terminals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), Arc::clone(&terminal));

        let sandbox = self.sandbox.clone();
        tokio::spawn(async move {
            let (output, code) = run_command(sandbox, &full_cmd).await;
            {
                let mut buffer = terminal.output.lock().unwrap_or_else(|e| e.into_inner());
                buffer.push_str(&output);
            }
            let _ = exit_tx.send(Some(code));
        });

        id
    }

    /// Current buffered output, non-blocking.
    pub fn output(&self, id: &str) -> Result<String> {
        let terminal = self.get(id)?;
        let output = terminal.output.lock().unwrap_or_else(|e| e.into_inner());
        Ok(output.clone())
    }

    /// Block until the command completes; returns the exit code.
    pub async fn wait_for_exit(&self, id: &str) -> Result<i32> {
        let terminal = self.get(id)?;
        let mut exit = terminal.exit.clone();
        loop {
            if let Some(code) = *exit.borrow() {
                return Ok(code);
            }
            exit.changed()
                .await
                .map_err(|_| RostrumError::Acp(format!("terminal {id} worker vanished")))?;
        }
    }

    /// Best-effort kill. Sandbox commands are bounded by the sandbox
    /// timeout; there is no process handle to signal here.
    pub fn kill(&self, id: &str) -> Result<()> {
        self.get(id).map(|_| ())
    }

    /// Remove a terminal from tracking.
    pub fn release(&self, id: &str) {
        self.terminals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }

    fn get(&self, id: &str) -> Result<Arc<Terminal>> {
        self.terminals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| RostrumError::Acp(format!("terminal {id} not found")))
    }
}

/// Run the command to completion, returning (output, exit code).
async fn run_command(sandbox: Option<Arc<Sandbox>>, command: &str) -> (String, i32) {
    match sandbox {
        Some(sandbox) => match sandbox.execute(command).await {
            Ok(output) => (output, 0),
            Err(e) => {
                warn!(%command, error = %e, "Terminal command failed in sandbox");
                (format!("[ERROR: {e}]"), 1)
            }
        },
        None => {
            let result = tokio::process::Command::new("bash")
                .args(["-c", command])
                .output()
                .await;
            match result {
                Ok(output) => {
                    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                    text.push_str(&String::from_utf8_lossy(&output.stderr));
                    (text, output.status.code().unwrap_or(1))
                }
                Err(e) => {
                    warn!(%command, error = %e, "Terminal command failed on host");
                    (format!("[ERROR: {e}]"), 1)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_wait_returns_exit_code() {
        let manager = TerminalManager::new(None);
        let id = manager.create("echo", &["hello".to_string()], None);
        let code = manager.wait_for_exit(&id).await.unwrap();
        assert_eq!(code, 0);
        let output = manager.output(&id).unwrap();
        assert!(output.contains("hello"));
    }

    #[tokio::test]
    async fn nonzero_exit_code_is_reported() {
        let manager = TerminalManager::new(None);
        let id = manager.create("false", &[], None);
        let code = manager.wait_for_exit(&id).await.unwrap();
        assert_ne!(code, 0);
    }

    #[tokio::test]
    async fn unknown_terminal_is_an_error() {
        let manager = TerminalManager::new(None);
        assert!(manager.output("term-99").is_err());
        assert!(manager.wait_for_exit("term-99").await.is_err());
        assert!(manager.kill("term-99").is_err());
    }

    #[tokio::test]
    async fn release_removes_tracking() {
        let manager = TerminalManager::new(None);
        let id = manager.create("true", &[], None);
        manager.wait_for_exit(&id).await.unwrap();
        manager.release(&id);
        assert!(manager.output(&id).is_err());
    }

    #[tokio::test]
    async fn concurrent_terminals_are_independent() {
        let manager = TerminalManager::new(None);
        let a = manager.create("echo", &["first".to_string()], None);
        let b = manager.create("echo", &["second".to_string()], None);
        manager.wait_for_exit(&a).await.unwrap();
        manager.wait_for_exit(&b).await.unwrap();
        assert!(manager.output(&a).unwrap().contains("first"));
        assert!(manager.output(&b).unwrap().contains("second"));
    }

    #[tokio::test]
    async fn cwd_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TerminalManager::new(None);
        let id = manager.create("pwd", &[], Some(dir.path().to_str().unwrap()));
        manager.wait_for_exit(&id).await.unwrap();
        let output = manager.output(&id).unwrap();
        assert!(output.trim_end().ends_with(
            dir.path().file_name().unwrap().to_str().unwrap()
        ));
    }
}
