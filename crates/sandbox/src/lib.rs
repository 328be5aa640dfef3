//! Docker-backed command execution sandbox.
//!
//! The sandbox runs one long-lived container per floor (`sleep infinity`
//! keep-alive) and executes commands with `docker exec bash -c`. The
//! workspace directory is bind-mounted at the same absolute path inside
//! the container so agents can use real host paths.

use rostrum_common::{Result, RostrumError};
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::{Duration, SystemTime};
use tokio::process::Command;
use tracing::{debug, info, warn};

pub const DEFAULT_IMAGE: &str = "python:3.11-slim";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Output longer than this is truncated before being handed to an agent.
const MAX_OUTPUT_CHARS: usize = 10_000;
const TRUNCATE_HEAD: usize = 5_000;
const TRUNCATE_TAIL: usize = 2_000;

/// Manages one Docker container for command execution.
pub struct Sandbox {
    image: String,
    /// Directory containing a Dockerfile (empty = use `image` directly)
    dockerfile_dir: String,
    workspace_dir: PathBuf,
    timeout: Duration,
    container_id: RwLock<Option<String>>,
}

impl Sandbox {
    pub fn new(
        workspace_dir: impl Into<PathBuf>,
        image: impl Into<String>,
        dockerfile: impl Into<String>,
    ) -> Self {
        let image = image.into();
        Self {
            image: if image.is_empty() {
                DEFAULT_IMAGE.to_string()
            } else {
                image
            },
            dockerfile_dir: dockerfile.into(),
            workspace_dir: workspace_dir.into(),
            timeout: DEFAULT_TIMEOUT,
            container_id: RwLock::new(None),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The short container id, for display. Empty before `start`.
    pub fn container_id(&self) -> String {
        let guard = self.container_id.read().unwrap_or_else(|e| e.into_inner());
        let id = guard.as_deref().unwrap_or("");
        id.chars().take(12).collect()
    }

    /// Build the image from the Dockerfile if it is missing or stale.
    async fn ensure_image(&self) -> Result<()> {
        if self.dockerfile_dir.is_empty() {
            return Ok(());
        }

        let mut dir = PathBuf::from(&self.dockerfile_dir);
        let meta = std::fs::metadata(&dir).map_err(|_| {
            RostrumError::Sandbox(format!("dockerfile path not found: {}", dir.display()))
        })?;
        if !meta.is_dir() {
            if let Some(parent) = dir.parent() {
                dir = parent.to_path_buf();
            }
        }

        let dockerfile = dir.join("Dockerfile");
        if !dockerfile.exists() {
            return Err(RostrumError::Sandbox(format!(
                "Dockerfile not found: {}",
                dockerfile.display()
            )));
        }

        let needs_build = match self.image_created_at().await {
            None => true,
            Some(image_time) => std::fs::metadata(&dockerfile)
                .and_then(|m| m.modified())
                .map(|mtime| mtime > image_time)
                .unwrap_or(false),
        };
        if !needs_build {
            return Ok(());
        }

        info!(image = %self.image, dir = %dir.display(), "Building sandbox image");
        let status = Command::new("docker")
            .args(["build", "-t", self.image.as_str()])
            .arg(&dir)
            .status()
            .await
            .map_err(|e| RostrumError::Sandbox(format!("docker build failed to run: {e}")))?;
        if !status.success() {
            return Err(RostrumError::Sandbox(format!(
                "failed to build image {}",
                self.image
            )));
        }
        Ok(())
    }

    /// Creation time of the configured image, or None if it does not exist.
    async fn image_created_at(&self) -> Option<SystemTime> {
        let output = Command::new("docker")
            .args(["inspect", "-f", "{{.Created}}", self.image.as_str()])
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let created = String::from_utf8_lossy(&output.stdout).trim().to_string();
        parse_rfc3339(&created)
    }

    /// Launch the container.
    pub async fn start(&self) -> Result<()> {
        self.ensure_image().await?;

        let workspace = std::fs::canonicalize(&self.workspace_dir).or_else(|_| {
            std::fs::create_dir_all(&self.workspace_dir)?;
            std::fs::canonicalize(&self.workspace_dir)
        })?;

        let mount = format!("{}:{}", workspace.display(), workspace.display());
        let output = Command::new("docker")
            .args(["run", "-d", "--rm", "-w"])
            .arg(&workspace)
            .args(["-v", mount.as_str()])
            .arg(&self.image)
            .args(["sleep", "infinity"])
            .output()
            .await
            .map_err(|e| RostrumError::Sandbox(format!("docker run failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RostrumError::Sandbox(format!(
                "failed to start container (image: {}): {}",
                self.image,
                stderr.trim()
            )));
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!(container = %id.chars().take(12).collect::<String>(), image = %self.image, "Sandbox started");
        *self
            .container_id
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(id);
        Ok(())
    }

    /// Run a command in the container, returning combined stdout+stderr.
    ///
    /// Output is returned even when the command exits non-zero; the agent
    /// sees whatever the command printed. Times out after the configured
    /// wall-clock limit, killing the exec process.
    pub async fn execute(&self, command: &str) -> Result<String> {
        let container = {
            let guard = self.container_id.read().unwrap_or_else(|e| e.into_inner());
            guard
                .clone()
                .ok_or_else(|| RostrumError::Sandbox("sandbox not started".to_string()))?
        };

        debug!(container = %container.chars().take(12).collect::<String>(), %command, "Sandbox exec");

        let mut child = Command::new("docker")
            .args(["exec", container.as_str(), "bash", "-c", command])
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RostrumError::Sandbox(format!("docker exec failed: {e}")))?;

        let result = tokio::time::timeout(self.timeout, child.wait_with_output()).await;
        match result {
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                Ok(shape_output(&combined))
            }
            Ok(Err(e)) => Err(RostrumError::Sandbox(format!("docker exec failed: {e}"))),
            Err(_) => {
                warn!(%command, timeout_secs = self.timeout.as_secs(), "Sandbox command timed out");
                Err(RostrumError::Sandbox(format!(
                    "command timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }

    /// Kill the container. Safe to call twice.
    pub async fn stop(&self) {
        let container = {
            let mut guard = self.container_id.write().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        if let Some(id) = container {
            let _ = Command::new("docker")
                .args(["kill", id.as_str()])
                .output()
                .await;
            info!("Sandbox stopped");
        }
    }
}

/// Trim, substitute a placeholder for empty output, and truncate long output.
fn shape_output(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "[no output]".to_string();
    }
    if trimmed.chars().count() <= MAX_OUTPUT_CHARS {
        return trimmed.to_string();
    }
    let head: String = trimmed.chars().take(TRUNCATE_HEAD).collect();
    let tail: String = {
        let chars: Vec<char> = trimmed.chars().collect();
        chars[chars.len() - TRUNCATE_TAIL..].iter().collect()
    };
    format!("{head}\n... [truncated] ...\n{tail}")
}

/// Parse an RFC 3339 timestamp as emitted by `docker inspect`.
///
/// Only the fields needed for an ordering comparison are read; sub-second
/// precision and non-UTC offsets are ignored.
fn parse_rfc3339(s: &str) -> Option<SystemTime> {
    let date = s.get(0..10)?;
    let time = s.get(11..19)?;
    let mut parts = date.split('-');
    let year: i64 = parts.next()?.parse().ok()?;
    let month: i64 = parts.next()?.parse().ok()?;
    let day: i64 = parts.next()?.parse().ok()?;
    let mut parts = time.split(':');
    let hour: i64 = parts.next()?.parse().ok()?;
    let min: i64 = parts.next()?.parse().ok()?;
    let sec: i64 = parts.next()?.parse().ok()?;

    // Days since epoch via the civil-days algorithm.
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (month + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    let days = era * 146_097 + doe - 719_468;

    let secs = days * 86_400 + hour * 3_600 + min * 60 + sec;
    if secs < 0 {
        return None;
    }
    Some(SystemTime::UNIX_EPOCH + Duration::from_secs(secs as u64))
}
