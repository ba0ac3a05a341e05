//! Lifecycle of the locally-managed embedding server: spawn, health
//! poll, request, and graceful shutdown. The server is always bound to
//! `127.0.0.1` and every outbound request is checked by
//! [`crate::http_guard::enforce_loopback`] before it leaves this
//! process.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::http_guard::enforce_loopback;
use crate::InferenceError;
use quaero_protocol::defaults::{
    EMBED_PHYSICAL_BATCH_SIZE, HEALTH_POLL_INTERVAL_MS, HEALTH_POLL_TIMEOUT_SECS,
    SUBPROCESS_SHUTDOWN_GRACE_SECS,
};

#[derive(Debug, Clone)]
pub struct EmbedConfig {
    pub binary_dir: Option<PathBuf>,
    pub binary_name: String,
    pub model_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub thread_count: u32,
    pub gpu_layers: u32,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            binary_dir: None,
            binary_name: "embed-server".to_string(),
            model_path: PathBuf::from("model.gguf"),
            host: quaero_protocol::defaults::DEFAULT_EMBED_HOST.to_string(),
            port: quaero_protocol::defaults::DEFAULT_EMBED_PORT,
            thread_count: 4,
            gpu_layers: 0,
        }
    }
}

impl EmbedConfig {
    fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

enum ProcessState {
    Stopped,
    Running { child: Child },
}

pub struct EmbedManager {
    config: EmbedConfig,
    client: reqwest::Client,
    state: Mutex<ProcessState>,
    ready: std::sync::atomic::AtomicBool,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    content: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl EmbedManager {
    pub fn new(config: EmbedConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            state: Mutex::new(ProcessState::Stopped),
            ready: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub async fn start(&self, binary_path: &std::path::Path) -> Result<(), InferenceError> {
        let mut state = self.state.lock().await;

        let child = Command::new(binary_path)
            .arg("--embedding")
            .arg("--host")
            .arg(&self.config.host)
            .arg("--port")
            .arg(self.config.port.to_string())
            .arg("--model")
            .arg(&self.config.model_path)
            .arg("--threads")
            .arg(self.config.thread_count.to_string())
            .arg("--gpu-layers")
            .arg(self.config.gpu_layers.to_string())
            .arg("--batch-size")
            .arg(EMBED_PHYSICAL_BATCH_SIZE.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        *state = ProcessState::Running { child };
        drop(state);

        self.wait_for_health().await
    }

    async fn wait_for_health(&self) -> Result<(), InferenceError> {
        let health_url = format!("{}/health", self.config.base_url());
        enforce_loopback(&health_url)?;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(HEALTH_POLL_TIMEOUT_SECS);
        loop {
            if tokio::time::Instant::now() >= deadline {
                self.close().await;
                return Err(InferenceError::HealthCheckTimedOut);
            }

            if let Ok(resp) = self.client.get(&health_url).send().await {
                if resp.status().is_success() {
                    self.ready.store(true, std::sync::atomic::Ordering::SeqCst);
                    tracing::info!("embedding subprocess healthy at {}", health_url);
                    return Ok(());
                }
            }

            tokio::time::sleep(Duration::from_millis(HEALTH_POLL_INTERVAL_MS)).await;
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, InferenceError> {
        if !self.is_ready() {
            return Err(InferenceError::NotReady);
        }

        let url = format!("{}/embedding", self.config.base_url());
        enforce_loopback(&url)?;

        let response = self
            .client
            .post(&url)
            .json(&EmbeddingRequest { content: text })
            .send()
            .await
            .map_err(|e| InferenceError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::NonSuccessStatus {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::Transport(e.to_string()))?;

        if parsed.embedding.is_empty() {
            return Err(InferenceError::EmptyEmbedding);
        }

        Ok(parsed.embedding)
    }

    /// Asks the subprocess to exit with an interrupt, giving it a grace
    /// period to shut down cleanly before a hard kill.
    pub async fn close(&self) {
        self.ready.store(false, std::sync::atomic::Ordering::SeqCst);
        let mut state = self.state.lock().await;
        if let ProcessState::Running { mut child } = std::mem::replace(&mut *state, ProcessState::Stopped) {
            interrupt(&child);
            let grace = Duration::from_secs(SUBPROCESS_SHUTDOWN_GRACE_SECS);
            if tokio::time::timeout(grace, child.wait()).await.is_err() {
                let _ = child.kill().await;
            }
        }
    }
}

#[cfg(unix)]
fn interrupt(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else { return };
    if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
        tracing::warn!(%err, pid, "failed to send SIGINT to embedding subprocess");
    }
}

#[cfg(not(unix))]
fn interrupt(_child: &Child) {}

impl Drop for EmbedManager {
    fn drop(&mut self) {
        if self.is_ready() {
            tracing::warn!("EmbedManager dropped while still running; process may leak, call close() explicitly");
        }
    }
}

/// Deterministic fake used when `llm.mode` runs in mock mode — no model
/// files required. Mirrors the real response shape (a 768-dim vector)
/// so callers exercise the same downstream code paths.
pub fn mock_embed(text: &str) -> Vec<f32> {
    let seed: u32 = text.chars().map(|c| c as u32).sum();
    (0..768)
        .map(|i| ((seed.wrapping_add(i as u32)) % 1000) as f32 / 1000.0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_embed_is_deterministic_and_fixed_dimension() {
        let a = mock_embed("hello");
        let b = mock_embed("hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 768);
    }

    #[test]
    fn mock_embed_differs_for_different_text() {
        assert_ne!(mock_embed("hello"), mock_embed("world"));
    }
}
