//! Lazy delegation to the embedded interpreter.
//!
//! The worker is spawned on first use and lives for the kernel's lifetime.
//! A single async lock guards initialization, so concurrent first callers
//! await one spawn instead of racing. A worker that exits is detected and
//! respawned on the next use.

use std::{path::PathBuf, process::Stdio, sync::Arc, time::Duration};

use async_trait::async_trait;
use querycell_core::output::OutputChannel;
use serde_json::Value;
use tokio::{
    process::{Child, Command},
    sync::{Mutex, oneshot},
};

use crate::protocol::{ProtocolError, WorkerPeer};
use crate::worker;

/// Deadline for worker startup and bootstrap.
const READY_TIMEOUT: Duration = Duration::from_secs(15);

/// Sub-interpreter error.
#[derive(Debug, thiserror::Error)]
pub enum InterpError {
    #[error("Sub-interpreter unavailable: {0}")]
    Unavailable(String),
    #[error("Sub-interpreter protocol failure: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Trait for secondary execution engines.
///
/// `run` is fire-and-forget relative to the caller; results arrive
/// asynchronously on the kernel output channel.
#[async_trait]
pub trait Interpreter: Send + Sync {
    /// Run code, spawning the engine on first use.
    async fn run(&self, code: &str, parent: Option<String>) -> Result<(), InterpError>;

    /// Bind a tabular remote result to `target` in the engine.
    async fn export_frame(
        &self,
        target: &str,
        rows: &[Value],
        parent: Option<String>,
    ) -> Result<(), InterpError>;
}

struct WorkerHandle {
    peer: WorkerPeer,
    child: Child,
}

/// Process-backed sub-interpreter.
pub struct SubInterpreter {
    sink: Arc<OutputChannel>,
    interpreter: Option<PathBuf>,
    handle: Mutex<Option<WorkerHandle>>,
}

impl SubInterpreter {
    /// Create a delegator; no worker is spawned until first use.
    #[must_use]
    pub fn new(sink: Arc<OutputChannel>) -> Self {
        Self {
            sink,
            interpreter: None,
            handle: Mutex::new(None),
        }
    }

    /// Override interpreter discovery with an explicit executable.
    #[must_use]
    pub fn with_interpreter(mut self, path: PathBuf) -> Self {
        self.interpreter = Some(path);
        self
    }

    /// Shut the worker down, if one was ever started.
    pub async fn shutdown(&self) {
        let mut guard = self.handle.lock().await;
        if let Some(mut handle) = guard.take() {
            if handle.peer.shutdown().await.is_err() {
                tracing::debug!("worker already gone");
            }
            let _ = handle.child.wait().await;
        }
    }

    /// Get the live peer, spawning or respawning the worker as needed.
    async fn ensure_ready(
        &self,
        guard: &mut Option<WorkerHandle>,
    ) -> Result<WorkerPeer, InterpError> {
        if guard.as_ref().is_some_and(|handle| !handle.peer.is_alive()) {
            tracing::warn!("interpreter worker exited, respawning");
            *guard = None;
        }

        if let Some(handle) = guard.as_ref() {
            return Ok(handle.peer.clone());
        }

        let handle = self.spawn_worker().await?;
        let peer = handle.peer.clone();
        *guard = Some(handle);
        Ok(peer)
    }

    async fn spawn_worker(&self) -> Result<WorkerHandle, InterpError> {
        let program = match &self.interpreter {
            Some(path) => path.clone(),
            None => worker::resolve_interpreter().ok_or_else(|| {
                InterpError::Unavailable("no python interpreter on PATH".to_string())
            })?,
        };
        tracing::debug!(program = %program.display(), "spawning interpreter worker");

        let mut child = Command::new(&program)
            .arg("-u")
            .arg("-c")
            .arg(worker::WORKER_PROGRAM)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| InterpError::Unavailable(format!("spawn failed: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| InterpError::Unavailable("worker stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| InterpError::Unavailable("worker stdout unavailable".to_string()))?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let peer = WorkerPeer::spawn(stdin, stdout, Arc::clone(&self.sink), ready_tx);

        tokio::time::timeout(READY_TIMEOUT, ready_rx)
            .await
            .map_err(|_| InterpError::Unavailable("worker did not become ready".to_string()))?
            .map_err(|_| InterpError::Unavailable("worker exited during startup".to_string()))?;

        // Bootstrap before accepting user code.
        let (done_tx, done_rx) = oneshot::channel();
        peer.exec(worker::BOOTSTRAP.to_string(), None, Some(done_tx))
            .await?;
        match tokio::time::timeout(READY_TIMEOUT, done_rx).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(evalue))) => {
                return Err(InterpError::Unavailable(format!("bootstrap failed: {evalue}")));
            }
            Ok(Err(_)) | Err(_) => {
                return Err(InterpError::Unavailable(
                    "bootstrap did not complete".to_string(),
                ));
            }
        }

        Ok(WorkerHandle { peer, child })
    }
}

#[async_trait]
impl Interpreter for SubInterpreter {
    async fn run(&self, code: &str, parent: Option<String>) -> Result<(), InterpError> {
        let peer = {
            let mut guard = self.handle.lock().await;
            self.ensure_ready(&mut guard).await?
        };
        peer.exec(code.to_string(), parent, None).await?;
        Ok(())
    }

    async fn export_frame(
        &self,
        target: &str,
        rows: &[Value],
        parent: Option<String>,
    ) -> Result<(), InterpError> {
        let code = export_snippet(target, rows)?;
        self.run(&code, parent).await
    }
}

/// Build the assignment snippet binding `rows` to `target`.
fn export_snippet(target: &str, rows: &[Value]) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(rows)?;
    Ok(format!("{target} = json.loads(\"{}\")", escape_literal(&json)))
}

/// Escape a string into the body of a double-quoted literal.
fn escape_literal(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}
