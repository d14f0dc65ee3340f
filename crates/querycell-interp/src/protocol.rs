//! Newline-delimited JSON protocol with the interpreter worker.
//!
//! Worker messages are translated onto the kernel output channel; the two
//! protocols have different shapes, so this is a translation layer rather
//! than a pass-through. Each execution is attributed to the correlation
//! header of the request that submitted it.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicBool, Ordering},
    },
};

use querycell_core::output::{DisplayData, OutputChannel, OutputMetadata, StreamName};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::{Mutex, oneshot},
};
use uuid::Uuid;

/// Protocol error.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Message sent to the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    Exec { id: Uuid, code: String },
    Shutdown,
}

/// Message received from the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    Ready,
    Stream {
        id: Option<Uuid>,
        name: String,
        text: String,
    },
    Result {
        id: Option<Uuid>,
        #[serde(default)]
        data: Option<String>,
    },
    Error {
        id: Option<Uuid>,
        ename: String,
        evalue: String,
    },
}

/// Completion outcome of one tracked execution.
pub type ExecOutcome = Result<(), String>;

struct ExecState {
    parent: Option<String>,
    done: Option<oneshot::Sender<ExecOutcome>>,
}

/// Handles bidirectional worker communication.
#[derive(Clone)]
pub struct WorkerPeer {
    stdin: Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>,
    executions: Arc<StdMutex<HashMap<Uuid, ExecState>>>,
    alive: Arc<AtomicBool>,
}

impl WorkerPeer {
    /// Spawn a new peer over the worker's pipes.
    ///
    /// Starts a background task that reads worker messages until EOF and
    /// relays them, translated, onto `sink`. `ready_tx` fires on the
    /// worker's `ready` announcement.
    #[must_use]
    pub fn spawn(
        stdin: impl AsyncWrite + Send + Unpin + 'static,
        stdout: impl AsyncRead + Send + Unpin + 'static,
        sink: Arc<OutputChannel>,
        ready_tx: oneshot::Sender<()>,
    ) -> Self {
        let peer = Self {
            stdin: Arc::new(Mutex::new(Box::new(stdin))),
            executions: Arc::new(StdMutex::new(HashMap::new())),
            alive: Arc::new(AtomicBool::new(true)),
        };

        let reader_peer = peer.clone();
        tokio::spawn(async move {
            reader_peer.read_loop(stdout, &sink, ready_tx).await;
        });

        peer
    }

    /// Whether the worker is still attached.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Submit code for execution, returning the execution id.
    ///
    /// Results arrive asynchronously on the output channel; pass `done` to
    /// additionally be notified of completion.
    ///
    /// # Errors
    /// Returns error if the worker pipe write fails.
    pub async fn exec(
        &self,
        code: String,
        parent: Option<String>,
        done: Option<oneshot::Sender<ExecOutcome>>,
    ) -> Result<Uuid, ProtocolError> {
        let id = Uuid::new_v4();
        self.executions
            .lock()
            .unwrap()
            .insert(id, ExecState { parent, done });

        let sent = self.send_json(&WorkerRequest::Exec { id, code }).await;
        if sent.is_err() {
            self.executions.lock().unwrap().remove(&id);
        }
        sent.map(|()| id)
    }

    /// Ask the worker to shut down.
    ///
    /// # Errors
    /// Returns error if the worker pipe write fails.
    pub async fn shutdown(&self) -> Result<(), ProtocolError> {
        self.send_json(&WorkerRequest::Shutdown).await
    }

    async fn read_loop(
        &self,
        stdout: impl AsyncRead + Unpin,
        sink: &OutputChannel,
        ready_tx: oneshot::Sender<()>,
    ) {
        let mut reader = BufReader::new(stdout);
        let mut buffer = String::new();
        let mut ready_tx = Some(ready_tx);

        loop {
            buffer.clear();
            match reader.read_line(&mut buffer).await {
                Ok(0) => break, // EOF
                Ok(_) => {
                    let line = buffer.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<WorkerMessage>(line) {
                        Ok(message) => self.handle_message(message, sink, &mut ready_tx),
                        Err(e) => tracing::warn!("unparseable worker message: {e}"),
                    }
                }
                Err(e) => {
                    tracing::error!("error reading worker output: {e}");
                    break;
                }
            }
        }

        self.alive.store(false, Ordering::Release);

        // Fail anything still waiting on the dead worker.
        let stranded: Vec<ExecState> = {
            let mut executions = self.executions.lock().unwrap();
            executions.drain().map(|(_, state)| state).collect()
        };
        for state in stranded {
            if let Some(done) = state.done {
                let _ = done.send(Err("worker exited".to_string()));
            }
        }
        tracing::debug!("worker output closed");
    }

    fn handle_message(
        &self,
        message: WorkerMessage,
        sink: &OutputChannel,
        ready_tx: &mut Option<oneshot::Sender<()>>,
    ) {
        match message {
            WorkerMessage::Ready => {
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(());
                }
            }
            WorkerMessage::Stream { id, name, text } => {
                let name = if name == "stderr" {
                    StreamName::Stderr
                } else {
                    StreamName::Stdout
                };
                sink.push_stream(name, text, self.parent_of(id));
            }
            WorkerMessage::Result { id, data } => {
                if let Some(text) = data {
                    sink.push_display(
                        DisplayData::text(text),
                        OutputMetadata::default(),
                        self.parent_of(id),
                    );
                }
                self.finish(id, Ok(()));
            }
            WorkerMessage::Error { id, ename, evalue } => {
                sink.push_error(ename, evalue.clone(), self.parent_of(id));
                self.finish(id, Err(evalue));
            }
        }
    }

    fn parent_of(&self, id: Option<Uuid>) -> Option<String> {
        let id = id?;
        self.executions
            .lock()
            .unwrap()
            .get(&id)
            .and_then(|state| state.parent.clone())
    }

    fn finish(&self, id: Option<Uuid>, outcome: ExecOutcome) {
        let Some(id) = id else { return };
        let state = self.executions.lock().unwrap().remove(&id);
        if let Some(done) = state.and_then(|s| s.done) {
            let _ = done.send(outcome);
        }
    }

    async fn send_json<T: Serialize>(&self, message: &T) -> Result<(), ProtocolError> {
        let json = serde_json::to_string(message)?;
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querycell_core::output::OutputMsg;

    async fn settle() {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    fn peer_over_duplex() -> (
        WorkerPeer,
        tokio::io::DuplexStream, // worker side of stdin
        tokio::io::DuplexStream, // worker side of stdout
        Arc<OutputChannel>,
        oneshot::Receiver<()>,
    ) {
        let (stdin_ours, stdin_worker) = tokio::io::duplex(4096);
        let (stdout_worker, stdout_ours) = tokio::io::duplex(4096);
        let sink = Arc::new(OutputChannel::new());
        let (ready_tx, ready_rx) = oneshot::channel();
        let peer = WorkerPeer::spawn(stdin_ours, stdout_ours, Arc::clone(&sink), ready_tx);
        (peer, stdin_worker, stdout_worker, sink, ready_rx)
    }

    #[tokio::test]
    async fn test_ready_announcement_fires_oneshot() {
        let (_peer, _stdin, mut stdout, _sink, ready_rx) = peer_over_duplex();

        stdout.write_all(b"{\"type\": \"ready\"}\n").await.unwrap();
        ready_rx.await.unwrap();
    }

    #[tokio::test]
    async fn test_messages_are_translated_with_parent_attribution() {
        let (peer, _stdin, mut stdout, sink, _ready_rx) = peer_over_duplex();

        let id = peer
            .exec("print(1)".to_string(), Some("cell-9".to_string()), None)
            .await
            .unwrap();

        let stream = serde_json::json!({
            "type": "stream", "id": id, "name": "stdout", "text": "1\n"
        });
        let result = serde_json::json!({ "type": "result", "id": id });
        stdout
            .write_all(format!("{stream}\n{result}\n").as_bytes())
            .await
            .unwrap();
        settle().await;

        let history = sink.history();
        assert_eq!(history.len(), 1);
        let OutputMsg::Stream { text, parent, .. } = &history[0] else {
            panic!("expected a stream message");
        };
        assert_eq!(text, "1\n");
        assert_eq!(parent.as_deref(), Some("cell-9"));
    }

    #[tokio::test]
    async fn test_error_message_relays_and_completes() {
        let (peer, _stdin, mut stdout, sink, _ready_rx) = peer_over_duplex();

        let (done_tx, done_rx) = oneshot::channel();
        let id = peer
            .exec("boom".to_string(), None, Some(done_tx))
            .await
            .unwrap();

        let error = serde_json::json!({
            "type": "error", "id": id, "ename": "NameError", "evalue": "name 'boom' is not defined"
        });
        stdout
            .write_all(format!("{error}\n").as_bytes())
            .await
            .unwrap();

        let outcome = done_rx.await.unwrap();
        assert_eq!(outcome.unwrap_err(), "name 'boom' is not defined");

        settle().await;
        let history = sink.history();
        assert!(matches!(&history[0], OutputMsg::Error { ename, .. } if ename == "NameError"));
    }

    #[tokio::test]
    async fn test_exec_writes_one_protocol_line() {
        let (peer, stdin, _stdout, _sink, _ready_rx) = peer_over_duplex();

        let id = peer
            .exec("df = 1".to_string(), None, None)
            .await
            .unwrap();

        let mut reader = BufReader::new(stdin);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();

        let request: WorkerRequest = serde_json::from_str(&line).unwrap();
        let WorkerRequest::Exec { id: sent_id, code } = request else {
            panic!("expected an exec request");
        };
        assert_eq!(sent_id, id);
        assert_eq!(code, "df = 1");
    }

    #[tokio::test]
    async fn test_worker_exit_strands_pending_and_marks_dead() {
        let (peer, _stdin, stdout, _sink, _ready_rx) = peer_over_duplex();

        let (done_tx, done_rx) = oneshot::channel();
        peer.exec("while True: pass".to_string(), None, Some(done_tx))
            .await
            .unwrap();

        drop(stdout); // worker dies
        let outcome = done_rx.await.unwrap();
        assert_eq!(outcome.unwrap_err(), "worker exited");
        assert!(!peer.is_alive());
    }
}
