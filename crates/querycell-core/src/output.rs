//! Broadcast + history output channel for notebook cells.

use std::{
    collections::VecDeque,
    sync::RwLock,
};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Default history size limit (16 MB).
const HISTORY_BYTES: usize = 16 * 1024 * 1024;

/// Named output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamName {
    Stdout,
    Stderr,
}

/// MIME-keyed display payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayData {
    /// Rich HTML representation.
    #[serde(rename = "text/html", skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    /// Plain-text representation.
    #[serde(rename = "text/plain", skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl DisplayData {
    /// Create an HTML-only payload.
    #[must_use]
    pub fn html<S: Into<String>>(html: S) -> Self {
        Self {
            html: Some(html.into()),
            text: None,
        }
    }

    /// Create a plain-text payload.
    #[must_use]
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self {
            html: None,
            text: Some(text.into()),
        }
    }
}

/// Metadata attached to a rendered result.
///
/// The trace identifier is what external tooling uses to look up
/// execution provenance for a cell output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
}

impl OutputMetadata {
    /// True when no metadata is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trace_id.is_none() && self.model_name.is_none()
    }
}

/// Typed message on the output channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputMsg {
    /// Incremental text chunk on a named stream.
    Stream {
        name: StreamName,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
    },
    /// Rendered cell result.
    ExecuteResult {
        execution_count: u32,
        data: DisplayData,
        #[serde(default)]
        metadata: OutputMetadata,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
    },
    /// Intermediate display update, e.g. host-rendered stream events.
    Display {
        data: DisplayData,
        #[serde(default)]
        metadata: OutputMetadata,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
    },
    /// Inline error display.
    Error {
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
    },
    /// End of one request's output.
    Finished,
}

impl OutputMsg {
    /// Approximate in-memory size, used for history eviction.
    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        match self {
            Self::Stream { text, .. } => text.len() + 32,
            Self::ExecuteResult { data, .. } | Self::Display { data, .. } => {
                data.html.as_ref().map_or(0, String::len)
                    + data.text.as_ref().map_or(0, String::len)
                    + 64
            }
            Self::Error {
                ename,
                evalue,
                traceback,
                ..
            } => ename.len() + evalue.len() + traceback.iter().map(String::len).sum::<usize>() + 32,
            Self::Finished => 16,
        }
    }
}

struct Inner {
    history: VecDeque<StoredMsg>,
    total_bytes: usize,
}

#[derive(Clone)]
struct StoredMsg {
    msg: OutputMsg,
    bytes: usize,
}

/// Output channel with broadcast and history support.
///
/// New subscribers can receive history then switch to live updates, so a
/// frontend that attaches mid-execution still sees earlier chunks.
pub struct OutputChannel {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<OutputMsg>,
}

impl Default for OutputChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputChannel {
    /// Create a new output channel.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(4096);
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(32),
                total_bytes: 0,
            }),
            sender,
        }
    }

    /// Push a message to live subscribers and history.
    pub fn push(&self, msg: OutputMsg) {
        let _ = self.sender.send(msg.clone()); // live listeners
        let bytes = msg.approx_bytes();

        let mut inner = self.inner.write().unwrap();
        while inner.total_bytes.saturating_add(bytes) > HISTORY_BYTES {
            if let Some(front) = inner.history.pop_front() {
                inner.total_bytes = inner.total_bytes.saturating_sub(front.bytes);
            } else {
                break;
            }
        }
        inner.history.push_back(StoredMsg { msg, bytes });
        inner.total_bytes = inner.total_bytes.saturating_add(bytes);
    }

    /// Push a stdout chunk.
    pub fn push_stream<S: Into<String>>(&self, name: StreamName, text: S, parent: Option<String>) {
        self.push(OutputMsg::Stream {
            name,
            text: text.into(),
            parent,
        });
    }

    /// Push a rendered result.
    pub fn push_result(
        &self,
        execution_count: u32,
        data: DisplayData,
        metadata: OutputMetadata,
        parent: Option<String>,
    ) {
        self.push(OutputMsg::ExecuteResult {
            execution_count,
            data,
            metadata,
            parent,
        });
    }

    /// Push an intermediate display update.
    pub fn push_display(&self, data: DisplayData, metadata: OutputMetadata, parent: Option<String>) {
        self.push(OutputMsg::Display {
            data,
            metadata,
            parent,
        });
    }

    /// Push an inline error display.
    pub fn push_error<N, V>(&self, ename: N, evalue: V, parent: Option<String>)
    where
        N: Into<String>,
        V: Into<String>,
    {
        self.push(OutputMsg::Error {
            ename: ename.into(),
            evalue: evalue.into(),
            traceback: Vec::new(),
            parent,
        });
    }

    /// Push the end-of-output marker.
    pub fn push_finished(&self) {
        self.push(OutputMsg::Finished);
    }

    /// Get a receiver for live updates.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OutputMsg> {
        self.sender.subscribe()
    }

    /// Get a snapshot of the history.
    #[must_use]
    pub fn history(&self) -> Vec<OutputMsg> {
        self.inner
            .read()
            .unwrap()
            .history
            .iter()
            .map(|s| s.msg.clone())
            .collect()
    }

    /// Stream that yields history first, then live updates.
    #[must_use]
    pub fn history_plus_stream(
        &self,
    ) -> futures::stream::BoxStream<'static, Result<OutputMsg, std::io::Error>> {
        let (history, rx) = (self.history(), self.subscribe());

        let hist = futures::stream::iter(history.into_iter().map(Ok::<_, std::io::Error>));
        let live = BroadcastStream::new(rx)
            .filter_map(|res: Result<OutputMsg, _>| async move { res.ok().map(Ok::<_, std::io::Error>) });

        Box::pin(hist.chain(live))
    }
}
