//! Execute request and reply types.

use serde::{Deserialize, Serialize};

/// An inbound execute message.
///
/// One per notebook cell execution; immutable once received.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Raw cell text.
    pub code: String,
    /// Correlation header of the originating cell, echoed on every output
    /// produced for this request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Execution counter supplied by the host.
    pub execution_count: u32,
}

impl ExecuteRequest {
    /// Create a request without a correlation header.
    #[must_use]
    pub fn new<S: Into<String>>(code: S, execution_count: u32) -> Self {
        Self {
            code: code.into(),
            parent: None,
            execution_count,
        }
    }

    /// Attach a correlation header.
    #[must_use]
    pub fn with_parent<S: Into<String>>(mut self, parent: S) -> Self {
        self.parent = Some(parent.into());
        self
    }
}

/// Terminal status of one execute request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    /// Normal completion, with or without a visible artifact.
    Ok,
    /// A failure surfaced with a name/message pair.
    Error,
    /// Policy gate (e.g. read-only session); not a failure.
    Abort,
}

/// The terminal reply produced exactly once per execute request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub status: ReplyStatus,
    pub execution_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evalue: Option<String>,
    /// Always empty: no stack unwinding is exposed to the caller.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traceback: Vec<String>,
}

impl Reply {
    /// Successful completion.
    #[must_use]
    pub fn ok(request: &ExecuteRequest) -> Self {
        Self {
            status: ReplyStatus::Ok,
            execution_count: request.execution_count,
            parent: request.parent.clone(),
            ename: None,
            evalue: None,
            traceback: Vec::new(),
        }
    }

    /// Policy abort.
    #[must_use]
    pub fn abort(request: &ExecuteRequest) -> Self {
        Self {
            status: ReplyStatus::Abort,
            execution_count: request.execution_count,
            parent: request.parent.clone(),
            ename: None,
            evalue: None,
            traceback: Vec::new(),
        }
    }

    /// Failure with a name/message pair and an empty traceback.
    #[must_use]
    pub fn error<N, V>(request: &ExecuteRequest, ename: N, evalue: V) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        Self {
            status: ReplyStatus::Error,
            execution_count: request.execution_count,
            parent: request.parent.clone(),
            ename: Some(ename.into()),
            evalue: Some(evalue.into()),
            traceback: Vec::new(),
        }
    }
}

/// Static kernel descriptor surfaced to the hosting context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelInfo {
    pub implementation: String,
    pub implementation_version: String,
    pub language: String,
    pub mimetype: String,
    pub file_extension: String,
    pub banner: String,
}

impl Default for KernelInfo {
    fn default() -> Self {
        Self {
            implementation: "querycell".to_string(),
            implementation_version: env!("CARGO_PKG_VERSION").to_string(),
            language: "sql".to_string(),
            mimetype: "text/sql".to_string(),
            file_extension: ".sql".to_string(),
            banner: "querycell: a notebook bridge for remote query engines".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_serialization_omits_empty_fields() {
        let request = ExecuteRequest::new("select 1", 3);
        let reply = Reply::ok(&request);
        let json = serde_json::to_value(&reply).unwrap();

        assert_eq!(json["status"], "ok");
        assert_eq!(json["execution_count"], 3);
        assert!(json.get("ename").is_none());
        assert!(json.get("traceback").is_none());
    }

    #[test]
    fn test_error_reply_carries_name_and_message() {
        let request = ExecuteRequest::new("select 1", 1).with_parent("cell-7");
        let reply = Reply::error(&request, "Timeout", "Session request timed out");

        assert_eq!(reply.status, ReplyStatus::Error);
        assert_eq!(reply.parent.as_deref(), Some("cell-7"));
        assert_eq!(reply.ename.as_deref(), Some("Timeout"));
        assert!(reply.traceback.is_empty());
    }
}
