//! Wire protocol for the hosting-context boundary.
//!
//! The kernel runs embedded in a parent execution context that owns
//! credentials and UI surfaces. Requests carry a per-call correlation id so
//! concurrent exchanges of the same type can never cross-resolve.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Credential and routing metadata returned by the hosting context.
///
/// Fetched fresh for each privileged remote call; never cached.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credential {
    #[serde(default)]
    pub token: Option<String>,
    /// Routing base URL for the remote service.
    #[serde(default)]
    pub api_url: Option<String>,
    /// Caller identity (application id).
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub is_authenticated: bool,
    /// Read-only/sample session; privileged calls are policy-gated.
    #[serde(default)]
    pub readonly: bool,
}

impl Credential {
    /// Public-application caller: identified by app id, not a bearer token.
    #[must_use]
    pub fn is_public_application(&self) -> bool {
        !self.is_authenticated && self.app_id.is_some()
    }

    /// Read-only/sample context.
    #[must_use]
    pub const fn is_sample(&self) -> bool {
        self.readonly
    }

    /// Routing base URL, falling back to the configured default.
    #[must_use]
    pub fn base_url<'a>(&'a self, default: &'a str) -> &'a str {
        self.api_url.as_deref().unwrap_or(default)
    }
}

/// A stream event offered to the hosting context for custom rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderEvent {
    pub event: String,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Request sent to the hosting context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HostRequest {
    AuthRequest { request_id: Uuid },
    RenderRequest { request_id: Uuid, data: RenderEvent },
}

impl HostRequest {
    /// Correlation id of this request.
    #[must_use]
    pub const fn request_id(&self) -> Uuid {
        match self {
            Self::AuthRequest { request_id } | Self::RenderRequest { request_id, .. } => *request_id,
        }
    }
}

/// Response received from the hosting context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HostResponse {
    AuthResponse {
        request_id: Uuid,
        data: Credential,
    },
    RenderResponse {
        request_id: Uuid,
        data: Option<String>,
    },
}

impl HostResponse {
    /// Correlation id this response answers.
    #[must_use]
    pub const fn request_id(&self) -> Uuid {
        match self {
            Self::AuthResponse { request_id, .. } | Self::RenderResponse { request_id, .. } => {
                *request_id
            }
        }
    }
}

/// Fire-and-forget notification to the hosting context. No reply expected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HostNotification {
    RefreshSidebar,
    RefreshChat,
    OpenRequireCloneDialog,
    OpenTrace {
        trace_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model_name: Option<String>,
    },
}

/// Any message the kernel sends to the hosting context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HostOutbound {
    Request(HostRequest),
    Notification(HostNotification),
}

/// Chat registration payload posted to the remote service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRegistration {
    pub model_name: String,
    pub server_url: String,
    #[serde(default)]
    pub params: Value,
}
