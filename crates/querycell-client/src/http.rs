//! Remote call executor.
//!
//! Issues classified payloads to the remote query endpoint, chooses
//! streaming vs synchronous handling from the response headers, and
//! normalizes both into a single outcome shape. Structured-parse failures
//! degrade to a plain-text result; a failing HTTP status does not.

use futures::StreamExt;
use querycell_core::host::{ChatRegistration, Credential, HostNotification, RenderEvent};
use querycell_core::output::{DisplayData, OutputChannel, OutputMetadata, StreamName};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::handshake::HostLink;
use crate::sse::consume;

/// Remote call error.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("No credentials available for this session")]
    AuthRequired,
    #[error("Remote endpoint unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Remote error ({status}): {message}")]
    Status { status: u16, message: String },
    #[error("{0}")]
    Exception(String),
    #[error("Agent not specified")]
    AgentNotSpecified,
}

/// Column descriptor declared by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub column_type: Option<String>,
}

/// Trace correlation metadata read from response headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceInfo {
    pub trace_id: String,
    pub model_name: Option<String>,
}

/// Normalized body of one remote call, before rendering.
#[derive(Debug, Clone)]
pub enum RemoteResult {
    /// Rows plus declared column metadata.
    Tabular {
        rows: Vec<Value>,
        columns: Vec<ColumnMeta>,
    },
    /// Body that could not be parsed as a structured result.
    Opaque(String),
    /// Chat/agent directive; registration already performed.
    Chat { model_name: String },
    /// Event stream fully relayed to the output channel.
    Streamed,
}

/// Outcome of one remote call.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub result: RemoteResult,
    pub trace: Option<TraceInfo>,
}

/// Remote endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Routing base used when the credential names none.
    pub default_base_url: String,
    /// Chat stream server used when a directive names none.
    pub default_chat_server_url: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            default_base_url: "https://api.querycell.dev".to_string(),
            default_chat_server_url: "http://localhost:8080/stream".to_string(),
        }
    }
}

/// HTTP client for the remote query service.
pub struct RemoteClient {
    http: reqwest::Client,
    config: RemoteConfig,
}

impl RemoteClient {
    /// Create a new client.
    #[must_use]
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Execute one payload against the remote query endpoint.
    ///
    /// Stream chunks are pushed to `sink` as they arrive; named stream
    /// events are first offered to the host renderer. The caller is
    /// expected to have applied the read-only policy gate already.
    ///
    /// # Errors
    /// `AuthRequired` when the credential can identify nobody,
    /// `Transport` on connection failure, `Status` on a non-2xx response,
    /// `Exception` on an embedded exception field, `AgentNotSpecified`
    /// when a chat directive names no agent.
    pub async fn execute(
        &self,
        payload: &str,
        credential: &Credential,
        sink: &OutputChannel,
        host: &HostLink,
        parent: Option<&str>,
    ) -> Result<QueryOutcome, ClientError> {
        if credential.token.is_none() && credential.app_id.is_none() {
            return Err(ClientError::AuthRequired);
        }

        let base = credential.base_url(&self.config.default_base_url);
        let url = format!("{base}/query");
        tracing::debug!(%url, "executing remote query");

        let request = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "query": payload, "trace": true }));
        let response = Self::apply_auth(request, credential).send().await?;

        let status = response.status();
        let trace = trace_info(response.headers());
        let header_model = header_str(response.headers(), "x-model-name");
        let content_type = header_str(response.headers(), "content-type").unwrap_or_default();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("remote call failed").to_string()
            } else {
                body
            };
            return Err(ClientError::Status {
                status: status.as_u16(),
                message,
            });
        }

        if content_type.starts_with("text/event-stream") {
            self.relay_stream(response, sink, host, parent).await?;
            return Ok(QueryOutcome {
                result: RemoteResult::Streamed,
                trace,
            });
        }

        let text = response.text().await?;
        let result = self
            .interpret_body(&text, header_model.as_deref(), credential, host)
            .await?;
        Ok(QueryOutcome { result, trace })
    }

    /// Normalize a non-streaming response body.
    async fn interpret_body(
        &self,
        text: &str,
        header_model: Option<&str>,
        credential: &Credential,
        host: &HostLink,
    ) -> Result<RemoteResult, ClientError> {
        let Ok(body) = serde_json::from_str::<Value>(text) else {
            tracing::warn!("structured parse failed, surfacing raw response");
            return Ok(RemoteResult::Opaque(text.to_string()));
        };
        let Some(object) = body.as_object() else {
            return Ok(RemoteResult::Opaque(text.to_string()));
        };

        if let Some(exception) = object.get("exception") {
            let message = exception
                .as_str()
                .map_or_else(|| exception.to_string(), str::to_string);
            return Err(ClientError::Exception(message));
        }

        let declares_agent = object.contains_key("model_name")
            || object.contains_key("endpoint_name")
            || header_model.is_some();
        if declares_agent {
            let model_name = object
                .get("model_name")
                .and_then(Value::as_str)
                .or_else(|| object.get("endpoint_name").and_then(Value::as_str))
                .or(header_model)
                .filter(|name| !name.is_empty())
                .ok_or(ClientError::AgentNotSpecified)?
                .to_string();
            self.register_chat(object, &model_name, credential, host).await;
            return Ok(RemoteResult::Chat { model_name });
        }

        let rows = object
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let columns = object
            .get("meta")
            .cloned()
            .and_then(|meta| serde_json::from_value::<Vec<ColumnMeta>>(meta).ok())
            .unwrap_or_else(|| derive_columns(&rows));

        Ok(RemoteResult::Tabular { rows, columns })
    }

    /// Register a declared chat agent with the remote service.
    ///
    /// Fire-and-forget: failures are logged, never propagated; a
    /// `RefreshChat` notification follows a successful registration.
    async fn register_chat(
        &self,
        body: &Map<String, Value>,
        model_name: &str,
        credential: &Credential,
        host: &HostLink,
    ) {
        let Some(app_id) = credential.app_id.as_deref() else {
            tracing::warn!("chat directive without an application id, registration skipped");
            return;
        };

        let server_url = body
            .get("server_url")
            .and_then(Value::as_str)
            .unwrap_or(&self.config.default_chat_server_url)
            .to_string();

        // Directive params are merged over the baseline registration fields.
        let mut params = Map::new();
        params.insert("server_url".to_string(), Value::String(server_url.clone()));
        params.insert("model_name".to_string(), Value::String(model_name.to_string()));
        if let Some(extra) = body.get("params").and_then(Value::as_object) {
            for (key, value) in extra {
                params.insert(key.clone(), value.clone());
            }
        }

        let registration = ChatRegistration {
            model_name: model_name.to_string(),
            server_url,
            params: Value::Object(params),
        };

        let base = credential.base_url(&self.config.default_base_url);
        let url = format!("{base}/apps/{app_id}/chat");
        let request = Self::apply_auth(self.http.post(&url).json(&registration), credential);

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(%model_name, "chat agent registered");
                host.notify(HostNotification::RefreshChat);
            }
            Ok(response) => {
                tracing::warn!(status = %response.status(), "chat registration rejected");
            }
            Err(e) => tracing::warn!("chat registration failed: {e}"),
        }
    }

    /// Relay an event-stream body onto the output channel, record by record.
    async fn relay_stream(
        &self,
        response: reqwest::Response,
        sink: &OutputChannel,
        host: &HostLink,
        parent: Option<&str>,
    ) -> Result<(), ClientError> {
        let byte_stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ClientError::from));

        consume(byte_stream, async |record| {
            if let Some(event) = record.event.as_deref().filter(|e| *e != "message") {
                let offered = RenderEvent {
                    event: event.to_string(),
                    data: record.data.clone(),
                    id: record.id.clone(),
                };
                match host.request_render(offered).await {
                    Ok(Some(html)) => {
                        sink.push_display(
                            DisplayData::html(html),
                            OutputMetadata::default(),
                            parent.map(str::to_string),
                        );
                        return Ok(());
                    }
                    Ok(None) => {}
                    Err(e) => tracing::debug!("render delegation unavailable: {e}"),
                }
            }
            sink.push_stream(StreamName::Stdout, record.data, parent.map(str::to_string));
            Ok(())
        })
        .await
    }

    fn apply_auth(
        request: reqwest::RequestBuilder,
        credential: &Credential,
    ) -> reqwest::RequestBuilder {
        if credential.is_public_application() {
            if let Some(app_id) = credential.app_id.as_deref() {
                return request.header("x-public-application-id", app_id);
            }
        }
        match credential.token.as_deref() {
            Some(token) => request.header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {token}"),
            ),
            None => request,
        }
    }
}

/// Declared columns, or columns derived from the first row's keys when the
/// response carries none.
fn derive_columns(rows: &[Value]) -> Vec<ColumnMeta> {
    rows.first()
        .and_then(Value::as_object)
        .map(|row| {
            row.keys()
                .map(|name| ColumnMeta {
                    name: name.clone(),
                    column_type: None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn trace_info(headers: &reqwest::header::HeaderMap) -> Option<TraceInfo> {
    let trace_id = headers.get("x-trace-id")?.to_str().ok()?.to_string();
    Some(TraceInfo {
        trace_id,
        model_name: header_str(headers, "x-model-name"),
    })
}

fn header_str(headers: &reqwest::header::HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
