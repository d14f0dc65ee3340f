//! Timeboxed request/response exchange with the hosting context.
//!
//! Every outbound request carries a fresh correlation id; a pending-call map
//! keyed by that id routes the matching inbound response to its caller.
//! Concurrent handshakes of the same request type therefore never
//! cross-resolve.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use querycell_core::host::{
    Credential, HostNotification, HostOutbound, HostRequest, HostResponse, RenderEvent,
};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Default handshake deadline.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Handshake error.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("Session request timed out")]
    Timeout,
    #[error("Host channel closed")]
    ChannelClosed,
    #[error("Host answered with a mismatched response type")]
    UnexpectedResponse,
}

type PendingMap = Arc<Mutex<HashMap<Uuid, oneshot::Sender<HostResponse>>>>;

/// Link to the hosting context.
///
/// Cheap to clone; all clones share the pending-call map and the outbound
/// channel.
#[derive(Clone)]
pub struct HostLink {
    outbound: mpsc::UnboundedSender<HostOutbound>,
    pending: PendingMap,
    timeout: Duration,
}

impl HostLink {
    /// Create a new link and spawn the inbound router task.
    ///
    /// The router resolves pending calls by correlation id and runs until
    /// the inbound channel closes.
    #[must_use]
    pub fn new(
        outbound: mpsc::UnboundedSender<HostOutbound>,
        mut inbound: mpsc::UnboundedReceiver<HostResponse>,
    ) -> Self {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let router_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            while let Some(response) = inbound.recv().await {
                let request_id = response.request_id();
                let waiter = router_pending.lock().unwrap().remove(&request_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => {
                        tracing::warn!(%request_id, "response without a pending request");
                    }
                }
            }
            tracing::debug!("host inbound channel closed");
        });

        Self {
            outbound,
            pending,
            timeout: HANDSHAKE_TIMEOUT,
        }
    }

    /// Override the handshake deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send a fire-and-forget notification. No reply is expected; a closed
    /// channel is logged, not surfaced.
    pub fn notify(&self, notification: HostNotification) {
        if self
            .outbound
            .send(HostOutbound::Notification(notification))
            .is_err()
        {
            tracing::debug!("host channel closed, notification dropped");
        }
    }

    /// Request credentials from the hosting context.
    ///
    /// # Errors
    /// Fails with `Timeout` if no matching response arrives within the
    /// deadline.
    pub async fn request_credentials(&self) -> Result<Credential, HandshakeError> {
        let request = HostRequest::AuthRequest {
            request_id: Uuid::new_v4(),
        };
        match self.request(request).await? {
            HostResponse::AuthResponse { data, .. } => Ok(data),
            HostResponse::RenderResponse { .. } => Err(HandshakeError::UnexpectedResponse),
        }
    }

    /// Offer a stream event to the hosting context for custom rendering.
    ///
    /// # Errors
    /// Fails with `Timeout` if no matching response arrives within the
    /// deadline.
    pub async fn request_render(
        &self,
        event: RenderEvent,
    ) -> Result<Option<String>, HandshakeError> {
        let request = HostRequest::RenderRequest {
            request_id: Uuid::new_v4(),
            data: event,
        };
        match self.request(request).await? {
            HostResponse::RenderResponse { data, .. } => Ok(data),
            HostResponse::AuthResponse { .. } => Err(HandshakeError::UnexpectedResponse),
        }
    }

    async fn request(&self, request: HostRequest) -> Result<HostResponse, HandshakeError> {
        let request_id = request.request_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(request_id, tx);

        if self.outbound.send(HostOutbound::Request(request)).is_err() {
            self.pending.lock().unwrap().remove(&request_id);
            return Err(HandshakeError::ChannelClosed);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(HandshakeError::ChannelClosed),
            Err(_) => {
                self.pending.lock().unwrap().remove(&request_id);
                Err(HandshakeError::Timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link() -> (
        HostLink,
        mpsc::UnboundedReceiver<HostOutbound>,
        mpsc::UnboundedSender<HostResponse>,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (HostLink::new(out_tx, in_rx), out_rx, in_tx)
    }

    #[tokio::test]
    async fn test_credentials_resolve_with_response_payload() {
        let (link, mut out_rx, in_tx) = link();

        let handle = tokio::spawn(async move {
            let Some(HostOutbound::Request(request)) = out_rx.recv().await else {
                panic!("expected an outbound request");
            };
            in_tx
                .send(HostResponse::AuthResponse {
                    request_id: request.request_id(),
                    data: Credential {
                        token: Some("tok".to_string()),
                        is_authenticated: true,
                        ..Credential::default()
                    },
                })
                .unwrap();
        });

        let credential = link.request_credentials().await.unwrap();
        assert_eq!(credential.token.as_deref(), Some("tok"));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_no_response_times_out() {
        let (link, _out_rx, _in_tx) = link();
        let link = link.with_timeout(Duration::from_millis(50));

        let err = link.request_credentials().await.unwrap_err();
        assert!(matches!(err, HandshakeError::Timeout));
    }

    #[tokio::test]
    async fn test_response_just_before_deadline_resolves() {
        let (link, mut out_rx, in_tx) = link();
        let link = link.with_timeout(Duration::from_millis(500));

        tokio::spawn(async move {
            let Some(HostOutbound::Request(request)) = out_rx.recv().await else {
                panic!("expected an outbound request");
            };
            tokio::time::sleep(Duration::from_millis(100)).await;
            in_tx
                .send(HostResponse::AuthResponse {
                    request_id: request.request_id(),
                    data: Credential::default(),
                })
                .unwrap();
        });

        assert!(link.request_credentials().await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_handshakes_do_not_cross_resolve() {
        let (link, mut out_rx, in_tx) = link();

        let host = tokio::spawn(async move {
            let mut ids = Vec::new();
            for _ in 0..2 {
                let Some(HostOutbound::Request(request)) = out_rx.recv().await else {
                    panic!("expected an outbound request");
                };
                ids.push(request.request_id());
            }
            // Answer in reverse arrival order with distinguishable tokens.
            for (id, token) in [(ids[1], "second"), (ids[0], "first")] {
                in_tx
                    .send(HostResponse::AuthResponse {
                        request_id: id,
                        data: Credential {
                            token: Some(token.to_string()),
                            ..Credential::default()
                        },
                    })
                    .unwrap();
            }
        });

        let (a, b) = tokio::join!(link.request_credentials(), link.request_credentials());
        host.await.unwrap();

        assert_eq!(a.unwrap().token.as_deref(), Some("first"));
        assert_eq!(b.unwrap().token.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_render_delegation_roundtrip() {
        let (link, mut out_rx, in_tx) = link();

        tokio::spawn(async move {
            let Some(HostOutbound::Request(request)) = out_rx.recv().await else {
                panic!("expected an outbound request");
            };
            in_tx
                .send(HostResponse::RenderResponse {
                    request_id: request.request_id(),
                    data: Some("<b>custom</b>".to_string()),
                })
                .unwrap();
        });

        let event = RenderEvent {
            event: "progress".to_string(),
            data: "{}".to_string(),
            id: None,
        };
        let html = link.request_render(event).await.unwrap();
        assert_eq!(html.as_deref(), Some("<b>custom</b>"));
    }

    #[tokio::test]
    async fn test_notification_is_fire_and_forget() {
        let (link, mut out_rx, _in_tx) = link();

        link.notify(HostNotification::RefreshSidebar);

        let Some(HostOutbound::Notification(notification)) = out_rx.recv().await else {
            panic!("expected an outbound notification");
        };
        assert_eq!(notification, HostNotification::RefreshSidebar);
    }
}
