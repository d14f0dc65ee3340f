//! Kernel orchestration and reply normalization.
//!
//! One execute request moves through: classification, the credential
//! handshake, the remote call (or interpreter delegation), rendering, and
//! exactly one terminal reply. Failures anywhere on that path are caught,
//! mirrored onto the output channel, and converted into an error reply.

use std::{sync::Arc, time::Duration};

use querycell_client::{HostLink, QueryOutcome, RemoteClient, RemoteResult};
use querycell_core::{
    classify::{self, Directive},
    host::HostNotification,
    output::{DisplayData, OutputChannel, OutputMetadata},
    request::{ExecuteRequest, KernelInfo, Reply},
};
use querycell_interp::Interpreter;

use crate::config::KernelConfig;
use crate::error::KernelError;
use crate::render;

/// The execution kernel.
pub struct Kernel<I: Interpreter> {
    client: RemoteClient,
    host: HostLink,
    interp: I,
    sink: Arc<OutputChannel>,
}

impl<I: Interpreter> Kernel<I> {
    /// Create a kernel over a host link, an interpreter and an output
    /// channel.
    #[must_use]
    pub fn new(host: HostLink, interp: I, sink: Arc<OutputChannel>, config: KernelConfig) -> Self {
        let host = match config.handshake_timeout_ms {
            Some(ms) => host.with_timeout(Duration::from_millis(ms)),
            None => host,
        };
        Self {
            client: RemoteClient::new(config.remote),
            host,
            interp,
            sink,
        }
    }

    /// Kernel descriptor for the hosting context.
    #[must_use]
    pub fn info() -> KernelInfo {
        KernelInfo::default()
    }

    /// The output channel this kernel writes to.
    #[must_use]
    pub fn sink(&self) -> &Arc<OutputChannel> {
        &self.sink
    }

    /// Execute one request.
    ///
    /// Produces exactly one terminal reply; failures are additionally
    /// mirrored onto the output channel so they are visible inline.
    pub async fn execute(&self, request: &ExecuteRequest) -> Reply {
        tracing::debug!(execution_count = request.execution_count, "executing request");

        let reply = match self.try_execute(request).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::error!("execution failed: {err}");
                self.sink
                    .push_error(err.kind(), err.to_string(), request.parent.clone());
                Reply::error(request, err.kind(), err.to_string())
            }
        };
        self.sink.push_finished();
        reply
    }

    async fn try_execute(&self, request: &ExecuteRequest) -> Result<Reply, KernelError> {
        match classify::classify(&request.code)? {
            Directive::SubInterpreter { payload } => {
                self.interp.run(&payload, request.parent.clone()).await?;
                Ok(Reply::ok(request))
            }
            Directive::PassThrough { payload } => self.execute_remote(request, &payload, None).await,
            Directive::Export { payload, target } => {
                self.execute_remote(request, &payload, Some(&target)).await
            }
        }
    }

    async fn execute_remote(
        &self,
        request: &ExecuteRequest,
        payload: &str,
        export: Option<&str>,
    ) -> Result<Reply, KernelError> {
        let credential = self.host.request_credentials().await?;

        // Policy gate: a read-only/sample session never reaches the remote
        // endpoint and triggers no other side effects.
        if credential.is_sample() {
            tracing::debug!("read-only session, aborting");
            self.host.notify(HostNotification::OpenRequireCloneDialog);
            return Ok(Reply::abort(request));
        }

        let outcome = self
            .client
            .execute(
                payload,
                &credential,
                &self.sink,
                &self.host,
                request.parent.as_deref(),
            )
            .await?;

        self.publish(request, export, outcome).await?;

        if is_schema_mutation(payload) {
            self.host.notify(HostNotification::RefreshSidebar);
        }
        Ok(Reply::ok(request))
    }

    /// Render the outcome and perform any export delegation.
    async fn publish(
        &self,
        request: &ExecuteRequest,
        export: Option<&str>,
        outcome: QueryOutcome,
    ) -> Result<(), KernelError> {
        let metadata = outcome
            .trace
            .as_ref()
            .map_or_else(OutputMetadata::default, |trace| OutputMetadata {
                trace_id: Some(trace.trace_id.clone()),
                model_name: trace.model_name.clone(),
            });

        match outcome.result {
            RemoteResult::Tabular { rows, columns } => {
                if let Some(target) = export {
                    self.interp
                        .export_frame(target, &rows, request.parent.clone())
                        .await?;
                }
                let data = render::render_table(&rows, &columns, outcome.trace.as_ref());
                self.sink.push_result(
                    request.execution_count,
                    data,
                    metadata,
                    request.parent.clone(),
                );
            }
            RemoteResult::Opaque(text) => {
                if export.is_some() {
                    tracing::warn!("export target ignored for a non-tabular result");
                }
                self.sink.push_result(
                    request.execution_count,
                    DisplayData::text(text),
                    metadata,
                    request.parent.clone(),
                );
            }
            RemoteResult::Chat { model_name } => {
                tracing::debug!(%model_name, "chat directive completed");
            }
            RemoteResult::Streamed => {}
        }
        Ok(())
    }
}

/// Schema-mutating verbs that warrant a sidebar refresh.
fn is_schema_mutation(payload: &str) -> bool {
    let first = payload.split_whitespace().next().unwrap_or_default();
    first.eq_ignore_ascii_case("create") || first.eq_ignore_ascii_case("drop")
}

#[cfg(test)]
mod tests {
    use super::*;
    use querycell_core::output::OutputMsg;
    use querycell_core::request::ReplyStatus;
    use querycell_interp::InterpError;
    use serde_json::Value;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[derive(Clone, Default)]
    struct RecordingInterpreter {
        runs: Arc<Mutex<Vec<(String, Option<String>)>>>,
    }

    #[async_trait::async_trait]
    impl Interpreter for RecordingInterpreter {
        async fn run(&self, code: &str, parent: Option<String>) -> Result<(), InterpError> {
            self.runs.lock().unwrap().push((code.to_string(), parent));
            Ok(())
        }

        async fn export_frame(
            &self,
            target: &str,
            rows: &[Value],
            parent: Option<String>,
        ) -> Result<(), InterpError> {
            let code = format!("{target} = {}", serde_json::to_string(rows).unwrap());
            self.runs.lock().unwrap().push((code, parent));
            Ok(())
        }
    }

    fn kernel() -> (Kernel<RecordingInterpreter>, RecordingInterpreter) {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (_in_tx, in_rx) = mpsc::unbounded_channel();
        let host = HostLink::new(out_tx, in_rx);
        let interp = RecordingInterpreter::default();
        let kernel = Kernel::new(
            host,
            interp.clone(),
            Arc::new(OutputChannel::new()),
            KernelConfig::default(),
        );
        (kernel, interp)
    }

    #[test]
    fn test_schema_mutation_detection() {
        assert!(is_schema_mutation("drop table foo"));
        assert!(is_schema_mutation("CREATE TABLE t (x Int64)"));
        assert!(!is_schema_mutation("select 1"));
        assert!(!is_schema_mutation(""));
    }

    #[tokio::test]
    async fn test_interpreter_directive_is_delegated() {
        let (kernel, interp) = kernel();
        let request = ExecuteRequest::new("%python% print(1)", 1).with_parent("cell-1");

        let reply = kernel.execute(&request).await;

        assert_eq!(reply.status, ReplyStatus::Ok);
        let runs = interp.runs.lock().unwrap();
        assert_eq!(
            *runs,
            vec![("print(1)".to_string(), Some("cell-1".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_classification_error_becomes_error_reply() {
        let (kernel, _interp) = kernel();
        let request = ExecuteRequest::new("%export%select 1", 2);

        let reply = kernel.execute(&request).await;

        assert_eq!(reply.status, ReplyStatus::Error);
        assert_eq!(reply.ename.as_deref(), Some("MissingExportTarget"));
        assert!(reply.traceback.is_empty());

        let history = kernel.sink().history();
        assert!(matches!(
            &history[0],
            OutputMsg::Error { ename, .. } if ename == "MissingExportTarget"
        ));
        assert!(matches!(history.last(), Some(OutputMsg::Finished)));
    }
}
