//! Host handshake and remote HTTP execution for querycell.
//!
//! Provides:
//! - `HostLink` - correlation-id handshake broker and host notifications
//! - `RemoteClient` - the remote query call executor
//! - `SseDecoder` / `consume` - incremental event-stream consumption

pub mod handshake;
pub mod http;
pub mod sse;

pub use handshake::{HANDSHAKE_TIMEOUT, HandshakeError, HostLink};
pub use http::{
    ClientError, ColumnMeta, QueryOutcome, RemoteClient, RemoteConfig, RemoteResult, TraceInfo,
};
pub use sse::{SseDecoder, SseRecord, consume};
