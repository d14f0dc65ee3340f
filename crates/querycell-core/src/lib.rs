//! Core abstractions for the querycell notebook bridge.
//!
//! This crate provides the fundamental building blocks:
//! - `OutputChannel` - Broadcast + history output channel
//! - `ExecuteRequest` / `Reply` - The execute message surface
//! - `classify` - Magic-marker directive classification
//! - Host-boundary protocol types and credentials

pub mod classify;
pub mod host;
pub mod output;
pub mod request;

pub use classify::{ClassifyError, Directive, classify};
pub use host::{
    ChatRegistration, Credential, HostNotification, HostOutbound, HostRequest, HostResponse,
    RenderEvent,
};
pub use output::{DisplayData, OutputChannel, OutputMetadata, OutputMsg, StreamName};
pub use request::{ExecuteRequest, KernelInfo, Reply, ReplyStatus};
