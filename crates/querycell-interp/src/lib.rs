//! Embedded interpreter delegation for querycell.
//!
//! Provides:
//! - `SubInterpreter` - lazily-spawned, process-backed secondary engine
//! - `WorkerPeer` - newline-delimited JSON protocol and message translation
//! - The `Interpreter` trait the kernel dispatches through

pub mod delegate;
pub mod protocol;
pub mod worker;

pub use delegate::{InterpError, Interpreter, SubInterpreter};
pub use protocol::{ProtocolError, WorkerPeer};
