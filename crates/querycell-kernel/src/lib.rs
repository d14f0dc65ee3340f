//! Kernel orchestration and rendering for querycell.
//!
//! Provides:
//! - `Kernel` - the request-classification → remote-call →
//!   stream-consumption → delegation → reply pipeline
//! - `render` - HTML display artifacts for tabular results
//! - `KernelConfig` / `KernelError`

pub mod config;
pub mod error;
pub mod kernel;
pub mod render;

pub use config::KernelConfig;
pub use error::KernelError;
pub use kernel::Kernel;
