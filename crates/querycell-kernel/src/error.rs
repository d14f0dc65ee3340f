//! Kernel error normalization.

use querycell_client::{ClientError, HandshakeError};
use querycell_core::ClassifyError;
use querycell_interp::InterpError;
use thiserror::Error;

/// Any failure on the path from classification to rendering.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Interp(#[from] InterpError),
}

impl KernelError {
    /// Stable kind name used as `ename` in error replies and displays.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Classify(ClassifyError::MissingExportTarget) => "MissingExportTarget",
            Self::Handshake(HandshakeError::Timeout) => "Timeout",
            Self::Handshake(HandshakeError::ChannelClosed) => "AuthRequired",
            Self::Handshake(HandshakeError::UnexpectedResponse) => "MalformedResponse",
            Self::Client(ClientError::AuthRequired) => "AuthRequired",
            Self::Client(ClientError::Transport(_)) => "RemoteUnreachable",
            Self::Client(ClientError::Status { .. } | ClientError::Exception(_)) => "RemoteError",
            Self::Client(ClientError::AgentNotSpecified) => "AgentNotSpecified",
            Self::Interp(_) => "SubInterpreterUnavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_are_stable() {
        let err = KernelError::from(ClassifyError::MissingExportTarget);
        assert_eq!(err.kind(), "MissingExportTarget");

        let err = KernelError::from(HandshakeError::Timeout);
        assert_eq!(err.kind(), "Timeout");

        let err = KernelError::from(ClientError::Exception("boom".to_string()));
        assert_eq!(err.kind(), "RemoteError");
    }
}
