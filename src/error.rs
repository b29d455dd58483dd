//! Error types for the Wiimote driver.

use std::time::Duration;
use thiserror::Error;

/// Violations of the vendor report protocol seen on the data channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("report type {0:#04x} uses an interleaved mode that is not supported")]
    UnsupportedReportType(u8),

    #[error("memory reply carried error code {code:#x}")]
    MemoryError { code: u8 },

    #[error("memory reply delivered {received} bytes but only {remaining} were outstanding")]
    MemoryOverrun { received: usize, remaining: usize },

    #[error("report {report_type:#04x} too short: expected {expected} bytes, got {actual}")]
    ShortReport {
        report_type: u8,
        expected: usize,
        actual: usize,
    },
}

#[derive(Error, Debug)]
pub enum WiimoteError {
    #[error("Wiimote model '{0}' unknown")]
    UnknownDevice(String),

    #[error("a memory transfer is already in progress")]
    AlreadyInProgress,

    #[error("device protocol error: {0}")]
    DeviceProtocol(#[from] ProtocolViolation),

    #[error("device disconnected")]
    Disconnected,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("timed out after {0:?} waiting for the device")]
    Timeout(Duration),

    #[error("{0} is not supported")]
    NotSupported(String),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

impl WiimoteError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

pub type Result<T> = std::result::Result<T, WiimoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_violation_converts() {
        let err: WiimoteError = ProtocolViolation::MemoryError { code: 7 }.into();
        assert!(matches!(
            err,
            WiimoteError::DeviceProtocol(ProtocolViolation::MemoryError { code: 7 })
        ));
        assert_eq!(
            err.to_string(),
            "device protocol error: memory reply carried error code 0x7"
        );
    }
}
