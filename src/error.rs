//! Gateway error types and result handling
//!
//! One receive outcome exists in this crate: `GatewayResult<usize>`. Success
//! carries a frame length, failure carries exactly one of the kinds below.
//! [`GatewayError::Timeout`] is the only recoverable kind inside a
//! steady-state converter loop; everything else tears the connection pair
//! down.

use std::io;

use thiserror::Error;

/// Result type used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Receive/transfer failure taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Peer closed the connection (zero-byte read)
    #[error("disconnected")]
    Disconnected,

    /// No data arrived before the per-read deadline. Recoverable: the caller
    /// retries the same step after re-checking cancellation.
    #[error("read timeout")]
    Timeout,

    /// Cancellation was observed between reads
    #[error("service aborted")]
    Aborted,

    /// More bytes arrived than the frame delimiter allows
    #[error("too much data received")]
    TooMuchData,

    /// Fixed receive buffer exhausted before the frame completed
    #[error("buffer full")]
    BufferFull,

    /// RTU trailer did not match the computed CRC-16
    #[error("crc mismatch: calculated 0x{calculated:04X}, received 0x{received:04X}")]
    CrcMismatch { calculated: u16, received: u16 },

    /// Any other transport fault, rendered per fault category
    #[error("{0}")]
    Raw(String),
}

impl GatewayError {
    /// Whether this failure ends the connection pair.
    ///
    /// Only `Timeout` is survivable: it is the mechanism by which blocking
    /// loops periodically re-check cancellation.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, GatewayError::Timeout)
    }
}

impl From<io::Error> for GatewayError {
    fn from(err: io::Error) -> Self {
        use io::ErrorKind::*;
        match err.kind() {
            WouldBlock | TimedOut => GatewayError::Timeout,
            ConnectionReset => GatewayError::Raw("connection reset".into()),
            ConnectionAborted | BrokenPipe | UnexpectedEof => {
                GatewayError::Raw("connection aborted".into())
            }
            NetworkDown => GatewayError::Raw("network down".into()),
            NotConnected => GatewayError::Raw("not connected".into()),
            _ => GatewayError::Raw(format!("unknown error: {err}")),
        }
    }
}
