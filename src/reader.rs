//! Incremental frame receivers for both encodings
//!
//! MBAP frames are length-delimited by their own header, so [`recv_mbap`]
//! needs no heuristics. RTU frames carry no length field: [`recv_rtu`]
//! either knows the expected response length from the estimator or falls
//! back to a quiescence heuristic (no more data within a short idle window
//! means the frame is over). The heuristic is best-effort; fragmented
//! delivery can desynchronize it, which is inherent to length-less framing
//! over a stream transport.
//!
//! Every read is bounded by a deadline. A timeout is not a failure of the
//! connection, it is how the converter loops periodically re-check the
//! shared cancellation token.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::checksum::verify_crc;
use crate::error::{GatewayError, GatewayResult};
use crate::frame::{read_u16_be, MBAP_HEADER_LEN, RTU_EXCEPTION_LEN, RTU_MIN_LEN};

/// One bounded read into `buf`, racing the cancellation token.
async fn read_chunk(
    stream: &mut TcpStream,
    buf: &mut [u8],
    deadline: Duration,
    cancel: &CancellationToken,
) -> GatewayResult<usize> {
    tokio::select! {
        () = cancel.cancelled() => Err(GatewayError::Aborted),
        result = timeout(deadline, stream.read(buf)) => match result {
            Err(_) => Err(GatewayError::Timeout),
            Ok(Ok(0)) => Err(GatewayError::Disconnected),
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => Err(e.into()),
        },
    }
}

/// Whether more bytes arrive within `idle_window`.
///
/// Peeks without consuming, so a positive answer leaves the data for the
/// next read. Errors and end-of-stream both count as "nothing pending"; the
/// following read surfaces them properly.
async fn data_pending(stream: &TcpStream, idle_window: Duration) -> bool {
    let mut probe = [0u8; 1];
    match timeout(idle_window, stream.peek(&mut probe)).await {
        Ok(Ok(n)) => n > 0,
        Ok(Err(_)) | Err(_) => false,
    }
}

/// Receive one complete MBAP-framed TCP frame into `buf`.
///
/// Returns the total frame length (header + unit id + PDU). The header's
/// length field fully delimits the frame: exact match is success, overshoot
/// is [`GatewayError::TooMuchData`], running out of buffer first is
/// [`GatewayError::BufferFull`].
pub async fn recv_mbap(
    stream: &mut TcpStream,
    buf: &mut [u8],
    deadline: Duration,
    cancel: &CancellationToken,
) -> GatewayResult<usize> {
    let mut filled = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(GatewayError::Aborted);
        }

        filled += read_chunk(stream, &mut buf[filled..], deadline, cancel).await?;

        if filled > MBAP_HEADER_LEN {
            let total = MBAP_HEADER_LEN + read_u16_be(buf, 4) as usize;
            if filled == total {
                return Ok(filled);
            }
            if filled > total {
                return Err(GatewayError::TooMuchData);
            }
        }

        if filled == buf.len() {
            return Err(GatewayError::BufferFull);
        }
    }
}

/// Receive one RTU frame (unit id + PDU + CRC) into `buf`.
///
/// With `expected_pdu_len` known, the frame completes at `expected + 3`
/// bytes and the CRC trailer is verified. A 5-byte buffer with nothing more
/// pending is an exception response, shorter than any estimate, and is
/// returned as-is without CRC enforcement.
///
/// With `expected_pdu_len` unknown (unsolicited requests from an RTU
/// master), the frame ends when no further data arrives within
/// `idle_window`. A CRC mismatch on that path is logged but the frame is
/// still returned, since no better delimiter exists.
pub async fn recv_rtu(
    stream: &mut TcpStream,
    buf: &mut [u8],
    expected_pdu_len: Option<usize>,
    deadline: Duration,
    idle_window: Duration,
    cancel: &CancellationToken,
) -> GatewayResult<usize> {
    let mut filled = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(GatewayError::Aborted);
        }

        match read_chunk(stream, &mut buf[filled..], deadline, cancel).await {
            Ok(n) => filled += n,
            Err(err @ (GatewayError::Timeout | GatewayError::Disconnected)) => {
                // An exception response is complete even though the
                // estimator predicted a longer frame.
                if filled == RTU_EXCEPTION_LEN {
                    return Ok(filled);
                }
                return Err(err);
            }
            Err(err) => return Err(err),
        }

        if filled >= RTU_MIN_LEN {
            match expected_pdu_len {
                Some(expected) => {
                    let total = expected + 3;
                    if filled == total {
                        return match verify_crc(&buf[..filled]) {
                            Ok(()) => Ok(filled),
                            Err((calculated, received)) => {
                                Err(GatewayError::CrcMismatch { calculated, received })
                            }
                        };
                    }
                    if filled > total {
                        return Err(GatewayError::TooMuchData);
                    }
                }
                None => {
                    // Future data might still belong to this frame; only
                    // quiescence ends it.
                    if !data_pending(stream, idle_window).await {
                        if let Err((calculated, received)) = verify_crc(&buf[..filled]) {
                            warn!(
                                "crc mismatch on length-less frame \
                                 (calculated 0x{calculated:04X}, received 0x{received:04X}), \
                                 forwarding anyway"
                            );
                        }
                        return Ok(filled);
                    }
                }
            }
        }

        if filled == RTU_EXCEPTION_LEN && !data_pending(stream, idle_window).await {
            return Ok(filled);
        }

        if filled == 2 && !data_pending(stream, idle_window).await {
            return Err(GatewayError::Raw(format!(
                "malformed two-byte response: {:02X} {:02X}",
                buf[0], buf[1]
            )));
        }

        if filled == buf.len() {
            return Err(GatewayError::BufferFull);
        }
    }
}

/// Discard any unread bytes sitting in the socket's receive queue.
///
/// RTU has no length field, so leftovers from a prior malformed exchange
/// would be glued onto the next response. Called before every send to the
/// slave. Returns the number of bytes discarded.
pub fn drain_stale(stream: &TcpStream) -> usize {
    let mut scratch = [0u8; 100];
    let mut cleared = 0;
    while let Ok(n) = stream.try_read(&mut scratch) {
        if n == 0 {
            break;
        }
        cleared += n;
    }
    if cleared > 0 {
        debug!("discarded {cleared} stale bytes before send");
    }
    cleared
}

/// Write the whole frame or fail; a partial frame is never left on the wire
/// from our side.
pub async fn send_all(
    stream: &mut TcpStream,
    data: &[u8],
    cancel: &CancellationToken,
) -> GatewayResult<()> {
    tokio::select! {
        () = cancel.cancelled() => Err(GatewayError::Aborted),
        result = stream.write_all(data) => result.map_err(Into::into),
    }
}
