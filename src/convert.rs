//! Per-connection converter loops
//!
//! One converter runs per accepted master, owning both sockets and three
//! fixed frame buffers for its whole life. Each cycle moves exactly one
//! request and one response between the framings; no frame is ever
//! partially forwarded. A timeout on a receive step retries that step
//! (after the cancellation check inside the reader); every other failure
//! tears the pair down and ends the task, leaving other connections
//! untouched.

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::checksum::append_crc;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::frame::{expected_pdu_len, read_u16_be, MbapHeader, MAX_FRAME_SIZE, MBAP_HEADER_LEN};
use crate::reader::{drain_stale, recv_mbap, recv_rtu, send_all};

/// Bridge a Modbus TCP master to the RTU slave behind the tunnel.
///
/// Cycle: MBAP request in, header stripped, CRC appended, RTU out; RTU
/// response in (delimited by the length estimate), CRC dropped, MBAP header
/// rebuilt with the master's original transaction and protocol id.
pub async fn run_tcp_to_rtu(
    mut master: TcpStream,
    mut slave: TcpStream,
    config: GatewayConfig,
    cancel: CancellationToken,
) {
    let mut master_buf = [0u8; MAX_FRAME_SIZE];
    let mut conversion = [0u8; MAX_FRAME_SIZE];
    let mut slave_buf = [0u8; MAX_FRAME_SIZE];

    'conn: loop {
        // Receive one MBAP request from the master
        let rcv_len = loop {
            match recv_mbap(&mut master, &mut master_buf, config.master_timeout, &cancel).await {
                Ok(n) => break n,
                Err(GatewayError::Timeout) => continue,
                Err(GatewayError::Aborted) => {
                    debug!("connection loop cancelled");
                    break 'conn;
                }
                Err(GatewayError::Disconnected) => {
                    warn!("master disconnected");
                    break 'conn;
                }
                Err(err) => {
                    error!("master receive failed: {err}");
                    break 'conn;
                }
            }
        };

        // Strip the 6-byte header, keep unit id + PDU, arm a fresh CRC
        let pdu_len = rcv_len - MBAP_HEADER_LEN;
        conversion[..pdu_len].copy_from_slice(&master_buf[MBAP_HEADER_LEN..rcv_len]);
        let rtu_len = append_crc(&mut conversion, pdu_len);

        // RTU framing has no length field; leftovers from a prior malformed
        // exchange would be glued onto the next response.
        drain_stale(&slave);

        if let Err(err) = send_all(&mut slave, &conversion[..rtu_len], &cancel).await {
            error!("slave send failed: {err}");
            break;
        }

        // Quantity sits at PDU offset 3..5 for the read functions; short
        // PDUs simply have none.
        let function_code = if pdu_len >= 2 { conversion[1] } else { 0 };
        let quantity = if pdu_len >= 6 { read_u16_be(&conversion, 4) } else { 0 };
        let expected = expected_pdu_len(function_code, quantity);

        let rsp_len = loop {
            match recv_rtu(
                &mut slave,
                &mut slave_buf,
                expected,
                config.slave_timeout,
                config.idle_window,
                &cancel,
            )
            .await
            {
                Ok(n) => break n,
                Err(GatewayError::Timeout) => continue,
                Err(GatewayError::Aborted) => {
                    debug!("connection loop cancelled");
                    break 'conn;
                }
                Err(err) => {
                    error!("slave receive failed: {err}");
                    break 'conn;
                }
            }
        };

        // Rebuild the MBAP header: original transaction and protocol id,
        // length counting unit id + PDU with the CRC dropped.
        let payload_len = rsp_len - 2;
        if MBAP_HEADER_LEN + payload_len > conversion.len() {
            error!("rtu response exceeds the mbap frame bound ({rsp_len} bytes)");
            break;
        }
        MbapHeader {
            transaction_id: read_u16_be(&master_buf, 0),
            protocol_id: read_u16_be(&master_buf, 2),
            length: payload_len as u16,
        }
        .write_to(&mut conversion);
        conversion[MBAP_HEADER_LEN..MBAP_HEADER_LEN + payload_len]
            .copy_from_slice(&slave_buf[..payload_len]);

        if let Err(err) = send_all(
            &mut master,
            &conversion[..MBAP_HEADER_LEN + payload_len],
            &cancel,
        )
        .await
        {
            error!("master send failed: {err}");
            break;
        }

        debug!("cycle complete: {pdu_len}-byte request, {payload_len}-byte response");
    }
}

/// Bridge an RTU-speaking master to a Modbus TCP slave.
///
/// The master's frames carry no transaction id, so the converter assigns
/// its own, counting up from 1 and wrapping silently at the 16-bit
/// boundary. The slave's echoed id is checked against the one just sent:
/// the TCP leg is ordered and reliable, so a mismatch indicates a logic bug
/// worth surfacing, not a desync to recover from. It is logged and the
/// response forwarded anyway.
pub async fn run_rtu_to_tcp(
    mut master: TcpStream,
    mut slave: TcpStream,
    config: GatewayConfig,
    cancel: CancellationToken,
) {
    let mut master_buf = [0u8; MAX_FRAME_SIZE];
    let mut conversion = [0u8; MAX_FRAME_SIZE];
    let mut slave_buf = [0u8; MAX_FRAME_SIZE];

    let mut transaction_id: u16 = 1;

    'conn: loop {
        // Receive one RTU request; no estimate exists for unsolicited
        // requests, so this is always the quiescence path.
        let rcv_len = loop {
            match recv_rtu(
                &mut master,
                &mut master_buf,
                None,
                config.master_timeout,
                config.idle_window,
                &cancel,
            )
            .await
            {
                Ok(n) => break n,
                Err(GatewayError::Timeout) => continue,
                Err(GatewayError::Aborted) => {
                    debug!("connection loop cancelled");
                    break 'conn;
                }
                Err(GatewayError::Disconnected) => {
                    warn!("master disconnected");
                    break 'conn;
                }
                Err(err) => {
                    error!("master receive failed: {err}");
                    break 'conn;
                }
            }
        };

        // Wrap unit id + PDU in a fresh MBAP header; the CRC is not
        // forwarded.
        let payload_len = rcv_len - 2;
        if MBAP_HEADER_LEN + payload_len > conversion.len() {
            error!("rtu request exceeds the mbap frame bound ({rcv_len} bytes)");
            break;
        }
        let sent_tid = transaction_id;
        transaction_id = transaction_id.wrapping_add(1);

        MbapHeader {
            transaction_id: sent_tid,
            protocol_id: 0,
            length: payload_len as u16,
        }
        .write_to(&mut conversion);
        conversion[MBAP_HEADER_LEN..MBAP_HEADER_LEN + payload_len]
            .copy_from_slice(&master_buf[..payload_len]);

        drain_stale(&slave);

        if let Err(err) = send_all(
            &mut slave,
            &conversion[..MBAP_HEADER_LEN + payload_len],
            &cancel,
        )
        .await
        {
            error!("slave send failed: {err}");
            break;
        }

        let rsp_len = loop {
            match recv_mbap(&mut slave, &mut slave_buf, config.slave_timeout, &cancel).await {
                Ok(n) => break n,
                Err(GatewayError::Timeout) => continue,
                Err(GatewayError::Aborted) => {
                    debug!("connection loop cancelled");
                    break 'conn;
                }
                Err(err) => {
                    error!("slave receive failed: {err}");
                    break 'conn;
                }
            }
        };

        let echoed_tid = read_u16_be(&slave_buf, 0);
        if echoed_tid != sent_tid {
            warn!("transaction id mismatch: received {echoed_tid}, sent {sent_tid}");
        }

        // Strip the MBAP header and re-arm the CRC trailer
        let pdu_len = rsp_len - MBAP_HEADER_LEN;
        conversion[..pdu_len].copy_from_slice(&slave_buf[MBAP_HEADER_LEN..rsp_len]);
        let rtu_len = append_crc(&mut conversion, pdu_len);

        if let Err(err) = send_all(&mut master, &conversion[..rtu_len], &cancel).await {
            error!("master send failed: {err}");
            break;
        }

        debug!("cycle complete: transaction {sent_tid}, {pdu_len}-byte response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{crc16, verify_crc};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    fn test_config() -> GatewayConfig {
        GatewayConfig {
            master_timeout: Duration::from_millis(500),
            slave_timeout: Duration::from_millis(500),
            idle_window: Duration::from_millis(30),
            ..GatewayConfig::default()
        }
    }

    #[tokio::test]
    async fn test_tcp_to_rtu_single_cycle() {
        let (master_remote, master_local) = socket_pair().await;
        let (slave_local, slave_remote) = socket_pair().await;
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_tcp_to_rtu(
            master_local,
            slave_local,
            test_config(),
            cancel.clone(),
        ));

        let mut master = master_remote;
        let mut slave = slave_remote;

        // Master sends: transaction 7, unit 1, fc 0x03, address 0, quantity 2
        master
            .write_all(&[
                0x00, 0x07, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02,
            ])
            .await
            .unwrap();

        // Slave sees the RTU rendition with a valid CRC
        let mut rtu_request = [0u8; 8];
        slave.read_exact(&mut rtu_request).await.unwrap();
        assert_eq!(&rtu_request[..6], &[0x01, 0x03, 0x00, 0x00, 0x00, 0x02]);
        assert!(verify_crc(&rtu_request).is_ok());

        // Slave answers with a 6-byte PDU (byte count 4 + two registers)
        let mut response = [0u8; 16];
        response[..7].copy_from_slice(&[0x01, 0x03, 0x04, 0x00, 0x2A, 0x00, 0x2B]);
        let crc = crc16(&response[..7]);
        response[7..9].copy_from_slice(&crc.to_le_bytes());
        slave.write_all(&response[..9]).await.unwrap();

        // Master receives MBAP with the original transaction id and length 7
        let mut mbap_response = [0u8; 13];
        master.read_exact(&mut mbap_response).await.unwrap();
        assert_eq!(&mbap_response[..6], &[0x00, 0x07, 0x00, 0x00, 0x00, 0x07]);
        assert_eq!(
            &mbap_response[6..],
            &[0x01, 0x03, 0x04, 0x00, 0x2A, 0x00, 0x2B]
        );

        // Closing the master ends the pair
        drop(master);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_rtu_to_tcp_assigns_sequential_transaction_ids() {
        let (master_remote, master_local) = socket_pair().await;
        let (slave_local, slave_remote) = socket_pair().await;
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_rtu_to_tcp(
            master_local,
            slave_local,
            test_config(),
            cancel.clone(),
        ));

        let mut master = master_remote;
        let mut slave = slave_remote;

        for expected_tid in 1u16..=3 {
            // RTU request: unit 1, fc 0x06, address 5, value 0x1234
            let mut request = [0u8; 8];
            request[..6].copy_from_slice(&[0x01, 0x06, 0x00, 0x05, 0x12, 0x34]);
            let crc = crc16(&request[..6]);
            request[6..8].copy_from_slice(&crc.to_le_bytes());
            master.write_all(&request).await.unwrap();

            // Slave sees MBAP with the self-assigned transaction id
            let mut mbap_request = [0u8; 12];
            slave.read_exact(&mut mbap_request).await.unwrap();
            assert_eq!(read_u16_be(&mbap_request, 0), expected_tid);
            assert_eq!(read_u16_be(&mbap_request, 2), 0);
            assert_eq!(read_u16_be(&mbap_request, 4), 6);
            assert_eq!(&mbap_request[6..], &[0x01, 0x06, 0x00, 0x05, 0x12, 0x34]);

            // Echo the request back, as fc 0x06 slaves do
            slave.write_all(&mbap_request).await.unwrap();

            // Master gets the RTU rendition with a fresh CRC
            let mut rtu_response = [0u8; 8];
            master.read_exact(&mut rtu_response).await.unwrap();
            assert_eq!(&rtu_response[..6], &[0x01, 0x06, 0x00, 0x05, 0x12, 0x34]);
            assert!(verify_crc(&rtu_response).is_ok());
        }

        cancel.cancel();
        task.await.unwrap();
    }
}
