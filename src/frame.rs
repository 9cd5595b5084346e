//! Frame layout: MBAP header handling, big-endian field access and the
//! response-length estimator
//!
//! Everything here is a pure function over byte slices. The incremental
//! receive logic that feeds these lives in [`crate::reader`].

use crate::checksum::CRC_LEN;

/// MBAP header bytes preceding the unit id: transaction id (2) +
/// protocol id (2) + length (2)
pub const MBAP_HEADER_LEN: usize = 6;

/// Maximum PDU size per the Modbus specification (RS485 ADU limit of 256
/// minus address and CRC)
pub const MAX_PDU_SIZE: usize = 253;

/// Largest legal frame in either encoding: MBAP header + unit id + PDU.
/// Receive buffers are sized to exactly this.
pub const MAX_FRAME_SIZE: usize = MBAP_HEADER_LEN + 1 + MAX_PDU_SIZE;

/// Shortest complete RTU frame the readers will delimit on:
/// unit id + function code + one payload byte + CRC
pub const RTU_MIN_LEN: usize = 6;

/// Length of an RTU exception response: unit id + function code | 0x80 +
/// exception code + CRC
pub const RTU_EXCEPTION_LEN: usize = 3 + CRC_LEN;

/// Read a big-endian u16 at `offset`.
#[inline]
pub fn read_u16_be(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

/// Read a big-endian u32 at `offset`.
#[inline]
pub fn read_u32_be(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

/// Read a big-endian u64 at `offset`.
#[inline]
pub fn read_u64_be(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_be_bytes(bytes)
}

/// MBAP header fields preceding the unit id.
///
/// The length field counts the unit id plus the PDU, so the invariant for a
/// well-formed frame is `length == 1 + pdu.len()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub length: u16,
}

impl MbapHeader {
    /// Parse the first six bytes of a TCP frame.
    pub fn parse(buf: &[u8]) -> Self {
        Self {
            transaction_id: read_u16_be(buf, 0),
            protocol_id: read_u16_be(buf, 2),
            length: read_u16_be(buf, 4),
        }
    }

    /// Write the header into `buf[..6]`, big-endian.
    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.transaction_id.to_be_bytes());
        buf[2..4].copy_from_slice(&self.protocol_id.to_be_bytes());
        buf[4..6].copy_from_slice(&self.length.to_be_bytes());
    }
}

/// Expected RTU response length (unit id + payload, excluding CRC) for a
/// request with the given function code and quantity.
///
/// `None` means the length cannot be predicted and the RTU reader must fall
/// back to its quiescence heuristic. The estimate never covers exception
/// responses, which are always 3 bytes before the CRC; the reader handles
/// those separately.
pub fn expected_pdu_len(function_code: u8, quantity: u16) -> Option<usize> {
    match function_code {
        // Read Coils / Read Discrete Inputs: byte count + packed bits
        0x01 | 0x02 => Some(2 + (quantity as usize).div_ceil(8)),

        // Read Holding / Input Registers: byte count + register bytes
        0x03 | 0x04 => Some(2 + 2 * quantity as usize),

        // Single and multiple writes echo function + address + value/quantity
        0x05 | 0x06 | 0x0F | 0x10 => Some(5),

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_big_endian_fields() {
        let buf = [0x00, 0x07, 0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0];
        assert_eq!(read_u16_be(&buf, 0), 0x0007);
        assert_eq!(read_u16_be(&buf, 2), 0x1234);
        assert_eq!(read_u32_be(&buf, 2), 0x12345678);
        assert_eq!(read_u64_be(&buf, 2), 0x123456789ABCDEF0);
    }

    #[test]
    fn test_mbap_header_roundtrip() {
        let header = MbapHeader {
            transaction_id: 7,
            protocol_id: 0,
            length: 6,
        };
        let mut buf = [0u8; MBAP_HEADER_LEN];
        header.write_to(&mut buf);
        assert_eq!(buf, [0x00, 0x07, 0x00, 0x00, 0x00, 0x06]);
        assert_eq!(MbapHeader::parse(&buf), header);
    }

    #[test]
    fn test_expected_pdu_len_table() {
        // 10 registers: byte count + 20 data bytes
        assert_eq!(expected_pdu_len(0x03, 10), Some(22));
        // 9 coils pack into 2 bytes
        assert_eq!(expected_pdu_len(0x01, 9), Some(4));
        assert_eq!(expected_pdu_len(0x02, 8), Some(3));
        assert_eq!(expected_pdu_len(0x04, 1), Some(4));
        // Write echoes ignore quantity
        assert_eq!(expected_pdu_len(0x05, 0), Some(5));
        assert_eq!(expected_pdu_len(0x06, 0xFFFF), Some(5));
        assert_eq!(expected_pdu_len(0x0F, 16), Some(5));
        assert_eq!(expected_pdu_len(0x10, 2), Some(5));
        // Anything else forces the quiescence path
        assert_eq!(expected_pdu_len(0x99, 0), None);
        assert_eq!(expected_pdu_len(0x17, 4), None);
    }

    #[test]
    fn test_frame_size_constants() {
        assert_eq!(MAX_FRAME_SIZE, 260);
        assert_eq!(RTU_EXCEPTION_LEN, 5);
    }
}
