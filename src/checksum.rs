//! Modbus CRC-16 checksum
//!
//! RTU frames carry no length field; the trailing CRC-16 (initial value
//! 0xFFFF, reflected polynomial 0xA001, no final XOR) is the only integrity
//! check. The trailer is transmitted low byte first, unlike every other
//! multi-byte field in Modbus.

use crc::{Crc, CRC_16_MODBUS};

const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Number of CRC trailer bytes on an RTU frame
pub const CRC_LEN: usize = 2;

/// Compute the Modbus CRC-16 over `data`.
#[inline]
pub fn crc16(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// Append the CRC trailer for `buf[..len]` at `buf[len..len + 2]`, low byte
/// first, and return the new frame length.
pub fn append_crc(buf: &mut [u8], len: usize) -> usize {
    let crc = crc16(&buf[..len]);
    buf[len..len + CRC_LEN].copy_from_slice(&crc.to_le_bytes());
    len + CRC_LEN
}

/// Verify the trailing CRC of a complete RTU frame.
///
/// Returns the `(calculated, received)` pair on mismatch so callers can log
/// or reject as their path requires.
pub fn verify_crc(frame: &[u8]) -> Result<(), (u16, u16)> {
    let body_len = frame.len() - CRC_LEN;
    let calculated = crc16(&frame[..body_len]);
    let received = u16::from_le_bytes([frame[body_len], frame[body_len + 1]]);
    if calculated == received {
        Ok(())
    } else {
        Err((calculated, received))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_empty_is_initial_value() {
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn test_crc16_reference_vector() {
        // Read Holding Registers request: unit 1, address 0, quantity 10.
        // On the wire the frame ends with bytes C5, CD.
        let frame = [0x01, 0x03, 0x00, 0x00, 0x00, 0x0A];
        assert_eq!(crc16(&frame), 0xCDC5);
    }

    #[test]
    fn test_append_then_verify_roundtrip() {
        let mut buf = [0u8; 16];
        buf[..6].copy_from_slice(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]);
        let len = append_crc(&mut buf, 6);
        assert_eq!(len, 8);
        assert_eq!(&buf[6..8], &[0xC5, 0xCD]);
        assert!(verify_crc(&buf[..len]).is_ok());
    }

    #[test]
    fn test_verify_rejects_corrupted_trailer() {
        let mut buf = [0u8; 16];
        buf[..6].copy_from_slice(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]);
        let len = append_crc(&mut buf, 6);
        buf[len - 1] ^= 0xFF;
        let (calculated, received) = verify_crc(&buf[..len]).unwrap_err();
        assert_eq!(calculated, 0xCDC5);
        assert_ne!(calculated, received);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn appended_trailer_always_verifies(
                body in proptest::collection::vec(any::<u8>(), 1..=253),
            ) {
                let mut buf = vec![0u8; body.len() + CRC_LEN];
                buf[..body.len()].copy_from_slice(&body);
                let len = append_crc(&mut buf, body.len());
                prop_assert!(verify_crc(&buf[..len]).is_ok());
            }

            // The Modbus polynomial detects every single-bit error, in the
            // body or the trailer alike.
            #[test]
            fn single_bit_flip_is_detected(
                body in proptest::collection::vec(any::<u8>(), 1..=64),
                bit in 0usize..8,
                position in any::<usize>(),
            ) {
                let mut buf = vec![0u8; body.len() + CRC_LEN];
                buf[..body.len()].copy_from_slice(&body);
                let len = append_crc(&mut buf, body.len());
                buf[position % len] ^= 1 << bit;
                prop_assert!(verify_crc(&buf[..len]).is_err());
            }
        }
    }
}
