//! CRC-16/XMODEM as computed by the vehicle firmware.
//!
//! Polynomial `0x1021`, initial value `0x0000`, no reflection, no final XOR.
//! The firmware transmits the register least-significant byte first.

const POLY: u16 = 0x1021;

/// Compute the CRC-16/XMODEM register for `bytes`.
pub fn crc16(bytes: &[u8]) -> u16 {
    crc16_update(0x0000, bytes)
}

/// Continue a CRC computation over another chunk.
pub fn crc16_update(mut crc: u16, bytes: &[u8]) -> u16 {
    for &byte in bytes {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// CRC of `bytes` in wire order (least-significant byte first).
pub fn crc16_le_bytes(bytes: &[u8]) -> [u8; 2] {
    crc16(bytes).to_le_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value_matches_catalogue() {
        // CRC-16/XMODEM check value from the CRC RevEng catalogue.
        assert_eq!(crc16(b"123456789"), 0x31C3);
    }

    #[test]
    fn empty_input_is_initial_value() {
        assert_eq!(crc16(&[]), 0x0000);
    }

    #[test]
    fn single_bytes() {
        assert_eq!(crc16(&[0x41]), 0x58E5);
        assert_eq!(crc16(&[0x00]), 0x0000);
        assert_eq!(crc16(&[0xFF]), 0x1EF0);
    }

    #[test]
    fn wire_order_is_little_endian() {
        assert_eq!(crc16_le_bytes(b"123456789"), [0xC3, 0x31]);
    }

    #[test]
    fn incremental_matches_one_shot() {
        let data = b"variant-and-payload";
        let (head, tail) = data.split_at(7);
        assert_eq!(crc16_update(crc16(head), tail), crc16(data));
    }
}
