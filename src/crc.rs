//! CRC-CCITT as defined in IEEE C37.118.2-2011 Annex B: polynomial 0x1021, initial value 0xFFFF,
//! no final XOR, MSB-first.

use crc::{Algorithm, Crc};

const ALGORITHM: Algorithm<u16> = crc::CRC_16_IBM_3740;

/// Compute the CRC-CCITT of `bytes`.
///
/// `bytes` should be every byte of the frame except the trailing two-byte checksum.
pub fn compute(bytes: &[u8]) -> u16 {
    Crc::<u16>::new(&ALGORITHM).checksum(bytes)
}

/// Verify that `frame_bytes` (a complete frame, trailing checksum included) has a valid CRC.
///
/// Returns `false` for a buffer shorter than 2 bytes.
pub fn verify(frame_bytes: &[u8]) -> bool {
    let Some(split) = frame_bytes.len().checked_sub(2) else {
        return false;
    };

    let (body, trailer) = frame_bytes.split_at(split);
    let received = u16::from_be_bytes([trailer[0], trailer[1]]);

    compute(body) == received
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_crc_16_ibm_3740_check_value() {
        // Standard check value for this profile: CRC of ASCII "123456789" is 0x29B1.
        assert_eq!(compute(b"123456789"), 0x29B1);
    }

    #[test]
    fn verify_accepts_self_computed_crc() {
        let mut frame = b"hello world".to_vec();
        let crc = compute(&frame);
        frame.extend_from_slice(&crc.to_be_bytes());

        assert!(verify(&frame));
    }

    #[test]
    fn verify_rejects_corrupted_frame() {
        let mut frame = b"hello world".to_vec();
        let crc = compute(&frame);
        frame.extend_from_slice(&crc.to_be_bytes());
        frame[3] ^= 0xff;

        assert!(!verify(&frame));
    }

    #[test]
    fn verify_rejects_too_short_buffer() {
        assert!(!verify(&[0x00]));
    }
}
