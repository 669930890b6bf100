//! Seal header carried at the start of key scanner images.
//!
//! ```text
//! +-----------+---------+------+-----+---------------+--------------+-------------+-----------------+
//! | device_id | version | size | crc | program_start | program_size | program_crc | program_version |
//! +-----------+---------+------+-----+---------------+--------------+-------------+-----------------+
//! |                     8 x u32 little-endian, 32 bytes                                            |
//! +------------------------------------------------------------------------------------------------+
//! ```

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Size of the seal in bytes.
pub const SEAL_SIZE: usize = 32;

/// Header describing the seal itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SealHeader {
    /// Target device identifier.
    pub device_id: u32,
    /// Seal format version.
    pub version: u32,
    /// Seal size.
    pub size: u32,
    /// Seal CRC.
    pub crc: u32,
}

/// Program description stored in front of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Seal {
    /// Seal header.
    pub header: SealHeader,
    /// Program start address.
    pub program_start: u32,
    /// Program size in bytes.
    pub program_size: u32,
    /// Program CRC, compared with the device's to detect a current image.
    pub program_crc: u32,
    /// Program version.
    pub program_version: u32,
}

impl Seal {
    /// Read the seal from the first 32 bytes of `data`.
    ///
    /// Returns `None` when the image is shorter than a seal.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < SEAL_SIZE {
            return None;
        }

        let mut cursor = Cursor::new(&data[..SEAL_SIZE]);
        let mut next = || cursor.read_u32::<LittleEndian>().ok();

        Some(Self {
            header: SealHeader {
                device_id: next()?,
                version: next()?,
                size: next()?,
                crc: next()?,
            },
            program_start: next()?,
            program_size: next()?,
            program_crc: next()?,
            program_version: next()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(values: [u32; 8]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_parse_seal_fields_in_order() {
        let data = words([1, 2, 32, 4, 0x5000, 0x8000, 0xE178A6B3, 0x01000001]);
        let seal = Seal::parse(&data).unwrap();

        assert_eq!(seal.header.device_id, 1);
        assert_eq!(seal.header.version, 2);
        assert_eq!(seal.header.size, 32);
        assert_eq!(seal.header.crc, 4);
        assert_eq!(seal.program_start, 0x5000);
        assert_eq!(seal.program_size, 0x8000);
        assert_eq!(seal.program_crc, 0xE178A6B3);
        assert_eq!(seal.program_version, 0x01000001);
    }

    #[test]
    fn test_parse_ignores_trailing_program() {
        let mut data = words([9; 8]);
        data.extend_from_slice(&[0xFF; 100]);
        assert_eq!(Seal::parse(&data).unwrap().program_version, 9);
    }

    #[test]
    fn test_short_image_has_no_seal() {
        assert!(Seal::parse(&[0; 31]).is_none());
        assert!(Seal::parse(&[]).is_none());
    }
}
