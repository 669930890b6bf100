//! Write frame encoding.
//!
//! Every chunk of the image travels to the key scanner as one write frame,
//! appended directly after the `upgrade.keyscanner.sendWrite ` token.
//!
//! ## Frame Format
//!
//! ```text
//! +-----------+-----------+-------------------+-----------+
//! |  Address  |  Length   |      Payload      |   CRC32   |
//! +-----------+-----------+-------------------+-----------+
//! |  4 bytes  |  4 bytes  |   Length bytes    |  4 bytes  |
//! +-----------+-----------+-------------------+-----------+
//! |  u32 LE   |  u32 LE   |   chunk data      |  u32 LE   |
//! +-----------+-----------+-------------------+-----------+
//! ```
//!
//! The checksum covers the payload only, never the header.

use {
    crate::error::{Error, Result},
    byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt},
    crc::{CRC_32_ISO_HDLC, Crc},
    std::io::Cursor,
};

/// Size of the address + length header.
pub const HEADER_LEN: usize = 8;

/// Size of the trailing checksum.
pub const CRC_LEN: usize = 4;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Standard CRC-32 (zlib polynomial) of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// A single addressed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFrame {
    address: u32,
    payload: Vec<u8>,
}

impl WriteFrame {
    /// Create a frame writing `payload` at `address`.
    pub fn new(address: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            address,
            payload: payload.into(),
        }
    }

    /// Destination flash address.
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Chunk payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// CRC-32 of the payload.
    pub fn checksum(&self) -> u32 {
        crc32(&self.payload)
    }

    /// Total size on the wire.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len() + CRC_LEN
    }

    /// Serialize into the wire layout.
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());

        buf.write_u32::<LittleEndian>(self.address)
            .unwrap();
        // Chunks never exceed a few hundred bytes
        buf.write_u32::<LittleEndian>(self.payload.len() as u32)
            .unwrap();
        buf.extend_from_slice(&self.payload);
        buf.write_u32::<LittleEndian>(self.checksum())
            .unwrap();

        buf
    }

    /// Parse a frame produced by [`WriteFrame::encode`].
    ///
    /// The buffer must hold exactly one frame.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN + CRC_LEN {
            return Err(Error::InvalidInput(format!(
                "write frame too short: {} bytes",
                data.len()
            )));
        }

        let mut cursor = Cursor::new(data);
        let address = cursor.read_u32::<LittleEndian>()?;
        let len = cursor.read_u32::<LittleEndian>()? as usize;

        let expected_total = HEADER_LEN
            .checked_add(len)
            .and_then(|n| n.checked_add(CRC_LEN));
        if expected_total != Some(data.len()) {
            return Err(Error::InvalidInput(format!(
                "write frame length field says {len} payload bytes, frame is {} bytes",
                data.len()
            )));
        }

        let payload = data[HEADER_LEN..HEADER_LEN + len].to_vec();
        let mut cursor = Cursor::new(&data[HEADER_LEN + len..]);
        let expected = cursor.read_u32::<LittleEndian>()?;
        let actual = crc32(&payload);
        if expected != actual {
            return Err(Error::CrcMismatch { expected, actual });
        }

        Ok(Self { address, payload })
    }
}
