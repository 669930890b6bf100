//! Splitting an image into addressed chunks.

use crate::error::{Error, Result};
use crate::protocol::frame::WriteFrame;

/// Chunk size the key scanner bootloader accepts per write.
pub const CHUNK_SIZE: usize = 256;

/// A contiguous slice of the image and where it lands in flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    /// Zero-based position in the chunk sequence.
    pub index: usize,
    /// Byte offset inside the image.
    pub offset: usize,
    /// Destination flash address.
    pub address: u32,
    /// Chunk bytes.
    pub data: &'a [u8],
}

impl Chunk<'_> {
    /// Build the write frame for this chunk.
    pub fn to_frame(&self) -> WriteFrame {
        WriteFrame::new(self.address, self.data)
    }
}

/// Splits an image into fixed-size chunks addressed from a base address.
#[derive(Debug, Clone)]
pub struct Chunker<'a> {
    image: &'a [u8],
    chunk_size: usize,
    base_address: u32,
}

impl<'a> Chunker<'a> {
    /// Create a chunker over `image`.
    ///
    /// Fails if `chunk_size` is zero or if the image would run past the end
    /// of the 32-bit address space when placed at `base_address`.
    pub fn new(image: &'a [u8], chunk_size: usize, base_address: u32) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidInput("chunk size must be non-zero".into()));
        }

        let fits = u64::try_from(image.len())
            .ok()
            .and_then(|len| u64::from(base_address).checked_add(len))
            .is_some_and(|end| end <= u64::from(u32::MAX) + 1);
        if !fits {
            return Err(Error::InvalidInput(format!(
                "{} byte image does not fit above 0x{base_address:08X}",
                image.len()
            )));
        }

        Ok(Self {
            image,
            chunk_size,
            base_address,
        })
    }

    /// Number of chunks, `ceil(len / chunk_size)`.
    pub fn len(&self) -> usize {
        self.image.len().div_ceil(self.chunk_size)
    }

    /// Whether the image produces no chunks at all.
    pub fn is_empty(&self) -> bool {
        self.image.is_empty()
    }

    /// Iterate the chunks in address order. Each call starts over.
    pub fn chunks(&self) -> Chunks<'a> {
        Chunks {
            inner: self.image.chunks(self.chunk_size).enumerate(),
            chunk_size: self.chunk_size,
            base_address: self.base_address,
        }
    }
}

/// Iterator returned by [`Chunker::chunks`].
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    inner: std::iter::Enumerate<std::slice::Chunks<'a, u8>>,
    chunk_size: usize,
    base_address: u32,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    #[allow(clippy::cast_possible_truncation)]
    fn next(&mut self) -> Option<Self::Item> {
        let (index, data) = self.inner.next()?;
        let offset = index * self.chunk_size;
        // Range was checked in Chunker::new
        let address = self.base_address.wrapping_add(offset as u32);
        Some(Chunk {
            index,
            offset,
            address,
            data,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Chunks<'_> {}
