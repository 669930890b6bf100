//! Key scanner upgrade protocol.

pub mod chunk;
pub mod command;
pub mod frame;

// Re-export common types
pub use chunk::{CHUNK_SIZE, Chunk, Chunker};
pub use command::{Command, DeviceInfo, Side};
pub use frame::{WriteFrame, crc32};
