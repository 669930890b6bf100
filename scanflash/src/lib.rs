//! # scanflash
//!
//! Host-side firmware upgrade for keyboard key scanners.
//!
//! The key scanner is upgraded over the keyboard's serial console with a short
//! line-oriented command protocol:
//!
//! - the image is split into 256-byte [chunks](protocol::Chunker)
//! - each chunk is sent as a [`WriteFrame`]: address, length, payload, CRC-32
//! - the [`Upgrader`] walks `start`, `begin`, `getInfo`, `sendWrite` and
//!   `finish`, waiting for a fixed number of acknowledgment lines after each
//! - between `start` and `begin` it either waits a fixed window for the
//!   upgrade button or polls `upgrade.isReady` ([`ButtonWait`])
//!
//! ## Features
//!
//! - `native` (default): serial port support via the `serialport` crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use scanflash::{FirmwareImage, ImageFormat, LineTransport, UpgradeConfig, Upgrader};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = FirmwareImage::from_file("keyscanner.hex", ImageFormat::Auto)?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         use scanflash::{NativePort, SerialConfig};
//!
//!         let port = NativePort::open(&SerialConfig::new("/dev/ttyACM0", 115200))?;
//!         let transport = LineTransport::from_port(port)?;
//!         let mut upgrader = Upgrader::new(transport, UpgradeConfig::default());
//!
//!         let report = upgrader.run(&image, |written, total| {
//!             println!("{written}/{total} bytes");
//!         })?;
//!         println!("{} chunks written", report.chunks_written);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod transport;
pub mod upgrade;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    error::{Error, Result},
    image::{FirmwareImage, ImageFormat, seal::Seal},
    port::{DEFAULT_BAUD, Port, SerialConfig},
    protocol::{CHUNK_SIZE, Chunk, Chunker, Command, DeviceInfo, Side, WriteFrame, crc32},
    transport::{LineTransport, Transport},
    upgrade::{
        AckPolicy, ButtonWait, InfoSource, Phase, ProtocolSession, UpgradeConfig, UpgradeReport,
        Upgrader,
    },
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_default_false() {
        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }

    #[test]
    fn test_interrupt_checker_toggle_true_false() {
        test_set_interrupted(true);
        assert!(is_interrupted_requested());

        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }
}
