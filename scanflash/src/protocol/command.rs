//! Key scanner upgrade commands.
//!
//! Commands are plain ASCII lines. The device answers each one with a fixed
//! number of CR/LF terminated lines. `sendWrite` is the odd one out: its
//! token is followed directly by a binary write frame with no terminator.

use {
    crate::error::{Error, Result},
    std::{fmt, str::FromStr},
};

/// Token that prefixes every write frame.
pub const SEND_WRITE_TOKEN: &str = "upgrade.keyscanner.sendWrite ";

/// Which half of the keyboard to upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Side {
    /// Left half (default).
    #[default]
    Left,
    /// Right half.
    Right,
}

impl Side {
    /// Get the side from a string name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "left" | "l" => Some(Self::Left),
            "right" | "r" => Some(Self::Right),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Left => write!(f, "left"),
            Self::Right => write!(f, "right"),
        }
    }
}

impl FromStr for Side {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s).ok_or_else(|| Error::Config(format!("unknown side '{s}'")))
    }
}

/// Upgrade commands understood by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Arm the upgrade; the operator has to press the button next.
    Start,
    /// Ask whether the button was held long enough to enter upgrade mode.
    IsReady,
    /// Reboot one side into its bootloader.
    Begin(Side),
    /// Ask the bootloader for its flash layout.
    GetInfo,
    /// Write one frame.
    SendWrite,
    /// Leave the bootloader and boot the new image.
    Finish,
}

impl Command {
    /// Command text without terminator.
    pub fn name(self) -> &'static str {
        match self {
            Self::Start => "upgrade.keyscanner.start",
            Self::IsReady => "upgrade.isReady",
            Self::Begin(Side::Left) => "upgrade.keyscanner.beginLeft",
            Self::Begin(Side::Right) => "upgrade.keyscanner.beginRight",
            Self::GetInfo => "upgrade.keyscanner.getInfo",
            Self::SendWrite => "upgrade.keyscanner.sendWrite",
            Self::Finish => "upgrade.keyscanner.finish",
        }
    }

    /// Number of reply lines the device sends for this command.
    pub fn ack_lines(self) -> usize {
        match self {
            Self::Start => 1,
            Self::IsReady | Self::Begin(_) | Self::GetInfo | Self::SendWrite | Self::Finish => 2,
        }
    }

    /// Whether a `false` reply means the device refused the command.
    ///
    /// `isReady` answers `false` while the button has not been held yet.
    pub fn can_be_rejected(self) -> bool {
        !matches!(self, Self::IsReady)
    }

    /// Bytes to put on the wire for a plain command line.
    pub fn line(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.name().len() + 1);
        buf.extend_from_slice(self.name().as_bytes());
        buf.push(b'\n');
        buf
    }

    /// Bytes to put on the wire for a write: token immediately followed by
    /// the encoded frame.
    pub fn send_write(frame: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SEND_WRITE_TOKEN.len() + frame.len());
        buf.extend_from_slice(SEND_WRITE_TOKEN.as_bytes());
        buf.extend_from_slice(frame);
        buf
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bootloader layout of the key scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceInfo {
    /// Hardware revision.
    pub hardware_version: u32,
    /// Base address of the program area; every write is relative to it.
    pub flash_start: u32,
    /// Version of the program currently flashed.
    pub program_version: u32,
    /// CRC of the program currently flashed.
    pub program_crc: u32,
}

impl Default for DeviceInfo {
    /// Layout of the shipping key scanner bootloader.
    fn default() -> Self {
        Self {
            hardware_version: 1,
            flash_start: 0x5000,
            program_version: 0x0100_0001,
            program_crc: 0xE178_A6B3,
        }
    }
}

impl DeviceInfo {
    /// Parse a `getInfo` reply line.
    ///
    /// The line holds whitespace separated decimal integers, in order:
    /// hardware version, flash start, program version and program CRC.
    /// Trailing fields are ignored.
    pub fn parse(line: &str) -> Result<Self> {
        let fields = line
            .split_whitespace()
            .map(|field| {
                field.parse::<u32>().map_err(|e| {
                    Error::UnexpectedAcknowledgment(format!(
                        "getInfo field '{field}' is not a number: {e}"
                    ))
                })
            })
            .collect::<Result<Vec<u32>>>()?;

        match fields[..] {
            [hardware_version, flash_start, program_version, program_crc, ..] => Ok(Self {
                hardware_version,
                flash_start,
                program_version,
                program_crc,
            }),
            _ => Err(Error::UnexpectedAcknowledgment(format!(
                "getInfo reply has {} fields, expected at least 4: '{}'",
                fields.len(),
                line.trim()
            ))),
        }
    }
}

/// Whether an acknowledgment line is the device's failure marker.
pub fn is_rejection(line: &str) -> bool {
    line.trim() == "false"
}

/// Whether an `isReady` reply says the device entered upgrade mode.
pub fn is_ready(line: &str) -> bool {
    line.trim() == "true"
}
