//! Firmware image loading.
//!
//! Images are distributed either as raw binaries or as hex text: a single
//! contiguous run of hex digit pairs, one pair per byte. Surrounding
//! whitespace (a trailing newline, typically) is ignored.

pub mod seal;

use {
    crate::{
        error::{Error, Result},
        protocol::frame::crc32,
    },
    log::debug,
    seal::Seal,
    std::{fs, path::Path, str::FromStr},
};

/// On-disk encoding of an image file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageFormat {
    /// Pick from the file extension: `.bin` is raw, anything else hex.
    #[default]
    Auto,
    /// Hex text.
    Hex,
    /// Raw bytes.
    Binary,
}

impl ImageFormat {
    /// Resolve `Auto` against a file path.
    pub fn resolve(self, path: &Path) -> Self {
        match self {
            Self::Auto => {
                let is_bin = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("bin"));
                if is_bin { Self::Binary } else { Self::Hex }
            },
            other => other,
        }
    }
}

impl FromStr for ImageFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "hex" => Ok(Self::Hex),
            "bin" | "binary" | "raw" => Ok(Self::Binary),
            _ => Err(Error::Config(format!("unknown image format '{s}'"))),
        }
    }
}

/// An immutable firmware image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Wrap raw image bytes.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    /// Decode hex text into an image.
    pub fn from_hex_str(text: &str) -> Result<Self> {
        decode_hex(text.trim()).map(Self::from_bytes)
    }

    /// Load an image file.
    ///
    /// Empty files are rejected: there is nothing to upgrade.
    pub fn from_file<P: AsRef<Path>>(path: P, format: ImageFormat) -> Result<Self> {
        let path = path.as_ref();
        let image = match format.resolve(path) {
            ImageFormat::Binary => Self::from_bytes(fs::read(path)?),
            _ => Self::from_hex_str(&fs::read_to_string(path)?)?,
        };

        if image.is_empty() {
            return Err(Error::InvalidInput(format!(
                "image {} is empty",
                path.display()
            )));
        }

        debug!(
            "Loaded {} byte image from {}",
            image.len(),
            path.display()
        );
        Ok(image)
    }

    /// Image bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Image length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// CRC-32 over the whole image.
    pub fn crc32(&self) -> u32 {
        crc32(&self.data)
    }

    /// Seal header at the start of the image, if it is long enough.
    pub fn seal(&self) -> Option<Seal> {
        Seal::parse(&self.data)
    }
}

impl AsRef<[u8]> for FirmwareImage {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}

fn decode_hex(text: &str) -> Result<Vec<u8>> {
    let digits = text.as_bytes();
    if digits.len() % 2 != 0 {
        return Err(Error::InvalidInput(format!(
            "hex image has an odd number of digits ({})",
            digits.len()
        )));
    }

    digits
        .chunks_exact(2)
        .enumerate()
        .map(|(i, pair)| {
            let digit_at = |pos: usize| {
                hex_value(pair[pos]).ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "invalid hex digit {:?} at offset {}",
                        char::from(pair[pos]),
                        i * 2 + pos
                    ))
                })
            };
            Ok((digit_at(0)? << 4) | digit_at(1)?)
        })
        .collect()
}
