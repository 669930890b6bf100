//! Image info command implementation.

use {
    crate::config::Config,
    anyhow::{Context, Result},
    console::style,
    scanflash::{CHUNK_SIZE, Chunker, FirmwareImage, ImageFormat, Seal},
    std::path::Path,
};

/// How an image maps onto the device's flash.
struct ImageLayout {
    size: usize,
    crc32: u32,
    chunks: usize,
    first_address: Option<u32>,
    last_address: Option<u32>,
    seal: Option<Seal>,
}

impl ImageLayout {
    fn new(image: &FirmwareImage, flash_start: u32) -> Result<Self> {
        let chunker = Chunker::new(image.as_bytes(), CHUNK_SIZE, flash_start)
            .context("image does not fit in the address space")?;

        Ok(Self {
            size: image.len(),
            crc32: image.crc32(),
            chunks: chunker.len(),
            first_address: chunker
                .chunks()
                .next()
                .map(|c| c.address),
            last_address: chunker
                .chunks()
                .last()
                .map(|c| c.address),
            seal: image.seal(),
        })
    }

    fn to_json(&self, path: &Path) -> serde_json::Value {
        let seal = self.seal.as_ref().map(|s| {
            serde_json::json!({
                "device_id": s.header.device_id,
                "version": s.header.version,
                "size": s.header.size,
                "crc": format!("{:#010x}", s.header.crc),
                "program_start": s.program_start,
                "program_size": s.program_size,
                "program_crc": format!("{:#010x}", s.program_crc),
                "program_version": s.program_version,
            })
        });

        serde_json::json!({
            "ok": true,
            "data": {
                "path": path.display().to_string(),
                "size": self.size,
                "crc32": format!("{:#010x}", self.crc32),
                "chunk_size": CHUNK_SIZE,
                "chunks": self.chunks,
                "first_address": self.first_address,
                "last_address": self.last_address,
                "seal": seal,
            }
        })
    }
}

/// Info command implementation.
pub(crate) fn cmd_info(
    path: &Path,
    format: ImageFormat,
    json: bool,
    flash_start: Option<u32>,
    config: &Config,
) -> Result<()> {
    let image = FirmwareImage::from_file(path, format)
        .with_context(|| format!("failed to load image {}", path.display()))?;
    let flash_start = flash_start.unwrap_or_else(|| config.device.device_info().flash_start);
    let layout = ImageLayout::new(&image, flash_start)?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&layout.to_json(path))?
        );
        return Ok(());
    }

    eprintln!(
        "\n{}",
        style("Image Information")
            .bold()
            .underlined()
    );
    eprintln!("  {}: {}", style("Path").cyan(), path.display());
    eprintln!("  {}: {} bytes", style("Size").cyan(), layout.size);
    eprintln!("  {}: {:#010x}", style("CRC-32").cyan(), layout.crc32);
    eprintln!(
        "  {}: {} x {CHUNK_SIZE} bytes",
        style("Chunks").cyan(),
        layout.chunks
    );
    if let (Some(first), Some(last)) = (layout.first_address, layout.last_address) {
        eprintln!(
            "  {}: 0x{first:08X} .. 0x{last:08X}",
            style("Addresses").cyan()
        );
    }

    match &layout.seal {
        Some(seal) => {
            eprintln!("\n{}", style("Seal").bold().underlined());
            eprintln!(
                "  {}: {} (version {}, {} bytes)",
                style("Device").cyan(),
                seal.header.device_id,
                seal.header.version,
                seal.header.size
            );
            eprintln!(
                "  {}: 0x{:08X}, {} bytes",
                style("Program").cyan(),
                seal.program_start,
                seal.program_size
            );
            eprintln!(
                "  {}: {:#x}",
                style("Program version").cyan(),
                seal.program_version
            );
            eprintln!(
                "  {}: {:#010x}",
                style("Program CRC").cyan(),
                seal.program_crc
            );
        },
        None => eprintln!("\n  {}", style("No seal header").dim()),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_of_600_byte_image() {
        let image = FirmwareImage::from_bytes(vec![0u8; 600]);
        let layout = ImageLayout::new(&image, 0x5000).unwrap();
        assert_eq!(layout.chunks, 3);
        assert_eq!(layout.first_address, Some(0x5000));
        assert_eq!(layout.last_address, Some(0x5200));
    }

    #[test]
    fn test_layout_json_shape() {
        let image = FirmwareImage::from_bytes(vec![0xFFu8; 16]);
        let layout = ImageLayout::new(&image, 0x5000).unwrap();
        let value = layout.to_json(Path::new("fw.hex"));

        assert_eq!(value["ok"], true);
        assert_eq!(value["data"]["size"], 16);
        assert_eq!(value["data"]["chunks"], 1);
        assert_eq!(value["data"]["first_address"], 0x5000);
        assert!(value["data"]["seal"].is_null());
    }

    #[test]
    fn test_layout_rejects_overflowing_base() {
        let image = FirmwareImage::from_bytes(vec![0u8; 600]);
        assert!(ImageLayout::new(&image, u32::MAX - 16).is_err());
    }
}
