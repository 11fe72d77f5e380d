use crate::error::{Error, Result};

/// Per-block compression, recorded in each block trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CompressionType {
    #[default]
    None = 0,
    Lz4 = 1,
}

impl CompressionType {
    pub fn from_u8(b: u8) -> Result<Self> {
        match b {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Lz4),
            other => Err(Error::corruption(format!("unknown compression type {other}"))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CompressionType::None => "none",
            CompressionType::Lz4 => "lz4",
        }
    }
}

/// Compresses `raw` with `kind`, falling back to storing it uncompressed
/// when the codec saves less than 1/8 of the input.
pub fn compress_block(raw: &[u8], kind: CompressionType) -> (CompressionType, Option<Vec<u8>>) {
    match kind {
        CompressionType::None => (CompressionType::None, None),
        CompressionType::Lz4 => {
            let compressed = lz4_flex::compress_prepend_size(raw);
            if compressed.len() < raw.len() - raw.len() / 8 {
                (CompressionType::Lz4, Some(compressed))
            } else {
                (CompressionType::None, None)
            }
        }
    }
}

pub fn decompress_block(contents: Vec<u8>, kind: CompressionType) -> Result<Vec<u8>> {
    match kind {
        CompressionType::None => Ok(contents),
        CompressionType::Lz4 => lz4_flex::decompress_size_prepended(&contents)
            .map_err(|e| Error::corruption(format!("lz4 block: {e}"))),
    }
}
