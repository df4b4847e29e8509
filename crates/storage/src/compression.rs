//! Byte-stream compression codec for stored resources.
//!
//! Resources marked `compressed` are stored as zstd on disk. The codec is
//! deliberately small: encode on the way in, decode on the way out. The
//! recorded checksum and size always describe the on-disk (compressed)
//! bytes, so verification never needs to decompress.

use async_compression::tokio::bufread::ZstdDecoder;
use async_compression::tokio::write::ZstdEncoder;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};

/// Compress a buffer with zstd at the default level.
pub async fn compress(data: &[u8]) -> std::io::Result<Bytes> {
    let mut encoder = ZstdEncoder::new(Vec::new());
    encoder.write_all(data).await?;
    encoder.shutdown().await?;
    Ok(Bytes::from(encoder.into_inner()))
}

/// Decompress a zstd buffer.
pub async fn decompress(data: &[u8]) -> std::io::Result<Bytes> {
    let mut decoder = ZstdDecoder::new(BufReader::new(data));
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).await?;
    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_compress_roundtrip() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let compressed = compress(&data).await.unwrap();
        assert!(compressed.len() < data.len());

        let restored = decompress(&compressed).await.unwrap();
        assert_eq!(restored.as_ref(), data.as_slice());
    }

    #[tokio::test]
    async fn test_decompress_rejects_garbage() {
        assert!(decompress(b"not a zstd frame").await.is_err());
    }
}
