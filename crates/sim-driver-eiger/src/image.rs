//! Simulated image frames.
//!
//! Every acquired frame carries the same payload: an all-zero frame of the
//! detector shape in bitshuffle-LZ4 framing (`bs16-lz4<`), the encoding a
//! real Eiger uses for 16-bit images. The framing is
//!
//! ```text
//! u64 BE  uncompressed size in bytes
//! u32 BE  block size in bytes
//! repeat: u32 BE compressed length, LZ4 block
//! trailing bytes of the last (< 8 element) partial block, uncompressed
//! ```
//!
//! Bitshuffling a zero buffer is the identity, so every full block compresses
//! to the same bytes and only needs compressing once.

use bytes::{BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha256};

/// Bitshuffle block size in elements.
const BLOCK_ELEMENTS: usize = 8192 / 2;

/// Encoding tag of simulated frames.
pub const IMAGE_ENCODING: &str = "bs16-lz4<";
/// Pixel type of simulated frames.
pub const IMAGE_DTYPE: &str = "uint16";

/// Compress `elements` zero values of `elem_size` bytes in bitshuffle-LZ4 framing.
pub fn bslz4_zeros(elements: usize, elem_size: usize) -> Bytes {
    let block_bytes = BLOCK_ELEMENTS * elem_size;
    let full_blocks = elements / BLOCK_ELEMENTS;
    let remainder = elements % BLOCK_ELEMENTS;
    let tail_elements = remainder - remainder % 8;
    let leftover = remainder % 8;

    let full_block = lz4_flex::block::compress(&vec![0u8; block_bytes]);
    let tail_block = (tail_elements > 0)
        .then(|| lz4_flex::block::compress(&vec![0u8; tail_elements * elem_size]));

    let capacity = 12
        + full_blocks * (4 + full_block.len())
        + tail_block.as_ref().map_or(0, |b| 4 + b.len())
        + leftover * elem_size;
    let mut out = BytesMut::with_capacity(capacity);

    out.put_u64((elements * elem_size) as u64);
    out.put_u32(block_bytes as u32);
    for _ in 0..full_blocks {
        out.put_u32(full_block.len() as u32);
        out.put_slice(&full_block);
    }
    if let Some(tail) = &tail_block {
        out.put_u32(tail.len() as u32);
        out.put_slice(tail);
    }
    out.put_bytes(0, leftover * elem_size);
    out.freeze()
}

/// Cached payload of a zero frame for one detector shape.
#[derive(Debug, Clone)]
pub struct FrameBlob {
    shape: (u64, u64),
    data: Bytes,
    hash: String,
}

impl FrameBlob {
    pub fn zeros(shape: (u64, u64)) -> Self {
        let elements = (shape.0 * shape.1) as usize;
        let data = bslz4_zeros(elements, 2);
        let hash = format!("{:x}", Sha256::digest(&data));
        Self { shape, data, hash }
    }

    pub fn shape(&self) -> (u64, u64) {
        self.shape
    }
}

/// One acquired frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Frame index within the series.
    pub index: u64,
    /// Content fingerprint (SHA-256 of `data`, hex).
    pub hash: String,
    pub dtype: String,
    /// `(width, height)` in pixels.
    pub shape: (u64, u64),
    pub encoding: String,
    /// Compressed pixel data.
    pub data: Bytes,
}

impl Image {
    /// Wrap a cached zero frame for the given index.
    pub fn dummy(index: u64, blob: &FrameBlob) -> Self {
        Self {
            index,
            hash: blob.hash.clone(),
            dtype: IMAGE_DTYPE.to_string(),
            shape: blob.shape,
            encoding: IMAGE_ENCODING.to_string(),
            data: blob.data.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_u32(data: &[u8], at: usize) -> usize {
        u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]) as usize
    }

    /// Decode bitshuffle-LZ4 framing produced by [`bslz4_zeros`].
    fn decode(data: &[u8], elem_size: usize) -> Vec<u8> {
        let total = u64::from_be_bytes(data[0..8].try_into().unwrap()) as usize;
        let block_bytes = read_u32(data, 8);
        let mut out = Vec::with_capacity(total);
        let mut at = 12;
        while total - out.len() >= 8 * elem_size {
            let expected = block_bytes.min((total - out.len()) / (8 * elem_size) * 8 * elem_size);
            let len = read_u32(data, at);
            at += 4;
            let block = lz4_flex::block::decompress(&data[at..at + len], expected).unwrap();
            at += len;
            out.extend_from_slice(&block);
        }
        out.extend_from_slice(&data[at..]);
        out
    }

    #[test]
    fn test_bslz4_round_trip_with_partial_blocks() {
        // 2 full blocks, a 16 element tail block and 3 leftover elements
        let elements = BLOCK_ELEMENTS * 2 + 19;
        let data = bslz4_zeros(elements, 2);
        let decoded = decode(&data, 2);
        assert_eq!(decoded.len(), elements * 2);
        assert!(decoded.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_full_frame_is_small() {
        let blob = FrameBlob::zeros((4148, 4362));
        assert!(blob.data.len() < 1 << 20);
        assert_eq!(
            u64::from_be_bytes(blob.data[0..8].try_into().unwrap()),
            4148 * 4362 * 2
        );
    }

    #[test]
    fn test_dummy_image_metadata() {
        let blob = FrameBlob::zeros((64, 32));
        let image = Image::dummy(7, &blob);
        assert_eq!(image.index, 7);
        assert_eq!(image.shape, (64, 32));
        assert_eq!(image.dtype, "uint16");
        assert_eq!(image.encoding, "bs16-lz4<");
        assert_eq!(image.hash.len(), 64);
        assert_eq!(image.hash, Image::dummy(8, &blob).hash);
    }
}
