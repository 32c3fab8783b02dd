//! 압축 모듈
//!
//! 아이템은 조각으로 나누기 전에 통째로 압축된다.
//! 수신측은 모든 조각이 모이면 한 번에 해제한다.

use std::io::{self, Read, Write};

use flate2::read::{DeflateDecoder, ZlibDecoder};
use flate2::write::{DeflateEncoder, ZlibEncoder};
use flate2::Compression;

use crate::MAX_ITEM_LEN;

/// 압축기 인터페이스 (round-trip 정확성 필수)
pub trait Compressor: Send + Sync {
    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>>;

    fn uncompress(&self, data: &[u8]) -> io::Result<Vec<u8>>;

    /// 로그용 이름
    fn name(&self) -> &'static str;
}

/// 해제 결과를 `limit` 바이트로 제한해서 읽기
fn read_capped(reader: impl Read, capacity: usize, limit: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(capacity.min(limit));
    reader.take(limit as u64 + 1).read_to_end(&mut out)?;
    if out.len() > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("uncompressed size exceeds {} bytes", limit),
        ));
    }
    Ok(out)
}

/// zlib 압축기 (기본값)
#[derive(Debug, Clone, Copy)]
pub struct ZlibCompressor {
    level: Compression,
}

impl ZlibCompressor {
    /// 압축 레벨 0 ~ 9
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Default for ZlibCompressor {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl Compressor for ZlibCompressor {
    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), self.level);
        encoder.write_all(data)?;
        encoder.finish()
    }

    fn uncompress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        read_capped(ZlibDecoder::new(data), data.len() * 2, MAX_ITEM_LEN)
    }

    fn name(&self) -> &'static str {
        "zlib"
    }
}

/// raw DEFLATE 압축기 (zlib 헤더/체크섬 없음)
#[derive(Debug, Clone, Copy, Default)]
pub struct DeflateCompressor {
    level: Compression,
}

impl DeflateCompressor {
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Compressor for DeflateCompressor {
    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut encoder = DeflateEncoder::new(Vec::with_capacity(data.len() / 2), self.level);
        encoder.write_all(data)?;
        encoder.finish()
    }

    fn uncompress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        read_capped(DeflateDecoder::new(data), data.len() * 2, MAX_ITEM_LEN)
    }

    fn name(&self) -> &'static str {
        "deflate"
    }
}

/// 무압축 (이미 압축된 데이터, 테스트용)
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompression;

impl Compressor for NoCompression {
    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn uncompress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        "The quick brown fox jumps over the lazy dog! "
            .repeat(100)
            .into_bytes()
    }

    #[test]
    fn test_zlib_shrinks_text() {
        let compressor = ZlibCompressor::default();
        let data = sample();
        let compressed = compressor.compress(&data).unwrap();

        assert!(compressed.len() < data.len() / 4);
        assert_eq!(compressor.uncompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_deflate_and_empty_input() {
        let compressor = DeflateCompressor::new(6);
        assert_eq!(
            compressor.uncompress(&compressor.compress(&sample()).unwrap()).unwrap(),
            sample()
        );

        let zlib = ZlibCompressor::new(9);
        let empty = zlib.compress(&[]).unwrap();
        assert!(!empty.is_empty());
        assert!(zlib.uncompress(&empty).unwrap().is_empty());
    }

    #[test]
    fn test_corrupted_stream_rejected() {
        let compressor = ZlibCompressor::default();
        let mut compressed = compressor.compress(&sample()).unwrap();
        compressed.truncate(compressed.len() / 2);
        assert!(compressor.uncompress(&compressed).is_err());
        assert!(compressor.uncompress(b"definitely not zlib").is_err());
    }

    #[test]
    fn test_uncompressed_size_capped() {
        let data = sample();
        let compressed = ZlibCompressor::default().compress(&data).unwrap();

        let exact = read_capped(ZlibDecoder::new(&compressed[..]), 0, data.len()).unwrap();
        assert_eq!(exact, data);

        let err = read_capped(ZlibDecoder::new(&compressed[..]), 0, data.len() - 1).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
