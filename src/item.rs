//! 재조립 버퍼 (수신측)
//!
//! 수신 프로세스당 하나, 진행 중인 아이템은 최대 하나.
//! (name, digest, count)가 바뀌면 이전 상태를 버리고 다시 시작한다.

use std::time::Instant;

use bytes::Bytes;

use crate::compress::Compressor;
use crate::digest::Digest;
use crate::message::FragmentHeader;
use crate::{Error, Result};

/// 조각 삽입 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    /// 새 조각 저장
    Stored,
    /// 같은 바이트의 중복 조각 (UDP 재전송)
    Duplicate,
}

/// 진행 중인 데이터 아이템
#[derive(Debug, Default)]
pub struct DataItem {
    /// 아이템 이름
    pub name: String,

    /// 압축 전 전체 다이제스트 (송신측 제공)
    pub digest: Option<Digest>,

    /// 조각 슬롯 (인덱스별 압축 데이터)
    pieces: Vec<Option<Bytes>>,

    /// 채워진 슬롯 수
    loaded: usize,

    /// 압축 바이트 수 (완료 시 기록)
    pub compressed_bytes: usize,

    /// 해제 후 바이트 수 (완료 시 기록)
    pub uncompressed_bytes: usize,

    /// 첫 조각 수신 시각
    pub started_at: Option<Instant>,
}

impl DataItem {
    pub fn new() -> Self {
        Self::default()
    }

    /// 헤더가 현재 아이템과 같은 정체성인지
    pub fn matches(&self, header: &FragmentHeader) -> bool {
        self.digest == Some(header.digest)
            && self.name == header.name
            && self.pieces.len() == header.count
    }

    /// 헤더 기준으로 재초기화 (이전 부분 상태 폐기)
    pub fn reset_for(&mut self, header: &FragmentHeader) {
        self.name = header.name.clone();
        self.digest = Some(header.digest);
        self.pieces = vec![None; header.count];
        self.loaded = 0;
        self.compressed_bytes = 0;
        self.uncompressed_bytes = 0;
        self.started_at = Some(Instant::now());
    }

    /// 비우기 (완료 후)
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        self.digest.is_none()
    }

    /// 조각 수
    pub fn count(&self) -> usize {
        self.pieces.len()
    }

    /// 채워진 조각 수
    pub fn loaded(&self) -> usize {
        self.loaded
    }

    /// 모든 슬롯이 채워졌는지
    pub fn is_loaded(&self) -> bool {
        !self.pieces.is_empty() && self.loaded == self.pieces.len()
    }

    /// 조각 저장
    ///
    /// 이미 다른 바이트가 있는 슬롯은 덮어쓰지 않고 변조 에러를 반환한다.
    pub fn insert(&mut self, index: usize, data: Bytes) -> Result<Insert> {
        let slot = self
            .pieces
            .get_mut(index)
            .ok_or_else(|| Error::MalformedPacket(format!("index {} out of range", index)))?;

        match slot {
            Some(existing) if *existing == data => Ok(Insert::Duplicate),
            Some(_) => Err(Error::FragmentAltered {
                name: self.name.clone(),
                index,
            }),
            None => {
                *slot = Some(data);
                self.loaded += 1;
                Ok(Insert::Stored)
            }
        }
    }

    /// 조각을 이어붙여 해제하고 전체 다이제스트 검증
    pub fn assemble(&mut self, compressor: &dyn Compressor) -> Result<Vec<u8>> {
        let expected = self
            .digest
            .ok_or_else(|| Error::MalformedPacket("no item in progress".into()))?;
        if !self.is_loaded() {
            return Err(Error::MalformedPacket(format!(
                "item {} incomplete: {}/{}",
                self.name,
                self.loaded,
                self.pieces.len()
            )));
        }

        let compressed_len: usize = self.pieces.iter().flatten().map(|p| p.len()).sum();
        let mut compressed = Vec::with_capacity(compressed_len);
        for piece in self.pieces.iter().flatten() {
            compressed.extend_from_slice(piece);
        }

        let data = compressor
            .uncompress(&compressed)
            .map_err(|e| Error::Compression(e.to_string()))?;

        self.compressed_bytes = compressed_len;
        self.uncompressed_bytes = data.len();

        let got = Digest::of(&data);
        if got != expected {
            return Err(Error::ItemDigestMismatch {
                name: self.name.clone(),
                expected,
                got,
            });
        }

        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::ZlibCompressor;
    use crate::fragment::FragmentBuilder;

    fn fragments(name: &str, data: &[u8], payload_size: usize) -> Vec<(FragmentHeader, Bytes)> {
        let compressed = ZlibCompressor::default().compress(data).unwrap();
        FragmentBuilder::new(payload_size)
            .build(name, &Digest::of(data), &compressed)
            .iter()
            .map(|p| {
                let header = FragmentHeader::parse(&p.payload).unwrap();
                let body = p.payload.slice(header.data_offset..);
                (header, body)
            })
            .collect()
    }

    #[test]
    fn test_out_of_order_assembly() {
        let data = "The quick brown fox jumps over the lazy dog!".repeat(50);
        let mut frags = fragments("fox", data.as_bytes(), 16);
        assert!(frags.len() >= 3);
        frags.reverse();

        let mut item = DataItem::new();
        for (header, body) in &frags {
            if !item.matches(header) {
                item.reset_for(header);
            }
            assert_eq!(item.insert(header.index, body.clone()).unwrap(), Insert::Stored);
        }

        assert!(item.is_loaded());
        let out = item.assemble(&ZlibCompressor::default()).unwrap();
        assert_eq!(out, data.as_bytes());
        assert_eq!(item.uncompressed_bytes, data.len());
        assert!(item.compressed_bytes < data.len());
    }

    #[test]
    fn test_duplicate_accepted_alteration_rejected() {
        let frags = fragments("x", &[1u8; 4000], 8);
        let (header, body) = &frags[0];

        let mut item = DataItem::new();
        item.reset_for(header);
        assert_eq!(item.insert(0, body.clone()).unwrap(), Insert::Stored);
        assert_eq!(item.insert(0, body.clone()).unwrap(), Insert::Duplicate);
        assert_eq!(item.loaded(), 1);

        let tampered = Bytes::from_static(b"tampered");
        assert!(matches!(
            item.insert(0, tampered),
            Err(Error::FragmentAltered { index: 0, .. })
        ));
        assert_eq!(item.pieces[0].as_ref(), Some(body));
    }

    #[test]
    fn test_identity_change_resets() {
        let first = fragments("a", b"first item contents", 4);
        let second = fragments("a", b"second item, different", 4);

        let mut item = DataItem::new();
        item.reset_for(&first[0].0);
        item.insert(first[0].0.index, first[0].1.clone()).unwrap();
        assert!(item.matches(&first[1].0));
        assert!(!item.matches(&second[0].0));

        item.reset_for(&second[0].0);
        assert_eq!(item.loaded(), 0);
        assert_eq!(item.count(), second.len());
    }

    #[test]
    fn test_digest_mismatch_detected() {
        let frags = fragments("a", b"payload", 1024);
        let (header, body) = &frags[0];
        let mut forged = header.clone();
        forged.digest = Digest::of(b"something else");

        let mut item = DataItem::new();
        item.reset_for(&forged);
        item.insert(0, body.clone()).unwrap();
        assert!(matches!(
            item.assemble(&ZlibCompressor::default()),
            Err(Error::ItemDigestMismatch { .. })
        ));
    }
}
