//! 콘텐츠 다이제스트 (SHA-256)
//!
//! - 아이템 전체 해시: 중복 전송 방지 + 전송 후 검증
//! - 패킷 해시: 조각 단위 확인(confirmation)

use std::fmt;

use sha2::{Digest as _, Sha256};

use crate::{Error, Result};

/// 다이제스트 크기 (바이트)
pub const DIGEST_SIZE: usize = 32;

/// 고정 길이 SHA-256 지문
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; DIGEST_SIZE]);

impl Digest {
    /// 바이트열의 다이제스트 계산
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    pub fn from_bytes(bytes: [u8; DIGEST_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    /// 소문자 hex 문자열
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// hex 문자열 파싱 (정확히 DIGEST_SIZE 바이트여야 함)
    pub fn from_hex(s: &str) -> Result<Self> {
        let raw = hex::decode(s)
            .map_err(|e| Error::MalformedPacket(format!("digest hex: {}", e)))?;
        let bytes: [u8; DIGEST_SIZE] = raw.try_into().map_err(|raw: Vec<u8>| {
            Error::MalformedPacket(format!(
                "digest length: expected {} bytes, got {}",
                DIGEST_SIZE,
                raw.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", &self.to_hex()[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        let digest = Digest::of(b"");
        assert_eq!(
            digest.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_hex_parse() {
        let digest = Digest::of(b"The quick brown fox");
        assert_eq!(Digest::from_hex(&digest.to_hex()).unwrap(), digest);
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert!(Digest::from_hex("abcd").is_err());
        assert!(Digest::from_hex("zz").is_err());
        let too_long = format!("{}00", Digest::of(b"x").to_hex());
        assert!(Digest::from_hex(&too_long).is_err());
    }
}
