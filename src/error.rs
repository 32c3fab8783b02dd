//! 에러 타입 정의

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::digest::Digest;

/// UDPX 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("암호화 에러: {0}")]
    Crypto(#[from] CryptoError),

    #[error("압축 에러: {0}")]
    Compression(String),

    #[error("잘못된 설정: {0}")]
    InvalidConfig(String),

    #[error("잘못된 아이템 이름: {0}")]
    InvalidName(String),

    #[error("응답 타임아웃")]
    Timeout,

    #[error("연결 종료")]
    ConnectionClosed,

    #[error("잘못된 패킷: {0}")]
    MalformedPacket(String),

    #[error("알 수 없는 패킷 헤더")]
    UnknownPacket,

    #[error("조각 변조 감지: name={name}, index={index}")]
    FragmentAltered { name: String, index: usize },

    #[error("아이템 해시 불일치: name={name}, expected={expected}, got={got}")]
    ItemDigestMismatch {
        name: String,
        expected: Digest,
        got: Digest,
    },

    #[error("전송 후 해시 불일치: name={name}, expected={expected}, got={}", fmt_remote(.got))]
    HashMismatch {
        name: String,
        expected: Digest,
        got: Option<Digest>,
    },

    #[error("미전달 패킷: name={name}, {undelivered}/{total}")]
    UndeliveredPackets {
        name: String,
        undelivered: usize,
        total: usize,
    },

    #[error("콜백 에러: {0}")]
    Callback(String),
}

fn fmt_remote(got: &Option<Digest>) -> String {
    match got {
        Some(digest) => digest.to_string(),
        None => crate::message::NOT_FOUND.to_string(),
    }
}

impl Error {
    /// 재시도 예산 안에서 복구 가능한 네트워크 에러인지
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Timeout | Error::Io(_))
    }

    /// 소켓이 닫혀서 발생한 에러인지 (정상 종료 경로)
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::ConnectionClosed)
    }

    /// 패킷 단위로 조용히 버려야 하는 에러인지
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Error::MalformedPacket(_) | Error::UnknownPacket | Error::Crypto(_)
        )
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert!(Error::Timeout.is_transient());
        assert!(Error::ConnectionClosed.is_closed());
        assert!(!Error::ConnectionClosed.is_transient());
        assert!(Error::MalformedPacket("sn".into()).is_malformed());
        assert!(!Error::InvalidConfig("x".into()).is_transient());
    }

    #[test]
    fn test_hash_mismatch_display() {
        let err = Error::HashMismatch {
            name: "a".into(),
            expected: Digest::of(b"a"),
            got: None,
        };
        assert!(err.to_string().contains("not_found"));
    }
}
