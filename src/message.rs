//! 프로토콜 메시지 정의
//!
//! 모든 평문 데이터그램은 고정 ASCII 태그로 시작한다.
//!
//! ```text
//! HREQ:<name>                                                해시 요청
//! HREP:<hex-digest> | HREP:not_found                         해시 응답
//! FRAG:name:<name> hash:<hex> sn:<n> count:<m>\n<bytes>      조각
//! CONF:<hex-digest-of-received-datagram>                     조각 확인
//! BADH:invalid packet header                                 알 수 없는 헤더
//! ```
//!
//! UDP가 메시지 경계를 보존하므로 길이 prefix는 없다.

use bytes::Bytes;

use crate::digest::{Digest, DIGEST_SIZE};
use crate::{Error, Result};

/// 해시 요청 태그
pub const TAG_HASH_REQUEST: &[u8] = b"HREQ:";

/// 해시 응답 태그
pub const TAG_HASH_REPLY: &[u8] = b"HREP:";

/// 조각 태그
pub const TAG_FRAGMENT: &[u8] = b"FRAG:";

/// 조각 확인 태그
pub const TAG_CONFIRM: &[u8] = b"CONF:";

/// 잘못된 헤더 응답 태그
pub const TAG_INVALID: &[u8] = b"BADH:";

/// 해시 응답에서 아이템 없음 표시
pub const NOT_FOUND: &str = "not_found";

const INVALID_HEADER_TEXT: &str = "invalid packet header";

/// 아이템 이름 최대 길이 (바이트)
pub const MAX_NAME_LEN: usize = 128;

/// 아이템당 최대 조각 수
pub const MAX_FRAGMENT_COUNT: usize = 1 << 20;

/// 조각 헤더 최대 길이 (태그 + 필드 + 개행)
pub const MAX_HEADER_LEN: usize = TAG_FRAGMENT.len()
    + "name:".len()
    + MAX_NAME_LEN
    + " hash:".len()
    + DIGEST_SIZE * 2
    + " sn:".len()
    + 10
    + " count:".len()
    + 10
    + 1;

/// 아이템 이름 검사: 비어있지 않고, 개행 없고, 길이 제한 이하
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidName("empty name".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidName(format!(
            "name is {} bytes, max {}",
            name.len(),
            MAX_NAME_LEN
        )));
    }
    if name.contains('\n') || name.contains('\r') {
        return Err(Error::InvalidName("name contains a line break".into()));
    }
    Ok(())
}

/// 조각 헤더 (파싱 결과)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentHeader {
    /// 바이너리 페이로드 시작 오프셋
    pub data_offset: usize,

    /// 아이템 이름
    pub name: String,

    /// 압축 전 아이템 전체 다이제스트
    pub digest: Digest,

    /// 조각 인덱스 (0부터)
    pub index: usize,

    /// 전체 조각 수 (1 이상)
    pub count: usize,
}

impl FragmentHeader {
    /// 헤더 줄 생성 (태그 포함, 개행으로 끝남)
    pub fn encode(name: &str, digest: &Digest, index: usize, count: usize) -> Vec<u8> {
        let line = format!(
            "name:{} hash:{} sn:{} count:{}\n",
            name,
            digest.to_hex(),
            index + 1,
            count
        );

        let mut buf = Vec::with_capacity(TAG_FRAGMENT.len() + line.len());
        buf.extend_from_slice(TAG_FRAGMENT);
        buf.extend_from_slice(line.as_bytes());
        buf
    }

    /// 평문 데이터그램에서 헤더 파싱 (태그 포함 전체 버퍼)
    pub fn parse(datagram: &[u8]) -> Result<Self> {
        let body = datagram
            .strip_prefix(TAG_FRAGMENT)
            .ok_or(Error::UnknownPacket)?;

        let newline = body
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| malformed("missing header newline"))?;

        let line = std::str::from_utf8(&body[..newline])
            .map_err(|_| malformed("header is not utf-8"))?;

        // 이름에 공백이 들어갈 수 있으므로 뒤에서부터 분리
        let (rest, count) = split_field(line, " count:")?;
        let (rest, sn) = split_field(rest, " sn:")?;
        let (rest, hash) = split_field(rest, " hash:")?;
        let name = rest
            .strip_prefix("name:")
            .ok_or_else(|| malformed("missing name field"))?;

        let count: usize = count
            .parse()
            .map_err(|_| malformed(format!("count is not an integer: {:?}", count)))?;
        let sn: usize = sn
            .parse()
            .map_err(|_| malformed(format!("sn is not an integer: {:?}", sn)))?;

        if count < 1 {
            return Err(malformed("count must be >= 1"));
        }
        if count > MAX_FRAGMENT_COUNT {
            return Err(malformed(format!(
                "count {} exceeds {}",
                count, MAX_FRAGMENT_COUNT
            )));
        }
        if sn < 1 || sn > count {
            return Err(malformed(format!("sn {} out of range 1..={}", sn, count)));
        }
        validate_name(name).map_err(|e| malformed(e.to_string()))?;

        let digest = Digest::from_hex(hash)?;

        Ok(Self {
            data_offset: TAG_FRAGMENT.len() + newline + 1,
            name: name.to_string(),
            digest,
            index: sn - 1,
            count,
        })
    }
}

fn malformed(reason: impl Into<String>) -> Error {
    Error::MalformedPacket(reason.into())
}

fn split_field<'a>(line: &'a str, key: &str) -> Result<(&'a str, &'a str)> {
    let at = line
        .rfind(key)
        .ok_or_else(|| malformed(format!("missing field {:?}", key.trim())))?;
    Ok((&line[..at], &line[at + key.len()..]))
}

/// 조각 (헤더 + 압축 데이터)
#[derive(Debug, Clone)]
pub struct Fragment {
    pub header: FragmentHeader,
    pub data: Bytes,
}

/// 통합 패킷 enum
#[derive(Debug, Clone)]
pub enum Packet {
    /// 이름에 해당하는 저장 해시 요청
    HashRequest { name: String },

    /// 해시 응답 (None = not_found)
    HashReply(Option<Digest>),

    /// 아이템 조각
    Fragment(Fragment),

    /// 수신한 데이터그램 전체의 다이제스트
    Confirmation(Digest),

    /// 알 수 없는 헤더를 받았다는 표시
    InvalidHeader,
}

impl Packet {
    /// 조각 패킷 생성 (헤더 + 페이로드)
    pub fn encode_fragment(
        name: &str,
        digest: &Digest,
        index: usize,
        count: usize,
        chunk: &[u8],
    ) -> Vec<u8> {
        let mut buf = FragmentHeader::encode(name, digest, index, count);
        buf.extend_from_slice(chunk);
        buf
    }

    /// 평문 바이트로 직렬화
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Packet::HashRequest { name } => tagged(TAG_HASH_REQUEST, name.as_bytes()),
            Packet::HashReply(Some(digest)) => tagged(TAG_HASH_REPLY, digest.to_hex().as_bytes()),
            Packet::HashReply(None) => tagged(TAG_HASH_REPLY, NOT_FOUND.as_bytes()),
            Packet::Fragment(fragment) => Self::encode_fragment(
                &fragment.header.name,
                &fragment.header.digest,
                fragment.header.index,
                fragment.header.count,
                &fragment.data,
            ),
            Packet::Confirmation(digest) => tagged(TAG_CONFIRM, digest.to_hex().as_bytes()),
            Packet::InvalidHeader => tagged(TAG_INVALID, INVALID_HEADER_TEXT.as_bytes()),
        }
    }

    /// 평문 바이트에서 역직렬화
    ///
    /// 알 수 없는 태그는 `Error::UnknownPacket`, 형식 오류는 `Error::MalformedPacket`.
    pub fn from_bytes(datagram: &[u8]) -> Result<Self> {
        if datagram.starts_with(TAG_FRAGMENT) {
            let header = FragmentHeader::parse(datagram)?;
            let data = Bytes::copy_from_slice(&datagram[header.data_offset..]);
            return Ok(Packet::Fragment(Fragment { header, data }));
        }

        if let Some(body) = datagram.strip_prefix(TAG_CONFIRM) {
            return Ok(Packet::Confirmation(Digest::from_hex(text(body)?)?));
        }

        if let Some(body) = datagram.strip_prefix(TAG_HASH_REQUEST) {
            let name = text(body)?;
            validate_name(name).map_err(|e| malformed(e.to_string()))?;
            return Ok(Packet::HashRequest {
                name: name.to_string(),
            });
        }

        if let Some(body) = datagram.strip_prefix(TAG_HASH_REPLY) {
            let body = text(body)?;
            if body == NOT_FOUND {
                return Ok(Packet::HashReply(None));
            }
            return Ok(Packet::HashReply(Some(Digest::from_hex(body)?)));
        }

        if datagram.starts_with(TAG_INVALID) {
            return Ok(Packet::InvalidHeader);
        }

        Err(Error::UnknownPacket)
    }

    /// 로그용 패킷 종류
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::HashRequest { .. } => "hash-request",
            Packet::HashReply(_) => "hash-reply",
            Packet::Fragment(_) => "fragment",
            Packet::Confirmation(_) => "confirmation",
            Packet::InvalidHeader => "invalid-header",
        }
    }
}

fn tagged(tag: &[u8], body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(tag.len() + body.len());
    buf.extend_from_slice(tag);
    buf.extend_from_slice(body);
    buf
}

fn text(body: &[u8]) -> Result<&str> {
    std::str::from_utf8(body).map_err(|_| malformed("body is not utf-8"))
}
