//! # UDPX
//!
//! UDP 기반 암호화/압축 대용량 아이템 전송 프로토콜
//!
//! ## 핵심 특징
//! - **조각 확인**: 조각마다 수신 데이터그램 해시로 확인, 미확인분만 재전송
//! - **이중 무결성**: 패킷 단위 확인 + 아이템 전체 해시 검증
//! - **중복 제거**: 전송 전 해시 조회로 이미 같은 내용이면 건너뜀
//! - **교체 가능한 암호화/압축**: ChaCha20-Poly1305 / AES-256-GCM, zlib / DEFLATE
//! - **단일 취소 수단**: 전송 계층 닫기로 대기 중인 읽기 해제

/// verbose 설정에 따라 패킷 단위 이벤트를 info 또는 trace로 기록
macro_rules! packet_event {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::info!($($arg)+)
        } else {
            tracing::trace!($($arg)+)
        }
    };
}

pub mod compress;
pub mod config;
pub mod crypto;
pub mod digest;
pub mod error;
pub mod fragment;
pub mod item;
pub mod message;
pub mod pipeline;
pub mod receiver;
pub mod sender;
pub mod stats;
pub mod store;
pub mod transport;

pub use compress::{Compressor, DeflateCompressor, NoCompression, ZlibCompressor};
pub use config::Config;
pub use crypto::{AesGcmCipher, ChaChaCipher, Cipher, CryptoError};
pub use digest::Digest;
pub use error::{Error, Result};
pub use fragment::{FragmentBuilder, OutboundPacket};
pub use item::DataItem;
pub use message::{FragmentHeader, Packet};
pub use pipeline::Pipeline;
pub use receiver::Receiver;
pub use sender::Sender;
pub use stats::{ReceiverStats, TransferStats};
pub use store::{DirStore, ItemConsumer, ItemProvider, MemoryStore};
pub use transport::{Connector, LossyConnector, LossyTransport, Transport, UdpConnector, UdpTransport};

/// 프로토콜 버전
pub const PROTOCOL_VERSION: u8 = 1;

/// 기본 패킷 크기 (바이트, 이더넷 MTU 기준 UDP 페이로드)
pub const DEFAULT_PACKET_SIZE: usize = 1472;

/// 기본 조각 페이로드 크기 (바이트)
pub const DEFAULT_PAYLOAD_SIZE: usize = 1024;

/// 아이템 최대 크기 (압축 해제 후 바이트)
pub const MAX_ITEM_LEN: usize = 1 << 30;

/// 수신 버퍼 길이
pub const RECV_BUFFER_LEN: usize = 65_536;
