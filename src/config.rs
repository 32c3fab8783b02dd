//! 프로토콜 설정

use std::time::Duration;

use crate::crypto::CIPHER_OVERHEAD;
use crate::message::MAX_HEADER_LEN;
use crate::{Error, Result, DEFAULT_PACKET_SIZE, DEFAULT_PAYLOAD_SIZE};

/// 최소 패킷 크기 (바이트)
pub const MIN_PACKET_SIZE: usize = 512;

/// UDP 데이터그램 최대 크기 (IPv4 기준)
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// 조각 하나에 붙는 최대 프레이밍 오버헤드 (헤더 + 암호화)
pub const FRAME_OVERHEAD: usize = MAX_HEADER_LEN + CIPHER_OVERHEAD;

/// UDPX 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 데이터그램 최대 크기 (프레이밍 + 암호화 포함)
    pub packet_size: usize,

    /// 조각당 압축 데이터 크기 (바이트)
    pub payload_size: usize,

    /// 재시도 횟수 (전송 라운드 수)
    pub send_retries: u32,

    /// 응답 대기 타임아웃 (밀리초)
    pub reply_timeout_ms: u64,

    /// 패킷 전송 간격 (마이크로초)
    /// 0이면 최대 속도로 전송
    pub send_interval_us: u64,

    /// 재전송 라운드 사이 대기 (밀리초)
    pub retry_interval_ms: u64,

    /// 쓰기 타임아웃 (밀리초)
    pub write_timeout_ms: u64,

    /// 수신 버퍼 크기
    pub recv_buffer_size: usize,

    /// 송신 버퍼 크기
    pub send_buffer_size: usize,

    /// 송신측 패킷 단위 로그
    pub verbose_send: bool,

    /// 수신측 패킷 단위 로그
    pub verbose_receive: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            packet_size: DEFAULT_PACKET_SIZE,
            payload_size: DEFAULT_PAYLOAD_SIZE,
            send_retries: 8,
            reply_timeout_ms: 500,              // 500ms
            send_interval_us: 50,
            retry_interval_ms: 20,
            write_timeout_ms: 1000,             // 1초
            recv_buffer_size: 2 * 1024 * 1024,  // 2MB
            send_buffer_size: 2 * 1024 * 1024,  // 2MB
            verbose_send: false,
            verbose_receive: false,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_micros(self.send_interval_us)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// 프로토콜 동작 전 제약 검사
    ///
    /// 위반은 재시도 대상이 아닌 치명적 설정 에러다.
    pub fn validate(&self) -> Result<()> {
        if self.packet_size < MIN_PACKET_SIZE || self.packet_size > MAX_DATAGRAM_SIZE {
            return Err(Error::InvalidConfig(format!(
                "packet_size {} not in {}..={}",
                self.packet_size, MIN_PACKET_SIZE, MAX_DATAGRAM_SIZE
            )));
        }

        let ceiling = self.packet_size - FRAME_OVERHEAD.min(self.packet_size);
        if self.payload_size == 0 || self.payload_size >= ceiling {
            return Err(Error::InvalidConfig(format!(
                "payload_size {} must be in 1..{} (packet_size {} - overhead {})",
                self.payload_size, ceiling, self.packet_size, FRAME_OVERHEAD
            )));
        }

        if self.send_retries == 0 {
            return Err(Error::InvalidConfig("send_retries must be >= 1".into()));
        }

        if self.reply_timeout_ms == 0 {
            return Err(Error::InvalidConfig("reply_timeout_ms must be > 0".into()));
        }

        if self.write_timeout_ms == 0 {
            return Err(Error::InvalidConfig("write_timeout_ms must be > 0".into()));
        }

        Ok(())
    }

    /// 로컬 네트워크용 설정
    pub fn lan() -> Self {
        Self {
            packet_size: 8192,
            payload_size: 7680,
            send_retries: 5,
            reply_timeout_ms: 200,
            send_interval_us: 0,              // 최대 속도
            retry_interval_ms: 5,
            write_timeout_ms: 500,
            recv_buffer_size: 8 * 1024 * 1024, // 8MB
            send_buffer_size: 8 * 1024 * 1024,
            verbose_send: false,
            verbose_receive: false,
        }
    }

    /// 불안정한 네트워크용 설정
    pub fn unstable_network() -> Self {
        Self {
            packet_size: 1200,                // 작은 패킷
            payload_size: 900,
            send_retries: 20,
            reply_timeout_ms: 1500,
            send_interval_us: 200,
            retry_interval_ms: 100,
            write_timeout_ms: 2000,
            recv_buffer_size: 1024 * 1024,
            send_buffer_size: 1024 * 1024,
            verbose_send: false,
            verbose_receive: false,
        }
    }
}
