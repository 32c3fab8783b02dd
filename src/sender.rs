//! 송신자
//!
//! - 전송 전 해시 조회로 중복 제거
//! - 조각별 확인 기반 재전송 (미확인분만)
//! - 전송 후 아이템 전체 해시 검증

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::digest::Digest;
use crate::fragment::{match_confirmation, FragmentBuilder, OutboundPacket};
use crate::message::{validate_name, Packet, MAX_FRAGMENT_COUNT};
use crate::pipeline::Pipeline;
use crate::stats::TransferStats;
use crate::transport::{Connector, Transport, UdpConnector};
use crate::{Config, Error, Result, MAX_ITEM_LEN, RECV_BUFFER_LEN};

/// 전달 상태 확인 주기
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// 송신자
pub struct Sender {
    /// 설정
    config: Config,

    /// 수신자 주소
    remote: SocketAddr,

    /// 암호화/압축
    pipeline: Pipeline,

    /// 교환마다 새 전송을 여는 팩토리
    connector: Arc<dyn Connector>,

    /// 누적 통계
    totals: RwLock<TransferStats>,
}

impl Sender {
    /// 기본 UDP 커넥터로 송신자 생성
    pub fn new(config: Config, remote: SocketAddr, pipeline: Pipeline) -> Self {
        let connector = Arc::new(UdpConnector::new(config.clone()));
        Self::with_connector(config, remote, pipeline, connector)
    }

    pub fn with_connector(
        config: Config,
        remote: SocketAddr,
        pipeline: Pipeline,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            config,
            remote,
            pipeline,
            connector,
            totals: RwLock::new(TransferStats::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// 이 송신자로 보낸 모든 아이템의 누적 통계
    pub fn totals(&self) -> TransferStats {
        self.totals.read().clone()
    }

    /// 아이템 전송
    ///
    /// 수신측이 이미 같은 해시를 갖고 있으면 조각을 보내지 않는다.
    /// 성공 시 이번 전송의 통계를 반환한다.
    pub async fn send(&self, name: &str, data: &[u8]) -> Result<TransferStats> {
        self.config.validate()?;
        validate_name(name)?;
        if data.len() > MAX_ITEM_LEN {
            return Err(Error::InvalidConfig(format!(
                "item {} is {} bytes, limit {}",
                name,
                data.len(),
                MAX_ITEM_LEN
            )));
        }

        let mut stats = TransferStats::new();
        stats.items = 1;
        stats.item_bytes = data.len() as u64;

        let item_digest = Digest::of(data);

        // 1. 중복 검사 (응답 없음은 전송 진행)
        if self.query_digest(name, 1).await? == Some(item_digest) {
            info!("이미 최신: {} ({})", name, item_digest);
            stats.items_skipped = 1;
            stats.finish();
            self.totals.write().accumulate(&stats);
            return Ok(stats);
        }

        // 2. 압축 + 분할
        let compressed = self.pipeline.compress(data)?;
        let builder = FragmentBuilder::new(self.config.payload_size);
        let count = builder.fragment_count(compressed.len());
        if count > MAX_FRAGMENT_COUNT {
            return Err(Error::InvalidConfig(format!(
                "item {} needs {} fragments, limit {} (raise payload_size)",
                name, count, MAX_FRAGMENT_COUNT
            )));
        }
        let packets = Arc::new(builder.build(name, &item_digest, &compressed));

        for packet in packets.iter() {
            let sealed_len = self.pipeline.sealed_len(packet.payload.len());
            if sealed_len > self.config.packet_size {
                return Err(Error::InvalidConfig(format!(
                    "fragment {} of {} is {} bytes sealed, packet_size {}",
                    packet.index, name, sealed_len, self.config.packet_size
                )));
            }
        }

        debug!(
            "전송 시작: {} ({} bytes -> {} compressed, {} fragments)",
            name,
            data.len(),
            compressed.len(),
            packets.len()
        );

        // 3. 전송 + 확인 수집
        let transport = self.connector.connect(self.remote).await?;
        let collector = tokio::spawn(collect_confirmations(
            transport.clone(),
            self.pipeline.clone(),
            packets.clone(),
            self.config.clone(),
        ));

        let delivered = self.send_rounds(&transport, &packets, &mut stats).await;

        // 닫기가 수집기의 대기 중인 읽기를 깨운다
        if let Err(e) = transport.close().await {
            warn!("전송 닫기 실패: {}", e);
        }
        if let Err(e) = collector.await {
            warn!("확인 수집기 종료 에러: {}", e);
        }

        stats.record_packets(&packets);

        if !delivered {
            stats.finish();
            self.totals.write().accumulate(&stats);
            return Err(Error::UndeliveredPackets {
                name: name.to_string(),
                undelivered: stats.packets_lost as usize,
                total: stats.packets_total as usize,
            });
        }

        // 4. 종단 간 검증
        let remote = self.query_digest(name, self.config.send_retries).await?;
        stats.finish();
        self.totals.write().accumulate(&stats);

        if remote != Some(item_digest) {
            return Err(Error::HashMismatch {
                name: name.to_string(),
                expected: item_digest,
                got: remote,
            });
        }

        info!("전송 완료: {} | {}", name, stats.summary());
        Ok(stats)
    }

    /// 재시도 라운드: 미확인 패킷만 다시 보낸다
    async fn send_rounds(
        &self,
        transport: &Arc<dyn Transport>,
        packets: &Arc<Vec<OutboundPacket>>,
        stats: &mut TransferStats,
    ) -> bool {
        for round in 0..self.config.send_retries {
            let pending: Vec<usize> = packets
                .iter()
                .filter(|p| !p.is_delivered())
                .map(|p| p.index)
                .collect();

            if pending.is_empty() {
                return true;
            }

            if round > 0 {
                debug!(
                    "재전송 라운드 {}: {}/{} 미확인",
                    round + 1,
                    pending.len(),
                    packets.len()
                );
                stats.retransmitted_packets += pending.len() as u64;
                tokio::time::sleep(self.config.retry_interval()).await;
            }

            stats.rounds += 1;
            stats.datagrams_sent += pending.len() as u64;

            // 패킷당 태스크 하나, send_interval 간격으로 분산
            let mut tasks = Vec::with_capacity(pending.len());
            for (k, index) in pending.into_iter().enumerate() {
                let delay = self.config.send_interval().saturating_mul(k as u32);
                tasks.push(tokio::spawn(send_packet(
                    transport.clone(),
                    self.pipeline.clone(),
                    packets.clone(),
                    index,
                    delay,
                    self.config.write_timeout(),
                    self.config.verbose_send,
                )));
            }

            for task in tasks {
                if let Err(e) = task.await {
                    warn!("전송 태스크 에러: {}", e);
                }
            }

            if self.wait_for_delivery(packets).await {
                return true;
            }
        }

        packets.iter().all(|p| p.is_delivered())
    }

    /// 모두 확인되거나 응답 타임아웃까지 대기
    async fn wait_for_delivery(&self, packets: &[OutboundPacket]) -> bool {
        let deadline = Instant::now() + self.config.reply_timeout();
        let poll = POLL_INTERVAL.min(self.config.reply_timeout());

        loop {
            if packets.iter().all(|p| p.is_delivered()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// 수신측에 저장된 아이템 해시 조회
    ///
    /// `Ok(None)`은 not_found 응답이거나 `attempts`번 모두 응답이 없는 경우다.
    pub async fn query_digest(&self, name: &str, attempts: u32) -> Result<Option<Digest>> {
        validate_name(name)?;

        let request = Packet::HashRequest {
            name: name.to_string(),
        };
        let sealed = self.pipeline.seal(&request.to_bytes())?;

        let transport = self.connector.connect(self.remote).await?;
        let result = self.exchange_digest(transport.as_ref(), name, &sealed, attempts).await;

        if let Err(e) = transport.close().await {
            warn!("전송 닫기 실패: {}", e);
        }
        result
    }

    async fn exchange_digest(
        &self,
        transport: &dyn Transport,
        name: &str,
        request: &[u8],
        attempts: u32,
    ) -> Result<Option<Digest>> {
        let mut buf = vec![0u8; RECV_BUFFER_LEN];

        for attempt in 1..=attempts.max(1) {
            if attempt > 1 {
                tokio::time::sleep(self.config.retry_interval()).await;
            }

            if let Err(e) = transport.write(request, self.config.write_timeout()).await {
                warn!("해시 요청 전송 실패: {} (attempt {}): {}", name, attempt, e);
                continue;
            }

            let deadline = Instant::now() + self.config.reply_timeout();
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }

                let (len, _) = match transport.read(&mut buf, remaining).await {
                    Ok(received) => received,
                    Err(Error::Timeout) => break,
                    Err(e) if e.is_closed() => return Err(e),
                    Err(e) => {
                        debug!("해시 응답 수신 에러: {} (attempt {}): {}", name, attempt, e);
                        break;
                    }
                };

                match self
                    .pipeline
                    .open(&buf[..len])
                    .and_then(|plain| Packet::from_bytes(&plain))
                {
                    Ok(Packet::HashReply(digest)) => {
                        debug!(
                            "해시 응답: {} = {}",
                            name,
                            digest.map(|d| d.to_hex()).unwrap_or_else(|| "not_found".into())
                        );
                        return Ok(digest);
                    }
                    Ok(other) => debug!("해시 응답 대기 중 무시: {}", other.kind()),
                    Err(e) => debug!("해시 응답 해석 실패: {}", e),
                }
            }

            debug!("해시 응답 없음: {} (attempt {}/{})", name, attempt, attempts);
        }

        Ok(None)
    }
}

/// 패킷 하나 전송 (지연 후)
async fn send_packet(
    transport: Arc<dyn Transport>,
    pipeline: Pipeline,
    packets: Arc<Vec<OutboundPacket>>,
    index: usize,
    delay: Duration,
    write_timeout: Duration,
    verbose: bool,
) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let Some(packet) = packets.get(index) else {
        return;
    };

    // 전송 대기 중 확인된 패킷은 건너뜀
    if packet.is_delivered() {
        return;
    }

    let sealed = match pipeline.seal(&packet.payload) {
        Ok(sealed) => sealed,
        Err(e) => {
            warn!("조각 {} 암호화 실패: {}", index, e);
            return;
        }
    };

    packet.mark_sent();
    match transport.write(&sealed, write_timeout).await {
        Ok(_) => packet_event!(verbose, "조각 전송: #{} ({} bytes)", index, sealed.len()),
        Err(e) if e.is_closed() => {}
        Err(e) => warn!("조각 {} 전송 실패: {}", index, e),
    }
}

/// 확인 수집기: 전송이 닫힐 때까지 확인을 읽어 패킷에 기록
async fn collect_confirmations(
    transport: Arc<dyn Transport>,
    pipeline: Pipeline,
    packets: Arc<Vec<OutboundPacket>>,
    config: Config,
) {
    let mut buf = vec![0u8; RECV_BUFFER_LEN];

    loop {
        match transport.read(&mut buf, config.reply_timeout()).await {
            Ok((len, _)) => {
                let datagram = buf[..len].to_vec();
                let pipeline = pipeline.clone();
                let packets = packets.clone();
                let verbose = config.verbose_send;

                // 읽기 루프를 막지 않도록 매칭은 별도 태스크에서
                tokio::spawn(async move {
                    handle_confirmation(&pipeline, &packets, &datagram, verbose);
                });
            }
            Err(Error::Timeout) => continue,
            Err(e) if e.is_closed() => break,
            Err(e) => warn!("확인 수신 에러: {}", e),
        }
    }
}

/// 확인 데이터그램 하나 처리, 일치한 패킷 인덱스 반환
fn handle_confirmation(
    pipeline: &Pipeline,
    packets: &[OutboundPacket],
    datagram: &[u8],
    verbose: bool,
) -> Option<usize> {
    let packet = match pipeline.open(datagram).and_then(|plain| Packet::from_bytes(&plain)) {
        Ok(packet) => packet,
        Err(e) => {
            warn!("확인 해석 실패: {}", e);
            return None;
        }
    };

    match packet {
        Packet::Confirmation(digest) => {
            let matched = match_confirmation(packets, &digest);
            match matched {
                Some(index) => packet_event!(verbose, "조각 확인: #{}", index),
                None => debug!("일치하는 조각 없는 확인: {:?}", digest),
            }
            matched
        }
        Packet::InvalidHeader => {
            warn!("수신측이 잘못된 헤더로 응답");
            None
        }
        other => {
            debug!("전송 중 예상치 못한 패킷: {}", other.kind());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_key;

    fn confirmation(pipeline: &Pipeline, packet: &OutboundPacket) -> Vec<u8> {
        pipeline
            .seal(&Packet::Confirmation(packet.sent_digest).to_bytes())
            .unwrap()
    }

    #[test]
    fn test_handle_confirmation() {
        let pipeline = Pipeline::new(&generate_key()).unwrap();
        let packets = FragmentBuilder::new(16).build("a", &Digest::of(b"a"), &[1u8; 64]);

        let datagram = confirmation(&pipeline, &packets[2]);
        assert_eq!(handle_confirmation(&pipeline, &packets, &datagram, false), Some(2));
        assert!(packets[2].is_delivered());

        // 다른 키로 봉인된 확인은 무시
        let stranger = Pipeline::new(&generate_key()).unwrap();
        let forged = confirmation(&stranger, &packets[0]);
        assert_eq!(handle_confirmation(&pipeline, &packets, &forged, false), None);
        assert!(!packets[0].is_delivered());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_confirmations() {
        let pipeline = Pipeline::new(&generate_key()).unwrap();
        let data: Vec<u8> = (0..64 * 1024).map(|i| (i * 7 % 251) as u8).collect();
        let packets = Arc::new(FragmentBuilder::new(64).build("stress", &Digest::of(&data), &data));
        assert_eq!(packets.len(), 1024);

        let datagrams: Vec<Vec<u8>> = packets.iter().map(|p| confirmation(&pipeline, p)).collect();

        let mut tasks = Vec::new();
        // 전송 기록, 확인(중복 포함), 폴링이 동시에 같은 배열을 건드림
        for (index, datagram) in datagrams.into_iter().enumerate() {
            for _ in 0..3 {
                let pipeline = pipeline.clone();
                let packets = packets.clone();
                let datagram = datagram.clone();
                tasks.push(tokio::spawn(async move {
                    packets[index].mark_sent();
                    handle_confirmation(&pipeline, &packets, &datagram, false)
                }));
            }
        }
        let poller = {
            let packets = packets.clone();
            tokio::spawn(async move {
                while !packets.iter().all(|p| p.is_delivered()) {
                    tokio::task::yield_now().await;
                }
            })
        };

        for task in tasks {
            assert!(task.await.unwrap().is_some());
        }
        tokio::time::timeout(Duration::from_secs(5), poller)
            .await
            .unwrap()
            .unwrap();

        let mut stats = TransferStats::new();
        stats.record_packets(&packets);
        assert_eq!(stats.packets_delivered, 1024);
        assert_eq!(stats.packets_lost, 0);
        assert!(packets.iter().all(|p| p.snapshot().attempts == 3));
    }

    #[tokio::test]
    async fn test_no_receiver_fails_with_undelivered() {
        // 아무도 듣지 않는 포트
        let unused = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let remote = unused.local_addr().unwrap();
        drop(unused);

        let config = Config {
            send_retries: 2,
            reply_timeout_ms: 30,
            retry_interval_ms: 1,
            ..Config::default()
        };
        let sender = Sender::new(config, remote, Pipeline::new(&generate_key()).unwrap());

        match sender.send("nobody", b"hello").await {
            Err(Error::UndeliveredPackets {
                undelivered, total, ..
            }) => {
                assert_eq!(undelivered, 1);
                assert_eq!(total, 1);
            }
            other => panic!("unexpected result: {:?}", other.map(|s| s.summary())),
        }
        assert_eq!(sender.totals().packets_lost, 1);
    }

    #[tokio::test]
    async fn test_invalid_input_rejected_before_network() {
        let remote: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let pipeline = Pipeline::new(&generate_key()).unwrap();

        let sender = Sender::new(Config::default(), remote, pipeline.clone());
        assert!(matches!(
            sender.send("", b"x").await,
            Err(Error::InvalidName(_))
        ));

        let config = Config {
            payload_size: 0,
            ..Config::default()
        };
        let sender = Sender::new(config, remote, pipeline);
        assert!(matches!(
            sender.send("a", b"x").await,
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_too_many_fragments_rejected() {
        let unused = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let remote = unused.local_addr().unwrap();
        drop(unused);

        let config = Config {
            payload_size: 1,
            reply_timeout_ms: 20,
            ..Config::default()
        };
        let pipeline = Pipeline::with(
            Arc::new(crate::crypto::ChaChaCipher::new(&generate_key()).unwrap()),
            Arc::new(crate::compress::NoCompression),
        );
        let sender = Sender::new(config, remote, pipeline);

        let data = vec![7u8; MAX_FRAGMENT_COUNT + 1];
        assert!(matches!(
            sender.send("wide", &data).await,
            Err(Error::InvalidConfig(_))
        ));
        assert_eq!(sender.totals().packets_total, 0);
    }
}
