//! 수신자
//!
//! - 단일 루프: 읽기 -> 복호화 -> 분기 -> 응답
//! - 재조립 버퍼는 루프가 단독 소유 (동기화 불필요)
//! - 패킷 하나의 에러로 루프가 끝나지 않음

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::digest::Digest;
use crate::item::{DataItem, Insert};
use crate::message::{Fragment, FragmentHeader, Packet};
use crate::pipeline::Pipeline;
use crate::stats::ReceiverStats;
use crate::store::{ItemConsumer, ItemProvider};
use crate::transport::{Transport, UdpTransport};
use crate::{Config, Error, Result, RECV_BUFFER_LEN};

/// 기억하는 최근 완료 아이템 수
const RECENT_COMPLETED: usize = 32;

/// 완료된 아이템의 정체성 (늦게 도착한 중복 조각 판별용)
#[derive(Debug, Clone, PartialEq, Eq)]
struct ItemIdentity {
    name: String,
    digest: Digest,
    count: usize,
}

impl ItemIdentity {
    fn of(header: &FragmentHeader) -> Self {
        Self {
            name: header.name.clone(),
            digest: header.digest,
            count: header.count,
        }
    }

    fn matches(&self, header: &FragmentHeader) -> bool {
        self.digest == header.digest && self.count == header.count && self.name == header.name
    }
}

/// 수신자 내부 상태 (단일 태스크에서만 접근)
struct ReceiverInner {
    config: Config,
    pipeline: Pipeline,
    provider: Arc<dyn ItemProvider>,
    consumer: Arc<dyn ItemConsumer>,

    /// 진행 중인 아이템
    item: DataItem,

    /// 최근 완료된 아이템 (오래된 것부터)
    completed: VecDeque<ItemIdentity>,

    stats: ReceiverStats,
    shared_stats: Arc<RwLock<ReceiverStats>>,
}

impl ReceiverInner {
    fn new(
        config: Config,
        pipeline: Pipeline,
        provider: Arc<dyn ItemProvider>,
        consumer: Arc<dyn ItemConsumer>,
        shared_stats: Arc<RwLock<ReceiverStats>>,
    ) -> Self {
        Self {
            config,
            pipeline,
            provider,
            consumer,
            item: DataItem::new(),
            completed: VecDeque::with_capacity(RECENT_COMPLETED),
            stats: ReceiverStats::default(),
            shared_stats,
        }
    }

    async fn run(mut self, transport: Arc<dyn Transport>) {
        let mut buf = vec![0u8; RECV_BUFFER_LEN];

        loop {
            let (len, from) = match transport.read(&mut buf, self.config.reply_timeout()).await {
                Ok(received) => received,
                Err(Error::Timeout) => continue,
                Err(e) if e.is_closed() => break,
                Err(e) => {
                    warn!("수신 에러: {}", e);
                    continue;
                }
            };

            self.stats.datagrams += 1;
            if len > 0 {
                if let Some(reply) = self.handle_datagram(&buf[..len], from) {
                    self.send_reply(transport.as_ref(), reply, from).await;
                }
            }

            self.publish();
        }

        self.publish();
        info!("Receiver stopped | {}", self.stats.summary());
    }

    fn handle_datagram(&mut self, datagram: &[u8], from: SocketAddr) -> Option<Packet> {
        match self.pipeline.open(datagram) {
            Ok(plain) => self.dispatch(&plain),
            Err(e) => {
                self.stats.decrypt_failures += 1;
                warn!("복호화 실패 from {}: {}", from, e);
                None
            }
        }
    }

    async fn send_reply(&self, transport: &dyn Transport, reply: Packet, to: SocketAddr) {
        let sealed = match self.pipeline.seal(&reply.to_bytes()) {
            Ok(sealed) => sealed,
            Err(e) => {
                warn!("응답 암호화 실패: {}", e);
                return;
            }
        };

        match transport.write_to(&sealed, to, self.config.write_timeout()).await {
            Ok(_) => packet_event!(
                self.config.verbose_receive,
                "응답 전송: {} -> {}",
                reply.kind(),
                to
            ),
            Err(e) if e.is_closed() => {}
            Err(e) => warn!("응답 전송 실패 {}: {}", to, e),
        }
    }

    /// 복호화된 데이터그램 처리, 보낼 응답 반환
    fn dispatch(&mut self, plain: &[u8]) -> Option<Packet> {
        if plain.is_empty() {
            return None;
        }

        match Packet::from_bytes(plain) {
            Ok(Packet::HashRequest { name }) => self.handle_hash_request(&name),
            Ok(Packet::Fragment(fragment)) => self.handle_fragment(fragment, plain),
            Ok(Packet::InvalidHeader) => {
                debug!("잘못된 헤더 표시 수신");
                None
            }
            Ok(other) => {
                debug!("수신측에서 처리하지 않는 패킷: {}", other.kind());
                Some(Packet::InvalidHeader)
            }
            Err(Error::UnknownPacket) => {
                self.stats.malformed += 1;
                debug!("알 수 없는 패킷 헤더 ({} bytes)", plain.len());
                Some(Packet::InvalidHeader)
            }
            Err(e) => {
                self.stats.malformed += 1;
                debug!("잘못된 패킷 드롭: {}", e);
                None
            }
        }
    }

    fn handle_hash_request(&mut self, name: &str) -> Option<Packet> {
        self.stats.hash_requests += 1;

        match self.provider.provide(name) {
            Ok(Some(data)) => Some(Packet::HashReply(Some(Digest::of(&data)))),
            Ok(None) => Some(Packet::HashReply(None)),
            Err(e) => {
                warn!("아이템 조회 실패: {}: {}", name, e);
                None
            }
        }
    }

    fn handle_fragment(&mut self, fragment: Fragment, plain: &[u8]) -> Option<Packet> {
        let Fragment { header, data } = fragment;
        let confirmation = Packet::Confirmation(Digest::of(plain));

        // 이미 완료된 아이템의 늦은 조각: 확인만
        if self.completed.iter().any(|c| c.matches(&header)) {
            self.stats.duplicates += 1;
            self.stats.confirmations += 1;
            return Some(confirmation);
        }

        if !self.item.matches(&header) {
            if !self.item.is_empty() {
                debug!(
                    "재조립 버퍼 재초기화: {} ({}/{}) -> {}",
                    self.item.name,
                    self.item.loaded(),
                    self.item.count(),
                    header.name
                );
            }
            self.item.reset_for(&header);
        }

        match self.item.insert(header.index, data) {
            Ok(Insert::Stored) => {
                self.stats.fragments += 1;
                packet_event!(
                    self.config.verbose_receive,
                    "조각 수신: {} #{}/{}",
                    header.name,
                    header.index + 1,
                    header.count
                );
            }
            Ok(Insert::Duplicate) => self.stats.duplicates += 1,
            Err(e) => {
                self.stats.alterations += 1;
                warn!("{}", e);
                return None;
            }
        }

        if self.item.is_loaded() {
            self.complete_item(&header);
        }

        self.stats.confirmations += 1;
        Some(confirmation)
    }

    /// 해제 + 해시 검증 + 소비 콜백, 이후 버퍼 비움
    fn complete_item(&mut self, header: &FragmentHeader) {
        let name = self.item.name.clone();
        let elapsed = self.item.started_at.map(|t| t.elapsed()).unwrap_or_default();

        let result = self
            .item
            .assemble(self.pipeline.compressor.as_ref())
            .and_then(|data| {
                let len = data.len();
                self.consumer.consume(&name, Bytes::from(data)).map(|_| len)
            });

        match result {
            Ok(len) => {
                self.stats.items_completed += 1;
                self.stats.item_bytes += len as u64;
                self.remember_completed(ItemIdentity::of(header));
                info!(
                    "아이템 수신 완료: {} ({} bytes, {} compressed, {} fragments, {:.2}ms)",
                    name,
                    len,
                    self.item.compressed_bytes,
                    self.item.count(),
                    elapsed.as_secs_f64() * 1000.0
                );
            }
            Err(e) => {
                self.stats.items_failed += 1;
                warn!("아이템 처리 실패: {}: {}", name, e);
            }
        }

        self.item.clear();
    }

    fn remember_completed(&mut self, identity: ItemIdentity) {
        self.completed.retain(|c| *c != identity);
        if self.completed.len() == RECENT_COMPLETED {
            self.completed.pop_front();
        }
        self.completed.push_back(identity);
    }

    fn publish(&self) {
        *self.shared_stats.write() = self.stats.clone();
    }
}

/// 수신자 핸들 (외부에서 제어용)
pub struct Receiver {
    transport: Arc<dyn Transport>,
    stats: Arc<RwLock<ReceiverStats>>,
    running: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Receiver {
    /// 주소에 바인딩하고 수신 루프 시작
    pub async fn start(
        config: Config,
        bind_addr: SocketAddr,
        pipeline: Pipeline,
        provider: Arc<dyn ItemProvider>,
        consumer: Arc<dyn ItemConsumer>,
    ) -> Result<Self> {
        config.validate()?;
        let transport = Arc::new(UdpTransport::bind(bind_addr, &config).await?);
        Self::start_with_transport(config, transport, pipeline, provider, consumer)
    }

    /// 준비된 전송 위에서 수신 루프 시작
    pub fn start_with_transport(
        config: Config,
        transport: Arc<dyn Transport>,
        pipeline: Pipeline,
        provider: Arc<dyn ItemProvider>,
        consumer: Arc<dyn ItemConsumer>,
    ) -> Result<Self> {
        config.validate()?;

        let local_addr = transport.local_addr()?;
        let stats = Arc::new(RwLock::new(ReceiverStats::default()));
        let running = Arc::new(AtomicBool::new(true));

        let inner = ReceiverInner::new(config, pipeline, provider, consumer, stats.clone());

        info!("UDPX Receiver started on {}", local_addr);

        let transport_main = transport.clone();
        let running_main = running.clone();
        let task = tokio::spawn(async move {
            inner.run(transport_main).await;
            running_main.store(false, Ordering::SeqCst);
        });

        Ok(Self {
            transport,
            stats,
            running,
            task,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// 통계 반환
    pub fn stats(&self) -> ReceiverStats {
        self.stats.read().clone()
    }

    /// 실행 중 여부
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 정지 (전송을 닫아 대기 중인 읽기를 깨움)
    pub async fn stop(&self) -> Result<()> {
        self.transport.close().await
    }

    /// 수신 루프 종료 대기
    pub async fn join(self) -> Result<ReceiverStats> {
        let Self { task, stats, .. } = self;
        task.await.map_err(std::io::Error::from)?;
        let last = stats.read().clone();
        Ok(last)
    }
}
