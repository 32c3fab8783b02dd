//! 전송 통계
//!
//! 전역 누적값 대신 호출자가 소유하는 집계 객체를 `accumulate`로 갱신한다.

use std::time::{Duration, Instant};

use crate::fragment::OutboundPacket;

/// 송신 통계 (아이템 하나 또는 누적)
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 전송 소요 시간 (finish 시 기록)
    pub elapsed: Duration,

    /// 요청된 아이템 수
    pub items: u64,

    /// 중복 검사로 건너뛴 아이템 수
    pub items_skipped: u64,

    /// 원본 바이트 수
    pub item_bytes: u64,

    /// 총 패킷 수
    pub packets_total: u64,

    /// 확인된 패킷 수
    pub packets_delivered: u64,

    /// 미확인 패킷 수
    pub packets_lost: u64,

    /// 확인된 압축 바이트
    pub bytes_delivered: u64,

    /// 미확인 압축 바이트
    pub bytes_lost: u64,

    /// 총 전송 데이터그램 수 (재전송 포함)
    pub datagrams_sent: u64,

    /// 재전송 데이터그램 수
    pub retransmitted_packets: u64,

    /// 사용한 재시도 라운드 수
    pub rounds: u64,

    /// RTT 합 (마이크로초)
    rtt_total_us: u64,

    /// RTT 샘플 수
    rtt_samples: u64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            elapsed: Duration::ZERO,
            items: 0,
            items_skipped: 0,
            item_bytes: 0,
            packets_total: 0,
            packets_delivered: 0,
            packets_lost: 0,
            bytes_delivered: 0,
            bytes_lost: 0,
            datagrams_sent: 0,
            retransmitted_packets: 0,
            rounds: 0,
            rtt_total_us: 0,
            rtt_samples: 0,
        }
    }

    /// 전송이 끝난 패킷 배열에서 전달/손실 집계
    pub fn record_packets(&mut self, packets: &[OutboundPacket]) {
        for packet in packets {
            let state = packet.snapshot();
            self.packets_total += 1;

            if state.confirmed_digest == Some(packet.sent_digest) {
                self.packets_delivered += 1;
                self.bytes_delivered += packet.data_len as u64;

                // 재전송 후 이전 전송분이 확인되면 샘플에서 제외
                if let (Some(sent), Some(confirmed)) = (state.sent_at, state.confirmed_at) {
                    if let Some(rtt) = confirmed.checked_duration_since(sent) {
                        self.record_rtt(rtt);
                    }
                }
            } else {
                self.packets_lost += 1;
                self.bytes_lost += packet.data_len as u64;
            }
        }
    }

    /// RTT 샘플 기록
    pub fn record_rtt(&mut self, rtt: Duration) {
        self.rtt_total_us += rtt.as_micros() as u64;
        self.rtt_samples += 1;
    }

    /// 경과 시간 확정
    pub fn finish(&mut self) {
        self.elapsed = self.start_time.elapsed();
    }

    /// 평균 RTT
    pub fn average_rtt(&self) -> Option<Duration> {
        if self.rtt_samples == 0 {
            return None;
        }
        Some(Duration::from_micros(self.rtt_total_us / self.rtt_samples))
    }

    /// 실효 처리율 (bytes/sec, 원본 기준)
    pub fn effective_throughput(&self) -> f64 {
        let elapsed = self.elapsed.as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.item_bytes as f64 / elapsed
    }

    /// 패킷 손실률 (최종 미확인 기준)
    pub fn loss_rate(&self) -> f64 {
        if self.packets_total == 0 {
            return 0.0;
        }
        self.packets_lost as f64 / self.packets_total as f64
    }

    /// 다른 통계를 누적
    pub fn accumulate(&mut self, other: &TransferStats) {
        self.elapsed += other.elapsed;
        self.items += other.items;
        self.items_skipped += other.items_skipped;
        self.item_bytes += other.item_bytes;
        self.packets_total += other.packets_total;
        self.packets_delivered += other.packets_delivered;
        self.packets_lost += other.packets_lost;
        self.bytes_delivered += other.bytes_delivered;
        self.bytes_lost += other.bytes_lost;
        self.datagrams_sent += other.datagrams_sent;
        self.retransmitted_packets += other.retransmitted_packets;
        self.rounds += other.rounds;
        self.rtt_total_us += other.rtt_total_us;
        self.rtt_samples += other.rtt_samples;
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.3}s | Items: {} ({} skipped) | Packets: {}/{} delivered, {} lost | Bytes: {} delivered, {} lost | Retransmits: {} | RTT: {} | Throughput: {:.2} MB/s",
            self.elapsed.as_secs_f64(),
            self.items,
            self.items_skipped,
            self.packets_delivered,
            self.packets_total,
            self.packets_lost,
            self.bytes_delivered,
            self.bytes_lost,
            self.retransmitted_packets,
            self.average_rtt()
                .map(|rtt| format!("{:.2}ms", rtt.as_secs_f64() * 1000.0))
                .unwrap_or_else(|| "-".into()),
            self.effective_throughput() / 1_000_000.0,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

/// 수신 통계
#[derive(Debug, Clone, Default)]
pub struct ReceiverStats {
    /// 수신 데이터그램 수
    pub datagrams: u64,

    /// 복호화 실패 수
    pub decrypt_failures: u64,

    /// 형식 오류 / 알 수 없는 패킷 수
    pub malformed: u64,

    /// 해시 요청 수
    pub hash_requests: u64,

    /// 저장된 조각 수
    pub fragments: u64,

    /// 중복 조각 수
    pub duplicates: u64,

    /// 변조 감지 수
    pub alterations: u64,

    /// 완료된 아이템 수
    pub items_completed: u64,

    /// 실패한 아이템 수 (해제/해시/콜백)
    pub items_failed: u64,

    /// 완료된 아이템의 원본 바이트
    pub item_bytes: u64,

    /// 보낸 확인 수
    pub confirmations: u64,
}

impl ReceiverStats {
    pub fn summary(&self) -> String {
        format!(
            "Datagrams: {} | Fragments: {} (+{} dup) | Items: {} ok, {} failed | Bytes: {} | Malformed: {} | Decrypt failures: {} | Alterations: {}",
            self.datagrams,
            self.fragments,
            self.duplicates,
            self.items_completed,
            self.items_failed,
            self.item_bytes,
            self.malformed,
            self.decrypt_failures,
            self.alterations,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Digest;
    use crate::fragment::FragmentBuilder;

    #[test]
    fn test_record_packets() {
        let packets = FragmentBuilder::new(10).build("item", &Digest::of(b"x"), &[9u8; 25]);
        packets[0].mark_sent();
        packets[0].confirm(&packets[0].sent_digest);
        packets[1].mark_sent();
        packets[1].confirm(&packets[1].sent_digest);

        let mut stats = TransferStats::new();
        stats.record_packets(&packets);

        assert_eq!(stats.packets_total, 3);
        assert_eq!(stats.packets_delivered, 2);
        assert_eq!(stats.packets_lost, 1);
        assert_eq!(stats.bytes_delivered, 20);
        assert_eq!(stats.bytes_lost, 5);
        assert!(stats.average_rtt().is_some());
        assert!((stats.loss_rate() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_accumulate() {
        let mut total = TransferStats::new();

        let mut one = TransferStats::new();
        one.items = 1;
        one.item_bytes = 100;
        one.packets_total = 4;
        one.packets_delivered = 4;
        one.record_rtt(Duration::from_millis(2));

        let mut two = TransferStats::new();
        two.items = 1;
        two.items_skipped = 1;
        two.record_rtt(Duration::from_millis(4));

        total.accumulate(&one);
        total.accumulate(&two);

        assert_eq!(total.items, 2);
        assert_eq!(total.items_skipped, 1);
        assert_eq!(total.item_bytes, 100);
        assert_eq!(total.packets_delivered, 4);
        assert_eq!(total.average_rtt(), Some(Duration::from_millis(3)));
        assert!(total.summary().contains("Items: 2 (1 skipped)"));
    }
}
