//! 조각과 송신 패킷 정의
//!
//! - Fragment: 압축된 아이템의 일부, 데이터그램 하나에 실림
//! - OutboundPacket: 조각 하나의 송신측 기록 (보낸 시각, 확인 해시)

use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::digest::Digest;
use crate::message::Packet;

/// 송신 패킷의 가변 상태 (패킷별 락으로 보호)
#[derive(Debug, Default, Clone)]
pub struct PacketState {
    /// 마지막 전송 시각
    pub sent_at: Option<Instant>,

    /// 수신측이 돌려준 해시 (확인 전에는 None)
    pub confirmed_digest: Option<Digest>,

    /// 확인 시각
    pub confirmed_at: Option<Instant>,

    /// 전송 횟수
    pub attempts: u32,
}

/// 조각 하나의 송신 기록
///
/// `payload`와 `sent_digest`는 생성 후 불변이고, 나머지는 패킷별 락 안에서만 바뀐다.
/// 전송 태스크는 `sent_at`만, 확인 수집기는 `confirmed_*`만 쓴다.
#[derive(Debug)]
pub struct OutboundPacket {
    /// 조각 인덱스 (0부터)
    pub index: usize,

    /// 헤더 + 압축 데이터 (평문)
    pub payload: Bytes,

    /// payload의 다이제스트
    pub sent_digest: Digest,

    /// 압축 데이터 길이 (헤더 제외)
    pub data_len: usize,

    state: Mutex<PacketState>,
}

impl OutboundPacket {
    pub fn new(index: usize, payload: Vec<u8>, data_len: usize) -> Self {
        let sent_digest = Digest::of(&payload);
        Self {
            index,
            payload: Bytes::from(payload),
            sent_digest,
            data_len,
            state: Mutex::new(PacketState::default()),
        }
    }

    /// 전달 여부: 확인 해시가 보낸 해시와 같을 때만
    pub fn is_delivered(&self) -> bool {
        self.state.lock().confirmed_digest == Some(self.sent_digest)
    }

    /// 전송 기록
    pub fn mark_sent(&self) {
        let mut state = self.state.lock();
        state.sent_at = Some(Instant::now());
        state.attempts += 1;
    }

    /// 확인 해시가 이 패킷의 것이면 기록하고 true 반환
    pub fn confirm(&self, digest: &Digest) -> bool {
        if *digest != self.sent_digest {
            return false;
        }

        let mut state = self.state.lock();
        if state.confirmed_digest.is_none() {
            state.confirmed_digest = Some(*digest);
            state.confirmed_at = Some(Instant::now());
        }
        true
    }

    /// 상태 스냅샷
    pub fn snapshot(&self) -> PacketState {
        self.state.lock().clone()
    }
}

/// 확인 해시에 해당하는 패킷을 찾아 기록 (첫 일치에서 멈춤)
pub fn match_confirmation(packets: &[OutboundPacket], digest: &Digest) -> Option<usize> {
    packets
        .iter()
        .find(|packet| packet.confirm(digest))
        .map(|packet| packet.index)
}

/// 조각 생성기 (송신측)
pub struct FragmentBuilder {
    payload_size: usize,
}

impl FragmentBuilder {
    pub fn new(payload_size: usize) -> Self {
        Self {
            payload_size: payload_size.max(1),
        }
    }

    /// 압축 데이터를 조각 수로 환산
    ///
    /// 빈 데이터도 빈 조각 하나로 보낸다.
    pub fn fragment_count(&self, compressed_len: usize) -> usize {
        compressed_len.div_ceil(self.payload_size).max(1)
    }

    /// 압축된 아이템을 송신 패킷들로 분할
    pub fn build(&self, name: &str, item_digest: &Digest, compressed: &[u8]) -> Vec<OutboundPacket> {
        let count = self.fragment_count(compressed.len());

        if compressed.is_empty() {
            let payload = Packet::encode_fragment(name, item_digest, 0, 1, &[]);
            return vec![OutboundPacket::new(0, payload, 0)];
        }

        compressed
            .chunks(self.payload_size)
            .enumerate()
            .map(|(index, chunk)| {
                let payload = Packet::encode_fragment(name, item_digest, index, count, chunk);
                OutboundPacket::new(index, payload, chunk.len())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::FragmentHeader;

    #[test]
    fn test_split_into_fragments() {
        let builder = FragmentBuilder::new(100);
        let data: Vec<u8> = (0..250).map(|i| i as u8).collect();
        let digest = Digest::of(&data);
        let packets = builder.build("item", &digest, &data);

        assert_eq!(packets.len(), 3);

        let mut reassembled = Vec::new();
        for (i, packet) in packets.iter().enumerate() {
            let header = FragmentHeader::parse(&packet.payload).unwrap();
            assert_eq!(header.index, i);
            assert_eq!(header.count, 3);
            assert_eq!(header.digest, digest);
            reassembled.extend_from_slice(&packet.payload[header.data_offset..]);
        }
        assert_eq!(reassembled, data);
        assert_eq!(packets[2].data_len, 50);
    }

    #[test]
    fn test_empty_item_is_one_fragment() {
        let builder = FragmentBuilder::new(100);
        let packets = builder.build("empty", &Digest::of(b""), &[]);

        assert_eq!(packets.len(), 1);
        let header = FragmentHeader::parse(&packets[0].payload).unwrap();
        assert_eq!((header.index, header.count), (0, 1));
        assert_eq!(header.data_offset, packets[0].payload.len());
    }

    #[test]
    fn test_delivery_requires_matching_digest() {
        let builder = FragmentBuilder::new(4);
        let packets = builder.build("item", &Digest::of(b"abcdefgh"), b"abcdefgh");
        assert_eq!(packets.len(), 2);
        assert!(packets.iter().all(|p| !p.is_delivered()));

        assert_eq!(match_confirmation(&packets, &Digest::of(b"other")), None);
        assert!(packets.iter().all(|p| !p.is_delivered()));

        let target = packets[1].sent_digest;
        assert_eq!(match_confirmation(&packets, &target), Some(1));
        assert!(!packets[0].is_delivered());
        assert!(packets[1].is_delivered());

        // 중복 확인은 첫 확인 시각을 유지
        let first = packets[1].snapshot().confirmed_at;
        assert_eq!(match_confirmation(&packets, &target), Some(1));
        assert_eq!(packets[1].snapshot().confirmed_at, first);
    }

    #[test]
    fn test_digests_unique_per_fragment() {
        let builder = FragmentBuilder::new(8);
        let data = vec![7u8; 64];
        let packets = builder.build("same", &Digest::of(&data), &data);

        for (i, a) in packets.iter().enumerate() {
            for b in &packets[i + 1..] {
                assert_ne!(a.sent_digest, b.sent_digest);
            }
        }
    }
}
