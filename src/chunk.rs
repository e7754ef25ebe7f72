//! 청크 정의, 분할 계획과 재조립
//!
//! - ChunkPlan: 파일 바이트를 N개의 고정 크기 청크로 분할 (서버측)
//! - ChunkPacket: `[u32 BE index][payload]` 와이어 형식
//! - ChunkSlots: 인덱스별 슬롯, 인덱스당 한 번만 기록 (클라이언트측)

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, Result, INDEX_TAG_LEN, SENTINEL_INDEX};

/// 청크 인덱스 (32비트, 0..N-1)
pub type ChunkIndex = u32;

/// 청크 (불변 바이트 구간)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 청크 인덱스
    pub index: ChunkIndex,

    /// 실제 데이터 (마지막 청크는 더 짧을 수 있음)
    pub data: Bytes,
}

/// 데이터 패킷 (서버 → 클라이언트)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPacket {
    pub index: ChunkIndex,
    pub payload: Bytes,
}

impl ChunkPacket {
    pub fn new(index: ChunkIndex, payload: Bytes) -> Self {
        Self { index, payload }
    }

    /// 데이터 소진 센티넬 (페이로드 없음)
    pub fn sentinel() -> Self {
        Self {
            index: SENTINEL_INDEX,
            payload: Bytes::new(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.index == SENTINEL_INDEX
    }

    /// 바이트로 직렬화
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(INDEX_TAG_LEN + self.payload.len());
        buf.put_u32(self.index);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// 바이트에서 역직렬화
    ///
    /// 태그보다 짧은 데이터그램은 잘라내지 않고 `ShortRead`로 거부한다.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < INDEX_TAG_LEN {
            return Err(Error::ShortRead {
                expected: INDEX_TAG_LEN,
                got: bytes.len(),
            });
        }

        let mut buf = bytes;
        let index = buf.get_u32();

        if index == SENTINEL_INDEX && !buf.is_empty() {
            return Err(Error::ProtocolViolation(format!(
                "센티넬에 페이로드 {} bytes",
                buf.len()
            )));
        }

        Ok(Self {
            index,
            payload: Bytes::copy_from_slice(buf),
        })
    }
}

impl From<&Chunk> for ChunkPacket {
    fn from(chunk: &Chunk) -> Self {
        Self::new(chunk.index, chunk.data.clone())
    }
}

/// 분할 계획 (송신측)
///
/// `chunk_size = clamp(ceil(L / D), 1, C)`, `N = chunks.len()`.
/// 클라이언트에 전달되는 값은 항상 실제 N이며 D가 아니다.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    chunk_size: usize,
    chunks: Vec<Chunk>,
    file_size: usize,
}

impl ChunkPlan {
    /// 데이터를 청크들로 분할
    pub fn build(data: Bytes, desired_chunks: u32, max_payload: usize) -> Result<Self> {
        let file_size = data.len();
        let desired = desired_chunks.max(1) as usize;
        let chunk_size = ((file_size + desired - 1) / desired).clamp(1, max_payload.max(1));

        let total = (file_size + chunk_size - 1) / chunk_size;
        if total >= SENTINEL_INDEX as usize {
            return Err(Error::FileTooLarge {
                size: file_size as u64,
            });
        }

        let chunks = (0..total)
            .map(|idx| {
                let start = idx * chunk_size;
                let end = (start + chunk_size).min(file_size);
                Chunk {
                    index: idx as ChunkIndex,
                    data: data.slice(start..end),
                }
            })
            .collect();

        Ok(Self {
            chunk_size,
            chunks,
            file_size,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// 실제 청크 수 N
    pub fn total_chunks(&self) -> u32 {
        self.chunks.len() as u32
    }

    pub fn file_size(&self) -> usize {
        self.file_size
    }

    pub fn chunk(&self, index: ChunkIndex) -> Option<&Chunk> {
        self.chunks.get(index as usize)
    }
}

/// 재조립 슬롯 (수신측)
#[derive(Debug)]
pub struct ChunkSlots {
    slots: Vec<Option<Bytes>>,

    /// 청크당 최대 크기
    chunk_size: usize,

    /// 채워진 슬롯 수 (단조 증가)
    received_count: u32,

    received_bytes: usize,
}

impl ChunkSlots {
    pub fn new(total_chunks: u32, chunk_size: usize) -> Self {
        Self {
            slots: vec![None; total_chunks as usize],
            chunk_size,
            received_count: 0,
            received_bytes: 0,
        }
    }

    /// 청크 삽입
    ///
    /// 새로 채웠으면 `Ok(true)`, 이미 받은 인덱스면 `Ok(false)`.
    pub fn insert(&mut self, index: ChunkIndex, payload: Bytes) -> Result<bool> {
        let slot = self.slots.get_mut(index as usize).ok_or_else(|| {
            Error::ProtocolViolation(format!("범위 밖 인덱스 {}", index))
        })?;

        if payload.len() > self.chunk_size {
            return Err(Error::ProtocolViolation(format!(
                "청크 {} 크기 {} > {}",
                index,
                payload.len(),
                self.chunk_size
            )));
        }

        // 이미 받은 청크면 무시
        if slot.is_some() {
            return Ok(false);
        }

        self.received_bytes += payload.len();
        *slot = Some(payload);
        self.received_count += 1;
        Ok(true)
    }

    pub fn total_chunks(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn received_count(&self) -> u32 {
        self.received_count
    }

    /// 완료 여부 확인
    pub fn is_complete(&self) -> bool {
        self.received_count == self.total_chunks()
    }

    /// 가장 작은 누락 인덱스
    pub fn first_missing(&self) -> Option<ChunkIndex> {
        self.slots
            .iter()
            .position(Option::is_none)
            .map(|idx| idx as ChunkIndex)
    }

    /// 수신률 계산
    pub fn receive_ratio(&self) -> f64 {
        if self.slots.is_empty() {
            return 1.0;
        }
        self.received_count as f64 / self.slots.len() as f64
    }

    /// 인덱스 순서로 이어 붙여 원본 바이트 복원
    ///
    /// 빈 슬롯은 빈 페이로드로 취급한다.
    pub fn finalize(self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.received_bytes);
        for payload in self.slots.into_iter().flatten() {
            out.put(payload);
        }
        out.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize) -> Bytes {
        (0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
    }

    fn chunks(plan: &ChunkPlan) -> Vec<&Chunk> {
        (0..plan.total_chunks()).filter_map(|i| plan.chunk(i)).collect()
    }

    fn concat(plan: &ChunkPlan) -> Vec<u8> {
        chunks(plan)
            .iter()
            .flat_map(|c| c.data.iter().copied())
            .collect()
    }

    #[test]
    fn test_plan_concrete_scenario() {
        let data = sample(10_000);
        let plan = ChunkPlan::build(data.clone(), 100, 1396).unwrap();

        assert_eq!(plan.chunk_size(), 100);
        assert_eq!(plan.total_chunks(), 100);
        assert_eq!(concat(&plan), data.as_ref());
    }

    #[test]
    fn test_plan_round_trip_various_sizes() {
        for len in [1usize, 2, 7, 99, 100, 101, 1396, 1397, 5000] {
            for desired in [1u32, 3, 10, 100, 10_000] {
                let data = sample(len);
                let plan = ChunkPlan::build(data.clone(), desired, 1396).unwrap();

                assert_eq!(concat(&plan), data.as_ref(), "len={} desired={}", len, desired);
                assert!(chunks(&plan).iter().all(|c| c.data.len() <= plan.chunk_size()));
                assert!(plan.chunk_size() <= 1396);
                for (i, chunk) in chunks(&plan).iter().enumerate() {
                    assert_eq!(chunk.index as usize, i);
                }
            }
        }
    }

    #[test]
    fn test_plan_clamps_to_ceiling() {
        // 희망 청크 수 1이면 ceil(L/1) = L 이지만 상한에 걸림
        let plan = ChunkPlan::build(sample(5000), 1, 1396).unwrap();
        assert_eq!(plan.chunk_size(), 1396);
        assert_eq!(plan.total_chunks(), 4);
        assert_eq!(plan.chunk(3).unwrap().data.len(), 5000 - 3 * 1396);
    }

    #[test]
    fn test_plan_more_chunks_than_bytes() {
        let plan = ChunkPlan::build(sample(7), 100, 1396).unwrap();
        assert_eq!(plan.chunk_size(), 1);
        assert_eq!(plan.total_chunks(), 7);
    }

    #[test]
    fn test_plan_zero_length() {
        let plan = ChunkPlan::build(Bytes::new(), 100, 1396).unwrap();
        assert_eq!(plan.total_chunks(), 0);
        assert_eq!(plan.file_size(), 0);
    }

    #[test]
    fn test_plan_zero_desired_treated_as_one() {
        let plan = ChunkPlan::build(sample(10), 0, 1396).unwrap();
        assert_eq!(plan.total_chunks(), 1);
    }

    #[test]
    fn test_packet_wire_layout() {
        let packet = ChunkPacket::new(0x0102_0304, Bytes::from_static(b"abc"));
        let bytes = packet.encode();
        assert_eq!(bytes.as_ref(), &[1, 2, 3, 4, b'a', b'b', b'c']);
        assert_eq!(ChunkPacket::decode(&bytes).unwrap(), packet);

        let sentinel = ChunkPacket::sentinel().encode();
        assert_eq!(sentinel.as_ref(), &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(ChunkPacket::decode(&sentinel).unwrap().is_sentinel());
    }

    #[test]
    fn test_packet_short_read() {
        let err = ChunkPacket::decode(&[0, 1, 2]).unwrap_err();
        assert!(matches!(err, Error::ShortRead { expected: 4, got: 3 }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_sentinel_with_payload_is_violation() {
        let err = ChunkPacket::decode(&[0xFF, 0xFF, 0xFF, 0xFF, 1]).unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
    }

    #[test]
    fn test_slots_duplicate_is_noop() {
        let mut slots = ChunkSlots::new(3, 2);
        assert!(slots.insert(1, Bytes::from_static(b"cd")).unwrap());
        assert!(!slots.insert(1, Bytes::from_static(b"zz")).unwrap());
        assert_eq!(slots.received_count(), 1);
        assert_eq!(slots.first_missing(), Some(0));

        slots.insert(0, Bytes::from_static(b"ab")).unwrap();
        assert_eq!(slots.first_missing(), Some(2));
        slots.insert(2, Bytes::from_static(b"e")).unwrap();
        assert!(slots.is_complete());
        assert_eq!(slots.finalize().as_ref(), b"abcde");
    }

    #[test]
    fn test_slots_reject_bad_chunks() {
        let mut slots = ChunkSlots::new(2, 2);
        assert!(slots.insert(2, Bytes::from_static(b"a")).is_err());
        assert!(slots.insert(0, Bytes::from_static(b"abc")).is_err());
        assert_eq!(slots.received_count(), 0);
    }

    #[test]
    fn test_slots_finalize_with_gap() {
        let mut slots = ChunkSlots::new(3, 1);
        slots.insert(0, Bytes::from_static(b"a")).unwrap();
        slots.insert(2, Bytes::from_static(b"c")).unwrap();
        assert!(!slots.is_complete());
        assert_eq!(slots.finalize().as_ref(), b"ac");
    }

    #[test]
    fn test_slots_empty_is_complete() {
        let slots = ChunkSlots::new(0, 1);
        assert!(slots.is_complete());
        assert_eq!(slots.first_missing(), None);
        assert!(slots.finalize().is_empty());
    }
}
