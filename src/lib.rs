//! # PFT (Pull File Transfer)
//!
//! UDP 기반 pull 방식 순서 무관 파일 전송 프로토콜
//!
//! ## 핵심 특징
//! - **Pull 기반**: 클라이언트가 요청할 때마다 서버가 청크 하나를 전송
//! - **순서 무관**: 서버가 정한 (무작위) 순서로 청크 전달, 인덱스로 조립
//! - **타임아웃 재요청**: 수신 타임아웃이 유일한 재전송 트리거
//! - **Repair 요청**: 커서 소진 후 누락 청크만 인덱스로 재요청
//! - **명시적 상태 머신**: 핸드쉐이크 → 협상 → 전송 → 종료

pub mod chunk;
pub mod config;
pub mod error;
pub mod message;
pub mod order;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod stats;
pub mod store;
pub mod transport;

pub use chunk::{Chunk, ChunkIndex, ChunkPacket, ChunkPlan, ChunkSlots};
pub use config::Config;
pub use error::{Error, Result};
pub use message::ControlMessage;
pub use order::{FixedOrder, OrderGenerator, RandomOrder, SequentialOrder};
pub use receiver::{Download, FileClient};
pub use sender::{DeliveryLoop, FileServer};
pub use session::{ServerState, Session};
pub use stats::TransferStats;
pub use store::{DirStore, FileStore, MemoryStore};
pub use transport::{LossModel, MemoryTransport, Transport};

/// 전송 계층 데이터그램 최대 크기 (바이트)
pub const MAX_DATAGRAM: usize = 1400;

/// 청크 인덱스 태그 길이 (u32, big-endian)
pub const INDEX_TAG_LEN: usize = 4;

/// 기본 청크 페이로드 상한 (인덱스 태그 공간 예약)
pub const DEFAULT_MAX_PAYLOAD: usize = MAX_DATAGRAM - INDEX_TAG_LEN;

/// 기본 희망 청크 수
pub const DEFAULT_DESIRED_CHUNKS: u32 = 100;

/// 데이터 소진 센티넬 인덱스
pub const SENTINEL_INDEX: ChunkIndex = ChunkIndex::MAX;
