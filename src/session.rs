//! 세션 정의
//!
//! 세션은 전송 시도 하나의 수명 (핸드쉐이크 완료 ~ close 또는 폐기)

use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;

use crate::chunk::ChunkPlan;
use crate::sender::DeliveryLoop;

/// 협상이 끝난 전송 세션
#[derive(Debug, Clone)]
pub struct Session {
    /// 상대 주소
    pub peer: SocketAddr,

    /// 협상된 파일 이름
    pub filename: String,

    /// 총 청크 수 N
    pub total_chunks: u32,

    /// 청크 크기 S
    pub chunk_size: usize,

    /// 생성 시간
    pub created_at: Instant,
}

impl Session {
    pub fn new(peer: SocketAddr, filename: String, total_chunks: u32, chunk_size: usize) -> Self {
        Self {
            peer,
            filename,
            total_chunks,
            chunk_size,
            created_at: Instant::now(),
        }
    }
}

/// 서버 상태 머신
///
/// `Listening → Handshaking → Negotiating → AwaitingTransfer → Serving → Closed`,
/// 종료 전이 후에는 다시 `Listening`.
pub enum ServerState {
    /// `rdy` 대기
    Listening,

    /// 파일 이름 대기
    Handshaking { peer: SocketAddr },

    /// 희망 청크 수 대기
    Negotiating {
        peer: SocketAddr,
        filename: String,
        data: Bytes,
    },

    /// `NUM` 응답 후 `rdyD` 대기
    AwaitingTransfer { session: Session, plan: ChunkPlan },

    /// pull 요청 처리 중
    Serving {
        session: Session,
        delivery: DeliveryLoop,
    },

    /// 세션 종료 (close 수신 또는 폐기)
    Closed { session: Option<Session>, completed: bool },
}

impl ServerState {
    pub fn name(&self) -> &'static str {
        match self {
            ServerState::Listening => "Listening",
            ServerState::Handshaking { .. } => "Handshaking",
            ServerState::Negotiating { .. } => "Negotiating",
            ServerState::AwaitingTransfer { .. } => "AwaitingTransfer",
            ServerState::Serving { .. } => "Serving",
            ServerState::Closed { .. } => "Closed",
        }
    }

    /// 현재 상태의 상대 주소 (Listening이면 없음)
    pub fn peer(&self) -> Option<SocketAddr> {
        match self {
            ServerState::Listening => None,
            ServerState::Handshaking { peer } | ServerState::Negotiating { peer, .. } => Some(*peer),
            ServerState::AwaitingTransfer { session, .. } | ServerState::Serving { session, .. } => {
                Some(session.peer)
            }
            ServerState::Closed { session, .. } => session.as_ref().map(|s| s.peer),
        }
    }

    /// 협상이 끝난 세션 (AwaitingTransfer 이후)
    pub fn session(&self) -> Option<&Session> {
        match self {
            ServerState::AwaitingTransfer { session, .. } | ServerState::Serving { session, .. } => {
                Some(session)
            }
            ServerState::Closed { session, .. } => session.as_ref(),
            _ => None,
        }
    }
}

impl fmt::Debug for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.peer() {
            Some(peer) => write!(f, "{}({})", self.name(), peer),
            None => f.write_str(self.name()),
        }
    }
}
