//! 에러 타입 정의

use thiserror::Error;

/// PFT 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("서버가 준비되지 않음 (rdy 응답 없음)")]
    NotReady,

    #[error("파일 없음: {name}")]
    FileNotFound { name: String },

    #[error("유효하지 않은 파일 이름: {name:?}")]
    InvalidFilename { name: String },

    #[error("프로토콜 위반: {0}")]
    ProtocolViolation(String),

    #[error("헤더 길이 부족: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    #[error("전송 시간 초과: {received}/{total} 청크 수신")]
    TransferTimedOut { received: u32, total: u32 },

    #[error("핸드쉐이크 시간 초과: stage={stage}")]
    HandshakeTimeout { stage: &'static str },

    #[error("파일이 너무 큼: {size} bytes")]
    FileTooLarge { size: u64 },

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// 세션 하나만 실패시키고 서버는 계속 동작할 수 있는 에러인지
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Io(e) => e.kind() == std::io::ErrorKind::ConnectionReset,
            Error::InvalidConfig(_) => false,
            _ => true,
        }
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
