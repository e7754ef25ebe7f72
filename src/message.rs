//! 제어 메시지 정의
//!
//! 핸드쉐이크와 pull 요청은 모두 UTF-8 텍스트 토큰이다.
//! 데이터 청크는 `chunk::ChunkPacket` 바이너리 형식을 사용한다.

use crate::chunk::ChunkIndex;

/// 핸드쉐이크 준비 / 응답
pub const TOKEN_READY: &str = "rdy";

/// 파일 없음 응답
pub const TOKEN_NO_FILE: &str = "ERR_NOFILE";

/// 전송 준비 완료 (첫 pull 겸용)
pub const TOKEN_TRANSFER_READY: &str = "rdyD";

/// 다음 청크 요청
pub const TOKEN_NEXT: &str = "next";

/// 구버전 클라이언트의 첫 pull 토큰
pub const TOKEN_NEXT_LEGACY: &str = "chunk index";

/// 특정 청크 재요청 접두어
pub const TOKEN_RESEND: &str = "get";

/// 세션 종료
pub const TOKEN_CLOSE: &str = "close";

/// 청크 수 협상 응답 접두어
pub const TOKEN_NUM: &str = "NUM";

/// 파일 이름으로 쓸 수 없는 예약 토큰
pub const RESERVED_TOKENS: &[&str] = &[
    TOKEN_READY,
    TOKEN_NO_FILE,
    TOKEN_TRANSFER_READY,
    TOKEN_NEXT,
    TOKEN_NEXT_LEGACY,
    TOKEN_CLOSE,
];

/// 제어 메시지
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// `rdy`
    Ready,

    /// 파일 요청 / 서버의 에코 응답
    Filename(String),

    /// `ERR_NOFILE`
    NoSuchFile,

    /// 희망 청크 수 (10진 텍스트)
    DesiredChunks(u32),

    /// `NUM <total> <chunk_size>`
    ChunkCount { total_chunks: u32, chunk_size: u32 },

    /// `rdyD`
    TransferReady,

    /// `next`
    Next,

    /// `get <index>`
    Resend(ChunkIndex),

    /// `close`
    Close,
}

impl ControlMessage {
    /// 바이트로 직렬화
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            ControlMessage::Ready => TOKEN_READY.into(),
            ControlMessage::Filename(name) => name.as_bytes().to_vec(),
            ControlMessage::NoSuchFile => TOKEN_NO_FILE.into(),
            ControlMessage::DesiredChunks(count) => count.to_string().into_bytes(),
            ControlMessage::ChunkCount {
                total_chunks,
                chunk_size,
            } => format!("{} {} {}", TOKEN_NUM, total_chunks, chunk_size).into_bytes(),
            ControlMessage::TransferReady => TOKEN_TRANSFER_READY.into(),
            ControlMessage::Next => TOKEN_NEXT.into(),
            ControlMessage::Resend(index) => format!("{} {}", TOKEN_RESEND, index).into_bytes(),
            ControlMessage::Close => TOKEN_CLOSE.into(),
        }
    }

    /// 고정 토큰 파싱
    ///
    /// 인식할 수 없는 텍스트는 `None`; 파일 이름 여부는 호출측이
    /// 상태에 따라 판단한다 (`Filename`은 여기서 만들지 않음).
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let text = String::from_utf8_lossy(bytes);
        let text = text.trim();

        match text {
            TOKEN_READY => return Some(ControlMessage::Ready),
            TOKEN_NO_FILE => return Some(ControlMessage::NoSuchFile),
            TOKEN_TRANSFER_READY => return Some(ControlMessage::TransferReady),
            _ => {}
        }

        let lower = text.to_ascii_lowercase();
        match lower.as_str() {
            TOKEN_NEXT | TOKEN_NEXT_LEGACY => return Some(ControlMessage::Next),
            TOKEN_CLOSE => return Some(ControlMessage::Close),
            _ => {}
        }

        let mut parts = text.split_whitespace();
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(TOKEN_NUM), Some(total), Some(size), None) => {
                Some(ControlMessage::ChunkCount {
                    total_chunks: total.parse().ok()?,
                    chunk_size: size.parse().ok()?,
                })
            }
            (Some(prefix), Some(index), None, None) if prefix.eq_ignore_ascii_case(TOKEN_RESEND) => {
                index.parse().ok().map(ControlMessage::Resend)
            }
            (Some(count), None, None, None) => count.parse().ok().map(ControlMessage::DesiredChunks),
            _ => None,
        }
    }

    /// 파일 이름으로 해석 (공백 제거, 비어 있으면 `None`)
    pub fn parse_filename(bytes: &[u8]) -> Option<String> {
        let text = String::from_utf8_lossy(bytes);
        let name = text.trim();
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    }

    /// pull 성격의 요청인지 (`rdyD`, `next`)
    pub fn is_pull(&self) -> bool {
        matches!(self, ControlMessage::TransferReady | ControlMessage::Next)
    }
}

/// 예약 토큰과 충돌하지 않는 파일 이름인지
pub fn is_valid_filename(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty()
        && trimmed == name
        && !RESERVED_TOKENS
            .iter()
            .any(|token| token.eq_ignore_ascii_case(trimmed))
        && ControlMessage::parse(name.as_bytes()).is_none()
}
