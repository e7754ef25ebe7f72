//! 프로토콜 설정

use std::time::Duration;

use crate::{Error, Result, DEFAULT_DESIRED_CHUNKS, DEFAULT_MAX_PAYLOAD, INDEX_TAG_LEN, MAX_DATAGRAM};

/// PFT 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 청크 페이로드 상한 (바이트)
    /// 인덱스 태그와 합쳐 MAX_DATAGRAM 이하여야 함
    pub max_payload: usize,

    /// 수신 버퍼 크기 (바이트)
    pub recv_buffer_size: usize,

    /// 클라이언트가 요청하는 희망 청크 수
    /// 서버 측에서는 파싱 실패 시 기본값으로 사용
    pub desired_chunks: u32,

    /// 데이터 수신 타임아웃 (밀리초)
    /// 초과 시 마지막 요청 재전송
    pub recv_timeout_ms: u64,

    /// 핸드쉐이크 단계별 응답 타임아웃 (밀리초)
    pub handshake_timeout_ms: u64,

    /// 핸드쉐이크 단계별 재시도 횟수
    pub handshake_retries: u32,

    /// 클라이언트 전체 전송 마감 (밀리초)
    pub transfer_deadline_ms: u64,

    /// 서버 세션 유휴 타임아웃 (밀리초)
    /// 피어가 이 시간 동안 조용하면 세션 폐기
    pub session_idle_timeout_ms: u64,

    /// close 토큰 반복 전송 횟수
    pub close_repeats: u32,

    /// 대기 상태에서 정지 플래그 확인 주기 (밀리초)
    pub poll_interval_ms: u64,

    /// 클라이언트가 받아들이는 최대 파일 크기 (바이트)
    /// 서버가 알려준 (N, S)가 이보다 큰 파일을 뜻하면 거부
    pub max_file_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,    // 1396
            recv_buffer_size: 65535,
            desired_chunks: DEFAULT_DESIRED_CHUNKS,
            recv_timeout_ms: 2000,               // 2초
            handshake_timeout_ms: 5000,          // 5초
            handshake_retries: 3,
            transfer_deadline_ms: 120_000,       // 2분
            session_idle_timeout_ms: 30_000,     // 30초
            close_repeats: 3,
            poll_interval_ms: 100,
            max_file_size: 1 << 30,              // 1 GiB
        }
    }
}

impl Config {
    /// 저지연 로컬 네트워크용 설정
    pub fn low_latency() -> Self {
        Self {
            recv_timeout_ms: 50,
            handshake_timeout_ms: 500,
            handshake_retries: 5,
            transfer_deadline_ms: 30_000,
            session_idle_timeout_ms: 5_000,
            poll_interval_ms: 20,
            ..Self::default()
        }
    }

    /// 손실 많은 네트워크용 설정
    pub fn lossy_network() -> Self {
        Self {
            max_payload: 1000,                   // 작은 청크
            recv_timeout_ms: 500,
            handshake_timeout_ms: 2000,
            handshake_retries: 10,
            transfer_deadline_ms: 600_000,
            session_idle_timeout_ms: 60_000,
            close_repeats: 5,
            ..Self::default()
        }
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.max_payload == 0 {
            return Err(Error::InvalidConfig("max_payload는 1 이상이어야 함".into()));
        }
        if self.max_payload + INDEX_TAG_LEN > MAX_DATAGRAM {
            return Err(Error::InvalidConfig(format!(
                "max_payload {} + 태그 {} > 데이터그램 상한 {}",
                self.max_payload, INDEX_TAG_LEN, MAX_DATAGRAM
            )));
        }
        if self.recv_buffer_size < MAX_DATAGRAM {
            return Err(Error::InvalidConfig(format!(
                "recv_buffer_size {} < {}",
                self.recv_buffer_size, MAX_DATAGRAM
            )));
        }
        if self.max_file_size == 0 {
            return Err(Error::InvalidConfig("max_file_size는 1 이상이어야 함".into()));
        }
        if self.recv_timeout_ms == 0 || self.handshake_timeout_ms == 0 {
            return Err(Error::InvalidConfig("타임아웃은 0일 수 없음".into()));
        }
        Ok(())
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn transfer_deadline(&self) -> Duration {
        Duration::from_millis(self.transfer_deadline_ms)
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.session_idle_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
