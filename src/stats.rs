//! 전송 통계

use std::time::{Duration, Instant};

/// 전체 전송 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 완료된 세션 수 (close 수신 / 다운로드 완료)
    pub completed_sessions: u64,

    /// 폐기된 세션 수 (유휴 타임아웃, 에러)
    pub abandoned_sessions: u64,

    /// 송신 청크 수 (서버)
    pub chunks_sent: u64,

    /// 신규 수신 청크 수 (클라이언트)
    pub chunks_received: u64,

    /// 중복 수신 청크 수
    pub duplicate_chunks: u64,

    /// 청크 페이로드 바이트
    pub total_bytes: u64,

    /// pull 요청 수 (`rdyD`, `next`)
    pub pulls: u64,

    /// repair 요청 수 (`get <index>`)
    pub resend_requests: u64,

    /// 센티넬 송수신 수
    pub sentinels: u64,

    /// 수신 타임아웃 수
    pub timeouts: u64,

    /// 무시된 잘못된 데이터그램 수
    pub protocol_violations: u64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            completed_sessions: 0,
            abandoned_sessions: 0,
            chunks_sent: 0,
            chunks_received: 0,
            duplicate_chunks: 0,
            total_bytes: 0,
            pulls: 0,
            resend_requests: 0,
            sentinels: 0,
            timeouts: 0,
            protocol_violations: 0,
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.total_bytes as f64 / elapsed
    }

    /// 타임아웃 비율 (요청 대비)
    pub fn timeout_ratio(&self) -> f64 {
        let requests = self.pulls + self.resend_requests;
        if requests == 0 {
            return 0.0;
        }
        self.timeouts as f64 / requests as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Sent: {} | Received: {} (+{} dup) | Bytes: {} | Pulls: {} | Repairs: {} | Timeouts: {} | Violations: {} | Sessions: {} ok / {} abandoned",
            self.elapsed().as_secs_f64(),
            self.chunks_sent,
            self.chunks_received,
            self.duplicate_chunks,
            self.total_bytes,
            self.pulls,
            self.resend_requests,
            self.timeouts,
            self.protocol_violations,
            self.completed_sessions,
            self.abandoned_sessions,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}
