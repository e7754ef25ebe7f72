//! 수신자 (클라이언트측)
//!
//! - 핸드쉐이크/청크 수 협상
//! - 수신한 (또는 타임아웃된) 데이터그램마다 pull 요청 하나
//! - 인덱스 기반 중복 제거와 재조립

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::chunk::{ChunkPacket, ChunkSlots};
use crate::message::{is_valid_filename, ControlMessage};
use crate::session::Session;
use crate::stats::TransferStats;
use crate::transport::Transport;
use crate::{Config, Error, Result, INDEX_TAG_LEN, MAX_DATAGRAM, SENTINEL_INDEX};

/// 핸드쉐이크 응답 분류
enum Reply<R> {
    /// 현재 단계의 정상 응답
    Accept(R),

    /// 이전 단계의 중복 응답
    Stale,

    /// 세션 실패
    Reject(Error),
}

/// 완료된 다운로드
#[derive(Debug)]
pub struct Download {
    pub session: Session,
    pub data: Bytes,
    pub stats: TransferStats,
}

/// 파일 클라이언트
pub struct FileClient<T> {
    config: Config,
    transport: T,
    server_addr: SocketAddr,
    stats: TransferStats,
}

impl FileClient<UdpSocket> {
    /// UDP 소켓 바인딩 후 클라이언트 생성
    pub async fn connect(config: Config, bind_addr: SocketAddr, server_addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await?;
        Self::new(config, socket, server_addr)
    }
}

impl<T: Transport> FileClient<T> {
    pub fn new(config: Config, transport: T, server_addr: SocketAddr) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            transport,
            server_addr,
            stats: TransferStats::new(),
        })
    }

    /// 파일 하나 다운로드
    ///
    /// 모든 청크를 받은 뒤에만 데이터를 반환한다.
    pub async fn download(&mut self, filename: &str) -> Result<Download> {
        self.stats = TransferStats::new();

        let session = match self.negotiate(filename).await {
            Ok(session) => session,
            Err(e) => {
                // 서버가 핸드쉐이크 중간 상태에 남지 않도록
                if !matches!(e, Error::InvalidFilename { .. } | Error::FileNotFound { .. }) {
                    let _ = self.close(self.server_addr).await;
                }
                return Err(e);
            }
        };

        let slots = match self.receive_chunks(&session).await {
            Ok(slots) => slots,
            Err(e) => {
                // 서버 세션 해제 시도
                let _ = self.close(session.peer).await;
                self.stats.abandoned_sessions += 1;
                return Err(e);
            }
        };
        self.close(session.peer).await?;

        let data = slots.finalize();
        self.stats.completed_sessions += 1;

        info!(
            "다운로드 완료: {} ({} bytes, crc32={:08X}) - {}",
            session.filename,
            data.len(),
            crc32fast::hash(&data),
            self.stats.summary()
        );

        Ok(Download {
            session,
            data,
            stats: self.stats.clone(),
        })
    }

    /// 핸드쉐이크와 청크 수 협상
    pub async fn negotiate(&mut self, filename: &str) -> Result<Session> {
        if !is_valid_filename(filename) {
            return Err(Error::InvalidFilename {
                name: filename.to_string(),
            });
        }

        let drained = self.drain().await?;
        if drained > 0 {
            debug!("이전 세션 데이터그램 {}개 폐기", drained);
        }

        // 1. rdy
        self.exchange(&ControlMessage::Ready, "ready", |bytes| {
            match ControlMessage::parse(bytes) {
                Some(ControlMessage::Ready) => Reply::Accept(()),
                _ => Reply::Reject(Error::NotReady),
            }
        })
        .await
        .map_err(|e| match e {
            Error::HandshakeTimeout { .. } => Error::NotReady,
            other => other,
        })?;
        debug!("서버 준비 확인: {}", self.server_addr);

        // 2. 파일 이름
        let request = ControlMessage::Filename(filename.to_string());
        self.exchange(&request, "filename", |bytes| match ControlMessage::parse(bytes) {
            Some(ControlMessage::NoSuchFile) => Reply::Reject(Error::FileNotFound {
                name: filename.to_string(),
            }),
            Some(ControlMessage::Ready) => Reply::Stale,
            _ if ControlMessage::parse_filename(bytes).as_deref() == Some(filename) => {
                Reply::Accept(())
            }
            _ => Reply::Reject(Error::ProtocolViolation(format!(
                "파일 이름 에코 불일치: {:?}",
                String::from_utf8_lossy(bytes)
            ))),
        })
        .await?;

        // 3. 청크 수 협상
        let request = ControlMessage::DesiredChunks(self.config.desired_chunks);
        let (total_chunks, chunk_size) = self
            .exchange(&request, "chunk-count", |bytes| match ControlMessage::parse(bytes) {
                Some(ControlMessage::ChunkCount {
                    total_chunks,
                    chunk_size,
                }) => Reply::Accept((total_chunks, chunk_size)),
                Some(ControlMessage::Ready) => Reply::Stale,
                None if ControlMessage::parse_filename(bytes).as_deref() == Some(filename) => {
                    Reply::Stale
                }
                _ => Reply::Reject(Error::ProtocolViolation(format!(
                    "예상 외 협상 응답: {:?}",
                    String::from_utf8_lossy(bytes)
                ))),
            })
            .await?;

        validate_chunk_count(total_chunks, chunk_size, self.config.max_file_size)?;

        info!(
            "Server reports: total chunks={}, chunk_size={}",
            total_chunks, chunk_size
        );

        Ok(Session::new(
            self.server_addr,
            filename.to_string(),
            total_chunks,
            chunk_size as usize,
        ))
    }

    /// 재조립 루프
    ///
    /// `rdyD`가 첫 pull을 겸한다. 센티넬을 본 뒤에도 누락이 있으면
    /// `get <index>`로 가장 작은 누락 인덱스를 요청한다.
    pub async fn receive_chunks(&mut self, session: &Session) -> Result<ChunkSlots> {
        let mut slots = ChunkSlots::new(session.total_chunks, session.chunk_size);
        if slots.is_complete() {
            debug!("빈 파일: 전송 생략");
            return Ok(slots);
        }

        let deadline = Instant::now() + self.config.transfer_deadline();
        let mut buf = vec![0u8; self.config.recv_buffer_size];
        let mut last_progress = Instant::now();
        let mut repairing = false;

        let mut request = ControlMessage::TransferReady;
        self.send_request(&request, session.peer).await?;

        while !slots.is_complete() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(
                    "전송 마감 초과: {}/{} 청크",
                    slots.received_count(),
                    slots.total_chunks()
                );
                return Err(Error::TransferTimedOut {
                    received: slots.received_count(),
                    total: slots.total_chunks(),
                });
            }

            let wait = remaining.min(self.config.recv_timeout());
            let received = tokio::time::timeout(wait, self.transport.recv_from(&mut buf)).await;
            let (len, from) = match received {
                Ok(received) => received?,
                Err(_) => {
                    // 같은 요청 재전송, 상태 변화 없음
                    self.stats.timeouts += 1;
                    debug!("수신 타임아웃, 재요청: {:?}", request);
                    self.send_request(&request, session.peer).await?;
                    continue;
                }
            };

            if from != session.peer {
                debug!("서버 외 주소 {} 의 데이터그램 무시", from);
                continue;
            }

            match ChunkPacket::decode(&buf[..len]) {
                Ok(packet) if packet.is_sentinel() => {
                    self.stats.sentinels += 1;
                    if !repairing {
                        info!(
                            "서버 커서 소진, 누락 {} 청크 재요청",
                            slots.total_chunks() - slots.received_count()
                        );
                        repairing = true;
                    }
                }
                Ok(packet) => {
                    let index = packet.index;
                    let size = packet.payload.len();
                    match slots.insert(index, packet.payload) {
                        Ok(true) => {
                            self.stats.chunks_received += 1;
                            self.stats.total_bytes += size as u64;
                        }
                        Ok(false) => {
                            self.stats.duplicate_chunks += 1;
                        }
                        Err(e) => {
                            debug!("청크 무시: {}", e);
                            self.stats.protocol_violations += 1;
                        }
                    }
                }
                Err(e) => {
                    debug!("데이터그램 무시: {}", e);
                    self.stats.protocol_violations += 1;
                }
            }

            if last_progress.elapsed() > Duration::from_secs(2) {
                info!(
                    "Progress: {}/{} chunks ({:.1}%)",
                    slots.received_count(),
                    slots.total_chunks(),
                    slots.receive_ratio() * 100.0
                );
                last_progress = Instant::now();
            }

            if slots.is_complete() {
                break;
            }

            request = match slots.first_missing() {
                Some(index) if repairing => ControlMessage::Resend(index),
                _ => ControlMessage::Next,
            };
            self.send_request(&request, session.peer).await?;
        }

        Ok(slots)
    }

    /// close 전송 (손실 대비 반복)
    pub async fn close(&mut self, peer: SocketAddr) -> Result<()> {
        let bytes = ControlMessage::Close.to_bytes();
        for _ in 0..self.config.close_repeats.max(1) {
            self.transport.send_to(&bytes, peer).await?;
        }
        Ok(())
    }

    /// 요청/응답 한 단계 (타임아웃 시 재시도)
    async fn exchange<R>(
        &mut self,
        request: &ControlMessage,
        stage: &'static str,
        mut classify: impl FnMut(&[u8]) -> Reply<R>,
    ) -> Result<R> {
        let bytes = request.to_bytes();
        let mut buf = vec![0u8; self.config.recv_buffer_size];

        for attempt in 0..=self.config.handshake_retries {
            if attempt > 0 {
                debug!("{} 재시도 #{}", stage, attempt);
            }
            self.transport.send_to(&bytes, self.server_addr).await?;

            let deadline = Instant::now() + self.config.handshake_timeout();
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let received = tokio::time::timeout(remaining, self.transport.recv_from(&mut buf)).await;
                let (len, from) = match received {
                    Ok(received) => received?,
                    Err(_) => {
                        self.stats.timeouts += 1;
                        break;
                    }
                };

                if from != self.server_addr {
                    debug!("서버 외 주소 {} 의 데이터그램 무시", from);
                    continue;
                }

                match classify(&buf[..len]) {
                    Reply::Accept(value) => return Ok(value),
                    Reply::Stale => debug!("{}: 이전 단계 응답 무시", stage),
                    Reply::Reject(e) => return Err(e),
                }
            }
        }

        Err(Error::HandshakeTimeout { stage })
    }

    /// 이미 도착해 있는 데이터그램 버리기
    async fn drain(&mut self) -> Result<usize> {
        let mut buf = vec![0u8; self.config.recv_buffer_size];
        let mut drained = 0;
        while let Ok(received) =
            tokio::time::timeout(Duration::ZERO, self.transport.recv_from(&mut buf)).await
        {
            received?;
            drained += 1;
        }
        Ok(drained)
    }

    async fn send_request(&mut self, request: &ControlMessage, peer: SocketAddr) -> Result<()> {
        self.transport.send_to(&request.to_bytes(), peer).await?;
        match request {
            ControlMessage::Resend(_) => self.stats.resend_requests += 1,
            _ => self.stats.pulls += 1,
        }
        Ok(())
    }

    /// 통계 반환
    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }
}

/// 서버가 알려준 (N, S) 검증
///
/// 슬롯을 할당하기 전에 N개 청크가 뜻하는 최소 파일 크기를 상한과 비교한다.
fn validate_chunk_count(total_chunks: u32, chunk_size: u32, max_file_size: u64) -> Result<()> {
    if total_chunks == SENTINEL_INDEX {
        return Err(Error::ProtocolViolation("청크 수가 센티넬과 같음".into()));
    }
    if chunk_size == 0 || chunk_size as usize + INDEX_TAG_LEN > MAX_DATAGRAM {
        return Err(Error::ProtocolViolation(format!(
            "유효하지 않은 청크 크기: {}",
            chunk_size
        )));
    }
    let min_size = (total_chunks as u64).saturating_sub(1) * chunk_size as u64 + 1;
    if total_chunks > 0 && min_size > max_file_size {
        return Err(Error::FileTooLarge { size: min_size });
    }
    Ok(())
}
