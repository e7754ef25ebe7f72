//! 송신자 (서버측)
//!
//! - 핸드쉐이크/협상 상태 머신
//! - pull 요청마다 전달 순서에 따라 청크 하나 전송
//! - 커서 소진 후에는 센티넬 반복

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::chunk::{ChunkIndex, ChunkPacket, ChunkPlan};
use crate::message::ControlMessage;
use crate::order::{is_permutation, OrderGenerator};
use crate::session::{ServerState, Session};
use crate::stats::TransferStats;
use crate::store::FileStore;
use crate::transport::Transport;
use crate::{Config, Error, Result};

/// 전달 루프 상태
///
/// 커서는 성공적인 전송마다 정확히 1씩 증가하며 되돌아가지 않는다.
#[derive(Debug)]
pub struct DeliveryLoop {
    plan: ChunkPlan,
    order: Vec<ChunkIndex>,
    cursor: usize,
}

impl DeliveryLoop {
    pub fn new(plan: ChunkPlan, order: Vec<ChunkIndex>) -> Result<Self> {
        if !is_permutation(&order, plan.total_chunks()) {
            return Err(Error::InvalidConfig(format!(
                "전달 순서가 0..{} 의 순열이 아님",
                plan.total_chunks()
            )));
        }
        Ok(Self {
            plan,
            order,
            cursor: 0,
        })
    }

    /// pull 응답: 다음 청크 또는 센티넬
    pub fn next_packet(&mut self) -> ChunkPacket {
        match self.order.get(self.cursor) {
            Some(&index) => {
                self.cursor += 1;
                self.packet_for(index)
            }
            None => ChunkPacket::sentinel(),
        }
    }

    /// repair 응답: 커서와 무관하게 지정 인덱스 청크
    pub fn packet_for(&self, index: ChunkIndex) -> ChunkPacket {
        self.plan
            .chunk(index)
            .map(ChunkPacket::from)
            .unwrap_or_else(ChunkPacket::sentinel)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.order.len()
    }
}

/// 파일 서버
pub struct FileServer<T, S, O> {
    /// 설정
    config: Config,

    /// 전송 계층
    transport: T,

    /// 파일 저장소
    store: S,

    /// 전달 순서 생성기
    order: O,

    /// 전송 통계
    stats: RwLock<TransferStats>,

    /// 실행 중 플래그
    running: AtomicBool,
}

impl<S, O> FileServer<UdpSocket, S, O>
where
    S: FileStore,
    O: OrderGenerator,
{
    /// UDP 소켓 바인딩 후 서버 생성
    pub async fn bind(config: Config, bind_addr: SocketAddr, store: S, order: O) -> Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await?;
        Self::new(config, socket, store, order)
    }
}

impl<T, S, O> FileServer<T, S, O>
where
    T: Transport,
    S: FileStore,
    O: OrderGenerator,
{
    /// 새 서버 생성
    pub fn new(config: Config, transport: T, store: S, order: O) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            transport,
            store,
            order,
            stats: RwLock::new(TransferStats::new()),
            running: AtomicBool::new(true),
        })
    }

    /// 세션을 하나씩 끝까지 처리 (stop 호출 전까지)
    ///
    /// 세션 안의 실패는 그 세션만 폐기한다. 수신 소켓 자체의 에러만
    /// 루프를 끝낸다.
    pub async fn run(&self) -> Result<()> {
        info!("PFT server listening on {}", self.transport.local_addr()?);

        while self.running.load(Ordering::SeqCst) {
            match self.serve_session().await {
                Ok(Some(session)) => {
                    info!(
                        "세션 종료: {} -> {} ({} chunks, {:.2}s)",
                        session.filename,
                        session.peer,
                        session.total_chunks,
                        session.created_at.elapsed().as_secs_f64()
                    );
                }
                Ok(None) => {}
                Err(e) if !e.is_recoverable() => return Err(e),
                Err(e) => {
                    warn!("세션 중단: {}", e);
                    self.stats.write().abandoned_sessions += 1;
                }
            }
        }

        info!("PFT server stopped: {}", self.stats.read().summary());
        Ok(())
    }

    /// 세션 하나 처리
    ///
    /// close로 끝난 세션은 `Some(session)`, 세션 없이 Listening으로
    /// 돌아가거나 정지되면 `None`. `Err`는 수신 소켓 에러뿐이다.
    pub async fn serve_session(&self) -> Result<Option<Session>> {
        let mut state = ServerState::Listening;
        let mut buf = vec![0u8; self.config.recv_buffer_size];
        let mut last_activity = Instant::now();

        loop {
            if let ServerState::Closed { session, completed } = state {
                let mut stats = self.stats.write();
                if completed {
                    stats.completed_sessions += 1;
                } else {
                    stats.abandoned_sessions += 1;
                }
                return Ok(session.filter(|_| completed));
            }

            let peer = state.peer();
            let wait = match peer {
                None => self.config.poll_interval(),
                Some(_) => self
                    .config
                    .session_idle_timeout()
                    .saturating_sub(last_activity.elapsed()),
            };

            let (len, from) = match self.recv_within(&mut buf, wait).await? {
                Some(received) => received,
                None if peer.is_none() => {
                    if !self.running.load(Ordering::SeqCst) {
                        return Ok(None);
                    }
                    continue;
                }
                None => {
                    warn!("세션 유휴 타임아웃: {:?}", state);
                    self.stats.write().timeouts += 1;
                    state = match state {
                        ServerState::AwaitingTransfer { session, .. }
                        | ServerState::Serving { session, .. } => ServerState::Closed {
                            session: Some(session),
                            completed: false,
                        },
                        _ => ServerState::Closed {
                            session: None,
                            completed: false,
                        },
                    };
                    continue;
                }
            };

            if let Some(peer) = peer {
                if from != peer {
                    debug!("세션 외 주소 {} 의 데이터그램 무시", from);
                    continue;
                }
            }
            last_activity = Instant::now();

            // 저장소/송신 실패는 이 세션만 끝낸다
            state = match self.step(state, &buf[..len], from).await {
                Ok(next) => next,
                Err(e) => {
                    warn!("세션 중단 ({}): {}", from, e);
                    ServerState::Closed {
                        session: None,
                        completed: false,
                    }
                }
            };
            if matches!(state, ServerState::Listening) && peer.is_some() {
                // 세션 없이 종료된 핸드쉐이크
                return Ok(None);
            }
        }
    }

    /// 상태 전이 하나
    async fn step(&self, state: ServerState, data: &[u8], from: SocketAddr) -> Result<ServerState> {
        let message = ControlMessage::parse(data);

        // 핸드쉐이크 이후의 rdy: 같은 피어가 새로 시작
        if matches!(message, Some(ControlMessage::Ready))
            && !matches!(state, ServerState::Listening | ServerState::Handshaking { .. })
        {
            info!("{:?}: 피어가 핸드쉐이크를 다시 시작", state);
            if state.session().is_some() {
                self.stats.write().abandoned_sessions += 1;
            }
            self.send_control(&ControlMessage::Ready, from).await?;
            return Ok(ServerState::Handshaking { peer: from });
        }

        let next = match state {
            ServerState::Listening => match message {
                Some(ControlMessage::Ready) => {
                    self.send_control(&ControlMessage::Ready, from).await?;
                    debug!("핸드쉐이크 시작: {}", from);
                    ServerState::Handshaking { peer: from }
                }
                _ => {
                    self.ignore(&state, data);
                    state
                }
            },

            ServerState::Handshaking { peer } => match message {
                // rdy 응답 손실로 인한 재시도
                Some(ControlMessage::Ready) => {
                    self.send_control(&ControlMessage::Ready, peer).await?;
                    state
                }
                Some(ControlMessage::Close) => ServerState::Listening,
                Some(_) => {
                    self.ignore(&state, data);
                    state
                }
                None => match ControlMessage::parse_filename(data) {
                    Some(filename) => self.open_file(peer, filename).await?,
                    None => {
                        self.ignore(&state, data);
                        state
                    }
                },
            },

            ServerState::Negotiating {
                peer,
                filename,
                data: file_data,
            } => {
                let desired = match message {
                    Some(ControlMessage::DesiredChunks(desired)) => desired,
                    Some(ControlMessage::Close) => return Ok(ServerState::Listening),
                    Some(_) => {
                        debug!("협상 중 예상 외 토큰 무시: {:?}", message);
                        self.stats.write().protocol_violations += 1;
                        return Ok(ServerState::Negotiating {
                            peer,
                            filename,
                            data: file_data,
                        });
                    }
                    None if ControlMessage::parse_filename(data).as_deref() == Some(filename.as_str()) => {
                        // 에코 응답 손실로 인한 재시도
                        self.send_control(&ControlMessage::Filename(filename.clone()), peer)
                            .await?;
                        return Ok(ServerState::Negotiating {
                            peer,
                            filename,
                            data: file_data,
                        });
                    }
                    None => {
                        warn!(
                            "청크 수 파싱 실패, 기본값 {} 사용",
                            self.config.desired_chunks
                        );
                        self.config.desired_chunks
                    }
                };

                let plan = ChunkPlan::build(file_data, desired, self.config.max_payload)?;
                let session = Session::new(peer, filename, plan.total_chunks(), plan.chunk_size());
                self.send_chunk_count(&plan, peer).await?;

                debug!(
                    "협상 완료: {} bytes, desired={} -> N={}, S={}",
                    plan.file_size(),
                    desired,
                    plan.total_chunks(),
                    plan.chunk_size()
                );
                ServerState::AwaitingTransfer { session, plan }
            }

            ServerState::AwaitingTransfer { session, plan } => match message {
                Some(ControlMessage::TransferReady) => {
                    let order = self.order.permutation(plan.total_chunks());
                    let mut delivery = DeliveryLoop::new(plan, order)?;
                    info!(
                        "전송 시작: {} -> {} ({} chunks x {} bytes)",
                        session.filename, session.peer, session.total_chunks, session.chunk_size
                    );

                    // rdyD는 첫 pull을 겸함
                    self.serve_pull(&mut delivery, session.peer).await?;
                    ServerState::Serving { session, delivery }
                }
                // NUM 응답 손실로 인한 재시도
                Some(ControlMessage::DesiredChunks(_)) => {
                    self.send_chunk_count(&plan, session.peer).await?;
                    ServerState::AwaitingTransfer { session, plan }
                }
                // 빈 파일만 rdyD 없이 정상 종료
                Some(ControlMessage::Close) => ServerState::Closed {
                    completed: plan.total_chunks() == 0,
                    session: Some(session),
                },
                _ => {
                    debug!("rdyD 대기 중 데이터그램 무시: {} bytes", data.len());
                    self.stats.write().protocol_violations += 1;
                    ServerState::AwaitingTransfer { session, plan }
                }
            },

            ServerState::Serving {
                session,
                mut delivery,
            } => {
                match message {
                    Some(ref m) if m.is_pull() => {
                        self.serve_pull(&mut delivery, session.peer).await?;
                    }
                    Some(ControlMessage::Resend(index)) => {
                        let packet = delivery.packet_for(index);
                        self.send_packet(&packet, session.peer).await?;
                        self.stats.write().resend_requests += 1;
                    }
                    Some(ControlMessage::Close) => {
                        if !delivery.is_exhausted() {
                            warn!(
                                "전송 도중 close: {}/{} 청크 전달",
                                delivery.cursor(),
                                session.total_chunks
                            );
                        }
                        return Ok(ServerState::Closed {
                            session: Some(session),
                            completed: true,
                        });
                    }
                    _ => {
                        debug!("전송 중 예상 외 데이터그램 무시: {} bytes", data.len());
                        self.stats.write().protocol_violations += 1;
                    }
                }
                ServerState::Serving { session, delivery }
            }

            closed @ ServerState::Closed { .. } => closed,
        };

        Ok(next)
    }

    /// 파일 조회 후 에코 또는 ERR_NOFILE 응답
    async fn open_file(&self, peer: SocketAddr, filename: String) -> Result<ServerState> {
        let data = match self.store.lookup(&filename) {
            Ok(Some(data)) => data,
            Ok(None) => {
                info!("파일 없음: {:?} (요청: {})", filename, peer);
                self.send_control(&ControlMessage::NoSuchFile, peer).await?;
                return Ok(ServerState::Listening);
            }
            Err(e) => {
                self.send_control(&ControlMessage::NoSuchFile, peer).await?;
                return Err(e);
            }
        };

        info!(
            "파일 요청: {:?} ({} bytes, crc32={:08X}) from {}",
            filename,
            data.len(),
            crc32fast::hash(&data),
            peer
        );
        self.send_control(&ControlMessage::Filename(filename.clone()), peer)
            .await?;

        Ok(ServerState::Negotiating {
            peer,
            filename,
            data,
        })
    }

    async fn serve_pull(&self, delivery: &mut DeliveryLoop, peer: SocketAddr) -> Result<()> {
        let packet = delivery.next_packet();
        self.send_packet(&packet, peer).await?;
        self.stats.write().pulls += 1;
        Ok(())
    }

    async fn send_chunk_count(&self, plan: &ChunkPlan, peer: SocketAddr) -> Result<()> {
        let reply = ControlMessage::ChunkCount {
            total_chunks: plan.total_chunks(),
            chunk_size: plan.chunk_size() as u32,
        };
        self.send_control(&reply, peer).await
    }

    async fn send_control(&self, message: &ControlMessage, peer: SocketAddr) -> Result<()> {
        self.transport.send_to(&message.to_bytes(), peer).await?;
        Ok(())
    }

    async fn send_packet(&self, packet: &ChunkPacket, peer: SocketAddr) -> Result<()> {
        self.transport.send_to(&packet.encode(), peer).await?;

        let mut stats = self.stats.write();
        if packet.is_sentinel() {
            stats.sentinels += 1;
        } else {
            stats.chunks_sent += 1;
            stats.total_bytes += packet.payload.len() as u64;
        }
        Ok(())
    }

    async fn recv_within(
        &self,
        buf: &mut [u8],
        wait: Duration,
    ) -> Result<Option<(usize, SocketAddr)>> {
        match tokio::time::timeout(wait, self.transport.recv_from(buf)).await {
            Ok(Ok(received)) => Ok(Some(received)),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(None),
        }
    }

    fn ignore(&self, state: &ServerState, data: &[u8]) {
        debug!("{:?}: 예상 외 데이터그램 무시 ({} bytes)", state, data.len());
        self.stats.write().protocol_violations += 1;
    }

    /// 정지
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// 통계 반환
    pub fn stats(&self) -> TransferStats {
        self.stats.read().clone()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.transport.local_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{FixedOrder, SequentialOrder};
    use crate::store::MemoryStore;
    use crate::transport::{LossModel, MemoryTransport};
    use bytes::Bytes;
    use std::io;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    /// 특정 이름의 읽기가 실패하는 저장소
    struct LockedStore(MemoryStore);

    impl FileStore for LockedStore {
        fn lookup(&self, name: &str) -> Result<Option<Bytes>> {
            if name == "locked.bin" {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied").into());
            }
            self.0.lookup(name)
        }
    }

    /// 처음 몇 번의 송신이 실패하는 전송 계층
    struct FlakyTransport {
        inner: MemoryTransport,
        failures: AtomicU32,
    }

    impl Transport for FlakyTransport {
        async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "EPERM"));
            }
            self.inner.send_to(buf, target).await
        }

        async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
            self.inner.recv_from(buf).await
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            self.inner.local_addr()
        }
    }

    fn plan(len: usize, desired: u32) -> ChunkPlan {
        let data: Bytes = (0..len).map(|i| i as u8).collect::<Vec<u8>>().into();
        ChunkPlan::build(data, desired, 1396).unwrap()
    }

    #[test]
    fn test_delivery_follows_order_then_sentinel() {
        let mut delivery = DeliveryLoop::new(plan(30, 3), vec![2, 0, 1]).unwrap();

        let indices: Vec<ChunkIndex> = (0..3).map(|_| delivery.next_packet().index).collect();
        assert_eq!(indices, vec![2, 0, 1]);
        assert!(delivery.is_exhausted());

        // 센티넬은 반복 가능하며 커서는 그대로
        for _ in 0..3 {
            assert!(delivery.next_packet().is_sentinel());
        }
        assert_eq!(delivery.cursor(), 3);
    }

    #[test]
    fn test_repair_does_not_move_cursor() {
        let mut delivery = DeliveryLoop::new(plan(30, 3), vec![0, 1, 2]).unwrap();
        delivery.next_packet();

        let packet = delivery.packet_for(2);
        assert_eq!(packet.index, 2);
        assert_eq!(packet.payload.len(), 10);
        assert_eq!(delivery.cursor(), 1);
        assert!(delivery.packet_for(3).is_sentinel());
    }

    #[test]
    fn test_delivery_rejects_bad_order() {
        assert!(DeliveryLoop::new(plan(30, 3), vec![0, 1]).is_err());
        assert!(DeliveryLoop::new(plan(30, 3), vec![0, 1, 1]).is_err());
    }

    #[test]
    fn test_empty_delivery_is_exhausted() {
        let mut delivery = DeliveryLoop::new(plan(0, 3), vec![]).unwrap();
        assert!(delivery.is_exhausted());
        assert!(delivery.next_packet().is_sentinel());
    }

    fn addrs() -> (SocketAddr, SocketAddr) {
        (
            "10.0.0.1:5000".parse().unwrap(),
            "10.0.0.2:12000".parse().unwrap(),
        )
    }

    async fn exchange(client: &MemoryTransport, server: SocketAddr, msg: &[u8]) -> Vec<u8> {
        client.send_to(msg, server).await.unwrap();
        let mut buf = vec![0u8; 2048];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        buf.truncate(len);
        buf
    }

    #[tokio::test]
    async fn test_server_state_machine_raw_tokens() {
        let (client_addr, server_addr) = addrs();
        let (client, server_side) = MemoryTransport::pair(
            client_addr,
            LossModel::lossless(),
            server_addr,
            LossModel::lossless(),
        );
        let store = MemoryStore::new().with_file("f.bin", vec![7u8; 25]);
        let server = FileServer::new(Config::default(), server_side, store, FixedOrder::reversed(3))
            .unwrap();

        let session = tokio::spawn(async move {
            let result = server.serve_session().await;
            (result, server.stats())
        });

        // Listening 상태의 잡음은 무시
        client.send_to(b"hello?", server_addr).await.unwrap();
        assert_eq!(exchange(&client, server_addr, b"rdy").await, b"rdy");
        // 재시도된 rdy에도 동일 응답
        assert_eq!(exchange(&client, server_addr, b"rdy").await, b"rdy");
        assert_eq!(exchange(&client, server_addr, b"f.bin").await, b"f.bin");
        assert_eq!(exchange(&client, server_addr, b"3").await, b"NUM 3 9");
        // NUM 응답 재전송
        assert_eq!(exchange(&client, server_addr, b"3").await, b"NUM 3 9");

        let first = ChunkPacket::decode(&exchange(&client, server_addr, b"rdyD").await).unwrap();
        assert_eq!(first.index, 2);
        assert_eq!(first.payload.len(), 7);

        let second = ChunkPacket::decode(&exchange(&client, server_addr, b"next").await).unwrap();
        assert_eq!(second.index, 1);

        let repair = ChunkPacket::decode(&exchange(&client, server_addr, b"get 2").await).unwrap();
        assert_eq!(repair.index, 2);

        let third = ChunkPacket::decode(&exchange(&client, server_addr, b"next").await).unwrap();
        assert_eq!(third.index, 0);

        let done = ChunkPacket::decode(&exchange(&client, server_addr, b"next").await).unwrap();
        assert!(done.is_sentinel());

        client.send_to(b"close", server_addr).await.unwrap();

        let (result, stats) = session.await.unwrap();
        let session = result.unwrap().unwrap();
        assert_eq!(session.filename, "f.bin");
        assert_eq!(session.total_chunks, 3);
        assert_eq!(stats.chunks_sent, 4);
        assert_eq!(stats.sentinels, 1);
        assert_eq!(stats.resend_requests, 1);
        assert_eq!(stats.completed_sessions, 1);
        assert!(stats.protocol_violations >= 1);
    }

    #[tokio::test]
    async fn test_server_missing_file_creates_no_session() {
        let (client_addr, server_addr) = addrs();
        let (client, server_side) = MemoryTransport::pair(
            client_addr,
            LossModel::lossless(),
            server_addr,
            LossModel::lossless(),
        );
        let server =
            FileServer::new(Config::default(), server_side, MemoryStore::new(), SequentialOrder)
                .unwrap();

        let session = tokio::spawn(async move { server.serve_session().await });

        assert_eq!(exchange(&client, server_addr, b"rdy").await, b"rdy");
        assert_eq!(exchange(&client, server_addr, b"nope.txt").await, b"ERR_NOFILE");

        assert!(session.await.unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_server_abandons_idle_session() {
        let (client_addr, server_addr) = addrs();
        let (client, server_side) = MemoryTransport::pair(
            client_addr,
            LossModel::lossless(),
            server_addr,
            LossModel::lossless(),
        );
        let config = Config {
            session_idle_timeout_ms: 50,
            ..Config::default()
        };
        let store = MemoryStore::new().with_file("f.bin", vec![1u8; 10]);
        let server = FileServer::new(config, server_side, store, SequentialOrder).unwrap();

        let session = tokio::spawn(async move {
            let result = server.serve_session().await;
            (result, server.stats())
        });

        assert_eq!(exchange(&client, server_addr, b"rdy").await, b"rdy");
        assert_eq!(exchange(&client, server_addr, b"f.bin").await, b"f.bin");
        // 클라이언트가 사라짐

        let (result, stats) = session.await.unwrap();
        assert!(result.unwrap().is_none());
        assert_eq!(stats.abandoned_sessions, 1);
        assert_eq!(stats.completed_sessions, 0);
    }

    #[tokio::test]
    async fn test_store_failure_ends_only_that_session() {
        let (client_addr, server_addr) = addrs();
        let (client, server_side) = MemoryTransport::pair(
            client_addr,
            LossModel::lossless(),
            server_addr,
            LossModel::lossless(),
        );
        let store = LockedStore(MemoryStore::new().with_file("f.bin", vec![1u8; 10]));
        let server =
            Arc::new(FileServer::new(Config::default(), server_side, store, SequentialOrder).unwrap());
        let runner = server.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        assert_eq!(exchange(&client, server_addr, b"rdy").await, b"rdy");
        assert_eq!(exchange(&client, server_addr, b"locked.bin").await, b"ERR_NOFILE");

        // 서버는 다음 핸드쉐이크를 계속 받는다
        assert_eq!(exchange(&client, server_addr, b"rdy").await, b"rdy");
        assert_eq!(exchange(&client, server_addr, b"f.bin").await, b"f.bin");
        client.send_to(b"close", server_addr).await.unwrap();

        server.stop();
        handle.await.unwrap().unwrap();
        assert_eq!(server.stats().abandoned_sessions, 1);
    }

    #[tokio::test]
    async fn test_send_failure_ends_only_that_session() {
        let (client_addr, server_addr) = addrs();
        let (client, server_side) = MemoryTransport::pair(
            client_addr,
            LossModel::lossless(),
            server_addr,
            LossModel::lossless(),
        );
        let transport = FlakyTransport {
            inner: server_side,
            failures: AtomicU32::new(1),
        };
        let server = Arc::new(
            FileServer::new(Config::default(), transport, MemoryStore::new(), SequentialOrder)
                .unwrap(),
        );
        let runner = server.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        // 첫 rdy 응답은 송신 실패
        client.send_to(b"rdy", server_addr).await.unwrap();
        assert_eq!(exchange(&client, server_addr, b"rdy").await, b"rdy");
        client.send_to(b"close", server_addr).await.unwrap();

        server.stop();
        handle.await.unwrap().unwrap();
        assert_eq!(server.stats().abandoned_sessions, 1);
    }

    #[tokio::test]
    async fn test_rdy_from_session_peer_restarts_handshake() {
        let (client_addr, server_addr) = addrs();
        let (client, server_side) = MemoryTransport::pair(
            client_addr,
            LossModel::lossless(),
            server_addr,
            LossModel::lossless(),
        );
        let store = MemoryStore::new().with_file("f.bin", vec![7u8; 25]);
        let server =
            FileServer::new(Config::default(), server_side, store, SequentialOrder).unwrap();

        let session = tokio::spawn(async move {
            let result = server.serve_session().await;
            (result, server.stats())
        });

        // 협상 도중 버려진 핸드쉐이크
        assert_eq!(exchange(&client, server_addr, b"rdy").await, b"rdy");
        assert_eq!(exchange(&client, server_addr, b"f.bin").await, b"f.bin");
        assert_eq!(exchange(&client, server_addr, b"rdy").await, b"rdy");
        assert_eq!(exchange(&client, server_addr, b"f.bin").await, b"f.bin");
        assert_eq!(exchange(&client, server_addr, b"3").await, b"NUM 3 9");

        // NUM 이후에도 같은 방식으로 재시작
        assert_eq!(exchange(&client, server_addr, b"rdy").await, b"rdy");
        assert_eq!(exchange(&client, server_addr, b"f.bin").await, b"f.bin");
        assert_eq!(exchange(&client, server_addr, b"3").await, b"NUM 3 9");

        let first = ChunkPacket::decode(&exchange(&client, server_addr, b"rdyD").await).unwrap();
        assert_eq!(first.index, 0);
        client.send_to(b"close", server_addr).await.unwrap();

        let (result, stats) = session.await.unwrap();
        assert!(result.unwrap().is_some());
        assert_eq!(stats.abandoned_sessions, 1);
        assert_eq!(stats.completed_sessions, 1);
    }

    #[tokio::test]
    async fn test_close_before_transfer_is_not_completed() {
        let (client_addr, server_addr) = addrs();
        let (client, server_side) = MemoryTransport::pair(
            client_addr,
            LossModel::lossless(),
            server_addr,
            LossModel::lossless(),
        );
        let store = MemoryStore::new().with_file("f.bin", vec![7u8; 25]);
        let server =
            FileServer::new(Config::default(), server_side, store, SequentialOrder).unwrap();

        let session = tokio::spawn(async move {
            let result = server.serve_session().await;
            (result, server.stats())
        });

        assert_eq!(exchange(&client, server_addr, b"rdy").await, b"rdy");
        assert_eq!(exchange(&client, server_addr, b"f.bin").await, b"f.bin");
        assert_eq!(exchange(&client, server_addr, b"3").await, b"NUM 3 9");
        client.send_to(b"close", server_addr).await.unwrap();

        let (result, stats) = session.await.unwrap();
        assert!(result.unwrap().is_none());
        assert_eq!(stats.completed_sessions, 0);
        assert_eq!(stats.abandoned_sessions, 1);
        assert_eq!(stats.chunks_sent, 0);
    }

    #[tokio::test]
    async fn test_foreign_peer_is_ignored_during_session() {
        let (client_addr, server_addr) = addrs();
        let (client, server_side) = MemoryTransport::pair(
            client_addr,
            LossModel::lossless(),
            server_addr,
            LossModel::lossless(),
        );
        let foreign = client.join("10.0.0.9:6000".parse().unwrap(), LossModel::lossless());
        let store = MemoryStore::new().with_file("f.bin", vec![7u8; 25]);
        let server =
            FileServer::new(Config::default(), server_side, store, SequentialOrder).unwrap();

        let session = tokio::spawn(async move {
            let result = server.serve_session().await;
            (result, server.stats())
        });

        assert_eq!(exchange(&client, server_addr, b"rdy").await, b"rdy");
        foreign.send_to(b"rdy", server_addr).await.unwrap();
        assert_eq!(exchange(&client, server_addr, b"f.bin").await, b"f.bin");
        assert_eq!(exchange(&client, server_addr, b"3").await, b"NUM 3 9");
        let first = ChunkPacket::decode(&exchange(&client, server_addr, b"rdyD").await).unwrap();
        assert_eq!(first.index, 0);

        // 다른 주소의 pull과 close는 커서와 세션에 영향 없음
        let tokens: [&[u8]; 3] = [b"next", b"get 2", b"close"];
        for token in tokens {
            foreign.send_to(token, server_addr).await.unwrap();
        }
        let second = ChunkPacket::decode(&exchange(&client, server_addr, b"next").await).unwrap();
        assert_eq!(second.index, 1);

        let mut buf = [0u8; 64];
        let reply =
            tokio::time::timeout(Duration::from_millis(100), foreign.recv_from(&mut buf)).await;
        assert!(reply.is_err());

        client.send_to(b"close", server_addr).await.unwrap();
        let (result, stats) = session.await.unwrap();
        assert!(result.unwrap().is_some());
        assert_eq!(stats.chunks_sent, 2);
        assert_eq!(stats.completed_sessions, 1);
    }
}
