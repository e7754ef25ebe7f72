//! 데이터그램 전송 계층 추상화
//!
//! - [`Transport`]: 크기 제한 있는 데이터그램 송수신, 순서/도달 보장 없음
//! - `tokio::net::UdpSocket` 구현
//! - [`MemoryTransport`]: 손실/중복을 흉내내는 메모리 네트워크 (테스트용)
//!
//! 수신 타임아웃은 호출측에서 `tokio::time::timeout`으로 건다.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::trace;

/// 데이터그램 전송 계층
pub trait Transport: Send + Sync {
    /// 데이터그램 하나 전송
    fn send_to(
        &self,
        buf: &[u8],
        target: SocketAddr,
    ) -> impl Future<Output = io::Result<usize>> + Send;

    /// 데이터그램 하나 수신 (버퍼보다 크면 잘림)
    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Transport for UdpSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

/// 손실 모델
#[derive(Debug, Clone, Copy)]
pub struct LossModel {
    /// 송신 데이터그램 폐기 확률 (0.0 ~ 1.0)
    pub drop_rate: f64,

    /// 송신 데이터그램 중복 확률 (0.0 ~ 1.0)
    pub duplicate_rate: f64,

    /// RNG 시드
    pub seed: u64,
}

impl LossModel {
    /// 손실 없음
    pub fn lossless() -> Self {
        Self {
            drop_rate: 0.0,
            duplicate_rate: 0.0,
            seed: 0,
        }
    }

    pub fn dropping(drop_rate: f64, seed: u64) -> Self {
        Self {
            drop_rate,
            duplicate_rate: 0.0,
            seed,
        }
    }

    pub fn duplicating(duplicate_rate: f64, seed: u64) -> Self {
        Self {
            drop_rate: 0.0,
            duplicate_rate,
            seed,
        }
    }
}

impl Default for LossModel {
    fn default() -> Self {
        Self::lossless()
    }
}

type Datagram = (Vec<u8>, SocketAddr);

/// 주소 → 수신 큐
type Routes = Arc<RwLock<HashMap<SocketAddr, mpsc::UnboundedSender<Datagram>>>>;

/// 메모리 기반 전송 계층
///
/// 같은 네트워크에 붙은 엔드포인트끼리만 데이터그램이 오간다. 등록되지 않은
/// 주소로 보낸 데이터그램은 UDP처럼 조용히 사라진다.
pub struct MemoryTransport {
    addr: SocketAddr,
    routes: Routes,
    rx: AsyncMutex<mpsc::UnboundedReceiver<Datagram>>,
    loss: LossModel,
    rng: Mutex<StdRng>,
}

impl MemoryTransport {
    fn attach(routes: &Routes, addr: SocketAddr, loss: LossModel, seed: u64) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        routes.write().insert(addr, tx);
        Self {
            addr,
            routes: routes.clone(),
            rx: AsyncMutex::new(rx),
            loss,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// 서로 연결된 두 엔드포인트 생성, 각 송신 방향에 손실 모델 적용
    pub fn pair(
        a: SocketAddr,
        a_loss: LossModel,
        b: SocketAddr,
        b_loss: LossModel,
    ) -> (Self, Self) {
        let routes = Routes::default();
        let left = Self::attach(&routes, a, a_loss, a_loss.seed);
        let right = Self::attach(&routes, b, b_loss, b_loss.seed.wrapping_add(1));
        (left, right)
    }

    /// 같은 네트워크에 엔드포인트 추가
    pub fn join(&self, addr: SocketAddr, loss: LossModel) -> Self {
        Self::attach(&self.routes, addr, loss, loss.seed)
    }

    /// (drop, duplicate) 결정
    fn roll(&self) -> (bool, bool) {
        let mut rng = self.rng.lock();
        let dropped = rng.gen_bool(self.loss.drop_rate.clamp(0.0, 1.0));
        let duplicated = rng.gen_bool(self.loss.duplicate_rate.clamp(0.0, 1.0));
        (dropped, duplicated)
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.routes.write().remove(&self.addr);
    }
}

impl Transport for MemoryTransport {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        let route = self.routes.read().get(&target).cloned();
        let Some(tx) = route else {
            trace!("알 수 없는 대상 {} - 폐기", target);
            return Ok(buf.len());
        };

        let (dropped, duplicated) = self.roll();
        if dropped {
            trace!("{} -> {}: {} bytes 손실", self.addr, target, buf.len());
            return Ok(buf.len());
        }

        let copies = if duplicated { 2 } else { 1 };
        for _ in 0..copies {
            tx.send((buf.to_vec(), self.addr))
                .map_err(|_| io::Error::new(io::ErrorKind::ConnectionAborted, "peer dropped"))?;
        }
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut rx = self.rx.lock().await;
        let (data, from) = rx
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionAborted, "peer dropped"))?;

        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok((len, from))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}
