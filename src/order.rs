//! 전달 순서 생성기
//!
//! 세션마다 한 번 `0..N` 순열을 만든다. 프로토콜은 순서에 어떤 가정도
//! 하지 않으므로 모든 순열이 유효하다.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::chunk::ChunkIndex;
use crate::{Error, Result};

/// 순열 생성기
pub trait OrderGenerator: Send + Sync {
    /// `0..total` 의 순열 반환
    fn permutation(&self, total: u32) -> Vec<ChunkIndex>;
}

/// 무작위 순서 (기본)
pub struct RandomOrder {
    /// 시드 고정 시 재현 가능한 RNG
    seeded: Option<Mutex<StdRng>>,
}

impl RandomOrder {
    pub fn new() -> Self {
        Self { seeded: None }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            seeded: Some(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }
}

impl Default for RandomOrder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderGenerator for RandomOrder {
    fn permutation(&self, total: u32) -> Vec<ChunkIndex> {
        let mut order: Vec<ChunkIndex> = (0..total).collect();
        match &self.seeded {
            Some(rng) => order.shuffle(&mut *rng.lock()),
            None => order.shuffle(&mut rand::thread_rng()),
        }
        order
    }
}

impl<O: OrderGenerator + ?Sized> OrderGenerator for Box<O> {
    fn permutation(&self, total: u32) -> Vec<ChunkIndex> {
        (**self).permutation(total)
    }
}

/// 인덱스 순서 그대로
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialOrder;

impl OrderGenerator for SequentialOrder {
    fn permutation(&self, total: u32) -> Vec<ChunkIndex> {
        (0..total).collect()
    }
}

/// 미리 정한 순열 (테스트용)
///
/// 요청된 길이가 다르면 인덱스 순서로 대체한다.
#[derive(Debug, Clone)]
pub struct FixedOrder {
    order: Vec<ChunkIndex>,
}

impl FixedOrder {
    pub fn new(order: Vec<ChunkIndex>) -> Result<Self> {
        if !is_permutation(&order, order.len() as u32) {
            return Err(Error::InvalidConfig(format!("순열이 아님: {:?}", order)));
        }
        Ok(Self { order })
    }

    /// 역순
    pub fn reversed(total: u32) -> Self {
        Self {
            order: (0..total).rev().collect(),
        }
    }
}

impl OrderGenerator for FixedOrder {
    fn permutation(&self, total: u32) -> Vec<ChunkIndex> {
        if self.order.len() == total as usize {
            self.order.clone()
        } else {
            (0..total).collect()
        }
    }
}

/// 모든 인덱스가 정확히 한 번씩 나타나는지
pub fn is_permutation(order: &[ChunkIndex], total: u32) -> bool {
    if order.len() != total as usize {
        return false;
    }
    let mut seen = vec![false; order.len()];
    for &idx in order {
        match seen.get_mut(idx as usize) {
            Some(slot) if !*slot => *slot = true,
            _ => return false,
        }
    }
    true
}
