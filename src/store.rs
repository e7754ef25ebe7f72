//! 파일 저장소
//!
//! 서버가 이름으로 파일 내용을 조회하는 읽기 전용 저장소

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;

use crate::Result;

/// 이름 → 바이트 조회
pub trait FileStore: Send + Sync {
    /// 파일 내용 반환, 없으면 `Ok(None)`
    fn lookup(&self, name: &str) -> Result<Option<Bytes>>;
}

/// 디렉터리 기반 저장소
///
/// 루트 바로 아래의 일반 파일만 제공한다. 경로 구분자나 `..`가 포함된
/// 이름은 찾을 수 없는 것으로 처리한다.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> Option<PathBuf> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None) if part == name => Some(self.root.join(part)),
            _ => None,
        }
    }
}

impl FileStore for DirStore {
    fn lookup(&self, name: &str) -> Result<Option<Bytes>> {
        let path = match self.resolve(name) {
            Some(path) => path,
            None => {
                debug!("허용되지 않는 파일 이름: {:?}", name);
                return Ok(None);
            }
        };

        if !path.is_file() {
            return Ok(None);
        }

        match std::fs::read(&path) {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// 메모리 저장소
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: RwLock<HashMap<String, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, data: impl Into<Bytes>) {
        self.files.write().insert(name.into(), data.into());
    }

    pub fn with_file(self, name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.insert(name, data);
        self
    }
}

impl FileStore for MemoryStore {
    fn lookup(&self, name: &str) -> Result<Option<Bytes>> {
        Ok(self.files.read().get(name).cloned())
    }
}
