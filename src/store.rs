//! 아이템 제공자 / 소비자
//!
//! 수신측은 저장소에 대해 두 가지만 요구한다:
//! - provide: 이름의 현재 값 (해시 응답용)
//! - consume: 완전히 조립된 아이템 (아이템당 정확히 한 번)

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use dashmap::DashMap;
use tracing::debug;

use crate::{Error, Result};

/// 이름에 해당하는 현재 값 제공
pub trait ItemProvider: Send + Sync {
    /// 없으면 `Ok(None)`
    fn provide(&self, name: &str) -> Result<Option<Bytes>>;
}

/// 조립 완료된 아이템 소비
pub trait ItemConsumer: Send + Sync {
    fn consume(&self, name: &str, data: Bytes) -> Result<()>;
}

/// 메모리 저장소
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: DashMap<String, Bytes>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Bytes> {
        self.items.get(name).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, name: impl Into<String>, data: impl Into<Bytes>) {
        self.items.insert(name.into(), data.into());
    }

    pub fn remove(&self, name: &str) -> Option<Bytes> {
        self.items.remove(name).map(|(_, data)| data)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl ItemProvider for MemoryStore {
    fn provide(&self, name: &str) -> Result<Option<Bytes>> {
        Ok(self.get(name))
    }
}

impl ItemConsumer for MemoryStore {
    fn consume(&self, name: &str, data: Bytes) -> Result<()> {
        self.insert(name, data);
        Ok(())
    }
}

/// 디렉터리 저장소 (아이템당 파일 하나)
///
/// 파일 이름은 아이템 이름의 hex 인코딩이다.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// 디렉터리가 없으면 생성
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(hex::encode(name.as_bytes()))
    }

    /// 저장된 아이템 이름 목록
    pub fn names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let file_name = entry?.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(name) = hex::decode(file_name)
                .ok()
                .and_then(|raw| String::from_utf8(raw).ok())
            {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

impl ItemProvider for DirStore {
    fn provide(&self, name: &str) -> Result<Option<Bytes>> {
        match fs::read(self.path_for(name)) {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Callback(format!("read {}: {}", name, e))),
        }
    }
}

impl ItemConsumer for DirStore {
    fn consume(&self, name: &str, data: Bytes) -> Result<()> {
        let path = self.path_for(name);
        let tmp = path.with_extension("part");

        // 부분 파일이 해시 응답에 보이지 않도록 rename으로 교체
        fs::write(&tmp, &data).map_err(|e| Error::Callback(format!("write {}: {}", name, e)))?;
        fs::rename(&tmp, &path).map_err(|e| Error::Callback(format!("rename {}: {}", name, e)))?;

        debug!("아이템 저장: {} -> {:?} ({} bytes)", name, path, data.len());
        Ok(())
    }
}
