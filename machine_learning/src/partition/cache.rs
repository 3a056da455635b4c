use std::{
    collections::HashMap,
    fmt, fs, io,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;

use crate::{MlErr, Result};

/// Which half of a partition a blob holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Head,
    Tail,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Head => "head",
            Role::Tail => "tail",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub architecture: String,
    pub role: Role,
}

impl CacheKey {
    pub fn new(architecture: &str, role: Role) -> Self {
        Self {
            architecture: architecture.to_string(),
            role,
        }
    }
}

/// A durable store of partition blobs.
///
/// Written once per key by a single writer, read by many.
pub trait PartitionCache {
    /// Returns the blob stored under `key`, `None` if there is none.
    fn load(&self, key: &CacheKey) -> Result<Option<Vec<u8>>>;

    /// Stores `blob` under `key`, replacing any previous one.
    fn store(&self, key: &CacheKey, blob: &[u8]) -> Result<()>;
}

impl<C: PartitionCache + ?Sized> PartitionCache for &C {
    fn load(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        (**self).load(key)
    }

    fn store(&self, key: &CacheKey, blob: &[u8]) -> Result<()> {
        (**self).store(key, blob)
    }
}

/// Keeps the blobs as `<dir>/<architecture>.<role>.safetensors` files.
#[derive(Debug, Clone)]
pub struct FsPartitionCache {
    dir: PathBuf,
}

impl FsPartitionCache {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the file of `key`, the architecture must be a plain file name
    /// so that every blob stays inside `dir`.
    fn path(&self, key: &CacheKey) -> Result<PathBuf> {
        let name = key.architecture.as_str();
        let plain = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\', '\0']);

        if !plain {
            return Err(MlErr::InvalidCacheKey(name.to_string()));
        }

        Ok(self.dir.join(format!("{name}.{}.safetensors", key.role)))
    }
}

impl PartitionCache for FsPartitionCache {
    fn load(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path(key)?) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Readers never see a partially written blob, it's written aside and renamed.
    fn store(&self, key: &CacheKey, blob: &[u8]) -> Result<()> {
        let path = self.path(key)?;
        fs::create_dir_all(&self.dir)?;

        let tmp = path.with_extension("safetensors.tmp");
        fs::write(&tmp, blob)?;
        fs::rename(&tmp, &path)?;

        Ok(())
    }
}

/// An in-process cache, mostly for tests.
#[derive(Debug, Default)]
pub struct MemoryPartitionCache {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    blobs: HashMap<CacheKey, Vec<u8>>,
    stores: usize,
}

impl MemoryPartitionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many times `store` was called.
    pub fn stores(&self) -> usize {
        self.inner.lock().stores
    }

    pub fn len(&self) -> usize {
        self.inner.lock().blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PartitionCache for MemoryPartitionCache {
    fn load(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.lock().blobs.get(key).cloned())
    }

    fn store(&self, key: &CacheKey, blob: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.blobs.insert(key.clone(), blob.to_vec());
        inner.stores += 1;
        Ok(())
    }
}
