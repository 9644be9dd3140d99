use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::PersistError;
use crate::model::WalletId;

/// Durable storage of the last used address index of each wallet
///
/// An index returned by [`Persister::load_last_index`] is the first index that was never
/// handed out, so it can be used as is for the next address.
pub trait Persister: Send + Sync {
    fn load_last_index(&self, wallet: WalletId) -> Result<Option<u32>, PersistError>;

    fn persist_last_index(&self, wallet: WalletId, index: u32) -> Result<(), PersistError>;
}

/// Keeps indexes in memory, they are lost when the process exits
#[derive(Debug, Default)]
pub struct MemoryPersister {
    indexes: Mutex<HashMap<WalletId, u32>>,
}

impl MemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persister for MemoryPersister {
    fn load_last_index(&self, wallet: WalletId) -> Result<Option<u32>, PersistError> {
        Ok(self.indexes.lock()?.get(&wallet).copied())
    }

    fn persist_last_index(&self, wallet: WalletId, index: u32) -> Result<(), PersistError> {
        self.indexes.lock()?.insert(wallet, index);
        Ok(())
    }
}

/// Keeps indexes in a json file
///
/// Every write replaces the file atomically, a crash during a write leaves the previous content.
#[derive(Debug)]
pub struct FilePersister {
    path: PathBuf,
    indexes: Mutex<HashMap<WalletId, u32>>,
}

impl FilePersister {
    /// Open the persister at `path`, the file is created on first write
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, PersistError> {
        let path = path.as_ref().to_path_buf();
        let indexes = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            indexes: Mutex::new(indexes),
        })
    }

    fn write(&self, indexes: &HashMap<WalletId, u32>) -> Result<(), PersistError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = self.path.clone();
        tmp.set_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(indexes)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Persister for FilePersister {
    fn load_last_index(&self, wallet: WalletId) -> Result<Option<u32>, PersistError> {
        Ok(self.indexes.lock()?.get(&wallet).copied())
    }

    fn persist_last_index(&self, wallet: WalletId, index: u32) -> Result<(), PersistError> {
        let mut indexes = self.indexes.lock()?;
        let mut next = indexes.clone();
        next.insert(wallet, index);
        self.write(&next)?;
        *indexes = next;
        Ok(())
    }
}
