use std::{
    collections::HashMap,
    fmt, fs,
    io::{self, Write},
    path::{Component, Path, PathBuf},
    sync::RwLock,
};

use tempfile::NamedTempFile;
use thiserror::Error;

/// 儲存操作可能發生的錯誤類型。
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Key is invalid: {0}")]
    InvalidKey(String),
    #[error("Key not found: {0}")]
    NotFound(String),
    #[error("Lock poisoned")]
    LockPoisoned,
}

/// 儲存操作的結果類型，封裝 [`StorageError`]。
pub type Result<T> = std::result::Result<T, StorageError>;

/// 帳戶金鑰與帳戶資料的持久化介面，內容一律視為不透明的位元組。
///
/// key 為以 `/` 分隔的相對路徑，例如 `user@example.com/account.pem`。
pub trait Storage: Send + Sync + fmt::Debug {
    /// 讀取指定 key 所對應檔案的內容。
    fn read_file(&self, key: &str) -> Result<Vec<u8>>;

    /// 將資料寫入指定 key 所對應的檔案中，必要時建立父目錄。
    fn write_file(&self, key: &str, value: &[u8]) -> Result<()>;

    /// 刪除指定 key；不存在時不視為錯誤。
    fn remove(&self, key: &str) -> Result<()>;

    /// 檢查指定 key 是否存在於儲存系統中。
    fn exists(&self, key: &str) -> Result<bool>;
}

/// 正規化 key，拒絕空字串、絕對路徑與 `..`。
fn normalize(key: &str) -> Result<PathBuf> {
    let path = Path::new(key);
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            _ => return Err(StorageError::InvalidKey(key.to_string())),
        }
    }
    if normalized.as_os_str().is_empty() || key.ends_with('/') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(normalized)
}

/// 以本地目錄為根的檔案儲存，寫入時先寫暫存檔再原子替換。
#[derive(Debug)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// 開啟（必要時建立）根目錄。
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        Ok(self.root.join(normalize(key)?))
    }
}

impl Storage for FileStorage {
    fn read_file(&self, key: &str) -> Result<Vec<u8>> {
        match fs::read(self.resolve(key)?) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write_file(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(value)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.resolve(key)?) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.resolve(key)?.is_file())
    }
}

/// 基於記憶體的儲存實作，主要用於測試與短生命週期的程序。
#[derive(Debug, Default)]
pub struct MemStorage {
    data: RwLock<HashMap<PathBuf, Vec<u8>>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemStorage {
    fn read_file(&self, key: &str) -> Result<Vec<u8>> {
        let path = normalize(key)?;
        let data = self.data.read().map_err(|_| StorageError::LockPoisoned)?;
        data.get(&path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn write_file(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = normalize(key)?;
        self.data
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert(path, value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = normalize(key)?;
        self.data
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .remove(&path);
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let path = normalize(key)?;
        Ok(self
            .data
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .contains_key(&path))
    }
}
