use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;

/// Minimal durable key-value interface behind the cursor, history and work
/// stores. `put` must replace the whole value atomically.
pub trait KvStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn put(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn append(&self, key: &str, line: &str) -> anyhow::Result<()>;
}

/// One file per key under `base_dir`.
#[derive(Debug, Clone)]
pub struct FsKvStore {
    base_dir: PathBuf,
}

impl FsKvStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn path_for(&self, key: &str) -> anyhow::Result<PathBuf> {
        if key.is_empty()
            || key
                .split('/')
                .any(|seg| seg.is_empty() || seg == "." || seg == "..")
        {
            anyhow::bail!("invalid store key: {key:?}");
        }
        Ok(self.base_dir.join(key))
    }
}

impl KvStore for FsKvStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read: {}", path.display())),
        }
    }

    fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        write_atomic(&path, value.as_bytes())
    }

    fn append(&self, key: &str, line: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        ensure_parent(&path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open for append: {}", path.display()))?;
        file.write_all(format!("{line}\n").as_bytes())
            .with_context(|| format!("append: {}", path.display()))?;
        file.flush()
            .with_context(|| format!("flush: {}", path.display()))?;
        Ok(())
    }
}

fn ensure_parent(path: &Path) -> anyhow::Result<&Path> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create parent dir: {}", parent.display()))?;
    }
    Ok(parent)
}

/// Writes to a temp file in the destination directory, then renames over
/// `path`, so readers see either the old or the new content.
pub fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let parent = ensure_parent(path)?;
    let dir = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("create tmp in: {}", dir.display()))?;
    tmp.write_all(data)
        .with_context(|| format!("write tmp: {}", tmp.path().display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("sync tmp: {}", tmp.path().display()))?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}

/// Links whose translation produced genuine output.
pub struct HistoryStore<'a> {
    kv: &'a dyn KvStore,
    key: String,
}

impl<'a> HistoryStore<'a> {
    pub fn new(kv: &'a dyn KvStore, work_key: &str) -> Self {
        Self {
            kv,
            key: format!("history/{work_key}.txt"),
        }
    }

    pub fn load(&self) -> anyhow::Result<HashSet<String>> {
        let text = self.kv.get(&self.key)?.unwrap_or_default();
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect())
    }

    pub fn is_completed(&self, link: &str) -> anyhow::Result<bool> {
        Ok(self.load()?.contains(link.trim()))
    }

    pub fn mark_completed(&self, link: &str) -> anyhow::Result<()> {
        self.kv.append(&self.key, link.trim())
    }
}

/// Which of the two cursor roles a [`CursorStore`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorRole {
    /// Next link to fetch in chain mode.
    Chain,
    /// Last link seen as latest in incremental mode.
    Latest,
}

pub struct CursorStore<'a> {
    kv: &'a dyn KvStore,
    key: String,
}

impl<'a> CursorStore<'a> {
    pub fn new(kv: &'a dyn KvStore, work_key: &str, role: CursorRole) -> Self {
        let dir = match role {
            CursorRole::Chain => "chain",
            CursorRole::Latest => "latest",
        };
        Self {
            kv,
            key: format!("{dir}/{work_key}.txt"),
        }
    }

    pub fn get(&self) -> anyhow::Result<Option<String>> {
        Ok(self
            .kv
            .get(&self.key)?
            .map(|text| text.trim().to_owned())
            .filter(|text| !text.is_empty()))
    }

    pub fn set(&self, link: &str) -> anyhow::Result<()> {
        self.kv.put(&self.key, link.trim())
    }
}
