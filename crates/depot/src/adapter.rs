//! Storage adapters: the byte-storage backends the filesystem writes through.
//!
//! Paths handed to an adapter are relative keys such as `articles/a.png`.
//! `LocalAdapter` maps them under a root directory:
//! ```text
//! {root}/
//! ├── articles/
//! │   └── a.png
//! └── b.txt
//! ```
//! `MemoryAdapter` keeps them in a map, for tests and ephemeral use.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::error::{FilesystemError, Result};

/// One stored file as reported by `list_contents`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentEntry {
    pub path: String,
    pub size: u64,
}

/// Trait for byte-storage backends.
///
/// `rename` and `copy` fail with `DestinationExists` when `overwrite` is false
/// and the destination is occupied; operations on a missing source fail with
/// `NotFound`.
pub trait StorageAdapter: Send + Sync {
    /// Write a stream to `path`, replacing any existing file. Returns bytes written.
    fn write_stream(&self, path: &str, reader: &mut dyn Read) -> Result<u64>;

    fn read(&self, path: &str) -> Result<Vec<u8>>;

    fn file_exists(&self, path: &str) -> bool;

    fn delete(&self, path: &str) -> Result<()>;

    fn rename(&self, path: &str, new_path: &str, overwrite: bool) -> Result<()>;

    fn copy(&self, path: &str, new_path: &str, overwrite: bool) -> Result<()>;

    fn file_size(&self, path: &str) -> Result<u64>;

    fn mime_type(&self, path: &str) -> Result<String>;

    /// Every stored file, sorted by path.
    fn list_contents(&self) -> Result<Vec<ContentEntry>>;
}

/// Normalize a storage key: no empty, `.` or `..` segments, no leading slash.
pub fn normalize_key(path: &str) -> Result<String> {
    let mut segments = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => return Err(FilesystemError::InvalidPath(path.to_string())),
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return Err(FilesystemError::InvalidPath(path.to_string()));
    }
    Ok(segments.join("/"))
}

fn guess_mime(path: &str) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Files under a root directory on the local disk.
#[derive(Debug, Clone)]
pub struct LocalAdapter {
    root: PathBuf,
}

impl LocalAdapter {
    /// Create an adapter rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a storage key.
    pub fn full_path(&self, path: &str) -> Result<PathBuf> {
        let key = normalize_key(path)?;
        let full = self.root.join(&key);
        if full.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(FilesystemError::InvalidPath(path.to_string()));
        }
        Ok(full)
    }

    fn existing(&self, path: &str) -> Result<PathBuf> {
        let full = self.full_path(path)?;
        if full.is_file() {
            Ok(full)
        } else {
            Err(FilesystemError::NotFound(path.to_string()))
        }
    }

    /// Location for a new file, with its parent directories created.
    fn target(&self, path: &str) -> Result<PathBuf> {
        let full = self.full_path(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(full)
    }

    /// Copy `from` to `to`, failing if `to` exists. The check and the create
    /// are one `create_new` open.
    fn copy_new(&self, from: &Path, to: &Path, new_path: &str) -> Result<()> {
        let mut source = File::open(from)?;
        let mut dest = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(to)
            .map_err(|e| occupied(e, new_path))?;
        io::copy(&mut source, &mut dest)?;
        dest.sync_all()?;
        Ok(())
    }
}

fn occupied(e: io::Error, path: &str) -> FilesystemError {
    if e.kind() == io::ErrorKind::AlreadyExists {
        FilesystemError::DestinationExists(path.to_string())
    } else {
        e.into()
    }
}

impl StorageAdapter for LocalAdapter {
    fn write_stream(&self, path: &str, reader: &mut dyn Read) -> Result<u64> {
        let full = self.target(path)?;
        let mut file = File::create(&full)?;
        let written = io::copy(reader, &mut file)?;
        file.sync_all()?;
        debug!(path, written, "wrote file");
        Ok(written)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.existing(path)?)?)
    }

    fn file_exists(&self, path: &str) -> bool {
        self.full_path(path).map(|full| full.is_file()).unwrap_or(false)
    }

    fn delete(&self, path: &str) -> Result<()> {
        fs::remove_file(self.existing(path)?)?;
        Ok(())
    }

    fn rename(&self, path: &str, new_path: &str, overwrite: bool) -> Result<()> {
        let from = self.existing(path)?;
        let to = self.target(new_path)?;

        if !overwrite {
            // A hard link fails atomically on an occupied destination
            match fs::hard_link(&from, &to) {
                Ok(()) => {}
                Err(e) if e.raw_os_error() == Some(libc::EXDEV) => self.copy_new(&from, &to, new_path)?,
                Err(e) => return Err(occupied(e, new_path)),
            }
            fs::remove_file(&from)?;
            return Ok(());
        }

        // Try rename first (O(1) on same filesystem)
        match fs::rename(&from, &to) {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
                // Cross-filesystem: fall back to copy + delete
                fs::copy(&from, &to)?;
                fs::remove_file(&from)?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn copy(&self, path: &str, new_path: &str, overwrite: bool) -> Result<()> {
        let from = self.existing(path)?;
        let to = self.target(new_path)?;
        if overwrite {
            fs::copy(&from, &to)?;
            Ok(())
        } else {
            self.copy_new(&from, &to, new_path)
        }
    }

    fn file_size(&self, path: &str) -> Result<u64> {
        Ok(fs::metadata(self.existing(path)?)?.len())
    }

    fn mime_type(&self, path: &str) -> Result<String> {
        self.existing(path)?;
        Ok(guess_mime(path))
    }

    fn list_contents(&self) -> Result<Vec<ContentEntry>> {
        let mut entries = Vec::new();
        for entry in walkdir::WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.map_err(|e| FilesystemError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|_| FilesystemError::InvalidPath(entry.path().display().to_string()))?;
            let path = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            entries.push(ContentEntry {
                path,
                size: entry.metadata().map_err(|e| FilesystemError::Io(e.into()))?.len(),
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }
}

/// Files held in memory.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    files: DashMap<String, Vec<u8>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new adapter wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn existing(&self, path: &str) -> Result<String> {
        let key = normalize_key(path)?;
        if self.files.contains_key(&key) {
            Ok(key)
        } else {
            Err(FilesystemError::NotFound(path.to_string()))
        }
    }

    /// Store `data` at `key`; without `overwrite` an occupied key is an error.
    fn claim(&self, key: String, data: Vec<u8>, overwrite: bool, path: &str) -> Result<()> {
        match self.files.entry(key) {
            Entry::Occupied(_) if !overwrite => Err(FilesystemError::DestinationExists(path.to_string())),
            Entry::Occupied(mut entry) => {
                entry.insert(data);
                Ok(())
            }
            Entry::Vacant(entry) => {
                entry.insert(data);
                Ok(())
            }
        }
    }
}

impl StorageAdapter for MemoryAdapter {
    fn write_stream(&self, path: &str, reader: &mut dyn Read) -> Result<u64> {
        let key = normalize_key(path)?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        let written = data.len() as u64;
        self.files.insert(key, data);
        Ok(written)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let key = self.existing(path)?;
        self.files
            .get(&key)
            .map(|data| data.value().clone())
            .ok_or_else(|| FilesystemError::NotFound(path.to_string()))
    }

    fn file_exists(&self, path: &str) -> bool {
        normalize_key(path)
            .map(|key| self.files.contains_key(&key))
            .unwrap_or(false)
    }

    fn delete(&self, path: &str) -> Result<()> {
        let key = self.existing(path)?;
        self.files.remove(&key);
        Ok(())
    }

    fn rename(&self, path: &str, new_path: &str, overwrite: bool) -> Result<()> {
        let from = self.existing(path)?;
        let to = normalize_key(new_path)?;
        if from == to {
            return if overwrite {
                Ok(())
            } else {
                Err(FilesystemError::DestinationExists(new_path.to_string()))
            };
        }

        let data = self.read(path)?;
        self.claim(to, data, overwrite, new_path)?;
        self.files.remove(&from);
        Ok(())
    }

    fn copy(&self, path: &str, new_path: &str, overwrite: bool) -> Result<()> {
        let data = self.read(path)?;
        self.claim(normalize_key(new_path)?, data, overwrite, new_path)
    }

    fn file_size(&self, path: &str) -> Result<u64> {
        let key = self.existing(path)?;
        self.files
            .get(&key)
            .map(|data| data.len() as u64)
            .ok_or_else(|| FilesystemError::NotFound(path.to_string()))
    }

    fn mime_type(&self, path: &str) -> Result<String> {
        self.existing(path)?;
        Ok(guess_mime(path))
    }

    fn list_contents(&self) -> Result<Vec<ContentEntry>> {
        let mut entries: Vec<_> = self
            .files
            .iter()
            .map(|entry| ContentEntry {
                path: entry.key().clone(),
                size: entry.value().len() as u64,
            })
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }
}

/// Namespace that short adapter names are resolved against.
pub const ADAPTER_NAMESPACE: &str = module_path!();

pub const LOCAL_ADAPTER: &str = concat!(module_path!(), "::LocalAdapter");
pub const MEMORY_ADAPTER: &str = concat!(module_path!(), "::MemoryAdapter");

/// Builds an adapter from its configured arguments.
pub type AdapterFactory = Arc<dyn Fn(&[String]) -> Result<Arc<dyn StorageAdapter>> + Send + Sync>;

/// Name → factory map used to resolve the `adapter` setting.
#[derive(Clone)]
pub struct AdapterRegistry {
    factories: std::collections::HashMap<String, AdapterFactory>,
}

impl AdapterRegistry {
    pub fn empty() -> Self {
        Self {
            factories: Default::default(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, factory: AdapterFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Resolve a short or qualified name to its registered key.
    pub fn resolve(&self, name: &str) -> Result<String> {
        if self.factories.contains_key(name) {
            return Ok(name.to_string());
        }

        let qualified = format!("{ADAPTER_NAMESPACE}::{name}Adapter");
        if self.factories.contains_key(&qualified) {
            return Ok(qualified);
        }

        Err(FilesystemError::UnknownAdapter(name.to_string()))
    }

    pub fn build(&self, name: &str, arguments: &[String]) -> Result<Arc<dyn StorageAdapter>> {
        let key = self.resolve(name)?;
        let factory = self
            .factories
            .get(&key)
            .ok_or_else(|| FilesystemError::UnknownAdapter(name.to_string()))?;
        debug!(adapter = %key, "building storage adapter");
        factory(arguments)
    }
}

impl Default for AdapterRegistry {
    /// The built-in local and memory adapters.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(
            LOCAL_ADAPTER,
            Arc::new(|arguments: &[String]| {
                let root = arguments.first().ok_or_else(|| {
                    FilesystemError::Config("the local adapter needs a root directory argument".to_string())
                })?;
                Ok(Arc::new(LocalAdapter::new(root)?) as Arc<dyn StorageAdapter>)
            }),
        );
        registry.register(
            MEMORY_ADAPTER,
            Arc::new(|_: &[String]| Ok(MemoryAdapter::new_shared() as Arc<dyn StorageAdapter>)),
        );
        registry
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort_unstable();
        f.debug_struct("AdapterRegistry")
            .field("adapters", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn put(adapter: &dyn StorageAdapter, path: &str, data: &[u8]) {
        adapter
            .write_stream(path, &mut Cursor::new(data.to_vec()))
            .expect("write failed");
    }

    fn backends(temp_dir: &TempDir) -> Vec<Box<dyn StorageAdapter>> {
        vec![
            Box::new(LocalAdapter::new(temp_dir.path().join("root")).unwrap()),
            Box::new(MemoryAdapter::new()),
        ]
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("/a//b/./c.txt").unwrap(), "a/b/c.txt");
        assert!(matches!(normalize_key("a/../../etc"), Err(FilesystemError::InvalidPath(_))));
        assert!(matches!(normalize_key("//"), Err(FilesystemError::InvalidPath(_))));
    }

    #[test]
    fn test_write_read_and_metadata() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        for adapter in backends(&temp_dir) {
            put(adapter.as_ref(), "docs/readme.txt", b"hello");

            assert!(adapter.file_exists("docs/readme.txt"));
            assert_eq!(adapter.read("docs/readme.txt")?, b"hello");
            assert_eq!(adapter.file_size("docs/readme.txt")?, 5);
            assert_eq!(adapter.mime_type("docs/readme.txt")?, "text/plain");
            assert!(!adapter.file_exists("docs/missing.txt"));
        }
        Ok(())
    }

    #[test]
    fn test_rename_respects_overwrite() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        for adapter in backends(&temp_dir) {
            put(adapter.as_ref(), "a.txt", b"a");
            put(adapter.as_ref(), "b.txt", b"b");

            assert!(matches!(
                adapter.rename("a.txt", "b.txt", false),
                Err(FilesystemError::DestinationExists(_))
            ));
            assert_eq!(adapter.read("b.txt")?, b"b");

            adapter.rename("a.txt", "b.txt", true)?;
            assert!(!adapter.file_exists("a.txt"));
            assert_eq!(adapter.read("b.txt")?, b"a");

            adapter.rename("b.txt", "nested/dir/c.txt", false)?;
            assert_eq!(adapter.read("nested/dir/c.txt")?, b"a");
        }
        Ok(())
    }

    #[test]
    fn test_copy_respects_overwrite() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        for adapter in backends(&temp_dir) {
            put(adapter.as_ref(), "a.txt", b"a");
            put(adapter.as_ref(), "b.txt", b"b");

            assert!(matches!(
                adapter.copy("a.txt", "b.txt", false),
                Err(FilesystemError::DestinationExists(_))
            ));
            adapter.copy("a.txt", "b.txt", true)?;
            assert_eq!(adapter.read("a.txt")?, b"a");
            assert_eq!(adapter.read("b.txt")?, b"a");
        }
        Ok(())
    }

    #[test]
    fn test_missing_source_is_not_found() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        for adapter in backends(&temp_dir) {
            assert!(matches!(adapter.delete("nope"), Err(FilesystemError::NotFound(_))));
            assert!(matches!(adapter.rename("nope", "x", true), Err(FilesystemError::NotFound(_))));
            assert!(matches!(adapter.copy("nope", "x", true), Err(FilesystemError::NotFound(_))));
            assert!(matches!(adapter.file_size("nope"), Err(FilesystemError::NotFound(_))));
        }
        Ok(())
    }

    #[test]
    fn test_list_contents_sorted() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        for adapter in backends(&temp_dir) {
            put(adapter.as_ref(), "z.txt", b"zz");
            put(adapter.as_ref(), "a/b.txt", b"b");

            let entries = adapter.list_contents()?;
            assert_eq!(
                entries,
                vec![
                    ContentEntry { path: "a/b.txt".to_string(), size: 1 },
                    ContentEntry { path: "z.txt".to_string(), size: 2 },
                ]
            );
        }
        Ok(())
    }

    #[test]
    fn test_rename_onto_itself() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        for adapter in backends(&temp_dir) {
            put(adapter.as_ref(), "a.txt", b"a");
            assert!(matches!(
                adapter.rename("a.txt", "a.txt", false),
                Err(FilesystemError::DestinationExists(_))
            ));
            adapter.rename("a.txt", "a.txt", true)?;
            assert_eq!(adapter.read("a.txt")?, b"a");
        }
        Ok(())
    }

    #[test]
    fn test_local_copy_collision_keeps_destination() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let adapter = LocalAdapter::new(temp_dir.path())?;
        put(&adapter, "a.txt", b"aaaa");
        put(&adapter, "b.txt", b"bb");

        assert!(matches!(
            adapter.copy("a.txt", "b.txt", false),
            Err(FilesystemError::DestinationExists(_))
        ));
        assert_eq!(fs::read(temp_dir.path().join("b.txt"))?, b"bb");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_local_rename_leaves_single_link() -> anyhow::Result<()> {
        use std::os::unix::fs::MetadataExt;

        let temp_dir = TempDir::new()?;
        let adapter = LocalAdapter::new(temp_dir.path())?;
        put(&adapter, "a.txt", b"a");

        adapter.rename("a.txt", "moved/a.txt", false)?;
        assert!(!temp_dir.path().join("a.txt").exists());
        assert_eq!(fs::metadata(temp_dir.path().join("moved/a.txt"))?.nlink(), 1);
        Ok(())
    }

    #[test]
    fn test_local_rejects_traversal() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let adapter = LocalAdapter::new(temp_dir.path())?;
        let result = adapter.write_stream("../escape.txt", &mut Cursor::new(b"x".to_vec()));
        assert!(matches!(result, Err(FilesystemError::InvalidPath(_))));
        Ok(())
    }

    #[test]
    fn test_registry_resolution() {
        let registry = AdapterRegistry::default();
        assert_eq!(registry.resolve("Local").unwrap(), LOCAL_ADAPTER);
        assert_eq!(registry.resolve(MEMORY_ADAPTER).unwrap(), MEMORY_ADAPTER);
        assert!(matches!(
            registry.build("UnexistingAdapter", &[]),
            Err(FilesystemError::UnknownAdapter(_))
        ));
        assert!(matches!(registry.build("Local", &[]), Err(FilesystemError::Config(_))));
        assert!(registry.build("Memory", &[]).is_ok());
    }
}
