use depot::{Filesystem, FilesystemConfig};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// A local-disk filesystem rooted in a temp dir, plus a staging area for
/// files to upload from.
pub struct TestFixture {
    pub fs: Filesystem,
    pub root: PathBuf,
    pub staging: PathBuf,
    _temp_dir: TempDir,
}

impl TestFixture {
    pub fn new() -> Self {
        init_tracing();

        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().join("storage");
        let staging = temp_dir.path().join("staging");
        fs::create_dir_all(&staging).expect("Failed to create staging dir");

        let fs = Filesystem::new(FilesystemConfig::local(&root)).expect("Failed to create filesystem");

        Self {
            fs,
            root,
            staging,
            _temp_dir: temp_dir,
        }
    }

    /// Write a file into the staging area and return its path.
    pub fn stage(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.staging.join(name);
        fs::write(&path, content).expect("Failed to stage file");
        path
    }

    /// Path of a stored file on disk.
    pub fn stored(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
