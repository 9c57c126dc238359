//! SourceNormalizer: turns any accepted upload input into a `CanonicalUpload`.
//!
//! The canonical record owns an open byte stream. It is released when the
//! record is closed or dropped, so every early return in the orchestrator
//! gives the descriptor back to the OS.

use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FilesystemError, Result};
use crate::hash::{ContentHash, HashAlgorithm};
use crate::source::{ByteStream, UploadDescriptor, UploadHandle, UploadSource};

/// Options forwarded to the normalizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Digest algorithm name, e.g. "blake3" or "sha256".
    pub hashing_algo: String,

    /// Name used when an upload carries no filename.
    pub fallback_filename: String,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            hashing_algo: HashAlgorithm::default().to_string(),
            fallback_filename: "untitled".to_string(),
        }
    }
}

/// The normalized form of one upload.
pub struct CanonicalUpload {
    pub filename: String,
    pub size: u64,
    pub mime: String,
    pub hash: ContentHash,
    source: ByteStream,
}

impl CanonicalUpload {
    /// The open stream to copy into storage.
    pub fn reader(&mut self) -> &mut dyn Read {
        &mut self.source
    }

    /// Release the underlying resource.
    pub fn close(self) {
        debug!(filename = %self.filename, "releasing upload source");
    }
}

impl fmt::Debug for CanonicalUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanonicalUpload")
            .field("filename", &self.filename)
            .field("size", &self.size)
            .field("mime", &self.mime)
            .field("hash", &self.hash)
            .finish_non_exhaustive()
    }
}

/// Converts path, descriptor and handle inputs into `CanonicalUpload`s.
#[derive(Debug, Clone)]
pub struct SourceNormalizer {
    algorithm: HashAlgorithm,
    fallback_filename: String,
}

impl Default for SourceNormalizer {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::default(),
            fallback_filename: NormalizerConfig::default().fallback_filename,
        }
    }
}

impl SourceNormalizer {
    pub fn new(config: &NormalizerConfig) -> Result<Self> {
        Ok(Self {
            algorithm: config.hashing_algo.parse()?,
            fallback_filename: config.fallback_filename.clone(),
        })
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn normalize(&self, input: UploadSource) -> Result<CanonicalUpload> {
        debug!(kind = input.kind(), "normalizing upload source");
        match input {
            UploadSource::Path(path) => self.from_path(&path),
            UploadSource::Descriptor(descriptor) => self.from_descriptor(descriptor),
            UploadSource::Handle(handle) => self.from_handle(handle),
        }
    }

    fn from_path(&self, path: &Path) -> Result<CanonicalUpload> {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .filter(|name| !name.is_empty());

        if !path.is_file() {
            let shown = path.to_string_lossy();
            return Err(FilesystemError::invalid_source(
                filename.as_deref().or(Some(shown.as_ref())),
                "not an existing regular file",
            ));
        }

        let (file, hash) = self.open_and_hash(path, filename.as_deref())?;
        let size = file.metadata()?.len();
        let mime = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Ok(CanonicalUpload {
            filename: filename.unwrap_or_else(|| self.fallback_filename.clone()),
            size,
            mime,
            hash,
            source: Box::new(file),
        })
    }

    fn from_descriptor(&self, descriptor: UploadDescriptor) -> Result<CanonicalUpload> {
        let filename = if descriptor.name.is_empty() {
            self.fallback_filename.clone()
        } else {
            descriptor.name
        };

        if let Some(code) = descriptor.error.filter(|code| *code != 0) {
            return Err(FilesystemError::invalid_source(
                Some(&filename),
                format!("upload reported error code {code}"),
            ));
        }

        if !descriptor.tmp_name.is_file() {
            return Err(FilesystemError::invalid_source(
                Some(&filename),
                format!("staging file {} is missing", descriptor.tmp_name.display()),
            ));
        }

        let (file, hash) = self.open_and_hash(&descriptor.tmp_name, Some(&filename))?;

        Ok(CanonicalUpload {
            filename,
            size: descriptor.size,
            mime: descriptor.mime_type,
            hash,
            source: Box::new(file),
        })
    }

    /// Materializes the whole stream in memory to hash it; the digest needs
    /// every byte before the write starts and the stream cannot be rewound.
    fn from_handle(&self, mut handle: Box<dyn UploadHandle>) -> Result<CanonicalUpload> {
        let filename = handle
            .client_filename()
            .filter(|name| !name.is_empty())
            .map_or_else(|| self.fallback_filename.clone(), str::to_string);

        let mut stream = handle.detach().ok_or_else(|| {
            FilesystemError::invalid_source(Some(&filename), "upload stream already detached")
        })?;

        let mut data = Vec::new();
        stream
            .read_to_end(&mut data)
            .map_err(|e| FilesystemError::invalid_source(Some(&filename), e.to_string()))?;

        let hash = ContentHash::from_data(self.algorithm, &data);
        let size = handle.size().unwrap_or(data.len() as u64);
        let mime = handle
            .client_media_type()
            .unwrap_or("application/octet-stream")
            .to_string();

        Ok(CanonicalUpload {
            filename,
            size,
            mime,
            hash,
            source: Box::new(Cursor::new(data)),
        })
    }

    /// Open a file, stream it through the hasher and rewind for the write.
    fn open_and_hash(&self, path: &Path, filename: Option<&str>) -> Result<(File, ContentHash)> {
        let mut file = File::open(path)
            .map_err(|e| FilesystemError::invalid_source(filename, e.to_string()))?;
        let hash = ContentHash::from_reader(self.algorithm, &mut file)?;
        file.rewind()?;
        Ok((file, hash))
    }
}
