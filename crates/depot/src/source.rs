//! Upload inputs accepted at the depot boundary.
//!
//! Three shapes arrive from callers and web layers:
//! - a filesystem path to an existing regular file
//! - a multipart descriptor (`name`, `tmp_name`, `size`, `type`), possibly in
//!   "parallel arrays" form when several files were submitted under one field
//! - an already-parsed upload handle that owns a readable stream

use std::fmt;
use std::io::{Cursor, Read};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{FilesystemError, Result};

/// A readable byte stream that the normalizer can take ownership of.
pub type ByteStream = Box<dyn Read + Send>;

/// An upload object produced by a web framework.
///
/// `detach` hands the underlying stream over exactly once; afterwards the
/// handle no longer owns a resource and further calls return `None`.
pub trait UploadHandle: Send {
    fn detach(&mut self) -> Option<ByteStream>;

    fn client_filename(&self) -> Option<&str>;

    fn size(&self) -> Option<u64>;

    fn client_media_type(&self) -> Option<&str>;
}

/// An in-memory upload handle, the shape multipart extractors usually yield.
pub struct MemoryUpload {
    filename: Option<String>,
    content_type: Option<String>,
    size: u64,
    data: Option<Vec<u8>>,
}

impl MemoryUpload {
    pub fn new(filename: impl Into<String>, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: Some(filename.into()),
            content_type: Some(content_type.into()),
            size: data.len() as u64,
            data: Some(data),
        }
    }

    /// An upload whose client sent no filename.
    pub fn anonymous(content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: None,
            content_type: Some(content_type.into()),
            size: data.len() as u64,
            data: Some(data),
        }
    }

    /// Whether the stream is still owned by this handle.
    pub fn is_attached(&self) -> bool {
        self.data.is_some()
    }
}

impl UploadHandle for MemoryUpload {
    fn detach(&mut self) -> Option<ByteStream> {
        self.data
            .take()
            .map(|data| Box::new(Cursor::new(data)) as ByteStream)
    }

    fn client_filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    fn client_media_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }
}

impl fmt::Debug for MemoryUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryUpload")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// A single-file multipart descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadDescriptor {
    #[serde(default)]
    pub name: String,
    pub tmp_name: PathBuf,
    #[serde(default)]
    pub size: u64,
    #[serde(rename = "type", default)]
    pub mime_type: String,
    /// Upload status code reported by the web layer, zero on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<i64>,
}

impl UploadDescriptor {
    pub fn new(
        name: impl Into<String>,
        tmp_name: impl Into<PathBuf>,
        size: u64,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            tmp_name: tmp_name.into(),
            size,
            mime_type: mime_type.into(),
            error: None,
        }
    }
}

/// Several files submitted under one field: every key holds one entry per file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelDescriptor {
    pub name: Vec<String>,
    pub tmp_name: Vec<PathBuf>,
    pub size: Vec<u64>,
    #[serde(rename = "type")]
    pub mime_type: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Vec<i64>>,
}

impl ParallelDescriptor {
    /// Split into one descriptor per file, in submission order.
    pub fn untranspose(self) -> Result<Vec<UploadDescriptor>> {
        let count = self.name.len();
        let errors_len = self.error.as_ref().map_or(count, Vec::len);
        if [self.tmp_name.len(), self.size.len(), self.mime_type.len(), errors_len]
            .iter()
            .any(|&len| len != count)
        {
            return Err(FilesystemError::invalid_source(
                None,
                "parallel upload fields have mismatched lengths",
            ));
        }

        let mut errors = self.error.map(Vec::into_iter);
        let files = self
            .name
            .into_iter()
            .zip(self.tmp_name)
            .zip(self.size)
            .zip(self.mime_type)
            .map(|(((name, tmp_name), size), mime_type)| UploadDescriptor {
                name,
                tmp_name,
                size,
                mime_type,
                error: errors.as_mut().and_then(Iterator::next),
            })
            .collect();

        Ok(files)
    }
}

/// Descriptor payloads as they come off the wire, in any of their shapes.
///
/// Deserializing tries the parallel-arrays form first, so a JSON object whose
/// `tmp_name` is an array is detected and split up transparently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DescriptorSet {
    Parallel(ParallelDescriptor),
    Single(UploadDescriptor),
    Many(Vec<UploadDescriptor>),
}

impl DescriptorSet {
    pub fn into_descriptors(self) -> Result<Vec<UploadDescriptor>> {
        match self {
            DescriptorSet::Parallel(parallel) => parallel.untranspose(),
            DescriptorSet::Single(single) => Ok(vec![single]),
            DescriptorSet::Many(many) => Ok(many),
        }
    }
}

/// Any single input the normalizer accepts.
pub enum UploadSource {
    Path(PathBuf),
    Descriptor(UploadDescriptor),
    Handle(Box<dyn UploadHandle>),
}

impl UploadSource {
    pub fn handle(handle: impl UploadHandle + 'static) -> Self {
        UploadSource::Handle(Box::new(handle))
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            UploadSource::Path(_) => "path",
            UploadSource::Descriptor(_) => "descriptor",
            UploadSource::Handle(_) => "handle",
        }
    }
}

impl fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadSource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            UploadSource::Descriptor(descriptor) => {
                f.debug_tuple("Descriptor").field(descriptor).finish()
            }
            UploadSource::Handle(handle) => f
                .debug_struct("Handle")
                .field("client_filename", &handle.client_filename())
                .finish(),
        }
    }
}

impl From<PathBuf> for UploadSource {
    fn from(path: PathBuf) -> Self {
        UploadSource::Path(path)
    }
}

impl From<&std::path::Path> for UploadSource {
    fn from(path: &std::path::Path) -> Self {
        UploadSource::Path(path.to_path_buf())
    }
}

impl From<&str> for UploadSource {
    fn from(path: &str) -> Self {
        UploadSource::Path(PathBuf::from(path))
    }
}

impl From<String> for UploadSource {
    fn from(path: String) -> Self {
        UploadSource::Path(PathBuf::from(path))
    }
}

impl From<UploadDescriptor> for UploadSource {
    fn from(descriptor: UploadDescriptor) -> Self {
        UploadSource::Descriptor(descriptor)
    }
}

impl From<MemoryUpload> for UploadSource {
    fn from(upload: MemoryUpload) -> Self {
        UploadSource::Handle(Box::new(upload))
    }
}

impl From<Box<dyn UploadHandle>> for UploadSource {
    fn from(handle: Box<dyn UploadHandle>) -> Self {
        UploadSource::Handle(handle)
    }
}

/// Input to `Filesystem::upload_many`.
#[derive(Debug)]
pub enum UploadBatch {
    Sources(Vec<UploadSource>),
    Descriptors(DescriptorSet),
}

impl UploadBatch {
    /// Flatten into per-file sources, un-transposing parallel arrays.
    pub fn into_sources(self) -> Result<Vec<UploadSource>> {
        match self {
            UploadBatch::Sources(sources) => Ok(sources),
            UploadBatch::Descriptors(set) => Ok(set
                .into_descriptors()?
                .into_iter()
                .map(UploadSource::Descriptor)
                .collect()),
        }
    }
}

impl From<Vec<UploadSource>> for UploadBatch {
    fn from(sources: Vec<UploadSource>) -> Self {
        UploadBatch::Sources(sources)
    }
}

impl From<DescriptorSet> for UploadBatch {
    fn from(set: DescriptorSet) -> Self {
        UploadBatch::Descriptors(set)
    }
}

impl From<ParallelDescriptor> for UploadBatch {
    fn from(parallel: ParallelDescriptor) -> Self {
        UploadBatch::Descriptors(DescriptorSet::Parallel(parallel))
    }
}

impl From<Vec<UploadDescriptor>> for UploadBatch {
    fn from(many: Vec<UploadDescriptor>) -> Self {
        UploadBatch::Descriptors(DescriptorSet::Many(many))
    }
}
