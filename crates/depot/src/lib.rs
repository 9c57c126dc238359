//! Upload normalization, path formatting and hookable file storage.
//!
//! A [`Filesystem`] takes an upload in any of the shapes web stacks produce
//! (a local path, a multipart descriptor, an in-memory upload handle), hashes
//! it, asks a formatter where it belongs, writes it through a storage adapter
//! and returns a [`FileEntity`] describing the stored file.
//!
//! # Quick Start
//!
//! ```rust
//! use depot::{Filesystem, FilesystemConfig, MemoryUpload, UploadOptions};
//!
//! let mut fs = Filesystem::new(FilesystemConfig::memory())?;
//!
//! let upload = MemoryUpload::new("hello world.txt", "text/plain", b"hi".to_vec());
//! let entity = fs.upload(upload, &UploadOptions::new())?;
//! assert_eq!(entity.path(), "hello_world.txt");
//! assert!(fs.exists(&entity)?);
//!
//! // `None` only when a before_copy listener stops the copy
//! if let Some(copy) = fs.copy(&entity, "backup/hello.txt", false)? {
//!     assert!(copy.same_content(&entity));
//! }
//! # Ok::<(), depot::FilesystemError>(())
//! ```
//!
//! # Formatters
//!
//! - `Default`: the sanitized basename, optionally inside a folder.
//! - `Entity`: a `{token}` template filled from an entity record, e.g.
//!   `{entity-source}/{id}-{file-name}.{file-ext}`.
//!
//! # Hooks
//!
//! Every mutation fires a vetoable before-hook and an after-hook, see
//! [`hooks`].
//!
//! # Configuration
//!
//! Named filesystems are configured in TOML, see [`config`], and handed out
//! by a [`FilesystemRegistry`].

pub mod adapter;
pub mod collection;
pub mod config;
pub mod entity;
pub mod error;
pub mod filesystem;
pub mod formatter;
pub mod hash;
pub mod hooks;
pub mod normalizer;
pub mod registry;
pub mod source;

// Re-exports for convenience
pub use adapter::{AdapterRegistry, ContentEntry, LocalAdapter, MemoryAdapter, StorageAdapter};
pub use collection::{EntityItem, FileEntityCollection, MergeOptions};
pub use config::{ConfigSources, FilesystemConfig, Settings};
pub use entity::{FileEntity, FileEntityData};
pub use error::{FilesystemError, Result};
pub use filesystem::{Destination, Filesystem, FormatConfig, UploadOptions};
pub use formatter::{
    DefaultFormatter, EntityContext, EntityFormatter, EntityRecord, FormatData, FormatterOptions,
    FormatterRegistry, PathFormatter,
};
pub use hash::{ContentHash, HashAlgorithm};
pub use hooks::{Event, Hooks};
pub use normalizer::{CanonicalUpload, NormalizerConfig, SourceNormalizer};
pub use registry::FilesystemRegistry;
pub use source::{
    DescriptorSet, MemoryUpload, ParallelDescriptor, UploadBatch, UploadDescriptor, UploadHandle,
    UploadSource,
};
