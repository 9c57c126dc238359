//! Filesystem: the orchestrator that normalizes, formats, stores and hooks.
//!
//! An upload runs normalize → format → `before_upload` → write →
//! re-query size and mime → build entity → `after_upload`. Rename, copy and
//! delete follow the same before-hook → storage → after-hook sequence.
//!
//! The selected formatter and the built adapter are cached on the instance.
//! Picking a formatter for one call keeps it selected for the following ones
//! until [`Filesystem::reset`]. An adapter handed in with
//! [`Filesystem::with_adapter`] or [`Filesystem::set_adapter`] survives a
//! reset; one built from the configuration is dropped and built again.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::{AdapterFactory, AdapterRegistry, ContentEntry, StorageAdapter};
use crate::collection::{EntityItem, FileEntityCollection, MergeOptions};
use crate::config::FilesystemConfig;
use crate::entity::{FileEntity, FileEntityData};
use crate::error::{FilesystemError, Result};
use crate::formatter::{FormatData, FormatterFactory, FormatterOptions, FormatterRegistry, PathFormatter};
use crate::hooks::{CopiedFile, Hooks, PendingCopy, PendingRename, PendingUpload};
use crate::normalizer::SourceNormalizer;
use crate::source::{UploadBatch, UploadSource};

/// Formatter selection and input for one call.
#[derive(Debug, Clone, Default)]
pub struct FormatConfig {
    /// Formatter to select; stays selected afterwards.
    pub formatter: Option<String>,
    /// Context data for the formatter.
    pub data: Option<FormatData>,
    pub options: FormatterOptions,
}

impl FormatConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn formatter(mut self, name: impl Into<String>) -> Self {
        self.formatter = Some(name.into());
        self
    }

    pub fn data(mut self, data: impl Into<FormatData>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn options(mut self, options: FormatterOptions) -> Self {
        self.options = options;
        self
    }
}

/// Options for [`Filesystem::upload`].
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub format: FormatConfig,
    /// Identifier for the new entity; generated when absent.
    pub uuid: Option<Uuid>,
}

impl UploadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn format(mut self, format: FormatConfig) -> Self {
        self.format = format;
        self
    }

    pub fn uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = Some(uuid);
        self
    }
}

impl From<FormatConfig> for UploadOptions {
    fn from(format: FormatConfig) -> Self {
        Self { format, uuid: None }
    }
}

/// Target of a rename or copy: a literal path, or formatter settings applied
/// to the entity's current path.
#[derive(Debug, Clone)]
pub enum Destination {
    Path(String),
    Format(FormatConfig),
}

impl From<&str> for Destination {
    fn from(path: &str) -> Self {
        Destination::Path(path.to_string())
    }
}

impl From<String> for Destination {
    fn from(path: String) -> Self {
        Destination::Path(path)
    }
}

impl From<FormatConfig> for Destination {
    fn from(config: FormatConfig) -> Self {
        Destination::Format(config)
    }
}

/// Upload, rename, copy and delete files through a storage adapter.
///
/// Not meant to be shared between threads; use one instance per task.
pub struct Filesystem {
    config: FilesystemConfig,
    formatters: FormatterRegistry,
    adapters: AdapterRegistry,
    adapter: Option<Arc<dyn StorageAdapter>>,
    injected: Option<Arc<dyn StorageAdapter>>,
    formatter: Option<String>,
    normalizer: SourceNormalizer,
    hooks: Hooks,
}

impl Filesystem {
    pub fn new(config: FilesystemConfig) -> Result<Self> {
        let normalizer = SourceNormalizer::new(&config.normalizer)?;
        Ok(Self {
            config,
            formatters: FormatterRegistry::default(),
            adapters: AdapterRegistry::default(),
            adapter: None,
            injected: None,
            formatter: None,
            normalizer,
            hooks: Hooks::new(),
        })
    }

    /// A filesystem writing through `adapter`, otherwise default settings.
    pub fn with_adapter(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self {
            config: FilesystemConfig::default(),
            formatters: FormatterRegistry::default(),
            adapters: AdapterRegistry::default(),
            adapter: Some(Arc::clone(&adapter)),
            injected: Some(adapter),
            formatter: None,
            normalizer: SourceNormalizer::default(),
            hooks: Hooks::new(),
        }
    }

    pub fn config(&self) -> &FilesystemConfig {
        &self.config
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut Hooks {
        &mut self.hooks
    }

    pub fn normalizer(&self) -> &SourceNormalizer {
        &self.normalizer
    }

    pub fn register_formatter(&mut self, name: impl Into<String>, factory: FormatterFactory) -> &mut Self {
        self.formatters.register(name, factory);
        self
    }

    pub fn register_adapter(&mut self, name: impl Into<String>, factory: AdapterFactory) -> &mut Self {
        self.adapters.register(name, factory);
        self
    }

    pub fn set_adapter(&mut self, adapter: Arc<dyn StorageAdapter>) -> &mut Self {
        self.adapter = Some(Arc::clone(&adapter));
        self.injected = Some(adapter);
        self
    }

    /// The storage adapter, built from the configuration on first use.
    pub fn adapter(&mut self) -> Result<Arc<dyn StorageAdapter>> {
        if let Some(adapter) = &self.adapter {
            return Ok(Arc::clone(adapter));
        }

        let adapter = self
            .adapters
            .build(&self.config.adapter, &self.config.adapter_arguments)?;
        self.adapter = Some(Arc::clone(&adapter));
        Ok(adapter)
    }

    /// Select the formatter used by following calls.
    pub fn set_formatter(&mut self, name: &str) -> Result<&mut Self> {
        let resolved = self.formatters.resolve(name)?;
        debug!(formatter = %resolved, "selected formatter");
        self.formatter = Some(resolved);
        Ok(self)
    }

    /// Qualified name of the currently selected formatter, if any.
    pub fn formatter_name(&self) -> Option<&str> {
        self.formatter.as_deref()
    }

    /// A configured formatter for `filename`.
    pub fn new_formatter(&mut self, filename: &str, config: &FormatConfig) -> Result<Box<dyn PathFormatter>> {
        if let Some(name) = &config.formatter {
            self.set_formatter(name)?;
        }

        let name = match &self.formatter {
            Some(name) => name.clone(),
            None => {
                let resolved = self.formatters.resolve(&self.config.formatter)?;
                self.formatter = Some(resolved.clone());
                resolved
            }
        };

        self.formatters
            .build(&name, filename, config.data.clone(), &config.options)
    }

    /// Clear the selected formatter and drop a configuration-built adapter.
    pub fn reset(&mut self) -> &mut Self {
        self.formatter = None;
        self.adapter = self.injected.clone();
        self
    }

    pub fn new_entity(&self, data: FileEntityData) -> Result<FileEntity> {
        FileEntity::new(data)
    }

    pub fn new_entity_from_map(&self, map: Map<String, Value>) -> Result<FileEntity> {
        FileEntity::from_map(map)
    }

    pub fn upload(&mut self, source: impl Into<UploadSource>, options: &UploadOptions) -> Result<FileEntity> {
        let mut upload = self.normalizer.normalize(source.into())?;
        let formatter = self.new_formatter(&upload.filename, &options.format)?;
        let path = formatter.path()?;
        let base_name = formatter.base_name();

        let event = self.hooks.before_upload.dispatch(PendingUpload {
            filename: upload.filename.clone(),
            size: upload.size,
            mime: upload.mime.clone(),
            hash: upload.hash.clone(),
            path: path.clone(),
            base_name: base_name.clone(),
        });
        if event.is_stopped() {
            let name = event.name();
            debug!(path = %path, "upload stopped by before_upload");
            return event.into_result().ok_or(FilesystemError::Vetoed(name));
        }

        let adapter = self.adapter()?;
        let failed = |source: FilesystemError| FilesystemError::UploadFailed {
            path: path.clone(),
            source: Box::new(source),
        };

        adapter.write_stream(&path, upload.reader()).map_err(failed)?;
        let size = adapter.file_size(&path).map_err(failed)?;
        let mime = adapter.mime_type(&path).map_err(failed)?;

        let entity = self.new_entity(FileEntityData {
            uuid: options.uuid,
            path: Some(path),
            filename: Some(base_name),
            mime: Some(mime),
            hash: Some(upload.hash.clone()),
            size: Some(size),
            created: None,
        })?;
        info!(path = %entity.path(), hash = %entity.hash(), size, "uploaded file");

        self.hooks.after_upload.notify(&entity);
        upload.close();

        Ok(entity)
    }

    /// Upload every file of a batch in order; the first failure aborts.
    pub fn upload_many(
        &mut self,
        batch: impl Into<UploadBatch>,
        format: &FormatConfig,
    ) -> Result<FileEntityCollection> {
        let sources = batch.into().into_sources()?;
        debug!(count = sources.len(), "uploading batch");

        let options = UploadOptions::from(format.clone());
        sources
            .into_iter()
            .map(|source| self.upload(source, &options))
            .collect()
    }

    pub fn exists(&mut self, entity: &FileEntity) -> Result<bool> {
        Ok(self.adapter()?.file_exists(entity.path()))
    }

    /// Delete the stored file. `false` when it did not exist.
    pub fn delete(&mut self, entity: &FileEntity) -> Result<bool> {
        let event = self.hooks.before_delete.dispatch(entity.clone());
        if event.is_stopped() {
            return Ok(event.into_result().unwrap_or(false));
        }

        let adapter = self.adapter()?;
        if !adapter.file_exists(entity.path()) {
            debug!(path = %entity.path(), "nothing to delete");
            return Ok(false);
        }

        adapter.delete(entity.path())?;
        info!(path = %entity.path(), "deleted file");
        self.hooks.after_delete.notify(entity);

        Ok(true)
    }

    /// Move the stored file and point `entity` at the new path.
    ///
    /// Without `force` an occupied destination fails with `DestinationExists`.
    /// When a `before_rename` listener stops the call, its entity is returned
    /// instead, or `None` if it gave none.
    pub fn rename(
        &mut self,
        entity: &mut FileEntity,
        destination: impl Into<Destination>,
        force: bool,
    ) -> Result<Option<FileEntity>> {
        let new_path = self.resolve_destination(entity, destination.into())?;

        let event = self.hooks.before_rename.dispatch(PendingRename {
            entity: entity.clone(),
            new_path: new_path.clone(),
        });
        if event.is_stopped() {
            debug!(path = %entity.path(), "rename stopped by before_rename");
            return Ok(event.into_result());
        }

        self.adapter()?.rename(entity.path(), &new_path, force)?;
        info!(from = %entity.path(), to = %new_path, force, "renamed file");
        entity.set_path(new_path);

        self.hooks.after_rename.notify(entity);
        Ok(Some(entity.clone()))
    }

    /// Copy the stored file and return a new entity for the copy.
    ///
    /// The copy carries every field of `entity` except the path; `entity`
    /// itself is left untouched. A stopped `before_copy` returns the
    /// listener's entity, or `None`.
    pub fn copy(
        &mut self,
        entity: &FileEntity,
        destination: impl Into<Destination>,
        force: bool,
    ) -> Result<Option<FileEntity>> {
        let destination = self.resolve_destination(entity, destination.into())?;

        let event = self.hooks.before_copy.dispatch(PendingCopy {
            entity: entity.clone(),
            destination: destination.clone(),
        });
        if event.is_stopped() {
            debug!(path = %entity.path(), "copy stopped by before_copy");
            return Ok(event.into_result());
        }

        self.adapter()?.copy(entity.path(), &destination, force)?;
        info!(from = %entity.path(), to = %destination, force, "copied file");

        let mut copy = self.new_entity(entity.to_data())?;
        copy.set_path(destination);

        self.hooks.after_copy.notify(&CopiedFile {
            copy: copy.clone(),
            original: entity.clone(),
        });
        Ok(Some(copy))
    }

    /// Reconcile `existing` with `incoming` by content hash.
    ///
    /// Raw incoming items are built or uploaded first. Incoming entities win
    /// on hash collisions. Entities with a hash in `remove_hashes` are
    /// dropped and, with `delete_removed`, their files deleted.
    pub fn merge(
        &mut self,
        existing: FileEntityCollection,
        incoming: impl IntoIterator<Item = EntityItem>,
        options: &MergeOptions,
    ) -> Result<FileEntityCollection> {
        let incoming = incoming
            .into_iter()
            .map(|item| self.resolve_item(item, &options.format))
            .collect::<Result<Vec<_>>>()?;

        let (merged, removed) = existing.merge_by_hash(incoming, &options.remove_hashes);
        debug!(kept = merged.len(), removed = removed.len(), "merged collections");

        if options.delete_removed {
            for entity in &removed {
                if !self.delete(entity)? {
                    warn!(path = %entity.path(), "removed entity had no stored file");
                }
            }
        }

        Ok(merged)
    }

    /// Stored bytes of `entity`.
    pub fn read(&mut self, entity: &FileEntity) -> Result<Vec<u8>> {
        self.adapter()?.read(entity.path())
    }

    pub fn list_contents(&mut self) -> Result<Vec<ContentEntry>> {
        self.adapter()?.list_contents()
    }

    pub(crate) fn resolve_item(&mut self, item: EntityItem, format: &FormatConfig) -> Result<FileEntity> {
        match item {
            EntityItem::Entity(entity) => Ok(entity),
            EntityItem::Data(data) => self.new_entity(data),
            EntityItem::Map(map) => self.new_entity_from_map(map),
            EntityItem::Upload(source) => self.upload(source, &UploadOptions::from(format.clone())),
        }
    }

    fn resolve_destination(&mut self, entity: &FileEntity, destination: Destination) -> Result<String> {
        match destination {
            Destination::Path(path) => Ok(path),
            Destination::Format(config) => self.new_formatter(entity.path(), &config)?.path(),
        }
    }
}

impl std::fmt::Debug for Filesystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filesystem")
            .field("config", &self.config)
            .field("formatter", &self.formatter)
            .field("adapter_built", &self.adapter.is_some())
            .field("adapter_injected", &self.injected.is_some())
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use crate::formatter::{DEFAULT_FORMATTER, ENTITY_FORMATTER, EntityRecord};
    use crate::source::MemoryUpload;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn memory_fs() -> (Filesystem, Arc<MemoryAdapter>) {
        let adapter = MemoryAdapter::new_shared();
        let fs = Filesystem::with_adapter(adapter.clone());
        (fs, adapter)
    }

    fn text(name: &str, body: &str) -> MemoryUpload {
        MemoryUpload::new(name, "text/plain", body.as_bytes().to_vec())
    }

    #[test]
    fn test_upload_writes_and_builds_entity() {
        let (mut fs, adapter) = memory_fs();
        let options = UploadOptions::new().format(FormatConfig::new().options(FormatterOptions::folder("docs")));

        let entity = fs.upload(text("read me.txt", "hello"), &options).unwrap();

        assert_eq!(entity.path(), "docs/read_me.txt");
        assert_eq!(entity.filename(), "read_me.txt");
        assert_eq!(entity.size(), 5);
        assert_eq!(entity.mime(), "text/plain");
        assert_eq!(adapter.read("docs/read_me.txt").unwrap(), b"hello");
        assert!(fs.exists(&entity).unwrap());
    }

    #[test]
    fn test_upload_keeps_given_uuid() {
        let (mut fs, _) = memory_fs();
        let uuid = Uuid::new_v4();
        let entity = fs.upload(text("a.txt", "a"), &UploadOptions::new().uuid(uuid)).unwrap();
        assert_eq!(entity.uuid(), uuid);
    }

    #[test]
    fn test_formatter_selection_is_sticky_until_reset() {
        let (mut fs, _) = memory_fs();
        assert_eq!(fs.formatter_name(), None);

        let config = FormatConfig::new()
            .formatter("Entity")
            .data(EntityRecord::new("articles"));
        let entity = fs.upload(text("note.txt", "x"), &config.into()).unwrap();
        assert_eq!(entity.path(), "articles/note.txt");
        assert_eq!(fs.formatter_name(), Some(ENTITY_FORMATTER));

        fs.reset();
        assert_eq!(fs.formatter_name(), None);
        let entity = fs.upload(text("note.txt", "x"), &UploadOptions::new()).unwrap();
        assert_eq!(entity.path(), "note.txt");
        assert_eq!(fs.formatter_name(), Some(DEFAULT_FORMATTER));
    }

    #[test]
    fn test_reset_keeps_injected_adapter() {
        let (mut fs, adapter) = memory_fs();
        fs.reset();

        let entity = fs.upload(text("kept.txt", "x"), &UploadOptions::new()).unwrap();
        assert_eq!(adapter.len(), 1);
        assert_eq!(adapter.read("kept.txt").unwrap(), b"x");

        let replacement = MemoryAdapter::new_shared();
        fs.set_adapter(replacement.clone());
        fs.reset();
        assert!(!fs.exists(&entity).unwrap());
        fs.upload(text("other.txt", "y"), &UploadOptions::new()).unwrap();
        assert_eq!(replacement.len(), 1);
        assert_eq!(adapter.len(), 1);
    }

    #[test]
    fn test_unknown_formatter() {
        let (mut fs, _) = memory_fs();
        let config = FormatConfig::new().formatter("Nope");
        let err = fs.upload(text("a.txt", "a"), &config.into()).unwrap_err();
        assert!(matches!(err, FilesystemError::UnknownFormatter(name) if name == "Nope"));
    }

    #[test]
    fn test_upload_veto_with_replacement() {
        let (mut fs, adapter) = memory_fs();
        let replacement = FileEntity::new(FileEntityData::new().path("X")).unwrap();
        let returned = replacement.clone();
        fs.hooks_mut()
            .before_upload
            .listen(move |event| event.stop_with(returned.clone()));

        let entity = fs.upload(text("a.txt", "a"), &UploadOptions::new()).unwrap();
        assert_eq!(entity, replacement);
        assert!(adapter.is_empty());
    }

    #[test]
    fn test_upload_veto_without_replacement() {
        let (mut fs, adapter) = memory_fs();
        fs.hooks_mut().before_upload.listen(|event| event.stop());

        let err = fs.upload(text("a.txt", "a"), &UploadOptions::new()).unwrap_err();
        assert!(matches!(err, FilesystemError::Vetoed("before_upload")));
        assert!(adapter.is_empty());
    }

    #[test]
    fn test_before_upload_sees_pending_upload() {
        let (mut fs, _) = memory_fs();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        fs.hooks_mut()
            .before_upload
            .listen(move |event| *sink.lock().unwrap() = Some(event.payload().clone()));

        let entity = fs.upload(text("a b.txt", "abc"), &UploadOptions::new()).unwrap();
        let pending = seen.lock().unwrap().take().unwrap();
        assert_eq!(pending.filename, "a b.txt");
        assert_eq!(pending.path, "a_b.txt");
        assert_eq!(&pending.hash, entity.hash());
    }

    #[test]
    fn test_write_failure_is_upload_failed() {
        let (mut fs, _) = memory_fs();
        let config = FormatConfig::new().options(FormatterOptions::folder(".."));
        let err = fs.upload(text("a.txt", "a"), &config.into()).unwrap_err();
        match err {
            FilesystemError::UploadFailed { path, source } => {
                assert_eq!(path, "../a.txt");
                assert!(matches!(*source, FilesystemError::InvalidPath(_)));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_delete() {
        let (mut fs, _) = memory_fs();
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&deleted);
        fs.hooks_mut()
            .after_delete
            .listen(move |entity: &FileEntity| sink.lock().unwrap().push(entity.path().to_string()));

        let entity = fs.upload(text("a.txt", "a"), &UploadOptions::new()).unwrap();
        assert!(fs.delete(&entity).unwrap());
        assert!(!fs.exists(&entity).unwrap());
        assert!(!fs.delete(&entity).unwrap());
        assert_eq!(*deleted.lock().unwrap(), vec!["a.txt".to_string()]);
    }

    #[test]
    fn test_delete_veto() {
        let (mut fs, _) = memory_fs();
        let entity = fs.upload(text("a.txt", "a"), &UploadOptions::new()).unwrap();

        fs.hooks_mut().before_delete.listen(|event| event.stop_with(true));
        assert!(fs.delete(&entity).unwrap());
        assert!(fs.exists(&entity).unwrap());

        fs.hooks_mut().before_delete.clear();
        fs.hooks_mut().before_delete.listen(|event| event.stop());
        assert!(!fs.delete(&entity).unwrap());
        assert!(fs.exists(&entity).unwrap());
    }

    #[test]
    fn test_rename_mutates_in_place() {
        let (mut fs, _) = memory_fs();
        let mut entity = fs.upload(text("a.txt", "a"), &UploadOptions::new()).unwrap();
        let uuid = entity.uuid();

        let returned = fs.rename(&mut entity, "moved/b.txt", false).unwrap();

        assert_eq!(entity.path(), "moved/b.txt");
        assert_eq!(returned, Some(entity.clone()));
        assert_eq!(entity.uuid(), uuid);
        assert!(fs.exists(&entity).unwrap());
        assert_eq!(fs.read(&entity).unwrap(), b"a");
    }

    #[test]
    fn test_rename_collision_and_force() {
        let (mut fs, _) = memory_fs();
        let mut a = fs.upload(text("a.txt", "a"), &UploadOptions::new()).unwrap();
        fs.upload(text("b.txt", "b"), &UploadOptions::new()).unwrap();

        let err = fs.rename(&mut a, "b.txt", false).unwrap_err();
        assert!(matches!(err, FilesystemError::DestinationExists(_)));
        assert_eq!(a.path(), "a.txt");

        fs.rename(&mut a, "b.txt", true).unwrap();
        assert_eq!(fs.read(&a).unwrap(), b"a");
    }

    #[test]
    fn test_rename_with_formatter() {
        let (mut fs, _) = memory_fs();
        let mut entity = fs.upload(text("a.txt", "a"), &UploadOptions::new()).unwrap();

        let destination = FormatConfig::new().options(FormatterOptions::folder("archive"));
        fs.rename(&mut entity, destination, false).unwrap();
        assert_eq!(entity.path(), "archive/a.txt");
    }

    #[test]
    fn test_rename_veto_leaves_entity() {
        let (mut fs, _) = memory_fs();
        let mut entity = fs.upload(text("a.txt", "a"), &UploadOptions::new()).unwrap();
        fs.hooks_mut().before_rename.listen(|event| {
            assert_eq!(event.payload().new_path, "b.txt");
            event.stop();
        });

        assert_eq!(fs.rename(&mut entity, "b.txt", false).unwrap(), None);
        assert_eq!(entity.path(), "a.txt");
        assert!(fs.exists(&entity).unwrap());
    }

    #[test]
    fn test_rename_veto_with_replacement() {
        let (mut fs, adapter) = memory_fs();
        let mut entity = fs.upload(text("a.txt", "a"), &UploadOptions::new()).unwrap();
        let replacement = FileEntity::new(FileEntityData::new().path("elsewhere.txt")).unwrap();
        let returned = replacement.clone();
        fs.hooks_mut()
            .before_rename
            .listen(move |event| event.stop_with(returned.clone()));

        let result = fs.rename(&mut entity, "b.txt", false).unwrap();
        assert_eq!(result, Some(replacement));
        assert_eq!(entity.path(), "a.txt");
        assert!(!adapter.file_exists("b.txt"));
    }

    #[test]
    fn test_after_hooks_see_results() {
        let (mut fs, _) = memory_fs();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        fs.hooks_mut()
            .after_upload
            .listen(move |entity: &FileEntity| sink.lock().unwrap().push(format!("upload {}", entity.path())));
        let sink = Arc::clone(&seen);
        fs.hooks_mut()
            .after_rename
            .listen(move |entity: &FileEntity| sink.lock().unwrap().push(format!("rename {}", entity.path())));

        let mut entity = fs.upload(text("a.txt", "a"), &UploadOptions::new()).unwrap();
        fs.rename(&mut entity, "b.txt", false).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["upload a.txt".to_string(), "rename b.txt".to_string()]
        );
    }

    #[test]
    fn test_hooks_bracket_storage_effects() {
        let (mut fs, adapter) = memory_fs();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut entity = fs.upload(text("a.txt", "a"), &UploadOptions::new()).unwrap();

        let (sink, store) = (Arc::clone(&log), Arc::clone(&adapter));
        fs.hooks_mut().before_rename.listen(move |event| {
            let moved = store.file_exists(&event.payload().new_path);
            sink.lock().unwrap().push(format!("before_rename moved={moved}"));
        });
        let (sink, store) = (Arc::clone(&log), Arc::clone(&adapter));
        fs.hooks_mut().after_rename.listen(move |entity: &FileEntity| {
            let moved = store.file_exists(entity.path()) && !store.file_exists("a.txt");
            sink.lock().unwrap().push(format!("after_rename moved={moved}"));
        });
        let (sink, store) = (Arc::clone(&log), Arc::clone(&adapter));
        fs.hooks_mut().before_copy.listen(move |event| {
            let copied = store.file_exists(&event.payload().destination);
            sink.lock().unwrap().push(format!("before_copy copied={copied}"));
        });
        let (sink, store) = (Arc::clone(&log), Arc::clone(&adapter));
        fs.hooks_mut().after_copy.listen(move |event: &CopiedFile| {
            let copied = store.file_exists(event.copy.path());
            sink.lock().unwrap().push(format!("after_copy copied={copied}"));
        });

        fs.rename(&mut entity, "b.txt", false).unwrap();
        fs.copy(&entity, "c.txt", false).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "before_rename moved=false".to_string(),
                "after_rename moved=true".to_string(),
                "before_copy copied=false".to_string(),
                "after_copy copied=true".to_string(),
            ]
        );
    }

    #[test]
    fn test_copy_returns_new_entity() {
        let (mut fs, _) = memory_fs();
        let entity = fs.upload(text("a.txt", "a"), &UploadOptions::new()).unwrap();
        let copied = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&copied);
        fs.hooks_mut()
            .after_copy
            .listen(move |event: &CopiedFile| *sink.lock().unwrap() = Some(event.clone()));

        let copy = fs.copy(&entity, "copies/a.txt", false).unwrap().unwrap();

        assert_eq!(entity.path(), "a.txt");
        assert_eq!(copy.path(), "copies/a.txt");
        assert_ne!(copy, entity);
        assert!(copy.same_content(&entity));
        assert!(fs.exists(&entity).unwrap());
        assert!(fs.exists(&copy).unwrap());

        let event = copied.lock().unwrap().take().unwrap();
        assert_eq!(event.copy, copy);
        assert_eq!(event.original, entity);
    }

    #[test]
    fn test_copy_collision() {
        let (mut fs, _) = memory_fs();
        let a = fs.upload(text("a.txt", "a"), &UploadOptions::new()).unwrap();
        fs.upload(text("b.txt", "b"), &UploadOptions::new()).unwrap();

        assert!(matches!(
            fs.copy(&a, "b.txt", false),
            Err(FilesystemError::DestinationExists(_))
        ));
        fs.copy(&a, "b.txt", true).unwrap();
    }

    #[test]
    fn test_copy_veto() {
        let (mut fs, adapter) = memory_fs();
        let entity = fs.upload(text("a.txt", "a"), &UploadOptions::new()).unwrap();
        let replacement = FileEntity::new(FileEntityData::new().path("X")).unwrap();
        let returned = replacement.clone();
        fs.hooks_mut()
            .before_copy
            .listen(move |event| event.stop_with(returned.clone()));

        assert_eq!(fs.copy(&entity, "b.txt", false).unwrap(), Some(replacement));
        assert!(!adapter.file_exists("b.txt"));

        fs.hooks_mut().before_copy.clear();
        fs.hooks_mut().before_copy.listen(|event| event.stop());
        assert_eq!(fs.copy(&entity, "b.txt", false).unwrap(), None);
        assert!(!adapter.file_exists("b.txt"));
        assert_eq!(adapter.len(), 1);
    }

    #[test]
    fn test_adapter_built_lazily_from_config() {
        let mut fs = Filesystem::new(FilesystemConfig::memory()).unwrap();
        let entity = fs.upload(text("a.txt", "a"), &UploadOptions::new()).unwrap();
        assert_eq!(fs.list_contents().unwrap().len(), 1);

        // reset drops the built adapter, and with it the in-memory files
        fs.reset();
        assert!(!fs.exists(&entity).unwrap());
    }

    #[test]
    fn test_unknown_adapter() {
        let config = FilesystemConfig {
            adapter: "UnexistingAdapter".to_string(),
            ..FilesystemConfig::memory()
        };
        let mut fs = Filesystem::new(config).unwrap();
        assert!(matches!(fs.adapter(), Err(FilesystemError::UnknownAdapter(_))));
    }

    #[test]
    fn test_new_entity_from_map_rejects_unknown_keys() {
        let (fs, _) = memory_fs();
        let mut map = Map::new();
        map.insert("path".to_string(), Value::from("a.txt"));
        map.insert("color".to_string(), Value::from("red"));
        assert!(matches!(
            fs.new_entity_from_map(map),
            Err(FilesystemError::SchemaViolation(_))
        ));
    }
}
