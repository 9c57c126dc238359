//! FileEntityCollection: an ordered set of file entities with hash lookup.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity::{FileEntity, FileEntityData};
use crate::error::Result;
use crate::filesystem::{Filesystem, FormatConfig};
use crate::hash::ContentHash;
use crate::source::UploadSource;

/// Ordered entities, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileEntityCollection {
    entities: Vec<FileEntity>,
}

/// Anything a collection can be built from.
#[derive(Debug)]
pub enum EntityItem {
    Entity(FileEntity),
    /// Raw entity data, built through `Filesystem::new_entity`.
    Data(FileEntityData),
    /// A loose map, validated against the entity schema.
    Map(Map<String, Value>),
    /// A file still to be uploaded.
    Upload(UploadSource),
}

impl From<FileEntity> for EntityItem {
    fn from(entity: FileEntity) -> Self {
        EntityItem::Entity(entity)
    }
}

impl From<FileEntityData> for EntityItem {
    fn from(data: FileEntityData) -> Self {
        EntityItem::Data(data)
    }
}

impl From<Map<String, Value>> for EntityItem {
    fn from(map: Map<String, Value>) -> Self {
        EntityItem::Map(map)
    }
}

impl From<UploadSource> for EntityItem {
    fn from(source: UploadSource) -> Self {
        EntityItem::Upload(source)
    }
}

/// How a merge treats removals and raw uploads.
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    /// Hashes dropped from the result, whichever side they came from.
    pub remove_hashes: HashSet<ContentHash>,
    /// Also delete the stored files of removed entities.
    pub delete_removed: bool,
    /// Formatter settings for incoming uploads.
    pub format: FormatConfig,
}

impl MergeOptions {
    pub fn remove(mut self, hash: impl Into<ContentHash>) -> Self {
        self.remove_hashes.insert(hash.into());
        self
    }

    pub fn delete_removed(mut self, delete: bool) -> Self {
        self.delete_removed = delete;
        self
    }

    pub fn format(mut self, format: FormatConfig) -> Self {
        self.format = format;
        self
    }
}

impl FileEntityCollection {
    pub fn new(entities: Vec<FileEntity>) -> Self {
        Self { entities }
    }

    /// Build from mixed items: entities are taken as-is, data goes through
    /// `new_entity` and upload sources are uploaded.
    pub fn from_items(
        items: impl IntoIterator<Item = EntityItem>,
        filesystem: &mut Filesystem,
        format: &FormatConfig,
    ) -> Result<Self> {
        let entities = items
            .into_iter()
            .map(|item| filesystem.resolve_item(item, format))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entities })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileEntity> {
        self.entities.iter()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn first(&self) -> Option<&FileEntity> {
        self.entities.first()
    }

    pub fn last(&self) -> Option<&FileEntity> {
        self.entities.last()
    }

    pub fn get(&self, index: usize) -> Option<&FileEntity> {
        self.entities.get(index)
    }

    pub fn push(&mut self, entity: FileEntity) {
        self.entities.push(entity);
    }

    /// Content hash of every entity, in order.
    pub fn hashes(&self) -> Vec<&ContentHash> {
        self.entities.iter().map(FileEntity::hash).collect()
    }

    pub fn find_by_hash(&self, hash: &str) -> Option<&FileEntity> {
        self.entities.iter().find(|entity| entity.has_hash(hash))
    }

    pub fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(&self.entities)
    }

    pub fn into_vec(self) -> Vec<FileEntity> {
        self.entities
    }

    /// Reconcile with `incoming` by content hash.
    ///
    /// Incoming entities replace existing ones with the same hash, keeping the
    /// existing position; new hashes are appended. Entities whose hash is in
    /// `remove` are dropped from the result and returned separately. The
    /// result holds at most one entity per hash.
    pub fn merge_by_hash(
        self,
        incoming: impl IntoIterator<Item = FileEntity>,
        remove: &HashSet<ContentHash>,
    ) -> (Self, Vec<FileEntity>) {
        let mut slots: Vec<FileEntity> = Vec::with_capacity(self.entities.len());
        let mut index: HashMap<ContentHash, usize> = HashMap::new();

        for entity in self.entities.into_iter().chain(incoming) {
            match index.get(entity.hash()) {
                Some(&slot) => slots[slot] = entity,
                None => {
                    index.insert(entity.hash().clone(), slots.len());
                    slots.push(entity);
                }
            }
        }

        let (removed, kept): (Vec<_>, Vec<_>) = slots
            .into_iter()
            .partition(|entity| remove.contains(entity.hash()));

        (Self { entities: kept }, removed)
    }
}

impl fmt::Display for FileEntityCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = self.to_json().map_err(|_| fmt::Error)?;
        write!(f, "{json}")
    }
}

impl IntoIterator for FileEntityCollection {
    type Item = FileEntity;
    type IntoIter = std::vec::IntoIter<FileEntity>;

    fn into_iter(self) -> Self::IntoIter {
        self.entities.into_iter()
    }
}

impl<'a> IntoIterator for &'a FileEntityCollection {
    type Item = &'a FileEntity;
    type IntoIter = std::slice::Iter<'a, FileEntity>;

    fn into_iter(self) -> Self::IntoIter {
        self.entities.iter()
    }
}

impl FromIterator<FileEntity> for FileEntityCollection {
    fn from_iter<I: IntoIterator<Item = FileEntity>>(iter: I) -> Self {
        Self {
            entities: iter.into_iter().collect(),
        }
    }
}

impl From<Vec<FileEntity>> for FileEntityCollection {
    fn from(entities: Vec<FileEntity>) -> Self {
        Self::new(entities)
    }
}
