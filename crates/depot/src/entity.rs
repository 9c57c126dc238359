//! FileEntity: metadata of a stored file.
//!
//! The set of fields is closed. Loose maps are checked against
//! `ALLOWED_FIELDS` before conversion, and the serde form rejects unknown
//! keys, so a typo never produces a half-filled entity.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{FilesystemError, Result};
use crate::hash::ContentHash;

/// Every key a file entity accepts.
pub const ALLOWED_FIELDS: [&str; 7] = ["uuid", "path", "filename", "mime", "hash", "size", "created"];

/// A creation time as supplied by callers: parsed already, or text to parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    At(DateTime<Utc>),
    Text(String),
}

impl Timestamp {
    fn resolve(self) -> Result<DateTime<Utc>> {
        match self {
            Timestamp::At(at) => Ok(at),
            Timestamp::Text(text) => parse_timestamp(&text),
        }
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(at: DateTime<Utc>) -> Self {
        Timestamp::At(at)
    }
}

impl From<&str> for Timestamp {
    fn from(text: &str) -> Self {
        Timestamp::Text(text.to_string())
    }
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| FilesystemError::SchemaViolation(format!("invalid created value \"{text}\": {e}")))
}

/// Raw entity data; absent or null fields get defaults on construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileEntityData {
    pub uuid: Option<Uuid>,
    pub path: Option<String>,
    pub filename: Option<String>,
    pub mime: Option<String>,
    pub hash: Option<ContentHash>,
    pub size: Option<u64>,
    pub created: Option<Timestamp>,
}

impl FileEntityData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = Some(uuid);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    pub fn hash(mut self, hash: impl Into<ContentHash>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn created(mut self, created: impl Into<Timestamp>) -> Self {
        self.created = Some(created.into());
        self
    }
}

/// A stored file: identity, location and content metadata.
///
/// `==` compares every field; content identity for deduplication is the
/// hash, see [`FileEntity::same_content`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FileEntityData")]
pub struct FileEntity {
    uuid: Uuid,
    path: String,
    filename: String,
    mime: String,
    hash: ContentHash,
    size: u64,
    created: DateTime<Utc>,
}

impl FileEntity {
    /// Build an entity, generating `uuid` and `created` when absent.
    pub fn new(data: FileEntityData) -> Result<Self> {
        let created = match data.created {
            Some(created) => created.resolve()?,
            None => Utc::now(),
        };

        Ok(Self {
            uuid: data.uuid.unwrap_or_else(Uuid::new_v4),
            path: data.path.unwrap_or_default(),
            filename: data.filename.unwrap_or_default(),
            mime: data.mime.unwrap_or_default(),
            hash: data.hash.unwrap_or_default(),
            size: data.size.unwrap_or_default(),
            created,
        })
    }

    /// Build from a loose key/value map, rejecting keys outside `ALLOWED_FIELDS`.
    pub fn from_map(map: Map<String, Value>) -> Result<Self> {
        let unknown: Vec<&str> = map
            .keys()
            .map(String::as_str)
            .filter(|key| !ALLOWED_FIELDS.contains(key))
            .collect();
        if !unknown.is_empty() {
            return Err(FilesystemError::SchemaViolation(format!(
                "entity data contains keys that are not allowed ({})",
                unknown.join(",")
            )));
        }

        let data: FileEntityData = serde_json::from_value(Value::Object(map))
            .map_err(|e| FilesystemError::SchemaViolation(e.to_string()))?;
        Self::new(data)
    }

    /// Build from any JSON value; only objects are accepted.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Self::from_map(map),
            other => Err(FilesystemError::SchemaViolation(format!(
                "entity data must be an object, got {other}"
            ))),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Point the entity at a new location, e.g. after an external move.
    pub fn set_path(&mut self, path: impl Into<String>) -> &mut Self {
        self.path = path.into();
        self
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn hash(&self) -> &ContentHash {
        &self.hash
    }

    pub fn has_hash(&self, hash: &str) -> bool {
        self.hash.as_str() == hash
    }

    /// Whether both entities describe the same bytes.
    pub fn same_content(&self, other: &FileEntity) -> bool {
        self.hash == other.hash
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Every field, fully populated.
    pub fn to_data(&self) -> FileEntityData {
        FileEntityData {
            uuid: Some(self.uuid),
            path: Some(self.path.clone()),
            filename: Some(self.filename.clone()),
            mime: Some(self.mime.clone()),
            hash: Some(self.hash.clone()),
            size: Some(self.size),
            created: Some(Timestamp::At(self.created)),
        }
    }
}

impl TryFrom<FileEntityData> for FileEntity {
    type Error = FilesystemError;

    fn try_from(data: FileEntityData) -> Result<Self> {
        Self::new(data)
    }
}

impl fmt::Display for FileEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}
