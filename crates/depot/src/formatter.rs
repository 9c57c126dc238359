//! Path formatters: strategies that decide where an upload is stored.
//!
//! A formatter is configured with the original filename, optional context
//! data and per-call options, then asked for the destination path. Formatters
//! are looked up by name in a `FormatterRegistry`; short names such as
//! `"Entity"` resolve to `depot::formatter::EntityFormatter`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FilesystemError, Result};

/// Namespace that short formatter names are resolved against.
pub const FORMATTER_NAMESPACE: &str = module_path!();

pub const DEFAULT_FORMATTER: &str = concat!(module_path!(), "::DefaultFormatter");
pub const ENTITY_FORMATTER: &str = concat!(module_path!(), "::EntityFormatter");

pub const DEFAULT_PATTERN: &str = "{entity-source}/{file-name}.{file-ext}";

/// A configured path strategy.
pub trait PathFormatter: Send {
    /// The destination path for the configured file.
    fn path(&self) -> Result<String>;

    /// The sanitized basename of the configured file.
    fn base_name(&self) -> String;
}

/// Per-call formatter options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatterOptions {
    /// Folder prepended by the default formatter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,

    /// Template used by the entity formatter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Static `{token}` values for the entity formatter.
    pub replacements: BTreeMap<String, String>,
}

impl FormatterOptions {
    pub fn folder(folder: impl Into<String>) -> Self {
        Self {
            folder: Some(folder.into()),
            ..Default::default()
        }
    }

    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self {
            pattern: Some(pattern.into()),
            ..Default::default()
        }
    }

    pub fn with_replacement(mut self, token: impl Into<String>, value: impl Into<String>) -> Self {
        self.replacements.insert(token.into(), value.into());
        self
    }
}

/// A record that can drive the entity formatter: a category name plus a flat
/// set of fields.
pub trait EntityContext: Send + Sync {
    /// Category the record belongs to, e.g. a table name.
    fn source(&self) -> &str;

    fn fields(&self) -> Map<String, Value>;
}

/// A plain `EntityContext` built from a source name and fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub source: String,
    pub fields: Map<String, Value>,
}

impl EntityRecord {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            fields: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

impl EntityContext for EntityRecord {
    fn source(&self) -> &str {
        &self.source
    }

    fn fields(&self) -> Map<String, Value> {
        self.fields.clone()
    }
}

/// Context data handed to a formatter.
#[derive(Clone)]
pub enum FormatData {
    Entity(Arc<dyn EntityContext>),
    /// Loose JSON; usable as entity context when it is an object with a
    /// string `source` key.
    Json(Value),
}

impl FormatData {
    pub fn entity(context: impl EntityContext + 'static) -> Self {
        FormatData::Entity(Arc::new(context))
    }

    fn as_entity(&self) -> Result<(String, Map<String, Value>)> {
        match self {
            FormatData::Entity(context) => Ok((context.source().to_string(), context.fields())),
            FormatData::Json(Value::Object(map)) => match map.get("source") {
                Some(Value::String(source)) => Ok((source.clone(), map.clone())),
                _ => Err(FilesystemError::InvalidContext(
                    "formatter data has no string \"source\" key".to_string(),
                )),
            },
            FormatData::Json(other) => Err(FilesystemError::InvalidContext(format!(
                "formatter data is not entity compatible ({} given)",
                json_kind(other)
            ))),
        }
    }
}

impl fmt::Debug for FormatData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatData::Entity(context) => f
                .debug_struct("Entity")
                .field("source", &context.source())
                .finish_non_exhaustive(),
            FormatData::Json(value) => f.debug_tuple("Json").field(value).finish(),
        }
    }
}

impl From<EntityRecord> for FormatData {
    fn from(record: EntityRecord) -> Self {
        FormatData::entity(record)
    }
}

impl From<Value> for FormatData {
    fn from(value: Value) -> Self {
        FormatData::Json(value)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Replace every run of characters outside `[A-Za-z0-9._-]` with one `_`.
pub fn safe(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut in_run = false;
    for c in value.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    out
}

/// Substitute `{token}` placeholders from `tokens`.
///
/// Placeholders without a value are left verbatim.
pub fn insert_tokens(template: &str, tokens: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };

        let key = &after[..close];
        if key.contains('{') {
            // Not a placeholder; keep the brace and rescan from the inner one.
            out.push('{');
            rest = after;
            continue;
        }

        match tokens.get(key) {
            Some(value) => out.push_str(value),
            None => {
                out.push('{');
                out.push_str(key);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out
}

/// A filename split into basename, stem and extension.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PathInfo {
    basename: String,
    stem: String,
    extension: String,
}

impl PathInfo {
    fn parse(filename: &str) -> Self {
        let basename = filename
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();

        let (stem, extension) = match basename.rfind('.') {
            Some(dot) => (basename[..dot].to_string(), basename[dot + 1..].to_string()),
            None => (basename.clone(), String::new()),
        };

        Self {
            basename,
            stem,
            extension,
        }
    }
}

/// Stores files under their sanitized basename, optionally inside a folder.
#[derive(Debug, Clone)]
pub struct DefaultFormatter {
    info: PathInfo,
    folder: Option<String>,
}

impl DefaultFormatter {
    pub fn new(filename: &str, options: &FormatterOptions) -> Self {
        Self {
            info: PathInfo::parse(filename),
            folder: options.folder.clone().filter(|folder| !folder.is_empty()),
        }
    }

    pub fn file_name(&self) -> String {
        safe(&self.info.stem)
    }

    pub fn extension(&self) -> &str {
        &self.info.extension
    }
}

impl PathFormatter for DefaultFormatter {
    fn path(&self) -> Result<String> {
        Ok(match &self.folder {
            Some(folder) => format!("{}/{}", folder.trim_end_matches('/'), self.base_name()),
            None => self.base_name(),
        })
    }

    fn base_name(&self) -> String {
        safe(&self.info.basename)
    }
}

/// Builds paths from a `{token}` template filled by an entity's fields.
#[derive(Debug, Clone)]
pub struct EntityFormatter {
    inner: DefaultFormatter,
    data: Option<FormatData>,
    pattern: String,
    replacements: BTreeMap<String, String>,
    today: NaiveDate,
}

impl EntityFormatter {
    pub fn new(filename: &str, data: Option<FormatData>, options: &FormatterOptions) -> Self {
        Self {
            inner: DefaultFormatter::new(filename, options),
            data,
            pattern: options
                .pattern
                .clone()
                .unwrap_or_else(|| DEFAULT_PATTERN.to_string()),
            replacements: options.replacements.clone(),
            today: chrono::Local::now().date_naive(),
        }
    }

    /// Pin the date used for the `date-*` tokens.
    pub fn with_date(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// The full substitution map, later layers overriding earlier ones.
    pub fn tokens(&self) -> Result<HashMap<String, String>> {
        let data = self.data.as_ref().ok_or_else(|| {
            FilesystemError::InvalidContext(
                "formatter data is not entity compatible (none given)".to_string(),
            )
        })?;
        let (source, fields) = data.as_entity()?;

        let mut tokens: HashMap<String, String> = fields
            .into_iter()
            .filter_map(|(key, value)| {
                let value = match value {
                    Value::String(s) => safe(&s),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => return None,
                };
                Some((key, value))
            })
            .collect();

        tokens.extend(self.replacements.clone());

        tokens.extend([
            ("entity-source".to_string(), safe(&source.to_lowercase())),
            ("file-name".to_string(), self.inner.file_name()),
            ("file-basename".to_string(), self.inner.base_name()),
            ("file-ext".to_string(), self.inner.extension().to_string()),
            ("date-y".to_string(), format!("{:04}", self.today.year())),
            ("date-m".to_string(), format!("{:02}", self.today.month())),
            ("date-d".to_string(), format!("{:02}", self.today.day())),
        ]);

        Ok(tokens)
    }
}

impl PathFormatter for EntityFormatter {
    fn path(&self) -> Result<String> {
        Ok(insert_tokens(&self.pattern, &self.tokens()?))
    }

    fn base_name(&self) -> String {
        self.inner.base_name()
    }
}

/// Builds a configured formatter from filename, context data and options.
pub type FormatterFactory =
    Arc<dyn Fn(&str, Option<FormatData>, &FormatterOptions) -> Result<Box<dyn PathFormatter>> + Send + Sync>;

/// Name → factory map used to resolve formatters.
#[derive(Clone)]
pub struct FormatterRegistry {
    factories: HashMap<String, FormatterFactory>,
}

impl FormatterRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, factory: FormatterFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Resolve a short or qualified name to its registered key.
    pub fn resolve(&self, name: &str) -> Result<String> {
        if self.factories.contains_key(name) {
            return Ok(name.to_string());
        }

        let qualified = format!("{FORMATTER_NAMESPACE}::{name}Formatter");
        if self.factories.contains_key(&qualified) {
            return Ok(qualified);
        }

        Err(FilesystemError::UnknownFormatter(name.to_string()))
    }

    pub fn build(
        &self,
        name: &str,
        filename: &str,
        data: Option<FormatData>,
        options: &FormatterOptions,
    ) -> Result<Box<dyn PathFormatter>> {
        let key = self.resolve(name)?;
        let factory = self
            .factories
            .get(&key)
            .ok_or_else(|| FilesystemError::UnknownFormatter(name.to_string()))?;
        factory(filename, data, options)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for FormatterRegistry {
    /// The built-in default and entity formatters.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(
            DEFAULT_FORMATTER,
            Arc::new(|filename: &str, _data: Option<FormatData>, options: &FormatterOptions| {
                Ok(Box::new(DefaultFormatter::new(filename, options)) as Box<dyn PathFormatter>)
            }),
        );
        registry.register(
            ENTITY_FORMATTER,
            Arc::new(|filename: &str, data: Option<FormatData>, options: &FormatterOptions| {
                Ok(Box::new(EntityFormatter::new(filename, data, options)) as Box<dyn PathFormatter>)
            }),
        );
        registry
    }
}

impl fmt::Debug for FormatterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatterRegistry")
            .field("formatters", &self.names())
            .finish()
    }
}
