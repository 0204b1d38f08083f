//! Core data models shared by the indexer, registry, search pipeline and agent.
//!
//! Raw payloads from the workspace store are parsed into these records at the
//! client boundary (see [`crate::notion`]); components never pass untyped maps
//! between each other except for record property bags, which are the store's
//! own opaque values.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

use crate::error::{FilterFailure, FilterGenerationError};

/// Whether a workspace item is a free-form page or a table of records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Page,
    Table,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Page => "page",
            ItemKind::Table => "table",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A page or table observed in the workspace. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceItem {
    pub id: String,
    pub kind: ItemKind,
    pub title: String,
}

/// Where a page lives. Pages under a table are that table's rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parent {
    Workspace,
    Page(String),
    Table(String),
    Block(String),
}

/// A page as returned by the store's search listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRef {
    pub id: String,
    pub title: String,
    pub parent: Parent,
}

impl PageRef {
    /// Row-level pages belong to a table and are indexed through it.
    pub fn is_table_row(&self) -> bool {
        matches!(self.parent, Parent::Table(_))
    }
}

/// One column definition of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    /// Store property type, e.g. `title`, `status`, `select`, `date`.
    pub kind: String,
}

/// A table as returned by the store's search listing.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    pub id: String,
    pub title: String,
    pub columns: Vec<ColumnDef>,
    /// The store's full property schema, captured verbatim.
    pub schema: Value,
}

impl TableDef {
    /// Canonical text of the schema: compact JSON with keys sorted at every
    /// level, so the same schema always renders to the same string.
    pub fn schema_text(&self) -> String {
        canonicalize(&self.schema).to_string()
    }

    /// Human-readable `Name: type, Name: type` summary of the columns.
    pub fn schema_summary(&self) -> String {
        self.columns
            .iter()
            .map(|c| format!("{}: {}", c.name, c.kind))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A content block of a page, reduced to its plain text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: String,
    #[serde(default)]
    pub has_children: bool,
}

/// One row of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    /// Plain text of the title-typed column, when present.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub title: Option<String>,
    /// Property values exactly as the store returned them.
    pub properties: Map<String, Value>,
}

/// Summarized metadata for one workspace item, produced once per indexing run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMetadataItem {
    pub id: String,
    pub kind: ItemKind,
    pub title: String,
    pub summary: String,
    /// Canonical schema text; tables only.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub schema: Option<String>,
}

/// A point-in-time, id-unique list of summarized workspace items.
///
/// Serializes as a plain JSON array. Deserialization rejects duplicate ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ToolMetadataItem>", into = "Vec<ToolMetadataItem>")]
pub struct Snapshot {
    items: Vec<ToolMetadataItem>,
}

impl Snapshot {
    /// Build a snapshot, keeping the first item for any repeated id.
    pub fn from_items(items: impl IntoIterator<Item = ToolMetadataItem>) -> Self {
        let mut seen = HashSet::new();
        let items = items
            .into_iter()
            .filter(|item| seen.insert(item.id.clone()))
            .collect();
        Self { items }
    }

    pub fn items(&self) -> &[ToolMetadataItem] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&ToolMetadataItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn count(&self, kind: ItemKind) -> usize {
        self.items.iter().filter(|item| item.kind == kind).count()
    }
}

impl TryFrom<Vec<ToolMetadataItem>> for Snapshot {
    type Error = String;

    fn try_from(items: Vec<ToolMetadataItem>) -> Result<Self, Self::Error> {
        let mut seen = HashSet::new();
        for item in &items {
            if !seen.insert(item.id.as_str()) {
                return Err(format!("duplicate snapshot id: {}", item.id));
            }
        }
        Ok(Self { items })
    }
}

impl From<Snapshot> for Vec<ToolMetadataItem> {
    fn from(snapshot: Snapshot) -> Self {
        snapshot.items
    }
}

/// Selector output before validation. Treated as an untrusted hint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSelection {
    #[serde(default)]
    pub page_ids: Vec<String>,
    #[serde(default)]
    pub table_ids: Vec<String>,
}

/// Items chosen as relevant to a query. Always a subset of the snapshot ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchSelection {
    page_ids: BTreeSet<String>,
    table_ids: BTreeSet<String>,
}

impl SearchSelection {
    /// Keep only ids present in `snapshot`, filed under their snapshot kind.
    ///
    /// Returns the validated selection and the ids that were dropped.
    pub fn validate(raw: RawSelection, snapshot: &Snapshot) -> (Self, Vec<String>) {
        let mut selection = Self::default();
        let mut unknown = Vec::new();

        for id in raw.page_ids.into_iter().chain(raw.table_ids) {
            match snapshot.get(&id) {
                Some(item) if item.kind == ItemKind::Page => {
                    selection.page_ids.insert(id);
                }
                Some(_) => {
                    selection.table_ids.insert(id);
                }
                None => unknown.push(id),
            }
        }

        (selection, unknown)
    }

    pub fn page_ids(&self) -> &BTreeSet<String> {
        &self.page_ids
    }

    pub fn table_ids(&self) -> &BTreeSet<String> {
        &self.table_ids
    }

    pub fn is_empty(&self) -> bool {
        self.page_ids.is_empty() && self.table_ids.is_empty()
    }
}

/// A structured query predicate scoped to exactly one table.
///
/// The predicate is always a non-empty JSON object: an empty object would
/// turn into an unfiltered query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterSpec {
    table_id: String,
    filter: Map<String, Value>,
}

impl FilterSpec {
    pub fn new(table_id: impl Into<String>, filter: Value) -> Result<Self, FilterGenerationError> {
        let table_id = table_id.into();
        let reject = |reason| FilterGenerationError {
            table_id: table_id.clone(),
            reason,
        };

        match filter {
            Value::Object(map) if map.is_empty() => Err(reject(FilterFailure::EmptyFilter)),
            Value::Object(map) => Ok(Self {
                table_id,
                filter: map,
            }),
            other => Err(reject(FilterFailure::NotObject(json_type_name(&other)))),
        }
    }

    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    pub fn filter(&self) -> &Map<String, Value> {
        &self.filter
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.filter.clone())
    }
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(values) => Value::Array(values.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
