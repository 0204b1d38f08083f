//! Action registry: one callable action per snapshot item.
//!
//! Each [`ToolMetadataItem`] becomes an [`Action`] bound to that item's id:
//!
//! | Item kind | Action | Input | Effect |
//! |-----------|--------|-------|--------|
//! | table | `{title}_table_add` | `properties` or `raw_properties` | create one record |
//! | page | `{title}_page_add` | `text` | append one paragraph block |
//!
//! Names are sanitized to ASCII letters, digits, `_` and `-`, then cut to
//! 64 characters. When two items sanitize to the same name the one that
//! comes first in the snapshot keeps it and the later one is dropped.
//!
//! The registry is a pure function of the snapshot: building it twice from
//! the same snapshot gives the same actions in the same order.

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::chat::ToolSchema;
use crate::error::ActionError;
use crate::models::{ItemKind, Snapshot, ToolMetadataItem};
use crate::workspace::WorkspaceStore;

/// Longest function name the chat service accepts.
pub const MAX_ACTION_NAME_LEN: usize = 64;

/// Property types accepted in structured record input.
pub const PROPERTY_TYPES: &[&str] = &[
    "title",
    "rich_text",
    "number",
    "select",
    "multi_select",
    "status",
    "date",
    "people",
    "files",
    "checkbox",
    "url",
    "email",
    "phone_number",
    "relation",
];

// ═══════════════════════════════════════════════════════════════════════
// Actions
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub name: String,
    pub bound_id: String,
    pub kind: ItemKind,
    pub description: String,
}

/// One typed property value for a new record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TypedProperty {
    #[serde(rename = "type")]
    pub kind: String,
    /// The store's payload for this property, e.g. `{"title": [...]}`.
    pub value: Map<String, Value>,
}

/// Property input for a table action, resolved before dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordInput {
    Structured(IndexMap<String, TypedProperty>),
    /// Sent to the store unchanged.
    Raw(Map<String, Value>),
}

impl RecordInput {
    /// The property map sent to the store.
    pub fn into_properties(self) -> Map<String, Value> {
        match self {
            RecordInput::Structured(props) => props
                .into_iter()
                .map(|(name, prop)| (name, Value::Object(prop.value)))
                .collect(),
            RecordInput::Raw(props) => props,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionInput {
    Record(RecordInput),
    Text(String),
}

impl Action {
    fn from_item(item: &ToolMetadataItem) -> Self {
        Self {
            name: action_name(&item.title, item.kind),
            bound_id: item.id.clone(),
            kind: item.kind,
            description: describe(item),
        }
    }

    /// JSON Schema of the arguments object.
    pub fn parameters_schema(&self) -> Value {
        match self.kind {
            ItemKind::Table => json!({
                "type": "object",
                "properties": {
                    "properties": {
                        "type": "object",
                        "description": "Values for the new entry keyed by column name. Each value is \
                            {\"type\": <property type>, \"value\": <property payload>}, for example \
                            {\"Name\": {\"type\": \"title\", \"value\": {\"title\": [{\"text\": {\"content\": \"Buy milk\"}}]}}}.",
                        "additionalProperties": {
                            "type": "object",
                            "properties": {
                                "type": { "type": "string", "enum": PROPERTY_TYPES },
                                "value": { "type": "object" }
                            },
                            "required": ["type", "value"]
                        }
                    },
                    "raw_properties": {
                        "type": "object",
                        "description": "A complete property payload sent to the workspace unchanged. \
                            Use only when `properties` cannot express the entry."
                    }
                }
            }),
            ItemKind::Page => json!({
                "type": "object",
                "properties": {
                    "text": {
                        "type": "string",
                        "description": "Text appended to the page as a new paragraph."
                    }
                },
                "required": ["text"]
            }),
        }
    }

    pub fn tool_schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters_schema(),
        }
    }

    /// Validate raw tool-call arguments into a typed input.
    pub fn parse_input(&self, arguments: &Value) -> Result<ActionInput, ActionError> {
        let args = arguments.as_object().ok_or_else(|| {
            ActionError::InvalidInput("arguments must be a JSON object".to_string())
        })?;
        let present = |key: &str| args.get(key).filter(|v| !v.is_null());

        match self.kind {
            ItemKind::Page => match present("text").and_then(Value::as_str) {
                Some(text) if !text.trim().is_empty() => Ok(ActionInput::Text(text.to_string())),
                _ => Err(ActionError::InvalidInput(
                    "`text` must be a non-empty string".to_string(),
                )),
            },
            ItemKind::Table => match (present("properties"), present("raw_properties")) {
                (Some(structured), None) => parse_structured(structured),
                (None, Some(Value::Object(raw))) => {
                    Ok(ActionInput::Record(RecordInput::Raw(raw.clone())))
                }
                (None, Some(_)) => Err(ActionError::InvalidInput(
                    "`raw_properties` must be an object".to_string(),
                )),
                (Some(_), Some(_)) => Err(ActionError::InvalidInput(
                    "give either `properties` or `raw_properties`, not both".to_string(),
                )),
                (None, None) => Err(ActionError::InvalidInput(
                    "one of `properties` or `raw_properties` is required".to_string(),
                )),
            },
        }
    }

    /// Run the action against its bound item. Returns the tool-result text.
    pub async fn execute(
        &self,
        arguments: &Value,
        store: &dyn WorkspaceStore,
    ) -> Result<String, ActionError> {
        match self.parse_input(arguments)? {
            ActionInput::Record(input) => {
                let record_id = store
                    .create_record(&self.bound_id, &input.into_properties())
                    .await?;
                Ok(format!("Entry created ({})", record_id))
            }
            ActionInput::Text(text) => {
                store.append_block(&self.bound_id, &text).await?;
                Ok("Text added to page".to_string())
            }
        }
    }
}

fn parse_structured(value: &Value) -> Result<ActionInput, ActionError> {
    let props: IndexMap<String, TypedProperty> = serde_json::from_value(value.clone())
        .map_err(|e| ActionError::InvalidInput(format!("invalid `properties`: {}", e)))?;

    if props.is_empty() {
        return Err(ActionError::InvalidInput("`properties` is empty".to_string()));
    }
    if let Some((name, prop)) = props
        .iter()
        .find(|(_, prop)| !PROPERTY_TYPES.contains(&prop.kind.as_str()))
    {
        return Err(ActionError::InvalidInput(format!(
            "property '{}' has unknown type '{}'",
            name, prop.kind
        )));
    }

    Ok(ActionInput::Record(RecordInput::Structured(props)))
}

/// `sanitize(title + "_" + kind + "_add")`, cut to [`MAX_ACTION_NAME_LEN`].
pub fn action_name(title: &str, kind: ItemKind) -> String {
    let mut name = sanitize(&format!("{}_{}_add", title, kind));
    name.truncate(MAX_ACTION_NAME_LEN);
    name
}

/// Keep ASCII letters, digits, `_` and `-`; drop everything else.
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Title, then summary, then (tables only) the schema, blank-line separated.
fn describe(item: &ToolMetadataItem) -> String {
    let mut description = format!("{}\n\n{}", item.title, item.summary);
    if item.kind == ItemKind::Table {
        if let Some(schema) = &item.schema {
            description.push_str("\n\n");
            description.push_str(schema);
        }
    }
    description
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    actions: IndexMap<String, Action>,
}

impl ActionRegistry {
    /// Derive the action set from a snapshot.
    pub fn build(snapshot: &Snapshot) -> Self {
        let mut actions: IndexMap<String, Action> = IndexMap::new();
        for item in snapshot.items() {
            let action = Action::from_item(item);
            if let Some(existing) = actions.get(&action.name) {
                tracing::warn!(
                    name = %action.name,
                    kept = %existing.bound_id,
                    dropped = %action.bound_id,
                    "action name collision, dropping later item"
                );
                continue;
            }
            actions.insert(action.name.clone(), action);
        }
        Self { actions }
    }

    pub fn get(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.actions.values()
    }

    pub fn tool_schemas(&self) -> Vec<ToolSchema> {
        self.actions.values().map(Action::tool_schema).collect()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
