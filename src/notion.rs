//! Workspace store client for the Notion REST API.
//!
//! Implements [`WorkspaceStore`] over `reqwest`. Raw payloads are parsed
//! into [`crate::models`] records here; nothing above this module sees the
//! store's nested JSON except record property bags.
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | `search` | `POST /v1/search` with an object-type filter |
//! | `list_children` | `GET /v1/blocks/{id}/children` |
//! | `query` | `POST /v1/databases/{id}/query` |
//! | `create_record` | `POST /v1/pages` with a `database_id` parent |
//! | `append_block` | `PATCH /v1/blocks/{id}/children` with one paragraph |
//!
//! Listings and queries are retried through [`retry::read`]; creates and
//! appends go through [`retry::write`] and are attempted once.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;

use crate::config::WorkspaceConfig;
use crate::error::ExternalApiError;
use crate::models::{Block, ColumnDef, ItemKind, PageRef, Parent, Record, TableDef};
use crate::retry::{self, RetryPolicy};
use crate::workspace::{Paginated, QueryRequest, SearchHit, WorkspaceStore};

const SERVICE: &str = "workspace";

pub struct NotionClient {
    http: reqwest::Client,
    base_url: String,
    api_version: String,
    token: String,
    policy: RetryPolicy,
    page_size: usize,
}

impl NotionClient {
    pub fn new(config: &WorkspaceConfig, token: String) -> Result<Self> {
        // The per-call deadline lives in RetryPolicy; this only bounds a hung socket.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.saturating_mul(2)))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            token,
            policy: config.retry_policy(),
            page_size: config.page_size,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .bearer_auth(&self.token)
            .header("Notion-Version", &self.api_version)
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, ExternalApiError> {
        send(self.request(reqwest::Method::POST, path).json(body)).await
    }
}

/// Send a request and decode the JSON body, classifying failures.
async fn send(request: reqwest::RequestBuilder) -> Result<Value, ExternalApiError> {
    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();

    if status.as_u16() == 429 {
        return Err(ExternalApiError::RateLimited { service: SERVICE });
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ExternalApiError::Status {
            service: SERVICE,
            status: status.as_u16(),
            body,
        });
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| ExternalApiError::malformed(SERVICE, e.to_string()))
}

fn transport_error(e: reqwest::Error) -> ExternalApiError {
    if e.is_timeout() {
        ExternalApiError::Timeout { service: SERVICE }
    } else {
        ExternalApiError::Transport {
            service: SERVICE,
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl WorkspaceStore for NotionClient {
    async fn search(
        &self,
        kind: ItemKind,
        cursor: Option<&str>,
    ) -> Result<Paginated<SearchHit>, ExternalApiError> {
        let object = match kind {
            ItemKind::Page => "page",
            ItemKind::Table => "database",
        };
        let mut body = json!({
            "filter": { "property": "object", "value": object },
            "page_size": self.page_size,
        });
        if let Some(cursor) = cursor {
            body["start_cursor"] = json!(cursor);
        }

        let value = retry::read(&self.policy, SERVICE, || self.post_json("/v1/search", &body)).await?;
        parse_paginated(&value, parse_search_hit)
    }

    async fn list_children(
        &self,
        block_id: &str,
        cursor: Option<&str>,
        page_size: Option<usize>,
    ) -> Result<Paginated<Block>, ExternalApiError> {
        let path = format!("/v1/blocks/{}/children", block_id);
        let mut params = vec![(
            "page_size",
            page_size.unwrap_or(self.page_size).min(100).to_string(),
        )];
        if let Some(cursor) = cursor {
            params.push(("start_cursor", cursor.to_string()));
        }

        let value = retry::read(&self.policy, SERVICE, || {
            send(self.request(reqwest::Method::GET, &path).query(&params))
        })
        .await?;
        parse_paginated(&value, parse_block)
    }

    async fn query(
        &self,
        table_id: &str,
        request: &QueryRequest,
    ) -> Result<Paginated<Record>, ExternalApiError> {
        let path = format!("/v1/databases/{}/query", table_id);
        let mut body = Map::new();
        if let Some(filter) = &request.filter {
            body.insert("filter".into(), filter.clone());
        }
        if let Some(cursor) = &request.cursor {
            body.insert("start_cursor".into(), json!(cursor));
        }
        body.insert(
            "page_size".into(),
            json!(request.page_size.unwrap_or(self.page_size).min(100)),
        );
        let body = Value::Object(body);

        let value = retry::read(&self.policy, SERVICE, || self.post_json(&path, &body)).await?;
        parse_paginated(&value, parse_record)
    }

    async fn create_record(
        &self,
        table_id: &str,
        properties: &Map<String, Value>,
    ) -> Result<String, ExternalApiError> {
        let body = json!({
            "parent": { "database_id": table_id },
            "properties": properties,
        });

        let value = retry::write(&self.policy, SERVICE, self.post_json("/v1/pages", &body)).await?;
        value
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ExternalApiError::malformed(SERVICE, "created page has no id"))
    }

    async fn append_block(&self, page_id: &str, text: &str) -> Result<(), ExternalApiError> {
        let path = format!("/v1/blocks/{}/children", page_id);
        let body = json!({
            "children": [{
                "object": "block",
                "type": "paragraph",
                "paragraph": {
                    "rich_text": [{ "type": "text", "text": { "content": text } }]
                }
            }]
        });

        retry::write(
            &self.policy,
            SERVICE,
            send(self.request(reqwest::Method::PATCH, &path).json(&body)),
        )
        .await?;
        Ok(())
    }
}

// ============ Payload parsing ============

fn parse_paginated<T>(
    value: &Value,
    parse: fn(&Value) -> Result<T, ExternalApiError>,
) -> Result<Paginated<T>, ExternalApiError> {
    let results = value
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| ExternalApiError::malformed(SERVICE, "missing results array"))?
        .iter()
        .map(parse)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Paginated {
        results,
        has_more: value.get("has_more").and_then(Value::as_bool).unwrap_or(false),
        next_cursor: value
            .get("next_cursor")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn required_id(value: &Value) -> Result<String, ExternalApiError> {
    value
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ExternalApiError::malformed(SERVICE, "object without id"))
}

/// Concatenate the `plain_text` of a rich-text array.
pub(crate) fn plain_text(rich_text: Option<&Value>) -> String {
    rich_text
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("plain_text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default()
}

/// Plain text of the title-typed property of a page or record.
fn title_property(properties: &Map<String, Value>) -> Option<String> {
    properties
        .values()
        .find(|prop| prop.get("type").and_then(Value::as_str) == Some("title"))
        .map(|prop| plain_text(prop.get("title")))
}

fn parse_parent(value: Option<&Value>) -> Parent {
    let Some(parent) = value else {
        return Parent::Workspace;
    };
    let id_of = |key: &str| {
        parent
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    match parent.get("type").and_then(Value::as_str) {
        Some("database_id") => Parent::Table(id_of("database_id")),
        Some("page_id") => Parent::Page(id_of("page_id")),
        Some("block_id") => Parent::Block(id_of("block_id")),
        _ => Parent::Workspace,
    }
}

fn parse_search_hit(value: &Value) -> Result<SearchHit, ExternalApiError> {
    let id = required_id(value)?;
    let empty = Map::new();
    let properties = value
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    match value.get("object").and_then(Value::as_str) {
        Some("database") => {
            let columns = properties
                .iter()
                .map(|(name, prop)| ColumnDef {
                    name: name.clone(),
                    kind: prop
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string(),
                })
                .collect();
            Ok(SearchHit::Table(TableDef {
                id,
                title: untitled(plain_text(value.get("title"))),
                columns,
                schema: Value::Object(properties.clone()),
            }))
        }
        Some("page") => Ok(SearchHit::Page(PageRef {
            id,
            title: untitled(title_property(properties).unwrap_or_default()),
            parent: parse_parent(value.get("parent")),
        })),
        other => Err(ExternalApiError::malformed(
            SERVICE,
            format!("unexpected search object type: {}", other.unwrap_or("none")),
        )),
    }
}

fn untitled(title: String) -> String {
    if title.trim().is_empty() {
        "Untitled".to_string()
    } else {
        title
    }
}

fn parse_block(value: &Value) -> Result<Block, ExternalApiError> {
    let id = required_id(value)?;
    let block_type = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("unsupported")
        .to_string();
    let text = plain_text(value.get(&block_type).and_then(|body| body.get("rich_text")));

    Ok(Block {
        id,
        block_type,
        text,
        has_children: value.get("has_children").and_then(Value::as_bool).unwrap_or(false),
    })
}

fn parse_record(value: &Value) -> Result<Record, ExternalApiError> {
    let id = required_id(value)?;
    let properties = value
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    Ok(Record {
        id,
        title: title_property(&properties),
        properties,
    })
}
