//! Prompt templates, rendered with `tera`.
//!
//! Every variable part of a prompt (titles, summaries, the filter guide,
//! user queries) is passed in through the template [`Context`], never
//! spliced into template source, so `{{`, `{%` or `{#` sequences in
//! workspace content or in the guide document come out verbatim instead of
//! being read as template directives.

use serde::Serialize;
use tera::{Context, Tera};

use crate::models::{ItemKind, ToolMetadataItem};

pub const TABLE_SUMMARY_SYSTEM: &str = "Summarize the provided workspace table for use as a tool \
description. Say what the table tracks and mention its columns with their property types. \
Answer with the summary only.";

pub const PAGE_SUMMARY_SYSTEM: &str = "Provide a short summary of the following page content for \
use as a tool description. Answer with the summary only.";

const TABLE_CONTENT: &str = "\
Table name: {{ title }}
Schema: {{ schema }}
Example entries: {{ examples | join(sep=\"; \") }}";

const PAGE_CONTENT: &str = "\
Page title: {{ title }}
Content: {{ texts | join(sep=\" \") }}";

const SELECTOR_SYSTEM: &str = "\
You route a search query to the workspace items that can answer it.
Reply with a JSON object {\"pageIds\": [...], \"tableIds\": [...]} using only ids from the listing below.
Use empty arrays when nothing is relevant.

Items:
{% for item in items %}- id: {{ item.id }} | kind: {{ item.kind }} | title: {{ item.title }}
  summary: {{ item.summary }}
{% endfor %}";

const FILTER_SYSTEM: &str = "\
{{ guide }}

Table schema:
{{ schema }}
{% if instructions %}
Additional instructions for this table:
{{ instructions }}
{% endif %}
Reply with a single JSON object of the form {\"filter\": <filter object>}.";

const AGENT_SYSTEM: &str = "\
You turn short spoken or typed notes into entries in the user's workspace using the available tools.
The current date and time is {{ now }} ({{ timezone }}).

When the note describes a task, create one entry in the task table with these properties:
- Name: the main objective, short and imperative.
- Priority: infer it from urgency words. Order from most to least urgent: {{ priority_order | join(sep=\", \") }}. Default: {{ default_priority }}.
- Due date: resolve relative references such as \"tomorrow\" or \"next Friday\" against the current date. Omit it when no date is mentioned.
- Tags: infer them from the subject, or leave them empty.
- Status: {{ default_status }} unless the note says otherwise.
- Size: omit it unless the note mentions effort.

When the note is free text for a page, append it to that page.
Do not ask follow-up questions unless the note is completely unclear. When you are done, reply with a one-line confirmation of what you created.";

#[derive(Serialize)]
struct ListingEntry<'a> {
    id: &'a str,
    kind: ItemKind,
    title: &'a str,
    summary: &'a str,
}

pub fn table_content(title: &str, schema: &str, examples: &[String]) -> tera::Result<String> {
    let mut ctx = Context::new();
    ctx.insert("title", title);
    ctx.insert("schema", schema);
    ctx.insert("examples", examples);
    Tera::one_off(TABLE_CONTENT, &ctx, false)
}

pub fn page_content(title: &str, texts: &[String]) -> tera::Result<String> {
    let mut ctx = Context::new();
    ctx.insert("title", title);
    ctx.insert("texts", texts);
    Tera::one_off(PAGE_CONTENT, &ctx, false)
}

/// The selector's listing of every item. Schemas are left out.
pub fn selector_system(items: &[ToolMetadataItem]) -> tera::Result<String> {
    let entries: Vec<ListingEntry<'_>> = items
        .iter()
        .map(|item| ListingEntry {
            id: &item.id,
            kind: item.kind,
            title: &item.title,
            summary: &item.summary,
        })
        .collect();

    let mut ctx = Context::new();
    ctx.insert("items", &entries);
    Tera::one_off(SELECTOR_SYSTEM, &ctx, false)
}

pub fn filter_system(guide: &str, schema: &str, instructions: Option<&str>) -> tera::Result<String> {
    let mut ctx = Context::new();
    ctx.insert("guide", guide);
    ctx.insert("schema", schema);
    ctx.insert("instructions", &instructions);
    Tera::one_off(FILTER_SYSTEM, &ctx, false)
}

pub struct AgentPromptVars<'a> {
    pub now: &'a str,
    pub timezone: &'a str,
    pub default_status: &'a str,
    pub default_priority: &'a str,
    pub priority_order: &'a [String],
}

pub fn agent_system(vars: &AgentPromptVars<'_>) -> tera::Result<String> {
    let mut ctx = Context::new();
    ctx.insert("now", vars.now);
    ctx.insert("timezone", vars.timezone);
    ctx.insert("default_status", vars.default_status);
    ctx.insert("default_priority", vars.default_priority);
    ctx.insert("priority_order", vars.priority_order);
    Tera::one_off(AGENT_SYSTEM, &ctx, false)
}
