//! Tool registry: the request/response surface shared by the HTTP API, the
//! MCP bridge and the CLI.
//!
//! Every query operation is a [`Tool`] with a JSON Schema for its
//! parameters. Callers go through [`ToolRegistry::call`], which validates
//! the parameters against that schema before dispatch.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              ToolRegistry                │
//! │  list_issues  search_issues  get_issue   │
//! │  get_issue_comments  get_my_issues       │
//! │  list_users  get_user  list_teams        │
//! │  list_states  get_summary                │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!   ToolContext → CacheManager → QueryEngine
//! ```
//!
//! Tools fail with [`anyhow::Error`]s that wrap a [`LinearError`], so the
//! transports can recover the error kind with `downcast_ref`.

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::cache::CacheManager;
use crate::config::Config;
use crate::error::{LinearError, LinearResult};
use crate::index::Index;
use crate::query::{IssueFilter, Limits, PageRequest, QueryEngine};

/// A named, schema-described query operation.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Route and registry name, e.g. `"list_issues"`.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema (`type: "object"`) for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute with parameters already checked by [`validate_params`].
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Tool metadata as listed by `GET /tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// What a tool can reach while executing: the cache and the page limits.
#[derive(Clone)]
pub struct ToolContext {
    cache: Arc<CacheManager>,
    limits: Limits,
}

impl ToolContext {
    pub fn new(cache: Arc<CacheManager>, limits: Limits) -> Self {
        Self { cache, limits }
    }

    pub fn from_config(config: &Config, cache: Arc<CacheManager>) -> Self {
        Self::new(cache, Limits::from(&config.query))
    }

    /// The current Index, rebuilt first if it has gone stale.
    pub async fn index(&self) -> LinearResult<Arc<Index>> {
        self.cache.snapshot().await
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }
}

fn parse<T: DeserializeOwned>(params: &Value) -> Result<T> {
    serde_json::from_value(params.clone())
        .map_err(|e| LinearError::InvalidArgument(e.to_string()).into())
}

fn page_props() -> Value {
    json!({
        "limit": { "type": "integer", "description": "Maximum results per page (default 50, max 100)" },
        "cursor": { "type": "string", "description": "nextCursor from a previous page" }
    })
}

/// Merge `extra` properties with the pagination properties into one schema.
fn paged_schema(extra: Value, required: &[&str]) -> Value {
    let mut properties = page_props();
    if let (Some(props), Value::Object(extra)) = (properties.as_object_mut(), extra) {
        props.extend(extra);
    }
    json!({ "type": "object", "properties": properties, "required": required })
}

fn state_type_prop() -> Value {
    json!({
        "type": "string",
        "enum": ["triage", "backlog", "unstarted", "started", "completed", "canceled"],
        "description": "Workflow state category"
    })
}

fn updated_after_prop() -> Value {
    json!({
        "type": "string",
        "description": "Only issues updated at or after this ISO-8601 instant, e.g. 2024-01-01T00:00:00Z"
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Built-in tools
// ═══════════════════════════════════════════════════════════════════════

pub struct ListIssuesTool;

#[async_trait]
impl Tool for ListIssuesTool {
    fn name(&self) -> &str {
        "list_issues"
    }

    fn description(&self) -> &str {
        "List issues, most recently updated first, with optional filters"
    }


    fn parameters_schema(&self) -> Value {
        paged_schema(
            json!({
                "assignee": { "type": "string", "description": "Assignee user id or name" },
                "team": { "type": "string", "description": "Team id, key or name" },
                "state_type": state_type_prop(),
                "priority": { "type": "integer", "enum": [0, 1, 2, 3, 4],
                              "description": "0=None, 1=Urgent, 2=High, 3=Normal, 4=Low" },
                "updated_after": updated_after_prop()
            }),
            &[],
        )
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let filter: IssueFilter = parse(&params)?;
        let page: PageRequest = parse(&params)?;
        let index = ctx.index().await?;
        let result = QueryEngine::new(&index, ctx.limits()).list_issues(&filter, &page)?;
        Ok(serde_json::to_value(result)?)
    }
}

#[derive(Deserialize)]
struct IdentifierParams {
    identifier: String,
}

pub struct GetIssueTool;

#[async_trait]
impl Tool for GetIssueTool {
    fn name(&self) -> &str {
        "get_issue"
    }

    fn description(&self) -> &str {
        "Get one issue by its identifier (e.g. ENG-123)"
    }


    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "identifier": { "type": "string", "description": "Issue identifier, case-insensitive" }
            },
            "required": ["identifier"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let p: IdentifierParams = parse(&params)?;
        let index = ctx.index().await?;
        let issue = QueryEngine::new(&index, ctx.limits()).get_issue(&p.identifier)?;
        Ok(serde_json::to_value(issue)?)
    }
}

pub struct GetIssueCommentsTool;

#[async_trait]
impl Tool for GetIssueCommentsTool {
    fn name(&self) -> &str {
        "get_issue_comments"
    }

    fn description(&self) -> &str {
        "Get the comments on an issue, oldest first"
    }


    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "identifier": { "type": "string", "description": "Issue identifier, case-insensitive" }
            },
            "required": ["identifier"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let p: IdentifierParams = parse(&params)?;
        let index = ctx.index().await?;
        let comments = QueryEngine::new(&index, ctx.limits()).get_issue_comments(&p.identifier)?;
        Ok(serde_json::to_value(comments)?)
    }
}

#[derive(Deserialize)]
struct SearchParams {
    query: String,
}

pub struct SearchIssuesTool;

#[async_trait]
impl Tool for SearchIssuesTool {
    fn name(&self) -> &str {
        "search_issues"
    }

    fn description(&self) -> &str {
        "Search issue titles (case-insensitive substring or all words)"
    }


    fn parameters_schema(&self) -> Value {
        paged_schema(
            json!({ "query": { "type": "string", "description": "Search text" } }),
            &["query"],
        )
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let p: SearchParams = parse(&params)?;
        let page: PageRequest = parse(&params)?;
        let index = ctx.index().await?;
        let result = QueryEngine::new(&index, ctx.limits()).search_issues(&p.query, &page)?;
        Ok(serde_json::to_value(result)?)
    }
}

pub struct ListUsersTool;

#[async_trait]
impl Tool for ListUsersTool {
    fn name(&self) -> &str {
        "list_users"
    }

    fn description(&self) -> &str {
        "List users by number of assigned issues"
    }


    fn parameters_schema(&self) -> Value {
        paged_schema(json!({}), &[])
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let page: PageRequest = parse(&params)?;
        let index = ctx.index().await?;
        let result = QueryEngine::new(&index, ctx.limits()).list_users(&page)?;
        Ok(serde_json::to_value(result)?)
    }
}

#[derive(Deserialize)]
struct NameParams {
    name: String,
}

pub struct GetUserTool;

#[async_trait]
impl Tool for GetUserTool {
    fn name(&self) -> &str {
        "get_user"
    }

    fn description(&self) -> &str {
        "Find a user by id, name or display name"
    }


    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "User id, or part of a name" }
            },
            "required": ["name"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let p: NameParams = parse(&params)?;
        let index = ctx.index().await?;
        let user = QueryEngine::new(&index, ctx.limits()).get_user(&p.name)?;
        Ok(serde_json::to_value(user)?)
    }
}

pub struct ListTeamsTool;

#[async_trait]
impl Tool for ListTeamsTool {
    fn name(&self) -> &str {
        "list_teams"
    }

    fn description(&self) -> &str {
        "List teams with their issue counts"
    }


    fn parameters_schema(&self) -> Value {
        paged_schema(json!({}), &[])
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let page: PageRequest = parse(&params)?;
        let index = ctx.index().await?;
        let result = QueryEngine::new(&index, ctx.limits()).list_teams(&page)?;
        Ok(serde_json::to_value(result)?)
    }
}

#[derive(Deserialize)]
struct StatesParams {
    team: Option<String>,
}

pub struct ListStatesTool;

#[async_trait]
impl Tool for ListStatesTool {
    fn name(&self) -> &str {
        "list_states"
    }

    fn description(&self) -> &str {
        "List workflow states in board order"
    }


    fn parameters_schema(&self) -> Value {
        paged_schema(
            json!({ "team": { "type": "string", "description": "Team id, key or name" } }),
            &[],
        )
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let p: StatesParams = parse(&params)?;
        let page: PageRequest = parse(&params)?;
        let index = ctx.index().await?;
        let result = QueryEngine::new(&index, ctx.limits()).list_states(p.team.as_deref(), &page)?;
        Ok(serde_json::to_value(result)?)
    }
}

#[derive(Deserialize)]
struct MyIssuesParams {
    name: String,
    state_type: Option<String>,
    updated_after: Option<String>,
}

pub struct GetMyIssuesTool;

#[async_trait]
impl Tool for GetMyIssuesTool {
    fn name(&self) -> &str {
        "get_my_issues"
    }

    fn description(&self) -> &str {
        "Issues assigned to a user, with counts by state type"
    }


    fn parameters_schema(&self) -> Value {
        paged_schema(
            json!({
                "name": { "type": "string", "description": "User id, or part of a name" },
                "state_type": state_type_prop(),
                "updated_after": updated_after_prop()
            }),
            &["name"],
        )
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let p: MyIssuesParams = parse(&params)?;
        let page: PageRequest = parse(&params)?;
        let index = ctx.index().await?;
        let result = QueryEngine::new(&index, ctx.limits()).get_my_issues(
            &p.name,
            p.state_type.as_deref(),
            p.updated_after.as_deref(),
            &page,
        )?;
        Ok(serde_json::to_value(result)?)
    }
}

pub struct GetSummaryTool;

#[async_trait]
impl Tool for GetSummaryTool {
    fn name(&self) -> &str {
        "get_summary"
    }

    fn description(&self) -> &str {
        "Counts of teams, users, states, issues and comments in the local cache"
    }


    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let index = ctx.index().await?;
        let summary = QueryEngine::new(&index, ctx.limits()).get_summary();
        Ok(serde_json::to_value(summary)?)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// A registry holding every built-in query tool.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ListIssuesTool));
        registry.register(Box::new(GetIssueTool));
        registry.register(Box::new(SearchIssuesTool));
        registry.register(Box::new(ListUsersTool));
        registry.register(Box::new(GetUserTool));
        registry.register(Box::new(ListTeamsTool));
        registry.register(Box::new(ListStatesTool));
        registry.register(Box::new(GetMyIssuesTool));
        registry.register(Box::new(GetIssueCommentsTool));
        registry.register(Box::new(GetSummaryTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn infos(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// Look up, validate and execute a tool.
    pub async fn call(&self, name: &str, params: Value, ctx: &ToolContext) -> Result<Value> {
        let tool = self
            .find(name)
            .ok_or_else(|| LinearError::not_found("tool", name))?;
        let params = validate_params(&tool.parameters_schema(), &params)
            .map_err(|e| LinearError::InvalidArgument(e.to_string()))?;
        tool.execute(params, ctx).await
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Check `params` against a tool schema: required fields present, and
/// every supplied field of its declared type and within its `enum`.
///
/// Returns the parameters with `null` fields removed, so a `null` counts as
/// absent.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let mut given = match params {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        other => anyhow::bail!("parameters must be a JSON object, got {}", json_type_name(other)),
    };
    given.retain(|_, v| !v.is_null());

    let mut required = schema
        .get("required")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str);
    if let Some(missing) = required.find(|field| !given.contains_key(*field)) {
        anyhow::bail!("missing required parameter: {}", missing);
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    for (name, value) in &given {
        if let Some(prop) = properties.and_then(|p| p.get(name)) {
            check_type(name, prop, value)?;
            check_enum(name, prop, value)?;
        }
    }
    Ok(Value::Object(given))
}

fn check_type(name: &str, prop: &Value, value: &Value) -> Result<()> {
    let Some(expected) = prop.get("type").and_then(Value::as_str) else {
        return Ok(());
    };
    let matches = match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    };
    if !matches {
        anyhow::bail!(
            "parameter '{}' must be of type '{}', got {}",
            name,
            expected,
            json_type_name(value)
        );
    }
    Ok(())
}

fn check_enum(name: &str, prop: &Value, value: &Value) -> Result<()> {
    match prop.get("enum").and_then(Value::as_array) {
        Some(allowed) if !allowed.contains(value) => {
            let names: Vec<String> = allowed.iter().map(Value::to_string).collect();
            anyhow::bail!(
                "parameter '{}' must be one of [{}], got {}",
                name,
                names.join(", "),
                value
            )
        }
        _ => Ok(()),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
