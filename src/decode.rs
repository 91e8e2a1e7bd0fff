//! Entity decoding: raw record + inferred schema → typed entity.
//!
//! Decoding is lenient. Optional fields that are missing or of an
//! unexpected type simply come out as `None`; only a record that is not an
//! object, lacks an `id`, or lacks a role-defining field is a
//! [`LinearError::Decode`]. The caller counts and skips those.
//!
//! References are copied raw. Resolving them needs every store decoded
//! first, so that happens in [`IndexBuilder`](crate::index::IndexBuilder).

use chrono::{DateTime, NaiveDate};
use serde_json::{Map, Value};

use crate::error::{LinearError, LinearResult};
use crate::models::{Comment, Issue, Role, StateType, Team, User, WorkflowState};
use crate::schema::{FieldType, SchemaDescriptor};
use crate::source::RawRecord;

/// Numeric timestamps above this are milliseconds.
const MILLIS_THRESHOLD: f64 = 1e12;

#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Issue(Issue),
    User(User),
    Team(Team),
    State(WorkflowState),
    Comment(Comment),
}

pub fn decode_record(schema: &SchemaDescriptor, record: &RawRecord) -> LinearResult<Entity> {
    let map = match serde_json::from_slice::<Value>(&record.value) {
        Ok(Value::Object(map)) => map,
        Ok(_) => return Err(LinearError::Decode("record value is not an object".into())),
        Err(e) => return Err(LinearError::Decode(format!("invalid record value: {}", e))),
    };

    let id = str_field(&map, "id")
        .or_else(|| String::from_utf8(record.key.clone()).ok())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| LinearError::Decode("record has no id".into()))?;

    let fields = Fields { map: &map, schema };
    match schema.role {
        Role::Issue => Ok(Entity::Issue(fields.issue(id))),
        Role::User => Ok(Entity::User(fields.user(id))),
        Role::Team => fields.team(id).map(Entity::Team),
        Role::State => fields.state(id).map(Entity::State),
        Role::Comment => fields.comment(id).map(Entity::Comment),
        Role::Unknown => Err(LinearError::Decode(format!(
            "store '{}' has no known role",
            schema.store
        ))),
    }
}

struct Fields<'a> {
    map: &'a Map<String, Value>,
    schema: &'a SchemaDescriptor,
}

impl Fields<'_> {
    fn string(&self, name: &str) -> Option<String> {
        str_field(self.map, name)
    }

    fn int(&self, name: &str) -> Option<i64> {
        match self.map.get(name)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn timestamp(&self, name: &str) -> Option<i64> {
        parse_timestamp(self.map.get(name)?, self.schema.field_type(name))
    }

    fn string_list(&self, name: &str) -> Vec<String> {
        match self.map.get(name) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn issue(&self, id: String) -> Issue {
        Issue {
            id,
            // Empty until the index derives one from the team key.
            identifier: self.string("identifier").unwrap_or_default(),
            number: self.int("number"),
            title: self.string("title").unwrap_or_default(),
            description: self.string("description"),
            priority: self.int("priority"),
            team_id: self.string("teamId"),
            state_id: self.string("stateId"),
            assignee_id: self.string("assigneeId"),
            project_id: self.string("projectId"),
            label_ids: self.string_list("labelIds"),
            created_at: self.timestamp("createdAt"),
            updated_at: self.timestamp("updatedAt"),
        }
    }

    fn user(&self, id: String) -> User {
        let display_name = self.string("displayName");
        User {
            name: self
                .string("name")
                .or_else(|| display_name.clone())
                .unwrap_or_default(),
            display_name,
            email: self.string("email"),
            id,
        }
    }

    fn team(&self, id: String) -> LinearResult<Team> {
        let key = self
            .string("key")
            .ok_or_else(|| LinearError::Decode(format!("team {} has no key", id)))?;
        Ok(Team {
            name: self.string("name").unwrap_or_else(|| key.clone()),
            key,
            id,
        })
    }

    fn state(&self, id: String) -> LinearResult<WorkflowState> {
        let raw_type = self
            .string("type")
            .ok_or_else(|| LinearError::Decode(format!("state {} has no type", id)))?;
        let state_type = raw_type
            .parse::<StateType>()
            .map_err(|e| LinearError::Decode(format!("state {}: {}", id, e)))?;
        Ok(WorkflowState {
            name: self.string("name").unwrap_or_else(|| raw_type.clone()),
            state_type,
            color: self.string("color"),
            team_id: self.string("teamId"),
            id,
        })
    }

    fn comment(&self, id: String) -> LinearResult<Comment> {
        let issue_id = self
            .string("issueId")
            .ok_or_else(|| LinearError::Decode(format!("comment {} has no issueId", id)))?;
        Ok(Comment {
            issue_id,
            user_id: self.string("userId"),
            body: self
                .map
                .get("bodyData")
                .map(extract_prosemirror_text)
                .unwrap_or_default(),
            created_at: self.timestamp("createdAt"),
            id,
        })
    }
}

fn str_field(map: &Map<String, Value>, name: &str) -> Option<String> {
    match map.get(name)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Parse a timestamp value into unix seconds.
///
/// `hint` is the type the sniffer inferred for the column. Columns inferred
/// as structured values never hold timestamps.
pub fn parse_timestamp(value: &Value, hint: Option<FieldType>) -> Option<i64> {
    if matches!(
        hint,
        Some(FieldType::Bool | FieldType::Array | FieldType::Object)
    ) {
        return None;
    }
    match value {
        Value::Number(n) => n.as_f64().and_then(epoch_to_secs),
        Value::String(s) => parse_timestamp_str(s),
        _ => None,
    }
}

/// Parse RFC 3339 (`Z` or offset), a bare date, or a numeric epoch string.
pub fn parse_timestamp_str(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp());
    }
    s.parse::<f64>().ok().and_then(epoch_to_secs)
}

fn epoch_to_secs(raw: f64) -> Option<i64> {
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    if raw > MILLIS_THRESHOLD {
        Some((raw / 1000.0) as i64)
    } else {
        Some(raw as i64)
    }
}

/// Flatten a ProseMirror document (JSON value or JSON string) to plain text.
pub fn extract_prosemirror_text(body: &Value) -> String {
    match body {
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(parsed @ (Value::Object(_) | Value::Array(_))) => extract_node(&parsed),
            _ => s.clone(),
        },
        other => extract_node(other),
    }
}

fn extract_node(node: &Value) -> String {
    match node {
        Value::Object(obj) => match obj.get("type").and_then(|t| t.as_str()) {
            Some("text") => obj
                .get("text")
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string(),
            Some("suggestion_userMentions") => obj
                .get("attrs")
                .and_then(|a| a.get("label"))
                .and_then(|l| l.as_str())
                .filter(|l| !l.is_empty())
                .map(|l| format!("@{}", l))
                .unwrap_or_default(),
            Some("hardBreak") => "\n".to_string(),
            _ => obj.get("content").map(extract_node).unwrap_or_default(),
        },
        Value::Array(items) => items.iter().map(extract_node).collect(),
        _ => String::new(),
    }
}
