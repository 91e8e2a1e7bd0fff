//! Core entity types materialized from the Linear snapshot.
//!
//! Entities carry only raw references (`team_id`, `assignee_id`, ...). The
//! [`index`](crate::index) layer resolves those against the other
//! collections and clears any reference that points nowhere.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Semantic category of a store, inferred by the schema sniffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Issue,
    User,
    Team,
    State,
    Comment,
    Unknown,
}

impl Role {
    /// Tie-break order when two roles score equally for one store.
    pub const PRIORITY: [Role; 5] = [
        Role::Issue,
        Role::State,
        Role::Team,
        Role::User,
        Role::Comment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Issue => "issue",
            Role::User => "user",
            Role::Team => "team",
            Role::State => "state",
            Role::Comment => "comment",
            Role::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workflow state category. Closed set, in board order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateType {
    Triage,
    Backlog,
    Unstarted,
    Started,
    Completed,
    Canceled,
}

impl StateType {
    pub const ALL: [StateType; 6] = [
        StateType::Triage,
        StateType::Backlog,
        StateType::Unstarted,
        StateType::Started,
        StateType::Completed,
        StateType::Canceled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateType::Triage => "triage",
            StateType::Backlog => "backlog",
            StateType::Unstarted => "unstarted",
            StateType::Started => "started",
            StateType::Completed => "completed",
            StateType::Canceled => "canceled",
        }
    }

    /// Position in board order, used as a sort rank.
    pub fn ordinal(&self) -> i64 {
        StateType::ALL
            .iter()
            .position(|t| t == self)
            .unwrap_or(StateType::ALL.len()) as i64
    }
}

impl FromStr for StateType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        StateType::ALL
            .iter()
            .find(|t| t.as_str() == lower)
            .copied()
            .ok_or_else(|| {
                format!(
                    "unknown state type '{}'; expected one of triage, backlog, unstarted, started, completed, canceled",
                    s
                )
            })
    }
}

impl fmt::Display for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Linear issue. Timestamps are unix seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: String,
    /// Human-facing identifier, e.g. `ENG-1234`.
    pub identifier: String,
    pub number: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<i64>,
    pub team_id: Option<String>,
    pub state_id: Option<String>,
    pub assignee_id: Option<String>,
    pub project_id: Option<String>,
    pub label_ids: Vec<String>,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: String,
    /// Short upper-case prefix used in issue identifiers.
    pub key: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub id: String,
    pub name: String,
    pub state_type: StateType,
    pub color: Option<String>,
    pub team_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub issue_id: String,
    pub user_id: Option<String>,
    pub body: String,
    pub created_at: Option<i64>,
}

/// Render a unix timestamp as ISO-8601 UTC.
pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_type_parse() {
        assert_eq!("Started".parse::<StateType>(), Ok(StateType::Started));
        assert_eq!(" canceled ".parse::<StateType>(), Ok(StateType::Canceled));
        assert!("done".parse::<StateType>().is_err());
    }

    #[test]
    fn test_state_type_ordinal_follows_board_order() {
        assert!(StateType::Backlog.ordinal() < StateType::Started.ordinal());
        assert!(StateType::Completed.ordinal() < StateType::Canceled.ordinal());
        assert_eq!(StateType::Triage.ordinal(), 0);
    }

    #[test]
    fn test_format_ts_iso() {
        assert_eq!(format_ts_iso(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_ts_iso(1_700_000_000), "2023-11-14T22:13:20Z");
    }
}
