//! The in-memory Index: one immutable materialization of a snapshot.
//!
//! # Build pipeline
//!
//! ```text
//! list_stores ─▶ sniff_store ─▶ decode_record ─▶ IndexBuilder::add
//!                                                      │
//!                                  IndexBuilder::finish (resolve refs,
//!                                  derive identifiers, sort, index)
//!                                                      ▼
//!                                                   Index
//! ```
//!
//! Entities are collected first and cross-referenced second, so stores can
//! be read in any order. Every collection is stored pre-sorted in its
//! pagination order and every secondary index is a list of ascending
//! positions into that collection, which keeps posting lists sorted for
//! free.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Instant;

use serde::Serialize;

use crate::cursor::SortKey;
use crate::decode::{decode_record, Entity};
use crate::error::{LinearError, LinearResult};
use crate::models::{Comment, Issue, Role, StateType, Team, User, WorkflowState};
use crate::schema::{sniff_store, SchemaDescriptor, SnifferOptions};
use crate::source::{is_ignored_store, RecordSource, SnapshotHandle};

/// Per-store outcome of one rebuild.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreReport {
    pub store: String,
    pub role: Role,
    pub confidence: f64,
    pub records: usize,
    pub decoded: usize,
    pub skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadReport {
    pub stores: Vec<StoreReport>,
    /// References cleared because their target does not exist.
    pub unresolved_refs: usize,
    /// Issues dropped because their identifier repeats an earlier one.
    pub duplicate_issues: usize,
    /// Issues without a team key or number, identified as `???-<number>`
    /// or by their raw id.
    pub fallback_identifiers: usize,
    /// Comments dropped because their issue is not in the Index.
    pub orphan_comments: usize,
    pub build_ms: u64,
    /// Unix seconds.
    pub loaded_at: i64,
}

impl LoadReport {
    pub fn role_of(&self, store: &str) -> Option<Role> {
        self.stores.iter().find(|s| s.store == store).map(|s| s.role)
    }
}

/// Team key used in derived identifiers when the issue's team is unknown.
pub const UNKNOWN_TEAM_KEY: &str = "???";

pub fn issue_sort_key(issue: &Issue) -> SortKey {
    SortKey::new(issue.updated_at, issue.identifier.clone())
}

fn team_sort_key(team: &Team) -> SortKey {
    SortKey::new(None, format!("{}/{}", team.key, team.id))
}

fn state_sort_key(state: &WorkflowState) -> SortKey {
    SortKey::new(
        Some(-state.state_type.ordinal()),
        format!("{}/{}", state.name.to_lowercase(), state.id),
    )
}

#[derive(Debug, Default)]
pub struct Index {
    issues: Vec<Issue>,
    issue_keys: Vec<SortKey>,
    users: Vec<User>,
    user_keys: Vec<SortKey>,
    teams: Vec<Team>,
    team_keys: Vec<SortKey>,
    states: Vec<WorkflowState>,
    state_keys: Vec<SortKey>,
    comments: Vec<Comment>,

    issue_by_identifier: HashMap<String, usize>,
    issue_by_id: HashMap<String, usize>,
    user_by_id: HashMap<String, usize>,
    team_by_id: HashMap<String, usize>,
    state_by_id: HashMap<String, usize>,

    by_assignee: HashMap<String, Vec<usize>>,
    by_team: HashMap<String, Vec<usize>>,
    by_state_type: HashMap<StateType, Vec<usize>>,
    comments_by_issue: HashMap<String, Vec<usize>>,

    report: LoadReport,
}

impl Index {
    /// Issues in update-timestamp-descending order, identifier tie-break.
    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn issue_keys(&self) -> &[SortKey] {
        &self.issue_keys
    }

    /// Users ordered by assigned issue count, descending.
    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn user_keys(&self) -> &[SortKey] {
        &self.user_keys
    }

    /// Teams ordered by key.
    pub fn teams(&self) -> &[Team] {
        &self.teams
    }

    pub fn team_keys(&self) -> &[SortKey] {
        &self.team_keys
    }

    /// States in board order (triage → canceled), then by name.
    pub fn states(&self) -> &[WorkflowState] {
        &self.states
    }

    pub fn state_keys(&self) -> &[SortKey] {
        &self.state_keys
    }

    pub fn comment_count(&self) -> usize {
        self.comments.len()
    }

    /// Case-insensitive identifier lookup.
    pub fn issue_by_identifier(&self, identifier: &str) -> Option<&Issue> {
        self.issue_by_identifier
            .get(&identifier.trim().to_uppercase())
            .map(|&i| &self.issues[i])
    }

    pub fn issue_by_id(&self, id: &str) -> Option<&Issue> {
        self.issue_by_id.get(id).map(|&i| &self.issues[i])
    }

    pub fn user(&self, id: &str) -> Option<&User> {
        self.user_by_id.get(id).map(|&i| &self.users[i])
    }

    pub fn team(&self, id: &str) -> Option<&Team> {
        self.team_by_id.get(id).map(|&i| &self.teams[i])
    }

    pub fn state(&self, id: &str) -> Option<&WorkflowState> {
        self.state_by_id.get(id).map(|&i| &self.states[i])
    }

    pub fn state_of(&self, issue: &Issue) -> Option<&WorkflowState> {
        issue.state_id.as_deref().and_then(|id| self.state(id))
    }

    /// Positions into [`issues`](Self::issues), ascending.
    pub fn issues_by_assignee(&self, user_id: &str) -> &[usize] {
        self.by_assignee.get(user_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn issues_by_team(&self, team_id: &str) -> &[usize] {
        self.by_team.get(team_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn issues_by_state_type(&self, state_type: StateType) -> &[usize] {
        self.by_state_type
            .get(&state_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn user_issue_count(&self, user_id: &str) -> usize {
        self.issues_by_assignee(user_id).len()
    }

    pub fn team_issue_count(&self, team_id: &str) -> usize {
        self.issues_by_team(team_id).len()
    }

    /// Comments on an issue, oldest first.
    pub fn comments_for(&self, issue_id: &str) -> Vec<&Comment> {
        self.comments_by_issue
            .get(issue_id)
            .map(|positions| positions.iter().map(|&i| &self.comments[i]).collect())
            .unwrap_or_default()
    }

    pub fn report(&self) -> &LoadReport {
        &self.report
    }
}

/// Collects decoded entities, then resolves and indexes them in
/// [`finish`](IndexBuilder::finish).
#[derive(Debug, Default)]
pub struct IndexBuilder {
    issues: Vec<Issue>,
    users: Vec<User>,
    teams: Vec<Team>,
    states: Vec<WorkflowState>,
    comments: Vec<Comment>,
    seen: HashSet<(Role, String)>,
    report: LoadReport,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one decoded entity. Returns `false` if an entity of the same
    /// role and id was already added (first one wins).
    pub fn add(&mut self, entity: Entity) -> bool {
        let (role, id) = match &entity {
            Entity::Issue(e) => (Role::Issue, e.id.clone()),
            Entity::User(e) => (Role::User, e.id.clone()),
            Entity::Team(e) => (Role::Team, e.id.clone()),
            Entity::State(e) => (Role::State, e.id.clone()),
            Entity::Comment(e) => (Role::Comment, e.id.clone()),
        };
        if !self.seen.insert((role, id)) {
            return false;
        }
        match entity {
            Entity::Issue(e) => self.issues.push(e),
            Entity::User(e) => self.users.push(e),
            Entity::Team(e) => self.teams.push(e),
            Entity::State(e) => self.states.push(e),
            Entity::Comment(e) => self.comments.push(e),
        }
        true
    }

    pub fn record_store(&mut self, store: StoreReport) {
        self.report.stores.push(store);
    }

    pub fn finish(self) -> Index {
        let IndexBuilder {
            issues,
            users,
            mut teams,
            mut states,
            comments,
            mut report,
            ..
        } = self;

        let user_ids: HashSet<String> = users.iter().map(|u| u.id.clone()).collect();
        let team_keys_by_id: HashMap<&str, &str> =
            teams.iter().map(|t| (t.id.as_str(), t.key.as_str())).collect();
        let state_ids: HashSet<&str> = states.iter().map(|s| s.id.as_str()).collect();

        // Pass two: resolve references and settle identifiers.
        let mut resolved: Vec<Issue> = Vec::with_capacity(issues.len());
        let mut identifiers: HashSet<String> = HashSet::with_capacity(issues.len());
        let mut unresolved = 0usize;
        for mut issue in issues {
            unresolved += clear_dangling(&mut issue.assignee_id, |id| user_ids.contains(id));
            unresolved += clear_dangling(&mut issue.team_id, |id| team_keys_by_id.contains_key(id));
            unresolved += clear_dangling(&mut issue.state_id, |id| state_ids.contains(id));

            if issue.identifier.is_empty() {
                let team_key = issue
                    .team_id
                    .as_deref()
                    .and_then(|id| team_keys_by_id.get(id));
                issue.identifier = match (team_key, issue.number) {
                    (Some(key), Some(number)) => format!("{}-{}", key, number),
                    (None, Some(number)) => {
                        report.fallback_identifiers += 1;
                        format!("{}-{}", UNKNOWN_TEAM_KEY, number)
                    }
                    (_, None) => {
                        report.fallback_identifiers += 1;
                        issue.id.clone()
                    }
                };
            }

            if !identifiers.insert(issue.identifier.to_uppercase()) {
                tracing::debug!(identifier = %issue.identifier, "dropping duplicate issue identifier");
                report.duplicate_issues += 1;
                continue;
            }
            resolved.push(issue);
        }

        for state in &mut states {
            unresolved += clear_dangling(&mut state.team_id, |id| team_keys_by_id.contains_key(id));
        }
        report.unresolved_refs = unresolved;

        let mut issues = resolved;
        issues.sort_by_cached_key(issue_sort_key);
        let issue_keys: Vec<SortKey> = issues.iter().map(issue_sort_key).collect();

        let mut issue_by_identifier = HashMap::with_capacity(issues.len());
        let mut issue_by_id = HashMap::with_capacity(issues.len());
        let mut by_assignee: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_team: HashMap<String, Vec<usize>> = HashMap::new();
        let state_type_by_id: HashMap<&str, StateType> = states
            .iter()
            .map(|s| (s.id.as_str(), s.state_type))
            .collect();
        let mut by_state_type: HashMap<StateType, Vec<usize>> = HashMap::new();

        for (pos, issue) in issues.iter().enumerate() {
            issue_by_identifier.insert(issue.identifier.to_uppercase(), pos);
            issue_by_id.insert(issue.id.clone(), pos);
            if let Some(user) = &issue.assignee_id {
                by_assignee.entry(user.clone()).or_default().push(pos);
            }
            if let Some(team) = &issue.team_id {
                by_team.entry(team.clone()).or_default().push(pos);
            }
            if let Some(ty) = issue
                .state_id
                .as_deref()
                .and_then(|id| state_type_by_id.get(id))
            {
                by_state_type.entry(*ty).or_default().push(pos);
            }
        }

        let user_count = |u: &User| by_assignee.get(&u.id).map(Vec::len).unwrap_or(0) as i64;
        let mut users = users;
        users.sort_by_cached_key(|u| SortKey::new(Some(user_count(u)), u.id.clone()));
        let user_keys: Vec<SortKey> = users
            .iter()
            .map(|u| SortKey::new(Some(user_count(u)), u.id.clone()))
            .collect();

        teams.sort_by_cached_key(team_sort_key);
        let team_keys: Vec<SortKey> = teams.iter().map(team_sort_key).collect();
        states.sort_by_cached_key(state_sort_key);
        let state_keys: Vec<SortKey> = states.iter().map(state_sort_key).collect();

        let mut kept_comments = Vec::with_capacity(comments.len());
        for mut comment in comments {
            if !issue_by_id.contains_key(&comment.issue_id) {
                report.orphan_comments += 1;
                continue;
            }
            unresolved += clear_dangling(&mut comment.user_id, |id| user_ids.contains(id));
            kept_comments.push(comment);
        }
        report.unresolved_refs = unresolved;
        kept_comments.sort_by(|a, b| {
            a.created_at
                .unwrap_or(i64::MAX)
                .cmp(&b.created_at.unwrap_or(i64::MAX))
                .then_with(|| a.id.cmp(&b.id))
        });
        let mut comments_by_issue: HashMap<String, Vec<usize>> = HashMap::new();
        for (pos, comment) in kept_comments.iter().enumerate() {
            comments_by_issue
                .entry(comment.issue_id.clone())
                .or_default()
                .push(pos);
        }

        let user_by_id = position_map(&users, |u| &u.id);
        let team_by_id = position_map(&teams, |t| &t.id);
        let state_by_id = position_map(&states, |s| &s.id);

        Index {
            issues,
            issue_keys,
            users,
            user_keys,
            teams,
            team_keys,
            states,
            state_keys,
            comments: kept_comments,
            issue_by_identifier,
            issue_by_id,
            user_by_id,
            team_by_id,
            state_by_id,
            by_assignee,
            by_team,
            by_state_type,
            comments_by_issue,
            report,
        }
    }
}

/// Clear `reference` if it points at nothing. Returns 1 if it was cleared.
fn clear_dangling(reference: &mut Option<String>, exists: impl Fn(&str) -> bool) -> usize {
    match reference.as_deref() {
        Some(id) if !exists(id) => {
            *reference = None;
            1
        }
        _ => 0,
    }
}

fn position_map<T>(items: &[T], id: impl Fn(&T) -> &String) -> HashMap<String, usize> {
    items
        .iter()
        .enumerate()
        .map(|(pos, item)| (id(item).clone(), pos))
        .collect()
}

/// Run the full pipeline against the snapshot at `path`.
///
/// A snapshot that cannot be opened or listed fails the build, and so does
/// one with no stores or with no store that classifies. A single store that
/// cannot be classified or read is reported and left out.
pub fn load_index(
    source: &dyn RecordSource,
    path: &Path,
    opts: &SnifferOptions,
) -> LinearResult<Index> {
    let started = Instant::now();
    let handle = source.open(path)?;
    let stores: Vec<String> = handle
        .list_stores()?
        .into_iter()
        .filter(|s| !is_ignored_store(s))
        .collect();
    if stores.is_empty() {
        return Err(LinearError::SourceUnavailable(format!(
            "no stores found in {}",
            path.display()
        )));
    }

    let mut builder = IndexBuilder::new();
    for store in &stores {
        let report = match sniff_store(handle.as_ref(), store, opts) {
            Ok(schema) if schema.role == Role::Unknown => {
                tracing::debug!(store = %store, confidence = schema.confidence, "store not classified");
                unclassified(store, schema.total_records, None)
            }
            Ok(schema) => {
                tracing::info!(
                    store = %store,
                    role = %schema.role,
                    confidence = schema.confidence,
                    "classified store"
                );
                decode_store(handle.as_ref(), &schema, &mut builder)
            }
            Err(e) => {
                let failure = LinearError::SchemaInferenceFailed {
                    store: store.clone(),
                    reason: e.to_string(),
                };
                tracing::debug!("{}", failure);
                unclassified(store, 0, Some(failure.to_string()))
            }
        };
        builder.record_store(report);
    }
    if builder.report.stores.iter().all(|s| s.role == Role::Unknown) {
        return Err(LinearError::SourceUnavailable(format!(
            "none of the {} stores in {} could be classified",
            stores.len(),
            path.display()
        )));
    }

    let mut index = builder.finish();
    index.report.build_ms = started.elapsed().as_millis() as u64;
    index.report.loaded_at = chrono::Utc::now().timestamp();

    tracing::info!(
        issues = index.issues.len(),
        users = index.users.len(),
        teams = index.teams.len(),
        states = index.states.len(),
        comments = index.comments.len(),
        build_ms = index.report.build_ms,
        "index built"
    );
    Ok(index)
}

fn unclassified(store: &str, records: usize, error: Option<String>) -> StoreReport {
    StoreReport {
        store: store.to_string(),
        role: Role::Unknown,
        confidence: 0.0,
        records,
        decoded: 0,
        skipped: 0,
        error,
    }
}

fn decode_store(
    handle: &dyn SnapshotHandle,
    schema: &SchemaDescriptor,
    builder: &mut IndexBuilder,
) -> StoreReport {
    let mut report = StoreReport {
        store: schema.store.clone(),
        role: schema.role,
        confidence: schema.confidence,
        records: 0,
        decoded: 0,
        skipped: 0,
        error: None,
    };

    let records = match handle.iterate(&schema.store) {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!(store = %schema.store, "store unreadable: {}", e);
            report.error = Some(e.to_string());
            return report;
        }
    };

    for item in records {
        report.records += 1;
        match item.and_then(|rec| decode_record(schema, &rec)) {
            Ok(entity) => {
                if builder.add(entity) {
                    report.decoded += 1;
                } else {
                    report.skipped += 1;
                }
            }
            Err(e) => {
                tracing::debug!(store = %schema.store, "skipping record: {}", e);
                report.skipped += 1;
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemorySource, RawRecord};
    use serde_json::json;

    fn snapshot() -> MemorySource {
        MemorySource::new()
            .with_json_store(
                "h_issues",
                vec![
                    json!({"id": "i1", "number": 1, "title": "Login broken", "teamId": "t1",
                           "stateId": "s1", "assigneeId": "u1", "updatedAt": "2024-03-01T00:00:00Z"}),
                    json!({"id": "i2", "number": 2, "title": "Dark mode", "teamId": "t1",
                           "stateId": "s2", "assigneeId": "ghost", "updatedAt": "2024-05-01T00:00:00Z"}),
                    json!({"id": "i3", "number": 3, "title": "No timestamp", "teamId": "t1",
                           "stateId": "s1"}),
                    json!({"id": "i4", "number": 4, "title": "Orphan team", "teamId": "t404",
                           "stateId": "s1"}),
                ],
            )
            .with_json_store(
                "h_users",
                vec![json!({"id": "u1", "name": "Ada Lovelace", "displayName": "ada",
                            "email": "ada@example.com", "avatarUrl": null})],
            )
            .with_json_store(
                "h_teams",
                vec![json!({"id": "t1", "key": "ENG", "name": "Engineering"})],
            )
            .with_json_store(
                "h_states",
                vec![
                    json!({"id": "s1", "name": "Todo", "type": "unstarted", "color": "#aaa", "teamId": "t1"}),
                    json!({"id": "s2", "name": "Done", "type": "completed", "color": "#0f0", "teamId": "t1"}),
                ],
            )
            .with_json_store(
                "h_comments",
                vec![
                    json!({"id": "c2", "issueId": "i1", "userId": "u1", "bodyData": "second", "createdAt": 20}),
                    json!({"id": "c1", "issueId": "i1", "userId": "u9", "bodyData": "first", "createdAt": 10}),
                    json!({"id": "c3", "issueId": "nope", "userId": "u1", "bodyData": "lost", "createdAt": 5}),
                ],
            )
            .with_store("_meta", vec![RawRecord::new("k", "{}")])
    }

    fn build() -> Index {
        load_index(&snapshot(), Path::new(""), &SnifferOptions::default()).unwrap()
    }

    #[test]
    fn test_roles_and_counts() {
        let index = build();
        let report = index.report();
        assert_eq!(report.role_of("h_issues"), Some(Role::Issue));
        assert_eq!(report.role_of("h_users"), Some(Role::User));
        assert_eq!(report.role_of("h_teams"), Some(Role::Team));
        assert_eq!(report.role_of("h_states"), Some(Role::State));
        assert_eq!(report.role_of("h_comments"), Some(Role::Comment));
        assert_eq!(report.role_of("_meta"), None);

        assert_eq!(index.issues().len(), 4);
        assert_eq!(report.fallback_identifiers, 1);
        assert_eq!(index.users().len(), 1);
        assert_eq!(index.teams().len(), 1);
        assert_eq!(index.states().len(), 2);
        assert_eq!(index.comment_count(), 2);
        assert_eq!(report.orphan_comments, 1);
    }

    #[test]
    fn test_issue_order_is_updated_desc_missing_last() {
        let index = build();
        let ids: Vec<_> = index.issues().iter().map(|i| i.identifier.as_str()).collect();
        assert_eq!(ids, vec!["ENG-2", "ENG-1", "???-4", "ENG-3"]);
    }

    #[test]
    fn test_dangling_references_cleared() {
        let index = build();
        let i2 = index.issue_by_identifier("eng-2").unwrap();
        assert_eq!(i2.assignee_id, None);
        assert_eq!(i2.team_id.as_deref(), Some("t1"));
        assert!(index.report().unresolved_refs >= 2);

        let comments = index.comments_for("i1");
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].body, "first");
        assert_eq!(comments[0].user_id, None);
    }

    #[test]
    fn test_secondary_indexes() {
        let index = build();
        assert_eq!(index.user_issue_count("u1"), 1);
        assert_eq!(index.team_issue_count("t1"), 3);
        assert_eq!(index.issues_by_state_type(StateType::Unstarted).len(), 3);
        assert_eq!(index.issues_by_state_type(StateType::Completed).len(), 1);
        assert!(index.issues_by_state_type(StateType::Triage).is_empty());
        let positions = index.issues_by_team("t1");
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_identifiers_unique_first_wins() {
        let mut builder = IndexBuilder::new();
        builder.add(Entity::Team(Team {
            id: "t1".into(),
            key: "ENG".into(),
            name: "Eng".into(),
        }));
        for (id, ident) in [("a", "ENG-1"), ("b", "eng-1"), ("c", "ENG-2")] {
            builder.add(Entity::Issue(Issue {
                id: id.into(),
                identifier: ident.into(),
                number: None,
                title: id.into(),
                description: None,
                priority: None,
                team_id: Some("t1".into()),
                state_id: None,
                assignee_id: None,
                project_id: None,
                label_ids: vec![],
                created_at: None,
                updated_at: None,
            }));
        }
        let index = builder.finish();
        assert_eq!(index.issues().len(), 2);
        assert_eq!(index.issue_by_identifier("ENG-1").unwrap().id, "a");
        assert_eq!(index.report().duplicate_issues, 1);
    }

    #[test]
    fn test_duplicate_entity_ids_first_wins() {
        let mut builder = IndexBuilder::new();
        let team = |name: &str| {
            Entity::Team(Team {
                id: "t1".into(),
                key: "ENG".into(),
                name: name.into(),
            })
        };
        assert!(builder.add(team("first")));
        assert!(!builder.add(team("second")));
        assert_eq!(builder.finish().team("t1").unwrap().name, "first");
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let a = build();
        let b = build();
        assert_eq!(a.issues(), b.issues());
        assert_eq!(a.report().stores, b.report().stores);
    }

    #[test]
    fn test_unavailable_source_fails() {
        struct Broken;
        impl RecordSource for Broken {
            fn open(&self, path: &Path) -> LinearResult<Box<dyn SnapshotHandle>> {
                Err(LinearError::SourceUnavailable(path.display().to_string()))
            }
        }
        let err = load_index(&Broken, Path::new("/x"), &SnifferOptions::default()).unwrap_err();
        assert_eq!(err.kind(), "source_unavailable");
    }

    #[test]
    fn test_snapshot_without_stores_fails() {
        let only_meta = MemorySource::new().with_store("_meta", vec![RawRecord::new("k", "{}")]);
        let err = load_index(&only_meta, Path::new("/snap"), &SnifferOptions::default()).unwrap_err();
        assert_eq!(err.kind(), "source_unavailable");
        assert!(err.to_string().contains("no stores found"));
    }

    #[test]
    fn test_snapshot_without_classified_stores_fails() {
        let noise = MemorySource::new()
            .with_store("blobs", vec![RawRecord::new("k1", "not json"), RawRecord::new("k2", "[")])
            .with_json_store("settings", vec![json!({"theme": "dark"})]);
        let err = load_index(&noise, Path::new("/snap"), &SnifferOptions::default()).unwrap_err();
        assert_eq!(err.kind(), "source_unavailable");
        assert!(err.to_string().contains("none of the 2 stores"));
    }

    #[test]
    fn test_issue_with_unknown_team_keeps_fallback_identifier() {
        let source = MemorySource::new()
            .with_json_store(
                "issues",
                vec![
                    json!({"id": "i1", "number": 5, "title": "Known team", "teamId": "t1", "stateId": "s1"}),
                    json!({"id": "i2", "number": 6, "title": "Lost team", "teamId": "t404", "stateId": "s1"}),
                ],
            )
            .with_json_store("teams", vec![json!({"id": "t1", "key": "ENG", "name": "Engineering"})]);
        let index = load_index(&source, Path::new(""), &SnifferOptions::default()).unwrap();
        assert_eq!(index.issues().len(), 2);
        assert!(index.issue_by_identifier("ENG-5").is_some());
        let lost = index.issue_by_identifier("???-6").unwrap();
        assert_eq!(lost.team_id, None);
        assert_eq!(index.report().fallback_identifiers, 1);
    }
}
