//! Query Engine: read-only filters, search, lookups and pagination over one
//! [`Index`].
//!
//! A [`QueryEngine`] borrows the Index for the length of a single request
//! and never mutates it. Every list operation returns a page plus a
//! `nextCursor` that is present exactly when more results follow.
//!
//! Issue lists follow the Index's canonical order (updated timestamp
//! descending, identifier ascending). Filtering starts from the narrowest
//! posting list among the provided filters and checks the remaining
//! predicates per candidate, so a filtered page costs O(candidates).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::QueryConfig;
use crate::cursor::{Cursor, CursorScope, SortKey};
use crate::decode::parse_timestamp_str;
use crate::error::{LinearError, LinearResult};
use crate::index::{Index, StoreReport};
use crate::models::{format_ts_iso, Issue, StateType, Team, User};

/// Page-size bounds.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self::from(&QueryConfig::default())
    }
}

impl From<&QueryConfig> for Limits {
    fn from(cfg: &QueryConfig) -> Self {
        Self {
            default_limit: cfg.default_limit,
            max_limit: cfg.max_limit,
        }
    }
}

impl Limits {
    /// The requested limit, defaulted and clamped to `[1, max_limit]`.
    pub fn clamp(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit.max(1))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageRequest {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

impl PageRequest {
    pub fn new(limit: Option<usize>, cursor: Option<String>) -> Self {
        Self { limit, cursor }
    }
}

/// Filters for [`QueryEngine::list_issues`]. All provided filters must hold.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueFilter {
    /// User id, or a name matched as in [`QueryEngine::find_user`].
    pub assignee: Option<String>,
    /// Team id, key or name.
    pub team: Option<String>,
    pub state_type: Option<String>,
    pub priority: Option<i64>,
    /// ISO-8601; keeps issues updated at or after this instant.
    pub updated_after: Option<String>,
}

// ---- response shapes ----

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueSummary {
    pub identifier: String,
    pub title: String,
    pub priority: Option<i64>,
    pub state: Option<String>,
    pub state_type: Option<StateType>,
    pub assignee: Option<String>,
    pub team: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueDetail {
    pub id: String,
    #[serde(flatten)]
    pub summary: IssueSummary,
    pub description: Option<String>,
    pub assignee_id: Option<String>,
    pub team_id: Option<String>,
    pub project_id: Option<String>,
    pub label_ids: Vec<String>,
    pub created_at: Option<String>,
    pub comment_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuePage {
    pub issues: Vec<IssueSummary>,
    pub next_cursor: Option<String>,
    pub total_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    pub issues: Vec<IssueSummary>,
    pub next_cursor: Option<String>,
    pub match_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub issue_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPage {
    pub users: Vec<UserSummary>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamSummary {
    pub id: String,
    pub key: String,
    pub name: String,
    pub issue_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamPage {
    pub teams: Vec<TeamSummary>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub state_type: StateType,
    pub color: Option<String>,
    pub team: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePage {
    pub states: Vec<StateSummary>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MyIssues {
    pub user: UserSummary,
    pub counts_by_state_type: BTreeMap<String, usize>,
    pub issues: Vec<IssueSummary>,
    pub next_cursor: Option<String>,
    pub total_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    pub id: String,
    pub author: Option<String>,
    pub body: String,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueComments {
    pub identifier: String,
    pub comments: Vec<CommentView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub teams: usize,
    pub users: usize,
    pub states: usize,
    pub issues: usize,
    pub comments: usize,
    pub loaded_at: String,
    pub stores: Vec<StoreReport>,
}

/// One page cut out of a filtered, canonically ordered position list.
struct Window<'a> {
    positions: &'a [usize],
    next_cursor: Option<String>,
}

/// Cut the page that follows `after` out of `matched`.
///
/// `matched` holds ascending positions into the collection ordered by
/// `keys`, so the first position past the cursor is found by bisection.
fn window<'a>(
    matched: &'a [usize],
    keys: &[SortKey],
    scope: CursorScope,
    after: Option<&SortKey>,
    limit: usize,
) -> Window<'a> {
    let start = match after {
        Some(after) => matched.partition_point(|&pos| &keys[pos] <= after),
        None => 0,
    };
    let end = (start + limit).min(matched.len());
    let positions = &matched[start..end];
    let next_cursor = match positions.last() {
        Some(&last) if end < matched.len() => Some(Cursor::new(scope, &keys[last]).encode()),
        _ => None,
    };
    Window {
        positions,
        next_cursor,
    }
}

fn parse_state_type(raw: Option<&str>) -> LinearResult<Option<StateType>> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<StateType>().map_err(LinearError::InvalidArgument))
        .transpose()
}

fn parse_updated_after(raw: Option<&str>) -> LinearResult<Option<i64>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => parse_timestamp_str(s).map(Some).ok_or_else(|| {
            LinearError::InvalidArgument(format!("invalid updated_after timestamp: {}", s))
        }),
    }
}

fn non_empty(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

pub struct QueryEngine<'a> {
    index: &'a Index,
    limits: Limits,
}

impl<'a> QueryEngine<'a> {
    pub fn new(index: &'a Index, limits: Limits) -> Self {
        Self { index, limits }
    }

    fn cursor_key(&self, page: &PageRequest, scope: CursorScope) -> LinearResult<Option<SortKey>> {
        non_empty(page.cursor.as_deref())
            .map(|token| Cursor::decode_for(token, scope))
            .transpose()
    }

    pub fn summarize(&self, issue: &Issue) -> IssueSummary {
        let state = self.index.state_of(issue);
        IssueSummary {
            identifier: issue.identifier.clone(),
            title: issue.title.clone(),
            priority: issue.priority,
            state: state.map(|s| s.name.clone()),
            state_type: state.map(|s| s.state_type),
            assignee: issue
                .assignee_id
                .as_deref()
                .and_then(|id| self.index.user(id))
                .map(|u| u.name.clone()),
            team: issue
                .team_id
                .as_deref()
                .and_then(|id| self.index.team(id))
                .map(|t| t.key.clone()),
            updated_at: issue.updated_at.map(format_ts_iso),
        }
    }

    fn summarize_positions(&self, positions: &[usize]) -> Vec<IssueSummary> {
        let issues = self.index.issues();
        positions.iter().map(|&p| self.summarize(&issues[p])).collect()
    }

    fn user_summary(&self, user: &User) -> UserSummary {
        UserSummary {
            id: user.id.clone(),
            name: user.name.clone(),
            display_name: user.display_name.clone(),
            email: user.email.clone(),
            issue_count: self.index.user_issue_count(&user.id),
        }
    }

    /// Resolve a user by id, else by best name match.
    fn resolve_user(&self, needle: &str) -> Option<&'a User> {
        self.index.user(needle).or_else(|| self.find_user(needle))
    }

    /// Case-insensitive name match preferring matches at a word start.
    ///
    /// Scores: full name starts with the needle (100), a later word of the
    /// name does (50), the display name does (40), a plain substring (10).
    /// Equal scores keep Index order, which is by issue count.
    pub fn find_user(&self, needle: &str) -> Option<&'a User> {
        let needle = needle.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        let spaced = format!(" {}", needle);
        let mut best: Option<(u32, &'a User)> = None;
        for user in self.index.users() {
            let name = user.name.to_lowercase();
            let display = user.display_name.as_deref().unwrap_or("").to_lowercase();
            if !name.contains(&needle) && !display.contains(&needle) {
                continue;
            }
            let score = if name.starts_with(&needle) {
                100
            } else if format!(" {}", name).contains(&spaced) {
                50
            } else if display.starts_with(&needle) {
                40
            } else {
                10
            };
            if best.map_or(true, |(top, _)| score > top) {
                best = Some((score, user));
            }
        }
        best.map(|(_, user)| user)
    }

    /// Team by id, key (case-insensitive) or name substring.
    pub fn find_team(&self, needle: &str) -> Option<&'a Team> {
        let needle = needle.trim();
        if needle.is_empty() {
            return None;
        }
        if let Some(team) = self.index.team(needle) {
            return Some(team);
        }
        let teams = self.index.teams();
        teams
            .iter()
            .find(|t| t.key.eq_ignore_ascii_case(needle))
            .or_else(|| {
                let lower = needle.to_lowercase();
                teams.iter().find(|t| t.name.to_lowercase().contains(&lower))
            })
    }

    pub fn list_issues(&self, filter: &IssueFilter, page: &PageRequest) -> LinearResult<IssuePage> {
        let state_type = parse_state_type(filter.state_type.as_deref())?;
        let updated_after = parse_updated_after(filter.updated_after.as_deref())?;
        let after = self.cursor_key(page, CursorScope::Issues)?;
        let limit = self.limits.clamp(page.limit);

        let empty = || IssuePage {
            issues: Vec::new(),
            next_cursor: None,
            total_count: 0,
        };

        let assignee = match non_empty(filter.assignee.as_deref()) {
            Some(needle) => match self.resolve_user(needle) {
                Some(user) => Some(user.id.as_str()),
                None => return Ok(empty()),
            },
            None => None,
        };
        let team = match non_empty(filter.team.as_deref()) {
            Some(needle) => match self.find_team(needle) {
                Some(team) => Some(team.id.as_str()),
                None => return Ok(empty()),
            },
            None => None,
        };

        // Narrowest posting list first.
        let mut postings: Vec<&[usize]> = Vec::new();
        if let Some(id) = assignee {
            postings.push(self.index.issues_by_assignee(id));
        }
        if let Some(id) = team {
            postings.push(self.index.issues_by_team(id));
        }
        if let Some(ty) = state_type {
            postings.push(self.index.issues_by_state_type(ty));
        }
        let all: Vec<usize>;
        let base: &[usize] = match postings.iter().min_by_key(|p| p.len()) {
            Some(narrowest) => *narrowest,
            None => {
                all = (0..self.index.issues().len()).collect();
                &all
            }
        };

        let issues = self.index.issues();
        let matched: Vec<usize> = base
            .iter()
            .copied()
            .filter(|&pos| {
                let issue = &issues[pos];
                assignee.map_or(true, |id| issue.assignee_id.as_deref() == Some(id))
                    && team.map_or(true, |id| issue.team_id.as_deref() == Some(id))
                    && state_type.map_or(true, |ty| {
                        self.index.state_of(issue).map(|s| s.state_type) == Some(ty)
                    })
                    && filter.priority.map_or(true, |p| issue.priority == Some(p))
                    && updated_after.map_or(true, |t| issue.updated_at.map_or(false, |u| u >= t))
            })
            .collect();

        let win = window(
            &matched,
            self.index.issue_keys(),
            CursorScope::Issues,
            after.as_ref(),
            limit,
        );
        Ok(IssuePage {
            issues: self.summarize_positions(win.positions),
            next_cursor: win.next_cursor,
            total_count: matched.len(),
        })
    }

    /// Title search: the whole query as a substring, or every
    /// whitespace-separated token somewhere in the title.
    pub fn search_issues(&self, query: &str, page: &PageRequest) -> LinearResult<SearchPage> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Err(LinearError::InvalidArgument(
                "search query must not be empty".into(),
            ));
        }
        let after = self.cursor_key(page, CursorScope::Issues)?;
        let limit = self.limits.clamp(page.limit);
        let tokens: Vec<&str> = needle.split_whitespace().collect();

        let matched: Vec<usize> = self
            .index
            .issues()
            .iter()
            .enumerate()
            .filter(|(_, issue)| {
                let title = issue.title.to_lowercase();
                title.contains(&needle) || tokens.iter().all(|t| title.contains(t))
            })
            .map(|(pos, _)| pos)
            .collect();

        let win = window(
            &matched,
            self.index.issue_keys(),
            CursorScope::Issues,
            after.as_ref(),
            limit,
        );
        Ok(SearchPage {
            issues: self.summarize_positions(win.positions),
            next_cursor: win.next_cursor,
            match_count: matched.len(),
        })
    }

    pub fn get_issue(&self, identifier: &str) -> LinearResult<IssueDetail> {
        let issue = self
            .index
            .issue_by_identifier(identifier)
            .ok_or_else(|| LinearError::not_found("issue", identifier.trim()))?;
        Ok(IssueDetail {
            id: issue.id.clone(),
            summary: self.summarize(issue),
            description: issue.description.clone(),
            assignee_id: issue.assignee_id.clone(),
            team_id: issue.team_id.clone(),
            project_id: issue.project_id.clone(),
            label_ids: issue.label_ids.clone(),
            created_at: issue.created_at.map(format_ts_iso),
            comment_count: self.index.comments_for(&issue.id).len(),
        })
    }

    pub fn get_issue_comments(&self, identifier: &str) -> LinearResult<IssueComments> {
        let issue = self
            .index
            .issue_by_identifier(identifier)
            .ok_or_else(|| LinearError::not_found("issue", identifier.trim()))?;
        let comments = self
            .index
            .comments_for(&issue.id)
            .into_iter()
            .map(|c| CommentView {
                id: c.id.clone(),
                author: c
                    .user_id
                    .as_deref()
                    .and_then(|id| self.index.user(id))
                    .map(|u| u.name.clone()),
                body: c.body.clone(),
                created_at: c.created_at.map(format_ts_iso),
            })
            .collect();
        Ok(IssueComments {
            identifier: issue.identifier.clone(),
            comments,
        })
    }

    pub fn list_users(&self, page: &PageRequest) -> LinearResult<UserPage> {
        let after = self.cursor_key(page, CursorScope::Users)?;
        let all: Vec<usize> = (0..self.index.users().len()).collect();
        let win = window(
            &all,
            self.index.user_keys(),
            CursorScope::Users,
            after.as_ref(),
            self.limits.clamp(page.limit),
        );
        let users = self.index.users();
        Ok(UserPage {
            users: win
                .positions
                .iter()
                .map(|&p| self.user_summary(&users[p]))
                .collect(),
            next_cursor: win.next_cursor,
        })
    }

    pub fn get_user(&self, name: &str) -> LinearResult<UserSummary> {
        self.resolve_user(name.trim())
            .map(|u| self.user_summary(u))
            .ok_or_else(|| LinearError::not_found("user", name.trim()))
    }

    pub fn list_teams(&self, page: &PageRequest) -> LinearResult<TeamPage> {
        let after = self.cursor_key(page, CursorScope::Teams)?;
        let all: Vec<usize> = (0..self.index.teams().len()).collect();
        let win = window(
            &all,
            self.index.team_keys(),
            CursorScope::Teams,
            after.as_ref(),
            self.limits.clamp(page.limit),
        );
        let teams = self.index.teams();
        Ok(TeamPage {
            teams: win
                .positions
                .iter()
                .map(|&p| {
                    let t = &teams[p];
                    TeamSummary {
                        id: t.id.clone(),
                        key: t.key.clone(),
                        name: t.name.clone(),
                        issue_count: self.index.team_issue_count(&t.id),
                    }
                })
                .collect(),
            next_cursor: win.next_cursor,
        })
    }

    pub fn list_states(&self, team: Option<&str>, page: &PageRequest) -> LinearResult<StatePage> {
        let after = self.cursor_key(page, CursorScope::States)?;
        let states = self.index.states();
        let team_id = match non_empty(team) {
            Some(needle) => match self.find_team(needle) {
                Some(t) => Some(t.id.as_str()),
                None => return Err(LinearError::not_found("team", needle)),
            },
            None => None,
        };
        let matched: Vec<usize> = states
            .iter()
            .enumerate()
            .filter(|(_, s)| team_id.map_or(true, |id| s.team_id.as_deref() == Some(id)))
            .map(|(pos, _)| pos)
            .collect();
        let win = window(
            &matched,
            self.index.state_keys(),
            CursorScope::States,
            after.as_ref(),
            self.limits.clamp(page.limit),
        );
        Ok(StatePage {
            states: win
                .positions
                .iter()
                .map(|&p| {
                    let s = &states[p];
                    StateSummary {
                        id: s.id.clone(),
                        name: s.name.clone(),
                        state_type: s.state_type,
                        color: s.color.clone(),
                        team: s
                            .team_id
                            .as_deref()
                            .and_then(|id| self.index.team(id))
                            .map(|t| t.key.clone()),
                    }
                })
                .collect(),
            next_cursor: win.next_cursor,
        })
    }

    pub fn get_my_issues(
        &self,
        name: &str,
        state_type: Option<&str>,
        updated_after: Option<&str>,
        page: &PageRequest,
    ) -> LinearResult<MyIssues> {
        if name.trim().is_empty() {
            return Err(LinearError::InvalidArgument("user name must not be empty".into()));
        }
        let state_type = parse_state_type(state_type)?;
        let updated_after = parse_updated_after(updated_after)?;
        let after = self.cursor_key(page, CursorScope::Issues)?;
        let user = self
            .resolve_user(name.trim())
            .ok_or_else(|| LinearError::not_found("user", name.trim()))?;

        let issues = self.index.issues();
        let assigned = self.index.issues_by_assignee(&user.id);

        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for &pos in assigned {
            let ty = self
                .index
                .state_of(&issues[pos])
                .map(|s| s.state_type.as_str())
                .unwrap_or("unknown");
            *counts.entry(ty.to_string()).or_default() += 1;
        }

        let matched: Vec<usize> = assigned
            .iter()
            .copied()
            .filter(|&pos| {
                let issue = &issues[pos];
                state_type.map_or(true, |ty| {
                    self.index.state_of(issue).map(|s| s.state_type) == Some(ty)
                }) && updated_after.map_or(true, |t| issue.updated_at.map_or(false, |u| u >= t))
            })
            .collect();

        let win = window(
            &matched,
            self.index.issue_keys(),
            CursorScope::Issues,
            after.as_ref(),
            self.limits.clamp(page.limit),
        );
        Ok(MyIssues {
            user: self.user_summary(user),
            counts_by_state_type: counts,
            issues: self.summarize_positions(win.positions),
            next_cursor: win.next_cursor,
            total_count: matched.len(),
        })
    }

    pub fn get_summary(&self) -> Summary {
        let report = self.index.report();
        Summary {
            teams: self.index.teams().len(),
            users: self.index.users().len(),
            states: self.index.states().len(),
            issues: self.index.issues().len(),
            comments: self.index.comment_count(),
            loaded_at: format_ts_iso(report.loaded_at),
            stores: report.stores.clone(),
        }
    }
}
