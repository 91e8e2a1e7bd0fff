//! End-to-end tests over the library API: snapshot → Index → cache → queries.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;

use linear_local::cache::{CacheManager, CacheState, ManualClock, SnapshotLoader};
use linear_local::index::load_index;
use linear_local::models::Role;
use linear_local::query::{IssueFilter, Limits, PageRequest, QueryEngine};
use linear_local::schema::SnifferOptions;
use linear_local::source::{JsonlSource, MemorySource, RecordSource};

fn three_store_snapshot() -> MemorySource {
    MemorySource::new()
        .with_json_store(
            "issues",
            vec![
                json!({"id": "i1", "identifier": "ENG-1", "number": 1, "title": "Crash on launch",
                       "teamId": "t1", "stateId": null, "assigneeId": "u1",
                       "updatedAt": "2024-06-01T12:00:00Z"}),
                json!({"id": "i2", "identifier": "ENG-2", "number": 2, "title": "Slow sync",
                       "teamId": "t1", "stateId": null, "assigneeId": null,
                       "updatedAt": "2024-05-01T12:00:00Z"}),
            ],
        )
        .with_json_store(
            "users",
            vec![json!({"id": "u1", "name": "Ada Lovelace", "displayName": "ada",
                        "email": "ada@example.com", "avatarUrl": null})],
        )
        .with_json_store(
            "teams",
            vec![json!({"id": "t1", "key": "ENG", "name": "Engineering"})],
        )
}

#[test]
fn test_three_store_scenario() {
    let index = load_index(
        &three_store_snapshot(),
        Path::new("unused"),
        &SnifferOptions::default(),
    )
    .unwrap();
    let engine = QueryEngine::new(&index, Limits::default());

    let summary = engine.get_summary();
    assert_eq!(summary.teams, 1);
    assert_eq!(summary.users, 1);
    assert_eq!(summary.issues, 2);

    let assigned = engine
        .list_issues(
            &IssueFilter {
                assignee: Some("u1".into()),
                ..IssueFilter::default()
            },
            &PageRequest::default(),
        )
        .unwrap();
    assert_eq!(assigned.issues.len(), 1);
    assert_eq!(assigned.issues[0].identifier, "ENG-1");
    assert!(assigned.next_cursor.is_none());

    let missing = engine.get_issue("does-not-exist").unwrap_err();
    assert_eq!(missing.kind(), "not_found");
}

#[test]
fn test_store_roles_are_reported() {
    let index = load_index(
        &three_store_snapshot(),
        Path::new("unused"),
        &SnifferOptions::default(),
    )
    .unwrap();
    let report = index.report();
    assert_eq!(report.role_of("issues"), Some(Role::Issue));
    assert_eq!(report.role_of("users"), Some(Role::User));
    assert_eq!(report.role_of("teams"), Some(Role::Team));
    for store in &report.stores {
        assert!(store.decoded <= store.records);
    }
}

/// The three-store scenario as the desktop app writes it: no verbatim
/// identifiers, and the unassigned issue points at a team that is gone.
fn three_store_snapshot_without_identifiers() -> MemorySource {
    MemorySource::new()
        .with_json_store(
            "issues",
            vec![
                json!({"id": "i1", "number": 1, "title": "Crash on launch", "teamId": "t1",
                       "stateId": "s1", "assigneeId": "u1", "updatedAt": 1_717_000_000}),
                json!({"id": "i2", "number": 2, "title": "Slow sync", "teamId": "t404",
                       "stateId": "s1", "assigneeId": null, "updatedAt": 1_716_000_000}),
            ],
        )
        .with_json_store(
            "users",
            vec![json!({"id": "u1", "name": "Ada Lovelace", "displayName": "ada",
                        "email": "ada@example.com", "avatarUrl": null})],
        )
        .with_json_store(
            "teams",
            vec![json!({"id": "t1", "key": "ENG", "name": "Engineering"})],
        )
}

#[test]
fn test_issues_without_identifiers_survive_dangling_team() {
    let index = load_index(
        &three_store_snapshot_without_identifiers(),
        Path::new("unused"),
        &SnifferOptions::default(),
    )
    .unwrap();
    let engine = QueryEngine::new(&index, Limits::default());

    let summary = engine.get_summary();
    assert_eq!((summary.teams, summary.users, summary.issues), (1, 1, 2));

    let assigned = engine
        .list_issues(
            &IssueFilter {
                assignee: Some("u1".into()),
                ..IssueFilter::default()
            },
            &PageRequest::default(),
        )
        .unwrap();
    assert_eq!(assigned.issues.len(), 1);
    assert_eq!(assigned.issues[0].identifier, "ENG-1");

    let orphan = engine.get_issue("???-2").unwrap();
    assert_eq!(orphan.summary.team, None);
    assert_eq!(orphan.team_id, None);
    assert_eq!(orphan.summary.assignee, None);
    assert_eq!(engine.get_issue("ENG-404").unwrap_err().kind(), "not_found");
}

/// 120 issues spread over three teams, with deliberately tied timestamps.
fn large_snapshot() -> MemorySource {
    large_snapshot_with(Vec::new())
}

fn large_snapshot_with(extra_issues: Vec<Value>) -> MemorySource {
    let teams = vec![
        json!({"id": "t1", "key": "ENG", "name": "Engineering"}),
        json!({"id": "t2", "key": "DES", "name": "Design"}),
        json!({"id": "t3", "key": "OPS", "name": "Operations"}),
    ];
    let issues: Vec<Value> = (1..=120)
        .map(|n| {
            let team = ["t1", "t2", "t3"][n % 3];
            json!({
                "id": format!("i{}", n),
                "number": n,
                "title": format!("Task number {}", n),
                "teamId": team,
                "stateId": "s1",
                "assigneeId": if n % 4 == 0 { Value::from("u1") } else { Value::Null },
                // Groups of five share one timestamp.
                "updatedAt": 1_700_000_000 + (n / 5) as i64 * 60,
            })
        })
        .chain(extra_issues)
        .collect();
    MemorySource::new()
        .with_json_store("teams", teams)
        .with_json_store("issues", issues)
        .with_json_store(
            "states",
            vec![json!({"id": "s1", "name": "Todo", "type": "unstarted", "color": "#999",
                        "teamId": "t1"})],
        )
        .with_json_store(
            "users",
            vec![json!({"id": "u1", "name": "Ada Lovelace", "displayName": "ada",
                        "email": "ada@example.com", "avatarUrl": "https://example.com/a.png"})],
        )
}

#[test]
fn test_following_cursors_yields_every_issue_once() {
    let index = load_index(&large_snapshot(), Path::new(""), &SnifferOptions::default()).unwrap();
    let engine = QueryEngine::new(&index, Limits::default());

    let mut seen = Vec::new();
    let mut page = PageRequest::new(Some(7), None);
    let mut pages = 0;
    loop {
        let res = engine.list_issues(&IssueFilter::default(), &page).unwrap();
        assert_eq!(res.total_count, 120);
        seen.extend(res.issues);
        pages += 1;
        match res.next_cursor {
            Some(cursor) => page.cursor = Some(cursor),
            None => break,
        }
    }

    assert_eq!(pages, 18);
    assert_eq!(seen.len(), 120);
    let unique: HashSet<_> = seen.iter().map(|i| i.identifier.clone()).collect();
    assert_eq!(unique.len(), 120);
    for pair in seen.windows(2) {
        assert!(pair[0].updated_at >= pair[1].updated_at);
    }
}

#[test]
fn test_cursor_continues_on_rebuilt_index() {
    let before = load_index(&large_snapshot(), Path::new(""), &SnifferOptions::default()).unwrap();
    let engine = QueryEngine::new(&before, Limits::default());
    let first = engine
        .list_issues(&IssueFilter::default(), &PageRequest::new(Some(10), None))
        .unwrap();
    let cursor = first.next_cursor.clone().unwrap();
    let expected = engine
        .list_issues(&IssueFilter::default(), &PageRequest::new(Some(10), Some(cursor.clone())))
        .unwrap();

    // A newer issue lands ahead of the cursor's anchor.
    let newer = json!({"id": "i999", "number": 999, "title": "Fresh bug", "teamId": "t1",
                       "stateId": "s1", "updatedAt": 1_800_000_000});
    let after = load_index(
        &large_snapshot_with(vec![newer]),
        Path::new(""),
        &SnifferOptions::default(),
    )
    .unwrap();
    let rebuilt = QueryEngine::new(&after, Limits::default());
    let second = rebuilt
        .list_issues(&IssueFilter::default(), &PageRequest::new(Some(10), Some(cursor)))
        .unwrap();

    assert_eq!(second.total_count, 121);
    let ids = |page: &[linear_local::query::IssueSummary]| -> Vec<String> {
        page.iter().map(|i| i.identifier.clone()).collect()
    };
    assert_eq!(ids(&second.issues), ids(&expected.issues));
    let seen: HashSet<String> = ids(&first.issues).into_iter().collect();
    assert!(second.issues.iter().all(|i| !seen.contains(&i.identifier)));
}

#[test]
fn test_updated_after_filter_holds_for_every_result() {
    let index = load_index(&large_snapshot(), Path::new(""), &SnifferOptions::default()).unwrap();
    let engine = QueryEngine::new(&index, Limits::default());
    let threshold = 1_700_000_000 + 12 * 60;
    let res = engine
        .list_issues(
            &IssueFilter {
                updated_after: Some(threshold.to_string()),
                assignee: Some("Ada".into()),
                ..IssueFilter::default()
            },
            &PageRequest::new(Some(100), None),
        )
        .unwrap();
    assert!(!res.issues.is_empty());
    for summary in &res.issues {
        let issue = index.issue_by_identifier(&summary.identifier).unwrap();
        assert!(issue.updated_at.unwrap() >= threshold);
        assert_eq!(issue.assignee_id.as_deref(), Some("u1"));
    }
}

#[test]
fn test_rebuilds_are_idempotent() {
    let source = large_snapshot();
    let a = load_index(&source, Path::new(""), &SnifferOptions::default()).unwrap();
    let b = load_index(&source, Path::new(""), &SnifferOptions::default()).unwrap();
    assert_eq!(a.issues().len(), b.issues().len());
    assert_eq!(a.users().len(), b.users().len());
    let roles = |idx: &linear_local::index::Index| -> Vec<(String, Role)> {
        idx.report()
            .stores
            .iter()
            .map(|s| (s.store.clone(), s.role))
            .collect()
    };
    assert_eq!(roles(&a), roles(&b));
}

fn write_jsonl(dir: &Path, store: &str, values: &[Value]) {
    let lines: Vec<String> = values
        .iter()
        .map(|v| json!({"key": v["id"], "value": v}).to_string())
        .collect();
    fs::write(dir.join(format!("{}.jsonl", store)), lines.join("\n")).unwrap();
}

#[test]
fn test_jsonl_snapshot_with_noise() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    write_jsonl(
        dir,
        "issues",
        &[json!({"id": "i1", "number": 7, "title": "Fix login", "teamId": "t1",
                 "stateId": "s1", "updatedAt": 1_717_000_000_000i64})],
    );
    write_jsonl(dir, "teams", &[json!({"id": "t1", "key": "WEB", "name": "Web"})]);
    write_jsonl(
        dir,
        "states",
        &[json!({"id": "s1", "name": "In Progress", "type": "started", "color": "#f2c94c"})],
    );
    // Ignored and unreadable stores must not break the build.
    write_jsonl(dir, "_metadata", &[json!({"id": "m"})]);
    fs::write(dir.join("garbage.jsonl"), "not json\n{also not\n").unwrap();

    let index = load_index(&JsonlSource, dir, &SnifferOptions::default()).unwrap();
    let issue = index.issue_by_identifier("web-7").unwrap();
    assert_eq!(issue.title, "Fix login");
    // Millisecond timestamps are normalised to seconds.
    assert_eq!(issue.updated_at, Some(1_717_000_000));
    assert_eq!(index.state_of(issue).unwrap().name, "In Progress");
    assert_eq!(index.report().role_of("_metadata"), None);
    assert_eq!(index.report().role_of("garbage"), Some(Role::Unknown));
}

#[tokio::test]
async fn test_cache_over_missing_snapshot() {
    let tmp = TempDir::new().unwrap();
    let loader = SnapshotLoader::new(
        Arc::new(JsonlSource) as Arc<dyn RecordSource>,
        tmp.path().join("nope"),
        SnifferOptions::default(),
    );
    let cache = CacheManager::new(
        Arc::new(loader),
        Arc::new(ManualClock::new()),
        Duration::from_secs(300),
        Duration::from_secs(5),
    );
    let err = cache.snapshot().await.unwrap_err();
    assert_eq!(err.kind(), "no_data_available");
    assert!(err.to_string().contains("snapshot not found"));
    assert_eq!(cache.state(), CacheState::Empty);
}

#[tokio::test]
async fn test_cache_serves_stale_when_snapshot_disappears() {
    let tmp = TempDir::new().unwrap();
    let snap = tmp.path().join("snap");
    fs::create_dir_all(&snap).unwrap();
    write_jsonl(&snap, "teams", &[json!({"id": "t1", "key": "ENG", "name": "Engineering"})]);

    let clock = Arc::new(ManualClock::new());
    let loader = SnapshotLoader::new(Arc::new(JsonlSource), snap.clone(), SnifferOptions::default());
    let cache = CacheManager::new(
        Arc::new(loader),
        clock.clone(),
        Duration::from_secs(60),
        Duration::from_secs(5),
    );

    let first = cache.snapshot().await.unwrap();
    assert_eq!(first.teams().len(), 1);

    fs::remove_dir_all(&snap).unwrap();
    clock.advance(Duration::from_secs(61));

    let served = cache.snapshot().await.unwrap();
    assert!(Arc::ptr_eq(&first, &served));
    assert_eq!(cache.rebuild_count(), 2);
}

#[tokio::test]
async fn test_cache_keeps_index_when_snapshot_loses_its_stores() {
    let tmp = TempDir::new().unwrap();
    let snap = tmp.path().join("snap");
    fs::create_dir_all(&snap).unwrap();
    write_jsonl(&snap, "teams", &[json!({"id": "t1", "key": "ENG", "name": "Engineering"})]);

    let clock = Arc::new(ManualClock::new());
    let loader = SnapshotLoader::new(Arc::new(JsonlSource), snap.clone(), SnifferOptions::default());
    let cache = CacheManager::new(
        Arc::new(loader),
        clock.clone(),
        Duration::from_secs(60),
        Duration::from_secs(5),
    );
    let first = cache.snapshot().await.unwrap();
    assert_eq!(first.teams().len(), 1);

    // The directory now holds something that is not a JSONL snapshot.
    fs::remove_file(snap.join("teams.jsonl")).unwrap();
    fs::write(snap.join("CURRENT"), "MANIFEST-000001\n").unwrap();
    clock.advance(Duration::from_secs(61));

    let served = cache.snapshot().await.unwrap();
    assert!(Arc::ptr_eq(&first, &served));
    assert_eq!(served.teams().len(), 1);
    assert_eq!(cache.state(), CacheState::Stale);
}
