//! Schema sniffing: infer what an undocumented store holds by sampling it.
//!
//! The desktop app names its object stores with opaque hashes that change
//! between releases, so nothing here keys off a store name. Instead each
//! store is sampled, every sampled record is flattened to its top-level
//! fields, and two things are derived:
//!
//! 1. a per-field type (majority vote over the sample), and
//! 2. the store's [`Role`], scored against signature field sets.
//!
//! The result is a [`SchemaDescriptor`] that the [`decode`](crate::decode)
//! layer consumes. Inference never looks at more than
//! [`SnifferOptions::sample_size`] records and is deterministic for an
//! unchanged store.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::SchemaConfig;
use crate::error::{LinearError, LinearResult};
use crate::models::{Role, StateType};
use crate::source::SnapshotHandle;

/// Share of non-null observations a type needs to win the field.
const MAJORITY_SHARE: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Bool,
    Array,
    Object,
    /// Only ever observed as `null`.
    Null,
    /// No type reached the majority share.
    Mixed,
}

impl FieldType {
    fn of(value: &Value) -> FieldType {
        match value {
            Value::Null => FieldType::Null,
            Value::Bool(_) => FieldType::Bool,
            Value::Number(n) if n.is_i64() || n.is_u64() => FieldType::Integer,
            Value::Number(_) => FieldType::Float,
            Value::String(_) => FieldType::String,
            Value::Array(_) => FieldType::Array,
            Value::Object(_) => FieldType::Object,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSchema {
    pub name: String,
    pub inferred_type: FieldType,
    pub nullable: bool,
    pub is_reference_to: Option<Role>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaDescriptor {
    pub store: String,
    pub role: Role,
    /// Score of the winning role, in `[0, 1]`.
    pub confidence: f64,
    /// Sorted by field name.
    pub fields: Vec<FieldSchema>,
    pub total_records: usize,
    pub sampled: usize,
    pub skipped: usize,
}

impl SchemaDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields
            .binary_search_by(|f| f.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.fields[i])
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.field(name).map(|f| f.inferred_type)
    }
}

/// Sampling and classification thresholds.
#[derive(Debug, Clone)]
pub struct SnifferOptions {
    pub sample_size: usize,
    pub min_sample: usize,
    pub max_skip_ratio: f64,
    pub min_confidence: f64,
}

impl Default for SnifferOptions {
    fn default() -> Self {
        Self {
            sample_size: 200,
            min_sample: 1,
            max_skip_ratio: 0.5,
            min_confidence: 0.6,
        }
    }
}

impl From<&SchemaConfig> for SnifferOptions {
    fn from(cfg: &SchemaConfig) -> Self {
        Self {
            sample_size: cfg.sample_size,
            min_sample: cfg.min_sample,
            max_skip_ratio: cfg.max_skip_ratio,
            min_confidence: cfg.min_confidence,
        }
    }
}

/// Sample `store` and infer its schema.
///
/// Counts the store first, then takes every `ceil(total / sample_size)`-th
/// record so the sample spans the whole store instead of its oldest
/// insertions.
pub fn sniff_store(
    handle: &dyn SnapshotHandle,
    store: &str,
    opts: &SnifferOptions,
) -> LinearResult<SchemaDescriptor> {
    let total = handle.iterate(store)?.count();
    let sample_size = opts.sample_size.max(1);
    let stride = total.div_ceil(sample_size).max(1);

    let mut samples = Vec::new();
    let mut skipped = 0usize;
    for item in handle.iterate(store)?.step_by(stride).take(sample_size) {
        match item.ok().and_then(|rec| parse_object(&rec.value)) {
            Some(map) => samples.push(map),
            None => skipped += 1,
        }
    }

    infer_schema(store, &samples, skipped, total, opts)
}

/// Infer a descriptor from already-drawn samples.
pub fn infer_schema(
    store: &str,
    samples: &[Map<String, Value>],
    skipped: usize,
    total_records: usize,
    opts: &SnifferOptions,
) -> LinearResult<SchemaDescriptor> {
    if samples.len() < opts.min_sample.max(1) {
        return Err(LinearError::InsufficientSample {
            store: store.to_string(),
            decodable: samples.len(),
            required: opts.min_sample.max(1),
        });
    }

    let fields = infer_fields(samples);
    let sampled = samples.len() + skipped;
    let skip_ratio = skipped as f64 / sampled as f64;

    let (role, confidence) = if skip_ratio > opts.max_skip_ratio {
        (Role::Unknown, 0.0)
    } else {
        classify(samples, opts.min_confidence)
    };

    Ok(SchemaDescriptor {
        store: store.to_string(),
        role,
        confidence,
        fields,
        total_records,
        sampled,
        skipped,
    })
}

fn parse_object(bytes: &[u8]) -> Option<Map<String, Value>> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

// ============ Field inference ============

#[derive(Default)]
struct FieldTally {
    present: usize,
    nulls: usize,
    types: BTreeMap<FieldType, usize>,
}

fn infer_fields(samples: &[Map<String, Value>]) -> Vec<FieldSchema> {
    let mut tallies: BTreeMap<&str, FieldTally> = BTreeMap::new();
    for record in samples {
        for (name, value) in record {
            let tally = tallies.entry(name.as_str()).or_default();
            tally.present += 1;
            match FieldType::of(value) {
                FieldType::Null => tally.nulls += 1,
                ty => *tally.types.entry(ty).or_default() += 1,
            }
        }
    }

    tallies
        .into_iter()
        .map(|(name, tally)| {
            let inferred_type = majority_type(&tally);
            let nullable = tally.nulls > 0
                || tally.present < samples.len()
                || inferred_type == FieldType::Mixed;
            FieldSchema {
                name: name.to_string(),
                inferred_type,
                nullable,
                is_reference_to: reference_target(name),
            }
        })
        .collect()
}

fn majority_type(tally: &FieldTally) -> FieldType {
    let non_null: usize = tally.types.values().sum();
    if non_null == 0 {
        return FieldType::Null;
    }

    // Integers and floats in one column are one numeric column.
    let numeric_only = tally
        .types
        .keys()
        .all(|t| matches!(t, FieldType::Integer | FieldType::Float));
    if numeric_only && tally.types.len() > 1 {
        return FieldType::Float;
    }

    // BTreeMap order makes the tie-break deterministic.
    let (best, count) = tally
        .types
        .iter()
        .fold((FieldType::Mixed, 0usize), |acc, (ty, n)| {
            if *n > acc.1 {
                (*ty, *n)
            } else {
                acc
            }
        });

    if count as f64 / non_null as f64 >= MAJORITY_SHARE {
        best
    } else {
        FieldType::Mixed
    }
}

/// Which entity role a field name points at, if it is a reference.
pub fn reference_target(name: &str) -> Option<Role> {
    match name {
        "assigneeId" | "creatorId" | "userId" => Some(Role::User),
        "teamId" => Some(Role::Team),
        "stateId" => Some(Role::State),
        "issueId" | "parentId" => Some(Role::Issue),
        _ => None,
    }
}

// ============ Role classification ============

fn has_all(record: &Map<String, Value>, fields: &[&str]) -> bool {
    fields.iter().all(|f| record.contains_key(*f))
}

fn looks_like_issue(record: &Map<String, Value>) -> bool {
    has_all(record, &["number", "teamId", "stateId", "title"])
}

fn looks_like_user(record: &Map<String, Value>) -> bool {
    has_all(record, &["name", "displayName", "email"])
        && (record.contains_key("avatarUrl") || record.contains_key("avatar"))
}

fn looks_like_team(record: &Map<String, Value>) -> bool {
    if !has_all(record, &["key", "name"]) {
        return false;
    }
    match record.get("key").and_then(|k| k.as_str()) {
        Some(key) => {
            !key.is_empty() && key.len() <= 10 && key.chars().all(|c| c.is_ascii_uppercase())
        }
        None => false,
    }
}

fn looks_like_state(record: &Map<String, Value>) -> bool {
    has_all(record, &["name", "type", "color"])
        && record
            .get("type")
            .and_then(|t| t.as_str())
            .map(|t| t.parse::<StateType>().is_ok())
            .unwrap_or(false)
}

fn looks_like_comment(record: &Map<String, Value>) -> bool {
    has_all(record, &["issueId", "userId", "bodyData", "createdAt"])
}

fn signature(role: Role) -> fn(&Map<String, Value>) -> bool {
    match role {
        Role::Issue => looks_like_issue,
        Role::User => looks_like_user,
        Role::Team => looks_like_team,
        Role::State => looks_like_state,
        Role::Comment => looks_like_comment,
        Role::Unknown => |_| false,
    }
}

/// Score every role by the share of samples matching its signature.
/// Highest score wins; [`Role::PRIORITY`] breaks ties.
fn classify(samples: &[Map<String, Value>], min_confidence: f64) -> (Role, f64) {
    let mut best = (Role::Unknown, 0.0f64);
    for role in Role::PRIORITY {
        let matches = samples.iter().filter(|r| signature(role)(r)).count();
        let score = matches as f64 / samples.len() as f64;
        if score > best.1 {
            best = (role, score);
        }
    }

    if best.1 >= min_confidence {
        best
    } else {
        (Role::Unknown, best.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemorySource, RawRecord, RecordSource};
    use serde_json::json;
    use std::path::Path;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    fn issue(n: i64) -> Value {
        json!({
            "id": format!("i{}", n),
            "number": n,
            "title": format!("Issue {}", n),
            "teamId": "t1",
            "stateId": "s1",
            "assigneeId": if n % 2 == 0 { json!("u1") } else { Value::Null },
            "updatedAt": "2024-01-01T00:00:00Z",
        })
    }

    #[test]
    fn test_classifies_issue_store() {
        let samples: Vec<_> = (1..=10).map(|n| obj(issue(n))).collect();
        let desc = infer_schema("a1", &samples, 0, 10, &SnifferOptions::default()).unwrap();
        assert_eq!(desc.role, Role::Issue);
        assert!((desc.confidence - 1.0).abs() < f64::EPSILON);

        let number = desc.field("number").unwrap();
        assert_eq!(number.inferred_type, FieldType::Integer);
        assert!(!number.nullable);

        let assignee = desc.field("assigneeId").unwrap();
        assert_eq!(assignee.inferred_type, FieldType::String);
        assert!(assignee.nullable);
        assert_eq!(assignee.is_reference_to, Some(Role::User));
        assert_eq!(desc.field("teamId").unwrap().is_reference_to, Some(Role::Team));
    }

    #[test]
    fn test_classifies_small_stores() {
        let opts = SnifferOptions::default();
        let team = [obj(json!({"id": "t1", "key": "ENG", "name": "Engineering"}))];
        assert_eq!(infer_schema("b", &team, 0, 1, &opts).unwrap().role, Role::Team);

        let user = [obj(json!({
            "id": "u1", "name": "Ada", "displayName": "ada",
            "email": "ada@example.com", "avatarUrl": null
        }))];
        assert_eq!(infer_schema("c", &user, 0, 1, &opts).unwrap().role, Role::User);

        let state = [obj(json!({"id": "s1", "name": "Todo", "type": "unstarted", "color": "#fff"}))];
        assert_eq!(infer_schema("d", &state, 0, 1, &opts).unwrap().role, Role::State);

        let comment = [obj(json!({
            "id": "c1", "issueId": "i1", "userId": "u1",
            "bodyData": "{}", "createdAt": 1
        }))];
        assert_eq!(
            infer_schema("e", &comment, 0, 1, &opts).unwrap().role,
            Role::Comment
        );
    }

    #[test]
    fn test_lowercase_team_key_is_not_a_team() {
        let samples = [obj(json!({"id": "t1", "key": "eng", "name": "Engineering"}))];
        let desc = infer_schema("x", &samples, 0, 1, &SnifferOptions::default()).unwrap();
        assert_eq!(desc.role, Role::Unknown);
    }

    #[test]
    fn test_mixed_field_is_nullable_mixed() {
        let mut samples: Vec<_> = (0..5).map(|i| obj(json!({ "v": i }))).collect();
        samples.extend((0..5).map(|i| obj(json!({ "v": format!("{}", i) }))));
        let desc = infer_schema("m", &samples, 0, 10, &SnifferOptions::default()).unwrap();
        let v = desc.field("v").unwrap();
        assert_eq!(v.inferred_type, FieldType::Mixed);
        assert!(v.nullable);
    }

    #[test]
    fn test_int_and_float_merge_to_float() {
        let samples = [obj(json!({"p": 1})), obj(json!({"p": 2.5}))];
        let desc = infer_schema("n", &samples, 0, 2, &SnifferOptions::default()).unwrap();
        assert_eq!(desc.field_type("p"), Some(FieldType::Float));
    }

    #[test]
    fn test_high_skip_ratio_marks_unknown() {
        let samples = [obj(issue(1))];
        let desc = infer_schema("s", &samples, 3, 4, &SnifferOptions::default()).unwrap();
        assert_eq!(desc.role, Role::Unknown);
        assert_eq!(desc.skipped, 3);
    }

    #[test]
    fn test_below_confidence_is_unknown() {
        let mut samples: Vec<_> = (1..=2).map(|n| obj(issue(n))).collect();
        samples.extend((0..3).map(|i| obj(json!({ "id": i }))));
        let desc = infer_schema("q", &samples, 0, 5, &SnifferOptions::default()).unwrap();
        assert_eq!(desc.role, Role::Unknown);
        assert!((desc.confidence - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_empty_store_is_insufficient() {
        let source = MemorySource::new().with_store("empty", vec![]);
        let handle = source.open(Path::new("")).unwrap();
        let err = sniff_store(handle.as_ref(), "empty", &SnifferOptions::default()).unwrap_err();
        assert_eq!(err.kind(), "insufficient_sample");
    }

    #[test]
    fn test_sample_spans_whole_store_and_is_deterministic() {
        // First half malformed; a head-only sample would see nothing usable.
        let mut records: Vec<RawRecord> = (0..50)
            .map(|i| RawRecord::new(format!("bad{}", i), "garbage"))
            .collect();
        records.extend((1..=50).map(|n| RawRecord::from_json(format!("i{}", n), &issue(n))));
        let source = MemorySource::new().with_store("issues", records);
        let handle = source.open(Path::new("")).unwrap();

        let opts = SnifferOptions {
            sample_size: 10,
            max_skip_ratio: 0.6,
            ..SnifferOptions::default()
        };
        let first = sniff_store(handle.as_ref(), "issues", &opts).unwrap();
        let second = sniff_store(handle.as_ref(), "issues", &opts).unwrap();

        assert_eq!(first.sampled, 10);
        assert_eq!(first.skipped, 5);
        assert_eq!(first.total_records, 100);
        assert_eq!(first, second);
    }
}
