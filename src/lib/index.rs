//! Search index over JSON documents.
//!
//! Writes are buffered until a refresh, so a document indexed without
//! `refresh` is invisible to searches until the next refreshing write or an
//! explicit [`SearchIndex::refresh`].

use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
};

use chrono::DateTime;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::trace;

pub trait SearchIndex: Send + Sync {
    fn index(&self, kind: &str, id: &str, document: Value, refresh: bool);

    fn delete(&self, kind: &str, id: &str, refresh: bool);

    fn refresh(&self);

    fn search(&self, kind: &str, query: &SearchQuery) -> SearchHits;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortSpec {
    pub field: String,
    pub descending: bool,
}

/// Exact-term filters on dotted field paths, an optional free-text match and
/// one-based paging.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    filters: Vec<(String, Value)>,
    text: Option<String>,
    sort: Option<SortSpec>,
    page: usize,
    size: usize,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            text: None,
            sort: None,
            page: 1,
            size: 25,
        }
    }
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    pub fn text(mut self, text: Option<&str>) -> Self {
        self.text = text
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_lowercase);
        self
    }

    pub fn sort(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.sort = Some(SortSpec {
            field: field.into(),
            descending,
        });
        self
    }

    pub fn page(mut self, page: usize, size: usize) -> Self {
        self.page = page.max(1);
        self.size = size;
        self
    }

    fn matches(&self, document: &Value) -> bool {
        let filtered = self
            .filters
            .iter()
            .all(|(field, expected)| lookup(document, field) == Some(expected));
        filtered
            && self
                .text
                .as_deref()
                .is_none_or(|needle| contains_text(document, needle))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchHits {
    pub total: usize,
    pub hits: Vec<Value>,
}

#[derive(Debug)]
enum PendingOp {
    Index {
        kind: String,
        id: String,
        document: Value,
    },
    Delete {
        kind: String,
        id: String,
    },
}

#[derive(Debug, Default)]
pub struct MemoryIndex {
    visible: RwLock<HashMap<String, BTreeMap<String, Value>>>,
    pending: Mutex<Vec<PendingOp>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn enqueue(&self, op: PendingOp, refresh: bool) {
        self.pending.lock().push(op);
        if refresh {
            self.refresh();
        }
    }
}

impl SearchIndex for MemoryIndex {
    fn index(&self, kind: &str, id: &str, document: Value, refresh: bool) {
        self.enqueue(
            PendingOp::Index {
                kind: kind.to_string(),
                id: id.to_string(),
                document,
            },
            refresh,
        );
    }

    fn delete(&self, kind: &str, id: &str, refresh: bool) {
        self.enqueue(
            PendingOp::Delete {
                kind: kind.to_string(),
                id: id.to_string(),
            },
            refresh,
        );
    }

    fn refresh(&self) {
        // Drain under the visible lock so concurrent refreshes apply batches
        // in enqueue order.
        let mut visible = self.visible.write();
        let pending = std::mem::take(&mut *self.pending.lock());
        if pending.is_empty() {
            return;
        }
        trace!(operations = pending.len(), "refreshing search index");
        for op in pending {
            match op {
                PendingOp::Index { kind, id, document } => {
                    visible.entry(kind).or_default().insert(id, document);
                }
                PendingOp::Delete { kind, id } => {
                    if let Some(documents) = visible.get_mut(&kind) {
                        documents.remove(&id);
                    }
                }
            }
        }
    }

    fn search(&self, kind: &str, query: &SearchQuery) -> SearchHits {
        let visible = self.visible.read();
        let Some(documents) = visible.get(kind) else {
            return SearchHits::default();
        };
        let mut hits: Vec<&Value> = documents
            .values()
            .filter(|document| query.matches(document))
            .collect();
        if let Some(sort) = &query.sort {
            hits.sort_by(|a, b| {
                let ordering = compare(lookup(a, &sort.field), lookup(b, &sort.field));
                if sort.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }
        let total = hits.len();
        let start = (query.page - 1).saturating_mul(query.size);
        let hits = hits
            .into_iter()
            .skip(start)
            .take(query.size)
            .cloned()
            .collect();
        SearchHits { total, hits }
    }
}

fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(document, |current, segment| current.get(segment))
}

fn contains_text(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(text) => text.to_lowercase().contains(needle),
        Value::Array(items) => items.iter().any(|item| contains_text(item, needle)),
        Value::Object(map) => map.values().any(|item| contains_text(item, needle)),
        _ => false,
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => {
            match (
                DateTime::parse_from_rfc3339(a),
                DateTime::parse_from_rfc3339(b),
            ) {
                (Ok(a), Ok(b)) => a.cmp(&b),
                _ => a.cmp(b),
            }
        }
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded() -> MemoryIndex {
        let index = MemoryIndex::new();
        index.index("event", "1", json!({"request_id": "R1", "content": "First note", "n": 3}), false);
        index.index("event", "2", json!({"request_id": "R2", "content": "second", "n": 1}), false);
        index.index("event", "3", json!({"request_id": "R1", "content": "Third", "n": 2}), true);
        index
    }

    #[test]
    fn writes_are_invisible_until_refresh() {
        let index = MemoryIndex::new();
        index.index("event", "1", json!({"request_id": "R1"}), false);
        assert_eq!(index.search("event", &SearchQuery::new()).total, 0);
        index.refresh();
        assert_eq!(index.search("event", &SearchQuery::new()).total, 1);

        index.delete("event", "1", true);
        assert_eq!(index.search("event", &SearchQuery::new()).total, 0);
    }

    #[test]
    fn term_filters_scope_results() {
        let index = seeded();
        let hits = index.search("event", &SearchQuery::new().filter("request_id", "R1"));
        assert_eq!(hits.total, 2);
        assert!(hits.hits.iter().all(|hit| hit["request_id"] == "R1"));
    }

    #[test]
    fn nested_paths_and_free_text() {
        let index = MemoryIndex::new();
        index.index("request", "a", json!({"created_by": {"user": "7"}, "title": "Access please"}), true);
        index.index("request", "b", json!({"created_by": {"user": "8"}, "title": "Invite"}), true);

        let by_user = index.search("request", &SearchQuery::new().filter("created_by.user", "7"));
        assert_eq!(by_user.total, 1);

        let text = index.search("request", &SearchQuery::new().text(Some("ACCESS")));
        assert_eq!(text.hits[0]["title"], "Access please");
    }

    #[test]
    fn sort_and_paging() {
        let index = seeded();
        let query = SearchQuery::new().sort("n", true).page(1, 2);
        let hits = index.search("event", &query);
        assert_eq!(hits.total, 3);
        let order: Vec<_> = hits.hits.iter().map(|hit| hit["n"].as_i64().unwrap()).collect();
        assert_eq!(order, vec![3, 2]);

        let second = index.search("event", &SearchQuery::new().sort("n", true).page(2, 2));
        assert_eq!(second.hits.len(), 1);
        assert_eq!(second.hits[0]["n"], 1);
    }

    #[test]
    fn kinds_are_isolated() {
        let index = seeded();
        assert_eq!(index.search("request", &SearchQuery::new()).total, 0);
    }

    #[test]
    fn timestamps_sort_chronologically_across_precisions() {
        let index = MemoryIndex::new();
        index.index("event", "late", json!({"created_at": "2026-01-01T12:00:05.500Z"}), false);
        index.index("event", "early", json!({"created_at": "2026-01-01T12:00:05Z"}), false);
        index.index("event", "mid", json!({"created_at": "2026-01-01T12:00:05.120Z"}), false);
        index.index("event", "mid2", json!({"created_at": "2026-01-01T12:00:05.120500Z"}), true);

        let hits = index.search("event", &SearchQuery::new().sort("created_at", false));
        let order: Vec<_> = hits
            .hits
            .iter()
            .map(|hit| hit["created_at"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            order,
            vec![
                "2026-01-01T12:00:05Z",
                "2026-01-01T12:00:05.120Z",
                "2026-01-01T12:00:05.120500Z",
                "2026-01-01T12:00:05.500Z",
            ]
        );
    }

    #[test]
    fn refresh_applies_writes_in_enqueue_order() {
        let index = MemoryIndex::new();
        index.index("request", "r", json!({"id": "r", "revision_id": 1}), false);
        index.index("request", "r", json!({"id": "r", "revision_id": 2}), false);
        index.index("request", "g", json!({"id": "g", "revision_id": 1}), false);
        index.delete("request", "g", false);
        index.refresh();

        let hits = index.search("request", &SearchQuery::new());
        assert_eq!(hits.hits, vec![json!({"id": "r", "revision_id": 2})]);
    }
}
