use std::collections::VecDeque;
use std::ops::Range;
use std::time::SystemTime;

use regex::RegexBuilder;

use crate::instances::InstanceRef;
use crate::selection::{QueryMode, Selection};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub timestamp: SystemTime,
    pub mode: QueryMode,
    pub group_type: String,
    pub instance: Option<InstanceRef>,
    pub query: String,
}

impl HistoryEntry {
    #[must_use]
    pub fn new(timestamp: SystemTime, selection: &Selection, query: impl Into<String>) -> Self {
        Self {
            timestamp,
            mode: selection.mode(),
            group_type: selection.group_type().to_string(),
            instance: selection.instance().cloned(),
            query: query.into(),
        }
    }

    /// Everything but the timestamp matches.
    #[must_use]
    pub fn same_query_as(&self, other: &Self) -> bool {
        self.mode == other.mode
            && self.group_type == other.group_type
            && self.instance == other.instance
            && self.query == other.query
    }

    #[must_use]
    pub fn label(&self) -> String {
        match &self.instance {
            Some(instance) => format!("{} {} {instance}", self.mode, self.group_type),
            None => format!("{} {}", self.mode, self.group_type),
        }
    }

    /// The selection this entry was issued with.
    #[must_use]
    pub fn selection(&self) -> Selection {
        let selection = Selection::new(self.mode).set_group_type(self.group_type.clone());
        match &self.instance {
            Some(instance) => selection.set_instance(instance.clone()),
            None => selection,
        }
    }

    fn matches(&self, needle_lower: &str) -> bool {
        format!("{} {}", self.query, self.label())
            .to_lowercase()
            .contains(needle_lower)
    }
}

/// Session-scoped log of issued queries, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: Option<usize>,
}

impl QueryHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: Some(capacity.max(1)),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Appends `entry` unless it repeats the most recent entry. Returns whether
    /// the history grew.
    pub fn append(&mut self, entry: HistoryEntry) -> bool {
        if self
            .entries
            .back()
            .is_some_and(|last| last.same_query_as(&entry))
        {
            return false;
        }

        if let Some(capacity) = self.capacity {
            while self.entries.len() >= capacity {
                self.entries.pop_front();
            }
        }
        self.entries.push_back(entry);
        true
    }

    #[must_use]
    pub fn search(&self, needle: &str) -> Vec<&HistoryEntry> {
        let needle = needle.to_lowercase();
        self.entries
            .iter()
            .filter(|entry| entry.matches(&needle))
            .collect()
    }
}

/// Byte ranges in `text` matched by any whitespace-separated token of
/// `needle`, case-insensitively. Ranges start and end on char boundaries, so
/// they can slice `text` directly. At each position the first token that
/// matches wins; ranges never overlap.
#[must_use]
pub fn highlight_spans(text: &str, needle: &str) -> Vec<Range<usize>> {
    let tokens = needle
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>();
    if tokens.is_empty() {
        return Vec::new();
    }

    let Ok(pattern) = RegexBuilder::new(&tokens.join("|"))
        .case_insensitive(true)
        .build()
    else {
        return Vec::new();
    };

    pattern.find_iter(text).map(|found| found.range()).collect()
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use super::{highlight_spans, HistoryEntry, QueryHistory};
    use crate::instances::InstanceRef;
    use crate::selection::{QueryMode, Selection};

    fn at(seconds: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(seconds)
    }

    fn orders_instance() -> InstanceRef {
        InstanceRef {
            id: 2,
            group_type: "orders".to_string(),
            title: "Orders EU".to_string(),
        }
    }

    #[test]
    fn adjacent_duplicates_are_dropped() {
        let selection = Selection::default().set_group_type("orders");
        let mut history = QueryHistory::new();

        assert!(history.append(HistoryEntry::new(at(1), &selection, "select 1")));
        assert!(!history.append(HistoryEntry::new(at(2), &selection, "select 1")));
        assert_eq!(history.len(), 1);

        assert!(history.append(HistoryEntry::new(at(3), &selection, "select 2")));
        assert!(history.append(HistoryEntry::new(at(4), &selection, "select 1")));
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn changed_selection_is_a_distinct_entry() {
        let group = Selection::default().set_instance(orders_instance());
        let single = group.clone().set_mode(QueryMode::Single);
        let mut history = QueryHistory::new();

        history.append(HistoryEntry::new(at(1), &group, "select 1"));
        history.append(HistoryEntry::new(at(2), &single, "select 1"));

        assert_eq!(history.len(), 2);
    }

    #[test]
    fn capacity_evicts_oldest_entries() {
        let selection = Selection::default().set_group_type("orders");
        let mut history = QueryHistory::with_capacity(2);

        for (index, query) in ["a", "b", "c"].into_iter().enumerate() {
            history.append(HistoryEntry::new(at(index as u64), &selection, query));
        }

        let queries = history
            .entries()
            .map(|entry| entry.query.as_str())
            .collect::<Vec<_>>();
        assert_eq!(queries, vec!["b", "c"]);
    }

    #[test]
    fn search_matches_query_and_label_case_insensitively() {
        let mut history = QueryHistory::new();
        let single = Selection::new(QueryMode::Single).set_instance(orders_instance());
        let group = Selection::default().set_group_type("users");
        history.append(HistoryEntry::new(at(1), &single, "SELECT * FROM invoices"));
        history.append(HistoryEntry::new(at(2), &group, "select count(*) from accounts"));

        let by_query = history.search("INVOICES");
        assert_eq!(by_query.len(), 1);
        assert_eq!(by_query[0].query, "SELECT * FROM invoices");

        let by_title = history.search("orders eu");
        assert_eq!(by_title.len(), 1);

        let by_mode = history.search("group users");
        assert_eq!(by_mode.len(), 1);

        assert_eq!(history.search("").len(), 2);
        assert!(history.search("missing").is_empty());
    }

    #[test]
    fn label_includes_mode_group_type_and_instance() {
        let single = Selection::new(QueryMode::Single).set_instance(orders_instance());
        let entry = HistoryEntry::new(at(1), &single, "select 1");
        assert_eq!(entry.label(), "single orders 2. Orders EU");

        let group = Selection::default().set_group_type("users");
        assert_eq!(HistoryEntry::new(at(1), &group, "x").label(), "group users");
    }

    #[test]
    fn replayed_selection_matches_recorded_one() {
        let single = Selection::new(QueryMode::Single).set_instance(orders_instance());
        let entry = HistoryEntry::new(at(1), &single, "select 1");

        assert_eq!(entry.selection(), single);
    }

    #[test]
    fn highlight_spans_cover_every_token_match() {
        let spans = highlight_spans("SELECT id FROM users WHERE id = 1", "id users");
        assert_eq!(spans, vec![7..9, 15..20, 27..29]);
    }

    #[test]
    fn highlight_spans_prefer_first_token_at_same_position() {
        let spans = highlight_spans("selection", "sel selection");
        assert_eq!(spans, vec![0..3]);

        assert!(highlight_spans("anything", "   ").is_empty());
        assert_eq!(highlight_spans("a.b", "."), vec![1..2]);
    }

    #[test]
    fn highlight_spans_slice_non_ascii_text() {
        let text = "Ünïcode café, CAFÉ";
        let spans = highlight_spans(text, "café");

        assert_eq!(spans, vec![10..15, 17..22]);
        let matched = spans
            .iter()
            .map(|span| &text[span.clone()])
            .collect::<Vec<_>>();
        assert_eq!(matched, vec!["café", "CAFÉ"]);
    }
}
