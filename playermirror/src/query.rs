//! Paged, searchable and sortable views over one playlist's entries.

use std::cmp::Ordering;

use serde::Serialize;

use crate::model::{Entry, EntryField, EntryId, FieldValue};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SortKey {
    pub field: EntryField,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn ascending(field: EntryField) -> Self {
        Self {
            field,
            direction: SortDirection::Ascending,
        }
    }

    pub fn descending(field: EntryField) -> Self {
        Self {
            field,
            direction: SortDirection::Descending,
        }
    }
}

/// Filter, order and window applied to a playlist's entries.
///
/// A `count` of 0 returns everything from `start_index` on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntryQuery {
    pub search: Option<String>,
    pub order_by: Vec<SortKey>,
    pub start_index: usize,
    pub count: usize,
}

impl EntryQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.search = Some(text.into());
        self
    }

    pub fn order_by(mut self, key: SortKey) -> Self {
        self.order_by.push(key);
        self
    }

    pub fn page(mut self, start_index: usize, count: usize) -> Self {
        self.start_index = start_index;
        self.count = count;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EntryPage {
    pub entries: Vec<Entry>,
    /// Size of the playlist.
    pub total_entries: usize,
    /// Entries matching the search, before paging.
    pub found_entries: usize,
}

const SEARCHED_FIELDS: [EntryField; 5] = [
    EntryField::Title,
    EntryField::Artist,
    EntryField::Album,
    EntryField::Date,
    EntryField::Genre,
];

fn matches(entry: &Entry, needle: &str) -> bool {
    SEARCHED_FIELDS.iter().any(|field| match entry.field(*field) {
        FieldValue::Text(text) => text.to_lowercase().contains(needle),
        FieldValue::Integer(_) => false,
    })
}

fn compare_values(a: &FieldValue, b: &FieldValue) -> Ordering {
    match (a, b) {
        (FieldValue::Text(a), FieldValue::Text(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
        (FieldValue::Integer(a), FieldValue::Integer(b)) => a.cmp(b),
        (FieldValue::Integer(_), FieldValue::Text(_)) => Ordering::Less,
        (FieldValue::Text(_), FieldValue::Integer(_)) => Ordering::Greater,
    }
}

fn compare_entries(a: &Entry, b: &Entry, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let ordering = compare_values(&a.field(key.field), &b.field(key.field));
        let ordering = match key.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.order_index.cmp(&b.order_index)
}

/// Filtered and ordered view, before paging.
fn view<'a>(entries: &'a [Entry], query: &EntryQuery) -> Vec<&'a Entry> {
    let needle = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);

    let mut selected: Vec<&Entry> = match &needle {
        Some(needle) => entries.iter().filter(|e| matches(e, needle)).collect(),
        None => entries.iter().collect(),
    };
    if !query.order_by.is_empty() {
        selected.sort_by(|a, b| compare_entries(a, b, &query.order_by));
    }
    selected
}

pub(crate) fn run(entries: &[Entry], query: &EntryQuery) -> EntryPage {
    let selected = view(entries, query);
    let found_entries = selected.len();
    let take = if query.count == 0 { usize::MAX } else { query.count };
    let page = selected
        .into_iter()
        .skip(query.start_index)
        .take(take)
        .cloned()
        .collect();

    EntryPage {
        entries: page,
        total_entries: entries.len(),
        found_entries,
    }
}

pub(crate) fn position_of(entries: &[Entry], entry_id: EntryId, query: &EntryQuery) -> Option<usize> {
    view(entries, query)
        .iter()
        .position(|entry| entry.entry_id == entry_id)
}
