use std::cmp::Ordering;

use once_cell::sync::Lazy;
use time::format_description::{self, FormatItem};
use time::Date;

use crate::entry::DiaryEntry;

static DAY_FORMAT: Lazy<Vec<FormatItem<'static>>> = Lazy::new(|| {
    format_description::parse("[year]-[month]-[day]").expect("valid date format description")
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterCriteria {
    pub search_term: String,
    pub selected_date: Option<Date>,
}

impl FilterCriteria {
    pub fn new(search_term: impl Into<String>, selected_date: Option<Date>) -> Self {
        Self {
            search_term: search_term.into(),
            selected_date,
        }
    }

    pub fn is_unfiltered(&self) -> bool {
        self.search_term.is_empty() && self.selected_date.is_none()
    }

    pub fn matches(&self, entry: &DiaryEntry) -> bool {
        self.matches_term(entry) && self.matches_day(entry)
    }

    fn matches_term(&self, entry: &DiaryEntry) -> bool {
        if self.search_term.is_empty() {
            return true;
        }
        let needle = self.search_term.to_lowercase();
        entry.title.to_lowercase().contains(&needle)
            || entry.content.to_lowercase().contains(&needle)
            || entry
                .tags
                .iter()
                .any(|tag| tag.to_lowercase().contains(&needle))
    }

    fn matches_day(&self, entry: &DiaryEntry) -> bool {
        match self.selected_date {
            None => true,
            Some(day) => entry.day() == Some(day),
        }
    }
}

/// Filtered, newest-first view over a borrowed entry slice. Nothing is cached:
/// every call to [`FilterView::iter`] filters and sorts again.
#[derive(Debug, Clone, Copy)]
pub struct FilterView<'a> {
    entries: &'a [DiaryEntry],
    criteria: &'a FilterCriteria,
}

impl<'a> FilterView<'a> {
    pub fn new(entries: &'a [DiaryEntry], criteria: &'a FilterCriteria) -> Self {
        Self { entries, criteria }
    }

    pub fn iter(&self) -> std::vec::IntoIter<&'a DiaryEntry> {
        let criteria = self.criteria;
        let mut matched: Vec<&'a DiaryEntry> = self
            .entries
            .iter()
            .filter(|entry| criteria.matches(entry))
            .collect();
        matched.sort_by(|a, b| newest_first(a, b));
        matched.into_iter()
    }

    pub fn count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| self.criteria.matches(entry))
            .count()
    }
}

impl<'a> IntoIterator for FilterView<'a> {
    type Item = &'a DiaryEntry;
    type IntoIter = std::vec::IntoIter<&'a DiaryEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Descending by timestamp; unparseable dates sort last, ties by id.
pub fn newest_first(a: &DiaryEntry, b: &DiaryEntry) -> Ordering {
    match (a.timestamp(), b.timestamp()) {
        (Some(left), Some(right)) => right.cmp(&left),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.id.cmp(&b.id))
}

pub fn parse_day(input: &str) -> Option<Date> {
    Date::parse(input.trim(), &*DAY_FORMAT).ok()
}
